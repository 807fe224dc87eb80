#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(binary) = binweave::parse(data) {
        let view = binary.view();
        let _ = view.sections();
        let _ = view.symbols();
        let _ = view.relocations();
        let _ = view.imports();
    }
});
