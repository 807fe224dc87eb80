#![no_main]
use libfuzzer_sys::fuzz_target;

// A parse that succeeds must rebuild to the same bytes.
fuzz_target!(|data: &[u8]| {
    if let Ok(binary) = binweave::parse(data) {
        if let Ok(out) = binweave::build(&binary) {
            assert_eq!(out, data);
        }
    }
});
