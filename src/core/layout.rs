//! Layout planning shared by all three builders.
//!
//! A builder describes its image as a [`LayoutRequest`]: address-space
//! segments holding member [`Block`]s, plus loose blocks that live only in the
//! file. [`plan`] assigns every block a final file offset and address and
//! reports which byte ranges the serializer must clear or zero-fill.
//!
//! Placement rules, in order of priority:
//!
//! - Pinned blocks keep their original position even when they grow.
//! - A block that neither grew nor collides keeps its position relative to
//!   its segment. Segments keep their original placement unless pushed.
//! - Grown, displaced and new members go to the tail of their segment.
//! - A segment pushed by its predecessor shifts by a multiple of its
//!   alignment; every later segment shifts at least as far.
//! - New segments and blocks that cannot stay in place are appended.
//! - Trailing blocks come after everything else and only move when
//!   something now ends past their start.
//!
//! Nothing moves unless something grew, so an unedited model plans to its
//! original layout.

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::stream::ByteWriter;
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, trace};

/// Round `value` up to a multiple of `alignment`. Alignments of 0 and 1 are
/// no-ops; non-power-of-two alignments are honoured.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment).saturating_mul(alignment)
    }
}

/// Identity of a contiguous run of bytes in the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKey {
    FileHeader,
    ProgramHeaders,
    SectionHeaders,
    LoadCommands,
    /// Arena index of a section.
    Section(usize),
    /// Format-defined table or opaque region.
    Blob(usize),
}

/// Where a block or segment sits in the file and in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub offset: u64,
    pub address: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl Placement {
    pub fn new(offset: u64, address: u64, file_size: u64, mem_size: u64) -> Self {
        Self {
            offset,
            address,
            file_size,
            mem_size,
        }
    }

    pub fn file_end(&self) -> u64 {
        self.offset.saturating_add(self.file_size)
    }

    pub fn mem_end(&self) -> u64 {
        self.address.saturating_add(self.mem_size)
    }

    pub fn file_range(&self) -> Range<u64> {
        self.offset..self.file_end()
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub key: BlockKey,
    /// Placement at parse time; `None` for blocks created by edits.
    pub original: Option<Placement>,
    pub file_size: u64,
    pub mem_size: u64,
    pub align: u64,
    pub pinned: bool,
}

impl Block {
    pub fn new(key: BlockKey, file_size: u64, mem_size: u64, align: u64) -> Self {
        Self {
            key,
            original: None,
            file_size,
            mem_size,
            align: align.max(1),
            pinned: false,
        }
    }

    pub fn with_original(mut self, original: Option<Placement>) -> Self {
        self.original = original;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    fn grew(&self) -> bool {
        match self.original {
            Some(o) => self.file_size > o.file_size || self.mem_size > o.mem_size,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub key: usize,
    pub original: Option<Placement>,
    /// Alignment that shifts of this segment must preserve.
    pub align: u64,
    /// Members in canonical (original file) order.
    pub members: Vec<Block>,
    /// Round grown sizes up to `align`.
    pub round_to_align: bool,
    /// Size from members only instead of never shrinking below the original.
    pub exact_size: bool,
    /// Requested address for a new segment.
    pub fixed_address: Option<u64>,
    /// Insert a new segment in front of this existing one instead of
    /// appending it; the existing segment and everything after it shift.
    pub before: Option<usize>,
}

impl SegmentRequest {
    pub fn new(key: usize, original: Option<Placement>, align: u64) -> Self {
        Self {
            key,
            original,
            align: align.max(1),
            members: Vec::new(),
            round_to_align: false,
            exact_size: false,
            fixed_address: None,
            before: None,
        }
    }
}

/// A block that existed at parse time and was removed by an edit.
#[derive(Debug, Clone)]
pub struct RemovedBlock {
    pub original: Placement,
    pub segment: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LayoutRequest {
    pub segments: Vec<SegmentRequest>,
    pub loose: Vec<Block>,
    /// File-only blocks that must stay behind every other block, such as a
    /// PE overlay.
    pub trailing: Vec<Block>,
    pub removed: Vec<RemovedBlock>,
    /// File offsets and addresses of a segment must stay congruent modulo its
    /// alignment (ELF, Mach-O). PE shifts file and address space separately.
    pub congruent: bool,
    /// Granularity of file offsets for segments when not congruent.
    pub file_align: u64,
    /// Output is never shorter than this, and appended blocks start past it.
    pub preserve_size: u64,
    pub max_offset: u64,
    pub max_address: u64,
}

impl LayoutRequest {
    pub fn new(congruent: bool, wide: bool) -> Self {
        let limit = if wide { u64::MAX } else { u64::from(u32::MAX) };
        Self {
            segments: Vec::new(),
            loose: Vec::new(),
            trailing: Vec::new(),
            removed: Vec::new(),
            congruent,
            file_align: 1,
            preserve_size: 0,
            max_offset: limit,
            max_address: limit,
        }
    }
}

/// A segment whose file image moved; its original bytes are carried along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMove {
    pub from: Range<u64>,
    pub to: u64,
}

/// The outcome of [`plan`].
#[derive(Debug, Clone, Default)]
pub struct LayoutPlan {
    blocks: HashMap<BlockKey, Placement>,
    originals: HashMap<BlockKey, Placement>,
    segments: HashMap<usize, Placement>,
    file_size: u64,
    moves: Vec<SegmentMove>,
    cleared: Vec<Range<u64>>,
    vacated: Vec<Range<u64>>,
    fresh: Vec<Range<u64>>,
}

impl LayoutPlan {
    pub fn block(&self, key: BlockKey) -> Option<Placement> {
        self.blocks.get(&key).copied()
    }

    pub fn segment(&self, key: usize) -> Option<Placement> {
        self.segments.get(&key).copied()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// How far a block's address moved. Zero for new blocks.
    pub fn address_delta(&self, key: BlockKey) -> i64 {
        match (self.originals.get(&key), self.blocks.get(&key)) {
            (Some(o), Some(p)) => p.address.wrapping_sub(o.address) as i64,
            _ => 0,
        }
    }

    pub fn offset_delta(&self, key: BlockKey) -> i64 {
        match (self.originals.get(&key), self.blocks.get(&key)) {
            (Some(o), Some(p)) => p.offset.wrapping_sub(o.offset) as i64,
            _ => 0,
        }
    }

    /// True when a block exists at a different offset, address or size than it was parsed with.
    pub fn changed(&self, key: BlockKey) -> bool {
        match (self.originals.get(&key), self.blocks.get(&key)) {
            (Some(o), Some(p)) => o != p,
            _ => true,
        }
    }

    /// Whether any block or segment differs from its parse-time placement.
    pub fn is_identity(&self) -> bool {
        self.moves.is_empty()
            && self.cleared.is_empty()
            && self.vacated.is_empty()
            && self.fresh.is_empty()
            && self
                .blocks
                .iter()
                .all(|(k, p)| self.originals.get(k) == Some(p))
    }

    pub fn moves(&self) -> &[SegmentMove] {
        &self.moves
    }

    /// Original ranges of blocks and segments that no longer live there.
    /// Clear these before copying moved segments.
    pub fn cleared(&self) -> &[Range<u64>] {
        &self.cleared
    }

    /// Ranges inside moved segments that their former occupants left.
    pub fn vacated(&self) -> &[Range<u64>] {
        &self.vacated
    }

    /// File ranges newly covered by a grown segment.
    pub fn fresh(&self) -> &[Range<u64>] {
        &self.fresh
    }
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < a.end && b.start < b.end && a.start < b.end && b.start < a.end
}

fn collides(range: &Range<u64>, used: &[Range<u64>]) -> bool {
    used.iter().any(|u| overlaps(range, u))
}

struct Planner {
    plan: LayoutPlan,
    used: Vec<Range<u64>>,
    /// (original file start, shift) of placed segments in file order.
    shifts: Vec<(u64, u64)>,
    highest_address: u64,
}

impl Planner {
    fn place(&mut self, block: &Block, at: Placement) {
        trace!(key = ?block.key, offset = at.offset, address = at.address, "placed block");
        if let Some(o) = block.original {
            self.plan.originals.insert(block.key, o);
        }
        if at.file_size > 0 {
            self.used.push(at.file_range());
        }
        self.plan.blocks.insert(block.key, at);
    }

    fn file_shift_at(&self, offset: u64) -> u64 {
        self.shifts
            .iter()
            .filter(|(start, _)| *start <= offset)
            .max_by_key(|(start, _)| *start)
            .map_or(0, |(_, shift)| *shift)
    }

    /// Place members of one segment whose image starts at `base`/`addr`.
    /// Returns the (file, memory) extent relative to the segment start.
    fn place_members(&mut self, seg: &SegmentRequest, base: u64, addr: u64) -> (u64, u64) {
        let mut file_extent = 0u64;
        let mut mem_extent = 0u64;
        let mut taken: Vec<Range<u64>> = Vec::new();
        let mut nobits: Vec<Range<u64>> = Vec::new();
        let mut tail: Vec<&Block> = Vec::new();

        let relative = |b: &Block| -> Option<(u64, u64)> {
            let (o, s) = (b.original?, seg.original?);
            Some((
                o.offset.checked_sub(s.offset)?,
                o.address.checked_sub(s.address)?,
            ))
        };

        // Pinned members first so that growth displaces everyone else.
        let pinned = seg.members.iter().filter(|b| b.pinned);
        let movable = seg.members.iter().filter(|b| !b.pinned);
        for (pass, members) in [pinned.collect::<Vec<_>>(), movable.collect()]
            .into_iter()
            .enumerate()
        {
            for block in members {
                let keep = pass == 0 || !block.grew();
                let Some((rel_off, rel_addr)) = relative(block).filter(|_| keep) else {
                    tail.push(block);
                    continue;
                };
                let file_range = base + rel_off..base + rel_off + block.file_size;
                let mem_range = rel_addr..rel_addr + block.mem_size;
                let clash = if block.file_size > 0 {
                    collides(&file_range, &taken)
                } else {
                    collides(&mem_range, &nobits)
                };
                if clash && pass > 0 {
                    tail.push(block);
                    continue;
                }
                if block.file_size > 0 {
                    taken.push(file_range);
                    file_extent = file_extent.max(rel_off + block.file_size);
                } else if block.mem_size > 0 {
                    nobits.push(mem_range);
                }
                mem_extent = mem_extent.max(rel_addr + block.mem_size);
                let at = Placement::new(
                    base + rel_off,
                    addr + rel_addr,
                    block.file_size,
                    block.mem_size,
                );
                self.place(block, at);
            }
        }

        // Keep tail placements in canonical member order.
        tail.sort_by_key(|b| {
            seg.members
                .iter()
                .position(|m| m.key == b.key)
                .unwrap_or(usize::MAX)
        });
        for block in tail {
            let rel = align_up(file_extent.max(mem_extent), block.align);
            let at = Placement::new(base + rel, addr + rel, block.file_size, block.mem_size);
            if block.file_size > 0 {
                file_extent = rel + block.file_size;
            }
            mem_extent = mem_extent.max(rel + block.mem_size.max(block.file_size));
            debug!(key = ?block.key, offset = at.offset, "moved block to segment tail");
            self.place(block, at);
        }
        (file_extent, mem_extent)
    }

    fn finish_segment(
        &mut self,
        seg: &SegmentRequest,
        base: u64,
        addr: u64,
        extent: (u64, u64),
    ) -> Placement {
        let (mut file_size, mut mem_size) = extent;
        match seg.original {
            Some(o) if !seg.exact_size => {
                let grew_file = file_size > o.file_size;
                let grew_mem = mem_size > o.mem_size;
                file_size = file_size.max(o.file_size);
                mem_size = mem_size.max(o.mem_size);
                if seg.round_to_align {
                    if grew_file {
                        file_size = align_up(file_size, seg.align);
                    }
                    if grew_mem {
                        mem_size = align_up(mem_size, seg.align);
                    }
                }
            }
            _ => {
                if seg.round_to_align {
                    file_size = align_up(file_size, seg.align);
                    mem_size = align_up(mem_size, seg.align);
                }
            }
        }
        mem_size = mem_size.max(file_size);
        let placed = Placement::new(base, addr, file_size, mem_size);
        let covered = seg.original.map_or(0, |o| o.file_size);
        if file_size > covered {
            let fresh = base + covered..base + file_size;
            self.plan.fresh.push(fresh.clone());
            self.used.push(fresh);
        }
        self.highest_address = self.highest_address.max(placed.mem_end());
        self.plan.segments.insert(seg.key, placed);
        placed
    }

    fn highest_offset(&self) -> u64 {
        self.used.iter().map(|r| r.end).max().unwrap_or(0)
    }
}

/// Compute final placements for every block in `req`.
pub fn plan(req: &LayoutRequest) -> Result<LayoutPlan, BuildError> {
    let mut p = Planner {
        plan: LayoutPlan::default(),
        used: Vec::new(),
        shifts: Vec::new(),
        highest_address: 0,
    };

    // New segments inserted in front of an existing one start out as an
    // empty range at its original position.
    let anchor = |seg: &SegmentRequest| -> Option<Placement> {
        seg.original.or_else(|| {
            let next = req.segments.iter().find(|s| Some(s.key) == seg.before)?.original?;
            Some(Placement::new(next.offset, next.address, 0, 0))
        })
    };
    let mut existing: Vec<(&SegmentRequest, Placement)> = req
        .segments
        .iter()
        .filter_map(|s| anchor(s).map(|o| (s, o)))
        .collect();
    existing.sort_by_key(|(s, o)| (o.address, o.offset, s.original.is_some()));

    let mut file_shift = 0u64;
    let mut addr_shift = 0u64;
    // (original end, new end) of everything placed so far.
    let mut prev_file = (0u64, 0u64);
    let mut prev_mem = (0u64, 0u64);

    for (seg, o) in existing {
        let inserted = seg.original.is_none();
        let mut base = o.offset + file_shift;
        let mut addr = o.address + addr_shift;

        let need_file = if o.file_size > 0 && o.offset >= prev_file.0 {
            prev_file.1.saturating_sub(base)
        } else {
            0
        };
        let need_mem = if o.mem_size > 0 && o.address >= prev_mem.0 {
            prev_mem.1.saturating_sub(addr)
        } else {
            0
        };
        if need_file > 0 || need_mem > 0 {
            if req.congruent {
                let d = align_up(need_file.max(need_mem), seg.align);
                file_shift += d;
                addr_shift += d;
                base += d;
                addr += d;
            } else {
                let df = align_up(need_file, req.file_align.max(1));
                let da = align_up(need_mem, seg.align);
                file_shift += df;
                addr_shift += da;
                base += df;
                addr += da;
            }
            debug!(segment = seg.key, file_shift, addr_shift, "segment pushed by predecessor");
        }

        let extent = p.place_members(seg, base, addr);
        let placed = p.finish_segment(seg, base, addr, extent);
        if o.file_size > 0 {
            p.shifts.push((o.offset, base - o.offset));
        }
        if o.file_size > 0 || (inserted && placed.file_size > 0) {
            prev_file = (prev_file.0.max(o.offset + o.file_size), prev_file.1.max(placed.file_end()));
        }
        if o.mem_size > 0 || (inserted && placed.mem_size > 0) {
            prev_mem = (prev_mem.0.max(o.address + o.mem_size), prev_mem.1.max(placed.mem_end()));
        }
        if base != o.offset && o.file_size > 0 {
            p.plan.moves.push(SegmentMove {
                from: o.offset..o.offset + o.file_size,
                to: base,
            });
            p.plan.cleared.push(o.offset..o.offset + o.file_size);
        }
        for member in &seg.members {
            natural_vacated(&mut p.plan, member, o, base);
        }
    }

    // Loose blocks that can stay where they were.
    let mut appended: Vec<&Block> = Vec::new();
    for block in &req.loose {
        let Some(o) = block.original else {
            appended.push(block);
            continue;
        };
        let candidate = if block.pinned {
            o.offset
        } else {
            o.offset + p.file_shift_at(o.offset)
        };
        let range = candidate..candidate + block.file_size;
        if (!block.pinned && block.grew()) || collides(&range, &p.used) {
            appended.push(block);
            continue;
        }
        if candidate != o.offset {
            p.plan.cleared.push(o.offset..o.offset + o.file_size);
        } else if block.file_size < o.file_size {
            p.plan.vacated.push(o.offset + block.file_size..o.offset + o.file_size);
        }
        p.place(block, Placement::new(candidate, o.address, block.file_size, block.mem_size));
    }

    // New segments go past everything that exists.
    let mut new_ranges: Vec<Range<u64>> = Vec::new();
    for seg in req.segments.iter().filter(|s| anchor(s).is_none()) {
        let addr = match seg.fixed_address {
            Some(fixed) => {
                let span = fixed..fixed + seg.members.iter().map(|m| m.mem_size.max(m.file_size)).sum::<u64>().max(1);
                if collides(&span, &new_ranges) {
                    return Err(BuildError::ConflictingEdit(format!(
                        "new segments overlap at {:#x}",
                        fixed
                    )));
                }
                new_ranges.push(span);
                fixed
            }
            None => align_up(p.highest_address, seg.align),
        };
        let base = if req.congruent {
            align_up(p.highest_offset().max(req.preserve_size), seg.align) + addr % seg.align
        } else {
            align_up(p.highest_offset().max(req.preserve_size), req.file_align.max(1))
        };
        let extent = p.place_members(seg, base, addr);
        let placed = p.finish_segment(seg, base, addr, extent);
        debug!(segment = seg.key, offset = placed.offset, address = placed.address, "appended segment");
    }

    for block in appended {
        let start = p.highest_offset().max(req.preserve_size);
        let offset = align_up(start, block.align);
        if let Some(o) = block.original {
            p.plan.cleared.push(o.offset..o.offset + o.file_size);
        }
        debug!(key = ?block.key, offset, "appended loose block");
        let address = block.original.map_or(0, |o| o.address);
        p.place(block, Placement::new(offset, address, block.file_size, block.mem_size));
    }

    for block in &req.trailing {
        let end = p.highest_offset();
        let offset = match block.original {
            Some(o) if !block.grew() && o.offset >= end => o.offset,
            _ => align_up(end, block.align),
        };
        if let Some(o) = block.original {
            if o.offset != offset {
                p.plan.cleared.push(o.file_range());
                debug!(key = ?block.key, from = o.offset, to = offset, "moved trailing block");
            } else if block.file_size < o.file_size {
                p.plan.vacated.push(o.offset + block.file_size..o.file_end());
            }
        }
        let address = block.original.map_or(0, |o| o.address);
        p.place(block, Placement::new(offset, address, block.file_size, block.mem_size));
    }

    for removed in &req.removed {
        let o = removed.original;
        match removed.segment.and_then(|k| req.segments.iter().find(|s| s.key == k)) {
            Some(seg) => {
                let (Some(so), Some(sp)) = (seg.original, p.plan.segments.get(&seg.key)) else {
                    continue;
                };
                let Some(rel) = o.offset.checked_sub(so.offset) else { continue };
                if sp.offset != so.offset {
                    p.plan.vacated.push(sp.offset + rel..sp.offset + rel + o.file_size);
                } else {
                    p.plan.cleared.push(o.file_range());
                }
            }
            None => p.plan.cleared.push(o.file_range()),
        }
    }

    p.plan.file_size = p.highest_offset().max(req.preserve_size);
    check_limits(&p.plan, req)?;
    Ok(p.plan)
}

/// Record the range a member would have occupied had it stayed put.
fn natural_vacated(plan: &mut LayoutPlan, member: &Block, seg_orig: Placement, base: u64) {
    let Some(o) = member.original else { return };
    let Some(placed) = plan.blocks.get(&member.key).copied() else { return };
    let Some(rel) = o.offset.checked_sub(seg_orig.offset) else { return };
    if o.file_size == 0 {
        return;
    }
    let natural = base + rel;
    if placed.offset != natural {
        if base == seg_orig.offset {
            plan.cleared.push(natural..natural + o.file_size);
        } else {
            plan.vacated.push(natural..natural + o.file_size);
        }
    } else if placed.file_size < o.file_size {
        plan.vacated.push(natural + placed.file_size..natural + o.file_size);
    }
}

/// Start an output image from the parsed bytes: resize to the planned length,
/// carry moved segments to their new offsets and clear what they left behind.
/// Builders then write contents, tables and headers on top.
pub fn prepare_output(original: &[u8], plan: &LayoutPlan, config: &BuildConfig) -> ByteWriter {
    let mut out = ByteWriter::from_vec(original.to_vec());
    out.resize(plan.file_size());
    if config.clear_vacated {
        for range in plan.cleared() {
            out.fill(range.clone(), config.fill_byte);
        }
    }
    for mv in plan.moves() {
        if let Some(bytes) = original.get(mv.from.start as usize..mv.from.end as usize) {
            out.write_bytes(mv.to, bytes);
        }
    }
    if config.clear_vacated {
        for range in plan.vacated() {
            out.fill(range.clone(), config.fill_byte);
        }
    }
    // Fresh ranges may back zero-initialised memory.
    for range in plan.fresh() {
        out.fill(range.clone(), 0);
    }
    out
}

fn check_limits(plan: &LayoutPlan, req: &LayoutRequest) -> Result<(), BuildError> {
    let placements = plan
        .blocks
        .iter()
        .map(|(k, p)| (format!("{:?}", k), p))
        .chain(plan.segments.iter().map(|(k, p)| (format!("segment {}", k), p)));
    for (what, p) in placements {
        let end = p.offset.checked_add(p.file_size).unwrap_or(u64::MAX);
        if end > req.max_offset {
            return Err(BuildError::LayoutOverflow {
                what: format!("{} file end", what),
                value: end,
                limit: req.max_offset,
            });
        }
        let mem_end = p.address.checked_add(p.mem_size).unwrap_or(u64::MAX);
        if mem_end > req.max_address {
            return Err(BuildError::LayoutOverflow {
                what: format!("{} address end", what),
                value: mem_end,
                limit: req.max_address,
            });
        }
    }
    if plan.file_size > req.max_offset {
        return Err(BuildError::LayoutOverflow {
            what: "file size".into(),
            value: plan.file_size,
            limit: req.max_offset,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(key: BlockKey, offset: u64, address: u64, size: u64) -> Block {
        Block::new(key, size, size, 1).with_original(Some(Placement::new(offset, address, size, size)))
    }

    fn two_segment_request() -> LayoutRequest {
        let mut req = LayoutRequest::new(true, true);
        let mut text = SegmentRequest::new(0, Some(Placement::new(0, 0x400000, 0x300, 0x300)), 0x1000);
        text.members.push(member(BlockKey::FileHeader, 0, 0x400000, 0x40).pinned());
        text.members.push(member(BlockKey::Section(1), 0x100, 0x400100, 0x100));
        text.members.push(member(BlockKey::Section(2), 0x200, 0x400200, 0x100));
        let mut data = SegmentRequest::new(1, Some(Placement::new(0x1000, 0x401000, 0x80, 0x200)), 0x1000);
        data.members.push(member(BlockKey::Section(3), 0x1000, 0x401000, 0x80));
        let mut bss = Block::new(BlockKey::Section(4), 0, 0x180, 8);
        bss.original = Some(Placement::new(0x1080, 0x401080, 0, 0x180));
        data.members.push(bss);
        req.segments = vec![text, data];
        req.loose.push(member(BlockKey::SectionHeaders, 0x1080, 0, 0x100));
        req.preserve_size = 0x1180;
        req
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(0x1234, 0x1000), 0x2000);
        assert_eq!(align_up(7, 0), 7);
        assert_eq!(align_up(7, 3), 9);
        assert_eq!(align_up(u64::MAX, 0x1000), u64::MAX / 0x1000 * 0x1000);
    }

    #[test]
    fn test_inserted_segment_pushes_its_successor() {
        let mut req = two_segment_request();
        let mut inserted = SegmentRequest::new(7, None, 0x1000);
        inserted.before = Some(1);
        inserted.members.push(Block::new(BlockKey::Section(9), 0x20, 0x20, 8));
        req.segments.push(inserted);
        let plan = plan(&req).unwrap();

        assert_eq!(plan.segment(7), Some(Placement::new(0x1000, 0x401000, 0x20, 0x20)));
        assert_eq!(plan.block(BlockKey::Section(9)).unwrap().offset, 0x1000);
        let data = plan.segment(1).unwrap();
        assert_eq!((data.offset, data.address), (0x2000, 0x402000));
        assert_eq!(plan.block(BlockKey::SectionHeaders).unwrap().offset, 0x2080);
        assert_eq!(plan.moves().len(), 1);
    }

    #[test]
    fn test_unchanged_request_is_identity() {
        let req = two_segment_request();
        let plan = plan(&req).unwrap();
        assert!(plan.is_identity());
        assert_eq!(plan.file_size(), 0x1180);
        assert_eq!(plan.block(BlockKey::Section(2)).unwrap().offset, 0x200);
        assert_eq!(plan.segment(1).unwrap(), Placement::new(0x1000, 0x401000, 0x80, 0x200));
    }

    #[test]
    fn test_grown_member_moves_to_tail_and_pushes_next_segment() {
        let mut req = two_segment_request();
        // Section 1 grows past the end of the first page.
        req.segments[0].members[1].file_size = 0x1000;
        req.segments[0].members[1].mem_size = 0x1000;
        let plan = plan(&req).unwrap();

        let grown = plan.block(BlockKey::Section(1)).unwrap();
        assert_eq!(grown.offset, 0x300);
        assert_eq!(grown.address, 0x400300);
        // Section 2 keeps its relative position.
        assert_eq!(plan.block(BlockKey::Section(2)).unwrap().offset, 0x200);

        let text = plan.segment(0).unwrap();
        assert_eq!(text.file_size, 0x1300);
        let data = plan.segment(1).unwrap();
        assert_eq!(data.offset, 0x2000);
        assert_eq!(data.address, 0x402000);
        assert_eq!(data.offset % 0x1000, data.address % 0x1000);
        assert_eq!(plan.address_delta(BlockKey::Section(3)), 0x1000);
        assert_eq!(plan.moves(), &[SegmentMove { from: 0x1000..0x1080, to: 0x2000 }]);

        // Section headers shift with the data segment.
        assert_eq!(plan.block(BlockKey::SectionHeaders).unwrap().offset, 0x2080);
        // The old home of the grown section is zero-filled.
        assert!(plan.cleared().contains(&(0x100..0x200)));
    }

    #[test]
    fn test_member_after_nobits_extends_file_size() {
        let mut req = two_segment_request();
        req.segments[1]
            .members
            .push(Block::new(BlockKey::Section(9), 0x10, 0x10, 0x10));
        let plan = plan(&req).unwrap();
        let extra = plan.block(BlockKey::Section(9)).unwrap();
        assert_eq!(extra.offset, 0x1200);
        assert_eq!(extra.address, 0x401200);
        let data = plan.segment(1).unwrap();
        assert_eq!(data.file_size, 0x210);
        assert_eq!(plan.fresh(), &[0x1080..0x1210]);
        // The loose section header table collided with the fresh range.
        let shdrs = plan.block(BlockKey::SectionHeaders).unwrap();
        assert!(shdrs.offset >= 0x1210);
    }

    #[test]
    fn test_new_segment_is_appended_congruently() {
        let mut req = two_segment_request();
        let mut seg = SegmentRequest::new(7, None, 0x1000);
        seg.members.push(Block::new(BlockKey::Section(8), 0x20, 0x20, 16));
        req.segments.push(seg);
        let plan = plan(&req).unwrap();
        let placed = plan.segment(7).unwrap();
        assert_eq!(placed.address, 0x402000);
        assert_eq!(placed.offset, 0x2000);
        assert_eq!(plan.block(BlockKey::Section(8)).unwrap().address, 0x402000);
    }

    #[test]
    fn test_overlapping_fixed_segments_conflict() {
        let mut req = two_segment_request();
        for key in [7, 8] {
            let mut seg = SegmentRequest::new(key, None, 0x1000);
            seg.fixed_address = Some(0x800000);
            seg.members.push(Block::new(BlockKey::Section(key), 0x20, 0x20, 1));
            req.segments.push(seg);
        }
        assert!(matches!(plan(&req), Err(BuildError::ConflictingEdit(_))));
    }

    #[test]
    fn test_pinned_growth_displaces_neighbour() {
        let mut req = LayoutRequest::new(true, true);
        let mut seg = SegmentRequest::new(0, Some(Placement::new(0, 0x1000, 0x200, 0x200)), 0x1000);
        let mut cmds = member(BlockKey::LoadCommands, 0x20, 0x1020, 0x60).pinned();
        cmds.file_size = 0xf0;
        cmds.mem_size = 0xf0;
        seg.members.push(member(BlockKey::FileHeader, 0, 0x1000, 0x20).pinned());
        seg.members.push(cmds);
        seg.members.push(member(BlockKey::Section(0), 0x100, 0x1100, 0x100));
        req.segments.push(seg);
        let plan = plan(&req).unwrap();
        assert_eq!(plan.block(BlockKey::LoadCommands).unwrap().offset, 0x20);
        // Displaced to just past the grown commands.
        assert_eq!(plan.block(BlockKey::Section(0)).unwrap().offset, 0x110);
    }

    #[test]
    fn test_non_congruent_shift_uses_separate_alignments() {
        let mut req = LayoutRequest::new(false, false);
        req.file_align = 0x200;
        let mut a = SegmentRequest::new(0, Some(Placement::new(0x400, 0x1000, 0x200, 0x1000)), 0x1000);
        a.exact_size = true;
        let mut grown = member(BlockKey::Section(0), 0x400, 0x1000, 0x200);
        grown.file_size = 0x400;
        grown.mem_size = 0x1400;
        a.members.push(grown);
        let mut b = SegmentRequest::new(1, Some(Placement::new(0x600, 0x2000, 0x200, 0x100)), 0x1000);
        b.exact_size = true;
        b.members.push(member(BlockKey::Section(1), 0x600, 0x2000, 0x200));
        req.segments = vec![a, b];
        let plan = plan(&req).unwrap();
        let b = plan.segment(1).unwrap();
        assert_eq!(b.offset, 0x800);
        assert_eq!(b.address, 0x3000);
    }

    #[test]
    fn test_trailing_block_follows_growth() {
        let mut req = LayoutRequest::new(false, false);
        req.file_align = 0x200;
        let mut seg = SegmentRequest::new(0, Some(Placement::new(0x400, 0x1000, 0x200, 0x200)), 0x1000);
        seg.exact_size = true;
        seg.members.push(member(BlockKey::Section(0), 0x400, 0x1000, 0x200));
        req.segments.push(seg);
        req.trailing.push(member(BlockKey::Blob(0), 0x600, 0, 0x80));
        let unchanged = plan(&req).unwrap();
        assert!(unchanged.is_identity());
        assert_eq!(unchanged.file_size(), 0x680);

        let mut fresh = SegmentRequest::new(1, None, 0x1000);
        fresh.members.push(Block::new(BlockKey::Section(1), 0x200, 0x10, 1));
        req.segments.push(fresh);
        let plan = plan(&req).unwrap();
        let added = plan.block(BlockKey::Section(1)).unwrap();
        assert_eq!((added.offset, added.address), (0x600, 0x2000));
        assert_eq!(plan.block(BlockKey::Blob(0)).unwrap().offset, 0x800);
        assert!(plan.cleared().contains(&(0x600..0x680)));
    }

    #[test]
    fn test_prepare_output_moves_and_clears() {
        let mut req = two_segment_request();
        req.segments[0].members[1].file_size = 0x1000;
        req.segments[0].members[1].mem_size = 0x1000;
        let plan = plan(&req).unwrap();
        let mut original = vec![0u8; 0x1180];
        original[0x1000..0x1080].fill(0xdd);
        original[0x100..0x200].fill(0xaa);
        let out = prepare_output(&original, &plan, &BuildConfig::default()).into_inner();
        assert_eq!(out.len() as u64, plan.file_size());
        assert!(out[0x2000..0x2080].iter().all(|&b| b == 0xdd));
        assert!(out[0x1000..0x1080].iter().all(|&b| b == 0));
        assert!(out[0x100..0x200].iter().all(|&b| b == 0));

        let keep = BuildConfig {
            clear_vacated: false,
            ..BuildConfig::default()
        };
        let out = prepare_output(&original, &plan, &keep).into_inner();
        assert!(out[0x100..0x200].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut req = LayoutRequest::new(true, false);
        let mut seg = SegmentRequest::new(0, None, 0x1000);
        seg.fixed_address = Some(0xffff_f000);
        seg.members.push(Block::new(BlockKey::Section(0), 0x2000, 0x2000, 1));
        req.segments.push(seg);
        assert!(matches!(plan(&req), Err(BuildError::LayoutOverflow { .. })));
    }
}
