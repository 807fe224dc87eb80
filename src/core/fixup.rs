//! Registry of structural pointer fields.
//!
//! Header fields, dynamic entries, data directories and load-command offsets
//! all encode the position of some block. At parse time each such field is
//! recorded as "anchor of block + delta"; after layout the registry
//! recomputes every value from the block's final placement. A field whose
//! block has no placement is an error rather than a silently stale value.

use crate::core::layout::{BlockKey, LayoutPlan, Placement};
use crate::error::BuildError;
use std::fmt::Debug;

/// Which property of the target block a field encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Offset,
    Address,
    FileSize,
    MemSize,
}

impl Anchor {
    pub fn of(self, placement: &Placement) -> u64 {
        match self {
            Anchor::Offset => placement.offset,
            Anchor::Address => placement.address,
            Anchor::FileSize => placement.file_size,
            Anchor::MemSize => placement.mem_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerField<S> {
    pub slot: S,
    pub target: BlockKey,
    pub anchor: Anchor,
    pub delta: i64,
}

impl<S> PointerField<S> {
    pub fn value_for(&self, placement: &Placement) -> u64 {
        self.anchor.of(placement).wrapping_add(self.delta as u64)
    }
}

/// Pointer fields keyed by a format-defined slot type.
#[derive(Debug, Clone)]
pub struct FixupRegistry<S> {
    fields: Vec<PointerField<S>>,
}

impl<S> Default for FixupRegistry<S> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<S: Clone + PartialEq + Debug> FixupRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `slot`, replacing any previous registration for it.
    pub fn register(&mut self, slot: S, target: BlockKey, anchor: Anchor, delta: i64) {
        self.unregister(&slot);
        self.fields.push(PointerField {
            slot,
            target,
            anchor,
            delta,
        });
    }

    /// Record a field whose current value is `value` while `target` sits at `placement`.
    pub fn register_value(
        &mut self,
        slot: S,
        target: BlockKey,
        anchor: Anchor,
        value: u64,
        placement: &Placement,
    ) {
        let delta = value.wrapping_sub(anchor.of(placement)) as i64;
        self.register(slot, target, anchor, delta);
    }

    pub fn unregister(&mut self, slot: &S) -> Option<PointerField<S>> {
        let pos = self.fields.iter().position(|f| &f.slot == slot)?;
        Some(self.fields.remove(pos))
    }

    pub fn get(&self, slot: &S) -> Option<&PointerField<S>> {
        self.fields.iter().find(|f| &f.slot == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointerField<S>> + '_ {
        self.fields.iter()
    }

    /// Fields that point at `target`.
    pub fn targeting(&self, target: BlockKey) -> impl Iterator<Item = &PointerField<S>> + '_ {
        self.fields.iter().filter(move |f| f.target == target)
    }

    pub fn retain(&mut self, keep: impl FnMut(&PointerField<S>) -> bool) {
        self.fields.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Final value of one slot, or `None` when the slot is not registered.
    pub fn resolve_one(&self, slot: &S, plan: &LayoutPlan) -> Result<Option<u64>, BuildError> {
        match self.get(slot) {
            Some(field) => resolve_field(field, plan).map(Some),
            None => Ok(None),
        }
    }

    /// Final values of every registered slot.
    pub fn resolve(&self, plan: &LayoutPlan) -> Result<Vec<(S, u64)>, BuildError> {
        self.fields
            .iter()
            .map(|f| resolve_field(f, plan).map(|v| (f.slot.clone(), v)))
            .collect()
    }
}

fn resolve_field<S: Debug>(field: &PointerField<S>, plan: &LayoutPlan) -> Result<u64, BuildError> {
    let placement = plan.block(field.target).ok_or_else(|| {
        BuildError::UnresolvedReference(format!("{:?} -> {:?}", field.slot, field.target))
    })?;
    Ok(field.value_for(&placement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::{plan, Block, LayoutRequest, SegmentRequest};

    #[derive(Debug, Clone, PartialEq)]
    enum Slot {
        Entry,
        TableSize,
    }

    fn moved_plan() -> LayoutPlan {
        let mut req = LayoutRequest::new(true, true);
        let mut seg = SegmentRequest::new(0, Some(Placement::new(0, 0x1000, 0x100, 0x100)), 0x1000);
        seg.members.push(
            Block::new(BlockKey::Section(0), 0x80, 0x80, 1)
                .with_original(Some(Placement::new(0, 0x1000, 0x40, 0x40))),
        );
        seg.members.push(
            Block::new(BlockKey::Section(1), 0x40, 0x40, 1)
                .with_original(Some(Placement::new(0x40, 0x1040, 0x40, 0x40))),
        );
        req.segments.push(seg);
        plan(&req).unwrap()
    }

    #[test]
    fn test_resolve_follows_moved_block() {
        let mut reg = FixupRegistry::new();
        let original = Placement::new(0, 0x1000, 0x40, 0x40);
        reg.register_value(Slot::Entry, BlockKey::Section(0), Anchor::Address, 0x1010, &original);
        reg.register(Slot::TableSize, BlockKey::Section(0), Anchor::FileSize, 0);

        let plan = moved_plan();
        // Section 0 grew and moved behind section 1.
        assert_eq!(plan.block(BlockKey::Section(0)).unwrap().address, 0x1080);
        assert_eq!(reg.resolve_one(&Slot::Entry, &plan).unwrap(), Some(0x1090));
        let all = reg.resolve(&plan).unwrap();
        assert_eq!(all, vec![(Slot::Entry, 0x1090), (Slot::TableSize, 0x80)]);
    }

    #[test]
    fn test_unplaced_target_is_unresolved() {
        let mut reg = FixupRegistry::new();
        reg.register(Slot::Entry, BlockKey::Section(42), Anchor::Address, 0);
        let err = reg.resolve(&moved_plan()).unwrap_err();
        assert!(matches!(err, BuildError::UnresolvedReference(_)));
    }

    #[test]
    fn test_register_replaces_slot() {
        let mut reg = FixupRegistry::new();
        reg.register(Slot::Entry, BlockKey::Section(0), Anchor::Address, 0);
        reg.register(Slot::Entry, BlockKey::Section(1), Anchor::Address, 4);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.targeting(BlockKey::Section(1)).count(), 1);
        assert!(reg.unregister(&Slot::Entry).is_some());
        assert!(reg.is_empty());
    }
}
