//! Format-independent building blocks.
//!
//! Arenas and typed handles own the entities of every object model, the
//! layout planner decides where blocks land on rebuild, the fixup registry
//! rewrites the pointer fields that name them, and [`view`] projects all
//! formats onto one interface.

pub mod arena;
pub mod binary;
pub mod fixup;
pub mod layout;
pub mod strtab;
pub mod view;
