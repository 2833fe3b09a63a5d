//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a generational [`Slab`] used as the fiber arena.

mod slab;

pub(crate) use slab::{Key, Slab};
