//! Synchronization primitives for fibers.
//!
//! These primitives park fibers instead of threads, and rely on the fact that
//! only one fiber runs at a time: they use plain `Cell`/`RefCell` state and
//! are neither `Send` nor `Sync`.
//!
//! The current primitives include:
//! - [`Condition`] — a wait-set that wakes all its fibers at once.
//! - [`CriticalSectionGuard`] — scoped mutual exclusion across yield points,
//!   built on a shared [`Condition`].

mod condition;
mod critical;

pub use condition::Condition;
pub use critical::CriticalSectionGuard;
