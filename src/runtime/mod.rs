//! Core runtime components.
//!
//! This module contains the fundamental building blocks of the runtime,
//! including fiber execution, scheduling, and cooperative yielding.
//!
//! It is responsible for:
//! - owning fibers and their stacks,
//! - keeping the FIFO run queue,
//! - switching machine contexts between the host and fibers,
//! - providing the per-thread dispatch context used by the trampoline.
//!
//! The only `unsafe` context manipulation lives in [`machine`].

pub(crate) mod core;
mod machine;
mod queue;

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod yield_now;

pub mod fiber;

pub use self::core::Launcher;
pub use machine::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
