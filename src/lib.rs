//! # Spindle
//!
//! **Spindle** is a single-threaded cooperative fiber runtime.
//!
//! Each fiber gets a dedicated stack and a saved machine context; a
//! [`Launcher`] switches between fibers with explicit context swaps instead of
//! relying on OS preemption. This lets code that reads as blocking ("wait for
//! the next line") run on top of a non-blocking event source owned by the
//! host, without threads and without callbacks.
//!
//! It provides:
//!
//! - A **launcher** with a strict FIFO run queue that dispatches fibers until
//!   none is runnable, then hands control back to the host
//! - **Fibers** with fixed-size, guard-paged stacks, spawned from closures or
//!   [`FiberBody`] objects, with optional `died` and `pre_activate` hooks
//! - **Conditions**, wait-sets that wake all their fibers at once
//! - **Critical section guards** for mutual exclusion across yield points
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spindle::{Condition, Launcher};
//! use std::rc::Rc;
//!
//! let launcher = Launcher::new();
//! let ready = Rc::new(Condition::new(&launcher));
//!
//! let waiter = ready.clone();
//! launcher.spawn(move |fiber| {
//!     fiber.yield_on(&waiter).unwrap();
//!     println!("woken up");
//! })?;
//!
//! launcher.start()?;  // the fiber blocks; control comes back here
//! ready.set();        // the host saw whatever the fiber waits for
//! launcher.start()?;  // prints "woken up"
//! ```
//!
//! ## Modules
//!
//! - [`fiber`] — Fiber handles, builder, lifecycle state
//! - [`sync`] — Conditions and critical sections
//!
//! ## Platform
//!
//! Context switching uses the `ucontext` primitives of linux-gnu.

mod error;
mod runtime;
mod utils;

pub mod sync;

pub use error::{Error, Result};
pub use runtime::builder::LauncherBuilder;
pub use runtime::context::current;
pub use runtime::fiber;
pub use runtime::fiber::{Exit, Fiber, FiberBody, FiberBuilder, FiberId, FiberState};
pub use runtime::yield_now::yield_now;
pub use runtime::{DEFAULT_STACK_SIZE, Launcher, MIN_STACK_SIZE};
pub use sync::{Condition, CriticalSectionGuard};
