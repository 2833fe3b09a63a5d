//! Error types for the fiber runtime.
//!
//! Every variant here is a misuse fault or an operating-system failure of the
//! context-switch primitive. Panics raised by fiber code are not errors: they
//! are caught at the fiber boundary and reported through
//! [`Exit::Panicked`](crate::Exit::Panicked).

use crate::FiberId;

use std::io;

/// Errors surfaced by the launcher, fibers and synchronization primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A yield was requested on behalf of a fiber that is not the active one.
    #[error("fiber {fiber} is not the active fiber")]
    NotActive { fiber: FiberId },

    /// The dispatcher was asked to activate a fiber that is not scheduled.
    #[error("fiber {fiber} is not scheduled")]
    NotScheduled { fiber: FiberId },

    /// The fiber handle does not refer to a live fiber of this launcher.
    #[error("fiber {fiber} does not exist or has terminated")]
    UnknownFiber { fiber: FiberId },

    /// A fiber operation was requested from outside any running fiber.
    #[error("not called from a running fiber")]
    OutsideFiber,

    /// `Launcher::start` was called while one of its fibers is running.
    #[error("launcher started from inside one of its own fibers")]
    NestedStart,

    /// A fiber tried to enter a critical section it already holds.
    #[error("fiber {fiber} already holds this critical section")]
    Reentrant { fiber: FiberId },

    /// The requested fiber stack is below the supported minimum.
    #[error("stack size {requested} is below the minimum of {minimum} bytes")]
    StackTooSmall { requested: usize, minimum: usize },

    /// The requested fiber stack overflows once rounded up to whole pages.
    #[error("stack size {requested} cannot be mapped")]
    StackLayout { requested: usize },

    /// The underlying context primitive failed.
    #[error("context operation `{op}` failed: {source}")]
    Context {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Builds a [`Error::Context`] from the calling thread's last OS error.
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        Error::Context {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
