//! Fibers: handles, lifecycle state and spawning.
//!
//! A fiber is a cooperative unit of execution with its own stack. Its storage
//! lives in the launcher's arena and is addressed by a [`FiberId`]; the body
//! receives a [`Fiber`] handle through which it yields.

mod builder;
mod slot;
mod state;

pub use builder::{FiberBody, FiberBuilder};
pub use state::{Exit, FiberState};

pub(crate) use builder::SpawnParts;
pub(crate) use slot::{PreActivateFn, Slot};

use crate::error::{Error, Result};
use crate::runtime::Launcher;
use crate::runtime::core::{PendingSwitch, WeakLauncher};
use crate::sync::Condition;
use crate::utils::Key;

use std::fmt;

/// Identity of a fiber.
///
/// Ids are never reused: once a fiber has terminated its id stops resolving,
/// even if its arena slot is recycled for a new fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(Key);

impl FiberId {
    pub(crate) fn from_key(key: Key) -> Self {
        Self(key)
    }

    pub(crate) fn key(self) -> Key {
        self.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({}v{})", self.0.index, self.0.generation)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.0.index, self.0.generation)
    }
}

/// Handle to a fiber, as seen from inside its body.
///
/// The handle is what a fiber yields through. It can be cloned and handed
/// around, but only the fiber it names may yield with it: yielding on behalf
/// of another fiber fails with [`Error::NotActive`](crate::Error::NotActive).
///
/// The handle does not keep its launcher alive.
#[derive(Clone)]
pub struct Fiber {
    launcher: WeakLauncher,
    id: FiberId,
}

impl Fiber {
    pub(crate) fn new(launcher: WeakLauncher, id: FiberId) -> Self {
        Self { launcher, id }
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    /// The launcher this fiber belongs to, or `None` once every handle to
    /// it has been dropped.
    ///
    /// A handle kept across a yield keeps the launcher alive for as long as
    /// the fiber stays parked.
    pub fn launcher(&self) -> Option<Launcher> {
        self.launcher.upgrade()
    }

    /// Lets other runnable fibers run, then continues.
    ///
    /// The fiber stays runnable and goes to the back of the queue. If no
    /// other fiber is runnable this returns immediately, without a context
    /// switch.
    pub fn yield_now(&self) -> Result<()> {
        self.switch_with(|launcher| launcher.prepare_yield(self.id, true))
    }

    /// Blocks the fiber until something calls
    /// [`Launcher::add_runnable`] on it.
    ///
    /// If no other fiber is runnable, control returns to the host that called
    /// [`Launcher::start`].
    pub fn suspend(&self) -> Result<()> {
        self.switch_with(|launcher| launcher.prepare_yield(self.id, false))
    }

    /// Blocks the fiber until `condition` is [`set`](Condition::set).
    pub fn yield_on(&self, condition: &Condition) -> Result<()> {
        self.switch_with(|launcher| launcher.prepare_yield_on(self.id, condition))
    }

    /// True iff the fiber is queued or currently running.
    pub fn is_scheduled(&self) -> bool {
        self.launcher
            .upgrade()
            .is_some_and(|launcher| launcher.is_scheduled(self.id))
    }

    pub fn name(&self) -> Option<String> {
        self.launcher
            .upgrade()
            .and_then(|launcher| launcher.name(self.id))
    }

    /// Prepares a yield with a temporary launcher handle, then switches once
    /// the handle is gone from this stack.
    fn switch_with<F>(&self, prepare: F) -> Result<()>
    where
        F: FnOnce(&Launcher) -> Result<Option<PendingSwitch>>,
    {
        let pending = {
            let launcher = self
                .launcher
                .upgrade()
                .ok_or(Error::NotActive { fiber: self.id })?;
            prepare(&launcher)?
        };

        match pending {
            Some(switch) => switch.perform(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("id", &self.id).finish()
    }
}
