use super::Condition;
use crate::error::{Error, Result};
use crate::runtime::fiber::Fiber;

use log::trace;

/// Scoped mutual exclusion between fibers.
///
/// Fibers only interleave at yield points, so a section needs guarding only
/// when it may yield half-way through. All guards sharing one [`Condition`]
/// exclude each other: while one holds the condition, the others wait on it.
///
/// Releasing wakes every waiter at once; each re-checks the condition when it
/// resumes and goes back to waiting unless it finds the section free, so at
/// most one of them gets in.
///
/// The guard is not reentrant: entering a section the fiber already holds
/// fails with [`Error::Reentrant`].
///
/// # Examples
///
/// ```rust,ignore
/// let section = Rc::new(Condition::new(&launcher));
///
/// launcher.spawn(move |fiber| {
///     let _guard = CriticalSectionGuard::new(fiber, &section).unwrap();
///     fiber.yield_now().unwrap(); // others cannot enter meanwhile
/// })?;
/// ```
pub struct CriticalSectionGuard<'a> {
    fiber: &'a Fiber,
    condition: &'a Condition,

    /// True between a successful `enter` and the matching `exit`.
    active: bool,
}

impl<'a> CriticalSectionGuard<'a> {
    /// Enters the section guarded by `condition`, waiting as long as needed.
    ///
    /// # Errors
    ///
    /// Fails if `fiber` already holds the section or is not the running
    /// fiber.
    pub fn new(fiber: &'a Fiber, condition: &'a Condition) -> Result<Self> {
        let mut guard = Self {
            fiber,
            condition,
            active: false,
        };
        guard.enter()?;

        Ok(guard)
    }

    /// Enters the section, yielding on the condition while it is taken or
    /// contended.
    pub fn enter(&mut self) -> Result<()> {
        let id = self.fiber.id();

        if self.active || self.condition.occupant() == Some(id) {
            return Err(Error::Reentrant { fiber: id });
        }

        while !self.condition.is_empty() {
            trace!("fiber {id} waits for critical section");
            self.fiber.yield_on(self.condition)?;
        }

        self.condition.occupy(id);
        self.active = true;
        trace!("fiber {id} entered critical section");

        Ok(())
    }

    /// Leaves the section and wakes everyone waiting for it.
    ///
    /// Does nothing if the section is not held.
    pub fn exit(&mut self) {
        if !self.active {
            return;
        }

        self.condition.release();
        self.condition.set();
        self.active = false;
        trace!("fiber {} left critical section", self.fiber.id());
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for CriticalSectionGuard<'_> {
    fn drop(&mut self) {
        self.exit();
    }
}
