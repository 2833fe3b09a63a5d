use crate::runtime::Launcher;
use crate::runtime::core::WeakLauncher;
use crate::runtime::fiber::FiberId;

use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

/// A set of fibers waiting for something to happen.
///
/// A fiber blocks on a condition with
/// [`Fiber::yield_on`](crate::Fiber::yield_on); whoever observes the awaited
/// event calls [`set`](Self::set), which makes every waiter runnable again in
/// the order they registered.
///
/// A condition carries no payload. Data for the waiters is written somewhere
/// they can read it before `set` is called; since only one fiber ever runs at
/// a time no further synchronization is needed.
///
/// A condition does not keep its launcher alive, so fibers may capture it
/// freely.
///
/// # Examples
///
/// ```rust,ignore
/// let line_ready = Rc::new(Condition::new(&launcher));
///
/// let waiter = line_ready.clone();
/// launcher.spawn(move |fiber| {
///     fiber.yield_on(&waiter).unwrap();
///     // the line is available here
/// })?;
///
/// launcher.start()?;      // the fiber blocks, start returns
/// line_ready.set();       // e.g. after the reactor produced a line
/// launcher.start()?;      // the fiber resumes
/// ```
pub struct Condition {
    launcher: WeakLauncher,

    /// Waiting fibers, in registration order.
    waiters: RefCell<VecDeque<FiberId>>,

    /// Fiber holding a critical section guarded by this condition.
    occupant: Cell<Option<FiberId>>,
}

impl Condition {
    /// Creates an empty condition whose waiters are woken on `launcher`.
    pub fn new(launcher: &Launcher) -> Self {
        Self {
            launcher: launcher.downgrade(),
            waiters: RefCell::new(VecDeque::new()),
            occupant: Cell::new(None),
        }
    }

    /// Registers `fiber` as a waiter. Registering twice has no effect.
    pub fn add(&self, fiber: FiberId) {
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.contains(&fiber) {
            waiters.push_back(fiber);
        }
    }

    /// Withdraws `fiber` without waking it.
    ///
    /// Returns `true` if it was waiting.
    pub fn remove(&self, fiber: FiberId) -> bool {
        let mut waiters = self.waiters.borrow_mut();
        let before = waiters.len();
        waiters.retain(|&waiter| waiter != fiber);

        waiters.len() != before
    }

    /// Wakes every waiter, in registration order, and empties the wait-set.
    ///
    /// Waiters that have terminated in the meantime are skipped, and so is
    /// everyone once the launcher has been dropped.
    pub fn set(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        let Some(launcher) = self.launcher.upgrade() else {
            return;
        };
        trace!("condition set, waking {} fiber(s)", waiters.len());

        for fiber in waiters {
            if let Err(err) = launcher.add_runnable(fiber) {
                debug!("not waking fiber {fiber}: {err}");
            }
        }
    }

    /// Drops every waiter without waking it.
    pub fn clear(&self) {
        self.waiters.borrow_mut().clear();
    }

    /// True iff nobody waits and no critical section holds the condition.
    pub fn is_empty(&self) -> bool {
        self.waiters.borrow().is_empty() && self.occupant.get().is_none()
    }

    /// Number of waiting fibers.
    pub fn len(&self) -> usize {
        self.waiters.borrow().len()
    }

    pub fn contains(&self, fiber: FiberId) -> bool {
        self.waiters.borrow().contains(&fiber)
    }

    /// The fiber currently inside a critical section on this condition.
    pub fn occupant(&self) -> Option<FiberId> {
        self.occupant.get()
    }

    pub(crate) fn occupy(&self, fiber: FiberId) {
        debug_assert!(self.occupant.get().is_none(), "condition already occupied");
        self.occupant.set(Some(fiber));
    }

    pub(crate) fn release(&self) {
        self.occupant.set(None);
    }

    /// The launcher waiters are woken on, if it is still alive.
    pub fn launcher(&self) -> Option<Launcher> {
        self.launcher.upgrade()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &*self.waiters.borrow())
            .field("occupant", &self.occupant.get())
            .finish()
    }
}
