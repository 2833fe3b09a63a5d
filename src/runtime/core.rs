use super::builder::LauncherBuilder;
use super::context::{self, enter_context};
use super::fiber::{Exit, Fiber, FiberBuilder, FiberId, FiberState, PreActivateFn, Slot, SpawnParts};
use super::machine::{self, MachineContext, Stack, DEFAULT_STACK_SIZE};
use super::queue::RunQueue;
use crate::error::{Error, Result};
use crate::sync::Condition;
use crate::utils::Slab;

use libc::ucontext_t;
use log::{debug, trace, warn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// The fiber scheduler.
///
/// `Launcher` is responsible for:
/// - owning every fiber spawned on it (stack, saved context, hooks),
/// - keeping the FIFO queue of runnable fibers,
/// - switching between fibers when they yield,
/// - running termination hooks on its own stack, then reclaiming the fiber.
///
/// A launcher is bound to the thread that created it. It is a cheap handle:
/// clones share the same scheduling state. Fibers and conditions only keep a
/// non-owning reference, so once the last handle is dropped every fiber that
/// is still parked is released along with its stack. Values living on a
/// parked fiber's stack are not dropped.
///
/// # Examples
///
/// ```rust,ignore
/// let launcher = Launcher::new();
///
/// launcher.spawn(|fiber| {
///     println!("one");
///     fiber.yield_now().unwrap();
///     println!("three");
/// })?;
/// launcher.spawn(|_| println!("two"))?;
///
/// launcher.start()?;
/// ```
#[derive(Clone)]
pub struct Launcher {
    shared: Rc<Shared>,
}

/// Non-owning launcher reference, held by fibers and conditions.
///
/// Fiber stacks belong to the launcher, so nothing stored on them may keep it
/// alive.
#[derive(Clone)]
pub(crate) struct WeakLauncher {
    shared: Weak<Shared>,
}

impl WeakLauncher {
    pub(crate) fn upgrade(&self) -> Option<Launcher> {
        self.shared.upgrade().map(|shared| Launcher { shared })
    }
}

struct Shared {
    /// Scheduling state. Never borrowed across a context switch.
    state: RefCell<State>,

    /// Where control lands when a fiber finishes, or when the last runnable
    /// fiber blocks. Every fiber context links here by address.
    return_point: MachineContext,

    default_stack_size: Cell<usize>,
}

struct State {
    /// Fiber arena.
    fibers: Slab<Slot>,

    runnable: RunQueue,

    /// The fiber being dispatched or running, if any.
    active: Option<FiberId>,

    /// Fiber whose `pre_activate` hook is running. Nothing may yield or
    /// start the launcher meanwhile.
    activating: Option<FiberId>,

    /// Set by the trampoline of a fiber whose body just finished.
    terminated: Option<FiberId>,
}

impl State {
    /// Pops `next` off the run queue and makes it the running fiber.
    ///
    /// On error nothing but the queue head changes: an entry that does not
    /// name a scheduled fiber is discarded.
    fn activate(&mut self, next: FiberId) -> Result<*mut ucontext_t> {
        let State {
            fibers,
            runnable,
            active,
            ..
        } = self;

        let popped = runnable.pop();
        debug_assert_eq!(popped, Some(next), "run queue head changed during activation");

        let slot = fibers
            .get_mut(next.key())
            .ok_or(Error::UnknownFiber { fiber: next })?;

        if !slot.scheduled {
            return Err(Error::NotScheduled { fiber: next });
        }

        slot.state = FiberState::Running;
        *active = Some(next);
        trace!("activating fiber {next} `{}`", slot.label());

        Ok(slot.context.as_ptr())
    }

    /// Takes the running fiber `id` off the CPU: back of the queue, or
    /// blocked.
    fn park(&mut self, id: FiberId, remain_runnable: bool) {
        let State {
            fibers, runnable, ..
        } = self;

        let Some(slot) = fibers.get_mut(id.key()) else {
            return;
        };

        if remain_runnable {
            slot.state = FiberState::Runnable;
            runnable.push(id);
        } else {
            slot.state = FiberState::Blocked;
            slot.scheduled = false;
        }
    }
}

/// A context switch decided by a yield.
///
/// It is carried out by [`perform`](Self::perform) once the caller has let go
/// of its launcher handle, so that a fiber parked for good does not keep its
/// own launcher alive from its stack.
pub(crate) struct PendingSwitch {
    from: *mut ucontext_t,
    to: *mut ucontext_t,
}

impl PendingSwitch {
    pub(crate) fn perform(self) -> Result<()> {
        // SAFETY: `from` is the context slot of the yielding fiber and `to`
        // either the next fiber's context or the return point. The launcher
        // owning both is kept alive by the thread's dispatch context for as
        // long as one of its fibers runs, and no scheduler borrow is held.
        unsafe { machine::switch(self.from, self.to) }
    }
}

/// Keeps a fiber's `pre_activate` hook out of its slot while it runs, and
/// puts it back even if it panics.
struct Activation<'a> {
    shared: &'a Shared,
    id: FiberId,
    hook: Option<PreActivateFn>,
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.borrow_mut();
        state.activating = None;

        if let Some(slot) = state.fibers.get_mut(self.id.key()) {
            slot.pre_activate = self.hook.take();
        }
    }
}

/// Frees a terminated fiber's slot once its `died` hook is done with it,
/// whether the hook returns or panics.
struct Reclaim<'a> {
    shared: &'a Shared,
    id: FiberId,
}

impl Drop for Reclaim<'_> {
    fn drop(&mut self) {
        let reclaimed = self.shared.state.borrow_mut().fibers.remove(self.id.key());
        drop(reclaimed);
    }
}

impl Launcher {
    /// Creates a launcher with the default stack size of 256 KiB.
    pub fn new() -> Self {
        Self::with_default_stack_size(DEFAULT_STACK_SIZE)
    }

    /// Returns a builder for configuring a launcher.
    pub fn builder() -> LauncherBuilder {
        LauncherBuilder::new()
    }

    pub(crate) fn with_default_stack_size(default_stack_size: usize) -> Self {
        let state = State {
            fibers: Slab::new(),
            runnable: RunQueue::new(),
            active: None,
            activating: None,
            terminated: None,
        };

        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                return_point: MachineContext::blank(),
                default_stack_size: Cell::new(default_stack_size),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakLauncher {
        WeakLauncher {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Spawns a runnable fiber with default settings.
    ///
    /// Use [`FiberBuilder`] for names, stack sizes and hooks.
    pub fn spawn<F>(&self, run: F) -> Result<FiberId>
    where
        F: FnOnce(&Fiber) + 'static,
    {
        FiberBuilder::new(run).spawn(self)
    }

    pub(crate) fn spawn_parts(&self, parts: SpawnParts) -> Result<FiberId> {
        let stack_size = parts
            .stack_size
            .unwrap_or_else(|| self.default_stack_size());

        let stack = Stack::new(stack_size)?;
        let context = MachineContext::prepare(&stack, &self.shared.return_point, fiber_entry)?;

        let slot = Slot {
            name: parts.name,
            state: FiberState::Blocked,
            scheduled: false,
            context,
            stack,
            run: Some(parts.run),
            died: parts.died,
            pre_activate: parts.pre_activate,
            exit: None,
        };

        let id = {
            let mut state = self.shared.state.borrow_mut();
            let key = state.fibers.insert(slot);
            let id = FiberId::from_key(key);

            if let Some(slot) = state.fibers.get(key) {
                debug!(
                    "spawned fiber {id} `{}` with a {} byte stack",
                    slot.label(),
                    slot.stack.len()
                );
            }

            id
        };

        if parts.start_runnable {
            self.add_runnable(id)?;
        }

        Ok(id)
    }

    /// Dispatches runnable fibers until none is left, then returns.
    ///
    /// Fibers run in the order they became runnable. When a fiber finishes,
    /// its `died` hook runs here, on the caller's stack, and its stack is
    /// freed before the next fiber is dispatched.
    ///
    /// Returning does not mean every fiber has finished: blocked fibers stay
    /// parked until the host makes them runnable again (directly or through a
    /// [`Condition`]) and calls `start` once more.
    ///
    /// A panic in a `pre_activate` or `died` hook propagates out of `start`.
    /// The launcher stays usable: the fiber about to be activated is still at
    /// the head of the run queue, and a fiber whose `died` hook panicked is
    /// reclaimed all the same.
    ///
    /// # Errors
    ///
    /// - [`Error::NestedStart`] when called while one of this launcher's
    ///   fibers is active or being activated.
    /// - [`Error::Context`] if switching into a fiber fails.
    pub fn start(&self) -> Result<()> {
        {
            let state = self.shared.state.borrow();
            if state.active.is_some() || state.activating.is_some() {
                return Err(Error::NestedStart);
            }
        }

        enter_context(self.clone(), || self.dispatch())
    }

    fn dispatch(&self) -> Result<()> {
        loop {
            let Some(next) = self.shared.state.borrow().runnable.front() else {
                trace!("run queue empty, returning to host");
                return Ok(());
            };

            self.pre_activate(next);
            let target = self.shared.state.borrow_mut().activate(next)?;

            // SAFETY: the return point is owned by this launcher and `target`
            // belongs to a live, scheduled slot. No scheduler borrow is held.
            let switched = unsafe { machine::switch(self.shared.return_point.as_ptr(), target) };

            // Back at the return point: a fiber finished, or the last
            // runnable one blocked.
            self.shared.state.borrow_mut().active = None;
            switched?;

            self.reap();
        }
    }

    /// Runs the `pre_activate` hook of `id`, before anything about the
    /// activation is committed.
    fn pre_activate(&self, id: FiberId) {
        let hook = {
            let mut state = self.shared.state.borrow_mut();
            let hook = state
                .fibers
                .get_mut(id.key())
                .and_then(|slot| slot.pre_activate.take());

            if hook.is_some() {
                state.activating = Some(id);
            }
            hook
        };

        if hook.is_none() {
            return;
        }

        let mut activation = Activation {
            shared: &self.shared,
            id,
            hook,
        };
        if let Some(hook) = activation.hook.as_mut() {
            hook();
        }
    }

    /// Runs the `died` hook of the fiber that just finished and frees it.
    fn reap(&self) {
        let finished = {
            let mut state = self.shared.state.borrow_mut();
            let Some(id) = state.terminated.take() else {
                return;
            };

            state.fibers.get_mut(id.key()).map(|slot| {
                let exit = slot.exit.take().unwrap_or(Exit::Completed);

                match (&exit, exit.panic_message()) {
                    (Exit::Completed, _) => debug!("fiber {id} `{}` finished", slot.label()),
                    (Exit::Panicked(_), Some(message)) => {
                        warn!("fiber {id} `{}` panicked: {message}", slot.label())
                    }
                    (Exit::Panicked(_), None) => warn!("fiber {id} `{}` panicked", slot.label()),
                }

                (id, slot.died.take(), exit)
            })
        };

        let Some((id, died, exit)) = finished else {
            return;
        };

        let _reclaim = Reclaim {
            shared: &self.shared,
            id,
        };
        if let Some(died) = died {
            died(exit);
        }
    }

    /// Takes the body of the fiber that is being entered for the first time.
    fn take_body(&self) -> Option<(FiberId, Box<dyn FnOnce(&Fiber)>)> {
        let mut state = self.shared.state.borrow_mut();
        let id = state.active?;
        let run = state.fibers.get_mut(id.key())?.run.take()?;

        Some((id, run))
    }

    /// Records how the body of fiber `id` ended, for `reap` to pick up.
    fn finish(&self, id: FiberId, exit: Exit) {
        let mut state = self.shared.state.borrow_mut();
        if let Some(slot) = state.fibers.get_mut(id.key()) {
            slot.state = FiberState::Terminated;
            slot.scheduled = false;
            slot.exit = Some(exit);
        }
        state.terminated = Some(id);
    }

    /// Yields fiber `id`, which must be the running fiber.
    ///
    /// With `remain_runnable` the fiber goes to the back of the queue;
    /// otherwise it blocks until made runnable again. If the fiber is the
    /// only runnable one it keeps running without a context switch; if no
    /// fiber is runnable at all control returns to the host.
    ///
    /// This handle stays on the fiber's stack while it is suspended; prefer
    /// [`Fiber::yield_now`] and [`Fiber::suspend`], which do not hold one.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] if `id` is not the running fiber.
    pub fn yield_fiber(&self, id: FiberId, remain_runnable: bool) -> Result<()> {
        match self.prepare_yield(id, remain_runnable)? {
            Some(switch) => switch.perform(),
            None => Ok(()),
        }
    }

    /// Commits a yield of fiber `id` and returns the switch to perform, or
    /// `None` when the fiber keeps running.
    ///
    /// The next fiber's `pre_activate` hook runs before anything is
    /// committed. If it panics the panic unwinds the yielding fiber, which is
    /// still running and still the active fiber.
    pub(crate) fn prepare_yield(
        &self,
        id: FiberId,
        remain_runnable: bool,
    ) -> Result<Option<PendingSwitch>> {
        let (from, next) = {
            let state = self.shared.state.borrow();

            let slot = match state.fibers.get(id.key()) {
                Some(slot)
                    if state.active == Some(id)
                        && state.activating.is_none()
                        && slot.state == FiberState::Running =>
                {
                    slot
                }
                _ => return Err(Error::NotActive { fiber: id }),
            };

            (slot.context.as_ptr(), state.runnable.front())
        };

        let Some(next) = next else {
            if remain_runnable {
                trace!("fiber {id} is the only runnable fiber, not switching");
                return Ok(None);
            }

            let mut state = self.shared.state.borrow_mut();
            state.park(id, false);
            state.active = None;
            trace!("fiber {id} blocked with nothing runnable, returning to host");

            return Ok(Some(PendingSwitch {
                from,
                to: self.shared.return_point.as_ptr(),
            }));
        };

        trace!("fiber {id} yields to fiber {next}");
        self.pre_activate(next);

        let mut state = self.shared.state.borrow_mut();
        let to = state.activate(next)?;
        state.park(id, remain_runnable);

        Ok(Some(PendingSwitch { from, to }))
    }

    /// Registers fiber `id` on `condition` and blocks it until the condition
    /// is set.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] if `id` is not the running fiber.
    pub fn yield_on(&self, id: FiberId, condition: &Condition) -> Result<()> {
        match self.prepare_yield_on(id, condition)? {
            Some(switch) => switch.perform(),
            None => Ok(()),
        }
    }

    pub(crate) fn prepare_yield_on(
        &self,
        id: FiberId,
        condition: &Condition,
    ) -> Result<Option<PendingSwitch>> {
        if self.running() != Some(id) {
            return Err(Error::NotActive { fiber: id });
        }

        condition.add(id);
        self.prepare_yield(id, false)
    }

    /// Makes fiber `id` runnable.
    ///
    /// Idempotent: a fiber that is already queued or running is left alone,
    /// so it is never queued twice.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFiber`] if `id` does not name a live fiber.
    pub fn add_runnable(&self, id: FiberId) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let State {
            fibers, runnable, ..
        } = &mut *state;

        let slot = fibers
            .get_mut(id.key())
            .ok_or(Error::UnknownFiber { fiber: id })?;

        if slot.scheduled {
            return Ok(());
        }
        if slot.state == FiberState::Terminated {
            return Err(Error::UnknownFiber { fiber: id });
        }

        slot.scheduled = true;
        slot.state = FiberState::Runnable;
        runnable.push(id);
        trace!("fiber {id} `{}` is runnable", slot.label());

        Ok(())
    }

    /// The fiber being dispatched or running, if any.
    pub fn active(&self) -> Option<FiberId> {
        self.shared.state.borrow().active
    }

    /// The fiber currently executing its body, if any.
    ///
    /// `None` while a `pre_activate` hook runs.
    pub(crate) fn running(&self) -> Option<FiberId> {
        let state = self.shared.state.borrow();
        if state.activating.is_some() {
            return None;
        }

        let id = state.active?;
        match state.fibers.get(id.key())?.state {
            FiberState::Running => Some(id),
            _ => None,
        }
    }

    /// True if at least one fiber is waiting in the run queue.
    ///
    /// Hosts use this to decide between polling and blocking on their event
    /// source.
    pub fn has_runnable(&self) -> bool {
        !self.shared.state.borrow().runnable.is_empty()
    }

    /// Number of fibers in the run queue.
    pub fn runnable_len(&self) -> usize {
        self.shared.state.borrow().runnable.len()
    }

    /// Number of live fibers, whatever their state.
    pub fn fiber_count(&self) -> usize {
        self.shared.state.borrow().fibers.len()
    }

    /// State of fiber `id`, or `None` once it has been reclaimed.
    pub fn state(&self, id: FiberId) -> Option<FiberState> {
        self.shared
            .state
            .borrow()
            .fibers
            .get(id.key())
            .map(|slot| slot.state)
    }

    /// True iff fiber `id` is queued or active.
    pub fn is_scheduled(&self, id: FiberId) -> bool {
        self.shared
            .state
            .borrow()
            .fibers
            .get(id.key())
            .is_some_and(|slot| slot.scheduled)
    }

    pub fn name(&self, id: FiberId) -> Option<String> {
        self.shared
            .state
            .borrow()
            .fibers
            .get(id.key())
            .and_then(|slot| slot.name.clone())
    }

    /// Usable stack size of fiber `id` in bytes.
    pub fn stack_size(&self, id: FiberId) -> Option<usize> {
        self.shared
            .state
            .borrow()
            .fibers
            .get(id.key())
            .map(|slot| slot.stack.len())
    }

    /// Stack size used by fibers spawned without an explicit one.
    pub fn default_stack_size(&self) -> usize {
        self.shared.default_stack_size.get()
    }

    pub fn set_default_stack_size(&self, bytes: usize) {
        self.shared.default_stack_size.set(bytes);
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();

        f.debug_struct("Launcher")
            .field("active", &state.active)
            .field("runnable", &state.runnable.len())
            .field("fibers", &state.fibers.len())
            .field("default_stack_size", &self.default_stack_size())
            .finish()
    }
}

/// Entry point of every fiber context.
///
/// Fresh contexts start here with no arguments; the launcher is found through
/// the thread's dispatch context and the fiber is whichever one it just
/// activated. Only a weak reference stays on the fiber's stack while the body
/// runs. Returning resumes the launcher's return point.
extern "C" fn fiber_entry() {
    let entered = context::current_launcher().and_then(|launcher| {
        let (id, run) = launcher.take_body()?;
        Some((launcher.downgrade(), id, run))
    });

    // A fiber context can only be entered from `Launcher::start`.
    let Some((launcher, id, run)) = entered else {
        std::process::abort();
    };

    trace!("fiber {id} started");

    let fiber = Fiber::new(launcher.clone(), id);
    let exit = match panic::catch_unwind(AssertUnwindSafe(|| run(&fiber))) {
        Ok(()) => Exit::Completed,
        Err(payload) => Exit::Panicked(payload),
    };
    drop(fiber);

    match launcher.upgrade() {
        Some(launcher) => launcher.finish(id, exit),
        // The return point went away with the launcher.
        None => std::process::abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parked_fiber_does_not_keep_launcher_alive() {
        let launcher = Launcher::new();
        let weak = Rc::downgrade(&launcher.shared);

        launcher
            .spawn(|fiber| fiber.suspend().unwrap())
            .unwrap();
        launcher.start().unwrap();
        assert_eq!(launcher.fiber_count(), 1);

        drop(launcher);
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn hook_panic_leaves_nothing_active() {
        let launcher = Launcher::new();
        let id = FiberBuilder::new(|_| {})
            .on_pre_activate(|| panic!("hook failed"))
            .spawn(&launcher)
            .unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| launcher.start()));
        assert!(outcome.is_err());

        let state = launcher.shared.state.borrow();
        assert_eq!(state.active, None);
        assert_eq!(state.activating, None);
        assert_eq!(state.runnable.front(), Some(id));
        assert!(state.fibers.get(id.key()).unwrap().pre_activate.is_some());
    }
}
