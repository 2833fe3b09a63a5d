use super::slot::{DiedFn, PreActivateFn, RunFn};
use super::state::Exit;
use super::{Fiber, FiberId};
use crate::error::Result;
use crate::runtime::Launcher;

use std::rc::Rc;

/// Behaviour of a fiber expressed as an object.
///
/// Only [`run`](Self::run) is required. The hooks default to no-ops.
/// Implementors that need mutable state use interior mutability, since the
/// launcher may call `pre_activate` while `run` is suspended mid-body.
///
/// # Examples
///
/// ```rust,ignore
/// struct Echo { line: RefCell<String> }
///
/// impl FiberBody for Echo {
///     fn run(&self, fiber: &Fiber) {
///         fiber.yield_now().unwrap();
///         println!("{}", self.line.borrow());
///     }
/// }
///
/// FiberBuilder::from_body(Rc::new(echo)).spawn(&launcher)?;
/// ```
pub trait FiberBody {
    /// The fiber's main function. May yield any number of times.
    fn run(&self, fiber: &Fiber);

    /// Called on the launcher's stack after `run` returned or panicked.
    fn died(&self, exit: Exit) {
        let _ = exit;
    }

    /// Called right before the launcher resumes this fiber. See
    /// [`FiberBuilder::on_pre_activate`] for what a panic here does.
    fn pre_activate(&self) {}
}

/// Builder for configuring and spawning a fiber.
///
/// # Examples
///
/// ```rust,ignore
/// let id = FiberBuilder::new(|fiber| {
///     fiber.yield_now().unwrap();
/// })
/// .name("worker")
/// .stack_size(128 * 1024)
/// .on_died(|exit| assert!(exit.is_completed()))
/// .spawn(&launcher)?;
/// ```
pub struct FiberBuilder {
    run: RunFn,
    name: Option<String>,
    stack_size: Option<usize>,
    start_runnable: bool,
    died: Option<DiedFn>,
    pre_activate: Option<PreActivateFn>,
}

impl FiberBuilder {
    /// Creates a builder for a fiber running `run`.
    ///
    /// By default the fiber is runnable as soon as it is spawned and uses the
    /// launcher's default stack size.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(&Fiber) + 'static,
    {
        Self {
            run: Box::new(run),
            name: None,
            stack_size: None,
            start_runnable: true,
            died: None,
            pre_activate: None,
        }
    }

    /// Creates a builder that drives a [`FiberBody`] object.
    pub fn from_body<B>(body: Rc<B>) -> Self
    where
        B: FiberBody + 'static,
    {
        let on_died = body.clone();
        let on_pre_activate = body.clone();

        Self::new(move |fiber| body.run(fiber))
            .on_died(move |exit| on_died.died(exit))
            .on_pre_activate(move || on_pre_activate.pre_activate())
    }

    /// Sets a diagnostic name, used in log records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the stack size in bytes.
    ///
    /// Sizes below [`MIN_STACK_SIZE`](crate::MIN_STACK_SIZE) make
    /// [`spawn`](Self::spawn) fail.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Whether the fiber is queued immediately (`true`, the default) or
    /// starts blocked until someone calls
    /// [`Launcher::add_runnable`](crate::Launcher::add_runnable).
    pub fn start_runnable(mut self, runnable: bool) -> Self {
        self.start_runnable = runnable;
        self
    }

    /// Installs the termination hook.
    ///
    /// The hook runs on the launcher's stack, after the body has returned or
    /// panicked and before the next fiber is dispatched. It is the place to
    /// release resources and to tell others the fiber is gone. The fiber is
    /// reclaimed after the hook, even if it panics.
    pub fn on_died<F>(mut self, died: F) -> Self
    where
        F: FnOnce(Exit) + 'static,
    {
        self.died = Some(Box::new(died));
        self
    }

    /// Installs a hook called right before each activation of the fiber.
    ///
    /// The hook runs before the activation is committed. Meanwhile no fiber
    /// may yield and the launcher may not be started; both fail as misuse.
    ///
    /// A panic in the hook leaves scheduling as it was: the fiber stays at
    /// the head of the run queue and keeps the hook. The panic propagates out
    /// of [`Launcher::start`](crate::Launcher::start) when the launcher was
    /// dispatching, or unwinds the yielding fiber otherwise.
    pub fn on_pre_activate<F>(mut self, pre_activate: F) -> Self
    where
        F: FnMut() + 'static,
    {
        self.pre_activate = Some(Box::new(pre_activate));
        self
    }

    /// Spawns the fiber on `launcher`.
    ///
    /// # Errors
    ///
    /// Fails if the stack size is invalid or the initial context cannot be
    /// prepared.
    pub fn spawn(self, launcher: &Launcher) -> Result<FiberId> {
        launcher.spawn_parts(SpawnParts {
            run: self.run,
            name: self.name,
            stack_size: self.stack_size,
            start_runnable: self.start_runnable,
            died: self.died,
            pre_activate: self.pre_activate,
        })
    }
}

/// A fully configured fiber, as handed to the launcher.
pub(crate) struct SpawnParts {
    pub(crate) run: RunFn,
    pub(crate) name: Option<String>,
    pub(crate) stack_size: Option<usize>,
    pub(crate) start_runnable: bool,
    pub(crate) died: Option<DiedFn>,
    pub(crate) pre_activate: Option<PreActivateFn>,
}
