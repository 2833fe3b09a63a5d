use super::state::{Exit, FiberState};
use super::Fiber;
use crate::runtime::machine::{MachineContext, Stack};

pub(crate) type RunFn = Box<dyn FnOnce(&Fiber)>;
pub(crate) type DiedFn = Box<dyn FnOnce(Exit)>;
pub(crate) type PreActivateFn = Box<dyn FnMut()>;

/// Everything the launcher keeps for one fiber.
///
/// Slots live in the launcher's arena from spawn until the fiber's `died`
/// hook has returned; removing the slot frees the stack.
pub(crate) struct Slot {
    /// Optional diagnostic name.
    pub(crate) name: Option<String>,

    pub(crate) state: FiberState,

    /// True iff the fiber is queued or active.
    pub(crate) scheduled: bool,

    /// Saved registers. Must be declared before `stack` so it is never
    /// outlived by the memory it points into.
    pub(crate) context: MachineContext,

    pub(crate) stack: Stack,

    /// Fiber body; taken by the trampoline on first activation.
    pub(crate) run: Option<RunFn>,

    /// Termination hook; taken by the launcher after the body finished.
    pub(crate) died: Option<DiedFn>,

    pub(crate) pre_activate: Option<PreActivateFn>,

    /// Set by the trampoline once the body has finished.
    pub(crate) exit: Option<Exit>,
}

impl Slot {
    /// Label used in log records.
    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}
