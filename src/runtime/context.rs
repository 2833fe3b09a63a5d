use crate::runtime::Launcher;
use crate::runtime::fiber::Fiber;

use std::cell::RefCell;

thread_local! {
    /// Thread-local handle to the launcher that is currently dispatching.
    ///
    /// This is set while [`Launcher::start`] runs. The fiber trampoline uses
    /// it to find its launcher, since a freshly prepared context starts with
    /// no arguments; [`current`] uses it to give free functions access to the
    /// running fiber without explicit parameter passing.
    pub(crate) static CURRENT_LAUNCHER: RefCell<Option<Launcher>> =
        const { RefCell::new(None) };
}

/// Restores the previously installed launcher when dropped.
struct Restore(Option<Launcher>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT_LAUNCHER.with(|current| current.replace(previous));
    }
}

/// Enters the dispatch context of `launcher` for the current thread.
///
/// The launcher is installed as the thread's current launcher for the
/// duration of `f`, and the previous one is restored afterwards, even if `f`
/// unwinds.
pub(crate) fn enter_context<R>(launcher: Launcher, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_LAUNCHER.with(|current| current.replace(Some(launcher)));
    let _restore = Restore(previous);

    f()
}

/// Returns the launcher currently dispatching on this thread, if any.
pub(crate) fn current_launcher() -> Option<Launcher> {
    CURRENT_LAUNCHER.with(|current| current.borrow().clone())
}

/// Returns a handle to the fiber running on this thread, if any.
///
/// Returns `None` on the host, inside `died` and `pre_activate` hooks and
/// when no launcher is dispatching.
pub fn current() -> Option<Fiber> {
    let launcher = current_launcher()?;
    let id = launcher.running()?;

    Some(Fiber::new(launcher.downgrade(), id))
}
