//! Machine contexts and fiber stacks.
//!
//! This is the only place that touches the platform context primitives
//! (`getcontext`, `makecontext`, `swapcontext`). Everything above it deals in
//! [`MachineContext`] values and raw context pointers obtained from them.
//!
//! Contexts are boxed so that their addresses stay stable while the arena
//! that owns them grows: every prepared context links back to the launcher's
//! return point by address. Stacks are separate anonymous mappings whose
//! lowest page is left inaccessible, so running off the end of one faults
//! instead of scribbling over the heap.

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("spindle requires the ucontext primitives of linux-gnu");

use crate::error::{Error, Result};

use libc::{c_void, ucontext_t};
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

/// Default stack size for fibers spawned without an explicit size.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack a fiber may be spawned with.
///
/// Unwinding a panic and formatting a log record both run on the fiber's
/// stack and need this much room.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

fn page_size() -> usize {
    // SAFETY: `sysconf` has no preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// A fixed-size fiber stack with a guard page below it.
///
/// The usable size is the requested size rounded up to whole pages. The
/// mapping is owned exclusively by the fiber slot and released when the slot
/// is reclaimed, which only ever happens on the launcher's own stack.
pub(crate) struct Stack {
    /// Start of the mapping. The first `guard` bytes are inaccessible.
    base: NonNull<u8>,
    mapped: usize,
    guard: usize,
}

impl Stack {
    /// Maps a stack of at least `size` usable bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::StackTooSmall`] if `size` is below [`MIN_STACK_SIZE`].
    /// - [`Error::StackLayout`] if `size` overflows once rounded to pages.
    /// - [`Error::Context`] if the mapping or its guard page cannot be set up.
    pub(crate) fn new(size: usize) -> Result<Self> {
        if size < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall {
                requested: size,
                minimum: MIN_STACK_SIZE,
            });
        }

        let guard = page_size();
        let mapped = size
            .checked_next_multiple_of(guard)
            .and_then(|usable| usable.checked_add(guard))
            .ok_or(Error::StackLayout { requested: size })?;

        // SAFETY: a fresh private anonymous mapping aliases no existing memory.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(Error::last_os_error("mmap"));
        }
        let Some(base) = NonNull::new(raw.cast::<u8>()) else {
            return Err(Error::StackLayout { requested: size });
        };

        // Unmapped on drop should the guard page fail.
        let stack = Self {
            base,
            mapped,
            guard,
        };

        // SAFETY: the guard is the first page of the mapping created above.
        if unsafe { libc::mprotect(raw, guard, libc::PROT_NONE) } != 0 {
            return Err(Error::last_os_error("mprotect"));
        }

        Ok(stack)
    }

    /// Lowest usable address, just above the guard page.
    fn bottom(&self) -> *mut u8 {
        // SAFETY: `guard` is strictly less than the mapping length.
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    /// Usable size of the stack in bytes.
    pub(crate) fn len(&self) -> usize {
        self.mapped - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: `base` and `mapped` describe the mapping created in `new`,
        // and no context runs on it any more.
        let unmapped = unsafe { libc::munmap(self.base.as_ptr().cast::<c_void>(), self.mapped) };
        debug_assert_eq!(unmapped, 0, "munmap of a fiber stack failed");
    }
}

/// A saved execution context.
///
/// Either the launcher's return point (filled in by the swap that leaves the
/// host) or a fiber context prepared by [`MachineContext::prepare`].
pub(crate) struct MachineContext {
    inner: Box<UnsafeCell<ucontext_t>>,
}

impl MachineContext {
    /// Creates a blank context, to be filled by a later swap.
    pub(crate) fn blank() -> Self {
        // SAFETY: `ucontext_t` is a plain C struct for which all-zero bytes is
        // a valid (if meaningless) value.
        let raw: ucontext_t = unsafe { std::mem::zeroed() };

        Self {
            inner: Box::new(UnsafeCell::new(raw)),
        }
    }

    /// Prepares a fresh context that starts executing `entry` on `stack`.
    ///
    /// When `entry` returns, execution continues at `link`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Context`] if the current context cannot be captured.
    pub(crate) fn prepare(
        stack: &Stack,
        link: &MachineContext,
        entry: extern "C" fn(),
    ) -> Result<Self> {
        let context = Self::blank();
        let raw = context.as_ptr();

        // SAFETY: `raw` points to a live, exclusively owned `ucontext_t`.
        // The stack outlives the context: both live in the same fiber slot and
        // the context is never resumed after the slot is reclaimed. `link` is
        // the launcher's return point, which outlives every fiber.
        unsafe {
            if libc::getcontext(raw) != 0 {
                return Err(Error::last_os_error("getcontext"));
            }

            (*raw).uc_stack.ss_sp = stack.bottom().cast::<c_void>();
            (*raw).uc_stack.ss_size = stack.len();
            (*raw).uc_stack.ss_flags = 0;
            (*raw).uc_link = link.as_ptr();

            libc::makecontext(raw, entry, 0);
        }

        Ok(context)
    }

    /// Raw pointer to the underlying context.
    pub(crate) fn as_ptr(&self) -> *mut ucontext_t {
        self.inner.get()
    }
}

/// Saves the running context into `from` and resumes `to`.
///
/// Returns once some later switch resumes `from`.
///
/// # Safety
///
/// `from` must point to a live context owned by the caller's execution flow
/// and `to` must point to a context that was either prepared with
/// [`MachineContext::prepare`] or saved by an earlier switch, whose stack is
/// still allocated. No `RefCell` borrow of scheduler state may be held across
/// this call.
pub(crate) unsafe fn switch(from: *mut ucontext_t, to: *const ucontext_t) -> Result<()> {
    // SAFETY: upheld by the caller.
    if unsafe { libc::swapcontext(from, to) } != 0 {
        return Err(Error::last_os_error("swapcontext"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_rejects_tiny_sizes() {
        let err = Stack::new(8 * 1024).err().expect("tiny stack accepted");
        assert!(matches!(
            err,
            Error::StackTooSmall {
                requested: 8192,
                minimum: MIN_STACK_SIZE
            }
        ));
    }

    #[test]
    fn stack_reports_its_size() {
        let stack = Stack::new(MIN_STACK_SIZE * 2).unwrap();
        assert_eq!(stack.len(), MIN_STACK_SIZE * 2);
    }

    #[test]
    fn stack_rounds_up_to_whole_pages() {
        let page = page_size();
        let stack = Stack::new(MIN_STACK_SIZE + 1).unwrap();
        assert_eq!(stack.len(), MIN_STACK_SIZE + page);
    }

    #[test]
    fn usable_range_is_writable() {
        let stack = Stack::new(MIN_STACK_SIZE).unwrap();
        let bottom = stack.bottom();

        unsafe {
            bottom.write(0xAB);
            bottom.add(stack.len() - 1).write(0xCD);

            assert_eq!(bottom.read(), 0xAB);
            assert_eq!(bottom.add(stack.len() - 1).read(), 0xCD);
            assert_eq!(bottom.add(stack.len() / 2).read(), 0);
        }
    }

    #[test]
    fn oversized_request_is_a_layout_error() {
        let err = Stack::new(usize::MAX).err().expect("huge stack accepted");
        assert!(matches!(err, Error::StackLayout { .. }));
    }
}
