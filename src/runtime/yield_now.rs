use crate::error::{Error, Result};
use crate::runtime::context;

/// Yields the running fiber back to the launcher.
///
/// This allows other runnable fibers to make progress before the current one
/// continues; it is the free-function form of
/// [`Fiber::yield_now`](crate::Fiber::yield_now) for code that has no handle
/// at hand.
///
/// # Errors
///
/// Returns [`Error::OutsideFiber`] when called from anything but a running
/// fiber.
///
/// # Examples
///
/// ```rust,ignore
/// fn busy_work() {
///     for chunk in chunks() {
///         process(chunk);
///         spindle::yield_now().unwrap();
///     }
/// }
/// ```
pub fn yield_now() -> Result<()> {
    let fiber = context::current().ok_or(Error::OutsideFiber)?;

    fiber.yield_now()
}
