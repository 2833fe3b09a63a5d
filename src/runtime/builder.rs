use super::Launcher;
use super::machine::DEFAULT_STACK_SIZE;

/// Builder for configuring and creating a launcher.
///
/// `LauncherBuilder` allows customizing launcher parameters before
/// constructing it. Currently, it supports configuring the stack size given
/// to fibers that do not ask for one.
///
/// # Examples
///
/// ```rust,ignore
/// let launcher = LauncherBuilder::new()
///     .default_stack_size(128 * 1024)
///     .build();
/// ```
pub struct LauncherBuilder {
    /// Stack size for fibers spawned without an explicit size.
    default_stack_size: usize,
}

impl LauncherBuilder {
    /// Creates a new `LauncherBuilder` with default configuration.
    ///
    /// The default stack size is [`DEFAULT_STACK_SIZE`] (256 KiB).
    pub fn new() -> Self {
        Self {
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Sets the default fiber stack size, in bytes.
    ///
    /// The size is validated when a fiber is spawned with it: sizes below
    /// [`MIN_STACK_SIZE`](crate::MIN_STACK_SIZE) make spawning fail.
    pub fn default_stack_size(mut self, bytes: usize) -> Self {
        self.default_stack_size = bytes;
        self
    }

    /// Builds the launcher with the configured options.
    pub fn build(self) -> Launcher {
        Launcher::with_default_stack_size(self.default_stack_size)
    }
}

impl Default for LauncherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
