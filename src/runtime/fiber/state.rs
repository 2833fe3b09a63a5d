use std::any::Any;
use std::fmt;

/// Lifecycle state of a fiber.
///
/// ```text
/// spawn ──(start_runnable)──▶ Runnable ──(dispatched)──▶ Running
///   │                            ▲   ▲                    │  │  │
///   └──(!start_runnable)──▶ Blocked  └──(yield_now)───────┘  │  │
///                            ▲   └───(add_runnable / set)    │  │
///                            └──────(suspend / yield_on)─────┘  │
///                                      Terminated ◀──(returns)──┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Queued and waiting for the launcher to dispatch it.
    Runnable,

    /// Currently executing. At most one fiber is in this state.
    Running,

    /// Not scheduled. Only `add_runnable` or a condition can wake it.
    Blocked,

    /// The fiber body has returned or panicked.
    ///
    /// Only observable from the fiber's `died` hook: the slot is reclaimed
    /// as soon as the hook returns.
    Terminated,
}

/// How a fiber's body ended.
pub enum Exit {
    /// The body returned normally.
    Completed,

    /// The body panicked; carries the panic payload.
    Panicked(Box<dyn Any + Send + 'static>),
}

impl Exit {
    pub fn is_completed(&self) -> bool {
        matches!(self, Exit::Completed)
    }

    pub fn is_panicked(&self) -> bool {
        matches!(self, Exit::Panicked(_))
    }

    /// The panic message, if the body panicked with a string payload.
    pub fn panic_message(&self) -> Option<&str> {
        let Exit::Panicked(payload) = self else {
            return None;
        };

        payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    }
}

impl fmt::Debug for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Completed => f.write_str("Completed"),
            Exit::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.panic_message().unwrap_or("<non-string payload>"))
                .finish(),
        }
    }
}
