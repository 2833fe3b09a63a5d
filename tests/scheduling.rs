use spindle::{Error, FiberBuilder, FiberId, FiberState, Launcher, MIN_STACK_SIZE};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

// Trace level, so that every yield formats a record on the fiber's stack.
fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

fn push(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

#[test]
fn test_fifo_dispatch() {
    init_logging();
    let launcher = Launcher::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
        let order = order.clone();
        launcher.spawn(move |_| order.borrow_mut().push(i)).unwrap();
    }

    assert_eq!(launcher.runnable_len(), 5);
    launcher.start().unwrap();

    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    assert_eq!(launcher.fiber_count(), 0);
    assert!(!launcher.has_runnable());
}

#[test]
fn test_add_runnable_is_idempotent() {
    init_logging();
    let launcher = Launcher::new();
    let runs = Rc::new(Cell::new(0));

    let counter = runs.clone();
    let id = FiberBuilder::new(move |_| counter.set(counter.get() + 1))
        .start_runnable(false)
        .spawn(&launcher)
        .unwrap();

    assert_eq!(launcher.state(id), Some(FiberState::Blocked));
    assert!(!launcher.is_scheduled(id));

    for _ in 0..3 {
        launcher.add_runnable(id).unwrap();
    }

    assert_eq!(launcher.runnable_len(), 1);
    assert!(launcher.is_scheduled(id));
    assert_eq!(launcher.state(id), Some(FiberState::Runnable));

    launcher.start().unwrap();
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_single_active_fiber() {
    init_logging();
    let launcher = Launcher::new();
    let checks = Rc::new(Cell::new(0));

    for _ in 0..4 {
        let checks = checks.clone();
        launcher
            .spawn(move |fiber| {
                for _ in 0..3 {
                    assert_eq!(fiber.launcher().unwrap().active(), Some(fiber.id()));
                    assert_eq!(spindle::current().map(|f| f.id()), Some(fiber.id()));
                    assert_eq!(fiber.launcher().unwrap().state(fiber.id()), Some(FiberState::Running));
                    checks.set(checks.get() + 1);
                    fiber.yield_now().unwrap();
                }
            })
            .unwrap();
    }

    assert_eq!(launcher.active(), None);
    launcher.start().unwrap();

    assert_eq!(checks.get(), 12);
    assert_eq!(launcher.active(), None);
    assert!(spindle::current().is_none());
}

#[test]
fn test_yield_round_robin() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();

    for name in ["a", "b", "c"] {
        let log = log.clone();
        launcher
            .spawn(move |fiber| {
                for round in 0..2 {
                    push(&log, format!("{name}{round}"));
                    fiber.yield_now().unwrap();
                }
            })
            .unwrap();
    }

    launcher.start().unwrap();

    assert_eq!(*log.borrow(), vec!["a0", "b0", "c0", "a1", "b1", "c1"]);
}

#[test]
fn test_lone_fiber_yield_does_not_switch() {
    init_logging();
    let launcher = Launcher::new();
    let activations = Rc::new(Cell::new(0));
    let after_yield = Rc::new(Cell::new(0));
    let bystander_ran = Rc::new(Cell::new(false));

    let ran = bystander_ran.clone();
    let bystander = FiberBuilder::new(move |_| ran.set(true))
        .start_runnable(false)
        .spawn(&launcher)
        .unwrap();

    let counter = after_yield.clone();
    let seen = activations.clone();
    FiberBuilder::new(move |fiber| {
        for expected in 1..=3 {
            fiber.yield_now().unwrap();
            counter.set(counter.get() + 1);
            assert_eq!(counter.get(), expected);
        }
        spindle::yield_now().unwrap();
    })
    .on_pre_activate(move || seen.set(seen.get() + 1))
    .spawn(&launcher)
    .unwrap();

    launcher.start().unwrap();

    assert_eq!(after_yield.get(), 3);
    assert_eq!(activations.get(), 1);
    assert!(!bystander_ran.get());
    assert_eq!(launcher.state(bystander), Some(FiberState::Blocked));
}

#[test]
fn test_yield_once_then_peer_runs() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();

    let (run_log, died_log) = (log.clone(), log.clone());
    FiberBuilder::new(move |fiber| {
        push(&run_log, "A-start");
        push(&run_log, "A-yielded");
        fiber.yield_now().unwrap();
        push(&run_log, "A-resumed");
    })
    .stack_size(MIN_STACK_SIZE)
    .on_died(move |_| push(&died_log, "A-died"))
    .spawn(&launcher)
    .unwrap();

    let (run_log, died_log) = (log.clone(), log.clone());
    FiberBuilder::new(move |_| push(&run_log, "B-start"))
        .on_died(move |_| push(&died_log, "B-died"))
        .spawn(&launcher)
        .unwrap();

    launcher.start().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["A-start", "A-yielded", "B-start", "B-died", "A-resumed", "A-died"]
    );
}

#[test]
fn test_suspended_fiber_returns_control_to_host() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();

    let fiber_log = log.clone();
    let id = launcher
        .spawn(move |fiber| {
            push(&fiber_log, "before");
            fiber.suspend().unwrap();
            push(&fiber_log, "after");
        })
        .unwrap();

    launcher.start().unwrap();
    assert_eq!(*log.borrow(), vec!["before"]);
    assert_eq!(launcher.state(id), Some(FiberState::Blocked));
    assert!(!launcher.is_scheduled(id));
    assert_eq!(launcher.fiber_count(), 1);

    // Nothing runnable: start returns straight away.
    launcher.start().unwrap();
    assert_eq!(log.borrow().len(), 1);

    launcher.add_runnable(id).unwrap();
    launcher.start().unwrap();
    assert_eq!(*log.borrow(), vec!["before", "after"]);
    assert_eq!(launcher.state(id), None);
}

#[test]
fn test_suspend_switches_to_peer() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();

    let fiber_log = log.clone();
    let sleeper = launcher
        .spawn(move |fiber| {
            push(&fiber_log, "sleeper-blocks");
            fiber.suspend().unwrap();
            push(&fiber_log, "sleeper-woken");
        })
        .unwrap();

    let fiber_log = log.clone();
    launcher
        .spawn(move |fiber| {
            push(&fiber_log, "waker-runs");
            fiber.launcher().unwrap().add_runnable(sleeper).unwrap();
            fiber.yield_now().unwrap();
            push(&fiber_log, "waker-done");
        })
        .unwrap();

    launcher.start().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["sleeper-blocks", "waker-runs", "sleeper-woken", "waker-done"]
    );
}

#[test]
fn test_pre_activate_precedes_every_resume() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();

    let (run_log, hook_log) = (log.clone(), log.clone());
    FiberBuilder::new(move |fiber| {
        push(&run_log, "a-start");
        fiber.yield_now().unwrap();
        push(&run_log, "a-resumed");
    })
    .on_pre_activate(move || push(&hook_log, "a-pre"))
    .spawn(&launcher)
    .unwrap();

    let run_log = log.clone();
    launcher
        .spawn(move |_| push(&run_log, "b-start"))
        .unwrap();

    launcher.start().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["a-pre", "a-start", "b-start", "a-pre", "a-resumed"]
    );
}

#[test]
fn test_yield_on_behalf_of_another_fiber_fails() {
    init_logging();
    let launcher = Launcher::new();
    let outcome = Rc::new(RefCell::new(None));

    let first = launcher.spawn(|fiber| fiber.yield_now().unwrap()).unwrap();

    let seen = outcome.clone();
    launcher
        .spawn(move |fiber| {
            *seen.borrow_mut() = Some(fiber.launcher().unwrap().yield_fiber(first, true));
        })
        .unwrap();

    launcher.start().unwrap();

    let outcome = outcome.borrow_mut().take().unwrap();
    assert!(matches!(outcome, Err(Error::NotActive { fiber }) if fiber == first));
}

#[test]
fn test_yield_from_host_fails() {
    init_logging();
    let launcher = Launcher::new();
    let id = launcher.spawn(|_| {}).unwrap();

    assert!(matches!(
        launcher.yield_fiber(id, true),
        Err(Error::NotActive { .. })
    ));
    assert!(matches!(spindle::yield_now(), Err(Error::OutsideFiber)));

    launcher.start().unwrap();
}

#[test]
fn test_start_from_inside_fiber_fails() {
    init_logging();
    let launcher = Launcher::new();
    let nested = Rc::new(RefCell::new(None));

    let seen = nested.clone();
    launcher
        .spawn(move |fiber| {
            *seen.borrow_mut() = Some(fiber.launcher().unwrap().start());
        })
        .unwrap();

    launcher.start().unwrap();

    assert!(matches!(
        nested.borrow_mut().take(),
        Some(Err(Error::NestedStart))
    ));
}

#[test]
fn test_add_runnable_rejects_finished_fiber() {
    init_logging();
    let launcher = Launcher::new();
    let id = launcher.spawn(|_| {}).unwrap();

    launcher.start().unwrap();

    assert!(matches!(
        launcher.add_runnable(id),
        Err(Error::UnknownFiber { fiber }) if fiber == id
    ));
    assert!(!launcher.is_scheduled(id));
}

#[test]
fn test_stack_sizes() {
    init_logging();
    let launcher = Launcher::builder().default_stack_size(128 * 1024).build();
    assert_eq!(launcher.default_stack_size(), 128 * 1024);

    let default_sized = FiberBuilder::new(|_| {})
        .start_runnable(false)
        .spawn(&launcher)
        .unwrap();
    let custom = FiberBuilder::new(|_| {})
        .stack_size(512 * 1024)
        .start_runnable(false)
        .spawn(&launcher)
        .unwrap();

    assert_eq!(launcher.stack_size(default_sized), Some(128 * 1024));
    assert_eq!(launcher.stack_size(custom), Some(512 * 1024));

    let too_small = FiberBuilder::new(|_| {}).stack_size(8 * 1024).spawn(&launcher);
    assert!(matches!(
        too_small,
        Err(Error::StackTooSmall {
            requested: 8192,
            minimum: MIN_STACK_SIZE
        })
    ));

    launcher.set_default_stack_size(16);
    assert!(launcher.spawn(|_| {}).is_err());
    assert_eq!(launcher.fiber_count(), 2);
}

#[test]
fn test_launcher_recovers_from_panicking_hook() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();
    let armed = Rc::new(Cell::new(true));

    let (run_log, trigger) = (log.clone(), armed.clone());
    let first = FiberBuilder::new(move |_| push(&run_log, "first"))
        .on_pre_activate(move || {
            if trigger.replace(false) {
                panic!("hook failed");
            }
        })
        .spawn(&launcher)
        .unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| launcher.start()));
    assert!(outcome.is_err());

    assert_eq!(launcher.active(), None);
    assert!(launcher.is_scheduled(first));
    assert_eq!(launcher.state(first), Some(FiberState::Runnable));
    assert_eq!(launcher.runnable_len(), 1);

    let run_log = log.clone();
    launcher.spawn(move |_| push(&run_log, "second")).unwrap();
    launcher.start().unwrap();

    assert_eq!(*log.borrow(), vec!["first", "second"]);
    assert_eq!(launcher.fiber_count(), 0);
}

#[test]
fn test_hook_panic_during_yield_unwinds_the_yielder() {
    init_logging();
    let launcher = Launcher::new();
    let log: Log = Rc::default();
    let armed = Rc::new(Cell::new(true));

    let (run_log, died_log) = (log.clone(), log.clone());
    let yielder = FiberBuilder::new(move |fiber| {
        push(&run_log, "a-yields");
        let _ = fiber.yield_now();
        push(&run_log, "a-resumed");
    })
    .on_died(move |exit| {
        let message = exit.panic_message().unwrap_or("completed").to_string();
        push(&died_log, format!("a-died: {message}"));
    })
    .spawn(&launcher)
    .unwrap();

    let (run_log, trigger) = (log.clone(), armed.clone());
    FiberBuilder::new(move |_| push(&run_log, "b-runs"))
        .on_pre_activate(move || {
            if trigger.replace(false) {
                panic!("hook failed");
            }
        })
        .spawn(&launcher)
        .unwrap();

    launcher.start().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["a-yields", "a-died: hook failed", "b-runs"]
    );
    assert_eq!(launcher.state(yielder), None);
    assert_eq!(launcher.fiber_count(), 0);
}

#[test]
fn test_hook_cannot_yield_or_start() {
    init_logging();
    let launcher = Launcher::new();
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let yielder: Rc<Cell<Option<FiberId>>> = Rc::default();

    let id = launcher
        .spawn(|fiber| fiber.yield_now().unwrap())
        .unwrap();
    yielder.set(Some(id));

    let (seen, observer, target) = (outcomes.clone(), launcher.clone(), yielder.clone());
    FiberBuilder::new(|_| {})
        .on_pre_activate(move || {
            assert!(spindle::current().is_none());

            let mut seen = seen.borrow_mut();
            seen.push(spindle::yield_now());
            if let Some(id) = target.get() {
                seen.push(observer.yield_fiber(id, true));
            }
            seen.push(observer.start());
        })
        .spawn(&launcher)
        .unwrap();

    launcher.start().unwrap();

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], Err(Error::OutsideFiber)));
    assert!(matches!(outcomes[1], Err(Error::NotActive { fiber }) if fiber == id));
    assert!(matches!(outcomes[2], Err(Error::NestedStart)));
    assert_eq!(launcher.fiber_count(), 0);
}
