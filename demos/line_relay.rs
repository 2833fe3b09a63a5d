//! Example: blocking-style fibers on top of a host-driven input source
//!
//! Ten fibers each read one line, echo it and die. Reading a line blocks the
//! fiber on a condition; the host loop reads stdin and hands each line to the
//! longest-waiting reader.
//!
//! ```text
//! printf 'a\nb\nc\n' | cargo run --example line_relay
//! ```

use spindle::{Condition, Fiber, FiberBuilder, Launcher, MIN_STACK_SIZE};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::rc::Rc;

/// A reader waiting for its line: the condition it sleeps on and where the
/// line is delivered.
struct PendingRead {
    ready: Rc<Condition>,
    line: Rc<RefCell<String>>,
}

/// The host side of a line-oriented input.
#[derive(Default)]
struct Session {
    readers: RefCell<VecDeque<PendingRead>>,
}

impl Session {
    /// Blocks `fiber` until the host delivers a line.
    fn read_line(&self, fiber: &Fiber) -> spindle::Result<String> {
        let ready = match fiber.launcher() {
            Some(launcher) => Rc::new(Condition::new(&launcher)),
            None => return Err(spindle::Error::OutsideFiber),
        };
        let line = Rc::new(RefCell::new(String::new()));

        self.readers.borrow_mut().push_back(PendingRead {
            ready: ready.clone(),
            line: line.clone(),
        });
        fiber.yield_on(&ready)?;

        Ok(line.take())
    }

    /// Hands `text` to the longest-waiting reader.
    ///
    /// Returns `false` if nobody wants a line.
    fn deliver(&self, text: String) -> bool {
        let Some(reader) = self.readers.borrow_mut().pop_front() else {
            return false;
        };

        *reader.line.borrow_mut() = text;
        reader.ready.set();
        true
    }
}

fn main() -> spindle::Result<()> {
    env_logger::init();

    let launcher = Launcher::new();
    let session = Rc::new(Session::default());

    for n in 0..10 {
        let session = session.clone();
        FiberBuilder::new(move |fiber| match session.read_line(fiber) {
            Ok(line) => println!("echo from fiber {n}: '{line}'"),
            Err(err) => eprintln!("fiber {n} could not read: {err}"),
        })
        .name(format!("reader-{n}"))
        .stack_size(MIN_STACK_SIZE)
        .on_died(move |_| println!("fiber {n} died"))
        .spawn(&launcher)?;
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        launcher.start()?;

        if launcher.fiber_count() == 0 {
            println!("every reader is done");
            break;
        }

        // Only blocked fibers remain, so waiting on the input is fine.
        let Some(Ok(line)) = lines.next() else {
            println!("input closed with {} reader(s) waiting", launcher.fiber_count());
            break;
        };

        if !session.deliver(line) {
            println!("no-one wants a line");
        }
    }

    Ok(())
}
