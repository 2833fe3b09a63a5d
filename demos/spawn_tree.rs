//! Example: fibers spawning fibers and waiting for them to finish
//!
//! Each root fiber spawns a chain of descendants. A parent waits on its
//! child's "done" condition, which the child signals from its `died` hook.

use spindle::{Condition, FiberBuilder, Launcher};
use std::rc::Rc;

fn spawn_node(launcher: &Launcher, n: u32) -> spindle::Result<Rc<Condition>> {
    let done = Rc::new(Condition::new(launcher));
    let signal = done.clone();

    println!("fiber {n} created");

    FiberBuilder::new(move |fiber| {
        println!("running fiber {n}");

        if n % 4 < 3 {
            println!("fiber {n} creating child {}", n + 1);
            // The launcher handle must not outlive this statement: the fiber
            // is about to park, and a parked fiber must not keep it alive.
            let child_done = match fiber.launcher().map(|launcher| spawn_node(&launcher, n + 1)) {
                Some(Ok(done)) => done,
                Some(Err(err)) => {
                    eprintln!("fiber {n} could not spawn a child: {err}");
                    return;
                }
                None => return,
            };

            println!("fiber {n} waits for child {}", n + 1);
            if let Err(err) = fiber.yield_on(&child_done) {
                eprintln!("fiber {n} could not wait: {err}");
                return;
            }
        }

        println!("fiber {n} done");
    })
    .name(format!("node-{n}"))
    .on_died(move |exit| {
        println!("fiber {n} died (panicked={})", exit.is_panicked());
        signal.set();
    })
    .spawn(launcher)?;

    Ok(done)
}

fn main() -> spindle::Result<()> {
    env_logger::init();

    let launcher = Launcher::new();

    for root in [0, 4, 8, 12] {
        spawn_node(&launcher, root)?;
    }

    launcher.start()?;

    println!("back in main, {} fiber(s) left", launcher.fiber_count());
    Ok(())
}
