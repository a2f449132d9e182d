//! Four workers, each acting for its own owner, allocate five blocks apiece
//! and never free them. The dump at the end attributes every block.

use std::{error::Error, thread};

use log::{info, warn};
use ownalloc::{
    config::Config,
    global,
    owner::{self, OwnerId},
    thread_println,
};

const NR_WORKERS: u32 = 4;
const NR_BLOCKS: usize = 5;

fn worker(owner: OwnerId) {
    owner::bind_owner(owner);
    thread_println!("thread create: {owner:#x}");
    for i in 0..NR_BLOCKS {
        // leaked on purpose, they should show up in the dump
        if let Err(e) = global::allocate(1024 * (i + 1)) {
            warn!("{owner:?}: {e}");
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    global::init(Config::from_env()?)?;

    let workers = (1..=NR_WORKERS)
        .map(|id| {
            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker(OwnerId(id)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for worker in workers {
        worker.join().map_err(|_| "worker panicked")?;
    }

    let report = global::report();
    report.log();
    println!("dump all owner mem:");
    print!("{report}");
    info!("drift: {:?}", report.drift());
    Ok(())
}
