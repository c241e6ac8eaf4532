use std::{collections::VecDeque, sync::Arc, thread::Builder};

use anyhow::Result;
use parking_lot::{Condvar, Mutex};

pub trait Run: Send + 'static {
    fn run(self: Box<Self>);
}

/// A small worker pool for validation tasks.
///
/// Tasks run against store snapshots and report to the mutator over its
/// queue, so workers never contend on the store itself.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.critical.lock().done = true;
        self.shared.condvar.notify_all();
    }
}

impl ThreadPool {
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared::default());

        let worker_count = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);

        for index in 0..worker_count {
            let shared = shared.clone();

            Builder::new()
                .name(format!("store-worker-{index}"))
                .spawn(move || run_worker(&shared))?;
        }

        Ok(Self { shared })
    }

    pub fn spawn(&self, task: impl Run) {
        self.shared.critical.lock().tasks.push_back(Box::new(task));
        self.shared.condvar.notify_one();
    }
}

#[derive(Default)]
struct Shared {
    critical: Mutex<Critical>,
    condvar: Condvar,
}

// `done` and the task queue must be inside the `Mutex` to avoid race conditions.
#[derive(Default)]
struct Critical {
    done: bool,
    tasks: VecDeque<Box<dyn Run>>,
}

fn run_worker(shared: &Shared) {
    loop {
        let mut critical = shared.critical.lock();

        while !critical.done && critical.tasks.is_empty() {
            shared.condvar.wait(&mut critical);
        }

        if critical.done {
            break;
        }

        let task = critical
            .tasks
            .pop_front()
            .expect("the loop above only exits with a task available or done set");

        drop(critical);

        task.run();
    }
}
