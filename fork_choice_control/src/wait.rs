use std::sync::Mutex;

use crossbeam_utils::sync::WaitGroup;

/// Attached to every message a task sends to the mutator.
///
/// Production code uses `()` and pays nothing. Tests use [`WaitGroup`] to
/// block until all in-flight tasks and their messages have been processed.
pub trait Wait: Clone + Default + Send + 'static {
    type Swappable: Default + Send + Sync;

    fn load_and_clone(swappable: &Self::Swappable) -> Self;
}

impl Wait for () {
    type Swappable = ();

    fn load_and_clone((): &Self::Swappable) -> Self {}
}

impl Wait for WaitGroup {
    type Swappable = Mutex<Self>;

    fn load_and_clone(swappable: &Self::Swappable) -> Self {
        swappable
            .lock()
            .expect("wait group mutex is poisoned")
            .clone()
    }
}
