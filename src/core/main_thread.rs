//! # Main-Thread Dispatcher
//!
//! Worker threads never touch consumer-side state (meshes, render bookkeeping)
//! directly. Instead they post callbacks here, and the designated main thread
//! drains them during its update tick.
//!
//! ## Lifecycle
//! 1. The dispatcher is created on (or bound to) the consumer thread
//! 2. Any thread posts callbacks with [`MainThreadDispatcher::post`]
//! 3. The consumer thread calls [`MainThreadDispatcher::run_pending`] once per tick
//! 4. Callbacks run in the order they were posted; a panicking callback is logged
//!    and the remaining callbacks still run

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{channel, Receiver, Sender},
    },
    thread::{self, ThreadId},
};

use log::error;
use parking_lot::Mutex;

use crate::engine_state::errors::DispatchError;

/// A unit of work that must run on the main thread.
pub type MainThreadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Queues callbacks from any thread and runs them on a single consumer thread.
pub struct MainThreadDispatcher {
    main_thread: ThreadId,
    sender: Sender<MainThreadCallback>,
    receiver: Mutex<Receiver<MainThreadCallback>>,
    pending: AtomicUsize,
}

impl MainThreadDispatcher {
    /// Creates a dispatcher bound to the calling thread.
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    /// Creates a dispatcher bound to an explicit consumer thread.
    pub fn for_thread(main_thread: ThreadId) -> Self {
        let (sender, receiver) = channel();
        Self {
            main_thread,
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    /// Returns `true` when called from the consumer thread.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Queues a callback for the next [`run_pending`](Self::run_pending).
    pub fn post(&self, callback: MainThreadCallback) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(callback);
    }

    /// Runs the callback immediately when already on the consumer thread,
    /// otherwise queues it.
    pub fn run_or_post(&self, callback: MainThreadCallback) {
        if self.is_main_thread() {
            run_callback(callback);
        } else {
            self.post(callback);
        }
    }

    /// Number of callbacks posted but not yet run.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Runs every callback queued so far.
    ///
    /// Callbacks posted while this drain is running are left for the next call,
    /// so a callback that re-posts itself cannot starve the tick.
    ///
    /// # Returns
    /// The number of callbacks that ran, or [`DispatchError::NotMainThread`] if
    /// called from any thread other than the consumer thread.
    pub fn run_pending(&self) -> Result<usize, DispatchError> {
        if !self.is_main_thread() {
            return Err(DispatchError::NotMainThread);
        }

        let drained: Vec<MainThreadCallback> = {
            let receiver = self.receiver.lock();
            receiver.try_iter().collect()
        };
        self.pending.fetch_sub(drained.len(), Ordering::AcqRel);

        let count = drained.len();
        for callback in drained {
            run_callback(callback);
        }
        Ok(count)
    }
}

impl Default for MainThreadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn run_callback(callback: MainThreadCallback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            "Main-thread callback panicked: {}",
            crate::engine_state::task_management::task::panic_message(payload.as_ref())
        );
    }
}
