//! Deferred tasks drained by the engine main loop.

use std::sync::mpsc::{self, Receiver};

use parking_lot::Mutex;
use tracing::trace;

pub type MainThreadTask = Box<dyn FnOnce() + Send>;

struct Scheduled {
    due: f64,
    seq: u64,
    task: MainThreadTask,
}

#[derive(Default)]
struct QueueState {
    now: f64,
    next_seq: u64,
    tasks: Vec<Scheduled>,
}

/// Task queue with its own clock. Tasks run on whichever thread calls [`MainThreadQueue::update`].
#[derive(Default)]
pub struct MainThreadQueue {
    state: Mutex<QueueState>,
}

impl MainThreadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to run once the queue clock has advanced by `delay` seconds.
    pub fn post<F>(&self, delay: f32, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        let due = state.now + f64::from(delay.max(0.0));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.push(Scheduled { due, seq, task: Box::new(task) });
    }

    /// Runs `job` on the next update and delivers its result through the returned receiver.
    pub fn post_invoke<T, F>(&self, job: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.post(0.0, move || {
            let _ = tx.send(job());
        });
        rx
    }

    pub fn now(&self) -> f64 {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Advances the clock by `dt` seconds and runs every due task in due order. Tasks
    /// posted by running tasks run in the same update when they are already due.
    pub fn update(&self, dt: f32) -> usize {
        self.state.lock().now += f64::from(dt.max(0.0));
        let mut ran = 0;
        while let Some(task) = self.pop_due() {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "main-thread tasks");
        }
        ran
    }

    fn pop_due(&self) -> Option<MainThreadTask> {
        let mut state = self.state.lock();
        let now = state.now;
        let index = state
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, scheduled)| scheduled.due <= now)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)))
            .map(|(index, _)| index)?;
        Some(state.tasks.swap_remove(index).task)
    }
}
