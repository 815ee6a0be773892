use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    queue: VecDeque<Vec<T>>,
    buffered: usize,
    exhausted: bool,
}

/// Blocking handoff channel between pipeline stages.
///
/// Carries batches of scalars in FIFO order plus an end-of-stream flag.
/// Once exhausted, consumers drain whatever was pushed before the flag
/// and then receive empty batches forever. Unbounded by default; a bound
/// makes `push` block (never drop) while the queue is full.
pub struct Handoff<T> {
    state: Mutex<State<T>>,
    readable: Condvar,
    writable: Condvar,
    bound: Option<usize>,
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_bound(max_batches: usize) -> Self {
        assert!(max_batches > 0, "channel bound must be non-zero");
        Self::build(Some(max_batches))
    }

    fn build(bound: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                buffered: 0,
                exhausted: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            bound,
        }
    }

    pub fn push(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(bound) = self.bound {
            while state.queue.len() >= bound && !state.exhausted {
                state = self.writable.wait(state).unwrap();
            }
        }
        state.buffered += batch.len();
        state.queue.push_back(batch);
        self.readable.notify_one();
    }

    /// Block until a batch arrives or the channel is exhausted and drained,
    /// in which case an empty batch is returned (and forever after).
    pub fn pull(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(batch) = state.queue.pop_front() {
                state.buffered -= batch.len();
                self.writable.notify_one();
                return batch;
            }
            if state.exhausted {
                return Vec::new();
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    pub fn set_exhausted(&self) {
        let mut state = self.state.lock().unwrap();
        state.exhausted = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// True only once the flag is set and every buffered batch was pulled.
    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.exhausted && state.queue.is_empty()
    }

    /// Total scalars currently buffered across queued batches.
    pub fn buffered(&self) -> usize {
        self.state.lock().unwrap().buffered
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
