use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    closed: bool,
    tasks: VecDeque<Task>,
}

struct Shared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Fixed set of worker threads draining a FIFO task queue.
///
/// The queue itself is unbounded; the upstream bound is the connection cap
/// plus the one-shot rearm that allows at most one queued task per
/// connection. Dropping the pool closes the queue and joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(thread_num: usize) -> io::Result<Self> {
        assert!(thread_num > 0);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                closed: false,
                tasks: VecDeque::new(),
            }),
            cond: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(thread_num);
        for i in 0..thread_num {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || Self::worker_loop(shared))?;
            workers.push(handle);
        }
        Ok(ThreadPool { shared, workers })
    }

    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.tasks.push_back(Box::new(task));
        }
        self.shared.cond.notify_one();
    }

    fn worker_loop(shared: Arc<Shared>) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                // run without the lock so other workers keep draining
                drop(state);
                task();
                state = shared.state.lock().unwrap();
            } else if state.closed {
                break;
            } else {
                state = shared.cond.wait(state).unwrap();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            self.shared.state.lock().unwrap().closed = true;
        }
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
