//! Event loop and event-loop pool.
//!
//! Each `EventLoop` owns a single-threaded Tokio runtime on its own OS
//! thread (mirroring the source's one-`io_context`-per-loop design) plus a
//! prioritized task queue. Its worker alternates between letting the
//! runtime's reactor make progress and draining ready tasks, so task
//! thunks posted from any thread run serially, in submission order within a
//! priority class, on that loop's single worker thread.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use crate::orderbook::Symbol;
use crate::queue::{Priority, PriorityQueue};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Target slice the worker spends advancing the reactor before it checks
/// the task queue again.
const REACTOR_SLICE: Duration = Duration::from_millis(10);

pub struct EventLoop {
    id: usize,
    tasks: Arc<PriorityQueue<Task>>,
    running: Arc<AtomicBool>,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventLoop {
    pub fn new(id: usize) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            id,
            tasks: Arc::new(PriorityQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            handle,
            runtime: Mutex::new(Some(runtime)),
            thread: Mutex::new(None),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// A handle into this loop's own runtime; handlers spawn their
    /// connection futures here so that I/O for a given symbol always runs
    /// on the loop that owns it.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Current depth of this loop's task queue — the input to the pool's
    /// least-loaded selection policy.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Enqueues a unit of work for serial execution on this loop's worker.
    /// Safe to call from any thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static, priority: Priority) {
        self.tasks.push(Box::new(task), priority);
    }

    /// Starts the worker thread. Idempotent.
    pub fn run(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let runtime = match self.runtime.lock().take() {
            Some(rt) => rt,
            None => {
                warn!(loop_id = self.id, "event loop started twice");
                return;
            }
        };
        let tasks = self.tasks.clone();
        let running = self.running.clone();
        let id = self.id;
        let join = thread::Builder::new()
            .name(format!("cenayang-loop-{id}"))
            .spawn(move || {
                runtime.block_on(worker_loop(tasks, running));
            })
            .expect("failed to spawn event loop thread");
        *self.thread.lock() = Some(join);
    }

    /// Cooperative stop: clears the running flag and joins the worker.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.thread.lock().take() {
            let _ = join.join();
        }
    }
}

async fn worker_loop(tasks: Arc<PriorityQueue<Task>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        tokio::time::sleep(REACTOR_SLICE).await;
        while let Some(task) = tasks.pop() {
            task();
            // Yield between thunks so the reactor and other loop-local
            // futures are not starved by a long run of queued tasks.
            tokio::task::yield_now().await;
        }
    }
    debug!("event loop worker exiting");
}

/// Holds *E* event loops and load-balances handler placement by current
/// queue depth (least-loaded), not round-robin — see the re-architecture
/// notes on why round-robin was dropped.
pub struct EventLoopPool {
    loops: Vec<Arc<EventLoop>>,
}

impl EventLoopPool {
    pub fn new(count: usize) -> io::Result<Self> {
        let mut loops = Vec::with_capacity(count);
        for id in 0..count {
            loops.push(Arc::new(EventLoop::new(id)?));
        }
        Ok(Self { loops })
    }

    pub fn size(&self) -> usize {
        self.loops.len()
    }

    /// Least-loaded selection: the loop with the fewest queued tasks right
    /// now, ties broken by iteration (loop index) order.
    pub fn get_next_loop(&self) -> Arc<EventLoop> {
        self.loops
            .iter()
            .min_by_key(|l| l.task_count())
            .expect("pool always has at least one loop")
            .clone()
    }

    /// Deterministic affinity: `hash(symbol) mod E` selects the loop that
    /// owns a symbol's push and pull handlers, per spec. Unlike
    /// `get_next_loop`, this never moves a symbol's handlers once placed
    /// and does not depend on `task_count()`, which production handlers
    /// (spawned directly on a loop's runtime `Handle`, not posted through
    /// `EventLoop::post`) never update.
    pub fn loop_for_symbol(&self, symbol: &Symbol) -> Arc<EventLoop> {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.loops.len();
        self.loops[idx].clone()
    }

    pub fn run(&self) {
        for l in &self.loops {
            l.run();
        }
    }

    pub fn stop(&self) {
        for l in &self.loops {
            l.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn posted_tasks_run_in_priority_then_fifo_order() {
        let el = EventLoop::new(0).unwrap();
        el.run();

        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, prio) in [
            ("low", Priority::Low),
            ("high-1", Priority::High),
            ("medium", Priority::Medium),
            ("high-2", Priority::High),
        ] {
            let order = order.clone();
            el.post(move || order.lock().push(label), prio);
        }

        thread::sleep(Duration::from_millis(100));
        el.stop();

        assert_eq!(*order.lock(), vec!["high-1", "high-2", "medium", "low"]);
    }

    #[test]
    fn pool_selects_least_loaded_loop() {
        let pool = EventLoopPool::new(2).unwrap();
        pool.run();

        // Flood loop 0 with tasks so loop 1 is strictly less loaded.
        let busy = pool.loops[0].clone();
        let block = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let block = block.clone();
            busy.post(move || { block.fetch_add(1, Ordering::Relaxed); }, Priority::Low);
        }

        let chosen = pool.get_next_loop();
        // Not a hard guarantee under timing, but with 1000 queued tasks
        // against an idle loop this should reliably pick loop 1.
        assert!(chosen.task_count() <= busy.task_count());

        pool.stop();
    }
}
