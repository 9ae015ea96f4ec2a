//! Affinity executor: a fixed pool of long-lived single-threaded workers.
//!
//! Each worker owns a context `C` that is created *on the worker thread* when
//! the pool starts and never leaves it, so `C` does not need to be `Send`.
//! Units of work are closures over `&mut C`; a unit runs entirely on one worker
//! and each worker drains its own queue in FIFO order.
//!
//! Callers never block: [`AffinityExecutor::submit`] enqueues and returns a
//! future that resolves when the worker is done.

use crate::{Error, Result};
use std::cell::Cell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

type Job<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

thread_local! {
    static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Index of the affinity worker the current thread belongs to, if any.
pub fn current_worker() -> Option<usize> {
    WORKER_ID.with(|w| w.get())
}

/// Cooperative cancellation for units that have not started yet.
///
/// Canceling after a worker picked the unit up has no effect: units are not
/// interruptible once running.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

struct Worker<C> {
    tx: Option<Sender<Job<C>>>,
    pending: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed-size pool of affinity-bound workers.
pub struct AffinityExecutor<C> {
    workers: Vec<Worker<C>>,
    next: AtomicUsize,
}

impl<C: 'static> AffinityExecutor<C> {
    /// Start `size` workers, running `init(index)` on each worker thread to
    /// build its context. Returns once every worker has reported back; any
    /// init failure fails the whole pool.
    pub fn new<F>(size: usize, init: F) -> Result<Self>
    where
        F: Fn(usize) -> Result<C> + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(Error::ConfigError("executor needs at least one worker".into()));
        }

        let init = Arc::new(init);
        let (init_tx, init_rx) = mpsc::channel::<(usize, Result<()>)>();
        let mut workers = Vec::with_capacity(size);

        for idx in 0..size {
            let (tx, rx) = mpsc::channel::<Job<C>>();
            let pending = Arc::new(AtomicUsize::new(0));
            let worker_pending = pending.clone();
            let init = init.clone();
            let init_tx = init_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("cardshot-worker-{}", idx))
                .spawn(move || {
                    WORKER_ID.with(|w| w.set(Some(idx)));

                    // The context is created here and never crosses threads
                    let mut ctx = match init(idx) {
                        Ok(c) => c,
                        Err(err) => {
                            let _ = init_tx.send((idx, Err(err)));
                            return;
                        }
                    };
                    let _ = init_tx.send((idx, Ok(())));
                    drop(init_tx);

                    while let Ok(job) = rx.recv() {
                        job(&mut ctx);
                        worker_pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    log::debug!("affinity worker {} shutting down", idx);
                })
                .map_err(|e| Error::InitializationError(format!("failed to spawn worker {}: {}", idx, e)))?;

            workers.push(Worker {
                tx: Some(tx),
                pending,
                handle: Some(handle),
            });
        }
        drop(init_tx);

        let executor = Self {
            workers,
            next: AtomicUsize::new(0),
        };

        for _ in 0..size {
            match init_rx.recv() {
                Ok((_, Ok(()))) => {}
                Ok((idx, Err(err))) => {
                    return Err(Error::InitializationError(format!("worker {} init failed: {}", idx, err)));
                }
                Err(_) => {
                    return Err(Error::InitializationError("worker exited during init".into()));
                }
            }
        }

        log::debug!("affinity executor started with {} workers", size);
        Ok(executor)
    }

    /// Start one worker per available processor.
    pub fn with_default_size<F>(init: F) -> Result<Self>
    where
        F: Fn(usize) -> Result<C> + Send + Sync + 'static,
    {
        Self::new(num_cpus::get().max(1), init)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a unit of work. The unit is enqueued before this returns; the
    /// returned future only waits for the result.
    pub fn submit<T, F>(&self, work: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        self.submit_with_cancel(work, CancelToken::new())
    }

    /// Like [`submit`](Self::submit), but the unit is skipped (and resolves to
    /// [`Error::Canceled`]) if `cancel` fires, or the returned future is
    /// dropped, before a worker starts it.
    pub fn submit_with_cancel<T, F>(
        &self,
        work: F,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<T>>();

        let job: Job<C> = Box::new(move |ctx: &mut C| {
            if cancel.is_canceled() || resp_tx.is_closed() {
                let _ = resp_tx.send(Err(Error::Canceled));
                return;
            }
            let res = panic::catch_unwind(AssertUnwindSafe(|| work(ctx))).unwrap_or_else(|payload| {
                Err(Error::SchedulingError(format!(
                    "unit panicked on worker: {}",
                    panic_message(payload.as_ref())
                )))
            });
            let _ = resp_tx.send(res);
        });

        let idx = self.pick_worker();
        let worker = &self.workers[idx];
        worker.pending.fetch_add(1, Ordering::SeqCst);
        let queued = match &worker.tx {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !queued {
            worker.pending.fetch_sub(1, Ordering::SeqCst);
            log::warn!("affinity worker {} is gone; failing unit", idx);
        }

        async move {
            if !queued {
                return Err(Error::SchedulingError(format!("worker {} is not running", idx)));
            }
            resp_rx
                .await
                .map_err(|_| Error::SchedulingError(format!("worker {} dropped the unit", idx)))?
        }
    }

    // Least-loaded worker, scanning from a rotating start so ties spread round-robin.
    fn pick_worker(&self) -> usize {
        let n = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|i| (start + i) % n)
            .min_by_key(|&i| self.workers[i].pending.load(Ordering::SeqCst))
            .unwrap_or(start)
    }
}

impl<C> AffinityExecutor<C> {
    fn shutdown(&mut self) {
        for w in &mut self.workers {
            w.tx.take();
        }
        // A worker cannot join itself; leave handles detached in that case.
        if current_worker().is_some() {
            return;
        }
        for w in &mut self.workers {
            if let Some(h) = w.handle.take() {
                let _ = h.join();
            }
        }
    }
}

impl<C> Drop for AffinityExecutor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
