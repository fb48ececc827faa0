use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, SendError, Sender};
use log::{debug, error, trace, warn};

use crate::decode::{Bitmap, DecodeError, Decoder};
use crate::map::Preview;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Worker thread count; zero means one per available core.
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cancellation token for one submitted decode. Cancelling is idempotent and
/// guarantees the completion callback is never invoked after the flag is observed.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancel_flag: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

pub type Completion = Box<dyn FnOnce(TaskId, Result<Bitmap, DecodeError>) + Send>;

struct Job {
    id: TaskId,
    preview: Preview,
    cancel_flag: Arc<AtomicBool>,
    on_done: Completion,
}

struct Inner {
    decoder: Arc<dyn Decoder>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    next_id: AtomicU64,
    submitted: AtomicU64,
}

pub struct DecodePool {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl DecodePool {
    pub fn new(decoder: Arc<dyn Decoder>, cfg: Config) -> Result<Self> {
        let workers = if cfg.workers == 0 {
            thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(2)
        } else {
            cfg.workers
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            decoder,
            jobs: job_tx,
            stop: stop_tx,
            next_id: AtomicU64::new(1),
            submitted: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("preview-decode-{index}"))
                .spawn(move || worker_inner.worker(rx_jobs, rx_stop))
                .context("worker: spawn decode thread")?;
            handles.push(handle);
        }
        debug!("worker: started {workers} decode threads");

        Ok(Self { inner, handles })
    }

    /// Queues a decode and returns immediately. `on_done` runs on a worker thread,
    /// and only if the task was not cancelled. If the workers are gone it runs at once
    /// with [`DecodeError::Stopped`].
    pub fn submit<F>(&self, preview: Preview, on_done: F) -> TaskHandle
    where
        F: FnOnce(TaskId, Result<Bitmap, DecodeError>) + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.inner.submitted.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            preview,
            cancel_flag: cancel_flag.clone(),
            on_done: Box::new(on_done),
        };
        if let Err(SendError(job)) = self.inner.jobs.send(job) {
            warn!("worker: no decode threads left for task {id}");
            (job.on_done)(id, Err(DecodeError::Stopped));
        }
        TaskHandle { id, cancel_flag }
    }

    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        if job.cancel_flag.load(Ordering::SeqCst) {
            trace!("worker: skipping cancelled task {}", job.id);
            return;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.decoder.decode(&job.preview)))
            .unwrap_or_else(|_| {
                error!("worker: decoder panicked on task {}", job.id);
                Err(DecodeError::Panicked)
            });
        if job.cancel_flag.load(Ordering::SeqCst) {
            trace!("worker: discarding result of cancelled task {}", job.id);
            return;
        }
        (job.on_done)(job.id, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use image::RgbaImage;
    use std::time::Duration;

    struct Blocking {
        gate: Receiver<()>,
    }

    impl Decoder for Blocking {
        fn decode(&self, _preview: &Preview) -> Result<Bitmap, DecodeError> {
            let _ = self.gate.recv();
            Ok(Arc::new(RgbaImage::new(1, 1)))
        }
    }

    #[test]
    fn delivers_completion() {
        let (gate_tx, gate_rx) = bounded(4);
        let pool = DecodePool::new(Arc::new(Blocking { gate: gate_rx }), Config { workers: 1 }).unwrap();
        let (tx, rx) = unbounded();
        let handle = pool.submit(Preview::Missing, move |id, result| {
            let _ = tx.send((id, result.is_ok()));
        });
        gate_tx.send(()).unwrap();

        let (id, ok) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, handle.id());
        assert!(ok);
        assert_eq!(pool.submitted(), 1);
    }

    #[test]
    fn cancelled_task_never_completes() {
        let (gate_tx, gate_rx) = bounded(4);
        let pool = DecodePool::new(Arc::new(Blocking { gate: gate_rx }), Config { workers: 1 }).unwrap();
        let (tx, rx) = unbounded();

        let first_tx = tx.clone();
        let first = pool.submit(Preview::Missing, move |id, _| {
            let _ = first_tx.send(id);
        });
        let second = pool.submit(Preview::Missing, move |id, _| {
            let _ = tx.send(id);
        });
        first.cancel();
        first.cancel();
        assert!(first.is_cancelled());

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();

        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(delivered, second.id());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    struct Panicky;

    impl Decoder for Panicky {
        fn decode(&self, preview: &Preview) -> Result<Bitmap, DecodeError> {
            match preview {
                Preview::Missing => panic!("decoder bug"),
                _ => Ok(Arc::new(RgbaImage::new(1, 1))),
            }
        }
    }

    #[test]
    fn panicking_decode_reports_failure_and_keeps_worker() {
        let pool = DecodePool::new(Arc::new(Panicky), Config { workers: 1 }).unwrap();
        let (tx, rx) = unbounded();

        let first_tx = tx.clone();
        let first = pool.submit(Preview::Missing, move |id, result| {
            let _ = first_tx.send((id, result));
        });
        let second = pool.submit(Preview::Encoded(vec![1].into()), move |id, result| {
            let _ = tx.send((id, result));
        });

        let (id, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, first.id());
        assert!(matches!(result, Err(DecodeError::Panicked)));

        let (id, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, second.id());
        assert!(result.is_ok());
    }
}
