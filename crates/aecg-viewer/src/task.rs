//! Background jobs for the GUI.
//!
//! A [`TaskRunner`] owns a small pool of worker threads fed over a crossbeam
//! channel. Each submitted job gets its own event channel, exposed as a
//! [`TaskHandle`] that the UI thread drains once per frame.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type Waker = Arc<dyn Fn() + Send + Sync>;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Backtrace of the last panic on this thread, taken where it was raised.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that records the panicking thread's backtrace before the
/// stack unwinds to `catch_unwind`.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Data,
    Panic,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "I/O error",
            ErrorKind::Data => "data error",
            ErrorKind::Panic => "panic",
            ErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Error chain, or the backtrace for panics
    pub trace: String,
}

impl TaskError {
    fn from_anyhow(err: &anyhow::Error) -> Self {
        let kind = if err.chain().any(|cause| cause.is::<std::io::Error>()) {
            ErrorKind::Io
        } else if let Some(lib) = err.downcast_ref::<aecg_lib::Error>() {
            match lib {
                aecg_lib::Error::Io(_) => ErrorKind::Io,
                _ => ErrorKind::Data,
            }
        } else {
            ErrorKind::Other
        };
        Self {
            kind,
            message: err.to_string(),
            trace: format!("{err:?}"),
        }
    }

    fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "task panicked".to_string()
        };
        Self {
            kind: ErrorKind::Panic,
            message,
            trace: PANIC_TRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string()),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug)]
pub enum TaskEvent<T> {
    Progress { current: usize, total: usize },
    Result(T),
    Error(TaskError),
    Finished,
}

/// Sink handed to a running job.
pub struct Progress<T> {
    tx: Sender<TaskEvent<T>>,
    waker: Option<Waker>,
}

impl<T> Progress<T> {
    pub fn report(&self, current: usize, total: usize) {
        self.send(TaskEvent::Progress { current, total });
    }

    fn send(&self, event: TaskEvent<T>) {
        // the handle may already be gone; nothing left to notify then
        if self.tx.send(event).is_ok() {
            if let Some(waker) = &self.waker {
                waker();
            }
        }
    }
}

pub struct TaskHandle<T> {
    rx: Receiver<TaskEvent<T>>,
    pending: VecDeque<TaskEvent<T>>,
    finished: bool,
}

impl<T> TaskHandle<T> {
    /// Events received since the last call, in emission order. Never blocks.
    pub fn poll(&mut self) -> Vec<TaskEvent<T>> {
        let mut events: Vec<TaskEvent<T>> = self.pending.drain(..).collect();
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, TaskEvent::Finished) {
                self.finished = true;
            }
            events.push(event);
        }
        events
    }

    /// Block up to `timeout` for the job to finish. Drained events stay
    /// queued for the next [`TaskHandle::poll`].
    pub fn wait_finished(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.finished {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    if matches!(event, TaskEvent::Finished) {
                        self.finished = true;
                    }
                    self.pending.push_back(event);
                }
                Err(_) => break,
            }
        }
        self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

pub struct TaskRunner {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    waker: Option<Waker>,
}

impl TaskRunner {
    pub fn new(threads: usize) -> Self {
        install_panic_hook();
        let (job_tx, job_rx) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|i| {
                let job_rx = job_rx.clone();
                std::thread::Builder::new()
                    .name(format!("aecg-task-{i}"))
                    .spawn(move || {
                        while let Ok(job) = job_rx.recv() {
                            job();
                        }
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!("failed to spawn task worker: {err}");
                    None
                }
            })
            .collect();
        Self {
            job_tx: Some(job_tx),
            workers,
            waker: None,
        }
    }

    /// Called after every event, typically to request a repaint.
    pub fn with_waker(mut self, waker: Waker) -> Self {
        self.waker = Some(waker);
        self
    }

    pub fn submit<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&Progress<T>) -> anyhow::Result<T> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let progress = Progress {
            tx,
            waker: self.waker.clone(),
        };
        let run: Job = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(|| job(&progress))) {
                Ok(Ok(value)) => progress.send(TaskEvent::Result(value)),
                Ok(Err(err)) => {
                    let err = TaskError::from_anyhow(&err);
                    debug!("task failed: {err}");
                    progress.send(TaskEvent::Error(err));
                }
                Err(payload) => {
                    let err = TaskError::from_panic(payload);
                    error!("task panicked: {}", err.message);
                    progress.send(TaskEvent::Error(err));
                }
            }
            progress.send(TaskEvent::Finished);
        });
        if let Some(job_tx) = &self.job_tx {
            if job_tx.send(run).is_err() {
                error!("task pool is shut down");
            }
        }
        TaskHandle {
            rx,
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run_to_end<T>(handle: &mut TaskHandle<T>) -> Vec<TaskEvent<T>> {
        assert!(handle.wait_finished(Duration::from_secs(10)));
        handle.poll()
    }

    #[test]
    fn result_then_finished() {
        let runner = TaskRunner::new(2);
        let mut handle = runner.submit(|_| Ok(21 * 2));
        let events = run_to_end(&mut handle);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TaskEvent::Result(42)));
        assert!(matches!(events[1], TaskEvent::Finished));
        assert!(handle.is_finished());
    }

    #[test]
    fn error_then_finished_without_result() {
        let runner = TaskRunner::new(2);
        let mut handle = runner.submit(|_| -> anyhow::Result<()> {
            std::fs::read("/definitely/not/here").context("reading input")?;
            Ok(())
        });
        let events = run_to_end(&mut handle);
        assert_eq!(events.len(), 2);
        match &events[0] {
            TaskEvent::Error(err) => {
                assert_eq!(err.kind, ErrorKind::Io);
                assert_eq!(err.message, "reading input");
                assert!(err.trace.contains("reading input"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events[1], TaskEvent::Finished));
    }

    #[test]
    fn library_errors_are_data_errors() {
        let runner = TaskRunner::new(1);
        let mut handle = runner.submit(|_| -> anyhow::Result<()> {
            Err(aecg_lib::Error::MissingSheet("Index".into()).into())
        });
        let events = run_to_end(&mut handle);
        assert!(matches!(&events[0], TaskEvent::Error(err) if err.kind == ErrorKind::Data));
    }

    #[test]
    fn panic_becomes_error_event() {
        let runner = TaskRunner::new(2);
        let mut handle = runner.submit(|_| -> anyhow::Result<u8> { panic!("boom") });
        let events = run_to_end(&mut handle);
        assert_eq!(events.len(), 2);
        match &events[0] {
            TaskEvent::Error(err) => {
                assert_eq!(err.kind, ErrorKind::Panic);
                assert_eq!(err.message, "boom");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events[1], TaskEvent::Finished));

        // the worker survives the panic
        let mut handle = runner.submit(|_| Ok("still alive"));
        let events = run_to_end(&mut handle);
        assert!(matches!(events[0], TaskEvent::Result("still alive")));
    }

    #[inline(never)]
    fn explode_in_worker() -> anyhow::Result<u8> {
        panic!("deep failure")
    }

    #[test]
    fn panic_trace_points_at_the_panic_site() {
        let runner = TaskRunner::new(1);
        let mut handle = runner.submit(|_| explode_in_worker());
        let events = run_to_end(&mut handle);
        match &events[0] {
            TaskEvent::Error(err) => {
                assert_eq!(err.kind, ErrorKind::Panic);
                assert!(err.trace.contains("explode_in_worker"), "{}", err.trace);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn progress_precedes_result_and_wakes() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        let runner = TaskRunner::new(2).with_waker(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let mut handle = runner.submit(|progress| {
            for i in 1..=3 {
                progress.report(i, 3);
            }
            Ok("done".to_string())
        });
        let events = run_to_end(&mut handle);
        let progress: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(matches!(&events[3], TaskEvent::Result(s) if s == "done"));
        assert!(matches!(events[4], TaskEvent::Finished));
        // joining the workers guarantees the last wake has run
        drop(runner);
        assert_eq!(wakes.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn wait_times_out_on_long_job() {
        let runner = TaskRunner::new(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let mut handle = runner.submit(move |_| {
            let _ = release_rx.recv();
            Ok(())
        });
        assert!(!handle.wait_finished(Duration::from_millis(50)));
        release_tx.send(()).unwrap();
        assert!(handle.wait_finished(Duration::from_secs(10)));
    }
}
