//! Render-Thread Marshal
//!
//! Exactly one thread owns the [`RenderDevice`]. Everything else talks to it
//! by sending boxed closures through a `flume` channel; the worker drains them
//! strictly in submission order and runs each one against `&mut D`.
//!
//! ```text
//!  producer threads                       render thread
//!  ────────────────                       ─────────────
//!  submit(job) ──┐                        loop {
//!  submit(job) ──┼──► flume::Sender ──►     recv_timeout(poll)
//!  call(f) ──────┘         │                job(&mut device)
//!      ▲                   │              }
//!      └──── bounded(1) ◄──┘  (call only)
//! ```
//!
//! A panicking job is caught and logged; the worker keeps serving.
//! The device is dropped on the render thread when the worker exits.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::device::RenderDevice;
use crate::errors::{Error, Result};
use crate::settings::MarshalSettings;

/// A unit of work executed on the render thread.
pub type Job<D> = Box<dyn FnOnce(&mut D) + Send>;

enum Message<D> {
    Run(Job<D>),
    Shutdown,
}

/// Cloneable handle to the render thread.
pub struct RenderThread<D: RenderDevice> {
    sender: Sender<Message<D>>,
    outstanding: Arc<AtomicUsize>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    poll_interval: Duration,
}

impl<D: RenderDevice> Clone for RenderThread<D> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            outstanding: Arc::clone(&self.outstanding),
            worker: Arc::clone(&self.worker),
            poll_interval: self.poll_interval,
        }
    }
}

impl<D: RenderDevice> RenderThread<D> {
    /// Moves `device` onto a freshly spawned, named render thread.
    pub fn spawn(device: D, settings: &MarshalSettings) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<Message<D>>();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let poll_interval = settings.poll_interval();

        let counter = Arc::clone(&outstanding);
        let worker = std::thread::Builder::new()
            .name(settings.thread_name.clone())
            .spawn(move || {
                let mut device = device;
                log::debug!("Render thread started");
                loop {
                    match receiver.recv_timeout(poll_interval) {
                        Ok(Message::Run(job)) => {
                            if catch_unwind(AssertUnwindSafe(|| job(&mut device))).is_err() {
                                log::error!("Render-thread job panicked; continuing");
                            }
                            counter.fetch_sub(1, Ordering::AcqRel);
                        }
                        Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
                log::debug!("Render thread stopped");
            })?;

        Ok(Self {
            sender,
            outstanding,
            worker: Arc::new(Mutex::new(Some(worker))),
            poll_interval,
        })
    }

    /// Enqueues a job. Never blocks.
    pub fn submit(&self, job: impl FnOnce(&mut D) + Send + 'static) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Message::Run(Box::new(job))).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            log::error!("Render thread is gone; job dropped");
        }
    }

    /// Runs `f` on the render thread and blocks until it returns.
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        self.submit(move |device| {
            let _ = tx.send(f(device));
        });
        rx.recv().map_err(|_| Error::RenderThreadGone)
    }

    /// Number of submitted jobs that have not finished yet.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Blocks until every job submitted so far has run.
    pub fn wait_idle(&self) {
        while !self.is_idle() {
            if !self.is_running() {
                log::warn!(
                    "Render thread stopped with {} job(s) outstanding",
                    self.outstanding()
                );
                return;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Drains the queue, stops the worker and drops the device on it.
    ///
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if worker.join().is_err() {
            log::error!("Render thread panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn spawn() -> RenderThread<HeadlessDevice> {
        RenderThread::spawn(HeadlessDevice::new(), &MarshalSettings::default()).unwrap()
    }

    #[test]
    fn test_jobs_run_in_order_on_named_thread() {
        let thread = spawn();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let log = Arc::clone(&log);
            thread.submit(move |_| log.lock().push(i));
        }
        let name = thread
            .call(|_| std::thread::current().name().map(str::to_owned))
            .unwrap();

        assert_eq!(*log.lock(), (0..16).collect::<Vec<_>>());
        assert_eq!(name.as_deref(), Some("render-thread"));
        thread.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_thread() {
        let thread = spawn();
        thread.submit(|_| panic!("boom"));
        assert_eq!(thread.call(|_| 7).unwrap(), 7);
        thread.wait_idle();
        assert!(thread.is_idle());
        thread.shutdown();
    }

    #[test]
    fn test_call_after_shutdown_fails() {
        let thread = spawn();
        thread.shutdown();
        thread.shutdown();
        assert!(matches!(thread.call(|_| ()), Err(Error::RenderThreadGone)));
        thread.wait_idle();
    }
}
