//! Single worker thread that owns a piece of state and runs submitted jobs
//! against it in FIFO order.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};

use crate::error::{MonkeyError, Result};

type Job<S> = Box<dyn FnOnce(&mut S) -> Result<()> + Send>;

enum Task<S> {
    Run(Job<S>),
    Shutdown,
}

/// Cheap handle for submitting jobs from any thread.
pub struct Dispatcher<S> {
    sender: Sender<Task<S>>,
    worker: ThreadId,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Dispatcher {
            sender: self.sender.clone(),
            worker: self.worker,
        }
    }
}

impl<S: 'static> Dispatcher<S> {
    /// Queue `job`. Errors it returns are logged by the worker.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()> + Send + 'static,
    {
        self.sender
            .send(Task::Run(Box::new(job)))
            .map_err(|_| MonkeyError::QueueClosed)
    }

    /// Run `job` on the worker and wait for its result. Fails instead of
    /// deadlocking when called from the worker itself.
    pub fn query<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(MonkeyError::Reentrant);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.submit(move |state| {
            let _ = reply_tx.send(job(state));
            Ok(())
        })?;
        reply_rx.recv().map_err(|_| MonkeyError::QueueClosed)
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker
    }
}

/// The worker thread plus a [`Dispatcher`] feeding it.
pub struct DispatchQueue<S> {
    dispatcher: Dispatcher<S>,
    handle: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> DispatchQueue<S> {
    pub fn start(name: &str, state: S) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_worker(receiver, state))?;

        Ok(DispatchQueue {
            dispatcher: Dispatcher {
                sender,
                worker: handle.thread().id(),
            },
            handle: Some(handle),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Enqueue the shutdown sentinel and wait for the worker. Jobs queued
    /// before the sentinel still run. Returns the state once.
    pub fn shutdown(&mut self) -> Option<S> {
        let handle = self.handle.take()?;
        let _ = self.dispatcher.sender.send(Task::Shutdown);
        match handle.join() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::error!("Dispatch worker panicked");
                None
            }
        }
    }
}

fn run_worker<S>(receiver: Receiver<Task<S>>, mut state: S) -> S {
    tracing::debug!("Dispatch worker started");
    for task in receiver.iter() {
        let job = match task {
            Task::Run(job) => job,
            Task::Shutdown => break,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Queued job failed"),
            Err(_) => tracing::error!("Queued job panicked"),
        }
    }
    tracing::debug!("Dispatch worker stopped");
    state
}
