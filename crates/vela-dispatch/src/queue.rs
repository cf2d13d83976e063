//! Engine thread
//!
//! Every crossing into the native engine happens on one dedicated OS thread.
//! The thread owns the engine state; other threads reach it only by queueing
//! jobs, which run in FIFO order.
//!
//! ```text
//! host thread ──post/call──▶ channel ──▶ engine thread
//!                                         before_job()
//!                                         job(&state)
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use smol::channel::{self, Receiver, Sender};

use crate::DispatchError;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// State of the engine owned by this thread, if any
    static CURRENT: RefCell<Option<(u64, Rc<dyn Any>)>> = const { RefCell::new(None) };
}

/// Hooks the engine thread runs around queued jobs.
pub trait EngineState: 'static {
    /// Runs before every queued job.
    fn before_job(&self) {}

    /// Runs once after the last job, before the state is dropped.
    fn on_shutdown(&self) {}
}

type Job<S> = Box<dyn FnOnce(&Rc<S>) + Send>;

enum Message<S> {
    Run(Job<S>),
    Shutdown,
}

struct QueueInner<S> {
    id: u64,
    name: String,
    sender: Sender<Message<S>>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an engine thread owning state `S`
pub struct EngineQueue<S> {
    inner: Arc<QueueInner<S>>,
}

impl<S> Clone for EngineQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: EngineState> EngineQueue<S> {
    /// Spawn the engine thread and build its state there.
    ///
    /// `init` runs on the new thread; its error is returned to the caller and
    /// the thread exits.
    pub fn start<F, E>(name: &str, init: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<Rc<S>, E> + Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::unbounded::<Message<S>>();
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), E>>(1);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let state = match init() {
                    Ok(state) => state,
                    Err(err) => {
                        let _ = ready_tx.send_blocking(Err(err));
                        return;
                    }
                };
                CURRENT.with(|current| {
                    *current.borrow_mut() = Some((id, state.clone() as Rc<dyn Any>));
                });
                let _ = ready_tx.send_blocking(Ok(()));
                drop(ready_tx);

                run(&state, &receiver);

                state.on_shutdown();
                CURRENT.with(|current| current.borrow_mut().take());
                tracing::debug!("Engine thread {} stopped", id);
            })
            .map_err(|err| E::from(DispatchError::Spawn(err.to_string())))?;

        match ready_rx.recv_blocking() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(E::from(DispatchError::QueueClosed));
            }
        }

        tracing::info!("Engine thread '{}' started", name);
        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                name: name.to_string(),
                sender,
                thread_id: thread.thread().id(),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }
}

fn run<S: EngineState>(state: &Rc<S>, receiver: &Receiver<Message<S>>) {
    while let Ok(message) = receiver.recv_blocking() {
        match message {
            Message::Run(job) => {
                state.before_job();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(state))) {
                    tracing::error!("Engine job panicked: {}", panic_message(payload.as_ref()));
                }
            }
            Message::Shutdown => break,
        }
    }
    receiver.close();

    // Jobs sent after the shutdown marker never run; dropping them wakes
    // any caller blocked on a reply.
    let mut dropped = 0;
    while receiver.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!("Dropped {} jobs queued after shutdown", dropped);
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S: 'static> EngineQueue<S> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this queue's engine thread.
    pub fn is_engine_thread(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Engine state, when called on the engine thread.
    pub fn current(&self) -> Option<Rc<S>> {
        if !self.is_engine_thread() {
            return None;
        }
        CURRENT.with(|current| {
            let current = current.borrow();
            let (id, state) = current.as_ref()?;
            if *id != self.inner.id {
                return None;
            }
            state.clone().downcast::<S>().ok()
        })
    }

    /// Queue `job` without waiting for it.
    pub fn post<F>(&self, job: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&Rc<S>) + Send + 'static,
    {
        self.inner
            .sender
            .try_send(Message::Run(Box::new(job)))
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Queue `job` and block until it has run.
    ///
    /// Fails with [`DispatchError::WouldDeadlock`] on the engine thread and
    /// with [`DispatchError::JobPanicked`] if `job` panics.
    pub fn call<F, R>(&self, job: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&Rc<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_engine_thread() {
            tracing::warn!("Blocking call issued from engine thread '{}'", self.inner.name);
            return Err(DispatchError::WouldDeadlock);
        }

        let (reply_tx, reply_rx) = channel::bounded(1);
        self.post(move |state| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(state))).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!("Engine call panicked: {}", message);
                DispatchError::JobPanicked(message)
            });
            let _ = reply_tx.send_blocking(result);
        })?;
        reply_rx.recv_blocking().map_err(|_| DispatchError::QueueClosed)?
    }

    /// Run `job` inline on the engine thread, or queue it and wait.
    pub fn execute<F, R>(&self, job: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&Rc<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        match self.current() {
            Some(state) => Ok(job(&state)),
            None => self.call(job),
        }
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.sender.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.is_closed()
    }

    /// Stop the engine thread after the jobs already queued.
    ///
    /// Joins the thread unless called from it. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.sender.try_send(Message::Shutdown).is_ok() {
            tracing::info!("Engine thread '{}' shutting down", self.inner.name);
        }
        if self.is_engine_thread() {
            return;
        }
        let thread = self
            .inner
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Engine thread '{}' panicked", self.inner.name);
            }
        }
    }
}

impl<S> std::fmt::Debug for EngineQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.sender.len())
            .finish()
    }
}
