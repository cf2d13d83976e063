//! Engine handle
//!
//! [`Engine`] is the thread-safe front of one engine thread. Clones share the
//! thread; it stops on [`Engine::shutdown`] or when the last clone drops.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use vela_dispatch::EngineQueue;
use vela_gpu::GpuDriver;
use vela_handle::OwnerId;
use vela_value::FunctionInvoker;

use crate::runtime::{EngineCore, QueueInvoker};
use crate::session::SessionShared;
use crate::{BridgeError, EngineConfig, NativeEngine, NativeError, Session, UpcallSink, ViewConfig};

/// Counters gathered on the engine thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub sessions: usize,
    pub proxies: usize,
    pub pending_finalizations: u64,
    pub callbacks: usize,
    /// Torn-down sessions not yet forgotten
    pub closed_owners: usize,
    pub render_targets: usize,
    pub textures: usize,
    pub geometry: usize,
    pub batches_replayed: u64,
    pub batches_dropped: u64,
    pub commands_replayed: u64,
    pub call_depth_limit: usize,
}

struct EngineShared {
    queue: EngineQueue<EngineCore>,
    config: EngineConfig,
    next_owner: AtomicU64,
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}

/// Handle to a running engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineShared>,
}

impl Engine {
    /// Spawn the engine thread and build the native engine on it.
    ///
    /// `native_factory` runs on the engine thread and receives the sink the
    /// engine reports through. `driver` is moved there as well.
    pub fn start<N, F, D>(config: EngineConfig, native_factory: F, driver: D) -> Result<Self, BridgeError>
    where
        N: NativeEngine + 'static,
        F: FnOnce(UpcallSink) -> Result<N, NativeError> + Send + 'static,
        D: GpuDriver + Send + 'static,
    {
        config.validate()?;

        let invoker = Arc::new(QueueInvoker::default());
        let core_invoker: Arc<dyn FunctionInvoker> = invoker.clone();
        let core_config = config.clone();
        let queue = EngineQueue::start(&config.thread_name, move || -> Result<Rc<EngineCore>, BridgeError> {
            let sink = UpcallSink::new();
            let native = native_factory(sink.clone())?;
            let core = Rc::new(EngineCore::new(
                Box::new(native),
                Box::new(driver),
                core_invoker,
                &core_config,
            ));
            sink.attach(&core);
            Ok(core)
        })?;
        invoker.attach(queue.clone());

        Ok(Self {
            inner: Arc::new(EngineShared {
                queue,
                config,
                next_owner: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        !self.inner.queue.is_closed()
    }

    /// Whether the caller is on this engine's thread.
    pub fn is_engine_thread(&self) -> bool {
        self.inner.queue.is_engine_thread()
    }

    pub(crate) fn execute<F, R>(&self, job: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&EngineCore) -> Result<R, BridgeError> + Send + 'static,
        R: Send + 'static,
    {
        self.inner.queue.execute(move |core| job(core.as_ref()))?
    }

    pub(crate) fn post<F>(&self, job: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&EngineCore) + Send + 'static,
    {
        Ok(self.inner.queue.post(move |core| job(core.as_ref()))?)
    }

    /// Create a view with `config`.
    pub fn create_session(&self, config: ViewConfig) -> Result<Session, BridgeError> {
        config.validate()?;
        let owner = OwnerId(self.inner.next_owner.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(SessionShared::new(config.width, config.height));

        let core_shared = shared.clone();
        let view = self.execute(move |core| core.create_session(owner, &config, core_shared))?;
        Ok(Session::new(self.clone(), owner, view, shared))
    }

    /// Create a view with the engine's default view configuration.
    pub fn create_default_session(&self) -> Result<Session, BridgeError> {
        self.create_session(self.inner.config.view.clone())
    }

    /// Run native timers and pending jobs.
    pub fn update(&self) -> Result<(), BridgeError> {
        self.execute(|core| core.update())
    }

    /// Repaint dirty views. Paint handlers run before this returns.
    pub fn render(&self) -> Result<(), BridgeError> {
        self.execute(|core| core.render())
    }

    /// Perform releases queued by dropped proxies; returns how many ran.
    pub fn flush(&self) -> Result<usize, BridgeError> {
        self.execute(|core| Ok(core.flush()))
    }

    pub fn stats(&self) -> Result<EngineStats, BridgeError> {
        self.execute(|core| Ok(core.stats()))
    }

    /// Stop the engine thread after the jobs already queued. Every session
    /// is destroyed. Idempotent.
    pub fn shutdown(&self) {
        self.inner.queue.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("thread", &self.inner.queue.name())
            .field("running", &self.is_running())
            .finish()
    }
}
