//! 调度器：在请求数/令牌数双重配额内并发调用模型服务商，并负责重试与失败记录。
//!
//! # Dispatcher
//!
//! A fixed pool of workers shares one [`RequestQueue`] and one
//! [`CapacityTracker`]. Each worker handles one item at a time:
//!
//! 1. estimate the item's token cost (a malformed payload fails immediately)
//! 2. wait until the tracker admits `1` request and `cost` tokens
//! 3. send the request and classify the response
//! 4. on failure, retry while attempts remain (capacity is consumed again for every attempt)
//! 5. on exhaustion, append one record to the [`ErrorSink`]
//!
//! A worker blocked on admission does not dequeue further items.
//!
//! ```rust,no_run
//! use ai_dispatch::{Credentials, Dispatcher, DispatcherConfig, EndpointKind};
//! use serde_json::json;
//!
//! # async fn run() -> ai_dispatch::Result<()> {
//! let dispatcher = Dispatcher::builder(DispatcherConfig::default()).start()?;
//! let handle = dispatcher.submit(
//!     EndpointKind::Chat,
//!     json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]}),
//!     Credentials::bearer("sk-..."),
//! )?;
//! let response = handle.await?;
//! println!("{}", response);
//! dispatcher.drain().await;
//! # Ok(())
//! # }
//! ```

mod handle;
mod policy;
mod worker;

pub use handle::{CancelHandle, DispatchHandle};

use crate::config::DispatcherConfig;
use crate::queue::RequestQueue;
use crate::resilience::{CapacitySnapshot, CapacityTracker};
use crate::sink::{noop_sink, ErrorSink};
use crate::status::{StatusSnapshot, StatusTracker};
use crate::tokens::{encoder_for, CostEstimator, TokenEncoder};
use crate::transport::{HttpTransport, Transport};
use crate::types::{Credentials, EndpointKind, WorkItem};
use crate::{Error, Result};
use handle::Envelope;
use policy::RetryPolicy;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// State shared by every worker.
pub(crate) struct Shared {
    queue: RequestQueue<Envelope>,
    capacity: Arc<CapacityTracker>,
    estimator: CostEstimator,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    status: Arc<StatusTracker>,
    policy: RetryPolicy,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

pub struct DispatcherBuilder {
    config: DispatcherConfig,
    transport: Option<Arc<dyn Transport>>,
    encoder: Option<Arc<dyn TokenEncoder>>,
    sink: Option<Arc<dyn ErrorSink>>,
    capacity: Option<Arc<CapacityTracker>>,
    status: Option<Arc<StatusTracker>>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            transport: None,
            encoder: None,
            sink: None,
            capacity: None,
            status: None,
        }
    }

    /// Replace the default reqwest transport (built from `base_url`).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the encoder named by `token_encoding_name`.
    pub fn encoder(mut self, encoder: Arc<dyn TokenEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Where terminally failed items are recorded. Defaults to discarding them.
    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing tracker (e.g. between dispatchers calling the same account).
    ///
    /// The tracker's own maxima win over the config's.
    pub fn capacity(mut self, capacity: Arc<CapacityTracker>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn status(mut self, status: Arc<StatusTracker>) -> Self {
        self.status = Some(status);
        self
    }

    /// Validate the config, spawn the workers and the replenisher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<Dispatcher> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::from_config(&config)?),
        };
        let encoder = match self.encoder {
            Some(e) => e,
            None => encoder_for(&config.token_encoding_name)?,
        };
        let capacity = self.capacity.unwrap_or_else(|| {
            Arc::new(CapacityTracker::new(
                config.max_requests_per_interval,
                config.max_tokens_per_interval,
            ))
        });

        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            queue: RequestQueue::new(config.queue_capacity),
            capacity,
            estimator: CostEstimator::new(encoder),
            transport,
            sink: self.sink.unwrap_or_else(noop_sink),
            status: self.status.unwrap_or_default(),
            policy: RetryPolicy::new(config.max_attempts, config.rate_limit_backoff()),
            poll_interval: config.poll_interval(),
            shutdown: shutdown.clone(),
        });

        let replenisher = shared
            .capacity
            .spawn_replenisher(config.interval(), shutdown.clone());
        let workers = (0..config.workers)
            .map(|id| tokio::spawn(worker::run_worker(id, Arc::clone(&shared))))
            .collect();

        info!(
            workers = config.workers,
            max_requests = shared.capacity.max_requests(),
            max_tokens = shared.capacity.max_tokens(),
            interval_secs = config.interval_seconds,
            max_attempts = config.max_attempts,
            "dispatcher started"
        );

        Ok(Dispatcher {
            shared,
            config,
            workers: Mutex::new(workers),
            replenisher: Mutex::new(Some(replenisher)),
        })
    }
}

/// Handle to a running worker pool. Dropping it stops the workers.
pub struct Dispatcher {
    shared: Arc<Shared>,
    config: DispatcherConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
    replenisher: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn builder(config: DispatcherConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Start with the default transport, encoder and a discarding error sink.
    pub fn start(config: DispatcherConfig) -> Result<Self> {
        DispatcherBuilder::new(config).start()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Queue a request for the endpoint's default path.
    pub fn submit(
        &self,
        endpoint: EndpointKind,
        payload: Value,
        credentials: Credentials,
    ) -> Result<DispatchHandle> {
        self.submit_item(WorkItem::new(endpoint, payload, credentials))
    }

    pub fn submit_item(&self, item: WorkItem) -> Result<DispatchHandle> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let (envelope, handle) = Envelope::new(item);
        self.shared.queue.enqueue(envelope)?;
        Ok(handle)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.status.snapshot()
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        self.shared.capacity.snapshot()
    }

    pub fn capacity_tracker(&self) -> &Arc<CapacityTracker> {
        &self.shared.capacity
    }

    pub fn status_tracker(&self) -> &Arc<StatusTracker> {
        &self.shared.status
    }

    /// Items queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stop accepting work, let the workers finish everything already queued,
    /// then stop the replenisher.
    pub async fn drain(&self) {
        self.shared.queue.close();
        for handle in self.take_workers() {
            let _ = handle.await;
        }
        self.shared.shutdown.cancel();
        self.join_replenisher().await;
        debug!("dispatcher drained");
    }

    /// Stop now. In-flight attempts are abandoned; they and every queued item
    /// resolve with [`Error::Shutdown`] and nothing is written to the error sink.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.queue.close();
        for handle in self.take_workers() {
            let _ = handle.await;
        }
        self.join_replenisher().await;

        let pending = self.shared.queue.drain_pending();
        let abandoned = pending.len();
        for envelope in pending {
            envelope.resolve(Err(Error::Shutdown));
        }
        info!(abandoned, "dispatcher shut down");
    }

    fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn join_replenisher(&self) {
        let handle = self
            .replenisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.queue.close();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
