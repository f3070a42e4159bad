//! The protocol processor.
//!
//! [`Processor`] is a single actor that consumes decoded protocol requests
//! and backend replies. Requests that need the backend are submitted with a
//! fresh [`CorrelationId`]; the continuation to resume is parked in a
//! [`CorrelationArena`] until the tagged reply arrives. Pull and Release are
//! served from the enumeration context table, Subscribe and Unsubscribe are
//! driven through the subscription saga controller, and Identify is
//! answered locally.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wsman_gateway::{
//!     backend::MemoryBackend,
//!     processor::Processor,
//!     schema::Schema,
//! };
//!
//! # async fn demo() {
//! let schema = Arc::new(Schema::indication_classes());
//! let backend = Arc::new(MemoryBackend::new(Arc::clone(&schema)));
//! let (processor, handle, mut responses) = Processor::builder(backend).schema(schema).build();
//! tokio::spawn(processor.run());
//! // handle.submit(request)?; responses.recv().await;
//! handle.shutdown();
//! # }
//! ```

mod actor;

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    backend::{Backend, BackendResponse},
    config::ProcessorConfig,
    correlation::{CorrelationArena, CorrelationId},
    encoder::{ResponseEncoder, SoapEncoder},
    enumeration::EnumerationContexts,
    mapper::RequestMapper,
    request::{MessageId, Request},
    response::OutboundResponse,
    schema::Schema,
    subscription::{CleanupKind, SagaStep, SubscriptionInfoTable, SubscriptionSagas},
};

/// Protocol version reported by Identify.
pub const PROTOCOL_VERSION: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
/// Vendor reported by Identify.
pub const PRODUCT_VENDOR: &str = "wsman-gateway";

/// Processor failures that are not client faults.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    /// A backend reply carried an id with no parked continuation.
    #[error("no pending request for correlation id {0}")]
    UnknownCorrelation(CorrelationId),
    /// The processor has stopped and no longer accepts input.
    #[error("processor is closed")]
    Closed,
}

/// Continuation resumed when a backend reply arrives.
#[derive(Debug)]
enum Pending {
    /// Transfer or Invoke request answered straight from the reply.
    Client(Request),
    /// Enumerate whose reply opens an enumeration context.
    Enumerate { request: Request, lifetime: Duration },
    SagaStep { saga: MessageId, step: SagaStep },
    Cleanup {
        saga: MessageId,
        object: &'static str,
        kind: CleanupKind,
    },
    /// Start-up scan of existing subscriptions.
    InfoTableWarmup,
}

impl Pending {
    /// Client message a fault should relate to if resuming fails.
    fn relates_to(&self) -> Option<MessageId> {
        match self {
            Self::Client(request) | Self::Enumerate { request, .. } => Some(request.message_id.clone()),
            Self::SagaStep { saga, .. } => Some(saga.clone()),
            Self::Cleanup { .. } | Self::InfoTableWarmup => None,
        }
    }
}

/// Cloneable producer side of a running [`Processor`].
#[derive(Clone, Debug)]
pub struct ProcessorHandle {
    requests: mpsc::UnboundedSender<Request>,
    replies: mpsc::UnboundedSender<BackendResponse>,
    shutdown: CancellationToken,
}

impl ProcessorHandle {
    /// Queue a decoded request.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Closed`] if the processor has stopped.
    pub fn submit(&self, request: Request) -> Result<(), ProcessorError> {
        self.requests.send(request).map_err(|_| ProcessorError::Closed)
    }

    /// Deliver a backend reply received out of band.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Closed`] if the processor has stopped.
    pub fn deliver(&self, reply: BackendResponse) -> Result<(), ProcessorError> {
        self.replies.send(reply).map_err(|_| ProcessorError::Closed)
    }

    /// Ask the processor to stop after the message it is handling.
    pub fn shutdown(&self) { self.shutdown.cancel(); }
}

/// Builder for [`Processor`].
pub struct ProcessorBuilder {
    backend: Arc<dyn Backend>,
    config: ProcessorConfig,
    schema: Option<Arc<Schema>>,
    encoder: Option<Arc<dyn ResponseEncoder>>,
}

impl ProcessorBuilder {
    #[must_use]
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Class declarations used for selector and instance validation.
    /// Defaults to [`Schema::indication_classes`].
    #[must_use]
    pub fn schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Wire encoder. Defaults to [`SoapEncoder`].
    #[must_use]
    pub fn encoder(mut self, encoder: Arc<dyn ResponseEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Create the processor, its handle and the stream of encoded responses.
    #[must_use]
    pub fn build(
        self,
    ) -> (
        Processor,
        ProcessorHandle,
        mpsc::UnboundedReceiver<OutboundResponse>,
    ) {
        let schema = self
            .schema
            .unwrap_or_else(|| Arc::new(Schema::indication_classes()));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let info = Arc::new(SubscriptionInfoTable::new());

        let processor = Processor {
            mapper: RequestMapper::new(schema, self.config.default_namespace.clone()),
            config: self.config,
            backend: self.backend,
            encoder: self.encoder.unwrap_or_else(|| Arc::new(SoapEncoder)),
            contexts: Arc::new(EnumerationContexts::new()),
            sagas: SubscriptionSagas::new(Arc::clone(&info)),
            info,
            pending: CorrelationArena::new(),
            requests: request_rx,
            replies: reply_rx,
            reply_tx: reply_tx.clone(),
            outbound: outbound_tx,
            shutdown: shutdown.clone(),
            tracker: TaskTracker::new(),
        };
        let handle = ProcessorHandle {
            requests: request_tx,
            replies: reply_tx,
            shutdown,
        };
        (processor, handle, outbound_rx)
    }
}

/// Protocol processor actor. Consumed by [`Processor::run`].
pub struct Processor {
    config: ProcessorConfig,
    mapper: RequestMapper,
    backend: Arc<dyn Backend>,
    encoder: Arc<dyn ResponseEncoder>,
    contexts: Arc<EnumerationContexts>,
    sagas: SubscriptionSagas,
    info: Arc<SubscriptionInfoTable>,
    pending: CorrelationArena<Pending>,
    requests: mpsc::UnboundedReceiver<Request>,
    replies: mpsc::UnboundedReceiver<BackendResponse>,
    reply_tx: mpsc::UnboundedSender<BackendResponse>,
    outbound: mpsc::UnboundedSender<OutboundResponse>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Processor {
    /// Start building a processor over `backend`.
    #[must_use]
    pub fn builder(backend: Arc<dyn Backend>) -> ProcessorBuilder {
        ProcessorBuilder {
            backend,
            config: ProcessorConfig::default(),
            schema: None,
            encoder: None,
        }
    }

    /// Shared enumeration context table.
    #[must_use]
    pub fn contexts(&self) -> Arc<EnumerationContexts> { Arc::clone(&self.contexts) }

    /// Shared table of subscriptions reusing an existing filter.
    #[must_use]
    pub fn subscription_info(&self) -> Arc<SubscriptionInfoTable> { Arc::clone(&self.info) }
}
