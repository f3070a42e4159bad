//! Shared utilities for integration tests.
//!
//! Provides a schema with a small test class, a running [`Processor`] over a
//! [`MemoryBackend`], and builders for the requests the tests send.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::sync::Arc;

use rstest::fixture;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;
use wsman_gateway::{
    MemoryBackend,
    OutboundResponse,
    Processor,
    ProcessorConfig,
    ProcessorHandle,
    Request,
    cim::{CimType, CimValue, Instance},
    enumeration::EnumerationContexts,
    epr::{EndpointReference, Selector, class_resource_uri},
    request::{EnumerateParams, Operation},
    schema::{ClassDecl, PropertyDecl, Schema},
    subscription::SubscriptionInfoTable,
};

pub const ADDRESS: &str = "http://localhost:5985/wsman";
pub const ITEM_CLASS: &str = "CIM_TestItem";
pub const NAMESPACE: &str = "root/cimv2";
pub const INTEROP: &str = "root/PG_InterOp";

/// Indication classes plus a keyed test class.
#[fixture]
pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::indication_classes().with_class(
            ClassDecl::new(ITEM_CLASS)
                .property(PropertyDecl::new("Id", CimType::String).key())
                .property(PropertyDecl::new("Caption", CimType::String)),
        ),
    )
}

/// Processor defaults with the start-up warm-up disabled.
#[fixture]
pub fn config() -> ProcessorConfig { ProcessorConfig::default().warm_up_subscriptions(false) }

/// A running processor and the shared state tests inspect.
pub struct Gateway {
    pub handle: ProcessorHandle,
    pub responses: mpsc::UnboundedReceiver<OutboundResponse>,
    pub backend: Arc<MemoryBackend>,
    pub contexts: Arc<EnumerationContexts>,
    pub info: Arc<SubscriptionInfoTable>,
    task: JoinHandle<()>,
    sequence: u32,
}

impl Gateway {
    /// Spawn a processor over `backend`.
    pub fn start(config: ProcessorConfig, schema: Arc<Schema>, backend: Arc<MemoryBackend>) -> Self {
        let (processor, handle, responses) = Processor::builder(backend.clone())
            .schema(schema)
            .config(config)
            .build();
        let contexts = processor.contexts();
        let info = processor.subscription_info();
        let task = tokio::spawn(processor.run().in_current_span());
        Self {
            handle,
            responses,
            backend,
            contexts,
            info,
            task,
            sequence: 0,
        }
    }

    /// Submit `request` and wait for the response relating to it.
    pub async fn call(&mut self, request: Request) -> OutboundResponse {
        let id = request.message_id.clone();
        self.handle.submit(request).expect("processor accepts requests");
        let response = self.responses.recv().await.expect("processor produced a response");
        assert_eq!(response.relates_to, id, "response relates to the request just sent");
        response
    }

    /// Wait until everything queued before this call has been processed.
    ///
    /// Yielding first lets already spawned backend replies reach the
    /// processor, which handles replies ahead of requests. Once an Identify
    /// sent afterwards is answered, those replies have been applied.
    pub async fn settle(&mut self) {
        tokio::task::yield_now().await;
        self.sequence += 1;
        let id = format!("uuid:settle-{}", self.sequence);
        let request = Request::new(
            id,
            "alice",
            EndpointReference::new(ADDRESS, class_resource_uri(ITEM_CLASS)),
            Operation::Identify,
        );
        self.call(request).await;
    }

    /// Shut the processor down and wait for it to finish.
    pub async fn stop(self) {
        self.handle.shutdown();
        self.task.await.expect("processor task completed");
    }
}

/// Start a gateway over a fresh backend with default test settings.
pub fn gateway() -> Gateway {
    let schema = schema();
    let backend = Arc::new(MemoryBackend::new(schema.clone()));
    Gateway::start(config(), schema, backend)
}

/// Reference to the test class, optionally keyed by `Id`.
pub fn item_epr(id: Option<&str>) -> EndpointReference {
    let epr = EndpointReference::new(ADDRESS, class_resource_uri(ITEM_CLASS));
    match id {
        Some(id) => epr.with_selector(Selector::text("Id", id)),
        None => epr,
    }
}

/// Store `count` test items named `item-0` onwards.
pub fn seed_items(backend: &MemoryBackend, count: usize) {
    for n in 0..count {
        let instance = Instance::new(ITEM_CLASS)
            .with_property("Id", CimValue::String(format!("item-{n}")))
            .with_property("Caption", CimValue::String(format!("test item {n}")));
        backend.seed(NAMESPACE, instance).expect("seeded item");
    }
}

/// Request from `alice` against `epr`.
pub fn request(id: &str, epr: EndpointReference, operation: Operation) -> Request {
    Request::new(id, "alice", epr, operation)
}

/// Enumerate of the test class.
pub fn enumerate(id: &str, params: EnumerateParams) -> Request {
    request(id, item_epr(None), Operation::Enumerate(params))
}

/// Pull from `context` as `identity`.
pub fn pull(id: &str, identity: &str, context: &str, max_elements: Option<u32>) -> Request {
    Request::new(
        id,
        identity,
        item_epr(None),
        Operation::Pull {
            context: context.to_owned(),
            max_elements,
        },
    )
}
