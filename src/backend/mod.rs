//! Interface to the backend object service.
//!
//! The processor never waits on a backend call. It hands a
//! [`BackendRequest`] to [`Backend::submit`] together with a [`ReplySender`]
//! and resumes when exactly one [`BackendResponse`] carrying the same
//! [`CorrelationId`] arrives on the processor's reply inbox. Replies may
//! arrive in any order.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::memory::MemoryBackend;
use crate::{
    cim::{CimValue, Instance, ObjectPath, Property},
    correlation::CorrelationId,
    fault::CimStatus,
};

/// Association traversal parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AssociationQuery {
    pub object: ObjectPath,
    pub association_class: Option<String>,
    pub result_class: Option<String>,
    pub role: Option<String>,
    pub result_role: Option<String>,
}

/// One backend operation.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendOp {
    GetInstance { path: ObjectPath },
    /// Replace the instance at `instance.path`.
    ModifyInstance { instance: Instance },
    CreateInstance { namespace: String, instance: Instance },
    DeleteInstance { path: ObjectPath },
    EnumerateInstances { namespace: String, class_name: String },
    EnumerateInstanceNames { namespace: String, class_name: String },
    ExecQuery {
        namespace: String,
        language: String,
        query: String,
    },
    Associators(AssociationQuery),
    AssociatorNames(AssociationQuery),
    References(AssociationQuery),
    ReferenceNames(AssociationQuery),
    InvokeMethod {
        path: ObjectPath,
        method: String,
        params: Vec<Property>,
    },
}

impl BackendOp {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetInstance { .. } => "get_instance",
            Self::ModifyInstance { .. } => "modify_instance",
            Self::CreateInstance { .. } => "create_instance",
            Self::DeleteInstance { .. } => "delete_instance",
            Self::EnumerateInstances { .. } => "enumerate_instances",
            Self::EnumerateInstanceNames { .. } => "enumerate_instance_names",
            Self::ExecQuery { .. } => "exec_query",
            Self::Associators(_) => "associators",
            Self::AssociatorNames(_) => "associator_names",
            Self::References(_) => "references",
            Self::ReferenceNames(_) => "reference_names",
            Self::InvokeMethod { .. } => "invoke_method",
        }
    }

    /// Class the operation targets, if it names one.
    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::GetInstance { path }
            | Self::DeleteInstance { path }
            | Self::InvokeMethod { path, .. } => Some(&path.class_name),
            Self::ModifyInstance { instance } | Self::CreateInstance { instance, .. } => {
                Some(&instance.class_name)
            }
            Self::EnumerateInstances { class_name, .. }
            | Self::EnumerateInstanceNames { class_name, .. } => Some(class_name),
            Self::Associators(q)
            | Self::AssociatorNames(q)
            | Self::References(q)
            | Self::ReferenceNames(q) => Some(&q.object.class_name),
            Self::ExecQuery { .. } => None,
        }
    }
}

/// A backend operation tagged for correlation.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendRequest {
    pub correlation: CorrelationId,
    pub op: BackendOp,
}

/// Successful backend result.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendPayload {
    Instance(Instance),
    Created(ObjectPath),
    Empty,
    Instances(Vec<Instance>),
    Names(Vec<ObjectPath>),
    MethodResult {
        return_value: CimValue,
        out_params: Vec<Property>,
    },
}

/// Failure status reported by the backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{status:?}: {description}")]
pub struct BackendError {
    pub status: CimStatus,
    pub description: String,
}

impl BackendError {
    #[must_use]
    pub fn new(status: CimStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }
}

/// Reply to one [`BackendRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct BackendResponse {
    pub correlation: CorrelationId,
    pub result: Result<BackendPayload, BackendError>,
}

/// Raised when a backend refuses a submission outright.
#[derive(Debug, Error)]
#[error("backend unavailable: {0}")]
pub struct BackendUnavailable(pub String);

/// Channel on which a backend delivers its replies.
#[derive(Clone, Debug)]
pub struct ReplySender(mpsc::UnboundedSender<BackendResponse>);

impl ReplySender {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<BackendResponse>) -> Self { Self(tx) }

    /// Deliver a reply. Returns `false` if the processor has gone away.
    pub fn send(&self, response: BackendResponse) -> bool { self.0.send(response).is_ok() }
}

/// Asynchronous backend object service.
///
/// `submit` only enqueues; it must not wait for the operation to complete.
/// Every accepted request must eventually produce exactly one reply on
/// `replies`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn submit(
        &self,
        request: BackendRequest,
        replies: ReplySender,
    ) -> Result<(), BackendUnavailable>;
}

/// Backend that forwards submissions to a channel for an external service
/// to execute.
#[derive(Clone, Debug)]
pub struct ChannelBackend {
    tx: mpsc::UnboundedSender<(BackendRequest, ReplySender)>,
}

impl ChannelBackend {
    /// Create the backend and the receiver the external service reads.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(BackendRequest, ReplySender)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Backend for ChannelBackend {
    async fn submit(
        &self,
        request: BackendRequest,
        replies: ReplySender,
    ) -> Result<(), BackendUnavailable> {
        self.tx
            .send((request, replies))
            .map_err(|_| BackendUnavailable("backend service has shut down".into()))
    }
}
