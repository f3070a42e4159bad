//! Decoded protocol requests as handed to the processor.
//!
//! The wire decoder owns syntax: by the time a [`Request`] exists its
//! action, message id, target reference and body have been parsed. What
//! remains for the processor is semantic validation, which happens in the
//! mapper and the subscription planner.

use derive_more::{Display, From, Into};

use crate::{epr::EndpointReference, value::WsmInstance};

/// Unique id of a client message, usually `uuid:`-prefixed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }

    /// The id without its `uuid:` scheme prefix.
    #[must_use]
    pub fn identifier(&self) -> &str { self.0.strip_prefix("uuid:").unwrap_or(&self.0) }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

/// A decoded client request. Immutable once submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub message_id: MessageId,
    /// Authenticated principal the request runs as.
    pub identity: String,
    pub epr: EndpointReference,
    /// Negotiated maximum response size in bytes, if the client sent one.
    pub max_envelope_size: Option<u32>,
    pub locale: Option<String>,
    pub operation: Operation,
}

impl Request {
    /// Request with no envelope size or locale negotiated.
    #[must_use]
    pub fn new(
        message_id: impl Into<MessageId>,
        identity: impl Into<String>,
        epr: EndpointReference,
        operation: Operation,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            identity: identity.into(),
            epr,
            max_envelope_size: None,
            locale: None,
            operation,
        }
    }

    #[must_use]
    pub fn with_max_envelope_size(mut self, size: u32) -> Self {
        self.max_envelope_size = Some(size);
        self
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind { self.operation.kind() }
}

/// Operation-specific request body.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Identify,
    Get,
    Put(WsmInstance),
    Create(WsmInstance),
    Delete,
    Enumerate(EnumerateParams),
    Pull {
        context: String,
        max_elements: Option<u32>,
    },
    Release {
        context: String,
    },
    Invoke {
        method: String,
        input: WsmInstance,
    },
    Subscribe(SubscribeParams),
    Unsubscribe {
        identifier: String,
    },
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Identify => OperationKind::Identify,
            Self::Get => OperationKind::Get,
            Self::Put(_) => OperationKind::Put,
            Self::Create(_) => OperationKind::Create,
            Self::Delete => OperationKind::Delete,
            Self::Enumerate(_) => OperationKind::Enumerate,
            Self::Pull { .. } => OperationKind::Pull,
            Self::Release { .. } => OperationKind::Release,
            Self::Invoke { .. } => OperationKind::Invoke,
            Self::Subscribe(_) => OperationKind::Subscribe,
            Self::Unsubscribe { .. } => OperationKind::Unsubscribe,
        }
    }
}

/// Discriminant of [`Operation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum OperationKind {
    Identify,
    Get,
    Put,
    Create,
    Delete,
    Enumerate,
    Pull,
    Release,
    Invoke,
    Subscribe,
    Unsubscribe,
}

impl OperationKind {
    /// Whether a successful backend call has already changed state by the
    /// time the response is encoded.
    #[must_use]
    pub const fn is_side_effecting(self) -> bool {
        matches!(
            self,
            Self::Put
                | Self::Create
                | Self::Delete
                | Self::Invoke
                | Self::Subscribe
                | Self::Unsubscribe
        )
    }
}

/// What each enumeration item carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EnumerationMode {
    #[default]
    Objects,
    EndpointReferences,
    ObjectsAndEndpointReferences,
}

/// Body of an Enumerate request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnumerateParams {
    pub mode: EnumerationMode,
    /// Return the first page in the Enumerate response itself.
    pub optimized: bool,
    pub max_elements: Option<u32>,
    /// Requested expiration in the date/time dialect.
    pub expires: Option<String>,
    pub filter: Option<Filter>,
    /// Report the total number of items alongside the first page.
    pub request_total_items: bool,
}

/// Query language of a query filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum QueryLanguage {
    #[display("WQL")]
    Wql,
    #[display("DMTF:CQL")]
    Cql,
}

/// Which side of an association an association filter selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationKind {
    /// Objects at the other end of the association.
    AssociatedInstances,
    /// The association objects themselves.
    AssociationInstances,
}

/// Association traversal parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AssociationFilter {
    pub kind: AssociationKind,
    pub object: EndpointReference,
    pub association_class: Option<String>,
    pub result_class: Option<String>,
    pub role: Option<String>,
    pub result_role: Option<String>,
}

/// Enumeration filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Query {
        language: QueryLanguage,
        query: String,
    },
    Association(AssociationFilter),
    /// A dialect the decoder recognised syntactically but the gateway does
    /// not implement.
    Unsupported { dialect: String },
}

/// Indication delivery mode of a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Push,
    PushWithAck,
    Events,
    Pull,
}

impl DeliveryMode {
    /// Value stored in the handler's `DeliveryMode` property.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Push => 2,
            Self::PushWithAck => 3,
            Self::Events => 4,
            Self::Pull => 5,
        }
    }
}

/// Event filter of a Subscribe request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    pub query: String,
    pub language: String,
}

/// Body of a Subscribe request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscribeParams {
    pub delivery_mode: DeliveryMode,
    /// Destination indications are delivered to.
    pub notify_to: String,
    pub expires: Option<String>,
    pub filter: Option<EventFilter>,
}
