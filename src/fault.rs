//! Fault taxonomy shared by every stage of request processing.
//!
//! A [`Fault`] is the only error that reaches a client. Each variant belongs
//! to one [`FaultCategory`] and renders as one wire [`FaultSubcode`], with an
//! optional [`FaultDetail`] URI. Backend status codes enter the taxonomy
//! through [`Fault::from_backend`], which applies a fixed mapping table.

use derive_more::Display;
use thiserror::Error;

/// Coarse classification of a fault, used for metrics and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    /// Malformed or semantically invalid input.
    Protocol,
    /// Missing or invalid routing information.
    Addressing,
    /// Invalid, unexpected or mismatched resource selectors.
    Selector,
    /// Bad or unsupported filter dialect or expression.
    Filter,
    /// The response would not fit the negotiated envelope size.
    EncodingLimit,
    /// Failure reported by the backend service.
    Backend,
    /// Catch-all for unexpected conditions.
    Internal,
}

impl FaultCategory {
    /// Stable lowercase label for this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Addressing => "addressing",
            Self::Selector => "selector",
            Self::Filter => "filter",
            Self::EncodingLimit => "encoding_limit",
            Self::Backend => "backend",
            Self::Internal => "internal",
        }
    }
}

/// Wire subcodes defined by WS-Management and its companion specifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultSubcode {
    AccessDenied,
    ActionNotSupported,
    AlreadyExists,
    CannotProcessFilter,
    DestinationUnreachable,
    EncodingLimit,
    EventSourceUnableToProcess,
    FilterDialectRequestedUnavailable,
    FilteringNotSupported,
    InternalError,
    InvalidEnumerationContext,
    InvalidExpirationTime,
    InvalidMessage,
    InvalidMessageInformationHeader,
    InvalidParameter,
    InvalidRepresentation,
    InvalidSelectors,
    MessageInformationHeaderRequired,
    SchemaValidationError,
}

impl FaultSubcode {
    /// Qualified name as it appears in a SOAP fault subcode.
    #[must_use]
    pub const fn qname(self) -> &'static str {
        match self {
            Self::AccessDenied => "wsman:AccessDenied",
            Self::ActionNotSupported => "wsa:ActionNotSupported",
            Self::AlreadyExists => "wsman:AlreadyExists",
            Self::CannotProcessFilter => "wsen:CannotProcessFilter",
            Self::DestinationUnreachable => "wsa:DestinationUnreachable",
            Self::EncodingLimit => "wsman:EncodingLimit",
            Self::EventSourceUnableToProcess => "wse:EventSourceUnableToProcess",
            Self::FilterDialectRequestedUnavailable => "wsen:FilterDialectRequestedUnavailable",
            Self::FilteringNotSupported => "wsen:FilteringNotSupported",
            Self::InternalError => "wsman:InternalError",
            Self::InvalidEnumerationContext => "wsen:InvalidEnumerationContext",
            Self::InvalidExpirationTime => "wsen:InvalidExpirationTime",
            Self::InvalidMessage => "wse:InvalidMessage",
            Self::InvalidMessageInformationHeader => "wsa:InvalidMessageInformationHeader",
            Self::InvalidParameter => "wsman:InvalidParameter",
            Self::InvalidRepresentation => "wxf:InvalidRepresentation",
            Self::InvalidSelectors => "wsman:InvalidSelectors",
            Self::MessageInformationHeaderRequired => "wsa:MessageInformationHeaderRequired",
            Self::SchemaValidationError => "wsman:SchemaValidationError",
        }
    }
}

const FAULT_DETAIL_BASE: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman/faultDetail/";

/// Optional refinement of a fault subcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum FaultDetail {
    ActionMismatch,
    DuplicateSelectors,
    InsufficientSelectors,
    InvalidResourceURI,
    InvalidValue,
    MaxEnvelopeSize,
    MinimumEnvelopeLimit,
    TypeMismatch,
    UnexpectedSelectors,
    UnreportableSuccess,
}

impl FaultDetail {
    /// Full fault detail URI.
    #[must_use]
    pub fn uri(self) -> String { format!("{FAULT_DETAIL_BASE}{self}") }
}

/// Status codes reported by the backend object service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CimStatus {
    Failed,
    AccessDenied,
    InvalidNamespace,
    InvalidParameter,
    InvalidClass,
    NotFound,
    NotSupported,
    ClassHasChildren,
    ClassHasInstances,
    InvalidSuperclass,
    AlreadyExists,
    NoSuchProperty,
    TypeMismatch,
    QueryLanguageNotSupported,
    InvalidQuery,
    MethodNotAvailable,
    MethodNotFound,
}

impl CimStatus {
    /// Numeric DMTF status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Failed => 1,
            Self::AccessDenied => 2,
            Self::InvalidNamespace => 3,
            Self::InvalidParameter => 4,
            Self::InvalidClass => 5,
            Self::NotFound => 6,
            Self::NotSupported => 7,
            Self::ClassHasChildren => 8,
            Self::ClassHasInstances => 9,
            Self::InvalidSuperclass => 10,
            Self::AlreadyExists => 11,
            Self::NoSuchProperty => 12,
            Self::TypeMismatch => 13,
            Self::QueryLanguageNotSupported => 14,
            Self::InvalidQuery => 15,
            Self::MethodNotAvailable => 16,
            Self::MethodNotFound => 17,
        }
    }

    /// The fixed mapping from backend status to wire subcode and detail.
    #[must_use]
    pub const fn fault_mapping(self) -> (FaultSubcode, Option<FaultDetail>) {
        match self {
            Self::AccessDenied => (FaultSubcode::AccessDenied, None),
            Self::AlreadyExists => (FaultSubcode::AlreadyExists, None),
            Self::InvalidClass => (
                FaultSubcode::DestinationUnreachable,
                Some(FaultDetail::InvalidResourceURI),
            ),
            Self::InvalidNamespace | Self::NotFound => (FaultSubcode::DestinationUnreachable, None),
            Self::InvalidParameter => (FaultSubcode::InvalidParameter, None),
            Self::InvalidQuery => (FaultSubcode::CannotProcessFilter, None),
            Self::NotSupported => (
                FaultSubcode::ActionNotSupported,
                Some(FaultDetail::ActionMismatch),
            ),
            Self::QueryLanguageNotSupported => (FaultSubcode::FilteringNotSupported, None),
            Self::Failed
            | Self::ClassHasChildren
            | Self::ClassHasInstances
            | Self::InvalidSuperclass
            | Self::MethodNotFound
            | Self::MethodNotAvailable
            | Self::NoSuchProperty
            | Self::TypeMismatch => (FaultSubcode::InternalError, None),
        }
    }
}

/// Reason an encoding limit was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum EncodingLimitKind {
    /// The response needs `size` bytes but only `limit` were negotiated.
    #[display("response of {size} bytes exceeds envelope limit of {limit} bytes")]
    MaxEnvelopeSize { size: usize, limit: usize },
    /// The client negotiated an envelope smaller than the service minimum.
    #[display("requested envelope size {requested} is below the minimum of {minimum}")]
    MinimumEnvelopeLimit { requested: u32, minimum: u32 },
    /// A side-effecting operation completed but its response cannot be
    /// reported within the negotiated envelope size.
    #[display("operation succeeded but its response exceeds the envelope limit")]
    UnreportableSuccess,
}

/// A protocol fault returned to the client in place of a success body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Fault {
    /// The message has unknown or invalid content.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// A required addressing header is missing.
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    /// An addressing header is present but invalid.
    #[error("invalid message information header: {reason}")]
    InvalidHeader {
        reason: String,
        detail: Option<FaultDetail>,
    },
    /// The resource cannot be located.
    #[error("destination unreachable: {reason}")]
    DestinationUnreachable {
        reason: String,
        detail: Option<FaultDetail>,
    },
    /// The action is not supported for the addressed resource.
    #[error("action not supported: {0}")]
    ActionNotSupported(String),
    /// The selector set does not identify a resource of the addressed class.
    #[error("invalid selectors: {reason}")]
    InvalidSelectors { reason: String, detail: FaultDetail },
    /// A value could not be converted to its declared type.
    #[error("invalid representation of {field}: {reason}")]
    InvalidRepresentation { field: String, reason: String },
    /// A property is not declared by the target class.
    #[error("schema validation error: {0}")]
    SchemaValidation(String),
    /// An operation parameter is not valid.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The filter expression cannot be processed.
    #[error("cannot process filter: {0}")]
    CannotProcessFilter(String),
    /// The requested filter dialect is not supported.
    #[error("filter dialect {0} is not available")]
    FilterDialectUnavailable(String),
    /// The event source cannot process the subscription.
    #[error("event source unable to process subscription: {0}")]
    EventSourceUnableToProcess(String),
    /// The enumeration context is unknown, released or expired.
    #[error("enumeration context \"{0}\" is not valid")]
    InvalidEnumerationContext(String),
    /// The requested expiration is malformed or in the past.
    #[error("expiration time \"{0}\" is not valid")]
    InvalidExpirationTime(String),
    /// The caller may not perform this operation.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The response does not fit the negotiated envelope size.
    #[error("encoding limit: {0}")]
    EncodingLimit(EncodingLimitKind),
    /// The backend reported a failure status.
    #[error("backend status {status:?}: {description}")]
    Backend {
        status: CimStatus,
        description: String,
    },
    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Fault {
    /// Build a fault from a backend status through the fixed mapping table.
    #[must_use]
    pub fn from_backend(status: CimStatus, description: impl Into<String>) -> Self {
        Self::Backend {
            status,
            description: description.into(),
        }
    }

    /// Build an internal fault from any displayable error.
    #[must_use]
    pub fn internal(error: impl std::fmt::Display) -> Self { Self::Internal(error.to_string()) }

    /// Taxonomy bucket of this fault.
    #[must_use]
    pub const fn category(&self) -> FaultCategory {
        match self {
            Self::InvalidMessage(_)
            | Self::InvalidRepresentation { .. }
            | Self::SchemaValidation(_)
            | Self::InvalidParameter(_)
            | Self::InvalidEnumerationContext(_)
            | Self::InvalidExpirationTime(_)
            | Self::AccessDenied(_) => FaultCategory::Protocol,
            Self::MissingHeader(_)
            | Self::InvalidHeader { .. }
            | Self::DestinationUnreachable { .. }
            | Self::ActionNotSupported(_) => FaultCategory::Addressing,
            Self::InvalidSelectors { .. } => FaultCategory::Selector,
            Self::CannotProcessFilter(_)
            | Self::FilterDialectUnavailable(_)
            | Self::EventSourceUnableToProcess(_) => FaultCategory::Filter,
            Self::EncodingLimit(_) => FaultCategory::EncodingLimit,
            Self::Backend { .. } => FaultCategory::Backend,
            Self::Internal(_) => FaultCategory::Internal,
        }
    }

    /// Wire subcode for this fault.
    #[must_use]
    pub const fn subcode(&self) -> FaultSubcode {
        match self {
            Self::InvalidMessage(_) => FaultSubcode::InvalidMessage,
            Self::MissingHeader(_) => FaultSubcode::MessageInformationHeaderRequired,
            Self::InvalidHeader { .. } => FaultSubcode::InvalidMessageInformationHeader,
            Self::DestinationUnreachable { .. } => FaultSubcode::DestinationUnreachable,
            Self::ActionNotSupported(_) => FaultSubcode::ActionNotSupported,
            Self::InvalidSelectors { .. } => FaultSubcode::InvalidSelectors,
            Self::InvalidRepresentation { .. } => FaultSubcode::InvalidRepresentation,
            Self::SchemaValidation(_) => FaultSubcode::SchemaValidationError,
            Self::InvalidParameter(_) => FaultSubcode::InvalidParameter,
            Self::CannotProcessFilter(_) => FaultSubcode::CannotProcessFilter,
            Self::FilterDialectUnavailable(_) => FaultSubcode::FilterDialectRequestedUnavailable,
            Self::EventSourceUnableToProcess(_) => FaultSubcode::EventSourceUnableToProcess,
            Self::InvalidEnumerationContext(_) => FaultSubcode::InvalidEnumerationContext,
            Self::InvalidExpirationTime(_) => FaultSubcode::InvalidExpirationTime,
            Self::AccessDenied(_) => FaultSubcode::AccessDenied,
            Self::EncodingLimit(_) => FaultSubcode::EncodingLimit,
            Self::Backend { status, .. } => status.fault_mapping().0,
            Self::Internal(_) => FaultSubcode::InternalError,
        }
    }

    /// Optional fault detail refining the subcode.
    #[must_use]
    pub const fn detail(&self) -> Option<FaultDetail> {
        match self {
            Self::InvalidHeader { detail, .. } | Self::DestinationUnreachable { detail, .. } => {
                *detail
            }
            Self::ActionNotSupported(_) => Some(FaultDetail::ActionMismatch),
            Self::InvalidSelectors { detail, .. } => Some(*detail),
            Self::InvalidRepresentation { .. } => Some(FaultDetail::InvalidValue),
            Self::EncodingLimit(kind) => Some(match kind {
                EncodingLimitKind::MaxEnvelopeSize { .. } => FaultDetail::MaxEnvelopeSize,
                EncodingLimitKind::MinimumEnvelopeLimit { .. } => {
                    FaultDetail::MinimumEnvelopeLimit
                }
                EncodingLimitKind::UnreportableSuccess => FaultDetail::UnreportableSuccess,
            }),
            Self::Backend { status, .. } => status.fault_mapping().1,
            _ => None,
        }
    }
}
