//! Structured responses produced by the processor.

use bytes::Bytes;

use crate::{epr::EndpointReference, fault::Fault, request::MessageId, value::WsmInstance};

/// Reply to one client request.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub relates_to: MessageId,
    pub body: Result<ResponseBody, Fault>,
}

impl Response {
    #[must_use]
    pub fn success(relates_to: MessageId, body: ResponseBody) -> Self {
        Self {
            relates_to,
            body: Ok(body),
        }
    }

    #[must_use]
    pub fn fault(relates_to: MessageId, fault: Fault) -> Self {
        Self {
            relates_to,
            body: Err(fault),
        }
    }
}

/// Identification data returned for Identify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifyInfo {
    pub protocol_version: String,
    pub product_vendor: String,
    pub product_version: String,
}

/// One element of an enumeration result.
#[derive(Clone, Debug, PartialEq)]
pub enum EnumerationItem {
    Object(WsmInstance),
    EndpointReference(EndpointReference),
    ObjectAndEndpointReference {
        object: WsmInstance,
        epr: EndpointReference,
    },
}

/// Page of an enumeration returned by Enumerate or Pull.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnumerationPage {
    /// Context id. Always set on Enumerate; absent on the Pull that
    /// exhausts the sequence.
    pub context: Option<String>,
    pub items: Vec<EnumerationItem>,
    pub end_of_sequence: bool,
    pub total_items: Option<u64>,
}

/// Success payload, one variant per operation.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Identify(IdentifyInfo),
    Get(WsmInstance),
    Put(WsmInstance),
    Create(EndpointReference),
    Delete,
    Invoke(WsmInstance),
    Enumerate(EnumerationPage),
    Pull(EnumerationPage),
    Release,
    Subscribe {
        manager: EndpointReference,
        expires: Option<String>,
    },
    Unsubscribe,
}

/// An encoded response ready for the transport.
#[derive(Clone, Debug)]
pub struct OutboundResponse {
    pub relates_to: MessageId,
    pub response: Response,
    pub payload: Bytes,
}
