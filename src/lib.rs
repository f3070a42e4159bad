#![doc(html_root_url = "https://docs.rs/wsman-gateway/latest")]
//! Public API for the `wsman-gateway` library.
//!
//! This crate implements the processor of a WS-Management gateway: it
//! translates decoded WS-Transfer, WS-Enumeration and WS-Eventing requests
//! into operations against an asynchronous CIM object service, pages large
//! result sets through enumeration contexts, and drives the multi-step
//! creation and removal of event subscriptions.

pub mod backend;
pub mod cim;
pub mod config;
pub mod correlation;
pub mod encoder;
pub mod enumeration;
pub mod epr;
pub mod fault;
pub mod mapper;
pub mod metrics;
pub mod panic;
pub mod processor;
pub mod request;
pub mod response;
pub mod schema;
pub mod subscription;
pub mod value;

pub use backend::{Backend, MemoryBackend};
pub use config::ProcessorConfig;
pub use correlation::{CorrelationArena, CorrelationId};
pub use encoder::{ResponseEncoder, SoapEncoder};
pub use fault::{Fault, FaultCategory};
pub use processor::{Processor, ProcessorError, ProcessorHandle};
pub use request::{MessageId, Operation, Request};
pub use response::{OutboundResponse, Response, ResponseBody};
