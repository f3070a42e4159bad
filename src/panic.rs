//! Conversion of panics caught by the processor into internal faults.

use std::{any::Any, borrow::Cow};

use derive_more::Display;

use crate::fault::Fault;

/// Processor stage a caught panic unwound from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum PanicSite {
    #[display("request handling")]
    Request,
    #[display("reply handling")]
    Reply,
}

/// Text carried by a panic payload.
///
/// `panic!` payloads are `&'static str` or `String`; anything else is
/// reported by its `Debug` form.
#[must_use]
pub fn panic_text(payload: &(dyn Any + Send)) -> Cow<'_, str> {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{payload:?}"))
    }
}

/// Internal fault reported to the client whose request panicked at `site`.
#[must_use]
pub fn internal_fault(site: PanicSite, payload: &(dyn Any + Send)) -> Fault {
    Fault::Internal(format!("{site} panicked: {}", panic_text(payload)))
}
