//! Event subscriptions: planning, the create/delete saga and the table of
//! subscriptions that reuse a pre-existing filter.

pub mod plan;
pub mod saga;

use dashmap::DashMap;

pub use self::{
    plan::{SubscribePlan, UnsubscribePlan},
    saga::{CleanupKind, SagaAction, SagaStep, SubscriptionSagas},
};
use crate::{
    cim::{CimValue, Instance},
    schema::CLASS_INDICATION_HANDLER_WSMAN,
};

/// Map from subscription identifier to the name of the reused filter.
///
/// Only subscriptions created against an existing filter appear here;
/// Unsubscribe consults it to decide whether the filter is deleted.
#[derive(Debug, Default)]
pub struct SubscriptionInfoTable {
    entries: DashMap<String, String>,
}

impl SubscriptionInfoTable {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, identifier: impl Into<String>, filter_name: impl Into<String>) {
        self.entries.insert(identifier.into(), filter_name.into());
    }

    /// Reused filter name for `identifier`.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<String> {
        self.entries.get(identifier).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, identifier: &str) -> Option<String> {
        self.entries.remove(identifier).map(|(_, name)| name)
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Record reused filters found among existing subscription instances.
    ///
    /// A subscription qualifies when its handler is a WS-Management handler
    /// and its filter name differs from its `SubscriptionInfo`. Returns the
    /// number of entries recorded.
    pub fn rebuild_from(&self, subscriptions: &[Instance]) -> usize {
        let mut recorded = 0;
        for subscription in subscriptions {
            let handler = subscription.property("Handler").and_then(CimValue::as_reference);
            let filter = subscription.property("Filter").and_then(CimValue::as_reference);
            let info = subscription.property("SubscriptionInfo").and_then(CimValue::as_str);
            let (Some(handler), Some(filter), Some(info)) = (handler, filter, info) else {
                continue;
            };
            if !handler.class_name.eq_ignore_ascii_case(CLASS_INDICATION_HANDLER_WSMAN) {
                continue;
            }
            if let Some(name) = filter.key("Name").and_then(CimValue::as_str)
                && name != info
            {
                self.insert(info, name);
                recorded += 1;
            }
        }
        recorded
    }
}
