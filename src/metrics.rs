//! Metric helpers for the gateway processor.
//!
//! Metric names are exported as constants; the helpers wrap the
//! [`metrics`](https://docs.rs/metrics) macros and compile to nothing when
//! the `metrics` feature is disabled.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::fault::FaultCategory;

/// Gauge of live enumeration contexts.
pub const ENUMERATION_CONTEXTS: &str = "wsman_enumeration_contexts";
/// Counter of contexts removed by the expiry sweep.
pub const ENUMERATION_CONTEXTS_SWEPT: &str = "wsman_enumeration_contexts_swept_total";
/// Counter of faults returned to clients, labelled by category.
pub const FAULTS_TOTAL: &str = "wsman_faults_total";
/// Counter of compensating deletes, labelled by outcome.
pub const COMPENSATING_DELETES: &str = "wsman_compensating_deletes_total";
/// Counter of finished subscription sagas, labelled by kind and outcome.
pub const SUBSCRIPTION_SAGAS: &str = "wsman_subscription_sagas_total";
/// Counter of backend replies with no matching request.
pub const UNKNOWN_CORRELATIONS: &str = "wsman_unknown_correlations_total";

/// Outcome label for saga and compensation counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Set the live enumeration context gauge.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn set_enumeration_contexts(count: usize) {
    #[cfg(feature = "metrics")]
    #[allow(clippy::cast_precision_loss)]
    gauge!(ENUMERATION_CONTEXTS).set(count as f64);
}

/// Record contexts removed by one sweep.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_contexts_swept(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(ENUMERATION_CONTEXTS_SWEPT).increment(count as u64);
}

/// Record a fault returned to a client.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_faults(category: FaultCategory) {
    #[cfg(feature = "metrics")]
    counter!(FAULTS_TOTAL, "category" => category.as_str()).increment(1);
}

/// Record a compensating delete.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_compensating_deletes(outcome: Outcome) {
    #[cfg(feature = "metrics")]
    counter!(COMPENSATING_DELETES, "outcome" => outcome.as_str()).increment(1);
}

/// Record a finished subscribe or unsubscribe saga.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_subscription_sagas(kind: &'static str, outcome: Outcome) {
    #[cfg(feature = "metrics")]
    counter!(SUBSCRIPTION_SAGAS, "kind" => kind, "outcome" => outcome.as_str()).increment(1);
}

/// Record a backend reply that matched no pending request.
pub fn inc_unknown_correlations() {
    #[cfg(feature = "metrics")]
    counter!(UNKNOWN_CORRELATIONS).increment(1);
}
