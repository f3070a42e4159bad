//! Processor configuration.
//!
//! [`ProcessorConfig`] gathers the limits and well-known names the processor
//! consults per request. Values are set through consuming builder methods:
//!
//! ```
//! use std::time::Duration;
//!
//! use wsman_gateway::config::ProcessorConfig;
//!
//! let config = ProcessorConfig::default()
//!     .max_expiration(Duration::from_secs(60))
//!     .system_name("gateway.example");
//! assert_eq!(config.max_expiration, Duration::from_secs(60));
//! ```

use std::time::{Duration, SystemTime};

use crate::{cim::CimDateTime, fault::Fault};

/// Envelope size used when a request does not negotiate one.
pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 153_600;
/// Smallest envelope size a request may negotiate.
pub const MIN_ENVELOPE_SIZE: u32 = 8192;
/// Expiration applied when a request does not ask for one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(600);

/// Tunables for [`Processor`](crate::processor::Processor).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Expiration used when an Enumerate or Subscribe omits one.
    pub default_expiration: Duration,
    /// Upper bound applied to requested expirations.
    pub max_expiration: Duration,
    /// Period of the expired-context sweep.
    pub sweep_interval: Duration,
    pub default_max_envelope_size: u32,
    pub min_envelope_size: u32,
    /// Namespace used when a request carries no namespace selector.
    pub default_namespace: String,
    /// Namespace holding handlers, filters and subscriptions.
    pub interop_namespace: String,
    pub system_name: String,
    pub system_creation_class_name: String,
    /// Rebuild the subscription info table from the backend at start-up.
    pub warm_up_subscriptions: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            default_expiration: DEFAULT_EXPIRATION,
            max_expiration: DEFAULT_EXPIRATION,
            sweep_interval: Duration::from_secs(30),
            default_max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            min_envelope_size: MIN_ENVELOPE_SIZE,
            default_namespace: "root/cimv2".into(),
            interop_namespace: "root/PG_InterOp".into(),
            system_name: "localhost".into(),
            system_creation_class_name: "CIM_ComputerSystem".into(),
            warm_up_subscriptions: true,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn default_expiration(mut self, value: Duration) -> Self {
        self.default_expiration = value;
        self
    }

    #[must_use]
    pub fn max_expiration(mut self, value: Duration) -> Self {
        self.max_expiration = value;
        self
    }

    #[must_use]
    pub fn sweep_interval(mut self, value: Duration) -> Self {
        self.sweep_interval = value;
        self
    }

    #[must_use]
    pub fn default_max_envelope_size(mut self, value: u32) -> Self {
        self.default_max_envelope_size = value;
        self
    }

    #[must_use]
    pub fn min_envelope_size(mut self, value: u32) -> Self {
        self.min_envelope_size = value;
        self
    }

    #[must_use]
    pub fn default_namespace(mut self, value: impl Into<String>) -> Self {
        self.default_namespace = value.into();
        self
    }

    #[must_use]
    pub fn interop_namespace(mut self, value: impl Into<String>) -> Self {
        self.interop_namespace = value.into();
        self
    }

    #[must_use]
    pub fn system_name(mut self, value: impl Into<String>) -> Self {
        self.system_name = value.into();
        self
    }

    #[must_use]
    pub fn system_creation_class_name(mut self, value: impl Into<String>) -> Self {
        self.system_creation_class_name = value.into();
        self
    }

    #[must_use]
    pub fn warm_up_subscriptions(mut self, value: bool) -> Self {
        self.warm_up_subscriptions = value;
        self
    }

    /// Effective enumeration lifetime for a requested expiration.
    ///
    /// `None` yields the default. Requested lifetimes are capped at the
    /// maximum.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::InvalidExpirationTime`] as [`requested_lifetime`] does.
    ///
    /// [`requested_lifetime`]: Self::requested_lifetime
    pub fn resolve_expiration(&self, requested: Option<&str>) -> Result<Duration, Fault> {
        let Some(text) = requested else {
            return Ok(self.default_expiration.min(self.max_expiration));
        };
        Ok(Self::requested_lifetime(text)?.min(self.max_expiration))
    }

    /// Lifetime named by an expiration, without any cap.
    ///
    /// An interval is used as given and a timestamp is measured from now.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::InvalidExpirationTime`] for malformed values,
    /// date-only timestamps and timestamps that are not in the future.
    pub fn requested_lifetime(text: &str) -> Result<Duration, Fault> {
        let invalid = || Fault::InvalidExpirationTime(text.to_owned());
        match CimDateTime::parse_wsm(text).map_err(|_| invalid())? {
            CimDateTime::Interval(interval) => Ok(interval.as_duration()),
            CimDateTime::Timestamp(timestamp) => timestamp
                .to_system_time()
                .and_then(|at| at.duration_since(SystemTime::now()).ok())
                .ok_or_else(invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_protocol_limits() {
        let config = ProcessorConfig::default();
        assert_eq!(config.default_max_envelope_size, 153_600);
        assert_eq!(config.min_envelope_size, 8192);
        assert_eq!(config.max_expiration, Duration::from_secs(600));
        assert!(config.warm_up_subscriptions);
    }

    #[rstest]
    #[case(None, 600)]
    #[case(Some("PT30S"), 30)]
    #[case(Some("P1D"), 600)]
    #[case(Some("2999-01-01T00:00:00Z"), 600)]
    fn expiration_is_defaulted_and_capped(#[case] requested: Option<&str>, #[case] secs: u64) {
        let lifetime = ProcessorConfig::default()
            .resolve_expiration(requested)
            .expect("valid expiration");
        assert_eq!(lifetime, Duration::from_secs(secs));
    }

    #[rstest]
    #[case("2001-01-01T00:00:00Z")]
    #[case("2999-01-01Z")]
    #[case("tomorrow")]
    #[case("1234567é12345.123456+000")]
    fn unusable_expiration_is_rejected(#[case] requested: &str) {
        assert_eq!(
            ProcessorConfig::default().resolve_expiration(Some(requested)),
            Err(Fault::InvalidExpirationTime(requested.to_owned()))
        );
        assert_eq!(
            ProcessorConfig::requested_lifetime(requested),
            Err(Fault::InvalidExpirationTime(requested.to_owned()))
        );
    }

    #[test]
    fn requested_lifetime_is_not_capped() {
        assert_eq!(
            ProcessorConfig::requested_lifetime("PT1H"),
            Ok(Duration::from_secs(3_600))
        );
    }
}
