//! Validation of Subscribe and Unsubscribe requests into the backend
//! objects a subscription consists of.
//!
//! A subscription is a handler (where to deliver), a filter (what to
//! deliver) and a subscription object referencing both. A Subscribe against
//! the existing-filter resource reuses a named filter instead of creating
//! one.

use std::time::Duration;

use crate::{
    cim::{CimDateTime, CimValue, Instance, Interval, ObjectPath},
    config::ProcessorConfig,
    epr::{EXISTING_FILTER_URI, EndpointReference, Selector, class_resource_uri},
    fault::Fault,
    mapper::RequestMapper,
    request::{QueryLanguage, Request, SubscribeParams},
    schema::{CLASS_INDICATION_FILTER, CLASS_INDICATION_HANDLER_WSMAN, CLASS_INDICATION_SUBSCRIPTION},
    subscription::SubscriptionInfoTable,
};

/// Objects to create for one Subscribe.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscribePlan {
    pub identifier: String,
    pub namespace: String,
    pub handler: Instance,
    pub handler_path: ObjectPath,
    /// Filter to create; `None` when an existing filter is reused.
    pub filter: Option<Instance>,
    pub filter_path: ObjectPath,
    pub subscription: Instance,
    /// Effective lifetime, if the client asked for one.
    pub lifetime: Option<Duration>,
    /// Subscription manager reference returned to the client.
    pub manager: EndpointReference,
}

impl SubscribePlan {
    /// Name of the reused filter, if any.
    #[must_use]
    pub fn reused_filter(&self) -> Option<&str> {
        if self.filter.is_some() {
            return None;
        }
        self.filter_path.key("Name").and_then(CimValue::as_str)
    }

    /// Effective expiration in the WS-Management interval form.
    #[must_use]
    pub fn expires(&self) -> Option<String> {
        self.lifetime
            .and_then(Interval::from_duration)
            .map(|interval| CimDateTime::Interval(interval).to_wsm_string())
    }
}

/// Objects to delete for one Unsubscribe.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsubscribePlan {
    pub identifier: String,
    pub subscription_path: ObjectPath,
    pub filter_path: ObjectPath,
    pub handler_path: ObjectPath,
}

/// Validate a Subscribe and build the objects it creates.
///
/// # Errors
///
/// - `InvalidMessage` for an all-classes subscription without a filter.
/// - `InvalidParameter` for an existing-filter subscription that carries a
///   query or lacks a `Name` selector.
/// - `FilterDialectRequestedUnavailable` for query languages other than WQL
///   and CQL.
/// - `EventSourceUnableToProcess` when a WQL query selects a class other
///   than the one addressed.
/// - `InvalidExpirationTime` for unusable expirations.
pub fn plan_subscribe(
    config: &ProcessorConfig,
    request: &Request,
    params: &SubscribeParams,
) -> Result<SubscribePlan, Fault> {
    let identifier = request.message_id.identifier().to_owned();
    if params.notify_to.is_empty() {
        return Err(Fault::InvalidMessage("subscription has no delivery address".into()));
    }
    let lifetime = params
        .expires
        .as_deref()
        .map(ProcessorConfig::requested_lifetime)
        .transpose()?;

    let epr = &request.epr;
    let (filter_name, query) = if epr.is_all_classes() {
        let filter = params.filter.as_ref().ok_or_else(|| {
            Fault::InvalidMessage("subscription to all classes requires a filter".into())
        })?;
        (identifier.clone(), Some((language(&filter.language)?, filter.query.clone())))
    } else if epr.resource_uri == EXISTING_FILTER_URI {
        if params.filter.is_some() {
            return Err(Fault::InvalidParameter(
                "subscription to an existing filter must not carry a filter".into(),
            ));
        }
        let name = epr.selector_text("Name").ok_or_else(|| {
            Fault::InvalidParameter("existing filter is not named by a Name selector".into())
        })?;
        (name.to_owned(), None)
    } else {
        let class = RequestMapper::class_name(&epr.resource_uri)?;
        let query = match &params.filter {
            None => (QueryLanguage::Wql, format!("SELECT * FROM {class}")),
            Some(filter) => {
                let language = language(&filter.language)?;
                if language == QueryLanguage::Wql {
                    check_query_class(&filter.query, class)?;
                }
                (language, filter.query.clone())
            }
        };
        (identifier.clone(), Some(query))
    };

    let namespace = config.interop_namespace.clone();
    let handler = system_keyed(config, CLASS_INDICATION_HANDLER_WSMAN, &identifier)
        .with_property("DeliveryMode", CimValue::Uint16(params.delivery_mode.code()))
        .with_property("Destination", CimValue::String(params.notify_to.clone()));
    let handler_path = system_path(config, CLASS_INDICATION_HANDLER_WSMAN, &identifier);
    let filter_path = system_path(config, CLASS_INDICATION_FILTER, &filter_name);
    let filter = query.map(|(language, query)| {
        system_keyed(config, CLASS_INDICATION_FILTER, &identifier)
            .with_property("Query", CimValue::String(query))
            .with_property("QueryLanguage", CimValue::String(language.to_string()))
            .with_property(
                "SourceNamespaces",
                CimValue::Array(vec![CimValue::String(config.default_namespace.clone())]),
            )
    });

    let mut subscription = Instance::new(CLASS_INDICATION_SUBSCRIPTION)
        .with_property("Filter", CimValue::Reference(filter_path.clone()))
        .with_property("Handler", CimValue::Reference(handler_path.clone()))
        .with_property(
            "CreationClassName",
            CimValue::String(CLASS_INDICATION_SUBSCRIPTION.into()),
        )
        .with_property("SubscriptionInfo", CimValue::String(identifier.clone()));
    if let Some(lifetime) = lifetime {
        subscription.set_property("SubscriptionDuration", CimValue::Uint64(lifetime.as_secs()));
    }

    let manager = EndpointReference::new(
        epr.address.clone(),
        class_resource_uri(CLASS_INDICATION_SUBSCRIPTION),
    )
    .with_selector(Selector::text("Identifier", identifier.clone()));

    Ok(SubscribePlan {
        identifier,
        namespace,
        handler,
        handler_path,
        filter,
        filter_path,
        subscription,
        lifetime,
        manager,
    })
}

/// Resolve the objects removed by an Unsubscribe of `identifier`.
#[must_use]
pub fn plan_unsubscribe(
    config: &ProcessorConfig,
    table: &SubscriptionInfoTable,
    identifier: &str,
) -> UnsubscribePlan {
    let filter_name = table.get(identifier).unwrap_or_else(|| identifier.to_owned());
    let referenced_filter = system_path(config, CLASS_INDICATION_FILTER, &filter_name);
    let handler_path = system_path(config, CLASS_INDICATION_HANDLER_WSMAN, identifier);
    let subscription_path = ObjectPath::class(
        config.interop_namespace.clone(),
        CLASS_INDICATION_SUBSCRIPTION,
    )
    .with_key("Filter", CimValue::Reference(referenced_filter))
    .with_key("Handler", CimValue::Reference(handler_path.clone()));
    UnsubscribePlan {
        identifier: identifier.to_owned(),
        subscription_path,
        filter_path: system_path(config, CLASS_INDICATION_FILTER, identifier),
        handler_path,
    }
}

fn language(name: &str) -> Result<QueryLanguage, Fault> {
    if name.eq_ignore_ascii_case("WQL") {
        Ok(QueryLanguage::Wql)
    } else if name.eq_ignore_ascii_case("DMTF:CQL") || name.eq_ignore_ascii_case("CQL") {
        Ok(QueryLanguage::Cql)
    } else {
        Err(Fault::FilterDialectUnavailable(name.to_owned()))
    }
}

/// Reject a WQL query whose `FROM` class differs from `class`.
fn check_query_class(query: &str, class: &str) -> Result<(), Fault> {
    let mut words = query.split_whitespace();
    let selected = words
        .by_ref()
        .find(|word| word.eq_ignore_ascii_case("from"))
        .and_then(|_| words.next())
        .ok_or_else(|| Fault::CannotProcessFilter(format!("query names no class: {query}")))?;
    if selected.eq_ignore_ascii_case(class) {
        Ok(())
    } else {
        Err(Fault::EventSourceUnableToProcess(format!(
            "query selects {selected} but the subscription targets {class}"
        )))
    }
}

fn system_keyed(config: &ProcessorConfig, class: &str, name: &str) -> Instance {
    Instance::new(class)
        .with_property(
            "SystemCreationClassName",
            CimValue::String(config.system_creation_class_name.clone()),
        )
        .with_property("SystemName", CimValue::String(config.system_name.clone()))
        .with_property("CreationClassName", CimValue::String(class.to_owned()))
        .with_property("Name", CimValue::String(name.to_owned()))
}

fn system_path(config: &ProcessorConfig, class: &str, name: &str) -> ObjectPath {
    ObjectPath::class(config.interop_namespace.clone(), class)
        .with_key(
            "SystemCreationClassName",
            CimValue::String(config.system_creation_class_name.clone()),
        )
        .with_key("SystemName", CimValue::String(config.system_name.clone()))
        .with_key("CreationClassName", CimValue::String(class.to_owned()))
        .with_key("Name", CimValue::String(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        epr::ALL_CLASSES_URI,
        request::{EventFilter, Operation},
    };

    const ADDRESS: &str = "http://localhost:5985/wsman";

    fn subscribe(resource_uri: &str, filter: Option<(&str, &str)>) -> (Request, SubscribeParams) {
        let params = SubscribeParams {
            notify_to: "http://listener/events".into(),
            filter: filter.map(|(language, query)| EventFilter {
                query: query.into(),
                language: language.into(),
            }),
            ..SubscribeParams::default()
        };
        let request = Request::new(
            "uuid:sub-1",
            "alice",
            EndpointReference::new(ADDRESS, resource_uri),
            Operation::Subscribe(params.clone()),
        );
        (request, params)
    }

    #[test]
    fn class_subscription_generates_select_all_filter() {
        let (request, params) = subscribe(&class_resource_uri("CIM_AlertIndication"), None);
        let plan = plan_subscribe(&ProcessorConfig::default(), &request, &params).expect("plan");
        assert_eq!(plan.identifier, "sub-1");
        let filter = plan.filter.as_ref().expect("owned filter");
        assert_eq!(
            filter.property("Query").and_then(CimValue::as_str),
            Some("SELECT * FROM CIM_AlertIndication")
        );
        assert_eq!(filter.property("QueryLanguage").and_then(CimValue::as_str), Some("WQL"));
        assert_eq!(plan.handler.property("Name").and_then(CimValue::as_str), Some("sub-1"));
        assert_eq!(plan.manager.selector_text("Identifier"), Some("sub-1"));
        assert_eq!(plan.expires(), None);
    }

    #[test]
    fn existing_filter_is_reused_by_name() {
        let (mut request, params) = subscribe(EXISTING_FILTER_URI, None);
        request.epr = request.epr.with_selector(Selector::text("Name", "shared"));
        let plan = plan_subscribe(&ProcessorConfig::default(), &request, &params).expect("plan");
        assert!(plan.filter.is_none());
        assert_eq!(plan.reused_filter(), Some("shared"));
        let filter_ref = plan
            .subscription
            .property("Filter")
            .and_then(CimValue::as_reference)
            .expect("filter reference");
        assert_eq!(filter_ref.key("Name").and_then(CimValue::as_str), Some("shared"));
    }

    #[rstest]
    #[case(ALL_CLASSES_URI, None, false, "wse:InvalidMessage")]
    #[case(EXISTING_FILTER_URI, None, false, "wsman:InvalidParameter")]
    #[case(EXISTING_FILTER_URI, Some(("WQL", "SELECT * FROM CIM_X")), true, "wsman:InvalidParameter")]
    #[case("urn:elsewhere", None, false, "wsa:DestinationUnreachable")]
    fn invalid_targets_fault(
        #[case] uri: &str,
        #[case] filter: Option<(&str, &str)>,
        #[case] named: bool,
        #[case] subcode: &str,
    ) {
        let (mut request, params) = subscribe(uri, filter);
        if named {
            request.epr = request.epr.with_selector(Selector::text("Name", "shared"));
        }
        let fault = plan_subscribe(&ProcessorConfig::default(), &request, &params)
            .expect_err("rejected");
        assert_eq!(fault.subcode().qname(), subcode);
    }

    #[rstest]
    #[case(("WQL", "SELECT * FROM CIM_Other"), "wse:EventSourceUnableToProcess")]
    #[case(("XPath", "//x"), "wsen:FilterDialectRequestedUnavailable")]
    #[case(("WQL", "SELECT *"), "wsen:CannotProcessFilter")]
    fn bad_filters_fault(#[case] filter: (&str, &str), #[case] subcode: &str) {
        let (request, params) = subscribe(&class_resource_uri("CIM_AlertIndication"), Some(filter));
        let fault = plan_subscribe(&ProcessorConfig::default(), &request, &params)
            .expect_err("rejected");
        assert_eq!(fault.subcode().qname(), subcode);
    }

    #[rstest]
    #[case("PT90S", 90, "PT1M30S")]
    #[case("PT1H", 3_600, "PT1H")]
    #[case("P2D", 172_800, "P2D")]
    fn requested_expiration_sets_duration(
        #[case] requested: &str,
        #[case] secs: u64,
        #[case] granted: &str,
    ) {
        let (request, mut params) = subscribe(&class_resource_uri("CIM_AlertIndication"), None);
        params.expires = Some(requested.into());
        let plan = plan_subscribe(&ProcessorConfig::default(), &request, &params).expect("plan");
        assert_eq!(
            plan.subscription.property("SubscriptionDuration"),
            Some(&CimValue::Uint64(secs))
        );
        assert_eq!(plan.expires().as_deref(), Some(granted));
    }

    #[test]
    fn unsubscribe_addresses_reused_filter() {
        let table = SubscriptionInfoTable::new();
        table.insert("sub-1", "shared");
        let plan = plan_unsubscribe(&ProcessorConfig::default(), &table, "sub-1");
        let filter_ref = plan
            .subscription_path
            .key("Filter")
            .and_then(CimValue::as_reference)
            .expect("filter key");
        assert_eq!(filter_ref.key("Name").and_then(CimValue::as_str), Some("shared"));
        assert_eq!(plan.filter_path.key("Name").and_then(CimValue::as_str), Some("sub-1"));
    }
}
