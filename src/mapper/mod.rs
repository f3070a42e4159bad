//! Stateless translation between protocol requests and backend operations.
//!
//! [`RequestMapper::map_request`] turns a [`Request`] into the
//! [`BackendOp`] that serves it, or `None` for operations the processor
//! answers itself. Endpoint references are resolved to object paths against
//! the class [`Schema`]: selectors that do not name a key, repeat, have the
//! wrong kind or fail to convert are rejected rather than dropped.

pub mod convert;
pub mod response;

use std::{collections::HashSet, sync::Arc};

use crate::{
    backend::{AssociationQuery, BackendOp},
    cim::{CimType, CimValue, ObjectPath},
    epr::{ANONYMOUS_ADDRESS, CIM_SCHEMA_URI, EndpointReference, NAMESPACE_SELECTOR, SelectorValue},
    fault::{Fault, FaultDetail},
    request::{AssociationFilter, AssociationKind, EnumerateParams, EnumerationMode, Filter, Operation, Request},
    schema::{ClassDecl, PropertyDecl, Schema},
};

/// How many key selectors an endpoint reference must carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySelectors {
    /// Class-level reference; only the namespace selector is allowed.
    None,
    /// Instance-level reference; every key is required.
    All,
    /// Either a class-level or a complete instance-level reference.
    NoneOrAll,
}

/// Maps requests onto backend operations using a class schema.
#[derive(Clone, Debug)]
pub struct RequestMapper {
    schema: Arc<Schema>,
    default_namespace: String,
}

impl RequestMapper {
    #[must_use]
    pub fn new(schema: Arc<Schema>, default_namespace: impl Into<String>) -> Self {
        Self {
            schema,
            default_namespace: default_namespace.into(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema { &self.schema }

    /// Backend operation serving `request`, or `None` when the processor
    /// handles the operation without a direct backend call.
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] describing why the request cannot be mapped.
    pub fn map_request(&self, request: &Request) -> Result<Option<BackendOp>, Fault> {
        let epr = &request.epr;
        let op = match &request.operation {
            Operation::Identify
            | Operation::Pull { .. }
            | Operation::Release { .. }
            | Operation::Subscribe(_)
            | Operation::Unsubscribe { .. } => return Ok(None),
            Operation::Enumerate(params) => return self.map_enumerate(epr, params).map(Some),
            _ if epr.is_all_classes() => {
                return Err(Fault::ActionNotSupported(format!(
                    "{} is not supported for the all-classes resource",
                    request.kind()
                )));
            }
            Operation::Get => BackendOp::GetInstance {
                path: self.object_path(epr, KeySelectors::All)?,
            },
            Operation::Delete => BackendOp::DeleteInstance {
                path: self.object_path(epr, KeySelectors::All)?,
            },
            Operation::Put(body) => {
                let path = self.object_path(epr, KeySelectors::All)?;
                let class = self.class_decl(&path.class_name)?;
                let mut instance = self.to_cim_instance(body, class)?;
                instance.path = Some(path);
                BackendOp::ModifyInstance { instance }
            }
            Operation::Create(body) => {
                let path = self.object_path(epr, KeySelectors::None)?;
                let class = self.class_decl(&path.class_name)?;
                BackendOp::CreateInstance {
                    namespace: path.namespace,
                    instance: self.to_cim_instance(body, class)?,
                }
            }
            Operation::Invoke { method, input } => BackendOp::InvokeMethod {
                path: self.object_path(epr, KeySelectors::NoneOrAll)?,
                method: method.clone(),
                params: self.to_method_params(input)?,
            },
        };
        Ok(Some(op))
    }

    fn map_enumerate(
        &self,
        epr: &EndpointReference,
        params: &EnumerateParams,
    ) -> Result<BackendOp, Fault> {
        let objects = params.mode != EnumerationMode::EndpointReferences;
        match &params.filter {
            Some(Filter::Query { language, query }) => {
                if !objects {
                    return Err(Fault::CannotProcessFilter(
                        "query filters cannot return endpoint references only".into(),
                    ));
                }
                check_address(&epr.address)?;
                let namespace = if epr.is_all_classes() {
                    self.namespace(epr)?
                } else {
                    self.object_path(epr, KeySelectors::None)?.namespace
                };
                Ok(BackendOp::ExecQuery {
                    namespace,
                    language: language.to_string(),
                    query: query.clone(),
                })
            }
            Some(Filter::Unsupported { dialect }) => {
                Err(Fault::FilterDialectUnavailable(dialect.clone()))
            }
            _ if epr.is_all_classes() => Err(Fault::ActionNotSupported(
                "enumerating all classes requires a query filter".into(),
            )),
            Some(Filter::Association(filter)) => {
                self.object_path(epr, KeySelectors::None)?;
                let query = self.association_query(filter)?;
                Ok(match (filter.kind, objects) {
                    (AssociationKind::AssociatedInstances, true) => BackendOp::Associators(query),
                    (AssociationKind::AssociatedInstances, false) => {
                        BackendOp::AssociatorNames(query)
                    }
                    (AssociationKind::AssociationInstances, true) => BackendOp::References(query),
                    (AssociationKind::AssociationInstances, false) => {
                        BackendOp::ReferenceNames(query)
                    }
                })
            }
            None => {
                let path = self.object_path(epr, KeySelectors::None)?;
                Ok(if objects {
                    BackendOp::EnumerateInstances {
                        namespace: path.namespace,
                        class_name: path.class_name,
                    }
                } else {
                    BackendOp::EnumerateInstanceNames {
                        namespace: path.namespace,
                        class_name: path.class_name,
                    }
                })
            }
        }
    }

    fn association_query(&self, filter: &AssociationFilter) -> Result<AssociationQuery, Fault> {
        Ok(AssociationQuery {
            object: self.object_path(&filter.object, KeySelectors::All)?,
            association_class: filter.association_class.clone(),
            result_class: filter.result_class.clone(),
            role: filter.role.clone(),
            result_role: filter.result_role.clone(),
        })
    }

    /// Class named by a resource URI.
    ///
    /// # Errors
    ///
    /// Returns `DestinationUnreachable` with `InvalidResourceURI` detail when
    /// the URI does not name a class.
    pub fn class_name(resource_uri: &str) -> Result<&str, Fault> {
        resource_uri
            .strip_prefix(CIM_SCHEMA_URI)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|class| !class.is_empty() && !class.contains('/'))
            .ok_or_else(|| Fault::DestinationUnreachable {
                reason: format!("unrecognised resource URI {resource_uri}"),
                detail: Some(FaultDetail::InvalidResourceURI),
            })
    }

    fn class_decl(&self, name: &str) -> Result<&ClassDecl, Fault> {
        self.schema
            .class(name)
            .ok_or_else(|| Fault::DestinationUnreachable {
                reason: format!("class {name} does not exist"),
                detail: Some(FaultDetail::InvalidResourceURI),
            })
    }

    /// Namespace selected by `epr`, or the default namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSelectors` if the namespace selector is a reference,
    /// repeated, or not a legal namespace name.
    pub fn namespace(&self, epr: &EndpointReference) -> Result<String, Fault> {
        let mut found = epr
            .selectors
            .iter()
            .filter(|s| s.name.eq_ignore_ascii_case(NAMESPACE_SELECTOR));
        let Some(selector) = found.next() else {
            return Ok(self.default_namespace.clone());
        };
        if found.next().is_some() {
            return Err(invalid_selectors(
                FaultDetail::DuplicateSelectors,
                format!("selector {NAMESPACE_SELECTOR} repeated"),
            ));
        }
        match &selector.value {
            SelectorValue::Text(ns) if is_legal_namespace(ns) => Ok(ns.clone()),
            SelectorValue::Text(ns) => Err(invalid_selectors(
                FaultDetail::InvalidValue,
                format!("{ns:?} is not a valid namespace"),
            )),
            SelectorValue::Reference(_) => Err(invalid_selectors(
                FaultDetail::TypeMismatch,
                format!("selector {NAMESPACE_SELECTOR} must be a value"),
            )),
        }
    }

    /// Resolve an endpoint reference to a backend object path.
    ///
    /// # Errors
    ///
    /// Returns an addressing fault for a bad address or resource URI and an
    /// `InvalidSelectors` fault for unexpected, duplicate, mistyped,
    /// unconvertible or missing key selectors.
    pub fn object_path(
        &self,
        epr: &EndpointReference,
        keys: KeySelectors,
    ) -> Result<ObjectPath, Fault> {
        check_address(&epr.address)?;
        let class = self.class_decl(Self::class_name(&epr.resource_uri)?)?;
        let mut path = ObjectPath::class(self.namespace(epr)?, class.name.clone());

        let mut seen = HashSet::new();
        for selector in &epr.selectors {
            if selector.name.eq_ignore_ascii_case(NAMESPACE_SELECTOR) {
                continue;
            }
            if !seen.insert(selector.name.to_ascii_lowercase()) {
                return Err(invalid_selectors(
                    FaultDetail::DuplicateSelectors,
                    format!("selector {} repeated", selector.name),
                ));
            }
            let decl = class
                .find_property(&selector.name)
                .filter(|p| p.key && keys != KeySelectors::None)
                .ok_or_else(|| {
                    invalid_selectors(
                        FaultDetail::UnexpectedSelectors,
                        format!("{} is not a key of {}", selector.name, class.name),
                    )
                })?;
            path = path.with_key(decl.name.clone(), self.key_value(decl, &selector.value)?);
        }

        let required = match keys {
            KeySelectors::None => false,
            KeySelectors::All => true,
            KeySelectors::NoneOrAll => !path.keys.is_empty(),
        };
        if required {
            if let Some(missing) = class.keys().find(|k| path.key(&k.name).is_none()) {
                return Err(invalid_selectors(
                    FaultDetail::InsufficientSelectors,
                    format!("key {} of {} not supplied", missing.name, class.name),
                ));
            }
        }
        Ok(path)
    }

    fn key_value(&self, decl: &PropertyDecl, value: &SelectorValue) -> Result<CimValue, Fault> {
        match (decl.ty, value) {
            (CimType::Reference, SelectorValue::Reference(epr)) => {
                Ok(CimValue::Reference(self.object_path(epr, KeySelectors::All)?))
            }
            (CimType::Reference, SelectorValue::Text(_)) | (_, SelectorValue::Reference(_)) => {
                Err(invalid_selectors(
                    FaultDetail::TypeMismatch,
                    format!("selector {} has the wrong kind of value", decl.name),
                ))
            }
            (ty, SelectorValue::Text(text)) => convert::parse_scalar(ty, text).map_err(|reason| {
                invalid_selectors(
                    FaultDetail::InvalidValue,
                    format!("selector {}: {reason}", decl.name),
                )
            }),
        }
    }
}

fn invalid_selectors(detail: FaultDetail, reason: String) -> Fault { Fault::InvalidSelectors { reason, detail } }

/// The address must be anonymous or an `http[s]://host[:port]/path` URL.
///
/// # Errors
///
/// Returns `InvalidHeader` for any other address.
pub fn check_address(address: &str) -> Result<(), Fault> {
    if address == ANONYMOUS_ADDRESS {
        return Ok(());
    }
    let valid = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(authority, _)| {
            !authority.is_empty() && !authority.contains(char::is_whitespace)
        });
    if valid {
        Ok(())
    } else {
        Err(Fault::InvalidHeader {
            reason: format!("invalid address {address:?}"),
            detail: None,
        })
    }
}

/// Namespace names are `/`-separated segments of ASCII letters, digits and
/// underscores.
#[must_use]
pub fn is_legal_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        epr::{ALL_CLASSES_URI, Selector, class_resource_uri},
        fault::FaultSubcode,
        request::QueryLanguage,
        schema::{CLASS_INDICATION_FILTER, CLASS_INDICATION_SUBSCRIPTION},
    };

    const ADDRESS: &str = "http://localhost:5985/wsman";

    #[fixture]
    fn mapper() -> RequestMapper { RequestMapper::new(Arc::new(Schema::indication_classes()), "root/cimv2") }

    fn filter_epr() -> EndpointReference {
        EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_FILTER))
            .with_selector(Selector::text("SystemCreationClassName", "CIM_ComputerSystem"))
            .with_selector(Selector::text("SystemName", "host"))
            .with_selector(Selector::text("CreationClassName", CLASS_INDICATION_FILTER))
            .with_selector(Selector::text("Name", "f1"))
    }

    fn request(epr: EndpointReference, operation: Operation) -> Request { Request::new("uuid:1", "alice", epr, operation) }

    #[rstest]
    fn get_resolves_full_path(mapper: RequestMapper) {
        let epr = filter_epr().with_selector(Selector::text(NAMESPACE_SELECTOR, "root/interop"));
        let Ok(Some(BackendOp::GetInstance { path })) = mapper.map_request(&request(epr, Operation::Get))
        else {
            panic!("expected get");
        };
        assert_eq!(path.namespace, "root/interop");
        assert_eq!(path.keys.len(), 4);
        assert_eq!(path.key("name"), Some(&CimValue::String("f1".into())));
    }

    #[rstest]
    #[case(Selector::text("Bogus", "x"), FaultDetail::UnexpectedSelectors)]
    #[case(Selector::text("Name", "again"), FaultDetail::DuplicateSelectors)]
    #[case(Selector::text(NAMESPACE_SELECTOR, "root//bad"), FaultDetail::InvalidValue)]
    fn selector_faults(mapper: RequestMapper, #[case] extra: Selector, #[case] detail: FaultDetail) {
        let epr = filter_epr().with_selector(extra);
        let fault = mapper.object_path(&epr, KeySelectors::All).expect_err("should fault");
        assert_eq!(fault.subcode(), FaultSubcode::InvalidSelectors);
        assert_eq!(fault.detail(), Some(detail));
    }

    #[rstest]
    fn missing_key_is_insufficient(mapper: RequestMapper) {
        let mut epr = filter_epr();
        epr.selectors.pop();
        let fault = mapper.object_path(&epr, KeySelectors::All).expect_err("should fault");
        assert_eq!(fault.detail(), Some(FaultDetail::InsufficientSelectors));
        assert!(mapper.object_path(&epr, KeySelectors::NoneOrAll).is_err());
    }

    #[rstest]
    fn value_selector_for_reference_key_is_type_mismatch(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_SUBSCRIPTION))
            .with_selector(Selector::text("Filter", "f1"));
        let fault = mapper.object_path(&epr, KeySelectors::All).expect_err("should fault");
        assert_eq!(fault.detail(), Some(FaultDetail::TypeMismatch));
    }

    #[rstest]
    fn reference_key_resolves_nested_path(mapper: RequestMapper) {
        let handler_epr = EndpointReference::new(ADDRESS, class_resource_uri("CIM_IndicationHandlerWSMAN"))
            .with_selector(Selector::text("SystemCreationClassName", "CIM_ComputerSystem"))
            .with_selector(Selector::text("SystemName", "host"))
            .with_selector(Selector::text("CreationClassName", "CIM_IndicationHandlerWSMAN"))
            .with_selector(Selector::text("Name", "h1"));
        let epr = EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_SUBSCRIPTION))
            .with_selector(Selector::reference("Filter", filter_epr()))
            .with_selector(Selector::reference("Handler", handler_epr));
        let path = mapper.object_path(&epr, KeySelectors::All).expect("valid path");
        let filter = path.key("Filter").and_then(CimValue::as_reference).expect("filter ref");
        assert_eq!(filter.class_name, CLASS_INDICATION_FILTER);
    }

    #[rstest]
    #[case("http://other.org/resource", FaultSubcode::DestinationUnreachable)]
    #[case("http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_Missing", FaultSubcode::DestinationUnreachable)]
    fn unknown_resources_are_unreachable(
        mapper: RequestMapper,
        #[case] uri: &str,
        #[case] subcode: FaultSubcode,
    ) {
        let epr = EndpointReference::new(ADDRESS, uri);
        let fault = mapper.map_request(&request(epr, Operation::Get)).expect_err("should fault");
        assert_eq!(fault.subcode(), subcode);
        assert_eq!(fault.detail(), Some(FaultDetail::InvalidResourceURI));
    }

    #[rstest]
    #[case(ANONYMOUS_ADDRESS, true)]
    #[case("https://host:5986/wsman", true)]
    #[case("http://host", false)]
    #[case("ftp://host/wsman", false)]
    #[case("http:///wsman", false)]
    fn address_validation(#[case] address: &str, #[case] valid: bool) {
        assert_eq!(check_address(address).is_ok(), valid);
    }

    #[rstest]
    fn all_classes_rejects_transfer_operations(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, ALL_CLASSES_URI);
        let fault = mapper.map_request(&request(epr, Operation::Delete)).expect_err("should fault");
        assert_eq!(fault.subcode(), FaultSubcode::ActionNotSupported);
    }

    #[rstest]
    fn enumerate_modes_select_backend_operation(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_FILTER));
        let enumerate = |mode| {
            Operation::Enumerate(EnumerateParams {
                mode,
                ..EnumerateParams::default()
            })
        };
        assert!(matches!(
            mapper.map_request(&request(epr.clone(), enumerate(EnumerationMode::ObjectsAndEndpointReferences))),
            Ok(Some(BackendOp::EnumerateInstances { .. }))
        ));
        assert!(matches!(
            mapper.map_request(&request(epr, enumerate(EnumerationMode::EndpointReferences))),
            Ok(Some(BackendOp::EnumerateInstanceNames { .. }))
        ));
    }

    #[rstest]
    fn all_classes_enumeration_requires_query(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, ALL_CLASSES_URI);
        let plain = Operation::Enumerate(EnumerateParams::default());
        assert!(mapper.map_request(&request(epr.clone(), plain)).is_err());
        let query = Operation::Enumerate(EnumerateParams {
            filter: Some(Filter::Query {
                language: QueryLanguage::Wql,
                query: "SELECT * FROM CIM_IndicationFilter".into(),
            }),
            ..EnumerateParams::default()
        });
        assert!(matches!(
            mapper.map_request(&request(epr, query)),
            Ok(Some(BackendOp::ExecQuery { ref namespace, ref language, .. }))
                if namespace == "root/cimv2" && language == "WQL"
        ));
    }

    #[rstest]
    fn unsupported_dialect_faults(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_FILTER));
        let op = Operation::Enumerate(EnumerateParams {
            filter: Some(Filter::Unsupported {
                dialect: "http://example.org/xpath".into(),
            }),
            ..EnumerateParams::default()
        });
        let fault = mapper.map_request(&request(epr, op)).expect_err("should fault");
        assert_eq!(fault.subcode(), FaultSubcode::FilterDialectRequestedUnavailable);
    }

    #[rstest]
    fn local_operations_have_no_backend_mapping(mapper: RequestMapper) {
        let epr = EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_FILTER));
        let pull = Operation::Pull {
            context: "1".into(),
            max_elements: None,
        };
        assert_eq!(mapper.map_request(&request(epr, pull)), Ok(None));
    }
}
