//! Endpoint references and the well-known resource URIs.
//!
//! An [`EndpointReference`] addresses one managed resource, or a resource
//! class, by transport address, resource URI and selector set. Selector
//! values are either plain text or nested endpoint references.

use std::fmt;

/// Prefix of resource URIs naming a CIM class.
pub const CIM_SCHEMA_URI: &str = "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2";
/// Resource URI addressing every class at once.
pub const ALL_CLASSES_URI: &str = "http://schemas.dmtf.org/wbem/wscim/1/*";
/// Resource URI used to subscribe through a pre-existing filter.
pub const EXISTING_FILTER_URI: &str =
    "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_IndicationFilter";
/// Anonymous addressing URI.
pub const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
/// Selector carrying the target namespace.
pub const NAMESPACE_SELECTOR: &str = "__cimnamespace";

/// Resource URI for the given class name.
#[must_use]
pub fn class_resource_uri(class_name: &str) -> String { format!("{CIM_SCHEMA_URI}/{class_name}") }

/// Value carried by a selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectorValue {
    /// Plain text value.
    Text(String),
    /// Nested endpoint reference, used for reference-typed keys.
    Reference(Box<EndpointReference>),
}

/// Named selector within a selector set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub name: String,
    pub value: SelectorValue,
}

impl Selector {
    /// Selector with a text value.
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: SelectorValue::Text(value.into()),
        }
    }

    /// Selector with a nested endpoint reference.
    #[must_use]
    pub fn reference(name: impl Into<String>, epr: EndpointReference) -> Self {
        Self {
            name: name.into(),
            value: SelectorValue::Reference(Box::new(epr)),
        }
    }
}

/// Address, resource URI and selector set identifying a managed resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointReference {
    pub address: String,
    pub resource_uri: String,
    pub selectors: Vec<Selector>,
}

impl EndpointReference {
    /// Create a reference without selectors.
    #[must_use]
    pub fn new(address: impl Into<String>, resource_uri: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            resource_uri: resource_uri.into(),
            selectors: Vec::new(),
        }
    }

    /// Append a selector, returning the updated reference.
    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Look up a selector by case-insensitive name.
    #[must_use]
    pub fn selector(&self, name: &str) -> Option<&SelectorValue> {
        self.selectors
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| &s.value)
    }

    /// Text value of the named selector, if present and textual.
    #[must_use]
    pub fn selector_text(&self, name: &str) -> Option<&str> {
        match self.selector(name)? {
            SelectorValue::Text(value) => Some(value),
            SelectorValue::Reference(_) => None,
        }
    }

    /// Whether the resource URI is the "all classes" URI.
    #[must_use]
    pub fn is_all_classes(&self) -> bool { self.resource_uri == ALL_CLASSES_URI }
}

impl fmt::Display for EndpointReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.address, self.resource_uri)?;
        for selector in &self.selectors {
            match &selector.value {
                SelectorValue::Text(value) => write!(f, ";{}={value}", selector.name)?,
                SelectorValue::Reference(epr) => write!(f, ";{}=<{epr}>", selector.name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_lookup_ignores_case() {
        let epr = EndpointReference::new("http://host/wsman", class_resource_uri("CIM_Foo"))
            .with_selector(Selector::text("Name", "a"));
        assert_eq!(epr.selector_text("name"), Some("a"));
        assert!(epr.selector("Other").is_none());
    }

    #[test]
    fn equality_covers_nested_references() {
        let inner = EndpointReference::new("http://host/wsman", class_resource_uri("CIM_A"));
        let a = EndpointReference::new("http://host/wsman", class_resource_uri("CIM_B"))
            .with_selector(Selector::reference("Ref", inner.clone()));
        let b = EndpointReference::new("http://host/wsman", class_resource_uri("CIM_B"))
            .with_selector(Selector::reference(
                "Ref",
                inner.with_selector(Selector::text("Name", "x")),
            ));
        assert_ne!(a, b);
    }
}
