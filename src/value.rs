//! Protocol-side values exchanged with the wire decoder and encoder.

use crate::epr::EndpointReference;

/// Untyped value as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsmValue {
    /// Explicit nil.
    Null,
    /// Text content of an element.
    Text(String),
    /// Endpoint reference, used for reference-typed properties.
    Reference(EndpointReference),
    /// Embedded instance.
    Instance(Box<WsmInstance>),
    /// Repeated element.
    Array(Vec<WsmValue>),
}

impl WsmValue {
    /// Shorthand for a text value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self { Self::Text(value.into()) }
}

/// Named property of a [`WsmInstance`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsmProperty {
    pub name: String,
    pub value: WsmValue,
}

/// Instance representation carried in transfer bodies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WsmInstance {
    pub class_name: String,
    pub properties: Vec<WsmProperty>,
}

impl WsmInstance {
    /// Create an empty instance of `class_name`.
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            properties: Vec::new(),
        }
    }

    /// Append a property, returning the updated instance.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: WsmValue) -> Self {
        self.properties.push(WsmProperty {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up a property value by exact name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&WsmValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}
