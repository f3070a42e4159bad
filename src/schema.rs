//! Class declarations used to validate selectors and instance properties.

use std::collections::HashMap;

use crate::cim::CimType;

pub const CLASS_INDICATION_FILTER: &str = "CIM_IndicationFilter";
pub const CLASS_LISTENER_DESTINATION: &str = "CIM_ListenerDestination";
pub const CLASS_INDICATION_HANDLER_WSMAN: &str = "CIM_IndicationHandlerWSMAN";
pub const CLASS_INDICATION_SUBSCRIPTION: &str = "CIM_IndicationSubscription";

/// Declaration of one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: CimType,
    pub is_array: bool,
    pub key: bool,
}

impl PropertyDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: CimType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_array: false,
            key: false,
        }
    }

    /// Mark the property as a key.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark the property as array-valued.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }
}

/// Declaration of one class. Properties include inherited ones once the
/// class has been added to a [`Schema`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub properties: Vec<PropertyDecl>,
}

impl ClassDecl {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    #[must_use]
    pub fn property(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    /// Case-insensitive property lookup.
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Key properties in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyDecl> { self.properties.iter().filter(|p| p.key) }
}

/// Set of known classes, keyed case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    classes: HashMap<String, ClassDecl>,
}

impl Schema {
    /// Add a class, merging the properties of an already known superclass.
    /// Properties redeclared by the subclass override inherited ones.
    #[must_use]
    pub fn with_class(mut self, mut decl: ClassDecl) -> Self {
        if let Some(parent) = decl
            .superclass
            .as_deref()
            .and_then(|name| self.class(name))
        {
            let mut merged: Vec<PropertyDecl> = parent
                .properties
                .iter()
                .filter(|p| decl.find_property(&p.name).is_none())
                .cloned()
                .collect();
            merged.append(&mut decl.properties);
            decl.properties = merged;
        }
        self.classes.insert(decl.name.to_ascii_lowercase(), decl);
        self
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassDecl> { self.classes.get(&name.to_ascii_lowercase()) }

    /// Whether `class` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        let mut current = self.class(class);
        while let Some(decl) = current {
            if decl.name.eq_ignore_ascii_case(ancestor) {
                return true;
            }
            current = decl.superclass.as_deref().and_then(|s| self.class(s));
        }
        false
    }

    /// Names of `class` and all its known subclasses.
    #[must_use]
    pub fn family(&self, class: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .values()
            .filter(|decl| self.is_subclass_of(&decl.name, class))
            .map(|decl| decl.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Schema declaring the indication classes used by subscriptions.
    #[must_use]
    pub fn indication_classes() -> Self {
        let system_keys = |decl: ClassDecl| {
            decl.property(PropertyDecl::new("SystemCreationClassName", CimType::String).key())
                .property(PropertyDecl::new("SystemName", CimType::String).key())
                .property(PropertyDecl::new("CreationClassName", CimType::String).key())
                .property(PropertyDecl::new("Name", CimType::String).key())
        };
        Self::default()
            .with_class(
                system_keys(ClassDecl::new(CLASS_INDICATION_FILTER))
                    .property(PropertyDecl::new("Query", CimType::String))
                    .property(PropertyDecl::new("QueryLanguage", CimType::String))
                    .property(PropertyDecl::new("SourceNamespace", CimType::String))
                    .property(PropertyDecl::new("SourceNamespaces", CimType::String).array())
                    .property(PropertyDecl::new("Description", CimType::String)),
            )
            .with_class(
                system_keys(ClassDecl::new(CLASS_LISTENER_DESTINATION))
                    .property(PropertyDecl::new("Destination", CimType::String))
                    .property(PropertyDecl::new("PersistenceType", CimType::Uint16)),
            )
            .with_class(
                ClassDecl::new(CLASS_INDICATION_HANDLER_WSMAN)
                    .extends(CLASS_LISTENER_DESTINATION)
                    .property(PropertyDecl::new("DeliveryMode", CimType::Uint16)),
            )
            .with_class(
                ClassDecl::new(CLASS_INDICATION_SUBSCRIPTION)
                    .property(PropertyDecl::new("Filter", CimType::Reference).key())
                    .property(PropertyDecl::new("Handler", CimType::Reference).key())
                    .property(PropertyDecl::new("CreationClassName", CimType::String))
                    .property(PropertyDecl::new("SubscriptionInfo", CimType::String))
                    .property(PropertyDecl::new("SubscriptionDuration", CimType::Uint64))
                    .property(PropertyDecl::new("SubscriptionState", CimType::Uint16)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclass_inherits_keys() {
        let schema = Schema::indication_classes();
        let handler = schema
            .class("cim_indicationhandlerwsman")
            .expect("handler class declared");
        let keys: Vec<&str> = handler.keys().map(|p| p.name.as_str()).collect();
        assert_eq!(
            keys,
            ["SystemCreationClassName", "SystemName", "CreationClassName", "Name"]
        );
        assert!(handler.find_property("deliverymode").is_some());
        assert!(handler.find_property("Destination").is_some());
    }

    #[test]
    fn family_includes_subclasses() {
        let schema = Schema::indication_classes();
        assert!(schema.is_subclass_of(CLASS_INDICATION_HANDLER_WSMAN, CLASS_LISTENER_DESTINATION));
        assert_eq!(
            schema.family(CLASS_LISTENER_DESTINATION),
            [CLASS_INDICATION_HANDLER_WSMAN, CLASS_LISTENER_DESTINATION]
        );
    }
}
