//! Backend-side object model: typed values, instances and object paths.

pub mod datetime;

use std::fmt;

pub use datetime::{CimDateTime, DateTimeError, Interval, TimeOfDay, Timestamp};

/// Declared type of a property or key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CimType {
    Boolean,
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Uint32,
    Sint32,
    Uint64,
    Sint64,
    Real32,
    Real64,
    Char16,
    String,
    DateTime,
    Reference,
    Object,
}

/// Typed value held by the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum CimValue {
    Null,
    Boolean(bool),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
    Real32(f32),
    Real64(f64),
    Char16(char),
    String(String),
    DateTime(CimDateTime),
    Reference(ObjectPath),
    Object(Box<Instance>),
    Array(Vec<CimValue>),
}

impl CimValue {
    /// String content, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Referenced path, if this is a reference value.
    #[must_use]
    pub fn as_reference(&self) -> Option<&ObjectPath> {
        match self {
            Self::Reference(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for CimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Self::Uint8(v) => write!(f, "{v}"),
            Self::Sint8(v) => write!(f, "{v}"),
            Self::Uint16(v) => write!(f, "{v}"),
            Self::Sint16(v) => write!(f, "{v}"),
            Self::Uint32(v) => write!(f, "{v}"),
            Self::Sint32(v) => write!(f, "{v}"),
            Self::Uint64(v) => write!(f, "{v}"),
            Self::Sint64(v) => write!(f, "{v}"),
            Self::Real32(v) => write!(f, "{v}"),
            Self::Real64(v) => write!(f, "{v}"),
            Self::Char16(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::DateTime(v) => write!(f, "\"{}\"", v.to_cim_string()),
            Self::Reference(v) => write!(f, "{:?}", v.to_string()),
            Self::Object(v) => write!(f, "instance of {}", v.class_name),
            Self::Array(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// One key property of an object path.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyBinding {
    pub name: String,
    pub value: CimValue,
}

/// Fully qualified reference to a class or instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPath {
    pub host: String,
    pub namespace: String,
    pub class_name: String,
    pub keys: Vec<KeyBinding>,
}

impl ObjectPath {
    /// Class-level path without key bindings.
    #[must_use]
    pub fn class(namespace: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            host: String::new(),
            namespace: namespace.into(),
            class_name: class_name.into(),
            keys: Vec::new(),
        }
    }

    /// Append a key binding, returning the updated path.
    #[must_use]
    pub fn with_key(mut self, name: impl Into<String>, value: CimValue) -> Self {
        self.keys.push(KeyBinding {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up a key binding by case-insensitive name.
    #[must_use]
    pub fn key(&self, name: &str) -> Option<&CimValue> {
        self.keys
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(name))
            .map(|k| &k.value)
    }

    /// Host-independent identity, insensitive to key order and name case.
    #[must_use]
    pub fn identity(&self) -> String {
        let mut keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("{}={}", k.name.to_ascii_lowercase(), k.value))
            .collect();
        keys.sort();
        format!(
            "{}:{}.{}",
            self.namespace.to_ascii_lowercase(),
            self.class_name.to_ascii_lowercase(),
            keys.join(",")
        )
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.host.is_empty() {
            write!(f, "//{}/", self.host)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}:", self.namespace)?;
        }
        f.write_str(&self.class_name)?;
        for (i, key) in self.keys.iter().enumerate() {
            f.write_str(if i == 0 { "." } else { "," })?;
            write!(f, "{}={}", key.name, key.value)?;
        }
        Ok(())
    }
}

/// Named property value of an [`Instance`].
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: CimValue,
}

/// Object held by the backend, optionally carrying its own path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    pub class_name: String,
    pub path: Option<ObjectPath>,
    pub properties: Vec<Property>,
}

impl Instance {
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            path: None,
            properties: Vec::new(),
        }
    }

    /// Append a property, returning the updated instance.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: CimValue) -> Self {
        self.set_property(name, value);
        self
    }

    /// Set a property, replacing any existing value of the same name.
    pub fn set_property(&mut self, name: impl Into<String>, value: CimValue) {
        let name = name.into();
        match self
            .properties
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.value = value,
            None => self.properties.push(Property { name, value }),
        }
    }

    /// Look up a property by case-insensitive name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&CimValue> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }
}
