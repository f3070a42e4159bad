//! Value conversion between the wire representation and typed CIM values.
//!
//! Wire values are untyped text, endpoint references and embedded
//! instances; the declared property type decides how text is parsed.
//! Conversion back renders each scalar in a form that parses to the same
//! value.

use super::{KeySelectors, RequestMapper};
use crate::{
    cim::{CimDateTime, CimType, CimValue, Instance, ObjectPath, Property},
    epr::{EndpointReference, NAMESPACE_SELECTOR, Selector, class_resource_uri},
    fault::Fault,
    schema::ClassDecl,
    value::{WsmInstance, WsmProperty, WsmValue},
};

impl RequestMapper {
    /// Convert a wire instance into a typed instance of `class`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaValidation` for a property `class` does not declare,
    /// or for an instance naming a different class, and
    /// `InvalidRepresentation` naming the property whose value does not
    /// convert.
    pub fn to_cim_instance(&self, wire: &WsmInstance, class: &ClassDecl) -> Result<Instance, Fault> {
        if !wire.class_name.is_empty() && !wire.class_name.eq_ignore_ascii_case(&class.name) {
            return Err(Fault::SchemaValidation(format!(
                "instance of {} does not match resource class {}",
                wire.class_name, class.name
            )));
        }
        let mut instance = Instance::new(class.name.clone());
        for property in &wire.properties {
            let decl = class.find_property(&property.name).ok_or_else(|| {
                Fault::SchemaValidation(format!(
                    "{} does not declare property {}",
                    class.name, property.name
                ))
            })?;
            let value = self.to_cim_value(&decl.name, decl.ty, decl.is_array, &property.value)?;
            instance.set_property(decl.name.clone(), value);
        }
        Ok(instance)
    }

    /// Convert one wire value to the declared type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRepresentation` naming `field` when the value has the
    /// wrong shape or its text does not parse.
    pub fn to_cim_value(
        &self,
        field: &str,
        ty: CimType,
        is_array: bool,
        value: &WsmValue,
    ) -> Result<CimValue, Fault> {
        match value {
            WsmValue::Null => Ok(CimValue::Null),
            WsmValue::Array(items) if is_array => items
                .iter()
                .map(|item| self.to_cim_value(field, ty, false, item))
                .collect::<Result<_, _>>()
                .map(CimValue::Array),
            WsmValue::Array(_) => Err(invalid(field, "unexpected array value")),
            scalar if is_array => Ok(CimValue::Array(vec![
                self.to_cim_value(field, ty, false, scalar)?,
            ])),
            WsmValue::Text(text) => parse_scalar(ty, text).map_err(|reason| invalid(field, &reason)),
            WsmValue::Reference(epr) if ty == CimType::Reference => self
                .object_path(epr, KeySelectors::All)
                .map(CimValue::Reference)
                .map_err(|fault| invalid(field, &fault.to_string())),
            WsmValue::Instance(embedded) if ty == CimType::Object => {
                let converted = match self.schema().class(&embedded.class_name) {
                    Some(class) => self.to_cim_instance(embedded, class)?,
                    None => self.untyped_instance(embedded)?,
                };
                Ok(CimValue::Object(Box::new(converted)))
            }
            WsmValue::Reference(_) | WsmValue::Instance(_) => {
                Err(invalid(field, &format!("value does not match declared type {ty:?}")))
            }
        }
    }

    /// Convert method input parameters, which carry no declared types.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRepresentation` for a parameter that does not convert.
    pub fn to_method_params(&self, input: &WsmInstance) -> Result<Vec<Property>, Fault> {
        input
            .properties
            .iter()
            .map(|p| {
                Ok(Property {
                    name: p.name.clone(),
                    value: self.untyped_value(&p.name, &p.value)?,
                })
            })
            .collect()
    }

    fn untyped_instance(&self, wire: &WsmInstance) -> Result<Instance, Fault> {
        let mut instance = Instance::new(wire.class_name.clone());
        for p in &wire.properties {
            instance.set_property(p.name.clone(), self.untyped_value(&p.name, &p.value)?);
        }
        Ok(instance)
    }

    fn untyped_value(&self, field: &str, value: &WsmValue) -> Result<CimValue, Fault> {
        match value {
            WsmValue::Null => Ok(CimValue::Null),
            WsmValue::Text(text) => Ok(CimValue::String(text.clone())),
            WsmValue::Reference(_) => self.to_cim_value(field, CimType::Reference, false, value),
            WsmValue::Instance(embedded) => Ok(CimValue::Object(Box::new(
                self.untyped_instance(embedded)?,
            ))),
            WsmValue::Array(items) => items
                .iter()
                .map(|item| self.untyped_value(field, item))
                .collect::<Result<_, _>>()
                .map(CimValue::Array),
        }
    }
}

fn invalid(field: &str, reason: &str) -> Fault {
    Fault::InvalidRepresentation {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Parse text as a scalar of type `ty`.
///
/// # Errors
///
/// Returns a description of why the text is not a valid `ty`.
pub fn parse_scalar(ty: CimType, text: &str) -> Result<CimValue, String> {
    let bad = |what: &str| format!("{text:?} is not a valid {what}");
    let value = match ty {
        CimType::Boolean => match text {
            t if t.eq_ignore_ascii_case("true") || t == "1" => CimValue::Boolean(true),
            t if t.eq_ignore_ascii_case("false") || t == "0" => CimValue::Boolean(false),
            _ => return Err(bad("boolean")),
        },
        CimType::Uint8 => CimValue::Uint8(text.parse().map_err(|_| bad("uint8"))?),
        CimType::Sint8 => CimValue::Sint8(text.parse().map_err(|_| bad("sint8"))?),
        CimType::Uint16 => CimValue::Uint16(text.parse().map_err(|_| bad("uint16"))?),
        CimType::Sint16 => CimValue::Sint16(text.parse().map_err(|_| bad("sint16"))?),
        CimType::Uint32 => CimValue::Uint32(text.parse().map_err(|_| bad("uint32"))?),
        CimType::Sint32 => CimValue::Sint32(text.parse().map_err(|_| bad("sint32"))?),
        CimType::Uint64 => CimValue::Uint64(text.parse().map_err(|_| bad("uint64"))?),
        CimType::Sint64 => CimValue::Sint64(text.parse().map_err(|_| bad("sint64"))?),
        CimType::Real32 => CimValue::Real32(parse_real(text).ok_or_else(|| bad("real32"))?),
        CimType::Real64 => CimValue::Real64(parse_real(text).ok_or_else(|| bad("real64"))?),
        CimType::Char16 => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if u32::from(c) <= 0xFFFF => CimValue::Char16(c),
                _ => return Err(bad("char16")),
            }
        }
        CimType::String => CimValue::String(text.to_owned()),
        CimType::DateTime => {
            CimValue::DateTime(CimDateTime::parse_wsm(text).map_err(|e| e.to_string())?)
        }
        CimType::Reference | CimType::Object => {
            return Err(format!("{ty:?} values cannot be given as text"));
        }
    };
    Ok(value)
}

/// Parse an `xs:float`/`xs:double` lexical value.
fn parse_real<T: std::str::FromStr + From<f32>>(text: &str) -> Option<T> {
    match text {
        "INF" => Some(T::from(f32::INFINITY)),
        "-INF" => Some(T::from(f32::NEG_INFINITY)),
        "NaN" => Some(T::from(f32::NAN)),
        t if t.chars().any(char::is_alphabetic) && !t.contains(['e', 'E']) => None,
        t => t.parse().ok(),
    }
}

fn real_text(value: f64, text: String) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        String::from(if value > 0.0 { "INF" } else { "-INF" })
    } else {
        text
    }
}

/// Render a typed value for the wire. References become endpoint references
/// at `address`.
#[must_use]
pub fn to_wsm_value(value: &CimValue, address: &str) -> WsmValue {
    let text = match value {
        CimValue::Null => return WsmValue::Null,
        CimValue::Boolean(v) => v.to_string(),
        CimValue::Uint8(v) => v.to_string(),
        CimValue::Sint8(v) => v.to_string(),
        CimValue::Uint16(v) => v.to_string(),
        CimValue::Sint16(v) => v.to_string(),
        CimValue::Uint32(v) => v.to_string(),
        CimValue::Sint32(v) => v.to_string(),
        CimValue::Uint64(v) => v.to_string(),
        CimValue::Sint64(v) => v.to_string(),
        CimValue::Real32(v) => real_text(f64::from(*v), v.to_string()),
        CimValue::Real64(v) => real_text(*v, v.to_string()),
        CimValue::Char16(v) => v.to_string(),
        CimValue::String(v) => v.clone(),
        CimValue::DateTime(v) => v.to_wsm_string(),
        CimValue::Reference(path) => return WsmValue::Reference(to_epr(path, address)),
        CimValue::Object(instance) => {
            return WsmValue::Instance(Box::new(to_wsm_instance(instance, address)));
        }
        CimValue::Array(items) => {
            return WsmValue::Array(items.iter().map(|v| to_wsm_value(v, address)).collect());
        }
    };
    WsmValue::Text(text)
}

/// Render a typed instance for the wire.
#[must_use]
pub fn to_wsm_instance(instance: &Instance, address: &str) -> WsmInstance {
    WsmInstance {
        class_name: instance.class_name.clone(),
        properties: instance
            .properties
            .iter()
            .map(|p| WsmProperty {
                name: p.name.clone(),
                value: to_wsm_value(&p.value, address),
            })
            .collect(),
    }
}

/// Endpoint reference addressing `path` at `address`.
#[must_use]
pub fn to_epr(path: &ObjectPath, address: &str) -> EndpointReference {
    let mut epr = EndpointReference::new(address, class_resource_uri(&path.class_name));
    if !path.namespace.is_empty() {
        epr = epr.with_selector(Selector::text(NAMESPACE_SELECTOR, path.namespace.clone()));
    }
    for key in &path.keys {
        epr = epr.with_selector(match to_wsm_value(&key.value, address) {
            WsmValue::Reference(inner) => Selector::reference(key.name.clone(), inner),
            WsmValue::Text(text) => Selector::text(key.name.clone(), text),
            _ => Selector::text(key.name.clone(), key.value.to_string()),
        });
    }
    epr
}
