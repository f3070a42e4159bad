//! Backend results to protocol response bodies.

use super::{
    RequestMapper,
    convert::{to_epr, to_wsm_instance, to_wsm_value},
};
use crate::{
    backend::BackendPayload,
    cim::{Instance, ObjectPath},
    fault::Fault,
    request::{EnumerationMode, Operation, Request},
    response::{EnumerationItem, ResponseBody},
    value::{WsmInstance, WsmProperty},
};

impl RequestMapper {
    /// Map a successful backend result for a transfer or invoke request.
    ///
    /// # Errors
    ///
    /// Returns an internal fault if the payload does not fit the operation.
    pub fn map_response(&self, request: &Request, payload: BackendPayload) -> Result<ResponseBody, Fault> {
        let address = request.epr.address.as_str();
        match (&request.operation, payload) {
            (Operation::Get, BackendPayload::Instance(instance)) => {
                Ok(ResponseBody::Get(to_wsm_instance(&instance, address)))
            }
            (Operation::Put(body), BackendPayload::Empty) => Ok(ResponseBody::Put(body.clone())),
            (Operation::Put(_), BackendPayload::Instance(instance)) => {
                Ok(ResponseBody::Put(to_wsm_instance(&instance, address)))
            }
            (Operation::Create(_), BackendPayload::Created(path)) => {
                Ok(ResponseBody::Create(to_epr(&path, address)))
            }
            (Operation::Delete, BackendPayload::Empty) => Ok(ResponseBody::Delete),
            (
                Operation::Invoke { method, .. },
                BackendPayload::MethodResult {
                    return_value,
                    out_params,
                },
            ) => {
                let mut output = WsmInstance::new(format!("{method}_OUTPUT"))
                    .with_property("ReturnValue", to_wsm_value(&return_value, address));
                output.properties.extend(out_params.iter().map(|p| WsmProperty {
                    name: p.name.clone(),
                    value: to_wsm_value(&p.value, address),
                }));
                Ok(ResponseBody::Invoke(output))
            }
            (operation, payload) => Err(Fault::Internal(format!(
                "unexpected backend result {payload:?} for {}",
                operation.kind()
            ))),
        }
    }

    /// Materialise the full ordered item list of an enumeration.
    ///
    /// # Errors
    ///
    /// Returns an internal fault if the payload is not an enumeration result
    /// or lacks the paths `mode` needs.
    pub fn enumeration_items(
        &self,
        request: &Request,
        mode: EnumerationMode,
        payload: BackendPayload,
    ) -> Result<Vec<EnumerationItem>, Fault> {
        let address = request.epr.address.as_str();
        match (mode, payload) {
            (EnumerationMode::Objects, BackendPayload::Instances(instances)) => Ok(instances
                .iter()
                .map(|i| EnumerationItem::Object(to_wsm_instance(i, address)))
                .collect()),
            (EnumerationMode::EndpointReferences, BackendPayload::Names(paths)) => Ok(paths
                .iter()
                .map(|p| EnumerationItem::EndpointReference(to_epr(p, address)))
                .collect()),
            (EnumerationMode::EndpointReferences, BackendPayload::Instances(instances)) => {
                instances
                    .iter()
                    .map(|i| Ok(EnumerationItem::EndpointReference(to_epr(instance_path(i)?, address))))
                    .collect()
            }
            (EnumerationMode::ObjectsAndEndpointReferences, BackendPayload::Instances(instances)) => {
                instances
                    .iter()
                    .map(|i| {
                        Ok(EnumerationItem::ObjectAndEndpointReference {
                            object: to_wsm_instance(i, address),
                            epr: to_epr(instance_path(i)?, address),
                        })
                    })
                    .collect()
            }
            (mode, payload) => Err(Fault::Internal(format!(
                "unexpected backend result {payload:?} for {mode:?} enumeration"
            ))),
        }
    }
}

fn instance_path(instance: &Instance) -> Result<&ObjectPath, Fault> {
    instance
        .path
        .as_ref()
        .ok_or_else(|| Fault::Internal(format!("instance of {} has no path", instance.class_name)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cim::{CimValue, Property},
        epr::{EndpointReference, class_resource_uri},
        fault::FaultCategory,
        schema::Schema,
        value::WsmValue,
    };

    fn mapper() -> RequestMapper { RequestMapper::new(Arc::new(Schema::indication_classes()), "root/cimv2") }

    fn request(operation: Operation) -> Request {
        Request::new(
            "uuid:r",
            "alice",
            EndpointReference::new("http://host/wsman", class_resource_uri("CIM_IndicationFilter")),
            operation,
        )
    }

    #[test]
    fn invoke_output_carries_return_value_first() {
        let body = mapper()
            .map_response(
                &request(Operation::Invoke {
                    method: "Reset".into(),
                    input: WsmInstance::default(),
                }),
                BackendPayload::MethodResult {
                    return_value: CimValue::Uint32(0),
                    out_params: vec![Property {
                        name: "Log".into(),
                        value: CimValue::String("ok".into()),
                    }],
                },
            )
            .expect("maps");
        let ResponseBody::Invoke(output) = body else {
            panic!("expected invoke body");
        };
        assert_eq!(output.class_name, "Reset_OUTPUT");
        assert_eq!(output.properties[0].name, "ReturnValue");
        assert_eq!(output.property("Log"), Some(&WsmValue::text("ok")));
    }

    #[test]
    fn objects_and_eprs_need_paths() {
        let mut with_path = Instance::new("CIM_IndicationFilter");
        with_path.path = Some(ObjectPath::class("root/interop", "CIM_IndicationFilter"));
        let request = request(Operation::Get);
        let items = mapper()
            .enumeration_items(
                &request,
                EnumerationMode::ObjectsAndEndpointReferences,
                BackendPayload::Instances(vec![with_path]),
            )
            .expect("maps");
        assert!(matches!(items[0], EnumerationItem::ObjectAndEndpointReference { .. }));

        let fault = mapper()
            .enumeration_items(
                &request,
                EnumerationMode::ObjectsAndEndpointReferences,
                BackendPayload::Instances(vec![Instance::new("CIM_IndicationFilter")]),
            )
            .expect_err("no path");
        assert_eq!(fault.category(), FaultCategory::Internal);
    }

    #[test]
    fn mismatched_payload_is_internal_fault() {
        let fault = mapper()
            .map_response(&request(Operation::Delete), BackendPayload::Names(Vec::new()))
            .expect_err("mismatch");
        assert_eq!(fault.category(), FaultCategory::Internal);
    }
}
