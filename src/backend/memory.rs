//! In-process backend over a schema-checked instance store.
//!
//! Supports instance CRUD, enumeration of instances and names across a
//! class and its subclasses, and `SELECT * FROM <class>` in WQL. Anything
//! else replies `NotSupported`. Operations execute in submission order;
//! each reply is sent from its own task, so replies reach the processor in
//! no particular order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{
    Backend,
    BackendError,
    BackendOp,
    BackendPayload,
    BackendRequest,
    BackendResponse,
    BackendUnavailable,
    ReplySender,
};
use crate::{
    cim::{Instance, ObjectPath},
    fault::CimStatus,
    schema::{ClassDecl, Schema},
};

#[derive(Debug)]
struct Injected {
    op: &'static str,
    class_name: Option<String>,
    error: BackendError,
}

#[derive(Debug, Default)]
struct State {
    /// Instances in creation order, keyed by path identity.
    instances: Vec<(String, Instance)>,
    calls: Vec<BackendOp>,
    failures: Vec<Injected>,
}

/// Memory-backed [`Backend`].
#[derive(Debug)]
pub struct MemoryBackend {
    schema: Arc<Schema>,
    state: Mutex<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Fail the next `op` (by [`BackendOp::name`]) on `class_name`, or on
    /// any class when `class_name` is `None`, with `error`.
    pub fn fail_next(&self, op: &'static str, class_name: Option<&str>, error: BackendError) {
        self.state().failures.push(Injected {
            op,
            class_name: class_name.map(str::to_owned),
            error,
        });
    }

    /// Operations received so far, in submission order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendOp> { self.state().calls.clone() }

    /// Number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize { self.state().instances.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Store an instance directly, bypassing the call log.
    ///
    /// # Errors
    ///
    /// Fails as a `CreateInstance` operation would.
    pub fn seed(&self, namespace: &str, instance: Instance) -> Result<ObjectPath, BackendError> {
        let mut state = self.state();
        self.create(&mut state, namespace, instance)
    }

    /// Execute one operation against the store.
    ///
    /// # Errors
    ///
    /// Returns the backend status describing why the operation failed.
    pub fn execute(&self, op: BackendOp) -> Result<BackendPayload, BackendError> {
        let mut state = self.state();
        state.calls.push(op.clone());
        if let Some(pos) = state.failures.iter().position(|f| {
            f.op == op.name()
                && f.class_name.as_deref().is_none_or(|class| {
                    op.class_name()
                        .is_some_and(|target| target.eq_ignore_ascii_case(class))
                })
        }) {
            return Err(state.failures.remove(pos).error);
        }

        match op {
            BackendOp::CreateInstance {
                namespace,
                instance,
            } => self
                .create(&mut state, &namespace, instance)
                .map(BackendPayload::Created),
            BackendOp::GetInstance { path } => {
                let identity = path.identity();
                state
                    .instances
                    .iter()
                    .find(|(id, _)| *id == identity)
                    .map(|(_, instance)| BackendPayload::Instance(instance.clone()))
                    .ok_or_else(|| not_found(&path))
            }
            BackendOp::ModifyInstance { instance } => {
                let path = instance.path.clone().ok_or_else(|| {
                    BackendError::new(CimStatus::InvalidParameter, "instance has no path")
                })?;
                let identity = path.identity();
                let (_, stored) = state
                    .instances
                    .iter_mut()
                    .find(|(id, _)| *id == identity)
                    .ok_or_else(|| not_found(&path))?;
                for property in instance.properties {
                    stored.set_property(property.name, property.value);
                }
                Ok(BackendPayload::Empty)
            }
            BackendOp::DeleteInstance { path } => {
                let identity = path.identity();
                let pos = state
                    .instances
                    .iter()
                    .position(|(id, _)| *id == identity)
                    .ok_or_else(|| not_found(&path))?;
                state.instances.remove(pos);
                Ok(BackendPayload::Empty)
            }
            BackendOp::EnumerateInstances {
                namespace,
                class_name,
            } => self
                .matching(&state, &namespace, &class_name)
                .map(BackendPayload::Instances),
            BackendOp::EnumerateInstanceNames {
                namespace,
                class_name,
            } => self.matching(&state, &namespace, &class_name).map(|found| {
                BackendPayload::Names(found.into_iter().filter_map(|i| i.path).collect())
            }),
            BackendOp::ExecQuery {
                namespace,
                language,
                query,
            } => {
                if !language.eq_ignore_ascii_case("WQL") {
                    return Err(BackendError::new(
                        CimStatus::QueryLanguageNotSupported,
                        format!("query language {language} is not supported"),
                    ));
                }
                let class_name = select_all_class(&query).ok_or_else(|| {
                    BackendError::new(CimStatus::InvalidQuery, format!("unsupported query: {query}"))
                })?;
                self.matching(&state, &namespace, class_name)
                    .map(BackendPayload::Instances)
            }
            other => Err(BackendError::new(
                CimStatus::NotSupported,
                format!("{} is not supported", other.name()),
            )),
        }
    }

    fn class(&self, name: &str) -> Result<&ClassDecl, BackendError> {
        self.schema
            .class(name)
            .ok_or_else(|| BackendError::new(CimStatus::InvalidClass, name.to_owned()))
    }

    fn create(
        &self,
        state: &mut State,
        namespace: &str,
        mut instance: Instance,
    ) -> Result<ObjectPath, BackendError> {
        let class = self.class(&instance.class_name)?;
        let mut path = ObjectPath::class(namespace, class.name.clone());
        for key in class.keys() {
            let value = instance.property(&key.name).cloned().ok_or_else(|| {
                BackendError::new(
                    CimStatus::InvalidParameter,
                    format!("key property {} is missing", key.name),
                )
            })?;
            path = path.with_key(key.name.clone(), value);
        }
        let identity = path.identity();
        if state.instances.iter().any(|(id, _)| *id == identity) {
            return Err(BackendError::new(
                CimStatus::AlreadyExists,
                path.to_string(),
            ));
        }
        instance.path = Some(path.clone());
        state.instances.push((identity, instance));
        Ok(path)
    }

    fn matching(
        &self,
        state: &State,
        namespace: &str,
        class_name: &str,
    ) -> Result<Vec<Instance>, BackendError> {
        let class = self.class(class_name)?;
        Ok(state
            .instances
            .iter()
            .map(|(_, instance)| instance)
            .filter(|instance| {
                instance
                    .path
                    .as_ref()
                    .is_some_and(|p| p.namespace.eq_ignore_ascii_case(namespace))
                    && self.schema.is_subclass_of(&instance.class_name, &class.name)
            })
            .cloned()
            .collect())
    }
}

fn not_found(path: &ObjectPath) -> BackendError { BackendError::new(CimStatus::NotFound, path.to_string()) }

/// Class named by `SELECT * FROM <class>`, the only query shape supported.
fn select_all_class(query: &str) -> Option<&str> {
    let mut words = query.split_whitespace();
    let select = words.next()?;
    let star = words.next()?;
    let from = words.next()?;
    let class = words.next()?;
    (select.eq_ignore_ascii_case("select")
        && star == "*"
        && from.eq_ignore_ascii_case("from")
        && words.next().is_none())
    .then_some(class)
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn submit(
        &self,
        request: BackendRequest,
        replies: ReplySender,
    ) -> Result<(), BackendUnavailable> {
        debug!(
            correlation_id = %request.correlation,
            op = request.op.name(),
            "memory backend executing"
        );
        let correlation = request.correlation;
        let result = self.execute(request.op);
        tokio::spawn(async move {
            replies.send(BackendResponse {
                correlation,
                result,
            });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        cim::CimValue,
        schema::{CLASS_INDICATION_FILTER, CLASS_INDICATION_HANDLER_WSMAN, CLASS_LISTENER_DESTINATION},
    };

    #[fixture]
    fn backend() -> MemoryBackend { MemoryBackend::new(Arc::new(Schema::indication_classes())) }

    fn handler(name: &str) -> Instance {
        Instance::new(CLASS_INDICATION_HANDLER_WSMAN)
            .with_property("SystemCreationClassName", CimValue::String("CIM_ComputerSystem".into()))
            .with_property("SystemName", CimValue::String("host".into()))
            .with_property(
                "CreationClassName",
                CimValue::String(CLASS_INDICATION_HANDLER_WSMAN.into()),
            )
            .with_property("Name", CimValue::String(name.into()))
    }

    #[rstest]
    fn create_then_duplicate_is_already_exists(backend: MemoryBackend) {
        let path = backend.seed("root/interop", handler("h1")).expect("first create");
        assert_eq!(path.key("Name"), Some(&CimValue::String("h1".into())));
        let err = backend
            .seed("root/interop", handler("h1"))
            .expect_err("duplicate create");
        assert_eq!(err.status, CimStatus::AlreadyExists);
    }

    #[rstest]
    fn enumeration_includes_subclasses_in_namespace(backend: MemoryBackend) {
        backend.seed("root/interop", handler("a")).expect("seed a");
        backend.seed("root/other", handler("b")).expect("seed b");
        let result = backend.execute(BackendOp::EnumerateInstanceNames {
            namespace: "root/interop".into(),
            class_name: CLASS_LISTENER_DESTINATION.into(),
        });
        let Ok(BackendPayload::Names(names)) = result else {
            panic!("expected names, got {result:?}");
        };
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].class_name, CLASS_INDICATION_HANDLER_WSMAN);
    }

    #[rstest]
    fn injected_failure_fires_once(backend: MemoryBackend) {
        backend.fail_next(
            "create_instance",
            Some(CLASS_INDICATION_FILTER),
            BackendError::new(CimStatus::Failed, "boom"),
        );
        let create = |name: &str| BackendOp::CreateInstance {
            namespace: "root/interop".into(),
            instance: handler(name),
        };
        assert!(backend.execute(create("h")).is_ok(), "other classes unaffected");
        let filter = Instance::new(CLASS_INDICATION_FILTER);
        let op = BackendOp::CreateInstance {
            namespace: "root/interop".into(),
            instance: filter,
        };
        assert_eq!(
            backend.execute(op.clone()).map_err(|e| e.status),
            Err(CimStatus::Failed)
        );
        assert_eq!(
            backend.execute(op).map_err(|e| e.status),
            Err(CimStatus::InvalidParameter)
        );
        assert_eq!(backend.calls().len(), 3);
    }

    #[rstest]
    #[case("SELECT * FROM CIM_ListenerDestination", Some("CIM_ListenerDestination"))]
    #[case("select *   from X", Some("X"))]
    #[case("SELECT Name FROM X", None)]
    #[case("SELECT * FROM X WHERE Name = 'a'", None)]
    fn parses_select_all(#[case] query: &str, #[case] expected: Option<&str>) {
        assert_eq!(select_all_class(query), expected);
    }

    #[rstest]
    fn unsupported_operations_reply_not_supported(backend: MemoryBackend) {
        let result = backend.execute(BackendOp::InvokeMethod {
            path: ObjectPath::class("root/interop", CLASS_INDICATION_FILTER),
            method: "Reset".into(),
            params: Vec::new(),
        });
        assert_eq!(result.map_err(|e| e.status), Err(CimStatus::NotSupported));
    }
}
