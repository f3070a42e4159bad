//! Create and delete sagas for handler, filter and subscription triples.
//!
//! A Subscribe creates the handler, then the filter unless an existing one
//! is reused, then the subscription referencing both. A failed filter
//! create deletes the handler; a failed subscription create deletes the
//! owned filter and the handler. An Unsubscribe deletes the subscription,
//! answers the client, then deletes the owned filter and the handler.
//!
//! The controller never talks to the backend itself: every transition
//! returns the [`SagaAction`]s the processor must carry out, in order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use derive_more::Display;
use tracing::{debug, warn};

use super::{SubscribePlan, SubscriptionInfoTable, UnsubscribePlan};
use crate::{
    backend::{BackendError, BackendOp, BackendPayload},
    cim::ObjectPath,
    fault::Fault,
    metrics::{self, Outcome},
    request::{MessageId, Request},
    response::ResponseBody,
};

/// Backend step a saga is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SagaStep {
    #[display("create handler")]
    CreateHandler,
    #[display("create filter")]
    CreateFilter,
    #[display("create subscription")]
    CreateSubscription,
    #[display("delete subscription")]
    DeleteSubscription,
}

/// Why a saga deletes an object outside its main sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupKind {
    /// Undo of a create after a later step failed.
    Compensation,
    /// Filter or handler removal following a successful Unsubscribe.
    Unsubscribe,
}

/// Work the processor performs on behalf of a saga.
#[derive(Debug, PartialEq)]
pub enum SagaAction {
    /// Submit `op`; its reply advances the saga at `step`.
    Issue {
        saga: MessageId,
        step: SagaStep,
        op: BackendOp,
    },
    /// Submit a delete whose outcome is only logged.
    Cleanup {
        saga: MessageId,
        object: &'static str,
        kind: CleanupKind,
        op: BackendOp,
    },
    /// Answer the client request that started the saga.
    Respond {
        request: Request,
        body: Result<ResponseBody, Fault>,
    },
}

#[derive(Debug)]
enum Saga {
    Subscribe {
        request: Request,
        plan: SubscribePlan,
        awaiting: SagaStep,
    },
    Unsubscribe {
        request: Request,
        plan: UnsubscribePlan,
    },
}

impl Saga {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// In-flight subscription sagas, keyed by the originating message id.
#[derive(Debug)]
pub struct SubscriptionSagas {
    sagas: Mutex<HashMap<MessageId, Saga>>,
    info: Arc<SubscriptionInfoTable>,
}

impl SubscriptionSagas {
    #[must_use]
    pub fn new(info: Arc<SubscriptionInfoTable>) -> Self {
        Self {
            sagas: Mutex::new(HashMap::new()),
            info,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, Saga>> {
        self.sagas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of sagas awaiting a backend reply.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.lock().len() }

    /// Start a Subscribe; the first action creates the handler.
    pub fn begin_subscribe(&self, request: Request, plan: SubscribePlan) -> Vec<SagaAction> {
        let saga = request.message_id.clone();
        let op = BackendOp::CreateInstance {
            namespace: plan.namespace.clone(),
            instance: plan.handler.clone(),
        };
        debug!(saga = %saga, identifier = %plan.identifier, "subscribe saga started");
        self.lock().insert(
            saga.clone(),
            Saga::Subscribe {
                request,
                plan,
                awaiting: SagaStep::CreateHandler,
            },
        );
        vec![SagaAction::Issue {
            saga,
            step: SagaStep::CreateHandler,
            op,
        }]
    }

    /// Start an Unsubscribe; the first action deletes the subscription.
    pub fn begin_unsubscribe(&self, request: Request, plan: UnsubscribePlan) -> Vec<SagaAction> {
        let saga = request.message_id.clone();
        let op = BackendOp::DeleteInstance {
            path: plan.subscription_path.clone(),
        };
        debug!(saga = %saga, identifier = %plan.identifier, "unsubscribe saga started");
        self.lock()
            .insert(saga.clone(), Saga::Unsubscribe { request, plan });
        vec![SagaAction::Issue {
            saga,
            step: SagaStep::DeleteSubscription,
            op,
        }]
    }

    /// Apply the backend outcome of `step` to saga `id`.
    ///
    /// Returns no actions if the saga is unknown, for example after it was
    /// abandoned.
    pub fn advance(
        &self,
        id: &MessageId,
        step: SagaStep,
        result: Result<BackendPayload, BackendError>,
    ) -> Vec<SagaAction> {
        let mut sagas = self.lock();
        let Some(saga) = sagas.remove(id) else {
            warn!(saga = %id, %step, "reply for unknown subscription saga");
            return Vec::new();
        };
        let kind = saga.kind();
        let (next, actions) = match saga {
            Saga::Subscribe {
                request,
                plan,
                awaiting,
            } if awaiting == step => self.advance_subscribe(request, plan, step, result),
            Saga::Unsubscribe { request, plan } if step == SagaStep::DeleteSubscription => {
                (None, self.finish_unsubscribe(request, &plan, result))
            }
            Saga::Subscribe { request, .. } | Saga::Unsubscribe { request, .. } => {
                let fault = Fault::Internal(format!("{kind} saga received unexpected {step} reply"));
                (None, vec![SagaAction::Respond {
                    request,
                    body: Err(fault),
                }])
            }
        };
        match next {
            Some(saga) => {
                sagas.insert(id.clone(), saga);
            }
            None => {
                let outcome = match actions.iter().find_map(|a| match a {
                    SagaAction::Respond { body, .. } => Some(body.is_ok()),
                    _ => None,
                }) {
                    Some(true) => Outcome::Success,
                    _ => Outcome::Failure,
                };
                debug!(saga = %id, kind, ?outcome, "subscription saga finished");
                metrics::inc_subscription_sagas(kind, outcome);
            }
        }
        actions
    }

    fn advance_subscribe(
        &self,
        request: Request,
        plan: SubscribePlan,
        step: SagaStep,
        result: Result<BackendPayload, BackendError>,
    ) -> (Option<Saga>, Vec<SagaAction>) {
        let saga = request.message_id.clone();
        if let Err(error) = result {
            let mut actions = Vec::new();
            if step == SagaStep::CreateSubscription && plan.filter.is_some() {
                actions.push(cleanup(&saga, "filter", CleanupKind::Compensation, &plan.filter_path));
            }
            if step != SagaStep::CreateHandler {
                actions.push(cleanup(&saga, "handler", CleanupKind::Compensation, &plan.handler_path));
            }
            warn!(saga = %saga, %step, status = ?error.status, "subscribe step failed");
            actions.push(SagaAction::Respond {
                request,
                body: Err(Fault::from_backend(error.status, error.description)),
            });
            return (None, actions);
        }

        let next = match (step, &plan.filter) {
            (SagaStep::CreateHandler, Some(filter)) => Some((SagaStep::CreateFilter, filter.clone())),
            (SagaStep::CreateHandler | SagaStep::CreateFilter, _) => {
                Some((SagaStep::CreateSubscription, plan.subscription.clone()))
            }
            _ => None,
        };
        if let Some((step, instance)) = next {
            let op = BackendOp::CreateInstance {
                namespace: plan.namespace.clone(),
                instance,
            };
            return (
                Some(Saga::Subscribe {
                    request,
                    plan,
                    awaiting: step,
                }),
                vec![SagaAction::Issue { saga, step, op }],
            );
        }

        if let Some(name) = plan.reused_filter() {
            self.info.insert(plan.identifier.clone(), name);
        }
        let body = ResponseBody::Subscribe {
            manager: plan.manager.clone(),
            expires: plan.expires(),
        };
        (None, vec![SagaAction::Respond {
            request,
            body: Ok(body),
        }])
    }

    fn finish_unsubscribe(
        &self,
        request: Request,
        plan: &UnsubscribePlan,
        result: Result<BackendPayload, BackendError>,
    ) -> Vec<SagaAction> {
        let saga = request.message_id.clone();
        if let Err(error) = result {
            return vec![SagaAction::Respond {
                request,
                body: Err(Fault::from_backend(error.status, error.description)),
            }];
        }
        let mut actions = vec![SagaAction::Respond {
            request,
            body: Ok(ResponseBody::Unsubscribe),
        }];
        if self.info.remove(&plan.identifier).is_none() {
            actions.push(cleanup(&saga, "filter", CleanupKind::Unsubscribe, &plan.filter_path));
        }
        actions.push(cleanup(&saga, "handler", CleanupKind::Unsubscribe, &plan.handler_path));
        actions
    }

    /// Forget saga `id` without further backend calls.
    pub fn abandon(&self, id: &MessageId) -> bool {
        let removed = self.lock().remove(id);
        if let Some(saga) = &removed {
            warn!(saga = %id, kind = saga.kind(), "subscription saga abandoned");
            metrics::inc_subscription_sagas(saga.kind(), Outcome::Failure);
        }
        removed.is_some()
    }

    /// Discard every in-flight saga, returning their ids.
    pub fn drain(&self) -> Vec<MessageId> { self.lock().drain().map(|(id, _)| id).collect() }
}

fn cleanup(saga: &MessageId, object: &'static str, kind: CleanupKind, path: &ObjectPath) -> SagaAction {
    SagaAction::Cleanup {
        saga: saga.clone(),
        object,
        kind,
        op: BackendOp::DeleteInstance { path: path.clone() },
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        config::ProcessorConfig,
        epr::{EXISTING_FILTER_URI, EndpointReference, Selector, class_resource_uri},
        fault::CimStatus,
        request::{Operation, SubscribeParams},
        schema::{CLASS_INDICATION_FILTER, CLASS_INDICATION_HANDLER_WSMAN, CLASS_INDICATION_SUBSCRIPTION},
        subscription::plan::{plan_subscribe, plan_unsubscribe},
    };

    const ADDRESS: &str = "http://localhost:5985/wsman";

    #[rstest]
    #[case(SagaStep::CreateHandler, "create handler")]
    #[case(SagaStep::DeleteSubscription, "delete subscription")]
    fn steps_display_as_phrases(#[case] step: SagaStep, #[case] text: &str) {
        assert_eq!(step.to_string(), text);
    }

    struct Harness {
        info: Arc<SubscriptionInfoTable>,
        sagas: SubscriptionSagas,
    }

    #[fixture]
    fn harness() -> Harness {
        let info = Arc::new(SubscriptionInfoTable::new());
        Harness {
            sagas: SubscriptionSagas::new(Arc::clone(&info)),
            info,
        }
    }

    fn subscribe(epr: EndpointReference) -> (Request, SubscribePlan) {
        let params = SubscribeParams {
            notify_to: "http://listener/events".into(),
            ..SubscribeParams::default()
        };
        let request = Request::new("uuid:s1", "alice", epr, Operation::Subscribe(params.clone()));
        let plan = plan_subscribe(&ProcessorConfig::default(), &request, &params).expect("plan");
        (request, plan)
    }

    fn class_subscription() -> (Request, SubscribePlan) {
        subscribe(EndpointReference::new(ADDRESS, class_resource_uri("CIM_AlertIndication")))
    }

    fn created(class: &str) -> Result<BackendPayload, BackendError> {
        Ok(BackendPayload::Created(ObjectPath::class("root/PG_InterOp", class)))
    }

    fn failed() -> Result<BackendPayload, BackendError> {
        Err(BackendError::new(CimStatus::AccessDenied, "denied"))
    }

    fn issued(action: &SagaAction) -> (SagaStep, Option<&str>) {
        let SagaAction::Issue { step, op, .. } = action else {
            panic!("expected issue, got {action:?}");
        };
        (*step, op.class_name())
    }

    fn cleaned(action: &SagaAction) -> (&'static str, CleanupKind) {
        let SagaAction::Cleanup { object, kind, .. } = action else {
            panic!("expected cleanup, got {action:?}");
        };
        (object, *kind)
    }

    fn responded(action: &SagaAction) -> &Result<ResponseBody, Fault> {
        let SagaAction::Respond { body, .. } = action else {
            panic!("expected respond, got {action:?}");
        };
        body
    }

    #[rstest]
    fn creates_handler_filter_then_subscription(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        let actions = harness.sagas.begin_subscribe(request, plan);
        assert_eq!(issued(&actions[0]), (SagaStep::CreateHandler, Some(CLASS_INDICATION_HANDLER_WSMAN)));

        let actions = harness
            .sagas
            .advance(&id, SagaStep::CreateHandler, created(CLASS_INDICATION_HANDLER_WSMAN));
        assert_eq!(issued(&actions[0]), (SagaStep::CreateFilter, Some(CLASS_INDICATION_FILTER)));

        let actions = harness
            .sagas
            .advance(&id, SagaStep::CreateFilter, created(CLASS_INDICATION_FILTER));
        assert_eq!(
            issued(&actions[0]),
            (SagaStep::CreateSubscription, Some(CLASS_INDICATION_SUBSCRIPTION))
        );

        let actions = harness
            .sagas
            .advance(&id, SagaStep::CreateSubscription, created(CLASS_INDICATION_SUBSCRIPTION));
        assert!(matches!(responded(&actions[0]), Ok(ResponseBody::Subscribe { .. })));
        assert_eq!(harness.sagas.in_flight(), 0);
        assert!(harness.info.is_empty());
    }

    #[rstest]
    fn filter_failure_compensates_handler_only(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        harness
            .sagas
            .advance(&id, SagaStep::CreateHandler, created(CLASS_INDICATION_HANDLER_WSMAN));
        let actions = harness.sagas.advance(&id, SagaStep::CreateFilter, failed());
        assert_eq!(actions.len(), 2);
        assert_eq!(cleaned(&actions[0]), ("handler", CleanupKind::Compensation));
        assert_eq!(
            responded(&actions[1]).as_ref().map_err(Fault::subcode).err().map(|s| s.qname()),
            Some("wsman:AccessDenied")
        );
        assert_eq!(harness.sagas.in_flight(), 0);
    }

    #[rstest]
    fn subscription_failure_compensates_filter_then_handler(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        harness
            .sagas
            .advance(&id, SagaStep::CreateHandler, created(CLASS_INDICATION_HANDLER_WSMAN));
        harness
            .sagas
            .advance(&id, SagaStep::CreateFilter, created(CLASS_INDICATION_FILTER));
        let actions = harness.sagas.advance(&id, SagaStep::CreateSubscription, failed());
        assert_eq!(cleaned(&actions[0]), ("filter", CleanupKind::Compensation));
        assert_eq!(cleaned(&actions[1]), ("handler", CleanupKind::Compensation));
        assert!(responded(&actions[2]).is_err());
    }

    #[rstest]
    fn handler_failure_needs_no_compensation(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        let actions = harness.sagas.advance(&id, SagaStep::CreateHandler, failed());
        assert_eq!(actions.len(), 1);
        assert!(responded(&actions[0]).is_err());
    }

    #[rstest]
    fn reused_filter_skips_filter_create_and_is_recorded(harness: Harness) {
        let (request, plan) = subscribe(
            EndpointReference::new(ADDRESS, EXISTING_FILTER_URI)
                .with_selector(Selector::text("Name", "shared")),
        );
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        let actions = harness
            .sagas
            .advance(&id, SagaStep::CreateHandler, created(CLASS_INDICATION_HANDLER_WSMAN));
        assert_eq!(issued(&actions[0]).0, SagaStep::CreateSubscription);
        harness
            .sagas
            .advance(&id, SagaStep::CreateSubscription, created(CLASS_INDICATION_SUBSCRIPTION));
        assert_eq!(harness.info.get("s1").as_deref(), Some("shared"));
    }

    #[rstest]
    #[case(true, vec!["handler"])]
    #[case(false, vec!["filter", "handler"])]
    fn unsubscribe_responds_then_deletes_owned_objects(
        harness: Harness,
        #[case] reused: bool,
        #[case] deleted: Vec<&str>,
    ) {
        if reused {
            harness.info.insert("s1", "shared");
        }
        let plan = plan_unsubscribe(&ProcessorConfig::default(), &harness.info, "s1");
        let request = Request::new(
            "uuid:u1",
            "alice",
            EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_SUBSCRIPTION)),
            Operation::Unsubscribe {
                identifier: "s1".into(),
            },
        );
        let id = request.message_id.clone();
        let actions = harness.sagas.begin_unsubscribe(request, plan);
        assert_eq!(issued(&actions[0]).0, SagaStep::DeleteSubscription);

        let actions = harness
            .sagas
            .advance(&id, SagaStep::DeleteSubscription, Ok(BackendPayload::Empty));
        assert_eq!(responded(&actions[0]), &Ok(ResponseBody::Unsubscribe));
        let objects: Vec<_> = actions[1..].iter().map(|a| cleaned(a).0).collect();
        assert_eq!(objects, deleted);
        assert!(harness.info.is_empty());
    }

    #[rstest]
    fn unsubscribe_failure_deletes_nothing_else(harness: Harness) {
        let plan = plan_unsubscribe(&ProcessorConfig::default(), &harness.info, "s1");
        let request = Request::new(
            "uuid:u1",
            "alice",
            EndpointReference::new(ADDRESS, class_resource_uri(CLASS_INDICATION_SUBSCRIPTION)),
            Operation::Unsubscribe {
                identifier: "s1".into(),
            },
        );
        let id = request.message_id.clone();
        harness.sagas.begin_unsubscribe(request, plan);
        let actions = harness.sagas.advance(&id, SagaStep::DeleteSubscription, failed());
        assert_eq!(actions.len(), 1);
        assert!(responded(&actions[0]).is_err());
    }

    #[rstest]
    fn out_of_order_reply_ends_saga_with_internal_fault(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        let actions = harness
            .sagas
            .advance(&id, SagaStep::CreateSubscription, created(CLASS_INDICATION_SUBSCRIPTION));
        assert!(matches!(responded(&actions[0]), Err(Fault::Internal(_))));
        assert!(harness.sagas.advance(&id, SagaStep::CreateHandler, failed()).is_empty());
    }

    #[rstest]
    fn abandon_forgets_saga(harness: Harness) {
        let (request, plan) = class_subscription();
        let id = request.message_id.clone();
        harness.sagas.begin_subscribe(request, plan);
        assert!(harness.sagas.abandon(&id));
        assert!(!harness.sagas.abandon(&id));
        assert_eq!(harness.sagas.in_flight(), 0);
    }
}
