//! Event loop and dispatch for [`Processor`].

use std::{
    panic::AssertUnwindSafe,
    time::Duration,
};

use futures::FutureExt;
use log::{info, warn as log_warn};
use tracing::{debug, error, warn};

use super::{PRODUCT_VENDOR, PROTOCOL_VERSION, Pending, Processor, ProcessorError};
use crate::{
    backend::{BackendError, BackendOp, BackendPayload, BackendRequest, BackendResponse, ReplySender},
    correlation::CorrelationId,
    encoder::EncodeError,
    enumeration::{OpenEnumeration, spawn_sweeper},
    fault::{CimStatus, EncodingLimitKind, Fault},
    metrics::{self, Outcome},
    panic::{PanicSite, internal_fault, panic_text},
    request::{EnumerateParams, MessageId, Operation, Request},
    response::{IdentifyInfo, OutboundResponse, Response, ResponseBody},
    schema::CLASS_INDICATION_SUBSCRIPTION,
    subscription::{
        CleanupKind,
        SagaAction,
        plan::{plan_subscribe, plan_unsubscribe},
    },
};

enum Event {
    Shutdown,
    Reply(BackendResponse),
    Request(Request),
    Closed,
}

impl Processor {
    /// Run until shut down through a [`ProcessorHandle`](super::ProcessorHandle)
    /// or until every handle is dropped.
    ///
    /// Backend replies are preferred over new requests so in-flight work
    /// completes first. On exit all enumeration contexts are discarded and
    /// unfinished sagas and correlations are logged.
    pub async fn run(mut self) {
        info!("wsman processor started");
        spawn_sweeper(
            self.contexts(),
            self.config.sweep_interval,
            self.shutdown.clone(),
            &self.tracker,
        );
        if self.config.warm_up_subscriptions {
            let op = BackendOp::EnumerateInstances {
                namespace: self.config.interop_namespace.clone(),
                class_name: CLASS_INDICATION_SUBSCRIPTION.into(),
            };
            self.issue(Pending::InfoTableWarmup, op).await;
        }

        loop {
            match self.next_event().await {
                Event::Shutdown | Event::Closed => break,
                Event::Reply(reply) => self.on_reply(reply).await,
                Event::Request(request) => self.on_request(request).await,
            }
        }
        self.teardown().await;
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => Event::Shutdown,
            Some(reply) = self.replies.recv() => Event::Reply(reply),
            request = self.requests.recv() => request.map_or(Event::Closed, Event::Request),
        }
    }

    async fn teardown(&mut self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let contexts = self.contexts.drain();
        let sagas = self.sagas.drain();
        for saga in &sagas {
            warn!(saga = %saga, "subscription saga left incomplete at shutdown");
        }
        let pending = self.pending.drain();
        if !pending.is_empty() {
            log_warn!("{} backend replies still outstanding at shutdown", pending.len());
        }
        info!(
            "wsman processor stopped: discarded {contexts} enumeration contexts, {} sagas",
            sagas.len()
        );
    }

    async fn on_request(&mut self, request: Request) {
        let relates_to = request.message_id.clone();
        let outcome = AssertUnwindSafe(self.handle_request(request))
            .catch_unwind()
            .await;
        if let Err(payload) = outcome {
            let panic = panic_text(payload.as_ref());
            error!(message_id = %relates_to, %panic, "request handling panicked");
            self.sagas.abandon(&relates_to);
            self.emit_fault(relates_to, internal_fault(PanicSite::Request, payload.as_ref()));
        }
    }

    async fn on_reply(&mut self, reply: BackendResponse) {
        let pending = match self.take_pending(reply.correlation) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "dropping backend reply");
                metrics::inc_unknown_correlations();
                return;
            }
        };
        let relates_to = pending.relates_to();
        let outcome = AssertUnwindSafe(self.resume(pending, reply.result))
            .catch_unwind()
            .await;
        if let Err(payload) = outcome {
            let panic = panic_text(payload.as_ref());
            error!(correlation_id = %reply.correlation, %panic, "reply handling panicked");
            if let Some(relates_to) = relates_to {
                self.sagas.abandon(&relates_to);
                self.emit_fault(relates_to, internal_fault(PanicSite::Reply, payload.as_ref()));
            }
        }
    }

    fn take_pending(&mut self, correlation: CorrelationId) -> Result<Pending, ProcessorError> {
        self.pending
            .remove(correlation)
            .ok_or(ProcessorError::UnknownCorrelation(correlation))
    }

    async fn handle_request(&mut self, request: Request) {
        debug!(message_id = %request.message_id, kind = %request.kind(), "request received");
        let limit = match self.envelope_limit(&request) {
            Ok(limit) => limit,
            Err(fault) => return self.respond(&request, Err(fault)),
        };
        match &request.operation {
            Operation::Identify => {
                let body = ResponseBody::Identify(IdentifyInfo {
                    protocol_version: PROTOCOL_VERSION.into(),
                    product_vendor: PRODUCT_VENDOR.into(),
                    product_version: env!("CARGO_PKG_VERSION").into(),
                });
                self.respond(&request, Ok(body));
            }
            Operation::Pull {
                context,
                max_elements,
            } => {
                let page = self
                    .contexts
                    .pull(&request, context, *max_elements, &*self.encoder, limit);
                match page {
                    Ok(page) => self.emit(
                        Response::success(request.message_id.clone(), ResponseBody::Pull(page.page)),
                        page.payload,
                    ),
                    Err(fault) => self.respond(&request, Err(fault)),
                }
            }
            Operation::Release { context } => {
                let released = self.contexts.release(&request, context);
                self.respond(&request, released.map(|()| ResponseBody::Release));
            }
            Operation::Subscribe(params) => {
                match plan_subscribe(&self.config, &request, params) {
                    Ok(plan) => {
                        let actions = self.sagas.begin_subscribe(request, plan);
                        self.apply(actions).await;
                    }
                    Err(fault) => self.respond(&request, Err(fault)),
                }
            }
            Operation::Unsubscribe { identifier } => {
                let plan = plan_unsubscribe(&self.config, &self.info, identifier);
                let actions = self.sagas.begin_unsubscribe(request, plan);
                self.apply(actions).await;
            }
            Operation::Enumerate(params) => {
                let prepared = self
                    .config
                    .resolve_expiration(params.expires.as_deref())
                    .and_then(|lifetime| Ok((lifetime, self.mapper.map_request(&request)?)));
                match prepared {
                    Ok((lifetime, Some(op))) => {
                        self.issue(Pending::Enumerate { request, lifetime }, op).await;
                    }
                    Ok((_, None)) => self.respond(&request, Err(unmapped(&request))),
                    Err(fault) => self.respond(&request, Err(fault)),
                }
            }
            Operation::Get
            | Operation::Put(_)
            | Operation::Create(_)
            | Operation::Delete
            | Operation::Invoke { .. } => match self.mapper.map_request(&request) {
                Ok(Some(op)) => self.issue(Pending::Client(request), op).await,
                Ok(None) => self.respond(&request, Err(unmapped(&request))),
                Err(fault) => self.respond(&request, Err(fault)),
            },
        }
    }

    async fn resume(&mut self, pending: Pending, result: Result<BackendPayload, BackendError>) {
        match pending {
            Pending::Client(request) => {
                let body = result
                    .map_err(backend_fault)
                    .and_then(|payload| self.mapper.map_response(&request, payload));
                self.respond(&request, body);
            }
            Pending::Enumerate { request, lifetime } => self.finish_enumerate(&request, lifetime, result),
            Pending::SagaStep { saga, step } => {
                let actions = self.sagas.advance(&saga, step, result);
                self.apply(actions).await;
            }
            Pending::Cleanup { saga, object, kind } => {
                let outcome = match &result {
                    Ok(_) => {
                        debug!(saga = %saga, object, ?kind, "cleanup delete succeeded");
                        Outcome::Success
                    }
                    Err(error) => {
                        warn!(saga = %saga, object, ?kind, %error, "cleanup delete failed");
                        Outcome::Failure
                    }
                };
                if kind == CleanupKind::Compensation {
                    metrics::inc_compensating_deletes(outcome);
                }
            }
            Pending::InfoTableWarmup => match result {
                Ok(BackendPayload::Instances(subscriptions)) => {
                    let recorded = self.info.rebuild_from(&subscriptions);
                    info!("subscription info table warmed up with {recorded} reused filters");
                }
                Ok(other) => warn!(payload = ?other, "unexpected subscription warm-up reply"),
                Err(error) => warn!(%error, "subscription warm-up failed"),
            },
        }
    }

    fn finish_enumerate(
        &self,
        request: &Request,
        lifetime: Duration,
        result: Result<BackendPayload, BackendError>,
    ) {
        let Operation::Enumerate(params) = &request.operation else {
            return self.respond(request, Err(Fault::internal("enumerate continuation without enumerate")));
        };
        let opened = result
            .map_err(backend_fault)
            .and_then(|payload| self.mapper.enumeration_items(request, params.mode, payload))
            .and_then(|items| {
                let limit = self.envelope_limit(request)?;
                self.contexts.open(
                    request,
                    OpenEnumeration {
                        mode: params.mode,
                        lifetime,
                        first_page: first_page(params),
                        report_total: params.request_total_items,
                        items,
                    },
                    &*self.encoder,
                    limit,
                )
            });
        match opened {
            Ok(page) => self.emit(
                Response::success(request.message_id.clone(), ResponseBody::Enumerate(page.page)),
                page.payload,
            ),
            Err(fault) => self.respond(request, Err(fault)),
        }
    }

    async fn apply(&mut self, actions: Vec<SagaAction>) {
        for action in actions {
            match action {
                SagaAction::Issue { saga, step, op } => {
                    self.issue(Pending::SagaStep { saga, step }, op).await;
                }
                SagaAction::Cleanup {
                    saga,
                    object,
                    kind,
                    op,
                } => self.issue(Pending::Cleanup { saga, object, kind }, op).await,
                SagaAction::Respond { request, body } => self.respond(&request, body),
            }
        }
    }

    /// Park `pending` and submit `op`. A refused submission is fed back as
    /// a failed reply so the continuation still runs exactly once.
    async fn issue(&mut self, pending: Pending, op: BackendOp) {
        let correlation = self.pending.insert(pending);
        debug!(correlation_id = %correlation, op = op.name(), "submitting backend operation");
        let request = BackendRequest { correlation, op };
        let replies = ReplySender::new(self.reply_tx.clone());
        if let Err(err) = self.backend.submit(request, replies).await {
            warn!(correlation_id = %correlation, error = %err, "backend refused submission");
            let _ = self.reply_tx.send(BackendResponse {
                correlation,
                result: Err(BackendError::new(CimStatus::Failed, err.to_string())),
            });
        }
    }

    fn envelope_limit(&self, request: &Request) -> Result<usize, Fault> {
        let size = match request.max_envelope_size {
            None => self.config.default_max_envelope_size,
            Some(requested) if requested < self.config.min_envelope_size => {
                return Err(Fault::EncodingLimit(EncodingLimitKind::MinimumEnvelopeLimit {
                    requested,
                    minimum: self.config.min_envelope_size,
                }));
            }
            Some(requested) => requested,
        };
        Ok(usize::try_from(size).unwrap_or(usize::MAX))
    }

    /// Encode and send a single-shot response to `request`.
    fn respond(&self, request: &Request, body: Result<ResponseBody, Fault>) {
        let relates_to = request.message_id.clone();
        let body = match body {
            Ok(body) => body,
            Err(fault) => return self.emit_fault(relates_to, fault),
        };
        let limit = self
            .envelope_limit(request)
            .unwrap_or(usize::try_from(self.config.default_max_envelope_size).unwrap_or(usize::MAX));
        let response = Response::success(relates_to.clone(), body);
        match self.encoder.encode(&response, limit) {
            Ok(payload) => self.emit(response, payload),
            Err(EncodeError::EnvelopeTooLarge { size, limit }) => {
                let kind = if request.kind().is_side_effecting() {
                    EncodingLimitKind::UnreportableSuccess
                } else {
                    EncodingLimitKind::MaxEnvelopeSize { size, limit }
                };
                self.emit_fault(relates_to, Fault::EncodingLimit(kind));
            }
        }
    }

    fn emit_fault(&self, relates_to: MessageId, fault: Fault) {
        let response = Response::fault(relates_to, fault);
        match self.encoder.encode(&response, usize::MAX) {
            Ok(payload) => self.emit(response, payload),
            Err(err) => error!(message_id = %response.relates_to, error = %err, "fault could not be encoded"),
        }
    }

    fn emit(&self, response: Response, payload: bytes::Bytes) {
        if let Err(fault) = &response.body {
            debug!(
                message_id = %response.relates_to,
                category = fault.category().as_str(),
                %fault,
                "request faulted"
            );
            metrics::inc_faults(fault.category());
        }
        let outbound = OutboundResponse {
            relates_to: response.relates_to.clone(),
            response,
            payload,
        };
        if self.outbound.send(outbound).is_err() {
            log_warn!("response receiver dropped; discarding response");
        }
    }
}

fn backend_fault(error: BackendError) -> Fault { Fault::from_backend(error.status, error.description) }

fn unmapped(request: &Request) -> Fault {
    Fault::internal(format!("{} has no backend operation", request.kind()))
}

/// Items on the first page: none unless optimized, one unless specified.
fn first_page(params: &EnumerateParams) -> u32 {
    if params.optimized {
        params.max_elements.unwrap_or(1)
    } else {
        0
    }
}
