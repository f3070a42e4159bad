//! Enumeration contexts: server-held cursors over paginated results.
//!
//! A context is created when an Enumerate leaves items unsent after its
//! first page and is consumed by Pull until the sequence is exhausted. Each
//! operation holds the table lock across lookup, page encoding and the
//! retain-or-evict decision, so the stored remainder always matches what
//! was actually sent. Items leave the stored sequence only after the page
//! carrying them has been encoded.

mod sweep;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

pub use self::sweep::spawn_sweeper;
use crate::{
    encoder::{EncodeError, PageHeader, PageKind, ResponseEncoder},
    epr::EndpointReference,
    fault::{EncodingLimitKind, Fault},
    metrics,
    request::{EnumerationMode, Request},
    response::{EnumerationItem, EnumerationPage},
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Next process-wide context id. Ids are never reused.
fn next_context_id() -> u64 { NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed) }

/// A retained cursor and the items not yet delivered.
#[derive(Debug)]
pub struct EnumerationContext {
    identity: String,
    epr: EndpointReference,
    mode: EnumerationMode,
    expires_at: Instant,
    report_total: bool,
    items: VecDeque<EnumerationItem>,
}

impl EnumerationContext {
    #[must_use]
    pub fn mode(&self) -> EnumerationMode { self.mode }

    #[must_use]
    pub fn remaining(&self) -> usize { self.items.len() }

    fn is_expired(&self, now: Instant) -> bool { self.expires_at <= now }

    fn owned_by(&self, request: &Request) -> bool {
        self.identity == request.identity && self.epr == request.epr
    }
}

/// Parameters for the first page of an enumeration.
#[derive(Debug)]
pub struct OpenEnumeration {
    pub mode: EnumerationMode,
    pub lifetime: Duration,
    /// Items to place on the first page at most.
    pub first_page: u32,
    pub report_total: bool,
    pub items: Vec<EnumerationItem>,
}

/// An encoded page and its structured form.
#[derive(Debug)]
pub struct EncodedPage {
    pub page: EnumerationPage,
    pub payload: Bytes,
}

/// Table of live enumeration contexts.
#[derive(Debug, Default)]
pub struct EnumerationContexts {
    contexts: Mutex<HashMap<u64, EnumerationContext>>,
}

impl EnumerationContexts {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, EnumerationContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live contexts.
    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Items still held by context `id`, if it exists.
    #[must_use]
    pub fn remaining(&self, id: &str) -> Option<usize> {
        let id = id.parse::<u64>().ok()?;
        self.lock().get(&id).map(EnumerationContext::remaining)
    }

    /// Encode the first page of a new enumeration, retaining a context if
    /// items remain.
    ///
    /// # Errors
    ///
    /// Returns an encoding-limit fault if no item fits the envelope while
    /// items were requested; no context is retained in that case.
    pub fn open(
        &self,
        request: &Request,
        open: OpenEnumeration,
        encoder: &dyn ResponseEncoder,
        limit: usize,
    ) -> Result<EncodedPage, Fault> {
        let id = next_context_id();
        let mut items: VecDeque<_> = open.items.into();
        let header = PageHeader {
            relates_to: request.message_id.clone(),
            kind: PageKind::Enumerate,
            context: Some(id.to_string()),
            total_items: open.report_total.then_some(items.len() as u64),
        };
        let mut contexts = self.lock();
        let page = fill_page(encoder, &header, limit, &mut items, open.first_page)?;
        if page.page.end_of_sequence {
            debug!(message_id = %request.message_id, "enumeration completed in one page");
        } else {
            debug!(
                message_id = %request.message_id,
                context_id = id,
                remaining = items.len(),
                "enumeration context opened"
            );
            contexts.insert(
                id,
                EnumerationContext {
                    identity: request.identity.clone(),
                    epr: request.epr.clone(),
                    mode: open.mode,
                    expires_at: Instant::now() + open.lifetime,
                    report_total: open.report_total,
                    items,
                },
            );
            metrics::set_enumeration_contexts(contexts.len());
        }
        Ok(page)
    }

    /// Encode the next page of context `context`.
    ///
    /// # Errors
    ///
    /// Faults with `InvalidEnumerationContext` for unknown or expired
    /// contexts, `AccessDenied` when the requester or target differs from
    /// the Enumerate that opened it, and an encoding-limit fault when no
    /// item fits. The context is left unchanged in the latter two cases.
    pub fn pull(
        &self,
        request: &Request,
        context: &str,
        max_elements: Option<u32>,
        encoder: &dyn ResponseEncoder,
        limit: usize,
    ) -> Result<EncodedPage, Fault> {
        let mut contexts = self.lock();
        let id = live_context(&mut contexts, request, context)?;
        let Some(entry) = contexts.get_mut(&id) else {
            return Err(Fault::InvalidEnumerationContext(context.to_owned()));
        };
        let header = PageHeader {
            relates_to: request.message_id.clone(),
            kind: PageKind::Pull,
            context: Some(context.to_owned()),
            total_items: entry.report_total.then_some(entry.items.len() as u64),
        };
        let page = fill_page(
            encoder,
            &header,
            limit,
            &mut entry.items,
            max_elements.unwrap_or(1),
        )?;
        if page.page.end_of_sequence {
            contexts.remove(&id);
            debug!(message_id = %request.message_id, context_id = id, "enumeration context drained");
            metrics::set_enumeration_contexts(contexts.len());
        }
        Ok(page)
    }

    /// Discard context `context` on behalf of its owner.
    ///
    /// # Errors
    ///
    /// Faults as [`pull`](Self::pull) does for unknown, expired or foreign
    /// contexts.
    pub fn release(&self, request: &Request, context: &str) -> Result<(), Fault> {
        let mut contexts = self.lock();
        let id = live_context(&mut contexts, request, context)?;
        contexts.remove(&id);
        debug!(message_id = %request.message_id, context_id = id, "enumeration context released");
        metrics::set_enumeration_contexts(contexts.len());
        Ok(())
    }

    /// Remove contexts whose expiration is at or before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut contexts = self.lock();
        let before = contexts.len();
        contexts.retain(|id, context| {
            let keep = !context.is_expired(now);
            if !keep {
                debug!(context_id = *id, remaining = context.remaining(), "enumeration context expired");
            }
            keep
        });
        let swept = before - contexts.len();
        if swept > 0 {
            metrics::inc_contexts_swept(swept);
            metrics::set_enumeration_contexts(contexts.len());
        }
        swept
    }

    /// Discard every context, returning how many were held.
    pub fn drain(&self) -> usize {
        let mut contexts = self.lock();
        let count = contexts.len();
        contexts.clear();
        metrics::set_enumeration_contexts(0);
        count
    }
}

/// Resolve `context` to the id of a live context owned by the requester.
fn live_context(
    contexts: &mut HashMap<u64, EnumerationContext>,
    request: &Request,
    context: &str,
) -> Result<u64, Fault> {
    let invalid = || Fault::InvalidEnumerationContext(context.to_owned());
    let id = context.parse::<u64>().map_err(|_| invalid())?;
    let entry = contexts.get(&id).ok_or_else(invalid)?;
    if entry.is_expired(Instant::now()) {
        contexts.remove(&id);
        metrics::set_enumeration_contexts(contexts.len());
        return Err(invalid());
    }
    if !entry.owned_by(request) {
        return Err(Fault::AccessDenied(format!(
            "enumeration context {context} belongs to another requester or resource"
        )));
    }
    Ok(id)
}

/// Encode up to `max` items from the front of `items`, removing the ones
/// sent once the page is complete.
fn fill_page(
    encoder: &dyn ResponseEncoder,
    header: &PageHeader,
    limit: usize,
    items: &mut VecDeque<EnumerationItem>,
    max: u32,
) -> Result<EncodedPage, Fault> {
    let mut writer = encoder.page(header, limit).map_err(encode_fault)?;
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    let mut taken = 0;
    while taken < max {
        match items.get(taken) {
            Some(item) if writer.try_append(item) => taken += 1,
            _ => break,
        }
    }
    if taken == 0
        && max > 0
        && let Some(first) = items.front()
    {
        return Err(Fault::EncodingLimit(EncodingLimitKind::MaxEnvelopeSize {
            size: single_item_size(encoder, header, first),
            limit,
        }));
    }
    let end_of_sequence = taken == items.len();
    let payload = writer.finish(end_of_sequence).map_err(encode_fault)?;
    let sent: Vec<_> = items.drain(..taken).collect();
    Ok(EncodedPage {
        page: EnumerationPage {
            context: (!end_of_sequence || header.kind == PageKind::Enumerate)
                .then(|| header.context.clone())
                .flatten(),
            items: sent,
            end_of_sequence,
            total_items: header.total_items,
        },
        payload,
    })
}

/// Size of a page carrying only `item`, for fault reporting.
fn single_item_size(encoder: &dyn ResponseEncoder, header: &PageHeader, item: &EnumerationItem) -> usize {
    encoder
        .page(header, usize::MAX)
        .ok()
        .and_then(|mut writer| {
            writer.try_append(item);
            writer.finish(false).ok()
        })
        .map_or(usize::MAX, |bytes| bytes.len())
}

fn encode_fault(error: EncodeError) -> Fault {
    let EncodeError::EnvelopeTooLarge { size, limit } = error;
    Fault::EncodingLimit(EncodingLimitKind::MaxEnvelopeSize { size, limit })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        encoder::SoapEncoder,
        epr::class_resource_uri,
        request::{EnumerateParams, MessageId, Operation},
        value::{WsmInstance, WsmValue},
    };

    const ADDRESS: &str = "http://localhost:5985/wsman";

    fn epr() -> EndpointReference { EndpointReference::new(ADDRESS, class_resource_uri("CIM_Item")) }

    fn enumerate(id: &str) -> Request {
        Request::new(id, "alice", epr(), Operation::Enumerate(EnumerateParams::default()))
    }

    fn pull(id: &str, context: &str) -> Request {
        Request::new(
            id,
            "alice",
            epr(),
            Operation::Pull {
                context: context.into(),
                max_elements: None,
            },
        )
    }

    fn items(n: usize) -> Vec<EnumerationItem> {
        (1..=n)
            .map(|i| {
                EnumerationItem::Object(
                    WsmInstance::new("CIM_Item").with_property("Id", WsmValue::text(i.to_string())),
                )
            })
            .collect()
    }

    fn open(first_page: u32, n: usize) -> OpenEnumeration {
        OpenEnumeration {
            mode: EnumerationMode::Objects,
            lifetime: Duration::from_secs(60),
            first_page,
            report_total: false,
            items: items(n),
        }
    }

    #[fixture]
    fn contexts() -> EnumerationContexts { EnumerationContexts::new() }

    #[rstest]
    #[tokio::test]
    async fn pages_until_drained(contexts: EnumerationContexts) {
        let first = contexts
            .open(&enumerate("uuid:e"), open(2, 5), &SoapEncoder, usize::MAX)
            .expect("first page");
        assert_eq!(first.page.items, items(5)[..2]);
        let context = first.page.context.clone().expect("context retained");
        assert_eq!(contexts.remaining(&context), Some(3));

        let second = contexts
            .pull(&pull("uuid:p1", &context), &context, Some(2), &SoapEncoder, usize::MAX)
            .expect("second page");
        assert_eq!(second.page.items, items(5)[2..4]);
        assert!(!second.page.end_of_sequence);

        let last = contexts
            .pull(&pull("uuid:p2", &context), &context, Some(2), &SoapEncoder, usize::MAX)
            .expect("last page");
        assert_eq!(last.page.items, items(5)[4..]);
        assert!(last.page.end_of_sequence);
        assert_eq!(last.page.context, None);
        assert!(contexts.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn single_page_enumeration_keeps_no_context(contexts: EnumerationContexts) {
        let page = contexts
            .open(&enumerate("uuid:e"), open(10, 3), &SoapEncoder, usize::MAX)
            .expect("page");
        assert!(page.page.end_of_sequence);
        assert!(page.page.context.is_some(), "enumerate responses always name the context");
        assert!(contexts.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn unoptimised_enumerate_returns_context_only(contexts: EnumerationContexts) {
        let page = contexts
            .open(&enumerate("uuid:e"), open(0, 2), &SoapEncoder, usize::MAX)
            .expect("page");
        assert!(page.page.items.is_empty());
        assert!(page.page.context.is_some());
        assert_eq!(contexts.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn foreign_pull_is_denied_without_mutation(contexts: EnumerationContexts) {
        let page = contexts
            .open(&enumerate("uuid:e"), open(1, 3), &SoapEncoder, usize::MAX)
            .expect("page");
        let context = page.page.context.expect("context");
        let mut intruder = pull("uuid:x", &context);
        intruder.identity = "mallory".into();
        let fault = contexts
            .pull(&intruder, &context, Some(5), &SoapEncoder, usize::MAX)
            .expect_err("denied");
        assert!(matches!(fault, Fault::AccessDenied(_)));
        assert_eq!(contexts.remaining(&context), Some(2));

        let mut elsewhere = pull("uuid:y", &context);
        elsewhere.epr = EndpointReference::new(ADDRESS, class_resource_uri("CIM_Other"));
        assert!(matches!(
            contexts.release(&elsewhere, &context),
            Err(Fault::AccessDenied(_))
        ));
        assert_eq!(contexts.remaining(&context), Some(2));
    }

    #[rstest]
    #[case("999999999")]
    #[case("not-a-number")]
    #[tokio::test]
    async fn unknown_context_is_invalid(contexts: EnumerationContexts, #[case] context: &str) {
        assert_eq!(
            contexts
                .pull(&pull("uuid:p", context), context, None, &SoapEncoder, usize::MAX)
                .map(|p| p.page),
            Err(Fault::InvalidEnumerationContext(context.to_owned()))
        );
        assert!(contexts.is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn expired_context_is_invalid_and_swept(contexts: EnumerationContexts) {
        let first = contexts
            .open(&enumerate("uuid:a"), open(1, 3), &SoapEncoder, usize::MAX)
            .expect("page");
        let second = contexts
            .open(&enumerate("uuid:b"), open(1, 3), &SoapEncoder, usize::MAX)
            .expect("page");
        tokio::time::advance(Duration::from_secs(61)).await;

        let context = first.page.context.expect("context");
        assert!(matches!(
            contexts.pull(&pull("uuid:p", &context), &context, None, &SoapEncoder, usize::MAX),
            Err(Fault::InvalidEnumerationContext(_))
        ));
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts.sweep(Instant::now()), 1);
        assert_eq!(contexts.remaining(&second.page.context.expect("context")), None);
    }

    #[rstest]
    #[tokio::test]
    async fn oversized_item_faults_and_keeps_context(contexts: EnumerationContexts) {
        let page = contexts
            .open(&enumerate("uuid:e"), open(0, 2), &SoapEncoder, usize::MAX)
            .expect("page");
        let context = page.page.context.expect("context");
        let header_only = SoapEncoder
            .page(
                &PageHeader {
                    relates_to: MessageId::new("uuid:p"),
                    kind: PageKind::Pull,
                    context: Some(context.clone()),
                    total_items: None,
                },
                usize::MAX,
            )
            .expect("page")
            .finish(false)
            .expect("finish")
            .len();
        let fault = contexts
            .pull(&pull("uuid:p", &context), &context, Some(1), &SoapEncoder, header_only + 60)
            .expect_err("item cannot fit");
        assert!(matches!(
            fault,
            Fault::EncodingLimit(EncodingLimitKind::MaxEnvelopeSize { .. })
        ));
        assert_eq!(contexts.remaining(&context), Some(2));
    }

    #[rstest]
    #[tokio::test]
    async fn release_removes_context(contexts: EnumerationContexts) {
        let page = contexts
            .open(&enumerate("uuid:e"), open(1, 3), &SoapEncoder, usize::MAX)
            .expect("page");
        let context = page.page.context.expect("context");
        let release = Request::new(
            "uuid:r",
            "alice",
            epr(),
            Operation::Release {
                context: context.clone(),
            },
        );
        contexts.release(&release, &context).expect("released");
        assert!(contexts.is_empty());
        assert!(matches!(
            contexts.release(&release, &context),
            Err(Fault::InvalidEnumerationContext(_))
        ));
    }
}
