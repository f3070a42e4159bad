//! Response encoding under a negotiated envelope size.
//!
//! Single-shot responses are rendered whole and rejected if they exceed the
//! limit. Enumeration pages are composed incrementally through a
//! [`PageWriter`]: each item is appended only if the envelope, including
//! the closing elements and a possible end-of-sequence marker, still fits.

use std::fmt::Write as _;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{
    epr::{CIM_SCHEMA_URI, EndpointReference, SelectorValue},
    fault::{Fault, FaultCategory},
    request::MessageId,
    response::{EnumerationItem, Response, ResponseBody},
    value::{WsmInstance, WsmValue},
};

const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const NS_ENUMERATION: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
const NS_EVENTING: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing";
const NS_TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
const NS_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const NS_IDENTITY: &str = "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const FAULT_ACTION: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman/fault";

/// Errors raised while encoding a response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The rendered envelope does not fit the negotiated size.
    #[error("envelope of {size} bytes exceeds limit of {limit} bytes")]
    EnvelopeTooLarge { size: usize, limit: usize },
}

/// Which enumeration message a page belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    Enumerate,
    Pull,
}

/// Fixed part of an enumeration page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageHeader {
    pub relates_to: MessageId,
    pub kind: PageKind,
    /// Context id. Enumerate pages always carry it; Pull pages drop it once
    /// the sequence ends.
    pub context: Option<String>,
    pub total_items: Option<u64>,
}

/// Incremental writer for one enumeration page.
pub trait PageWriter: Send {
    /// Append `item` if it fits; returns whether it was appended.
    fn try_append(&mut self, item: &EnumerationItem) -> bool;

    /// Close the page, marking the end of the sequence if requested.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the completed envelope cannot be produced
    /// within the limit.
    fn finish(self: Box<Self>, end_of_sequence: bool) -> Result<Bytes, EncodeError>;
}

/// Wire encoder for processor responses.
pub trait ResponseEncoder: Send + Sync {
    /// Encode a complete response.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::EnvelopeTooLarge`] if the response exceeds
    /// `limit` bytes.
    fn encode(&self, response: &Response, limit: usize) -> Result<Bytes, EncodeError>;

    /// Start an enumeration page.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::EnvelopeTooLarge`] if the page cannot fit even
    /// with no items.
    fn page(&self, header: &PageHeader, limit: usize) -> Result<Box<dyn PageWriter>, EncodeError>;
}

/// SOAP 1.2 envelope encoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoapEncoder;

impl ResponseEncoder for SoapEncoder {
    fn encode(&self, response: &Response, limit: usize) -> Result<Bytes, EncodeError> {
        let mut out = BytesMut::with_capacity(1024);
        match &response.body {
            Ok(body) => {
                open_envelope(&mut out, action(body), &response.relates_to, None);
                render_body(&mut out, body);
            }
            Err(fault) => {
                open_envelope(&mut out, Some(FAULT_ACTION), &response.relates_to, None);
                render_fault(&mut out, fault);
            }
        }
        out.extend_from_slice(b"</s:Body></s:Envelope>");
        if out.len() > limit {
            return Err(EncodeError::EnvelopeTooLarge {
                size: out.len(),
                limit,
            });
        }
        Ok(out.freeze())
    }

    fn page(&self, header: &PageHeader, limit: usize) -> Result<Box<dyn PageWriter>, EncodeError> {
        let (element, items_tag, eos_tag) = match header.kind {
            PageKind::Enumerate => ("wsen:EnumerateResponse", "wsman:Items", "<wsman:EndOfSequence/>"),
            PageKind::Pull => ("wsen:PullResponse", "wsen:Items", "<wsen:EndOfSequence/>"),
        };
        let mut prefix = BytesMut::with_capacity(1024);
        let action = match header.kind {
            PageKind::Enumerate => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/EnumerateResponse",
            PageKind::Pull => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/PullResponse",
        };
        open_envelope(&mut prefix, Some(action), &header.relates_to, header.total_items);
        let _ = write!(prefix, "<{element}>");

        let context = header
            .context
            .as_deref()
            .map(|id| format!("<wsen:EnumerationContext>{}</wsen:EnumerationContext>", escape(id)))
            .unwrap_or_default();
        let writer = SoapPageWriter {
            limit,
            prefix,
            context,
            keep_context: header.kind == PageKind::Enumerate,
            items: BytesMut::new(),
            items_tag,
            eos_tag,
            closing: format!("</{element}></s:Body></s:Envelope>"),
        };
        let size = writer.reserved();
        if size > limit {
            return Err(EncodeError::EnvelopeTooLarge { size, limit });
        }
        Ok(Box::new(writer))
    }
}

struct SoapPageWriter {
    limit: usize,
    prefix: BytesMut,
    context: String,
    keep_context: bool,
    items: BytesMut,
    items_tag: &'static str,
    eos_tag: &'static str,
    closing: String,
}

impl SoapPageWriter {
    /// Bytes needed for everything except the items themselves.
    fn reserved(&self) -> usize {
        self.prefix.len()
            + self.context.len()
            + 2 * self.items_tag.len()
            + "<></>".len()
            + self.eos_tag.len()
            + self.closing.len()
    }
}

impl PageWriter for SoapPageWriter {
    fn try_append(&mut self, item: &EnumerationItem) -> bool {
        let mut rendered = BytesMut::new();
        render_item(&mut rendered, item);
        if self.reserved() + self.items.len() + rendered.len() > self.limit {
            return false;
        }
        self.items.extend_from_slice(&rendered);
        true
    }

    fn finish(self: Box<Self>, end_of_sequence: bool) -> Result<Bytes, EncodeError> {
        let mut out = self.prefix;
        if !end_of_sequence || self.keep_context {
            out.extend_from_slice(self.context.as_bytes());
        }
        if !self.items.is_empty() {
            let _ = write!(out, "<{}>", self.items_tag);
            out.extend_from_slice(&self.items);
            let _ = write!(out, "</{}>", self.items_tag);
        }
        if end_of_sequence {
            out.extend_from_slice(self.eos_tag.as_bytes());
        }
        out.extend_from_slice(self.closing.as_bytes());
        if out.len() > self.limit {
            return Err(EncodeError::EnvelopeTooLarge {
                size: out.len(),
                limit: self.limit,
            });
        }
        Ok(out.freeze())
    }
}

fn action(body: &ResponseBody) -> Option<&'static str> {
    Some(match body {
        ResponseBody::Identify(_) => return None,
        ResponseBody::Get(_) => "http://schemas.xmlsoap.org/ws/2004/09/transfer/GetResponse",
        ResponseBody::Put(_) => "http://schemas.xmlsoap.org/ws/2004/09/transfer/PutResponse",
        ResponseBody::Create(_) => "http://schemas.xmlsoap.org/ws/2004/09/transfer/CreateResponse",
        ResponseBody::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/DeleteResponse",
        ResponseBody::Invoke(_) => "http://schemas.dmtf.org/wbem/wsman/1/wsman/InvokeResponse",
        ResponseBody::Enumerate(_) => {
            "http://schemas.xmlsoap.org/ws/2004/09/enumeration/EnumerateResponse"
        }
        ResponseBody::Pull(_) => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/PullResponse",
        ResponseBody::Release => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/ReleaseResponse",
        ResponseBody::Subscribe { .. } => {
            "http://schemas.xmlsoap.org/ws/2004/08/eventing/SubscribeResponse"
        }
        ResponseBody::Unsubscribe => {
            "http://schemas.xmlsoap.org/ws/2004/08/eventing/UnsubscribeResponse"
        }
    })
}

fn open_envelope(
    out: &mut BytesMut,
    action: Option<&str>,
    relates_to: &MessageId,
    total_items: Option<u64>,
) {
    let _ = write!(
        out,
        "<s:Envelope xmlns:s=\"{NS_SOAP}\" xmlns:wsa=\"{NS_ADDRESSING}\" \
         xmlns:wsen=\"{NS_ENUMERATION}\" xmlns:wse=\"{NS_EVENTING}\" \
         xmlns:wxf=\"{NS_TRANSFER}\" xmlns:wsman=\"{NS_WSMAN}\" xmlns:xsi=\"{NS_XSI}\">\
         <s:Header>"
    );
    if let Some(action) = action {
        let _ = write!(
            out,
            "<wsa:To>{}</wsa:To><wsa:Action>{action}</wsa:Action>\
             <wsa:RelatesTo>{}</wsa:RelatesTo>",
            crate::epr::ANONYMOUS_ADDRESS,
            escape(relates_to.as_str())
        );
    }
    if let Some(total) = total_items {
        let _ = write!(
            out,
            "<wsman:TotalItemsCountEstimate>{total}</wsman:TotalItemsCountEstimate>"
        );
    }
    out.extend_from_slice(b"</s:Header><s:Body>");
}

fn render_body(out: &mut BytesMut, body: &ResponseBody) {
    match body {
        ResponseBody::Identify(info) => {
            let _ = write!(
                out,
                "<wsmid:IdentifyResponse xmlns:wsmid=\"{NS_IDENTITY}\">\
                 <wsmid:ProtocolVersion>{}</wsmid:ProtocolVersion>\
                 <wsmid:ProductVendor>{}</wsmid:ProductVendor>\
                 <wsmid:ProductVersion>{}</wsmid:ProductVersion>\
                 </wsmid:IdentifyResponse>",
                escape(&info.protocol_version),
                escape(&info.product_vendor),
                escape(&info.product_version)
            );
        }
        ResponseBody::Get(instance) | ResponseBody::Put(instance) | ResponseBody::Invoke(instance) => {
            render_instance(out, instance);
        }
        ResponseBody::Create(epr) => {
            out.extend_from_slice(b"<wxf:ResourceCreated>");
            render_epr_contents(out, epr);
            out.extend_from_slice(b"</wxf:ResourceCreated>");
        }
        ResponseBody::Enumerate(page) | ResponseBody::Pull(page) => {
            let (element, items_tag, eos_tag) = if matches!(body, ResponseBody::Enumerate(_)) {
                ("wsen:EnumerateResponse", "wsman:Items", "<wsman:EndOfSequence/>")
            } else {
                ("wsen:PullResponse", "wsen:Items", "<wsen:EndOfSequence/>")
            };
            let _ = write!(out, "<{element}>");
            if let Some(context) = &page.context {
                let _ = write!(
                    out,
                    "<wsen:EnumerationContext>{}</wsen:EnumerationContext>",
                    escape(context)
                );
            }
            if !page.items.is_empty() {
                let _ = write!(out, "<{items_tag}>");
                for item in &page.items {
                    render_item(out, item);
                }
                let _ = write!(out, "</{items_tag}>");
            }
            if page.end_of_sequence {
                out.extend_from_slice(eos_tag.as_bytes());
            }
            let _ = write!(out, "</{element}>");
        }
        ResponseBody::Subscribe { manager, expires } => {
            out.extend_from_slice(b"<wse:SubscribeResponse><wse:SubscriptionManager>");
            render_epr_contents(out, manager);
            out.extend_from_slice(b"</wse:SubscriptionManager>");
            if let Some(expires) = expires {
                let _ = write!(out, "<wse:Expires>{}</wse:Expires>", escape(expires));
            }
            out.extend_from_slice(b"</wse:SubscribeResponse>");
        }
        ResponseBody::Delete | ResponseBody::Release | ResponseBody::Unsubscribe => {}
    }
}

fn render_fault(out: &mut BytesMut, fault: &Fault) {
    let code = match fault.category() {
        FaultCategory::Backend | FaultCategory::Internal => "s:Receiver",
        _ => "s:Sender",
    };
    let _ = write!(
        out,
        "<s:Fault><s:Code><s:Value>{code}</s:Value><s:Subcode><s:Value>{}</s:Value>\
         </s:Subcode></s:Code><s:Reason><s:Text xml:lang=\"en\">{}</s:Text></s:Reason>",
        fault.subcode().qname(),
        escape(&fault.to_string())
    );
    if let Some(detail) = fault.detail() {
        let _ = write!(
            out,
            "<s:Detail><wsman:FaultDetail>{}</wsman:FaultDetail></s:Detail>",
            detail.uri()
        );
    }
    out.extend_from_slice(b"</s:Fault>");
}

fn render_item(out: &mut BytesMut, item: &EnumerationItem) {
    match item {
        EnumerationItem::Object(instance) => render_instance(out, instance),
        EnumerationItem::EndpointReference(epr) => render_epr(out, epr),
        EnumerationItem::ObjectAndEndpointReference { object, epr } => {
            out.extend_from_slice(b"<wsman:Item>");
            render_instance(out, object);
            render_epr(out, epr);
            out.extend_from_slice(b"</wsman:Item>");
        }
    }
}

fn render_instance(out: &mut BytesMut, instance: &WsmInstance) {
    let class = escape(&instance.class_name);
    let _ = write!(out, "<p:{class} xmlns:p=\"{CIM_SCHEMA_URI}/{class}\">");
    for property in &instance.properties {
        render_property(out, &escape(&property.name), &property.value);
    }
    let _ = write!(out, "</p:{class}>");
}

fn render_property(out: &mut BytesMut, name: &str, value: &WsmValue) {
    match value {
        WsmValue::Null => {
            let _ = write!(out, "<p:{name} xsi:nil=\"true\"/>");
        }
        WsmValue::Text(text) => {
            let _ = write!(out, "<p:{name}>{}</p:{name}>", escape(text));
        }
        WsmValue::Reference(epr) => {
            let _ = write!(out, "<p:{name}>");
            render_epr_contents(out, epr);
            let _ = write!(out, "</p:{name}>");
        }
        WsmValue::Instance(embedded) => {
            let _ = write!(out, "<p:{name}>");
            render_instance(out, embedded);
            let _ = write!(out, "</p:{name}>");
        }
        WsmValue::Array(items) => {
            for item in items {
                render_property(out, name, item);
            }
        }
    }
}

fn render_epr(out: &mut BytesMut, epr: &EndpointReference) {
    out.extend_from_slice(b"<wsa:EndpointReference>");
    render_epr_contents(out, epr);
    out.extend_from_slice(b"</wsa:EndpointReference>");
}

fn render_epr_contents(out: &mut BytesMut, epr: &EndpointReference) {
    let _ = write!(
        out,
        "<wsa:Address>{}</wsa:Address><wsa:ReferenceParameters>\
         <wsman:ResourceURI>{}</wsman:ResourceURI>",
        escape(&epr.address),
        escape(&epr.resource_uri)
    );
    if !epr.selectors.is_empty() {
        out.extend_from_slice(b"<wsman:SelectorSet>");
        for selector in &epr.selectors {
            let _ = write!(out, "<wsman:Selector Name=\"{}\">", escape(&selector.name));
            match &selector.value {
                SelectorValue::Text(text) => out.extend_from_slice(escape(text).as_bytes()),
                SelectorValue::Reference(inner) => render_epr(out, inner),
            }
            out.extend_from_slice(b"</wsman:Selector>");
        }
        out.extend_from_slice(b"</wsman:SelectorSet>");
    }
    out.extend_from_slice(b"</wsa:ReferenceParameters>");
}

/// Escape XML markup characters.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
