// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! W3C Trace Context (`traceparent`) and W3C Baggage (`baggage`) propagation.
//!
//! Extraction never fails: a missing or malformed `traceparent` yields `None`, and the caller
//! starts a new root trace.

use std::collections::{BTreeMap, HashMap};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use otelpipe_proto::{SpanId, TraceId};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const BAGGAGE_HEADER: &str = "baggage";

const SUPPORTED_VERSION: u8 = 0x00;
const INVALID_VERSION: u8 = 0xff;

pub const MAX_BAGGAGE_MEMBERS: usize = 180;
pub const MAX_BAGGAGE_BYTES: usize = 8192;

// Everything outside of `baggage-octet`, plus `%` so that decoding is lossless.
const BAGGAGE_VALUE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

pub type Baggage = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    pub fn is_sampled(&self) -> bool {
        self.0 & Self::SAMPLED.0 == Self::SAMPLED.0
    }

    pub fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            TraceFlags(self.0 | Self::SAMPLED.0)
        } else {
            TraceFlags(self.0 & !Self::SAMPLED.0)
        }
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }
}

/// Identity of the current unit of work, passed explicitly across every call boundary.
///
/// A context is never mutated: [`TraceContext::child`] derives a new one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    trace_flags: TraceFlags,
    baggage: Baggage,
}

impl TraceContext {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        baggage: Baggage,
    ) -> Self {
        TraceContext {
            trace_id,
            span_id,
            parent_span_id: None,
            trace_flags,
            baggage,
        }
    }

    /// Starts a new trace.
    pub fn new_root(sampled: bool) -> Self {
        TraceContext::new(
            TraceId::random(),
            SpanId::random(),
            TraceFlags::default().with_sampled(sampled),
            Baggage::new(),
        )
    }

    /// Derives the context of a child unit of work: same trace, flags, and baggage, fresh span
    /// ID, and `self` as parent.
    pub fn child(&self) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            trace_flags: self.trace_flags,
            baggage: self.baggage.clone(),
        }
    }

    pub fn with_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut context = self.clone();
        context.baggage.insert(key.into(), value.into());
        context
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    pub fn traceparent(&self) -> String {
        format!(
            "{:02x}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            self.trace_id,
            self.span_id,
            self.trace_flags.to_u8()
        )
    }
}

pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

pub trait Extractor {
    fn get(&self, key: &str) -> Option<&str>;
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_ascii_lowercase(), value);
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = HashMap::get(self, key) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(field_name, _)| field_name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        let Ok(header_name) = HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        let Ok(header_value) = HeaderValue::from_str(&value) else {
            return;
        };
        self.insert(header_name, header_value);
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|header_value| header_value.to_str().ok())
    }
}

/// Writes the context into the carrier. Baggage members that cannot be encoded or exceed the
/// size limits are left out.
pub fn inject<I: Injector + ?Sized>(context: &TraceContext, injector: &mut I) {
    injector.set(TRACEPARENT_HEADER, context.traceparent());

    let baggage_header = encode_baggage(&context.baggage);
    if !baggage_header.is_empty() {
        injector.set(BAGGAGE_HEADER, baggage_header);
    }
}

/// Reads a context from the carrier. Returns `None` when `traceparent` is absent or malformed.
pub fn extract<E: Extractor + ?Sized>(extractor: &E) -> Option<TraceContext> {
    let traceparent = extractor.get(TRACEPARENT_HEADER)?;
    let (trace_id, span_id, trace_flags) = parse_traceparent(traceparent.trim())?;
    let baggage = extractor
        .get(BAGGAGE_HEADER)
        .map(decode_baggage)
        .unwrap_or_default();
    Some(TraceContext::new(trace_id, span_id, trace_flags, baggage))
}

/// Convenience wrapper returning the injected fields.
pub fn inject_to_map(context: &TraceContext) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    inject(context, &mut fields);
    fields
}

fn parse_hex_byte(hex_str: &str) -> Option<u8> {
    if hex_str.len() != 2 || !hex_str.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    u8::from_str_radix(hex_str, 16).ok()
}

fn parse_traceparent(traceparent: &str) -> Option<(TraceId, SpanId, TraceFlags)> {
    let mut fields = traceparent.splitn(5, '-');
    let version = parse_hex_byte(fields.next()?)?;
    let trace_id_str = fields.next()?;
    let span_id_str = fields.next()?;
    let flags_str = fields.next()?;
    let remainder_opt = fields.next();

    if version == INVALID_VERSION {
        return None;
    }
    // Later versions may append fields, introduced by `-`.
    if version == SUPPORTED_VERSION && remainder_opt.is_some() {
        return None;
    }
    let trace_id = TraceId::from_hex(trace_id_str).ok()?;
    let span_id = SpanId::from_hex(span_id_str).ok()?;
    let flags = parse_hex_byte(flags_str)?;

    if !trace_id.is_valid() || !span_id.is_valid() {
        return None;
    }
    Some((trace_id, span_id, TraceFlags::new(flags)))
}

fn is_token(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|byte| {
            byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
        })
}

fn encode_baggage(baggage: &Baggage) -> String {
    let mut baggage_header = String::new();
    let mut num_members = 0;

    for (key, value) in baggage {
        if num_members == MAX_BAGGAGE_MEMBERS {
            break;
        }
        if !is_token(key) {
            continue;
        }
        let member = format!(
            "{key}={}",
            utf8_percent_encode(value, BAGGAGE_VALUE_ENCODE_SET)
        );
        let separator_len = if baggage_header.is_empty() { 0 } else { 1 };

        if baggage_header.len() + separator_len + member.len() > MAX_BAGGAGE_BYTES {
            continue;
        }
        if separator_len > 0 {
            baggage_header.push(',');
        }
        baggage_header.push_str(&member);
        num_members += 1;
    }
    baggage_header
}

fn decode_baggage(baggage_header: &str) -> Baggage {
    let mut baggage = Baggage::new();
    let mut num_bytes = 0;

    for member in baggage_header.split(',') {
        if baggage.len() == MAX_BAGGAGE_MEMBERS {
            break;
        }
        let member = member.trim();
        num_bytes += member.len() + 1;

        if num_bytes > MAX_BAGGAGE_BYTES + 1 {
            break;
        }
        // Member properties are not propagated.
        let key_value = member.split(';').next().unwrap_or_default();
        let Some((key, value)) = key_value.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if !is_token(key) {
            continue;
        }
        let Ok(value) = percent_decode_str(value.trim()).decode_utf8() else {
            continue;
        };
        baggage.insert(key.to_string(), value.into_owned());
    }
    baggage
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn fields(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_valid_traceparent() {
        let context = extract(&fields(&[("traceparent", TRACEPARENT)])).unwrap();
        assert_eq!(
            context.trace_id().to_hex(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(context.span_id().to_hex(), "00f067aa0ba902b7");
        assert!(context.is_sampled());
        assert!(context.parent_span_id().is_none());
        assert!(context.baggage().is_empty());
    }

    #[test]
    fn test_extract_is_case_insensitive_on_field_names() {
        let context = extract(&fields(&[("Traceparent", TRACEPARENT)])).unwrap();
        assert_eq!(context.traceparent(), TRACEPARENT);
    }

    #[test]
    fn test_extract_malformed_traceparent_returns_none() {
        for traceparent in [
            "",
            "00",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "0-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902zz-01",
        ] {
            assert!(
                extract(&fields(&[("traceparent", traceparent)])).is_none(),
                "`{traceparent}` should be rejected"
            );
        }
        assert!(extract(&HashMap::new()).is_none());
        assert!(extract(&fields(&[("baggage", "user=alice")])).is_none());
    }

    #[test]
    fn test_extract_future_version() {
        let context = extract(&fields(&[(
            "traceparent",
            "cc-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-what-the-future-holds",
        )]))
        .unwrap();
        assert_eq!(context.span_id().to_hex(), "00f067aa0ba902b7");
        assert_eq!(context.traceparent(), TRACEPARENT);
    }

    #[test]
    fn test_extract_baggage() {
        let context = extract(&fields(&[
            ("traceparent", TRACEPARENT),
            (
                "baggage",
                " user.id = alice , tenant=acme;ttl=30,bad key=1,novalue,city=S%C3%A3o%20Paulo",
            ),
        ]))
        .unwrap();
        let expected_baggage: Baggage = [
            ("city", "São Paulo"),
            ("tenant", "acme"),
            ("user.id", "alice"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
        assert_eq!(context.baggage(), &expected_baggage);
    }

    #[test]
    fn test_baggage_member_limit() {
        let mut context = TraceContext::new_root(true);
        for i in 0..MAX_BAGGAGE_MEMBERS + 20 {
            context = context.with_baggage_item(format!("key{i:03}"), "value");
        }
        let injected = inject_to_map(&context);
        assert_eq!(
            injected["baggage"].split(',').count(),
            MAX_BAGGAGE_MEMBERS
        );
        let extracted = extract(&injected).unwrap();
        assert_eq!(extracted.baggage().len(), MAX_BAGGAGE_MEMBERS);
    }

    #[test]
    fn test_baggage_byte_limit() {
        let context = TraceContext::new_root(true)
            .with_baggage_item("large", "x".repeat(MAX_BAGGAGE_BYTES))
            .with_baggage_item("small", "y");
        let injected = inject_to_map(&context);
        assert_eq!(injected["baggage"], "small=y");
    }

    #[test]
    fn test_child_context() {
        let root = TraceContext::new_root(true).with_baggage_item("tenant", "acme");
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert_eq!(child.baggage(), root.baggage());
        assert_eq!(child.trace_flags(), root.trace_flags());
    }

    #[test]
    fn test_inject_into_header_map() {
        let context = TraceContext::new_root(false).with_baggage_item("tenant", "acme corp");
        let mut headers = HeaderMap::new();
        inject(&context, &mut headers);
        assert_eq!(
            headers.get("traceparent").unwrap().to_str().unwrap(),
            context.traceparent()
        );
        assert_eq!(
            headers.get("baggage").unwrap().to_str().unwrap(),
            "tenant=acme%20corp"
        );
        assert!(context.traceparent().ends_with("-00"));
        assert_eq!(extract(&headers).unwrap(), context);
    }

    #[test]
    fn test_inject_is_deterministic() {
        let context = TraceContext::new_root(true)
            .with_baggage_item("b", "2")
            .with_baggage_item("a", "1");
        assert_eq!(inject_to_map(&context), inject_to_map(&context));
        assert_eq!(inject_to_map(&context)["baggage"], "a=1,b=2");
    }

    fn arb_context() -> impl Strategy<Value = TraceContext> {
        (
            any::<[u8; 16]>(),
            any::<[u8; 8]>(),
            any::<u8>(),
            prop::collection::btree_map("[a-z][a-z0-9_.-]{0,15}", ".{0,24}", 0..8),
        )
            .prop_filter("IDs must not be all zeros", |(trace_id, span_id, _, _)| {
                trace_id.iter().any(|byte| *byte != 0) && span_id.iter().any(|byte| *byte != 0)
            })
            .prop_map(|(trace_id, span_id, flags, baggage)| {
                TraceContext::new(
                    TraceId::new(trace_id),
                    SpanId::new(span_id),
                    TraceFlags::new(flags),
                    baggage,
                )
            })
    }

    proptest! {
        #[test]
        fn test_proptest_inject_extract_round_trip(context in arb_context()) {
            let injected = inject_to_map(&context);
            prop_assert_eq!(extract(&injected), Some(context));
        }

        #[test]
        fn test_proptest_extract_never_panics(traceparent in ".*", baggage in ".*") {
            let injected = fields(&[("traceparent", traceparent.as_str()), ("baggage", baggage.as_str())]);
            let _ = extract(&injected);
        }
    }
}
