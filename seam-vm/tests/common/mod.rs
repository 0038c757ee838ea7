//! Shared fixtures for the decoder test suites: wire-format builders, an
//! event-recording sink, schema factories and chunked feed drivers.

#![allow(dead_code)]

use std::sync::Arc;

use seam_schema::{
    BindingSelectors, DescriptorType, FieldDef, HandlerCache, Handlers, Label,
    MsgId, Role, Schema, SchemaBuilder, Selector, Sink, Status, SubDef,
};
use seam_vm::{CodeCache, DecodeError, Decoder, MethodHandle};
use seam_wire::{encode_varint, WireType, MAX_VARINT_LEN};

/* Wire builders ***********************************************************/

pub fn varint(v: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = encode_varint(v, &mut buf);
    buf[..n].to_vec()
}

pub fn tag(field: u32, wt: WireType) -> Vec<u8> {
    varint(u64::from((field << 3) | wt as u32))
}

pub fn fixed32(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn fixed64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn cat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

pub fn delim(bytes: &[u8]) -> Vec<u8> {
    cat(&[&varint(bytes.len() as u64), bytes])
}

pub fn submsg(field: u32, inner: &[u8]) -> Vec<u8> {
    cat(&[&tag(field, WireType::Delimited), &delim(inner)])
}

pub fn group(field: u32, inner: &[u8]) -> Vec<u8> {
    cat(&[
        &tag(field, WireType::StartGroup),
        inner,
        &tag(field, WireType::EndGroup),
    ])
}

/* Event recording *********************************************************/

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartMsg,
    EndMsg,
    Int32(Selector, i32),
    Int64(Selector, i64),
    Uint32(Selector, u32),
    Uint64(Selector, u64),
    Float(Selector, f32),
    Double(Selector, f64),
    Bool(Selector, bool),
    StartStr(Selector, u64),
    Str(Selector, Vec<u8>),
    EndStr(Selector),
    StartSeq(Selector),
    EndSeq(Selector),
    StartSubMsg(Selector),
    EndSubMsg(Selector),
    Unknown(Vec<u8>),
}

/// Records every callback; can be told to reject value callbacks a number
/// of times, or to answer one string chunk with a skip-ahead count.
#[derive(Default)]
pub struct EventSink {
    pub events: Vec<Event>,
    pub reject_values: usize,
    pub str_extra: Option<usize>,
    pub shim: Vec<u8>,
}

impl EventSink {
    pub fn with_shim(len: usize) -> Self {
        Self {
            shim: vec![0; len],
            ..Self::default()
        }
    }
}

impl Sink for EventSink {
    fn start_msg(&mut self) -> bool {
        self.events.push(Event::StartMsg);
        true
    }

    fn end_msg(&mut self, _status: &Status) -> bool {
        self.events.push(Event::EndMsg);
        true
    }

    fn on_int32(&mut self, sel: Selector, val: i32) -> bool {
        if self.reject_values > 0 {
            self.reject_values -= 1;
            return false;
        }
        self.events.push(Event::Int32(sel, val));
        true
    }

    fn on_int64(&mut self, sel: Selector, val: i64) -> bool {
        self.events.push(Event::Int64(sel, val));
        true
    }

    fn on_uint32(&mut self, sel: Selector, val: u32) -> bool {
        self.events.push(Event::Uint32(sel, val));
        true
    }

    fn on_uint64(&mut self, sel: Selector, val: u64) -> bool {
        self.events.push(Event::Uint64(sel, val));
        true
    }

    fn on_float(&mut self, sel: Selector, val: f32) -> bool {
        self.events.push(Event::Float(sel, val));
        true
    }

    fn on_double(&mut self, sel: Selector, val: f64) -> bool {
        self.events.push(Event::Double(sel, val));
        true
    }

    fn on_bool(&mut self, sel: Selector, val: bool) -> bool {
        self.events.push(Event::Bool(sel, val));
        true
    }

    fn start_str(&mut self, sel: Selector, size_hint: u64) -> bool {
        self.events.push(Event::StartStr(sel, size_hint));
        true
    }

    fn on_str(&mut self, sel: Selector, bytes: &[u8]) -> usize {
        self.events.push(Event::Str(sel, bytes.to_vec()));
        match self.str_extra.take() {
            Some(extra) => bytes.len() + extra,
            None => bytes.len(),
        }
    }

    fn end_str(&mut self, sel: Selector) -> bool {
        self.events.push(Event::EndStr(sel));
        true
    }

    fn start_seq(&mut self, sel: Selector) -> bool {
        self.events.push(Event::StartSeq(sel));
        true
    }

    fn end_seq(&mut self, sel: Selector) -> bool {
        self.events.push(Event::EndSeq(sel));
        true
    }

    fn start_submsg(&mut self, sel: Selector) -> bool {
        self.events.push(Event::StartSubMsg(sel));
        true
    }

    fn end_submsg(&mut self, sel: Selector) -> bool {
        self.events.push(Event::EndSubMsg(sel));
        true
    }

    fn on_unknown(&mut self, bytes: &[u8]) -> usize {
        self.events.push(Event::Unknown(bytes.to_vec()));
        bytes.len()
    }

    fn shim_region(&mut self) -> &mut [u8] {
        &mut self.shim
    }
}

/// Canonical form for comparing runs with different buffer seams: empty
/// string chunks vanish and adjacent chunks of one value merge, as do
/// adjacent unknown ranges.
pub fn normalize(events: &[Event]) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::new();
    for e in events {
        match e {
            Event::Str(_, bytes) if bytes.is_empty() => {}
            Event::Str(sel, bytes) => match out.last_mut() {
                Some(Event::Str(prev_sel, prev)) if prev_sel == sel => {
                    prev.extend_from_slice(bytes);
                }
                _ => out.push(e.clone()),
            },
            Event::Unknown(bytes) => match out.last_mut() {
                Some(Event::Unknown(prev)) => prev.extend_from_slice(bytes),
                _ => out.push(e.clone()),
            },
            _ => out.push(e.clone()),
        }
    }
    out
}

/* Schema factories ********************************************************/

/// Selector assigned to (field, role) in a frozen handler set.
pub fn sel(h: &Handlers, number: u32, role: Role) -> Selector {
    let binding = h.binding(number).expect("field is bound");
    let selectors = *binding.selectors();
    let seq = match selectors {
        BindingSelectors::Value { seq, .. }
        | BindingSelectors::Str { seq, .. }
        | BindingSelectors::SubMsg { seq, .. } => seq,
    };
    match (selectors, role) {
        (_, Role::StartSeq) => seq.expect("repeated field").start,
        (_, Role::EndSeq) => seq.expect("repeated field").end,
        (BindingSelectors::Value { value, .. }, Role::Value) => value,
        (BindingSelectors::Str { start, .. }, Role::StartStr) => start,
        (BindingSelectors::Str { chunk, .. }, Role::Str) => chunk,
        (BindingSelectors::Str { end, .. }, Role::EndStr) => end,
        (BindingSelectors::SubMsg { start, .. }, Role::StartSubMsg) => start,
        (BindingSelectors::SubMsg { end, .. }, Role::EndSubMsg) => end,
        _ => panic!("role {role:?} not assigned for field {number}"),
    }
}

pub struct Fixture {
    pub schema: Arc<Schema>,
    pub msg: MsgId,
    pub method: MethodHandle,
}

impl Fixture {
    pub fn handlers(&self) -> &Arc<Handlers> {
        self.method.method().dest_handlers()
    }

    pub fn handlers_of(&self, msg: MsgId) -> Arc<Handlers> {
        let group = self.method.group();
        let idx = group.method_for(msg).expect("message has a method");
        group.method(idx).unwrap().dest_handlers().clone()
    }

    pub fn sel(&self, number: u32, role: Role) -> Selector {
        sel(self.handlers(), number, role)
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(self.method.clone())
    }
}

fn fixture_from(
    schema: Arc<Schema>,
    msg: MsgId,
    cache: HandlerCache,
) -> Fixture {
    let mut code = CodeCache::new(Arc::new(cache));
    let method = code.get_method(msg).expect("root message is bound");
    Fixture {
        schema,
        msg,
        method,
    }
}

/// `M { int32 f1 = 1; repeated string f2 = 2; Sub f3 = 3; }`
/// `Sub { bool b = 1; }`
pub fn spec_fixture() -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.M");
    let sub = b.add_message("test.Sub");
    b.add_field(m, FieldDef::new(1, "f1", DescriptorType::Int32, Label::Optional))
        .unwrap();
    b.add_field(
        m,
        FieldDef::new(2, "f2", DescriptorType::String, Label::Repeated),
    )
    .unwrap();
    b.add_field(
        m,
        FieldDef::new(3, "f3", DescriptorType::Message, Label::Optional)
            .with_subdef(SubDef::Message(sub)),
    )
    .unwrap();
    b.add_field(sub, FieldDef::new(1, "b", DescriptorType::Bool, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema.clone(), m, |_, msg, hb| {
        if msg.index() == 0 {
            hb.bind_value(1)?;
            hb.bind_string(2)?;
            hb.bind_submsg(3)?;
        } else {
            hb.bind_value(1)?;
        }
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/// `M { repeated int32 vals = 2 [packed = true]; }`
pub fn packed_fixture() -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Packed");
    b.add_field(
        m,
        FieldDef::new(2, "vals", DescriptorType::Int32, Label::Repeated)
            .with_packed(true),
    )
    .unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema.clone(), m, |_, _, hb| {
        hb.bind_value(2)?;
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/// A message with one singular and one repeated field of `ty`, numbered
/// after the descriptor type so failures name the type under test.
pub fn scalar_fixture(ty: DescriptorType) -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Scalar");
    let number = ty as u32;
    let rep_number = number + 20;
    let mut field = FieldDef::new(number, "single", ty, Label::Optional);
    let mut rep = FieldDef::new(rep_number, "rep", ty, Label::Repeated);
    if ty == DescriptorType::Enum {
        let e = b.add_enum("test.E");
        b.add_enum_value(e, "ZERO", 0).unwrap();
        field = field.with_subdef(SubDef::Enum(e));
        rep = rep.with_subdef(SubDef::Enum(e));
    }
    b.add_field(m, field).unwrap();
    b.add_field(m, rep).unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema.clone(), m, move |_, _, hb| {
        hb.bind_value(number)?;
        hb.bind_value(rep_number)?;
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/// `M { group G = 3 { bool b = 1; } }`
pub fn group_fixture() -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.WithGroup");
    let g = b.add_message("test.WithGroup.G");
    b.add_field(
        m,
        FieldDef::new(3, "g", DescriptorType::Group, Label::Optional)
            .with_subdef(SubDef::Message(g)),
    )
    .unwrap();
    b.add_field(g, FieldDef::new(1, "b", DescriptorType::Bool, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema.clone(), m, |_, msg, hb| {
        if msg.index() == 0 {
            hb.bind_submsg(3)?;
        } else {
            hb.bind_value(1)?;
        }
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/// Self-recursive `M { M m = 1; int32 x = 2; }` for nesting-depth tests.
pub fn recursive_fixture() -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Rec");
    b.add_field(
        m,
        FieldDef::new(1, "m", DescriptorType::Message, Label::Optional)
            .with_subdef(SubDef::Message(m)),
    )
    .unwrap();
    b.add_field(m, FieldDef::new(2, "x", DescriptorType::Int32, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    assert!(schema.msg(m).is_cyclic());
    let cache = HandlerCache::build(schema.clone(), m, |_, _, hb| {
        hb.bind_submsg(1)?;
        hb.bind_value(2)?;
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/// `M { int32 a = 1; fixed64 b = 2; bool c = 3; }`, all shim-bound into a
/// flat region: hasbits in byte 0, values behind them.
pub fn shim_fixture() -> Fixture {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Shimmed");
    b.add_field(m, FieldDef::new(1, "a", DescriptorType::Int32, Label::Optional))
        .unwrap();
    b.add_field(m, FieldDef::new(2, "b", DescriptorType::Fixed64, Label::Optional))
        .unwrap();
    b.add_field(m, FieldDef::new(3, "c", DescriptorType::Bool, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema.clone(), m, |_, _, hb| {
        hb.bind_shim(1, 4, Some(0))?;
        hb.bind_shim(2, 8, Some(1))?;
        hb.bind_shim(3, 16, Some(2))?;
        Ok(())
    })
    .unwrap();
    fixture_from(schema, m, cache)
}

/* Feed drivers ************************************************************/

/// Feeds `bytes` split at the given boundaries, then calls `end`.  Returns
/// false as soon as an error is recorded or `end` fails.  A short consumed
/// count re-feeds the unconsumed tail with the next chunk, mirroring a
/// caller that retries after handler backpressure.
pub fn feed_chunked<S: Sink>(
    decoder: &mut Decoder,
    sink: &mut S,
    bytes: &[u8],
    boundaries: &[usize],
) -> bool {
    decoder.start(bytes.len() as u64);
    let mut cuts: Vec<usize> = boundaries.to_vec();
    cuts.push(bytes.len());
    cuts.sort_unstable();
    cuts.dedup();

    let mut ofs = 0;
    let mut stalls = 0;
    for &cut in &cuts {
        while ofs < cut {
            let n = decoder.put(sink, &bytes[ofs..cut]);
            if decoder.error().is_some() {
                return false;
            }
            let step = n.min(cut - ofs);
            ofs += step;
            if step == 0 {
                // Backpressure; retry a few times, then give up rather
                // than loop on a sink that keeps rejecting.
                stalls += 1;
                if stalls > 4 {
                    return false;
                }
            } else {
                stalls = 0;
            }
        }
    }
    decoder.end(sink)
}

/// Decodes `bytes` in one piece and returns the recorded events plus the
/// end verdict.
pub fn run_whole(fx: &Fixture, bytes: &[u8]) -> (Vec<Event>, bool, Option<DecodeError>) {
    let mut sink = EventSink::default();
    let mut d = fx.decoder();
    let ok = feed_chunked(&mut d, &mut sink, bytes, &[]);
    (sink.events, ok, d.error())
}

/// Asserts that `bytes` decodes to the same normalized event sequence for
/// every two-chunk split, and returns that sequence.
pub fn assert_split_invariant(fx: &Fixture, bytes: &[u8]) -> Vec<Event> {
    let (events, ok, err) = run_whole(fx, bytes);
    assert!(ok, "whole-buffer decode failed: {err:?}");
    let expected = normalize(&events);
    for i in 0..=bytes.len() {
        let mut sink = EventSink::default();
        let mut d = fx.decoder();
        let ok = feed_chunked(&mut d, &mut sink, bytes, &[i]);
        assert!(ok, "split at {i} failed: {:?}", d.error());
        assert_eq!(
            normalize(&sink.events),
            expected,
            "split at {i} changed the event sequence"
        );
    }
    expected
}
