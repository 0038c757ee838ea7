//! End-to-end decode scenarios: event sequences for valid inputs.

mod common;

use common::*;
use seam_schema::{
    DescriptorType, FieldDef, HandlerCache, Label, Role, SchemaBuilder, SubDef,
};
use seam_vm::CodeCache;
use seam_wire::{zigzag_encode32, zigzag_encode64, WireType};
use std::sync::Arc;
use strum::IntoEnumIterator;

#[test]
fn empty_message() {
    let fx = spec_fixture();
    let mut sink = EventSink::default();
    let mut d = fx.decoder();
    d.start(0);
    assert_eq!(d.put(&mut sink, &[]), 0);
    assert!(d.end(&mut sink));
    assert_eq!(sink.events, vec![Event::StartMsg, Event::EndMsg]);
}

#[test]
fn single_int32_value() {
    // 08 2A
    let fx = spec_fixture();
    let (events, ok, err) = run_whole(&fx, &[0x08, 0x2a]);
    assert!(ok, "{err:?}");
    let v = fx.sel(1, Role::Value);
    assert_eq!(
        events,
        vec![Event::StartMsg, Event::Int32(v, 42), Event::EndMsg]
    );
}

#[test]
fn repeated_strings() {
    // 12 03 66 6F 6F 12 03 62 61 72
    let fx = spec_fixture();
    let bytes = cat(&[
        &tag(2, WireType::Delimited),
        &delim(b"foo"),
        &tag(2, WireType::Delimited),
        &delim(b"bar"),
    ]);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");

    let (start, chunk, end) = (
        fx.sel(2, Role::StartStr),
        fx.sel(2, Role::Str),
        fx.sel(2, Role::EndStr),
    );
    let (seq_start, seq_end) = (fx.sel(2, Role::StartSeq), fx.sel(2, Role::EndSeq));
    assert_eq!(
        events,
        vec![
            Event::StartMsg,
            Event::StartSeq(seq_start),
            Event::StartStr(start, 3),
            Event::Str(chunk, b"foo".to_vec()),
            Event::EndStr(end),
            Event::StartStr(start, 3),
            Event::Str(chunk, b"bar".to_vec()),
            Event::EndStr(end),
            Event::EndSeq(seq_end),
            Event::EndMsg,
        ]
    );
}

#[test]
fn nested_submessage() {
    // 1A 02 08 01
    let fx = spec_fixture();
    let (events, ok, err) = run_whole(&fx, &[0x1a, 0x02, 0x08, 0x01]);
    assert!(ok, "{err:?}");

    let sub = fx.schema.msg_ids().nth(1).unwrap();
    let sub_handlers = fx.handlers_of(sub);
    let b = sel(&sub_handlers, 1, Role::Value);
    assert_eq!(
        events,
        vec![
            Event::StartMsg,
            Event::StartSubMsg(fx.sel(3, Role::StartSubMsg)),
            Event::StartMsg,
            Event::Bool(b, true),
            Event::EndMsg,
            Event::EndSubMsg(fx.sel(3, Role::EndSubMsg)),
            Event::EndMsg,
        ]
    );
}

#[test]
fn unterminated_varint_is_fatal() {
    // A varint whose continuation bit is still set on the tenth byte.
    let fx = spec_fixture();
    let mut bytes = vec![0x08];
    bytes.extend_from_slice(&[0xff; 10]);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(!ok);
    assert_eq!(err, Some(seam_vm::DecodeError::UnterminatedVarint));
    assert_eq!(events, vec![Event::StartMsg]);
}

#[test]
fn ten_byte_varint_with_clear_final_byte_is_valid() {
    // Nine continuation bytes and a clear tenth byte terminate the varint;
    // the low 32 bits of the value reach the int32 callback.
    let fx = spec_fixture();
    let mut bytes = vec![0x08];
    bytes.extend_from_slice(&[0xff; 9]);
    bytes.push(0x7f);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    let v = fx.sel(1, Role::Value);
    assert_eq!(
        events,
        vec![Event::StartMsg, Event::Int32(v, -1), Event::EndMsg]
    );
}

#[test]
fn packed_and_nonpacked_repeated_match() {
    let fx = packed_fixture();
    let (seq_start, seq_end) = (fx.sel(2, Role::StartSeq), fx.sel(2, Role::EndSeq));
    let v = fx.sel(2, Role::Value);
    let expected = vec![
        Event::StartMsg,
        Event::StartSeq(seq_start),
        Event::Int32(v, 1),
        Event::Int32(v, 2),
        Event::Int32(v, 3),
        Event::EndSeq(seq_end),
        Event::EndMsg,
    ];

    // Packed: 12 03 01 02 03
    let packed = cat(&[&tag(2, WireType::Delimited), &delim(&[1, 2, 3])]);
    let (events, ok, err) = run_whole(&fx, &packed);
    assert!(ok, "{err:?}");
    assert_eq!(events, expected);

    // Non-packed: 10 01 10 02 10 03
    let nonpacked = cat(&[
        &tag(2, WireType::Varint),
        &varint(1),
        &tag(2, WireType::Varint),
        &varint(2),
        &tag(2, WireType::Varint),
        &varint(3),
    ]);
    let (events, ok, err) = run_whole(&fx, &nonpacked);
    assert!(ok, "{err:?}");
    assert_eq!(events, expected);
}

#[test]
fn group_fields_emit_submessage_events() {
    let fx = group_fixture();
    let bytes = group(3, &cat(&[&tag(1, WireType::Varint), &varint(1)]));
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    assert_eq!(events[0], Event::StartMsg);
    assert_eq!(events[1], Event::StartSubMsg(fx.sel(3, Role::StartSubMsg)));
    assert_eq!(events[2], Event::StartMsg);
    assert!(matches!(events[3], Event::Bool(_, true)));
    assert_eq!(events[4], Event::EndMsg);
    assert_eq!(events[5], Event::EndSubMsg(fx.sel(3, Role::EndSubMsg)));
    assert_eq!(events[6], Event::EndMsg);
}

#[test]
fn unknown_fields_are_skipped_and_reported() {
    let fx = spec_fixture();
    let unknown = cat(&[&tag(99, WireType::Varint), &varint(7)]);
    let bytes = cat(&[&[0x08, 0x2a], &unknown, &[0x08, 0x2b]]);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    let v = fx.sel(1, Role::Value);
    assert_eq!(
        events,
        vec![
            Event::StartMsg,
            Event::Int32(v, 42),
            Event::Unknown(unknown.clone()),
            Event::Int32(v, 43),
            Event::EndMsg,
        ]
    );
}

#[test]
fn nested_unknown_groups_are_one_contiguous_range() {
    let fx = spec_fixture();
    let inner = group(7, &cat(&[&tag(8, WireType::Varint), &varint(5)]));
    let unknown = group(
        5,
        &cat(&[&tag(6, WireType::Varint), &varint(1), &inner]),
    );
    let bytes = cat(&[&[0x08, 0x2a], &unknown, &[0x08, 0x2b]]);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    let v = fx.sel(1, Role::Value);
    assert_eq!(
        events,
        vec![
            Event::StartMsg,
            Event::Int32(v, 42),
            Event::Unknown(unknown.clone()),
            Event::Int32(v, 43),
            Event::EndMsg,
        ]
    );
}

#[test]
fn unknown_fields_before_known_end_group() {
    // Unknown field inside a known group still lands in the right scope.
    let fx = group_fixture();
    let unknown = cat(&[&tag(9, WireType::Fixed32), &fixed32(0xdead)]);
    let bytes = group(
        3,
        &cat(&[&tag(1, WireType::Varint), &varint(1), &unknown]),
    );
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    assert!(events.contains(&Event::Unknown(unknown)));
}

#[test]
fn shim_bound_fields_store_without_callbacks() {
    let fx = shim_fixture();
    let bytes = cat(&[
        &tag(1, WireType::Varint),
        &varint(42),
        &tag(2, WireType::Fixed64),
        &fixed64(7),
        &tag(3, WireType::Varint),
        &varint(1),
    ]);
    let mut sink = EventSink::with_shim(17);
    let mut d = fx.decoder();
    assert!(feed_chunked(&mut d, &mut sink, &bytes, &[]));

    // Only the message bracket events; values went straight to the region.
    assert_eq!(sink.events, vec![Event::StartMsg, Event::EndMsg]);
    assert_eq!(sink.shim[0] & 0b111, 0b111, "hasbits set");
    assert_eq!(i32::from_le_bytes(sink.shim[4..8].try_into().unwrap()), 42);
    assert_eq!(u64::from_le_bytes(sink.shim[8..16].try_into().unwrap()), 7);
    assert_eq!(sink.shim[16], 1);
}

#[test]
fn shim_store_outside_region_is_fatal() {
    let fx = shim_fixture();
    let bytes = cat(&[&tag(2, WireType::Fixed64), &fixed64(7)]);
    let mut sink = EventSink::with_shim(4); // too small for offset 8
    let mut d = fx.decoder();
    assert!(!feed_chunked(&mut d, &mut sink, &bytes, &[]));
    assert_eq!(d.error(), Some(seam_vm::DecodeError::ShimOutOfRange));
}

#[test]
fn big_group_numbers_round_trip_through_the_vm() {
    let number = 1 << 24;
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Big");
    let g = b.add_message("test.Big.G");
    b.add_field(
        m,
        FieldDef::new(number, "g", DescriptorType::Group, Label::Optional)
            .with_subdef(SubDef::Message(g)),
    )
    .unwrap();
    b.add_field(g, FieldDef::new(1, "b", DescriptorType::Bool, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    let cache = HandlerCache::build(schema, m, move |_, msg, hb| {
        if msg.index() == 0 {
            hb.bind_submsg(number)?;
        } else {
            hb.bind_value(1)?;
        }
        Ok(())
    })
    .unwrap();
    let mut code = CodeCache::new(Arc::new(cache));
    let method = code.get_method(m).unwrap();

    let bytes = group(number, &cat(&[&tag(1, WireType::Varint), &varint(1)]));
    let mut sink = EventSink::default();
    let mut d = seam_vm::Decoder::new(method);
    assert!(feed_chunked(&mut d, &mut sink, &bytes, &[]));
    assert!(sink.events.iter().any(|e| matches!(e, Event::Bool(_, true))));
}

#[test]
fn every_scalar_type_delivers_values() {
    for ty in DescriptorType::iter().filter(|t| t.is_scalar()) {
        let fx = scalar_fixture(ty);
        let number = ty as u32;
        let rep = number + 20;
        let v = fx.sel(number, Role::Value);
        let rv = fx.sel(rep, Role::Value);
        let (seq_start, seq_end) = (fx.sel(rep, Role::StartSeq), fx.sel(rep, Role::EndSeq));

        let enc33 = encode_scalar(ty, 33);
        let enc66 = encode_scalar(ty, 66);
        let wt = ty.native_wire_type();

        // Singular, twice.
        let bytes = cat(&[&tag(number, wt), &enc33, &tag(number, wt), &enc66]);
        let (events, ok, err) = run_whole(&fx, &bytes);
        assert!(ok, "{ty:?}: {err:?}");
        assert_eq!(
            events,
            vec![
                Event::StartMsg,
                scalar_event(ty, v, 33),
                scalar_event(ty, v, 66),
                Event::EndMsg,
            ],
            "{ty:?} singular"
        );

        let expected_rep = vec![
            Event::StartMsg,
            Event::StartSeq(seq_start),
            scalar_event(ty, rv, 33),
            scalar_event(ty, rv, 66),
            Event::EndSeq(seq_end),
            Event::EndMsg,
        ];

        // Non-packed repeated.
        let bytes = cat(&[&tag(rep, wt), &enc33, &tag(rep, wt), &enc66]);
        let (events, ok, err) = run_whole(&fx, &bytes);
        assert!(ok, "{ty:?}: {err:?}");
        assert_eq!(events, expected_rep, "{ty:?} non-packed");

        // Packed repeated produces the identical sequence.
        let bytes = cat(&[
            &tag(rep, WireType::Delimited),
            &delim(&cat(&[&enc33, &enc66])),
        ]);
        let (events, ok, err) = run_whole(&fx, &bytes);
        assert!(ok, "{ty:?}: {err:?}");
        assert_eq!(events, expected_rep, "{ty:?} packed");
    }
}

fn encode_scalar(ty: DescriptorType, v: i64) -> Vec<u8> {
    use DescriptorType::*;
    match ty {
        Double => fixed64((v as f64).to_bits()),
        Float => fixed32((v as f32).to_bits()),
        Int64 | Uint64 | Int32 | Uint32 | Bool | Enum => varint(v as u64),
        Fixed64 => fixed64(v as u64),
        Fixed32 => fixed32(v as u32),
        Sfixed32 => fixed32(v as i32 as u32),
        Sfixed64 => fixed64(v as u64),
        Sint32 => varint(u64::from(zigzag_encode32(v as i32))),
        Sint64 => varint(zigzag_encode64(v)),
        String | Bytes | Message | Group => unreachable!("not a scalar"),
    }
}

fn scalar_event(ty: DescriptorType, sel: u32, v: i64) -> Event {
    use DescriptorType::*;
    match ty {
        Double => Event::Double(sel, v as f64),
        Float => Event::Float(sel, v as f32),
        Int64 | Sfixed64 | Sint64 => Event::Int64(sel, v),
        Int32 | Sfixed32 | Sint32 | Enum => Event::Int32(sel, v as i32),
        Uint64 | Fixed64 => Event::Uint64(sel, v as u64),
        Uint32 | Fixed32 => Event::Uint32(sel, v as u32),
        Bool => Event::Bool(sel, v != 0),
        String | Bytes | Message | Group => unreachable!("not a scalar"),
    }
}

#[test]
fn empty_string_value_skips_the_chunk_callback() {
    let fx = spec_fixture();
    let bytes = cat(&[&tag(2, WireType::Delimited), &delim(b"")]);
    let (events, ok, err) = run_whole(&fx, &bytes);
    assert!(ok, "{err:?}");
    let (start, end) = (fx.sel(2, Role::StartStr), fx.sel(2, Role::EndStr));
    assert_eq!(
        events,
        vec![
            Event::StartMsg,
            Event::StartSeq(fx.sel(2, Role::StartSeq)),
            Event::StartStr(start, 0),
            Event::EndStr(end),
            Event::EndSeq(fx.sel(2, Role::EndSeq)),
            Event::EndMsg,
        ]
    );
}

#[test]
fn lazy_submessage_fields_decode_as_strings_under_a_lazy_cache() {
    let mut b = SchemaBuilder::new();
    let m = b.add_message("test.Outer");
    let sub = b.add_message("test.Inner");
    b.add_field(
        m,
        FieldDef::new(4, "inner", DescriptorType::Message, Label::Optional)
            .with_subdef(SubDef::Message(sub)),
    )
    .unwrap();
    b.add_field(sub, FieldDef::new(1, "b", DescriptorType::Bool, Label::Optional))
        .unwrap();
    let schema = b.freeze().unwrap();
    let build_cache = || {
        HandlerCache::build(schema.clone(), m, |_, msg, hb| {
            if msg.index() == 0 {
                hb.bind_lazy_submsg(4)?;
            }
            Ok(())
        })
        .unwrap()
    };

    let inner = cat(&[&tag(1, WireType::Varint), &varint(1)]);
    let bytes = submsg(4, &inner);

    // Lazy cache: the submessage arrives as raw string bytes.
    let mut code = CodeCache::new(Arc::new(build_cache()));
    code.set_lazy(true);
    let method = code.get_method(m).unwrap();
    let h = method.method().dest_handlers().clone();
    let mut sink = EventSink::default();
    let mut d = seam_vm::Decoder::new(method);
    assert!(feed_chunked(&mut d, &mut sink, &bytes, &[]));
    assert_eq!(
        sink.events,
        vec![
            Event::StartMsg,
            Event::StartStr(sel(&h, 4, Role::StartStr), inner.len() as u64),
            Event::Str(sel(&h, 4, Role::Str), inner.clone()),
            Event::EndStr(sel(&h, 4, Role::EndStr)),
            Event::EndMsg,
        ]
    );

    // Eager cache: a lazy binding has no submethod, so the field is
    // decoded as an unknown field.
    let mut code = CodeCache::new(Arc::new(build_cache()));
    let method = code.get_method(m).unwrap();
    let mut sink = EventSink::default();
    let mut d = seam_vm::Decoder::new(method);
    assert!(feed_chunked(&mut d, &mut sink, &bytes, &[]));
    assert_eq!(
        sink.events,
        vec![Event::StartMsg, Event::Unknown(bytes.clone()), Event::EndMsg]
    );
}

#[test]
fn frozen_method_groups_are_shared_across_threads() {
    let fx = spec_fixture();
    let handles: Vec<_> = (0u8..4)
        .map(|i| {
            let method = fx.method.clone();
            std::thread::spawn(move || {
                let mut sink = EventSink::default();
                let mut d = seam_vm::Decoder::new(method);
                d.decode_buf(&mut sink, &[0x08, i]).unwrap();
                sink.events.len()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 3);
    }
}

#[test]
fn decode_buf_drives_the_full_cycle_and_is_reusable() {
    let fx = spec_fixture();
    let mut d = fx.decoder();
    let v = fx.sel(1, Role::Value);

    let mut sink = EventSink::default();
    d.decode_buf(&mut sink, &[0x08, 0x2a]).unwrap();
    assert_eq!(
        sink.events,
        vec![Event::StartMsg, Event::Int32(v, 42), Event::EndMsg]
    );
    assert_eq!(d.bytes_parsed(), 2);

    // Same decoder again after an internal reset.
    let mut sink = EventSink::default();
    d.decode_buf(&mut sink, &[0x08, 0x01]).unwrap();
    assert_eq!(
        sink.events,
        vec![Event::StartMsg, Event::Int32(v, 1), Event::EndMsg]
    );
}

#[test]
fn consumed_bytes_total_the_message_length() {
    let fx = spec_fixture();
    let bytes = cat(&[
        &[0x08, 0x2a],
        &tag(2, WireType::Delimited),
        &delim(b"hello"),
        &[0x1a, 0x02, 0x08, 0x01],
    ]);
    let mut sink = EventSink::default();
    let mut d = fx.decoder();
    assert!(feed_chunked(&mut d, &mut sink, &bytes, &[1, 3, 4, 9]));
    assert_eq!(d.bytes_parsed(), bytes.len() as u64);
}
