//! Protobuf wire-format primitives.
//!
//! This crate holds the codec-level building blocks shared by the bytecode
//! compiler and the decoder VM: varint encode/decode (including the
//! guaranteed-slack fast path), zig-zag transforms, tag packing, wire types
//! and descriptor types.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod desc;
mod error;
mod tag;
mod varint;

pub use desc::DescriptorType;
pub use error::WireError;
pub use tag::{Tag, WireType, MAX_FIELD_NUMBER};
pub use varint::{
    byte_width, decode_varint, decode_varint_fast, encode_varint, encoded_tag,
    encode_varint32_packed, zigzag_decode32, zigzag_decode64, zigzag_encode32,
    zigzag_encode64, MAX_VARINT_LEN,
};

/// Number of bytes in a fixed 32-bit wire value.
pub const FIXED32_LEN: usize = 4;

/// Number of bytes in a fixed 64-bit wire value.
pub const FIXED64_LEN: usize = 8;
