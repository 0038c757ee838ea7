//! Resumable protobuf wire-format decoder driven by a bytecode VM.
//!
//! A [`CodeCache`] compiles one bytecode program per message reachable from
//! a root, against the handler bindings of a
//! [`HandlerCache`](seam_schema::HandlerCache).  A [`Decoder`] executes such
//! a program over byte slices fed through its byte-sink entry points,
//! reifying wire data into [`Sink`](seam_schema::Sink) callbacks.  Feeding
//! may stop at any byte; the decoder captures all state and resumes
//! transparently on the next feed.
//!
//! ```
//! use seam_schema::{
//!     DescriptorType, FieldDef, HandlerCache, Label, SchemaBuilder, Selector,
//!     Sink,
//! };
//! use seam_vm::{CodeCache, Decoder};
//!
//! let mut b = SchemaBuilder::new();
//! let msg = b.add_message("demo.Msg");
//! b.add_field(msg, FieldDef::new(1, "n", DescriptorType::Int32, Label::Optional))
//!     .unwrap();
//! let schema = b.freeze().unwrap();
//!
//! let cache = HandlerCache::build(schema, msg, |_, _, b| {
//!     b.bind_value(1)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! #[derive(Default)]
//! struct Last(i32);
//! impl Sink for Last {
//!     fn on_int32(&mut self, _sel: Selector, val: i32) -> bool {
//!         self.0 = val;
//!         true
//!     }
//! }
//!
//! let mut code = CodeCache::new(cache.into());
//! let method = code.get_method(msg).unwrap();
//! let mut decoder = Decoder::new(method);
//! let mut sink = Last::default();
//! decoder.decode_buf(&mut sink, &[0x08, 0x2a]).unwrap();
//! assert_eq!(sink.0, 42);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod consts;
mod compiler;
mod decoder;
mod dispatch;
mod error;
mod method;

pub use compiler::CodeCache;
pub use decoder::Decoder;
pub use dispatch::{Dispatch, DISPATCH_ENDMSG, NO_WIRE_TYPE};
pub use error::DecodeError;
pub use method::{DecoderMethod, MethodGroup, MethodHandle};

/// Commonly used items.
pub mod prelude {
    pub use crate::{CodeCache, DecodeError, Decoder, MethodHandle};
    pub use seam_schema::{
        DescriptorType, FieldDef, HandlerCache, HandlersBuilder, Label, MsgId,
        Schema, SchemaBuilder, Selector, Sink, Status, SubDef,
    };
}
