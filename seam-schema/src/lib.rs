//! Schema model, handler bindings and visitor interface of the seam decoder.
//!
//! A [`Schema`] is an arena of frozen message and enum definitions that
//! reference one another by index, so mutually recursive messages need no
//! special ownership treatment.  A [`Handlers`] object binds the fields of
//! one message to visitor callbacks (or shim stores) and assigns the dense
//! selector numbers the compiled bytecode carries.  A [`HandlerCache`] holds
//! one frozen `Handlers` per message reachable from a root.  The [`Sink`]
//! trait is the interface the decoder drives.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod error;
mod handlers;
mod schema;
mod sink;

pub use seam_wire::{DescriptorType, WireType};

pub use error::SchemaError;
pub use handlers::{
    BindingSelectors, FieldBinding, HandlerAttrs, HandlerCache, HandlerKind,
    Handlers, HandlersBuilder, Role, SelectorEntry, SeqSelectors, ShimStore,
    Selector, ENDMSG_SELECTOR, STARTMSG_SELECTOR,
};
pub use schema::{
    DefaultValue, EnumDef, EnumId, FieldDef, Label, MessageDef, MsgId, OneofDef,
    Schema, SchemaBuilder, SubDef,
};
pub use sink::{Sink, Status, STATUS_MSG_MAX};
