//! Compiled decoder methods and method groups.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use itertools::Itertools;
use seam_schema::{Handlers, MsgId, Schema};

use crate::dispatch::Dispatch;

/// The compiled decoder for one message × handler binding: a bytecode span
/// inside the group's shared buffer plus the field dispatch table.
#[derive(Debug)]
pub struct DecoderMethod {
    pub(crate) msg: MsgId,
    pub(crate) dest: Arc<Handlers>,
    pub(crate) code_base: u32,
    pub(crate) dispatch: Dispatch,
}

impl DecoderMethod {
    /// The message this method decodes.
    pub const fn msg(&self) -> MsgId {
        self.msg
    }

    /// The handler set this method is bound to.
    pub fn dest_handlers(&self) -> &Arc<Handlers> {
        &self.dest
    }

    /// Word offset of the method's first instruction in the group bytecode.
    pub const fn code_base(&self) -> u32 {
        self.code_base
    }

    /// The field dispatch table.
    pub const fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Whether the method is backed by native code.  The bytecode
    /// interpreter is the only backend, so this is always false.
    pub const fn is_native(&self) -> bool {
        false
    }
}

/// A set of decoder methods that call one another and share one bytecode
/// buffer.  Immutable once compiled; many decoders may execute it
/// concurrently.
#[derive(Debug)]
pub struct MethodGroup {
    pub(crate) schema: Arc<Schema>,
    pub(crate) bytecode: Vec<u32>,
    pub(crate) methods: Vec<DecoderMethod>,
    pub(crate) by_msg: HashMap<MsgId, usize>,
    pub(crate) halt_ofs: u32,
}

impl MethodGroup {
    /// The schema the group was compiled against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The shared bytecode buffer.
    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    /// Number of methods in the group.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Method by index.
    pub fn method(&self, index: usize) -> Option<&DecoderMethod> {
        self.methods.get(index)
    }

    /// Index of the method decoding `msg`, if the group has one.
    pub fn method_for(&self, msg: MsgId) -> Option<usize> {
        self.by_msg.get(&msg).copied()
    }

    /// Renders the group's methods, dispatch tables and bytecode for
    /// debugging.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, m) in self
            .methods
            .iter()
            .enumerate()
            .sorted_by_key(|(_, m)| m.code_base)
        {
            let name = self.schema.msg(m.msg).full_name().to_string();
            let _ = writeln!(out, "method {i} {name} base={:#x}", m.code_base);
            for (key, val) in m.dispatch.entries().sorted() {
                let _ = writeln!(out, "  dispatch {key:#x} -> {val:#x}");
            }
        }
        let _ = writeln!(out, "halt={:#x}", self.halt_ofs);
        out.push_str(&seam_asm::disassemble(&self.bytecode));
        out
    }
}

/// A cloneable handle pairing a shared [`MethodGroup`] with one method
/// index; what a [`Decoder`](crate::Decoder) executes.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    pub(crate) group: Arc<MethodGroup>,
    pub(crate) index: usize,
}

impl MethodHandle {
    /// The owning method group.
    pub fn group(&self) -> &Arc<MethodGroup> {
        &self.group
    }

    /// The method this handle designates.
    pub fn method(&self) -> &DecoderMethod {
        &self.group.methods[self.index]
    }
}
