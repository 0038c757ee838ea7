//! Bytecode compiler: lowers (schema × handler bindings) into decoder
//! methods.
//!
//! Compilation walks the messages reachable from a root through submessage
//! bindings, then emits every method twice: the first pass assigns each
//! method its offset in the shared buffer, the second re-emits with all
//! offsets known so `CALL` instructions link correctly.  Forward jumps
//! within a method are threaded through the instructions' offset fields as
//! a linked list and patched when the label is defined.

use std::collections::HashMap;
use std::sync::Arc;

use seam_asm::{pack, Opcode};
use seam_schema::{
    BindingSelectors, FieldBinding, HandlerCache, Handlers, MsgId, Schema,
    SeqSelectors, ENDMSG_SELECTOR, STARTMSG_SELECTOR,
};
use seam_wire::{byte_width, encoded_tag, DescriptorType, WireType};

use crate::dispatch::{pack_dispatch, unpack_dispatch, Dispatch, DISPATCH_ENDMSG, NO_WIRE_TYPE};
use crate::method::{DecoderMethod, MethodGroup, MethodHandle};

/// Jump target 0: fall into field dispatch instead of a local label.
const LABEL_DISPATCH: i32 = 0;
/// Top of a repeated-field loop.
const LABEL_LOOPSTART: i32 = 1;
/// Exit of a repeated-field loop.
const LABEL_LOOPBREAK: i32 = 2;
/// Start of the most recent field; the method's trailing branch target.
const LABEL_FIELD: i32 = 3;
/// The method's end-of-message epilogue.
const LABEL_ENDMSG: i32 = 4;

const MAX_LABEL: usize = 5;
const EMPTY_LABEL: i32 = -1;

struct Compiler<'c> {
    cache: &'c HandlerCache,
    schema: Arc<Schema>,
    lazy: bool,
    code: Vec<u32>,
    methods: Vec<DecoderMethod>,
    by_msg: HashMap<MsgId, usize>,
    fwd_labels: [i32; MAX_LABEL],
    back_labels: [i32; MAX_LABEL],
}

impl<'c> Compiler<'c> {
    fn new(cache: &'c HandlerCache, lazy: bool) -> Self {
        Self {
            cache,
            schema: cache.schema().clone(),
            lazy,
            code: Vec::new(),
            methods: Vec::new(),
            by_msg: HashMap::new(),
            fwd_labels: [EMPTY_LABEL; MAX_LABEL],
            back_labels: [EMPTY_LABEL; MAX_LABEL],
        }
    }

    /// Creates a method for every message reachable from `msg` through
    /// submessage bindings, breaking cycles through the index map.
    fn find_methods(&mut self, msg: MsgId) {
        if self.by_msg.contains_key(&msg) {
            return;
        }
        let Some(handlers) = self.cache.get(msg).cloned() else {
            return;
        };
        self.by_msg.insert(msg, self.methods.len());
        self.methods.push(DecoderMethod {
            msg,
            dest: handlers.clone(),
            code_base: 0,
            dispatch: Dispatch::new(),
        });
        let schema = self.schema.clone();
        for binding in handlers.bindings() {
            if matches!(binding.selectors(), BindingSelectors::SubMsg { .. }) {
                if let Some(sub) = schema
                    .msg(msg)
                    .field_by_number(binding.number())
                    .and_then(|f| f.message_subdef())
                {
                    self.find_methods(sub);
                }
            }
        }
    }

    fn compile_all(&mut self) {
        self.code.clear();
        self.fwd_labels = [EMPTY_LABEL; MAX_LABEL];
        self.back_labels = [EMPTY_LABEL; MAX_LABEL];
        for i in 0..self.methods.len() {
            self.compile_method(i);
        }
    }

    /// Emits the bytecode for one method, filling its dispatch table.
    fn compile_method(&mut self, mi: usize) {
        let schema = self.schema.clone();
        let dest = self.methods[mi].dest.clone();
        let msg = self.methods[mi].msg;
        let md = schema.msg(msg);

        self.methods[mi].dispatch = Dispatch::new();
        self.methods[mi].code_base = self.pcofs();

        self.op_setdispatch(mi);
        self.op_arg(Opcode::StartMsg, STARTMSG_SELECTOR);
        self.label(LABEL_FIELD);
        let body_start = self.code.len();

        for field in md.fields() {
            let Some(binding) = dest.binding(field.number()) else {
                continue;
            };
            match binding.selectors() {
                BindingSelectors::SubMsg { .. } => {
                    self.generate_msgfield(mi, field.number(), field.descriptor_type(), binding);
                }
                BindingSelectors::Str { .. } => {
                    if field.descriptor_type() == DescriptorType::Message {
                        // Lazy submessage: only a lazy cache defers it to the
                        // string path; otherwise there is no submethod and
                        // the field is decoded as unknown.
                        if self.lazy && binding.is_lazy() {
                            self.generate_delimfield(mi, field.number(), binding);
                        }
                    } else {
                        self.generate_delimfield(mi, field.number(), binding);
                    }
                }
                BindingSelectors::Value { .. } => {
                    self.generate_primitivefield(
                        mi,
                        field.number(),
                        field.descriptor_type(),
                        binding,
                    );
                }
            }
        }

        // With no compiled fields the loop body still has to detect
        // end-of-message and dispatch unknown fields.
        if self.code.len() == body_start {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.op_arg(Opcode::Dispatch, 0);
        }

        self.op_jump(Opcode::Branch, -LABEL_FIELD);

        self.label(LABEL_ENDMSG);
        let epilogue = u64::from(self.pcofs() - self.methods[mi].code_base);
        self.methods[mi].dispatch.insert(DISPATCH_ENDMSG, epilogue);
        self.op_arg(Opcode::EndMsg, ENDMSG_SELECTOR);
        self.op0(Opcode::Ret);
    }

    /// One non-lazy message or group field.
    fn generate_msgfield(
        &mut self,
        mi: usize,
        number: u32,
        ty: DescriptorType,
        binding: &FieldBinding,
    ) {
        let Some(sub) = self
            .schema
            .clone()
            .msg(self.methods[mi].msg)
            .field_by_number(number)
            .and_then(|f| f.message_subdef())
            .and_then(|m| self.by_msg.get(&m).copied())
        else {
            // No submethod; the field is decoded as unknown.
            return;
        };
        let BindingSelectors::SubMsg { start, end, seq } = *binding.selectors() else {
            return;
        };

        self.label(LABEL_FIELD);
        let wire_type = if ty == DescriptorType::Message {
            WireType::Delimited
        } else {
            WireType::StartGroup
        };

        if let Some(SeqSelectors { start: seq_start, end: seq_end }) = seq {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, wire_type, LABEL_DISPATCH);
            self.dispatch_target(mi, number, wire_type);
            self.op_arg(Opcode::PushTagDelim, 0);
            self.op_arg(Opcode::StartSeq, seq_start);
            self.label(LABEL_LOOPSTART);
            self.put_push(number, ty);
            self.op_arg(Opcode::StartSubMsg, start);
            self.op_call(sub);
            self.op0(Opcode::Pop);
            self.op_arg(Opcode::EndSubMsg, end);
            if wire_type == WireType::Delimited {
                self.op0(Opcode::SetDelim);
            }
            self.op_jump(Opcode::CheckDelim, LABEL_LOOPBREAK);
            self.put_checktag(number, wire_type, LABEL_LOOPBREAK);
            self.op_jump(Opcode::Branch, -LABEL_LOOPSTART);
            self.label(LABEL_LOOPBREAK);
            self.op0(Opcode::Pop);
            self.op_arg(Opcode::EndSeq, seq_end);
        } else {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, wire_type, LABEL_DISPATCH);
            self.dispatch_target(mi, number, wire_type);
            self.put_push(number, ty);
            self.op_arg(Opcode::StartSubMsg, start);
            self.op_call(sub);
            self.op0(Opcode::Pop);
            self.op_arg(Opcode::EndSubMsg, end);
            if wire_type == WireType::Delimited {
                self.op0(Opcode::SetDelim);
            }
        }
    }

    /// One string, bytes or lazy-submessage field.
    fn generate_delimfield(&mut self, mi: usize, number: u32, binding: &FieldBinding) {
        let BindingSelectors::Str { start, chunk, end, seq } = *binding.selectors() else {
            return;
        };

        self.label(LABEL_FIELD);
        if let Some(SeqSelectors { start: seq_start, end: seq_end }) = seq {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, WireType::Delimited, LABEL_DISPATCH);
            self.dispatch_target(mi, number, WireType::Delimited);
            self.op_arg(Opcode::PushTagDelim, 0);
            self.op_arg(Opcode::StartSeq, seq_start);
            self.label(LABEL_LOOPSTART);
            self.op0(Opcode::PushLenDelim);
            self.op_arg(Opcode::StartStr, start);
            self.op_arg(Opcode::String, chunk);
            self.op_arg(Opcode::EndStr, end);
            self.op0(Opcode::Pop);
            self.op0(Opcode::SetDelim);
            self.op_jump(Opcode::CheckDelim, LABEL_LOOPBREAK);
            self.put_checktag(number, WireType::Delimited, LABEL_LOOPBREAK);
            self.op_jump(Opcode::Branch, -LABEL_LOOPSTART);
            self.label(LABEL_LOOPBREAK);
            self.op0(Opcode::Pop);
            self.op_arg(Opcode::EndSeq, seq_end);
        } else {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, WireType::Delimited, LABEL_DISPATCH);
            self.dispatch_target(mi, number, WireType::Delimited);
            self.op0(Opcode::PushLenDelim);
            self.op_arg(Opcode::StartStr, start);
            self.op_arg(Opcode::String, chunk);
            self.op_arg(Opcode::EndStr, end);
            self.op0(Opcode::Pop);
            self.op0(Opcode::SetDelim);
        }
    }

    /// One primitive field, with both packed and non-packed paths for
    /// repeated fields sharing a dispatch slot.
    fn generate_primitivefield(
        &mut self,
        mi: usize,
        number: u32,
        ty: DescriptorType,
        binding: &FieldBinding,
    ) {
        let BindingSelectors::Value { value, seq } = *binding.selectors() else {
            return;
        };

        self.label(LABEL_FIELD);

        // From a decoding perspective, enum is int32.
        let parse_ty = if ty == DescriptorType::Enum {
            DescriptorType::Int32
        } else {
            ty
        };
        let Ok(parse_op) = Opcode::try_from(parse_ty as u8) else {
            return;
        };
        let wire_type = ty.native_wire_type();

        if let Some(SeqSelectors { start: seq_start, end: seq_end }) = seq {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, WireType::Delimited, LABEL_DISPATCH);
            self.dispatch_target(mi, number, WireType::Delimited);
            self.op0(Opcode::PushLenDelim);
            self.op_arg(Opcode::StartSeq, seq_start); // packed
            self.label(LABEL_LOOPSTART);
            self.op_arg(parse_op, value);
            self.op_jump(Opcode::CheckDelim, LABEL_LOOPBREAK);
            self.op_jump(Opcode::Branch, -LABEL_LOOPSTART);
            self.dispatch_target(mi, number, wire_type);
            self.op_arg(Opcode::PushTagDelim, 0);
            self.op_arg(Opcode::StartSeq, seq_start); // non-packed
            self.label(LABEL_LOOPSTART);
            self.op_arg(parse_op, value);
            self.op_jump(Opcode::CheckDelim, LABEL_LOOPBREAK);
            self.put_checktag(number, wire_type, LABEL_LOOPBREAK);
            self.op_jump(Opcode::Branch, -LABEL_LOOPSTART);
            self.label(LABEL_LOOPBREAK);
            self.op0(Opcode::Pop); // packed and non-packed join
            self.op_arg(Opcode::EndSeq, seq_end);
            self.op0(Opcode::SetDelim);
        } else {
            self.op_jump(Opcode::CheckDelim, LABEL_ENDMSG);
            self.put_checktag(number, wire_type, LABEL_DISPATCH);
            self.dispatch_target(mi, number, wire_type);
            self.op_arg(parse_op, value);
        }
    }

    /// Marks the current position as the dispatch target of (field, wire
    /// type), repacking the primary slot when the field already has one.
    fn dispatch_target(&mut self, mi: usize, number: u32, wire_type: WireType) {
        let ofs = u64::from(self.pcofs() - self.methods[mi].code_base);
        let d = &mut self.methods[mi].dispatch;
        let key = u64::from(number);
        if let Some(prev) = d.remove(key) {
            let (prev_ofs, wt1, wt2) = unpack_dispatch(prev);
            debug_assert_eq!(wt2, NO_WIRE_TYPE);
            d.insert(key, pack_dispatch(prev_ofs, wt1, wire_type as u8));
            d.insert(Dispatch::secondary_key(number), ofs);
        } else {
            d.insert(key, pack_dispatch(ofs, wire_type as u8, NO_WIRE_TYPE));
        }
    }

    /// The frame push for a submessage value: length-delimited for
    /// messages, tag-delimited carrying the group number for groups.
    fn put_push(&mut self, number: u32, ty: DescriptorType) {
        if ty == DescriptorType::Message {
            self.op0(Opcode::PushLenDelim);
        } else if number >= 1 << 24 {
            self.op_arg(Opcode::PushTagDelim, 0);
            self.op_setbiggroupnum(number);
        } else {
            self.op_arg(Opcode::PushTagDelim, number);
        }
    }

    /// Emits the shortest tag matcher for (field, wire type); mismatches
    /// jump to `label`, or fall into dispatch for [`LABEL_DISPATCH`].
    fn put_checktag(&mut self, number: u32, wire_type: WireType, label: i32) {
        let tag = encoded_tag(number, wire_type);
        let ofs = self.label_ref(label);
        match byte_width(tag) {
            1 => {
                let mut instr = pack::op_tag(Opcode::Tag1, tag as u16);
                pack::set_ofs(&mut instr, ofs);
                self.put32(instr);
            }
            2 => {
                let mut instr = pack::op_tag(Opcode::Tag2, tag as u16);
                pack::set_ofs(&mut instr, ofs);
                self.put32(instr);
            }
            n => {
                let mut instr = pack::op_tag(Opcode::TagN, n as u16);
                pack::set_ofs(&mut instr, ofs);
                self.put32(instr);
                self.put32(tag as u32);
                self.put32((tag >> 32) as u32);
            }
        }
    }

    fn put32(&mut self, word: u32) {
        self.code.push(word);
    }

    fn pcofs(&self) -> u32 {
        self.code.len() as u32
    }

    fn op0(&mut self, op: Opcode) {
        self.put32(pack::op(op));
    }

    fn op_arg(&mut self, op: Opcode, arg: u32) {
        self.put32(pack::op_arg(op, arg));
    }

    fn op_jump(&mut self, op: Opcode, label: i32) {
        let ofs = self.label_ref(label);
        let mut instr = pack::op(op);
        pack::set_ofs(&mut instr, ofs);
        self.put32(instr);
    }

    fn op_call(&mut self, target: usize) {
        let dest = i64::from(self.methods[target].code_base);
        let ofs = dest - (i64::from(self.pcofs()) + 1);
        let mut instr = pack::op(Opcode::Call);
        pack::set_ofs(&mut instr, ofs as i32);
        self.put32(instr);
    }

    fn op_setdispatch(&mut self, method: usize) {
        self.put32(pack::op(Opcode::SetDispatch));
        self.put32(method as u32);
    }

    fn op_setbiggroupnum(&mut self, group: u32) {
        self.put32(pack::op(Opcode::SetBigGroupNum));
        self.put32(group);
    }

    /// Defines local label `l` at the current position, patching every
    /// forward reference threaded through the instructions' offset fields.
    fn label(&mut self, l: i32) {
        let l = l as usize;
        let mut val = self.fwd_labels[l];
        while val != EMPTY_LABEL {
            let codep = val as usize;
            let next_ofs = pack::get_ofs(self.code[codep]);
            let words = pack::instruction_words(self.code[codep]) as i32;
            let mut instr = self.code[codep];
            pack::set_ofs(&mut instr, self.code.len() as i32 - codep as i32 - words);
            self.code[codep] = instr;
            val = if next_ofs != 0 {
                codep as i32 + next_ofs
            } else {
                EMPTY_LABEL
            };
        }
        self.fwd_labels[l] = EMPTY_LABEL;
        self.back_labels[l] = self.code.len() as i32;
    }

    /// Offset to write into an instruction referencing `label`.  Negative
    /// labels are backward references resolved immediately; positive ones
    /// are prepended to the label's patch list.
    fn label_ref(&mut self, label: i32) -> i32 {
        if label == LABEL_DISPATCH {
            0
        } else if label < 0 {
            self.back_labels[(-label) as usize] - (self.code.len() as i32 + 1)
        } else {
            let l = label as usize;
            let here = self.code.len() as i32;
            let ret = if self.fwd_labels[l] == EMPTY_LABEL {
                0
            } else {
                self.fwd_labels[l] - here
            };
            self.fwd_labels[l] = here;
            ret
        }
    }
}

/// Compiles the method group for the messages reachable from `root`, or
/// `None` when the handler cache has no bindings for `root`.
fn compile_group(cache: &HandlerCache, root: MsgId, lazy: bool) -> Option<MethodGroup> {
    cache.get(root)?;
    let mut c = Compiler::new(cache, lazy);
    c.find_methods(root);

    // Two passes: the first assigns every method its code offset, the
    // second re-emits with all offsets known so CALL targets link.
    c.compile_all();
    c.compile_all();

    let halt_ofs = c.pcofs();
    c.op0(Opcode::Halt);

    for m in &c.methods {
        tracing::debug!(
            msg = c.schema.msg(m.msg).full_name(),
            code_base = m.code_base,
            dispatch_entries = m.dispatch.len(),
            "compiled decoder method"
        );
    }

    Some(MethodGroup {
        schema: c.schema,
        bytecode: c.code,
        methods: c.methods,
        by_msg: c.by_msg,
        halt_ofs,
    })
}

/// Compiles and caches one [`MethodGroup`] per root message, against a
/// shared [`HandlerCache`].
pub struct CodeCache {
    handlers: Arc<HandlerCache>,
    groups: HashMap<MsgId, Arc<MethodGroup>>,
    lazy: bool,
}

impl CodeCache {
    /// Creates a cache compiling against `handlers`.
    pub fn new(handlers: Arc<HandlerCache>) -> Self {
        Self {
            handlers,
            groups: HashMap::new(),
            lazy: false,
        }
    }

    /// Compiles lazily-bound submessage fields as strings.  Affects groups
    /// compiled after the call.
    pub fn set_lazy(&mut self, lazy: bool) {
        self.lazy = lazy;
    }

    /// The handler cache this code cache compiles against.
    pub fn handlers(&self) -> &Arc<HandlerCache> {
        &self.handlers
    }

    /// The decoder method for `msg`, compiling its group on first use.
    /// `None` when the handler cache has no bindings for `msg`.
    pub fn get_method(&mut self, msg: MsgId) -> Option<MethodHandle> {
        if !self.groups.contains_key(&msg) {
            let group = compile_group(&self.handlers, msg, self.lazy)?;
            self.groups.insert(msg, Arc::new(group));
        }
        let group = self.groups.get(&msg).cloned()?;
        let index = group.method_for(msg)?;
        Some(MethodHandle { group, index })
    }

    /// Handlers for `msg`, looked up through the handler cache.
    pub fn handlers_for(&self, msg: MsgId) -> Option<&Arc<Handlers>> {
        self.handlers.get(msg)
    }
}
