//! The main decoding loop: a traditional bytecode dispatch loop over the
//! method group's code words, plus tag dispatch and unknown-field
//! skipping.

use seam_asm::{Instruction, Opcode};
use seam_schema::{ShimStore, Sink};
use seam_wire::{
    byte_width, decode_varint_fast, zigzag_decode32, zigzag_decode64, WireType,
    MAX_VARINT_LEN,
};

use crate::dispatch::{unpack_dispatch, Dispatch, DISPATCH_ENDMSG};
use crate::error::{Ctl, DecodeError};

use super::{opcode_at, Cur, Decoder, Frame};

/// Outcome of a tag-matching slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagMatch {
    Matched,
    Mismatched,
}

/// Outcome of skipping unknown data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SkipOutcome {
    /// Back to normal field parsing.
    Ok,
    /// Hit the end-group tag of the group being parsed; the caller jumps
    /// to the method epilogue.
    EndGroup,
}

impl Decoder {
    /// One feed call: resume from captured state, then run the loop.
    pub(super) fn run<S: Sink>(&mut self, sink: &mut S, u: &[u8]) -> Ctl<usize> {
        let end_group = self.resume(sink, u)?;
        if end_group {
            self.goto_endmsg();
        }
        self.run_vm(sink, u)
    }

    /// Re-establishes the buffer window from an initial state or a previous
    /// suspension, runs any pending skip, and continues skipping an open
    /// unknown group.
    fn resume<S: Sink>(&mut self, sink: &mut S, u: &[u8]) -> Ctl<bool> {
        debug_assert!(!(self.skip > 0 && self.residual_len > 0));
        self.size_param = u.len();

        let mut len = u.len();
        if self.skip > 0 && self.skip >= len as u64 {
            // The pending skip covers this entire buffer.  We still enter
            // the loop with an empty window, because non-consuming ops
            // (delimiter checks, pops) may fire at this offset.
            self.skip -= len as u64;
            self.bufstart_ofs += len as u64;
            len = 0;
        }

        if self.residual_len > 0 {
            debug_assert!(self.cur == Cur::Residual && self.pos == 0);
        } else {
            self.switch_to_user(len);
        }
        self.checkpoint = self.pos;
        self.checkpoint_cur = self.cur;

        // A pending skip not covered by the branch above ends inside this
        // buffer.
        if self.skip > 0 {
            let skip = self.skip;
            self.skip = 0;
            self.skip_bytes(skip)?;
            self.set_checkpoint();
        }

        // Inside an unknown group, continue parsing unknown values.
        if self.top().groupnum < 0 {
            let out = self.skip_unknown(sink, u, None)?;
            self.set_checkpoint();
            return Ok(out == SkipOutcome::EndGroup);
        }
        Ok(false)
    }

    /// The interpreter proper.  Consuming ops advance the checkpoint when
    /// they complete; `Err(Stop)` unwinds with the consumed count.
    fn run_vm<S: Sink>(&mut self, sink: &mut S, u: &[u8]) -> Ctl<usize> {
        let group = self.group.clone();
        let code: &[u32] = &group.bytecode;
        loop {
            self.last = self.pc;
            let instr = Instruction::new(code[self.pc]);
            self.pc += 1;
            let Ok(op) = instr.opcode() else {
                debug_assert!(false, "invalid opcode in compiled bytecode");
                return Ok(self.size_param);
            };
            let arg = instr.arg();
            tracing::trace!(pc = self.last, ofs = self.offset(), %op, arg, "vm step");

            match op {
                Opcode::ParseDouble => {
                    let v = self.decode_fixed64(u)?;
                    self.emit_f64(sink, arg, f64::from_bits(v))?;
                }
                Opcode::ParseFloat => {
                    let v = self.decode_fixed32(u)?;
                    self.emit_f32(sink, arg, f32::from_bits(v))?;
                }
                Opcode::ParseInt64 => {
                    let v = self.decode_varint(u)?;
                    self.emit_i64(sink, arg, v as i64)?;
                }
                Opcode::ParseUint64 => {
                    let v = self.decode_varint(u)?;
                    self.emit_u64(sink, arg, v)?;
                }
                Opcode::ParseInt32 => {
                    let v = self.decode_varint(u)?;
                    self.emit_i32(sink, arg, v as i32)?;
                }
                Opcode::ParseFixed64 => {
                    let v = self.decode_fixed64(u)?;
                    self.emit_u64(sink, arg, v)?;
                }
                Opcode::ParseFixed32 => {
                    let v = self.decode_fixed32(u)?;
                    self.emit_u32(sink, arg, v)?;
                }
                Opcode::ParseBool => {
                    let v = self.decode_varint(u)?;
                    self.emit_bool(sink, arg, v != 0)?;
                }
                Opcode::ParseUint32 => {
                    let v = self.decode_varint(u)?;
                    self.emit_u32(sink, arg, v as u32)?;
                }
                Opcode::ParseSfixed32 => {
                    let v = self.decode_fixed32(u)?;
                    self.emit_i32(sink, arg, v as i32)?;
                }
                Opcode::ParseSfixed64 => {
                    let v = self.decode_fixed64(u)?;
                    self.emit_i64(sink, arg, v as i64)?;
                }
                Opcode::ParseSint32 => {
                    let v = self.decode_varint(u)?;
                    self.emit_i32(sink, arg, zigzag_decode32(v as u32))?;
                }
                Opcode::ParseSint64 => {
                    let v = self.decode_varint(u)?;
                    self.emit_i64(sink, arg, zigzag_decode64(v))?;
                }

                Opcode::SetDispatch => {
                    let method = code[self.pc] as usize;
                    self.pc += 1;
                    self.top_mut().method = method;
                }
                Opcode::StartMsg => {
                    let ok = sink.start_msg();
                    self.handler_check(ok, arg)?;
                }
                Opcode::EndMsg => {
                    let ok = sink.end_msg(&self.status);
                    self.handler_check(ok, arg)?;
                }
                Opcode::StartSeq => {
                    let ok = sink.start_seq(arg);
                    self.handler_check(ok, arg)?;
                }
                Opcode::EndSeq => {
                    let ok = sink.end_seq(arg);
                    self.handler_check(ok, arg)?;
                }
                Opcode::StartSubMsg => {
                    let ok = sink.start_submsg(arg);
                    self.handler_check(ok, arg)?;
                }
                Opcode::EndSubMsg => {
                    let ok = sink.end_submsg(arg);
                    self.handler_check(ok, arg)?;
                }
                Opcode::StartStr => {
                    let len = self.delim_remaining();
                    let ok = sink.start_str(arg, len);
                    self.handler_check(ok, arg)?;
                    if len == 0 {
                        // Nothing for the STRING op to feed.
                        self.pc += 1;
                    }
                }
                Opcode::String => {
                    let len = self.curbufleft();
                    let n = {
                        let buf = self.curbuf(u);
                        sink.on_str(arg, &buf[self.pos..self.pos + len])
                    };
                    if n > len {
                        // The sink wants bytes it has not seen skipped.
                        if n as u64 > self.delim_remaining() {
                            self.seterr(DecodeError::StringSkipPastEnd);
                            return Err(self.suspend());
                        }
                        self.skip_bytes(n as u64)?;
                    } else {
                        self.advance(n);
                        if n < len || self.delim_end.is_none() {
                            // Not finished with this string yet.
                            self.pc -= 1;
                            if n > 0 {
                                self.set_checkpoint();
                            }
                            return Err(self.suspend());
                        }
                    }
                }
                Opcode::EndStr => {
                    let ok = sink.end_str(arg);
                    self.handler_check(ok, arg)?;
                }

                Opcode::PushTagDelim => {
                    self.push_tag_delim(arg as i32)?;
                }
                Opcode::PushLenDelim => {
                    let len = self.decode_v32(u)?;
                    let end = self.offset() + u64::from(len);
                    self.decoder_push(end)?;
                    self.set_delim_end();
                }
                Opcode::Pop => {
                    debug_assert!(self.frames.len() > 1);
                    self.frames.pop();
                }
                Opcode::SetDelim => self.set_delim_end(),
                Opcode::SetBigGroupNum => {
                    let group_num = code[self.pc] as i32;
                    self.pc += 1;
                    self.top_mut().groupnum = group_num;
                }
                Opcode::CheckDelim => {
                    // We never consume past data_end, which covers
                    // delim_end whenever it lies in this buffer.
                    debug_assert!(self.delim_end.map_or(true, |d| self.pos <= d));
                    if self.delim_end == Some(self.pos) {
                        self.jump(instr.long_ofs());
                    }
                }
                Opcode::Call => {
                    self.call_stack.push(self.pc);
                    self.jump(instr.long_ofs());
                }
                Opcode::Ret => {
                    debug_assert!(!self.call_stack.is_empty());
                    if let Some(ret) = self.call_stack.pop() {
                        self.pc = ret;
                    }
                }
                Opcode::Branch => self.jump(instr.long_ofs()),

                Opcode::Tag1 => {
                    if self.curbufleft() == 0 {
                        return Err(self.suspend());
                    }
                    let expected = (instr.tag16() & 0xff) as u8;
                    if self.curbuf(u)[self.pos] == expected {
                        self.advance(1);
                    } else if self.bad_tag(sink, u, instr.short_ofs())? {
                        continue; // short jump taken; no checkpoint
                    }
                }
                Opcode::Tag2 => {
                    if self.curbufleft() == 0 {
                        return Err(self.suspend());
                    }
                    let expected = instr.tag16();
                    if self.curbufleft() >= 2 {
                        let buf = self.curbuf(u);
                        let actual =
                            u16::from_le_bytes([buf[self.pos], buf[self.pos + 1]]);
                        if actual == expected {
                            self.advance(2);
                        } else if self.bad_tag(sink, u, instr.short_ofs())? {
                            continue;
                        }
                    } else {
                        match self.checktag_slow(u, u64::from(expected))? {
                            TagMatch::Matched => {}
                            TagMatch::Mismatched => {
                                if self.bad_tag(sink, u, instr.short_ofs())? {
                                    continue;
                                }
                            }
                        }
                    }
                }
                Opcode::TagN => {
                    let expected =
                        u64::from(code[self.pc]) | (u64::from(code[self.pc + 1]) << 32);
                    self.pc += 2;
                    match self.checktag_slow(u, expected)? {
                        TagMatch::Matched => {}
                        TagMatch::Mismatched => {
                            if self.bad_tag(sink, u, instr.short_ofs())? {
                                continue;
                            }
                        }
                    }
                }

                Opcode::Dispatch => {
                    self.dispatch(sink, u)?;
                }
                Opcode::Halt => {
                    return Ok(self.size_param);
                }
            }

            if op.consumes_input() {
                self.set_checkpoint();
            }
        }
    }

    /// Mismatched tag: offset 0 falls into field dispatch, anything else is
    /// a local jump.  Returns whether a jump was taken (in which case the
    /// instruction did not consume input and must not checkpoint).
    fn bad_tag<S: Sink>(&mut self, sink: &mut S, u: &[u8], sofs: i8) -> Ctl<bool> {
        if sofs == 0 {
            self.dispatch(sink, u)?;
            Ok(false)
        } else {
            self.jump(i32::from(sofs));
            Ok(true)
        }
    }

    fn jump(&mut self, ofs: i32) {
        self.pc = (self.pc as i64 + i64::from(ofs)) as usize;
    }

    /// Decodes a varint at the read position.  The fast path requires ten
    /// readable bytes of slack; otherwise the byte-by-byte slow path runs,
    /// which can suspend mid-value.
    fn decode_varint(&mut self, u: &[u8]) -> Ctl<u64> {
        if self.curbufleft() > 0 {
            let b = self.curbuf(u)[self.pos];
            if b & 0x80 == 0 {
                self.advance(1);
                return Ok(u64::from(b));
            }
        }
        if self.curbufleft() >= MAX_VARINT_LEN {
            let decoded = {
                let buf = self.curbuf(u);
                decode_varint_fast(&buf[self.pos..])
            };
            match decoded {
                Some((val, n)) => {
                    self.advance(n);
                    Ok(val)
                }
                None => {
                    self.seterr(DecodeError::UnterminatedVarint);
                    Err(self.suspend())
                }
            }
        } else {
            self.decode_varint_slow(u)
        }
    }

    fn decode_varint_slow(&mut self, u: &[u8]) -> Ctl<u64> {
        let mut byte: u8 = 0x80;
        let mut val = 0u64;
        let mut bitpos = 0u32;
        while bitpos < 70 && byte & 0x80 != 0 {
            let [b] = self.getbytes::<1>(u)?;
            byte = b;
            val |= u64::from(b & 0x7f).wrapping_shl(bitpos);
            bitpos += 7;
        }
        if bitpos == 70 && byte & 0x80 != 0 {
            self.seterr(DecodeError::UnterminatedVarint);
            return Err(self.suspend());
        }
        Ok(val)
    }

    /// Decodes a varint that must fit 32 bits (tags and lengths).
    fn decode_v32(&mut self, u: &[u8]) -> Ctl<u32> {
        let v = self.decode_varint(u)?;
        if v > u64::from(u32::MAX) {
            self.seterr(DecodeError::Oversized32BitVarint);
            return Err(self.suspend());
        }
        Ok(v as u32)
    }

    fn decode_fixed32(&mut self, u: &[u8]) -> Ctl<u32> {
        Ok(u32::from_le_bytes(self.getbytes::<4>(u)?))
    }

    fn decode_fixed64(&mut self, u: &[u8]) -> Ctl<u64> {
        Ok(u64::from_le_bytes(self.getbytes::<8>(u)?))
    }

    /// Matches an encoded tag that is short in the buffer, peeking across
    /// the residual/user seam; saves a partial prefix match for the next
    /// feed.
    fn checktag_slow(&mut self, u: &[u8], expected: u64) -> Ctl<TagMatch> {
        let bytes = byte_width(expected);
        let mut data = [0u8; 8];
        let read = self.peekbytes(u, &mut data[..bytes]);
        let exp = expected.to_le_bytes();
        if read == bytes && data[..bytes] == exp[..bytes] {
            // Advance past the matched bytes.
            let mut matched = [0u8; 8];
            self.getbytes_into(u, &mut matched[..bytes])?;
            Ok(TagMatch::Matched)
        } else if read < bytes && data[..read] == exp[..read] {
            Err(self.suspend_save(u))
        } else {
            Ok(TagMatch::Mismatched)
        }
    }

    /// Pushes a frame ending at absolute offset `end`.
    fn decoder_push(&mut self, end: u64) -> Ctl<()> {
        let fr = *self.top();
        if end > fr.end_ofs {
            self.seterr(DecodeError::SubmessageTooLong);
            return Err(self.suspend());
        }
        if self.frames.len() >= self.max_nesting {
            self.seterr(DecodeError::NestingTooDeep);
            return Err(self.suspend());
        }
        self.frames.push(Frame {
            end_ofs: end,
            groupnum: 0,
            method: fr.method,
        });
        Ok(())
    }

    /// Pushes a tag-delimited frame.  Inheriting the parent's delimiter
    /// keeps a corrupt stream from parsing past the enclosing end when the
    /// group's end tag never arrives.
    fn push_tag_delim(&mut self, groupnum: i32) -> Ctl<()> {
        let end = self.top().end_ofs;
        self.decoder_push(end)?;
        self.top_mut().groupnum = groupnum;
        Ok(())
    }

    /// Decodes a tag and jumps to the matching field's bytecode; unknown
    /// fields are skipped, and a matching end-group tag jumps to the
    /// method epilogue.
    fn dispatch<S: Sink>(&mut self, sink: &mut S, u: &[u8]) -> Ctl<()> {
        let group = self.group.clone();
        let tag = self.decode_v32(u)?;
        let wire_type = (tag & 0x7) as u8;
        let fieldnum = tag >> 3;

        // Packed/non-packed compatibility: the wire type is checked against
        // both possibilities before the field counts as unknown.
        let method = &group.methods[self.top().method];
        if u64::from(fieldnum) != DISPATCH_ENDMSG {
            if let Some(val) = method.dispatch.lookup(u64::from(fieldnum)) {
                let (ofs, wt1, wt2) = unpack_dispatch(val);
                if wire_type == wt1 {
                    self.pc = method.code_base as usize + ofs as usize;
                    return Ok(());
                }
                if wire_type == wt2 {
                    if let Some(alt) =
                        method.dispatch.lookup(Dispatch::secondary_key(fieldnum))
                    {
                        self.pc = method.code_base as usize + alt as usize;
                        return Ok(());
                    }
                }
            }
        }

        // Unknown field or end-group.  Back up to the delimiter check
        // preceding the matcher that sent us here, so the delimited end is
        // re-checked once the unknown data is gone.
        self.last -= 1;
        self.pc = self.last;
        debug_assert_eq!(
            opcode_at(&group.bytecode, self.last),
            Some(Opcode::CheckDelim)
        );

        match self.skip_unknown(sink, u, Some((fieldnum, wire_type)))? {
            SkipOutcome::EndGroup => {
                self.goto_endmsg();
                Ok(())
            }
            SkipOutcome::Ok => Ok(()),
        }
    }

    /// Skips one unknown field, or, inside an unknown group, unknown
    /// fields until the group closes.  Accumulated bytes are handed to the
    /// sink as one contiguous range per enclosing scope.
    pub(super) fn skip_unknown<S: Sink>(
        &mut self,
        sink: &mut S,
        u: &[u8],
        first: Option<(u32, u8)>,
    ) -> Ctl<SkipOutcome> {
        if first.is_some() {
            // Fresh unknown field; drop bytes stranded by a skip that
            // spilled out of an earlier buffer.
            self.unknown_buf.clear();
        }
        let mut pending = first;
        loop {
            let (fieldnum, wire_type) = match pending.take() {
                Some(t) => t,
                None => {
                    let tag = self.decode_v32(u)?;
                    (tag >> 3, (tag & 0x7) as u8)
                }
            };
            if fieldnum == 0 {
                self.seterr(DecodeError::ZeroFieldNumber);
                return Err(self.suspend());
            }

            match wire_type {
                w if w == WireType::Varint as u8 => {
                    self.decode_varint(u)?;
                }
                w if w == WireType::Fixed32 as u8 => {
                    self.skip_bytes(4)?;
                }
                w if w == WireType::Fixed64 as u8 => {
                    self.skip_bytes(8)?;
                }
                w if w == WireType::Delimited as u8 => {
                    let len = self.decode_v32(u)?;
                    self.skip_bytes(u64::from(len))?;
                }
                w if w == WireType::StartGroup as u8 => {
                    self.push_tag_delim(-(fieldnum as i32))?;
                }
                w if w == WireType::EndGroup as u8 => {
                    if fieldnum as i32 == -self.top().groupnum {
                        // Closes the unknown group we are inside.
                        self.frames.pop();
                    } else if fieldnum as i32 == self.top().groupnum {
                        return Ok(SkipOutcome::EndGroup);
                    } else {
                        self.seterr(DecodeError::UnmatchedEndGroup);
                        return Err(self.suspend());
                    }
                }
                _ => {
                    self.seterr(DecodeError::InvalidWireType);
                    return Err(self.suspend());
                }
            }

            self.stash_unknown(u);
            if self.top().groupnum >= 0 {
                if !self.unknown_buf.is_empty() {
                    sink.on_unknown(&self.unknown_buf);
                    self.unknown_buf.clear();
                }
                return Ok(SkipOutcome::Ok);
            }
            // Still inside an unknown group; keep accumulating.
            self.set_checkpoint();
        }
    }

    /// Jumps to the current method's end-of-message epilogue.
    pub(super) fn goto_endmsg(&mut self) {
        let group = self.group.clone();
        let method = &group.methods[self.top().method];
        if let Some(ofs) = method.dispatch.lookup(DISPATCH_ENDMSG) {
            self.pc = method.code_base as usize + ofs as usize;
        } else {
            debug_assert!(false, "dispatch table lacks the end-of-message slot");
        }
    }

    /// Applies a callback's verdict: a false return suspends at the last
    /// checkpoint unless the selector is bound always-ok.
    fn handler_check(&mut self, ok: bool, sel: u32) -> Ctl<()> {
        if ok || self.cur_handlers().always_ok(sel) {
            Ok(())
        } else {
            Err(self.suspend())
        }
    }

    fn emit_i32<S: Sink>(&mut self, sink: &mut S, sel: u32, val: i32) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_le_bytes());
        }
        let ok = sink.on_int32(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_i64<S: Sink>(&mut self, sink: &mut S, sel: u32, val: i64) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_le_bytes());
        }
        let ok = sink.on_int64(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_u32<S: Sink>(&mut self, sink: &mut S, sel: u32, val: u32) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_le_bytes());
        }
        let ok = sink.on_uint32(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_u64<S: Sink>(&mut self, sink: &mut S, sel: u32, val: u64) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_le_bytes());
        }
        let ok = sink.on_uint64(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_f32<S: Sink>(&mut self, sink: &mut S, sel: u32, val: f32) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_bits().to_le_bytes());
        }
        let ok = sink.on_float(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_f64<S: Sink>(&mut self, sink: &mut S, sel: u32, val: f64) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &val.to_bits().to_le_bytes());
        }
        let ok = sink.on_double(sel, val);
        self.handler_check(ok, sel)
    }

    fn emit_bool<S: Sink>(&mut self, sink: &mut S, sel: u32, val: bool) -> Ctl<()> {
        if let Some(shim) = self.cur_handlers().shim(sel) {
            return self.store_shim(sink, shim, &[u8::from(val)]);
        }
        let ok = sink.on_bool(sel, val);
        self.handler_check(ok, sel)
    }

    /// Writes a parsed scalar directly into the sink's shim region and
    /// sets the presence bit; no callback runs.
    fn store_shim<S: Sink>(
        &mut self,
        sink: &mut S,
        shim: ShimStore,
        bytes: &[u8],
    ) -> Ctl<()> {
        let region = sink.shim_region();
        let offset = shim.offset as usize;
        let mut ok = match offset.checked_add(bytes.len()) {
            Some(end) if end <= region.len() => {
                region[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            _ => false,
        };
        if ok {
            if let Some(hasbit) = shim.hasbit {
                let byte = (hasbit / 8) as usize;
                if byte < region.len() {
                    region[byte] |= 1 << (hasbit % 8);
                } else {
                    ok = false;
                }
            }
        }
        if ok {
            Ok(())
        } else {
            self.seterr(DecodeError::ShimOutOfRange);
            Err(self.suspend())
        }
    }
}
