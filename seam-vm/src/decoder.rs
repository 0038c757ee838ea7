//! The resumable decoder: bytecode interpreter plus buffer manager.
//!
//! Decoding is fully resumable.  The interpreter keeps a program counter
//! into the method group's bytecode and all parsing state in this struct,
//! so a feed call may stop at any byte and the next call continues
//! transparently.  A fair amount of the logic handles values spanning
//! buffer seams: up to [`MAX_RESIDUAL_BYTES`] trailing bytes of the
//! previous buffer are kept in the residual buffer and replayed before the
//! next user buffer.

use std::sync::Arc;

use seam_schema::{Handlers, Sink, Status};

use crate::consts::{DEFAULT_MAX_NESTING, MAX_RESIDUAL_BYTES};
use crate::error::{DecodeError, Stop};
use crate::method::{DecoderMethod, MethodGroup, MethodHandle};

mod buffer;
mod vm;

/// Which buffer the read position (or the checkpoint) lies in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cur {
    /// The buffer passed to the current feed call.
    User,
    /// The decoder-owned residual buffer.
    Residual,
}

/// One open delimited region or group.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Absolute stream offset where this frame's delimited region ends.
    /// Tag-delimited frames (groups, non-packed sequences) inherit the
    /// parent's end, as does the top frame (`u64::MAX` until `end`).
    end_ofs: u64,
    /// 0 for length-delimited regions, positive for a known group,
    /// negative for an unknown group being skipped.
    groupnum: i32,
    /// Index of the method whose dispatch table is active in this frame.
    method: usize,
}

/// The streaming decoder.
///
/// Created against one compiled method, fed through [`Decoder::start`],
/// [`Decoder::put`] and [`Decoder::end`], and reusable after
/// [`Decoder::reset`].  A decoder must not be entered concurrently, but any
/// number of decoders may share one frozen [`MethodGroup`].
#[derive(Debug)]
pub struct Decoder {
    group: Arc<MethodGroup>,
    method: usize,

    // Interpreter state.
    pc: usize,
    last: usize,
    call_stack: Vec<usize>,
    frames: Vec<Frame>,
    max_nesting: usize,

    // Current buffer window.  `pos`, `buf_len`, `data_end`, `delim_end`
    // and `checkpoint` are indices into the buffer named by `cur` (resp.
    // `checkpoint_cur`); `bufstart_ofs` is the absolute stream offset of
    // that buffer's first byte.
    cur: Cur,
    pos: usize,
    buf_len: usize,
    data_end: usize,
    delim_end: Option<usize>,
    checkpoint: usize,
    checkpoint_cur: Cur,
    bufstart_ofs: u64,

    residual: [u8; MAX_RESIDUAL_BYTES],
    residual_len: usize,

    /// Bytes to discard from the input before parsing resumes; may exceed
    /// any single user buffer.
    skip: u64,
    /// Length of the buffer passed to the current feed call.
    size_param: usize,

    /// Accumulated bytes of the unknown field or group currently being
    /// skipped, delivered as one range when the skip completes.
    unknown_buf: Vec<u8>,

    status: Status,
    error: Option<DecodeError>,
}

impl Decoder {
    /// Creates a decoder executing `method`.
    pub fn new(method: MethodHandle) -> Self {
        let mut d = Self {
            group: method.group,
            method: method.index,
            pc: 0,
            last: 0,
            call_stack: Vec::with_capacity(DEFAULT_MAX_NESTING),
            frames: Vec::with_capacity(DEFAULT_MAX_NESTING),
            max_nesting: DEFAULT_MAX_NESTING,
            cur: Cur::Residual,
            pos: 0,
            buf_len: 0,
            data_end: 0,
            delim_end: None,
            checkpoint: 0,
            checkpoint_cur: Cur::Residual,
            bufstart_ofs: 0,
            residual: [0; MAX_RESIDUAL_BYTES],
            residual_len: 0,
            skip: 0,
            size_param: 0,
            unknown_buf: Vec::new(),
            status: Status::default(),
            error: None,
        };
        d.reset();
        d
    }

    /// Returns the decoder to its post-construction state, clearing any
    /// recorded error.
    pub fn reset(&mut self) {
        let method = self.method;
        self.frames.clear();
        self.frames.push(Frame {
            end_ofs: u64::MAX,
            groupnum: 0,
            method,
        });
        self.call_stack.clear();
        self.pc = self.group.methods[method].code_base as usize;
        self.last = self.pc;
        self.cur = Cur::Residual;
        self.pos = 0;
        self.buf_len = 0;
        self.data_end = 0;
        self.delim_end = None;
        self.checkpoint = 0;
        self.checkpoint_cur = Cur::Residual;
        self.bufstart_ofs = 0;
        self.residual_len = 0;
        self.skip = 0;
        self.size_param = 0;
        self.unknown_buf.clear();
        self.status.clear();
        self.error = None;
    }

    /// Begins a new message.  `size_hint` is the expected total size when
    /// the caller knows it; the interpreter does not currently use it.
    pub fn start(&mut self, size_hint: u64) {
        let _ = size_hint;
        self.reset();
        self.call_stack.push(self.group.halt_ofs as usize);
        self.pc = self.group.methods[self.method].code_base as usize;
    }

    /// Feeds a slice of wire bytes, returning how many the decoder
    /// consumed.
    ///
    /// A return shorter than `buf.len()` means the decoder suspended: on a
    /// fatal error (see [`Decoder::error`]), or because a sink callback
    /// returned false, in which case feeding the unconsumed tail again
    /// retries that callback.  A return *longer* than `buf.len()` means
    /// the next `n - buf.len()` stream bytes are skippable and need not be
    /// presented; an empty slice is always acceptable and drives any
    /// pending skip.
    pub fn put<S: Sink>(&mut self, sink: &mut S, buf: &[u8]) -> usize {
        match self.run(sink, buf) {
            Ok(n) | Err(Stop(n)) => n,
        }
    }

    /// Declares end-of-stream.  Drives the root method's epilogue and
    /// returns false when the stream stopped inside a value, a delimited
    /// region, a skip, or with an error recorded.
    pub fn end<S: Sink>(&mut self, sink: &mut S) -> bool {
        if !self.status.ok() {
            return false;
        }
        if self.residual_len > 0 {
            self.seterr(DecodeError::ResidualAtEof);
            return false;
        }
        if self.skip > 0 {
            self.seterr(DecodeError::SkipAtEof);
            return false;
        }
        if self.top().end_ofs != u64::MAX {
            self.seterr(DecodeError::DelimitedAtEof);
            return false;
        }

        // The caller's end() call indicates that the message ends here;
        // fabricate the delimiter and run the epilogue.
        let end = self.offset();
        let top = self.frames.len() - 1;
        self.frames[top].end_ofs = end;
        self.frames[0].end_ofs = end;

        // If the previous instruction was the delimiter check, rewind to it
        // so the fabricated end is observed before the pending tag match.
        let base = self.group.methods[self.method].code_base as usize;
        if self.pc != base {
            let prev = self.pc - 1;
            if opcode_at(&self.group.bytecode, prev) == Some(seam_asm::Opcode::CheckDelim) {
                debug_assert!(matches!(
                    opcode_at(&self.group.bytecode, self.pc),
                    Some(
                        seam_asm::Opcode::Tag1
                            | seam_asm::Opcode::Tag2
                            | seam_asm::Opcode::TagN
                            | seam_asm::Opcode::Dispatch
                    )
                ));
                self.pc = prev;
            }
        }

        let _ = self.put(sink, &[]);

        if !self.call_stack.is_empty() {
            self.seterr(DecodeError::EofInSubmessage);
            return false;
        }
        self.status.ok()
    }

    /// Decodes one complete message held in `buf`: `start`, `put`, `end`.
    pub fn decode_buf<S: Sink>(
        &mut self,
        sink: &mut S,
        buf: &[u8],
    ) -> Result<(), DecodeError> {
        self.start(buf.len() as u64);
        let n = self.put(sink, buf);
        if let Some(err) = self.error {
            return Err(err);
        }
        if n < buf.len() {
            return Err(DecodeError::HandlerRejected);
        }
        if self.end(sink) {
            Ok(())
        } else {
            Err(self.error.unwrap_or(DecodeError::HandlerRejected))
        }
    }

    /// The decoder's status object.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// The first fatal error recorded since the last reset, if any.
    pub fn error(&self) -> Option<DecodeError> {
        self.error
    }

    /// Absolute stream offset of the next unparsed byte.
    pub fn bytes_parsed(&self) -> u64 {
        self.offset()
    }

    /// The method this decoder executes.
    pub fn method(&self) -> &DecoderMethod {
        &self.group.methods[self.method]
    }

    /// Current frame-stack capacity.
    pub fn max_nesting(&self) -> usize {
        self.max_nesting
    }

    /// Changes the frame-stack capacity.  Returns false without changing
    /// anything when `max` is smaller than the current open depth.
    pub fn set_max_nesting(&mut self, max: usize) -> bool {
        if max < self.frames.len() {
            return false;
        }
        self.max_nesting = max;
        true
    }

    fn top(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let i = self.frames.len() - 1;
        &mut self.frames[i]
    }

    fn cur_handlers(&self) -> &Arc<Handlers> {
        &self.group.methods[self.top().method].dest
    }

    /// Records a fatal error in the typed slot and the status object.
    fn seterr(&mut self, err: DecodeError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.status.set_error(err.code(), &err.to_string());
    }
}

fn opcode_at(code: &[u32], pc: usize) -> Option<seam_asm::Opcode> {
    code.get(pc)
        .and_then(|&w| seam_asm::Instruction::new(w).opcode().ok())
}
