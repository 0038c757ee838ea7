use core::fmt;

use crate::handlers::Selector;

/// Maximum number of message bytes a [`Status`] retains.
pub const STATUS_MSG_MAX: usize = 127;

/// Decode status surfaced to sinks and callers: a numeric code plus a
/// bounded, truncated message.  Code 0 means ok.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    code: u32,
    msg: String,
}

impl Status {
    /// Whether no error has been recorded.
    pub fn ok(&self) -> bool {
        self.code == 0
    }

    /// The recorded error code, 0 when ok.
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// The recorded message, truncated to [`STATUS_MSG_MAX`] bytes.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Records an error.  The first recorded error wins; later calls are
    /// ignored until [`Status::clear`].
    pub fn set_error(&mut self, code: u32, msg: &str) {
        if self.code != 0 {
            return;
        }
        self.code = code.max(1);
        let mut end = msg.len().min(STATUS_MSG_MAX);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        self.msg = msg[..end].to_string();
    }

    /// Returns to the ok state.
    pub fn clear(&mut self) {
        self.code = 0;
        self.msg.clear();
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok() {
            write!(f, "ok")
        } else {
            write!(f, "error {}: {}", self.code, self.msg)
        }
    }
}

/// The visitor interface the decoder drives.
///
/// One sink value receives every event of a decode; the selector argument
/// identifies the (field, role) pair, per the [`Handlers`] the decoder
/// method was compiled against.  Within a single buffer feed, callbacks
/// arrive in strict wire order; across suspensions no callback is repeated.
///
/// Callbacks returning `bool` may return `false` to stop the decoder at the
/// current position; the feed call then reports a short consumed count, and
/// feeding the remaining bytes again retries the same callback.  Bindings
/// marked always-ok skip that check.
///
/// [`Handlers`]: crate::Handlers
pub trait Sink {
    /// A message starts.
    fn start_msg(&mut self) -> bool {
        true
    }

    /// A message ends.  `status` carries any error recorded so far.
    fn end_msg(&mut self, _status: &Status) -> bool {
        true
    }

    /// An int32, sint32, sfixed32 or enum value.
    fn on_int32(&mut self, _sel: Selector, _val: i32) -> bool {
        true
    }

    /// An int64, sint64 or sfixed64 value.
    fn on_int64(&mut self, _sel: Selector, _val: i64) -> bool {
        true
    }

    /// A uint32 or fixed32 value.
    fn on_uint32(&mut self, _sel: Selector, _val: u32) -> bool {
        true
    }

    /// A uint64 or fixed64 value.
    fn on_uint64(&mut self, _sel: Selector, _val: u64) -> bool {
        true
    }

    /// A float value.
    fn on_float(&mut self, _sel: Selector, _val: f32) -> bool {
        true
    }

    /// A double value.
    fn on_double(&mut self, _sel: Selector, _val: f64) -> bool {
        true
    }

    /// A bool value.
    fn on_bool(&mut self, _sel: Selector, _val: bool) -> bool {
        true
    }

    /// A string value starts.  `size_hint` is the number of bytes the value
    /// is known to span, when the enclosing delimiter makes it known.
    fn start_str(&mut self, _sel: Selector, _size_hint: u64) -> bool {
        true
    }

    /// A chunk of string bytes.  May be invoked several times for one value
    /// when it spans buffer seams.
    ///
    /// The return value is the number of bytes handled: `bytes.len()`
    /// accepts the chunk, less stops the decoder at the unhandled tail, and
    /// more asks the decoder to skip bytes the sink does not need to see
    /// (bounded by the value's remaining length).
    fn on_str(&mut self, _sel: Selector, bytes: &[u8]) -> usize {
        bytes.len()
    }

    /// A string value ends.
    fn end_str(&mut self, _sel: Selector) -> bool {
        true
    }

    /// A repeated-field sequence starts.
    fn start_seq(&mut self, _sel: Selector) -> bool {
        true
    }

    /// A repeated-field sequence ends.
    fn end_seq(&mut self, _sel: Selector) -> bool {
        true
    }

    /// A submessage value starts.
    fn start_submsg(&mut self, _sel: Selector) -> bool {
        true
    }

    /// A submessage value ends.
    fn end_submsg(&mut self, _sel: Selector) -> bool {
        true
    }

    /// Raw bytes of a skipped unknown field or group, tag included.  The
    /// return value is informational; the bytes are already consumed.
    fn on_unknown(&mut self, bytes: &[u8]) -> usize {
        bytes.len()
    }

    /// Raw storage for shim-bound fields.  Decoders write parsed scalars
    /// into this region directly; the default empty region makes any shim
    /// store fail with a range error.
    fn shim_region(&mut self) -> &mut [u8] {
        &mut []
    }
}
