//! Buffer management: the decoder operates on one buffer at a time, either
//! the caller's slice or residual bytes kept from the previous feed, and
//! suspends by capturing everything needed to continue from the next call.

use crate::consts::MAX_RESIDUAL_BYTES;
use crate::error::{Ctl, DecodeError, Stop};

use super::{Cur, Decoder};

impl Decoder {
    /// The buffer the read position currently lies in.
    pub(super) fn curbuf<'a>(&'a self, u: &'a [u8]) -> &'a [u8] {
        match self.cur {
            Cur::User => &u[..self.buf_len.min(u.len())],
            Cur::Residual => &self.residual[..self.buf_len],
        }
    }

    /// Bytes readable before end-of-buffer or the current delimited end,
    /// whichever comes first.
    pub(super) fn curbufleft(&self) -> usize {
        debug_assert!(self.data_end >= self.pos);
        self.data_end - self.pos
    }

    /// Bytes readable before end-of-buffer.
    pub(super) fn bufleft(&self) -> usize {
        self.buf_len - self.pos
    }

    /// Absolute stream offset of the read position.
    pub(super) fn offset(&self) -> u64 {
        self.bufstart_ofs + self.pos as u64
    }

    /// Bytes left before the end of the innermost delimited region.
    pub(super) fn delim_remaining(&self) -> u64 {
        self.top().end_ofs.saturating_sub(self.offset())
    }

    pub(super) fn advance(&mut self, n: usize) {
        debug_assert!(self.curbufleft() >= n);
        self.pos += n;
    }

    /// Recomputes `data_end`/`delim_end` from the top frame's delimiter
    /// projected into the current buffer; must run whenever either the
    /// buffer or the frame stack changes.
    pub(super) fn set_delim_end(&mut self) {
        let delim_ofs = self.top().end_ofs.wrapping_sub(self.bufstart_ofs);
        if delim_ofs <= self.buf_len as u64 {
            self.data_end = delim_ofs as usize;
            self.delim_end = Some(delim_ofs as usize);
        } else {
            self.data_end = self.buf_len;
            self.delim_end = None;
        }
    }

    pub(super) fn switch_to_user(&mut self, len: usize) {
        self.cur = Cur::User;
        self.pos = 0;
        self.buf_len = len;
        self.set_delim_end();
    }

    pub(super) fn switch_to_residual(&mut self) {
        self.cur = Cur::Residual;
        self.pos = 0;
        self.buf_len = self.residual_len;
        self.set_delim_end();
    }

    /// Moves from the exhausted residual buffer onto the user buffer.
    fn advance_to_user(&mut self) {
        debug_assert_eq!(self.curbufleft(), 0);
        self.bufstart_ofs += self.buf_len as u64;
        self.switch_to_user(self.size_param);
    }

    /// Advances the checkpoint to the read position.  Everything before the
    /// checkpoint is owed to the caller as consumed; everything after it
    /// must be preserved across a suspension.
    pub(super) fn set_checkpoint(&mut self) {
        debug_assert!(self.checkpoint != self.pos || self.checkpoint_cur != self.cur);
        self.checkpoint = self.pos;
        self.checkpoint_cur = self.cur;
    }

    /// Suspends at the last checkpoint without saving residual bytes.
    /// Unconsumed bytes stay with the caller, reported via a short count.
    pub(super) fn suspend(&mut self) -> Stop {
        self.pc = self.last;
        if self.checkpoint_cur == Cur::Residual {
            // No user bytes consumed; reposition on the residual bytes so
            // the retry replays them.
            if self.cur == Cur::User {
                self.bufstart_ofs -= self.residual_len as u64;
            }
            self.switch_to_residual();
            Stop(0)
        } else {
            let ret = self.size_param - (self.buf_len - self.checkpoint);
            self.bufstart_ofs += self.checkpoint as u64;
            self.residual_len = 0;
            self.switch_to_residual();
            self.checkpoint = 0;
            self.checkpoint_cur = Cur::Residual;
            Stop(ret)
        }
    }

    /// Suspends at the last checkpoint and saves the unconsumed bytes into
    /// the residual buffer; used when more bytes are needed to finish a
    /// value that may not be contiguous in the caller's buffers.  Consumes
    /// the full user buffer.
    pub(super) fn suspend_save(&mut self, u: &[u8]) -> Stop {
        self.pc = self.last;
        if self.checkpoint_cur == Cur::Residual {
            // Checkpoint still in the residual buffer; append the user
            // bytes behind the ones already saved.
            debug_assert!(self.residual_len + self.size_param <= MAX_RESIDUAL_BYTES);
            if self.cur == Cur::User {
                self.bufstart_ofs -= self.residual_len as u64;
            }
            let n = self.size_param.min(u.len());
            self.residual[self.residual_len..self.residual_len + n]
                .copy_from_slice(&u[..n]);
            self.residual_len += n;
        } else {
            debug_assert_eq!(self.cur, Cur::User);
            self.pos = self.checkpoint;
            let save = self.curbufleft();
            debug_assert!(save <= MAX_RESIDUAL_BYTES);
            self.residual[..save].copy_from_slice(&u[self.pos..self.pos + save]);
            self.residual_len = save;
            self.bufstart_ofs = self.offset();
        }
        self.switch_to_residual();
        self.checkpoint = 0;
        self.checkpoint_cur = Cur::Residual;
        Stop(self.size_param)
    }

    fn consume_into(&mut self, u: &[u8], out: &mut [u8]) {
        debug_assert!(out.len() <= self.curbufleft());
        let start = self.pos;
        match self.cur {
            Cur::User => out.copy_from_slice(&u[start..start + out.len()]),
            Cur::Residual => out.copy_from_slice(&self.residual[start..start + out.len()]),
        }
        self.pos += out.len();
    }

    /// Reads exactly `N` bytes, crossing from the residual buffer into the
    /// user buffer if needed; suspends when they are not all available.
    pub(super) fn getbytes<const N: usize>(&mut self, u: &[u8]) -> Ctl<[u8; N]> {
        let mut out = [0u8; N];
        self.getbytes_into(u, &mut out)?;
        Ok(out)
    }

    pub(super) fn getbytes_into(&mut self, u: &[u8], out: &mut [u8]) -> Ctl<()> {
        if self.curbufleft() >= out.len() {
            self.consume_into(u, out);
            Ok(())
        } else {
            self.getbytes_slow(u, out)
        }
    }

    fn getbytes_slow(&mut self, u: &[u8], out: &mut [u8]) -> Ctl<()> {
        let avail = self.curbufleft();
        debug_assert!(avail < out.len());
        let (head, tail) = out.split_at_mut(avail);
        self.consume_into(u, head);
        if self.cur == Cur::Residual {
            self.advance_to_user();
        }
        if self.curbufleft() >= tail.len() {
            self.consume_into(u, tail);
            Ok(())
        } else if self.delim_end == Some(self.data_end) {
            self.seterr(DecodeError::TruncatedValue);
            Err(self.suspend())
        } else {
            Err(self.suspend_save(u))
        }
    }

    /// Copies up to `out.len()` bytes without consuming them, reading past
    /// the residual buffer into the user buffer.  Returns how many bytes
    /// were available.
    pub(super) fn peekbytes(&self, u: &[u8], out: &mut [u8]) -> usize {
        let avail = self.curbufleft();
        if avail >= out.len() {
            let buf = self.curbuf(u);
            out.copy_from_slice(&buf[self.pos..self.pos + out.len()]);
            return out.len();
        }
        let buf = self.curbuf(u);
        out[..avail].copy_from_slice(&buf[self.pos..self.pos + avail]);
        let mut read = avail;
        if self.cur == Cur::Residual {
            let extra = (out.len() - read).min(self.size_param.min(u.len()));
            out[read..read + extra].copy_from_slice(&u[..extra]);
            read += extra;
        }
        read
    }

    /// Skips `bytes` bytes of the stream, which may be more than the
    /// current buffer holds.  In that case the surplus is recorded in the
    /// skip counter and reported to the caller as a long read count, so the
    /// skipped bytes never have to be presented.
    pub(super) fn skip_bytes(&mut self, bytes: u64) -> Ctl<()> {
        debug_assert_eq!(self.skip, 0);
        if bytes > self.delim_remaining() {
            self.seterr(DecodeError::SkipPastEnd);
            return Err(self.suspend());
        }
        if self.bufleft() as u64 >= bytes {
            self.advance(bytes as usize);
            Ok(())
        } else {
            self.pc = self.last;
            let remaining = bytes - self.curbufleft() as u64;
            self.bufstart_ofs += self.buf_len as u64;
            self.residual_len = 0;
            self.skip = remaining;
            self.switch_to_residual();
            Err(Stop(self.size_param + remaining as usize))
        }
    }

    /// Appends the bytes between the checkpoint and the read position to
    /// the unknown-field accumulator.
    pub(super) fn stash_unknown(&mut self, u: &[u8]) {
        match (self.checkpoint_cur, self.cur) {
            (Cur::User, Cur::User) => {
                let end = self.pos.min(u.len());
                if self.checkpoint < end {
                    self.unknown_buf.extend_from_slice(&u[self.checkpoint..end]);
                }
            }
            (Cur::Residual, Cur::Residual) => {
                if self.checkpoint < self.pos {
                    self.unknown_buf
                        .extend_from_slice(&self.residual[self.checkpoint..self.pos]);
                }
            }
            (Cur::Residual, Cur::User) => {
                if self.checkpoint < self.residual_len {
                    self.unknown_buf
                        .extend_from_slice(&self.residual[self.checkpoint..self.residual_len]);
                }
                let end = self.pos.min(u.len());
                self.unknown_buf.extend_from_slice(&u[..end]);
            }
            (Cur::User, Cur::Residual) => debug_assert!(false, "checkpoint ahead of buffer"),
        }
    }
}
