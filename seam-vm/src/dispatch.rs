//! Per-message field dispatch tables.
//!
//! A dispatch table maps field numbers to bytecode offsets and the wire
//! types they accept.  The primary slot for a field packs
//! `(ofs << 16) | (wt2 << 8) | wt1`: if the decoded wire type matches
//! `wt1`, jump to `ofs`; if it matches `wt2`, a secondary slot at
//! `field_number + MAX_FIELD_NUMBER` holds the alternate offset.  Two wire
//! types per field keep packed/non-packed repeated primitives in one slot
//! without making the table eight times sparser.

use std::collections::HashMap;

use seam_wire::MAX_FIELD_NUMBER;

/// Key of the slot holding the offset of the method's end-of-message
/// epilogue; present in every table.
pub const DISPATCH_ENDMSG: u64 = 0;

/// Sentinel stored as `wt2` when no alternate wire type applies.  Distinct
/// from 0, which is a valid wire type.
pub const NO_WIRE_TYPE: u8 = 0xff;

/// Size of the dense tier; field numbers below this live in a flat array.
const DENSE_LIMIT: u64 = 256;

/// Packs a primary dispatch value.
pub const fn pack_dispatch(ofs: u64, wt1: u8, wt2: u8) -> u64 {
    (ofs << 16) | ((wt2 as u64) << 8) | wt1 as u64
}

/// Unpacks a primary dispatch value into `(ofs, wt1, wt2)`.
pub const fn unpack_dispatch(val: u64) -> (u64, u8, u8) {
    (val >> 16, val as u8, (val >> 8) as u8)
}

/// Two-tier integer-keyed table: a dense array for small keys and a hash
/// map for large ones (secondary slots in particular, which are keyed
/// beyond [`MAX_FIELD_NUMBER`]).  Built at compile time, read-only at
/// decode time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    array: Vec<Option<u64>>,
    table: HashMap<u64, u64>,
}

impl Dispatch {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value for `key`.
    pub fn insert(&mut self, key: u64, val: u64) {
        if key < DENSE_LIMIT {
            let idx = key as usize;
            if idx >= self.array.len() {
                self.array.resize(idx + 1, None);
            }
            self.array[idx] = Some(val);
        } else {
            self.table.insert(key, val);
        }
    }

    /// Removes and returns the value for `key`.
    pub fn remove(&mut self, key: u64) -> Option<u64> {
        if key < DENSE_LIMIT {
            self.array.get_mut(key as usize).and_then(Option::take)
        } else {
            self.table.remove(&key)
        }
    }

    /// Looks up the value for `key`.
    pub fn lookup(&self, key: u64) -> Option<u64> {
        if key < DENSE_LIMIT {
            self.array.get(key as usize).copied().flatten()
        } else {
            self.table.get(&key).copied()
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.array.iter().filter(|v| v.is_some()).count() + self.table.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates `(key, value)` pairs; dense tier first, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.array
            .iter()
            .enumerate()
            .filter_map(|(k, v)| v.map(|v| (k as u64, v)))
            .chain(self.table.iter().map(|(&k, &v)| (k, v)))
    }

    /// Secondary-slot key for a field number.
    pub const fn secondary_key(field_number: u32) -> u64 {
        field_number as u64 + MAX_FIELD_NUMBER as u64
    }
}
