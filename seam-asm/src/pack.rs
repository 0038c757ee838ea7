//! Functions for packing instruction data into code words.

use crate::opcode::Opcode;
use crate::RawInstruction;

/// An opcode with no argument.
pub fn op(opcode: Opcode) -> RawInstruction {
    opcode as RawInstruction
}

/// An opcode with a 24-bit argument (selector or group number).
pub fn op_arg(opcode: Opcode, arg: u32) -> RawInstruction {
    debug_assert!(arg < 1 << 24);
    opcode as RawInstruction | (arg << 8)
}

/// A tag-matching opcode carrying up to 16 bits of expected tag.
pub fn op_tag(opcode: Opcode, tag: u16) -> RawInstruction {
    opcode as RawInstruction | (u32::from(tag) << 16)
}

/// Reads the signed jump offset out of an instruction word, honoring the
/// opcode's offset width.
pub fn get_ofs(instr: RawInstruction) -> i32 {
    if has_long_ofs(instr) {
        (instr as i32) >> 8
    } else {
        i32::from((instr >> 8) as u8 as i8)
    }
}

/// Writes the signed jump offset into an instruction word, honoring the
/// opcode's offset width.
pub fn set_ofs(instr: &mut RawInstruction, ofs: i32) {
    if has_long_ofs(*instr) {
        *instr = (*instr & 0xff) | ((ofs as u32) << 8);
    } else {
        *instr = (*instr & !0xff00) | ((ofs as u32 & 0xff) << 8);
    }
    // Offsets that overflow their field would silently jump elsewhere.
    debug_assert_eq!(get_ofs(*instr), ofs);
}

/// Number of words the instruction starting with `instr` spans.  Unknown
/// opcodes count as one word so a disassembler can resynchronize.
pub fn instruction_words(instr: RawInstruction) -> usize {
    match Opcode::try_from((instr & 0xff) as u8) {
        Ok(op) => op.words(),
        Err(_) => 1,
    }
}

fn has_long_ofs(instr: RawInstruction) -> bool {
    match Opcode::try_from((instr & 0xff) as u8) {
        Ok(op) => op.has_long_ofs(),
        Err(_) => false,
    }
}
