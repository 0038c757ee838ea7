use core::fmt::Write;

use crate::{pack, Instruction, Opcode};

/// Renders a bytecode region one instruction per line, with resolved jump
/// targets.  Offsets are word indices relative to the start of `code`.
pub fn disassemble(code: &[u32]) -> String {
    let mut out = String::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let ins = Instruction::new(code[pc]);
        let words = pack::instruction_words(ins.raw());
        let _ = write!(out, "{pc:#06x}  ");
        match ins.opcode() {
            Err(bad) => {
                let _ = writeln!(out, "<{bad}>");
            }
            Ok(op) => {
                let _ = write!(out, "{op}");
                let after = pc + words;
                match op {
                    Opcode::Dispatch
                    | Opcode::StartMsg
                    | Opcode::EndMsg
                    | Opcode::PushLenDelim
                    | Opcode::Pop
                    | Opcode::SetDelim
                    | Opcode::Halt
                    | Opcode::Ret => {}
                    Opcode::SetDispatch => {
                        let _ = write!(out, " method:{}", code[pc + 1]);
                    }
                    Opcode::SetBigGroupNum => {
                        let _ = write!(out, " group:{}", code[pc + 1]);
                    }
                    Opcode::CheckDelim | Opcode::Call | Opcode::Branch => {
                        let target = after as i64 + i64::from(ins.long_ofs());
                        let _ = write!(out, " =>{target:#x}");
                    }
                    Opcode::Tag1 | Opcode::Tag2 => {
                        let _ = write!(out, " tag:{:#x}", ins.tag16());
                        if ins.short_ofs() != 0 {
                            let target = after as i64 + i64::from(ins.short_ofs());
                            let _ = write!(out, " =>{target:#x}");
                        }
                    }
                    Opcode::TagN => {
                        let tag =
                            u64::from(code[pc + 1]) | (u64::from(code[pc + 2]) << 32);
                        let _ = write!(out, " tag:{:#x} n:{}", tag, ins.tag16());
                        if ins.short_ofs() != 0 {
                            let target = after as i64 + i64::from(ins.short_ofs());
                            let _ = write!(out, " =>{target:#x}");
                        }
                    }
                    _ => {
                        // Parse, sequence, string and submessage ops carry a
                        // selector argument.
                        let _ = write!(out, " {}", ins.arg());
                    }
                }
                let _ = writeln!(out);
            }
        }
        pc += words;
    }
    out
}
