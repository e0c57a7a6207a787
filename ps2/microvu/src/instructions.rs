//! Just enough of the microcode encoding to find the extent of a program:
//! the upper word flag bits and the lower word branch forms.

use modular_bitfield::{bitfield, specifiers::*};

/// Upper instruction of a pair. Only the flag bits are decoded.
#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct Upper {
    op: B27,
    // T, D and M debug flags
    #[skip]
    __: B3,
    /// End of microprogram, after one more pair (delay slot)
    pub e: bool,
    /// Lower word is an immediate float, not an instruction
    pub i: bool,
}

/// Lower instruction in branch format
#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct LowerBranch {
    imm11: B11,
    // IS, IT and dest
    #[skip]
    __: B14,
    op: B7,
}

impl Upper {
    pub fn decode(word: u32) -> Upper {
        Upper::from_bytes(word.to_le_bytes())
    }
}

impl From<Upper> for u32 {
    fn from(upper: Upper) -> u32 {
        u32::from_le_bytes(upper.into_bytes())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// B / BAL
    Jump { target: u32 },
    /// IBEQ, IBNE, IBLTZ, IBGTZ, IBLEZ, IBGEZ
    Branch { target: u32 },
    /// JR / JALR: target lives in a register
    JumpRegister,
}

impl LowerBranch {
    pub fn decode(word: u32) -> LowerBranch {
        LowerBranch::from_bytes(word.to_le_bytes())
    }

    /// Signed offset in instruction pairs
    pub fn offset(&self) -> i32 {
        ((self.imm11() as i32) << 21) >> 21
    }

    pub fn opcode(&self) -> u8 {
        self.op()
    }
}

/// Classifies the lower word of the pair at byte offset `pc`.
/// Branch targets are relative to the following pair and wrap at `mem_mask`.
pub fn flow(pc: u32, upper: Upper, lower: u32, mem_mask: u32) -> Flow {
    if upper.i() {
        return Flow::Next;
    }
    let branch = LowerBranch::decode(lower);
    let target = || (pc as i32 + 8 + branch.offset() * 8) as u32 & mem_mask;
    match branch.opcode() {
        0x20 | 0x21 => Flow::Jump { target: target() },
        0x24 | 0x25 => Flow::JumpRegister,
        0x28 | 0x29 | 0x2c..=0x2f => Flow::Branch { target: target() },
        _ => Flow::Next,
    }
}

/// Encodes a branch-format lower word. Used to build microcode in tests and workloads.
pub fn encode_branch(op: u8, offset: i32) -> u32 {
    let word = LowerBranch::new()
        .with_op(op & 0x7f)
        .with_imm11((offset as u32 & 0x7ff) as u16);
    u32::from_le_bytes(word.into_bytes())
}

pub fn encode_upper(op: u32, e: bool, i: bool) -> u32 {
    Upper::new()
        .with_op(op & 0x7ff_ffff)
        .with_e(e)
        .with_i(i)
        .into()
}
