/*----------------------------------------------------------------------
  Instruction encoding.

  One instruction is a 64-bit word:

        63      40 39      24 23       8 7        0
        |  C(16)  |  B(16)  |  A(16)   |  Op(8)   |
        |     Bx(32)        |  A(16)   |  Op(8)   |
        |            Ax(48)            |  Op(8)   |

  sBx is Bx in excess-K form with K = OFFSET_SBX, giving the signed jump
  displacement. RK operands read a constant when the value is >= RK_BIAS
  (constant index = operand - RK_BIAS), a register otherwise.
----------------------------------------------------------------------*/

use super::OpCode;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u64);

impl Instruction {
    // Field sizes
    pub const SIZE_OP: u64 = 8;
    pub const SIZE_A: u64 = 16;
    pub const SIZE_B: u64 = 16;
    pub const SIZE_C: u64 = 16;
    pub const SIZE_BX: u64 = Self::SIZE_B + Self::SIZE_C; // 32
    pub const SIZE_AX: u64 = Self::SIZE_A + Self::SIZE_BX; // 48

    // Field positions
    pub const POS_OP: u64 = 0;
    pub const POS_A: u64 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_B: u64 = Self::POS_A + Self::SIZE_A;
    pub const POS_C: u64 = Self::POS_B + Self::SIZE_B;
    pub const POS_BX: u64 = Self::POS_B;
    pub const POS_AX: u64 = Self::POS_A;

    // Operand ceilings. Register operands must stay below MAX_A; jump
    // displacements within +/-MAX_SBX. The compiler checks both at emit
    // time and fails compilation when exceeded.
    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_SBX: i32 = (1 << 17) - 1;
    pub const OFFSET_SBX: i32 = Self::MAX_SBX;

    /// Threshold separating register operands from constant-pool operands
    /// in RK positions.
    pub const RK_BIAS: u32 = 256;
    /// Highest register index usable in an RK operand.
    pub const MAX_RK_REGISTER: u32 = Self::RK_BIAS - 1;

    #[inline(always)]
    pub const fn from_u64(raw: u64) -> Instruction {
        Instruction(raw)
    }

    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline(always)]
    fn field(self, pos: u64, size: u64) -> u64 {
        (self.0 >> pos) & ((1u64 << size) - 1)
    }

    #[inline(always)]
    fn set_field(&mut self, v: u64, pos: u64, size: u64) {
        let mask = ((1u64 << size) - 1) << pos;
        self.0 = (self.0 & !mask) | ((v << pos) & mask);
    }

    #[inline(always)]
    pub fn opcode(self) -> OpCode {
        OpCode::from_u8(self.field(Self::POS_OP, Self::SIZE_OP) as u8)
    }

    #[inline(always)]
    pub fn a(self) -> u32 {
        self.field(Self::POS_A, Self::SIZE_A) as u32
    }

    #[inline(always)]
    pub fn b(self) -> u32 {
        self.field(Self::POS_B, Self::SIZE_B) as u32
    }

    #[inline(always)]
    pub fn c(self) -> u32 {
        self.field(Self::POS_C, Self::SIZE_C) as u32
    }

    #[inline(always)]
    pub fn bx(self) -> u32 {
        self.field(Self::POS_BX, Self::SIZE_BX) as u32
    }

    #[inline(always)]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - Self::OFFSET_SBX
    }

    #[inline(always)]
    pub fn ax(self) -> u64 {
        self.field(Self::POS_AX, Self::SIZE_AX)
    }

    pub fn set_a(&mut self, v: u32) {
        self.set_field(v as u64, Self::POS_A, Self::SIZE_A);
    }

    pub fn set_b(&mut self, v: u32) {
        self.set_field(v as u64, Self::POS_B, Self::SIZE_B);
    }

    pub fn set_c(&mut self, v: u32) {
        self.set_field(v as u64, Self::POS_C, Self::SIZE_C);
    }

    pub fn set_bx(&mut self, v: u32) {
        self.set_field(v as u64, Self::POS_BX, Self::SIZE_BX);
    }

    pub fn set_sbx(&mut self, v: i32) {
        self.set_bx((v + Self::OFFSET_SBX) as u32);
    }

    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Instruction {
        Instruction(
            (op as u64)
                | ((a as u64) << Self::POS_A)
                | ((b as u64) << Self::POS_B)
                | ((c as u64) << Self::POS_C),
        )
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Instruction {
        Instruction((op as u64) | ((a as u64) << Self::POS_A) | ((bx as u64) << Self::POS_BX))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Instruction {
        Self::abx(op, a, (sbx + Self::OFFSET_SBX) as u32)
    }

    /// RK(x): does x name a constant?
    #[inline(always)]
    pub fn is_constant(x: u32) -> bool {
        x >= Self::RK_BIAS
    }

    /// Constant-pool index of an RK operand.
    #[inline(always)]
    pub fn constant_index(x: u32) -> usize {
        (x - Self::RK_BIAS) as usize
    }

    /// Encode a constant-pool index as an RK operand.
    #[inline(always)]
    pub fn rk_constant(index: u32) -> u32 {
        index + Self::RK_BIAS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abc_roundtrip() {
        let i = Instruction::abc(OpCode::Move, 1, 2, 3);
        assert_eq!(i.opcode(), OpCode::Move);
        assert_eq!(i.a(), 1);
        assert_eq!(i.b(), 2);
        assert_eq!(i.c(), 3);
    }

    #[test]
    fn abx_roundtrip() {
        let i = Instruction::abx(OpCode::LoadK, 3, 100_000);
        assert_eq!(i.opcode(), OpCode::LoadK);
        assert_eq!(i.a(), 3);
        assert_eq!(i.bx(), 100_000);
    }

    #[test]
    fn sbx_signed_roundtrip() {
        let neg = Instruction::asbx(OpCode::Jmp, 0, -50);
        assert_eq!(neg.sbx(), -50);
        let pos = Instruction::asbx(OpCode::ForLoop, 2, 131_071);
        assert_eq!(pos.sbx(), 131_071);
        let min = Instruction::asbx(OpCode::Jmp, 0, -131_071);
        assert_eq!(min.sbx(), -131_071);
    }

    #[test]
    fn field_boundaries() {
        let i = Instruction::abc(
            OpCode::Call,
            Instruction::MAX_A,
            Instruction::MAX_B,
            Instruction::MAX_C,
        );
        assert_eq!(i.a(), Instruction::MAX_A);
        assert_eq!(i.b(), Instruction::MAX_B);
        assert_eq!(i.c(), Instruction::MAX_C);
        assert_eq!(i.opcode(), OpCode::Call);
    }

    #[test]
    fn set_fields_preserve_neighbors() {
        let mut i = Instruction::abc(OpCode::Add, 1, 2, 3);
        i.set_a(10);
        assert_eq!((i.a(), i.b(), i.c()), (10, 2, 3));
        i.set_c(300);
        assert_eq!((i.a(), i.b(), i.c()), (10, 2, 300));
        assert_eq!(i.opcode(), OpCode::Add);
    }

    #[test]
    fn ax_spans_a_and_bx() {
        let i = Instruction::abx(OpCode::LoadK, 1, 2);
        assert_eq!(i.ax(), (2u64 << 16) | 1);
    }

    #[test]
    fn raw_word_roundtrip() {
        let i = Instruction::abc(OpCode::Call, 4, 5, 6);
        assert_eq!(Instruction::from_u64(i.as_u64()), i);
    }

    #[test]
    fn rk_bias() {
        assert!(!Instruction::is_constant(255));
        assert!(Instruction::is_constant(256));
        assert_eq!(Instruction::constant_index(Instruction::rk_constant(7)), 7);
    }
}
