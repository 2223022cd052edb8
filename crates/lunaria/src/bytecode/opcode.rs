/// The instruction set. Register-machine conventions:
/// `R(x)` is a register, `K(x)` a constant, `RK(x)` either (constants are
/// biased by 256), `U(x)` an upvalue of the running closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// R(A) := R(B)
    Move = 0,
    /// R(A) := K(Bx)
    LoadK,
    /// R(A) := (bool)B; if C skip next instruction
    LoadBool,
    /// R(A..A+B) := nil
    LoadNil,
    /// R(A) := U(B)
    GetUpval,
    /// R(A) := U(B)[RK(C)]
    GetTabUp,
    /// R(A) := R(B)[RK(C)]
    GetTable,
    /// U(A)[RK(B)] := RK(C)
    SetTabUp,
    /// U(B) := R(A)
    SetUpval,
    /// R(A)[RK(B)] := RK(C)
    SetTable,
    /// R(A) := {} (array hint B, hash hint C)
    NewTable,
    /// R(A+1) := R(B); R(A) := R(B)[RK(C)]  (method prelude)
    SelfOp,
    /// R(A) := RK(B) + RK(C)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// R(A) := -R(B)
    Unm,
    /// R(A) := not R(B)
    Not,
    /// R(A) := #R(B)
    Len,
    /// R(A) := R(B) .. ... .. R(C)
    Concat,
    /// pc += sBx; if A > 0 close upvalues aliasing registers >= A-1 first
    Jmp,
    /// if (RK(B) == RK(C)) != A then pc++  (next instr is a Jmp)
    Eq,
    Lt,
    Le,
    /// if truthy(R(A)) != C then pc++
    Test,
    /// if truthy(R(B)) == C then R(A) := R(B) else pc++
    TestSet,
    /// R(A..A+C-2) := R(A)(R(A+1..A+B-1)); B=0 args to top, C=0 multret
    Call,
    /// return R(A)(R(A+1..A+B-1)) reusing the caller's frame
    TailCall,
    /// return R(A..A+B-2); B=0 returns to top
    Return,
    /// numeric for back-edge: step, test, loop
    ForLoop,
    /// numeric for prologue: validate and jump to ForLoop
    ForPrep,
    /// R(A+3..A+2+C) := R(A)(R(A+1), R(A+2))  (generic-for iterator call)
    TForCall,
    /// if R(A+1) ~= nil then R(A) := R(A+1); pc += sBx
    TForLoop,
    /// R(A)[(C-1)*50 + i] := R(A+i), 1 <= i <= B; B=0 to top
    SetList,
    /// close all upvalues aliasing registers >= A
    Close,
    /// R(A) := closure(proto Bx) binding upvalue descriptors
    Closure,
    /// R(A..A+B-2) := varargs; B=0 copies all and sets top
    Vararg,
}

pub const OPCODE_COUNT: u8 = OpCode::Vararg as u8 + 1;

impl OpCode {
    #[inline]
    pub fn from_u8(v: u8) -> OpCode {
        debug_assert!(v < OPCODE_COUNT);
        match v {
            0 => OpCode::Move,
            1 => OpCode::LoadK,
            2 => OpCode::LoadBool,
            3 => OpCode::LoadNil,
            4 => OpCode::GetUpval,
            5 => OpCode::GetTabUp,
            6 => OpCode::GetTable,
            7 => OpCode::SetTabUp,
            8 => OpCode::SetUpval,
            9 => OpCode::SetTable,
            10 => OpCode::NewTable,
            11 => OpCode::SelfOp,
            12 => OpCode::Add,
            13 => OpCode::Sub,
            14 => OpCode::Mul,
            15 => OpCode::Div,
            16 => OpCode::Mod,
            17 => OpCode::Pow,
            18 => OpCode::Unm,
            19 => OpCode::Not,
            20 => OpCode::Len,
            21 => OpCode::Concat,
            22 => OpCode::Jmp,
            23 => OpCode::Eq,
            24 => OpCode::Lt,
            25 => OpCode::Le,
            26 => OpCode::Test,
            27 => OpCode::TestSet,
            28 => OpCode::Call,
            29 => OpCode::TailCall,
            30 => OpCode::Return,
            31 => OpCode::ForLoop,
            32 => OpCode::ForPrep,
            33 => OpCode::TForCall,
            34 => OpCode::TForLoop,
            35 => OpCode::SetList,
            36 => OpCode::Close,
            37 => OpCode::Closure,
            _ => OpCode::Vararg,
        }
    }

}
