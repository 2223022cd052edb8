// Compiled function prototype: immutable once the compiler returns it,
// shared read-only by every closure instantiated from it.

use std::rc::Rc;

use smol_str::SmolStr;

use super::Instruction;
use crate::value::Value;

/// Where a closure finds one of its captured variables at instantiation
/// time: a register of the enclosing frame, or an upvalue of the enclosing
/// closure.
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u32,
}

/// Debug range of a local variable: which register holds it over which
/// span of instructions.
#[derive(Debug, Clone)]
pub struct LocalRange {
    pub name: SmolStr,
    pub reg: u32,
    pub start_pc: u32,
    pub end_pc: u32,
}

pub struct Chunk {
    pub name: SmolStr,
    /// Declared name of the function, when the syntax gave it one
    /// ("f", "t.m", ...); None for main chunks and anonymous functions.
    pub func_name: Option<SmolStr>,
    pub code: Vec<Instruction>,
    /// Source line per instruction, parallel to `code`.
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
    pub upvalues: Vec<UpvalDesc>,
    pub locals: Vec<LocalRange>,
    pub protos: Vec<Rc<Chunk>>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack: u32,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

impl Chunk {
    pub fn new(name: SmolStr) -> Chunk {
        Chunk {
            name,
            func_name: None,
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            locals: Vec::new(),
            protos: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack: 2,
            line_defined: 0,
            last_line_defined: 0,
        }
    }

    #[inline]
    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }

    /// Name of the local occupying `reg` at `pc`, for error messages.
    pub fn local_name_at(&self, reg: u32, pc: u32) -> Option<&SmolStr> {
        self.locals
            .iter()
            .find(|l| l.reg == reg && l.start_pc <= pc && pc < l.end_pc)
            .map(|l| &l.name)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunk({}: {} instructions, {} constants, {} protos)",
            self.name,
            self.code.len(),
            self.constants.len(),
            self.protos.len()
        )
    }
}
