// Bytecode layer: opcodes, the packed instruction word, and compiled
// function prototypes.

mod chunk;
mod instruction;
mod opcode;

pub use chunk::{Chunk, LocalRange, UpvalDesc};
pub use instruction::Instruction;
pub use opcode::OpCode;
