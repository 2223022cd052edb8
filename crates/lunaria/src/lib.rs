// Lunaria Runtime
// A compact Lua-family VM: bytecode compiler + register-based dispatch loop

#[cfg(test)]
mod test;

pub mod bytecode;
pub mod compiler;
pub mod registry;
pub mod stdlib;
pub mod syntax;
pub mod value;
pub mod vm;

pub use bytecode::{Chunk, Instruction, OpCode};
pub use registry::LibraryRegistry;
pub use value::{Table, Value};
pub use vm::{Cancellation, ModuleLoader, Vm, VmError, VmOptions, VmResult};
