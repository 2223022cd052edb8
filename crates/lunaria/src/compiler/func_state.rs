// Per-function code generation state: the chunk under construction plus
// register, scope, label and constant bookkeeping.

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::bytecode::{Chunk, Instruction, LocalRange, OpCode, UpvalDesc};
use crate::syntax::CompileError;
use crate::value::Value;

/// Register ceiling per function. RK operands can only address registers
/// below `RK_BIAS`, so the allocator never goes past it.
pub const MAX_REGISTERS: u32 = Instruction::MAX_RK_REGISTER;
/// Active local variables per function.
pub const MAX_LOCALS: usize = 200;
/// Upvalues per function.
pub const MAX_UPVALUES: usize = 255;
/// Array items buffered on the stack before a SetList flush.
pub const FIELDS_PER_FLUSH: u32 = 50;

/// A local currently in scope. Its index in `actvar` is its register.
pub struct ActiveLocal {
    pub name: SmolStr,
    pub start_pc: u32,
    pub captured: bool,
}

/// One lexical block. Loops are blocks that accept `break`.
pub struct BlockCnt {
    pub first_local: usize,
    pub first_label: usize,
    pub first_goto: usize,
    pub is_loop: bool,
    /// Some local of this block is captured by a closure; exits must
    /// close upvalues.
    pub has_upval: bool,
}

pub struct LabelDesc {
    pub name: SmolStr,
    pub pc: usize,
    pub nactive: usize,
}

/// A `goto` (or `break`, which compiles as a goto named "break") waiting
/// for its label.
pub struct GotoDesc {
    pub name: SmolStr,
    pub jump_pc: usize,
    pub nactive: usize,
    pub line: u32,
}

/// Constant-pool dedup key. Numbers compare by bit pattern so that e.g.
/// 0.0 and -0.0 stay distinct constants.
#[derive(Hash, PartialEq, Eq)]
enum ConstKey {
    Number(u64),
    Str(SmolStr),
    Boolean(bool),
    Nil,
}

pub struct FuncState {
    pub chunk: Chunk,
    pub freereg: u32,
    pub actvar: Vec<ActiveLocal>,
    pub blocks: Vec<BlockCnt>,
    constants: AHashMap<ConstKey, u32>,
    pub labels: Vec<LabelDesc>,
    pub gotos: Vec<GotoDesc>,
    pub last_line: u32,
}

impl FuncState {
    pub fn new(chunk_name: SmolStr, line: u32) -> FuncState {
        let mut chunk = Chunk::new(chunk_name);
        chunk.line_defined = line;
        FuncState {
            chunk,
            freereg: 0,
            actvar: Vec::new(),
            blocks: Vec::new(),
            constants: AHashMap::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            last_line: line.max(1),
        }
    }

    pub fn err(&self, line: u32, msg: impl AsRef<str>) -> CompileError {
        CompileError::new(&self.chunk.name, line, msg)
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.chunk.code.len()
    }

    #[inline]
    pub fn nactive(&self) -> u32 {
        self.actvar.len() as u32
    }

    pub fn emit(&mut self, i: Instruction, line: u32) -> usize {
        self.last_line = line;
        self.chunk.code.push(i);
        self.chunk.lines.push(line);
        self.chunk.code.len() - 1
    }

    /// Emit a placeholder Jmp; the displacement is patched later.
    pub fn emit_jump(&mut self, line: u32) -> usize {
        self.emit(Instruction::asbx(OpCode::Jmp, 0, 0), line)
    }

    pub fn patch_jump(&mut self, pc: usize, target: usize) -> Result<(), CompileError> {
        let offset = target as i64 - (pc as i64 + 1);
        if offset.unsigned_abs() > Instruction::MAX_SBX as u64 {
            let line = self.chunk.line_at(pc);
            return Err(self.err(line, "control structure too long"));
        }
        self.chunk.code[pc].set_sbx(offset as i32);
        Ok(())
    }

    pub fn patch_here(&mut self, pc: usize) -> Result<(), CompileError> {
        let target = self.pc();
        self.patch_jump(pc, target)
    }

    pub fn patch_list_here(&mut self, list: &[usize]) -> Result<(), CompileError> {
        let target = self.pc();
        for &pc in list {
            self.patch_jump(pc, target)?;
        }
        Ok(())
    }

    /// Widen a jump's close level so it closes upvalues from `base` up.
    pub fn set_jump_close(&mut self, pc: usize, base: u32) {
        let i = &mut self.chunk.code[pc];
        let a = i.a();
        if a == 0 || a - 1 > base {
            i.set_a(base + 1);
        }
    }

    pub fn reserve_regs(&mut self, n: u32) -> Result<u32, CompileError> {
        let first = self.freereg;
        if first + n > MAX_REGISTERS {
            return Err(self.err(self.last_line, "function or expression too complex"));
        }
        self.freereg = first + n;
        if self.freereg > self.chunk.max_stack {
            self.chunk.max_stack = self.freereg;
        }
        Ok(first)
    }

    /// Release temporaries back to the active-local watermark.
    pub fn free_temps(&mut self) {
        self.freereg = self.nactive();
    }

    pub fn add_constant(&mut self, v: Value) -> u32 {
        let key = match &v {
            Value::Number(n) => ConstKey::Number(n.to_bits()),
            Value::String(s) => ConstKey::Str(s.clone()),
            Value::Boolean(b) => ConstKey::Boolean(*b),
            _ => ConstKey::Nil,
        };
        if let Some(&idx) = self.constants.get(&key) {
            return idx;
        }
        let idx = self.chunk.constants.len() as u32;
        self.chunk.constants.push(v);
        self.constants.insert(key, idx);
        idx
    }

    /// RK operand for a constant, when the pool index still fits.
    pub fn rk_for_constant(&mut self, v: Value) -> Option<u32> {
        let idx = self.add_constant(v);
        if idx <= Instruction::MAX_C - Instruction::RK_BIAS {
            Some(Instruction::rk_constant(idx))
        } else {
            None
        }
    }

    /// Activate locals occupying the registers just below `freereg`.
    pub fn register_locals(
        &mut self,
        names: impl IntoIterator<Item = SmolStr>,
        line: u32,
    ) -> Result<(), CompileError> {
        let start_pc = self.pc() as u32;
        for name in names {
            if self.actvar.len() >= MAX_LOCALS {
                return Err(self.err(line, "too many local variables"));
            }
            self.actvar.push(ActiveLocal {
                name,
                start_pc,
                captured: false,
            });
        }
        Ok(())
    }

    /// Deactivate locals down to `to`, recording their debug ranges.
    pub fn remove_locals(&mut self, to: usize) {
        let end_pc = self.pc() as u32;
        while self.actvar.len() > to {
            let reg = (self.actvar.len() - 1) as u32;
            let local = match self.actvar.pop() {
                Some(l) => l,
                None => break,
            };
            self.chunk.locals.push(LocalRange {
                name: local.name,
                reg,
                start_pc: local.start_pc,
                end_pc,
            });
        }
    }

    pub fn resolve_local(&self, name: &str) -> Option<u32> {
        self.actvar
            .iter()
            .rposition(|l| l.name == name)
            .map(|i| i as u32)
    }

    pub fn find_upvalue(&self, name: &str) -> Option<u32> {
        self.chunk
            .upvalues
            .iter()
            .position(|u| u.name == name)
            .map(|i| i as u32)
    }

    pub fn add_upvalue(
        &mut self,
        name: SmolStr,
        in_stack: bool,
        index: u32,
    ) -> Result<u32, CompileError> {
        if self.chunk.upvalues.len() >= MAX_UPVALUES {
            return Err(self.err(self.last_line, "too many upvalues"));
        }
        self.chunk.upvalues.push(UpvalDesc {
            name,
            in_stack,
            index,
        });
        Ok((self.chunk.upvalues.len() - 1) as u32)
    }

    /// A closure captured the local at `level`; flag the innermost block
    /// containing it so exits close the upvalue.
    pub fn mark_captured(&mut self, level: u32) {
        self.actvar[level as usize].captured = true;
        for block in self.blocks.iter_mut().rev() {
            if block.first_local as u32 <= level {
                block.has_upval = true;
                return;
            }
        }
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockCnt {
            first_local: self.actvar.len(),
            first_label: self.labels.len(),
            first_goto: self.gotos.len(),
            is_loop,
            has_upval: false,
        });
    }

    /// Close the current block: resolve the gotos it can see, pop its
    /// locals, emit upvalue closing, and hand leftover gotos outward.
    pub fn leave_block(&mut self) -> Result<(), CompileError> {
        let Some(block) = self.blocks.pop() else {
            return Ok(());
        };
        let end_pc = self.pc();
        let base = block.first_local as u32;

        // Forward and backward gotos matched against this block's labels.
        // A label at the very end of the block may be targeted from outside
        // the scope of locals declared before it (they are dead there).
        let mut gi = block.first_goto;
        while gi < self.gotos.len() {
            let matched = {
                let g = &self.gotos[gi];
                self.labels[block.first_label..]
                    .iter()
                    .find(|l| l.name == g.name)
                    .map(|l| (l.pc, l.nactive))
            };
            match matched {
                Some((label_pc, label_nactive)) => {
                    let g = &self.gotos[gi];
                    if label_nactive > g.nactive && label_pc < end_pc {
                        let (name, line) = (g.name.clone(), g.line);
                        return Err(self.err(
                            line,
                            format!("'goto {}' jumps into the scope of a local", name),
                        ));
                    }
                    let jump_pc = g.jump_pc;
                    if block.has_upval && label_nactive < self.gotos[gi].nactive {
                        self.set_jump_close(jump_pc, label_nactive as u32);
                    }
                    self.patch_jump(jump_pc, label_pc)?;
                    self.gotos.remove(gi);
                }
                None => gi += 1,
            }
        }
        self.labels.truncate(block.first_label);

        self.remove_locals(block.first_local);
        self.freereg = base;
        if block.has_upval {
            let line = self.last_line;
            self.emit(Instruction::abc(OpCode::Close, base, 0, 0), line);
        }

        // Remaining gotos leave the block: clamp their local depth and, if
        // this block closed upvalues, make the jumps close them too.
        for i in block.first_goto..self.gotos.len() {
            if self.gotos[i].nactive > block.first_local {
                self.gotos[i].nactive = block.first_local;
            }
            if block.has_upval {
                let pc = self.gotos[i].jump_pc;
                self.set_jump_close(pc, base);
            }
        }

        // A loop defines the implicit "break" label just past its end.
        if block.is_loop {
            let target = self.pc();
            let mut i = block.first_goto;
            while i < self.gotos.len() {
                if self.gotos[i].name == "break" {
                    let pc = self.gotos[i].jump_pc;
                    self.patch_jump(pc, target)?;
                    self.gotos.remove(i);
                } else {
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Finish compilation of this function and yield its chunk.
    pub fn finish(mut self) -> Result<Chunk, CompileError> {
        if let Some(g) = self.gotos.first() {
            let msg = if g.name == "break" {
                "break outside a loop".to_string()
            } else {
                format!("no visible label '{}' for goto", g.name)
            };
            return Err(self.err(g.line, msg));
        }
        self.remove_locals(0);
        Ok(self.chunk)
    }
}
