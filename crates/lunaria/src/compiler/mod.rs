// Code generator: AST in, bytecode chunks out.
//
// One FuncState per function being compiled; the stack of them mirrors
// lexical nesting and drives upvalue capture.

mod expr;
mod func_state;
mod stmt;

use std::rc::Rc;

use smol_str::SmolStr;

use crate::bytecode::{Chunk, Instruction, OpCode, UpvalDesc};
use crate::syntax::{self, CompileError};

pub use func_state::{FIELDS_PER_FLUSH, MAX_LOCALS, MAX_REGISTERS, MAX_UPVALUES};
use func_state::FuncState;

/// Compile a source string into the main chunk. The main chunk is vararg
/// and owns a single upvalue, `_ENV`, bound by the VM to the globals table.
pub fn compile(source: &str, chunk_name: &str) -> Result<Rc<Chunk>, CompileError> {
    let block = syntax::parse(source, chunk_name)?;
    let mut fs = FuncState::new(SmolStr::new(chunk_name), 0);
    fs.chunk.is_vararg = true;
    fs.chunk.upvalues.push(UpvalDesc {
        name: SmolStr::new("_ENV"),
        in_stack: false,
        index: 0,
    });
    let mut c = Compiler { funcs: vec![fs] };
    c.fs().enter_block(false);
    c.compile_block(&block)?;
    c.fs().leave_block()?;
    let line = c.fs().last_line;
    c.fs()
        .emit(Instruction::abc(OpCode::Return, 0, 1, 0), line);
    let mut fs = c.funcs.remove(0);
    fs.chunk.last_line_defined = fs.last_line;
    Ok(Rc::new(fs.finish()?))
}

/// Where a name resolved: a register of the current function or one of
/// its upvalues. Unresolved names are globals, reached through `_ENV`.
#[derive(Clone, Copy)]
pub(crate) enum NameLoc {
    Local(u32),
    Upvalue(u32),
}

pub(crate) struct Compiler {
    funcs: Vec<FuncState>,
}

impl Compiler {
    // The function stack is never empty while compiling.
    pub(crate) fn fs(&mut self) -> &mut FuncState {
        let i = self.funcs.len() - 1;
        &mut self.funcs[i]
    }

    pub(crate) fn fs_ref(&self) -> &FuncState {
        &self.funcs[self.funcs.len() - 1]
    }

    /// Resolve a name in the current function, creating upvalue chains
    /// through enclosing functions as needed.
    pub(crate) fn resolve(&mut self, name: &str) -> Result<Option<NameLoc>, CompileError> {
        let top = self.funcs.len() - 1;
        resolve_in(&mut self.funcs, top, name)
    }
}

fn resolve_in(
    funcs: &mut [FuncState],
    level: usize,
    name: &str,
) -> Result<Option<NameLoc>, CompileError> {
    if let Some(r) = funcs[level].resolve_local(name) {
        return Ok(Some(NameLoc::Local(r)));
    }
    if let Some(u) = funcs[level].find_upvalue(name) {
        return Ok(Some(NameLoc::Upvalue(u)));
    }
    if level == 0 {
        return Ok(None);
    }
    match resolve_in(funcs, level - 1, name)? {
        Some(NameLoc::Local(r)) => {
            funcs[level - 1].mark_captured(r);
            let idx = funcs[level].add_upvalue(SmolStr::new(name), true, r)?;
            Ok(Some(NameLoc::Upvalue(idx)))
        }
        Some(NameLoc::Upvalue(u)) => {
            let idx = funcs[level].add_upvalue(SmolStr::new(name), false, u)?;
            Ok(Some(NameLoc::Upvalue(idx)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        chunk.code.iter().map(|i| i.opcode()).collect()
    }

    #[test]
    fn local_and_return() {
        let c = compile("local x = 1 return x", "=t").unwrap();
        assert_eq!(
            ops(&c),
            vec![OpCode::LoadK, OpCode::Move, OpCode::Return, OpCode::Return]
        );
        // `return x` copies the local up and returns one value
        assert_eq!(c.code[2].a(), 1);
        assert_eq!(c.code[2].b(), 2);
    }

    #[test]
    fn global_assignment_goes_through_env() {
        let c = compile("x = 1", "=t").unwrap();
        assert_eq!(ops(&c)[..2], [OpCode::LoadK, OpCode::SetTabUp]);
        let set = c.code[1];
        assert_eq!(set.a(), 0); // _ENV is upvalue 0 of the main chunk
        assert!(Instruction::is_constant(set.b()));
    }

    #[test]
    fn constant_folding() {
        let c = compile("return 2 * 3 + 1", "=t").unwrap();
        assert_eq!(ops(&c)[0], OpCode::LoadK);
        assert_eq!(c.constants[c.code[0].bx() as usize], crate::value::Value::Number(7.0));
    }

    #[test]
    fn no_folding_across_division_by_zero() {
        let c = compile("return 1 / 0", "=t").unwrap();
        assert!(ops(&c).contains(&OpCode::Div));
    }

    #[test]
    fn break_jumps_past_loop_back_edge() {
        let c = compile("while true do break end", "=t").unwrap();
        assert_eq!(ops(&c), vec![OpCode::Jmp, OpCode::Jmp, OpCode::Return]);
        assert_eq!(c.code[0].sbx(), 1); // break: over the back edge
        assert_eq!(c.code[1].sbx(), -2); // back edge: to loop top
    }

    #[test]
    fn closure_captures_enclosing_local() {
        let c = compile("local x local function f() return x end return f", "=t").unwrap();
        let proto = &c.protos[0];
        assert_eq!(proto.upvalues.len(), 1);
        assert!(proto.upvalues[0].in_stack);
        assert_eq!(proto.upvalues[0].index, 0);
    }

    #[test]
    fn nested_capture_chains_through_upvalues() {
        let c = compile(
            "local x local function a() local function b() return x end return b end",
            "=t",
        )
        .unwrap();
        let a = &c.protos[0];
        let b = &a.protos[0];
        assert!(a.upvalues[0].in_stack);
        assert!(!b.upvalues[0].in_stack); // reaches x through a's upvalue
    }

    #[test]
    fn tail_call_in_return_position() {
        let c = compile("local function f() return f() end", "=t").unwrap();
        assert!(ops(&c.protos[0]).contains(&OpCode::TailCall));
    }

    #[test]
    fn undefined_goto_is_an_error() {
        let err = compile("goto nowhere", "=t").unwrap_err();
        assert!(err.message.contains("no visible label 'nowhere'"));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let err = compile("break", "=t").unwrap_err();
        assert!(err.message.contains("break outside a loop"));
    }

    #[test]
    fn goto_continue_idiom() {
        compile(
            "for i = 1, 3 do if i == 2 then goto continue end ::continue:: end",
            "=t",
        )
        .unwrap();
    }

    #[test]
    fn method_call_uses_self_prelude() {
        let c = compile("local t t:m(1)", "=t").unwrap();
        let o = ops(&c);
        assert!(o.contains(&OpCode::SelfOp));
        assert!(o.contains(&OpCode::Call));
    }

    #[test]
    fn numeric_for_shape() {
        let c = compile("for i = 1, 10 do end", "=t").unwrap();
        let o = ops(&c);
        assert!(o.contains(&OpCode::ForPrep));
        assert!(o.contains(&OpCode::ForLoop));
    }

    fn check_register_discipline(chunk: &Chunk) {
        use OpCode::*;
        for (pc, inst) in chunk.code.iter().enumerate() {
            // A is not a register for jumps and close levels, nor the
            // expect flag of comparisons.
            let writes_a = !matches!(
                inst.opcode(),
                Jmp | Return | TailCall | SetList | Close | Eq | Lt | Le
            );
            if writes_a {
                assert!(
                    inst.a() < chunk.max_stack,
                    "{}: pc {} {:?} a={} max_stack={}",
                    chunk.name,
                    pc,
                    inst.opcode(),
                    inst.a(),
                    chunk.max_stack
                );
            }
        }
        for proto in &chunk.protos {
            check_register_discipline(proto);
        }
    }

    #[test]
    fn register_operands_stay_below_max_stack() {
        let sources = [
            "local a, b, c = 1, 2, 3 return a + b * c",
            "local t = {1, 2, x = 3} for k, v in pairs(t) do t[k] = v end",
            "local function f(...) return select('#', ...) end return f(1, 2)",
            "for i = 1, 10 do local x = i * i end",
            "local s = '' for i = 1, 3 do s = s .. i end return s",
        ];
        for src in sources {
            check_register_discipline(&compile(src, "=t").unwrap());
        }
    }

    #[test]
    fn table_constructor_batches() {
        let mut src = String::from("return {");
        for i in 0..60 {
            src.push_str(&format!("{},", i));
        }
        src.push('}');
        let c = compile(&src, "=t").unwrap();
        let setlists: Vec<_> = c
            .code
            .iter()
            .filter(|i| i.opcode() == OpCode::SetList)
            .collect();
        assert_eq!(setlists.len(), 2);
        assert_eq!(setlists[0].b(), FIELDS_PER_FLUSH);
        assert_eq!(setlists[0].c(), 1);
        assert_eq!(setlists[1].b(), 10);
        assert_eq!(setlists[1].c(), 2);
    }
}
