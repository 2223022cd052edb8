// Expression code generation.

use smol_str::SmolStr;

use super::func_state::FIELDS_PER_FLUSH;
use super::{Compiler, NameLoc};
use crate::bytecode::{Instruction, OpCode};
use crate::syntax::CompileError;
use crate::syntax::ast::{BinOp, Expr, ExprKind, FuncBody, TableItem, UnOp};
use crate::value::Value;

/// Where `_ENV` lives for the current function.
pub(crate) enum EnvLoc {
    Upval(u32),
    Local(u32),
}

/// Fold an expression made of numeric literals. Division and modulo by
/// zero are left to the runtime so they keep their IEEE behavior.
fn numeric_literal(e: &Expr) -> Option<f64> {
    match &e.kind {
        ExprKind::Number(n) => Some(*n),
        ExprKind::Paren(inner) => numeric_literal(inner),
        ExprKind::UnOp(UnOp::Neg, x) => numeric_literal(x).map(|n| -n),
        ExprKind::BinOp(op, a, b) => {
            let (x, y) = (numeric_literal(a)?, numeric_literal(b)?);
            match op {
                BinOp::Add => Some(x + y),
                BinOp::Sub => Some(x - y),
                BinOp::Mul => Some(x * y),
                BinOp::Div if y != 0.0 => Some(x / y),
                BinOp::Mod if y != 0.0 => Some(x - (x / y).floor() * y),
                BinOp::Pow => Some(x.powf(y)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn arith_opcode(op: BinOp) -> Option<OpCode> {
    Some(match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Div => OpCode::Div,
        BinOp::Mod => OpCode::Mod,
        BinOp::Pow => OpCode::Pow,
        _ => return None,
    })
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
    )
}

impl Compiler {
    /// Evaluate into the next free register and keep it reserved.
    pub(crate) fn expr_to_next_reg(&mut self, e: &Expr) -> Result<u32, CompileError> {
        let r = self.fs().reserve_regs(1)?;
        self.expr_to_reg(e, r)?;
        Ok(r)
    }

    /// Like `expr_to_next_reg`, but a plain local stays where it is.
    pub(crate) fn expr_to_any_reg(&mut self, e: &Expr) -> Result<u32, CompileError> {
        if let ExprKind::Name(n) = &e.kind
            && let Some(r) = self.fs_ref().resolve_local(n)
        {
            return Ok(r);
        }
        self.expr_to_next_reg(e)
    }

    /// An RK operand: a constant-pool reference for literals, a register
    /// otherwise.
    pub(crate) fn expr_to_rk(&mut self, e: &Expr) -> Result<u32, CompileError> {
        if let Some(n) = numeric_literal(e)
            && let Some(rk) = self.fs().rk_for_constant(Value::Number(n))
        {
            return Ok(rk);
        }
        if let ExprKind::Str(s) = &e.kind
            && let Some(rk) = self.fs().rk_for_constant(Value::String(s.clone()))
        {
            return Ok(rk);
        }
        self.expr_to_any_reg(e)
    }

    /// Evaluate into a specific register. Temporaries above the entry
    /// watermark are released before returning.
    pub(crate) fn expr_to_reg(&mut self, e: &Expr, target: u32) -> Result<(), CompileError> {
        let saved = self.fs_ref().freereg;
        self.expr_to_reg_inner(e, target)?;
        self.fs().freereg = saved;
        Ok(())
    }

    fn expr_to_reg_inner(&mut self, e: &Expr, target: u32) -> Result<(), CompileError> {
        let line = e.line;
        if matches!(e.kind, ExprKind::BinOp(..) | ExprKind::UnOp(UnOp::Neg, _))
            && let Some(n) = numeric_literal(e)
        {
            let k = self.fs().add_constant(Value::Number(n));
            self.fs().emit(Instruction::abx(OpCode::LoadK, target, k), line);
            return Ok(());
        }
        match &e.kind {
            ExprKind::Nil => {
                self.fs()
                    .emit(Instruction::abc(OpCode::LoadNil, target, 0, 0), line);
            }
            ExprKind::True => {
                self.fs()
                    .emit(Instruction::abc(OpCode::LoadBool, target, 1, 0), line);
            }
            ExprKind::False => {
                self.fs()
                    .emit(Instruction::abc(OpCode::LoadBool, target, 0, 0), line);
            }
            ExprKind::Number(n) => {
                let k = self.fs().add_constant(Value::Number(*n));
                self.fs().emit(Instruction::abx(OpCode::LoadK, target, k), line);
            }
            ExprKind::Str(s) => {
                let k = self.fs().add_constant(Value::String(s.clone()));
                self.fs().emit(Instruction::abx(OpCode::LoadK, target, k), line);
            }
            ExprKind::Vararg => {
                self.check_vararg(line)?;
                self.fs()
                    .emit(Instruction::abc(OpCode::Vararg, target, 2, 0), line);
            }
            ExprKind::Name(n) => match self.resolve(n)? {
                Some(NameLoc::Local(r)) => {
                    if r != target {
                        self.fs()
                            .emit(Instruction::abc(OpCode::Move, target, r, 0), line);
                    }
                }
                Some(NameLoc::Upvalue(u)) => {
                    self.fs()
                        .emit(Instruction::abc(OpCode::GetUpval, target, u, 0), line);
                }
                None => self.emit_global_get(target, n, line)?,
            },
            ExprKind::Index(t, k) => {
                let tr = self.expr_to_any_reg(t)?;
                let krk = self.expr_to_rk(k)?;
                self.fs()
                    .emit(Instruction::abc(OpCode::GetTable, target, tr, krk), line);
            }
            ExprKind::Call(..) | ExprKind::MethodCall(..) => {
                // Reuse the target slot when it is the top of the stack.
                if target + 1 == self.fs_ref().freereg && target >= self.fs_ref().nactive() {
                    self.fs().freereg = target;
                    self.compile_call(e, 1)?;
                } else {
                    let base = self.compile_call(e, 1)?;
                    if base != target {
                        self.fs()
                            .emit(Instruction::abc(OpCode::Move, target, base, 0), line);
                    }
                }
            }
            ExprKind::Function(body) => {
                let idx = self.compile_function(body)?;
                self.fs()
                    .emit(Instruction::abx(OpCode::Closure, target, idx), line);
            }
            ExprKind::Table(items) => self.table_to_reg(items, target, line)?,
            ExprKind::BinOp(op, a, b) => match op {
                BinOp::And | BinOp::Or => {
                    let c = (*op == BinOp::Or) as u32;
                    let saved = self.fs_ref().freereg;
                    let ra = self.expr_to_any_reg(a)?;
                    self.fs().freereg = saved;
                    self.fs()
                        .emit(Instruction::abc(OpCode::TestSet, target, ra, c), line);
                    let j = self.fs().emit_jump(line);
                    self.expr_to_reg(b, target)?;
                    self.fs().patch_here(j)?;
                }
                BinOp::Concat => {
                    let saved = self.fs_ref().freereg;
                    let first = self.fs_ref().freereg;
                    let mut n = 0u32;
                    let mut cur = e;
                    // flatten the right-leaning concat spine
                    while let ExprKind::BinOp(BinOp::Concat, l, r) = &cur.kind {
                        self.expr_to_next_reg(l)?;
                        n += 1;
                        cur = r;
                    }
                    self.expr_to_next_reg(cur)?;
                    n += 1;
                    self.fs().emit(
                        Instruction::abc(OpCode::Concat, target, first, first + n - 1),
                        line,
                    );
                    self.fs().freereg = saved;
                }
                op if is_comparison(*op) => {
                    let j = self.emit_comparison(*op, a, b, true, line)?;
                    self.fs()
                        .emit(Instruction::abc(OpCode::LoadBool, target, 0, 1), line);
                    self.fs().patch_here(j)?;
                    self.fs()
                        .emit(Instruction::abc(OpCode::LoadBool, target, 1, 0), line);
                }
                op => {
                    // arithmetic
                    let Some(code) = arith_opcode(*op) else {
                        return Err(self.fs_ref().err(line, "syntax error"));
                    };
                    let saved = self.fs_ref().freereg;
                    let rb = self.expr_to_rk(a)?;
                    let rc = self.expr_to_rk(b)?;
                    self.fs()
                        .emit(Instruction::abc(code, target, rb, rc), line);
                    self.fs().freereg = saved;
                }
            },
            ExprKind::UnOp(op, operand) => {
                let code = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                let saved = self.fs_ref().freereg;
                let rb = self.expr_to_any_reg(operand)?;
                self.fs().freereg = saved;
                self.fs()
                    .emit(Instruction::abc(code, target, rb, 0), line);
            }
            ExprKind::Paren(inner) => self.expr_to_reg_inner(inner, target)?,
        }
        Ok(())
    }

    pub(crate) fn check_vararg(&self, line: u32) -> Result<(), CompileError> {
        if !self.fs_ref().chunk.is_vararg {
            return Err(self
                .fs_ref()
                .err(line, "cannot use '...' outside a vararg function"));
        }
        Ok(())
    }

    pub(crate) fn env_loc(&mut self, line: u32) -> Result<EnvLoc, CompileError> {
        match self.resolve("_ENV")? {
            Some(NameLoc::Local(r)) => Ok(EnvLoc::Local(r)),
            Some(NameLoc::Upvalue(u)) => Ok(EnvLoc::Upval(u)),
            None => Err(self.fs_ref().err(line, "no environment in scope")),
        }
    }

    /// RK operand for a string key; unlike `expr_to_rk` there is no
    /// register fallback, so a full pool is a hard error.
    pub(crate) fn string_rk(&mut self, s: &SmolStr, line: u32) -> Result<u32, CompileError> {
        self.fs()
            .rk_for_constant(Value::String(s.clone()))
            .ok_or_else(|| self.fs_ref().err(line, "too many constants"))
    }

    fn emit_global_get(&mut self, target: u32, name: &SmolStr, line: u32) -> Result<(), CompileError> {
        let env = self.env_loc(line)?;
        let key = self.string_rk(name, line)?;
        let i = match env {
            EnvLoc::Upval(u) => Instruction::abc(OpCode::GetTabUp, target, u, key),
            EnvLoc::Local(r) => Instruction::abc(OpCode::GetTable, target, r, key),
        };
        self.fs().emit(i, line);
        Ok(())
    }

    /// Compile a call expression; results land at the returned base
    /// register. `want` of -1 leaves the result count open.
    pub(crate) fn compile_call(&mut self, e: &Expr, want: i32) -> Result<u32, CompileError> {
        self.compile_call_ext(e, want, false)
    }

    pub(crate) fn compile_tail_call(&mut self, e: &Expr) -> Result<u32, CompileError> {
        self.compile_call_ext(e, -1, true)
    }

    fn compile_call_ext(&mut self, e: &Expr, want: i32, tail: bool) -> Result<u32, CompileError> {
        match &e.kind {
            ExprKind::Call(f, args) => {
                let base = self.fs_ref().freereg;
                self.expr_to_next_reg(f)?;
                let b = self.compile_args(args, 1)?;
                self.finish_call(base, b, want, e.line, tail)
            }
            ExprKind::MethodCall(obj, name, args) => {
                let base = self.fs_ref().freereg;
                let o = self.expr_to_any_reg(obj)?;
                let have = self.fs_ref().freereg;
                if have < base + 2 {
                    self.fs().reserve_regs(base + 2 - have)?;
                }
                let krk = self.string_rk(name, e.line)?;
                self.fs()
                    .emit(Instruction::abc(OpCode::SelfOp, base, o, krk), e.line);
                let b = self.compile_args(args, 2)?;
                self.finish_call(base, b, want, e.line, tail)
            }
            _ => Err(self.fs_ref().err(e.line, "syntax error")),
        }
    }

    /// Arguments follow the function slot; returns the call's B operand.
    fn compile_args(&mut self, args: &[Expr], arg_offset: u32) -> Result<u32, CompileError> {
        let n = args.len();
        let mut open = false;
        for (i, a) in args.iter().enumerate() {
            if i + 1 == n && a.is_multi_value() {
                self.compile_multi_open(a)?;
                open = true;
            } else {
                self.expr_to_next_reg(a)?;
            }
        }
        Ok(if open { 0 } else { n as u32 + arg_offset })
    }

    /// Emit a call or vararg expansion with an open result count; values
    /// run from the current free register to the stack top.
    pub(crate) fn compile_multi_open(&mut self, e: &Expr) -> Result<(), CompileError> {
        match &e.kind {
            ExprKind::Call(..) | ExprKind::MethodCall(..) => {
                self.compile_call(e, -1)?;
            }
            ExprKind::Vararg => {
                self.check_vararg(e.line)?;
                let base = self.fs().reserve_regs(1)?;
                self.fs()
                    .emit(Instruction::abc(OpCode::Vararg, base, 0, 0), e.line);
            }
            _ => return Err(self.fs_ref().err(e.line, "syntax error")),
        }
        Ok(())
    }

    /// Exactly `want` values (want > 0) at the current free register.
    pub(crate) fn compile_multi_want(&mut self, e: &Expr, want: i32) -> Result<(), CompileError> {
        match &e.kind {
            ExprKind::Call(..) | ExprKind::MethodCall(..) => {
                self.compile_call(e, want)?;
            }
            ExprKind::Vararg => {
                self.check_vararg(e.line)?;
                let base = self.fs().reserve_regs(want as u32)?;
                self.fs().emit(
                    Instruction::abc(OpCode::Vararg, base, want as u32 + 1, 0),
                    e.line,
                );
            }
            _ => return Err(self.fs_ref().err(e.line, "syntax error")),
        }
        Ok(())
    }

    fn finish_call(
        &mut self,
        base: u32,
        b: u32,
        want: i32,
        line: u32,
        tail: bool,
    ) -> Result<u32, CompileError> {
        let op = if tail { OpCode::TailCall } else { OpCode::Call };
        let c = (want + 1).max(0) as u32;
        self.fs().emit(Instruction::abc(op, base, b, c), line);
        self.fs().freereg = base;
        if want > 0 {
            self.fs().reserve_regs(want as u32)?;
        }
        Ok(base)
    }

    /// Comparison that conditionally executes the Jmp emitted right after
    /// it; returns that jump's pc.
    pub(crate) fn emit_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        jump_if_true: bool,
        line: u32,
    ) -> Result<usize, CompileError> {
        let (code, swap, invert) = match op {
            BinOp::Eq => (OpCode::Eq, false, false),
            BinOp::Ne => (OpCode::Eq, false, true),
            BinOp::Lt => (OpCode::Lt, false, false),
            BinOp::Le => (OpCode::Le, false, false),
            BinOp::Gt => (OpCode::Lt, true, false),
            BinOp::Ge => (OpCode::Le, true, false),
            _ => return Err(self.fs_ref().err(line, "syntax error")),
        };
        let saved = self.fs_ref().freereg;
        // operands evaluate left to right even when the emission swaps them
        let rl = self.expr_to_rk(lhs)?;
        let rr = self.expr_to_rk(rhs)?;
        let (b, c) = if swap { (rr, rl) } else { (rl, rr) };
        let a = (jump_if_true ^ invert) as u32;
        self.fs().emit(Instruction::abc(code, a, b, c), line);
        self.fs().freereg = saved;
        Ok(self.fs().emit_jump(line))
    }

    /// Jumps taken when the condition evaluates to `jump_if`.
    pub(crate) fn cond_jump(&mut self, e: &Expr, jump_if: bool) -> Result<Vec<usize>, CompileError> {
        let line = e.line;
        match &e.kind {
            ExprKind::Nil | ExprKind::False => Ok(if jump_if {
                Vec::new()
            } else {
                vec![self.fs().emit_jump(line)]
            }),
            ExprKind::True | ExprKind::Number(_) | ExprKind::Str(_) => Ok(if jump_if {
                vec![self.fs().emit_jump(line)]
            } else {
                Vec::new()
            }),
            ExprKind::UnOp(UnOp::Not, x) => self.cond_jump(x, !jump_if),
            ExprKind::Paren(inner) => self.cond_jump(inner, jump_if),
            ExprKind::BinOp(BinOp::And, a, b) => {
                if jump_if {
                    // a falsy short-circuits to the fall-through side
                    let fa = self.cond_jump(a, false)?;
                    let list = self.cond_jump(b, true)?;
                    self.fs().patch_list_here(&fa)?;
                    Ok(list)
                } else {
                    let mut list = self.cond_jump(a, false)?;
                    list.extend(self.cond_jump(b, false)?);
                    Ok(list)
                }
            }
            ExprKind::BinOp(BinOp::Or, a, b) => {
                if jump_if {
                    let mut list = self.cond_jump(a, true)?;
                    list.extend(self.cond_jump(b, true)?);
                    Ok(list)
                } else {
                    let ta = self.cond_jump(a, true)?;
                    let list = self.cond_jump(b, false)?;
                    self.fs().patch_list_here(&ta)?;
                    Ok(list)
                }
            }
            ExprKind::BinOp(op, a, b) if is_comparison(*op) => {
                Ok(vec![self.emit_comparison(*op, a, b, jump_if, line)?])
            }
            _ => {
                let saved = self.fs_ref().freereg;
                let r = self.expr_to_any_reg(e)?;
                self.fs().freereg = saved;
                self.fs()
                    .emit(Instruction::abc(OpCode::Test, r, 0, jump_if as u32), line);
                Ok(vec![self.fs().emit_jump(line)])
            }
        }
    }

    fn table_to_reg(
        &mut self,
        items: &[TableItem],
        target: u32,
        line: u32,
    ) -> Result<(), CompileError> {
        // Build in place only when the target is a fresh stack-top slot;
        // otherwise an item could observe a half-built value through the
        // variable being assigned.
        let in_place =
            target >= self.fs_ref().nactive() && target + 1 == self.fs_ref().freereg;
        let build = if in_place {
            target
        } else {
            self.fs().reserve_regs(1)?
        };
        let narr = items
            .iter()
            .filter(|i| matches!(i, TableItem::Positional(_)))
            .count() as u32;
        let nhash = items.len() as u32 - narr;
        self.fs().emit(
            Instruction::abc(
                OpCode::NewTable,
                build,
                narr.min(Instruction::MAX_B),
                nhash.min(Instruction::MAX_C),
            ),
            line,
        );
        let stack_base = self.fs_ref().freereg;
        let mut pending = 0u32;
        let mut batch = 0u32;
        let n = items.len();
        for (i, item) in items.iter().enumerate() {
            match item {
                TableItem::Positional(e) => {
                    if i + 1 == n && e.is_multi_value() {
                        self.compile_multi_open(e)?;
                        self.emit_setlist(build, 0, batch, e.line)?;
                        pending = 0;
                        break;
                    }
                    self.expr_to_next_reg(e)?;
                    pending += 1;
                    if pending == FIELDS_PER_FLUSH {
                        self.emit_setlist(build, pending, batch, e.line)?;
                        batch += 1;
                        pending = 0;
                        self.fs().freereg = stack_base;
                    }
                }
                TableItem::Named(name, e) => {
                    let saved = self.fs_ref().freereg;
                    let krk = self.string_rk(name, e.line)?;
                    let vrk = self.expr_to_rk(e)?;
                    self.fs()
                        .emit(Instruction::abc(OpCode::SetTable, build, krk, vrk), e.line);
                    self.fs().freereg = saved;
                }
                TableItem::Keyed(k, v) => {
                    let saved = self.fs_ref().freereg;
                    let krk = self.expr_to_rk(k)?;
                    let vrk = self.expr_to_rk(v)?;
                    self.fs()
                        .emit(Instruction::abc(OpCode::SetTable, build, krk, vrk), v.line);
                    self.fs().freereg = saved;
                }
            }
        }
        if pending > 0 {
            self.emit_setlist(build, pending, batch, line)?;
        }
        if build != target {
            self.fs()
                .emit(Instruction::abc(OpCode::Move, target, build, 0), line);
        }
        Ok(())
    }

    fn emit_setlist(
        &mut self,
        table: u32,
        count: u32,
        batch: u32,
        line: u32,
    ) -> Result<(), CompileError> {
        if batch + 1 > Instruction::MAX_C {
            return Err(self.fs_ref().err(line, "constructor too long"));
        }
        self.fs().emit(
            Instruction::abc(OpCode::SetList, table, count, batch + 1),
            line,
        );
        Ok(())
    }

    /// Compile a nested function body; returns its prototype index in the
    /// current chunk.
    pub(crate) fn compile_function(&mut self, body: &FuncBody) -> Result<u32, CompileError> {
        let name = self.fs_ref().chunk.name.clone();
        let mut fs = super::FuncState::new(name, body.line);
        fs.chunk.func_name = body.name.clone();
        fs.chunk.is_vararg = body.is_vararg;
        fs.chunk.num_params = body.params.len() as u8;
        fs.chunk.last_line_defined = body.end_line;
        self.funcs.push(fs);
        self.fs().enter_block(false);
        self.fs().reserve_regs(body.params.len() as u32)?;
        self.fs()
            .register_locals(body.params.iter().cloned(), body.line)?;
        self.compile_block(&body.body)?;
        self.fs().leave_block()?;
        self.fs()
            .emit(Instruction::abc(OpCode::Return, 0, 1, 0), body.end_line);
        let fs = self.funcs.pop().expect("function nesting is balanced");
        let chunk = fs.finish()?;
        let parent = self.fs();
        parent.chunk.protos.push(std::rc::Rc::new(chunk));
        Ok((parent.chunk.protos.len() - 1) as u32)
    }
}
