// Statement code generation.

use smol_str::SmolStr;

use super::Compiler;
use super::NameLoc;
use super::expr::EnvLoc;
use super::func_state::{GotoDesc, LabelDesc};
use crate::bytecode::{Instruction, OpCode};
use crate::syntax::CompileError;
use crate::syntax::ast::{Block, Expr, ExprKind, Stat};
use crate::value::Value;

/// A pre-evaluated assignment destination.
enum Target {
    Local(u32),
    Upval(u32),
    Global { env: EnvLoc, key: u32 },
    Index { table: u32, key: u32 },
}

impl Compiler {
    pub(crate) fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
            self.fs().free_temps();
        }
        Ok(())
    }

    fn compile_stat(&mut self, stat: &Stat) -> Result<(), CompileError> {
        match stat {
            Stat::Call { expr } => {
                self.compile_call(expr, 0)?;
                Ok(())
            }
            Stat::Local {
                names,
                values,
                line,
            } => {
                self.eval_exprs_adjusted(values, names.len(), *line)?;
                self.fs().register_locals(names.iter().cloned(), *line)
            }
            Stat::LocalFunction { name, body, line } => {
                // active before its body compiles, so it can recurse
                let reg = self.fs().reserve_regs(1)?;
                self.fs().register_locals([name.clone()], *line)?;
                let idx = self.compile_function(body)?;
                self.fs()
                    .emit(Instruction::abx(OpCode::Closure, reg, idx), *line);
                Ok(())
            }
            Stat::Assign {
                targets,
                values,
                line,
            } => self.assign_stat(targets, values, *line),
            Stat::If { arms, else_body } => self.if_stat(arms, else_body.as_ref()),
            Stat::While { cond, body, line } => self.while_stat(cond, body, *line),
            Stat::Repeat { body, cond, line } => self.repeat_stat(body, cond, *line),
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                line,
            } => self.numeric_for(var, start, limit, step.as_ref(), body, *line),
            Stat::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.generic_for(names, exprs, body, *line),
            Stat::Do { body } => {
                self.fs().enter_block(false);
                self.compile_block(body)?;
                self.fs().leave_block()
            }
            Stat::Return { exprs, line } => self.return_stat(exprs, *line),
            Stat::Break { line } => {
                if !self.fs_ref().blocks.iter().any(|b| b.is_loop) {
                    return Err(self.fs_ref().err(*line, "break outside a loop"));
                }
                let j = self.fs().emit_jump(*line);
                let nactive = self.fs_ref().actvar.len();
                self.fs().gotos.push(GotoDesc {
                    name: SmolStr::new("break"),
                    jump_pc: j,
                    nactive,
                    line: *line,
                });
                Ok(())
            }
            Stat::Goto { label, line } => {
                let j = self.fs().emit_jump(*line);
                let nactive = self.fs_ref().actvar.len();
                self.fs().gotos.push(GotoDesc {
                    name: label.clone(),
                    jump_pc: j,
                    nactive,
                    line: *line,
                });
                Ok(())
            }
            Stat::Label { name, line } => {
                if self.fs_ref().labels.iter().any(|l| l.name == *name) {
                    return Err(self
                        .fs_ref()
                        .err(*line, format!("label '{}' already defined", name)));
                }
                let pc = self.fs_ref().pc();
                let nactive = self.fs_ref().actvar.len();
                self.fs().labels.push(LabelDesc {
                    name: name.clone(),
                    pc,
                    nactive,
                });
                Ok(())
            }
        }
    }

    /// Evaluate `exprs` into exactly `want` consecutive registers starting
    /// at the free-register watermark, expanding or truncating a trailing
    /// multi-value expression and nil-filling shortfalls.
    pub(crate) fn eval_exprs_adjusted(
        &mut self,
        exprs: &[Expr],
        want: usize,
        line: u32,
    ) -> Result<(), CompileError> {
        let base = self.fs_ref().freereg;
        let n = exprs.len();
        if n == 0 {
            if want > 0 {
                let first = self.fs().reserve_regs(want as u32)?;
                self.fs().emit(
                    Instruction::abc(OpCode::LoadNil, first, want as u32 - 1, 0),
                    line,
                );
            }
            return Ok(());
        }
        for e in &exprs[..n - 1] {
            self.expr_to_next_reg(e)?;
        }
        let last = &exprs[n - 1];
        if last.is_multi_value() {
            let remaining = want as i64 - (n as i64 - 1);
            if remaining > 0 {
                self.compile_multi_want(last, remaining as i32)?;
            } else {
                // surplus expression: evaluate for effect, keep nothing
                if !matches!(last.kind, ExprKind::Vararg) {
                    self.compile_call(last, 0)?;
                }
                self.fs().freereg = base + want as u32;
            }
        } else {
            self.expr_to_next_reg(last)?;
            if n < want {
                let extra = (want - n) as u32;
                let first = self.fs().reserve_regs(extra)?;
                self.fs()
                    .emit(Instruction::abc(OpCode::LoadNil, first, extra - 1, 0), line);
            } else if n > want {
                self.fs().freereg = base + want as u32;
            }
        }
        Ok(())
    }

    fn assign_stat(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
        line: u32,
    ) -> Result<(), CompileError> {
        if targets.len() == 1
            && values.len() == 1
            && let ExprKind::Name(n) = &targets[0].kind
            && let Some(r) = self.fs_ref().resolve_local(n)
        {
            return self.expr_to_reg(&values[0], r);
        }
        let mut prepped = Vec::with_capacity(targets.len());
        for t in targets {
            let target = match &t.kind {
                ExprKind::Name(n) => match self.resolve(n)? {
                    Some(NameLoc::Local(r)) => Target::Local(r),
                    Some(NameLoc::Upvalue(u)) => Target::Upval(u),
                    None => {
                        let env = self.env_loc(t.line)?;
                        let key = self.string_rk(n, t.line)?;
                        Target::Global { env, key }
                    }
                },
                ExprKind::Index(tb, k) => {
                    let table = self.expr_to_any_reg(tb)?;
                    let key = self.expr_to_rk(k)?;
                    Target::Index { table, key }
                }
                _ => return Err(self.fs_ref().err(t.line, "cannot assign to this expression")),
            };
            prepped.push(target);
        }
        let base = self.fs_ref().freereg;
        self.eval_exprs_adjusted(values, targets.len(), line)?;
        for (i, tgt) in prepped.iter().enumerate().rev() {
            let src = base + i as u32;
            let inst = match tgt {
                Target::Local(r) => {
                    if *r == src {
                        continue;
                    }
                    Instruction::abc(OpCode::Move, *r, src, 0)
                }
                Target::Upval(u) => Instruction::abc(OpCode::SetUpval, src, *u, 0),
                Target::Global { env, key } => match env {
                    EnvLoc::Upval(u) => Instruction::abc(OpCode::SetTabUp, *u, *key, src),
                    EnvLoc::Local(r) => Instruction::abc(OpCode::SetTable, *r, *key, src),
                },
                Target::Index { table, key } => {
                    Instruction::abc(OpCode::SetTable, *table, *key, src)
                }
            };
            self.fs().emit(inst, line);
        }
        Ok(())
    }

    fn if_stat(
        &mut self,
        arms: &[(Expr, Block)],
        else_body: Option<&Block>,
    ) -> Result<(), CompileError> {
        let mut exits = Vec::new();
        let n = arms.len();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let jf = self.cond_jump(cond, false)?;
            self.fs().enter_block(false);
            self.compile_block(body)?;
            self.fs().leave_block()?;
            if i + 1 < n || else_body.is_some() {
                exits.push(self.fs().emit_jump(cond.line));
            }
            self.fs().patch_list_here(&jf)?;
        }
        if let Some(body) = else_body {
            self.fs().enter_block(false);
            self.compile_block(body)?;
            self.fs().leave_block()?;
        }
        self.fs().patch_list_here(&exits)
    }

    /// Back edge of a loop; closes upvalues of captured loop-body locals.
    fn emit_back_edge(&mut self, top: usize, line: u32) -> Result<(), CompileError> {
        let close = match self.fs_ref().blocks.last() {
            Some(b) if b.has_upval => Some(b.first_local as u32),
            _ => None,
        };
        let j = self.fs().emit_jump(line);
        if let Some(base) = close {
            self.fs().set_jump_close(j, base);
        }
        self.fs().patch_jump(j, top)
    }

    fn while_stat(&mut self, cond: &Expr, body: &Block, line: u32) -> Result<(), CompileError> {
        let top = self.fs_ref().pc();
        let jf = self.cond_jump(cond, false)?;
        self.fs().enter_block(true);
        self.compile_block(body)?;
        self.emit_back_edge(top, line)?;
        self.fs().leave_block()?;
        self.fs().patch_list_here(&jf)
    }

    fn repeat_stat(&mut self, body: &Block, cond: &Expr, line: u32) -> Result<(), CompileError> {
        let top = self.fs_ref().pc();
        self.fs().enter_block(true);
        self.compile_block(body)?;
        // the until condition still sees the body's locals
        let exits = self.cond_jump(cond, true)?;
        self.emit_back_edge(top, line)?;
        self.fs().patch_list_here(&exits)?;
        self.fs().leave_block()
    }

    fn numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        let base = self.fs_ref().freereg;
        self.expr_to_next_reg(start)?;
        self.expr_to_next_reg(limit)?;
        match step {
            Some(e) => {
                self.expr_to_next_reg(e)?;
            }
            None => {
                let r = self.fs().reserve_regs(1)?;
                let k = self.fs().add_constant(Value::Number(1.0));
                self.fs().emit(Instruction::abx(OpCode::LoadK, r, k), line);
            }
        }
        self.fs().enter_block(true);
        self.fs().register_locals(
            [
                SmolStr::new("(for start)"),
                SmolStr::new("(for limit)"),
                SmolStr::new("(for step)"),
            ],
            line,
        )?;
        let prep = self
            .fs()
            .emit(Instruction::asbx(OpCode::ForPrep, base, 0), line);
        self.fs().enter_block(false);
        self.fs().reserve_regs(1)?;
        self.fs().register_locals([var.clone()], line)?;
        let body_start = self.fs_ref().pc();
        self.compile_block(body)?;
        self.fs().leave_block()?;
        let back = self
            .fs()
            .emit(Instruction::asbx(OpCode::ForLoop, base, 0), line);
        self.fs().patch_jump(back, body_start)?;
        self.fs().patch_jump(prep, back)?;
        self.fs().leave_block()
    }

    fn generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        let base = self.fs_ref().freereg;
        // iterator function, state, control variable
        self.eval_exprs_adjusted(exprs, 3, line)?;
        self.fs().enter_block(true);
        self.fs().register_locals(
            [
                SmolStr::new("(for generator)"),
                SmolStr::new("(for state)"),
                SmolStr::new("(for control)"),
            ],
            line,
        )?;
        let prep = self.fs().emit_jump(line);
        self.fs().enter_block(false);
        self.fs().reserve_regs(names.len() as u32)?;
        self.fs().register_locals(names.iter().cloned(), line)?;
        let body_start = self.fs_ref().pc();
        self.compile_block(body)?;
        self.fs().leave_block()?;
        self.fs().patch_here(prep)?;
        self.fs().emit(
            Instruction::abc(OpCode::TForCall, base, 0, names.len() as u32),
            line,
        );
        let back = self
            .fs()
            .emit(Instruction::asbx(OpCode::TForLoop, base + 2, 0), line);
        self.fs().patch_jump(back, body_start)?;
        self.fs().leave_block()
    }

    fn return_stat(&mut self, exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        let base = self.fs_ref().nactive();
        if exprs.len() == 1
            && matches!(exprs[0].kind, ExprKind::Call(..) | ExprKind::MethodCall(..))
        {
            self.compile_tail_call(&exprs[0])?;
            return Ok(());
        }
        let n = exprs.len();
        if n == 0 {
            self.fs()
                .emit(Instruction::abc(OpCode::Return, base, 1, 0), line);
            return Ok(());
        }
        for e in &exprs[..n - 1] {
            self.expr_to_next_reg(e)?;
        }
        let last = &exprs[n - 1];
        if last.is_multi_value() {
            self.compile_multi_open(last)?;
            self.fs()
                .emit(Instruction::abc(OpCode::Return, base, 0, 0), line);
        } else {
            self.expr_to_next_reg(last)?;
            self.fs()
                .emit(Instruction::abc(OpCode::Return, base, n as u32 + 1, 0), line);
        }
        Ok(())
    }
}
