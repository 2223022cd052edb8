// The dispatch loop and call machinery.
//
// Bytecode-to-bytecode calls never recurse into the host stack: Call and
// TailCall push or replace a `Frame` and jump back to the frame loader.
// Host recursion happens only for metamethods, hooks and protected calls,
// which run with yielding disabled.

use crate::bytecode::OpCode;
use crate::compiler::FIELDS_PER_FLUSH;
use crate::value::{Closure, HostContext, HostReturn, Upvalue, UpvalueRef, Value};

use super::frame::{FRAME_REENTRY, FRAME_TAIL, Frame};
use super::hook::{self, HookEvent};
use super::meta;
use super::{ExecState, Pending, Vm, VmError, VmResult};

/// Cancellation is polled once per this many instructions.
const CANCEL_CHECK_INTERVAL: u32 = 256;

/// Outcome of arranging a call: a new bytecode frame to enter, or a host
/// call that already completed with `n` results at the return base.
pub(crate) enum Pushed {
    Frame,
    Done(usize),
}

pub(crate) fn find_upvalue(exec: &mut ExecState, index: usize) -> UpvalueRef {
    for uv in &exec.open_upvalues {
        if uv.is_open_at(&exec.stack, index) {
            return uv.clone();
        }
    }
    let uv = Upvalue::open(exec.stack.clone(), index);
    exec.open_upvalues.push(uv.clone());
    uv
}

/// Close every open upvalue aliasing a slot at or above `from`.
pub(crate) fn close_upvalues(exec: &mut ExecState, from: usize) {
    let stack = exec.stack.clone();
    exec.open_upvalues.retain(|uv| match uv.open_index(&stack) {
        Some(i) if i >= from => {
            uv.close();
            false
        }
        _ => true,
    });
}

pub(crate) fn can_suspend(vm: &Vm, exec: &ExecState) -> bool {
    exec.nny == 0 && vm.coroutines.is_empty()
}

/// Arrange a call to the value at `func_index`, with `nargs` arguments
/// right after it. For a bytecode closure this pushes a frame; for a host
/// function it runs the call here. `want` of -1 keeps every result.
pub(crate) fn push_call(
    vm: &mut Vm,
    exec: &mut ExecState,
    func_index: usize,
    nargs: usize,
    want: i32,
    flags: u8,
) -> VmResult<Pushed> {
    let mut func_index = func_index;
    let mut nargs = nargs;
    let mut callee = exec.reg(func_index);
    // __call: insert the original value as the first argument and call
    // the handler instead
    let mut hops = 0;
    while !callee.is_callable() {
        hops += 1;
        if hops > vm.options.meta_chain_limit {
            return Err(vm.throw(
                exec,
                format!("attempt to call a {} value", callee.type_name()),
            ));
        }
        let Some(handler) = meta::get_metamethod(vm, &callee, "__call") else {
            return Err(vm.throw(
                exec,
                format!("attempt to call a {} value", callee.type_name()),
            ));
        };
        exec.ensure(func_index + 2 + nargs, vm.options.max_stack)
            .map_err(|_| vm.throw_overflow(exec))?;
        {
            let mut s = exec.stack.borrow_mut();
            for i in (0..nargs).rev() {
                s[func_index + 2 + i] = s[func_index + 1 + i].clone();
            }
            s[func_index + 1] = callee;
            s[func_index] = handler.clone();
        }
        nargs += 1;
        callee = handler;
    }

    match callee {
        Value::Function(cl) => {
            let chunk = cl.chunk.clone();
            let p = chunk.num_params as usize;
            let (base, vararg_start, vararg_count) = if chunk.is_vararg {
                let base = func_index + 1 + nargs;
                exec.ensure(base + p.max(1), vm.options.max_stack)
                    .map_err(|_| vm.throw_overflow(exec))?;
                for i in 0..p {
                    let v = if i < nargs {
                        exec.reg(func_index + 1 + i)
                    } else {
                        Value::Nil
                    };
                    exec.set_reg(base + i, v);
                }
                (base, func_index + 1 + p, nargs.saturating_sub(p))
            } else {
                let base = func_index + 1;
                exec.ensure(base + p, vm.options.max_stack)
                    .map_err(|_| vm.throw_overflow(exec))?;
                for i in nargs..p {
                    exec.set_reg(base + i, Value::Nil);
                }
                (base, base, 0)
            };
            exec.ensure(base + chunk.max_stack as usize, vm.options.max_stack)
                .map_err(|_| vm.throw_overflow(exec))?;
            exec.frames.push(Frame {
                closure: cl,
                base,
                ret_base: func_index,
                pc: 0,
                want,
                vararg_start,
                vararg_count,
                flags,
            });
            exec.top = base + chunk.max_stack as usize;
            hook::fire(vm, exec, HookEvent::Call)?;
            Ok(Pushed::Frame)
        }
        Value::Host(h) => {
            let ctx = HostContext {
                base: func_index + 1,
                nargs,
                ret_base: func_index,
            };
            match h.call(vm, exec, ctx) {
                Ok(HostReturn::Count(n)) => {
                    settle_results(exec, func_index, n, want);
                    Ok(Pushed::Done(n))
                }
                Ok(HostReturn::Future(fut)) => {
                    if !can_suspend(vm, exec) {
                        return Err(
                            vm.throw(exec, "attempt to suspend across a host-call boundary")
                        );
                    }
                    exec.pending = Some(Pending::HostCall {
                        ret_base: func_index,
                        want,
                    });
                    exec.pending_future = Some(fut);
                    Err(VmError::Suspended)
                }
                Err(VmError::Yield) => {
                    exec.pending = Some(Pending::HostCall {
                        ret_base: func_index,
                        want,
                    });
                    Err(VmError::Yield)
                }
                Err(e) => Err(e),
            }
        }
        // is_callable() said so
        _ => Err(vm.throw(exec, "attempt to call a non-function value")),
    }
}

/// Pad or trim `n` results at `ret_base` to the requested count and fix
/// the stack top marker.
fn settle_results(exec: &mut ExecState, ret_base: usize, n: usize, want: i32) {
    if want < 0 {
        exec.top = ret_base + n;
        return;
    }
    let want = want as usize;
    if n < want {
        let _ = exec.ensure(ret_base + want, ret_base + want);
        for i in n..want {
            exec.set_reg(ret_base + i, Value::Nil);
        }
    }
    if let Some(f) = exec.frames.last() {
        exec.top = f.frame_top();
    } else {
        exec.top = ret_base + want;
    }
}

/// Pop the current frame, moving `count` results from `first` down to its
/// return base.
pub(crate) fn finish_frame(vm: &mut Vm, exec: &mut ExecState, first: usize, count: usize) -> VmResult<()> {
    hook::fire(vm, exec, HookEvent::Return)?;
    let Some(frame) = exec.frames.pop() else {
        return Ok(());
    };
    close_upvalues(exec, frame.base);
    let ret = frame.ret_base;
    let old_top = exec.top.max(frame.frame_top());
    {
        let mut s = exec.stack.borrow_mut();
        for i in 0..count {
            s[ret + i] = s[first + i].clone();
        }
    }
    settle_results(exec, ret, count, frame.want);
    // nil everything the call vacated above its settled results, so a
    // popped frame does not keep values alive through stale slots
    let kept = if frame.want < 0 {
        count
    } else {
        frame.want as usize
    };
    let clear_from = ret + kept;
    if old_top > clear_from {
        let mut s = exec.stack.borrow_mut();
        let end = old_top.min(s.len());
        for slot in &mut s[clear_from..end] {
            *slot = Value::Nil;
        }
    }
    Ok(())
}

/// Call a value from host context (metamethods, pcall, hooks, require).
/// Runs to completion; yielding across this boundary is refused.
pub(crate) fn call_value(
    vm: &mut Vm,
    exec: &mut ExecState,
    func: &Value,
    args: &[Value],
) -> VmResult<Vec<Value>> {
    exec.nny += 1;
    let r = call_value_raw(vm, exec, func, args);
    exec.nny -= 1;
    r
}

pub(crate) fn call_value_raw(
    vm: &mut Vm,
    exec: &mut ExecState,
    func: &Value,
    args: &[Value],
) -> VmResult<Vec<Value>> {
    let save_top = exec.top;
    let base = scratch_base(exec);
    let depth = exec.frames.len();
    exec.ensure(base + 1 + args.len(), vm.options.max_stack)
        .map_err(|_| vm.throw_overflow(exec))?;
    exec.set_reg(base, func.clone());
    for (i, a) in args.iter().enumerate() {
        exec.set_reg(base + 1 + i, a.clone());
    }
    let outcome = push_call(vm, exec, base, args.len(), -1, FRAME_REENTRY);
    let result = match outcome {
        Ok(Pushed::Done(n)) => Ok(collect(exec, base, n)),
        Ok(Pushed::Frame) => match execute(vm, exec, depth) {
            Ok(()) => {
                let n = exec.top.saturating_sub(base);
                Ok(collect(exec, base, n))
            }
            Err(e) => {
                // unwind to this boundary so protected callers see a
                // consistent frame stack
                close_upvalues(exec, base);
                exec.frames.truncate(depth);
                Err(e)
            }
        },
        Err(e) => Err(e),
    };
    exec.top = save_top;
    result
}

/// First stack slot safely above every live register.
fn scratch_base(exec: &ExecState) -> usize {
    match exec.frames.last() {
        Some(f) => exec.top.max(f.frame_top()),
        None => exec.top,
    }
}

fn collect(exec: &ExecState, base: usize, n: usize) -> Vec<Value> {
    (0..n).map(|i| exec.reg(base + i)).collect()
}

/// Hand delivered values (resume arguments or a completed host future)
/// to whatever suspension point is waiting for them.
pub(crate) fn deliver_pending(
    vm: &mut Vm,
    exec: &mut ExecState,
    values: Vec<Value>,
) -> VmResult<()> {
    match exec.pending.take() {
        None => Ok(()),
        Some(Pending::HostCall { ret_base, want }) => {
            let n = values.len();
            exec.ensure(ret_base + n.max(1), vm.options.max_stack)
                .map_err(|_| vm.throw_overflow(exec))?;
            for (i, v) in values.into_iter().enumerate() {
                exec.set_reg(ret_base + i, v);
            }
            settle_results(exec, ret_base, n, want);
            Ok(())
        }
        Some(Pending::SetResult { dest }) => {
            exec.set_reg(dest, values.into_iter().next().unwrap_or(Value::Nil));
            Ok(())
        }
        Some(Pending::Discard) => Ok(()),
        Some(Pending::Compare { expect }) => {
            let cond = values.first().map(Value::truthy).unwrap_or(false);
            if cond != expect
                && let Some(f) = exec.frames.last_mut()
            {
                f.pc += 1;
            }
            Ok(())
        }
        Some(Pending::Concat { dest, first, next }) => {
            let acc = values.into_iter().next().unwrap_or(Value::Nil);
            meta::concat_fold(vm, exec, dest, first, next, acc)
        }
    }
}

/// Run bytecode until the frame stack shrinks back to `target_depth`.
pub(crate) fn execute(vm: &mut Vm, exec: &mut ExecState, target_depth: usize) -> VmResult<()> {
    let mut ticks: u32 = 0;
    'start_frame: loop {
        if exec.frames.len() <= target_depth {
            return Ok(());
        }
        let (closure, base, mut pc) = {
            let f = &exec.frames[exec.frames.len() - 1];
            (f.closure.clone(), f.base, f.pc)
        };
        let chunk = closure.chunk.clone();

        loop {
            ticks = ticks.wrapping_add(1);
            if ticks % CANCEL_CHECK_INTERVAL == 0 && vm.is_cancelled() {
                return Err(VmError::Cancelled);
            }
            let inst = chunk.code[pc];
            pc += 1;
            {
                let last = exec.frames.len() - 1;
                exec.frames[last].pc = pc;
            }
            if vm.hook.is_some() {
                hook::on_instruction(vm, exec, &chunk, pc - 1)?;
            }

            let a = inst.a() as usize;
            match inst.opcode() {
                OpCode::Move => {
                    let v = exec.reg(base + inst.b() as usize);
                    exec.set_reg(base + a, v);
                }
                OpCode::LoadK => {
                    let v = chunk.constants[inst.bx() as usize].clone();
                    exec.set_reg(base + a, v);
                }
                OpCode::LoadBool => {
                    exec.set_reg(base + a, Value::Boolean(inst.b() != 0));
                    if inst.c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    for i in 0..=inst.b() as usize {
                        exec.set_reg(base + a + i, Value::Nil);
                    }
                }
                OpCode::GetUpval => {
                    let v = closure.upvalues[inst.b() as usize].get();
                    exec.set_reg(base + a, v);
                }
                OpCode::SetUpval => {
                    closure.upvalues[inst.b() as usize].set(exec.reg(base + a));
                }
                OpCode::GetTabUp => {
                    let obj = closure.upvalues[inst.b() as usize].get();
                    let key = rk(exec, &chunk, base, inst.c());
                    meta::index(vm, exec, obj, key, base + a)?;
                }
                OpCode::GetTable => {
                    let obj = exec.reg(base + inst.b() as usize);
                    let key = rk(exec, &chunk, base, inst.c());
                    meta::index(vm, exec, obj, key, base + a)?;
                }
                OpCode::SetTabUp => {
                    let obj = closure.upvalues[a].get();
                    let key = rk(exec, &chunk, base, inst.b());
                    let val = rk(exec, &chunk, base, inst.c());
                    meta::newindex(vm, exec, obj, key, val)?;
                }
                OpCode::SetTable => {
                    let obj = exec.reg(base + a);
                    let key = rk(exec, &chunk, base, inst.b());
                    let val = rk(exec, &chunk, base, inst.c());
                    meta::newindex(vm, exec, obj, key, val)?;
                }
                OpCode::NewTable => {
                    let t = crate::value::Table::with_capacity(
                        inst.b() as usize,
                        inst.c() as usize,
                    );
                    exec.set_reg(base + a, Value::table(t));
                }
                OpCode::SelfOp => {
                    let obj = exec.reg(base + inst.b() as usize);
                    let key = rk(exec, &chunk, base, inst.c());
                    exec.set_reg(base + a + 1, obj.clone());
                    meta::index(vm, exec, obj, key, base + a)?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod
                | OpCode::Pow => {
                    let l = rk(exec, &chunk, base, inst.b());
                    let r = rk(exec, &chunk, base, inst.c());
                    meta::arith(vm, exec, inst.opcode(), l, r, base + a)?;
                }
                OpCode::Unm => {
                    let v = exec.reg(base + inst.b() as usize);
                    meta::unary_minus(vm, exec, v, base + a)?;
                }
                OpCode::Not => {
                    let v = exec.reg(base + inst.b() as usize);
                    exec.set_reg(base + a, Value::Boolean(!v.truthy()));
                }
                OpCode::Len => {
                    let v = exec.reg(base + inst.b() as usize);
                    meta::length(vm, exec, v, base + a)?;
                }
                OpCode::Concat => {
                    let first = base + inst.b() as usize;
                    let last = base + inst.c() as usize;
                    let acc = exec.reg(last);
                    meta::concat_fold(vm, exec, base + a, first, last, acc)?;
                }
                OpCode::Jmp => {
                    if a > 0 {
                        close_upvalues(exec, base + a - 1);
                    }
                    pc = offset_pc(pc, inst.sbx());
                }
                OpCode::Eq => {
                    let l = rk(exec, &chunk, base, inst.b());
                    let r = rk(exec, &chunk, base, inst.c());
                    let expect = a != 0;
                    let cond = meta::equals(vm, exec, &l, &r, expect)?;
                    if cond != expect {
                        pc += 1;
                    }
                }
                OpCode::Lt | OpCode::Le => {
                    let l = rk(exec, &chunk, base, inst.b());
                    let r = rk(exec, &chunk, base, inst.c());
                    let expect = a != 0;
                    let cond = meta::less(vm, exec, &l, &r, inst.opcode() == OpCode::Le, expect)?;
                    if cond != expect {
                        pc += 1;
                    }
                }
                OpCode::Test => {
                    let c = inst.c() != 0;
                    if exec.reg(base + a).truthy() != c {
                        pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let v = exec.reg(base + inst.b() as usize);
                    if v.truthy() == (inst.c() != 0) {
                        exec.set_reg(base + a, v);
                    } else {
                        pc += 1;
                    }
                }
                OpCode::Call => {
                    let b = inst.b() as usize;
                    let func_index = base + a;
                    let nargs = if b == 0 {
                        exec.top.saturating_sub(func_index + 1)
                    } else {
                        b - 1
                    };
                    let want = inst.c() as i32 - 1;
                    match push_call(vm, exec, func_index, nargs, want, 0)? {
                        Pushed::Frame => continue 'start_frame,
                        Pushed::Done(_) => {}
                    }
                }
                OpCode::TailCall => {
                    let b = inst.b() as usize;
                    let func_index = base + a;
                    let nargs = if b == 0 {
                        exec.top.saturating_sub(func_index + 1)
                    } else {
                        b - 1
                    };
                    close_upvalues(exec, base);
                    let Some(frame) = exec.frames.pop() else {
                        return Ok(());
                    };
                    let ret = frame.ret_base;
                    let old_top = exec.top.max(frame.frame_top());
                    {
                        let mut s = exec.stack.borrow_mut();
                        for i in 0..=nargs {
                            s[ret + i] = s[func_index + i].clone();
                        }
                        // nil the rest of the popped frame's window so the
                        // replaced call does not keep values alive
                        let clear_from = ret + nargs + 1;
                        let end = old_top.min(s.len());
                        if end > clear_from {
                            for slot in &mut s[clear_from..end] {
                                *slot = Value::Nil;
                            }
                        }
                    }
                    exec.top = ret + nargs + 1;
                    match push_call(vm, exec, ret, nargs, frame.want, FRAME_TAIL)? {
                        Pushed::Frame => continue 'start_frame,
                        Pushed::Done(_) => {
                            // the host call completed this frame's return
                            if exec.frames.len() <= target_depth {
                                return Ok(());
                            }
                            continue 'start_frame;
                        }
                    }
                }
                OpCode::Return => {
                    let b = inst.b() as usize;
                    let first = base + a;
                    let count = if b == 0 {
                        exec.top.saturating_sub(first)
                    } else {
                        b - 1
                    };
                    finish_frame(vm, exec, first, count)?;
                    if exec.frames.len() <= target_depth {
                        return Ok(());
                    }
                    continue 'start_frame;
                }
                OpCode::ForPrep => {
                    let start = for_number(vm, exec, base + a, "'for' initial value")?;
                    let limit = for_number(vm, exec, base + a + 1, "'for' limit")?;
                    let step = for_number(vm, exec, base + a + 2, "'for' step")?;
                    exec.set_reg(base + a, Value::Number(start - step));
                    exec.set_reg(base + a + 1, Value::Number(limit));
                    exec.set_reg(base + a + 2, Value::Number(step));
                    pc = offset_pc(pc, inst.sbx());
                }
                OpCode::ForLoop => {
                    let i = exec.reg(base + a).as_number().unwrap_or(f64::NAN);
                    let limit = exec.reg(base + a + 1).as_number().unwrap_or(f64::NAN);
                    let step = exec.reg(base + a + 2).as_number().unwrap_or(f64::NAN);
                    let next = i + step;
                    let go = if step >= 0.0 { next <= limit } else { next >= limit };
                    if go {
                        exec.set_reg(base + a, Value::Number(next));
                        exec.set_reg(base + a + 3, Value::Number(next));
                        pc = offset_pc(pc, inst.sbx());
                    }
                }
                OpCode::TForCall => {
                    let nvars = inst.c() as usize;
                    let fbase = base + a;
                    let call_at = fbase + 3;
                    exec.ensure(call_at + 3.max(nvars), vm.options.max_stack)
                        .map_err(|_| vm.throw_overflow(exec))?;
                    {
                        let mut s = exec.stack.borrow_mut();
                        s[call_at] = s[fbase].clone();
                        s[call_at + 1] = s[fbase + 1].clone();
                        s[call_at + 2] = s[fbase + 2].clone();
                    }
                    match push_call(vm, exec, call_at, 2, nvars as i32, 0)? {
                        Pushed::Frame => continue 'start_frame,
                        Pushed::Done(_) => {}
                    }
                }
                OpCode::TForLoop => {
                    let ctrl = exec.reg(base + a + 1);
                    if !ctrl.is_nil() {
                        exec.set_reg(base + a, ctrl);
                        pc = offset_pc(pc, inst.sbx());
                    }
                }
                OpCode::SetList => {
                    let b = inst.b() as usize;
                    let first = base + a + 1;
                    let n = if b == 0 {
                        exec.top.saturating_sub(first)
                    } else {
                        b
                    };
                    let start = (inst.c() as usize - 1) * FIELDS_PER_FLUSH as usize;
                    let t = exec.reg(base + a);
                    let Some(t) = t.as_table().cloned() else {
                        return Err(vm.throw(exec, "internal: SetList on a non-table"));
                    };
                    {
                        let mut tb = t.borrow_mut();
                        for i in 0..n {
                            tb.raw_set_int((start + i + 1) as i64, exec.reg(first + i));
                        }
                    }
                    if let Some(f) = exec.frames.last() {
                        exec.top = f.frame_top();
                    }
                }
                OpCode::Close => {
                    close_upvalues(exec, base + a);
                }
                OpCode::Closure => {
                    let proto = chunk.protos[inst.bx() as usize].clone();
                    let mut upvalues = Vec::with_capacity(proto.upvalues.len());
                    for desc in &proto.upvalues {
                        if desc.in_stack {
                            upvalues.push(find_upvalue(exec, base + desc.index as usize));
                        } else {
                            upvalues.push(closure.upvalues[desc.index as usize].clone());
                        }
                    }
                    exec.set_reg(
                        base + a,
                        Value::Function(std::rc::Rc::new(Closure {
                            chunk: proto,
                            upvalues,
                        })),
                    );
                }
                OpCode::Vararg => {
                    let b = inst.b() as usize;
                    let (vstart, vcount) = {
                        let f = &exec.frames[exec.frames.len() - 1];
                        (f.vararg_start, f.vararg_count)
                    };
                    if b == 0 {
                        exec.ensure(base + a + vcount, vm.options.max_stack)
                            .map_err(|_| vm.throw_overflow(exec))?;
                        for i in 0..vcount {
                            let v = exec.reg(vstart + i);
                            exec.set_reg(base + a + i, v);
                        }
                        exec.top = base + a + vcount;
                    } else {
                        for i in 0..b - 1 {
                            let v = if i < vcount {
                                exec.reg(vstart + i)
                            } else {
                                Value::Nil
                            };
                            exec.set_reg(base + a + i, v);
                        }
                    }
                }
            }
        }
    }
}

#[inline]
fn offset_pc(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64) as usize
}

/// RK operand: a constant when biased, a register otherwise.
#[inline]
fn rk(exec: &ExecState, chunk: &crate::bytecode::Chunk, base: usize, operand: u32) -> Value {
    if crate::bytecode::Instruction::is_constant(operand) {
        chunk.constants[crate::bytecode::Instruction::constant_index(operand)].clone()
    } else {
        exec.reg(base + operand as usize)
    }
}

fn for_number(vm: &mut Vm, exec: &ExecState, slot: usize, what: &str) -> VmResult<f64> {
    match exec.reg(slot).coerce_number() {
        Some(n) => Ok(n),
        None => Err(vm.throw(exec, format!("{} must be a number", what))),
    }
}
