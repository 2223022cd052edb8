// Drivers that place a callable on an execution stack and run the
// dispatch loop to completion. The async driver awaits host futures at
// suspension points; the sync driver polls each future exactly once and
// treats a pending one as an error.

use std::future::Future;
use std::task::{Context, Poll, Waker};

use crate::value::Value;

use super::execute::{self, Pushed};
use super::{ExecState, Vm, VmError, VmResult};

pub(crate) fn call_sync(
    vm: &mut Vm,
    exec: &mut ExecState,
    func: &Value,
    args: &[Value],
) -> VmResult<Vec<Value>> {
    let save_top = exec.top;
    let depth = exec.frames.len();
    let base = match place(vm, exec, func, args) {
        Ok(b) => b,
        Err(e) => {
            exec.top = save_top;
            return Err(e);
        }
    };

    let mut state = start(vm, exec, args.len(), base, depth);
    let result = loop {
        match state {
            Ok(n) => break Ok(collect(exec, base, n)),
            Err(VmError::Suspended) => {
                let Some(mut fut) = exec.pending_future.take() else {
                    state = Err(vm.throw(exec, "suspended without a pending future"));
                    continue;
                };
                let mut cx = Context::from_waker(Waker::noop());
                match fut.as_mut().poll(&mut cx) {
                    Poll::Ready(Ok(values)) => {
                        state = resume_with(vm, exec, depth, base, values);
                    }
                    Poll::Ready(Err(e)) => state = Err(e),
                    Poll::Pending => {
                        exec.pending = None;
                        state = Err(
                            vm.throw(exec, "async host call in synchronous execution")
                        );
                    }
                }
            }
            Err(VmError::Yield) => {
                state = Err(vm.throw(exec, "attempt to yield from outside a coroutine"));
            }
            Err(e) => {
                execute::close_upvalues(exec, base);
                exec.frames.truncate(depth);
                break Err(e);
            }
        }
    };
    exec.top = save_top;
    result
}

pub(crate) async fn call_async(
    vm: &mut Vm,
    exec: &mut ExecState,
    func: &Value,
    args: &[Value],
) -> VmResult<Vec<Value>> {
    let save_top = exec.top;
    let depth = exec.frames.len();
    let base = match place(vm, exec, func, args) {
        Ok(b) => b,
        Err(e) => {
            exec.top = save_top;
            return Err(e);
        }
    };

    let mut state = start(vm, exec, args.len(), base, depth);
    let result = loop {
        match state {
            Ok(n) => break Ok(collect(exec, base, n)),
            Err(VmError::Suspended) => {
                let Some(fut) = exec.pending_future.take() else {
                    state = Err(vm.throw(exec, "suspended without a pending future"));
                    continue;
                };
                match fut.await {
                    Ok(values) => state = resume_with(vm, exec, depth, base, values),
                    Err(e) => state = Err(e),
                }
            }
            Err(VmError::Yield) => {
                state = Err(vm.throw(exec, "attempt to yield from outside a coroutine"));
            }
            Err(e) => {
                execute::close_upvalues(exec, base);
                exec.frames.truncate(depth);
                break Err(e);
            }
        }
    };
    exec.top = save_top;
    result
}

fn place(vm: &mut Vm, exec: &mut ExecState, func: &Value, args: &[Value]) -> VmResult<usize> {
    let base = match exec.frames.last() {
        Some(f) => exec.top.max(f.frame_top()),
        None => exec.top,
    };
    exec.ensure(base + 1 + args.len(), vm.options.max_stack)
        .map_err(|_| vm.throw_overflow(exec))?;
    exec.set_reg(base, func.clone());
    for (i, a) in args.iter().enumerate() {
        exec.set_reg(base + 1 + i, a.clone());
    }
    exec.top = base + 1 + args.len();
    Ok(base)
}

/// Kick off the call; `Ok(n)` is a finished call with n results at `base`.
fn start(
    vm: &mut Vm,
    exec: &mut ExecState,
    nargs: usize,
    base: usize,
    depth: usize,
) -> VmResult<usize> {
    match execute::push_call(vm, exec, base, nargs, -1, 0)? {
        Pushed::Done(n) => Ok(n),
        Pushed::Frame => {
            execute::execute(vm, exec, depth)?;
            Ok(exec.top.saturating_sub(base))
        }
    }
}

/// Deliver a completed future's values and keep running.
fn resume_with(
    vm: &mut Vm,
    exec: &mut ExecState,
    depth: usize,
    base: usize,
    values: Vec<Value>,
) -> VmResult<usize> {
    execute::deliver_pending(vm, exec, values)?;
    execute::execute(vm, exec, depth)?;
    Ok(exec.top.saturating_sub(base))
}

fn collect(exec: &ExecState, base: usize, n: usize) -> Vec<Value> {
    (0..n).map(|i| exec.reg(base + i)).collect()
}
