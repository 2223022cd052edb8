// The coroutine library.

use crate::registry::LibraryModule;
use crate::value::{HostContext, HostFunction, HostReturn, Value};
use crate::vm::coroutine::{self, Coroutine};
use crate::vm::{ExecState, Vm, VmError, VmResult};

use super::arg_error;

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => co_create,
        "resume" => co_resume,
        "yield" => co_yield,
        "status" => co_status,
        "wrap" => co_wrap,
        "running" => co_running,
        "isyieldable" => co_isyieldable,
    })
}

fn co_create(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let func = exec.arg(ctx, 0);
    if !func.is_callable() {
        return Err(arg_error(vm, exec, 0, "create", "function", &func));
    }
    let co = Coroutine::new(vm, func);
    let n = exec.set_results(ctx, &[Value::Coroutine(co)]);
    Ok(HostReturn::Count(n))
}

fn co_resume(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let co = match exec.arg(ctx, 0) {
        Value::Coroutine(co) => co,
        other => return Err(arg_error(vm, exec, 0, "resume", "coroutine", &other)),
    };
    let args: Vec<Value> = (1..ctx.nargs).map(|i| exec.arg(ctx, i)).collect();
    match coroutine::resume(vm, exec, &co, args) {
        Ok(mut values) => {
            let mut out = vec![Value::Boolean(true)];
            out.append(&mut values);
            let n = exec.set_results(ctx, &out);
            Ok(HostReturn::Count(n))
        }
        Err(VmError::Runtime | VmError::StackOverflow) => {
            let err = vm.take_error();
            let n = exec.set_results(ctx, &[Value::Boolean(false), err]);
            Ok(HostReturn::Count(n))
        }
        Err(e) => Err(e),
    }
}

fn co_yield(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let values = exec.args(ctx);
    coroutine::yield_values(vm, exec, values)?;
    Ok(HostReturn::Count(0))
}

fn co_status(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let co = match exec.arg(ctx, 0) {
        Value::Coroutine(co) => co,
        other => return Err(arg_error(vm, exec, 0, "status", "coroutine", &other)),
    };
    let n = exec.set_results(ctx, &[Value::string(co.status_name())]);
    Ok(HostReturn::Count(n))
}

fn co_wrap(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let func = exec.arg(ctx, 0);
    if !func.is_callable() {
        return Err(arg_error(vm, exec, 0, "wrap", "function", &func));
    }
    let co = Coroutine::new(vm, func);
    let wrapper = HostFunction::new("coroutine wrapper", move |vm, exec, ctx| {
        let args = exec.args(ctx);
        // errors propagate to the caller instead of coming back as a
        // false/message pair
        let values = coroutine::resume(vm, exec, &co, args)?;
        let n = exec.set_results(ctx, &values);
        Ok(HostReturn::Count(n))
    });
    let n = exec.set_results(ctx, &[Value::Host(wrapper)]);
    Ok(HostReturn::Count(n))
}

fn co_running(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let n = match vm.coroutines.last() {
        Some(co) => exec.set_results(
            ctx,
            &[Value::Coroutine(co.clone()), Value::Boolean(false)],
        ),
        None => exec.set_results(ctx, &[Value::Nil, Value::Boolean(true)]),
    };
    Ok(HostReturn::Count(n))
}

fn co_isyieldable(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let yieldable = !vm.coroutines.is_empty() && exec.nny == 0;
    let n = exec.set_results(ctx, &[Value::Boolean(yieldable)]);
    Ok(HostReturn::Count(n))
}
