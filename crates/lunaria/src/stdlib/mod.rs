// Host-function bindings for the standard modules. Everything here goes
// through the public host-call ABI; the VM has no special cases for it.

pub mod base;
pub mod coroutine;

use crate::value::{HostContext, TableRef, Value};
use crate::vm::{ExecState, Vm, VmError, VmResult};

pub(crate) fn arg_error(
    vm: &mut Vm,
    exec: &ExecState,
    index: usize,
    func: &str,
    expected: &str,
    got: &Value,
) -> VmError {
    vm.throw(
        exec,
        format!(
            "bad argument #{} to '{}' ({} expected, got {})",
            index + 1,
            func,
            expected,
            got.type_name()
        ),
    )
}

pub(crate) fn check_table(
    vm: &mut Vm,
    exec: &ExecState,
    ctx: HostContext,
    index: usize,
    func: &str,
) -> VmResult<TableRef> {
    let v = exec.arg(ctx, index);
    match v.as_table() {
        Some(t) => Ok(t.clone()),
        None => Err(arg_error(vm, exec, index, func, "table", &v)),
    }
}
