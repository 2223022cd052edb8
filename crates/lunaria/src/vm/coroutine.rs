// Coroutines. Each one owns a full execution stack; yield unwinds the
// dispatch loop with `VmError::Yield` and resume re-enters it, with the
// transferred values parked on the coroutine's `ExecState`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::Value;

use super::execute::{self, Pushed};
use super::{ExecState, Vm, VmError, VmResult};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoStatus {
    Suspended,
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    Dead,
}

pub struct Coroutine {
    status: Cell<CoStatus>,
    pub(crate) exec: RefCell<ExecState>,
    /// Entry function, consumed by the first resume.
    func: RefCell<Option<Value>>,
}

impl Coroutine {
    pub fn new(vm: &Vm, func: Value) -> Rc<Coroutine> {
        Rc::new(Coroutine {
            status: Cell::new(CoStatus::Suspended),
            exec: RefCell::new(ExecState::new(&vm.options)),
            func: RefCell::new(Some(func)),
        })
    }

    pub fn status(&self) -> CoStatus {
        self.status.get()
    }

    pub fn status_name(&self) -> &'static str {
        match self.status.get() {
            CoStatus::Suspended => "suspended",
            CoStatus::Running => "running",
            CoStatus::Normal => "normal",
            CoStatus::Dead => "dead",
        }
    }
}

/// Resume `co` with `args`, returning the values it yields or returns
/// with. Errors raised inside the coroutine propagate as `Err`; the
/// caller decides whether to protect them.
pub(crate) fn resume(
    vm: &mut Vm,
    caller: &ExecState,
    co: &Rc<Coroutine>,
    args: Vec<Value>,
) -> VmResult<Vec<Value>> {
    // resume-state errors carry no position prefix
    match co.status.get() {
        CoStatus::Dead => {
            return Err(vm.throw_value(caller, Value::string("cannot resume dead coroutine")));
        }
        CoStatus::Running | CoStatus::Normal => {
            return Err(
                vm.throw_value(caller, Value::string("cannot resume non-suspended coroutine"))
            );
        }
        CoStatus::Suspended => {}
    }
    if let Some(parent) = vm.coroutines.last() {
        parent.status.set(CoStatus::Normal);
    }
    co.status.set(CoStatus::Running);
    vm.coroutines.push(co.clone());
    let result = run(vm, co, args);
    vm.coroutines.pop();
    if let Some(parent) = vm.coroutines.last() {
        parent.status.set(CoStatus::Running);
    }
    match result {
        Ok(values) => {
            co.status.set(CoStatus::Dead);
            Ok(values)
        }
        Err(VmError::Yield) => {
            co.status.set(CoStatus::Suspended);
            let mut exec = co.exec.borrow_mut();
            Ok(std::mem::take(&mut exec.transfer))
        }
        Err(e) => {
            co.status.set(CoStatus::Dead);
            Err(e)
        }
    }
}

fn run(vm: &mut Vm, co: &Rc<Coroutine>, args: Vec<Value>) -> VmResult<Vec<Value>> {
    // The status gate rejects self-resume, so this borrow cannot already
    // be held.
    let mut exec = co.exec.borrow_mut();
    let entry = co.func.borrow_mut().take();
    match entry {
        Some(func) => {
            exec.ensure(1 + args.len(), vm.options.max_stack)
                .map_err(|_| vm.throw_overflow(&exec))?;
            exec.set_reg(0, func);
            let nargs = args.len();
            for (i, a) in args.into_iter().enumerate() {
                exec.set_reg(1 + i, a);
            }
            exec.top = 1 + nargs;
            match execute::push_call(vm, &mut exec, 0, nargs, -1, 0)? {
                Pushed::Done(n) => Ok((0..n).map(|i| exec.reg(i)).collect()),
                Pushed::Frame => {
                    execute::execute(vm, &mut exec, 0)?;
                    Ok((0..exec.top).map(|i| exec.reg(i)).collect())
                }
            }
        }
        None => {
            execute::deliver_pending(vm, &mut exec, args)?;
            execute::execute(vm, &mut exec, 0)?;
            Ok((0..exec.top).map(|i| exec.reg(i)).collect())
        }
    }
}

/// The yield side: park `values` for the resumer and unwind.
pub(crate) fn yield_values(
    vm: &mut Vm,
    exec: &mut ExecState,
    values: Vec<Value>,
) -> VmResult<()> {
    if vm.coroutines.is_empty() {
        return Err(vm.throw(exec, "attempt to yield from outside a coroutine"));
    }
    if exec.nny > 0 {
        return Err(vm.throw(exec, "attempt to yield across a host-call boundary"));
    }
    exec.transfer = values;
    Err(VmError::Yield)
}
