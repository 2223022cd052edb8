// Metamethod resolution: index/newindex chains, arithmetic and comparison
// fallbacks, length, concatenation and __call lookup.
//
// Chain walks are bounded by `VmOptions::meta_chain_limit`; hitting the
// limit reports the structure as cyclic ("loop in gettable"/"settable").

use crate::bytecode::OpCode;
use crate::value::{TableRef, Value};

use super::execute::{self, can_suspend};
use super::{ExecState, Pending, Vm, VmError, VmResult};

pub(crate) fn get_metatable(vm: &Vm, v: &Value) -> Option<TableRef> {
    match v {
        Value::Table(t) => t.borrow().metatable(),
        Value::UserData(u) => u.metatable(),
        Value::String(_) => vm.string_metatable().cloned(),
        _ => None,
    }
}

pub(crate) fn get_metamethod(vm: &Vm, v: &Value, name: &str) -> Option<Value> {
    let mt = get_metatable(vm, v)?;
    let h = mt.borrow().raw_get(&Value::string(name));
    if h.is_nil() { None } else { Some(h) }
}

/// Run a metamethod handler to one result. If the handler is a host
/// function that yields or suspends, `pending` records where the eventual
/// value goes.
fn call_handler(
    vm: &mut Vm,
    exec: &mut ExecState,
    handler: &Value,
    args: &[Value],
    pending: Pending,
) -> VmResult<Value> {
    if let Value::Host(h) = handler {
        let save_top = exec.top;
        let base = scratch_base(exec);
        exec.ensure(base + args.len().max(1), vm.options.max_stack)
            .map_err(|_| vm.throw_overflow(exec))?;
        for (i, a) in args.iter().enumerate() {
            exec.set_reg(base + i, a.clone());
        }
        let ctx = crate::value::HostContext {
            base,
            nargs: args.len(),
            ret_base: base,
        };
        let r = h.clone().call(vm, exec, ctx);
        let out = match r {
            Ok(crate::value::HostReturn::Count(n)) => {
                let v = if n > 0 { exec.reg(base) } else { Value::Nil };
                Ok(v)
            }
            Ok(crate::value::HostReturn::Future(fut)) => {
                if !can_suspend(vm, exec) {
                    Err(vm.throw(exec, "attempt to suspend across a host-call boundary"))
                } else {
                    exec.pending = Some(pending);
                    exec.pending_future = Some(fut);
                    Err(VmError::Suspended)
                }
            }
            Err(VmError::Yield) => {
                if exec.nny > 0 {
                    Err(vm.throw(exec, "attempt to yield across a host-call boundary"))
                } else {
                    exec.pending = Some(pending);
                    Err(VmError::Yield)
                }
            }
            Err(e) => Err(e),
        };
        exec.top = save_top;
        out
    } else {
        let results = execute::call_value(vm, exec, handler, args)?;
        Ok(results.into_iter().next().unwrap_or(Value::Nil))
    }
}

fn scratch_base(exec: &ExecState) -> usize {
    match exec.frames.last() {
        Some(f) => exec.top.max(f.frame_top()),
        None => exec.top,
    }
}

/// `dest = obj[key]`, following `__index` chains.
pub(crate) fn index(
    vm: &mut Vm,
    exec: &mut ExecState,
    obj: Value,
    key: Value,
    dest: usize,
) -> VmResult<()> {
    let mut cur = obj;
    for _ in 0..vm.options.meta_chain_limit {
        let handler = if let Value::Table(t) = &cur {
            let v = t.borrow().raw_get(&key);
            if !v.is_nil() {
                exec.set_reg(dest, v);
                return Ok(());
            }
            match get_metamethod(vm, &cur, "__index") {
                Some(h) => h,
                None => {
                    exec.set_reg(dest, Value::Nil);
                    return Ok(());
                }
            }
        } else {
            match get_metamethod(vm, &cur, "__index") {
                Some(h) => h,
                None => {
                    return Err(vm.throw(
                        exec,
                        format!("attempt to index a {} value", cur.type_name()),
                    ));
                }
            }
        };
        if handler.is_callable() {
            let v = call_handler(
                vm,
                exec,
                &handler,
                &[cur, key],
                Pending::SetResult { dest },
            )?;
            exec.set_reg(dest, v);
            return Ok(());
        }
        // any other handler is indexed in turn
        cur = handler;
    }
    Err(vm.throw(exec, "loop in gettable"))
}

/// `obj[key] = val`, following `__newindex` chains.
pub(crate) fn newindex(
    vm: &mut Vm,
    exec: &mut ExecState,
    obj: Value,
    key: Value,
    val: Value,
) -> VmResult<()> {
    let mut cur = obj;
    for _ in 0..vm.options.meta_chain_limit {
        let handler = if let Value::Table(t) = &cur {
            let existing = t.borrow().raw_get(&key);
            let handler = if existing.is_nil() {
                get_metamethod(vm, &cur, "__newindex")
            } else {
                None
            };
            match handler {
                Some(h) => h,
                None => {
                    let r = t.borrow_mut().raw_set(key, val);
                    return r.map_err(|msg| vm.throw(exec, msg));
                }
            }
        } else {
            match get_metamethod(vm, &cur, "__newindex") {
                Some(h) => h,
                None => {
                    return Err(vm.throw(
                        exec,
                        format!("attempt to index a {} value", cur.type_name()),
                    ));
                }
            }
        };
        if handler.is_callable() {
            call_handler(vm, exec, &handler, &[cur, key, val], Pending::Discard)?;
            return Ok(());
        }
        cur = handler;
    }
    Err(vm.throw(exec, "loop in settable"))
}

fn arith_event(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "__add",
        OpCode::Sub => "__sub",
        OpCode::Mul => "__mul",
        OpCode::Div => "__div",
        OpCode::Mod => "__mod",
        OpCode::Pow => "__pow",
        _ => "__unm",
    }
}

/// Binary arithmetic with string-to-number coercion and metamethod
/// fallback.
pub(crate) fn arith(
    vm: &mut Vm,
    exec: &mut ExecState,
    op: OpCode,
    l: Value,
    r: Value,
    dest: usize,
) -> VmResult<()> {
    if let (Some(a), Some(b)) = (l.coerce_number(), r.coerce_number()) {
        let n = match op {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => a / b,
            OpCode::Mod => a - (a / b).floor() * b,
            OpCode::Pow => a.powf(b),
            _ => return Err(vm.throw(exec, "internal: bad arithmetic opcode")),
        };
        exec.set_reg(dest, Value::Number(n));
        return Ok(());
    }
    let event = arith_event(op);
    let handler = get_metamethod(vm, &l, event).or_else(|| get_metamethod(vm, &r, event));
    match handler {
        Some(h) => {
            let v = call_handler(vm, exec, &h, &[l, r], Pending::SetResult { dest })?;
            exec.set_reg(dest, v);
            Ok(())
        }
        None => {
            let bad = if l.coerce_number().is_none() { &l } else { &r };
            Err(vm.throw(
                exec,
                format!("attempt to perform arithmetic on a {} value", bad.type_name()),
            ))
        }
    }
}

pub(crate) fn unary_minus(
    vm: &mut Vm,
    exec: &mut ExecState,
    v: Value,
    dest: usize,
) -> VmResult<()> {
    if let Some(n) = v.coerce_number() {
        exec.set_reg(dest, Value::Number(-n));
        return Ok(());
    }
    match get_metamethod(vm, &v, "__unm") {
        Some(h) => {
            let r = call_handler(vm, exec, &h, &[v.clone(), v], Pending::SetResult { dest })?;
            exec.set_reg(dest, r);
            Ok(())
        }
        None => Err(vm.throw(
            exec,
            format!("attempt to perform arithmetic on a {} value", v.type_name()),
        )),
    }
}

/// The `#` operator. Strings measure raw bytes; tables may override with
/// `__len`.
pub(crate) fn length(vm: &mut Vm, exec: &mut ExecState, v: Value, dest: usize) -> VmResult<()> {
    match &v {
        Value::String(s) => {
            exec.set_reg(dest, Value::Number(s.len() as f64));
            Ok(())
        }
        Value::Table(t) => match get_metamethod(vm, &v, "__len") {
            Some(h) => {
                let r =
                    call_handler(vm, exec, &h, &[v.clone()], Pending::SetResult { dest })?;
                exec.set_reg(dest, r);
                Ok(())
            }
            None => {
                let n = t.borrow().len();
                exec.set_reg(dest, Value::Number(n as f64));
                Ok(())
            }
        },
        _ => match get_metamethod(vm, &v, "__len") {
            Some(h) => {
                let r =
                    call_handler(vm, exec, &h, &[v.clone()], Pending::SetResult { dest })?;
                exec.set_reg(dest, r);
                Ok(())
            }
            None => Err(vm.throw(
                exec,
                format!("attempt to get length of a {} value", v.type_name()),
            )),
        },
    }
}

fn concat_pair(
    vm: &mut Vm,
    exec: &mut ExecState,
    left: Value,
    right: Value,
    pending: Pending,
) -> VmResult<Value> {
    let stringable =
        |v: &Value| matches!(v, Value::String(_) | Value::Number(_));
    if stringable(&left) && stringable(&right) {
        let mut s = String::new();
        s.push_str(&left.to_display_string());
        s.push_str(&right.to_display_string());
        return Ok(Value::string(s));
    }
    let handler =
        get_metamethod(vm, &left, "__concat").or_else(|| get_metamethod(vm, &right, "__concat"));
    match handler {
        Some(h) => call_handler(vm, exec, &h, &[left, right], pending),
        None => {
            let bad = if stringable(&left) { &right } else { &left };
            Err(vm.throw(
                exec,
                format!("attempt to concatenate a {} value", bad.type_name()),
            ))
        }
    }
}

/// Right-to-left fold of `stack[first ..= next]`; `acc` already holds the
/// folded tail. Suspension resumes the fold through `Pending::Concat`.
pub(crate) fn concat_fold(
    vm: &mut Vm,
    exec: &mut ExecState,
    dest: usize,
    first: usize,
    mut next: usize,
    mut acc: Value,
) -> VmResult<()> {
    while next > first {
        let left = exec.reg(next - 1);
        acc = concat_pair(
            vm,
            exec,
            left,
            acc,
            Pending::Concat {
                dest,
                first,
                next: next - 1,
            },
        )?;
        next -= 1;
    }
    exec.set_reg(dest, acc);
    Ok(())
}

/// Equality with `__eq` fallback. The handler fires only when both sides
/// are tables or both are userdata.
pub(crate) fn equals(
    vm: &mut Vm,
    exec: &mut ExecState,
    l: &Value,
    r: &Value,
    expect: bool,
) -> VmResult<bool> {
    if l.raw_eq(r) {
        return Ok(true);
    }
    let handler = match (l, r) {
        (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_)) => {
            get_metamethod(vm, l, "__eq").or_else(|| get_metamethod(vm, r, "__eq"))
        }
        _ => None,
    };
    match handler {
        Some(h) => {
            let v = call_handler(
                vm,
                exec,
                &h,
                &[l.clone(), r.clone()],
                Pending::Compare { expect },
            )?;
            Ok(v.truthy())
        }
        None => Ok(false),
    }
}

/// Ordering with `__lt`/`__le` fallback.
pub(crate) fn less(
    vm: &mut Vm,
    exec: &mut ExecState,
    l: &Value,
    r: &Value,
    or_equal: bool,
    expect: bool,
) -> VmResult<bool> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(if or_equal { a <= b } else { a < b }),
        (Value::String(a), Value::String(b)) => {
            Ok(if or_equal { a.as_str() <= b.as_str() } else { a.as_str() < b.as_str() })
        }
        _ => {
            let event = if or_equal { "__le" } else { "__lt" };
            let handler =
                get_metamethod(vm, l, event).or_else(|| get_metamethod(vm, r, event));
            match handler {
                Some(h) => {
                    let v = call_handler(
                        vm,
                        exec,
                        &h,
                        &[l.clone(), r.clone()],
                        Pending::Compare { expect },
                    )?;
                    Ok(v.truthy())
                }
                None => {
                    // a <= b without __le falls back to not (b < a)
                    if or_equal
                        && let Some(h) = get_metamethod(vm, l, "__lt")
                            .or_else(|| get_metamethod(vm, r, "__lt"))
                    {
                        let v = call_handler(
                            vm,
                            exec,
                            &h,
                            &[r.clone(), l.clone()],
                            Pending::Compare { expect: !expect },
                        )?;
                        return Ok(!v.truthy());
                    }
                    let (tl, tr) = (l.type_name(), r.type_name());
                    let msg = if tl == tr {
                        format!("attempt to compare two {} values", tl)
                    } else {
                        format!("attempt to compare {} with {}", tl, tr)
                    };
                    Err(vm.throw(exec, msg))
                }
            }
        }
    }
}

/// Stringification honoring `__tostring`.
pub(crate) fn tostring(vm: &mut Vm, exec: &mut ExecState, v: &Value) -> VmResult<Value> {
    match get_metamethod(vm, v, "__tostring") {
        Some(h) => {
            let r = execute::call_value(vm, exec, &h, &[v.clone()])?;
            Ok(r.into_iter().next().unwrap_or(Value::Nil))
        }
        None => Ok(Value::string(v.to_display_string())),
    }
}
