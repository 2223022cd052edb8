// The base library: globals every chunk can reach.

use smol_str::SmolStr;

use crate::registry::LibraryModule;
use crate::value::{HostContext, HostReturn, Value};
use crate::vm::{ExecState, Vm, VmError, VmResult, execute, meta};

use super::{arg_error, check_table};

pub fn create_base_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => base_print,
        "type" => base_type,
        "tostring" => base_tostring,
        "tonumber" => base_tonumber,
        "assert" => base_assert,
        "error" => base_error,
        "pcall" => base_pcall,
        "xpcall" => base_xpcall,
        "select" => base_select,
        "ipairs" => base_ipairs,
        "pairs" => base_pairs,
        "next" => base_next,
        "rawget" => base_rawget,
        "rawset" => base_rawset,
        "rawequal" => base_rawequal,
        "rawlen" => base_rawlen,
        "setmetatable" => base_setmetatable,
        "getmetatable" => base_getmetatable,
        "unpack" => base_unpack,
        "require" => base_require,
    })
}

fn base_print(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let mut line = String::new();
    for i in 0..ctx.nargs {
        if i > 0 {
            line.push('\t');
        }
        let v = exec.arg(ctx, i);
        let s = meta::tostring(vm, exec, &v)?;
        line.push_str(&s.to_display_string());
    }
    println!("{}", line);
    Ok(HostReturn::Count(0))
}

fn base_type(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    if ctx.nargs == 0 {
        return Err(vm.throw(exec, "bad argument #1 to 'type' (value expected)"));
    }
    let name = exec.arg(ctx, 0).type_name();
    let n = exec.set_results(ctx, &[Value::string(name)]);
    Ok(HostReturn::Count(n))
}

fn base_tostring(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let v = exec.arg(ctx, 0);
    let s = meta::tostring(vm, exec, &v)?;
    let n = exec.set_results(ctx, &[s]);
    Ok(HostReturn::Count(n))
}

fn base_tonumber(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let v = exec.arg(ctx, 0);
    let result = if ctx.nargs < 2 {
        v.coerce_number().map(Value::Number)
    } else {
        let base = exec.arg(ctx, 1);
        let base = match base.as_number() {
            Some(b) if (2.0..=36.0).contains(&b) && b.fract() == 0.0 => b as u32,
            _ => {
                return Err(vm.throw(exec, "bad argument #2 to 'tonumber' (base out of range)"));
            }
        };
        match &v {
            Value::String(s) => i64::from_str_radix(s.trim(), base)
                .ok()
                .map(|n| Value::Number(n as f64)),
            _ => return Err(arg_error(vm, exec, 0, "tonumber", "string", &v)),
        }
    };
    let n = exec.set_results(ctx, &[result.unwrap_or(Value::Nil)]);
    Ok(HostReturn::Count(n))
}

fn base_assert(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let v = exec.arg(ctx, 0);
    if v.truthy() {
        let args = exec.args(ctx);
        let n = exec.set_results(ctx, &args);
        return Ok(HostReturn::Count(n));
    }
    let message = exec.arg(ctx, 1);
    if message.is_nil() {
        Err(vm.throw(exec, "assertion failed!"))
    } else {
        Err(vm.throw_value(exec, message))
    }
}

fn base_error(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let value = exec.arg(ctx, 0);
    let level = match exec.arg(ctx, 1).as_number() {
        Some(n) if n >= 0.0 => n as usize,
        _ => 1,
    };
    if level > 0
        && let Value::String(msg) = &value
        && let Some(pos) = position_at(exec, level)
    {
        return Err(vm.throw_value(exec, Value::string(format!("{}: {}", pos, msg))));
    }
    Err(vm.throw_value(exec, value))
}

/// "chunk:line" of the frame `level` steps from the top; level 1 is the
/// function that called `error`.
fn position_at(exec: &ExecState, level: usize) -> Option<String> {
    let i = exec.frames.len().checked_sub(level)?;
    let f = exec.frames.get(i)?;
    let chunk = &f.closure.chunk;
    Some(format!("{}:{}", chunk.name, chunk.line_at(f.pc.saturating_sub(1))))
}

fn base_pcall(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    if ctx.nargs == 0 {
        return Err(vm.throw(exec, "bad argument #1 to 'pcall' (value expected)"));
    }
    let func = exec.arg(ctx, 0);
    let args: Vec<Value> = (1..ctx.nargs).map(|i| exec.arg(ctx, i)).collect();
    match execute::call_value(vm, exec, &func, &args) {
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

fn base_xpcall(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    if ctx.nargs < 2 {
        return Err(vm.throw(exec, "bad argument #2 to 'xpcall' (value expected)"));
    }
    let func = exec.arg(ctx, 0);
    let handler = exec.arg(ctx, 1);
    let args: Vec<Value> = (2..ctx.nargs).map(|i| exec.arg(ctx, i)).collect();
    match execute::call_value(vm, exec, &func, &args) {
        Ok(mut values) => {
            let mut out = vec![Value::Boolean(true)];
            out.append(&mut values);
            let n = exec.set_results(ctx, &out);
            Ok(HostReturn::Count(n))
        }
        Err(VmError::Runtime | VmError::StackOverflow) => {
            let err = vm.take_error();
            let handled = execute::call_value(vm, exec, &handler, &[err])?;
            let mut out = vec![Value::Boolean(false)];
            out.extend(handled.into_iter().take(1));
            let n = exec.set_results(ctx, &out);
            Ok(HostReturn::Count(n))
        }
        Err(e) => Err(e),
    }
}

fn base_select(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let selector = exec.arg(ctx, 0);
    let rest = ctx.nargs.saturating_sub(1);
    if let Value::String(s) = &selector
        && s.as_str() == "#"
    {
        let n = exec.set_results(ctx, &[Value::Number(rest as f64)]);
        return Ok(HostReturn::Count(n));
    }
    let idx = match selector.as_number() {
        Some(n) if n.fract() == 0.0 && n != 0.0 => n as i64,
        _ => {
            return Err(vm.throw(exec, "bad argument #1 to 'select' (number expected)"));
        }
    };
    let start = if idx > 0 {
        idx as usize
    } else {
        let back = (-idx) as usize;
        if back > rest {
            return Err(vm.throw(exec, "bad argument #1 to 'select' (index out of range)"));
        }
        rest - back + 1
    };
    let values: Vec<Value> = (start..=rest).map(|i| exec.arg(ctx, i)).collect();
    let n = exec.set_results(ctx, &values);
    Ok(HostReturn::Count(n))
}

fn inext(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "ipairs iterator")?;
    let i = exec.arg(ctx, 1).as_number().unwrap_or(0.0) as i64 + 1;
    let v = t.borrow().raw_get_int(i);
    let n = if v.is_nil() {
        exec.set_results(ctx, &[Value::Nil])
    } else {
        exec.set_results(ctx, &[Value::Number(i as f64), v])
    };
    Ok(HostReturn::Count(n))
}

fn base_ipairs(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = exec.arg(ctx, 0);
    if t.as_table().is_none() {
        return Err(arg_error(vm, exec, 0, "ipairs", "table", &t));
    }
    let iter = Value::Host(crate::value::HostFunction::new("ipairs iterator", inext));
    let n = exec.set_results(ctx, &[iter, t, Value::Number(0.0)]);
    Ok(HostReturn::Count(n))
}

fn base_pairs(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = exec.arg(ctx, 0);
    if t.as_table().is_none() {
        return Err(arg_error(vm, exec, 0, "pairs", "table", &t));
    }
    let iter = Value::Host(crate::value::HostFunction::new("next", base_next));
    let n = exec.set_results(ctx, &[iter, t, Value::Nil]);
    Ok(HostReturn::Count(n))
}

fn base_next(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "next")?;
    let key = exec.arg(ctx, 1);
    let entry = t.borrow().next_entry(&key);
    match entry {
        Ok(Some((k, v))) => {
            let n = exec.set_results(ctx, &[k, v]);
            Ok(HostReturn::Count(n))
        }
        Ok(None) => {
            let n = exec.set_results(ctx, &[Value::Nil]);
            Ok(HostReturn::Count(n))
        }
        Err(msg) => Err(vm.throw(exec, msg)),
    }
}

fn base_rawget(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "rawget")?;
    let key = exec.arg(ctx, 1);
    let v = t.borrow().raw_get(&key);
    let n = exec.set_results(ctx, &[v]);
    Ok(HostReturn::Count(n))
}

fn base_rawset(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "rawset")?;
    let key = exec.arg(ctx, 1);
    let value = exec.arg(ctx, 2);
    let r = t.borrow_mut().raw_set(key, value);
    r.map_err(|msg| vm.throw(exec, msg))?;
    let n = exec.set_results(ctx, &[Value::Table(t)]);
    Ok(HostReturn::Count(n))
}

fn base_rawequal(_vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let eq = exec.arg(ctx, 0).raw_eq(&exec.arg(ctx, 1));
    let n = exec.set_results(ctx, &[Value::Boolean(eq)]);
    Ok(HostReturn::Count(n))
}

fn base_rawlen(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let v = exec.arg(ctx, 0);
    let len = match &v {
        Value::String(s) => s.len() as f64,
        Value::Table(t) => t.borrow().len() as f64,
        _ => return Err(arg_error(vm, exec, 0, "rawlen", "table or string", &v)),
    };
    let n = exec.set_results(ctx, &[Value::Number(len)]);
    Ok(HostReturn::Count(n))
}

fn base_setmetatable(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "setmetatable")?;
    let mt = exec.arg(ctx, 1);
    let protected = t
        .borrow()
        .metatable()
        .map(|m| !m.borrow().raw_get(&Value::string("__metatable")).is_nil())
        .unwrap_or(false);
    if protected {
        return Err(vm.throw(exec, "cannot change a protected metatable"));
    }
    match mt {
        Value::Nil => t.borrow_mut().set_metatable(None),
        Value::Table(m) => t.borrow_mut().set_metatable(Some(m)),
        other => {
            return Err(arg_error(vm, exec, 1, "setmetatable", "nil or table", &other));
        }
    }
    let n = exec.set_results(ctx, &[Value::Table(t)]);
    Ok(HostReturn::Count(n))
}

fn base_getmetatable(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let v = exec.arg(ctx, 0);
    let result = match meta::get_metatable(vm, &v) {
        Some(mt) => {
            let guard = mt.borrow().raw_get(&Value::string("__metatable"));
            if guard.is_nil() {
                Value::Table(mt)
            } else {
                guard
            }
        }
        None => Value::Nil,
    };
    let n = exec.set_results(ctx, &[result]);
    Ok(HostReturn::Count(n))
}

fn base_unpack(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let t = check_table(vm, exec, ctx, 0, "unpack")?;
    let first = exec.arg(ctx, 1).as_number().unwrap_or(1.0) as i64;
    let last = match exec.arg(ctx, 2).as_number() {
        Some(n) => n as i64,
        None => t.borrow().len(),
    };
    let mut values = Vec::new();
    for i in first..=last {
        values.push(t.borrow().raw_get_int(i));
    }
    let n = exec.set_results(ctx, &values);
    Ok(HostReturn::Count(n))
}

fn base_require(vm: &mut Vm, exec: &mut ExecState, ctx: HostContext) -> VmResult<HostReturn> {
    let name = match exec.arg(ctx, 0) {
        Value::String(s) => s,
        other => return Err(arg_error(vm, exec, 0, "require", "string", &other)),
    };
    if let Some(cached) = vm.loaded.get(&name).cloned() {
        let n = exec.set_results(ctx, &[cached]);
        return Ok(HostReturn::Count(n));
    }
    let found = match vm.take_loader() {
        Some(mut loader) => {
            let found = loader.load(&name);
            vm.put_loader(Some(loader));
            found
        }
        None => None,
    };
    let Some((source, chunk_name)) = found else {
        return Err(vm.throw(exec, format!("module '{}' not found", name)));
    };
    let chunk = match vm.compile(&source, &chunk_name) {
        Ok(c) => c,
        Err(_) => {
            let msg = vm.error_message();
            return Err(vm.throw(exec, msg));
        }
    };
    let closure = vm.chunk_closure(chunk);
    let results = execute::call_value(vm, exec, &closure, &[])?;
    let value = match results.into_iter().next() {
        Some(v) if !v.is_nil() => v,
        _ => Value::Boolean(true),
    };
    vm.loaded.insert(SmolStr::from(name), value.clone());
    let n = exec.set_results(ctx, &[value]);
    Ok(HostReturn::Count(n))
}
