// Embedder surface: globals, host functions, hooks, cancellation, module
// loading, options.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::{HostFunction, HostReturn, Table, UserData, Value};
use crate::vm::{HookEvents, ModuleLoader, Vm, VmError, VmOptions};

#[test]
fn globals_round_trip() {
    let mut vm = Vm::new();
    vm.set_global("answer", Value::Number(42.0));
    let results = vm.execute_string("return answer + 1", "test").unwrap();
    assert_eq!(results[0].as_number(), Some(43.0));

    vm.execute_string("answer = answer * 2", "test").unwrap();
    assert_eq!(vm.get_global("answer").as_number(), Some(84.0));
}

#[test]
fn registered_host_functions_are_callable() {
    let mut vm = Vm::new();
    vm.register("join", |_vm, exec, ctx| {
        let mut s = String::new();
        for i in 0..ctx.nargs {
            s.push_str(&exec.arg(ctx, i).to_display_string());
        }
        let n = exec.set_results(ctx, &[Value::string(s)]);
        Ok(HostReturn::Count(n))
    });
    let results = vm
        .execute_string(r#"return join("a", 1, true)"#, "test")
        .unwrap();
    assert!(matches!(&results[0], Value::String(s) if s.as_str() == "a1true"));
}

#[test]
fn call_function_drives_lua_closures_from_rust() {
    let mut vm = Vm::new();
    vm.execute_string("function double(n) return n * 2 end", "test")
        .unwrap();
    let f = vm.get_global("double");
    let results = vm.call_function(&f, &[Value::Number(21.0)]).unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
}

#[test]
fn call_hook_counts_invocations() {
    let mut vm = Vm::new();
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();
    let hook = Value::Host(HostFunction::new("hook", move |_vm, _exec, _ctx| {
        seen.set(seen.get() + 1);
        Ok(HostReturn::Count(0))
    }));
    vm.set_hook(
        hook,
        HookEvents {
            call: true,
            ..Default::default()
        },
    );
    vm.execute_string(
        r#"
        local function f() end
        f() f() f()
    "#,
        "test",
    )
    .unwrap();
    // three calls to f plus the main chunk entry
    assert_eq!(calls.get(), 4);
    vm.clear_hook();
}

#[test]
fn line_hook_reports_line_numbers() {
    let mut vm = Vm::new();
    let lines = Rc::new(Cell::new(0u32));
    let seen = lines.clone();
    let hook = Value::Host(HostFunction::new("hook", move |_vm, exec, ctx| {
        if let Some(n) = exec.arg(ctx, 1).as_number() {
            seen.set(seen.get().max(n as u32));
        }
        Ok(HostReturn::Count(0))
    }));
    vm.set_hook(
        hook,
        HookEvents {
            line: true,
            ..Default::default()
        },
    );
    vm.execute_string("local a = 1\nlocal b = 2\nlocal c = 3", "test")
        .unwrap();
    assert!(lines.get() >= 3, "max line seen: {}", lines.get());
}

#[test]
fn count_hook_fires_periodically() {
    let mut vm = Vm::new();
    let ticks = Rc::new(Cell::new(0u32));
    let seen = ticks.clone();
    let hook = Value::Host(HostFunction::new("hook", move |_vm, _exec, _ctx| {
        seen.set(seen.get() + 1);
        Ok(HostReturn::Count(0))
    }));
    vm.set_hook(
        hook,
        HookEvents {
            count: 10,
            ..Default::default()
        },
    );
    vm.execute_string("local s = 0 for i = 1, 100 do s = s + i end", "test")
        .unwrap();
    assert!(ticks.get() >= 10, "ticks: {}", ticks.get());
}

#[test]
fn cancellation_interrupts_execution() {
    let mut vm = Vm::new();
    let cancel = vm.cancellation();
    cancel.cancel();
    let r = vm.execute_string(
        "local x = 0 for i = 1, 1000000 do x = x + 1 end return x",
        "test",
    );
    assert_eq!(r, Err(VmError::Cancelled));
}

struct FixtureLoader {
    loads: Rc<Cell<u32>>,
}

impl ModuleLoader for FixtureLoader {
    fn load(&mut self, name: &str) -> Option<(String, String)> {
        if name == "answer" {
            self.loads.set(self.loads.get() + 1);
            Some(("return { value = 42 }".to_string(), "answer.lua".to_string()))
        } else {
            None
        }
    }
}

#[test]
fn require_loads_once_and_caches() {
    let mut vm = Vm::new();
    let loads = Rc::new(Cell::new(0u32));
    vm.set_loader(Box::new(FixtureLoader {
        loads: loads.clone(),
    }));
    let results = vm
        .execute_string(
            r#"
        local a = require("answer")
        local b = require("answer")
        assert(a == b)
        return a.value
    "#,
            "test",
        )
        .unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
    assert_eq!(loads.get(), 1);
}

#[test]
fn require_missing_module_errors() {
    let mut vm = Vm::new();
    let r = vm.execute_string(r#"require("nothing")"#, "test");
    assert_eq!(r, Err(VmError::Runtime));
    assert!(
        vm.error_message().contains("module 'nothing' not found"),
        "got: {}",
        vm.error_message()
    );
}

#[test]
fn standard_modules_are_preloaded_for_require() {
    let mut vm = Vm::new();
    vm.execute_string(
        r#"
        local co = require("coroutine")
        assert(co.create == coroutine.create)
    "#,
        "test",
    )
    .unwrap();
}

#[test]
fn meta_chain_limit_is_configurable() {
    let mut vm = Vm::with_options(VmOptions {
        meta_chain_limit: 3,
        ..Default::default()
    });
    let r = vm.execute_string(
        r#"
        local t = {}
        local cur = t
        for i = 1, 5 do
            local parent = {}
            setmetatable(cur, {__index = parent})
            cur = parent
        end
        return t.missing
    "#,
        "test",
    );
    assert_eq!(r, Err(VmError::Runtime));
    assert!(vm.error_message().contains("loop in gettable"), "got: {}", vm.error_message());
}

#[test]
fn popped_frames_release_their_values() {
    let mut vm = Vm::new();
    let weak: Rc<RefCell<Option<std::rc::Weak<RefCell<Table>>>>> =
        Rc::new(RefCell::new(None));
    let slot = weak.clone();
    vm.register("hold", move |_vm, exec, ctx| {
        let t = Rc::new(RefCell::new(Table::new()));
        *slot.borrow_mut() = Some(Rc::downgrade(&t));
        let n = exec.set_results(ctx, &[Value::Table(t)]);
        Ok(HostReturn::Count(n))
    });
    vm.execute_string(
        r#"
        local function keep()
            local t = hold()
            t[1] = 1
        end
        keep()
    "#,
        "test",
    )
    .unwrap();
    let w = weak.borrow().clone().expect("hold ran");
    assert!(
        w.upgrade().is_none(),
        "table from a popped frame is still reachable through the stack"
    );
}

#[test]
fn userdata_carries_host_state_through_metamethods() {
    let mut vm = Vm::new();
    let ud = Rc::new(UserData::new(41i64));
    let index = Value::Host(HostFunction::new("get", |_vm, exec, ctx| {
        let n = match exec.arg(ctx, 0) {
            Value::UserData(u) => u.with(|v: &i64| *v).unwrap_or(0),
            _ => 0,
        };
        let count = exec.set_results(ctx, &[Value::Number(n as f64)]);
        Ok(HostReturn::Count(count))
    }));
    let mt = Rc::new(RefCell::new(Table::new()));
    mt.borrow_mut()
        .raw_set(Value::string("__index"), index)
        .unwrap();
    ud.set_metatable(Some(mt));
    vm.set_global("boxed", Value::UserData(ud.clone()));

    let results = vm
        .execute_string("return boxed.value + 1, type(boxed)", "test")
        .unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
    assert!(matches!(&results[1], Value::String(s) if s.as_str() == "userdata"));

    ud.with_mut(|v: &mut i64| *v = 10);
    let results = vm.execute_string("return boxed.value", "test").unwrap();
    assert_eq!(results[0].as_number(), Some(10.0));
}

#[test]
fn bare_vm_has_no_stdlib() {
    let mut vm = Vm::bare(VmOptions::default());
    let r = vm.execute_string("print('hi')", "test");
    assert_eq!(r, Err(VmError::Runtime));
    let results = vm.execute_string("return 1 + 1", "test").unwrap();
    assert_eq!(results[0].as_number(), Some(2.0));
}
