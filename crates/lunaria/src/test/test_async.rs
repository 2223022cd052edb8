// Host futures: suspension, delivery, and the sync/async drivers.

use std::time::Duration;

use crate::value::{HostReturn, Value};
use crate::vm::{Vm, VmError};

fn register_async_add(vm: &mut Vm) {
    vm.register("async_add", |_vm, exec, ctx| {
        let a = exec.arg(ctx, 0).as_number().unwrap_or(0.0);
        let b = exec.arg(ctx, 1).as_number().unwrap_or(0.0);
        Ok(HostReturn::Future(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(vec![Value::Number(a + b)])
        })))
    });
}

#[tokio::test]
async fn future_result_lands_at_the_call_site() {
    let mut vm = Vm::new();
    register_async_add(&mut vm);
    let results = vm
        .execute_string_async("return async_add(10, 20)", "test")
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(30.0));
}

#[tokio::test]
async fn sequential_suspensions() {
    let mut vm = Vm::new();
    register_async_add(&mut vm);
    let results = vm
        .execute_string_async(
            r#"
        local a = async_add(1, 2)
        local b = async_add(a, 10)
        return async_add(b, 100)
    "#,
            "test",
        )
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(113.0));
}

#[tokio::test]
async fn suspension_inside_a_loop() {
    let mut vm = Vm::new();
    register_async_add(&mut vm);
    let results = vm
        .execute_string_async(
            r#"
        local sum = 0
        for i = 1, 5 do
            sum = async_add(sum, i)
        end
        return sum
    "#,
            "test",
        )
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(15.0));
}

#[tokio::test]
async fn multiple_results_from_a_future() {
    let mut vm = Vm::new();
    vm.register("async_pair", |_vm, _exec, _ctx| {
        Ok(HostReturn::Future(Box::pin(async {
            Ok(vec![Value::Number(1.0), Value::Number(2.0)])
        })))
    });
    let results = vm
        .execute_string_async("local a, b = async_pair() return a + b", "test")
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(3.0));
}

#[tokio::test]
async fn future_errors_propagate() {
    let mut vm = Vm::new();
    vm.register("async_fail", |_vm, _exec, _ctx| {
        Ok(HostReturn::Future(Box::pin(async {
            Err(VmError::Runtime)
        })))
    });
    let r = vm.execute_string_async("return async_fail()", "test").await;
    assert_eq!(r, Err(VmError::Runtime));
}

#[tokio::test]
async fn suspension_in_a_metamethod_position() {
    let mut vm = Vm::new();
    vm.register("async_lookup", |_vm, _exec, _ctx| {
        Ok(HostReturn::Future(Box::pin(async {
            Ok(vec![Value::Number(99.0)])
        })))
    });
    let results = vm
        .execute_string_async(
            r#"
        local t = setmetatable({}, {__index = async_lookup})
        return t.anything
    "#,
            "test",
        )
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(99.0));
}

#[tokio::test]
async fn suspension_inside_a_coroutine_is_refused() {
    let mut vm = Vm::new();
    register_async_add(&mut vm);
    let results = vm
        .execute_string_async(
            r#"
        local co = coroutine.create(function() return async_add(1, 2) end)
        local ok, err = coroutine.resume(co)
        return ok, err
    "#,
            "test",
        )
        .await
        .unwrap();
    assert!(matches!(results[0], Value::Boolean(false)));
}

#[test]
fn ready_futures_work_in_the_sync_driver() {
    let mut vm = Vm::new();
    vm.register("ready", |_vm, _exec, _ctx| {
        Ok(HostReturn::Future(Box::pin(async {
            Ok(vec![Value::Number(7.0)])
        })))
    });
    let results = vm.execute_string("return ready() + 1", "test").unwrap();
    assert_eq!(results[0].as_number(), Some(8.0));
}

#[test]
fn pending_futures_fail_in_the_sync_driver() {
    let mut vm = Vm::new();
    vm.register("slow", |_vm, _exec, _ctx| {
        Ok(HostReturn::Future(Box::pin(async {
            std::future::pending::<()>().await;
            Ok(vec![Value::Nil])
        })))
    });
    let r = vm.execute_string("return slow()", "test");
    assert_eq!(r, Err(VmError::Runtime));
    assert!(
        vm.error_message().contains("async host call in synchronous execution"),
        "got: {}",
        vm.error_message()
    );
}

#[tokio::test]
async fn host_futures_mix_with_plain_lua() {
    let mut vm = Vm::new();
    register_async_add(&mut vm);
    let results = vm
        .execute_string_async(
            r#"
        local function apply_twice(f, x)
            return f(f(x))
        end
        local function bump(n) return async_add(n, 1) end
        return apply_twice(bump, 40)
    "#,
            "test",
        )
        .await
        .unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
}
