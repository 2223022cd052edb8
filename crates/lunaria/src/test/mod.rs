// Integration suites driven through `execute_string`, plus async and
// embedder-API coverage.

pub mod test_async;
pub mod test_basic;
pub mod test_closures;
pub mod test_control_flow;
pub mod test_coroutine;
pub mod test_functions;
pub mod test_metamethods;
pub mod test_operators;
pub mod test_vm_api;

use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn run(source: &str) -> Vec<Value> {
    let mut vm = Vm::new();
    match vm.execute_string(source, "test") {
        Ok(values) => values,
        Err(e) => panic!("{}: {}", e, vm.error_message()),
    }
}

pub(crate) fn run_number(source: &str) -> f64 {
    let values = run(source);
    values
        .first()
        .and_then(Value::as_number)
        .expect("number result")
}

pub(crate) fn run_error(source: &str) -> String {
    let mut vm = Vm::new();
    match vm.execute_string(source, "test") {
        Ok(values) => panic!("expected an error, got {:?} values", values.len()),
        Err(_) => vm.error_message(),
    }
}
