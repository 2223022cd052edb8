// Base library and simple evaluation.

use super::{run, run_error, run_number};
use crate::value::Value;

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_number("return 1 + 2 * 3"), 7.0);
    assert_eq!(run_number("return (1 + 2) * 3"), 9.0);
    assert_eq!(run_number("return 2 ^ 3 ^ 2"), 512.0);
    assert_eq!(run_number("return 7 % 3"), 1.0);
    assert_eq!(run_number("return -5 % 3"), 1.0);
}

#[test]
fn type_names() {
    run(r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(42) == "number")
        assert(type("hello") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        assert(type(function() end) == "function")
    "#);
}

#[test]
fn tostring_formats_integers_without_exponent() {
    run(r#"
        assert(tostring(123) == "123")
        assert(tostring(-3) == "-3")
        assert(tostring(0.5) == "0.5")
        assert(tostring(true) == "true")
        assert(tostring(nil) == "nil")
    "#);
}

#[test]
fn tonumber_coercions() {
    run(r#"
        assert(tonumber("123") == 123)
        assert(tonumber("  3.14  ") == 3.14)
        assert(tonumber("0x10") == 16)
        assert(tonumber("ff", 16) == 255)
        assert(tonumber("nope") == nil)
        assert(tonumber(42) == 42)
    "#);
}

#[test]
fn assert_passes_values_through() {
    run(r#"
        local a, b, c = assert(true, "keep", 123)
        assert(a == true and b == "keep" and c == 123)
    "#);
}

#[test]
fn assert_failure_raises() {
    let msg = run_error(r#"assert(false, "boom")"#);
    assert_eq!(msg, "boom");
    let msg = run_error("assert(nil)");
    assert!(msg.contains("assertion failed!"), "got: {}", msg);
}

#[test]
fn select_counts_and_slices() {
    run(r#"
        local function f(...) return select('#', ...) end
        assert(f(1, 2, 3) == 3)
        assert(f() == 0)
        assert(f(nil, nil) == 2)
        local b, c = select(2, "a", "b", "c")
        assert(b == "b" and c == "c")
        local last = select(-1, "x", "y", "z")
        assert(last == "z")
    "#);
}

#[test]
fn raw_access_bypasses_metamethods() {
    run(r#"
        local t = setmetatable({}, {__index = function() return "shadow" end})
        assert(t.missing == "shadow")
        assert(rawget(t, "missing") == nil)
        rawset(t, "k", 1)
        assert(rawget(t, "k") == 1)
        assert(rawequal(t, t))
        assert(not rawequal(t, {}))
        assert(rawlen({1, 2, 3}) == 3)
        assert(rawlen("abcd") == 4)
    "#);
}

#[test]
fn unpack_expands_a_sequence() {
    run(r#"
        local a, b, c = unpack({10, 20, 30})
        assert(a == 10 and b == 20 and c == 30)
        local x, y = unpack({1, 2, 3}, 2, 3)
        assert(x == 2 and y == 3)
    "#);
}

#[test]
fn chunk_results_cross_the_embedding_boundary() {
    let values = run("return 1, 'two', true, nil");
    assert_eq!(values.len(), 4);
    assert_eq!(values[0].as_number(), Some(1.0));
    assert!(matches!(&values[1], Value::String(s) if s.as_str() == "two"));
    assert!(matches!(values[2], Value::Boolean(true)));
    assert!(values[3].is_nil());
}
