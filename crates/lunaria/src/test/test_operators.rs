// Operator semantics: comparison, logic, concatenation, length, coercion.

use super::{run, run_error, run_number};

#[test]
fn comparisons() {
    run(r#"
        assert(1 < 2)
        assert(2 <= 2)
        assert(3 > 2)
        assert(3 >= 3)
        assert(1 ~= 2)
        assert(not (1 == 2))
        assert("a" < "b")
        assert("abc" <= "abd")
        assert(not ("b" < "a"))
    "#);
}

#[test]
fn equality_never_coerces() {
    run(r#"
        assert(1 ~= "1")
        assert(not (0 == false))
        assert(nil ~= false)
    "#);
}

#[test]
fn and_or_return_operands() {
    run(r#"
        assert((false or "x") == "x")
        assert((nil and 1) == nil)
        assert((1 and 2) == 2)
        assert((nil or false) == false)
        local t = nil
        local v = t and t.field
        assert(v == nil)
    "#);
}

#[test]
fn not_produces_booleans() {
    run(r#"
        assert(not nil == true)
        assert(not false == true)
        assert(not 0 == false)
        assert(not "" == false)
    "#);
}

#[test]
fn concat_is_right_associative_and_formats_numbers() {
    run(r#"
        assert("a" .. "b" .. "c" == "abc")
        assert(1 .. 2 == "12")
        assert("n=" .. 3.5 == "n=3.5")
        assert("big " .. 1000000 == "big 1000000")
    "#);
}

#[test]
fn length_operator() {
    run(r#"
        assert(#"hello" == 5)
        assert(#"" == 0)
        assert(#{1, 2, 3} == 3)
        assert(#{} == 0)
    "#);
}

#[test]
fn string_arithmetic_coercion() {
    assert_eq!(run_number(r#"return "10" + 5"#), 15.0);
    assert_eq!(run_number(r#"return "2" * "3""#), 6.0);
    assert_eq!(run_number(r#"return -"8""#), -8.0);
}

#[test]
fn arithmetic_type_errors() {
    let msg = run_error("return {} + 1");
    assert!(
        msg.contains("attempt to perform arithmetic on a table value"),
        "got: {}",
        msg
    );
    let msg = run_error("return nil .. 'x'");
    assert!(
        msg.contains("attempt to concatenate a nil value"),
        "got: {}",
        msg
    );
}

#[test]
fn comparison_type_errors() {
    let msg = run_error("return 1 < 'x'");
    assert!(msg.contains("attempt to compare number with string"), "got: {}", msg);
    let msg = run_error("return {} < {}");
    assert!(msg.contains("attempt to compare two table values"), "got: {}", msg);
}

#[test]
fn division_and_special_numbers() {
    run(r#"
        assert(1 / 0 > 1e308)
        assert(-1 / 0 < -1e308)
        local nan = 0 / 0
        assert(nan ~= nan)
        assert(10 / 4 == 2.5)
    "#);
}
