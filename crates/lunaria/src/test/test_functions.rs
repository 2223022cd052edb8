// Calls, returns, varargs, methods, tail calls.

use super::{run, run_number};

#[test]
fn recursion() {
    assert_eq!(
        run_number(
            r#"
        local function fact(n)
            if n == 0 then return 1 end
            return n * fact(n - 1)
        end
        return fact(10)
    "#
        ),
        3628800.0
    );
}

#[test]
fn multiple_returns_truncate_and_expand() {
    run(r#"
        local function f() return 1, 2, 3 end
        local a, b = f()
        assert(a == 1 and b == 2)
        local c, d, e, g = f(), 10
        assert(c == 1 and d == 10 and e == nil and g == nil)
        local t = {f()}
        assert(#t == 3)
        local u = {f(), f()}
        assert(#u == 4)
        assert((f()) == 1)
    "#);
}

#[test]
fn missing_arguments_become_nil() {
    run(r#"
        local function f(a, b, c) return a, b, c end
        local x, y, z = f(1)
        assert(x == 1 and y == nil and z == nil)
    "#);
}

#[test]
fn vararg_forwarding() {
    run(r#"
        local function count(...) return select('#', ...) end
        local function fwd(...) return count(...) end
        assert(fwd(1, 2, 3) == 3)
        assert(fwd() == 0)

        local function head(...)
            local first = ...
            return first
        end
        assert(head(7, 8, 9) == 7)

        local function pack(...) return {n = select('#', ...), ...} end
        local p = pack("a", "b")
        assert(p.n == 2 and p[1] == "a" and p[2] == "b")
    "#);
}

#[test]
fn mixed_fixed_and_vararg_params() {
    run(r#"
        local function f(a, ...)
            return a, select('#', ...)
        end
        local first, rest = f(1, 2, 3)
        assert(first == 1 and rest == 2)
        local only, none = f(5)
        assert(only == 5 and none == 0)
    "#);
}

#[test]
fn method_definition_and_call() {
    run(r#"
        local account = {balance = 100}
        function account:deposit(n)
            self.balance = self.balance + n
        end
        function account.peek(a)
            return a.balance
        end
        account:deposit(50)
        assert(account.peek(account) == 150)
        assert(account:peek() == 150)
    "#);
}

#[test]
fn tail_calls_do_not_grow_the_frame_stack() {
    assert_eq!(
        run_number(
            r#"
        local function loop(n, acc)
            if n == 0 then return acc end
            return loop(n - 1, acc + 1)
        end
        return loop(100000, 0)
    "#
        ),
        100000.0
    );
}

#[test]
fn mutual_tail_recursion() {
    run(r#"
        local is_even, is_odd
        function is_even(n)
            if n == 0 then return true end
            return is_odd(n - 1)
        end
        function is_odd(n)
            if n == 0 then return false end
            return is_even(n - 1)
        end
        assert(is_even(50000))
        assert(not is_even(50001))
    "#);
}

#[test]
fn functions_are_first_class() {
    assert_eq!(
        run_number(
            r#"
        local function apply(f, x) return f(x) end
        local double = function(n) return n * 2 end
        return apply(double, 21)
    "#
        ),
        42.0
    );
}

#[test]
fn call_results_feed_call_arguments() {
    assert_eq!(
        run_number(
            r#"
        local function two() return 1, 2 end
        local function sum(a, b, c) return a + (b or 0) + (c or 0) end
        return sum(two()) + sum(10, two())
    "#
        ),
        16.0
    );
}
