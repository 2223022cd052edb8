// Upvalue capture and closing.

use super::{run, run_number};

#[test]
fn counter_factory() {
    assert_eq!(
        run_number(
            r#"
        local function counter()
            local n = 0
            return function()
                n = n + 1
                return n
            end
        end
        local c1 = counter()
        local c2 = counter()
        c1() c1() c1()
        c2()
        return c1() * 10 + c2()
    "#
        ),
        42.0
    );
}

#[test]
fn two_closures_share_one_upvalue() {
    assert_eq!(
        run_number(
            r#"
        local function pair()
            local v = 0
            local function set(x) v = x end
            local function get() return v end
            return set, get
        end
        local set, get = pair()
        set(7)
        return get()
    "#
        ),
        7.0
    );
}

#[test]
fn loop_body_captures_a_fresh_variable_each_iteration() {
    assert_eq!(
        run_number(
            r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        return fns[1]() + fns[2]() * 10 + fns[3]() * 100
    "#
        ),
        321.0
    );
}

#[test]
fn while_loop_closes_per_iteration_locals() {
    assert_eq!(
        run_number(
            r#"
        local fns = {}
        local i = 1
        while i <= 3 do
            local v = i * 2
            fns[i] = function() return v end
            i = i + 1
        end
        return fns[1]() + fns[2]() + fns[3]()
    "#
        ),
        12.0
    );
}

#[test]
fn upvalue_survives_the_defining_frame() {
    assert_eq!(
        run_number(
            r#"
        local function make()
            local secret = 99
            return function() return secret end
        end
        local f = make()
        collect = nil
        return f()
    "#
        ),
        99.0
    );
}

#[test]
fn nested_closures_reach_through_two_levels() {
    assert_eq!(
        run_number(
            r#"
        local function outer()
            local a = 5
            return function()
                local b = 6
                return function()
                    return a + b
                end
            end
        end
        return outer()()()
    "#
        ),
        11.0
    );
}

#[test]
fn assignment_through_upvalue_is_visible_to_the_owner() {
    run(r#"
        local x = 1
        local function bump() x = x + 1 end
        bump()
        bump()
        assert(x == 3)
    "#);
}

#[test]
fn break_closes_captured_loop_locals() {
    assert_eq!(
        run_number(
            r#"
        local f
        for i = 1, 10 do
            local v = i * 3
            f = function() return v end
            if i == 2 then break end
        end
        return f()
    "#
        ),
        6.0
    );
}
