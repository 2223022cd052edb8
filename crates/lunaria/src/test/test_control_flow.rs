// Branches, loops, goto.

use super::{run, run_error, run_number};

#[test]
fn if_elseif_else() {
    assert_eq!(
        run_number(
            r#"
        local function grade(n)
            if n >= 90 then return 4
            elseif n >= 80 then return 3
            elseif n >= 70 then return 2
            else return 0 end
        end
        return grade(95) + grade(85) + grade(75) + grade(50)
    "#
        ),
        9.0
    );
}

#[test]
fn while_loop_with_break() {
    assert_eq!(
        run_number(
            r#"
        local i, sum = 1, 0
        while true do
            if i > 10 then break end
            sum = sum + i
            i = i + 1
        end
        return sum
    "#
        ),
        55.0
    );
}

#[test]
fn repeat_until_sees_block_locals() {
    assert_eq!(
        run_number(
            r#"
        local n = 0
        repeat
            local done = n >= 3
            n = n + 1
        until done
        return n
    "#
        ),
        4.0
    );
}

#[test]
fn numeric_for_with_step() {
    assert_eq!(run_number("local s = 0 for i = 1, 10 do s = s + i end return s"), 55.0);
    assert_eq!(run_number("local s = 0 for i = 10, 1, -2 do s = s + i end return s"), 30.0);
    assert_eq!(run_number("local s = 0 for i = 1, 0 do s = s + 1 end return s"), 0.0);
    assert_eq!(run_number("local s = 0 for i = 0.5, 2.5, 0.5 do s = s + 1 end return s"), 5.0);
}

#[test]
fn numeric_for_control_is_per_loop() {
    run(r#"
        local out = {}
        for i = 1, 3 do
            out[#out + 1] = i
            i = 99
        end
        assert(out[1] == 1 and out[2] == 2 and out[3] == 3)
    "#);
}

#[test]
fn numeric_for_requires_numbers() {
    let msg = run_error("for i = 'a', 10 do end");
    assert!(msg.contains("'for' initial value must be a number"), "got: {}", msg);
}

#[test]
fn generic_for_over_pairs_and_ipairs() {
    run(r#"
        local t = {10, 20, 30, label = "x"}
        local isum = 0
        for i, v in ipairs(t) do isum = isum + i * v end
        assert(isum == 10 + 40 + 90)

        local keys = 0
        for k, v in pairs(t) do keys = keys + 1 end
        assert(keys == 4)
    "#);
}

#[test]
fn generic_for_with_custom_iterator() {
    assert_eq!(
        run_number(
            r#"
        local function range(n)
            local i = 0
            return function()
                i = i + 1
                if i <= n then return i end
            end
        end
        local sum = 0
        for v in range(5) do sum = sum + v end
        return sum
    "#
        ),
        15.0
    );
}

#[test]
fn goto_continue_idiom() {
    assert_eq!(
        run_number(
            r#"
        local sum = 0
        for i = 1, 5 do
            if i % 2 == 0 then goto continue end
            sum = sum + i
            ::continue::
        end
        return sum
    "#
        ),
        9.0
    );
}

#[test]
fn goto_backward_jump() {
    assert_eq!(
        run_number(
            r#"
        local n = 0
        ::again::
        n = n + 1
        if n < 4 then goto again end
        return n
    "#
        ),
        4.0
    );
}

#[test]
fn goto_into_local_scope_is_rejected() {
    let msg = run_error(
        r#"
        goto skip
        local x = 1
        ::skip::
        return x
    "#,
    );
    assert!(msg.contains("jumps into the scope of a local"), "got: {}", msg);
}

#[test]
fn nested_loops_break_innermost() {
    assert_eq!(
        run_number(
            r#"
        local hits = 0
        for i = 1, 3 do
            for j = 1, 3 do
                if j == 2 then break end
                hits = hits + 1
            end
        end
        return hits
    "#
        ),
        3.0
    );
}
