// Coroutine lifecycle, value transfer, boundary rules.

use super::{run, run_error, run_number};

#[test]
fn resume_yield_handshake() {
    run(r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            local d, e = coroutine.yield(c * 2)
            return d + e
        end)
        assert(coroutine.status(co) == "suspended")
        local ok1, v1 = coroutine.resume(co, 1, 2)
        assert(ok1 and v1 == 3)
        local ok2, v2 = coroutine.resume(co, 10)
        assert(ok2 and v2 == 20)
        local ok3, v3 = coroutine.resume(co, 4, 5)
        assert(ok3 and v3 == 9)
        assert(coroutine.status(co) == "dead")
    "#);
}

#[test]
fn resuming_a_dead_coroutine_fails_softly() {
    run(r#"
        local co = coroutine.create(function() return 1 end)
        assert(coroutine.resume(co))
        local ok, err = coroutine.resume(co)
        assert(ok == false)
        assert(type(err) == "string")
    "#);
}

#[test]
fn dead_coroutine_error_message_is_bare() {
    run(r#"
        local co = coroutine.create(function() end)
        coroutine.resume(co)
        local _, err = coroutine.resume(co)
        assert(err == "cannot resume dead coroutine")
    "#);
}

#[test]
fn yield_propagates_through_nested_lua_calls() {
    assert_eq!(
        run_number(
            r#"
        local function deep(n)
            if n == 0 then return coroutine.yield("bottom") end
            return deep(n - 1)
        end
        local co = coroutine.create(function() return deep(5) end)
        local ok, v = coroutine.resume(co)
        assert(ok and v == "bottom")
        local ok2, final = coroutine.resume(co, 77)
        assert(ok2)
        return final
    "#
        ),
        77.0
    );
}

#[test]
fn yield_across_pcall_is_refused() {
    run(r#"
        local co = coroutine.create(function()
            local ok, err = pcall(function() coroutine.yield(1) end)
            return ok, err
        end)
        local resumed, ok, err = coroutine.resume(co)
        assert(resumed)
        assert(ok == false)
        assert(type(err) == "string")
    "#);
}

#[test]
fn yield_outside_any_coroutine_is_an_error() {
    let msg = run_error("coroutine.yield(1)");
    assert!(msg.contains("attempt to yield from outside a coroutine"), "got: {}", msg);
}

#[test]
fn errors_inside_coroutines_surface_via_resume() {
    run(r#"
        local co = coroutine.create(function() error("exploded") end)
        local ok, err = coroutine.resume(co)
        assert(ok == false)
        assert(type(err) == "string")
        assert(coroutine.status(co) == "dead")
    "#);
}

#[test]
fn wrap_returns_values_directly_and_rethrows() {
    run(r#"
        local gen = coroutine.wrap(function()
            coroutine.yield(1)
            coroutine.yield(2)
            return 3
        end)
        assert(gen() == 1)
        assert(gen() == 2)
        assert(gen() == 3)

        local bad = coroutine.wrap(function() error("late") end)
        local ok = pcall(bad)
        assert(ok == false)
    "#);
}

#[test]
fn nested_coroutines_track_status() {
    run(r#"
        local inner = coroutine.create(function()
            coroutine.yield("inner-pause")
            return "inner-done"
        end)
        local outer = coroutine.create(function()
            local ok, v = coroutine.resume(inner)
            assert(ok and v == "inner-pause")
            assert(coroutine.status(inner) == "suspended")
            coroutine.yield("outer-pause")
            local ok2, v2 = coroutine.resume(inner)
            return v2
        end)
        local _, v = coroutine.resume(outer)
        assert(v == "outer-pause")
        assert(coroutine.status(outer) == "suspended")
        local _, final = coroutine.resume(outer)
        assert(final == "inner-done")
        assert(coroutine.status(outer) == "dead")
        assert(coroutine.status(inner) == "dead")
    "#);
}

#[test]
fn running_and_isyieldable() {
    run(r#"
        local main_co, is_main = coroutine.running()
        assert(main_co == nil and is_main == true)
        assert(coroutine.isyieldable() == false)

        local co
        co = coroutine.create(function()
            local current, main = coroutine.running()
            assert(current == co)
            assert(main == false)
            assert(coroutine.isyieldable() == true)
        end)
        assert(coroutine.resume(co))
    "#);
}

#[test]
fn coroutines_keep_independent_stacks() {
    assert_eq!(
        run_number(
            r#"
        local function worker(id)
            local total = 0
            while true do
                local n = coroutine.yield()
                if n == nil then return total end
                total = total + n * id
            end
        end
        local a = coroutine.create(function() return worker(1) end)
        local b = coroutine.create(function() return worker(100) end)
        coroutine.resume(a)
        coroutine.resume(b)
        coroutine.resume(a, 1)
        coroutine.resume(b, 2)
        coroutine.resume(a, 3)
        local _, ta = coroutine.resume(a)
        local _, tb = coroutine.resume(b)
        return ta + tb
    "#
        ),
        204.0
    );
}
