// Metatable behavior.

use super::{run, run_error, run_number};

#[test]
fn index_table_chain() {
    assert_eq!(
        run_number(
            r#"
        local base = {greet = 1}
        local mid = setmetatable({extra = 2}, {__index = base})
        local leaf = setmetatable({}, {__index = mid})
        return leaf.greet + leaf.extra
    "#
        ),
        3.0
    );
}

#[test]
fn index_function_receives_table_and_key() {
    run(r#"
        local t = setmetatable({}, {
            __index = function(t, k) return "<" .. k .. ">" end,
        })
        assert(t.abc == "<abc>")
        assert(t[1] == "<1>")
    "#);
}

#[test]
fn newindex_function_intercepts_fresh_keys_only() {
    run(r#"
        local log = {}
        local t = setmetatable({present = 1}, {
            __newindex = function(t, k, v) log[#log + 1] = k rawset(t, k, v) end,
        })
        t.present = 2
        t.fresh = 3
        assert(#log == 1 and log[1] == "fresh")
        assert(t.present == 2 and t.fresh == 3)
    "#);
}

#[test]
fn arithmetic_metamethods() {
    run(r#"
        local mt
        mt = {
            __add = function(a, b) return setmetatable({v = a.v + b.v}, mt) end,
            __mul = function(a, b) return setmetatable({v = a.v * b.v}, mt) end,
            __unm = function(a) return setmetatable({v = -a.v}, mt) end,
        }
        local x = setmetatable({v = 3}, mt)
        local y = setmetatable({v = 4}, mt)
        assert((x + y).v == 7)
        assert((x * y).v == 12)
        assert((-x).v == -3)
    "#);
}

#[test]
fn eq_fires_for_same_shape_operands() {
    run(r#"
        local mt = {__eq = function(a, b) return a.id == b.id end}
        local a = setmetatable({id = 1}, mt)
        local b = setmetatable({id = 1}, mt)
        local c = setmetatable({id = 2}, mt)
        assert(a == b)
        assert(a ~= c)
        assert(not (a == 1))
    "#);
}

#[test]
fn ordering_metamethods() {
    run(r#"
        local mt = {
            __lt = function(a, b) return a.v < b.v end,
            __le = function(a, b) return a.v <= b.v end,
        }
        local small = setmetatable({v = 1}, mt)
        local big = setmetatable({v = 2}, mt)
        assert(small < big)
        assert(small <= big)
        assert(not (big < small))
        assert(big > small)
        assert(big >= big)
    "#);
}

#[test]
fn le_without_handler_falls_back_to_swapped_lt() {
    run(r#"
        local mt = {__lt = function(a, b) return a.v < b.v end}
        local small = setmetatable({v = 1}, mt)
        local big = setmetatable({v = 2}, mt)
        assert(small <= big)
        assert(not (big <= small))
        assert(small <= small)
        assert(big >= small)
    "#);
}

#[test]
fn concat_and_len_and_tostring() {
    run(r#"
        local mt = {
            __concat = function(a, b)
                local av = type(a) == "table" and a.v or a
                local bv = type(b) == "table" and b.v or b
                return av .. "|" .. bv
            end,
            __len = function(a) return 42 end,
            __tostring = function(a) return "boxed:" .. a.v end,
        }
        local x = setmetatable({v = "core"}, mt)
        assert(x .. "end" == "core|end")
        assert("start" .. x == "start|core")
        assert(#x == 42)
        assert(tostring(x) == "boxed:core")
    "#);
}

#[test]
fn call_metamethod() {
    run(r#"
        local adder = setmetatable({base = 10}, {
            __call = function(self, n) return self.base + n end,
        })
        assert(adder(5) == 15)
        assert(type(adder) == "table")
    "#);
}

#[test]
fn metatable_protection() {
    run(r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok = pcall(setmetatable, t, {})
        assert(not ok)
    "#);
}

#[test]
fn cyclic_index_chain_reports_a_loop() {
    let msg = run_error(
        r#"
        local a = {}
        local b = {}
        setmetatable(a, {__index = b})
        setmetatable(b, {__index = a})
        return a.missing
    "#,
    );
    assert!(msg.contains("loop in gettable"), "got: {}", msg);
}

#[test]
fn cyclic_newindex_chain_reports_a_loop() {
    let msg = run_error(
        r#"
        local a = {}
        local b = {}
        setmetatable(a, {__newindex = b})
        setmetatable(b, {__newindex = a})
        a.k = 1
    "#,
    );
    assert!(msg.contains("loop in settable"), "got: {}", msg);
}

#[test]
fn indexing_non_tables_errors_without_a_handler() {
    let msg = run_error("local n = 5 return n.field");
    assert!(msg.contains("attempt to index a number value"), "got: {}", msg);
    let msg = run_error("local t = nil t.x = 1");
    assert!(msg.contains("attempt to index a nil value"), "got: {}", msg);
}

#[test]
fn calling_non_callables_errors() {
    let msg = run_error("local n = 5 n()");
    assert!(msg.contains("attempt to call a number value"), "got: {}", msg);
}
