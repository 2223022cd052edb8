// Debug hooks. The hook function is called with the event name and, for
// line events, the line number. Hooks run with yielding disabled and are
// never re-entered while one is active.

use crate::bytecode::Chunk;
use crate::value::Value;

use super::execute;
use super::{ExecState, Vm, VmResult};

/// Which events fire the hook. A `count` of 0 disables count events.
#[derive(Clone, Copy, Default)]
pub struct HookEvents {
    pub call: bool,
    pub ret: bool,
    pub line: bool,
    pub count: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
    Line(u32),
    Count,
}

impl HookEvent {
    fn name(self) -> &'static str {
        match self {
            HookEvent::Call => "call",
            HookEvent::Return => "return",
            HookEvent::Line(_) => "line",
            HookEvent::Count => "count",
        }
    }
}

pub(crate) struct HookState {
    func: Value,
    events: HookEvents,
    count_left: u32,
    last_line: Option<u32>,
    /// Set while the hook function itself runs.
    active: bool,
}

impl HookState {
    pub(crate) fn new(func: Value, events: HookEvents) -> HookState {
        HookState {
            func,
            events,
            count_left: events.count,
            last_line: None,
            active: false,
        }
    }
}

pub(crate) fn fire(vm: &mut Vm, exec: &mut ExecState, event: HookEvent) -> VmResult<()> {
    let func = {
        let Some(h) = vm.hook.as_mut() else {
            return Ok(());
        };
        if h.active {
            return Ok(());
        }
        let enabled = match event {
            HookEvent::Call => h.events.call,
            HookEvent::Return => h.events.ret,
            HookEvent::Line(_) => h.events.line,
            HookEvent::Count => h.events.count > 0,
        };
        if !enabled {
            return Ok(());
        }
        h.active = true;
        h.func.clone()
    };
    let mut args = vec![Value::string(event.name())];
    if let HookEvent::Line(l) = event {
        args.push(Value::Number(l as f64));
    }
    let r = execute::call_value(vm, exec, &func, &args);
    if let Some(h) = vm.hook.as_mut() {
        h.active = false;
    }
    r.map(|_| ())
}

/// Per-instruction check for count and line events.
pub(crate) fn on_instruction(
    vm: &mut Vm,
    exec: &mut ExecState,
    chunk: &Chunk,
    pc: usize,
) -> VmResult<()> {
    let mut fire_count = false;
    let mut fire_line = None;
    {
        let Some(h) = vm.hook.as_mut() else {
            return Ok(());
        };
        if h.active {
            return Ok(());
        }
        if h.events.count > 0 {
            h.count_left = h.count_left.saturating_sub(1);
            if h.count_left == 0 {
                h.count_left = h.events.count;
                fire_count = true;
            }
        }
        if h.events.line {
            let line = chunk.line_at(pc);
            if h.last_line != Some(line) {
                h.last_line = Some(line);
                fire_line = Some(line);
            }
        }
    }
    if fire_count {
        fire(vm, exec, HookEvent::Count)?;
    }
    if let Some(l) = fire_line {
        fire(vm, exec, HookEvent::Line(l))?;
    }
    Ok(())
}
