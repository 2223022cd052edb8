// Source positions and tracebacks for error reporting.

use std::fmt;

use smol_str::SmolStr;

use super::ExecState;
use super::frame::FRAME_TAIL;

/// "chunk:line" for the instruction the innermost frame is executing.
pub(crate) fn position(exec: &ExecState) -> Option<String> {
    let f = exec.frames.last()?;
    let pc = f.pc.saturating_sub(1);
    let line = f.closure.chunk.line_at(pc);
    Some(format!("{}:{}", f.closure.chunk.name, line))
}

#[derive(Clone)]
pub struct TraceFrame {
    pub chunk: SmolStr,
    pub line: u32,
    /// Definition line, 0 for a main chunk.
    pub line_defined: u32,
    /// Declared function name, when the syntax gave one.
    pub name: Option<SmolStr>,
    pub tail: bool,
}

/// Snapshot of the frame stack taken when an error is raised, innermost
/// frame first.
#[derive(Clone, Default)]
pub struct Traceback {
    pub frames: Vec<TraceFrame>,
}

impl Traceback {
    pub(crate) fn capture(exec: &ExecState) -> Traceback {
        let frames = exec
            .frames
            .iter()
            .rev()
            .map(|f| {
                let chunk = &f.closure.chunk;
                TraceFrame {
                    chunk: chunk.name.clone(),
                    line: chunk.line_at(f.pc.saturating_sub(1)),
                    line_defined: chunk.line_defined,
                    name: chunk.func_name.clone(),
                    tail: f.flags & FRAME_TAIL != 0,
                }
            })
            .collect();
        Traceback { frames }
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stack traceback:")?;
        for frame in &self.frames {
            if frame.line_defined == 0 {
                write!(f, "\t{}:{}: in main chunk", frame.chunk, frame.line)?;
            } else if let Some(name) = &frame.name {
                write!(f, "\t{}:{}: in function '{}'", frame.chunk, frame.line, name)?;
            } else {
                write!(
                    f,
                    "\t{}:{}: in function <{}:{}>",
                    frame.chunk, frame.line, frame.chunk, frame.line_defined
                )?;
            }
            if frame.tail {
                write!(f, "\n\t(...tail calls...)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
