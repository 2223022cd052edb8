use std::fmt;

pub type VmResult<T> = Result<T, VmError>;

/// Failure signals raised by the VM. These are lightweight discriminants;
/// the error payload (message value, traceback) lives on the `Vm` so the
/// signal itself stays `Copy` and cheap to propagate through `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Source failed to compile; the message is on the VM.
    Compile,
    /// A runtime error; the error value (usually a string) is on the VM.
    Runtime,
    /// Register space exhausted by runaway recursion.
    StackOverflow,
    /// A coroutine yielded; values travel through its `ExecState`.
    Yield,
    /// A host call returned a future; the dispatch loop is parked until
    /// the driver polls it to completion.
    Suspended,
    /// Execution was cancelled from outside.
    Cancelled,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmError::Compile => "compile error",
            VmError::Runtime => "runtime error",
            VmError::StackOverflow => "stack overflow",
            VmError::Yield => "coroutine yield",
            VmError::Suspended => "suspended on a host future",
            VmError::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::error::Error for VmError {}
