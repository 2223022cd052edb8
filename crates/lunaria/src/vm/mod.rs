// The virtual machine: execution state, dispatch, coroutines, metamethod
// resolution, hooks and the async host-call bridge.

mod async_bridge;
pub(crate) mod coroutine;
mod error;
pub(crate) mod execute;
mod frame;
mod hook;
pub(crate) mod meta;
mod trace;

pub use coroutine::{CoStatus, Coroutine};
pub use error::{VmError, VmResult};
pub use frame::Frame;
pub use hook::{HookEvent, HookEvents};
pub use trace::Traceback;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::bytecode::Chunk;
use crate::compiler;
use crate::registry::LibraryRegistry;
use crate::value::{
    Closure, HostContext, HostFuture, StackRef, Table, TableRef, Upvalue, UpvalueRef, Value,
};

/// Tunable limits. Defaults match the reference behavior.
#[derive(Clone)]
pub struct VmOptions {
    /// Ceiling on `__index`/`__newindex` chain walks before the VM calls
    /// the structure cyclic.
    pub meta_chain_limit: usize,
    /// Starting size of an execution stack, in value slots.
    pub initial_stack: usize,
    /// Hard ceiling on stack growth, in value slots.
    pub max_stack: usize,
}

impl Default for VmOptions {
    fn default() -> VmOptions {
        VmOptions {
            meta_chain_limit: 100,
            initial_stack: 64,
            max_stack: 1_000_000,
        }
    }
}

/// Cooperative cancellation handle. Clone it, hand it to another thread,
/// and flip it; the dispatch loop notices at its next check point.
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Source provider for `require`.
pub trait ModuleLoader {
    /// Resolve a module name to `(source, chunk_name)`.
    fn load(&mut self, name: &str) -> Option<(String, String)>;
}

/// Why the dispatch loop parked, and where the eventual values go when
/// execution picks back up.
pub(crate) enum Pending {
    /// A host call site inside the loop; also the shape of a yield. A
    /// tail call into a host function takes this form too, since the
    /// tail frame is popped before the host runs.
    HostCall { ret_base: usize, want: i32 },
    /// One value lands in a register (metamethod results).
    SetResult { dest: usize },
    /// The value is dropped (`__newindex` handlers).
    Discard,
    /// Comparison metamethod; its truthiness decides the following jump.
    Compare { expect: bool },
    /// A paused right-to-left concat fold.
    Concat { dest: usize, first: usize, next: usize },
}

/// One execution stack: the main thread has one, each coroutine has its
/// own. The stack vector is shared behind `Rc` so upvalues can stay open
/// across resume boundaries.
pub struct ExecState {
    pub stack: StackRef,
    pub top: usize,
    pub frames: Vec<Frame>,
    pub(crate) open_upvalues: Vec<UpvalueRef>,
    pub(crate) pending: Option<Pending>,
    pub(crate) pending_future: Option<HostFuture>,
    /// Values crossing a yield/resume boundary.
    pub(crate) transfer: Vec<Value>,
    /// Non-yieldable nesting depth; metamethods, protected calls and
    /// hooks run with this raised.
    pub(crate) nny: u32,
}

impl ExecState {
    pub fn new(options: &VmOptions) -> ExecState {
        ExecState {
            stack: Rc::new(RefCell::new(vec![Value::Nil; options.initial_stack])),
            top: 0,
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            pending: None,
            pending_future: None,
            transfer: Vec::new(),
            nny: 0,
        }
    }

    #[inline]
    pub fn reg(&self, i: usize) -> Value {
        self.stack.borrow()[i].clone()
    }

    #[inline]
    pub fn set_reg(&self, i: usize, v: Value) {
        self.stack.borrow_mut()[i] = v;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Grow the stack to hold at least `need` slots. Growth doubles up to
    /// the configured ceiling.
    pub fn ensure(&mut self, need: usize, max: usize) -> Result<(), VmError> {
        let len = self.capacity();
        if need <= len {
            return Ok(());
        }
        if need > max {
            return Err(VmError::StackOverflow);
        }
        let mut new_len = len.max(64);
        while new_len < need {
            new_len *= 2;
        }
        self.stack.borrow_mut().resize(new_len.min(max), Value::Nil);
        Ok(())
    }

    /// Argument `i` of a host call, nil past the end.
    pub fn arg(&self, ctx: HostContext, i: usize) -> Value {
        if i < ctx.nargs {
            self.reg(ctx.base + i)
        } else {
            Value::Nil
        }
    }

    pub fn args(&self, ctx: HostContext) -> Vec<Value> {
        (0..ctx.nargs).map(|i| self.arg(ctx, i)).collect()
    }

    /// Write host-call results at the return base; the caller passes the
    /// returned count through `HostReturn::Count`.
    pub fn set_results(&mut self, ctx: HostContext, values: &[Value]) -> usize {
        let need = ctx.ret_base + values.len();
        if need > self.capacity() {
            // host results stay within configured limits; the frame that
            // made the call already fit below them
            let _ = self.ensure(need, need);
        }
        for (i, v) in values.iter().enumerate() {
            self.set_reg(ctx.ret_base + i, v.clone());
        }
        values.len()
    }
}

pub struct Vm {
    globals: TableRef,
    string_meta: Option<TableRef>,
    pub(crate) loaded: AHashMap<SmolStr, Value>,
    loader: Option<Box<dyn ModuleLoader>>,
    pub(crate) options: VmOptions,
    pub(crate) error_value: Value,
    pub(crate) traceback: Option<Traceback>,
    main: Option<Box<ExecState>>,
    /// Chain of running coroutines, outermost first.
    pub(crate) coroutines: Vec<Rc<Coroutine>>,
    pub(crate) hook: Option<hook::HookState>,
    cancel: Cancellation,
}

impl Vm {
    pub fn new() -> Vm {
        let mut vm = Vm::bare(VmOptions::default());
        LibraryRegistry::standard().install(&mut vm);
        vm
    }

    pub fn with_options(options: VmOptions) -> Vm {
        let mut vm = Vm::bare(options);
        LibraryRegistry::standard().install(&mut vm);
        vm
    }

    /// A VM without any library installed.
    pub fn bare(options: VmOptions) -> Vm {
        Vm {
            globals: Rc::new(RefCell::new(Table::new())),
            string_meta: None,
            loaded: AHashMap::new(),
            loader: None,
            options,
            error_value: Value::Nil,
            traceback: None,
            main: None,
            coroutines: Vec::new(),
            hook: None,
            cancel: Cancellation::default(),
        }
    }

    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().raw_get(&Value::string(name))
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        // string keys are never nil or NaN
        let _ = self.globals.borrow_mut().raw_set(Value::string(name), value);
    }

    /// Metatable applied to string values (usually `{__index = <string lib>}`).
    pub fn set_string_metatable(&mut self, meta: TableRef) {
        self.string_meta = Some(meta);
    }

    pub(crate) fn string_metatable(&self) -> Option<&TableRef> {
        self.string_meta.as_ref()
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = Some(loader);
    }

    pub(crate) fn take_loader(&mut self) -> Option<Box<dyn ModuleLoader>> {
        self.loader.take()
    }

    pub(crate) fn put_loader(&mut self, loader: Option<Box<dyn ModuleLoader>>) {
        if self.loader.is_none() {
            self.loader = loader;
        }
    }

    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Install a debug hook; `func` is called with the event name (and
    /// line number for line events).
    pub fn set_hook(&mut self, func: Value, events: HookEvents) {
        self.hook = Some(hook::HookState::new(func, events));
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// The error value left by the last failure.
    pub fn error_value(&self) -> &Value {
        &self.error_value
    }

    pub fn error_message(&self) -> String {
        self.error_value.to_display_string()
    }

    pub fn traceback(&self) -> Option<&Traceback> {
        self.traceback.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Value {
        std::mem::take(&mut self.error_value)
    }

    pub fn compile(&mut self, source: &str, chunk_name: &str) -> VmResult<Rc<Chunk>> {
        compiler::compile(source, chunk_name).map_err(|e| {
            self.error_value = Value::string(e.message);
            VmError::Compile
        })
    }

    /// Instantiate a chunk as a closure with `_ENV` bound to the globals.
    pub fn chunk_closure(&self, chunk: Rc<Chunk>) -> Value {
        let env = Upvalue::closed(Value::Table(self.globals.clone()));
        Value::Function(Rc::new(Closure {
            chunk,
            upvalues: vec![env],
        }))
    }

    /// Compile and run a source string on the main stack.
    pub fn execute_string(&mut self, source: &str, chunk_name: &str) -> VmResult<Vec<Value>> {
        let chunk = self.compile(source, chunk_name)?;
        let main = self.chunk_closure(chunk);
        self.call_function(&main, &[])
    }

    /// Like `execute_string`, but host futures are awaited instead of
    /// being an error.
    pub async fn execute_string_async(
        &mut self,
        source: &str,
        chunk_name: &str,
    ) -> VmResult<Vec<Value>> {
        let chunk = self.compile(source, chunk_name)?;
        let main = self.chunk_closure(chunk);
        let mut exec = self.take_main_exec();
        let r = async_bridge::call_async(self, &mut exec, &main, &[]).await;
        self.main = Some(exec);
        r
    }

    /// Call any callable value on the main stack, synchronously.
    pub fn call_function(&mut self, func: &Value, args: &[Value]) -> VmResult<Vec<Value>> {
        let mut exec = self.take_main_exec();
        let r = async_bridge::call_sync(self, &mut exec, func, args);
        self.main = Some(exec);
        r
    }

    /// Register a host function as a global.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut Vm, &mut ExecState, HostContext) -> VmResult<crate::value::HostReturn>
            + 'static,
    {
        let f = crate::value::HostFunction::new(name, func);
        self.set_global(name, Value::Host(f));
    }

    fn take_main_exec(&mut self) -> Box<ExecState> {
        match self.main.take() {
            Some(e) => e,
            None => Box::new(ExecState::new(&self.options)),
        }
    }

    /// Raise a runtime error with a source position prefix.
    pub(crate) fn throw(&mut self, exec: &ExecState, msg: impl Into<String>) -> VmError {
        let msg = msg.into();
        self.error_value = Value::string(match trace::position(exec) {
            Some(pos) => format!("{}: {}", pos, msg),
            None => msg,
        });
        self.traceback = Some(Traceback::capture(exec));
        VmError::Runtime
    }

    /// Raise with an explicit error value (the `error` builtin).
    pub(crate) fn throw_value(&mut self, exec: &ExecState, value: Value) -> VmError {
        self.error_value = value;
        self.traceback = Some(Traceback::capture(exec));
        VmError::Runtime
    }

    pub(crate) fn throw_overflow(&mut self, exec: &ExecState) -> VmError {
        self.error_value = Value::string(match trace::position(exec) {
            Some(pos) => format!("{}: stack overflow", pos),
            None => "stack overflow".to_string(),
        });
        self.traceback = Some(Traceback::capture(exec));
        VmError::StackOverflow
    }
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}
