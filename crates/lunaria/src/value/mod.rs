// Runtime value model.
//
// `Value` is a closed sum type over every value a script can hold. Nil,
// booleans, numbers and strings compare structurally; tables, functions,
// userdata and coroutines are reference-identity handles. There is no
// collector here: reference types are `Rc` handles and die when the last
// handle drops.

mod table;
mod userdata;

pub use table::{Table, TableKey};
pub use userdata::UserData;

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::bytecode::Chunk;
use crate::vm::{Coroutine, ExecState, Vm, VmResult};

pub type TableRef = Rc<RefCell<Table>>;
pub type StackRef = Rc<RefCell<Vec<Value>>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(SmolStr),
    Table(TableRef),
    Function(Rc<Closure>),
    Host(Rc<HostFunction>),
    UserData(Rc<UserData>),
    Coroutine(Rc<Coroutine>),
}

impl Value {
    #[inline]
    pub fn string(s: impl Into<SmolStr>) -> Value {
        Value::String(s.into())
    }

    #[inline]
    pub fn table(t: Table) -> Value {
        Value::Table(Rc::new(RefCell::new(t)))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except nil and false is truthy.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Arithmetic coercion: numbers pass through, strings are parsed.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Host(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Host(_) => "function",
            Value::UserData(_) => "userdata",
            Value::Coroutine(_) => "thread",
        }
    }

    /// Raw equality: structural for scalars/strings, identity for handles.
    /// `__eq` dispatch happens above this, in the VM.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Number formatting shared by `tostring` and string concatenation.
    /// Integral values print without a fractional part.
    pub fn number_to_string(n: f64) -> String {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            let mut buf = itoa::Buffer::new();
            buf.format(n as i64).to_string()
        } else {
            let mut s = format!("{:.14e}", n);
            // Prefer plain notation when it round-trips shorter.
            if let Ok(back) = format!("{}", n).parse::<f64>() {
                if back == n {
                    s = format!("{}", n);
                }
            }
            s
        }
    }

    /// Default string conversion, without `__tostring`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => Self::number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Function(f) => format!("function: {:p}", Rc::as_ptr(f)),
            Value::Host(f) => format!("function: builtin: {:p}", Rc::as_ptr(f)),
            Value::UserData(u) => format!("userdata: {:p}", Rc::as_ptr(u)),
            Value::Coroutine(c) => format!("thread: {:p}", Rc::as_ptr(c)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s.as_str()),
            other => write!(f, "{}", other.to_display_string()),
        }
    }
}

/// Primitive equality, without `__eq`. Matches `raw_eq`.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.raw_eq(other)
    }
}

/// Parse a string as a number the way the language does: optional sign,
/// decimal or `0x` hexadecimal, surrounding whitespace allowed.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let (neg, body) = match t.as_bytes()[0] {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    let n = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok().map(|v| v as f64)?
    } else {
        body.parse::<f64>().ok()?
    };
    Some(if neg { -n } else { n })
}

// ---------------------------------------------------------------------------
// Closures and upvalues

/// A compiled prototype bound to its captured variables.
pub struct Closure {
    pub chunk: Rc<Chunk>,
    pub upvalues: Vec<UpvalueRef>,
}

pub type UpvalueRef = Rc<Upvalue>;

/// A captured variable: open while the defining frame lives (aliasing one
/// of its stack slots), closed afterwards (owning a detached cell).
pub struct Upvalue(RefCell<UpvalueState>);

enum UpvalueState {
    Open { stack: StackRef, index: usize },
    Closed(Value),
}

impl Upvalue {
    pub fn open(stack: StackRef, index: usize) -> UpvalueRef {
        Rc::new(Upvalue(RefCell::new(UpvalueState::Open { stack, index })))
    }

    pub fn closed(value: Value) -> UpvalueRef {
        Rc::new(Upvalue(RefCell::new(UpvalueState::Closed(value))))
    }

    pub fn get(&self) -> Value {
        match &*self.0.borrow() {
            UpvalueState::Open { stack, index } => stack.borrow()[*index].clone(),
            UpvalueState::Closed(v) => v.clone(),
        }
    }

    pub fn set(&self, value: Value) {
        match &mut *self.0.borrow_mut() {
            UpvalueState::Open { stack, index } => stack.borrow_mut()[*index] = value,
            UpvalueState::Closed(v) => *v = value,
        }
    }

    /// Copy the aliased slot in and detach from the stack.
    pub fn close(&self) {
        let mut state = self.0.borrow_mut();
        if let UpvalueState::Open { stack, index } = &*state {
            let value = stack.borrow()[*index].clone();
            *state = UpvalueState::Closed(value);
        }
    }

    pub fn is_open_at(&self, stack: &StackRef, index: usize) -> bool {
        match &*self.0.borrow() {
            UpvalueState::Open { stack: s, index: i } => Rc::ptr_eq(s, stack) && *i == index,
            UpvalueState::Closed(_) => false,
        }
    }

    /// Stack slot this upvalue aliases, if still open on the given stack.
    pub fn open_index(&self, stack: &StackRef) -> Option<usize> {
        match &*self.0.borrow() {
            UpvalueState::Open { stack: s, index } if Rc::ptr_eq(s, stack) => Some(*index),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Host functions

/// Argument window of a host call. Arguments live at
/// `stack[base .. base + nargs]`; results must land at `ret_base`.
#[derive(Clone, Copy)]
pub struct HostContext {
    pub base: usize,
    pub nargs: usize,
    pub ret_base: usize,
}

pub type HostFuture = Pin<Box<dyn Future<Output = VmResult<Vec<Value>>>>>;

/// What a host function produced: `Count(n)` means n results were already
/// written at `ret_base`; `Future` suspends the dispatch loop until the
/// result set is ready.
pub enum HostReturn {
    Count(usize),
    Future(HostFuture),
}

type HostFn = dyn Fn(&mut Vm, &mut ExecState, HostContext) -> VmResult<HostReturn>;

/// A host-bound function: the only ABI between the VM and the standard
/// library or embedder code.
pub struct HostFunction {
    pub name: SmolStr,
    func: Box<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<SmolStr>, func: F) -> Rc<HostFunction>
    where
        F: Fn(&mut Vm, &mut ExecState, HostContext) -> VmResult<HostReturn> + 'static,
    {
        Rc::new(HostFunction {
            name: name.into(),
            func: Box::new(func),
        })
    }

    #[inline]
    pub fn call(
        &self,
        vm: &mut Vm,
        exec: &mut ExecState,
        ctx: HostContext,
    ) -> VmResult<HostReturn> {
        (self.func)(vm, exec, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Boolean(false).truthy());
        assert!(Value::Boolean(true).truthy());
        assert!(Value::Number(0.0).truthy());
        assert!(Value::string("").truthy());
    }

    #[test]
    fn number_coercion() {
        assert_eq!(Value::string("  42  ").coerce_number(), Some(42.0));
        assert_eq!(Value::string("0x10").coerce_number(), Some(16.0));
        assert_eq!(Value::string("-3.5").coerce_number(), Some(-3.5));
        assert_eq!(Value::string("1e2").coerce_number(), Some(100.0));
        assert_eq!(Value::string("no").coerce_number(), None);
        assert_eq!(Value::Boolean(true).coerce_number(), None);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(Value::number_to_string(7.0), "7");
        assert_eq!(Value::number_to_string(-3.0), "-3");
        assert_eq!(Value::number_to_string(0.5), "0.5");
    }

    #[test]
    fn upvalue_open_close() {
        let stack: StackRef = Rc::new(RefCell::new(vec![Value::Number(1.0)]));
        let uv = Upvalue::open(stack.clone(), 0);
        assert_eq!(uv.get().as_number(), Some(1.0));
        stack.borrow_mut()[0] = Value::Number(2.0);
        assert_eq!(uv.get().as_number(), Some(2.0));
        uv.close();
        stack.borrow_mut()[0] = Value::Number(9.0);
        assert_eq!(uv.get().as_number(), Some(2.0));
        assert!(!uv.is_open_at(&stack, 0));
    }
}
