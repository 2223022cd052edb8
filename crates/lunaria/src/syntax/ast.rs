// Typed syntax tree. This is the compiler's entire input: each node
// carries the source line the code generator stamps on emitted
// instructions.

use smol_str::SmolStr;

#[derive(Debug, Default)]
pub struct Block {
    pub stats: Vec<Stat>,
}

#[derive(Debug)]
pub enum Stat {
    /// A call in statement position (results discarded).
    Call { expr: Expr },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        line: u32,
    },
    Local {
        names: Vec<SmolStr>,
        values: Vec<Expr>,
        line: u32,
    },
    LocalFunction {
        name: SmolStr,
        body: FuncBody,
        line: u32,
    },
    If {
        /// Condition/body pairs: `if`, then every `elseif`.
        arms: Vec<(Expr, Block)>,
        else_body: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
        line: u32,
    },
    Repeat {
        body: Block,
        cond: Expr,
        line: u32,
    },
    NumericFor {
        var: SmolStr,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        line: u32,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
        line: u32,
    },
    Do { body: Block },
    Return { exprs: Vec<Expr>, line: u32 },
    Break { line: u32 },
    Goto { label: SmolStr, line: u32 },
    Label { name: SmolStr, line: u32 },
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

#[derive(Debug)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Vararg,
    Number(f64),
    Str(SmolStr),
    Name(SmolStr),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    MethodCall(Box<Expr>, SmolStr, Vec<Expr>),
    Function(Box<FuncBody>),
    Table(Vec<TableItem>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    UnOp(UnOp, Box<Expr>),
    /// A parenthesized expression: truncates multi-value results to one.
    Paren(Box<Expr>),
}

#[derive(Debug)]
pub enum TableItem {
    Positional(Expr),
    Named(SmolStr, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug)]
pub struct FuncBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub body: Block,
    pub line: u32,
    pub end_line: u32,
    /// Best-effort name for tracebacks ("f", "t.m", ...).
    pub name: Option<SmolStr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Expr {
        Expr { kind, line }
    }

    /// Can this expression produce a variable number of results?
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call(..) | ExprKind::MethodCall(..) | ExprKind::Vararg
        )
    }
}
