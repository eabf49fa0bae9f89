//! The abstract syntax tree consumed by the compiler back-end.
//!
//! The parser resolves nothing: names stay names, and the compiler decides
//! local / upvalue / global. Every statement and expression carries the
//! source position of its first token.

/// Source position of a node's first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// A sequence of statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stats: Vec<Stat>,
}

/// A whole chunk (file or `load_string` buffer).
#[derive(Debug, Clone)]
pub struct Program {
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub kind: StatKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StatKind {
    /// `let a, b = e1, e2` / `const x = e`.
    Let {
        names: Vec<String>,
        is_const: bool,
        inits: Vec<Expr>,
    },
    /// `a, b = e1, e2` with arbitrary lvalues.
    Assign { targets: Vec<Expr>, values: Vec<Expr> },
    /// `x += e` and friends.
    Compound {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    /// `x++`.
    Increment { target: Expr },
    /// `x--`.
    Decrement { target: Expr },
    /// An expression evaluated for effect (usually a call).
    ExprStat { expr: Expr },
    /// `if` / `elif` / `else if` chain; one (condition, block) per arm.
    If {
        arms: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    While { cond: Expr, body: Block },
    /// C-style `for (init; cond; update)`.
    ForC {
        init: Option<Box<Stat>>,
        cond: Option<Expr>,
        update: Option<Box<Stat>>,
        body: Block,
    },
    /// `foreach (names in expr)`.
    ForEach {
        names: Vec<String>,
        iter: Expr,
        body: Block,
    },
    Return { values: Vec<Expr> },
    Break,
    Continue,
    /// `defer { ... }` — inlined by the compiler at scope exits, LIFO.
    Defer { body: Block },
    /// `function name(...)` / `function obj.field(...)` statement form.
    FuncDecl {
        name: String,
        path: Vec<String>,
        func: FuncDef,
    },
    /// A bare `{ ... }` block introducing a scope.
    Scope { body: Block },
}

/// A function literal (statement or expression form).
#[derive(Debug, Clone)]
pub struct FuncDef {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    /// Declared name, for tracebacks; `None` for anonymous functions.
    pub name: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    /// `...` in a vararg function.
    Vararg,
    Name(String),
    Bin {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Un {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// `cond ? a : b`.
    Ternary {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `obj:m(args)` — method-call sugar.
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Function(FuncDef),
    Table(Vec<TableItem>),
    /// Parenthesized expression: truncates multi-values to one.
    Paren(Box<Expr>),
}

/// One item of a table constructor.
#[derive(Debug, Clone)]
pub enum TableItem {
    /// `expr` — appended to the array part.
    Positional(Expr),
    /// `name = expr`.
    Named { name: String, value: Expr },
    /// `[expr] = expr`.
    Keyed { key: Expr, value: Expr },
    /// `...` — expands the varargs into the array part; must be last.
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    /// True for `== != < <= > >=`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-e`
    Neg,
    /// `!e`
    Not,
    /// `~e`
    BitNot,
    /// `#e`
    Len,
}

impl Expr {
    /// True when this expression is a valid assignment target.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Name(_) | ExprKind::Index { .. } | ExprKind::Member { .. }
        )
    }

    /// True when the expression can produce multiple values in a trailing
    /// position (calls and `...`).
    pub fn is_multivalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Vararg
        )
    }
}
