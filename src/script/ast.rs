//! Syntax tree for the build-script language.
//!
//! The tree only covers the constructs that legacy SConscripts are known to
//! use. Anything else is rejected by the parser.

use std::rc::Rc;

/// A parsed script: the top-level statement list.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Statement>,
}

/// A statement together with the line it starts on.
#[derive(Debug, Clone)]
pub struct Statement {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        orelse: Vec<Statement>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Statement>,
        orelse: Vec<Statement>,
    },
    While {
        test: Expr,
        body: Vec<Statement>,
        orelse: Vec<Statement>,
    },
    Break,
    Continue,
    Pass,
    Return(Option<Expr>),
    Def(Rc<FunctionDef>),
    /// `import a.b.c as d`
    Import(Vec<ImportName>),
    /// `from a.b import c as d`; an empty name list means `import *`
    FromImport { module: String, names: Vec<ImportName> },
    Try {
        body: Vec<Statement>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Statement>,
        finalbody: Vec<Statement>,
    },
    Raise(Option<Expr>),
    Assert { test: Expr, msg: Option<Expr> },
    Del(Vec<Expr>),
    Global(Vec<String>),
    With {
        items: Vec<(Expr, Option<Expr>)>,
        body: Vec<Statement>,
    },
}

#[derive(Debug, Clone)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    /// Exception type expression (a name or tuple of names); `None` catches all.
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Statement>,
}

/// A `def` or `lambda`.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub vararg: Option<Rc<str>>,
    pub kwarg: Option<Rc<str>>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Statement>),
    Lambda(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Rc<str>,
    pub default: Option<Expr>,
    /// Declared after a bare `*` or `*args`
    pub keyword_only: bool,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Name(Rc<str>),
    Const(Literal),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attribute(Box<Expr>, Rc<str>),
    Subscript(Box<Expr>, Box<Expr>),
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call { func: Box<Expr>, args: Vec<Arg> },
    BinOp(Box<Expr>, BinOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp(Box<Expr>, Vec<Comprehension>),
    DictComp(Box<Expr>, Box<Expr>, Vec<Comprehension>),
    Starred(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Keyword(Rc<str>, Expr),
    Star(Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitOr,
    BitAnd,
    BitXor,
    LShift,
    RShift,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitOr => "|",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}
