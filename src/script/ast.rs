//! Abstract syntax tree for the sandbox script language

use std::rc::Rc;

/// A parsed snippet: a list of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<String>,
    pub body: Vec<Stmt>,
}

/// Head binding of a `for...of` / `for...in` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBinding {
    /// `None` when the loop assigns to an existing name
    pub kind: Option<DeclKind>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declaration {
        kind: DeclKind,
        declarators: Vec<Declarator>,
    },
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        binding: LoopBinding,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        binding: LoopBinding,
        object: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
    Expression(Expr),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body
    Expression(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A function literal, shared between the AST and every closure created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub rest: Option<String>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    /// Source text, used when a function is converted to a string
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Gt,
    LtEq,
    GtEq,
    StrictEq,
    StrictNotEq,
    LooseEq,
    LooseNotEq,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: PropertyKey,
    pub value: Expr,
}

/// An element of an argument list or array literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Plain(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Template(Vec<TemplatePart>),
    Ident(String),
    This,
    Array(Vec<Element>),
    Object(Vec<Property>),
    Function(Rc<FunctionDef>),
    Unary(UnaryOp, Box<Expr>),
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Logical(Box<Expr>, LogicalOp, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `op` is `None` for plain `=`, else the compound operator
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: MemberProperty,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Element>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Element>,
    },
}

impl Expr {
    /// Short rendering of a callee for error messages (`obj.method`, `fn`).
    pub fn describe(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::This => "this".to_string(),
            Expr::Member {
                object, property, ..
            } => match property {
                MemberProperty::Named(name) => format!("{}.{}", object.describe(), name),
                MemberProperty::Computed(_) => format!("{}[...]", object.describe()),
            },
            Expr::Call { callee, .. } => format!("{}(...)", callee.describe()),
            Expr::Str(s) => format!("\"{}\"", s),
            Expr::Number(n) => super::value::number_to_string(*n),
            _ => "expression".to_string(),
        }
    }

    /// Whether the expression may appear on the left of an assignment.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Member { optional: false, .. })
    }
}
