/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Host script AST types.
//!
//! A compiled artifact is parsed into a [`Program`]: plain text to emit,
//! interleaved with statements taken from `<?tpl ... ?>` regions.

use crate::context::Value;
use std::sync::Arc;

/// A parsed compiled artifact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// Top-level function definitions, hoisted before execution.
    pub fn functions(&self) -> impl Iterator<Item = &Arc<FunctionDef>> {
        self.body.iter().filter_map(|stmt| match stmt {
            Stmt::Function(def) => Some(def),
            _ => None,
        })
    }
}

/// A statement in the host script.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Text outside code regions, emitted as-is.
    Text(String),

    /// `echo a, b;`
    Echo(Vec<Expr>),

    /// An expression evaluated for its effect (assignment, call, `++`).
    Expr(Expr),

    /// `if (..) {..} elseif (..) {..} else {..}`
    If(IfStmt),

    /// `foreach ($items as $key => $value) {..}`
    Foreach(ForeachStmt),

    /// `for (init; cond; step) {..}`
    For(ForStmt),

    /// `switch (..) { case ..: .. default: .. }`
    Switch(SwitchStmt),

    /// `function name($a, $b = 1) {..}`
    Function(Arc<FunctionDef>),

    Break,

    Continue,

    Return(Option<Expr>),
}

/// Conditional block.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    /// List of (condition, body) pairs for if/elseif branches.
    pub branches: Vec<(Expr, Vec<Stmt>)>,
    /// Optional else branch.
    pub else_branch: Option<Vec<Stmt>>,
}

/// Iteration over a list or map.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeachStmt {
    pub subject: Expr,
    /// Variable bound to each key, if requested.
    pub key: Option<String>,
    /// Variable bound to each value.
    pub value: String,
    pub body: Vec<Stmt>,
}

/// C-style loop. An empty condition list means "always true".
#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub init: Vec<Expr>,
    pub condition: Vec<Expr>,
    pub step: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStmt {
    pub subject: Expr,
    pub arms: Vec<SwitchArm>,
}

/// One `case` or `default` branch. Execution falls through to the next arm
/// until a `break`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// `None` for `default`.
    pub label: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// A template-defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Lowercased name; function names are case-insensitive.
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A piece of a double-quoted string.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(String),
    /// `$name` interpolated into the string.
    Variable(String),
}

/// An expression in the host script.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),

    /// Double-quoted string containing `$name` references.
    Interpolated(Vec<StrPart>),

    /// `[a, 'k' => b]` or `array(..)`
    Array(Vec<(Option<Expr>, Expr)>),

    /// `$name`
    Variable(String),

    /// `$base[index]`; `index` is `None` for the append form `$base[]`.
    Index {
        base: Box<Expr>,
        index: Option<Box<Expr>>,
    },

    /// `$base->name`
    Member { base: Box<Expr>, name: String },

    /// `name(args)`, name lowercased.
    Call { name: String, args: Vec<Expr> },

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Short-circuiting `&&`, `||` and `??`.
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// `cond ? then : otherwise`; `then` is `None` for `cond ?: otherwise`.
    Ternary {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },

    /// `target = value`, or a compound form such as `target .= value`.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// `++$x`, `$x++`, `--$x`, `$x--`
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },

    Isset(Vec<Expr>),

    Empty(Box<Expr>),
}

impl Expr {
    /// Whether this expression can be assigned to.
    pub fn is_place(&self) -> bool {
        match self {
            Expr::Variable(_) => true,
            Expr::Index { base, .. } | Expr::Member { base, .. } => base.is_place(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => ".",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    #[test]
    fn test_places() {
        assert!(var("a").is_place());
        assert!(
            Expr::Index {
                base: Box::new(var("a")),
                index: None
            }
            .is_place()
        );
        assert!(
            Expr::Member {
                base: Box::new(var("a")),
                name: "b".to_string()
            }
            .is_place()
        );
        assert!(!Expr::Literal(Value::Int(1)).is_place());
        assert!(
            !Expr::Index {
                base: Box::new(Expr::Call {
                    name: "f".to_string(),
                    args: vec![]
                }),
                index: None
            }
            .is_place()
        );
    }

    #[test]
    fn test_hoisted_functions() {
        let def = Arc::new(FunctionDef {
            name: "greet".to_string(),
            params: vec![],
            body: vec![],
        });
        let program = Program {
            body: vec![
                Stmt::Text("x".to_string()),
                Stmt::Function(def.clone()),
            ],
        };
        let names: Vec<_> = program.functions().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["greet"]);
    }

    #[test]
    fn test_binary_op_symbols() {
        assert_eq!(BinaryOp::Concat.symbol(), ".");
        assert_eq!(BinaryOp::NotIdentical.symbol(), "!==");
    }
}
