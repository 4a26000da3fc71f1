//
// ast.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

/// Expression forms, shaped for side-effect analysis rather than evaluation.
/// Function and arrow literals keep no body; their mere presence is a
/// validation failure, so there is nothing to analyze inside them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(String),
    Str(String),
    Template { substitutions: Vec<Expr> },
    Regex(String),
    Ident(String),
    This,
    Array(Vec<Expr>),
    Object(Vec<ObjectProp>),
    Spread(Box<Expr>),
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    /// `++`/`--`, prefix or postfix.
    Update {
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool,
        optional: bool,
    },
    Sequence(Vec<Expr>),
    Function,
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProp {
    KeyValue { key: Box<Expr>, computed: bool, value: Box<Expr> },
    Shorthand(String),
    Spread(Box<Expr>),
    Method,
}

/// Statement forms. Only empty statements, expression statements, and blocks
/// can ever validate; the rest are recorded by keyword for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    Block(Vec<Stmt>),
    Declaration(String),
    ControlFlow(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// True when the program contains no expression at all, e.g. `""` or
    /// `";"`. Such conditions are treated as unconditional.
    pub fn is_empty(&self) -> bool {
        self.body.iter().all(|stmt| matches!(stmt, Stmt::Empty))
    }
}
