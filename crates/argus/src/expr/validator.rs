//
// validator.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use crate::expr::ast::Expr;
use crate::expr::ast::ObjectProp;
use crate::expr::ast::Program;
use crate::expr::ast::Stmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

// Global functions whose invocation cannot mutate program state.
const INTRINSIC_FUNCTIONS: &[&str] = &[
    "String",
    "Number",
    "Boolean",
    "isNaN",
    "isFinite",
    "parseInt",
    "parseFloat",
    "encodeURI",
    "encodeURIComponent",
    "decodeURI",
    "decodeURIComponent",
];

// Read-only namespace calls: (object, allowed members; empty = any member).
const INTRINSIC_NAMESPACES: &[(&str, &[&str])] = &[
    ("Math", &[]),
    ("JSON", &["parse", "stringify"]),
    ("Number", &["isNaN", "isFinite", "isInteger", "isSafeInteger", "parseInt", "parseFloat"]),
    ("Object", &["keys", "values", "entries", "getOwnPropertyNames"]),
    ("Array", &["isArray", "of"]),
    ("String", &["fromCharCode", "fromCodePoint"]),
    ("Date", &["now", "parse"]),
];

/// Decides whether a parsed expression is side-effect free and therefore
/// safe to evaluate against a paused frame.
pub fn validate(program: &Program) -> Result<(), ValidationError> {
    for stmt in &program.body {
        validate_statement(stmt)?;
    }
    Ok(())
}

fn disallowed(what: &str) -> ValidationError {
    ValidationError {
        message: format!("Expression not allowed: {what}"),
    }
}

fn validate_statement(stmt: &Stmt) -> Result<(), ValidationError> {
    match stmt {
        Stmt::Empty => Ok(()),
        Stmt::Expr(expr) => validate_expr(expr),
        Stmt::Block(body) => {
            for stmt in body {
                validate_statement(stmt)?;
            }
            Ok(())
        },
        Stmt::Declaration(keyword) => Err(disallowed(&format!("`{keyword}` declaration"))),
        Stmt::ControlFlow(keyword) => Err(disallowed(&format!("`{keyword}` statement"))),
    }
}

fn validate_expr(expr: &Expr) -> Result<(), ValidationError> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Regex(_) | Expr::Ident(_) | Expr::This => Ok(()),

        Expr::Template { substitutions } => {
            for substitution in substitutions {
                validate_expr(substitution)?;
            }
            Ok(())
        },

        Expr::Array(elements) => {
            for element in elements {
                validate_expr(element)?;
            }
            Ok(())
        },

        Expr::Object(props) => {
            for prop in props {
                match prop {
                    ObjectProp::KeyValue { key, computed, value } => {
                        if *computed {
                            validate_expr(key)?;
                        }
                        validate_expr(value)?;
                    },
                    ObjectProp::Shorthand(_) => {},
                    ObjectProp::Spread(expr) => validate_expr(expr)?,
                    ObjectProp::Method => return Err(disallowed("function literal")),
                }
            }
            Ok(())
        },

        Expr::Spread(expr) => validate_expr(expr),

        Expr::Unary { op, operand } => match op.as_str() {
            "delete" => Err(disallowed("`delete` operator")),
            "await" | "yield" | "new." => Err(disallowed(&format!("`{op}` expression"))),
            _ => validate_expr(operand),
        },

        Expr::Update { op, .. } => Err(disallowed(&format!("`{op}` operator"))),

        Expr::Binary { lhs, rhs, .. } => {
            validate_expr(lhs)?;
            validate_expr(rhs)
        },

        Expr::Assign { .. } => Err(disallowed("assignment")),

        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            validate_expr(test)?;
            validate_expr(consequent)?;
            validate_expr(alternate)
        },

        Expr::Call { callee, arguments } => {
            if !is_intrinsic_callee(callee) {
                return Err(disallowed("call of a non-intrinsic function"));
            }
            for argument in arguments {
                validate_expr(argument)?;
            }
            Ok(())
        },

        Expr::New { .. } => Err(disallowed("`new` expression")),

        Expr::Member {
            object, property, computed, ..
        } => {
            validate_expr(object)?;
            if *computed {
                validate_expr(property)?;
            }
            Ok(())
        },

        Expr::Sequence(items) => {
            for item in items {
                validate_expr(item)?;
            }
            Ok(())
        },

        Expr::Function => Err(disallowed("function literal")),
        Expr::Arrow => Err(disallowed("arrow function")),
    }
}

/// A callee is intrinsic when it statically resolves to a read-only global
/// function or a whitelisted namespace member. Anything reached through
/// locals, computed keys, or optional chains is opaque and rejected.
fn is_intrinsic_callee(callee: &Expr) -> bool {
    match callee {
        Expr::Ident(name) => INTRINSIC_FUNCTIONS.contains(&name.as_str()),
        Expr::Member {
            object,
            property,
            computed: false,
            optional: false,
        } => {
            let (Expr::Ident(object), Expr::Ident(property)) = (&**object, &**property) else {
                return false;
            };
            INTRINSIC_NAMESPACES
                .iter()
                .any(|(namespace, members)| {
                    namespace == object
                        && (members.is_empty() || members.contains(&property.as_str()))
                })
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;

    fn is_valid(source: &str) -> bool {
        match parse(source) {
            Ok(program) => validate(&program).is_ok(),
            Err(_) => false,
        }
    }

    #[test]
    fn test_accepts_read_only_expressions() {
        assert!(is_valid("x === 1"));
        assert!(is_valid("this?this:1"));
        assert!(is_valid(r#""𠮷".length"#));
        assert!(is_valid("/ab+c/.source"));
        assert!(is_valid("[...xs, 1]"));
        assert!(is_valid("items[2].price"));
        assert!(is_valid("a && b || !c"));
        assert!(is_valid("typeof x"));
        assert!(is_valid("`count: ${n + 1}`"));
        assert!(is_valid(";"));
        assert!(is_valid(""));
    }

    #[test]
    fn test_accepts_intrinsic_calls() {
        assert!(is_valid("Math.max(a, b)"));
        assert!(is_valid("String(x)"));
        assert!(is_valid("JSON.stringify(obj)"));
        assert!(is_valid("parseInt(s, 10)"));
    }

    #[test]
    fn test_rejects_mutation() {
        assert!(!is_valid("x = 1"));
        assert!(!is_valid("x += 1"));
        assert!(!is_valid("x++"));
        assert!(!is_valid("--x"));
        assert!(!is_valid("delete obj.key"));
    }

    #[test]
    fn test_rejects_declarations_and_control_flow() {
        assert!(!is_valid("var x = 1"));
        assert!(!is_valid("let y"));
        assert!(!is_valid("while (true) {}"));
        assert!(!is_valid("for (;;) {}"));
        assert!(!is_valid("return 1"));
        assert!(!is_valid("throw x"));
        assert!(!is_valid("try { x } catch (e) {}"));
        assert!(!is_valid("debugger"));
        assert!(!is_valid("{ var x; }"));
    }

    #[test]
    fn test_rejects_function_literals() {
        assert!(!is_valid("function f() { return 1; }"));
        assert!(!is_valid("x => x + 1"));
        assert!(!is_valid("() => mutate()"));
        assert!(!is_valid("(function() { return 1; })()"));
    }

    #[test]
    fn test_rejects_construction() {
        assert!(!is_valid("new Date()"));
        assert!(!is_valid("new Foo.Bar(1)"));
    }

    #[test]
    fn test_rejects_non_intrinsic_calls() {
        assert!(!is_valid("item.increasePriceByOne()"));
        assert!(!is_valid("f()"));
        assert!(!is_valid("obj[name]()"));
        assert!(!is_valid("JSON[\"parse\"](s)"));
    }

    #[test]
    fn test_rejects_tainted_template_substitution() {
        assert!(!is_valid("`oops: ${x++}`"));
        assert!(!is_valid("`oops: ${f()}`"));
        assert!(is_valid("`fine: ${x}`"));
    }

    #[test]
    fn test_block_of_expressions_is_allowed() {
        assert!(is_valid("{ x; y }"));
    }
}
