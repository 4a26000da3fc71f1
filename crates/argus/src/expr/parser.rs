//
// parser.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use crate::expr::ast::Expr;
use crate::expr::ast::ObjectProp;
use crate::expr::ast::Program;
use crate::expr::ast::Stmt;
use crate::expr::token::lex;
use crate::expr::token::TemplatePiece;
use crate::expr::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

const DECLARATION_KEYWORDS: &[&str] = &["var", "let", "const", "function", "class"];

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "while", "for", "do", "switch", "return", "throw", "try", "debugger", "break",
    "continue", "with",
];

const UNARY_WORDS: &[&str] = &["typeof", "void", "delete", "await", "yield"];

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

/// Binary precedence; higher binds tighter. The boolean marks
/// right-associativity.
fn binary_precedence(op: &str) -> Option<(u8, bool)> {
    let prec = match op {
        "??" => (1, false),
        "||" => (2, false),
        "&&" => (3, false),
        "|" => (4, false),
        "^" => (5, false),
        "&" => (6, false),
        "==" | "!=" | "===" | "!==" => (7, false),
        "<" | ">" | "<=" | ">=" | "in" | "instanceof" => (8, false),
        "<<" | ">>" | ">>>" => (9, false),
        "+" | "-" => (10, false),
        "*" | "/" | "%" => (11, false),
        "**" => (12, true),
        _ => return None,
    };
    Some(prec)
}

/// Parses a whole condition or watch-expression source.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = lex(source).map_err(|err| ParseError {
        message: err.message,
    })?;

    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

/// Parses a source that must be exactly one expression (e.g. a template
/// substitution).
fn parse_expression_source(source: &str) -> Result<Expr, ParseError> {
    let tokens = lex(source).map_err(|err| ParseError {
        message: err.message,
    })?;

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> ParseError {
        ParseError {
            message: format!("Unexpected token {}", self.peek().describe()),
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !matches!(self.peek(), Token::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        if self.eat_punct("{") {
            let mut body = Vec::new();
            while !self.peek().is_punct("}") {
                if matches!(self.peek(), Token::Eof) {
                    return Err(self.unexpected());
                }
                body.push(self.parse_statement()?);
            }
            self.expect_punct("}")?;
            return Ok(Stmt::Block(body));
        }

        if let Token::Word(word) = self.peek() {
            let word = word.clone();
            // Disallowed statement forms invalidate the whole input, so their
            // extent does not matter; record the keyword and stop parsing.
            if DECLARATION_KEYWORDS.contains(&word.as_str()) {
                self.pos = self.tokens.len();
                return Ok(Stmt::Declaration(word));
            }
            if CONTROL_KEYWORDS.contains(&word.as_str()) {
                self.pos = self.tokens.len();
                return Ok(Stmt::ControlFlow(word));
            }
        }

        let expr = self.parse_expression()?;
        if !self.eat_punct(";") && !matches!(self.peek(), Token::Eof) && !self.peek().is_punct("}")
        {
            return Err(self.unexpected());
        }
        Ok(Stmt::Expr(expr))
    }

    /// Comma-sequence level. Also permissive about `...spread` elements so
    /// that arrow parameter covers parse through (the arrow itself is
    /// rejected later).
    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut items = vec![self.parse_sequence_item()?];
        while self.eat_punct(",") {
            items.push(self.parse_sequence_item()?);
        }

        if items.len() == 1 {
            Ok(items.pop().unwrap())
        } else {
            Ok(Expr::Sequence(items))
        }
    }

    fn parse_sequence_item(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct("...") {
            return Ok(Expr::Spread(Box::new(self.parse_assignment()?)));
        }
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_conditional()?;

        // `x => body` and `(params) => body`
        if self.peek().is_punct("=>") {
            self.advance();
            self.skip_arrow_body()?;
            return Ok(Expr::Arrow);
        }

        if let Token::Punct(op) = self.peek() {
            if ASSIGN_OPS.contains(op) {
                let op = (*op).to_string();
                self.advance();
                let value = self.parse_assignment()?;
                return Ok(Expr::Assign {
                    op,
                    target: Box::new(expr),
                    value: Box::new(value),
                });
            }
        }

        Ok(expr)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;

        if self.eat_punct("?") {
            let consequent = self.parse_assignment()?;
            self.expect_punct(":")?;
            let alternate = self.parse_assignment()?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            });
        }

        Ok(test)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Token::Punct(op) => *op,
                Token::Word(word) if word == "in" || word == "instanceof" => word.as_str(),
                _ => break,
            };
            let op = op.to_string();

            let Some((precedence, right_assoc)) = binary_precedence(&op) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }

            self.advance();
            let next_min = if right_assoc {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_binary(next_min)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Punct(op @ ("!" | "~" | "+" | "-")) => {
                let op = (*op).to_string();
                self.advance();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(self.parse_unary()?),
                })
            },
            Token::Punct(op @ ("++" | "--")) => {
                let op = (*op).to_string();
                self.advance();
                Ok(Expr::Update {
                    op,
                    operand: Box::new(self.parse_unary()?),
                })
            },
            Token::Word(word) if UNARY_WORDS.contains(&word.as_str()) => {
                let op = word.clone();
                self.advance();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(self.parse_unary()?),
                })
            },
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_call_member()?;

        if let Token::Punct(op @ ("++" | "--")) = self.peek() {
            let op = (*op).to_string();
            self.advance();
            return Ok(Expr::Update {
                op,
                operand: Box::new(expr),
            });
        }

        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.peek().is_word("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        loop {
            match self.peek() {
                Token::Punct(".") => {
                    self.advance();
                    let property = self.parse_property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: false,
                        optional: false,
                    };
                },
                Token::Punct("?.") => {
                    self.advance();
                    if self.peek().is_punct("(") {
                        let arguments = self.parse_arguments()?;
                        expr = Expr::Call {
                            callee: Box::new(expr),
                            arguments,
                        };
                    } else if self.eat_punct("[") {
                        let property = self.parse_expression()?;
                        self.expect_punct("]")?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: Box::new(property),
                            computed: true,
                            optional: true,
                        };
                    } else {
                        let property = self.parse_property_name()?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: Box::new(property),
                            computed: false,
                            optional: true,
                        };
                    }
                },
                Token::Punct("[") => {
                    self.advance();
                    let property = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: true,
                        optional: false,
                    };
                },
                Token::Punct("(") => {
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                    };
                },
                Token::Template(_) => {
                    // Tagged template: the tag is invoked, so model as a call
                    let arguments = self.parse_template_substitutions()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                    };
                },
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_property_name(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Word(word) => Ok(Expr::Ident(word)),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected())
            },
        }
    }

    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // new

        // `new.target` is metaproperty access, not construction; it still
        // only makes sense inside a function body, so reject via Unary walk.
        if self.eat_punct(".") {
            let property = self.parse_property_name()?;
            return Ok(Expr::Unary {
                op: String::from("new."),
                operand: Box::new(property),
            });
        }

        let mut callee = self.parse_primary()?;

        // Member accesses bind tighter than the construction itself
        loop {
            if self.eat_punct(".") {
                let property = self.parse_property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: Box::new(property),
                    computed: false,
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: Box::new(property),
                    computed: true,
                    optional: false,
                };
            } else {
                break;
            }
        }

        let arguments = if self.peek().is_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };

        Ok(Expr::New {
            callee: Box::new(callee),
            arguments,
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_punct("(")?;
        let mut arguments = Vec::new();

        loop {
            if self.eat_punct(")") {
                return Ok(arguments);
            }
            arguments.push(self.parse_sequence_item()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                return Ok(arguments);
            }
        }
    }

    fn parse_template_substitutions(&mut self) -> Result<Vec<Expr>, ParseError> {
        let Token::Template(pieces) = self.advance() else {
            return Err(self.unexpected());
        };

        let mut substitutions = Vec::new();
        for piece in pieces {
            if let TemplatePiece::Substitution(source) = piece {
                substitutions.push(parse_expression_source(&source)?);
            }
        }
        Ok(substitutions)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Number(text) => {
                self.advance();
                Ok(Expr::Number(text))
            },
            Token::Str(text) => {
                self.advance();
                Ok(Expr::Str(text))
            },
            Token::Regex(text) => {
                self.advance();
                Ok(Expr::Regex(text))
            },
            Token::Template(_) => {
                let substitutions = self.parse_template_substitutions()?;
                Ok(Expr::Template { substitutions })
            },
            Token::Word(word) => match word.as_str() {
                "this" => {
                    self.advance();
                    Ok(Expr::This)
                },
                "function" | "class" => {
                    self.skip_function()?;
                    Ok(Expr::Function)
                },
                "async" => {
                    self.advance();
                    if self.peek().is_word("function") {
                        self.skip_function()?;
                        return Ok(Expr::Function);
                    }
                    Ok(Expr::Ident(word))
                },
                _ => {
                    self.advance();
                    Ok(Expr::Ident(word))
                },
            },
            Token::Punct("(") => {
                self.advance();
                if self.eat_punct(")") {
                    // `()` is only valid as empty arrow parameters
                    self.expect_punct("=>")?;
                    self.skip_arrow_body()?;
                    return Ok(Expr::Arrow);
                }
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            },
            Token::Punct("[") => {
                self.advance();
                let mut elements = Vec::new();
                loop {
                    if self.eat_punct("]") {
                        return Ok(Expr::Array(elements));
                    }
                    if self.eat_punct(",") {
                        // Elision
                        continue;
                    }
                    elements.push(self.parse_sequence_item()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        return Ok(Expr::Array(elements));
                    }
                }
            },
            Token::Punct("{") => {
                self.advance();
                self.parse_object_literal()
            },
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        let mut props = Vec::new();

        loop {
            if self.eat_punct("}") {
                return Ok(Expr::Object(props));
            }

            if self.eat_punct("...") {
                props.push(ObjectProp::Spread(Box::new(self.parse_assignment()?)));
            } else {
                props.push(self.parse_object_property()?);
            }

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                return Ok(Expr::Object(props));
            }
        }
    }

    fn parse_object_property(&mut self) -> Result<ObjectProp, ParseError> {
        // Accessor properties: `get name() {...}` / `set name(v) {...}`
        if let Token::Word(word) = self.peek() {
            if (word == "get" || word == "set")
                && !matches!(
                    self.tokens.get(self.pos + 1),
                    Some(Token::Punct(":" | "," | "}" | "("))
                )
            {
                self.advance();
                self.parse_object_key()?;
                self.skip_balanced("(", ")")?;
                self.skip_balanced("{", "}")?;
                return Ok(ObjectProp::Method);
            }
        }

        let (key, computed, shorthand_name) = self.parse_object_key()?;

        match self.peek() {
            Token::Punct(":") => {
                self.advance();
                let value = self.parse_assignment()?;
                Ok(ObjectProp::KeyValue {
                    key: Box::new(key),
                    computed,
                    value: Box::new(value),
                })
            },
            Token::Punct("(") => {
                self.skip_balanced("(", ")")?;
                self.skip_balanced("{", "}")?;
                Ok(ObjectProp::Method)
            },
            Token::Punct("=") => {
                // CoverInitializedName; only legal inside an arrow-parameter
                // cover, which is itself rejected
                self.advance();
                let _ = self.parse_assignment()?;
                Ok(ObjectProp::Method)
            },
            _ => match shorthand_name {
                Some(name) => Ok(ObjectProp::Shorthand(name)),
                None => Err(self.unexpected()),
            },
        }
    }

    fn parse_object_key(&mut self) -> Result<(Expr, bool, Option<String>), ParseError> {
        match self.peek().clone() {
            Token::Word(word) => {
                self.advance();
                Ok((Expr::Str(word.clone()), false, Some(word)))
            },
            Token::Str(text) => {
                self.advance();
                Ok((Expr::Str(text), false, None))
            },
            Token::Number(text) => {
                self.advance();
                Ok((Expr::Number(text), false, None))
            },
            Token::Punct("[") => {
                self.advance();
                let key = self.parse_assignment()?;
                self.expect_punct("]")?;
                Ok((key, true, None))
            },
            _ => Err(self.unexpected()),
        }
    }

    /// Consumes a `function`/`class` literal without modeling its inside.
    fn skip_function(&mut self) -> Result<(), ParseError> {
        self.advance(); // function | class

        // Optional name, parameter list, extends clause; scan forward to the
        // body brace then consume the balanced body.
        while !self.peek().is_punct("{") {
            if matches!(self.peek(), Token::Eof) {
                return Err(self.unexpected());
            }
            self.advance();
        }
        self.skip_balanced("{", "}")
    }

    fn skip_arrow_body(&mut self) -> Result<(), ParseError> {
        if self.peek().is_punct("{") {
            self.skip_balanced("{", "}")
        } else {
            let _ = self.parse_assignment()?;
            Ok(())
        }
    }

    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<(), ParseError> {
        self.expect_punct(open)?;
        let mut depth: usize = 1;

        while depth > 0 {
            match self.advance() {
                Token::Eof => {
                    return Err(ParseError {
                        message: String::from("Unexpected token end of input"),
                    })
                },
                Token::Punct(p) if p == open => depth += 1,
                Token::Punct(p) if p == close => depth -= 1,
                _ => {},
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_single(source: &str) -> Expr {
        let program = parse(source).unwrap();
        assert_eq!(program.body.len(), 1);
        match program.body.into_iter().next().unwrap() {
            Stmt::Expr(expr) => expr,
            stmt => panic!("expected an expression statement, got {stmt:?}"),
        }
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse_single("x === 1");
        assert!(matches!(expr, Expr::Binary { ref op, .. } if op == "==="));
    }

    #[test]
    fn test_parse_conditional_with_this() {
        let expr = parse_single("this?this:1");
        let Expr::Conditional { test, .. } = expr else {
            panic!("expected a conditional");
        };
        assert_eq!(*test, Expr::This);
    }

    #[test]
    fn test_parse_member_chain() {
        let expr = parse_single("a.b[c].d");
        let Expr::Member { computed, .. } = expr else {
            panic!("expected a member access");
        };
        assert!(!computed);
    }

    #[test]
    fn test_parse_string_member() {
        let expr = parse_single(r#""𠮷".length"#);
        assert!(matches!(expr, Expr::Member { .. }));
    }

    #[test]
    fn test_parse_call_with_spread() {
        let expr = parse_single("Math.max(...values)");
        let Expr::Call { arguments, .. } = expr else {
            panic!("expected a call");
        };
        assert!(matches!(arguments[0], Expr::Spread(_)));
    }

    #[test]
    fn test_parse_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_single("1 + 2 * 3");
        let Expr::Binary { op, rhs, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, "+");
        assert!(matches!(*rhs, Expr::Binary { ref op, .. } if op == "*"));
    }

    #[test]
    fn test_parse_arrow_forms() {
        assert!(matches!(parse_single("x => x + 1"), Expr::Arrow));
        assert!(matches!(parse_single("() => 1"), Expr::Arrow));
        assert!(matches!(parse_single("(a, b) => { return a; }"), Expr::Arrow));
    }

    #[test]
    fn test_parse_function_expression() {
        assert!(matches!(
            parse_single("function f(a) { return a * 2; }"),
            Expr::Function
        ));
    }

    #[test]
    fn test_parse_new_expression() {
        let expr = parse_single("new Foo.Bar(1)");
        assert!(matches!(expr, Expr::New { .. }));
    }

    #[test]
    fn test_parse_update_expressions() {
        assert!(matches!(parse_single("x++"), Expr::Update { .. }));
        assert!(matches!(parse_single("--x"), Expr::Update { .. }));
    }

    #[test]
    fn test_parse_assignment_expression() {
        assert!(matches!(parse_single("x = 1"), Expr::Assign { .. }));
        assert!(matches!(parse_single("x += 1"), Expr::Assign { .. }));
    }

    #[test]
    fn test_parse_statements() {
        let program = parse(";").unwrap();
        assert!(program.is_empty());

        let program = parse("while (true) {}").unwrap();
        assert!(matches!(&program.body[0], Stmt::ControlFlow(kw) if kw == "while"));

        let program = parse("var x = 1").unwrap();
        assert!(matches!(&program.body[0], Stmt::Declaration(kw) if kw == "var"));
    }

    #[test]
    fn test_parse_block_statement() {
        let program = parse("{ x; y }").unwrap();
        let Stmt::Block(body) = &program.body[0] else {
            panic!("expected a block");
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_parse_template_substitutions() {
        let expr = parse_single("`total: ${a + b}`");
        let Expr::Template { substitutions } = expr else {
            panic!("expected a template");
        };
        assert_eq!(substitutions.len(), 1);
        assert!(matches!(substitutions[0], Expr::Binary { .. }));
    }

    #[test]
    fn test_parse_object_literal() {
        // Parenthesized: a bare `{` at statement position opens a block
        let expr = parse_single("({a: 1, b, ...rest})");
        let Expr::Object(props) = expr else {
            panic!("expected an object");
        };
        assert_eq!(props.len(), 3);
        assert!(matches!(&props[1], ObjectProp::Shorthand(name) if name == "b"));
    }

    #[test]
    fn test_parse_error_reports_token() {
        let err = parse("a ..").unwrap_err();
        assert!(err.message.starts_with("Unexpected token"));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse("").unwrap().is_empty());
    }
}
