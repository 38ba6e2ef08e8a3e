/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Host script parser.
//!
//! Converts compiled text into the [`Program`] AST. Statements follow the
//! PHP-flavoured grammar the tag compiler emits; expressions are parsed with
//! precedence climbing. Keywords and function names are case-insensitive.
//!
//! Nesting of blocks and expressions is limited to [`MAX_NESTING_DEPTH`];
//! deeper input is a syntax error.

use crate::ast::{
    BinaryOp, Expr, ForStmt, ForeachStmt, FunctionDef, IfStmt, LogicalOp, Param, Program, Stmt,
    SwitchArm, SwitchStmt, UnaryOp,
};
use crate::context::Value;
use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{Punct, Token, TokenKind, tokenize};
use std::sync::Arc;

/// Maximum nesting of blocks and expressions.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Parse compiled text into a program.
pub fn parse(source: &str) -> TemplateResult<Program> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let body = parser.parse_statements(BlockEnd::Eof)?;
    Ok(Program { body })
}

/// What terminates a statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockEnd {
    Eof,
    Brace,
    /// Next `case`, `default` or the closing brace of a switch.
    SwitchArm,
}

/// Infix operator kinds, paired with binding powers by `Parser::infix`.
enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current block and expression nesting.
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn error<T>(&self, message: impl Into<String>) -> TemplateResult<T> {
        Err(TemplateError::syntax(message, self.offset()))
    }

    fn unexpected<T>(&self, expected: &str) -> TemplateResult<T> {
        self.error(format!("unexpected {}, expected {}", describe(self.peek()), expected))
    }

    /// Go one nesting level deeper.
    fn descend(&mut self) -> TemplateResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.error(format!(
                "nesting too deep (more than {} levels)",
                MAX_NESTING_DEPTH
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> TemplateResult<T>,
    ) -> TemplateResult<T> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn check(&self, punct: Punct) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if self.check(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct, expected: &str) -> TemplateResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            self.unexpected(expected)
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        is_keyword(self.peek(), keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_variable(&mut self) -> TemplateResult<String> {
        match self.peek() {
            TokenKind::Variable(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.unexpected("a variable"),
        }
    }

    fn at_block_end(&self, end: BlockEnd) -> bool {
        match end {
            BlockEnd::Eof => false,
            BlockEnd::Brace => self.check(Punct::RBrace),
            BlockEnd::SwitchArm => {
                self.check(Punct::RBrace)
                    || self.check_keyword("case")
                    || self.check_keyword("default")
            }
        }
    }

    // Statements

    fn parse_statements(&mut self, end: BlockEnd) -> TemplateResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            if matches!(self.peek(), TokenKind::Eof) {
                if end == BlockEnd::Eof {
                    return Ok(body);
                }
                return self.error("unexpected end of template, expected '}'");
            }
            if self.at_block_end(end) {
                return Ok(body);
            }
            if let Some(stmt) = self.parse_statement()? {
                body.push(stmt);
            }
        }
    }

    /// Parse `{ statements }`.
    fn parse_block(&mut self) -> TemplateResult<Vec<Stmt>> {
        self.expect(Punct::LBrace, "'{'")?;
        let body = self.nested(|p| p.parse_statements(BlockEnd::Brace))?;
        self.expect(Punct::RBrace, "'}'")?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> TemplateResult<Option<Stmt>> {
        let stmt = match self.peek() {
            TokenKind::Text(text) => {
                let text = text.clone();
                self.advance();
                Stmt::Text(text)
            }
            TokenKind::CloseTag | TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                return Ok(None);
            }
            TokenKind::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "echo" => {
                    self.advance();
                    let exprs = self.parse_expr_list()?;
                    if exprs.is_empty() {
                        return self.unexpected("an expression");
                    }
                    self.end_statement()?;
                    Stmt::Echo(exprs)
                }
                "if" => self.parse_if()?,
                "foreach" => self.parse_foreach()?,
                "for" => self.parse_for()?,
                "switch" => self.parse_switch()?,
                "function" => self.parse_function()?,
                "break" => {
                    self.advance();
                    self.end_statement()?;
                    Stmt::Break
                }
                "continue" => {
                    self.advance();
                    self.end_statement()?;
                    Stmt::Continue
                }
                "return" => {
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.end_statement()?;
                    Stmt::Return(value)
                }
                _ => self.parse_expr_statement()?,
            },
            _ => self.parse_expr_statement()?,
        };
        Ok(Some(stmt))
    }

    fn parse_expr_statement(&mut self) -> TemplateResult<Stmt> {
        let expr = self.parse_expr()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Punct(Punct::Semicolon)
                | TokenKind::Punct(Punct::RBrace)
                | TokenKind::CloseTag
                | TokenKind::Eof
        )
    }

    /// A statement ends at `;`, at the close tag, or before a closing brace.
    fn end_statement(&mut self) -> TemplateResult<()> {
        match self.peek() {
            TokenKind::Punct(Punct::Semicolon) | TokenKind::CloseTag => {
                self.advance();
                Ok(())
            }
            TokenKind::Punct(Punct::RBrace) | TokenKind::Eof => Ok(()),
            _ => self.unexpected("';'"),
        }
    }

    fn parse_condition(&mut self) -> TemplateResult<Expr> {
        self.expect(Punct::LParen, "'('")?;
        let condition = self.parse_expr()?;
        self.expect(Punct::RParen, "')'")?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> TemplateResult<Stmt> {
        self.advance();
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        let mut branches = vec![(condition, body)];
        let mut else_branch = None;

        loop {
            if self.eat_keyword("elseif") {
                let condition = self.parse_condition()?;
                branches.push((condition, self.parse_block()?));
            } else if self.check_keyword("else") {
                self.advance();
                if self.eat_keyword("if") {
                    let condition = self.parse_condition()?;
                    branches.push((condition, self.parse_block()?));
                } else {
                    else_branch = Some(self.parse_block()?);
                    break;
                }
            } else {
                break;
            }
        }

        Ok(Stmt::If(IfStmt {
            branches,
            else_branch,
        }))
    }

    fn parse_foreach(&mut self) -> TemplateResult<Stmt> {
        self.advance();
        self.expect(Punct::LParen, "'('")?;
        let subject = self.parse_expr()?;
        if !self.eat_keyword("as") {
            return self.unexpected("'as'");
        }
        let first = self.expect_variable()?;
        let (key, value) = if self.eat(Punct::DoubleArrow) {
            (Some(first), self.expect_variable()?)
        } else {
            (None, first)
        };
        self.expect(Punct::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::Foreach(ForeachStmt {
            subject,
            key,
            value,
            body,
        }))
    }

    fn parse_for(&mut self) -> TemplateResult<Stmt> {
        self.advance();
        self.expect(Punct::LParen, "'('")?;
        let init = self.parse_expr_list()?;
        self.expect(Punct::Semicolon, "';'")?;
        let condition = self.parse_expr_list()?;
        self.expect(Punct::Semicolon, "';'")?;
        let step = self.parse_expr_list()?;
        self.expect(Punct::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::For(ForStmt {
            init,
            condition,
            step,
            body,
        }))
    }

    fn parse_switch(&mut self) -> TemplateResult<Stmt> {
        self.advance();
        let subject = self.parse_condition()?;
        self.expect(Punct::LBrace, "'{'")?;

        let mut arms = Vec::new();
        loop {
            let skip = match self.peek() {
                TokenKind::CloseTag | TokenKind::Punct(Punct::Semicolon) => true,
                TokenKind::Text(text) => arms.is_empty() && text.trim().is_empty(),
                _ => false,
            };
            if skip {
                self.advance();
                continue;
            }
            if self.eat(Punct::RBrace) {
                break;
            }

            let label = if self.eat_keyword("case") {
                Some(self.parse_expr()?)
            } else if self.eat_keyword("default") {
                None
            } else {
                return self.unexpected("'case' or 'default'");
            };
            self.expect_case_separator()?;
            let body = self.parse_statements(BlockEnd::SwitchArm)?;
            arms.push(SwitchArm { label, body });
        }

        Ok(Stmt::Switch(SwitchStmt { subject, arms }))
    }

    fn expect_case_separator(&mut self) -> TemplateResult<()> {
        if self.eat(Punct::Colon) || self.eat(Punct::Semicolon) {
            Ok(())
        } else {
            self.unexpected("':'")
        }
    }

    fn parse_function(&mut self) -> TemplateResult<Stmt> {
        self.advance();
        let name = match self.peek() {
            TokenKind::Ident(name) => name.to_ascii_lowercase(),
            _ => return self.unexpected("a function name"),
        };
        self.advance();

        self.expect(Punct::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(Punct::RParen) {
            let name = self.expect_variable()?;
            let default = if self.eat(Punct::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat(Punct::Comma) {
                break;
            }
        }
        self.expect(Punct::RParen, "')'")?;

        let body = self.parse_block()?;
        Ok(Stmt::Function(Arc::new(FunctionDef { name, params, body })))
    }

    // Expressions

    fn parse_expr(&mut self) -> TemplateResult<Expr> {
        self.nested(Self::parse_assignment)
    }

    /// Comma-separated expressions, possibly none.
    fn parse_expr_list(&mut self) -> TemplateResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        if self.at_statement_end() || self.check(Punct::RParen) {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.parse_expr()?);
            if !self.eat(Punct::Comma) {
                return Ok(exprs);
            }
        }
    }

    fn parse_assignment(&mut self) -> TemplateResult<Expr> {
        let offset = self.offset();
        let target = self.parse_ternary()?;

        let op = match self.peek() {
            TokenKind::Punct(Punct::Assign) => None,
            TokenKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(BinaryOp::Mod),
            TokenKind::Punct(Punct::DotAssign) => Some(BinaryOp::Concat),
            _ => return Ok(target),
        };
        if !target.is_place() {
            return Err(TemplateError::syntax("cannot assign to this expression", offset));
        }
        self.advance();
        let value = self.nested(Self::parse_assignment)?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_ternary(&mut self) -> TemplateResult<Expr> {
        let condition = self.parse_binary(0)?;
        if !self.eat(Punct::Question) {
            return Ok(condition);
        }
        let then = if self.eat(Punct::Colon) {
            None
        } else {
            let then = self.nested(Self::parse_assignment)?;
            self.expect(Punct::Colon, "':'")?;
            Some(Box::new(then))
        };
        let otherwise = self.nested(Self::parse_assignment)?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then,
            otherwise: Box::new(otherwise),
        })
    }

    fn infix(&self) -> Option<(Infix, u8, u8)> {
        let binary = |op, l, r| Some((Infix::Binary(op), l, r));
        match self.peek() {
            TokenKind::Punct(p) => match p {
                Punct::Coalesce => Some((Infix::Logical(LogicalOp::Coalesce), 7, 7)),
                Punct::OrOr => Some((Infix::Logical(LogicalOp::Or), 9, 10)),
                Punct::AndAnd => Some((Infix::Logical(LogicalOp::And), 11, 12)),
                Punct::EqEq => binary(BinaryOp::Eq, 13, 14),
                Punct::NotEq => binary(BinaryOp::NotEq, 13, 14),
                Punct::Identical => binary(BinaryOp::Identical, 13, 14),
                Punct::NotIdentical => binary(BinaryOp::NotIdentical, 13, 14),
                Punct::Lt => binary(BinaryOp::Lt, 15, 16),
                Punct::Le => binary(BinaryOp::Le, 15, 16),
                Punct::Gt => binary(BinaryOp::Gt, 15, 16),
                Punct::Ge => binary(BinaryOp::Ge, 15, 16),
                Punct::Dot => binary(BinaryOp::Concat, 17, 18),
                Punct::Plus => binary(BinaryOp::Add, 19, 20),
                Punct::Minus => binary(BinaryOp::Sub, 19, 20),
                Punct::Star => binary(BinaryOp::Mul, 21, 22),
                Punct::Slash => binary(BinaryOp::Div, 21, 22),
                Punct::Percent => binary(BinaryOp::Mod, 21, 22),
                _ => None,
            },
            kind if is_keyword(kind, "or") => Some((Infix::Logical(LogicalOp::Or), 9, 10)),
            kind if is_keyword(kind, "and") => Some((Infix::Logical(LogicalOp::And), 11, 12)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_bp: u8) -> TemplateResult<Expr> {
        let mut lhs = self.parse_unary()?;
        // Each operator in a chain nests the tree one level deeper
        let depth = self.depth;
        while let Some((op, l_bp, r_bp)) = self.infix() {
            if l_bp < min_bp {
                break;
            }
            self.descend()?;
            self.advance();
            let rhs = Box::new(self.parse_binary(r_bp)?);
            let lhs_box = Box::new(lhs);
            lhs = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    lhs: lhs_box,
                    rhs,
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    lhs: lhs_box,
                    rhs,
                },
            };
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> TemplateResult<Expr> {
        let op = match self.peek() {
            TokenKind::Punct(Punct::Bang) => UnaryOp::Not,
            TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
            TokenKind::Punct(Punct::Increment | Punct::Decrement) => {
                let increment = self.check(Punct::Increment);
                self.advance();
                let offset = self.offset();
                let target = self.nested(Self::parse_unary)?;
                if !target.is_place() {
                    return Err(TemplateError::syntax(
                        "cannot increment or decrement this expression",
                        offset,
                    ));
                }
                return Ok(Expr::IncDec {
                    target: Box::new(target),
                    increment,
                    prefix: true,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_primary()?;
        let depth = self.depth;
        loop {
            match self.peek() {
                TokenKind::Punct(Punct::LBracket) => {
                    self.descend()?;
                    self.advance();
                    let index = if self.check(Punct::RBracket) {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    self.expect(Punct::RBracket, "']'")?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index,
                    };
                }
                TokenKind::Punct(Punct::Arrow) => {
                    self.descend()?;
                    self.advance();
                    let name = match self.peek() {
                        TokenKind::Ident(name) => name.clone(),
                        _ => return self.unexpected("a property name"),
                    };
                    self.advance();
                    if self.check(Punct::LParen) {
                        return self.error("method calls are not supported");
                    }
                    expr = Expr::Member {
                        base: Box::new(expr),
                        name,
                    };
                }
                TokenKind::Punct(p @ (Punct::Increment | Punct::Decrement))
                    if expr.is_place() =>
                {
                    let increment = *p == Punct::Increment;
                    self.descend()?;
                    self.advance();
                    expr = Expr::IncDec {
                        target: Box::new(expr),
                        increment,
                        prefix: false,
                    };
                }
                _ => {
                    self.depth = depth;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> TemplateResult<Expr> {
        let expr = match self.peek().clone() {
            TokenKind::Variable(name) => {
                self.advance();
                Expr::Variable(name)
            }
            TokenKind::Int(i) => {
                self.advance();
                Expr::Literal(Value::Int(i))
            }
            TokenKind::Float(f) => {
                self.advance();
                Expr::Literal(Value::Float(f))
            }
            TokenKind::Str(s) => {
                self.advance();
                Expr::Literal(Value::String(s))
            }
            TokenKind::Template(parts) => {
                self.advance();
                Expr::Interpolated(parts)
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Punct::RParen, "')'")?;
                inner
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                Expr::Array(self.parse_array_items(Punct::RBracket)?)
            }
            TokenKind::Ident(word) => self.parse_identifier(&word)?,
            _ => return self.unexpected("an expression"),
        };
        Ok(expr)
    }

    fn parse_identifier(&mut self, word: &str) -> TemplateResult<Expr> {
        let lower = word.to_ascii_lowercase();
        let literal = match lower.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal(value));
        }

        if !matches!(self.peek_at(1), TokenKind::Punct(Punct::LParen)) {
            return self.error(format!("unexpected identifier '{}'", word));
        }
        self.advance();
        self.advance();

        match lower.as_str() {
            "array" => Ok(Expr::Array(self.parse_array_items(Punct::RParen)?)),
            "isset" => {
                let args = self.parse_call_args()?;
                if args.is_empty() {
                    return self.error("isset() expects at least one argument");
                }
                Ok(Expr::Isset(args))
            }
            "empty" => {
                let mut args = self.parse_call_args()?;
                if args.len() != 1 {
                    return self.error("empty() expects exactly one argument");
                }
                Ok(Expr::Empty(Box::new(args.remove(0))))
            }
            _ => Ok(Expr::Call {
                name: lower,
                args: self.parse_call_args()?,
            }),
        }
    }

    /// Arguments after an already-consumed `(`, through the closing `)`.
    fn parse_call_args(&mut self) -> TemplateResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.check(Punct::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat(Punct::Comma) {
                break;
            }
        }
        self.expect(Punct::RParen, "')'")?;
        Ok(args)
    }

    /// Array items after an already-consumed opener, through `close`.
    fn parse_array_items(&mut self, close: Punct) -> TemplateResult<Vec<(Option<Expr>, Expr)>> {
        let mut items = Vec::new();
        while !self.check(close) {
            let first = self.parse_expr()?;
            if self.eat(Punct::DoubleArrow) {
                items.push((Some(first), self.parse_expr()?));
            } else {
                items.push((None, first));
            }
            if !self.eat(Punct::Comma) {
                break;
            }
        }
        self.expect(close, if close == Punct::RParen { "')'" } else { "']'" })?;
        Ok(items)
    }
}

fn is_keyword(kind: &TokenKind, keyword: &str) -> bool {
    matches!(kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Text(_) => "template text".to_string(),
        TokenKind::CloseTag => "'?>'".to_string(),
        TokenKind::Variable(name) => format!("variable ${}", name),
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Int(i) => format!("number {}", i),
        TokenKind::Float(f) => format!("number {}", f),
        TokenKind::Str(_) | TokenKind::Template(_) => "string".to_string(),
        TokenKind::Punct(p) => format!("{:?}", p),
        TokenKind::Eof => "end of template".to_string(),
    }
}
