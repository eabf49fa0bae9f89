//! Recursive-descent parser.
//!
//! Grammar summary (semicolons optional everywhere a statement ends):
//!
//! ```text
//! program  := stat*
//! stat     := let | funcdecl | if | while | for | foreach | return
//!           | break | continue | defer | block | exprstat
//! let      := ("let" | "const") name ("," name)* ("=" exprlist)?
//! funcdecl := "function" name ("." name)* "(" params ")" block
//! if       := "if" "(" expr ")" block
//!             (("elif" | "else" "if") "(" expr ")" block)*
//!             ("else" block)?
//! for      := "for" "(" simplestat? ";" expr? ";" simplestat? ")" block
//! foreach  := "foreach" "(" name ("," name)* "in" expr ")" block
//! exprstat := exprlist ("=" exprlist)? | expr ("+="|"-="|…) expr
//!           | expr "++" | expr "--"
//! ```
//!
//! Expression precedence, loosest first: `?:`, `||`, `&&`, `== !=`,
//! `< <= > >=`, `|`, `^`, `&`, `<< >>`, `+ -`, `* / %`, unary `- ! ~ #`,
//! `**` (right-associative), postfix call/index/member/method.

use sable_core::{Error, Result, SourceLocation};

use crate::ast::*;
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};

/// Parses a chunk into a [`Program`].
pub fn parse(source: &str, chunk_name: &str) -> Result<Program> {
    let tokens = tokenize(source, chunk_name)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        chunk_name: chunk_name.to_string(),
    };
    let block = parser.block_until(&[TokenKind::Eof])?;
    parser.expect(TokenKind::Eof)?;
    Ok(Program { block })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    chunk_name: String,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn span(&self) -> Span {
        let token = self.current();
        Span {
            line: token.line,
            column: token.column,
        }
    }

    fn location(&self) -> SourceLocation {
        let token = self.current();
        SourceLocation::new(self.chunk_name.clone(), token.line, token.column)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(Error::syntax(
                format!("expected '{}', found '{}'", kind, self.kind()),
                self.location(),
            ))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.kind().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(Error::syntax(
                format!("expected a name, found '{other}'"),
                self.location(),
            )),
        }
    }

    // ----- statements -----

    fn block_until(&mut self, terminators: &[TokenKind]) -> Result<Block> {
        let mut stats = Vec::new();
        loop {
            while self.eat(&TokenKind::Semi) {}
            if terminators.iter().any(|t| self.check(t)) {
                return Ok(Block { stats });
            }
            stats.push(self.statement()?);
        }
    }

    fn braced_block(&mut self) -> Result<Block> {
        self.expect(TokenKind::LBrace)?;
        let block = self.block_until(&[TokenKind::RBrace])?;
        self.expect(TokenKind::RBrace)?;
        Ok(block)
    }

    fn statement(&mut self) -> Result<Stat> {
        let span = self.span();
        let kind = match self.kind() {
            TokenKind::KwLet => {
                self.advance();
                self.let_statement(false)?
            }
            TokenKind::KwConst => {
                self.advance();
                self.let_statement(true)?
            }
            TokenKind::KwFunction if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Name(_))) => {
                self.advance();
                self.function_declaration()?
            }
            TokenKind::KwIf => {
                self.advance();
                self.if_statement()?
            }
            TokenKind::KwWhile => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                let body = self.braced_block()?;
                StatKind::While { cond, body }
            }
            TokenKind::KwFor => {
                self.advance();
                self.for_statement()?
            }
            TokenKind::KwForeach => {
                self.advance();
                self.foreach_statement()?
            }
            TokenKind::KwReturn => {
                self.advance();
                let values = if self.check(&TokenKind::Semi)
                    || self.check(&TokenKind::RBrace)
                    || self.check(&TokenKind::Eof)
                {
                    Vec::new()
                } else {
                    self.expression_list()?
                };
                StatKind::Return { values }
            }
            TokenKind::KwBreak => {
                self.advance();
                StatKind::Break
            }
            TokenKind::KwContinue => {
                self.advance();
                StatKind::Continue
            }
            TokenKind::KwDefer => {
                self.advance();
                let body = self.braced_block()?;
                StatKind::Defer { body }
            }
            TokenKind::LBrace => {
                let body = self.braced_block()?;
                StatKind::Scope { body }
            }
            _ => self.expression_statement()?,
        };
        Ok(Stat { kind, span })
    }

    fn let_statement(&mut self, is_const: bool) -> Result<StatKind> {
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let inits = if self.eat(&TokenKind::Assign) {
            self.expression_list()?
        } else if is_const {
            return Err(Error::syntax(
                "'const' declaration requires an initializer",
                self.location(),
            ));
        } else {
            Vec::new()
        };
        Ok(StatKind::Let {
            names,
            is_const,
            inits,
        })
    }

    fn function_declaration(&mut self) -> Result<StatKind> {
        let name = self.expect_name()?;
        let mut path = Vec::new();
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_name()?);
        }
        let display_name = if path.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", name, path.join("."))
        };
        let func = self.function_body(Some(display_name))?;
        Ok(StatKind::FuncDecl { name, path, func })
    }

    fn function_body(&mut self, name: Option<String>) -> Result<FuncDef> {
        let span = self.span();
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.braced_block()?;
        Ok(FuncDef {
            params,
            is_vararg,
            body,
            name,
            span,
        })
    }

    fn if_statement(&mut self) -> Result<StatKind> {
        let mut arms = Vec::new();
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        arms.push((cond, self.braced_block()?));

        let mut else_block = None;
        loop {
            if self.eat(&TokenKind::KwElif) {
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                arms.push((cond, self.braced_block()?));
            } else if self.eat(&TokenKind::KwElse) {
                if self.eat(&TokenKind::KwIf) {
                    self.expect(TokenKind::LParen)?;
                    let cond = self.expression()?;
                    self.expect(TokenKind::RParen)?;
                    arms.push((cond, self.braced_block()?));
                } else {
                    else_block = Some(self.braced_block()?);
                    break;
                }
            } else {
                break;
            }
        }
        Ok(StatKind::If { arms, else_block })
    }

    fn for_statement(&mut self) -> Result<StatKind> {
        self.expect(TokenKind::LParen)?;
        let init = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect(TokenKind::Semi)?;
        let cond = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::Semi)?;
        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect(TokenKind::RParen)?;
        let body = self.braced_block()?;
        Ok(StatKind::ForC {
            init,
            cond,
            update,
            body,
        })
    }

    /// Statement forms allowed inside a `for` header.
    fn simple_statement(&mut self) -> Result<Stat> {
        let span = self.span();
        let kind = match self.kind() {
            TokenKind::KwLet => {
                self.advance();
                self.let_statement(false)?
            }
            TokenKind::KwConst => {
                self.advance();
                self.let_statement(true)?
            }
            _ => self.expression_statement()?,
        };
        Ok(Stat { kind, span })
    }

    fn foreach_statement(&mut self) -> Result<StatKind> {
        self.expect(TokenKind::LParen)?;
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::KwIn)?;
        let iter = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.braced_block()?;
        Ok(StatKind::ForEach { names, iter, body })
    }

    fn expression_statement(&mut self) -> Result<StatKind> {
        let first = self.expression()?;

        // Multi-assignment: a, b = e1, e2
        if self.check(&TokenKind::Comma) {
            let mut targets = vec![first];
            while self.eat(&TokenKind::Comma) {
                targets.push(self.expression()?);
            }
            self.expect(TokenKind::Assign)?;
            for target in &targets {
                self.require_lvalue(target)?;
            }
            let values = self.expression_list()?;
            return Ok(StatKind::Assign { targets, values });
        }

        match self.kind().clone() {
            TokenKind::Assign => {
                self.advance();
                self.require_lvalue(&first)?;
                let values = self.expression_list()?;
                Ok(StatKind::Assign {
                    targets: vec![first],
                    values,
                })
            }
            TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign => {
                let op = match self.advance().kind {
                    TokenKind::PlusAssign => BinOp::Add,
                    TokenKind::MinusAssign => BinOp::Sub,
                    TokenKind::StarAssign => BinOp::Mul,
                    TokenKind::SlashAssign => BinOp::Div,
                    TokenKind::PercentAssign => BinOp::Mod,
                    _ => unreachable!("compound operator token"),
                };
                self.require_lvalue(&first)?;
                let value = self.expression()?;
                Ok(StatKind::Compound {
                    target: first,
                    op,
                    value,
                })
            }
            TokenKind::PlusPlus => {
                self.advance();
                self.require_lvalue(&first)?;
                Ok(StatKind::Increment { target: first })
            }
            TokenKind::MinusMinus => {
                self.advance();
                self.require_lvalue(&first)?;
                Ok(StatKind::Decrement { target: first })
            }
            _ => Ok(StatKind::ExprStat { expr: first }),
        }
    }

    fn require_lvalue(&self, expr: &Expr) -> Result<()> {
        if expr.is_lvalue() {
            Ok(())
        } else {
            Err(Error::syntax(
                "expression is not assignable",
                SourceLocation::new(self.chunk_name.clone(), expr.span.line, expr.span.column),
            ))
        }
    }

    fn expression_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![self.expression()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    // ----- expressions -----

    fn expression(&mut self) -> Result<Expr> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<Expr> {
        let span = self.span();
        let cond = self.binary(0)?;
        if self.eat(&TokenKind::Question) {
            let then_value = self.expression()?;
            self.expect(TokenKind::Colon)?;
            let else_value = self.ternary()?;
            return Ok(Expr {
                kind: ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_value: Box::new(then_value),
                    else_value: Box::new(else_value),
                },
                span,
            });
        }
        Ok(cond)
    }

    /// Binary operator for the current token at `level`, if any.
    fn binary_op_at(&self, level: usize) -> Option<BinOp> {
        let op = match (level, self.kind()) {
            (0, TokenKind::OrOr) => BinOp::Or,
            (1, TokenKind::AndAnd) => BinOp::And,
            (2, TokenKind::EqEq) => BinOp::Eq,
            (2, TokenKind::NotEq) => BinOp::Ne,
            (3, TokenKind::Lt) => BinOp::Lt,
            (3, TokenKind::Le) => BinOp::Le,
            (3, TokenKind::Gt) => BinOp::Gt,
            (3, TokenKind::Ge) => BinOp::Ge,
            (4, TokenKind::Pipe) => BinOp::BitOr,
            (5, TokenKind::Caret) => BinOp::BitXor,
            (6, TokenKind::Amp) => BinOp::BitAnd,
            (7, TokenKind::Shl) => BinOp::Shl,
            (7, TokenKind::Shr) => BinOp::Shr,
            (8, TokenKind::Plus) => BinOp::Add,
            (8, TokenKind::Minus) => BinOp::Sub,
            (9, TokenKind::Star) => BinOp::Mul,
            (9, TokenKind::Slash) => BinOp::Div,
            (9, TokenKind::Percent) => BinOp::Mod,
            _ => return None,
        };
        Some(op)
    }

    const MAX_BINARY_LEVEL: usize = 9;

    fn binary(&mut self, level: usize) -> Result<Expr> {
        if level > Self::MAX_BINARY_LEVEL {
            return self.unary();
        }
        let span = self.span();
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.binary_op_at(level) {
            self.advance();
            let rhs = self.binary(level + 1)?;
            lhs = Expr {
                kind: ExprKind::Bin {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let span = self.span();
        let op = match self.kind() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Un {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let span = self.span();
        let lhs = self.postfix()?;
        if self.eat(&TokenKind::StarStar) {
            // Right-associative; the exponent may itself be unary.
            let rhs = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Bin {
                    op: BinOp::Pow,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            });
        }
        Ok(lhs)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            let span = self.span();
            match self.kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.call_arguments()?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.expression()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(key),
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        span,
                    };
                }
                TokenKind::Colon => {
                    // Only method calls: `obj:m(args)`.
                    if !matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.kind),
                        Some(TokenKind::Name(_))
                    ) {
                        break;
                    }
                    self.advance();
                    let method = self.expect_name()?;
                    self.expect(TokenKind::LParen)?;
                    let args = self.call_arguments()?;
                    expr = Expr {
                        kind: ExprKind::MethodCall {
                            object: Box::new(expr),
                            method,
                            args,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args = self.expression_list()?;
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let span = self.span();
        let kind = match self.kind().clone() {
            TokenKind::KwNil => {
                self.advance();
                ExprKind::Nil
            }
            TokenKind::KwTrue => {
                self.advance();
                ExprKind::True
            }
            TokenKind::KwFalse => {
                self.advance();
                ExprKind::False
            }
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExprKind::Vararg
            }
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::KwFunction => {
                self.advance();
                ExprKind::Function(self.function_body(None)?)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                ExprKind::Paren(Box::new(inner))
            }
            TokenKind::LBrace => {
                self.advance();
                self.table_constructor()?
            }
            other => {
                return Err(Error::syntax(
                    format!("unexpected '{other}' in expression"),
                    self.location(),
                ))
            }
        };
        Ok(Expr { kind, span })
    }

    fn table_constructor(&mut self) -> Result<ExprKind> {
        let mut items = Vec::new();
        loop {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.eat(&TokenKind::Ellipsis) {
                items.push(TableItem::Spread);
                self.eat(&TokenKind::Comma);
                if !self.check(&TokenKind::RBrace) {
                    return Err(Error::syntax(
                        "vararg expansion must be the last element of a table constructor",
                        self.location(),
                    ));
                }
                break;
            }
            if self.check(&TokenKind::LBracket) {
                self.advance();
                let key = self.expression()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.expression()?;
                items.push(TableItem::Keyed { key, value });
            } else if matches!(self.kind(), TokenKind::Name(_))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::Assign)
                )
            {
                let name = self.expect_name()?;
                self.expect(TokenKind::Assign)?;
                let value = self.expression()?;
                items.push(TableItem::Named { name, value });
            } else {
                items.push(TableItem::Positional(self.expression()?));
            }
            if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(ExprKind::Table(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source, "test").unwrap()
    }

    #[test]
    fn parses_fibonacci() {
        let program = parse_ok(
            "function f(n) { if (n<2) { return n } return f(n-1)+f(n-2) } return f(10)",
        );
        assert_eq!(program.block.stats.len(), 2);
        assert!(matches!(
            program.block.stats[0].kind,
            StatKind::FuncDecl { .. }
        ));
        assert!(matches!(program.block.stats[1].kind, StatKind::Return { .. }));
    }

    #[test]
    fn precedence_binds_mul_before_add() {
        let program = parse_ok("return 1 + 2 * 3");
        let StatKind::Return { values } = &program.block.stats[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Bin { op, rhs, .. } = &values[0].kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Bin { op: BinOp::Mul, .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let program = parse_ok("return 2 ** 3 ** 2");
        let StatKind::Return { values } = &program.block.stats[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Bin { op, rhs, .. } = &values[0].kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Pow);
        assert!(matches!(rhs.kind, ExprKind::Bin { op: BinOp::Pow, .. }));
    }

    #[test]
    fn table_constructor_forms() {
        let program = parse_ok(r#"let t = { 1, 2, v = 3, [4] = "x" }"#);
        let StatKind::Let { inits, .. } = &program.block.stats[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Table(items) = &inits[0].kind else {
            panic!("expected table");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(items[0], TableItem::Positional(_)));
        assert!(matches!(items[2], TableItem::Named { .. }));
        assert!(matches!(items[3], TableItem::Keyed { .. }));
    }

    #[test]
    fn vararg_must_be_last_in_table() {
        let err = parse("function f(...) { let t = { ..., 1 } }", "test").unwrap_err();
        assert_eq!(err.kind, sable_core::ErrorKind::Syntax);
        assert!(err.message.contains("last element"));
    }

    #[test]
    fn method_call_sugar() {
        let program = parse_ok("obj:method(1, 2)");
        let StatKind::ExprStat { expr } = &program.block.stats[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::MethodCall { method, args, .. } = &expr.kind else {
            panic!("expected method call");
        };
        assert_eq!(method, "method");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn c_style_for_with_increment() {
        let program = parse_ok("for (let i=0; i<100; i++) { let tmp = {i, i*2} }");
        let StatKind::ForC {
            init, cond, update, ..
        } = &program.block.stats[0].kind
        else {
            panic!("expected for");
        };
        assert!(init.is_some());
        assert!(cond.is_some());
        assert!(matches!(
            update.as_ref().unwrap().kind,
            StatKind::Increment { .. }
        ));
    }

    #[test]
    fn foreach_names_and_iterator() {
        let program = parse_ok("foreach (k, v in pairs(t)) { print(k, v) }");
        let StatKind::ForEach { names, .. } = &program.block.stats[0].kind else {
            panic!("expected foreach");
        };
        assert_eq!(names, &["k".to_string(), "v".to_string()]);
    }

    #[test]
    fn multi_assignment_requires_lvalues() {
        assert!(parse("a, b = 1, 2", "t").is_ok());
        let err = parse("a + 1 = 2", "t").unwrap_err();
        assert!(err.message.contains("not assignable"));
    }

    #[test]
    fn error_location_is_inside_the_file() {
        let source = "let x = 1\nlet y = @";
        let err = parse(source, "chunk").unwrap_err();
        let loc = err.location.unwrap();
        assert_eq!(loc.line, 2);
        assert_eq!(loc.source, "chunk");
    }

    #[test]
    fn ternary_and_logical_operators() {
        let program = parse_ok("return a && b || c ? 1 : 2");
        let StatKind::Return { values } = &program.block.stats[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(values[0].kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn const_requires_initializer() {
        let err = parse("const x", "t").unwrap_err();
        assert!(err.message.contains("initializer"));
    }
}
