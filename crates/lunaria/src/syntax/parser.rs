// Recursive-descent parser. One token of lookahead, precedence climbing
// for binary expressions.

use smol_str::SmolStr;

use super::ast::*;
use super::{CompileError, Lexer, Token};

/// Parse a whole source string into a Block.
pub fn parse(source: &str, chunk_name: &str) -> Result<Block, CompileError> {
    let mut p = Parser::new(source, chunk_name)?;
    let block = p.block()?;
    p.expect_token(Token::Eof)?;
    Ok(block)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    line: u32,
    chunk_name: &'a str,
    depth: u32,
}

/// Nesting ceiling for the recursive descent, keeping host stack use
/// bounded on hostile input.
const MAX_PARSE_DEPTH: u32 = 200;

// Binary operator priorities, (left, right). Right < left means
// right-associative.
fn bin_priority(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 1),
        BinOp::And => (2, 2),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (3, 3),
        BinOp::Concat => (9, 8),
        BinOp::Add | BinOp::Sub => (10, 10),
        BinOp::Mul | BinOp::Div | BinOp::Mod => (11, 11),
        BinOp::Pow => (14, 13),
    }
}

const UNARY_PRIORITY: u8 = 12;

fn token_bin_op(t: &Token) -> Option<BinOp> {
    Some(match t {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::Percent => BinOp::Mod,
        Token::Caret => BinOp::Pow,
        Token::Concat => BinOp::Concat,
        Token::Eq => BinOp::Eq,
        Token::Ne => BinOp::Ne,
        Token::Lt => BinOp::Lt,
        Token::Le => BinOp::Le,
        Token::Gt => BinOp::Gt,
        Token::Ge => BinOp::Ge,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, chunk_name: &'a str) -> Result<Parser<'a>, CompileError> {
        let mut lexer = Lexer::new(source, chunk_name);
        let (current, line) = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current,
            line,
            chunk_name,
            depth: 0,
        })
    }

    fn enter_level(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(self.error("too many syntax levels"));
        }
        Ok(())
    }

    fn error(&self, msg: impl AsRef<str>) -> CompileError {
        CompileError::new(
            self.chunk_name,
            self.line,
            format!("{} near '{}'", msg.as_ref(), self.current.describe()),
        )
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        let (next, line) = self.lexer.next_token()?;
        self.line = line;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn check(&self, t: &Token) -> bool {
        self.current == *t
    }

    fn accept(&mut self, t: &Token) -> Result<bool, CompileError> {
        if self.check(t) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_token(&mut self, t: Token) -> Result<(), CompileError> {
        if self.current == t {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("'{}' expected", t.describe())))
        }
    }

    fn expect_name(&mut self) -> Result<SmolStr, CompileError> {
        match &self.current {
            Token::Name(_) => {
                let Token::Name(s) = self.advance()? else {
                    unreachable!()
                };
                Ok(s)
            }
            _ => Err(self.error("<name> expected")),
        }
    }

    fn block_follows(&self) -> bool {
        matches!(
            self.current,
            Token::End | Token::Else | Token::Elseif | Token::Until | Token::Eof
        )
    }

    fn block(&mut self) -> Result<Block, CompileError> {
        let mut stats = Vec::new();
        loop {
            if self.block_follows() {
                break;
            }
            if self.check(&Token::Return) {
                stats.push(self.return_stat()?);
                break;
            }
            if let Some(stat) = self.statement()? {
                stats.push(stat);
            }
        }
        Ok(Block { stats })
    }

    fn statement(&mut self) -> Result<Option<Stat>, CompileError> {
        self.enter_level()?;
        let r = self.statement_inner();
        self.depth -= 1;
        r
    }

    fn statement_inner(&mut self) -> Result<Option<Stat>, CompileError> {
        let line = self.line;
        match &self.current {
            Token::Semi => {
                self.advance()?;
                Ok(None)
            }
            Token::If => Ok(Some(self.if_stat()?)),
            Token::While => Ok(Some(self.while_stat(line)?)),
            Token::Do => {
                self.advance()?;
                let body = self.block()?;
                self.expect_token(Token::End)?;
                Ok(Some(Stat::Do { body }))
            }
            Token::For => Ok(Some(self.for_stat(line)?)),
            Token::Repeat => Ok(Some(self.repeat_stat(line)?)),
            Token::Function => Ok(Some(self.function_stat(line)?)),
            Token::Local => Ok(Some(self.local_stat(line)?)),
            Token::DoubleColon => {
                self.advance()?;
                let name = self.expect_name()?;
                self.expect_token(Token::DoubleColon)?;
                Ok(Some(Stat::Label { name, line }))
            }
            Token::Break => {
                self.advance()?;
                Ok(Some(Stat::Break { line }))
            }
            Token::Goto => {
                self.advance()?;
                let label = self.expect_name()?;
                Ok(Some(Stat::Goto { label, line }))
            }
            _ => Ok(Some(self.expr_stat(line)?)),
        }
    }

    fn return_stat(&mut self) -> Result<Stat, CompileError> {
        let line = self.line;
        self.advance()?; // return
        let exprs = if self.block_follows() || self.check(&Token::Semi) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        let _ = self.accept(&Token::Semi)?;
        Ok(Stat::Return { exprs, line })
    }

    fn if_stat(&mut self) -> Result<Stat, CompileError> {
        let mut arms = Vec::new();
        self.advance()?; // if
        let cond = self.expression()?;
        self.expect_token(Token::Then)?;
        arms.push((cond, self.block()?));
        let mut else_body = None;
        loop {
            match self.current {
                Token::Elseif => {
                    self.advance()?;
                    let cond = self.expression()?;
                    self.expect_token(Token::Then)?;
                    arms.push((cond, self.block()?));
                }
                Token::Else => {
                    self.advance()?;
                    else_body = Some(self.block()?);
                    self.expect_token(Token::End)?;
                    break;
                }
                Token::End => {
                    self.advance()?;
                    break;
                }
                _ => return Err(self.error("'end' expected")),
            }
        }
        Ok(Stat::If { arms, else_body })
    }

    fn while_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        self.advance()?; // while
        let cond = self.expression()?;
        self.expect_token(Token::Do)?;
        let body = self.block()?;
        self.expect_token(Token::End)?;
        Ok(Stat::While { cond, body, line })
    }

    fn repeat_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        self.advance()?; // repeat
        let body = self.block()?;
        self.expect_token(Token::Until)?;
        let cond = self.expression()?;
        Ok(Stat::Repeat { body, cond, line })
    }

    fn for_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        self.advance()?; // for
        let first = self.expect_name()?;
        if self.accept(&Token::Assign)? {
            let start = self.expression()?;
            self.expect_token(Token::Comma)?;
            let limit = self.expression()?;
            let step = if self.accept(&Token::Comma)? {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect_token(Token::Do)?;
            let body = self.block()?;
            self.expect_token(Token::End)?;
            return Ok(Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
                line,
            });
        }
        let mut names = vec![first];
        while self.accept(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect_token(Token::In)?;
        let exprs = self.expr_list()?;
        self.expect_token(Token::Do)?;
        let body = self.block()?;
        self.expect_token(Token::End)?;
        Ok(Stat::GenericFor {
            names,
            exprs,
            body,
            line,
        })
    }

    /// `function a.b.c:m(...) ... end` desugars to an assignment; a method
    /// form adds an implicit leading `self` parameter.
    fn function_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        self.advance()?; // function
        let first = self.expect_name()?;
        let mut display = first.to_string();
        let mut target = Expr::new(ExprKind::Name(first), line);
        let mut is_method = false;
        loop {
            if self.accept(&Token::Dot)? {
                let field = self.expect_name()?;
                display.push('.');
                display.push_str(&field);
                let key = Expr::new(ExprKind::Str(field), self.line);
                target = Expr::new(ExprKind::Index(Box::new(target), Box::new(key)), line);
            } else if self.accept(&Token::Colon)? {
                let field = self.expect_name()?;
                display.push(':');
                display.push_str(&field);
                let key = Expr::new(ExprKind::Str(field), self.line);
                target = Expr::new(ExprKind::Index(Box::new(target), Box::new(key)), line);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let mut body = self.func_body(line, Some(SmolStr::new(&display)))?;
        if is_method {
            body.params.insert(0, SmolStr::new("self"));
        }
        let value = Expr::new(ExprKind::Function(Box::new(body)), line);
        Ok(Stat::Assign {
            targets: vec![target],
            values: vec![value],
            line,
        })
    }

    fn local_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        self.advance()?; // local
        if self.accept(&Token::Function)? {
            let name = self.expect_name()?;
            let body = self.func_body(line, Some(name.clone()))?;
            return Ok(Stat::LocalFunction { name, body, line });
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        let values = if self.accept(&Token::Assign)? {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local {
            names,
            values,
            line,
        })
    }

    fn expr_stat(&mut self, line: u32) -> Result<Stat, CompileError> {
        let first = self.suffixed_expr()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![first];
            while self.accept(&Token::Comma)? {
                targets.push(self.suffixed_expr()?);
            }
            for t in &targets {
                if !matches!(t.kind, ExprKind::Name(_) | ExprKind::Index(..)) {
                    return Err(self.error("syntax error: cannot assign to this expression"));
                }
            }
            self.expect_token(Token::Assign)?;
            let values = self.expr_list()?;
            return Ok(Stat::Assign {
                targets,
                values,
                line,
            });
        }
        if !matches!(first.kind, ExprKind::Call(..) | ExprKind::MethodCall(..)) {
            return Err(self.error("syntax error"));
        }
        Ok(Stat::Call { expr: first })
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut list = vec![self.expression()?];
        while self.accept(&Token::Comma)? {
            list.push(self.expression()?);
        }
        Ok(list)
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.sub_expression(0)
    }

    fn sub_expression(&mut self, limit: u8) -> Result<Expr, CompileError> {
        self.enter_level()?;
        let r = self.sub_expression_inner(limit);
        self.depth -= 1;
        r
    }

    fn sub_expression_inner(&mut self, limit: u8) -> Result<Expr, CompileError> {
        let line = self.line;
        let mut left = if let Some(unop) = match self.current {
            Token::Minus => Some(UnOp::Neg),
            Token::Not => Some(UnOp::Not),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        } {
            self.advance()?;
            let operand = self.sub_expression(UNARY_PRIORITY)?;
            Expr::new(ExprKind::UnOp(unop, Box::new(operand)), line)
        } else {
            self.simple_expr()?
        };
        while let Some(op) = token_bin_op(&self.current) {
            let (lp, rp) = bin_priority(op);
            if lp <= limit {
                break;
            }
            let op_line = self.line;
            self.advance()?;
            let right = self.sub_expression(rp)?;
            left = Expr::new(ExprKind::BinOp(op, Box::new(left), Box::new(right)), op_line);
        }
        Ok(left)
    }

    fn simple_expr(&mut self) -> Result<Expr, CompileError> {
        let line = self.line;
        let kind = match &self.current {
            Token::Nil => {
                self.advance()?;
                ExprKind::Nil
            }
            Token::True => {
                self.advance()?;
                ExprKind::True
            }
            Token::False => {
                self.advance()?;
                ExprKind::False
            }
            Token::Ellipsis => {
                self.advance()?;
                ExprKind::Vararg
            }
            Token::Number(_) => {
                let Token::Number(n) = self.advance()? else {
                    unreachable!()
                };
                ExprKind::Number(n)
            }
            Token::Str(_) => {
                let Token::Str(s) = self.advance()? else {
                    unreachable!()
                };
                ExprKind::Str(s)
            }
            Token::Function => {
                self.advance()?;
                let body = self.func_body(line, None)?;
                ExprKind::Function(Box::new(body))
            }
            Token::LBrace => return self.table_constructor(),
            _ => return self.suffixed_expr(),
        };
        Ok(Expr::new(kind, line))
    }

    fn primary_expr(&mut self) -> Result<Expr, CompileError> {
        let line = self.line;
        match &self.current {
            Token::Name(_) => {
                let Token::Name(n) = self.advance()? else {
                    unreachable!()
                };
                Ok(Expr::new(ExprKind::Name(n), line))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.expression()?;
                self.expect_token(Token::RParen)?;
                Ok(Expr::new(ExprKind::Paren(Box::new(inner)), line))
            }
            _ => Err(self.error("unexpected symbol")),
        }
    }

    fn suffixed_expr(&mut self) -> Result<Expr, CompileError> {
        let mut e = self.primary_expr()?;
        loop {
            let line = self.line;
            match &self.current {
                Token::Dot => {
                    self.advance()?;
                    let field = self.expect_name()?;
                    let key = Expr::new(ExprKind::Str(field), line);
                    e = Expr::new(ExprKind::Index(Box::new(e), Box::new(key)), line);
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect_token(Token::RBracket)?;
                    e = Expr::new(ExprKind::Index(Box::new(e), Box::new(key)), line);
                }
                Token::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let args = self.call_args()?;
                    e = Expr::new(ExprKind::MethodCall(Box::new(e), method, args), line);
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    let args = self.call_args()?;
                    e = Expr::new(ExprKind::Call(Box::new(e), args), line);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let line = self.line;
        match &self.current {
            Token::LParen => {
                self.advance()?;
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect_token(Token::RParen)?;
                Ok(args)
            }
            Token::Str(_) => {
                let Token::Str(s) = self.advance()? else {
                    unreachable!()
                };
                Ok(vec![Expr::new(ExprKind::Str(s), line)])
            }
            Token::LBrace => Ok(vec![self.table_constructor()?]),
            _ => Err(self.error("function arguments expected")),
        }
    }

    fn table_constructor(&mut self) -> Result<Expr, CompileError> {
        let line = self.line;
        self.expect_token(Token::LBrace)?;
        let mut items = Vec::new();
        while !self.check(&Token::RBrace) {
            match &self.current {
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect_token(Token::RBracket)?;
                    self.expect_token(Token::Assign)?;
                    let value = self.expression()?;
                    items.push(TableItem::Keyed(key, value));
                }
                Token::Name(_) => {
                    if self.peek_is_assign()? {
                        let name = self.expect_name()?;
                        self.expect_token(Token::Assign)?;
                        let value = self.expression()?;
                        items.push(TableItem::Named(name, value));
                    } else {
                        items.push(TableItem::Positional(self.expression()?));
                    }
                }
                _ => items.push(TableItem::Positional(self.expression()?)),
            }
            if !(self.accept(&Token::Comma)? || self.accept(&Token::Semi)?) {
                break;
            }
        }
        self.expect_token(Token::RBrace)?;
        Ok(Expr::new(ExprKind::Table(items), line))
    }

    /// Lookahead for `Name =` in a table constructor, without consuming.
    fn peek_is_assign(&mut self) -> Result<bool, CompileError> {
        // The lexer has no second lookahead slot; clone its state instead.
        // Cheap: lexing one token from a byte slice.
        let mut probe = self.lexer.clone_state();
        let (next, _) = probe.next_token()?;
        Ok(next == Token::Assign)
    }

    fn func_body(
        &mut self,
        line: u32,
        name: Option<SmolStr>,
    ) -> Result<FuncBody, CompileError> {
        self.expect_token(Token::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                match &self.current {
                    Token::Ellipsis => {
                        self.advance()?;
                        is_vararg = true;
                        break;
                    }
                    Token::Name(_) => params.push(self.expect_name()?),
                    _ => return Err(self.error("<name> or '...' expected")),
                }
                if !self.accept(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect_token(Token::RParen)?;
        let body = self.block()?;
        let end_line = self.line;
        self.expect_token(Token::End)?;
        Ok(FuncBody {
            params,
            is_vararg,
            body,
            line,
            end_line,
            name,
        })
    }
}
