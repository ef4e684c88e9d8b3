//! Recursive-descent parser for the sandbox script language
//!
//! Expressions use a precedence ladder:
//! assignment → conditional → `||`/`??` → `&&` → equality → relational →
//! additive → multiplicative → exponent → unary → postfix → call/member → primary.
//!
//! Semicolons are optional: a statement may also end at a line break, a `}`
//! or the end of input.

use std::rc::Rc;

use super::ast::*;
use super::error::ScriptError;
use super::lexer::{line_col, Keyword, Lexer, Punct, TemplateChunk, Token, TokenKind};

/// Deepest statement/expression nesting accepted before bailing out.
const MAX_NESTING: usize = 64;

/// Longest run of left-associative operators (`a + b + c`, `a.b.c`) along
/// one path of the tree.
const MAX_CHAIN: usize = 1024;

type ParseResult<T> = Result<T, ScriptError>;

/// Parse a whole snippet.
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(source, tokens);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse a single expression, optionally followed by one `;`.
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(source, tokens);
    if parser.at_eof() {
        return Err(parser.unexpected());
    }
    let expr = parser.expression()?;
    parser.match_punct(Punct::Semicolon);
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    chain: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
            chain: 0,
        }
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check_punct(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn match_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> ParseResult<()> {
        if self.match_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// A property name after `.`: identifiers and reserved words alike.
    fn expect_property_name(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                let name = kw.as_str().to_string();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn error_at(&self, message: impl Into<String>, token: &Token) -> ScriptError {
        let (line, column) = line_col(self.source, token.start);
        ScriptError::syntax(message, line, column)
    }

    fn unexpected(&self) -> ScriptError {
        let token = self.peek();
        let message = match &token.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Ident(name) => format!("Unexpected identifier '{}'", name),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::Str(_) => "Unexpected string".to_string(),
            TokenKind::Template(_) => "Unexpected template string".to_string(),
            TokenKind::Keyword(kw) => format!("Unexpected token '{}'", kw.as_str()),
            TokenKind::Punct(p) => format!("Unexpected token '{}'", p.as_str()),
        };
        self.error_at(message, token)
    }

    /// Statement terminator: `;`, or an implied one before `}`, end of input
    /// or a line break.
    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.match_punct(Punct::Semicolon)
            || self.check_punct(Punct::RBrace)
            || self.at_eof()
            || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_at("Maximum nesting depth exceeded", self.peek()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Each fold of a left-associative chain nests the tree one level deeper.
    /// Callers restore `chain` once their loop ends.
    fn fold(&mut self) -> ParseResult<()> {
        self.chain += 1;
        if self.chain > MAX_CHAIN {
            return Err(self.error_at("Maximum nesting depth exceeded", self.peek()));
        }
        Ok(())
    }

    fn source_from(&self, start: usize) -> String {
        let end = self.tokens[self.pos.saturating_sub(1)].end;
        self.source.get(start..end).unwrap_or_default().to_string()
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) => {
                let stmt = self.declaration()?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            TokenKind::Keyword(Keyword::Function) => {
                let start = self.advance().start;
                let name = self.expect_ident()?;
                let def = self.function_rest(Some(name), start)?;
                Ok(Stmt::Function(def))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check_punct(Punct::Semicolon)
                    || self.check_punct(Punct::RBrace)
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let condition = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { condition, body })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.match_keyword(Keyword::While) {
                    return Err(self.unexpected());
                }
                self.expect_punct(Punct::LParen)?;
                let condition = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                self.match_punct(Punct::Semicolon);
                Ok(Stmt::DoWhile { body, condition })
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error_at("Illegal newline after throw", self.peek()));
                }
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expression(expr))
            }
        }
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Var) => DeclKind::Var,
            TokenKind::Keyword(Keyword::Let) => DeclKind::Let,
            TokenKind::Keyword(Keyword::Const) => DeclKind::Const,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn declaration(&mut self) -> ParseResult<Stmt> {
        let Some(kind) = self.decl_kind() else {
            return Err(self.unexpected());
        };
        let mut declarators = Vec::new();
        loop {
            let name_token = self.peek().clone();
            let name = self.expect_ident()?;
            let init = if self.match_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error_at("Missing initializer in const declaration", &name_token));
            }
            declarators.push(Declarator { name, init });
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Stmt::Declaration { kind, declarators })
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let condition = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen)?;

        // for (<kind>? name of|in ...)
        let has_kind = matches!(
            self.peek().kind,
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const)
        );
        let name_offset = usize::from(has_kind);
        if let TokenKind::Ident(name) = &self.peek_at(name_offset).kind {
            let head = &self.peek_at(name_offset + 1).kind;
            let is_of = matches!(head, TokenKind::Ident(word) if word == "of");
            let is_in = *head == TokenKind::Keyword(Keyword::In);
            if is_of || is_in {
                let name = name.clone();
                let kind = self.decl_kind();
                self.advance(); // name
                self.advance(); // of / in
                let binding = LoopBinding { kind, name };
                let subject = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.statement()?);
                return Ok(if is_of {
                    Stmt::ForOf {
                        binding,
                        iterable: subject,
                        body,
                    }
                } else {
                    Stmt::ForIn {
                        binding,
                        object: subject,
                        body,
                    }
                });
            }
        }

        let init = if self.check_punct(Punct::Semicolon) {
            None
        } else if has_kind {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expression(self.expression()?)))
        };
        self.expect_punct(Punct::Semicolon)?;

        let condition = if self.check_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;

        let update = if self.check_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen)?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        self.advance();
        let block = self.block()?;
        let handler = if self.match_keyword(Keyword::Catch) {
            let param = if self.match_punct(Punct::LParen) {
                let name = self.expect_ident()?;
                self.expect_punct(Punct::RParen)?;
                Some(name)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.block()?,
            })
        } else {
            None
        };
        let finalizer = if self.match_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_at("Missing catch or finally after try", self.peek()));
        }
        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
        })
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Parse `(params) { body }` after the function keyword (and name).
    fn function_rest(&mut self, name: Option<String>, start: usize) -> ParseResult<Rc<FunctionDef>> {
        self.expect_punct(Punct::LParen)?;
        let (params, rest) = self.parameters()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow: false,
            source: self.source_from(start),
        }))
    }

    /// Parse a parameter list; the opening `(` is already consumed.
    fn parameters(&mut self) -> ParseResult<(Vec<Param>, Option<String>)> {
        let mut params = Vec::new();
        let mut rest = None;
        while !self.check_punct(Punct::RParen) {
            if self.match_punct(Punct::Ellipsis) {
                rest = Some(self.expect_ident()?);
                break;
            }
            let name = self.expect_ident()?;
            let default = if self.match_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok((params, rest))
    }

    /// True when the `(` at the cursor opens an arrow function parameter list.
    fn arrow_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .is_some_and(|t| t.kind == TokenKind::Punct(Punct::Arrow) && !t.newline_before);
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn arrow_body(&mut self, params: Vec<Param>, rest: Option<String>, start: usize) -> ParseResult<Expr> {
        self.expect_punct(Punct::Arrow)?;
        let body = if self.check_punct(Punct::LBrace) {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expression(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
            source: self.source_from(start),
        })))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> ParseResult<Expr> {
        let start = self.peek().start;

        // x => ...
        if let TokenKind::Ident(name) = &self.peek().kind {
            if self.peek_at(1).kind == TokenKind::Punct(Punct::Arrow) {
                let param = Param {
                    name: name.clone(),
                    default: None,
                };
                self.advance();
                return self.arrow_body(vec![param], None, start);
            }
        }

        // (a, b) => ...
        if self.check_punct(Punct::LParen) && self.arrow_ahead() {
            self.advance();
            let (params, rest) = self.parameters()?;
            return self.arrow_body(params, rest, start);
        }

        let target = self.conditional()?;

        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => None,
            TokenKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(BinaryOp::Mod),
            TokenKind::Punct(Punct::StarStarAssign) => Some(BinaryOp::Pow),
            _ => return Ok(target),
        };

        if !target.is_assignable() {
            return Err(self.error_at("Invalid left-hand side in assignment", self.peek()));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let condition = self.logical_or()?;
        if !self.match_punct(Punct::Question) {
            return Ok(condition);
        }
        let then_expr = self.assignment()?;
        self.expect_punct(Punct::Colon)?;
        let else_expr = self.assignment()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.logical_and()?;
        loop {
            let op = if self.match_punct(Punct::OrOr) {
                LogicalOp::Or
            } else if self.match_punct(Punct::QuestionQuestion) {
                LogicalOp::Nullish
            } else {
                break;
            };
            self.fold()?;
            let right = self.logical_and()?;
            left = Expr::Logical(Box::new(left), op, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.equality()?;
        while self.match_punct(Punct::AndAnd) {
            self.fold()?;
            let right = self.equality()?;
            left = Expr::Logical(Box::new(left), LogicalOp::And, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct(Punct::EqEqEq) => BinaryOp::StrictEq,
                TokenKind::Punct(Punct::NotEqEq) => BinaryOp::StrictNotEq,
                TokenKind::Punct(Punct::EqEq) => BinaryOp::LooseEq,
                TokenKind::Punct(Punct::NotEq) => BinaryOp::LooseNotEq,
                _ => break,
            };
            self.advance();
            self.fold()?;
            let right = self.relational()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct(Punct::Lt) => BinaryOp::Lt,
                TokenKind::Punct(Punct::Gt) => BinaryOp::Gt,
                TokenKind::Punct(Punct::LtEq) => BinaryOp::LtEq,
                TokenKind::Punct(Punct::GtEq) => BinaryOp::GtEq,
                TokenKind::Keyword(Keyword::In) => BinaryOp::In,
                _ => break,
            };
            self.advance();
            self.fold()?;
            let right = self.additive()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct(Punct::Plus) => BinaryOp::Add,
                TokenKind::Punct(Punct::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.fold()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut left = self.exponent()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct(Punct::Star) => BinaryOp::Mul,
                TokenKind::Punct(Punct::Slash) => BinaryOp::Div,
                TokenKind::Punct(Punct::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.fold()?;
            let right = self.exponent()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.chain = chain;
        Ok(left)
    }

    fn exponent(&mut self) -> ParseResult<Expr> {
        let base = self.unary()?;
        // Right-associative: 2**3**2 = 2**(3**2)
        if self.match_punct(Punct::StarStar) {
            self.enter()?;
            let power = self.exponent();
            self.leave();
            return Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(power?)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return Ok(Expr::Unary(op, Box::new(operand?)));
        }

        if self.check_punct(Punct::PlusPlus) || self.check_punct(Punct::MinusMinus) {
            let increment = self.advance().kind == TokenKind::Punct(Punct::PlusPlus);
            self.enter()?;
            let target = self.unary();
            self.leave();
            let target = target?;
            if !target.is_assignable() {
                return Err(self.error_at(
                    "Invalid left-hand side expression in prefix operation",
                    self.peek(),
                ));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.call_member()?;
        let token = self.peek();
        let is_update = matches!(
            token.kind,
            TokenKind::Punct(Punct::PlusPlus | Punct::MinusMinus)
        );
        if is_update && !token.newline_before {
            if !expr.is_assignable() {
                return Err(self.error_at(
                    "Invalid left-hand side expression in postfix operation",
                    token,
                ));
            }
            let increment = self.advance().kind == TokenKind::Punct(Punct::PlusPlus);
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> ParseResult<Expr> {
        let chain = self.chain;
        let mut expr = if self.check_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            let member = [Punct::Dot, Punct::QuestionDot, Punct::LBracket, Punct::LParen];
            if member.iter().any(|&punct| self.check_punct(punct)) {
                self.fold()?;
            }
            if self.match_punct(Punct::Dot) {
                let name = self.expect_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProperty::Named(name),
                    optional: false,
                };
            } else if self.match_punct(Punct::QuestionDot) {
                if self.match_punct(Punct::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.match_punct(Punct::LBracket) {
                    let index = self.expression()?;
                    self.expect_punct(Punct::RBracket)?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Computed(Box::new(index)),
                        optional: true,
                    };
                } else {
                    let name = self.expect_property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Named(name),
                        optional: true,
                    };
                }
            } else if self.match_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProperty::Computed(Box::new(index)),
                    optional: false,
                };
            } else if self.match_punct(Punct::LParen) {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                break;
            }
        }
        self.chain = chain;
        Ok(expr)
    }

    /// `new Callee(args)`; the callee is a member chain without calls.
    fn new_expression(&mut self) -> ParseResult<Expr> {
        self.advance();
        let chain = self.chain;
        let mut callee = if self.check_keyword(Keyword::New) {
            self.enter()?;
            let inner = self.new_expression();
            self.leave();
            inner?
        } else {
            self.primary()?
        };
        loop {
            if self.check_punct(Punct::Dot) || self.check_punct(Punct::LBracket) {
                self.fold()?;
            }
            if self.match_punct(Punct::Dot) {
                let name = self.expect_property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProperty::Named(name),
                    optional: false,
                };
            } else if self.match_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket)?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProperty::Computed(Box::new(index)),
                    optional: false,
                };
            } else {
                break;
            }
        }
        let args = if self.match_punct(Punct::LParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        self.chain = chain;
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    /// Parse call arguments; the opening `(` is already consumed.
    fn arguments(&mut self) -> ParseResult<Vec<Element>> {
        self.element_list(Punct::RParen)
    }

    fn element_list(&mut self, close: Punct) -> ParseResult<Vec<Element>> {
        let mut elements = Vec::new();
        while !self.check_punct(close) {
            if self.match_punct(Punct::Ellipsis) {
                elements.push(Element::Spread(self.assignment()?));
            } else {
                elements.push(Element::Plain(self.assignment()?));
            }
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(elements)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                self.template(chunks)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if name == "undefined" {
                    Ok(Expr::Undefined)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                Ok(Expr::This)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = match &self.peek().kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Ok(Expr::Function(self.function_rest(name, token.start)?))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                Ok(Expr::Array(self.element_list(Punct::RBracket)?))
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                self.object_literal()
            }
            _ => Err(self.unexpected()),
        }
    }

    fn template(&mut self, chunks: Vec<TemplateChunk>) -> ParseResult<Expr> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Code(tokens) => {
                    let mut inner = Parser::new(self.source, tokens);
                    inner.depth = self.depth;
                    inner.chain = self.chain;
                    if inner.at_eof() {
                        return Err(inner.unexpected());
                    }
                    let expr = inner.expression()?;
                    if !inner.at_eof() {
                        return Err(inner.unexpected());
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }

    /// Object literal; the opening `{` is already consumed.
    fn object_literal(&mut self) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            let key_token = self.peek().clone();
            let key = match &key_token.kind {
                TokenKind::Ident(name) => PropertyKey::Static(name.clone()),
                TokenKind::Keyword(kw) => PropertyKey::Static(kw.as_str().to_string()),
                TokenKind::Str(s) => PropertyKey::Static(s.clone()),
                TokenKind::Number(n) => PropertyKey::Static(super::value::number_to_string(*n)),
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let key = self.assignment()?;
                    if !self.check_punct(Punct::RBracket) {
                        return Err(self.unexpected());
                    }
                    PropertyKey::Computed(key)
                }
                _ => return Err(self.unexpected()),
            };
            // Consumes the key token, or the `]` of a computed key
            self.advance();

            let value = if self.match_punct(Punct::Colon) {
                self.assignment()?
            } else if self.check_punct(Punct::LParen) {
                let name = match &key {
                    PropertyKey::Static(name) => Some(name.clone()),
                    PropertyKey::Computed(_) => None,
                };
                Expr::Function(self.function_rest(name, key_token.start)?)
            } else {
                match (&key, &key_token.kind) {
                    (PropertyKey::Static(name), TokenKind::Ident(_)) => Expr::Ident(name.clone()),
                    _ => return Err(self.unexpected()),
                }
            };
            properties.push(Property { key, value });

            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(Expr::Object(properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expression(src).unwrap()
    }

    #[test]
    fn test_precedence() {
        let parsed = expr("1 + 2 * 3 === 7");
        let Expr::Binary(left, BinaryOp::StrictEq, right) = parsed else {
            panic!("expected strict equality at the root");
        };
        assert_eq!(*right, Expr::Number(7.0));
        assert!(matches!(*left, Expr::Binary(_, BinaryOp::Add, _)));
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let parsed = expr("2 ** 3 ** 2");
        let Expr::Binary(_, BinaryOp::Pow, right) = parsed else {
            panic!("expected power");
        };
        assert!(matches!(*right, Expr::Binary(_, BinaryOp::Pow, _)));
    }

    #[test]
    fn test_function_declaration() {
        let program = parse_program("function add(a, b) { return a + b; }").unwrap();
        assert_eq!(program.body.len(), 1);
        let Stmt::Function(def) = &program.body[0] else {
            panic!("expected function");
        };
        assert_eq!(def.name.as_deref(), Some("add"));
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.source, "function add(a, b) { return a + b; }");
    }

    #[test]
    fn test_arrow_functions() {
        assert!(matches!(expr("x => x * 2"), Expr::Function(def) if def.is_arrow));
        assert!(matches!(expr("(a, b = 2) => { return a + b }"), Expr::Function(def) if def.params.len() == 2));
        assert!(matches!(expr("(...xs) => xs.length"), Expr::Function(def) if def.rest.is_some()));
        // A parenthesized expression is not an arrow
        assert!(matches!(expr("(a + b) * 2"), Expr::Binary(_, BinaryOp::Mul, _)));
    }

    #[test]
    fn test_optional_semicolons() {
        let program = parse_program("let a = 1\nlet b = 2\na + b").unwrap();
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_missing_separator_is_error() {
        let err = parse_program("functon add(a, b) {}").unwrap_err();
        assert_eq!(err.message(), "Unexpected identifier 'add'");
    }

    #[test]
    fn test_unexpected_end_of_input() {
        let err = parse_program("function f() {").unwrap_err();
        assert_eq!(err.message(), "Unexpected end of input");
    }

    #[test]
    fn test_return_on_new_line_returns_undefined() {
        let program = parse_program("function f() { return\n 1 }").unwrap();
        let Stmt::Function(def) = &program.body[0] else {
            panic!("expected function");
        };
        let FunctionBody::Block(body) = &def.body else {
            panic!("expected block body");
        };
        assert_eq!(body[0], Stmt::Return(None));
    }

    #[test]
    fn test_expression_rejects_trailing_tokens() {
        assert!(parse_expression("add(1, 2);").is_ok());
        assert!(parse_expression("a b").is_err());
        assert_eq!(parse_expression("").unwrap_err().message(), "Unexpected end of input");
    }

    #[test]
    fn test_object_literal_forms() {
        let parsed = expr("({ a: 1, b, 'c': 2, [k]: 3, m() { return 4 } })");
        let Expr::Object(props) = parsed else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 5);
        assert_eq!(props[1].value, Expr::Ident("b".into()));
        assert!(matches!(props[3].key, PropertyKey::Computed(_)));
        assert!(matches!(props[4].value, Expr::Function(_)));
    }

    #[test]
    fn test_for_variants() {
        let program = parse_program(
            "for (let i = 0; i < 3; i++) {}\nfor (const x of xs) {}\nfor (k in obj) {}",
        )
        .unwrap();
        assert!(matches!(program.body[0], Stmt::For { .. }));
        assert!(matches!(&program.body[1], Stmt::ForOf { binding, .. } if binding.kind == Some(DeclKind::Const)));
        assert!(matches!(&program.body[2], Stmt::ForIn { binding, .. } if binding.kind.is_none()));
    }

    #[test]
    fn test_template_literal() {
        let parsed = expr("`sum: ${a + b}!`");
        let Expr::Template(parts) = parsed else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[1], TemplatePart::Expr(Expr::Binary(_, BinaryOp::Add, _))));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_expression("1 = 2").unwrap_err();
        assert_eq!(err.message(), "Invalid left-hand side in assignment");
    }

    #[test]
    fn test_new_expression() {
        let parsed = expr("new Error('boom')");
        assert!(matches!(parsed, Expr::New { ref args, .. } if args.len() == 1));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_expression(&src).unwrap_err();
        assert_eq!(err.message(), "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_long_exponent_chain_is_rejected() {
        let src = format!("1{}", "**1".repeat(100_000));
        let err = parse_expression(&src).unwrap_err();
        assert_eq!(err.message(), "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        let sources = [
            format!("var x = 1{}", "+1".repeat(100_000)),
            format!("var x = a{}", " && a".repeat(100_000)),
            format!("var x = a{}", ".b".repeat(100_000)),
            format!("var x = f{}", "()".repeat(100_000)),
            format!("var x = {}y", "++".repeat(100_000)),
            format!("var x = {}Error", "new ".repeat(100_000)),
        ];
        for src in &sources {
            let err = parse_program(src).unwrap_err();
            assert_eq!(err.message(), "Maximum nesting depth exceeded");
        }
    }

    #[test]
    fn test_moderate_chains_still_parse() {
        let sum = format!("1{}", " + 1".repeat(500));
        assert!(parse_expression(&sum).is_ok());
        let members = format!("a{}", ".b".repeat(500));
        assert!(parse_expression(&members).is_ok());
        assert!(parse_expression("2 ** 3 ** 2 + (1 + 2) * 3 - 4 / 5").is_ok());
    }
}
