//! Recursive-descent parser.
//!
//! Top level is zero or more function declarations followed by the script
//! body. Operator precedence is encoded in the descent ladder; the analyzer
//! assumes it. The parser owns numeric-literal conversion so that a unary
//! minus directly attached to a literal folds into it (`-2147483648` is a
//! valid int constant).

use crate::{
    ast::{
        BinOp, BoolOp, Catch, CompOp, Declaration, Expr, ExprLoc, ForInit, FuncRefKind, LambdaBody, LambdaParam, Link,
        LinkLoc, Param, SFunction, Script, Stmt, StmtLoc, TypeName, UnaryOp,
    },
    error::{CompileError, Loc},
    lex::{Tok, lex},
    registry::Registry,
};

/// Parses a script source into a [`Script`] tree.
pub fn parse(source: &str, registry: &Registry) -> Result<Script, CompileError> {
    let tokens = lex(source, registry)?;
    Parser { tokens, pos: 0 }.script()
}

struct Parser {
    tokens: Vec<(Tok, Loc)>,
    pos: usize,
}

impl Parser {
    fn tok(&self) -> &Tok {
        &self.tokens[self.pos].0
    }

    fn tok_at(&self, ahead: usize) -> &Tok {
        self.tokens
            .get(self.pos + ahead)
            .map_or(&Tok::Eof, |(t, _)| t)
    }

    fn loc(&self) -> Loc {
        self.tokens[self.pos].1
    }

    fn bump(&mut self) -> (Tok, Loc) {
        let pair = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        pair
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.tok() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &'static str) -> Result<Loc, CompileError> {
        if self.tok() == tok {
            Ok(self.bump().1)
        } else {
            Err(CompileError::syntax(format!("expected {what}."), self.loc()))
        }
    }

    fn expect_id(&mut self, what: &'static str) -> Result<Box<str>, CompileError> {
        match self.bump() {
            (Tok::Id(name), _) => Ok(name),
            (_, loc) => Err(CompileError::syntax(format!("expected {what}."), loc)),
        }
    }

    // --- top level ---

    fn script(&mut self) -> Result<Script, CompileError> {
        let mut functions = Vec::new();
        while self.at_function_decl() {
            functions.push(self.function()?);
        }
        let mut body = Vec::new();
        while !matches!(self.tok(), Tok::Eof) {
            body.push(self.statement()?);
        }
        Ok(Script { functions, body })
    }

    /// Function declarations look like `ret-type name (`.
    fn at_function_decl(&self) -> bool {
        let Tok::Type(_) = self.tok() else { return false };
        let mut ahead = 1;
        while self.tok_at(ahead) == &Tok::LBracket && self.tok_at(ahead + 1) == &Tok::RBracket {
            ahead += 2;
        }
        matches!(self.tok_at(ahead), Tok::Id(_)) && self.tok_at(ahead + 1) == &Tok::LParen
    }

    fn function(&mut self) -> Result<SFunction, CompileError> {
        let loc = self.loc();
        let ret = self.type_name()?;
        let name = self.expect_id("a function name")?;
        self.expect(&Tok::LParen, "[(] to begin the parameter list")?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                let param_loc = self.loc();
                let ty = self.type_name()?;
                let param_name = self.expect_id("a parameter name")?;
                params.push(Param {
                    ty,
                    name: param_name,
                    loc: param_loc,
                });
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(&Tok::Comma, "[,] between parameters")?;
            }
        }
        self.expect(&Tok::LBrace, "[{] to begin the function body")?;
        let body = self.block_body()?;
        Ok(SFunction {
            loc,
            ret,
            name,
            params,
            body,
            synthetic: false,
        })
    }

    fn type_name(&mut self) -> Result<TypeName, CompileError> {
        let loc = self.loc();
        let (tok, _) = self.bump();
        let Tok::Type(name) = tok else {
            return Err(CompileError::syntax("expected a type.", loc));
        };
        let mut dims = 0u8;
        while self.tok() == &Tok::LBracket && self.tok_at(1) == &Tok::RBracket {
            self.bump();
            self.bump();
            dims = dims
                .checked_add(1)
                .ok_or_else(|| CompileError::limit("too many array dimensions.", loc))?;
        }
        Ok(TypeName { name, dims, loc })
    }

    // --- statements ---

    fn block_body(&mut self) -> Result<Vec<StmtLoc>, CompileError> {
        let mut stmts = Vec::new();
        while !self.eat(&Tok::RBrace) {
            if matches!(self.tok(), Tok::Eof) {
                return Err(CompileError::syntax("unexpected end of script; expected [}].", self.loc()));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    /// A braced block, or a single statement treated as one.
    fn scoped_block(&mut self) -> Result<Vec<StmtLoc>, CompileError> {
        if self.eat(&Tok::LBrace) {
            self.block_body()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn end_statement(&mut self) -> Result<(), CompileError> {
        if self.eat(&Tok::Semicolon) || matches!(self.tok(), Tok::RBrace | Tok::Eof) {
            Ok(())
        } else {
            Err(CompileError::syntax("expected [;] after statement.", self.loc()))
        }
    }

    fn statement(&mut self) -> Result<StmtLoc, CompileError> {
        let loc = self.loc();
        let stmt = match self.tok() {
            Tok::If => self.if_statement()?,
            Tok::While => self.while_statement()?,
            Tok::Do => self.do_statement()?,
            Tok::For => self.for_statement()?,
            Tok::Try => self.try_statement()?,
            Tok::Throw => {
                self.bump();
                let value = self.expression()?;
                self.end_statement()?;
                Stmt::Throw(value)
            }
            Tok::Return => {
                self.bump();
                if self.tok() == &Tok::Semicolon || matches!(self.tok(), Tok::RBrace | Tok::Eof) {
                    self.end_statement()?;
                    Stmt::Return(None)
                } else {
                    let value = self.expression()?;
                    self.end_statement()?;
                    Stmt::Return(Some(value))
                }
            }
            Tok::Break => {
                self.bump();
                self.end_statement()?;
                Stmt::Break
            }
            Tok::Continue => {
                self.bump();
                self.end_statement()?;
                Stmt::Continue
            }
            Tok::LBrace => {
                self.bump();
                Stmt::Block(self.block_body()?)
            }
            Tok::Type(_) if self.at_declaration() => {
                let decls = self.declarations()?;
                self.end_statement()?;
                Stmt::Decl { decls }
            }
            _ => {
                let value = self.expression()?;
                self.end_statement()?;
                Stmt::Expr(value)
            }
        };
        Ok(StmtLoc { loc, stmt })
    }

    /// `Type ([])* Id` begins a declaration; `Type .` or `Type ::` does not.
    fn at_declaration(&self) -> bool {
        let mut ahead = 1;
        while self.tok_at(ahead) == &Tok::LBracket && self.tok_at(ahead + 1) == &Tok::RBracket {
            ahead += 2;
        }
        matches!(self.tok_at(ahead), Tok::Id(_))
    }

    fn declarations(&mut self) -> Result<Vec<Declaration>, CompileError> {
        let ty = self.type_name()?;
        let mut decls = Vec::new();
        loop {
            let loc = self.loc();
            let name = self.expect_id("a variable name")?;
            let init = if self.eat(&Tok::Assign(None)) {
                Some(self.expression()?)
            } else {
                None
            };
            decls.push(Declaration {
                ty: ty.clone(),
                name,
                init,
                loc,
            });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        self.bump();
        self.expect(&Tok::LParen, "[(] after [if]")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "[)] to close the condition")?;
        let then = self.scoped_block()?;
        let orelse = if self.eat(&Tok::Else) {
            Some(self.scoped_block()?)
        } else {
            None
        };
        Ok(Stmt::If { cond, then, orelse })
    }

    fn while_statement(&mut self) -> Result<Stmt, CompileError> {
        self.bump();
        self.expect(&Tok::LParen, "[(] after [while]")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "[)] to close the condition")?;
        let body = if self.eat(&Tok::Semicolon) {
            Vec::new()
        } else {
            self.scoped_block()?
        };
        Ok(Stmt::While { cond, body })
    }

    fn do_statement(&mut self) -> Result<Stmt, CompileError> {
        self.bump();
        self.expect(&Tok::LBrace, "[{] after [do]")?;
        let body = self.block_body()?;
        self.expect(&Tok::While, "[while] after the do block")?;
        self.expect(&Tok::LParen, "[(] after [while]")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "[)] to close the condition")?;
        self.end_statement()?;
        Ok(Stmt::Do { body, cond })
    }

    fn for_statement(&mut self) -> Result<Stmt, CompileError> {
        self.bump();
        self.expect(&Tok::LParen, "[(] after [for]")?;

        // for-each: `Type name : it`, or `name in it`.
        if let Tok::Id(_) = self.tok()
            && self.tok_at(1) == &Tok::In
        {
            let name = self.expect_id("a loop variable")?;
            self.bump();
            let iterable = self.expression()?;
            self.expect(&Tok::RParen, "[)] to close the loop header")?;
            let body = self.scoped_block()?;
            return Ok(Stmt::Each {
                decl_ty: None,
                name,
                iterable,
                body,
            });
        }
        if matches!(self.tok(), Tok::Type(_)) && self.each_header_ahead() {
            let decl_ty = self.type_name()?;
            let name = self.expect_id("a loop variable")?;
            self.expect(&Tok::Colon, "[:] in the for-each header")?;
            let iterable = self.expression()?;
            self.expect(&Tok::RParen, "[)] to close the loop header")?;
            let body = self.scoped_block()?;
            return Ok(Stmt::Each {
                decl_ty: Some(decl_ty),
                name,
                iterable,
                body,
            });
        }

        let init = if self.eat(&Tok::Semicolon) {
            None
        } else if matches!(self.tok(), Tok::Type(_)) && self.at_declaration() {
            let decls = self.declarations()?;
            self.expect(&Tok::Semicolon, "[;] after the initializer")?;
            Some(ForInit::Decl(decls))
        } else {
            let value = self.expression()?;
            self.expect(&Tok::Semicolon, "[;] after the initializer")?;
            Some(ForInit::Expr(value))
        };
        let cond = if self.eat(&Tok::Semicolon) {
            None
        } else {
            let value = self.expression()?;
            self.expect(&Tok::Semicolon, "[;] after the condition")?;
            Some(value)
        };
        let after = if self.tok() == &Tok::RParen {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&Tok::RParen, "[)] to close the loop header")?;
        let body = if self.eat(&Tok::Semicolon) {
            Vec::new()
        } else {
            self.scoped_block()?
        };
        Ok(Stmt::For { init, cond, after, body })
    }

    fn each_header_ahead(&self) -> bool {
        let mut ahead = 1;
        while self.tok_at(ahead) == &Tok::LBracket && self.tok_at(ahead + 1) == &Tok::RBracket {
            ahead += 2;
        }
        matches!(self.tok_at(ahead), Tok::Id(_)) && self.tok_at(ahead + 1) == &Tok::Colon
    }

    fn try_statement(&mut self) -> Result<Stmt, CompileError> {
        self.bump();
        self.expect(&Tok::LBrace, "[{] after [try]")?;
        let body = self.block_body()?;
        let mut catches = Vec::new();
        while self.tok() == &Tok::Catch {
            let loc = self.bump().1;
            self.expect(&Tok::LParen, "[(] after [catch]")?;
            let ty = self.type_name()?;
            let name = self.expect_id("an exception variable")?;
            self.expect(&Tok::RParen, "[)] to close the catch header")?;
            self.expect(&Tok::LBrace, "[{] to begin the catch body")?;
            let catch_body = self.block_body()?;
            catches.push(Catch {
                ty,
                name,
                body: catch_body,
                loc,
            });
        }
        if catches.is_empty() {
            return Err(CompileError::syntax("expected [catch] after the try block.", self.loc()));
        }
        Ok(Stmt::Try { body, catches })
    }

    // --- expressions, lowest precedence first ---

    fn expression(&mut self) -> Result<ExprLoc, CompileError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<ExprLoc, CompileError> {
        let target = self.ternary()?;
        if let Tok::Assign(op) = self.tok() {
            let op = *op;
            self.bump();
            let value = self.assignment()?;
            return Ok(ExprLoc::new(
                target.loc,
                Expr::Assign {
                    target: Box::new(target),
                    op,
                    value: Box::new(value),
                },
            ));
        }
        Ok(target)
    }

    fn ternary(&mut self) -> Result<ExprLoc, CompileError> {
        let cond = self.bool_or()?;
        if self.eat(&Tok::Question) {
            let then = self.expression()?;
            self.expect(&Tok::Colon, "[:] in the conditional expression")?;
            let orelse = self.expression()?;
            return Ok(ExprLoc::new(
                cond.loc,
                Expr::Ternary {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    orelse: Box::new(orelse),
                },
            ));
        }
        Ok(cond)
    }

    fn bool_or(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.bool_and()?;
        while self.eat(&Tok::OrOr) {
            let right = self.bool_and()?;
            left = ExprLoc::new(
                left.loc,
                Expr::Logical {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
        Ok(left)
    }

    fn bool_and(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.bit_or()?;
        while self.eat(&Tok::AndAnd) {
            let right = self.bit_or()?;
            left = ExprLoc::new(
                left.loc,
                Expr::Logical {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.bit_xor()?;
        while self.eat(&Tok::Pipe) {
            let right = self.bit_xor()?;
            left = binary(left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.bit_and()?;
        while self.eat(&Tok::Caret) {
            let right = self.bit_and()?;
            left = binary(left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.equality()?;
        while self.eat(&Tok::Amp) {
            let right = self.equality()?;
            left = binary(left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.tok() {
                Tok::Eq => Some(CompOp::Eq),
                Tok::Ne => Some(CompOp::Ne),
                Tok::FindOp | Tok::MatchOp => {
                    let matches_all = self.tok() == &Tok::MatchOp;
                    self.bump();
                    let pattern = self.relational()?;
                    left = ExprLoc::new(
                        left.loc,
                        Expr::RegexOp {
                            operand: Box::new(left),
                            pattern: Box::new(pattern),
                            matches_all,
                        },
                    );
                    continue;
                }
                _ => None,
            };
            let Some(op) = op else { return Ok(left) };
            self.bump();
            let right = self.relational()?;
            left = ExprLoc::new(
                left.loc,
                Expr::Comp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
    }

    fn relational(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.shift()?;
        loop {
            let op = match self.tok() {
                Tok::Lt => CompOp::Lt,
                Tok::Le => CompOp::Le,
                Tok::Gt => CompOp::Gt,
                Tok::Ge => CompOp::Ge,
                Tok::Instanceof => {
                    self.bump();
                    let ty = self.type_name()?;
                    left = ExprLoc::new(
                        left.loc,
                        Expr::Instanceof {
                            operand: Box::new(left),
                            ty,
                        },
                    );
                    continue;
                }
                _ => return Ok(left),
            };
            self.bump();
            let right = self.shift()?;
            left = ExprLoc::new(
                left.loc,
                Expr::Comp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
    }

    fn shift(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.tok() {
                Tok::Shl => BinOp::Shl,
                Tok::Shr => BinOp::Shr,
                Tok::Ushr => BinOp::Ushr,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.additive()?;
            left = binary(left, op, right);
        }
    }

    fn additive(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.tok() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.multiplicative()?;
            left = binary(left, op, right);
        }
    }

    fn multiplicative(&mut self) -> Result<ExprLoc, CompileError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.tok() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = binary(left, op, right);
        }
    }

    fn unary(&mut self) -> Result<ExprLoc, CompileError> {
        let loc = self.loc();
        match self.tok() {
            Tok::Minus => {
                self.bump();
                // A minus directly attached to a numeric literal folds into
                // it, so int-min and long-min literals parse.
                if let Tok::Numeric(text) = self.tok() {
                    let text = text.clone();
                    self.bump();
                    let lit = numeric_literal(&text, true, loc)?;
                    return self.links_onto(ExprLoc::new(loc, lit));
                }
                let operand = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Unary {
                        op: UnaryOp::Minus,
                        operand: Box::new(operand),
                    },
                ))
            }
            Tok::Plus => {
                self.bump();
                let operand = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Unary {
                        op: UnaryOp::Plus,
                        operand: Box::new(operand),
                    },
                ))
            }
            Tok::Not => {
                self.bump();
                let operand = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                ))
            }
            Tok::BitNot => {
                self.bump();
                let operand = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Unary {
                        op: UnaryOp::BitNot,
                        operand: Box::new(operand),
                    },
                ))
            }
            Tok::Incr | Tok::Decr => {
                let delta = if self.tok() == &Tok::Incr { 1 } else { -1 };
                self.bump();
                let target = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Inc {
                        target: Box::new(target),
                        delta,
                        post: false,
                    },
                ))
            }
            // Explicit cast: `( Type ([])* )` followed by a unary expression.
            Tok::LParen if self.at_cast() => {
                self.bump();
                let ty = self.type_name()?;
                self.expect(&Tok::RParen, "[)] to close the cast")?;
                let operand = self.unary()?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Cast {
                        ty,
                        operand: Box::new(operand),
                    },
                ))
            }
            _ => self.postfix(),
        }
    }

    fn at_cast(&self) -> bool {
        let Tok::Type(_) = self.tok_at(1) else { return false };
        let mut ahead = 2;
        while self.tok_at(ahead) == &Tok::LBracket && self.tok_at(ahead + 1) == &Tok::RBracket {
            ahead += 2;
        }
        self.tok_at(ahead) == &Tok::RParen
    }

    fn postfix(&mut self) -> Result<ExprLoc, CompileError> {
        let head = self.primary()?;
        self.links_onto(head)
    }

    /// Attaches trailing links and postfix increments to a head expression.
    fn links_onto(&mut self, head: ExprLoc) -> Result<ExprLoc, CompileError> {
        let head_loc = head.loc;
        let mut links = match head.expr {
            Expr::Chain { links } => links,
            other => {
                if !matches!(self.tok(), Tok::Dot | Tok::LBracket) {
                    return self.maybe_postfix_inc(ExprLoc::new(head_loc, other));
                }
                vec![LinkLoc {
                    loc: head_loc,
                    link: Link::Expr(Box::new(ExprLoc::new(head_loc, other))),
                }]
            }
        };
        loop {
            match self.tok() {
                Tok::Dot => {
                    let loc = self.bump().1;
                    let name = self.expect_id("a member name after [.]")?;
                    if self.eat(&Tok::LParen) {
                        let args = self.call_args()?;
                        links.push(LinkLoc {
                            loc,
                            link: Link::Call { name, args },
                        });
                    } else {
                        links.push(LinkLoc {
                            loc,
                            link: Link::Field(name),
                        });
                    }
                }
                Tok::LBracket => {
                    let loc = self.bump().1;
                    let index = self.expression()?;
                    self.expect(&Tok::RBracket, "[]] to close the index")?;
                    links.push(LinkLoc {
                        loc,
                        link: Link::Index(Box::new(index)),
                    });
                }
                _ => break,
            }
        }
        self.maybe_postfix_inc(ExprLoc::new(head_loc, Expr::Chain { links }))
    }

    fn maybe_postfix_inc(&mut self, expr: ExprLoc) -> Result<ExprLoc, CompileError> {
        if matches!(self.tok(), Tok::Incr | Tok::Decr) {
            let delta = if self.tok() == &Tok::Incr { 1 } else { -1 };
            self.bump();
            let loc = expr.loc;
            return Ok(ExprLoc::new(
                loc,
                Expr::Inc {
                    target: Box::new(expr),
                    delta,
                    post: true,
                },
            ));
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<ExprLoc>, CompileError> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            self.expect(&Tok::Comma, "[,] between arguments")?;
        }
    }

    fn primary(&mut self) -> Result<ExprLoc, CompileError> {
        let loc = self.loc();
        match self.tok().clone() {
            Tok::Numeric(text) => {
                self.bump();
                Ok(ExprLoc::new(loc, numeric_literal(&text, false, loc)?))
            }
            Tok::True => {
                self.bump();
                Ok(ExprLoc::new(loc, Expr::Bool(true)))
            }
            Tok::False => {
                self.bump();
                Ok(ExprLoc::new(loc, Expr::Bool(false)))
            }
            Tok::Null => {
                self.bump();
                Ok(ExprLoc::new(loc, Expr::Null))
            }
            Tok::Str(text) => {
                self.bump();
                Ok(ExprLoc::new(loc, Expr::Str(text)))
            }
            Tok::Regex { pattern, flags } => {
                self.bump();
                Ok(ExprLoc::new(loc, Expr::Regex { pattern, flags }))
            }
            Tok::LParen => {
                if self.at_lambda_params() {
                    return self.lambda(loc);
                }
                self.bump();
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "[)] to close the expression")?;
                Ok(ExprLoc::new(
                    loc,
                    Expr::Chain {
                        links: vec![LinkLoc {
                            loc,
                            link: Link::Expr(Box::new(inner)),
                        }],
                    },
                ))
            }
            Tok::LBracket => self.collection_literal(loc),
            Tok::New => self.new_expression(loc),
            Tok::Id(name) => {
                if self.tok_at(1) == &Tok::Arrow {
                    return self.lambda(loc);
                }
                if self.tok_at(1) == &Tok::ColonColon {
                    self.bump();
                    self.bump();
                    let method = self.expect_id("a method name after [::]")?;
                    let kind = if name.as_ref() == "this" {
                        FuncRefKind::Local { name: method }
                    } else {
                        FuncRefKind::Capturing { var: name, name: method }
                    };
                    return Ok(ExprLoc::new(loc, Expr::FuncRef(kind)));
                }
                self.bump();
                if self.eat(&Tok::LParen) {
                    let args = self.call_args()?;
                    return Ok(ExprLoc::new(
                        loc,
                        Expr::Chain {
                            links: vec![LinkLoc {
                                loc,
                                link: Link::CallLocal { name, args },
                            }],
                        },
                    ));
                }
                Ok(ExprLoc::new(
                    loc,
                    Expr::Chain {
                        links: vec![LinkLoc {
                            loc,
                            link: Link::Var(name),
                        }],
                    },
                ))
            }
            Tok::Type(_) => {
                let ty = self.type_name()?;
                if self.eat(&Tok::ColonColon) {
                    if self.eat(&Tok::New) {
                        return Ok(ExprLoc::new(loc, Expr::FuncRef(FuncRefKind::TypeNew { ty })));
                    }
                    let method = self.expect_id("a method name after [::]")?;
                    return Ok(ExprLoc::new(
                        loc,
                        Expr::FuncRef(FuncRefKind::TypeMethod { ty, name: method }),
                    ));
                }
                if self.tok() != &Tok::Dot {
                    return Err(CompileError::syntax(
                        "expected [.] or [::] after a type in expression position.",
                        self.loc(),
                    ));
                }
                Ok(ExprLoc::new(
                    loc,
                    Expr::Chain {
                        links: vec![LinkLoc {
                            loc,
                            link: Link::Static(ty),
                        }],
                    },
                ))
            }
            _ => Err(CompileError::syntax("unexpected token in expression.", loc)),
        }
    }

    /// `( [Type] id, ... ) ->` starts a lambda; scan to the matching paren.
    fn at_lambda_params(&self) -> bool {
        debug_assert_eq!(self.tok(), &Tok::LParen);
        let mut depth = 0usize;
        let mut ahead = 0usize;
        loop {
            match self.tok_at(ahead) {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self.tok_at(ahead + 1) == &Tok::Arrow;
                    }
                }
                Tok::Eof => return false,
                _ => {}
            }
            ahead += 1;
        }
    }

    fn lambda(&mut self, loc: Loc) -> Result<ExprLoc, CompileError> {
        let mut params = Vec::new();
        if self.eat(&Tok::LParen) {
            if !self.eat(&Tok::RParen) {
                loop {
                    let param_loc = self.loc();
                    let ty = if matches!(self.tok(), Tok::Type(_)) {
                        Some(self.type_name()?)
                    } else {
                        None
                    };
                    let name = self.expect_id("a lambda parameter name")?;
                    params.push(LambdaParam {
                        ty,
                        name,
                        loc: param_loc,
                    });
                    if self.eat(&Tok::RParen) {
                        break;
                    }
                    self.expect(&Tok::Comma, "[,] between lambda parameters")?;
                }
            }
        } else {
            let param_loc = self.loc();
            let name = self.expect_id("a lambda parameter name")?;
            params.push(LambdaParam {
                ty: None,
                name,
                loc: param_loc,
            });
        }
        self.expect(&Tok::Arrow, "[->] after the lambda parameters")?;
        let body = if self.eat(&Tok::LBrace) {
            LambdaBody::Block(self.block_body()?)
        } else {
            LambdaBody::Expr(Box::new(self.expression()?))
        };
        Ok(ExprLoc::new(loc, Expr::Lambda { params, body }))
    }

    /// `[a, b]` list literal, `[k: v]` map literal, `[:]` empty map.
    fn collection_literal(&mut self, loc: Loc) -> Result<ExprLoc, CompileError> {
        self.bump();
        if self.eat(&Tok::Colon) {
            self.expect(&Tok::RBracket, "[]] to close the empty map literal")?;
            return Ok(ExprLoc::new(loc, Expr::MapInit(Vec::new())));
        }
        if self.eat(&Tok::RBracket) {
            return Ok(ExprLoc::new(loc, Expr::ListInit(Vec::new())));
        }
        let first = self.expression()?;
        if self.eat(&Tok::Colon) {
            let value = self.expression()?;
            let mut pairs = vec![(first, value)];
            while self.eat(&Tok::Comma) {
                let key = self.expression()?;
                self.expect(&Tok::Colon, "[:] between map key and value")?;
                let value = self.expression()?;
                pairs.push((key, value));
            }
            self.expect(&Tok::RBracket, "[]] to close the map literal")?;
            return Ok(ExprLoc::new(loc, Expr::MapInit(pairs)));
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            items.push(self.expression()?);
        }
        self.expect(&Tok::RBracket, "[]] to close the list literal")?;
        Ok(ExprLoc::new(loc, Expr::ListInit(items)))
    }

    fn new_expression(&mut self, loc: Loc) -> Result<ExprLoc, CompileError> {
        self.bump();
        let ty_loc = self.loc();
        let (tok, _) = self.bump();
        let Tok::Type(name) = tok else {
            return Err(CompileError::syntax("expected a type after [new].", ty_loc));
        };
        if self.tok() == &Tok::LBracket {
            let mut dims = Vec::new();
            while self.eat(&Tok::LBracket) {
                dims.push(self.expression()?);
                self.expect(&Tok::RBracket, "[]] to close the array dimension")?;
            }
            let ty = TypeName {
                name,
                dims: 0,
                loc: ty_loc,
            };
            return Ok(ExprLoc::new(
                loc,
                Expr::Chain {
                    links: vec![LinkLoc {
                        loc,
                        link: Link::NewArray { ty, dims },
                    }],
                },
            ));
        }
        self.expect(&Tok::LParen, "[(] for the constructor arguments")?;
        let args = self.call_args()?;
        let ty = TypeName {
            name,
            dims: 0,
            loc: ty_loc,
        };
        Ok(ExprLoc::new(
            loc,
            Expr::Chain {
                links: vec![LinkLoc {
                    loc,
                    link: Link::NewObj { ty, args },
                }],
            },
        ))
    }
}

fn binary(left: ExprLoc, op: BinOp, right: ExprLoc) -> ExprLoc {
    ExprLoc::new(
        left.loc,
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    )
}

/// Converts raw numeric-literal text (suffixes, hex, octal) into a literal
/// expression, applying a folded unary minus.
fn numeric_literal(text: &str, negate: bool, loc: Loc) -> Result<Expr, CompileError> {
    let invalid = |what: &str| CompileError::constant(format!("Invalid {what} constant [{text}]."), loc);

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let (digits, long) = match hex.strip_suffix(['l', 'L']) {
            Some(digits) => (digits, true),
            None => (hex, false),
        };
        let bits = u64::from_str_radix(digits, 16).map_err(|_| invalid(if long { "long" } else { "int" }))?;
        return hex_or_octal(bits, long, negate, &invalid);
    }

    let last = text.as_bytes().last().copied();
    match last {
        Some(b'l' | b'L') => {
            let digits = &text[..text.len() - 1];
            if let Some(octal) = octal_digits(digits) {
                let bits = u64::from_str_radix(octal, 8).map_err(|_| invalid("long"))?;
                return hex_or_octal(bits, true, negate, &invalid);
            }
            let value: i128 = digits.parse().map_err(|_| invalid("long"))?;
            let value = if negate { -value } else { value };
            let value = i64::try_from(value).map_err(|_| invalid("long"))?;
            Ok(Expr::Long(value))
        }
        Some(b'f' | b'F') => {
            let value: f32 = text[..text.len() - 1].parse().map_err(|_| invalid("float"))?;
            Ok(Expr::Float(if negate { -value } else { value }))
        }
        Some(b'd' | b'D') => {
            let value: f64 = text[..text.len() - 1].parse().map_err(|_| invalid("double"))?;
            Ok(Expr::Double(if negate { -value } else { value }))
        }
        _ if text.contains('.') || text.contains(['e', 'E']) => {
            let value: f64 = text.parse().map_err(|_| invalid("double"))?;
            Ok(Expr::Double(if negate { -value } else { value }))
        }
        _ => {
            if let Some(octal) = octal_digits(text) {
                let bits = u64::from_str_radix(octal, 8).map_err(|_| invalid("int"))?;
                return hex_or_octal(bits, false, negate, &invalid);
            }
            let value: i64 = text.parse().map_err(|_| invalid("int"))?;
            let value = if negate { -value } else { value };
            let value = i32::try_from(value).map_err(|_| invalid("int"))?;
            Ok(Expr::Int(value))
        }
    }
}

/// Leading-zero literals are octal, as on the original host.
fn octal_digits(text: &str) -> Option<&str> {
    (text.len() > 1 && text.starts_with('0')).then(|| &text[1..])
}

/// Radix literals denote raw bits: range-check against the unsigned width,
/// then reinterpret (so `0xFFFFFFFF` is int -1).
fn hex_or_octal(
    bits: u64,
    long: bool,
    negate: bool,
    invalid: &dyn Fn(&str) -> CompileError,
) -> Result<Expr, CompileError> {
    if long {
        let value = bits.cast_signed();
        Ok(Expr::Long(if negate { value.wrapping_neg() } else { value }))
    } else {
        let bits = u32::try_from(bits).map_err(|_| invalid("int"))?;
        let value = bits.cast_signed();
        Ok(Expr::Int(if negate { value.wrapping_neg() } else { value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::catalog::default_registry;

    fn parsed(source: &str) -> Script {
        let registry = default_registry().unwrap();
        parse(source, &registry).unwrap()
    }

    fn parse_err(source: &str) -> CompileError {
        let registry = default_registry().unwrap();
        parse(source, &registry).unwrap_err()
    }

    #[test]
    fn test_functions_precede_body() {
        let script = parsed("int f(int a) { return a; } return f(1);");
        assert_eq!(script.functions.len(), 1);
        assert_eq!(script.functions[0].name.as_ref(), "f");
        assert_eq!(script.body.len(), 1);
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let script = parsed("return 1 + 2 * 3;");
        let Stmt::Return(Some(expr)) = &script.body[0].stmt else {
            panic!("expected return");
        };
        let Expr::Binary { op: BinOp::Add, right, .. } = &expr.expr else {
            panic!("expected add at the top");
        };
        assert!(matches!(right.expr, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_int_min_literal_parses() {
        let script = parsed("return -2147483648;");
        let Stmt::Return(Some(expr)) = &script.body[0].stmt else {
            panic!("expected return");
        };
        assert!(matches!(expr.expr, Expr::Int(i32::MIN)));
    }

    #[test]
    fn test_int_overflow_is_constant_error() {
        let err = parse_err("return 2147483648;");
        assert_eq!(err.kind, crate::error::ErrorKind::Constant);
        assert!(err.message.contains("Invalid int constant"));
    }

    #[test]
    fn test_numeric_suffixes() {
        let script = parsed("return 1L + 2.5f + 3d + 0x10 + 010;");
        // 0x10 is 16, 010 is octal 8; shape-checking only.
        assert_eq!(script.body.len(), 1);
    }

    #[test]
    fn test_chain_links() {
        let script = parsed("return m.get('k').length();");
        let Stmt::Return(Some(expr)) = &script.body[0].stmt else {
            panic!("expected return");
        };
        let Expr::Chain { links } = &expr.expr else {
            panic!("expected chain");
        };
        assert_eq!(links.len(), 3);
        assert!(matches!(links[0].link, Link::Var(_)));
        assert!(matches!(links[1].link, Link::Call { .. }));
        assert!(matches!(links[2].link, Link::Call { .. }));
    }

    #[test]
    fn test_cast_vs_paren() {
        let script = parsed("return (int)x + (y);");
        let Stmt::Return(Some(expr)) = &script.body[0].stmt else {
            panic!("expected return");
        };
        let Expr::Binary { left, .. } = &expr.expr else {
            panic!("expected add");
        };
        assert!(matches!(left.expr, Expr::Cast { .. }));
    }

    #[test]
    fn test_lambda_forms() {
        parsed("return xs.stream().mapToInt(x -> x * x).sum();");
        parsed("return f((int a, def b) -> a, () -> 1);");
    }

    #[test]
    fn test_funcref_forms() {
        parsed("def a = Integer::parseInt; def b = ArrayList::new; def c = x::toString; def d = this::f;");
    }

    #[test]
    fn test_map_and_list_literals() {
        parsed("def m = [:]; def n = ['a': 1, 'b': 2]; def l = []; def k = [1, 2, 3];");
    }

    #[test]
    fn test_for_each_both_forms() {
        parsed("for (int x : xs) { } for (x in xs) { }");
    }

    #[test]
    fn test_missing_semicolon_is_syntax_error() {
        let err = parse_err("int x = 1 int y = 2;");
        assert_eq!(err.kind, crate::error::ErrorKind::Syntax);
    }

    #[test]
    fn test_postfix_and_prefix_inc() {
        parsed("int i = 0; ++i; i++; --i; i--; return i;");
    }

    #[test]
    fn test_regex_literal_in_expression() {
        parsed("return 'x' =~ /y/;");
        parsed("return 'x' ==~ /y+/i;");
    }
}
