//! Recursive-descent parser for the ML-with-queries grammar.
//!
//! Infix applications are desugared at parse time into `Apply(Id(op),
//! Tuple[a, b])`, so the resolver sees one application form. `andalso` and
//! `orelse` keep dedicated nodes because they short-circuit. The parser is
//! also where implicit record labels are derived and where fields with no
//! derivable label are rejected.

use crate::ast::{
    Agg, CtorDef, DatatypeBind, Decl, DeclKind, Expr, ExprKind, Field, FromExpr, FunArm, FunBind,
    GroupKey, Literal, Match, OrderItem, Pat, PatKind, Scan, ScanKind, Statement, Step, StepKind,
    TypeExpr, TypeExprKind, ValBind, infix_precedence,
};
use crate::error::{ParseError, ParseResult, Pos};
use crate::token::{Lexer, Token, TokenKind};

/// Maximum nesting depth for expressions and patterns during parsing.
/// Prevents stack overflow from pathological inputs like `((((x))))`.
#[cfg(not(debug_assertions))]
const MAX_NESTING_DEPTH: u16 = 200;
/// In debug builds stack frames are much larger, so the limit is lower.
#[cfg(debug_assertions)]
const MAX_NESTING_DEPTH: u16 = 60;

/// Identifiers that may never be bound by user patterns.
const UNBINDABLE: &[&str] = &["true", "false", "nil", "ref"];

/// Parses a whole input into `;`-separated top-level statements.
pub fn parse_statements(src: &str, file: &str) -> ParseResult<Vec<Statement>> {
    let tokens = Lexer::new(src, file).tokenize()?;
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    loop {
        while parser.eat(&TokenKind::Semi) {}
        if parser.at(&TokenKind::Eof) {
            return Ok(statements);
        }
        statements.push(parser.statement()?);
        if !parser.eat(&TokenKind::Semi) && !parser.at(&TokenKind::Eof) {
            return Err(parser.unexpected("';'"));
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: u16,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.index.min(self.tokens.len() - 1)].kind
    }

    fn peek2(&self) -> &TokenKind {
        &self.tokens[(self.index + 1).min(self.tokens.len() - 1)].kind
    }

    fn pos(&self) -> Pos {
        self.tokens[self.index.min(self.tokens.len() - 1)].pos.clone()
    }

    fn prev_pos(&self) -> Pos {
        self.tokens[self.index.saturating_sub(1)].pos.clone()
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        ParseError::new(
            self.pos(),
            format!("expected {wanted}, found {}", self.peek().describe()),
        )
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            Err(ParseError::new(self.pos(), "expression nesting too deep"))
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// `id` when the current token is a plain identifier.
    fn id(&mut self) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Id(_) => {
                let TokenKind::Id(name) = self.bump().kind else {
                    unreachable!()
                };
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn check_bindable(&self, name: &str, pos: &Pos) -> ParseResult<()> {
        if UNBINDABLE.contains(&name) {
            Err(ParseError::new(
                pos.clone(),
                format!("'{name}' is reserved and cannot be bound"),
            ))
        } else {
            Ok(())
        }
    }

    // ── statements and declarations ────────────────────────────────────

    fn statement(&mut self) -> ParseResult<Statement> {
        match self.peek() {
            TokenKind::Val
            | TokenKind::Fun
            | TokenKind::Datatype
            | TokenKind::Type
            | TokenKind::Over => Ok(Statement::Decl(self.decl()?)),
            _ => Ok(Statement::Expr(self.expr()?)),
        }
    }

    fn decl(&mut self) -> ParseResult<Decl> {
        let pos = self.pos();
        match self.peek() {
            TokenKind::Val => {
                self.bump();
                let rec = self.eat(&TokenKind::Rec);
                // `val inst f = e` adds an overload instance; `inst` is
                // contextual, so it only counts when another identifier
                // follows it.
                let inst = !rec
                    && matches!(self.peek(), TokenKind::Id(id) if id == "inst")
                    && matches!(self.peek2(), TokenKind::Id(_));
                if inst {
                    self.bump();
                }
                let mut binds = vec![self.val_bind()?];
                while self.eat(&TokenKind::And) {
                    binds.push(self.val_bind()?);
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::Val { rec, inst, binds },
                })
            }
            TokenKind::Fun => {
                self.bump();
                let mut binds = vec![self.fun_bind()?];
                while self.eat(&TokenKind::And) {
                    binds.push(self.fun_bind()?);
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::Fun(binds),
                })
            }
            TokenKind::Datatype => {
                self.bump();
                let mut binds = vec![self.datatype_bind()?];
                while self.eat(&TokenKind::And) {
                    binds.push(self.datatype_bind()?);
                }
                Ok(Decl {
                    pos,
                    kind: DeclKind::Datatype(binds),
                })
            }
            TokenKind::Type => {
                self.bump();
                let params = self.type_params()?;
                let name = self.id()?;
                self.expect(&TokenKind::Eq)?;
                let ty = self.type_expr()?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::TypeAlias { name, params, ty },
                })
            }
            TokenKind::Over => {
                self.bump();
                let name = self.id()?;
                Ok(Decl {
                    pos,
                    kind: DeclKind::Over(name),
                })
            }
            _ => Err(self.unexpected("a declaration")),
        }
    }

    fn val_bind(&mut self) -> ParseResult<ValBind> {
        let pat = self.pat()?;
        self.expect(&TokenKind::Eq)?;
        let exp = self.expr()?;
        Ok(ValBind { pat, exp })
    }

    fn fun_bind(&mut self) -> ParseResult<FunBind> {
        let pos = self.pos();
        let name = self.id()?;
        self.check_bindable(&name, &pos)?;
        let mut arms = vec![self.fun_arm()?];
        while self.eat(&TokenKind::Bar) {
            let arm_pos = self.pos();
            let arm_name = self.id()?;
            if arm_name != name {
                return Err(ParseError::new(
                    arm_pos,
                    format!("clauses of '{name}' must all use the same function name"),
                ));
            }
            arms.push(self.fun_arm()?);
        }
        let arity = arms[0].pats.len();
        if arms.iter().any(|arm| arm.pats.len() != arity) {
            return Err(ParseError::new(
                pos,
                format!("clauses of '{name}' have differing numbers of patterns"),
            ));
        }
        Ok(FunBind { pos, name, arms })
    }

    fn fun_arm(&mut self) -> ParseResult<FunArm> {
        let mut pats = vec![self.atomic_pat()?];
        while self.starts_atomic_pat() {
            pats.push(self.atomic_pat()?);
        }
        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.type_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq)?;
        let body = self.expr()?;
        Ok(FunArm { pats, ret, body })
    }

    fn type_params(&mut self) -> ParseResult<Vec<String>> {
        match self.peek().clone() {
            TokenKind::TyVarId { name, .. } => {
                self.bump();
                Ok(vec![name])
            }
            TokenKind::LParen if matches!(self.peek2(), TokenKind::TyVarId { .. }) => {
                self.bump();
                let mut params = Vec::new();
                loop {
                    match self.bump().kind {
                        TokenKind::TyVarId { name, .. } => params.push(name),
                        _ => return Err(self.unexpected("a type variable")),
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen)?;
                Ok(params)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn datatype_bind(&mut self) -> ParseResult<DatatypeBind> {
        let params = self.type_params()?;
        let name = self.id()?;
        self.expect(&TokenKind::Eq)?;
        let mut ctors = vec![self.ctor_def()?];
        while self.eat(&TokenKind::Bar) {
            ctors.push(self.ctor_def()?);
        }
        Ok(DatatypeBind { name, params, ctors })
    }

    fn ctor_def(&mut self) -> ParseResult<CtorDef> {
        let name = self.id()?;
        let arg = if self.eat(&TokenKind::Of) {
            Some(self.type_expr()?)
        } else {
            None
        };
        Ok(CtorDef { name, arg })
    }

    // ── expressions ────────────────────────────────────────────────────

    fn expr(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let result = self.orelse_expr();
        self.leave();
        result
    }

    fn orelse_expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.andalso_expr()?;
        while self.at(&TokenKind::OrElse) {
            self.bump();
            let rhs = self.andalso_expr()?;
            let pos = lhs.pos.union(&rhs.pos);
            lhs = Expr::new(pos, ExprKind::OrElse(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn andalso_expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.annotated_expr()?;
        while self.at(&TokenKind::AndAlso) {
            self.bump();
            let rhs = self.annotated_expr()?;
            let pos = lhs.pos.union(&rhs.pos);
            lhs = Expr::new(pos, ExprKind::AndAlso(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn annotated_expr(&mut self) -> ParseResult<Expr> {
        let mut exp = self.infix_expr(0)?;
        while self.at(&TokenKind::Colon) {
            self.bump();
            let ty = self.type_expr()?;
            let pos = exp.pos.union(&ty.pos);
            exp = Expr::new(pos, ExprKind::Annotated(Box::new(exp), ty));
        }
        Ok(exp)
    }

    /// The infix operator starting at the current token, if any.
    fn peek_infix(&self) -> Option<(&'static str, u8)> {
        let name = match self.peek() {
            TokenKind::Eq => "=",
            TokenKind::NotEq => "<>",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Caret => "^",
            TokenKind::Cons => "::",
            TokenKind::At => "@",
            TokenKind::Id(id) if id == "div" => "div",
            TokenKind::Id(id) if id == "mod" => "mod",
            TokenKind::Id(id) if id == "o" => "o",
            _ => return None,
        };
        infix_precedence(name).map(|p| (name_static(name), p))
    }

    /// Precedence-climbing infix parser. `::` and `@` are right-associative;
    /// every other operator is left-associative.
    fn infix_expr(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.app_expr()?;
        while let Some((op, prec)) = self.peek_infix() {
            if prec < min_prec {
                break;
            }
            let op_pos = self.pos();
            self.bump();
            let right_assoc = op == "::" || op == "@";
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.infix_expr(next_min)?;
            let pos = lhs.pos.union(&rhs.pos);
            let func = Expr::new(op_pos, ExprKind::Id(op.to_owned()));
            let arg = Expr::new(pos.clone(), ExprKind::Tuple(vec![lhs, rhs]));
            lhs = Expr::new(pos, ExprKind::Apply(Box::new(func), Box::new(arg)));
        }
        Ok(lhs)
    }

    fn app_expr(&mut self) -> ParseResult<Expr> {
        let mut exp = self.keyword_or_atomic_expr()?;
        while self.starts_atomic_expr() {
            let arg = self.atomic_expr()?;
            let pos = exp.pos.union(&arg.pos);
            exp = Expr::new(pos, ExprKind::Apply(Box::new(exp), Box::new(arg)));
        }
        Ok(exp)
    }

    /// The keyword-introduced expressions extend maximally to the right, so
    /// they sit at the head of an application sequence and swallow the rest
    /// of the phrase.
    fn keyword_or_atomic_expr(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        match self.peek() {
            TokenKind::If => {
                self.bump();
                let cond = self.expr()?;
                self.expect(&TokenKind::Then)?;
                let then_exp = self.expr()?;
                self.expect(&TokenKind::Else)?;
                let else_exp = self.expr()?;
                let pos = pos.union(&else_exp.pos);
                Ok(Expr::new(
                    pos,
                    ExprKind::If(Box::new(cond), Box::new(then_exp), Box::new(else_exp)),
                ))
            }
            TokenKind::Case => {
                self.bump();
                let scrutinee = self.expr()?;
                self.expect(&TokenKind::Of)?;
                let arms = self.match_arms()?;
                let pos = pos.union(&arms.last().expect("at least one arm").exp.pos);
                Ok(Expr::new(pos, ExprKind::Case(Box::new(scrutinee), arms)))
            }
            TokenKind::Fn => {
                self.bump();
                let arms = self.match_arms()?;
                let pos = pos.union(&arms.last().expect("at least one arm").exp.pos);
                Ok(Expr::new(pos, ExprKind::Fn(arms)))
            }
            TokenKind::From => self.from_expr(),
            _ => self.atomic_expr(),
        }
    }

    fn match_arms(&mut self) -> ParseResult<Vec<Match>> {
        let mut arms = vec![self.match_arm()?];
        while self.eat(&TokenKind::Bar) {
            arms.push(self.match_arm()?);
        }
        Ok(arms)
    }

    fn match_arm(&mut self) -> ParseResult<Match> {
        let pos = self.pos();
        let pat = self.pat()?;
        self.expect(&TokenKind::DoubleArrow)?;
        let exp = self.expr()?;
        let pos = pos.union(&exp.pos);
        Ok(Match { pos, pat, exp })
    }

    fn starts_atomic_expr(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Id(_)
                | TokenKind::Int(_)
                | TokenKind::Real(_)
                | TokenKind::Char(_)
                | TokenKind::Str(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Hash
                | TokenKind::Tilde
                | TokenKind::Let
        ) && self.peek_infix().is_none()
    }

    fn atomic_expr(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let result = self.atomic_expr_inner();
        self.leave();
        result
    }

    fn atomic_expr_inner(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Expr::new(pos, ExprKind::Literal(Literal::Int(n))))
            }
            TokenKind::Real(x) => {
                self.bump();
                Ok(Expr::new(pos, ExprKind::Literal(Literal::Real(x))))
            }
            TokenKind::Char(c) => {
                self.bump();
                Ok(Expr::new(pos, ExprKind::Literal(Literal::Char(c))))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::new(pos, ExprKind::Literal(Literal::Str(s.into()))))
            }
            TokenKind::Id(name) => {
                self.bump();
                let kind = match name.as_str() {
                    "true" => ExprKind::Literal(Literal::Bool(true)),
                    "false" => ExprKind::Literal(Literal::Bool(false)),
                    _ => ExprKind::Id(name),
                };
                Ok(Expr::new(pos, kind))
            }
            TokenKind::Tilde => {
                // unary negation is an ordinary function application
                self.bump();
                let arg = self.atomic_expr()?;
                let pos = pos.union(&arg.pos);
                let func = Expr::new(pos.clone(), ExprKind::Id("~".to_owned()));
                Ok(Expr::new(pos, ExprKind::Apply(Box::new(func), Box::new(arg))))
            }
            TokenKind::Hash => {
                self.bump();
                let label = match self.peek().clone() {
                    TokenKind::Id(name) => {
                        self.bump();
                        name
                    }
                    TokenKind::Int(n) if n > 0 => {
                        self.bump();
                        n.to_string()
                    }
                    _ => return Err(self.unexpected("a field label after '#'")),
                };
                Ok(Expr::new(pos, ExprKind::RecordSelector(label)))
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::new(pos, ExprKind::Literal(Literal::Unit)));
                }
                let first = self.expr()?;
                if self.eat(&TokenKind::Comma) {
                    let mut elems = vec![first];
                    loop {
                        elems.push(self.expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    let pos = pos.union(&self.prev_pos());
                    Ok(Expr::new(pos, ExprKind::Tuple(elems)))
                } else {
                    self.expect(&TokenKind::RParen)?;
                    Ok(first)
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                let pos = pos.union(&self.prev_pos());
                Ok(Expr::new(pos, ExprKind::List(elems)))
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                if !self.at(&TokenKind::RBrace) {
                    loop {
                        fields.push(self.record_field()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                let pos = pos.union(&self.prev_pos());
                Ok(Expr::new(pos, ExprKind::Record(fields)))
            }
            TokenKind::Let => {
                self.bump();
                let mut decls = Vec::new();
                while !self.at(&TokenKind::In) {
                    decls.push(self.decl()?);
                    self.eat(&TokenKind::Semi);
                }
                self.expect(&TokenKind::In)?;
                let body = self.expr()?;
                self.expect(&TokenKind::End)?;
                let pos = pos.union(&self.prev_pos());
                Ok(Expr::new(pos, ExprKind::Let(decls, Box::new(body))))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn record_field(&mut self) -> ParseResult<Field> {
        // `label = exp` with an explicit label
        if let TokenKind::Id(label) = self.peek().clone() {
            if self.peek2() == &TokenKind::Eq {
                self.bump();
                self.bump();
                let exp = self.expr()?;
                return Ok(Field {
                    label: Some(label),
                    exp,
                });
            }
        }
        // otherwise the label must be derivable from the expression
        let exp = self.expr()?;
        match derived_label(&exp) {
            Some(_) => Ok(Field { label: None, exp }),
            None => Err(ParseError::new(
                exp.pos.clone(),
                "cannot derive a label for this record field; write 'label = expression'",
            )),
        }
    }

    // ── from expressions ───────────────────────────────────────────────

    fn from_expr(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        self.expect(&TokenKind::From)?;
        let mut scans = Vec::new();
        if !self.starts_step() && !self.at(&TokenKind::Eof) && self.starts_atomic_pat() {
            loop {
                scans.push(self.scan()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let mut steps = Vec::new();
        while self.starts_step() {
            steps.push(self.step()?);
        }
        let pos = pos.union(&self.prev_pos());
        Ok(Expr::new(pos, ExprKind::From(Box::new(FromExpr { scans, steps }))))
    }

    fn scan(&mut self) -> ParseResult<Scan> {
        let pat = self.pat()?;
        let kind = if self.eat(&TokenKind::In) {
            ScanKind::In
        } else if self.eat(&TokenKind::Eq) {
            ScanKind::Eq
        } else {
            return Err(self.unexpected("'in' or '=' in from clause"));
        };
        let source = self.expr()?;
        Ok(Scan { pat, kind, source })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Where
                | TokenKind::Yield
                | TokenKind::Skip
                | TokenKind::Take
                | TokenKind::Order
                | TokenKind::Group
                | TokenKind::Unorder
                | TokenKind::Distinct
                | TokenKind::Union
                | TokenKind::Intersect
                | TokenKind::Except
        )
    }

    fn step(&mut self) -> ParseResult<Step> {
        let pos = self.pos();
        let kind = match self.bump().kind {
            TokenKind::Where => StepKind::Where(self.expr()?),
            TokenKind::Yield => StepKind::Yield(self.expr()?),
            TokenKind::Skip => StepKind::Skip(self.expr()?),
            TokenKind::Take => StepKind::Take(self.expr()?),
            TokenKind::Unorder => StepKind::Unorder,
            TokenKind::Distinct => StepKind::Distinct,
            TokenKind::Order => {
                let mut items = vec![self.order_item()?];
                while self.eat(&TokenKind::Comma) {
                    items.push(self.order_item()?);
                }
                StepKind::Order(items)
            }
            TokenKind::Group => {
                let mut keys = vec![self.group_key()?];
                while self.eat(&TokenKind::Comma) {
                    keys.push(self.group_key()?);
                }
                let aggs = if self.eat(&TokenKind::Compute) {
                    self.computes()?
                } else {
                    Vec::new()
                };
                StepKind::Group { keys, aggs }
            }
            TokenKind::Union => {
                let distinct = self.eat(&TokenKind::Distinct);
                StepKind::Union {
                    distinct,
                    arg: self.atomic_expr()?,
                }
            }
            TokenKind::Intersect => {
                let distinct = self.eat(&TokenKind::Distinct);
                StepKind::Intersect {
                    distinct,
                    arg: self.atomic_expr()?,
                }
            }
            TokenKind::Except => {
                let distinct = self.eat(&TokenKind::Distinct);
                StepKind::Except {
                    distinct,
                    arg: self.atomic_expr()?,
                }
            }
            _ => unreachable!("starts_step() checked"),
        };
        Ok(Step { pos, kind })
    }

    fn order_item(&mut self) -> ParseResult<OrderItem> {
        let exp = self.infix_expr(0)?;
        let desc = self.eat(&TokenKind::Desc);
        Ok(OrderItem { exp, desc })
    }

    fn group_key(&mut self) -> ParseResult<GroupKey> {
        let pos = self.pos();
        let name = self.id()?;
        self.check_bindable(&name, &pos)?;
        self.expect(&TokenKind::Eq)?;
        let exp = self.infix_expr(0)?;
        Ok(GroupKey { name, exp })
    }

    fn computes(&mut self) -> ParseResult<Vec<Agg>> {
        if self.eat(&TokenKind::LBrace) {
            let mut aggs = vec![self.agg()?];
            while self.eat(&TokenKind::Comma) {
                aggs.push(self.agg()?);
            }
            self.expect(&TokenKind::RBrace)?;
            Ok(aggs)
        } else {
            Ok(vec![self.agg()?])
        }
    }

    fn agg(&mut self) -> ParseResult<Agg> {
        let pos = self.pos();
        let name = self.id()?;
        self.check_bindable(&name, &pos)?;
        self.expect(&TokenKind::Eq)?;
        let func = self.app_expr()?;
        let arg = if self.eat(&TokenKind::Of) {
            Some(self.infix_expr(0)?)
        } else {
            None
        };
        Ok(Agg { name, func, arg })
    }

    // ── patterns ───────────────────────────────────────────────────────

    fn pat(&mut self) -> ParseResult<Pat> {
        self.enter()?;
        let result = self.cons_pat();
        self.leave();
        result
    }

    fn cons_pat(&mut self) -> ParseResult<Pat> {
        let lhs = self.app_pat()?;
        if self.eat(&TokenKind::Cons) {
            let rhs = self.cons_pat()?;
            let pos = lhs.pos.union(&rhs.pos);
            Ok(Pat::new(pos, PatKind::Cons(Box::new(lhs), Box::new(rhs))))
        } else if self.eat(&TokenKind::Colon) {
            let ty = self.type_expr()?;
            let pos = lhs.pos.union(&ty.pos);
            Ok(Pat::new(pos, PatKind::Annotated(Box::new(lhs), ty)))
        } else {
            Ok(lhs)
        }
    }

    fn app_pat(&mut self) -> ParseResult<Pat> {
        let pos = self.pos();
        if let TokenKind::Id(name) = self.peek().clone() {
            if !matches!(name.as_str(), "true" | "false") && self.id_starts_pat_arg() {
                self.bump();
                let arg = self.atomic_pat()?;
                let pos = pos.union(&arg.pos);
                return Ok(Pat::new(pos, PatKind::Ctor(name, Box::new(arg))));
            }
        }
        self.atomic_pat()
    }

    /// True when the token after the current identifier begins an atomic
    /// pattern, i.e. the identifier is a constructor applied to an argument.
    fn id_starts_pat_arg(&self) -> bool {
        matches!(
            self.peek2(),
            TokenKind::Id(_)
                | TokenKind::Int(_)
                | TokenKind::Real(_)
                | TokenKind::Char(_)
                | TokenKind::Str(_)
                | TokenKind::Underscore
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
        )
    }

    fn starts_atomic_pat(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Id(_)
                | TokenKind::Int(_)
                | TokenKind::Real(_)
                | TokenKind::Char(_)
                | TokenKind::Str(_)
                | TokenKind::Underscore
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
        )
    }

    fn atomic_pat(&mut self) -> ParseResult<Pat> {
        self.enter()?;
        let result = self.atomic_pat_inner();
        self.leave();
        result
    }

    fn atomic_pat_inner(&mut self) -> ParseResult<Pat> {
        let pos = self.pos();
        match self.peek().clone() {
            TokenKind::Underscore => {
                self.bump();
                Ok(Pat::new(pos, PatKind::Wild))
            }
            TokenKind::Int(n) => {
                self.bump();
                Ok(Pat::new(pos, PatKind::Literal(Literal::Int(n))))
            }
            TokenKind::Real(x) => {
                self.bump();
                Ok(Pat::new(pos, PatKind::Literal(Literal::Real(x))))
            }
            TokenKind::Char(c) => {
                self.bump();
                Ok(Pat::new(pos, PatKind::Literal(Literal::Char(c))))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Pat::new(pos, PatKind::Literal(Literal::Str(s.into()))))
            }
            TokenKind::Id(name) => {
                self.bump();
                let kind = match name.as_str() {
                    "true" => PatKind::Literal(Literal::Bool(true)),
                    "false" => PatKind::Literal(Literal::Bool(false)),
                    _ => PatKind::Id(name),
                };
                Ok(Pat::new(pos, kind))
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Pat::new(pos, PatKind::Literal(Literal::Unit)));
                }
                let first = self.pat()?;
                if self.eat(&TokenKind::Comma) {
                    let mut elems = vec![first];
                    loop {
                        elems.push(self.pat()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    let pos = pos.union(&self.prev_pos());
                    Ok(Pat::new(pos, PatKind::Tuple(elems)))
                } else {
                    self.expect(&TokenKind::RParen)?;
                    Ok(first)
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.pat()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                let pos = pos.union(&self.prev_pos());
                Ok(Pat::new(pos, PatKind::List(elems)))
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                let mut ellipsis = false;
                if !self.at(&TokenKind::RBrace) {
                    loop {
                        if self.eat(&TokenKind::Ellipsis) {
                            ellipsis = true;
                            break;
                        }
                        let label = self.id()?;
                        let pat = if self.eat(&TokenKind::Eq) {
                            Some(self.pat()?)
                        } else {
                            None
                        };
                        fields.push((label, pat));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                let pos = pos.union(&self.prev_pos());
                Ok(Pat::new(pos, PatKind::Record { fields, ellipsis }))
            }
            _ => Err(self.unexpected("a pattern")),
        }
    }

    // ── types ──────────────────────────────────────────────────────────

    fn type_expr(&mut self) -> ParseResult<TypeExpr> {
        self.enter()?;
        let result = self.fn_type();
        self.leave();
        result
    }

    fn fn_type(&mut self) -> ParseResult<TypeExpr> {
        let param = self.tuple_type()?;
        if self.eat(&TokenKind::Arrow) {
            let result = self.fn_type()?;
            let pos = param.pos.union(&result.pos);
            Ok(TypeExpr {
                pos,
                kind: TypeExprKind::Fn(Box::new(param), Box::new(result)),
            })
        } else {
            Ok(param)
        }
    }

    fn tuple_type(&mut self) -> ParseResult<TypeExpr> {
        let first = self.postfix_type()?;
        if !self.at(&TokenKind::Star) {
            return Ok(first);
        }
        let mut elems = vec![first];
        while self.eat(&TokenKind::Star) {
            elems.push(self.postfix_type()?);
        }
        let pos = elems[0].pos.union(&elems.last().expect("nonempty").pos);
        Ok(TypeExpr {
            pos,
            kind: TypeExprKind::Tuple(elems),
        })
    }

    /// Postfix constructor application: `int list`, `(int, string) pair`.
    fn postfix_type(&mut self) -> ParseResult<TypeExpr> {
        let pos = self.pos();
        let mut args: Vec<TypeExpr>;
        match self.peek().clone() {
            TokenKind::LParen => {
                self.bump();
                let first = self.type_expr()?;
                if self.eat(&TokenKind::Comma) {
                    args = vec![first];
                    loop {
                        args.push(self.type_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    // a parenthesized argument list must be followed by a
                    // constructor name
                    let name = self.id()?;
                    let mut ty = TypeExpr {
                        pos: pos.union(&self.prev_pos()),
                        kind: TypeExprKind::Con { name, args },
                    };
                    while matches!(self.peek(), TokenKind::Id(_)) {
                        ty = self.postfix_apply(ty)?;
                    }
                    return Ok(ty);
                }
                self.expect(&TokenKind::RParen)?;
                args = vec![first];
            }
            TokenKind::TyVarId { name, eq } => {
                self.bump();
                args = vec![TypeExpr {
                    pos: pos.clone(),
                    kind: TypeExprKind::Var { name, eq },
                }];
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                if !self.at(&TokenKind::RBrace) {
                    loop {
                        let label = self.id()?;
                        self.expect(&TokenKind::Colon)?;
                        let ty = self.type_expr()?;
                        fields.push((label, ty));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                args = vec![TypeExpr {
                    pos: pos.union(&self.prev_pos()),
                    kind: TypeExprKind::Record(fields),
                }];
            }
            TokenKind::Id(name) => {
                self.bump();
                args = vec![TypeExpr {
                    pos: pos.clone(),
                    kind: TypeExprKind::Con { name, args: Vec::new() },
                }];
            }
            _ => return Err(self.unexpected("a type")),
        }
        let mut ty = args.pop().expect("one element");
        while matches!(self.peek(), TokenKind::Id(_)) {
            ty = self.postfix_apply(ty)?;
        }
        Ok(ty)
    }

    fn postfix_apply(&mut self, arg: TypeExpr) -> ParseResult<TypeExpr> {
        let name = self.id()?;
        let pos = arg.pos.union(&self.prev_pos());
        Ok(TypeExpr {
            pos,
            kind: TypeExprKind::Con { name, args: vec![arg] },
        })
    }
}

fn name_static(name: &str) -> &'static str {
    crate::ast::INFIX_OPS
        .iter()
        .find(|(op, _)| *op == name)
        .map(|(op, _)| *op)
        .expect("known infix operator")
}

/// The implicit label of a record-expression field, when one is derivable:
/// a bare identifier contributes its own name, a selector application
/// `#a r` contributes `a`.
pub fn derived_label(exp: &Expr) -> Option<String> {
    match &exp.kind {
        ExprKind::Id(name) => Some(name.rsplit('.').next().unwrap_or(name).to_owned()),
        ExprKind::Apply(func, _) => match &func.kind {
            ExprKind::RecordSelector(label) => Some(label.clone()),
            _ => None,
        },
        ExprKind::Annotated(inner, _) => derived_label(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Statement {
        let mut statements = parse_statements(src, "test").unwrap();
        assert_eq!(statements.len(), 1, "expected one statement in {src:?}");
        statements.remove(0)
    }

    fn round_trip(src: &str) {
        let first = parse_one(src);
        let printed = first.to_string();
        let second = parse_one(&printed);
        assert_eq!(printed, second.to_string(), "round trip diverged for {src:?}");
    }

    #[test]
    fn precedence() {
        let stmt = parse_one("1 + 2 * 3;");
        assert_eq!(stmt.to_string(), "1 + 2 * 3");
        let stmt = parse_one("(1 + 2) * 3;");
        assert_eq!(stmt.to_string(), "(1 + 2) * 3");
    }

    #[test]
    fn cons_is_right_associative() {
        let stmt = parse_one("1 :: 2 :: [3];");
        assert_eq!(stmt.to_string(), "1 :: 2 :: [3]");
        let stmt = parse_one("(1 :: [2]) :: [[3]];");
        assert_eq!(stmt.to_string(), "(1 :: [2]) :: [[3]]");
    }

    #[test]
    fn round_trips() {
        round_trip("val x = 1;");
        round_trip("fun fact 0 = 1 | fact n = n * fact (n - 1);");
        round_trip("datatype 'a option = NONE | SOME of 'a;");
        round_trip("case xs of [] => 0 | x :: _ => x;");
        round_trip("let val x = 1 in x + 1 end;");
        round_trip("from x in xs where x > 1 yield x * 2;");
        round_trip("from e in emps group d = #dept e compute {c = count of e};");
        round_trip("fn {a, b = (x, y), ...} => a + x;");
        round_trip("if a then b else c;");
        round_trip("[#\"a\", #\"\\n\"];");
    }

    #[test]
    fn from_eq_vs_in() {
        let Statement::Expr(exp) = parse_one("from x = 1, y in ys yield x + y;") else {
            panic!("expected expression");
        };
        let ExprKind::From(from) = exp.kind else {
            panic!("expected from");
        };
        assert_eq!(from.scans[0].kind, ScanKind::Eq);
        assert_eq!(from.scans[1].kind, ScanKind::In);
    }

    #[test]
    fn reserved_names_are_not_bindable() {
        assert!(parse_statements("fun nil x = x;", "test").is_err());
        assert!(parse_statements("fun true x = x;", "test").is_err());
    }

    #[test]
    fn record_field_labels() {
        let stmt = parse_one("{x, a = 1, #b r};");
        assert_eq!(stmt.to_string(), "{x, a = 1, #b r}");
        assert!(parse_statements("{1 + 2};", "test").is_err());
    }

    #[test]
    fn annotation() {
        round_trip("val f = fn x => x : int;");
        round_trip("val p = (1, \"a\") : int * string;");
    }

    #[test]
    fn nesting_guard() {
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_statements(&format!("{deep};"), "test").is_err());
    }
}
