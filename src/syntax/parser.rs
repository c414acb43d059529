//! The expression parser and semantic analyzer.
//!
//! Recursive descent over a fixed precedence table; every reduction emits a
//! typed node, so parsing and type checking are one pass. A parser instance
//! serves exactly one parse: construct, call `parse` or `parse_ordering`,
//! discard.
//!
//! Precedence, low to high: `?:`; `||`/`or`; `in`; `&&`/`and`; `|`, `&`;
//! equality; relational; shift; additive; multiplicative; unary; primary.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binder::overload::{resolve_overloads, Candidate, Resolution};
use crate::binder::promote::{explicit_conversion_allowed, explicit_convert, promote};
use crate::binder::signatures::{signatures, OpCategory};
use crate::expression::error::{ParseError, ParseErrorKind, ParseResult};
use crate::expression::node::{
    BinaryOp, Expr, ExprKind, LambdaExpr, LiteralTable, ParamDef, ParamRef, SeqOp, UnaryOp,
};
use crate::runtime::dynclass::{self, DynamicProperty};
use crate::runtime::value::Value;
use crate::syntax::lexer::Lexer;
use crate::syntax::number::{NumberKind, NumberParserRegistry};
use crate::syntax::token::{Token, TokenKind};
use crate::types::builtins;
use crate::types::class::{self, CtorDef, MethodDef};
use crate::types::registry::{TypeEntry, TypeRegistry};
use crate::types::ty::Ty;

/// A substitution value bound into the parser at construction and
/// addressable as `@i`, or by name through the externals map.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Lambda(Arc<LambdaExpr>),
    Expr(Expr),
    Map(HashMap<String, Binding>),
}

#[derive(Debug, Clone)]
enum Symbol {
    Param(ParamRef),
    Binding(Binding),
}

pub struct ExpressionParser<'a> {
    registry: &'a TypeRegistry,
    numbers: Arc<NumberParserRegistry>,
    lexer: Lexer,
    token: Token,
    symbols: HashMap<String, Symbol>,
    externals: Option<HashMap<String, Binding>>,
    it: Option<Expr>,
    parent: Option<Expr>,
    root: Option<Expr>,
    literals: LiteralTable,
}

impl<'a> std::fmt::Debug for ExpressionParser<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionParser").finish_non_exhaustive()
    }
}

impl<'a> ExpressionParser<'a> {
    /// Build a parser over `text` with the given parameters in scope and
    /// positional substitution values. A trailing map value becomes the
    /// externals dictionary.
    pub fn new(
        registry: &'a TypeRegistry,
        numbers: Arc<NumberParserRegistry>,
        text: &str,
        params: &[ParamRef],
        values: Vec<Binding>,
    ) -> ParseResult<Self> {
        let mut lexer = Lexer::new(text, numbers.clone());
        let token = lexer.next_token()?;
        let mut parser = ExpressionParser {
            registry,
            numbers,
            lexer,
            token,
            symbols: HashMap::new(),
            externals: None,
            it: None,
            parent: None,
            root: None,
            literals: LiteralTable::new(),
        };
        parser.process_parameters(params)?;
        parser.process_values(values);
        Ok(parser)
    }

    fn process_parameters(&mut self, params: &[ParamRef]) -> ParseResult<()> {
        for param in params {
            if !param.name.is_empty() {
                self.add_symbol(&param.name.clone(), Symbol::Param(param.clone()))?;
            }
        }
        if params.len() == 1 {
            let it = Expr::parameter(params[0].clone());
            self.root = Some(it.clone());
            self.it = Some(it);
        }
        Ok(())
    }

    fn process_values(&mut self, values: Vec<Binding>) {
        let count = values.len();
        for (i, value) in values.into_iter().enumerate() {
            if i == count - 1 {
                if let Binding::Map(map) = value {
                    self.externals = Some(
                        map.into_iter()
                            .map(|(k, v)| (k.to_ascii_lowercase(), v))
                            .collect(),
                    );
                    continue;
                }
            }
            self.symbols
                .insert(format!("@{}", i), Symbol::Binding(value));
        }
    }

    fn add_symbol(&mut self, name: &str, symbol: Symbol) -> ParseResult<()> {
        let key = name.to_ascii_lowercase();
        if self.symbols.contains_key(&key) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateIdentifier(name.to_string()),
                0,
            ));
        }
        self.symbols.insert(key, symbol);
        Ok(())
    }

    /// Parse to end of input; with a result type, the expression is
    /// promoted exactly to it.
    pub fn parse(&mut self, result_ty: Option<&Ty>) -> ParseResult<Expr> {
        let expr_pos = self.token.pos;
        let mut expr = self.parse_expression()?;
        if let Some(target) = result_ty {
            expr = promote(&expr, target, true, &self.literals).ok_or_else(|| {
                ParseError::new(
                    ParseErrorKind::ExpressionTypeExpected(target.to_string()),
                    expr_pos,
                )
            })?;
        }
        self.validate_end()?;
        Ok(expr)
    }

    /// Parse a comma-separated ordering list: expression then optional
    /// `asc`/`ascending`/`desc`/`descending`. Anything after the final
    /// selector is a syntax error.
    pub fn parse_ordering(&mut self) -> ParseResult<Vec<(Expr, bool)>> {
        let mut orderings = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let mut ascending = true;
            if self.token.identifier_is("asc") || self.token.identifier_is("ascending") {
                self.next()?;
            } else if self.token.identifier_is("desc") || self.token.identifier_is("descending") {
                self.next()?;
                ascending = false;
            }
            orderings.push((expr, ascending));
            if self.token.kind == TokenKind::Comma {
                self.next()?;
                continue;
            }
            break;
        }
        self.validate_end()?;
        Ok(orderings)
    }

    fn validate_end(&self) -> ParseResult<()> {
        if !self.token.is_end() {
            return Err(self.error(ParseErrorKind::SyntaxError));
        }
        Ok(())
    }

    fn next(&mut self) -> ParseResult<()> {
        self.token = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(kind, self.token.pos)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<()> {
        if self.token.kind == kind {
            self.next()
        } else {
            Err(self.error(ParseErrorKind::Expected(what.to_string())))
        }
    }

    // ?: -------------------------------------------------------------

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let error_pos = self.token.pos;
        let expr = self.parse_logical_or()?;
        if self.token.kind == TokenKind::Question {
            self.next()?;
            let then_expr = self.parse_expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let else_expr = self.parse_expression()?;
            return self.generate_conditional(expr, then_expr, else_expr, error_pos);
        }
        Ok(expr)
    }

    fn generate_conditional(
        &self,
        test: Expr,
        then_expr: Expr,
        else_expr: Expr,
        error_pos: usize,
    ) -> ParseResult<Expr> {
        if test.ty != Ty::Bool {
            return Err(ParseError::new(ParseErrorKind::FirstExprMustBeBool, error_pos));
        }
        let (then_expr, else_expr) = if then_expr.ty == else_expr.ty {
            (then_expr, else_expr)
        } else {
            let else_as_then = promote(&else_expr, &then_expr.ty, true, &self.literals);
            let then_as_else = promote(&then_expr, &else_expr.ty, true, &self.literals);
            match (else_as_then, then_as_else) {
                (Some(e), None) => (then_expr, e),
                (None, Some(t)) => (t, else_expr),
                (Some(_), Some(_)) => {
                    return Err(ParseError::new(
                        ParseErrorKind::BothTypesConvert {
                            a: then_expr.ty.to_string(),
                            b: else_expr.ty.to_string(),
                        },
                        error_pos,
                    ))
                }
                (None, None) => {
                    return Err(ParseError::new(
                        ParseErrorKind::NeitherTypeConverts {
                            a: then_expr.ty.to_string(),
                            b: else_expr.ty.to_string(),
                        },
                        error_pos,
                    ))
                }
            }
        };
        Ok(Expr::conditional(test, then_expr, else_expr))
    }

    // ||, or ----------------------------------------------------------

    fn parse_logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_in_operator()?;
        while self.token.kind == TokenKind::DoubleBar || self.token.identifier_is("or") {
            let op = self.token.clone();
            self.next()?;
            let mut right = self.parse_in_operator()?;
            self.check_and_promote_binary(OpCategory::Logical, &op, &mut left, &mut right)?;
            let ty = left.ty.clone();
            left = Expr::binary(BinaryOp::Or, left, right, ty);
        }
        Ok(left)
    }

    // in ---------------------------------------------------------------

    fn parse_in_operator(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_logical_and()?;
        while self.token.identifier_is("in") {
            let op_pos = self.token.pos;
            self.next()?;
            if self.token.kind == TokenKind::OpenParen {
                left = self.parse_in_list(left)?;
            } else {
                left = self.parse_in_container(left, op_pos)?;
            }
        }
        Ok(left)
    }

    /// `x in (a, b, c)` lowers to an OR chain of equalities; every element
    /// must carry the operand's type.
    fn parse_in_list(&mut self, needle: Expr) -> ParseResult<Expr> {
        self.next()?;
        let mut result: Option<Expr> = None;
        loop {
            let elem_pos = self.token.pos;
            let elem = self.parse_expression()?;
            let elem = promote(&elem, &needle.ty, true, &self.literals).ok_or_else(|| {
                ParseError::new(
                    ParseErrorKind::ExpressionTypeExpected(needle.ty.to_string()),
                    elem_pos,
                )
            })?;
            let eq = Expr::binary(BinaryOp::Eq, needle.clone(), elem, Ty::Bool);
            result = Some(match result {
                None => eq,
                Some(acc) => Expr::binary(BinaryOp::Or, acc, eq, Ty::Bool),
            });
            if self.token.kind == TokenKind::Comma {
                self.next()?;
                continue;
            }
            break;
        }
        self.expect(TokenKind::CloseParen, "')' or ','")?;
        Ok(result.expect("list form parses at least one element"))
    }

    /// `x in container` lowers to `container.Contains(x)` through the
    /// aggregate pipeline.
    fn parse_in_container(&mut self, needle: Expr, op_pos: usize) -> ParseResult<Expr> {
        let container = self.parse_primary()?;
        let elem = container
            .ty
            .seq_element()
            .cloned()
            .ok_or_else(|| {
                ParseError::new(
                    ParseErrorKind::NoApplicableAggregate("Contains".to_string()),
                    op_pos,
                )
            })?;
        let item = promote(&needle, &elem, false, &self.literals).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::ExpressionTypeExpected(elem.to_string()),
                op_pos,
            )
        })?;
        Ok(Expr::new(
            ExprKind::Aggregate {
                source: Box::new(container),
                op: SeqOp::Contains,
                args: vec![item],
            },
            Ty::Bool,
        ))
    }

    // &&, and ----------------------------------------------------------

    fn parse_logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_bitwise()?;
        while self.token.kind == TokenKind::DoubleAmp || self.token.identifier_is("and") {
            let op = self.token.clone();
            self.next()?;
            let mut right = self.parse_bitwise()?;
            self.check_and_promote_binary(OpCategory::Logical, &op, &mut left, &mut right)?;
            let ty = left.ty.clone();
            left = Expr::binary(BinaryOp::And, left, right, ty);
        }
        Ok(left)
    }

    // |, & -------------------------------------------------------------

    fn parse_bitwise(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_equality()?;
        while matches!(self.token.kind, TokenKind::Amp | TokenKind::Bar) {
            let op = self.token.clone();
            let bin_op = if op.kind == TokenKind::Amp {
                BinaryOp::BitAnd
            } else {
                BinaryOp::BitOr
            };
            self.next()?;
            let mut right = self.parse_equality()?;
            if left.ty.is_enum() || right.ty.is_enum() {
                // Enums drop to their underlying integral; the result is
                // the integral, never re-tagged.
                left = self.unwrap_enum(left);
                right = self.unwrap_enum(right);
            }
            self.check_and_promote_binary(OpCategory::Bitwise, &op, &mut left, &mut right)?;
            let ty = left.ty.clone();
            left = Expr::binary(bin_op, left, right, ty);
        }
        Ok(left)
    }

    fn unwrap_enum(&self, expr: Expr) -> Expr {
        match expr.ty.as_enum() {
            Some(def) => {
                let underlying = if expr.ty.is_nullable() {
                    Ty::Nullable(Box::new(def.underlying.clone()))
                } else {
                    def.underlying.clone()
                };
                Expr::convert(expr, underlying, false)
            }
            None => expr,
        }
    }

    // =, ==, !=, <> ------------------------------------------------------

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_relational()?;
        while matches!(
            self.token.kind,
            TokenKind::Equal | TokenKind::DoubleEqual | TokenKind::NotEqual | TokenKind::LessGreater
        ) {
            let op = self.token.clone();
            let bin_op = if matches!(self.token.kind, TokenKind::NotEqual | TokenKind::LessGreater)
            {
                BinaryOp::Ne
            } else {
                BinaryOp::Eq
            };
            self.next()?;
            let right = self.parse_relational()?;
            left = self.generate_comparison(&op, bin_op, left, right)?;
        }
        Ok(left)
    }

    // <, <=, >, >= -------------------------------------------------------

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_shift()?;
        while matches!(
            self.token.kind,
            TokenKind::LessThan
                | TokenKind::LessEqual
                | TokenKind::GreaterThan
                | TokenKind::GreaterEqual
        ) {
            let op = self.token.clone();
            let bin_op = match self.token.kind {
                TokenKind::LessThan => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::GreaterThan => BinaryOp::Gt,
                _ => BinaryOp::Ge,
            };
            self.next()?;
            let right = self.parse_shift()?;
            left = self.generate_comparison(&op, bin_op, left, right)?;
        }
        Ok(left)
    }

    fn generate_comparison(
        &mut self,
        op: &Token,
        bin_op: BinaryOp,
        mut left: Expr,
        mut right: Expr,
    ) -> ParseResult<Expr> {
        let is_equality = matches!(bin_op, BinaryOp::Eq | BinaryOp::Ne);

        // Tuples: equality lowers to structural Equals, relational to
        // CompareTo against a zero pivot.
        if matches!(left.ty, Ty::Tuple(_)) && matches!(right.ty, Ty::Tuple(_)) {
            return self.generate_tuple_comparison(op, bin_op, left, right, is_equality);
        }

        // A string operand compared against a Guid parses as a Guid.
        let left_is_guid = *left.ty.non_nullable() == Ty::Guid;
        let right_is_guid = *right.ty.non_nullable() == Ty::Guid;
        if left_is_guid && right.ty == Ty::String {
            right = self.guid_parse_call(right);
        } else if right_is_guid && left.ty == Ty::String {
            left = self.guid_parse_call(left);
        }

        let ref_or_null =
            |e: &Expr| e.ty.is_reference_type() || e.is_null_literal();
        if is_equality && ref_or_null(&left) && ref_or_null(&right) && left.ty != Ty::String {
            if left.ty != right.ty {
                if let Some(promoted) = promote(&right, &left.ty, false, &self.literals) {
                    right = promoted;
                } else if let Some(promoted) = promote(&left, &right.ty, false, &self.literals) {
                    left = promoted;
                } else {
                    return Err(self.incompatible_operands(op, &left, &right));
                }
            }
            return Ok(Expr::binary(bin_op, left, right, Ty::Bool));
        }

        if left.ty.is_enum() || right.ty.is_enum() {
            if left.ty != right.ty {
                if let Some(promoted) = promote(&right, &left.ty, true, &self.literals) {
                    right = promoted;
                } else if let Some(promoted) = promote(&left, &right.ty, true, &self.literals) {
                    left = promoted;
                } else if let Some(coerced) = coerce_enum_constant(&left, &right) {
                    right = coerced;
                } else if let Some(coerced) = coerce_enum_constant(&right, &left) {
                    left = coerced;
                } else {
                    return Err(self.incompatible_operands(op, &left, &right));
                }
            }
            return Ok(Expr::binary(bin_op, left, right, Ty::Bool));
        }

        let category = if is_equality {
            OpCategory::Equality
        } else {
            OpCategory::Relational
        };
        self.check_and_promote_binary(category, op, &mut left, &mut right)?;
        Ok(Expr::binary(bin_op, left, right, Ty::Bool))
    }

    fn generate_tuple_comparison(
        &mut self,
        op: &Token,
        bin_op: BinaryOp,
        left: Expr,
        right: Expr,
        is_equality: bool,
    ) -> ParseResult<Expr> {
        if left.ty != right.ty {
            return Err(self.incompatible_operands(op, &left, &right));
        }
        if is_equality {
            let call = Expr::call(Some(left), builtins::equals_method().clone(), vec![right]);
            return Ok(if bin_op == BinaryOp::Ne {
                Expr::unary(UnaryOp::Not, call, Ty::Bool)
            } else {
                call
            });
        }
        let call = Expr::call(Some(left), builtins::compare_to_method().clone(), vec![right]);
        Ok(Expr::binary(
            bin_op,
            call,
            Expr::constant(Value::Int32(0)),
            Ty::Bool,
        ))
    }

    fn guid_parse_call(&self, text_expr: Expr) -> Expr {
        let parse = builtins::static_methods(&Ty::Guid, "Parse")
            .into_iter()
            .next()
            .expect("Guid.Parse is always registered");
        Expr::call(None, parse, vec![text_expr])
    }

    // <<, >> -------------------------------------------------------------

    fn parse_shift(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive()?;
        while matches!(self.token.kind, TokenKind::ShiftLeft | TokenKind::ShiftRight) {
            let op = self.token.clone();
            let bin_op = if op.kind == TokenKind::ShiftLeft {
                BinaryOp::Shl
            } else {
                BinaryOp::Shr
            };
            self.next()?;
            let mut right = self.parse_additive()?;
            self.check_and_promote_unary(OpCategory::Shift, &op, &mut left)?;
            if let Some(promoted) = promote(&right, &Ty::Int32, false, &self.literals) {
                right = promoted;
            } else if !right.ty.is_integral() {
                return Err(self.incompatible_operands(&op, &left, &right));
            }
            let ty = left.ty.clone();
            left = Expr::binary(bin_op, left, right, ty);
        }
        Ok(left)
    }

    // +, - ----------------------------------------------------------------

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        while matches!(self.token.kind, TokenKind::Plus | TokenKind::Minus) {
            let op = self.token.clone();
            self.next()?;
            let mut right = self.parse_multiplicative()?;
            if op.kind == TokenKind::Plus && (left.ty == Ty::String || right.ty == Ty::String) {
                left = self.generate_string_concat(left, right);
                continue;
            }
            let category = if op.kind == TokenKind::Plus {
                OpCategory::Add
            } else {
                OpCategory::Subtract
            };
            self.check_and_promote_binary(category, &op, &mut left, &mut right)?;
            let bin_op = if op.kind == TokenKind::Plus {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            let ty = left.ty.clone();
            left = Expr::binary(bin_op, left, right, ty);
        }
        Ok(left)
    }

    /// `+` concatenates when either operand is a string; non-string
    /// operands go through `ToString` first.
    fn generate_string_concat(&self, left: Expr, right: Expr) -> Expr {
        let stringify = |e: Expr| {
            if e.ty == Ty::String {
                e
            } else {
                Expr::call(Some(e), builtins::to_string_method().clone(), vec![])
            }
        };
        Expr::call(
            None,
            builtins::string_concat_method().clone(),
            vec![stringify(left), stringify(right)],
        )
    }

    // *, /, %, mod ---------------------------------------------------------

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(
            self.token.kind,
            TokenKind::Asterisk | TokenKind::Slash | TokenKind::Percent
        ) || self.token.identifier_is("mod")
        {
            let op = self.token.clone();
            let bin_op = match self.token.kind {
                TokenKind::Asterisk => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => BinaryOp::Mod,
            };
            self.next()?;
            let mut right = self.parse_unary()?;
            self.check_and_promote_binary(OpCategory::Arithmetic, &op, &mut left, &mut right)?;
            let ty = left.ty.clone();
            left = Expr::binary(bin_op, left, right, ty);
        }
        Ok(left)
    }

    // unary -, !, not ------------------------------------------------------

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.token.kind == TokenKind::Minus {
            let op = self.token.clone();
            self.next()?;
            if matches!(
                self.token.kind,
                TokenKind::IntegerLiteral | TokenKind::RealLiteral
            ) {
                // The sign folds into the literal so -128 narrows to SByte
                // and -2147483648 stays in range.
                self.token.text = format!("-{}", self.token.text);
                self.token.pos = op.pos;
                return self.parse_primary();
            }
            let mut operand = self.parse_unary()?;
            self.check_and_promote_unary(OpCategory::Negation, &op, &mut operand)?;
            let ty = operand.ty.clone();
            return Ok(Expr::unary(UnaryOp::Negate, operand, ty));
        }
        if self.token.kind == TokenKind::Exclamation || self.token.identifier_is("not") {
            let op = self.token.clone();
            self.next()?;
            let mut operand = self.parse_unary()?;
            self.check_and_promote_unary(OpCategory::Not, &op, &mut operand)?;
            let ty = operand.ty.clone();
            return Ok(Expr::unary(UnaryOp::Not, operand, ty));
        }
        if self.token.kind == TokenKind::Plus {
            self.next()?;
            return self.parse_unary();
        }
        self.parse_primary()
    }

    // primaries ------------------------------------------------------------

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_start()?;
        loop {
            match self.token.kind {
                TokenKind::Dot => {
                    self.next()?;
                    expr = self.parse_member(expr)?;
                }
                TokenKind::OpenBracket => {
                    expr = self.parse_element_access(expr)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary_start(&mut self) -> ParseResult<Expr> {
        match self.token.kind {
            TokenKind::Identifier => self.parse_identifier(),
            TokenKind::StringLiteral { quote } => self.parse_string_literal(quote),
            TokenKind::IntegerLiteral => self.parse_number_literal(NumberKind::Integer),
            TokenKind::RealLiteral => self.parse_number_literal(NumberKind::Real),
            TokenKind::OpenParen => {
                self.next()?;
                let expr = self.parse_expression()?;
                self.expect(TokenKind::CloseParen, "')' or operator")?;
                Ok(expr)
            }
            _ => Err(self.error(ParseErrorKind::ExpressionExpected)),
        }
    }

    fn parse_string_literal(&mut self, quote: char) -> ParseResult<Expr> {
        let tok = self.token.clone();
        self.next()?;
        if quote == '\'' {
            let mut chars = tok.text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => return Ok(Expr::constant(Value::Char(c))),
                _ => {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidCharacterLiteral,
                        tok.pos,
                    ))
                }
            }
        }
        let id = self.literals.insert(tok.text.clone());
        Ok(Expr::literal(Value::String(tok.text), id))
    }

    fn parse_number_literal(&mut self, kind: NumberKind) -> ParseResult<Expr> {
        let tok = self.token.clone();
        self.next()?;
        let value = self.numbers.resolve(kind, &tok.text).ok_or_else(|| {
            let err = match kind {
                NumberKind::Integer => ParseErrorKind::InvalidIntegerLiteral(tok.text.clone()),
                NumberKind::Real => ParseErrorKind::InvalidRealLiteral(tok.text.clone()),
            };
            ParseError::new(err, tok.pos)
        })?;
        let id = self.literals.insert(tok.text);
        Ok(Expr::literal(value, id))
    }

    fn parse_identifier(&mut self) -> ParseResult<Expr> {
        let tok = self.token.clone();
        match tok.text.to_ascii_lowercase().as_str() {
            "true" => {
                self.next()?;
                return Ok(Expr::constant(Value::Bool(true)));
            }
            "false" => {
                self.next()?;
                return Ok(Expr::constant(Value::Bool(false)));
            }
            "null" => {
                self.next()?;
                return Ok(Expr::constant(Value::Null));
            }
            "iif" => {
                self.next()?;
                return self.parse_iif(tok.pos);
            }
            "new" => {
                self.next()?;
                return self.parse_new();
            }
            "tuple" => {
                self.next()?;
                return self.parse_tuple(tok.pos);
            }
            "it" | "$" => {
                let it = self
                    .it
                    .clone()
                    .ok_or_else(|| ParseError::new(ParseErrorKind::NoItInScope, tok.pos))?;
                self.next()?;
                return Ok(it);
            }
            "parent" | "^" => {
                let parent = self
                    .parent
                    .clone()
                    .ok_or_else(|| ParseError::new(ParseErrorKind::NoParentInScope, tok.pos))?;
                self.next()?;
                return Ok(parent);
            }
            "root" | "~" => {
                let root = self
                    .root
                    .clone()
                    .ok_or_else(|| ParseError::new(ParseErrorKind::NoRootInScope, tok.pos))?;
                self.next()?;
                return Ok(root);
            }
            _ => {}
        }

        if let Some(entry) = self.registry.lookup(&tok.text).cloned() {
            self.next()?;
            return self.parse_type_access(entry, tok.pos);
        }

        if let Some(symbol) = self.symbols.get(&tok.text.to_ascii_lowercase()).cloned() {
            self.next()?;
            return match symbol {
                Symbol::Param(param) => Ok(Expr::parameter(param)),
                Symbol::Binding(binding) => self.resolve_binding(binding, tok.pos),
            };
        }

        let external = self
            .externals
            .as_ref()
            .and_then(|map| map.get(&tok.text.to_ascii_lowercase()).cloned());
        if let Some(binding) = external {
            self.next()?;
            return self.resolve_binding(binding, tok.pos);
        }

        if let Some(it) = self.it.clone() {
            return self.parse_member(it);
        }

        Err(ParseError::new(
            ParseErrorKind::UnknownIdentifier(tok.text),
            tok.pos,
        ))
    }

    fn resolve_binding(&mut self, binding: Binding, pos: usize) -> ParseResult<Expr> {
        match binding {
            Binding::Value(value) => Ok(Expr::constant(value)),
            Binding::Expr(expr) => Ok(expr),
            Binding::Lambda(lambda) => {
                if self.token.kind == TokenKind::OpenParen {
                    self.parse_lambda_invocation(lambda, pos)
                } else {
                    Ok(Expr::lambda(lambda))
                }
            }
            // A map is only meaningful as the trailing externals argument;
            // the facade rejects other placements before parsing starts.
            Binding::Map(_) => Err(ParseError::new(ParseErrorKind::ExpressionExpected, pos)),
        }
    }

    fn parse_lambda_invocation(
        &mut self,
        lambda: Arc<LambdaExpr>,
        error_pos: usize,
    ) -> ParseResult<Expr> {
        let args = self.parse_argument_list()?;
        if args.len() != lambda.params.len() {
            return Err(ParseError::new(
                ParseErrorKind::ArgsIncompatibleWithLambda,
                error_pos,
            ));
        }
        let mut promoted = Vec::with_capacity(args.len());
        for (arg, param) in args.into_iter().zip(lambda.params.iter()) {
            promoted.push(
                promote(&arg, &param.ty, false, &self.literals).ok_or_else(|| {
                    ParseError::new(ParseErrorKind::ArgsIncompatibleWithLambda, error_pos)
                })?,
            );
        }
        let ret = lambda.return_ty().clone();
        Ok(Expr::new(
            ExprKind::Invoke {
                lambda: Box::new(Expr::lambda(lambda)),
                args: promoted,
            },
            ret,
        ))
    }

    fn parse_iif(&mut self, error_pos: usize) -> ParseResult<Expr> {
        let args = self.parse_argument_list()?;
        if args.len() != 3 {
            return Err(ParseError::new(
                ParseErrorKind::Expected("Three arguments".to_string()),
                error_pos,
            ));
        }
        let mut iter = args.into_iter();
        let test = iter.next().expect("length checked");
        let then_expr = iter.next().expect("length checked");
        let else_expr = iter.next().expect("length checked");
        self.generate_conditional(test, then_expr, else_expr, error_pos)
    }

    /// `new(e1 as p1, e2, ...)` materializes an emitted data class; a bare
    /// member access reuses the member's name.
    fn parse_new(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let mut properties = Vec::new();
        let mut args = Vec::new();
        loop {
            let expr_pos = self.token.pos;
            let expr = self.parse_expression()?;
            let name = if self.token.identifier_is("as") {
                self.next()?;
                if self.token.kind != TokenKind::Identifier {
                    return Err(self.error(ParseErrorKind::Expected("Identifier".to_string())));
                }
                let name = self.token.text.clone();
                self.next()?;
                name
            } else {
                match &expr.kind {
                    ExprKind::Property { name, .. } => name.clone(),
                    _ => {
                        return Err(ParseError::new(
                            ParseErrorKind::Expected("'as'".to_string()),
                            expr_pos,
                        ))
                    }
                }
            };
            properties.push(DynamicProperty::new(name, expr.ty.clone()));
            args.push(expr);
            if self.token.kind == TokenKind::Comma {
                self.next()?;
                continue;
            }
            break;
        }
        self.expect(TokenKind::CloseParen, "')' or ','")?;
        let class = dynclass::get_or_create_class(&properties);
        let ty = Ty::Class(class.clone());
        Ok(Expr::new(ExprKind::NewDynamic { class, args }, ty))
    }

    /// `tuple(e1, ..., eN)`; arities past seven nest the tail in the last
    /// slot, seven at a time.
    fn parse_tuple(&mut self, error_pos: usize) -> ParseResult<Expr> {
        let args = self.parse_argument_list()?;
        if args.is_empty() {
            return Err(ParseError::new(ParseErrorKind::ExpressionExpected, error_pos));
        }
        Ok(build_tuple(args))
    }

    fn parse_type_access(&mut self, entry: TypeEntry, error_pos: usize) -> ParseResult<Expr> {
        let mut ty = entry.ty();
        if self.token.kind == TokenKind::Question {
            ty = ty.nullable_form().ok_or_else(|| {
                ParseError::new(ParseErrorKind::NoNullableForm(ty.to_string()), error_pos)
            })?;
            self.next()?;
        }

        if self.token.kind == TokenKind::OpenParen {
            let args = self.parse_argument_list()?;
            let ctors: Vec<Arc<CtorDef>> = match &entry {
                TypeEntry::Class(class) if !ty.is_nullable() => class.ctors.clone(),
                _ => Vec::new(),
            };
            let candidates: Vec<Candidate> = ctors
                .iter()
                .enumerate()
                .map(|(i, c)| Candidate::new(i, c.params.clone()))
                .collect();
            return match resolve_overloads(&candidates, &args, &self.literals) {
                Resolution::Unique { index, args } => {
                    let class = match &entry {
                        TypeEntry::Class(class) => class.clone(),
                        _ => unreachable!("constructor candidates imply a class entry"),
                    };
                    Ok(Expr::new(
                        ExprKind::New {
                            class: class.clone(),
                            ctor: ctors[index].clone(),
                            args,
                        },
                        Ty::Class(class),
                    ))
                }
                Resolution::NoMatch if args.len() == 1 => {
                    let arg = args.into_iter().next().expect("length checked");
                    if explicit_conversion_allowed(&arg.ty, &ty) {
                        Ok(explicit_convert(arg, &ty))
                    } else {
                        Err(ParseError::new(
                            ParseErrorKind::CannotConvertValue {
                                from: arg.ty.to_string(),
                                to: ty.to_string(),
                            },
                            error_pos,
                        ))
                    }
                }
                Resolution::NoMatch => Err(ParseError::new(
                    ParseErrorKind::NoMatchingConstructor(ty.to_string()),
                    error_pos,
                )),
                Resolution::Ambiguous => Err(ParseError::new(
                    ParseErrorKind::AmbiguousConstructor(ty.to_string()),
                    error_pos,
                )),
            };
        }

        if self.token.kind == TokenKind::Dot {
            self.next()?;
            return self.parse_static_member(&entry, &ty);
        }

        Err(self.error(ParseErrorKind::Expected("'(' or '.'".to_string())))
    }

    fn parse_static_member(&mut self, entry: &TypeEntry, ty: &Ty) -> ParseResult<Expr> {
        if self.token.kind != TokenKind::Identifier {
            return Err(self.error(ParseErrorKind::Expected("Identifier".to_string())));
        }
        let name_tok = self.token.clone();
        let name = name_tok.text.clone();
        self.next()?;

        if self.token.kind == TokenKind::OpenParen {
            let args = self.parse_argument_list()?;
            let methods: Vec<Arc<MethodDef>> = match entry {
                TypeEntry::Class(class) => class::find_methods(class, &name, true),
                TypeEntry::Prim(prim) => builtins::static_methods(prim, &name),
                TypeEntry::Enum(_) => Vec::new(),
            };
            return self.resolve_method_call(None, methods, args, &name, ty, name_tok.pos);
        }

        if let TypeEntry::Enum(def) = entry {
            if let Some(member) = def.member(&name) {
                return Ok(Expr::constant(Value::Enum(def.clone(), member)));
            }
        }

        Err(ParseError::new(
            ParseErrorKind::UnknownPropertyOrField {
                name,
                ty: ty.to_string(),
            },
            name_tok.pos,
        ))
    }

    /// Member access with the member name at the current token. Instance
    /// receivers see instance members only; aggregate names on enumerable
    /// receivers divert to the aggregate pipeline.
    fn parse_member(&mut self, receiver: Expr) -> ParseResult<Expr> {
        if self.token.kind != TokenKind::Identifier {
            return Err(self.error(ParseErrorKind::Expected("Identifier".to_string())));
        }
        let name_tok = self.token.clone();
        let name = name_tok.text.clone();
        self.next()?;

        if self.token.kind == TokenKind::OpenParen {
            if matches!(receiver.ty, Ty::Seq(_)) {
                return self.parse_aggregate(receiver, &name, name_tok.pos);
            }
            if matches!(receiver.ty, Ty::Func(_, _)) {
                return Err(ParseError::new(
                    ParseErrorKind::MethodsInaccessible(receiver.ty.to_string()),
                    name_tok.pos,
                ));
            }
            let args = self.parse_argument_list()?;
            let mut methods: Vec<Arc<MethodDef>> = match &receiver.ty {
                Ty::Class(class) => class::find_methods(class, &name, false),
                _ => Vec::new(),
            };
            methods.extend(builtins::instance_methods(&receiver.ty, &name));
            let ty = receiver.ty.clone();
            return self.resolve_method_call(Some(receiver), methods, args, &name, &ty, name_tok.pos);
        }

        if let Ty::Class(class) = &receiver.ty {
            if let Some(prop) = class::find_property(class, &name) {
                return Ok(Expr::property(receiver, prop.name, prop.ty));
            }
        }
        if let Some(prop_ty) = builtins::instance_property(&receiver.ty, &name) {
            return Ok(Expr::property(receiver, name, prop_ty));
        }

        Err(ParseError::new(
            ParseErrorKind::UnknownPropertyOrField {
                name,
                ty: receiver.ty.to_string(),
            },
            name_tok.pos,
        ))
    }

    fn resolve_method_call(
        &self,
        receiver: Option<Expr>,
        methods: Vec<Arc<MethodDef>>,
        args: Vec<Expr>,
        name: &str,
        receiver_ty: &Ty,
        error_pos: usize,
    ) -> ParseResult<Expr> {
        let candidates: Vec<Candidate> = methods
            .iter()
            .enumerate()
            .map(|(i, m)| Candidate::new(i, m.params.clone()))
            .collect();
        match resolve_overloads(&candidates, &args, &self.literals) {
            Resolution::Unique { index, args } => {
                Ok(Expr::call(receiver, methods[index].clone(), args))
            }
            Resolution::NoMatch => Err(ParseError::new(
                ParseErrorKind::NoApplicableMethod {
                    method: name.to_string(),
                    ty: receiver_ty.to_string(),
                },
                error_pos,
            )),
            Resolution::Ambiguous => Err(ParseError::new(
                ParseErrorKind::AmbiguousMethod {
                    method: name.to_string(),
                    ty: receiver_ty.to_string(),
                },
                error_pos,
            )),
        }
    }

    /// Parse an aggregate call. Inside the argument body the scope shifts:
    /// the element becomes `it`, the outer `it` becomes `parent`, `root`
    /// is untouched; everything is restored on exit. `Contains` keeps the
    /// outer scope since its argument is the item searched for.
    fn parse_aggregate(
        &mut self,
        receiver: Expr,
        method_name: &str,
        error_pos: usize,
    ) -> ParseResult<Expr> {
        let elem = receiver
            .ty
            .seq_element()
            .cloned()
            .expect("aggregate receiver is enumerable");
        let op = SeqOp::from_name(method_name).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::NoApplicableAggregate(method_name.to_string()),
                error_pos,
            )
        })?;

        let inner_param = ParamDef::new("", elem.clone());
        let saved_it = self.it.clone();
        let saved_parent = self.parent.clone();
        if op != SeqOp::Contains {
            self.parent = saved_it.clone();
            self.it = Some(Expr::parameter(inner_param.clone()));
        }
        let args = self.parse_argument_list();
        self.it = saved_it;
        self.parent = saved_parent;
        let args = args?;

        self.type_aggregate(receiver, op, method_name, inner_param, elem, args, error_pos)
    }

    fn type_aggregate(
        &self,
        receiver: Expr,
        op: SeqOp,
        method_name: &str,
        inner_param: ParamRef,
        elem: Ty,
        mut args: Vec<Expr>,
        error_pos: usize,
    ) -> ParseResult<Expr> {
        let no_applicable = || {
            ParseError::new(
                ParseErrorKind::NoApplicableAggregate(method_name.to_string()),
                error_pos,
            )
        };
        let seq_ty = receiver.ty.clone();

        let lambda_arg = |body: Expr| {
            Expr::lambda(Arc::new(LambdaExpr::new(vec![inner_param.clone()], body)))
        };
        let bool_lambda = |this: &Self, body: Expr| -> ParseResult<Expr> {
            let body = promote(&body, &Ty::Bool, false, &this.literals).ok_or_else(no_applicable)?;
            Ok(lambda_arg(body))
        };

        let (args, ty) = match op {
            SeqOp::Where => {
                if args.len() != 1 {
                    return Err(no_applicable());
                }
                (vec![bool_lambda(self, args.remove(0))?], seq_ty)
            }
            SeqOp::All => {
                if args.len() != 1 {
                    return Err(no_applicable());
                }
                (vec![bool_lambda(self, args.remove(0))?], Ty::Bool)
            }
            SeqOp::Any | SeqOp::Count => {
                let result_ty = if op == SeqOp::Any { Ty::Bool } else { Ty::Int32 };
                match args.len() {
                    0 => (vec![], result_ty),
                    1 => (vec![bool_lambda(self, args.remove(0))?], result_ty),
                    _ => return Err(no_applicable()),
                }
            }
            SeqOp::First
            | SeqOp::FirstOrDefault
            | SeqOp::Last
            | SeqOp::LastOrDefault
            | SeqOp::Single
            | SeqOp::SingleOrDefault => match args.len() {
                0 => (vec![], elem),
                1 => (vec![bool_lambda(self, args.remove(0))?], elem),
                _ => return Err(no_applicable()),
            },
            SeqOp::Select => {
                if args.len() != 1 {
                    return Err(no_applicable());
                }
                let body = args.remove(0);
                let result = Ty::Seq(Box::new(body.ty.clone()));
                (vec![lambda_arg(body)], result)
            }
            SeqOp::OrderBy | SeqOp::OrderByDescending => {
                if args.len() != 1 {
                    return Err(no_applicable());
                }
                (vec![lambda_arg(args.remove(0))], seq_ty)
            }
            SeqOp::Min | SeqOp::Max => match args.len() {
                0 => (vec![], elem),
                1 => {
                    let body = args.remove(0);
                    let result = body.ty.clone();
                    (vec![lambda_arg(body)], result)
                }
                _ => return Err(no_applicable()),
            },
            SeqOp::Sum => {
                let (wrapped, operand_ty) = match args.len() {
                    0 => (vec![], elem.clone()),
                    1 => {
                        let body = args.remove(0);
                        let ty = body.ty.clone();
                        (vec![lambda_arg(body)], ty)
                    }
                    _ => return Err(no_applicable()),
                };
                if !operand_ty.is_numeric() {
                    return Err(no_applicable());
                }
                (wrapped, operand_ty)
            }
            SeqOp::Average => {
                let (wrapped, operand_ty) = match args.len() {
                    0 => (vec![], elem.clone()),
                    1 => {
                        let body = args.remove(0);
                        let ty = body.ty.clone();
                        (vec![lambda_arg(body)], ty)
                    }
                    _ => return Err(no_applicable()),
                };
                let result = average_result_ty(&operand_ty).ok_or_else(no_applicable)?;
                (wrapped, result)
            }
            SeqOp::Contains => {
                if args.len() != 1 {
                    return Err(no_applicable());
                }
                let item = promote(&args[0], &elem, false, &self.literals)
                    .ok_or_else(no_applicable)?;
                (vec![item], Ty::Bool)
            }
        };

        Ok(Expr::new(
            ExprKind::Aggregate {
                source: Box::new(receiver),
                op,
                args,
            },
            ty,
        ))
    }

    fn parse_element_access(&mut self, receiver: Expr) -> ParseResult<Expr> {
        let bracket_pos = self.token.pos;
        self.next()?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_expression()?);
            if self.token.kind == TokenKind::Comma {
                self.next()?;
                continue;
            }
            break;
        }
        self.expect(TokenKind::CloseBracket, "']' or ','")?;

        match &receiver.ty {
            Ty::Seq(elem) => {
                if args.len() != 1 {
                    return Err(ParseError::new(
                        ParseErrorKind::NoApplicableIndexer(receiver.ty.to_string()),
                        bracket_pos,
                    ));
                }
                let index = promote(&args[0], &Ty::Int32, false, &self.literals).ok_or_else(
                    || {
                        ParseError::new(
                            ParseErrorKind::ExpressionTypeExpected(Ty::Int32.to_string()),
                            bracket_pos,
                        )
                    },
                )?;
                let elem = (**elem).clone();
                Ok(Expr::new(
                    ExprKind::Index {
                        target: Box::new(receiver),
                        args: vec![index],
                        indexer: None,
                    },
                    elem,
                ))
            }
            Ty::Class(class) => {
                let indexers: Vec<Arc<MethodDef>> = class::self_and_bases(class)
                    .flat_map(|c| c.indexers.clone())
                    .collect();
                let candidates: Vec<Candidate> = indexers
                    .iter()
                    .enumerate()
                    .map(|(i, m)| Candidate::new(i, m.params.clone()))
                    .collect();
                match resolve_overloads(&candidates, &args, &self.literals) {
                    Resolution::Unique { index, args } => {
                        let indexer = indexers[index].clone();
                        let ty = indexer.ret.clone();
                        Ok(Expr::new(
                            ExprKind::Index {
                                target: Box::new(receiver),
                                args,
                                indexer: Some(indexer),
                            },
                            ty,
                        ))
                    }
                    Resolution::NoMatch => Err(ParseError::new(
                        ParseErrorKind::NoApplicableIndexer(receiver.ty.to_string()),
                        bracket_pos,
                    )),
                    Resolution::Ambiguous => Err(ParseError::new(
                        ParseErrorKind::AmbiguousIndexer(receiver.ty.to_string()),
                        bracket_pos,
                    )),
                }
            }
            _ => Err(ParseError::new(
                ParseErrorKind::NoApplicableIndexer(receiver.ty.to_string()),
                bracket_pos,
            )),
        }
    }

    fn parse_argument_list(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let mut args = Vec::new();
        if self.token.kind != TokenKind::CloseParen {
            loop {
                args.push(self.parse_expression()?);
                if self.token.kind == TokenKind::Comma {
                    self.next()?;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "')' or ','")?;
        Ok(args)
    }

    // operator typing -------------------------------------------------------

    fn check_and_promote_binary(
        &mut self,
        category: OpCategory,
        op: &Token,
        left: &mut Expr,
        right: &mut Expr,
    ) -> ParseResult<()> {
        let sigs = signatures(category);
        let candidates: Vec<Candidate> = sigs
            .into_iter()
            .enumerate()
            .map(|(i, params)| Candidate::new(i, params))
            .collect();
        let args = [left.clone(), right.clone()];
        match resolve_overloads(&candidates, &args, &self.literals) {
            Resolution::Unique { mut args, .. } => {
                *right = args.pop().expect("binary signature has two parameters");
                *left = args.pop().expect("binary signature has two parameters");
                Ok(())
            }
            _ => Err(self.incompatible_operands(op, left, right)),
        }
    }

    fn check_and_promote_unary(
        &mut self,
        category: OpCategory,
        op: &Token,
        operand: &mut Expr,
    ) -> ParseResult<()> {
        let sigs = signatures(category);
        let candidates: Vec<Candidate> = sigs
            .into_iter()
            .enumerate()
            .map(|(i, params)| Candidate::new(i, params))
            .collect();
        let args = [operand.clone()];
        match resolve_overloads(&candidates, &args, &self.literals) {
            Resolution::Unique { mut args, .. } => {
                *operand = args.pop().expect("unary signature has one parameter");
                Ok(())
            }
            _ => Err(ParseError::new(
                ParseErrorKind::IncompatibleOperand {
                    op: op.text.clone(),
                    ty: operand.ty.to_string(),
                },
                op.pos,
            )),
        }
    }

    fn incompatible_operands(&self, op: &Token, left: &Expr, right: &Expr) -> ParseError {
        ParseError::new(
            ParseErrorKind::IncompatibleOperands {
                op: op.text.clone(),
                left: left.ty.to_string(),
                right: right.ty.to_string(),
            },
            op.pos,
        )
    }
}

/// `Average` result type: decimal stays decimal, float stays float,
/// everything integral averages as double; nullability is preserved.
fn average_result_ty(operand: &Ty) -> Option<Ty> {
    let inner = operand.non_nullable();
    let result = match inner {
        Ty::Decimal => Ty::Decimal,
        Ty::Float => Ty::Float,
        Ty::Double => Ty::Double,
        _ if inner.is_integral() => Ty::Double,
        _ => return None,
    };
    Some(if operand.is_nullable() {
        Ty::Nullable(Box::new(result))
    } else {
        result
    })
}

/// Group tuple items seven at a time, nesting the remainder.
fn build_tuple(mut items: Vec<Expr>) -> Expr {
    if items.len() <= 7 {
        let ty = Ty::Tuple(items.iter().map(|e| e.ty.clone()).collect());
        return Expr::new(ExprKind::NewTuple { items }, ty);
    }
    let rest = build_tuple(items.split_off(7));
    items.push(rest);
    let ty = Ty::Tuple(items.iter().map(|e| e.ty.clone()).collect());
    Expr::new(ExprKind::NewTuple { items }, ty)
}

/// Re-tag a constant integral as the other side's enum type. This goes
/// beyond normal enum conversion rules on purpose; see DESIGN notes.
fn coerce_enum_constant(enum_side: &Expr, other: &Expr) -> Option<Expr> {
    let def = enum_side.ty.as_enum()?.clone();
    let value = other.constant_value()?.as_i64()?;
    Some(Expr::constant_typed(
        Value::Enum(def, value),
        enum_side.ty.clone(),
    ))
}
