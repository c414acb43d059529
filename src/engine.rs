//! Library facade.
//!
//! An `Engine` owns the immutable pieces a parse needs: the recognized-type
//! registry and the number-literal handler chain. Parsers are constructed
//! per call and discarded; the engine itself is freely shared.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::expression::node::{Expr, LambdaExpr, OrderingDirective, ParamDef, ParamRef};
use crate::syntax::number::NumberParserRegistry;
use crate::syntax::parser::{Binding, ExpressionParser};
use crate::types::registry::TypeRegistry;
use crate::types::ty::Ty;

pub struct Engine {
    registry: TypeRegistry,
    numbers: Arc<NumberParserRegistry>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine::with_registry(TypeRegistry::with_defaults())
    }

    pub fn with_registry(registry: TypeRegistry) -> Self {
        Engine {
            registry,
            numbers: NumberParserRegistry::with_defaults(),
        }
    }

    pub fn with_parts(registry: TypeRegistry, numbers: Arc<NumberParserRegistry>) -> Self {
        Engine { registry, numbers }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Parse an expression with no parameters in scope. The result has no
    /// unbound parameters; with a result type, the expression is promoted
    /// exactly to it.
    pub fn parse(&self, result_ty: Option<&Ty>, text: &str, values: &[Binding]) -> Result<Expr> {
        let mut parser = self.parser(text, &[], values)?;
        Ok(parser.parse(result_ty)?)
    }

    /// Parse with a single named parameter in scope.
    pub fn parse_expression(
        &self,
        param: &ParamRef,
        result_ty: Option<&Ty>,
        text: &str,
        values: &[Binding],
    ) -> Result<Expr> {
        let mut parser = self.parser(text, std::slice::from_ref(param), values)?;
        Ok(parser.parse(result_ty)?)
    }

    /// Parse a single-parameter lambda over an element type; the
    /// parameter is unnamed and its members are in scope through `it`.
    pub fn parse_lambda(
        &self,
        element_ty: &Ty,
        result_ty: Option<&Ty>,
        text: &str,
        values: &[Binding],
    ) -> Result<Arc<LambdaExpr>> {
        let param = ParamDef::new("", element_ty.clone());
        self.parse_lambda_with(&[param], result_ty, text, values)
    }

    /// Parse a lambda over explicit parameters.
    pub fn parse_lambda_with(
        &self,
        params: &[ParamRef],
        result_ty: Option<&Ty>,
        text: &str,
        values: &[Binding],
    ) -> Result<Arc<LambdaExpr>> {
        let mut parser = self.parser(text, params, values)?;
        let body = parser.parse(result_ty)?;
        Ok(Arc::new(LambdaExpr::new(params.to_vec(), body)))
    }

    /// Parse an ordering clause over an element type into selector
    /// lambdas with directions.
    pub fn parse_ordering(
        &self,
        element_ty: &Ty,
        text: &str,
        values: &[Binding],
    ) -> Result<Vec<OrderingDirective>> {
        let param = ParamDef::new("", element_ty.clone());
        let mut parser = self.parser(text, std::slice::from_ref(&param), values)?;
        let orderings = parser.parse_ordering()?;
        Ok(orderings
            .into_iter()
            .map(|(selector, ascending)| OrderingDirective {
                selector: Arc::new(LambdaExpr::new(vec![param.clone()], selector)),
                ascending,
            })
            .collect())
    }

    fn parser(
        &self,
        text: &str,
        params: &[ParamRef],
        values: &[Binding],
    ) -> Result<ExpressionParser<'_>> {
        if text.trim().is_empty() {
            bail!("expression text must not be null or empty");
        }
        for (i, value) in values.iter().enumerate() {
            if matches!(value, Binding::Map(_)) && i != values.len() - 1 {
                bail!("a name/value map may only be the last substitution value");
            }
        }
        Ok(ExpressionParser::new(
            &self.registry,
            self.numbers.clone(),
            text,
            params,
            values.to_vec(),
        )?)
    }
}
