//! Expression evaluation.
//!
//! The interpreter only sees the [`ExpressionEvaluator`] trait. The default
//! implementation is a Rhai engine with the report builtins registered and
//! optional user-defined functions loaded from a script.

use dashmap::DashMap;
use rhai::{AST, Dynamic, Engine};
use std::ops::{Range, RangeInclusive};

use super::env::{ScopeId, ValueEnvironment};
use super::group::GroupLedger;
use crate::error::EvalError;

/// Evaluates template expressions against a value environment.
pub trait ExpressionEvaluator {
    fn evaluate(
        &self,
        expr: &str,
        env: &ValueEnvironment,
        scope: ScopeId,
    ) -> Result<Dynamic, EvalError>;

    /// Evaluate `expr` to an ordered sequence of items.
    fn evaluate_iterable(
        &self,
        expr: &str,
        env: &ValueEnvironment,
        scope: ScopeId,
    ) -> Result<Vec<Dynamic>, EvalError> {
        let value = self.evaluate(expr, env, scope)?;
        iterable_items(expr, value)
    }
}

/// Turn an evaluated value into iteration items.
///
/// Arrays and integer ranges iterate; unit is an empty sequence.
pub fn iterable_items(expr: &str, value: Dynamic) -> Result<Vec<Dynamic>, EvalError> {
    let value = value.flatten();
    if value.is_unit() {
        tracing::warn!(expr, "collection evaluated to unit, iterating nothing");
        return Ok(Vec::new());
    }
    if value.is_array() {
        return value
            .into_array()
            .map_err(|t| EvalError::new(expr, format!("expected an array, got {}", t)));
    }
    if let Some(range) = value.clone().try_cast::<Range<i64>>() {
        return Ok(range.map(Dynamic::from).collect());
    }
    if let Some(range) = value.clone().try_cast::<RangeInclusive<i64>>() {
        return Ok(range.map(Dynamic::from).collect());
    }
    Err(EvalError::new(
        expr,
        format!("expected an array or range, got {}", value.type_name()),
    ))
}

/// Rhai-backed evaluator. Compiled expressions are cached by source text.
pub struct RhaiEvaluator {
    engine: Engine,
    functions: Option<String>,
    cache: DashMap<String, AST>,
}

impl RhaiEvaluator {
    /// Create an evaluator whose group builtins read `ledger`.
    pub fn new(ledger: GroupLedger) -> Self {
        let mut engine = Engine::new();
        crate::builtins::register_builtins(&mut engine, ledger);
        RhaiEvaluator {
            engine,
            functions: None,
            cache: DashMap::new(),
        }
    }

    /// Create an evaluator with custom functions available to every expression.
    /// The script is checked up front so a broken functions file fails early.
    pub fn with_functions(ledger: GroupLedger, script: Option<&str>) -> Result<Self, EvalError> {
        let mut evaluator = Self::new(ledger);
        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            evaluator
                .engine
                .compile(script)
                .map_err(|e| EvalError::new("<functions>", format!("Error in custom functions: {}", e)))?;
            evaluator.functions = Some(script.to_string());
        }
        Ok(evaluator)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn compiled(&self, expr: &str) -> Result<AST, EvalError> {
        if let Some(ast) = self.cache.get(expr) {
            return Ok(ast.clone());
        }
        // Functions are prepended as script text so closures can still reach
        // the registered builtins.
        let source = match &self.functions {
            Some(functions) => format!("{}\n{}", functions, expr),
            None => expr.to_string(),
        };
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| EvalError::new(expr, e.to_string()))?;
        self.cache.insert(expr.to_string(), ast.clone());
        Ok(ast)
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(
        &self,
        expr: &str,
        env: &ValueEnvironment,
        scope: ScopeId,
    ) -> Result<Dynamic, EvalError> {
        let ast = self.compiled(expr)?;
        let mut rhai_scope = env.to_rhai_scope(scope);
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut rhai_scope, &ast)
            .map(Dynamic::flatten)
            .map_err(|e| EvalError::new(expr, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(evaluator: &RhaiEvaluator, env: &ValueEnvironment, expr: &str) -> Dynamic {
        evaluator.evaluate(expr, env, env.root()).unwrap()
    }

    #[test]
    fn test_evaluates_against_environment() {
        let evaluator = RhaiEvaluator::new(GroupLedger::new());
        let engine = Engine::new();
        let data = engine.parse_json(r#"{"item": {"amount": 700}}"#, true).unwrap();
        let env = ValueEnvironment::from_map(data);
        assert_eq!(eval(&evaluator, &env, "item.amount * 2").as_int().unwrap(), 1400);
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let evaluator = RhaiEvaluator::new(GroupLedger::new());
        let env = ValueEnvironment::new();
        let err = evaluator.evaluate("missing + 1", &env, env.root()).unwrap_err();
        assert_eq!(err.expr, "missing + 1");
    }

    #[test]
    fn test_iterables() {
        let evaluator = RhaiEvaluator::new(GroupLedger::new());
        let env = ValueEnvironment::new();
        let root = env.root();
        assert_eq!(evaluator.evaluate_iterable("[1, 2, 3]", &env, root).unwrap().len(), 3);
        assert_eq!(evaluator.evaluate_iterable("0..4", &env, root).unwrap().len(), 4);
        assert_eq!(evaluator.evaluate_iterable("1..=4", &env, root).unwrap().len(), 4);
        assert!(evaluator.evaluate_iterable("()", &env, root).unwrap().is_empty());
        assert!(evaluator.evaluate_iterable("42", &env, root).is_err());
    }

    #[test]
    fn test_custom_functions() {
        let evaluator = RhaiEvaluator::with_functions(
            GroupLedger::new(),
            Some("fn double(x) { x * 2 }"),
        )
        .unwrap();
        let env = ValueEnvironment::new();
        assert_eq!(eval(&evaluator, &env, "double(21)").as_int().unwrap(), 42);

        assert!(RhaiEvaluator::with_functions(GroupLedger::new(), Some("fn broken(")).is_err());
    }
}
