//! Condition evaluation is deliberately abstracted (§9): the core treats a
//! tuple's condition as `eval(cond, params, context) -> bool | err`. The
//! expression language itself is an external collaborator; this module
//! only defines the seam and a small built-in evaluator so the Check
//! scenarios that exercise conditioned tuples are runnable standalone.

use crate::error::CheckError;
use crate::models::Condition;
use async_trait::async_trait;

#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate `condition` against the request `context`. A missing
    /// parameter or a type mismatch must surface as
    /// `CheckError::ConditionEvaluationFailed`, never as `Ok(false)`.
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &serde_json::Value,
    ) -> Result<bool, CheckError>;
}

/// Looks up `condition.name` as a boolean key in the request context,
/// falling back to a boolean field of the same name inside the tuple's own
/// bound context. Sufficient for the condition scenarios this crate tests;
/// a real deployment would plug in a CEL-style expression evaluator here.
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanContextEvaluator;

#[async_trait]
impl ConditionEvaluator for BooleanContextEvaluator {
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &serde_json::Value,
    ) -> Result<bool, CheckError> {
        if let Some(value) = context.get(&condition.name).and_then(|v| v.as_bool()) {
            return Ok(value);
        }
        if let Some(value) = condition.context.get(&condition.name).and_then(|v| v.as_bool()) {
            return Ok(value);
        }
        Err(CheckError::ConditionEvaluationFailed(format!(
            "missing boolean parameter '{}'",
            condition.name
        )))
    }
}
