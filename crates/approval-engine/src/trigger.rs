//! Trigger evaluator: decides whether declarative conditions match
//!
//! Evaluation is pure — no side effects beyond a configuration warning
//! log when a trigger is malformed. A malformed trigger fails closed
//! (does not match) and never aborts evaluation of its siblings.

use approval_types::{ApprovalTrigger, FieldValues, TriggerKind, TriggerOp};
use serde_json::Value;

/// Evaluates trigger sets against entity field snapshots
#[derive(Clone, Debug, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether *all* triggers in the set match (logical AND).
    ///
    /// An empty set always matches — a workflow without trigger
    /// conditions applies to every mutation of its entity kind.
    pub fn matches(
        &self,
        triggers: &[ApprovalTrigger],
        old: Option<&FieldValues>,
        new: Option<&FieldValues>,
    ) -> bool {
        triggers.iter().all(|trigger| {
            match self.evaluate(trigger, old, new) {
                TriggerOutcome::Matched => true,
                TriggerOutcome::NotMatched { .. } => false,
                TriggerOutcome::ConfigError { reason } => {
                    tracing::warn!(
                        trigger_id = %trigger.id,
                        field = %trigger.field,
                        reason = %reason,
                        "Malformed trigger fails closed"
                    );
                    false
                }
            }
        })
    }

    /// Evaluate a single trigger against the snapshots
    pub fn evaluate(
        &self,
        trigger: &ApprovalTrigger,
        old: Option<&FieldValues>,
        new: Option<&FieldValues>,
    ) -> TriggerOutcome {
        if trigger.kind == TriggerKind::PercentageChange {
            return self.evaluate_percentage_change(trigger, old, new);
        }

        // Read from the new values, falling back to old
        let actual = new
            .and_then(|v| v.get(&trigger.field))
            .or_else(|| old.and_then(|v| v.get(&trigger.field)));

        let Some(actual) = actual else {
            return TriggerOutcome::NotMatched {
                reason: format!("field '{}' absent from snapshots", trigger.field),
            };
        };

        self.compare(trigger, actual)
    }

    fn compare(&self, trigger: &ApprovalTrigger, actual: &Value) -> TriggerOutcome {
        match trigger.op {
            TriggerOp::Gt | TriggerOp::Gte | TriggerOp::Lt | TriggerOp::Lte => {
                let (Some(actual), Some(expected)) =
                    (numeric(actual), numeric(&trigger.value))
                else {
                    return TriggerOutcome::ConfigError {
                        reason: format!(
                            "operator {:?} needs numeric operands on field '{}'",
                            trigger.op, trigger.field
                        ),
                    };
                };
                let matched = match trigger.op {
                    TriggerOp::Gt => actual > expected,
                    TriggerOp::Gte => actual >= expected,
                    TriggerOp::Lt => actual < expected,
                    TriggerOp::Lte => actual <= expected,
                    _ => unreachable!(),
                };
                outcome(matched, || {
                    format!("{} {:?} {} is false", actual, trigger.op, expected)
                })
            }

            TriggerOp::Eq => outcome(value_eq(actual, &trigger.value), || {
                format!("'{}' != '{}'", actual, trigger.value)
            }),

            TriggerOp::Neq => outcome(!value_eq(actual, &trigger.value), || {
                format!("'{}' == '{}'", actual, trigger.value)
            }),

            TriggerOp::Contains => match actual {
                Value::String(haystack) => {
                    let needle = match &trigger.value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    outcome(haystack.contains(&needle), || {
                        format!("'{}' does not contain '{}'", haystack, needle)
                    })
                }
                Value::Array(items) => {
                    outcome(items.iter().any(|i| value_eq(i, &trigger.value)), || {
                        format!("collection does not contain '{}'", trigger.value)
                    })
                }
                _ => TriggerOutcome::ConfigError {
                    reason: format!(
                        "contains needs a string or collection on field '{}'",
                        trigger.field
                    ),
                },
            },

            TriggerOp::Between => {
                let Some(upper) = trigger.secondary_value.as_ref() else {
                    return TriggerOutcome::ConfigError {
                        reason: "between requires a secondary value".into(),
                    };
                };
                let (Some(actual), Some(lower), Some(upper)) =
                    (numeric(actual), numeric(&trigger.value), numeric(upper))
                else {
                    return TriggerOutcome::ConfigError {
                        reason: format!(
                            "between needs numeric operands on field '{}'",
                            trigger.field
                        ),
                    };
                };
                // Inclusive on both ends
                outcome(actual >= lower && actual <= upper, || {
                    format!("{} outside [{}, {}]", actual, lower, upper)
                })
            }
        }
    }

    /// Percentage-change triggers read both snapshots and compare the
    /// signed percent delta of the field.
    fn evaluate_percentage_change(
        &self,
        trigger: &ApprovalTrigger,
        old: Option<&FieldValues>,
        new: Option<&FieldValues>,
    ) -> TriggerOutcome {
        let old_value = old.and_then(|v| v.get(&trigger.field)).and_then(numeric);
        let new_value = new.and_then(|v| v.get(&trigger.field)).and_then(numeric);

        let (Some(old_value), Some(new_value)) = (old_value, new_value) else {
            return TriggerOutcome::NotMatched {
                reason: format!(
                    "field '{}' missing or non-numeric in one of the snapshots",
                    trigger.field
                ),
            };
        };

        if old_value == 0.0 {
            return TriggerOutcome::ConfigError {
                reason: format!(
                    "percentage change undefined for zero baseline on '{}'",
                    trigger.field
                ),
            };
        }

        let delta_pct = (new_value - old_value) / old_value * 100.0;
        let synthetic = ApprovalTrigger {
            field: trigger.field.clone(),
            kind: TriggerKind::EntityField,
            ..trigger.clone()
        };
        self.compare(&synthetic, &Value::from(delta_pct))
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    // Numeric values compare by magnitude so 100 == 100.0
    if let (Some(a), Some(b)) = (numeric(a), numeric(b)) {
        return a == b;
    }
    a == b
}

fn outcome(matched: bool, reason: impl FnOnce() -> String) -> TriggerOutcome {
    if matched {
        TriggerOutcome::Matched
    } else {
        TriggerOutcome::NotMatched { reason: reason() }
    }
}

/// Result of evaluating one trigger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The predicate holds
    Matched,
    /// The predicate was evaluated and does not hold
    NotMatched { reason: String },
    /// The trigger is malformed; fails closed
    ConfigError { reason: String },
}

impl TriggerOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> FieldValues {
        value.as_object().cloned().unwrap()
    }

    fn threshold(op: TriggerOp, value: serde_json::Value) -> ApprovalTrigger {
        ApprovalTrigger::new(TriggerKind::AmountThreshold, "amount", op, value)
    }

    #[test]
    fn test_numeric_operators() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": 125000}));

        assert!(evaluator
            .evaluate(&threshold(TriggerOp::Gte, json!(100000)), None, Some(&new))
            .is_matched());
        assert!(!evaluator
            .evaluate(&threshold(TriggerOp::Gt, json!(125000)), None, Some(&new))
            .is_matched());
        assert!(evaluator
            .evaluate(&threshold(TriggerOp::Lt, json!(200000)), None, Some(&new))
            .is_matched());
        assert!(evaluator
            .evaluate(&threshold(TriggerOp::Lte, json!(125000)), None, Some(&new))
            .is_matched());
    }

    #[test]
    fn test_numeric_string_coercion() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": "125000"}));

        assert!(evaluator
            .evaluate(&threshold(TriggerOp::Gte, json!(100000)), None, Some(&new))
            .is_matched());
    }

    #[test]
    fn test_non_numeric_fails_closed() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": "a lot"}));

        let result = evaluator.evaluate(&threshold(TriggerOp::Gt, json!(100)), None, Some(&new));
        assert!(matches!(result, TriggerOutcome::ConfigError { .. }));
        assert!(!evaluator.matches(
            &[threshold(TriggerOp::Gt, json!(100))],
            None,
            Some(&new)
        ));
    }

    #[test]
    fn test_eq_neq() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"status": "draft", "amount": 100}));

        let eq = ApprovalTrigger::new(
            TriggerKind::EntityField,
            "status",
            TriggerOp::Eq,
            json!("draft"),
        );
        assert!(evaluator.evaluate(&eq, None, Some(&new)).is_matched());

        let neq = ApprovalTrigger::new(
            TriggerKind::EntityField,
            "status",
            TriggerOp::Neq,
            json!("posted"),
        );
        assert!(evaluator.evaluate(&neq, None, Some(&new)).is_matched());

        // 100 and 100.0 are the same magnitude
        let num_eq =
            ApprovalTrigger::new(TriggerKind::EntityField, "amount", TriggerOp::Eq, json!(100.0));
        assert!(evaluator.evaluate(&num_eq, None, Some(&new)).is_matched());
    }

    #[test]
    fn test_contains() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({
            "memo": "urgent equipment purchase",
            "tags": ["capex", "equipment"]
        }));

        let substring = ApprovalTrigger::new(
            TriggerKind::EntityField,
            "memo",
            TriggerOp::Contains,
            json!("urgent"),
        );
        assert!(evaluator.evaluate(&substring, None, Some(&new)).is_matched());

        let membership = ApprovalTrigger::new(
            TriggerKind::EntityField,
            "tags",
            TriggerOp::Contains,
            json!("capex"),
        );
        assert!(evaluator.evaluate(&membership, None, Some(&new)).is_matched());

        let missing = ApprovalTrigger::new(
            TriggerKind::EntityField,
            "tags",
            TriggerOp::Contains,
            json!("opex"),
        );
        assert!(!evaluator.evaluate(&missing, None, Some(&new)).is_matched());
    }

    #[test]
    fn test_between_inclusive() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": 50000}));

        let trigger = threshold(TriggerOp::Between, json!(10000)).with_secondary(json!(50000));
        assert!(evaluator.evaluate(&trigger, None, Some(&new)).is_matched());

        let below = threshold(TriggerOp::Between, json!(60000)).with_secondary(json!(90000));
        assert!(!evaluator.evaluate(&below, None, Some(&new)).is_matched());
    }

    #[test]
    fn test_between_without_secondary_is_config_error() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": 50000}));

        let result =
            evaluator.evaluate(&threshold(TriggerOp::Between, json!(10000)), None, Some(&new));
        assert!(matches!(result, TriggerOutcome::ConfigError { .. }));
    }

    #[test]
    fn test_fallback_to_old_values() {
        let evaluator = TriggerEvaluator::new();
        let old = snapshot(json!({"amount": 125000}));
        let new = snapshot(json!({"status": "posted"}));

        assert!(evaluator
            .evaluate(
                &threshold(TriggerOp::Gte, json!(100000)),
                Some(&old),
                Some(&new)
            )
            .is_matched());
    }

    #[test]
    fn test_percentage_change() {
        let evaluator = TriggerEvaluator::new();
        let old = snapshot(json!({"amount": 450000}));
        let new = snapshot(json!({"amount": 495000}));

        // +10% change
        let trigger = ApprovalTrigger::new(
            TriggerKind::PercentageChange,
            "amount",
            TriggerOp::Gte,
            json!(10),
        );
        assert!(evaluator
            .evaluate(&trigger, Some(&old), Some(&new))
            .is_matched());

        let higher_bar = ApprovalTrigger::new(
            TriggerKind::PercentageChange,
            "amount",
            TriggerOp::Gt,
            json!(10),
        );
        assert!(!evaluator
            .evaluate(&higher_bar, Some(&old), Some(&new))
            .is_matched());
    }

    #[test]
    fn test_percentage_change_zero_baseline() {
        let evaluator = TriggerEvaluator::new();
        let old = snapshot(json!({"amount": 0}));
        let new = snapshot(json!({"amount": 100}));

        let trigger = ApprovalTrigger::new(
            TriggerKind::PercentageChange,
            "amount",
            TriggerOp::Gte,
            json!(10),
        );
        assert!(matches!(
            evaluator.evaluate(&trigger, Some(&old), Some(&new)),
            TriggerOutcome::ConfigError { .. }
        ));
    }

    #[test]
    fn test_empty_set_always_matches() {
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator.matches(&[], None, None));
    }

    #[test]
    fn test_conjunction() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": 125000, "status": "draft"}));

        let both = vec![
            threshold(TriggerOp::Gte, json!(100000)),
            ApprovalTrigger::new(
                TriggerKind::EntityField,
                "status",
                TriggerOp::Eq,
                json!("draft"),
            ),
        ];
        assert!(evaluator.matches(&both, None, Some(&new)));

        let one_fails = vec![
            threshold(TriggerOp::Gte, json!(100000)),
            ApprovalTrigger::new(
                TriggerKind::EntityField,
                "status",
                TriggerOp::Eq,
                json!("posted"),
            ),
        ];
        assert!(!evaluator.matches(&one_fails, None, Some(&new)));
    }

    #[test]
    fn test_config_error_does_not_abort_siblings() {
        let evaluator = TriggerEvaluator::new();
        let new = snapshot(json!({"amount": 125000, "memo": 42}));

        // First trigger malformed (contains on a number), second valid
        // and matching: the set still fails closed overall, but the
        // valid sibling must evaluate without panicking.
        let set = vec![
            ApprovalTrigger::new(
                TriggerKind::EntityField,
                "memo",
                TriggerOp::Contains,
                json!("x"),
            ),
            threshold(TriggerOp::Gte, json!(100000)),
        ];
        assert!(!evaluator.matches(&set, None, Some(&new)));
        assert!(evaluator
            .evaluate(&set[1], None, Some(&new))
            .is_matched());
    }
}
