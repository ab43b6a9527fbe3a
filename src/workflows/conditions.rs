// Transition conditions - typed predicates gating workflow transitions

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Failure to interpret a stored (condition_type, condition_value) pair.
///
/// Raised at template creation so a bad predicate is rejected up front
/// instead of silently never matching at evaluation time.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown condition type '{0}'")]
    UnknownKind(String),
    #[error("condition type '{kind}' requires a payload")]
    MissingPayload { kind: String },
    #[error("invalid payload for condition type '{kind}': {reason}")]
    InvalidPayload { kind: String, reason: String },
}

/// Closed set of transition predicate kinds.
///
/// Each kind pairs a `condition_type` string with a typed payload decoded
/// from the stored `condition_value` JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TransitionCondition {
    /// Instance governs an entity of exactly this type.
    EntityTypeEquals { value: String },
    /// The action's data payload carries `field` with exactly `value`.
    FieldEquals { field: String, value: JsonValue },
    /// Numeric comparison against the action's data payload.
    FieldGreaterThan { field: String, value: f64 },
    FieldLessThan { field: String, value: f64 },
}

/// What a condition is evaluated against: the instance's entity type plus
/// the data payload of the action being processed.
#[derive(Debug, Clone)]
pub struct ConditionContext<'a> {
    pub entity_type: &'a str,
    pub data: &'a JsonValue,
}

impl TransitionCondition {
    pub const KIND_ENTITY_TYPE_EQUALS: &'static str = "entity_type_equals";
    pub const KIND_FIELD_EQUALS: &'static str = "field_equals";
    pub const KIND_FIELD_GREATER_THAN: &'static str = "field_greater_than";
    pub const KIND_FIELD_LESS_THAN: &'static str = "field_less_than";

    /// Decode a stored condition. `kind` is the `condition_type` column,
    /// `payload` the `condition_value` column.
    pub fn parse(kind: &str, payload: Option<&JsonValue>) -> Result<Self, ConditionError> {
        let payload = payload.ok_or_else(|| ConditionError::MissingPayload {
            kind: kind.to_string(),
        })?;

        let invalid = |reason: &str| ConditionError::InvalidPayload {
            kind: kind.to_string(),
            reason: reason.to_string(),
        };

        match kind {
            Self::KIND_ENTITY_TYPE_EQUALS => {
                let value = payload
                    .get("value")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| invalid("expected string field 'value'"))?;
                Ok(Self::EntityTypeEquals {
                    value: value.to_string(),
                })
            }
            Self::KIND_FIELD_EQUALS => {
                let field = payload
                    .get("field")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| invalid("expected string field 'field'"))?;
                let value = payload
                    .get("value")
                    .cloned()
                    .ok_or_else(|| invalid("expected field 'value'"))?;
                Ok(Self::FieldEquals {
                    field: field.to_string(),
                    value,
                })
            }
            Self::KIND_FIELD_GREATER_THAN | Self::KIND_FIELD_LESS_THAN => {
                let field = payload
                    .get("field")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| invalid("expected string field 'field'"))?;
                let value = payload
                    .get("value")
                    .and_then(JsonValue::as_f64)
                    .ok_or_else(|| invalid("expected numeric field 'value'"))?;
                if kind == Self::KIND_FIELD_GREATER_THAN {
                    Ok(Self::FieldGreaterThan {
                        field: field.to_string(),
                        value,
                    })
                } else {
                    Ok(Self::FieldLessThan {
                        field: field.to_string(),
                        value,
                    })
                }
            }
            other => Err(ConditionError::UnknownKind(other.to_string())),
        }
    }

    pub fn evaluate(&self, ctx: &ConditionContext) -> bool {
        match self {
            Self::EntityTypeEquals { value } => ctx.entity_type == value,
            Self::FieldEquals { field, value } => {
                ctx.data.get(field).map(|v| v == value).unwrap_or(false)
            }
            Self::FieldGreaterThan { field, value } => ctx
                .data
                .get(field)
                .and_then(JsonValue::as_f64)
                .map(|v| v > *value)
                .unwrap_or(false),
            Self::FieldLessThan { field, value } => ctx
                .data
                .get(field)
                .and_then(JsonValue::as_f64)
                .map(|v| v < *value)
                .unwrap_or(false),
        }
    }
}
