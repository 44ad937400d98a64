//! Parses and validates a Commander's OUTPUT block (spec §4.7).
//!
//! Chose the tagged-text-block serialization over a dedicated tool call
//! (spec §9 open question #3: "left to the implementer; both are
//! acceptable provided schema validation and correction rounds are
//! preserved") -- a Commander already streams free-form reasoning text, so
//! a block delimiter keeps the structured answer inline with that stream
//! instead of requiring a final extra tool round-trip.

use serde_json::Value;

use missionctl_types::{OutputSchema, SchemaViolation};

pub const OPEN_TAG: &str = "<OUTPUT>";
pub const CLOSE_TAG: &str = "</OUTPUT>";

#[derive(Debug, Clone)]
pub enum OutputBlockError {
    /// No `<OUTPUT>...</OUTPUT>` block found in the assistant's turn.
    Missing,
    /// A block was found but its contents don't parse as JSON.
    NotJson(String),
    /// The block parsed but failed schema validation.
    Violations(Vec<SchemaViolation>),
}

impl std::fmt::Display for OutputBlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputBlockError::Missing => write!(f, "no OUTPUT block found"),
            OutputBlockError::NotJson(e) => write!(f, "OUTPUT block is not valid JSON: {e}"),
            OutputBlockError::Violations(v) => {
                write!(f, "OUTPUT block failed schema validation: {v:?}")
            }
        }
    }
}

/// Locates the first `<OUTPUT>...</OUTPUT>` block in `text` and returns
/// its inner contents plus the surrounding text (candidate free-text
/// summary) with the block removed.
pub fn extract(text: &str) -> Option<(&str, String)> {
    let start = text.find(OPEN_TAG)?;
    let after_open = start + OPEN_TAG.len();
    let end = text[after_open..].find(CLOSE_TAG)? + after_open;
    let inner = text[after_open..end].trim();
    let mut surrounding = String::new();
    surrounding.push_str(text[..start].trim());
    if !surrounding.is_empty() && end + CLOSE_TAG.len() < text.len() {
        surrounding.push('\n');
    }
    surrounding.push_str(text[end + CLOSE_TAG.len()..].trim());
    Some((inner, surrounding))
}

/// Parses and validates a Commander turn's OUTPUT block against `schema`.
///
/// Returns `(structured_output, free_text_summary)`. When `schema` is
/// `None`, no block is required: the whole turn is the summary and the
/// structured output is `Value::Null`.
pub fn validate_turn(text: &str, schema: Option<&OutputSchema>) -> Result<(Value, String), OutputBlockError> {
    let Some(schema) = schema else {
        return Ok((Value::Null, text.trim().to_string()));
    };

    let (inner, surrounding) = extract(text).ok_or(OutputBlockError::Missing)?;
    let candidate: Value = serde_json::from_str(inner).map_err(|e| OutputBlockError::NotJson(e.to_string()))?;
    let validated = schema.validate(&candidate).map_err(OutputBlockError::Violations)?;
    Ok((validated, surrounding))
}

/// Builds the corrective observation appended to the session after a
/// failed validation round (spec §4.7: "on failure a corrective
/// observation is appended and the loop continues").
pub fn correction_message(error: &OutputBlockError) -> String {
    match error {
        OutputBlockError::Missing => format!(
            "Your response did not contain an {OPEN_TAG}...{CLOSE_TAG} block. \
             Emit your final structured answer as a JSON object inside one."
        ),
        OutputBlockError::NotJson(reason) => format!(
            "The {OPEN_TAG}...{CLOSE_TAG} block did not contain valid JSON: {reason}. \
             Re-emit the block with a single valid JSON object."
        ),
        OutputBlockError::Violations(violations) => {
            let details: Vec<String> = violations
                .iter()
                .map(|v| format!("- `{}`: {}", v.field, v.reason))
                .collect();
            format!(
                "The {OPEN_TAG}...{CLOSE_TAG} block did not satisfy the declared output schema:\n{}\n\
                 Re-emit the block, correcting these fields.",
                details.join("\n")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionctl_types::OutputField;

    fn schema() -> OutputSchema {
        OutputSchema {
            fields: vec![OutputField {
                name: "count".to_string(),
                field_type: missionctl_types::FieldType::Integer,
                description: None,
                required: true,
            }],
        }
    }

    #[test]
    fn extracts_block_and_surrounding_text() {
        let text = "Here is my answer.\n<OUTPUT>{\"count\": 3}</OUTPUT>\nDone.";
        let (inner, surrounding) = extract(text).unwrap();
        assert_eq!(inner, "{\"count\": 3}");
        assert!(surrounding.contains("Here is my answer."));
        assert!(surrounding.contains("Done."));
    }

    #[test]
    fn missing_block_without_schema_is_not_an_error() {
        let (value, summary) = validate_turn("just a free-text answer", None).unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(summary, "just a free-text answer");
    }

    #[test]
    fn missing_block_with_schema_reports_missing() {
        let err = validate_turn("no block here", Some(&schema())).unwrap_err();
        assert!(matches!(err, OutputBlockError::Missing));
    }

    #[test]
    fn coerces_and_validates_against_schema() {
        let text = "<OUTPUT>{\"count\": \"3\"}</OUTPUT>";
        let (value, _) = validate_turn(text, Some(&schema())).unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn violation_message_names_field() {
        let text = "<OUTPUT>{}</OUTPUT>";
        let err = validate_turn(text, Some(&schema())).unwrap_err();
        let msg = correction_message(&err);
        assert!(msg.contains("count"));
    }
}
