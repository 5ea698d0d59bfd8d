//! Structural and vocabulary validation of decoded generator output.
//!
//! Structural problems (missing fields, wrong count, duplicate ids, malformed
//! quiz questions) fail the attempt. A verb outside its level's vocabulary is
//! not a failure: [`correct_objective`] swaps in an approved verb and the
//! substitution is recorded on the batch.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::{
    Correction, Difficulty, GenerationRequest, INCLUDE_EXPLANATIONS, ItemDetail, RequestKind,
    ValidatedBatch, ValidatedItem,
};
use crate::taxonomy::{BloomLevel, Taxonomy, normalize_term};

pub const DEFAULT_DISTRACTOR_COUNT: usize = 3;
const MIN_STEM_CHARS: usize = 10;
const MIN_EXPLANATION_CHARS: usize = 15;
const MAX_ANSWER_LENGTH_GAP: usize = 200;

/// Why a decoded payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("output is not a JSON object with a '{0}' array")]
    MissingItems(&'static str),

    #[error("item {index}: missing or empty field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("item {index}: invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("expected {expected} items, got {actual}")]
    WrongCount { expected: usize, actual: usize },

    #[error("duplicate item id '{0}'")]
    DuplicateId(String),

    #[error("question '{id}': {reason}")]
    MalformedQuiz { id: String, reason: String },
}

/// What a payload must look like for one request.
#[derive(Debug, Clone)]
pub struct ExpectedSchema {
    pub kind: RequestKind,
    pub topic: String,
    pub item_count: usize,
    /// Applied to questions that do not state their own difficulty.
    pub difficulty: Difficulty,
    pub distractor_count: usize,
    pub include_explanations: bool,
}

impl ExpectedSchema {
    pub fn for_request(request: &GenerationRequest, distractor_count: usize) -> Self {
        Self {
            kind: request.kind(),
            topic: request.topic().trim().to_string(),
            item_count: request.item_count() as usize,
            difficulty: request.difficulty(),
            distractor_count,
            include_explanations: request.flag(INCLUDE_EXPLANATIONS),
        }
    }

    /// Name of the array that holds the items.
    pub fn items_key(&self) -> &'static str {
        items_key(self.kind)
    }
}

fn items_key(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Objectives => "objectives",
        RequestKind::Quiz => "questions",
    }
}

/// Validate a decoded payload against `schema`.
///
/// The returned batch reports `attempts = 1`; the retry loop overwrites it
/// with the attempt that produced the batch.
pub fn validate(
    payload: &Value,
    schema: &ExpectedSchema,
    taxonomy: &Taxonomy,
) -> Result<ValidatedBatch, ValidationError> {
    let key = schema.items_key();
    let raw_items = payload
        .get(key)
        .or_else(|| payload.get("items"))
        .and_then(Value::as_array)
        .ok_or(ValidationError::MissingItems(key))?;

    if raw_items.len() != schema.item_count {
        return Err(ValidationError::WrongCount {
            expected: schema.item_count,
            actual: raw_items.len(),
        });
    }

    let mut items = Vec::with_capacity(raw_items.len());
    let mut corrections = Vec::new();
    let mut seen_ids = HashSet::new();

    for (index, raw) in raw_items.iter().enumerate() {
        let obj = raw.as_object().ok_or(ValidationError::InvalidField {
            index,
            field: "item",
            reason: "not an object".to_string(),
        })?;

        let item = match schema.kind {
            RequestKind::Objectives => decode_objective(index, obj, schema)?,
            RequestKind::Quiz => decode_question(index, obj, schema)?,
        };

        if !seen_ids.insert(item.id.to_lowercase()) {
            return Err(ValidationError::DuplicateId(item.id));
        }

        let (item, correction) = correct_objective(item, taxonomy);
        corrections.extend(correction);
        items.push(item);
    }

    Ok(ValidatedBatch {
        topic: schema.topic.clone(),
        kind: schema.kind,
        items,
        corrections,
        attempts: 1,
        taxonomy_version: taxonomy.version().to_string(),
        generated_at: Utc::now(),
        cache_status: Default::default(),
    })
}

/// Replace an objective's verb when it is not approved for its level.
///
/// Pure: returns the (possibly) rewritten item and the correction made.
/// Questions and already-valid objectives come back untouched.
pub fn correct_objective(
    item: ValidatedItem,
    taxonomy: &Taxonomy,
) -> (ValidatedItem, Option<Correction>) {
    let ItemDetail::Objective {
        level,
        verb,
        explanation,
    } = &item.detail
    else {
        return (item, None);
    };

    if taxonomy.contains(*level, verb) {
        return (item, None);
    }
    let Some(replacement) = taxonomy.replacement_for(*level, verb) else {
        return (item, None);
    };

    let correction = Correction {
        item_id: item.id.clone(),
        level: *level,
        original: verb.clone(),
        replacement: replacement.to_string(),
    };
    let corrected = ValidatedItem {
        id: item.id.clone(),
        content: item.content.clone(),
        detail: ItemDetail::Objective {
            level: *level,
            verb: replacement.to_string(),
            explanation: explanation.clone(),
        },
        corrected: true,
        original_term: Some(verb.clone()),
    };
    (corrected, Some(correction))
}

/// Render items back into the generator's wire shape.
///
/// Feeding the result through [`validate`] reproduces the same items.
pub fn to_wire(kind: RequestKind, topic: &str, items: &[ValidatedItem]) -> Value {
    let rendered: Vec<Value> = items
        .iter()
        .map(|item| match &item.detail {
            ItemDetail::Objective {
                level,
                verb,
                explanation,
            } => {
                let mut obj = json!({
                    "id": item.id,
                    "verb": verb,
                    "content": item.content,
                    "level": level.as_str(),
                });
                if let Some(explanation) = explanation {
                    obj["explanation"] = json!(explanation);
                }
                obj
            }
            ItemDetail::Question {
                difficulty,
                correct_answer,
                distractors,
                explanation,
            } => json!({
                "id": item.id,
                "stem": item.content,
                "correct_answer": correct_answer,
                "distractors": distractors,
                "explanation": explanation,
                "difficulty": difficulty.to_string(),
            }),
        })
        .collect();
    json!({ "topic": topic, items_key(kind): rendered })
}

fn decode_objective(
    index: usize,
    obj: &Map<String, Value>,
    schema: &ExpectedSchema,
) -> Result<ValidatedItem, ValidationError> {
    let id = required_str(index, obj, "id")?;
    let verb = required_str(index, obj, "verb")?;
    let content = required_str(index, obj, "content")?;
    let level_raw = required_str(index, obj, "level")?;
    let level: BloomLevel = level_raw
        .parse()
        .map_err(|reason| ValidationError::InvalidField {
            index,
            field: "level",
            reason,
        })?;
    let explanation = if schema.include_explanations {
        Some(required_str(index, obj, "explanation")?)
    } else {
        optional_str(obj, "explanation")
    };

    Ok(ValidatedItem {
        id,
        content,
        detail: ItemDetail::Objective {
            level,
            verb,
            explanation,
        },
        corrected: false,
        original_term: None,
    })
}

fn decode_question(
    index: usize,
    obj: &Map<String, Value>,
    schema: &ExpectedSchema,
) -> Result<ValidatedItem, ValidationError> {
    let id = required_str(index, obj, "id")?;
    let stem = required_str(index, obj, "stem")?;
    let explanation = required_str(index, obj, "explanation")?;
    let malformed = |reason: String| ValidationError::MalformedQuiz {
        id: id.clone(),
        reason,
    };

    let correct_answer = match obj.get("correct_answer") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(answers)) if answers.len() == 1 => answers[0]
            .as_str()
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        Some(Value::Array(answers)) => {
            return Err(malformed(format!(
                "exactly one correct answer required, got {}",
                answers.len()
            )));
        }
        _ => String::new(),
    };
    if correct_answer.is_empty() {
        return Err(ValidationError::MissingField {
            index,
            field: "correct_answer",
        });
    }

    let distractors: Vec<String> = obj
        .get("distractors")
        .and_then(Value::as_array)
        .ok_or(ValidationError::MissingField {
            index,
            field: "distractors",
        })?
        .iter()
        .map(|d| d.as_str().map(|s| s.trim().to_string()).unwrap_or_default())
        .collect();

    let difficulty = match optional_str(obj, "difficulty") {
        Some(raw) => raw.parse().map_err(|reason| ValidationError::InvalidField {
            index,
            field: "difficulty",
            reason,
        })?,
        None => schema.difficulty,
    };

    check_question(&stem, &correct_answer, &distractors, &explanation, schema.distractor_count)
        .map_err(malformed)?;

    Ok(ValidatedItem {
        id,
        content: stem,
        detail: ItemDetail::Question {
            difficulty,
            correct_answer,
            distractors,
            explanation,
        },
        corrected: false,
        original_term: None,
    })
}

/// Quiz structure and quality rules. Distinctness compares normalized text.
fn check_question(
    stem: &str,
    correct_answer: &str,
    distractors: &[String],
    explanation: &str,
    distractor_count: usize,
) -> Result<(), String> {
    if stem.chars().count() < MIN_STEM_CHARS {
        return Err(format!("stem must be at least {MIN_STEM_CHARS} characters"));
    }
    if !stem.ends_with('?') {
        return Err("stem must end with a question mark".to_string());
    }
    if distractors.len() != distractor_count {
        return Err(format!(
            "exactly {distractor_count} distractors required, got {}",
            distractors.len()
        ));
    }
    if let Some(pos) = distractors.iter().position(|d| d.is_empty()) {
        return Err(format!("distractor {} is empty", pos + 1));
    }

    let correct = normalize_term(correct_answer);
    let mut seen = HashSet::new();
    for distractor in distractors {
        let normalized = normalize_term(distractor);
        if normalized == correct {
            return Err("correct answer appears among the distractors".to_string());
        }
        if !seen.insert(normalized) {
            return Err(format!("duplicate distractor '{distractor}'"));
        }
    }

    let correct_len = correct_answer.chars().count();
    if distractors
        .iter()
        .any(|d| d.chars().count().abs_diff(correct_len) > MAX_ANSWER_LENGTH_GAP)
    {
        return Err("distractor length is far from the correct answer's".to_string());
    }

    if explanation.chars().count() < MIN_EXPLANATION_CHARS {
        return Err(format!(
            "explanation must be at least {MIN_EXPLANATION_CHARS} characters"
        ));
    }
    Ok(())
}

fn required_str(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    optional_str(obj, field).ok_or(ValidationError::MissingField { index, field })
}

/// Trimmed string field; numbers are accepted and rendered as text.
fn optional_str(obj: &Map<String, Value>, field: &str) -> Option<String> {
    let value = match obj.get(field)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}
