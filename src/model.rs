//! Core data model.
//!
//! A generation request asks for a batch of learning objectives or quiz
//! questions. Each request runs through a bounded series of attempts and ends
//! in a validated batch or a structured failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::taxonomy::BloomLevel;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Skip the cache read for this request (the result is still written).
pub const FORCE_CACHE_BYPASS: &str = "force_cache_bypass";
/// Ask for a short explanation alongside each objective.
pub const INCLUDE_EXPLANATIONS: &str = "include_explanations";

/// Flags the engine interprets. Unset and `false` mean the same thing.
pub const KNOWN_FLAGS: [&str; 2] = [FORCE_CACHE_BYPASS, INCLUDE_EXPLANATIONS];

/// Trim, collapse inner whitespace, lowercase.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub const MAX_TEXT_LEN: usize = 200;
pub const MAX_OBJECTIVES: u32 = 12;
pub const MAX_QUESTIONS: u32 = 10;

/// Newtype for request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the generator is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Objectives,
    Quiz,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestKind::Objectives => "objectives",
            RequestKind::Quiz => "quiz",
        };
        write!(f, "{s}")
    }
}

/// Quiz difficulty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// An immutable request for generated content.
///
/// For quiz requests `topic` is the learning objective the questions assess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub(crate) id: RequestId,
    pub(crate) topic: String,
    pub(crate) audience: String,
    pub(crate) item_count: u32,
    pub(crate) kind: RequestKind,
    pub(crate) difficulty: Difficulty,
    pub(crate) options: BTreeMap<String, bool>,
}

impl GenerationRequest {
    pub fn new(
        kind: RequestKind,
        topic: impl Into<String>,
        audience: impl Into<String>,
        item_count: u32,
    ) -> Self {
        Self {
            id: RequestId::new(),
            topic: topic.into(),
            audience: audience.into(),
            item_count,
            kind,
            difficulty: Difficulty::default(),
            options: BTreeMap::new(),
        }
    }

    pub fn objectives(topic: impl Into<String>, audience: impl Into<String>, count: u32) -> Self {
        Self::new(RequestKind::Objectives, topic, audience, count)
    }

    pub fn quiz(objective: impl Into<String>, audience: impl Into<String>, count: u32) -> Self {
        Self::new(RequestKind::Quiz, objective, audience, count)
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Set an option. Keys are normalized like topics, so `"Force_Cache_Bypass"`
    /// and `"force_cache_bypass"` name the same option.
    pub fn option(mut self, key: impl AsRef<str>, value: bool) -> Self {
        self.options.insert(normalize_text(key.as_ref()), value);
        self
    }

    pub fn force_cache_bypass(self) -> Self {
        self.option(FORCE_CACHE_BYPASS, true)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn options(&self) -> &BTreeMap<String, bool> {
        &self.options
    }

    /// True when the option is present and set.
    pub fn flag(&self, key: &str) -> bool {
        self.options.get(&normalize_text(key)).copied().unwrap_or(false)
    }

    /// Check field bounds before any cache or backend work.
    pub fn check(&self) -> Result<(), String> {
        for (field, value) in [("topic", &self.topic), ("audience", &self.audience)] {
            let len = value.trim().chars().count();
            if len == 0 {
                return Err(format!("{field} must not be empty"));
            }
            if len > MAX_TEXT_LEN {
                return Err(format!("{field} exceeds {MAX_TEXT_LEN} characters"));
            }
        }
        let max = match self.kind {
            RequestKind::Objectives => MAX_OBJECTIVES,
            RequestKind::Quiz => MAX_QUESTIONS,
        };
        if self.item_count == 0 || self.item_count > max {
            return Err(format!(
                "item_count must be between 1 and {max} for {}, got {}",
                self.kind, self.item_count
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

/// How hard the prompt leans on the output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Normal,
    Strengthened,
    Strict,
}

impl Strictness {
    /// Strictness for a 1-based attempt number. Attempts past the third stay strict.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => Strictness::Normal,
            2 => Strictness::Strengthened,
            _ => Strictness::Strict,
        }
    }
}

impl std::fmt::Display for Strictness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strictness::Normal => "normal",
            Strictness::Strengthened => "strengthened",
            Strictness::Strict => "strict",
        };
        write!(f, "{s}")
    }
}

/// Classification of a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ParseError,
    ValidationError,
    TransientError,
    Timeout,
}

impl AttemptOutcome {
    /// Backend-side failure (no usable output came back).
    pub fn is_transient(self) -> bool {
        matches!(self, AttemptOutcome::TransientError | AttemptOutcome::Timeout)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::ParseError => "parse_error",
            AttemptOutcome::ValidationError => "validation_error",
            AttemptOutcome::TransientError => "transient_error",
            AttemptOutcome::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// One attempt against the backend. Written once when the outcome is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// 1-based, strictly increasing within a request.
    pub attempt_number: u32,
    pub prompt_strictness: Strictness,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Raw backend text, absent when the backend never answered.
    pub raw_output: Option<String>,
    pub outcome: AttemptOutcome,
    /// Human-readable reason for a non-success outcome.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Validated output
// ---------------------------------------------------------------------------

/// Kind-specific part of a validated item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetail {
    Objective {
        level: BloomLevel,
        verb: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    Question {
        difficulty: Difficulty,
        correct_answer: String,
        distractors: Vec<String>,
        explanation: String,
    },
}

/// One learning objective or quiz question after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedItem {
    pub id: String,
    /// Objective text, or the question stem.
    pub content: String,
    #[serde(flatten)]
    pub detail: ItemDetail,
    /// The validator replaced the generated verb.
    pub corrected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_term: Option<String>,
}

impl ValidatedItem {
    /// The taxonomy term carried by an objective.
    pub fn term(&self) -> Option<&str> {
        match &self.detail {
            ItemDetail::Objective { verb, .. } => Some(verb),
            ItemDetail::Question { .. } => None,
        }
    }

    pub fn level(&self) -> Option<BloomLevel> {
        match &self.detail {
            ItemDetail::Objective { level, .. } => Some(*level),
            ItemDetail::Question { .. } => None,
        }
    }
}

/// Record of one vocabulary substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub item_id: String,
    pub level: BloomLevel,
    pub original: String,
    pub replacement: String,
}

/// Where a returned batch came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Freshly generated.
    #[default]
    Miss,
    /// Served from a fresh cache entry.
    Hit,
    /// Served from an expired entry because the backend is unavailable.
    Stale,
}

/// A validated set of items, the unit that is cached and returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedBatch {
    pub topic: String,
    pub kind: RequestKind,
    pub items: Vec<ValidatedItem>,
    pub corrections: Vec<Correction>,
    /// Attempt on which this batch was produced.
    pub attempts: u32,
    pub taxonomy_version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub cache_status: CacheStatus,
}

impl ValidatedBatch {
    pub fn is_degraded(&self) -> bool {
        self.cache_status == CacheStatus::Stale
    }

    pub fn has_corrections(&self) -> bool {
        !self.corrections.is_empty()
    }
}
