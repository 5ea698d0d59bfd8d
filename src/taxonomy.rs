//! Bloom's taxonomy: six ordered cognitive levels and their approved verbs.
//!
//! The table is loaded once at startup and never mutated. The built-in table
//! ships with the crate; a versioned TOML file can replace it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Cognitive level, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BloomLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub const ALL: [BloomLevel; 6] = [
        BloomLevel::Remember,
        BloomLevel::Understand,
        BloomLevel::Apply,
        BloomLevel::Analyze,
        BloomLevel::Evaluate,
        BloomLevel::Create,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BloomLevel::Remember => "Remember",
            BloomLevel::Understand => "Understand",
            BloomLevel::Apply => "Apply",
            BloomLevel::Analyze => "Analyze",
            BloomLevel::Evaluate => "Evaluate",
            BloomLevel::Create => "Create",
        }
    }
}

impl std::fmt::Display for BloomLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BloomLevel {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        BloomLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown Bloom level: {s}"))
    }
}

/// Canonical form used for every term comparison: lowercase, trimmed, single
/// spaces between words. Multi-word terms stay whole phrases.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
struct LevelTerms {
    /// Terms as written in the source table, in table order.
    terms: Vec<String>,
    normalized: HashSet<String>,
}

/// Immutable level → vocabulary table.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    version: String,
    levels: BTreeMap<BloomLevel, LevelTerms>,
}

/// On-disk shape of a taxonomy override file.
#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    version: String,
    levels: BTreeMap<String, Vec<String>>,
}

impl Taxonomy {
    /// The built-in Bloom's table, 30 verbs per level.
    pub fn bloom() -> Self {
        let levels = BloomLevel::ALL
            .into_iter()
            .zip(BUILTIN_TERMS)
            .map(|(level, terms)| {
                let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
                (level, LevelTerms::new(terms))
            })
            .collect();
        Self {
            version: BUILTIN_VERSION.to_string(),
            levels,
        }
    }

    /// Parse a taxonomy table from TOML.
    ///
    /// Every level must be present with at least one term, and a level may
    /// not list the same term twice.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TaxonomyFile =
            toml::from_str(content).map_err(|e| Error::Taxonomy(format!("bad taxonomy file: {e}")))?;

        if file.version.trim().is_empty() {
            return Err(Error::Taxonomy("taxonomy version is empty".to_string()));
        }

        let mut levels = BTreeMap::new();
        for (name, terms) in file.levels {
            let level: BloomLevel = name.parse().map_err(Error::Taxonomy)?;
            if levels.contains_key(&level) {
                return Err(Error::Taxonomy(format!("level {level} listed twice")));
            }
            if terms.is_empty() {
                return Err(Error::Taxonomy(format!("level {level} has no terms")));
            }
            let mut seen = HashSet::new();
            for term in &terms {
                let normalized = normalize_term(term);
                if normalized.is_empty() {
                    return Err(Error::Taxonomy(format!("level {level} has an empty term")));
                }
                if !seen.insert(normalized) {
                    return Err(Error::Taxonomy(format!(
                        "level {level} lists '{term}' more than once"
                    )));
                }
            }
            levels.insert(level, LevelTerms::new(terms));
        }

        if let Some(missing) = BloomLevel::ALL.into_iter().find(|l| !levels.contains_key(l)) {
            return Err(Error::Taxonomy(format!("level {missing} is missing")));
        }

        Ok(Self {
            version: file.version,
            levels,
        })
    }

    /// Load a taxonomy override file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Taxonomy(format!("cannot read taxonomy file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Approved terms for a level, in table order.
    pub fn terms(&self, level: BloomLevel) -> &[String] {
        self.levels
            .get(&level)
            .map(|l| l.terms.as_slice())
            .unwrap_or(&[])
    }

    /// Is `term` approved for `level`? Case-insensitive, whole phrase.
    pub fn contains(&self, level: BloomLevel, term: &str) -> bool {
        self.levels
            .get(&level)
            .is_some_and(|l| l.normalized.contains(&normalize_term(term)))
    }

    /// Every level whose vocabulary includes `term`.
    pub fn levels_for(&self, term: &str) -> Vec<BloomLevel> {
        let normalized = normalize_term(term);
        self.levels
            .iter()
            .filter(|(_, l)| l.normalized.contains(&normalized))
            .map(|(level, _)| *level)
            .collect()
    }

    /// Deterministic replacement term for an invalid one.
    ///
    /// Picks `terms(level)[fnv1a(normalize(original)) % len]`, so the same
    /// bad term always maps to the same replacement while different bad terms
    /// spread across the vocabulary.
    pub fn replacement_for(&self, level: BloomLevel, original: &str) -> Option<&str> {
        let terms = self.terms(level);
        if terms.is_empty() {
            return None;
        }
        let index = (fnv1a(normalize_term(original).as_bytes()) % terms.len() as u64) as usize;
        Some(terms[index].as_str())
    }

    /// Compact rendering used inside prompts.
    pub fn describe_level(&self, level: BloomLevel) -> String {
        format!("{level}: {}", self.terms(level).join(", "))
    }
}

impl LevelTerms {
    fn new(terms: Vec<String>) -> Self {
        let normalized = terms.iter().map(|t| normalize_term(t)).collect();
        Self { terms, normalized }
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::bloom()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

const BUILTIN_VERSION: &str = "bloom-2001";

// Order matches BloomLevel::ALL. Do not edit without bumping BUILTIN_VERSION.
const BUILTIN_TERMS: [&[&str]; 6] = [
    &[
        "define", "list", "name", "identify", "recall", "recognize", "label", "match",
        "memorize", "repeat", "state", "select", "locate", "tell", "quote", "enumerate",
        "outline", "describe", "who", "what", "when", "where", "which", "how", "show",
        "mark", "spell", "find", "cite", "tabulate",
    ],
    &[
        "explain", "describe", "summarize", "interpret", "paraphrase", "clarify", "discuss",
        "illustrate", "demonstrate", "exemplify", "rephrase", "translate", "convert",
        "estimate", "infer", "predict", "conclude", "differentiate", "distinguish", "compare",
        "contrast", "extend", "generalize", "give examples", "restate", "express", "indicate",
        "reason", "derive", "grasp",
    ],
    &[
        "apply", "use", "implement", "execute", "employ", "utilize", "practice", "perform",
        "operate", "manipulate", "modify", "change", "solve", "calculate", "compute",
        "determine", "discover", "verify", "validate", "check", "test", "debug", "trace",
        "run", "build", "construct", "create", "generate", "produce", "develop",
    ],
    &[
        "analyze", "differentiate", "distinguish", "examine", "investigate", "inspect",
        "explore", "compare", "contrast", "categorize", "classify", "break down",
        "deconstruct", "separate", "discriminate", "detect", "identify patterns",
        "recognize structure", "find", "diagnose", "troubleshoot", "audit", "review",
        "assess", "evaluate", "organize", "outline", "structure", "map", "profile",
    ],
    &[
        "evaluate", "assess", "judge", "appraise", "estimate", "measure", "rate", "score",
        "value", "critique", "criticize", "recommend", "advise", "select", "choose",
        "prefer", "defend", "justify", "validate", "verify", "confirm", "corroborate",
        "support", "argue", "debate", "dispute", "question", "challenge", "weigh",
        "prioritize",
    ],
    &[
        "create", "design", "construct", "build", "develop", "formulate", "generate",
        "produce", "manufacture", "compose", "assemble", "combine", "integrate", "merge",
        "blend", "synthesize", "originate", "devise", "invent", "concoct", "plan", "propose",
        "draft", "outline", "structure", "organize", "arrange", "author", "fabricate",
        "derive",
    ],
];
