//! Prompt construction with escalating strictness.
//!
//! A [`PromptSpec`] captures what is being asked for. [`render`] turns it into
//! the final prompt for one strictness level; each level adds to the one below
//! it. Rendering is pure and independent of any backend.

use crate::model::{Difficulty, GenerationRequest, INCLUDE_EXPLANATIONS, RequestKind, Strictness};
use crate::taxonomy::{BloomLevel, Taxonomy};

/// Longest excerpt of a failed output quoted back to the generator.
pub const MAX_FEEDBACK_CHARS: usize = 500;

/// Everything a prompt needs, independent of strictness.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub kind: RequestKind,
    pub topic: String,
    pub audience: String,
    pub item_count: u32,
    pub difficulty: Difficulty,
    pub distractor_count: usize,
    pub include_explanations: bool,
    /// One line per level: "Level: verb, verb, ...".
    pub vocabulary: Vec<String>,
}

impl PromptSpec {
    pub fn new(request: &GenerationRequest, taxonomy: &Taxonomy, distractor_count: usize) -> Self {
        Self {
            kind: request.kind(),
            topic: request.topic().trim().to_string(),
            audience: request.audience().trim().to_string(),
            item_count: request.item_count(),
            difficulty: request.difficulty(),
            distractor_count,
            include_explanations: request.flag(INCLUDE_EXPLANATIONS),
            vocabulary: BloomLevel::ALL
                .into_iter()
                .map(|level| taxonomy.describe_level(level))
                .collect(),
        }
    }
}

/// What went wrong on the previous attempt.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub error: String,
    pub raw_output: Option<String>,
}

/// Render the prompt for one attempt.
pub fn render(spec: &PromptSpec, strictness: Strictness, feedback: Option<&Feedback>) -> String {
    let mut prompt = baseline(spec);

    if strictness >= Strictness::Strengthened {
        if let Some(feedback) = feedback {
            prompt.push_str(&previous_failure(feedback));
        }
        prompt.push_str(&schema_reminder(spec));
        prompt.push_str(&example(spec));
    }

    if strictness >= Strictness::Strict {
        prompt.push_str(&hard_constraints(spec));
    }

    prompt
}

fn baseline(spec: &PromptSpec) -> String {
    match spec.kind {
        RequestKind::Objectives => {
            let mut p = format!(
                "You are an instructional designer. Write exactly {} learning objectives \
                 for a course on \"{}\" aimed at {}.\n\
                 Each objective has an id (LO-001, LO-002, ...), an action verb, the \
                 objective content that follows the verb, and its Bloom's taxonomy level.\n\
                 Progress from lower to higher cognitive levels.\n\
                 The verb must come from the approved list for the objective's level:\n",
                spec.item_count, spec.topic, spec.audience
            );
            for line in &spec.vocabulary {
                p.push_str("- ");
                p.push_str(line);
                p.push('\n');
            }
            if spec.include_explanations {
                p.push_str("Add a one-sentence explanation of why the verb fits the level.\n");
            }
            p.push_str(&format!(
                "Return a JSON object: {{\"topic\": string, \"objectives\": [{}]}}\n",
                objective_shape(spec)
            ));
            p
        }
        RequestKind::Quiz => format!(
            "You are an assessment writer. Write exactly {} {} multiple-choice questions \
             that assess this learning objective: \"{}\". The audience is {}.\n\
             Each question has an id (Q-001, Q-002, ...), a stem ending in a question mark, \
             one correct answer, {} plausible but wrong distractors, and an explanation \
             of why the answer is correct.\n\
             Return a JSON object: {{\"questions\": [{}]}}\n",
            spec.item_count,
            spec.difficulty,
            spec.topic,
            spec.audience,
            spec.distractor_count,
            question_shape(spec)
        ),
    }
}

fn objective_shape(spec: &PromptSpec) -> String {
    let explanation = if spec.include_explanations {
        ", \"explanation\": string"
    } else {
        ""
    };
    format!(
        "{{\"id\": string, \"verb\": string, \"content\": string, \"level\": \
         \"Remember\"|\"Understand\"|\"Apply\"|\"Analyze\"|\"Evaluate\"|\"Create\"{explanation}}}"
    )
}

fn question_shape(spec: &PromptSpec) -> String {
    format!(
        "{{\"id\": string, \"stem\": string, \"correct_answer\": string, \
         \"distractors\": [{} strings], \"explanation\": string, \"difficulty\": \"{}\"}}",
        spec.distractor_count, spec.difficulty
    )
}

fn previous_failure(feedback: &Feedback) -> String {
    let mut p = format!(
        "\nYour previous answer was rejected: {}\n",
        feedback.error
    );
    if let Some(raw) = &feedback.raw_output {
        let excerpt: String = raw.chars().take(MAX_FEEDBACK_CHARS).collect();
        let ellipsis = if raw.chars().count() > MAX_FEEDBACK_CHARS {
            "..."
        } else {
            ""
        };
        p.push_str(&format!(
            "It began with:\n<<<\n{excerpt}{ellipsis}\n>>>\nDo not repeat that mistake.\n"
        ));
    }
    p
}

fn schema_reminder(spec: &PromptSpec) -> String {
    match spec.kind {
        RequestKind::Objectives => format!(
            "\nThe exact schema is {{\"topic\": string, \"objectives\": [{}]}} \
             with exactly {} entries, each id unique.\n",
            objective_shape(spec),
            spec.item_count
        ),
        RequestKind::Quiz => format!(
            "\nThe exact schema is {{\"questions\": [{}]}} with exactly {} entries, \
             each id unique. The correct answer must not appear among the distractors, \
             and no two distractors may be the same.\n",
            question_shape(spec),
            spec.item_count
        ),
    }
}

fn example(spec: &PromptSpec) -> String {
    match spec.kind {
        RequestKind::Objectives => "\nExample of a valid answer for a different topic:\n\
             {\"topic\": \"Introduction to Machine Learning\", \"objectives\": [\
             {\"id\": \"LO-001\", \"verb\": \"define\", \"content\": \"machine learning and \
             its core components\", \"level\": \"Remember\"}, \
             {\"id\": \"LO-002\", \"verb\": \"explain\", \"content\": \"the differences between \
             supervised and unsupervised learning\", \"level\": \"Understand\"}]}\n"
            .to_string(),
        RequestKind::Quiz => "\nExample of a valid answer for a different objective:\n\
             {\"questions\": [{\"id\": \"Q-001\", \"stem\": \"What is the best definition of \
             machine learning?\", \"correct_answer\": \"A branch of AI in which systems learn \
             from data\", \"distractors\": [\"A programming language for data analysis\", \
             \"A hardware component for faster processing\", \"A database system for large \
             datasets\"], \"explanation\": \"Machine learning systems improve through \
             experience with data instead of explicit programming.\", \"difficulty\": \
             \"medium\"}]}\n"
            .to_string(),
    }
}

fn hard_constraints(spec: &PromptSpec) -> String {
    let mut rules = vec![
        "Respond with the JSON object only.".to_string(),
        "No markdown, no code fences, no commentary.".to_string(),
        "The first character must be '{' and the last character must be '}'.".to_string(),
        format!("Exactly {} items.", spec.item_count),
        "Every id is unique.".to_string(),
        "Every field is present and non-empty.".to_string(),
    ];
    match spec.kind {
        RequestKind::Objectives => {
            rules.push("Every verb appears in the approved list for its level.".to_string());
            rules.push(
                "Every level is one of Remember, Understand, Apply, Analyze, Evaluate, Create."
                    .to_string(),
            );
        }
        RequestKind::Quiz => {
            rules.push(format!(
                "Exactly {} distinct distractors per question.",
                spec.distractor_count
            ));
            rules.push("The correct answer is never one of the distractors.".to_string());
            rules.push("Every stem ends with '?'.".to_string());
        }
    }

    let mut p = String::from("\nHARD CONSTRAINTS (an answer that breaks any of these is discarded):\n");
    for (i, rule) in rules.iter().enumerate() {
        p.push_str(&format!("{}. {rule}\n", i + 1));
    }
    p
}
