use instruct_engine::model::{Difficulty, GenerationRequest, INCLUDE_EXPLANATIONS, Strictness};
use instruct_engine::prompt::{Feedback, MAX_FEEDBACK_CHARS, PromptSpec, render};
use instruct_engine::taxonomy::Taxonomy;

fn objectives_spec() -> PromptSpec {
    let request = GenerationRequest::objectives("Python loops", "first-year students", 5);
    PromptSpec::new(&request, &Taxonomy::bloom(), 3)
}

#[test]
fn strictness_follows_attempt_number() {
    assert_eq!(Strictness::for_attempt(1), Strictness::Normal);
    assert_eq!(Strictness::for_attempt(2), Strictness::Strengthened);
    assert_eq!(Strictness::for_attempt(3), Strictness::Strict);
    assert_eq!(Strictness::for_attempt(7), Strictness::Strict);
}

#[test]
fn baseline_names_topic_count_and_vocabulary() {
    let prompt = render(&objectives_spec(), Strictness::Normal, None);
    assert!(prompt.contains("Python loops"));
    assert!(prompt.contains("first-year students"));
    assert!(prompt.contains("exactly 5"));
    assert!(prompt.contains("Remember: define"));
    assert!(!prompt.contains("Example"));
}

#[test]
fn each_level_extends_the_previous() {
    let spec = objectives_spec();
    let normal = render(&spec, Strictness::Normal, None);
    let strengthened = render(&spec, Strictness::Strengthened, None);
    let strict = render(&spec, Strictness::Strict, None);

    assert!(strengthened.starts_with(&normal));
    assert!(strict.starts_with(&strengthened));
    assert!(strengthened.contains("Example"));
    assert!(strengthened.contains("exact schema"));
    assert!(strict.contains("HARD CONSTRAINTS"));
    assert!(!strengthened.contains("HARD CONSTRAINTS"));
}

#[test]
fn rendering_is_pure() {
    let spec = objectives_spec();
    assert_eq!(
        render(&spec, Strictness::Strict, None),
        render(&spec, Strictness::Strict, None)
    );
}

#[test]
fn feedback_is_quoted_and_truncated() {
    let spec = objectives_spec();
    let feedback = Feedback {
        error: "parse error: no '{' in output".to_string(),
        raw_output: Some("x".repeat(MAX_FEEDBACK_CHARS + 100)),
    };

    let normal = render(&spec, Strictness::Normal, Some(&feedback));
    assert!(!normal.contains("previous answer"));

    let strengthened = render(&spec, Strictness::Strengthened, Some(&feedback));
    assert!(strengthened.contains("previous answer was rejected"));
    assert!(strengthened.contains(&"x".repeat(MAX_FEEDBACK_CHARS)));
    assert!(!strengthened.contains(&"x".repeat(MAX_FEEDBACK_CHARS + 1)));
}

#[test]
fn explanations_are_requested_when_enabled() {
    let request = GenerationRequest::objectives("Loops", "beginners", 2)
        .option(INCLUDE_EXPLANATIONS, true);
    let spec = PromptSpec::new(&request, &Taxonomy::bloom(), 3);
    assert!(render(&spec, Strictness::Normal, None).contains("\"explanation\""));
}

#[test]
fn quiz_prompt_mentions_difficulty_and_distractors() {
    let request = GenerationRequest::quiz("Explain for loops", "beginners", 4)
        .with_difficulty(Difficulty::Hard);
    let spec = PromptSpec::new(&request, &Taxonomy::bloom(), 3);
    let prompt = render(&spec, Strictness::Strengthened, None);
    assert!(prompt.contains("hard"));
    assert!(prompt.contains("3 plausible but wrong distractors"));
    assert!(prompt.contains("\"questions\""));
}
