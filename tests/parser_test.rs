use instruct_engine::parser::parse;
use serde_json::json;

#[test]
fn parses_plain_json() {
    let value = parse(r#"{"topic": "Loops", "objectives": []}"#).unwrap();
    assert_eq!(value["topic"], "Loops");
}

#[test]
fn tolerates_fences_and_chatter() {
    let raw = "Here is the JSON:\n```json\n{\"a\": 1, \"b\": [1, 2]}\n```\nHope that helps!";
    let value = parse(raw).unwrap();
    assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
}

#[test]
fn strips_fence_wrapping_whole_text() {
    let raw = "```json\n{\"ok\": true}\n```";
    assert_eq!(parse(raw).unwrap(), json!({"ok": true}));

    let bare = "```\n{\"ok\": true}\n```";
    assert_eq!(parse(bare).unwrap(), json!({"ok": true}));
}

#[test]
fn ignores_reasoning_block() {
    let raw = "<think>maybe {\"wrong\": 1}</think>\n{\"right\": 2}";
    assert_eq!(parse(raw).unwrap(), json!({"right": 2}));
}

#[test]
fn surrounding_whitespace_is_trimmed() {
    assert_eq!(parse("\n\n   {\"x\": 0}   \n").unwrap(), json!({"x": 0}));
}

#[test]
fn error_keeps_raw_text() {
    let raw = "Sorry, I cannot do that.";
    let err = parse(raw).unwrap_err();
    assert_eq!(err.raw, raw);
    assert!(err.reason.contains('{'));
}

#[test]
fn invalid_json_between_braces_is_an_error() {
    let raw = "{\"a\": 1,, }";
    let err = parse(raw).unwrap_err();
    assert_eq!(err.raw, raw);
    assert!(err.reason.starts_with("invalid JSON"));
}

#[test]
fn closing_brace_before_opening_is_an_error() {
    assert!(parse("} nothing here {").is_err());
}

#[test]
fn empty_input_is_an_error() {
    let err = parse("").unwrap_err();
    assert_eq!(err.raw, "");
}
