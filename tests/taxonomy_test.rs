use instruct_engine::taxonomy::{BloomLevel, Taxonomy, normalize_term};

#[test]
fn builtin_table_has_thirty_terms_per_level() {
    let taxonomy = Taxonomy::bloom();
    assert_eq!(taxonomy.version(), "bloom-2001");
    for level in BloomLevel::ALL {
        assert_eq!(taxonomy.terms(level).len(), 30, "{level}");
    }
}

#[test]
fn levels_are_ordered() {
    assert!(BloomLevel::Remember < BloomLevel::Understand);
    assert!(BloomLevel::Evaluate < BloomLevel::Create);
    assert_eq!(BloomLevel::ALL.first(), Some(&BloomLevel::Remember));
}

#[test]
fn lookup_is_case_insensitive_and_whole_phrase() {
    let taxonomy = Taxonomy::bloom();
    assert!(taxonomy.contains(BloomLevel::Remember, "DEFINE"));
    assert!(taxonomy.contains(BloomLevel::Analyze, "  Break   Down "));
    assert!(!taxonomy.contains(BloomLevel::Analyze, "break"));
    assert!(!taxonomy.contains(BloomLevel::Remember, "design"));
}

#[test]
fn levels_for_finds_shared_terms() {
    let taxonomy = Taxonomy::bloom();
    let levels = taxonomy.levels_for("evaluate");
    assert_eq!(levels, vec![BloomLevel::Analyze, BloomLevel::Evaluate]);
    assert!(taxonomy.levels_for("frobnicate").is_empty());
}

#[test]
fn replacement_is_deterministic_and_approved() {
    let taxonomy = Taxonomy::bloom();
    for level in BloomLevel::ALL {
        let first = taxonomy.replacement_for(level, "frobnicate").unwrap();
        let again = taxonomy.replacement_for(level, "FROBNICATE").unwrap();
        assert_eq!(first, again);
        assert!(taxonomy.contains(level, first));
    }
}

#[test]
fn level_parsing() {
    assert_eq!("analyze".parse::<BloomLevel>().unwrap(), BloomLevel::Analyze);
    assert_eq!(" Create ".parse::<BloomLevel>().unwrap(), BloomLevel::Create);
    assert!("synthesis".parse::<BloomLevel>().is_err());
}

#[test]
fn normalize_collapses_whitespace() {
    assert_eq!(normalize_term("  Give\tExamples "), "give examples");
}

fn toml_with(remember: &str) -> String {
    format!(
        r#"
version = "custom-1"

[levels]
Remember = {remember}
Understand = ["explain"]
Apply = ["apply"]
Analyze = ["analyze"]
Evaluate = ["judge"]
Create = ["design"]
"#
    )
}

#[test]
fn loads_toml_override() {
    let taxonomy = Taxonomy::from_toml_str(&toml_with(r#"["define", "List"]"#)).unwrap();
    assert_eq!(taxonomy.version(), "custom-1");
    assert!(taxonomy.contains(BloomLevel::Remember, "list"));
    assert_eq!(taxonomy.terms(BloomLevel::Evaluate), ["judge".to_string()]);
}

#[test]
fn rejects_duplicate_terms() {
    let err = Taxonomy::from_toml_str(&toml_with(r#"["define", "DEFINE"]"#)).unwrap_err();
    assert!(err.to_string().contains("more than once"));
}

#[test]
fn rejects_empty_level() {
    assert!(Taxonomy::from_toml_str(&toml_with("[]")).is_err());
}

#[test]
fn rejects_missing_level() {
    let content = r#"
version = "partial"

[levels]
Remember = ["define"]
"#;
    let err = Taxonomy::from_toml_str(content).unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[test]
fn rejects_unknown_level() {
    let content = toml_with(r#"["define"]"#) + "Synthesis = [\"blend\"]\n";
    assert!(Taxonomy::from_toml_str(&content).is_err());
}

#[test]
fn load_reports_missing_file() {
    let err = Taxonomy::load(std::path::Path::new("/nonexistent/taxonomy.toml")).unwrap_err();
    assert!(err.to_string().contains("cannot read"));
}
