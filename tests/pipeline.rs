use std::path::PathBuf;

use wikifunctions::article::CategoryOperation;
use wikifunctions::diff::{self, Hunk};
use wikifunctions::dump_parser::DumpParser;
use wikifunctions::find_and_replace::{FindAndReplace, Replacement};
use wikifunctions::pipeline::Pipeline;
use wikifunctions::profile::{GeneralFixOptions, SkipOptions, WikiProfile};
use wikifunctions::wiki_diff::WikiDiff;

fn pipeline(rules: Vec<Replacement>) -> Pipeline {
    Pipeline::new(
        WikiProfile::default(),
        GeneralFixOptions::default(),
        SkipOptions::default(),
        rules,
    )
    .unwrap()
}

fn scratch_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("wikifunctions-{}-{name}", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_link_whitespace() {
    let processed = pipeline(Vec::new()).process("Foo", "[[a ]]b").unwrap();
    assert_eq!(processed.text, "[[a]] b");
    assert!(processed.changed);
    assert!(processed.general_fixes_caused_change);
    assert_eq!(processed.summary, "general fixes");
}

#[test]
fn test_br_runs() {
    let pipeline = pipeline(Vec::new());
    assert_eq!(pipeline.process("Foo", "a<br><br>b").unwrap().text, "a\r\nb");
    assert_eq!(pipeline.process("Foo", "<br><br>").unwrap().text, "");
}

#[test]
fn test_line_hunks() {
    assert_eq!(
        diff::diff(&["a", "b", "c"], &["a", "x", "c"]),
        vec![
            Hunk {
                left: 0..1,
                right: 0..1,
                same: true
            },
            Hunk {
                left: 1..2,
                right: 1..2,
                same: false
            },
            Hunk {
                left: 2..3,
                right: 2..3,
                same: true
            },
        ]
    );
}

#[test]
fn test_case_insensitive_rule() {
    let pipeline = pipeline(vec![Replacement::literal("cat", "dog")]).with_general_fixes(false);
    let processed = pipeline.process("Foo", "Cat and cat").unwrap();
    assert_eq!(processed.text, "dog and dog");
    assert_eq!(processed.summary, "replaced: Cat → dog (2)");
    assert!(processed.major_change);
}

#[test]
fn test_undo_addition() {
    let wiki_diff = WikiDiff::new("x\nz", "x\ny\nz", 2);
    assert!(wiki_diff.has_changes());
    assert_eq!(wiki_diff.right_lines(), ["x", "y", "z"]);
    assert_eq!(wiki_diff.undo_addition(1).unwrap(), "x\r\nz");
}

#[test]
fn test_rule_order() {
    let forward = pipeline(vec![
        Replacement::literal("a", "b"),
        Replacement::literal("b", "c"),
    ])
    .with_general_fixes(false);
    assert_eq!(forward.process("Foo", "a").unwrap().text, "c");

    let backward = pipeline(vec![
        Replacement::literal("b", "c"),
        Replacement::literal("a", "b"),
    ])
    .with_general_fixes(false);
    assert_eq!(backward.process("Foo", "a").unwrap().text, "b");
}

#[test]
fn test_protected_regions_are_untouched() {
    let text = "<nowiki>[[a ]]b</nowiki> <!-- teh --> teh";
    let mut pipeline = pipeline(vec![Replacement::literal("teh", "the")]);
    pipeline.find_and_replace_mut().ignore_links = true;
    let processed = pipeline.process("Foo", text).unwrap();
    assert_eq!(processed.text, "<nowiki>[[a ]]b</nowiki> <!-- teh --> the");
}

#[test]
fn test_profile_and_rules_from_files() {
    let profile = scratch_file(
        "profile.toml",
        "lang_code = \"de\"\ncategory_namespace = \"Kategorie\"\n",
    );
    let rules = scratch_file(
        "rules.json",
        r#"[{"find": "Katze", "replace": "Hund", "case_sensitive": true}]"#,
    );

    let profile_loaded = WikiProfile::load_from_path(&profile).unwrap();
    let rules_loaded = FindAndReplace::load_rules(&rules).unwrap();
    std::fs::remove_file(&profile).unwrap();
    std::fs::remove_file(&rules).unwrap();

    assert_eq!(profile_loaded.lang_code, "de");
    assert_eq!(rules_loaded.len(), 1);
    assert!(rules_loaded[0].case_sensitive);

    let pipeline = Pipeline::new(
        profile_loaded,
        GeneralFixOptions::default(),
        SkipOptions::default(),
        rules_loaded,
    )
    .unwrap()
    .with_general_fixes(false)
    .with_category_operation(CategoryOperation::Add("Tiere".to_string()));
    let processed = pipeline.process("Katze", "Eine Katze, keine katze.").unwrap();
    assert_eq!(
        processed.text,
        "Eine Hund, keine katze.\n\n[[Kategorie:Tiere]]"
    );
    assert_eq!(
        processed.summary,
        "replaced: Katze → Hund, added [[Kategorie:Tiere]]"
    );
}

#[test]
fn test_missing_config_files() {
    assert!(WikiProfile::load_from_path("/nonexistent/profile.toml").is_err());
    assert!(FindAndReplace::load_rules("/nonexistent/rules.json").is_err());
}

#[test]
fn test_scan_dump() {
    const DUMP: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" version="0.11">
  <siteinfo>
    <dbname>enwiki</dbname>
    <namespaces>
      <namespace key="0" case="first-letter" />
    </namespaces>
  </siteinfo>
  <page>
    <title>Broken_link</title>
    <ns>0</ns>
    <id>1</id>
    <revision>
      <id>10</id>
      <timestamp>2024-01-01T00:00:00Z</timestamp>
      <text>[[a ]]b</text>
    </revision>
  </page>
  <page>
    <title>Clean</title>
    <ns>0</ns>
    <id>2</id>
    <revision>
      <id>20</id>
      <timestamp>2024-01-01T00:00:00Z</timestamp>
      <text>Nothing to fix.</text>
    </revision>
  </page>
</mediawiki>"#;

    let pipeline = Pipeline::new(
        WikiProfile::default(),
        GeneralFixOptions::default(),
        SkipOptions {
            skip_no_change: true,
            ..SkipOptions::default()
        },
        Vec::new(),
    )
    .unwrap();

    let mut changed = Vec::new();
    for page in DumpParser::new(DUMP.as_bytes()).unwrap() {
        let page = page.unwrap();
        let processed = pipeline.process(&page.title, page.text().unwrap()).unwrap();
        if !processed.skipped() {
            changed.push((processed.title, processed.text));
        }
    }
    assert_eq!(
        changed,
        vec![("Broken link".to_string(), "[[a]] b".to_string())]
    );
}
