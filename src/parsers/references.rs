use std::sync::LazyLock;

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;

use super::{fixed, replace_table, until_stable, Fixed, Parsers};

static REF_TAG_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)<\s*ref\s*>", "<ref>"),
        (r"(?i)<\s*/\s*ref\s*>", "</ref>"),
        (r"(?i)<\s*ref\s+name\s*=\s*", "<ref name="),
        (r#"<ref name="\s*([^"<>]*?)\s*""#, r#"<ref name="${1}""#),
        // whitespace in front of a reference
        (r"(\S)[ \t]+(<ref[ >])", "${1}${2}"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

static UNQUOTED_REF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<ref name=([^"'>/\s][^"'>/]*?)\s*(/?)>"#).unwrap());

/// Normalises the spelling of `<ref>` tags, quotes reference names that
/// contain spaces and removes whitespace before references.
pub fn fix_reference_tags(text: &str) -> Fixed {
    let result = until_stable(text, |text| {
        let result = replace_table(text, &REF_TAG_TABLE);
        UNQUOTED_REF_NAME
            .replace_all(&result, |caps: &Captures| {
                let name = &caps[1];
                if !name.contains(char::is_whitespace) {
                    return caps[0].to_string();
                }
                let close = if caps[2].is_empty() { ">" } else { " />" };
                format!("<ref name=\"{name}\"{close}")
            })
            .into_owned()
    });
    fixed(text, result)
}

// the name must not end in `/`, `<ref name=x/>` is already self-closing
static EMPTY_NAMED_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<ref(\s+name\s*=\s*[^<>]*[^<>/\s])\s*>\s*</ref\s*>").unwrap()
});
static EMPTY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ref\s*>\s*</ref\s*>").unwrap());

/// `<ref name="x"></ref>` → `<ref name="x" />`, empty unnamed references are dropped.
pub fn simplify_reference_tags(text: &str) -> Fixed {
    let result = until_stable(text, |text| {
        let result = EMPTY_NAMED_REF.replace_all(text, "<ref${1} />");
        EMPTY_REF.replace_all(&result, "").into_owned()
    });
    fixed(text, result)
}

static UNNAMED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?si)<ref>(.+?)</ref\s*>").unwrap());
static NAMED_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?si)<ref\s+name\s*=\s*"?([^"<>/]+?)"?\s*>(.+?)</ref\s*>"#).unwrap()
});
static REF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<ref\s+name\s*=\s*"?([^"<>/]+?)"?\s*/?>"#).unwrap());

/// Names for merged unnamed references, `ReferenceA` to `ReferenceZ`.
fn reference_names() -> impl Iterator<Item = String> {
    ('A'..='Z').map(|c| format!("Reference{c}"))
}

/// Gives identical unnamed references a name and turns all but the first
/// into a short reuse tag.
pub fn duplicate_unnamed_references(text: &str) -> Fixed {
    fixed(text, until_stable(text, name_duplicate_unnamed_references))
}

fn name_duplicate_unnamed_references(text: &str) -> String {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for caps in UNNAMED_REF.captures_iter(text) {
        if let Some(content) = caps.get(1) {
            *counts.entry(content.as_str().trim()).or_default() += 1;
        }
    }
    if counts.values().all(|&count| count < 2) {
        return text.to_string();
    }

    let used_names: Vec<&str> = REF_NAME
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let mut free_names = reference_names().filter(|name| !used_names.contains(&name.as_str()));

    let mut assigned: FxHashMap<String, Option<String>> = FxHashMap::default();
    let result = UNNAMED_REF.replace_all(text, |caps: &Captures| {
        let Some(content) = caps.get(1) else {
            return caps[0].to_string();
        };
        let key = content.as_str().trim();
        if counts.get(key).copied().unwrap_or_default() < 2 {
            return caps[0].to_string();
        }
        match assigned.get(key) {
            Some(Some(name)) => format!("<ref name=\"{name}\" />"),
            // ran out of names
            Some(None) => caps[0].to_string(),
            None => {
                let name = free_names.next();
                let replacement = match &name {
                    Some(name) => format!("<ref name=\"{name}\">{}</ref>", content.as_str()),
                    None => caps[0].to_string(),
                };
                assigned.insert(key.to_string(), name);
                replacement
            }
        }
    });
    result.into_owned()
}

/// Replaces repeated definitions of a named reference with identical
/// content by `<ref name="…" />`.
pub fn duplicate_named_references(text: &str) -> Fixed {
    fixed(text, until_stable(text, reuse_named_references))
}

fn reuse_named_references(text: &str) -> String {
    let mut first_content: FxHashMap<String, String> = FxHashMap::default();
    let result = NAMED_REF.replace_all(text, |caps: &Captures| {
        let name = caps[1].trim().to_string();
        let content = caps[2].trim();
        match first_content.get(&name) {
            Some(first) if first == content => format!("<ref name=\"{name}\" />"),
            Some(_) => caps[0].to_string(),
            None => {
                first_content.insert(name, content.to_string());
                caps[0].to_string()
            }
        }
    });
    result.into_owned()
}

static REFS_THEN_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)((?:<ref\b[^>/]*/>|<ref(?:\s[^>]*)?>.*?</ref\s*>)+)[ \t]*([.,;:])").unwrap()
});

/// Moves punctuation from after a group of references to before it.
pub fn refs_after_punctuation(text: &str) -> Fixed {
    fixed(text, until_stable(text, move_punctuation_before_refs))
}

fn move_punctuation_before_refs(text: &str) -> String {
    REFS_THEN_PUNCTUATION.replace_all(text, |caps: &Captures| {
        let start = caps.get(0).map_or(0, |m| m.start());
        let refs = &caps[1];
        let punctuation = &caps[2];
        if text[..start].ends_with(punctuation) {
            refs.to_string()
        } else {
            format!("{punctuation}{refs}")
        }
    })
    .into_owned()
}

static REFERENCES_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<references\s*>\s*</references\s*>|<references\s*/\s*>").unwrap()
});
static SMALL_REFERENCES_DIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<div[^>]*class\s*=\s*"?references-small"?[^>]*>\s*<references\s*/>\s*</div>"#)
        .unwrap()
});
static REFERENCES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^==+[ \t]*(?:References|Notes|Footnotes|Notes and references)[ \t]*==+[ \t]*\r?$")
        .unwrap()
});
static EXTERNAL_LINKS_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^==+[ \t]*External[ \t]+links?[ \t]*==+").unwrap());

impl Parsers {
    /// Normalises `<references>` tags. With `replace_tags` a lone
    /// `<references />` is swapped for the reference list template.
    pub fn fix_reference_list_tags(&self, text: &str, replace_tags: bool) -> Fixed {
        let reflist = format!("{{{{{}}}}}", self.profile.default_reflist());
        let result = SMALL_REFERENCES_DIV.replace_all(text, reflist.as_str());
        let mut result = REFERENCES_TAG
            .replace_all(&result, "<references />")
            .into_owned();
        if replace_tags && result.matches("<references />").count() == 1 {
            result = result.replacen("<references />", &reflist, 1);
        }
        fixed(text, result)
    }

    /// True when the text uses `<ref>` but nothing displays the reference list.
    pub fn is_missing_references_display(&self, text: &str) -> bool {
        self.ref_tags.is_match(text) && !self.reference_display.is_match(text)
    }

    /// Inserts the reference list template when references are used but
    /// never displayed: under an existing references heading, otherwise in a
    /// new section before "External links" or the trailing metadata.
    pub fn add_missing_reflist(&self, text: &str) -> Fixed {
        if !self.is_missing_references_display(text) {
            return (text.to_string(), false);
        }
        let reflist = format!("{{{{{}}}}}", self.profile.default_reflist());

        if let Some(heading) = REFERENCES_HEADING.find(text) {
            let mut result = text.to_string();
            result.insert_str(heading.end(), &format!("\n{reflist}"));
            return fixed(text, result);
        }

        let section = format!("==References==\n{reflist}");
        let insert_at = EXTERNAL_LINKS_HEADING
            .find(text)
            .map(|m| m.start())
            .or_else(|| self.first_metadata_line(text));
        let result = match insert_at {
            Some(position) => {
                let (body, rest) = text.split_at(position);
                format!("{}\n\n{section}\n\n{rest}", body.trim_end())
            }
            None => format!("{}\n\n{section}", text.trim_end()),
        };
        fixed(text, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::tests::{assert_settles, parsers};
    use proptest::prelude::*;

    #[test]
    fn test_fix_reference_tags() {
        let (text, changed) =
            fix_reference_tags("Foo <REF>a</ ref> bar <ref  name = my ref/> x<ref name=\" b \">c</ref>");
        assert!(changed);
        assert_eq!(
            text,
            "Foo<ref>a</ref> bar<ref name=\"my ref\" /> x<ref name=\"b\">c</ref>"
        );
        assert!(!fix_reference_tags(&text).1);

        assert_eq!(
            fix_reference_tags("[[ <ref> <ref>"),
            ("[[<ref><ref>".to_string(), true)
        );
    }

    #[test]
    fn test_simplify_reference_tags() {
        assert_eq!(
            simplify_reference_tags(r#"a<ref name="x" ></ref>b<ref> </ref>"#),
            (r#"a<ref name="x" />b"#.to_string(), true)
        );
        // already self-closing, the stray end tags are left alone
        let stray = "<ref name=x/></ref></ref>";
        assert_eq!(simplify_reference_tags(stray), (stray.to_string(), false));
        assert_eq!(
            simplify_reference_tags(r#"<ref name="y"><ref></ref></ref>"#),
            (r#"<ref name="y" />"#.to_string(), true)
        );
    }

    #[test]
    fn test_duplicate_unnamed_references() {
        let text = "a<ref>Smith 2001</ref> b<ref>Jones</ref> c<ref> Smith 2001 </ref> d<ref name=ReferenceA/>";
        let (result, changed) = duplicate_unnamed_references(text);
        assert!(changed);
        assert_eq!(
            result,
            "a<ref name=\"ReferenceB\">Smith 2001</ref> b<ref>Jones</ref> c<ref name=\"ReferenceB\" /> d<ref name=ReferenceA/>"
        );
        assert!(!duplicate_unnamed_references(&result).1);
    }

    #[test]
    fn test_duplicate_named_references() {
        let text = r#"a<ref name="s">Smith</ref> b<ref name=s>Smith</ref> c<ref name="s">Other</ref>"#;
        let (result, changed) = duplicate_named_references(text);
        assert!(changed);
        assert_eq!(
            result,
            r#"a<ref name="s">Smith</ref> b<ref name="s" /> c<ref name="s">Other</ref>"#
        );
    }

    #[test]
    fn test_refs_after_punctuation() {
        assert_eq!(
            refs_after_punctuation("word<ref>a</ref><ref name=b/> . Next"),
            ("word.<ref>a</ref><ref name=b/> Next".to_string(), true)
        );
        assert_eq!(
            refs_after_punctuation("word.<ref>a</ref>. Next"),
            ("word.<ref>a</ref> Next".to_string(), true)
        );
        assert!(!refs_after_punctuation("word.<ref>a</ref> Next").1);
        assert_eq!(
            refs_after_punctuation("<ref name=x/>.."),
            (".<ref name=x/>".to_string(), true)
        );
    }

    #[test]
    fn test_fix_reference_list_tags() {
        let parsers = parsers();
        assert_eq!(
            parsers.fix_reference_list_tags("<references></references>", false),
            ("<references />".to_string(), true)
        );
        assert_eq!(
            parsers.fix_reference_list_tags("<references/>", true),
            ("{{Reflist}}".to_string(), true)
        );
        assert_eq!(
            parsers.fix_reference_list_tags(
                "<div class=\"references-small\">\n<references/>\n</div>",
                false
            ),
            ("{{Reflist}}".to_string(), true)
        );
    }

    #[test]
    fn test_missing_references_display() {
        let parsers = parsers();
        assert!(parsers.is_missing_references_display("a<ref>x</ref>"));
        assert!(parsers.is_missing_references_display("a<REF NAME=x/>"));
        assert!(!parsers.is_missing_references_display("a<ref>x</ref>\n{{reflist}}"));
        assert!(!parsers.is_missing_references_display("a<ref>x</ref>\n{{ Reference list |2}}"));
        assert!(!parsers.is_missing_references_display("a<ref>x</ref>\n<references/>"));
        assert!(!parsers.is_missing_references_display("no references"));
    }

    #[test]
    fn test_add_missing_reflist() {
        let parsers = parsers();
        let (text, changed) =
            parsers.add_missing_reflist("Text.<ref>x</ref>\n\n==External links==\n* [http://a.org]");
        assert!(changed);
        assert_eq!(
            text,
            "Text.<ref>x</ref>\n\n==References==\n{{Reflist}}\n\n==External links==\n* [http://a.org]"
        );
        assert!(!parsers.add_missing_reflist(&text).1);

        let (text, _) = parsers.add_missing_reflist("Text.<ref>x</ref>\n==Notes==\n");
        assert_eq!(text, "Text.<ref>x</ref>\n==Notes==\n{{Reflist}}\n");

        let (text, _) =
            parsers.add_missing_reflist("Text.<ref>x</ref>\n\n[[Category:Foo]]");
        assert_eq!(text, "Text.<ref>x</ref>\n\n==References==\n{{Reflist}}\n\n[[Category:Foo]]");
    }

    proptest! {
        #[test]
        fn reference_fixes_are_idempotent(
            input in "(<ref>|</ref>|<REF >|</ ref>|<ref name=x/>|<ref name=\"y\">|<ref name=a b>|<references/>|==References==|\\[\\[| |\n|\\.|,|a){0,24}"
        ) {
            let parsers = parsers();
            let fixes: [(&str, &dyn Fn(&str) -> Fixed); 8] = [
                ("fix_reference_tags", &fix_reference_tags),
                ("simplify_reference_tags", &simplify_reference_tags),
                ("duplicate_unnamed_references", &duplicate_unnamed_references),
                ("duplicate_named_references", &duplicate_named_references),
                ("refs_after_punctuation", &refs_after_punctuation),
                ("fix_reference_list_tags", &|text: &str| parsers.fix_reference_list_tags(text, false)),
                ("replace_reference_tags", &|text: &str| parsers.fix_reference_list_tags(text, true)),
                ("add_missing_reflist", &|text: &str| parsers.add_missing_reflist(text)),
            ];
            for (name, fix) in fixes {
                assert_settles(name, fix, &input)?;
            }
        }
    }
}
