//! The general-fixes library.
//!
//! Every fix takes the article text (plus the title where it needs one) and
//! returns the rewritten text together with a `changed` flag, see [`Fixed`].
//! Fixes are idempotent: running one on its own output changes nothing.
//!
//! Fixes that only depend on wiki syntax are free functions in the
//! submodules. Fixes that depend on per-wiki names (category and file
//! namespaces, stub templates, reference list templates) are methods of
//! [`Parsers`], which compiles the profile-dependent patterns once.

use std::borrow::Cow;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;

use crate::profile::{ConfigError, WikiProfile};

pub mod dates;
pub mod formatting;
pub mod links;
pub mod metadata;
pub mod references;

pub use dates::{fix_citation_templates, fix_date_ordinals_and_of, fix_dates_a};
pub use formatting::{
    collapse_br_runs, embolden_titles, fix_headings, fix_non_breaking_spaces, fix_temperatures,
    mdashes, remove_whitespace, unicodify,
};
pub use links::{
    bullet_external_links, fix_empty_links_and_templates, fix_link_whitespace, fix_links,
    fix_main_article, simplify_links, sticky_links, unbalanced_brackets, UnbalancedBracket,
};
pub use metadata::DefaultSortChange;
pub use references::{
    duplicate_named_references, duplicate_unnamed_references, fix_reference_tags,
    refs_after_punctuation, simplify_reference_tags,
};

/// Output of a fix: the new text and whether it differs from the input.
pub type Fixed = (String, bool);

pub(crate) fn fixed(original: &str, text: impl Into<String>) -> Fixed {
    let text = text.into();
    let changed = text != original;
    (text, changed)
}

pub(crate) fn fixed_cow(original: &str, text: Cow<'_, str>) -> Fixed {
    match text {
        Cow::Borrowed(_) => (original.to_string(), false),
        Cow::Owned(text) => fixed(original, text),
    }
}

/// Upper bound on the passes of [`until_stable`].
const MAX_PASSES: usize = 32;

/// Reapplies `step` until its output stops changing. One pass of a fix can
/// leave matches behind when matches overlap or when a rewrite uncovers a
/// new match.
pub(crate) fn until_stable(text: &str, step: impl Fn(&str) -> String) -> String {
    let mut current = step(text);
    for _ in 1..MAX_PASSES {
        let next = step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Runs a list of `(pattern, replacement)` pairs in order, repeating the
/// table until a pass changes nothing.
pub(crate) fn replace_table(text: &str, table: &[(Regex, &str)]) -> String {
    until_stable(text, |text| replace_table_once(text, table))
}

fn replace_table_once(text: &str, table: &[(Regex, &str)]) -> String {
    let mut result = text.to_string();
    for (regex, replacement) in table {
        let replaced = match regex.replace_all(&result, *replacement) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            result = replaced;
        }
    }
    result
}

pub(crate) const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

/// The profile-dependent half of the fixes.
#[derive(Debug, Clone)]
pub struct Parsers {
    profile: WikiProfile,
    stub: Regex,
    /// `[[Category:Name|key]]`, never matches `[[:Category:…]]`
    category: Regex,
    file_prefix: Regex,
    template_prefix: Regex,
    /// Any template or tag that displays the reference list.
    reference_display: Regex,
    /// `<ref>`, `<ref name=…>` but not `<references/>`
    ref_tags: AhoCorasick,
    persondata: Regex,
}

impl Parsers {
    pub fn new(profile: WikiProfile) -> Result<Self, ConfigError> {
        let stub = profile.compile_stub_regex()?;
        let category_ns = regex::escape(&profile.category_namespace);
        let category = Regex::new(&format!(
            r"(?i)\[\[[ \t]*(?:{category_ns})[ \t]*:[ \t]*([^\[\]|\n]*?)[ \t]*(\|[^\[\]\n]*)?\]\]"
        ))?;
        let files = profile.file_namespace_alternation();
        let file_prefix = Regex::new(&format!(r"(?i)\[\[[ \t]*({files})[ \t]*:[ \t]*"))?;
        let template_ns = regex::escape(&profile.template_namespace);
        let template_prefix = Regex::new(&format!(r"(?i)\{{\{{[ \t]*(?:{template_ns})[ \t]*:[ \t]*"))?;

        let reflists = profile
            .reflist_templates
            .iter()
            .map(|name| regex::escape(name).replace(' ', "[ _]"))
            .collect::<Vec<_>>()
            .join("|");
        let reference_display = Regex::new(&format!(
            r"(?i)<references\b|\{{\{{\s*(?:{template_ns}\s*:\s*)?(?:{reflists})\s*[|}}]"
        ))?;

        let ref_tags = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(["<ref>", "<ref ", "<ref\n", "<ref\t"])?;

        let persondata = Regex::new(&format!(
            r"(?i)\[\[\s*{category_ns}\s*:\s*(?:\d{{1,4}}s?\s+(?:BC\s+)?(?:births|deaths)|Living people)\s*[|\]]|\{{\{{\s*(?:Persondata|Infobox[ _](?:person|officeholder|football biography|musical artist|writer|scientist|sportsperson))\b"
        ))?;

        Ok(Self {
            profile,
            stub,
            category,
            file_prefix,
            template_prefix,
            reference_display,
            ref_tags,
            persondata,
        })
    }

    pub fn profile(&self) -> &WikiProfile {
        &self.profile
    }

    /// Table-driven syntax corrections: external links in double brackets,
    /// double pipes, HTML bold/italics, malformed `<br>`, `ISBN-10:` and
    /// redundant `Template:` prefixes.
    pub fn fix_syntax(&self, text: &str) -> Fixed {
        let result = until_stable(text, |text| {
            let result = formatting::fix_syntax_table(text);
            self.template_prefix.replace_all(&result, "{{").into_owned()
        });
        fixed(text, result)
    }
}
