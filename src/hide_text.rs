//! Masking of protected wikitext regions.
//!
//! Before a risky rewrite runs, every region that must not be touched
//! (comments, `<nowiki>`, `<math>`, … and optionally references, images and
//! external links) is swapped for a numbered placeholder such as `⌊⌊⌊⌊3⌋⌋⌋⌋`.
//! [`HideText::add_back`] puts the originals back afterwards.
//!
//! Later patterns run over already-masked text, so a hidden span may itself
//! contain placeholders of earlier spans. Restoration expands them
//! recursively. Every stored span must be found exactly once, otherwise the
//! restoration fails with a [`HideError`] instead of silently losing text.

use std::sync::LazyLock;

use regex::Regex;

use crate::profile::WikiProfile;

const MARKER_OPEN: &str = "⌊⌊⌊⌊";
const MARKER_CLOSE: &str = "⌋⌋⌋⌋";

/// Tags whose content is never rewritten.
const UNFORMATTED_TAGS: &[&str] = &[
    "nowiki",
    "pre",
    "math",
    "source",
    "syntaxhighlight",
    "code",
    "timeline",
    "score",
    "chem",
    "ce",
    "graph",
    "templatedata",
];

static UNFORMATTED: LazyLock<Regex> = LazyLock::new(|| {
    let tags = UNFORMATTED_TAGS
        .iter()
        .map(|tag| format!(r"<{tag}\b[^>]*?/>|<{tag}\b[^>]*>.*?</{tag}\s*>"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?si)<!--.*?-->|{tags}")).unwrap()
});

static REFS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?si)<ref\b[^>/]*/>|<ref\b[^>]*>.*?</ref\s*>").unwrap());

static EXTERNAL_LINKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\[(?:https?|ftp)://[^\]\n]*\]|(?:https?|ftp)://[^\s<>\[\]{}|"]+"#).unwrap()
});

static INNERMOST_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());

static HEADINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^=+[^=\n].*?=+[ \t]*$").unwrap());

static WIKILINKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\[\]]*\]\]").unwrap());

// `[[Target|` of a piped link, or the whole link when it is unpiped
static WIKILINK_TARGETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\[\]|]*\||\[\[[^\[\]|]*\]\]").unwrap());

static PLAIN_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⌊⌊⌊⌊([0-9]+)⌋⌋⌋⌋").unwrap());

static MORE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"⌊⌊⌊⌊M([0-9]+)⌋⌋⌋⌋").unwrap());

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HideError {
    #[error("text is already masked, add the hidden spans back first")]
    AlreadyHidden,
    #[error("text already contains masking placeholders")]
    MarkerInText,
    #[error("placeholder {index} does not refer to a hidden span")]
    UnknownPlaceholder { index: usize },
    #[error("placeholder {index} occurs more than once")]
    DuplicatePlaceholder { index: usize },
    #[error("expected {expected} placeholders in the text, found {found}")]
    PlaceholderMismatch { expected: usize, found: usize },
    #[error("invalid masking pattern")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct HideOptions {
    pub hide_external_links: bool,
    pub hide_images: bool,
    pub hide_refs: bool,
}

impl Default for HideOptions {
    fn default() -> Self {
        Self {
            hide_external_links: false,
            hide_images: true,
            hide_refs: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    Plain,
    More,
}

#[derive(Debug, Clone)]
struct SpanStore {
    kind: StoreKind,
    spans: Vec<String>,
}

impl SpanStore {
    fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            spans: Vec::new(),
        }
    }

    fn placeholder_regex(&self) -> &'static Regex {
        match self.kind {
            StoreKind::Plain => &PLAIN_PLACEHOLDER,
            StoreKind::More => &MORE_PLACEHOLDER,
        }
    }

    fn push(&mut self, original: &str) -> String {
        let index = self.spans.len();
        self.spans.push(original.to_string());
        match self.kind {
            StoreKind::Plain => format!("{MARKER_OPEN}{index}{MARKER_CLOSE}"),
            StoreKind::More => format!("{MARKER_OPEN}M{index}{MARKER_CLOSE}"),
        }
    }

    fn begin(&self, text: &str) -> Result<(), HideError> {
        if !self.spans.is_empty() {
            return Err(HideError::AlreadyHidden);
        }
        if self.placeholder_regex().is_match(text) {
            return Err(HideError::MarkerInText);
        }
        Ok(())
    }

    /// Replaces every match of `regex` with a fresh placeholder, left to right.
    fn replace_matches(&mut self, regex: &Regex, text: String) -> String {
        let mut result = String::new();
        let mut last_end = 0;
        let mut replaced = false;
        for m in regex.find_iter(&text) {
            if m.is_empty() {
                continue;
            }
            if !replaced {
                result.reserve(text.len());
                replaced = true;
            }
            result.push_str(&text[last_end..m.start()]);
            let placeholder = self.push(m.as_str());
            result.push_str(&placeholder);
            last_end = m.end();
        }

        if !replaced {
            return text;
        }
        result.push_str(&text[last_end..]);
        result
    }

    fn restore(&mut self, text: &str) -> Result<String, HideError> {
        let spans = std::mem::take(&mut self.spans);
        let mut used = vec![false; spans.len()];
        let restored = expand(text, &spans, &mut used, self.placeholder_regex())?;

        let found = used.iter().filter(|used| **used).count();
        if found != spans.len() {
            tracing::error!(
                message = "hidden spans missing from text",
                expected = spans.len(),
                found
            );
            return Err(HideError::PlaceholderMismatch {
                expected: spans.len(),
                found,
            });
        }
        Ok(restored)
    }
}

fn expand(
    text: &str,
    spans: &[String],
    used: &mut [bool],
    placeholder: &Regex,
) -> Result<String, HideError> {
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in placeholder.captures_iter(text) {
        let (whole, index) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(index)) => (whole, index),
            _ => continue,
        };
        let index = index
            .as_str()
            .parse::<usize>()
            .map_err(|_| HideError::UnknownPlaceholder { index: usize::MAX })?;
        let span = spans
            .get(index)
            .ok_or(HideError::UnknownPlaceholder { index })?;
        if std::mem::replace(&mut used[index], true) {
            return Err(HideError::DuplicatePlaceholder { index });
        }

        result.push_str(&text[last_end..whole.start()]);
        // spans only ever contain placeholders of earlier spans
        result.push_str(&expand(span, spans, used, placeholder)?);
        last_end = whole.end();
    }
    result.push_str(&text[last_end..]);
    Ok(result)
}

/// Hides protected regions of wikitext behind placeholders and restores them.
///
/// Two independent stores exist: [`HideText::hide`]/[`HideText::add_back`] for the
/// general fixes, and [`HideText::hide_more`]/[`HideText::add_back_more`] which
/// additionally hides templates, headings and links for find-and-replace.
/// Each pair must be strictly nested, a second `hide` before `add_back` is an error.
#[derive(Debug, Clone)]
pub struct HideText {
    options: HideOptions,
    images: Regex,
    plain: SpanStore,
    more: SpanStore,
}

impl HideText {
    pub fn new(profile: &WikiProfile, options: HideOptions) -> Result<Self, HideError> {
        let files = profile.file_namespace_alternation();
        let images = Regex::new(&format!(
            r"(?i)\[\[\s*(?:{files})\s*:[^\[\]]*(?:\[\[[^\[\]]*\]\][^\[\]]*)*\]\]"
        ))?;

        Ok(Self {
            options,
            images,
            plain: SpanStore::new(StoreKind::Plain),
            more: SpanStore::new(StoreKind::More),
        })
    }

    pub fn options(&self) -> HideOptions {
        self.options
    }

    pub fn is_hiding(&self) -> bool {
        !self.plain.spans.is_empty()
    }

    /// Forgets every hidden span, e.g. after a failed pass was abandoned.
    pub fn reset(&mut self) {
        self.plain.spans.clear();
        self.more.spans.clear();
    }

    pub fn hide(&mut self, text: &str) -> Result<String, HideError> {
        self.plain.begin(text)?;

        let mut text = self.plain.replace_matches(&UNFORMATTED, text.to_string());
        if self.options.hide_refs {
            text = self.plain.replace_matches(&REFS, text);
        }
        if self.options.hide_images {
            text = self.plain.replace_matches(&self.images, text);
        }
        if self.options.hide_external_links {
            text = self.plain.replace_matches(&EXTERNAL_LINKS, text);
        }
        Ok(text)
    }

    pub fn add_back(&mut self, text: &str) -> Result<String, HideError> {
        self.plain.restore(text)
    }

    /// Broader masking used by find-and-replace in "ignore links/templates" mode.
    ///
    /// With `hide_only_link_targets` the text of a piped link stays visible.
    pub fn hide_more(
        &mut self,
        text: &str,
        hide_only_link_targets: bool,
    ) -> Result<String, HideError> {
        self.more.begin(text)?;

        let mut text = self.more.replace_matches(&UNFORMATTED, text.to_string());
        text = self.more.replace_matches(&REFS, text);
        loop {
            let before = self.more.spans.len();
            text = self.more.replace_matches(&INNERMOST_TEMPLATE, text);
            if self.more.spans.len() == before {
                break;
            }
        }
        text = self.more.replace_matches(&self.images, text);
        text = self.more.replace_matches(&EXTERNAL_LINKS, text);
        text = self.more.replace_matches(&HEADINGS, text);
        let links: &Regex = if hide_only_link_targets {
            &WIKILINK_TARGETS
        } else {
            &WIKILINKS
        };
        text = self.more.replace_matches(links, text);
        Ok(text)
    }

    pub fn add_back_more(&mut self, text: &str) -> Result<String, HideError> {
        self.more.restore(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hider() -> HideText {
        HideText::new(&WikiProfile::default(), HideOptions::default()).unwrap()
    }

    #[test]
    fn test_hide_comments_and_nowiki() {
        let mut hider = hider();
        let text = "a <!-- x --> b <nowiki>[[y]]</nowiki> c <math>z</math>";
        let hidden = hider.hide(text).unwrap();
        assert_eq!(hidden, "a ⌊⌊⌊⌊0⌋⌋⌋⌋ b ⌊⌊⌊⌊1⌋⌋⌋⌋ c ⌊⌊⌊⌊2⌋⌋⌋⌋");
        assert_eq!(hider.add_back(&hidden).unwrap(), text);
        assert!(!hider.is_hiding());
    }

    #[test]
    fn test_hide_images_keeps_nested_links() {
        let mut hider = hider();
        let text = "x [[File:A.jpg|thumb|a [[link]] here]] y";
        let hidden = hider.hide(text).unwrap();
        assert_eq!(hidden, "x ⌊⌊⌊⌊0⌋⌋⌋⌋ y");
        assert_eq!(hider.add_back(&hidden).unwrap(), text);
    }

    #[test]
    fn test_nested_spans_restore() {
        let mut hider = hider();
        let text = "{{a|{{b|<!--c-->}}}} [[d|e]] == h ==";
        let hidden = hider.hide_more(text, false).unwrap();
        assert!(!hidden.contains("{{"));
        assert!(!hidden.contains("[["));
        assert_eq!(hider.add_back_more(&hidden).unwrap(), text);
    }

    #[test]
    fn test_hide_only_link_targets() {
        let mut hider = hider();
        let hidden = hider.hide_more("[[Foo|bar]] and [[Baz]]", true).unwrap();
        assert_eq!(hidden, "⌊⌊⌊⌊M0⌋⌋⌋⌋bar]] and ⌊⌊⌊⌊M1⌋⌋⌋⌋");
    }

    #[test]
    fn test_dropped_placeholder_fails() {
        let mut hider = hider();
        let hidden = hider.hide("a <!-- x --> b <!-- y -->").unwrap();
        let broken = hidden.replace("⌊⌊⌊⌊1⌋⌋⌋⌋", "");
        assert_eq!(
            hider.add_back(&broken),
            Err(HideError::PlaceholderMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_duplicated_and_unknown_placeholders_fail() {
        let mut hider = hider();
        let hidden = hider.hide("<!-- x -->").unwrap();
        let doubled = format!("{hidden}{hidden}");
        assert_eq!(
            hider.add_back(&doubled),
            Err(HideError::DuplicatePlaceholder { index: 0 })
        );

        let hidden = hider.hide("<!-- x -->").unwrap();
        assert_eq!(
            hider.add_back(&format!("{hidden}⌊⌊⌊⌊7⌋⌋⌋⌋")),
            Err(HideError::UnknownPlaceholder { index: 7 })
        );
    }

    #[test]
    fn test_unbalanced_hide_fails() {
        let mut hider = hider();
        hider.hide("<!-- x -->").unwrap();
        assert_eq!(hider.hide("text"), Err(HideError::AlreadyHidden));
    }

    #[test]
    fn test_marker_collision_detected() {
        let mut hider = hider();
        assert_eq!(hider.hide("odd ⌊⌊⌊⌊0⌋⌋⌋⌋ text"), Err(HideError::MarkerInText));
        // the two stores use distinct placeholders
        let hidden = hider.hide("<!-- x -->").unwrap();
        let more = hider.hide_more(&hidden, false).unwrap();
        let back = hider.add_back_more(&more).unwrap();
        assert_eq!(hider.add_back(&back).unwrap(), "<!-- x -->");
    }

    #[test]
    fn test_nothing_to_hide() {
        let mut hider = hider();
        assert_eq!(hider.hide("plain text").unwrap(), "plain text");
        assert_eq!(hider.add_back("plain text").unwrap(), "plain text");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 2000,
            ..ProptestConfig::default()
        })]
        #[test]
        fn hide_round_trip(input in "(<!--|-->|<nowiki>|</nowiki>|<ref>|</ref>|<ref name=a/>|<math>|</math>|\\[\\[|\\]\\]|\\{\\{|\\}\\}|\\||File:|http://x.org|\\[|\\]|==|\n| |a|é)*") {
            let options = HideOptions { hide_external_links: true, hide_images: true, hide_refs: true };
            let mut hider = HideText::new(&WikiProfile::default(), options).unwrap();

            let hidden = hider.hide(&input).unwrap();
            prop_assert_eq!(hider.add_back(&hidden).unwrap(), input.clone());

            let hidden = hider.hide_more(&input, false).unwrap();
            prop_assert_eq!(hider.add_back_more(&hidden).unwrap(), input.clone());

            let hidden = hider.hide_more(&input, true).unwrap();
            prop_assert_eq!(hider.add_back_more(&hidden).unwrap(), input);
        }
    }
}
