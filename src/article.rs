//! One article's trip through the pipeline.
//!
//! [`Article`] owns the original and the current text. The current text is
//! only ever changed through [`Article::change_text`], which records the
//! reason in an audit log, so the log always explains every difference
//! between the two. Masking during the general fixes is the one exception:
//! it swaps the text for its masked form and restores it byte for byte.

use std::fmt;
use std::time::Instant;

use crate::find_and_replace::{FindAndReplace, Phase, RuleError};
use crate::hide_text::{HideError, HideText};
use crate::parsers::{self, Fixed, Parsers, UnbalancedBracket};
use crate::profile::{GeneralFixOptions, SkipOptions};
use crate::summary::EditSummary;

/// Who changed the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    GeneralFixes,
    FindAndReplace,
    Categories,
    Images,
    Operator,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Actor::GeneralFixes => "general fixes",
            Actor::FindAndReplace => "find and replace",
            Actor::Categories => "categories",
            Actor::Images => "images",
            Actor::Operator => "operator",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub reason: String,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOperation {
    Add(String),
    Remove(String),
    Replace { old: String, new: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOperation {
    Replace { old: String, new: String },
    Remove(String),
    CommentOut { name: String, comment: String },
}

#[derive(Debug)]
pub struct Article {
    title: String,
    original_text: String,
    text: String,
    summary: EditSummary,
    log: Vec<LogEntry>,
    skip_reason: Option<String>,
    /// Snapshot taken right after the general fixes, if they changed anything.
    after_general_fixes: Option<String>,
    general_fixes_caused_change: bool,
    general_fixes_significant_change: bool,
    major_change: bool,
    rule_errors: Vec<RuleError>,
}

impl Article {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            title: title.into(),
            original_text: text.clone(),
            text,
            summary: EditSummary::new(),
            log: Vec::new(),
            skip_reason: None,
            after_general_fixes: None,
            general_fixes_caused_change: false,
            general_fixes_significant_change: false,
            major_change: false,
            rule_errors: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn summary(&self) -> &EditSummary {
        &self.summary
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn rule_errors(&self) -> &[RuleError] {
        &self.rule_errors
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub fn general_fixes_caused_change(&self) -> bool {
        self.general_fixes_caused_change
    }

    /// A general fix tagged significant changed the text.
    pub fn significant_change(&self) -> bool {
        self.general_fixes_significant_change
    }

    /// Anything other than cosmetic fixes and minor rules changed the text.
    pub fn major_change(&self) -> bool {
        self.major_change
    }

    /// Replaces the current text and records why. Returns whether the text
    /// actually changed; an identical text is not logged.
    pub fn change_text(&mut self, text: String, reason: impl Into<String>, actor: Actor) -> bool {
        if text == self.text {
            return false;
        }
        self.text = text;
        self.log.push(LogEntry {
            reason: reason.into(),
            actor,
        });
        true
    }

    /// Records that the article should be skipped. The first reason wins.
    pub fn trace_skip(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(message = "Skip requested", title = %self.title, reason = %reason);
        if self.skip_reason.is_none() {
            self.skip_reason = Some(reason);
        }
    }

    fn skip_unless(&mut self, enabled: bool, changed: bool, reason: &str) {
        if enabled && !changed {
            self.trace_skip(reason);
        }
    }

    pub fn no_article_text_changed(&self) -> bool {
        self.text == self.original_text
    }

    /// Nothing but the general fixes changed the text.
    pub fn only_general_fixes_changed(&self) -> bool {
        self.general_fixes_caused_change
            && self.after_general_fixes.as_deref() == Some(self.text.as_str())
    }

    pub fn only_minor_general_fixes_changed(&self) -> bool {
        self.only_general_fixes_changed() && !self.general_fixes_significant_change
    }

    pub fn unbalanced_brackets(&self) -> Option<UnbalancedBracket> {
        parsers::unbalanced_brackets(&self.text)
    }

    /// Runs one general fix over the current text, timing it.
    fn run_fix(&mut self, reason: &str, significant: bool, fix: impl FnOnce(&str) -> Fixed) -> bool {
        let span = tracing::trace_span!("general_fix", reason);
        let _enter = span.enter();
        let started = Instant::now();
        let (text, changed) = fix(&self.text);
        tracing::trace!(elapsed = ?started.elapsed(), changed);

        if !changed || !self.change_text(text, reason, Actor::GeneralFixes) {
            return false;
        }
        if significant {
            self.general_fixes_significant_change = true;
        }
        true
    }

    /// Masks the current text in place. Not logged, [`Self::add_back`] undoes it.
    fn hide(&mut self, hider: &mut HideText) -> Result<(), HideError> {
        self.text = hider.hide(&self.text)?;
        Ok(())
    }

    fn add_back(&mut self, hider: &mut HideText) -> Result<(), HideError> {
        self.text = hider.add_back(&self.text)?;
        Ok(())
    }

    /// Applies the general fixes in their fixed order.
    ///
    /// On a masking failure the text, the log and the change and skip flags
    /// are rolled back to what they were before the fixes started and the
    /// error is returned.
    pub fn perform_general_fixes(
        &mut self,
        parsers: &Parsers,
        hider: &mut HideText,
        skip: &SkipOptions,
        options: &GeneralFixOptions,
    ) -> Result<(), HideError> {
        let before = self.text.clone();
        let log_len = self.log.len();
        let skip_reason = self.skip_reason.clone();
        let significant = self.general_fixes_significant_change;
        let major = self.major_change;

        let result = self.general_fixes(parsers, hider, skip, options);
        if let Err(err) = &result {
            tracing::error!(message = "Masking failed, general fixes rolled back", title = %self.title, error = %err);
            self.text = before;
            self.log.truncate(log_len);
            self.skip_reason = skip_reason;
            self.general_fixes_significant_change = significant;
            self.major_change = major;
            hider.reset();
        }
        result
    }

    fn general_fixes(
        &mut self,
        parsers: &Parsers,
        hider: &mut HideText,
        skip: &SkipOptions,
        options: &GeneralFixOptions,
    ) -> Result<(), HideError> {
        let already_changed = !self.no_article_text_changed();
        let before = self.text.clone();
        let title = self.title.clone();
        let mainspace = parsers.profile().is_mainspace(&title);

        // dates are fixed on the unmasked text
        self.run_fix("fixed dates", false, parsers::fix_dates_a);
        self.run_fix("trimmed text", false, |text| parsers::fixed(text, text.trim()));

        self.hide(hider)?;

        let changed = self.run_fix("unicodified", false, parsers::unicodify);
        self.skip_unless(skip.skip_no_unicode, changed, "no unicodification");
        self.run_fix("fixed categories", false, |text| parsers.fix_categories(text));
        self.run_fix("fixed images", false, |text| parsers.fix_images(text));
        self.run_fix("fixed syntax", true, |text| parsers.fix_syntax(text));
        self.run_fix("collapsed line breaks", false, parsers::collapse_br_runs);
        self.run_fix("fixed temperatures", false, parsers::fix_temperatures);
        self.run_fix("fixed main article", false, parsers::fix_main_article);
        self.run_fix("removed empty links and templates", false, parsers::fix_empty_links_and_templates);
        self.run_fix("fixed link whitespace", false, |text| {
            parsers::fix_link_whitespace(text, &title)
        });

        let changed = self.run_fix("fixed links", true, |text| parsers::fix_links(text, &title));
        self.skip_unless(skip.skip_no_bad_link, changed, "no bad link");
        let changed = self.run_fix("bulleted external links", false, parsers::bullet_external_links);
        self.skip_unless(skip.skip_no_bulleted_link, changed, "no bulleted external link");
        let changed = self.run_fix("fixed headings", true, |text| parsers::fix_headings(text, &title));
        self.skip_unless(skip.skip_no_header_error, changed, "no header error");

        if !options.no_mos_compliance_fixes {
            self.run_fix("fixed non-breaking spaces", false, parsers::fix_non_breaking_spaces);
            if mainspace {
                self.run_fix("fixed dashes", false, parsers::mdashes);
            }
            self.run_fix("fixed date ordinals", false, |text| {
                parsers::fix_date_ordinals_and_of(text, &title)
            });
        }

        self.run_fix("fixed citation templates", true, parsers::fix_citation_templates);

        self.run_fix("fixed reference tags", true, parsers::fix_reference_tags);
        self.run_fix("simplified reference tags", true, parsers::simplify_reference_tags);
        self.run_fix("fixed reference list tags", true, |text| {
            parsers.fix_reference_list_tags(text, options.replace_reference_tags)
        });
        self.run_fix("named duplicate references", true, parsers::duplicate_unnamed_references);
        self.run_fix("merged duplicate references", true, parsers::duplicate_named_references);
        self.run_fix("moved references after punctuation", true, parsers::refs_after_punctuation);
        self.run_fix("added missing reference list", true, |text| parsers.add_missing_reflist(text));

        self.run_fix("simplified links", false, parsers::simplify_links);
        self.run_fix("made links sticky", false, parsers::sticky_links);

        self.add_back(hider)?;

        if mainspace {
            let changed = self.run_fix("emboldened title", false, |text| {
                parsers::embolden_titles(text, &title)
            });
            self.skip_unless(skip.skip_no_bold_title, changed, "no title boldened");
        }
        let sort = parsers.change_to_default_sort(
            &self.text,
            &title,
            options.restrict_defaultsort_addition,
        );
        let added = sort.added;
        self.run_fix("changed DEFAULTSORT", false, |_| (sort.text, sort.changed));
        self.skip_unless(skip.skip_no_default_sort_added, added, "no DEFAULTSORT added");

        // commented-out categories must not move with the metadata
        self.hide(hider)?;
        self.run_fix("sorted metadata", false, |text| parsers.sort_meta_data(text, &title));
        self.run_fix("removed whitespace", false, parsers::remove_whitespace);
        self.add_back(hider)?;

        self.general_fixes_caused_change = !already_changed && !self.no_article_text_changed();
        if self.general_fixes_caused_change {
            self.after_general_fixes = Some(self.text.clone());
        }
        // a significant fix counts even after earlier steps changed the text
        if self.text != before {
            self.summary.push("general fixes");
            if self.general_fixes_significant_change {
                self.major_change = true;
            }
        }
        Ok(())
    }

    /// Runs the find-and-replace rules of `phase`.
    pub fn perform_find_and_replace(
        &mut self,
        engine: &FindAndReplace,
        phase: Phase,
    ) -> Result<(), HideError> {
        let outcome = engine.apply(&self.text, &self.title, phase)?;
        self.rule_errors.extend(outcome.errors);
        if !self.change_text(outcome.text, "find and replace", Actor::FindAndReplace) {
            return Ok(());
        }
        if outcome.major_change {
            self.major_change = true;
        }
        if engine.append_summary && !outcome.summary.is_empty() {
            self.summary.push(outcome.summary.to_string());
        }
        Ok(())
    }

    pub fn perform_category_operation(
        &mut self,
        parsers: &Parsers,
        operation: &CategoryOperation,
        skip_if_no_change: bool,
    ) -> bool {
        let namespace = parsers.profile().category_namespace.clone();
        let ((text, changed), fragment) = match operation {
            CategoryOperation::Add(name) => (
                parsers.add_category(&self.text, name),
                format!("added [[{namespace}:{name}]]"),
            ),
            CategoryOperation::Remove(name) => (
                parsers.remove_category(&self.text, name),
                format!("removed [[{namespace}:{name}]]"),
            ),
            CategoryOperation::Replace { old, new } => (
                parsers.re_categorise(&self.text, old, new),
                format!("[[{namespace}:{old}]] → [[{namespace}:{new}]]"),
            ),
        };
        let changed = changed && self.change_text(text, fragment.clone(), Actor::Categories);
        if changed {
            self.summary.push(fragment);
            self.major_change = true;
        }
        self.skip_unless(skip_if_no_change, changed, "no category changed");
        changed
    }

    pub fn perform_image_operation(
        &mut self,
        parsers: &Parsers,
        operation: &ImageOperation,
        skip_if_no_change: bool,
    ) -> bool {
        let ((text, changed), fragment) = match operation {
            ImageOperation::Replace { old, new } => (
                parsers.replace_image(&self.text, old, new),
                format!("replaced image {old} → {new}"),
            ),
            ImageOperation::Remove(name) => (
                parsers.remove_image(&self.text, name),
                format!("removed image {name}"),
            ),
            ImageOperation::CommentOut { name, comment } => (
                parsers.comment_out_image(&self.text, name, comment),
                format!("commented out image {name}"),
            ),
        };
        let changed = changed && self.change_text(text, fragment.clone(), Actor::Images);
        if changed {
            self.summary.push(fragment);
            self.major_change = true;
        }
        self.skip_unless(skip_if_no_change, changed, "no image changed");
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_and_replace::Replacement;
    use crate::hide_text::HideOptions;
    use crate::profile::WikiProfile;

    fn parsers() -> Parsers {
        Parsers::new(WikiProfile::default()).unwrap()
    }

    fn hider() -> HideText {
        HideText::new(
            &WikiProfile::default(),
            HideOptions {
                hide_external_links: false,
                hide_images: false,
                hide_refs: false,
            },
        )
        .unwrap()
    }

    fn general_fixes(title: &str, text: &str) -> Article {
        let mut article = Article::new(title, text);
        article
            .perform_general_fixes(
                &parsers(),
                &mut hider(),
                &SkipOptions::default(),
                &GeneralFixOptions::default(),
            )
            .unwrap();
        article
    }

    #[test]
    fn test_change_text_logs() {
        let mut article = Article::new("Foo", "a");
        assert!(!article.change_text("a".to_string(), "nothing", Actor::Operator));
        assert!(article.change_text("b".to_string(), "typo", Actor::Operator));
        assert_eq!(
            article.log(),
            [LogEntry {
                reason: "typo".to_string(),
                actor: Actor::Operator
            }]
        );
        assert!(!article.no_article_text_changed());
    }

    #[test]
    fn test_link_whitespace_through_general_fixes() {
        let article = general_fixes("Foo", "[[a ]]b");
        assert_eq!(article.text(), "[[a]] b");
        assert!(article.general_fixes_caused_change());
        assert!(article.only_general_fixes_changed());
        assert!(article.only_minor_general_fixes_changed());
        assert_eq!(article.summary().to_string(), "general fixes");
        assert!(article
            .log()
            .iter()
            .any(|entry| entry.reason == "fixed link whitespace"
                && entry.actor == Actor::GeneralFixes));
    }

    #[test]
    fn test_br_collapse_through_general_fixes() {
        assert_eq!(general_fixes("Foo", "a<br><br>b").text(), "a\r\nb");
        assert_eq!(general_fixes("Foo", "<br><br>").text(), "");
    }

    #[test]
    fn test_hidden_regions_survive() {
        let text = "Text<!-- [[a ]]b --> and <nowiki>[[c ]]d</nowiki>";
        let article = general_fixes("Foo", text);
        assert_eq!(article.text(), text);
        assert!(!article.general_fixes_caused_change());
        assert!(article.log().is_empty());
    }

    #[test]
    fn test_significant_change() {
        let article = general_fixes("Foo", "Text.<ref>Source</ref>");
        assert!(article.text().contains("{{Reflist}}"));
        assert!(article.significant_change());
        assert!(article.major_change());
        assert!(!article.only_minor_general_fixes_changed());
    }

    #[test]
    fn test_general_fixes_are_stable() {
        let text = "'''Foo''' is a [[bar ]]thing.<ref>A</ref>\n\n== See also ==\n* [[Baz]]\n\n[[Category:Things]]";
        let first = general_fixes("Foo", text);
        let second = general_fixes("Foo", first.text());
        assert_eq!(second.text(), first.text());
        assert!(!second.general_fixes_caused_change());
    }

    #[test]
    fn test_already_changed_article() {
        let mut article = Article::new("Foo", "[[a ]]b");
        article.change_text("[[a ]]b!".to_string(), "manual", Actor::Operator);
        article
            .perform_general_fixes(
                &parsers(),
                &mut hider(),
                &SkipOptions::default(),
                &GeneralFixOptions::default(),
            )
            .unwrap();
        assert_eq!(article.text(), "[[a]] b!");
        assert!(!article.general_fixes_caused_change());
        assert!(!article.only_general_fixes_changed());
    }

    #[test]
    fn test_skip_trace() {
        let mut article = Article::new("Foo", "Plain text.");
        let skip = SkipOptions {
            skip_no_header_error: true,
            skip_no_unicode: true,
            ..SkipOptions::default()
        };
        article
            .perform_general_fixes(&parsers(), &mut hider(), &skip, &GeneralFixOptions::default())
            .unwrap();
        // first reason wins
        assert_eq!(article.skip_reason(), Some("no unicodification"));
    }

    #[test]
    fn test_masking_failure_rolls_back() {
        // a hidden region that already contains a placeholder cannot be restored
        let text = "a ⌊⌊⌊⌊0⌋⌋⌋⌋ [[b ]]c";
        let mut article = Article::new("Foo", text);
        let result = article.perform_general_fixes(
            &parsers(),
            &mut hider(),
            &SkipOptions::default(),
            &GeneralFixOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(article.text(), text);
        assert!(article.log().is_empty());
    }

    #[test]
    fn test_masking_failure_restores_flags() {
        // unicodify turns the entities into a placeholder that was never issued
        let text = "Text.<ref>A</ref> &#8970;&#8970;&#8970;&#8970;5&#8971;&#8971;&#8971;&#8971;";
        let skip = SkipOptions {
            skip_no_bulleted_link: true,
            ..SkipOptions::default()
        };
        let mut article = Article::new("Foo", text);
        let result = article.perform_general_fixes(
            &parsers(),
            &mut hider(),
            &skip,
            &GeneralFixOptions::default(),
        );
        assert_eq!(result, Err(HideError::UnknownPlaceholder { index: 5 }));
        assert_eq!(article.text(), text);
        assert!(article.log().is_empty());
        assert!(!article.significant_change());
        assert!(!article.major_change());
        assert_eq!(article.skip_reason(), None);
        assert!(article.summary().is_empty());
    }

    #[test]
    fn test_significant_fix_after_minor_change() {
        let mut article = Article::new("Foo", "Text.<ref>Source</ref>");
        article.change_text("Text!<ref>Source</ref>".to_string(), "typo", Actor::Operator);
        article
            .perform_general_fixes(
                &parsers(),
                &mut hider(),
                &SkipOptions::default(),
                &GeneralFixOptions::default(),
            )
            .unwrap();
        assert!(article.text().contains("{{Reflist}}"));
        assert!(!article.general_fixes_caused_change());
        assert!(article.major_change());
        assert_eq!(article.summary().to_string(), "general fixes");
    }

    #[test]
    fn test_find_and_replace() {
        let engine = FindAndReplace::new(
            &WikiProfile::default(),
            vec![Replacement {
                minor: true,
                ..Replacement::literal("colour", "color")
            }],
        )
        .unwrap();
        let mut article = Article::new("Foo", "A colour.");
        article
            .perform_find_and_replace(&engine, Phase::BeforeFixes)
            .unwrap();
        assert_eq!(article.text(), "A color.");
        assert!(!article.major_change());
        assert_eq!(article.summary().to_string(), "replaced: colour → color");
        assert_eq!(article.log()[0].actor, Actor::FindAndReplace);
    }

    #[test]
    fn test_category_operations() {
        let parsers = parsers();
        let mut article = Article::new("Foo", "Text.\n\n[[Category:Old]]");
        assert!(article.perform_category_operation(
            &parsers,
            &CategoryOperation::Replace {
                old: "Old".to_string(),
                new: "New".to_string()
            },
            false
        ));
        assert_eq!(article.text(), "Text.\n\n[[Category:New]]");
        assert!(!article.perform_category_operation(
            &parsers,
            &CategoryOperation::Remove("Missing".to_string()),
            true
        ));
        assert_eq!(article.skip_reason(), Some("no category changed"));
        assert_eq!(
            article.summary().to_string(),
            "[[Category:Old]] → [[Category:New]]"
        );
    }

    #[test]
    fn test_image_operations() {
        let parsers = parsers();
        let mut article = Article::new("Foo", "[[File:Old.jpg|thumb|Caption]]\nText.");
        assert!(article.perform_image_operation(
            &parsers,
            &ImageOperation::Replace {
                old: "Old.jpg".to_string(),
                new: "New.jpg".to_string()
            },
            false
        ));
        assert_eq!(article.text(), "[[File:New.jpg|thumb|Caption]]\nText.");
        assert!(article.perform_image_operation(
            &parsers,
            &ImageOperation::Remove("New.jpg".to_string()),
            false
        ));
        assert_eq!(article.text(), "Text.");
    }
}
