//! Operator-defined find-and-replace rules.
//!
//! Rules run strictly in list order, each one seeing the output of the
//! previous. Every match of a rule is replaced, but whether the rule counts
//! as a change (and what it contributes to the edit summary) is decided by
//! its first match alone.

use std::fs;
use std::path::Path;

use fancy_regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hide_text::{HideError, HideOptions, HideText};
use crate::profile::{ConfigError, WikiProfile};
use crate::summary::ReplacementSummary;
use crate::utils::apply_keywords;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule {index} has an invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        source: fancy_regex::Error,
    },
    #[error("rule {index} failed while matching: {source}")]
    Matching {
        index: usize,
        source: fancy_regex::Error,
    },
}

impl RuleError {
    pub fn index(&self) -> usize {
        match self {
            RuleError::InvalidPattern { index, .. } | RuleError::Matching { index, .. } => *index,
        }
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
    pub case_sensitive: bool,
    pub is_regex: bool,
    /// `^`/`$` match at line boundaries.
    pub multiline: bool,
    /// `.` also matches a newline.
    pub singleline: bool,
    /// Never counts as a major change.
    pub minor: bool,
    /// Run after the general fixes instead of before them.
    pub after_fixes: bool,
    pub enabled: bool,
    pub comment: String,
}

impl Default for Replacement {
    fn default() -> Self {
        Self {
            find: String::new(),
            replace: String::new(),
            case_sensitive: false,
            is_regex: false,
            multiline: false,
            singleline: false,
            minor: false,
            after_fixes: false,
            enabled: true,
            comment: String::new(),
        }
    }
}

impl Replacement {
    pub fn literal(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            ..Self::default()
        }
    }

    pub fn regex(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(find, replace)
        }
    }

    pub fn runs_in(&self, phase: Phase) -> bool {
        self.enabled
            && !self.find.is_empty()
            && match phase {
                Phase::BeforeFixes => !self.after_fixes,
                Phase::AfterFixes => self.after_fixes,
            }
    }

    /// Builds the pattern and the expansion template for `title`.
    fn compile(&self, title: &str, profile: &WikiProfile) -> Result<(Regex, String), fancy_regex::Error> {
        let find = apply_keywords(title, &self.find, self.is_regex, profile);
        let find = if self.is_regex {
            find
        } else {
            fancy_regex::escape(&find).into_owned()
        };

        let mut flags = String::new();
        if !self.case_sensitive {
            flags.push('i');
        }
        if self.multiline {
            flags.push('m');
        }
        if self.singleline {
            flags.push('s');
        }
        let pattern = if flags.is_empty() {
            find
        } else {
            format!("(?{flags}){find}")
        };

        let replace = apply_keywords(title, &self.replace, false, profile);
        let template = if self.is_regex {
            expansion_template(&replace)
        } else {
            replace.replace('$', "$$")
        };
        Ok((Regex::new(&pattern)?, template))
    }
}

/// Converts a replacement in the `$1`/`${name}` convention into an
/// unambiguous [`Captures::expand`] template: numbered references get
/// braces (`$1st` is group 1 followed by "st") and a `$` that starts no
/// reference stays literal.
fn expansion_template(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len() + 8);
    let mut rest = replace;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            out.push_str("${");
            out.push_str(&after[..digits]);
            out.push('}');
            rest = &after[digits..];
        } else if after.starts_with('{') && after.contains('}') {
            out.push('$');
            rest = after;
        } else if let Some(stripped) = after.strip_prefix('$') {
            out.push_str("$$");
            rest = stripped;
        } else {
            out.push_str("$$");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Which half of the article pipeline a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeFixes,
    AfterFixes,
}

#[derive(Debug)]
pub struct FindAndReplaceOutcome {
    pub text: String,
    /// Some rule's first match changed text.
    pub changed: bool,
    /// Some non-minor rule's first match changed text.
    pub major_change: bool,
    pub summary: ReplacementSummary,
    /// Rules that were skipped because their pattern failed.
    pub errors: Vec<RuleError>,
}

struct RuleOutcome {
    text: String,
    /// `(matched, replaced_with, match_count)` of the first match
    first: Option<(String, String, usize)>,
}

/// The ordered rule list plus its masking settings.
///
/// Immutable once built: [`FindAndReplace::apply`] takes `&self`, so one
/// instance can be shared between threads.
#[derive(Debug, Clone)]
pub struct FindAndReplace {
    rules: Vec<Replacement>,
    profile: WikiProfile,
    hider: HideText,
    /// Leave external links, images and unformatted regions untouched.
    pub ignore_links: bool,
    /// Also leave templates, headings, references and wikilinks untouched.
    pub ignore_more: bool,
    /// Add the replaced/removed buckets to the edit summary.
    pub append_summary: bool,
}

impl FindAndReplace {
    pub fn new(profile: &WikiProfile, rules: Vec<Replacement>) -> Result<Self, HideError> {
        let hider = HideText::new(
            profile,
            HideOptions {
                hide_external_links: true,
                hide_images: true,
                hide_refs: false,
            },
        )?;
        Ok(Self {
            rules,
            profile: profile.clone(),
            hider,
            ignore_links: false,
            ignore_more: false,
            append_summary: true,
        })
    }

    /// Reads a JSON array of [`Replacement`] rows.
    pub fn load_rules<P: AsRef<Path>>(path: P) -> Result<Vec<Replacement>, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::ParseRules {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn rules(&self) -> &[Replacement] {
        &self.rules
    }

    pub fn has_rules_for(&self, phase: Phase) -> bool {
        self.rules.iter().any(|rule| rule.runs_in(phase))
    }

    /// Runs every enabled rule of `phase` over `text`.
    ///
    /// A rule whose pattern does not compile is recorded in
    /// [`FindAndReplaceOutcome::errors`] and skipped. Masking failures abort
    /// the whole pass.
    pub fn apply(
        &self,
        text: &str,
        title: &str,
        phase: Phase,
    ) -> Result<FindAndReplaceOutcome, HideError> {
        let mut outcome = FindAndReplaceOutcome {
            text: text.to_string(),
            changed: false,
            major_change: false,
            summary: ReplacementSummary::new(),
            errors: Vec::new(),
        };
        if !self.has_rules_for(phase) {
            return Ok(outcome);
        }

        let mut hider = self.hider.clone();
        // the broader mask covers everything the link mask does
        let mut working = if self.ignore_more {
            hider.hide_more(text, false)?
        } else if self.ignore_links {
            hider.hide(text)?
        } else {
            text.to_string()
        };

        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.runs_in(phase) {
                continue;
            }
            match self.apply_rule(index, rule, &working, title) {
                Ok(RuleOutcome { text, first }) => {
                    working = text;
                    let Some((before, after, count)) = first else {
                        continue;
                    };
                    if before == after {
                        continue;
                    }
                    outcome.changed = true;
                    outcome.major_change |= !rule.minor;
                    if after.is_empty() {
                        outcome.summary.push_removed(&before, count);
                    } else {
                        outcome.summary.push_replaced(&before, &after, count);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        message = "Skipping find-and-replace rule",
                        index,
                        pattern = rule.find.as_str(),
                        error = %err
                    );
                    outcome.errors.push(err);
                }
            }
        }

        outcome.text = if self.ignore_more {
            hider.add_back_more(&working)?
        } else if self.ignore_links {
            hider.add_back(&working)?
        } else {
            working
        };
        Ok(outcome)
    }

    fn apply_rule(
        &self,
        index: usize,
        rule: &Replacement,
        text: &str,
        title: &str,
    ) -> Result<RuleOutcome, RuleError> {
        let (regex, template) =
            rule.compile(title, &self.profile)
                .map_err(|source| RuleError::InvalidPattern {
                    index,
                    pattern: rule.find.clone(),
                    source,
                })?;

        let mut result = String::with_capacity(text.len());
        let mut last = 0;
        let mut first: Option<(String, String)> = None;
        let mut count = 0;
        for captures in regex.captures_iter(text) {
            let captures: Captures =
                captures.map_err(|source| RuleError::Matching { index, source })?;
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let mut expanded = String::new();
            captures.expand(&template, &mut expanded);

            result.push_str(&text[last..whole.start()]);
            result.push_str(&expanded);
            last = whole.end();
            if first.is_none() {
                first = Some((whole.as_str().to_string(), expanded));
            }
            count += 1;
        }
        result.push_str(&text[last..]);

        Ok(RuleOutcome {
            text: result,
            first: first.map(|(before, after)| (before, after, count)),
        })
    }
}
