//! The per-wiki processing pipeline.
//!
//! A [`Pipeline`] is built once from a [`WikiProfile`], the general-fix
//! options and the rule list, and is immutable afterwards. Every call to
//! [`Pipeline::process`] works on its own [`Article`] and its own copy of the
//! masker, so one pipeline can serve any number of worker threads.

use thiserror::Error;

use crate::article::{Article, CategoryOperation, ImageOperation, LogEntry};
use crate::find_and_replace::{FindAndReplace, Phase, Replacement};
use crate::hide_text::{HideError, HideOptions, HideText};
use crate::parsers::{Parsers, UnbalancedBracket};
use crate::profile::{ConfigError, GeneralFixOptions, SkipOptions, WikiProfile};
use crate::summary::MAX_SUMMARY_CHARS;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not process page {title}: {source}")]
    Masking { title: String, source: HideError },
    #[error("invalid masking setup: {0}")]
    Setup(#[from] HideError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What the caller needs to save (or skip) an article.
#[derive(Debug)]
pub struct ProcessedArticle {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub skip_reason: Option<String>,
    /// The text differs from the input.
    pub changed: bool,
    pub major_change: bool,
    pub general_fixes_caused_change: bool,
    /// First unbalanced bracket of the result, for operator review.
    pub unbalanced_bracket: Option<UnbalancedBracket>,
    pub rule_errors: Vec<String>,
    pub log: Vec<LogEntry>,
}

impl ProcessedArticle {
    pub fn skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

impl From<Article> for ProcessedArticle {
    fn from(article: Article) -> Self {
        let title = article.title().to_string();
        let summary = article.summary().to_string_truncated(MAX_SUMMARY_CHARS);
        let skip_reason = article.skip_reason().map(str::to_string);
        let changed = !article.no_article_text_changed();
        let major_change = article.major_change();
        let general_fixes_caused_change = article.general_fixes_caused_change();
        let unbalanced_bracket = article.unbalanced_brackets();
        let rule_errors = article.rule_errors().iter().map(ToString::to_string).collect();
        let log = article.log().to_vec();
        Self {
            title,
            text: article.into_text(),
            summary,
            skip_reason,
            changed,
            major_change,
            general_fixes_caused_change,
            unbalanced_bracket,
            rule_errors,
            log,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    parsers: Parsers,
    hider: HideText,
    find_and_replace: FindAndReplace,
    options: GeneralFixOptions,
    skip: SkipOptions,
    category_operations: Vec<CategoryOperation>,
    image_operations: Vec<ImageOperation>,
    general_fixes: bool,
}

impl Pipeline {
    pub fn new(
        profile: WikiProfile,
        options: GeneralFixOptions,
        skip: SkipOptions,
        rules: Vec<Replacement>,
    ) -> Result<Self, PipelineError> {
        // images and references stay visible: the fixes rewrite them
        let hider = HideText::new(
            &profile,
            HideOptions {
                hide_external_links: false,
                hide_images: false,
                hide_refs: false,
            },
        )?;
        let find_and_replace = FindAndReplace::new(&profile, rules)?;
        let parsers = Parsers::new(profile)?;
        Ok(Self {
            parsers,
            hider,
            find_and_replace,
            options,
            skip,
            category_operations: Vec::new(),
            image_operations: Vec::new(),
            general_fixes: true,
        })
    }

    pub fn with_category_operation(mut self, operation: CategoryOperation) -> Self {
        self.category_operations.push(operation);
        self
    }

    pub fn with_image_operation(mut self, operation: ImageOperation) -> Self {
        self.image_operations.push(operation);
        self
    }

    pub fn with_general_fixes(mut self, enabled: bool) -> Self {
        self.general_fixes = enabled;
        self
    }

    pub fn find_and_replace_mut(&mut self) -> &mut FindAndReplace {
        &mut self.find_and_replace
    }

    pub fn parsers(&self) -> &Parsers {
        &self.parsers
    }

    /// Find-and-replace (before), category and image operations, general
    /// fixes, find-and-replace (after), then the skip policy.
    pub fn process(&self, title: &str, text: &str) -> Result<ProcessedArticle, PipelineError> {
        let span = tracing::debug_span!("process", title);
        let _enter = span.enter();

        let masking = |source| PipelineError::Masking {
            title: title.to_string(),
            source,
        };
        let mut article = Article::new(title, text);

        article
            .perform_find_and_replace(&self.find_and_replace, Phase::BeforeFixes)
            .map_err(masking)?;
        for operation in &self.category_operations {
            article.perform_category_operation(
                &self.parsers,
                operation,
                self.skip.skip_no_category_change,
            );
        }
        for operation in &self.image_operations {
            article.perform_image_operation(
                &self.parsers,
                operation,
                self.skip.skip_no_image_change,
            );
        }
        if self.general_fixes {
            let mut hider = self.hider.clone();
            article
                .perform_general_fixes(&self.parsers, &mut hider, &self.skip, &self.options)
                .map_err(masking)?;
        }
        article
            .perform_find_and_replace(&self.find_and_replace, Phase::AfterFixes)
            .map_err(masking)?;

        self.apply_skip_policy(&mut article);
        Ok(article.into())
    }

    fn apply_skip_policy(&self, article: &mut Article) {
        if self.skip.skip_no_change && article.no_article_text_changed() {
            article.trace_skip("no change");
        }
        if self.skip.skip_only_general_fixes && article.only_general_fixes_changed() {
            article.trace_skip("only general fixes changed");
        }
        if self.skip.skip_only_minor_changes
            && !article.no_article_text_changed()
            && !article.major_change()
        {
            article.trace_skip("only minor changes");
        }
    }
}
