use std::path::{Path, PathBuf};

use compact_str::CompactString;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse profile at {path}: {source}")]
    ParseProfile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse rule list at {path}: {source}")]
    ParseRules {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid stub pattern `{pattern}`: {source}")]
    StubPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid pattern built from the wiki profile: {0}")]
    ProfilePattern(#[from] regex::Error),
    #[error("failed to build matcher: {0}")]
    Matcher(#[from] aho_corasick::BuildError),
}

/// Per-wiki settings that the masking and parser regexes depend on.
///
/// This replaces process-wide "current project" state: every [`crate::pipeline::Pipeline`]
/// owns its profile, so switching wikis means building a new pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiProfile {
    pub lang_code: CompactString,
    pub category_namespace: CompactString,
    /// First entry is the canonical name, the rest are accepted aliases.
    pub file_namespaces: Vec<CompactString>,
    pub template_namespace: CompactString,
    /// Namespace prefixes that mark a title as being outside of article space.
    pub other_namespaces: Vec<CompactString>,
    /// Matches the name of a stub template (without braces).
    pub stub_pattern: String,
    pub interwiki_codes: Vec<CompactString>,
    /// Templates that display the reference list. First entry is inserted when one is missing.
    pub reflist_templates: Vec<CompactString>,
}

impl Default for WikiProfile {
    fn default() -> Self {
        Self::english_wikipedia()
    }
}

impl WikiProfile {
    pub fn english_wikipedia() -> Self {
        Self {
            lang_code: "en".into(),
            category_namespace: "Category".into(),
            file_namespaces: vec!["File".into(), "Image".into()],
            template_namespace: "Template".into(),
            other_namespaces: [
                "Talk",
                "User",
                "User talk",
                "Wikipedia",
                "Wikipedia talk",
                "File",
                "File talk",
                "Image",
                "MediaWiki",
                "Template",
                "Template talk",
                "Help",
                "Category",
                "Category talk",
                "Portal",
                "Draft",
                "Module",
                "Special",
            ]
            .into_iter()
            .map(CompactString::from)
            .collect(),
            stub_pattern: r"(?i)^[^{}|]*?[Ss]tub\s*$".to_string(),
            interwiki_codes: [
                "ar", "bg", "ca", "cs", "da", "de", "el", "eo", "es", "et", "eu", "fa", "fi", "fr",
                "gl", "he", "hr", "hu", "id", "it", "ja", "ko", "lt", "ms", "nl", "nn", "no", "pl",
                "pt", "ro", "ru", "simple", "sk", "sl", "sr", "sv", "th", "tr", "uk", "vi", "zh",
            ]
            .into_iter()
            .map(CompactString::from)
            .collect(),
            reflist_templates: [
                "Reflist",
                "Refs",
                "References",
                "Ref-list",
                "Reference list",
                "Notelist",
                "Listaref",
            ]
            .into_iter()
            .map(CompactString::from)
            .collect(),
        }
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: WikiProfile =
            toml::from_str(&content).map_err(|source| ConfigError::ParseProfile {
                path: path.to_path_buf(),
                source,
            })?;
        // fail early instead of on the first article
        profile.compile_stub_regex()?;
        Ok(profile)
    }

    pub fn compile_stub_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.stub_pattern).map_err(|source| ConfigError::StubPattern {
            pattern: self.stub_pattern.clone(),
            source,
        })
    }

    /// Regex alternation (already escaped) for the file namespace and its aliases.
    pub fn file_namespace_alternation(&self) -> String {
        self.file_namespaces
            .iter()
            .map(|ns| regex::escape(ns))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn canonical_file_namespace(&self) -> &str {
        self.file_namespaces
            .first()
            .map(CompactString::as_str)
            .unwrap_or("File")
    }

    pub fn is_mainspace(&self, title: &str) -> bool {
        self.namespace_of(title).is_none()
    }

    /// Returns the namespace prefix of `title` if it is one of the known non-article namespaces.
    pub fn namespace_of<'a>(&self, title: &'a str) -> Option<&'a str> {
        let (prefix, _) = title.split_once(':')?;
        let prefix = prefix.trim();
        self.other_namespaces
            .iter()
            .any(|ns| ns.eq_ignore_ascii_case(prefix))
            .then_some(prefix)
    }

    pub fn is_interwiki_code(&self, code: &str) -> bool {
        self.interwiki_codes.iter().any(|c| c == code)
    }

    pub fn default_reflist(&self) -> &str {
        self.reflist_templates
            .first()
            .map(CompactString::as_str)
            .unwrap_or("Reflist")
    }
}

/// Options passed to the general fixes by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralFixOptions {
    /// Also run the reference-list tag replacement (`<references/>` → reflist template).
    pub replace_reference_tags: bool,
    /// Only add a missing `{{DEFAULTSORT}}` to biographies.
    pub restrict_defaultsort_addition: bool,
    /// Skip the cosmetic style-guide fixes (dashes, non-breaking spaces, date ordinals).
    pub no_mos_compliance_fixes: bool,
}

/// Per-fix "skip the article if this fix did nothing" switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipOptions {
    pub skip_no_change: bool,
    pub skip_only_general_fixes: bool,
    pub skip_only_minor_changes: bool,
    pub skip_no_header_error: bool,
    pub skip_no_bad_link: bool,
    pub skip_no_bulleted_link: bool,
    pub skip_no_bold_title: bool,
    pub skip_no_unicode: bool,
    pub skip_no_default_sort_added: bool,
    pub skip_no_category_change: bool,
    pub skip_no_image_change: bool,
}
