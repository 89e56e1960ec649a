// SPDX-License-Identifier: MPL-2.0
//! # wikifunctions
//!
//! The text-processing core of a semi-automated MediaWiki editor: general fixes for wikitext,
//! user-defined find-and-replace rules, and a line/word diff with per-hunk undo.
//!
//! ## Overview
//!
//! An article goes through a fixed sequence of steps. Find-and-replace rules marked to run
//! before the fixes come first, then the configured category and image operations, then the
//! general fixes, then the remaining find-and-replace rules. Every step that touches the text
//! records a log entry and an edit summary fragment, and the article can be skipped when a step
//! did nothing useful.
//!
//! Regions that must never be edited (`<nowiki>`, `<math>`, `<pre>`, `<source>`, comments,
//! optionally templates, images and external links) are masked by [`hide_text::HideText`]
//! before a fix runs and restored byte-for-byte afterwards.
//!
//! **Key Features:**
//!
//! - **Per-wiki profiles**: namespace names, stub and reference list templates are configured
//!   in a [`profile::WikiProfile`] (loadable from TOML); nothing is process-global.
//! - **Shareable pipelines**: a [`pipeline::Pipeline`] is immutable once built and can be shared
//!   between threads; every call works on its own [`article::Article`].
//! - **Recoverable failures**: a broken rule is reported and skipped, a masking failure aborts only
//!   the current article.
//!
//! ## Getting Started
//!
//! ### Basic Usage
//!
//! ```rust
//! use wikifunctions::find_and_replace::Replacement;
//! use wikifunctions::pipeline::Pipeline;
//! use wikifunctions::profile::{GeneralFixOptions, SkipOptions, WikiProfile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(
//!         WikiProfile::default(),
//!         GeneralFixOptions::default(),
//!         SkipOptions::default(),
//!         vec![Replacement::literal("teh", "the")],
//!     )?;
//!
//!     let processed = pipeline.process("Foo", "teh [[cat ]]s")?;
//!     assert_eq!(processed.text, "the [[cat]] s");
//!     assert_eq!(processed.summary, "replaced: teh → the, general fixes");
//!     Ok(())
//! }
//! ```
//!
//! ### Processing a Dump
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! use wikifunctions::dump_parser::DumpParser;
//! use wikifunctions::pipeline::Pipeline;
//! use wikifunctions::profile::{GeneralFixOptions, SkipOptions, WikiProfile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(
//!         WikiProfile::default(),
//!         GeneralFixOptions::default(),
//!         SkipOptions::default(),
//!         Vec::new(),
//!     )?;
//!
//!     let reader = BufReader::new(File::open("enwiki-20240901-pages-articles.xml")?);
//!     let mut parser = DumpParser::new(reader)?;
//!     while let Some(page) = parser.parse_page()? {
//!         if let Some(text) = page.text() {
//!             let processed = pipeline.process(&page.title, text)?;
//!             if processed.changed {
//!                 println!("{}: {}", processed.title, processed.summary);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! XML parsing is linear. To use more cores, parse in one thread and hand pages to workers
//! that share a `&Pipeline` (for example with `std::thread::scope`).
//!
//! ## Modules and API
//!
//! - [`hide_text`]: masks protected regions behind placeholder tokens and restores them.
//! - [`parsers`]: the general fixes. Each fix returns the new text and whether it changed.
//! - [`find_and_replace`]: ordered literal/regex rules with per-rule flags and summaries.
//! - [`article`]: one article under edit, with its log, summary and skip state.
//! - [`pipeline`]: builds the components once and runs the whole sequence per article.
//! - [`diff`]: longest-common-subsequence diff over arbitrary token sequences.
//! - [`wiki_diff`]: line diff with word-level highlighting, HTML rendering and undo.
//! - [`dump_parser`]: streams pages out of a MediaWiki XML export.
//! - [`summary`]: edit summary assembly and truncation.
//! - [`utils`]: title and string helpers shared by the modules above.
//!
//! ## Logging and Error Handling
//!
//! - Uses the `tracing` crate. Skips and per-fix timings are logged at `debug`, rule failures at
//!   `warn`, masking failures at `error`.
//! - The dump parser skips malformed pages where it can. Enable the `strict` feature to make it
//!   stop at the first error instead:
//!
//! ```toml
//! [dependencies]
//! wikifunctions = { version = "0.1.0", features = ["strict"] }
//! ```

pub mod article;
pub mod diff;
pub mod dump_parser;
pub mod find_and_replace;
pub mod hide_text;
pub mod parsers;
pub mod pipeline;
pub mod profile;
pub mod summary;
pub mod utils;
pub mod wiki_diff;
