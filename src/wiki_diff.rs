//! Side-by-side rendering of a line diff, with word-level highlighting inside
//! changed lines and line-level undo.
//!
//! [`WikiDiff`] keeps the two line arrays it was built from and never mutates
//! them: every undo operation returns a freshly joined text.

use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use compact_str::CompactString;
use thiserror::Error;

use crate::diff::{self, Hunk};

/// Line separator used when joining undone text.
pub const LINE_SEPARATOR: &str = "\r\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("left line {index} is out of range (left side has {len} lines)")]
    LeftOutOfRange { index: usize, len: usize },
    #[error("right line {index} is out of range (right side has {len} lines)")]
    RightOutOfRange { index: usize, len: usize },
}

/// A token of a line: a body plus the whitespace that follows it.
///
/// Only the body takes part in comparisons, so re-spacing a sentence does not
/// mark its words as changed.
#[derive(Debug, Clone)]
pub struct Word {
    pub body: CompactString,
    pub trailing: CompactString,
}

impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for Word {}

impl Hash for Word {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.body.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Text,
    Whitespace,
    /// Punctuation and scripts written without spaces; one token per char.
    Single,
}

fn is_unspaced_script(ch: char) -> bool {
    matches!(ch,
        '\u{0E00}'..='\u{0E7F}'     // Thai
        | '\u{2E80}'..='\u{2FDF}'   // CJK radicals, Kangxi
        | '\u{3040}'..='\u{31FF}'   // kana, bopomofo, CJK strokes
        | '\u{3400}'..='\u{4DBF}'   // CJK extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK unified ideographs
        | '\u{AC00}'..='\u{D7AF}'   // Hangul syllables
        | '\u{F900}'..='\u{FAFF}'   // CJK compatibility ideographs
        | '\u{20000}'..='\u{2FA1F}')
}

fn is_unicode_punctuation(ch: char) -> bool {
    matches!(ch,
        '\u{00A0}'..='\u{00BF}'
        | '\u{00D7}'
        | '\u{00F7}'
        | '\u{2000}'..='\u{206F}'   // general punctuation
        | '\u{2190}'..='\u{23FF}'   // arrows, math operators, technical
        | '\u{3000}'..='\u{303F}'   // CJK symbols and punctuation
        | '\u{FF00}'..='\u{FF0F}'
        | '\u{FF1A}'..='\u{FF20}'
        | '\u{FF3B}'..='\u{FF40}'
        | '\u{FF5B}'..='\u{FF65}')
}

fn classify(ch: char) -> CharClass {
    match ch {
        ' ' | '\t' => CharClass::Whitespace,
        c if c.is_ascii_alphanumeric() || c == '_' => CharClass::Text,
        c if c.is_ascii() => CharClass::Single,
        c if is_unspaced_script(c) || is_unicode_punctuation(c) => CharClass::Single,
        _ => CharClass::Text,
    }
}

/// Splits a line into [`Word`]s.
///
/// Whitespace at the very start of the line becomes one token of its own.
pub fn tokenize(line: &str) -> Vec<Word> {
    let mut words: Vec<Word> = Vec::new();
    // None until the first non-whitespace character
    let mut previous: Option<CharClass> = None;
    for ch in line.chars() {
        let class = classify(ch);
        let indent = previous.is_none() && class == CharClass::Whitespace;
        let joins = match class {
            CharClass::Whitespace => true,
            CharClass::Text => previous == Some(CharClass::Text),
            CharClass::Single => false,
        };
        if !indent {
            previous = Some(class);
        }

        if joins {
            if let Some(word) = words.last_mut() {
                if class == CharClass::Whitespace && !indent {
                    word.trailing.push(ch);
                } else {
                    word.body.push(ch);
                }
                continue;
            }
        }
        let mut body = CompactString::default();
        body.push(ch);
        words.push(Word {
            body,
            trailing: CompactString::default(),
        });
    }
    words
}

/// Word-level diff of a changed line pair.
#[derive(Debug, Clone)]
pub struct WordDiff {
    pub left: Vec<Word>,
    pub right: Vec<Word>,
    pub hunks: Vec<Hunk>,
}

impl WordDiff {
    pub fn new(left: &str, right: &str) -> Self {
        let left = tokenize(left);
        let right = tokenize(right);
        let hunks = diff::diff(&left, &right);
        Self { left, right, hunks }
    }

    fn write_side(&self, out: &mut String, left_side: bool) {
        let words = if left_side { &self.left } else { &self.right };
        for hunk in &self.hunks {
            let range = if left_side {
                hunk.left.clone()
            } else {
                hunk.right.clone()
            };
            if range.is_empty() {
                continue;
            }
            if !hunk.same {
                out.push_str("<span class='diffchange diffchange-inline'>");
            }
            for word in &words[range] {
                out.push_str(&html_escape::encode_text(&word.body));
                out.push_str(&html_escape::encode_text(&word.trailing));
            }
            if !hunk.same {
                out.push_str("</span>");
            }
        }
    }
}

/// One displayed row of a rendered diff. Indices are line numbers on each
/// side, zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffRow {
    /// Start of a displayed block (after a gap or at the top).
    Header { left: usize, right: usize },
    Context { left: usize, right: usize },
    Changed { left: usize, right: usize },
    Deleted { left: usize },
    Added { right: usize },
}

#[derive(Debug, Clone)]
pub struct WikiDiff {
    left: Vec<String>,
    right: Vec<String>,
    hunks: Vec<Hunk>,
    context_lines: usize,
}

impl WikiDiff {
    pub fn new(left_text: &str, right_text: &str, context_lines: usize) -> Self {
        let left = diff::split_lines(left_text);
        let right = diff::split_lines(right_text);
        let hunks = diff::diff_lines(&left, &right);
        Self {
            left: left.into_iter().map(str::to_owned).collect(),
            right: right.into_iter().map(str::to_owned).collect(),
            hunks,
            context_lines,
        }
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn left_lines(&self) -> &[String] {
        &self.left
    }

    pub fn right_lines(&self) -> &[String] {
        &self.right
    }

    pub fn has_changes(&self) -> bool {
        self.hunks.iter().any(|hunk| !hunk.same)
    }

    /// Lays the hunks out as rows, keeping at most `context_lines` unchanged
    /// lines on either side of each change.
    pub fn rows(&self) -> Vec<DiffRow> {
        let mut rows = Vec::new();
        let Some(last) = self.hunks.len().checked_sub(1) else {
            return rows;
        };
        let context = self.context_lines;
        let mut need_header = true;

        for (idx, hunk) in self.hunks.iter().enumerate() {
            if hunk.same {
                let len = hunk.left.len();
                let lead = if idx == 0 { 0 } else { context.min(len) };
                let trail = if idx == last {
                    0
                } else {
                    context.min(len - lead)
                };
                for k in 0..lead {
                    rows.push(DiffRow::Context {
                        left: hunk.left.start + k,
                        right: hunk.right.start + k,
                    });
                }
                if lead + trail < len {
                    need_header = true;
                }
                if trail > 0 {
                    if need_header {
                        rows.push(DiffRow::Header {
                            left: hunk.left.end - trail,
                            right: hunk.right.end - trail,
                        });
                        need_header = false;
                    }
                    for k in (len - trail)..len {
                        rows.push(DiffRow::Context {
                            left: hunk.left.start + k,
                            right: hunk.right.start + k,
                        });
                    }
                }
                continue;
            }

            if need_header {
                rows.push(DiffRow::Header {
                    left: hunk.left.start,
                    right: hunk.right.start,
                });
                need_header = false;
            }
            let paired = hunk.left.len().min(hunk.right.len());
            for k in 0..paired {
                rows.push(DiffRow::Changed {
                    left: hunk.left.start + k,
                    right: hunk.right.start + k,
                });
            }
            for left in (hunk.left.start + paired)..hunk.left.end {
                rows.push(DiffRow::Deleted { left });
            }
            for right in (hunk.right.start + paired)..hunk.right.end {
                rows.push(DiffRow::Added { right });
            }
        }
        rows
    }

    /// Renders the rows as a MediaWiki-style four-column diff table body.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for row in self.rows() {
            match row {
                DiffRow::Header { left, right } => {
                    let _ = writeln!(
                        out,
                        "<tr><td colspan='2' class='diff-lineno'>Line {}:</td>\
                         <td colspan='2' class='diff-lineno'>Line {}:</td></tr>",
                        left + 1,
                        right + 1
                    );
                }
                DiffRow::Context { left, right } => {
                    let _ = writeln!(
                        out,
                        "<tr><td class='diff-marker'>&#160;</td><td class='diff-context'>{}</td>\
                         <td class='diff-marker'>&#160;</td><td class='diff-context'>{}</td></tr>",
                        html_escape::encode_text(&self.left[left]),
                        html_escape::encode_text(&self.right[right])
                    );
                }
                DiffRow::Changed { left, right } => {
                    let words = WordDiff::new(&self.left[left], &self.right[right]);
                    out.push_str("<tr><td class='diff-marker'>−</td><td class='diff-deletedline'>");
                    words.write_side(&mut out, true);
                    out.push_str("</td><td class='diff-marker'>+</td><td class='diff-addedline'>");
                    words.write_side(&mut out, false);
                    out.push_str("</td></tr>\n");
                }
                DiffRow::Deleted { left } => {
                    let _ = writeln!(
                        out,
                        "<tr><td class='diff-marker'>−</td><td class='diff-deletedline'>{}</td>\
                         <td colspan='2' class='diff-empty'>&#160;</td></tr>",
                        html_escape::encode_text(&self.left[left])
                    );
                }
                DiffRow::Added { right } => {
                    let _ = writeln!(
                        out,
                        "<tr><td colspan='2' class='diff-empty'>&#160;</td>\
                         <td class='diff-marker'>+</td><td class='diff-addedline'>{}</td></tr>",
                        html_escape::encode_text(&self.right[right])
                    );
                }
            }
        }
        out
    }

    fn check_left(&self, index: usize) -> Result<(), DiffError> {
        if index < self.left.len() {
            Ok(())
        } else {
            Err(DiffError::LeftOutOfRange {
                index,
                len: self.left.len(),
            })
        }
    }

    fn check_right(&self, index: usize, allow_end: bool) -> Result<(), DiffError> {
        if index < self.right.len() || (allow_end && index == self.right.len()) {
            Ok(())
        } else {
            Err(DiffError::RightOutOfRange {
                index,
                len: self.right.len(),
            })
        }
    }

    /// Right text with line `right` replaced by left line `left`.
    pub fn undo_change(&self, left: usize, right: usize) -> Result<String, DiffError> {
        self.check_left(left)?;
        self.check_right(right, false)?;
        Ok(self.join_right(|idx, line| {
            Some(if idx == right {
                self.left[left].as_str()
            } else {
                line
            })
        }))
    }

    /// Right text without line `right`.
    pub fn undo_addition(&self, right: usize) -> Result<String, DiffError> {
        self.check_right(right, false)?;
        Ok(self.join_right(|idx, line| (idx != right).then_some(line)))
    }

    /// Right text with left line `left` re-inserted before right line `right`
    /// (or appended when `right` is the right side's length).
    pub fn undo_deletion(&self, left: usize, right: usize) -> Result<String, DiffError> {
        self.check_left(left)?;
        self.check_right(right, true)?;
        let mut lines: Vec<&str> = self.right.iter().map(String::as_str).collect();
        lines.insert(right, self.left[left].as_str());
        Ok(lines.join(LINE_SEPARATOR))
    }

    fn join_right<'a>(&'a self, mut map: impl FnMut(usize, &'a str) -> Option<&'a str>) -> String {
        self.right
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| map(idx, line.as_str()))
            .collect::<Vec<_>>()
            .join(LINE_SEPARATOR)
    }
}
