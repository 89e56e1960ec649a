use std::fmt;

/// MediaWiki rejects edit summaries longer than this many characters.
pub const MAX_SUMMARY_CHARS: usize = 500;

pub const ARROW: &str = " → ";

/// Ordered, de-duplicated list of summary fragments, joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditSummary {
    fragments: Vec<String>,
}

impl EditSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `fragment` unless it is blank or already present.
    pub fn push(&mut self, fragment: impl AsRef<str>) {
        let fragment = fragment.as_ref().trim();
        if fragment.is_empty() || self.fragments.iter().any(|f| f == fragment) {
            return;
        }
        self.fragments.push(fragment.to_string());
    }

    pub fn extend(&mut self, other: &EditSummary) {
        for fragment in &other.fragments {
            self.push(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// The joined summary, cut at a character boundary to fit `max_chars`.
    pub fn to_string_truncated(&self, max_chars: usize) -> String {
        let full = self.to_string();
        if full.chars().count() <= max_chars {
            return full;
        }
        let mut truncated: String = full.chars().take(max_chars.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}

impl fmt::Display for EditSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fragments.join(", "))
    }
}

/// The "replaced"/"removed" buckets filled by find-and-replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementSummary {
    replaced: EditSummary,
    removed: EditSummary,
}

impl ReplacementSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `before → after`, with the total match count in parentheses when above one.
    pub fn push_replaced(&mut self, before: &str, after: &str, count: usize) {
        self.replaced
            .push(format!("{before}{ARROW}{after}{}", count_suffix(count)));
    }

    pub fn push_removed(&mut self, removed: &str, count: usize) {
        self.removed.push(format!("{removed}{}", count_suffix(count)));
    }

    pub fn is_empty(&self) -> bool {
        self.replaced.is_empty() && self.removed.is_empty()
    }

    pub fn replaced(&self) -> &EditSummary {
        &self.replaced
    }

    pub fn removed(&self) -> &EditSummary {
        &self.removed
    }
}

impl fmt::Display for ReplacementSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(2);
        if !self.replaced.is_empty() {
            parts.push(format!("replaced: {}", self.replaced));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed: {}", self.removed));
        }
        write!(f, "{}", parts.join(", "))
    }
}

fn count_suffix(count: usize) -> String {
    if count > 1 {
        format!(" ({count})")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_and_order() {
        let mut summary = EditSummary::new();
        summary.push("typo fixing");
        summary.push("  ");
        summary.push("general fixes");
        summary.push("typo fixing ");
        assert_eq!(summary.to_string(), "typo fixing, general fixes");
    }

    #[test]
    fn test_buckets() {
        let mut summary = ReplacementSummary::new();
        assert_eq!(summary.to_string(), "");

        summary.push_removed("[[Category:Foo]]", 1);
        assert_eq!(summary.to_string(), "removed: [[Category:Foo]]");

        summary.push_replaced("Cat", "dog", 2);
        summary.push_replaced("colour", "color", 1);
        assert_eq!(
            summary.to_string(),
            "replaced: Cat → dog (2), colour → color, removed: [[Category:Foo]]"
        );
    }

    #[test]
    fn test_truncation() {
        let mut summary = EditSummary::new();
        summary.push("äbcdefgh");
        assert_eq!(summary.to_string_truncated(100), "äbcdefgh");
        assert_eq!(summary.to_string_truncated(4), "äbc…");
    }
}
