use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{fixed, until_stable, Fixed};
use crate::utils::{case_insensitive_first, first_letter_case_insensitive_eq};

static LINK_TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[((?:[^\[\]|]*\|)?[^\[\]]*?[^\[\]\s])[ ]+\]\][ ]?").unwrap()
});
static LINK_LEADING_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ ]?\[\[[ ]+([^\[\]]*?)\]\]").unwrap());
static LINK_TARGET_DOUBLE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\[\]|\n]*  [^\[\]|\n]*[|\]]").unwrap());
static MULTIPLE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Moves whitespace at the edges of a wikilink outside of the brackets and
/// collapses repeated spaces in link targets. Links to a section of the
/// article itself are shortened to `[[#Section]]`.
pub fn fix_link_whitespace(text: &str, title: &str) -> Fixed {
    let self_section = if title.is_empty() {
        None
    } else {
        Regex::new(&format!(
            r"\[\[\s*{}\s*(#[^\[\]|]+)(\|[^\[\]]*)?\]\]",
            case_insensitive_first(title)
        ))
        .ok()
    };
    let result = until_stable(text, |text| {
        let result = link_edge_whitespace(text);
        match &self_section {
            Some(self_section) => self_section.replace_all(&result, "[[${1}${2}]]").into_owned(),
            None => result,
        }
    });
    fixed(text, result)
}

fn link_edge_whitespace(text: &str) -> String {
    let result = LINK_TRAILING_SPACE.replace_all(text, "[[${1}]] ");

    let result = LINK_LEADING_SPACE.replace_all(&result, |caps: &Captures| {
        let start = caps.get(0).map_or(0, |m| m.start());
        let before = &result[..start];
        let at_line_start = before.is_empty() || before.ends_with('\n');
        // a space at the start of a line would turn the line into preformatted text
        if at_line_start && !caps[0].starts_with(' ') {
            format!("[[{}]]", &caps[1])
        } else {
            format!(" [[{}]]", &caps[1])
        }
    });

    LINK_TARGET_DOUBLE_SPACE
        .replace_all(&result, |caps: &Captures| MULTIPLE_SPACES.replace_all(&caps[0], " ").into_owned())
        .into_owned()
}

static UNDERSCORE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]|{}]*_[^\[\]|{}]*)(\||\]\])").unwrap());
static ENCODED_SPACE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]|{}]*%20[^\[\]|{}]*)(\||\]\])").unwrap());

/// Repairs bad link targets: underscores and `%20` become spaces, and links
/// to the article itself are unlinked.
pub fn fix_links(text: &str, title: &str) -> Fixed {
    let self_link = if title.is_empty() {
        None
    } else {
        Regex::new(&format!(
            r"\[\[\s*{}\s*(?:\|([^\[\]|]*))?\]\]",
            case_insensitive_first(title)
        ))
        .ok()
    };
    let result = until_stable(text, |text| {
        let result = repair_link_targets(text);
        match &self_link {
            Some(self_link) => self_link
                .replace_all(&result, |caps: &Captures| match caps.get(1) {
                    Some(text) => text.as_str().to_string(),
                    None => caps[0].trim_start_matches("[[").trim_end_matches("]]").trim().to_string(),
                })
                .into_owned(),
            None => result,
        }
    });
    fixed(text, result)
}

fn repair_link_targets(text: &str) -> String {
    let result = UNDERSCORE_TARGET.replace_all(text, |caps: &Captures| {
        let target = &caps[1];
        if target.contains("://") {
            return caps[0].to_string();
        }
        format!("[[{}{}", target.replace('_', " "), &caps[2])
    });
    ENCODED_SPACE_TARGET
        .replace_all(&result, |caps: &Captures| {
            format!("[[{}{}", caps[1].replace("%20", " "), &caps[2])
        })
        .into_owned()
}

static PIPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]|:#]+)\|([^\[\]|]+)\]\]").unwrap());

/// Unpipes links whose text repeats the target:
/// `[[Foo|foo]]` → `[[foo]]`, `[[Foo|Foos]]` → `[[Foo]]s`.
pub fn simplify_links(text: &str) -> Fixed {
    let result = PIPED_LINK.replace_all(text, |caps: &Captures| {
        let (target, label) = (&caps[1], &caps[2]);
        if target.trim() != target || label.trim() != label {
            return caps[0].to_string();
        }
        if first_letter_case_insensitive_eq(target, label) {
            return format!("[[{label}]]");
        }

        // label = target + a lower case suffix
        let target_chars = target.chars().count();
        let split = label
            .char_indices()
            .nth(target_chars)
            .map(|(index, _)| index);
        if let Some(split) = split {
            let (prefix, suffix) = label.split_at(split);
            if first_letter_case_insensitive_eq(prefix, target)
                && suffix.chars().all(|c| c.is_ascii_lowercase())
            {
                return format!("[[{prefix}]]{suffix}");
            }
        }
        caps[0].to_string()
    });
    fixed(text, result)
}

static PIPED_LINK_AND_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|:#]+)\|([^\[\]|]+)\]\] ([^\s\[\]{}<>|.,;:!?']+)").unwrap()
});

/// `[[Russian literature|Russian]] literature` → `[[Russian literature]]`
pub fn sticky_links(text: &str) -> Fixed {
    let result = PIPED_LINK_AND_WORD.replace_all(text, |caps: &Captures| {
        let (target, label, word) = (&caps[1], &caps[2], &caps[3]);
        let joined = format!("{label} {word}");
        if first_letter_case_insensitive_eq(target, &joined) {
            format!("[[{joined}]]")
        } else {
            caps[0].to_string()
        }
    });
    fixed(text, result)
}

static EMPTY_LINK_OR_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[ \t]*\|?[ \t]*\]\]|\{\{[ \t]*\|?[ \t]*\}\}").unwrap());

/// Removes `[[]]`, `[[|]]`, `{{}}` and `{{|}}`.
pub fn fix_empty_links_and_templates(text: &str) -> Fixed {
    let result = until_stable(text, |text| EMPTY_LINK_OR_TEMPLATE.replace_all(text, "").into_owned());
    fixed(text, result)
}

static EXTERNAL_LINKS_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^==+[ \t]*External[ \t]+links?[ \t]*==+[ \t]*\r?$").unwrap()
});
static NEXT_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^==").unwrap());
static UNBULLETED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(\[(?:https?|ftp)://)").unwrap());

/// Adds `* ` in front of bare external links in the "External links" section.
pub fn bullet_external_links(text: &str) -> Fixed {
    let Some(heading) = EXTERNAL_LINKS_HEADING.find(text) else {
        return (text.to_string(), false);
    };
    let section_start = heading.end();
    let section_end = NEXT_HEADING
        .find_at(text, section_start)
        .map_or(text.len(), |m| m.start());

    let section = &text[section_start..section_end];
    let bulleted = UNBULLETED_LINK.replace_all(section, "* ${1}");

    let mut result = String::with_capacity(text.len() + 8);
    result.push_str(&text[..section_start]);
    result.push_str(&bulleted);
    result.push_str(&text[section_end..]);
    fixed(text, result)
}

static MAIN_ARTICLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^:?[ \t]*(?:'')?[ \t]*Main[ \t]+article:[ \t]*\[\[([^\[\]|]+)\]\]\.?[ \t]*(?:'')?[ \t]*$").unwrap()
});
static FURTHER_INFORMATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^:?[ \t]*(?:'')?[ \t]*Further[ \t]+information:[ \t]*\[\[([^\[\]|]+)\]\]\.?[ \t]*(?:'')?[ \t]*$").unwrap()
});

/// Hand-written hatnotes to `{{Main|…}}` and `{{Further|…}}`.
pub fn fix_main_article(text: &str) -> Fixed {
    let result = MAIN_ARTICLE.replace_all(text, "{{Main|${1}}}");
    let result = FURTHER_INFORMATION.replace_all(&result, "{{Further|${1}}}");
    fixed(text, result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnbalancedBracket {
    /// Byte offset of the offending bracket.
    pub position: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bracket {
    DoubleSquare,
    DoubleCurly,
    Square,
}

impl Bracket {
    fn len(self) -> usize {
        match self {
            Bracket::Square => 1,
            _ => 2,
        }
    }
}

/// Finds the first `[[`/`]]`, `{{`/`}}` or `[`/`]` without a partner.
///
/// Single curly braces are ignored (table syntax, template parameters).
pub fn unbalanced_brackets(text: &str) -> Option<UnbalancedBracket> {
    let bytes = text.as_bytes();
    let mut stack: Vec<(Bracket, usize)> = Vec::new();
    let unbalanced = |(bracket, position): (Bracket, usize)| UnbalancedBracket {
        position,
        length: bracket.len(),
    };

    let mut i = 0;
    while i < bytes.len() {
        let pair = bytes.get(i..i + 2);
        let top = stack.last().map(|(bracket, _)| *bracket);
        match (pair, bytes[i]) {
            (Some(b"[["), _) => {
                stack.push((Bracket::DoubleSquare, i));
                i += 2;
            }
            (Some(b"{{"), _) => {
                stack.push((Bracket::DoubleCurly, i));
                i += 2;
            }
            (Some(b"]]"), _) if top == Some(Bracket::DoubleSquare) => {
                stack.pop();
                i += 2;
            }
            (Some(b"}}"), _) => {
                if top != Some(Bracket::DoubleCurly) {
                    return Some(match stack.pop() {
                        Some(open) => unbalanced(open),
                        None => UnbalancedBracket { position: i, length: 2 },
                    });
                }
                stack.pop();
                i += 2;
            }
            (_, b'[') => {
                stack.push((Bracket::Square, i));
                i += 1;
            }
            (_, b']') => match top {
                Some(Bracket::Square) => {
                    stack.pop();
                    i += 1;
                }
                None => return Some(UnbalancedBracket { position: i, length: 1 }),
                Some(_) => return stack.pop().map(unbalanced),
            },
            _ => i += 1,
        }
    }
    stack.pop().map(unbalanced)
}
