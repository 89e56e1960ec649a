use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{fixed, fixed_cow, replace_table, until_stable, Fixed};
use crate::utils::{case_insensitive_first, first_letter_case_insensitive_eq, trim_in_place};

static SYNTAX_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // external links wrapped in wikilink brackets
        (
            r"\[\[((?:https?|ftp)://[^\[\]\s|]+)\s*\|\s*([^\[\]]+)\]\]",
            "[${1} ${2}]",
        ),
        (r"\[\[((?:https?|ftp)://[^\[\]\s|]+)\s+([^\[\]]+)\]\]", "[${1} ${2}]"),
        (r"\[\[((?:https?|ftp)://[^\[\]\s|]+)\]\]", "[${1}]"),
        // pipe used as the separator of an external link
        (r"\[((?:https?|ftp)://[^\[\]\s|]+)\s*\|\s*([^\[\]]+)\]", "[${1} ${2}]"),
        (r"\[\[([^\[\]|]+)\|\|([^\[\]]+)\]\]", "[[${1}|${2}]]"),
        (r"(?i)<b>([^<>\n]*)</b>", "'''${1}'''"),
        (r"(?i)<i>([^<>\n]*)</i>", "''${1}''"),
        (r"(?i)</br\s*>|<br\s*[\\.]\s*>|<\\br\s*>", "<br />"),
        (r"(?m)^-{5,}[ \t]*$", "----"),
        (r"\bISBN(?:-1[03])?\s*:\s*(\d)", "ISBN ${1}"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

pub(super) fn fix_syntax_table(text: &str) -> String {
    replace_table(text, &SYNTAX_TABLE)
}

static BR_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*br\s*/?\s*>(?:\s*<\s*/?\s*br\s*/?\s*>)+").unwrap()
});

/// Collapses runs of two or more `<br>` tags into a single line break.
///
/// A run at the very start or end of the text is removed entirely.
pub fn collapse_br_runs(text: &str) -> Fixed {
    let result = BR_RUN.replace_all(text, |caps: &Captures| {
        let Some(m) = caps.get(0) else {
            return String::new();
        };
        if text[..m.start()].trim().is_empty() || text[m.end()..].trim().is_empty() {
            String::new()
        } else {
            "\r\n".to_string()
        }
    });
    fixed_cow(text, result)
}

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(=+)([^=\n].*?)(=+)[ \t]*$").unwrap());

const HEADING_CASES: &[(&str, &str)] = &[
    ("see also", "See also"),
    ("external links", "External links"),
    ("external link", "External links"),
    ("further reading", "Further reading"),
    ("references", "References"),
    ("notes", "Notes"),
];

/// Normalises section headings.
///
/// Level one headings become level two, bold markup and trailing colons are
/// stripped, standard section names get their usual case and a leading
/// heading repeating the article title is dropped.
pub fn fix_headings(text: &str, title: &str) -> Fixed {
    fixed(text, until_stable(text, |text| fix_headings_once(text, title)))
}

fn fix_headings_once(text: &str, title: &str) -> String {
    let result = HEADING.replace_all(text, |caps: &Captures| {
        let whole = &caps[0];
        let (open, inner, close) = (&caps[1], &caps[2], &caps[3]);
        if open.len() != close.len() {
            return whole.to_string();
        }
        let level = open.len().max(2);
        let spaced = inner.starts_with([' ', '\t']);

        let mut name = inner.trim();
        if name.len() > 6 && name.starts_with("'''") && name.ends_with("'''") {
            let stripped = &name[3..name.len() - 3];
            if !stripped.contains("'''") {
                name = stripped.trim();
            }
        }
        let name = name.strip_suffix(':').unwrap_or(name).trim_end();
        // the closing markers would swallow a trailing `=`
        if name.ends_with('=') {
            return whole.to_string();
        }
        let name = HEADING_CASES
            .iter()
            .find(|(lower, _)| name.eq_ignore_ascii_case(lower))
            .map_or(name, |&(_, proper)| proper);

        let eq = "=".repeat(level);
        let sp = if spaced { " " } else { "" };
        format!("{eq}{sp}{name}{sp}{eq}")
    });

    let mut result = result.into_owned();
    if let Some(caps) = HEADING.captures(result.trim_start()) {
        let offset = result.len() - result.trim_start().len();
        let heading = caps.get(0).map_or(0..0, |m| m.range());
        if heading.start == 0
            && first_letter_case_insensitive_eq(caps[2].trim(), title)
        {
            result.replace_range(offset..offset + heading.end, "");
            result = trim_in_place(result);
        }
    }
    result
}

static TEMPERATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d)\s*(?:º|°|&deg;|&ordm;)\s*([CcFf])\b").unwrap()
});

/// `5 º c` → `5°C`
pub fn fix_temperatures(text: &str) -> Fixed {
    let result = TEMPERATURE.replace_all(text, |caps: &Captures| {
        format!("{}°{}", &caps[1], caps[2].to_ascii_uppercase())
    });
    fixed(text, result)
}

static NBSP_ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)&nbsp;").unwrap());
static NUMBER_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+(?:\.\d+)?) (km|kg|cm|mm|m|mi|ft|lb|kW|MW|mph|km/h|km²|m²)\b").unwrap()
});

/// Lower-cases `&NBSP;` and binds numbers to their units with `&nbsp;`.
pub fn fix_non_breaking_spaces(text: &str) -> Fixed {
    let result = NBSP_ENTITY.replace_all(text, "&nbsp;");
    let result = NUMBER_UNIT.replace_all(&result, "${1}&nbsp;${2}");
    fixed(text, result)
}

static DASH_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(\w) +-- +(\w)", "${1}—${2}"),
        (r"\b(pp?\.\s*)(\d+)\s*-\s*(\d+)\b", "${1}${2}–${3}"),
        (r"\((\d{4})\s*-\s*(\d{4})\)", "(${1}–${2})"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

/// Double hyphens to em dashes, page and year ranges to en dashes.
pub fn mdashes(text: &str) -> Fixed {
    fixed(text, replace_table(text, &DASH_TABLE))
}

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap()
});

/// Characters that must stay encoded because they are wiki or HTML syntax,
/// or invisible once decoded.
fn keep_encoded(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || "[]{}|<>&'\"=*#:;~_".contains(c)
        || matches!(c, '\u{00AD}' | '\u{200B}'..='\u{200F}' | '\u{2028}'..='\u{202E}' | '\u{2060}'..='\u{206F}' | '\u{FE00}'..='\u{FE0F}' | '\u{FEFF}')
}

/// Replaces HTML entities by the characters they encode.
pub fn unicodify(text: &str) -> Fixed {
    let result = ENTITY.replace_all(text, |caps: &Captures| {
        let entity = &caps[0];
        let decoded = html_escape::decode_html_entities(entity);
        let mut chars = decoded.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if decoded != entity && !keep_encoded(c) => c.to_string(),
            _ => entity.to_string(),
        }
    });
    fixed(text, result)
}

static TRAILING_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)[ \t]+(\r?)$").unwrap());
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\r?\n){2,}").unwrap());

/// Strips trailing whitespace from lines, collapses runs of blank lines and
/// trims the text.
pub fn remove_whitespace(text: &str) -> Fixed {
    let result = TRAILING_WHITESPACE.replace_all(text, "${1}");
    let result = BLANK_LINES.replace_all(&result, "\n\n");
    fixed(text, trim_in_place(result.into_owned()))
}

static FIRST_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^==").unwrap());

/// Lines of the lead that are not prose.
fn is_prose_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && ![
            "{{", "}}", "{|", "|", "!", "[[File:", "[[Image:", ":", "*", "#", ";", "<", "⌊",
        ]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Bolds the title in the lead section when the lead has no bold text yet.
///
/// A self-link in the lead is turned into bold text, otherwise the first
/// occurrence of the title in the first prose line is emboldened.
pub fn embolden_titles(text: &str, title: &str) -> Fixed {
    let title = title.trim();
    if title.is_empty() {
        return (text.to_string(), false);
    }
    let lead_end = FIRST_HEADING.find(text).map_or(text.len(), |m| m.start());
    let lead = &text[..lead_end];
    if lead.contains("'''") {
        return (text.to_string(), false);
    }

    let pattern = case_insensitive_first(title);
    if let Ok(self_link) = Regex::new(&format!(
        r"\[\[\s*({pattern})\s*\]\]|\[\[\s*{pattern}\s*\|([^\[\]|]+)\]\]"
    )) {
        if let Some(caps) = self_link.captures(lead) {
            let (Some(whole), Some(shown)) = (caps.get(0), caps.get(1).or_else(|| caps.get(2)))
            else {
                return (text.to_string(), false);
            };
            let mut result = text.to_string();
            result.replace_range(whole.range(), &format!("'''{}'''", shown.as_str()));
            return fixed(text, result);
        }
    }

    let word_start = if title.starts_with(char::is_alphanumeric) { r"\b" } else { "" };
    let word_end = if title.ends_with(char::is_alphanumeric) { r"\b" } else { "" };
    let Ok(occurrence) = Regex::new(&format!("{word_start}{pattern}{word_end}")) else {
        return (text.to_string(), false);
    };

    let mut offset = 0;
    for line in lead.split_inclusive('\n') {
        if !is_prose_line(line) {
            offset += line.len();
            continue;
        }
        for found in occurrence.find_iter(line) {
            let before = &line[..found.start()];
            let in_link = before.matches("[[").count() > before.matches("]]").count();
            let in_template = before.matches("{{").count() > before.matches("}}").count();
            if in_link || in_template {
                continue;
            }
            let mut result = text.to_string();
            let range = offset + found.start()..offset + found.end();
            result.replace_range(range, &format!("'''{}'''", found.as_str()));
            return fixed(text, result);
        }
        break;
    }
    (text.to_string(), false)
}
