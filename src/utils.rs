use std::borrow::Cow;
use std::sync::LazyLock;

use memchr::memmem;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::profile::WikiProfile;

macro_rules! finder {
    ($needle:expr) => {{
        static FINDER: std::sync::LazyLock<memchr::memmem::Finder> =
            std::sync::LazyLock::new(|| memchr::memmem::Finder::new($needle.as_bytes()));
        &FINDER
    }};
}

/// Replace all occurrences of `from` with `to` in `input`.
///
/// Returns the input unchanged (and without allocating) when nothing matches,
/// together with a flag telling whether any replacement was made.
///
/// # Panics
///
/// Might panic if `from` was not created from valid UTF-8.
pub fn str_replace_opt(input: String, from: &memmem::Finder, to: &str) -> (String, bool) {
    let mut result = String::new();
    let mut last_end = 0;
    for start in from.find_iter(input.as_bytes()) {
        if last_end == 0 {
            result.reserve(input.len());
        }
        // string indexing could panic if the Finder is not valid UTF-8
        result.push_str(&input[last_end..start]);
        result.push_str(to);
        last_end = start + from.needle().len();
    }

    if last_end == 0 {
        (input, false)
    } else {
        result.push_str(&input[last_end..]);
        (result, true)
    }
}

fn trim_end_in_place(s: &mut String) {
    let trimmed = s.trim_end();
    s.truncate(trimmed.len());
}

fn trim_start_in_place(s: &mut String) {
    let trimmed = s.trim_start();
    s.replace_range(..(s.len() - trimmed.len()), "");
}

pub fn trim_in_place(mut input: String) -> String {
    trim_end_in_place(&mut input);
    trim_start_in_place(&mut input);
    input
}

pub fn to_lowercase(c: char) -> String {
    let mut result = String::with_capacity(4);
    match unicode_case_mapping::to_lowercase(c) {
        [0, 0] => result.push(c),
        [l, 0] => result.extend(char::from_u32(l)),
        [l, l2] => {
            result.extend(char::from_u32(l));
            result.extend(char::from_u32(l2));
        }
    }
    result
}

pub fn turn_first_to_upper(input: &str) -> Cow<'_, str> {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) if !first.is_uppercase() && first.to_uppercase().next() != Some(first) => {
            let mut result: String = first.to_uppercase().collect();
            result.push_str(chars.as_str());
            Cow::Owned(result)
        }
        _ => Cow::Borrowed(input),
    }
}

/// Wiki page names are case-insensitive in their first letter only.
pub fn first_letter_case_insensitive_eq(a: &str, b: &str) -> bool {
    turn_first_to_upper(a) == turn_first_to_upper(b)
}

/// Regex fragment matching `input` literally, with the first letter in either case.
pub fn case_insensitive_first(input: &str) -> String {
    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let upper: String = first.to_uppercase().collect();
    let lower = to_lowercase(first);
    if upper == lower {
        regex::escape(input)
    } else {
        format!(
            "(?:{}|{}){}",
            regex::escape(&upper),
            regex::escape(&lower),
            regex::escape(chars.as_str())
        )
    }
}

/// Strips accents and folds letters that have no canonical decomposition.
pub fn remove_diacritics(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        match c {
            'ø' => result.push('o'),
            'Ø' => result.push('O'),
            'ł' => result.push('l'),
            'Ł' => result.push('L'),
            'đ' => result.push('d'),
            'Đ' => result.push('D'),
            'ß' => result.push_str("ss"),
            'æ' => result.push_str("ae"),
            'Æ' => result.push_str("Ae"),
            'œ' => result.push_str("oe"),
            'Œ' => result.push_str("Oe"),
            'þ' => result.push_str("th"),
            'Þ' => result.push_str("Th"),
            'ı' => result.push('i'),
            _ => result.push(c),
        }
    }
    result
}

/// Sort key for a biography: "John Fitzgerald Kennedy" → "Kennedy, John Fitzgerald".
pub fn make_human_cat_key(name: &str) -> String {
    static DISAMBIGUATOR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s*\([^()]*\)\s*$").unwrap());
    static SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r",?\s+((?:[JS]r\.?)|(?:I{1,3}|IV|VI{0,3}))$").unwrap()
    });

    let name = DISAMBIGUATOR.replace(name, "");
    let name = remove_diacritics(name.trim());

    // already in "Last, First" form
    if name.contains(',') && !SUFFIX.is_match(&name) {
        return name;
    }

    let (name, suffix) = match SUFFIX.captures(&name) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            (
                name[..whole.start].to_string(),
                caps.get(1).map(|m| m.as_str().to_string()),
            )
        }
        None => (name.clone(), None),
    };

    let mut result = match name.rsplit_once(' ') {
        Some((given, last)) => format!("{}, {}", last, given.trim()),
        None => name,
    };
    if let Some(suffix) = suffix {
        result.push_str(", ");
        result.push_str(&suffix);
    }
    result
}

/// Title without its namespace prefix.
pub fn page_name<'a>(title: &'a str, profile: &WikiProfile) -> &'a str {
    match profile.namespace_of(title) {
        Some(_) => title.split_once(':').map_or(title, |(_, rest)| rest.trim_start()),
        None => title,
    }
}

pub fn base_page_name<'a>(title: &'a str, profile: &WikiProfile) -> &'a str {
    let name = page_name(title, profile);
    name.split_once('/').map_or(name, |(base, _)| base)
}

pub fn sub_page_name<'a>(title: &'a str, profile: &WikiProfile) -> &'a str {
    let name = page_name(title, profile);
    name.rsplit_once('/').map_or(name, |(_, sub)| sub)
}

/// Expands the `%%…%%` title keywords of a find or replace template.
///
/// When `escape` is set, expanded values are regex-escaped so that they can
/// be spliced into a pattern.
pub fn apply_keywords(title: &str, text: &str, escape: bool, profile: &WikiProfile) -> String {
    if finder!("%%").find(text.as_bytes()).is_none() {
        return text.to_string();
    }

    let pagename = page_name(title, profile);
    let values = [
        ("%%title%%", title.to_string()),
        ("%%fullpagename%%", title.to_string()),
        ("%%pagename%%", pagename.to_string()),
        ("%%basepagename%%", base_page_name(title, profile).to_string()),
        ("%%subpagename%%", sub_page_name(title, profile).to_string()),
        (
            "%%namespace%%",
            profile.namespace_of(title).unwrap_or_default().to_string(),
        ),
        ("%%key%%", make_human_cat_key(pagename)),
    ];

    let mut result = text.to_string();
    for (keyword, value) in values {
        let value = if escape {
            fancy_regex::escape(&value).into_owned()
        } else {
            value
        };
        (result, _) = str_replace_opt(result, &memmem::Finder::new(keyword), &value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_replace_opt() {
        let (text, replaced) = str_replace_opt("a&NBSP;b".to_string(), finder!("&NBSP;"), "&nbsp;");
        assert!(replaced);
        assert_eq!(text, "a&nbsp;b");

        let (text, replaced) = str_replace_opt("nothing".to_string(), finder!("&NBSP;"), "&nbsp;");
        assert!(!replaced);
        assert_eq!(text, "nothing");
    }

    #[test]
    fn test_trim_in_place() {
        assert_eq!(trim_in_place("  \n text \r\n".to_string()), "text");
        assert_eq!(trim_in_place(String::new()), "");
    }

    #[test]
    fn test_first_letter_case() {
        assert_eq!(turn_first_to_upper("élan"), "Élan");
        assert!(first_letter_case_insensitive_eq("foo", "Foo"));
        assert!(!first_letter_case_insensitive_eq("foo", "FOO"));

        let re = Regex::new(&format!("^{}$", case_insensitive_first("Paris (city)"))).unwrap();
        assert!(re.is_match("paris (city)"));
        assert!(re.is_match("Paris (city)"));
        assert!(!re.is_match("PARIS (city)"));
    }

    #[test]
    fn test_remove_diacritics() {
        assert_eq!(remove_diacritics("Antonín Dvořák"), "Antonin Dvorak");
        assert_eq!(remove_diacritics("Søren Kierkegaard"), "Soren Kierkegaard");
        assert_eq!(remove_diacritics("Lech Wałęsa"), "Lech Walesa");
        assert_eq!(remove_diacritics("plain"), "plain");
    }

    #[test]
    fn test_make_human_cat_key() {
        assert_eq!(make_human_cat_key("John Smith"), "Smith, John");
        assert_eq!(make_human_cat_key("Antonín Dvořák"), "Dvorak, Antonin");
        assert_eq!(
            make_human_cat_key("John Fitzgerald Kennedy"),
            "Kennedy, John Fitzgerald"
        );
        assert_eq!(make_human_cat_key("John Smith (footballer)"), "Smith, John");
        assert_eq!(
            make_human_cat_key("Martin Luther King, Jr."),
            "King, Martin Luther, Jr."
        );
        assert_eq!(make_human_cat_key("Madonna"), "Madonna");
    }

    #[test]
    fn test_apply_keywords() {
        let profile = WikiProfile::default();
        assert_eq!(
            apply_keywords("Talk:Foo/Archive 1", "%%basepagename%%|%%subpagename%%|%%namespace%%", false, &profile),
            "Foo|Archive 1|Talk"
        );
        assert_eq!(apply_keywords("A.B", "%%title%%", true, &profile), r"A\.B");
        assert_eq!(apply_keywords("John Smith", "{{DEFAULTSORT:%%key%%}}", false, &profile), "{{DEFAULTSORT:Smith, John}}");
    }
}
