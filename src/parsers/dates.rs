use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use super::{fixed, replace_table, until_stable, Fixed, MONTHS};

fn compile_with_months(table: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    table
        .iter()
        .map(|(pattern, replacement)| {
            let pattern = pattern.replace("MONTH", MONTHS);
            (Regex::new(&pattern).unwrap(), *replacement)
        })
        .collect()
}

static DATES_A: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile_with_months(&[
        // "May, 2009"
        (r"\b(MONTH),[ \t]+(\d{4})\b", "${1} ${2}"),
        // "1990's"
        (r"\b(1\d|20)(\d0)'s\b", "${1}${2}s"),
        // "5-10 May", "May 5-10"
        (
            r"\b(\d{1,2})[ \t]*[-–][ \t]*(\d{1,2})[ \t]+(MONTH)\b",
            "${1}–${2} ${3}",
        ),
        (
            r"\b(MONTH)[ \t]+(\d{1,2})[ \t]*[-–][ \t]*(\d{1,2})\b",
            "${1} ${2}–${3}",
        ),
    ])
});

/// Date punctuation and range fixes. Runs on the unmasked text.
pub fn fix_dates_a(text: &str) -> Fixed {
    fixed(text, replace_table(text, &DATES_A))
}

static ORDINALS_AND_OF: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile_with_months(&[
        (r"\b(MONTH)[ \t]+of[ \t]+(\d{3,4})\b", "${1} ${2}"),
        (
            r"\b(\d{1,2})(?:st|nd|rd|th)?[ \t]+of[ \t]+(MONTH)\b",
            "${1} ${2}",
        ),
        (
            r"\b(MONTH)[ \t]+(\d{1,2})(?:st|nd|rd|th),?[ \t]+(\d{4})\b",
            "${1} ${2}, ${3}",
        ),
        (
            r"\b(\d{1,2})(?:st|nd|rd|th)[ \t]+(MONTH),?[ \t]+(\d{4})\b",
            "${1} ${2} ${3}",
        ),
    ])
});

static MONTH_IN_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\b(?:{MONTHS})\b")).unwrap());

/// Removes ordinals from full dates and "of" between day, month and year.
///
/// Articles whose title names a month are left alone.
pub fn fix_date_ordinals_and_of(text: &str, title: &str) -> Fixed {
    if MONTH_IN_TITLE.is_match(title) {
        return (text.to_string(), false);
    }
    fixed(text, replace_table(text, &ORDINALS_AND_OF))
}

static CITATION_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{[ \t]*(?:cite[ _][^|{}]*|citation)[ \t]*\|[^{}]*\}\}").unwrap()
});
static ISO_DATE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\|[ \t]*(?:access-?date|date|archive-?date)[ \t]*=[ \t]*)(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap()
});
static CITATION_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(\|[ \t]*)page([ \t]*=[ \t]*\d+[ \t]*[-–][ \t]*\d+)", "${1}pages${2}"),
        (r"(\|[ \t]*pages[ \t]*=[ \t]*)(\d+)[ \t]*-[ \t]*(\d+)\b", "${1}${2}–${3}"),
        (r"(\|[ \t]*url[ \t]*=[ \t]*)(www\.)", "${1}http://${2}"),
        (r"\|[ \t]*\|", "|"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

/// Repairs common citation template parameter problems: unpadded ISO
/// dates, `page=` holding a range, hyphens in page ranges, scheme-less URLs
/// and empty parameters.
pub fn fix_citation_templates(text: &str) -> Fixed {
    fixed(text, until_stable(text, repair_citation_templates))
}

fn repair_citation_templates(text: &str) -> String {
    CITATION_TEMPLATE
        .replace_all(text, |caps: &Captures| {
            let template = replace_table(&caps[0], &CITATION_TABLE);
            ISO_DATE_PARAM
                .replace_all(&template, |date: &Captures| {
                    let parsed = (
                        date[2].parse::<i32>(),
                        date[3].parse::<u32>(),
                        date[4].parse::<u32>(),
                    );
                    match parsed {
                        (Ok(year), Ok(month), Ok(day))
                            if NaiveDate::from_ymd_opt(year, month, day).is_some() =>
                        {
                            format!("{}{year:04}-{month:02}-{day:02}", &date[1])
                        }
                        _ => date[0].to_string(),
                    }
                })
                .into_owned()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::tests::assert_settles;
    use proptest::prelude::*;

    #[test]
    fn test_fix_dates_a() {
        let (text, changed) = fix_dates_a("In May, 2009 and the 1990's, 5-10 May, June 3 - 4");
        assert!(changed);
        assert_eq!(text, "In May 2009 and the 1990s, 5–10 May, June 3–4");
        assert!(!fix_dates_a(&text).1);
        assert!(!fix_dates_a("May 2009-10").1);
    }

    #[test]
    fn test_fix_date_ordinals_and_of() {
        let (text, changed) = fix_date_ordinals_and_of(
            "May of 2009, the 5th of May, March 5th, 2009, 1st January 2010",
            "Foo",
        );
        assert!(changed);
        assert_eq!(text, "May 2009, the 5 May, March 5, 2009, 1 January 2010");
        assert!(!fix_date_ordinals_and_of(&text, "Foo").1);
        assert!(!fix_date_ordinals_and_of("the 4th of July", "4th of July").1);
    }

    #[test]
    fn test_fix_citation_templates() {
        let (text, changed) = fix_citation_templates(
            "{{cite web |url=www.example.org |date=2009-5-3 |accessdate=2009-2-30 |page=12-14 || title=X}}",
        );
        assert!(changed);
        assert_eq!(
            text,
            "{{cite web |url=http://www.example.org |date=2009-05-03 |accessdate=2009-2-30 |pages=12–14 | title=X}}"
        );
        assert!(!fix_citation_templates(&text).1);
        // outside of citation templates nothing happens
        assert!(!fix_citation_templates("{{Infobox |date=2009-5-3}}").1);
    }

    proptest! {
        #[test]
        fn date_fixes_are_idempotent(
            input in "(May|June| |,|2009|5|10|-|–|of|th|1990|'s|\\{\\{cite web|\\||date=|2009-5-3|page=|12-14|url=|www\\.x|\\}\\}){0,24}"
        ) {
            let fixes: [(&str, &dyn Fn(&str) -> Fixed); 3] = [
                ("fix_dates_a", &fix_dates_a),
                ("fix_date_ordinals_and_of", &|text: &str| fix_date_ordinals_and_of(text, "Foo")),
                ("fix_citation_templates", &fix_citation_templates),
            ];
            for (name, fix) in fixes {
                assert_settles(name, fix, &input)?;
            }
        }
    }
}
