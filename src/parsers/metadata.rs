use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{fixed, Fixed, Parsers};
use crate::utils::{
    case_insensitive_first, first_letter_case_insensitive_eq, make_human_cat_key, page_name,
    remove_diacritics, turn_first_to_upper,
};

static DEFAULTSORT_VARIANTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{\s*(?:DEFAULTSORT(?:KEY)?|DEFAULTCATEGORYSORT)\s*[:|]\s*([^{}]*?)\s*\}\}")
        .unwrap()
});
static DEFAULTSORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{DEFAULTSORT:([^{}]*)\}\}").unwrap());
static PARAMETERLESS_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}|]*)\}\}").unwrap());
static INTERWIKI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([a-z]{2,3}(?:-[a-z]+)*|simple)[ \t]*:[ \t]*([^\[\]|]+)\]\]").unwrap()
});
static EXCESS_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\r?\n[ \t]*){2,}").unwrap());

/// Result of [`Parsers::change_to_default_sort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSortChange {
    pub text: String,
    pub changed: bool,
    /// A `{{DEFAULTSORT}}` was inserted, not just normalised.
    pub added: bool,
}

/// Removes `ranges` from `text`. A range that covered a whole line takes its
/// line break with it.
fn remove_ranges(text: &str, ranges: &[Range<usize>]) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for range in ranges {
        if range.start < last {
            continue;
        }
        let line_start = line_start(text, range.start);
        let own_line = text[line_start..range.start].trim().is_empty()
            && text[range.end..].split('\n').next().map_or(true, |rest| rest.trim().is_empty());
        if !own_line {
            result.push_str(&text[last..range.start]);
            last = range.end;
            continue;
        }
        match text[range.end..].find('\n') {
            Some(i) => {
                result.push_str(&text[last..line_start.max(last)]);
                last = range.end + i + 1;
            }
            // last line, take the preceding line break instead
            None => {
                let cut = line_start.saturating_sub(1).max(last);
                result.push_str(&text[last..cut]);
                last = text.len();
            }
        }
    }
    result.push_str(&text[last..]);
    result
}

fn line_start(text: &str, position: usize) -> usize {
    text[..position].rfind('\n').map_or(0, |i| i + 1)
}

/// Regex fragment for a page name with interchangeable spaces and underscores
/// and a case-insensitive first letter.
fn name_pattern(name: &str) -> String {
    case_insensitive_first(name.replace('_', " ").trim()).replace(' ', "[ _]+")
}

fn normalise_category_name(name: &str) -> String {
    let name = name.replace('_', " ");
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    turn_first_to_upper(&name).into_owned()
}

impl Parsers {
    fn category_key<'t>(caps: &Captures<'t>) -> Option<&'t str> {
        caps.get(2).map(|key| &key.as_str()[1..])
    }

    /// Canonical spelling of category links: namespace, spacing, first letter
    /// and empty sort keys.
    pub fn fix_categories(&self, text: &str) -> Fixed {
        let namespace = &self.profile.category_namespace;
        let result = self.category.replace_all(text, |caps: &Captures| {
            let name = normalise_category_name(&caps[1]);
            if name.is_empty() {
                return caps[0].to_string();
            }
            match Self::category_key(caps) {
                None | Some("") => format!("[[{namespace}:{name}]]"),
                Some(key) if key.trim().is_empty() => format!("[[{namespace}:{name}|{key}]]"),
                Some(key) => format!("[[{namespace}:{name}|{}]]", key.trim_end()),
            }
        });
        fixed(text, result)
    }

    /// Canonical case and spacing of the file namespace prefix.
    pub fn fix_images(&self, text: &str) -> Fixed {
        let result = self.file_prefix.replace_all(text, |caps: &Captures| {
            let written = &caps[1];
            let namespace = self
                .profile
                .file_namespaces
                .iter()
                .find(|ns| ns.eq_ignore_ascii_case(written))
                .map_or(written, |ns| ns.as_str());
            format!("[[{namespace}:")
        });
        fixed(text, result)
    }

    /// Start of the line holding the first category, `{{DEFAULTSORT}}` or stub template.
    pub(super) fn first_metadata_line(&self, text: &str) -> Option<usize> {
        let category = self.category.find(text).map(|m| m.start());
        let defaultsort = DEFAULTSORT_VARIANTS.find(text).map(|m| m.start());
        let stub = PARAMETERLESS_TEMPLATE
            .captures_iter(text)
            .find(|caps| self.stub.is_match(caps[1].trim()))
            .and_then(|caps| caps.get(0))
            .map(|m| m.start());
        [category, defaultsort, stub]
            .into_iter()
            .flatten()
            .min()
            .map(|position| line_start(text, position))
    }

    /// Normalises `{{DEFAULTSORT}}` and its aliases. When there is none, one
    /// is added if every category shares the same sort key, or if the title
    /// needs a sort key of its own (diacritics, biographies).
    pub fn change_to_default_sort(
        &self,
        text: &str,
        title: &str,
        restrict_addition: bool,
    ) -> DefaultSortChange {
        let normalised = DEFAULTSORT_VARIANTS
            .replace_all(text, "{{DEFAULTSORT:${1}}}")
            .into_owned();
        let keys: Vec<&str> = DEFAULTSORT
            .captures_iter(&normalised)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();

        let (result, added) = match keys.as_slice() {
            [] => match self.default_sort_to_add(&normalised, title, restrict_addition) {
                Some(key) => {
                    let position = self
                        .category
                        .find(&normalised)
                        .map_or(normalised.len(), |m| line_start(&normalised, m.start()));
                    let mut result = normalised.clone();
                    result.insert_str(position, &format!("{{{{DEFAULTSORT:{key}}}}}\n"));
                    (self.strip_sort_keys(&result, &key), true)
                }
                None => (normalised.clone(), false),
            },
            [key] => (self.strip_sort_keys(&normalised, key), false),
            // conflicting keys need a human
            _ => (normalised.clone(), false),
        };

        let (text, changed) = fixed(text, result);
        DefaultSortChange {
            text,
            changed,
            added,
        }
    }

    fn default_sort_to_add(&self, text: &str, title: &str, restrict: bool) -> Option<String> {
        if !self.profile.is_mainspace(title) {
            return None;
        }
        let keys: Vec<Option<&str>> = self
            .category
            .captures_iter(text)
            .map(|caps| Self::category_key(&caps))
            .collect();
        let first = keys.first()?;

        if let Some(common) = first {
            let usable = !common.trim().is_empty() && !common.starts_with([' ', '*']);
            if usable && keys.len() > 1 && keys.iter().all(|key| key == first) {
                return Some(common.trim_end().to_string());
            }
        }

        let name = page_name(title, &self.profile);
        let is_biography = self.persondata.is_match(text);
        if restrict && !is_biography {
            return None;
        }
        let key = if is_biography {
            make_human_cat_key(name)
        } else {
            remove_diacritics(name)
        };
        (key != name).then_some(key)
    }

    /// Drops category sort keys that repeat the `{{DEFAULTSORT}}` key.
    fn strip_sort_keys(&self, text: &str, default_key: &str) -> String {
        self.category
            .replace_all(text, |caps: &Captures| {
                let (Some(whole), Some(key)) = (caps.get(0), caps.get(2)) else {
                    return caps[0].to_string();
                };
                if key.as_str()[1..].trim() != default_key.trim() {
                    return caps[0].to_string();
                }
                let name_end = key.start() - whole.start();
                format!("{}]]", whole.as_str()[..name_end].trim_end())
            })
            .into_owned()
    }

    /// Moves `{{DEFAULTSORT}}`, categories, stub templates and interwiki
    /// links to the end of the article, in that order, dropping duplicate
    /// categories.
    pub fn sort_meta_data(&self, text: &str, title: &str) -> Fixed {
        if !self.profile.is_mainspace(title)
            || text.contains("<noinclude")
            || text.contains("<includeonly")
        {
            return (text.to_string(), false);
        }

        let defaultsorts: Vec<&str> = DEFAULTSORT_VARIANTS.find_iter(text).map(|m| m.as_str()).collect();
        if defaultsorts.windows(2).any(|pair| pair[0] != pair[1]) {
            return (text.to_string(), false);
        }

        let mut ranges = Vec::new();
        ranges.extend(DEFAULTSORT_VARIANTS.find_iter(text).map(|m| m.range()));

        let mut categories: Vec<&str> = Vec::new();
        let mut category_names: Vec<String> = Vec::new();
        for caps in self.category.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            ranges.push(whole.range());
            let name = normalise_category_name(&caps[1]);
            if !category_names.contains(&name) {
                category_names.push(name);
                categories.push(whole.as_str());
            }
        }

        let mut stubs: Vec<&str> = Vec::new();
        for caps in PARAMETERLESS_TEMPLATE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if self.stub.is_match(caps[1].trim()) {
                ranges.push(whole.range());
                stubs.push(whole.as_str());
            }
        }

        let mut interwikis: Vec<&str> = Vec::new();
        for caps in INTERWIKI.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if self.profile.is_interwiki_code(&caps[1]) {
                ranges.push(whole.range());
                interwikis.push(whole.as_str());
            }
        }

        if ranges.is_empty() {
            return (text.to_string(), false);
        }
        ranges.sort_by_key(|range| range.start);

        let body = remove_ranges(text, &ranges);
        let body = EXCESS_BLANK_LINES.replace_all(&body, "\n\n");

        let mut metadata: Vec<String> = Vec::with_capacity(3);
        let mut category_block: Vec<&str> = defaultsorts.first().copied().into_iter().collect();
        category_block.extend(categories);
        for block in [category_block, stubs, interwikis] {
            if !block.is_empty() {
                metadata.push(block.join("\n"));
            }
        }

        let body = body.trim_end();
        let result = if body.is_empty() {
            metadata.join("\n\n")
        } else {
            format!("{body}\n\n{}", metadata.join("\n\n"))
        };
        fixed(text, result)
    }

    fn find_category(&self, text: &str, name: &str) -> Vec<Range<usize>> {
        let name = normalise_category_name(name);
        self.category
            .captures_iter(text)
            .filter(|caps| normalise_category_name(&caps[1]) == name)
            .filter_map(|caps| caps.get(0).map(|m| m.range()))
            .collect()
    }

    /// Appends `[[Category:name]]` after the last category unless it is already present.
    pub fn add_category(&self, text: &str, name: &str) -> Fixed {
        let name = normalise_category_name(name);
        if name.is_empty() || !self.find_category(text, &name).is_empty() {
            return (text.to_string(), false);
        }
        let link = format!("[[{}:{name}]]", self.profile.category_namespace);
        let result = match self.category.find_iter(text).last() {
            Some(last) => {
                let mut result = text.to_string();
                result.insert_str(last.end(), &format!("\n{link}"));
                result
            }
            None => format!("{}\n\n{link}", text.trim_end()),
        };
        fixed(text, result)
    }

    pub fn remove_category(&self, text: &str, name: &str) -> Fixed {
        let ranges = self.find_category(text, name);
        if ranges.is_empty() {
            return (text.to_string(), false);
        }
        fixed(text, remove_ranges(text, &ranges))
    }

    /// Replaces category `old` by `new`, keeping the sort key.
    pub fn re_categorise(&self, text: &str, old: &str, new: &str) -> Fixed {
        let new = normalise_category_name(new);
        if !self.find_category(text, &new).is_empty() {
            return self.remove_category(text, old);
        }
        let old = normalise_category_name(old);
        let namespace = &self.profile.category_namespace;
        let result = self.category.replace_all(text, |caps: &Captures| {
            if normalise_category_name(&caps[1]) != old {
                return caps[0].to_string();
            }
            let key = caps.get(2).map_or("", |m| m.as_str());
            format!("[[{namespace}:{new}{key}]]")
        });
        fixed(text, result)
    }

    fn image_link_regex(&self, name: &str) -> Option<Regex> {
        let files = self.profile.file_namespace_alternation();
        Regex::new(&format!(
            r"\[\[[ \t]*(?i:{files})[ \t]*:[ \t]*{}[ \t]*(?:\|[^\[\]]*(?:\[\[[^\[\]]*\]\][^\[\]]*)*)?\]\]",
            name_pattern(name)
        ))
        .ok()
    }

    /// Replaces file `old` by `new` in image links, galleries and infobox parameters.
    pub fn replace_image(&self, text: &str, old: &str, new: &str) -> Fixed {
        let files = self.profile.file_namespace_alternation();
        let Ok(regex) = Regex::new(&format!(
            r"(?m)((?i:{files})[ \t]*:[ \t]*|=[ \t]*|^[ \t]*)({})([ \t]*(?:[|\]}}\n<]|$))",
            name_pattern(old)
        )) else {
            return (text.to_string(), false);
        };
        let new = new.replace('_', " ").replace('$', "$$");
        fixed(text, regex.replace_all(text, format!("${{1}}{new}${{3}}")))
    }

    /// Removes image links to `name`; infobox parameters holding it are emptied.
    pub fn remove_image(&self, text: &str, name: &str) -> Fixed {
        let Some(link) = self.image_link_regex(name) else {
            return (text.to_string(), false);
        };
        let ranges: Vec<Range<usize>> = link.find_iter(text).map(|m| m.range()).collect();
        let result = remove_ranges(text, &ranges);

        let Ok(parameter) = Regex::new(&format!(r"(=[ \t]*){}([ \t]*[|}}\n])", name_pattern(name)))
        else {
            return fixed(text, result);
        };
        let result = parameter.replace_all(&result, "${1}${2}").into_owned();
        fixed(text, result)
    }

    /// Wraps image links to `name` in an HTML comment.
    pub fn comment_out_image(&self, text: &str, name: &str, comment: &str) -> Fixed {
        let Some(link) = self.image_link_regex(name) else {
            return (text.to_string(), false);
        };
        let result = link.replace_all(text, |caps: &Captures| {
            let comment = comment.trim();
            if comment.is_empty() {
                format!("<!-- {} -->", &caps[0])
            } else {
                format!("<!-- {comment} {} -->", &caps[0])
            }
        });
        fixed(text, result)
    }

    /// True when a category with this name is present, ignoring first-letter case.
    pub fn has_category(&self, text: &str, name: &str) -> bool {
        let name = normalise_category_name(name);
        self.category
            .captures_iter(text)
            .any(|caps| first_letter_case_insensitive_eq(&normalise_category_name(&caps[1]), &name))
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::tests::{assert_settles, parsers};
    use crate::parsers::Fixed;
    use proptest::prelude::*;

    #[test]
    fn test_fix_categories() {
        let parsers = parsers();
        let (text, changed) = parsers.fix_categories(
            "[[category: foo_bar ]] [[Category:Baz|]] [[Category:Qux| ]] [[Category:Key|Smith  ]] [[:Category:Link]]",
        );
        assert!(changed);
        assert_eq!(
            text,
            "[[Category:Foo bar]] [[Category:Baz]] [[Category:Qux| ]] [[Category:Key|Smith]] [[:Category:Link]]"
        );
        assert!(!parsers.fix_categories(&text).1);
    }

    #[test]
    fn test_fix_images() {
        let parsers = parsers();
        assert_eq!(
            parsers.fix_images("[[image : a.jpg|thumb]] [[FILE:b.png]]"),
            ("[[Image:a.jpg|thumb]] [[File:b.png]]".to_string(), true)
        );
    }

    #[test]
    fn test_change_to_default_sort() {
        let parsers = parsers();

        let change = parsers.change_to_default_sort(
            "Text\n{{defaultsort|Smith, John}}\n[[Category:A|Smith, John]]\n[[Category:B|X]]",
            "John Smith",
            false,
        );
        assert!(change.changed);
        assert!(!change.added);
        assert_eq!(
            change.text,
            "Text\n{{DEFAULTSORT:Smith, John}}\n[[Category:A]]\n[[Category:B|X]]"
        );

        let change = parsers.change_to_default_sort(
            "Text\n[[Category:1950 births]]\n[[Category:Living people]]",
            "John Smith",
            false,
        );
        assert!(change.added);
        assert_eq!(
            change.text,
            "Text\n{{DEFAULTSORT:Smith, John}}\n[[Category:1950 births]]\n[[Category:Living people]]"
        );
        let again = parsers.change_to_default_sort(&change.text, "John Smith", false);
        assert!(!again.changed);

        // same explicit key everywhere
        let change =
            parsers.change_to_default_sort("T\n[[Category:A|Foo]]\n[[Category:B|Foo]]", "The Foo", false);
        assert!(change.added);
        assert_eq!(change.text, "T\n{{DEFAULTSORT:Foo}}\n[[Category:A]]\n[[Category:B]]");
        let change =
            parsers.change_to_default_sort("T\n[[Category:A|Foo ]]\n[[Category:B|Foo ]]", "The Foo", false);
        assert_eq!(change.text, "T\n{{DEFAULTSORT:Foo}}\n[[Category:A]]\n[[Category:B]]");
        assert!(!parsers.change_to_default_sort(&change.text, "The Foo", false).changed);

        // plain titles need no key, restricted mode only sorts biographies
        assert!(!parsers.change_to_default_sort("T\n[[Category:A]]", "Paris", false).changed);
        assert!(!parsers.change_to_default_sort("T\n[[Category:A]]", "Ærø", true).changed);
        let change = parsers.change_to_default_sort("T\n[[Category:A]]", "Ærø", false);
        assert_eq!(change.text, "T\n{{DEFAULTSORT:Aero}}\n[[Category:A]]");
    }

    #[test]
    fn test_sort_meta_data() {
        let parsers = parsers();
        let text = "{{France-geo-stub}}\nIntro [[Category:B]] text.\n[[de:Foo]]\n[[Category:A|x]]\n{{DEFAULTSORT:Foo}}\n[[Category:b]]\n\nMore.";
        let (result, changed) = parsers.sort_meta_data(text, "Foo");
        assert!(changed);
        assert_eq!(
            result,
            "Intro  text.\n\nMore.\n\n{{DEFAULTSORT:Foo}}\n[[Category:B]]\n[[Category:A|x]]\n\n{{France-geo-stub}}\n\n[[de:Foo]]"
        );
        assert!(!parsers.sort_meta_data(&result, "Foo").1);
        assert!(!parsers.sort_meta_data(text, "Template:Foo").1);
    }

    #[test]
    fn test_category_operations() {
        let parsers = parsers();
        let text = "Text\n\n[[Category:A]]\n[[Category:B|key]]";

        assert_eq!(
            parsers.add_category(text, "c"),
            ("Text\n\n[[Category:A]]\n[[Category:B|key]]\n[[Category:C]]".to_string(), true)
        );
        assert!(!parsers.add_category(text, "a").1);
        assert_eq!(
            parsers.add_category("Text", "New"),
            ("Text\n\n[[Category:New]]".to_string(), true)
        );

        assert_eq!(
            parsers.remove_category(text, "A"),
            ("Text\n\n[[Category:B|key]]".to_string(), true)
        );
        assert_eq!(
            parsers.re_categorise(text, "B", "D"),
            ("Text\n\n[[Category:A]]\n[[Category:D|key]]".to_string(), true)
        );
        assert_eq!(
            parsers.re_categorise(text, "B", "A"),
            ("Text\n\n[[Category:A]]".to_string(), true)
        );
        assert!(parsers.has_category(text, "b"));
    }

    #[test]
    fn test_image_operations() {
        let parsers = parsers();
        let text = "[[File:Old_name.jpg|thumb|A [[link]]]]\n{{Infobox|image = Old name.jpg}}\nText";

        assert_eq!(
            parsers.replace_image(text, "Old name.jpg", "New.jpg"),
            (
                "[[File:New.jpg|thumb|A [[link]]]]\n{{Infobox|image = New.jpg}}\nText".to_string(),
                true
            )
        );
        assert_eq!(
            parsers.remove_image(text, "Old name.jpg"),
            ("{{Infobox|image = }}\nText".to_string(), true)
        );
        assert_eq!(
            parsers.comment_out_image("a [[Image:X.png]] b", "X.png", "missing file"),
            ("a <!-- missing file [[Image:X.png]] --> b".to_string(), true)
        );
    }

    proptest! {
        #[test]
        fn metadata_fixes_are_idempotent(
            input in "(\\[\\[Category:B\\]\\]|\\[\\[category: a_b \\|x\\]\\]|\\[\\[Category:c\\|x \\]\\]|\\{\\{DEFAULTSORT:Foo\\}\\}|\\{\\{defaultsort\\|Foo\\}\\}|\\{\\{Foo-stub\\}\\}|\\[\\[de:Foo\\]\\]|\\[\\[image : b\\.png\\]\\]|Text| |\n){0,24}"
        ) {
            let parsers = parsers();
            let fixes: [(&str, &dyn Fn(&str) -> Fixed); 4] = [
                ("fix_categories", &|text: &str| parsers.fix_categories(text)),
                ("fix_images", &|text: &str| parsers.fix_images(text)),
                ("sort_meta_data", &|text: &str| parsers.sort_meta_data(text, "Foo")),
                ("change_to_default_sort", &|text: &str| {
                    let change = parsers.change_to_default_sort(text, "Foo", false);
                    (change.text, change.changed)
                }),
            ];
            for (name, fix) in fixes {
                assert_settles(name, fix, &input)?;
            }
        }
    }
}
