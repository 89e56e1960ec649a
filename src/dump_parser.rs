//! Streaming reader for MediaWiki XML exports.
//!
//! Yields one [`Page`] at a time with the last revision found in the export,
//! which is what a database scan feeds into the pipeline. Elements the reader
//! does not know are skipped; with the `strict` feature malformed input
//! aborts the scan instead.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::Debug,
    io::{BufRead, Read},
    sync::Arc,
};

use compact_str::CompactString;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use tracing::instrument;

// tags we need the value of, plus their parents
#[derive(PartialEq, Eq)]
enum Tag {
    MediaWiki,  // root
    SiteInfo,   // <siteinfo><dbname>…</dbname><namespaces>…</namespaces></siteinfo>
    DbName,     // <dbname>enwiki</dbname>
    Namespaces, // <namespaces><namespace key="0" />…</namespaces>
    Namespace(String), // <namespace key="1">Talk</namespace>
    Page,       // <page><title/><ns/><id/><revision/>…</page>
    Title,
    Ns,
    Id,
    Revision,   // <revision><id/><timestamp/><comment/><minor/><text/>…</revision>
    Timestamp,
    Comment,
    Minor,
    Text { deleted: bool }, // <text bytes="20">…</text> or <text deleted="deleted" />
    Unknown(CompactString),
}

impl Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::MediaWiki => write!(f, "<mediawiki>"),
            Tag::SiteInfo => write!(f, "<siteinfo>"),
            Tag::DbName => write!(f, "<dbname>"),
            Tag::Namespaces => write!(f, "<namespaces>"),
            Tag::Namespace(key) => write!(f, "<namespace key={}>", key),
            Tag::Page => write!(f, "<page>"),
            Tag::Title => write!(f, "<title>"),
            Tag::Ns => write!(f, "<ns>"),
            Tag::Id => write!(f, "<id>"),
            Tag::Revision => write!(f, "<revision>"),
            Tag::Timestamp => write!(f, "<timestamp>"),
            Tag::Comment => write!(f, "<comment>"),
            Tag::Minor => write!(f, "<minor>"),
            Tag::Text { deleted } => {
                if *deleted {
                    write!(f, "<text deleted>")
                } else {
                    write!(f, "<text>")
                }
            }
            Tag::Unknown(name) => write!(f, "<{}>", name),
        }
    }
}

const NON_UTF8_TAG: &str = "non-utf8 tag";

impl Tag {
    /// Reads a start tag. A non-UTF-8 name comes back as `Err` carrying the
    /// placeholder tag so the caller can decide whether to go on.
    fn from_start_bytes(e: &BytesStart) -> Result<Result<Self, Tag>, ParsingError> {
        let tag = match e.name().as_ref() {
            b"mediawiki" => Tag::MediaWiki,
            b"siteinfo" => Tag::SiteInfo,
            b"dbname" => Tag::DbName,
            b"namespaces" => Tag::Namespaces,
            b"namespace" => {
                let mut key = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    if attr.key.as_ref() == b"key" {
                        key = Some(attr.unescape_value()?.into_owned());
                        break;
                    }
                }
                match key {
                    Some(key) => Tag::Namespace(key),
                    None => {
                        return Err(ParsingError::MissingAttribute {
                            attribute: "key",
                            tag: "namespace",
                        })
                    }
                }
            }
            b"page" => Tag::Page,
            b"title" => Tag::Title,
            b"ns" => Tag::Ns,
            b"id" => Tag::Id,
            b"revision" => Tag::Revision,
            b"timestamp" => Tag::Timestamp,
            b"comment" => Tag::Comment,
            b"minor" => Tag::Minor,
            b"text" => {
                let mut deleted = false;
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    if attr.key.as_ref() == b"deleted" {
                        deleted = true;
                    }
                }
                Tag::Text { deleted }
            }
            name => match std::str::from_utf8(name) {
                Ok(name) => Tag::Unknown(CompactString::from(name)),
                Err(_) => return Ok(Err(Tag::Unknown(CompactString::const_new(NON_UTF8_TAG)))),
            },
        };
        Ok(Ok(tag))
    }

    fn matches_end_bytes(&self, e: &BytesEnd) -> bool {
        match (self, e.name().as_ref()) {
            (Tag::MediaWiki, b"mediawiki")
            | (Tag::SiteInfo, b"siteinfo")
            | (Tag::DbName, b"dbname")
            | (Tag::Namespaces, b"namespaces")
            | (Tag::Namespace(_), b"namespace")
            | (Tag::Page, b"page")
            | (Tag::Title, b"title")
            | (Tag::Ns, b"ns")
            | (Tag::Id, b"id")
            | (Tag::Revision, b"revision")
            | (Tag::Timestamp, b"timestamp")
            | (Tag::Comment, b"comment")
            | (Tag::Minor, b"minor")
            | (Tag::Text { .. }, b"text") => true,
            (Tag::Unknown(expected), name) => match std::str::from_utf8(name) {
                Ok(name) => expected == name,
                Err(_) => expected == NON_UTF8_TAG,
            },
            _ => false,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Text {
    Normal(String),
    Deleted,
}

impl Text {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Text::Normal(text) => Some(text),
            Text::Deleted => None,
        }
    }
}

impl Debug for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Text::Normal(text) => write!(f, "{} bytes", text.len()),
            Text::Deleted => write!(f, "Deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub id: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub text: Text,
    pub comment: Option<CompactString>,
    pub minor: bool,
}

#[derive(Debug, Default)]
struct RevisionBuilder {
    id: Option<i64>,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    text: Option<Text>,
    comment: Option<CompactString>,
    minor: bool,
}

impl RevisionBuilder {
    fn try_build(self) -> Result<Revision, (&'static str, Self)> {
        match (self.id, self.timestamp, self.text.clone()) {
            (Some(id), Some(timestamp), Some(text)) => Ok(Revision {
                id,
                timestamp,
                text,
                comment: self.comment,
                minor: self.minor,
            }),
            (None, _, _) => Err(("id", self)),
            (_, None, _) => Err(("timestamp", self)),
            (_, _, None) => Err(("text", self)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Page {
    /// Full title including the namespace prefix, underscores as spaces.
    pub title: CompactString,
    pub namespace: i32,
    /// The last revision of the page in the export.
    pub revision: Option<Revision>,
}

impl Page {
    /// Wikitext of the latest revision, unless it is missing or deleted.
    pub fn text(&self) -> Option<&str> {
        self.revision.as_ref().and_then(|revision| revision.text.as_str())
    }
}

#[derive(Debug, Default)]
pub struct SiteInfo {
    pub dbname: CompactString,
    /// Namespace id to localized name; the main namespace has an empty name.
    pub namespaces: HashMap<i32, CompactString>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    #[error("XML error")]
    XmlError(#[from] quick_xml::Error),
    #[error("missing attribute `{attribute}` on tag `{tag}`")]
    MissingAttribute {
        attribute: &'static str,
        tag: &'static str,
    },
    #[error("malformed dump: {0}")]
    Malformed(&'static str),
    #[error("unexpected end of file")]
    Eof,
}

#[derive(Debug, Default)]
struct NonUtf8Reporter {
    num_tags: usize,
}

impl NonUtf8Reporter {
    fn register(&mut self, name: &[u8]) {
        self.num_tags += 1;
        if self.num_tags == 1 {
            tracing::warn!(message = "Non-UTF-8 tag in XML detected. Parsing will continue, but further non-UTF-8 tags will not be reported.", name = String::from_utf8_lossy(name).as_ref());
        }
    }
}

pub struct DumpParser<R: BufRead> {
    xml_parser: quick_xml::Reader<R>,
    buf: Vec<u8>,
    current_path: Vec<Tag>,
    site_info: SiteInfo,
    non_utf8_reporter: NonUtf8Reporter,
}

impl<R: BufRead> Debug for DumpParser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpParser")
            .field("buf.capacity", &self.buf.capacity())
            .field("current_path", &self.current_path)
            .field("site_info", &self.site_info.dbname)
            .finish()
    }
}

impl<R: BufRead> DumpParser<R> {
    pub fn new(reader: R) -> Result<Self, ParsingError> {
        // empty elements are not expanded, `Event::Empty` is handled below
        let xml_parser = quick_xml::Reader::from_reader(reader);

        let mut new = Self {
            xml_parser,
            buf: Vec::with_capacity(64 * 1024),
            current_path: Vec::new(),
            site_info: SiteInfo::default(),
            non_utf8_reporter: NonUtf8Reporter::default(),
        };
        new.parse_site_info()?;
        Ok(new)
    }

    pub fn site_info(&self) -> &SiteInfo {
        &self.site_info
    }

    fn read_start(&mut self, e: &BytesStart) -> Result<Tag, ParsingError> {
        match Tag::from_start_bytes(e) {
            Ok(Ok(tag)) => Ok(tag),
            Ok(Err(placeholder)) => {
                self.non_utf8_reporter.register(e.name().as_ref());
                if cfg!(feature = "strict") {
                    Self::abort_parsing(&mut self.xml_parser)
                } else {
                    Ok(placeholder)
                }
            }
            Err(ParsingError::MissingAttribute { attribute, tag }) if !cfg!(feature = "strict") => {
                tracing::warn!(
                    message = "missing expected attribute, ignoring the element",
                    attribute,
                    tag
                );
                Ok(Tag::Unknown(CompactString::from(tag)))
            }
            Err(err) => Err(err),
        }
    }

    // debugging aid for format changes
    fn check_known_tags_in_unexpected_location(&self, is_empty: bool) {
        if let Some(tag) = self.current_path.last() {
            if !matches!(tag, Tag::Unknown(_)) {
                tracing::debug!(
                    message = "found known tag in unexpected location",
                    tag = ?tag,
                    path = ?self.current_path,
                    is_empty
                );
            }
        }
    }

    fn abort_parsing<T>(xml_parser: &mut quick_xml::Reader<R>) -> Result<T, ParsingError> {
        tracing::error!("Aborting parsing due to error");
        // drain the input so that the iterator ends
        let mut useless_buf = [0];
        xml_parser
            .stream()
            .take(u64::MAX)
            .read(&mut useless_buf)
            .map_err(|e| quick_xml::Error::Io(Arc::new(e)))?;
        Err(ParsingError::Malformed("aborted after a structural error"))
    }

    fn check_end_tag(&mut self, e: &BytesEnd) -> Result<Option<Tag>, ParsingError> {
        let Some(tag) = self.current_path.pop() else {
            tracing::error!(
                message = "Unexpected end tag",
                tag = String::from_utf8_lossy(e.name().as_ref()).as_ref(),
                position = self.xml_parser.buffer_position()
            );
            if cfg!(feature = "strict") {
                return Self::abort_parsing(&mut self.xml_parser);
            }
            return Ok(None);
        };

        if !tag.matches_end_bytes(e) {
            tracing::error!(
                message = "Mismatched tags",
                expected = ?tag,
                actual = String::from_utf8_lossy(e.name().as_ref()).as_ref(),
                current_path = ?self.current_path,
                position = self.xml_parser.buffer_position()
            );
            if cfg!(feature = "strict") {
                return Self::abort_parsing(&mut self.xml_parser);
            }
            // cannot tell a missing opening tag from a typo, carry on
        }
        Ok(Some(tag))
    }

    #[instrument(skip(self))]
    fn parse_site_info(&mut self) -> Result<(), ParsingError> {
        let mut site_info = SiteInfo::default();

        loop {
            let event = self.xml_parser.read_event_into(&mut self.buf)?.into_owned();
            self.buf.clear();
            match event {
                Event::Start(ref e) => {
                    let tag = self.read_start(e)?;
                    self.current_path.push(tag);
                }
                Event::Empty(ref e) => {
                    let tag = self.read_start(e)?;
                    if let Tag::Namespace(id) = &tag {
                        // <namespace key="0" case="first-letter" />
                        match id.parse() {
                            Ok(key) => {
                                site_info.namespaces.insert(key, CompactString::default());
                            }
                            Err(_) => tracing::warn!(message = "Ignoring namespace with invalid id", id),
                        }
                    }
                }
                Event::Text(e) => {
                    let text = e.unescape()?;
                    use Tag::*;
                    match self.current_path.as_slice() {
                        [MediaWiki, SiteInfo, DbName] => {
                            site_info.dbname = CompactString::from(text.as_ref());
                        }
                        [MediaWiki, SiteInfo, Namespaces, Namespace(id)] => match id.parse() {
                            Ok(key) => {
                                site_info
                                    .namespaces
                                    .insert(key, CompactString::from(text.as_ref()));
                            }
                            Err(_) => tracing::warn!(
                                message = "Ignoring namespace with invalid id",
                                id,
                                name = text.as_ref()
                            ),
                        },
                        _ => self.check_known_tags_in_unexpected_location(false),
                    }
                }
                Event::End(ref e) => {
                    if self.check_end_tag(e)? == Some(Tag::SiteInfo) {
                        break;
                    }
                }
                Event::Eof => {
                    tracing::error!(partial_site_info = ?site_info, current_path = ?self.current_path);
                    return Err(ParsingError::Eof);
                }
                _ => {}
            }
        }

        self.site_info = site_info;
        Ok(())
    }

    /// Reads the next page, `None` at the end of the dump.
    pub fn parse_page(&mut self) -> Result<Option<Page>, ParsingError> {
        let span = tracing::debug_span!("parse_page", title = tracing::field::Empty);
        let _enter = span.enter();

        let mut page = Page {
            title: CompactString::default(),
            namespace: 0,
            revision: None,
        };
        let mut started_page = false;
        let mut revision_builder: Option<RevisionBuilder> = None;

        loop {
            let event = self.xml_parser.read_event_into(&mut self.buf)?.into_owned();
            self.buf.clear();
            match event {
                Event::Start(ref e) => {
                    let tag = self.read_start(e)?;
                    match tag {
                        Tag::Page => started_page = true,
                        Tag::Revision => revision_builder = Some(RevisionBuilder::default()),
                        _ => {}
                    }
                    self.current_path.push(tag);
                }
                Event::Empty(ref e) => {
                    let tag = self.read_start(e)?;
                    self.current_path.push(tag);
                    use Tag::*;
                    match (self.current_path.as_slice(), &mut revision_builder) {
                        ([MediaWiki, Page, Revision, Text { deleted }], Some(builder)) => {
                            builder.text = Some(if *deleted {
                                self::Text::Deleted
                            } else {
                                self::Text::Normal(String::new())
                            });
                        }
                        ([MediaWiki, Page, Revision, Minor], Some(builder)) => builder.minor = true,
                        _ => self.check_known_tags_in_unexpected_location(true),
                    }
                    self.current_path.pop();
                }
                Event::Text(e) => {
                    let text = e.unescape()?;
                    use Tag::*;
                    match (self.current_path.as_slice(), &mut revision_builder) {
                        ([MediaWiki, Page, Title], _) => {
                            page.title = CompactString::from(normalize_title(&text));
                            span.record("title", page.title.as_str());
                        }
                        ([MediaWiki, Page, Ns], _) => {
                            page.namespace = text.trim().parse().unwrap_or_else(|_| {
                                tracing::warn!(
                                    message = "Found invalid namespace id, defaulting to 0",
                                    ns = text.as_ref()
                                );
                                0
                            });
                        }
                        ([MediaWiki, Page, Revision, Id], Some(builder)) => {
                            builder.id = text.trim().parse().ok();
                            if builder.id.is_none() {
                                tracing::warn!(message = "Found invalid revision id", id = text.as_ref());
                            }
                        }
                        ([MediaWiki, Page, Revision, Timestamp], Some(builder)) => {
                            builder.timestamp = parse_timestamp(&text);
                            if builder.timestamp.is_none() {
                                tracing::warn!(
                                    message = "Found invalid revision timestamp",
                                    timestamp = text.as_ref()
                                );
                            }
                        }
                        ([MediaWiki, Page, Revision, Comment], Some(builder)) => {
                            builder.comment = Some(CompactString::from(text.as_ref()));
                        }
                        ([MediaWiki, Page, Revision, Text { deleted }], Some(builder)) => {
                            builder.text = Some(if *deleted {
                                self::Text::Deleted
                            } else {
                                self::Text::Normal(text.into_owned())
                            });
                        }
                        _ => self.check_known_tags_in_unexpected_location(false),
                    }
                }
                Event::End(ref e) => {
                    let tag = self.check_end_tag(e)?;
                    if tag == Some(Tag::Revision) {
                        if let Some(builder) = revision_builder.take() {
                            match builder.try_build() {
                                Ok(revision) => page.revision = Some(revision),
                                Err((field, partial)) => {
                                    tracing::error!(
                                        message = "Missing mandatory field in revision",
                                        field,
                                        partial_revision = ?partial
                                    );
                                    if cfg!(feature = "strict") {
                                        return Self::abort_parsing(&mut self.xml_parser);
                                    }
                                }
                            }
                        }
                    }
                    if tag == Some(Tag::Page) {
                        break;
                    }
                }
                Event::Eof => {
                    if started_page {
                        tracing::error!(partial_page = ?page, current_path = ?self.current_path);
                        return Err(ParsingError::Eof);
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }

        Ok(Some(page))
    }
}

impl<R: BufRead> Iterator for DumpParser<R> {
    type Item = Result<Page, ParsingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parse_page().transpose()
    }
}

fn normalize_title(title: &str) -> Cow<'_, str> {
    let title = title.trim();
    if title.contains('_') {
        title.replace('_', " ").into()
    } else {
        title.into()
    }
}

fn parse_timestamp(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    const TIMESTAMP_FORMAT_LONG: &str = "%Y-%m-%dT%H:%M:%SZ";
    const TIMESTAMP_FORMAT_SHORT: &str = "%Y%m%d%H%M%S";

    let text = text.trim();
    chrono::NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_LONG)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_SHORT))
        .ok()
        .map(|dt| chrono::DateTime::from_naive_utc_and_offset(dt, chrono::Utc))
}
