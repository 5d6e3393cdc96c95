//! Note document model for a plain-text Markdown vault.
//!
//! A note is an optional flat front-matter header followed by an ordered run of sections,
//! each tagged with its heading level. Parsing and formatting are line-oriented so that a
//! note written by [`document::Document::save`] parses back to the same structure.

pub mod syntax {
    //! Markers shared by the parser, the formatter and task rendering.

    /// Line that opens and closes the front-matter block.
    pub const FRONT_MATTER_DELIMITER: &str = "---";
    pub const NEWLINE: &str = "\n";

    pub const HEADING_MARKER: char = '#';
    pub const HEADING_SEPARATOR: char = ' ';
    pub const MAX_HEADING_LEVEL: u8 = 6;

    /// Default separator for heading paths such as `Projects > Active`.
    pub const PATH_DELIMITER: &str = " > ";

    pub const KEY_SEPARATOR: char = ':';
    pub const LIST_OPEN: char = '[';
    pub const LIST_CLOSE: char = ']';
    pub const LIST_SEPARATOR: char = ',';
    pub const DOUBLE_QUOTE: char = '"';
    pub const SINGLE_QUOTE: char = '\'';
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";

    pub const TAGS_KEY: &str = "tags";
    pub const TAG_PREFIX: char = '#';

    pub const CHECKBOX_OPEN: &str = "- [ ]";
    pub const CHECKBOX_DONE: &str = "- [x]";
    pub const CHECKBOX_DONE_UPPER: &str = "- [X]";
    pub const DUE_MARKER: &str = "📅";
    pub const SCHEDULED_MARKER: &str = "⏰";
    pub const START_MARKER: &str = "🛫";

    pub const NOTE_EXTENSION: &str = "md";
}

pub mod core {
    use crate::syntax;
    use crate::task::Task;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{
        cell::Cell,
        fmt,
        rc::{Rc, Weak},
    };
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SectionId(pub Uuid);

    impl SectionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    /* -------------------------------- Tags -------------------------------- */

    /// Ordered set of bare tag names: no leading `#`, no surrounding whitespace, no duplicates.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Tags(Vec<String>);

    impl Tags {
        pub fn new() -> Self {
            Self(Vec::new())
        }

        /// Split free text such as `"work, urgent"`, `"work urgent"` or `"#work #urgent"`.
        pub fn parse(text: &str) -> Self {
            text.split(|c: char| c == syntax::LIST_SEPARATOR || c.is_whitespace())
                .collect()
        }

        /// Normalized form of a single tag.
        pub fn clean(tag: &str) -> &str {
            let trimmed = tag.trim();
            trimmed
                .strip_prefix(syntax::TAG_PREFIX)
                .unwrap_or(trimmed)
                .trim()
        }

        /// Returns `false` when the cleaned tag is empty or already present.
        pub fn add(&mut self, tag: &str) -> bool {
            let cleaned = Self::clean(tag);
            if cleaned.is_empty() || self.contains_clean(cleaned) {
                return false;
            }
            self.0.push(cleaned.to_string());
            true
        }

        pub fn remove(&mut self, tag: &str) -> bool {
            let cleaned = Self::clean(tag);
            let before = self.0.len();
            self.0.retain(|t| t != cleaned);
            self.0.len() != before
        }

        pub fn has(&self, tag: &str) -> bool {
            self.contains_clean(Self::clean(tag))
        }

        fn contains_clean(&self, cleaned: &str) -> bool {
            self.0.iter().any(|t| t == cleaned)
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &str> {
            self.0.iter().map(String::as_str)
        }

        pub fn as_slice(&self) -> &[String] {
            &self.0
        }

        pub fn into_vec(self) -> Vec<String> {
            self.0
        }

        /// `#a #b` form used on task lines.
        pub fn to_inline_string(&self) -> String {
            self.0
                .iter()
                .map(|t| format!("{}{}", syntax::TAG_PREFIX, t))
                .collect::<Vec<_>>()
                .join(" ")
        }
    }

    impl<S: AsRef<str>> FromIterator<S> for Tags {
        fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
            let mut tags = Tags::new();
            for tag in iter {
                tags.add(tag.as_ref());
            }
            tags
        }
    }

    impl From<&MetadataValue> for Tags {
        fn from(value: &MetadataValue) -> Self {
            match value {
                MetadataValue::Text(text) => Tags::parse(text),
                MetadataValue::List(items) => items.iter().collect(),
                MetadataValue::Number(_) | MetadataValue::Bool(_) => Tags::new(),
            }
        }
    }

    /* ---------------------------- Front matter ---------------------------- */

    /// A single front-matter value.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum MetadataValue {
        Bool(bool),
        Number(f64),
        Text(String),
        List(Vec<String>),
    }

    impl MetadataValue {
        /// Coerce a raw header value. Precedence: bracket list, quoted text, boolean,
        /// decimal number, plain trimmed text.
        pub fn parse(raw: &str) -> Self {
            let value = raw.trim();
            if let Some(inner) = value
                .strip_prefix(syntax::LIST_OPEN)
                .and_then(|v| v.strip_suffix(syntax::LIST_CLOSE))
            {
                if inner.trim().is_empty() {
                    return Self::List(Vec::new());
                }
                return Self::List(
                    inner
                        .split(syntax::LIST_SEPARATOR)
                        .map(|item| unquote(item.trim()).to_string())
                        .collect(),
                );
            }
            if let Some(inner) = strip_quotes(value) {
                return Self::Text(inner.to_string());
            }
            match value {
                syntax::TRUE => Self::Bool(true),
                syntax::FALSE => Self::Bool(false),
                _ => match parse_number(value) {
                    Some(number) => Self::Number(number),
                    None => Self::Text(value.to_string()),
                },
            }
        }

        /// Header form: quoted text, `["a", "b"]` lists, bare numbers and booleans.
        pub fn render(&self) -> String {
            match self {
                Self::Text(text) => format!("\"{text}\""),
                Self::List(items) => {
                    let quoted: Vec<String> = items.iter().map(|item| format!("\"{item}\"")).collect();
                    format!("[{}]", quoted.join(", "))
                }
                Self::Number(number) => number.to_string(),
                Self::Bool(flag) => flag.to_string(),
            }
        }

        pub fn as_str(&self) -> Option<&str> {
            match self {
                Self::Text(text) => Some(text),
                _ => None,
            }
        }

        pub fn as_f64(&self) -> Option<f64> {
            match self {
                Self::Number(number) => Some(*number),
                _ => None,
            }
        }

        pub fn as_bool(&self) -> Option<bool> {
            match self {
                Self::Bool(flag) => Some(*flag),
                _ => None,
            }
        }

        pub fn as_list(&self) -> Option<&[String]> {
            match self {
                Self::List(items) => Some(items),
                _ => None,
            }
        }
    }

    impl fmt::Display for MetadataValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.render())
        }
    }

    impl From<&str> for MetadataValue {
        fn from(value: &str) -> Self {
            Self::Text(value.to_string())
        }
    }

    impl From<String> for MetadataValue {
        fn from(value: String) -> Self {
            Self::Text(value)
        }
    }

    impl From<f64> for MetadataValue {
        fn from(value: f64) -> Self {
            Self::Number(value)
        }
    }

    impl From<i64> for MetadataValue {
        fn from(value: i64) -> Self {
            Self::Number(value as f64)
        }
    }

    impl From<bool> for MetadataValue {
        fn from(value: bool) -> Self {
            Self::Bool(value)
        }
    }

    impl From<Vec<String>> for MetadataValue {
        fn from(value: Vec<String>) -> Self {
            Self::List(value)
        }
    }

    impl From<Vec<&str>> for MetadataValue {
        fn from(value: Vec<&str>) -> Self {
            Self::List(value.into_iter().map(str::to_string).collect())
        }
    }

    impl From<Tags> for MetadataValue {
        fn from(value: Tags) -> Self {
            Self::List(value.into_vec())
        }
    }

    fn strip_quotes(value: &str) -> Option<&str> {
        [syntax::DOUBLE_QUOTE, syntax::SINGLE_QUOTE]
            .into_iter()
            .find(|quote| value.len() >= 2 && value.starts_with(*quote) && value.ends_with(*quote))
            .map(|_| &value[1..value.len() - 1])
    }

    fn unquote(value: &str) -> &str {
        strip_quotes(value).unwrap_or(value)
    }

    fn parse_number(value: &str) -> Option<f64> {
        let numeric = value.chars().any(|c| c.is_ascii_digit())
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
        if !numeric {
            return None;
        }
        value.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    /// Flat key/value header. Keys keep insertion order; `tags` is always stored as a
    /// normalized list.
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MetadataBlock {
        entries: IndexMap<String, MetadataValue>,
    }

    impl MetadataBlock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Parse the lines between the delimiters. Lines without a key are skipped.
        pub fn parse(text: &str) -> Self {
            crate::parser::parse_front_matter(text)
        }

        pub fn get(&self, key: &str) -> Option<&MetadataValue> {
            self.entries.get(key)
        }

        /// Re-setting an existing key keeps its position.
        pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
            let key = key.into();
            let mut value = value.into();
            if key == syntax::TAGS_KEY {
                value = MetadataValue::from(Tags::from(&value));
            }
            self.entries.insert(key, value);
        }

        pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
            self.entries.shift_remove(key)
        }

        pub fn contains_key(&self, key: &str) -> bool {
            self.entries.contains_key(key)
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
            self.entries.iter().map(|(k, v)| (k.as_str(), v))
        }

        pub fn tags(&self) -> Tags {
            self.get(syntax::TAGS_KEY).map(Tags::from).unwrap_or_default()
        }

        /// Delimited header text without a trailing newline; empty when there are no entries.
        pub fn to_text(&self) -> String {
            if self.entries.is_empty() {
                return String::new();
            }
            let mut lines = Vec::with_capacity(self.entries.len() + 2);
            lines.push(syntax::FRONT_MATTER_DELIMITER.to_string());
            for (key, value) in &self.entries {
                lines.push(format!("{key}{} {}", syntax::KEY_SEPARATOR, value.render()));
            }
            lines.push(syntax::FRONT_MATTER_DELIMITER.to_string());
            lines.join(syntax::NEWLINE)
        }
    }

    /* ------------------------------ Sections ------------------------------ */

    /// Non-owning link from a section back to its document's dirty flag.
    ///
    /// A detached handle (sections built outside a document) ignores notifications.
    #[derive(Debug, Clone, Default)]
    pub struct DirtyHandle(Weak<Cell<bool>>);

    impl DirtyHandle {
        pub fn detached() -> Self {
            Self(Weak::new())
        }

        pub(crate) fn new(flag: &Rc<Cell<bool>>) -> Self {
            Self(Rc::downgrade(flag))
        }

        pub fn mark(&self) {
            if let Some(flag) = self.0.upgrade() {
                flag.set(true);
            }
        }
    }

    /// A titled (or untitled root) run of body text at a heading level.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct Section {
        id: SectionId,
        title: String,
        body: String,
        /// 0 for the untitled root, 1..=6 for headings.
        level: u8,
        #[serde(skip)]
        notifier: DirtyHandle,
    }

    impl Section {
        /// Titled sections need a level in 1..=6 and a single-line, non-blank title; untitled
        /// ones sit at level 0.
        pub fn new(
            title: impl Into<String>,
            body: impl Into<String>,
            level: u8,
        ) -> Result<Self, NoteError> {
            let title = title.into();
            if !title.is_empty() && (title.trim().is_empty() || title.contains(['\n', '\r'])) {
                return Err(NoteError::InvalidTitle(title));
            }
            let valid = if title.is_empty() {
                level == 0
            } else {
                (1..=syntax::MAX_HEADING_LEVEL).contains(&level)
            };
            if !valid {
                return Err(NoteError::InvalidLevel { title, level });
            }
            Ok(Self::from_parts(title, body.into(), level))
        }

        pub fn root(body: impl Into<String>) -> Self {
            Self::from_parts(String::new(), body.into(), 0)
        }

        pub(crate) fn from_parts(title: String, body: String, level: u8) -> Self {
            Self {
                id: SectionId::new(),
                title,
                body,
                level,
                notifier: DirtyHandle::detached(),
            }
        }

        pub(crate) fn attach(&mut self, notifier: DirtyHandle) {
            self.notifier = notifier;
        }

        pub fn id(&self) -> SectionId {
            self.id
        }

        pub fn title(&self) -> &str {
            &self.title
        }

        pub fn body(&self) -> &str {
            &self.body
        }

        pub fn level(&self) -> u8 {
            self.level
        }

        pub fn is_empty(&self) -> bool {
            self.body.trim().is_empty()
        }

        pub fn append(&mut self, text: &str) {
            if !self.body.is_empty() && !self.body.ends_with(syntax::NEWLINE) {
                self.body.push_str(syntax::NEWLINE);
            }
            self.body.push_str(text);
            self.notifier.mark();
        }

        pub fn prepend(&mut self, text: &str) {
            let mut head = text.to_string();
            if !head.is_empty() && !head.ends_with(syntax::NEWLINE) {
                head.push_str(syntax::NEWLINE);
            }
            self.body.insert_str(0, &head);
            self.notifier.mark();
        }

        pub fn set_body(&mut self, body: impl Into<String>) {
            self.body = body.into();
            self.notifier.mark();
        }

        /// `## Title`, or an empty string for the untitled root.
        pub fn heading_markdown(&self) -> String {
            if self.title.is_empty() {
                return String::new();
            }
            let mut line = syntax::HEADING_MARKER
                .to_string()
                .repeat(usize::from(self.level));
            line.push(syntax::HEADING_SEPARATOR);
            line.push_str(&self.title);
            line
        }

        pub fn render(&self) -> String {
            let mut parts = Vec::with_capacity(2);
            if !self.title.is_empty() {
                parts.push(self.heading_markdown());
            }
            if !self.body.is_empty() {
                parts.push(self.body.clone());
            }
            parts.join(syntax::NEWLINE)
        }

        /// The contiguous run of strictly deeper sections that follows `self` in `all`.
        pub fn subsections<'a>(&self, all: &'a [Section]) -> &'a [Section] {
            let Some(index) = all.iter().position(|s| s.id == self.id) else {
                return &[];
            };
            let rest = &all[index + 1..];
            let run = rest.iter().take_while(|s| s.level > self.level).count();
            &rest[..run]
        }

        /// Task lines found in the body, in order.
        pub fn tasks(&self) -> Vec<Task> {
            self.body.lines().filter_map(Task::parse_line).collect()
        }

        pub fn add_task(&mut self, task: &Task) {
            self.append(&task.to_markdown());
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum NoteError {
        #[error(
            "heading level {level} is invalid for section {title:?} (titled sections use 1..=6, untitled use 0)"
        )]
        InvalidLevel { title: String, level: u8 },
        #[error("section title {0:?} must be a single non-blank line")]
        InvalidTitle(String),
    }

}

pub mod parser {
    //! Line-oriented note parser.
    //!
    //! The text is split on `\n`. A front-matter block is recognised only when the first line
    //! is the delimiter and a closing delimiter follows; the remaining lines are scanned for
    //! ATX headings (`#` to `######` followed by whitespace and a title), each of which opens
    //! a new section. Single lines are matched with `nom` combinators. Malformed input never
    //! fails: unmatched header lines are skipped and unmatched heading lines stay body text.

    use crate::core::{MetadataBlock, MetadataValue, Section};
    use crate::syntax;
    use nom::{
        IResult,
        bytes::complete::{take_till, take_while_m_n, take_while1},
        character::complete::char,
        combinator::{rest, verify},
        error::VerboseError,
        sequence::separated_pair,
    };
    use serde::{Deserialize, Serialize};
    use tracing::trace;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Front matter plus sections in document order.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ParsedNote {
        pub front_matter: MetadataBlock,
        pub sections: Vec<Section>,
    }

    /* ------------------------ Public entry points ------------------------ */

    pub fn parse_note(input: &str) -> ParsedNote {
        if input.is_empty() {
            return ParsedNote::default();
        }
        let lines: Vec<&str> = input.split(syntax::NEWLINE).collect();
        let (front_matter, body_start) = split_front_matter(&lines);
        let sections = parse_sections(&lines[body_start..]);
        ParsedNote {
            front_matter,
            sections,
        }
    }

    /// Parse header lines (with or without their delimiters).
    pub fn parse_front_matter(text: &str) -> MetadataBlock {
        let mut block = MetadataBlock::new();
        if text.trim().is_empty() {
            return block;
        }
        for line in text.split(syntax::NEWLINE) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == syntax::FRONT_MATTER_DELIMITER {
                continue;
            }
            match metadata_entry(line) {
                Ok((_, (key, raw))) if !key.trim().is_empty() => {
                    block.set(key.trim(), MetadataValue::parse(raw));
                }
                _ => trace!(line, "skipping front matter line without a key"),
            }
        }
        block
    }

    /// `(level, title)` when `line` is a heading. A trailing `\r` is ignored.
    pub fn parse_heading(line: &str) -> Option<(u8, &str)> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        heading_line(line).ok().map(|(_, heading)| heading)
    }

    /* ------------------------------- Lines ------------------------------- */

    fn is_delimiter(line: &str) -> bool {
        line.strip_suffix('\r').unwrap_or(line) == syntax::FRONT_MATTER_DELIMITER
    }

    fn metadata_entry(i: &str) -> PResult<'_, (&str, &str)> {
        separated_pair(
            take_till(|c: char| c == syntax::KEY_SEPARATOR),
            char(syntax::KEY_SEPARATOR),
            rest,
        )(i)
    }

    fn heading_line(i: &str) -> PResult<'_, (u8, &str)> {
        let (i, markers) = take_while_m_n(
            1,
            usize::from(syntax::MAX_HEADING_LEVEL),
            |c: char| c == syntax::HEADING_MARKER,
        )(i)?;
        let (i, _) = take_while1(|c: char| c.is_whitespace())(i)?;
        let (i, title) = verify(rest, |title: &str| !title.trim().is_empty())(i)?;
        // At most MAX_HEADING_LEVEL ASCII markers, so the length fits in a u8.
        Ok((i, (markers.len() as u8, title)))
    }

    /* ------------------------------ Blocks ------------------------------ */

    /// Returns the header and the index of the first body line. An unclosed header is
    /// treated as body text.
    fn split_front_matter(lines: &[&str]) -> (MetadataBlock, usize) {
        if !lines.first().is_some_and(|line| is_delimiter(line)) {
            return (MetadataBlock::new(), 0);
        }
        match lines.iter().skip(1).position(|line| is_delimiter(line)) {
            Some(offset) => {
                let close = offset + 1;
                let header = lines[1..close].join(syntax::NEWLINE);
                (parse_front_matter(&header), close + 1)
            }
            None => {
                trace!("front matter is never closed; reading the note as body only");
                (MetadataBlock::new(), 0)
            }
        }
    }

    fn parse_sections(lines: &[&str]) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut title = String::new();
        let mut level = 0u8;
        let mut body = String::new();

        for line in lines {
            if let Some((next_level, next_title)) = parse_heading(line) {
                flush_section(
                    &mut sections,
                    std::mem::take(&mut title),
                    std::mem::take(&mut body),
                    level,
                );
                title = next_title.to_string();
                level = next_level;
                continue;
            }

            if body.is_empty() {
                // Blank lines before any content are dropped.
                if !line.trim().is_empty() {
                    body.push_str(line);
                }
            } else {
                body.push_str(syntax::NEWLINE);
                body.push_str(line);
            }
        }

        flush_section(&mut sections, title, body, level);
        sections
    }

    fn flush_section(sections: &mut Vec<Section>, title: String, body: String, level: u8) {
        if title.is_empty() && body.trim().is_empty() {
            return;
        }
        trace!(title = %title, level, "section parsed");
        sections.push(Section::from_parts(title, body, level));
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn outline(note: &ParsedNote) -> Vec<(u8, &str, &str)> {
            note.sections
                .iter()
                .map(|s| (s.level(), s.title(), s.body()))
                .collect()
        }

        #[test]
        fn front_matter_and_headings() {
            let note = parse_note(
                "---\ntitle: \"Demo\"\nn: 3.5\n---\n# One\nbody\n\n## Two\nmore\n",
            );
            assert_eq!(
                note.front_matter.get("title"),
                Some(&MetadataValue::Text("Demo".into()))
            );
            assert_eq!(
                note.front_matter.get("n"),
                Some(&MetadataValue::Number(3.5))
            );
            assert_eq!(
                outline(&note),
                vec![(1, "One", "body\n"), (2, "Two", "more\n")]
            );
        }

        #[test]
        fn unclosed_front_matter_is_body() {
            let note = parse_note("---\ntitle: x\n# Heading\n");
            assert!(note.front_matter.is_empty());
            assert_eq!(
                outline(&note),
                vec![(0, "", "---\ntitle: x"), (1, "Heading", "")]
            );
        }

        #[test]
        fn malformed_header_lines_are_skipped() {
            assert!(parse_front_matter("no-colon-here").is_empty());
            let block = parse_front_matter("---\nurl: https://example.com\n: orphan\n---");
            assert_eq!(block.len(), 1);
            assert_eq!(
                block.get("url"),
                Some(&MetadataValue::Text("https://example.com".into()))
            );
        }

        #[test]
        fn documented_coercions() {
            let block = MetadataBlock::parse("key: [ \"a\", \"b\" ]\nn: 3.5\nb: true\nn: 4");
            assert_eq!(
                block.get("key"),
                Some(&MetadataValue::List(vec!["a".into(), "b".into()]))
            );
            assert_eq!(block.get("n"), Some(&MetadataValue::Number(4.0)));
            assert_eq!(block.get("b"), Some(&MetadataValue::Bool(true)));
            assert_eq!(block.len(), 3);
        }

        #[test]
        fn tags_are_normalized_when_parsed() {
            let block = parse_front_matter(r##"tags: ["#a", "a", "b"]"##);
            assert_eq!(block.tags().as_slice(), ["a", "b"]);
        }

        #[test]
        fn root_section_collects_text_before_first_heading() {
            let note = parse_note("\n\nintro line\n\n# First\ntext");
            assert_eq!(
                outline(&note),
                vec![(0, "", "intro line\n"), (1, "First", "text")]
            );
        }

        #[test]
        fn heading_lookalikes_stay_in_the_body() {
            let note = parse_note("# Real\n####### seven\n#   \n#tag\n");
            assert_eq!(outline(&note), vec![(1, "Real", "####### seven\n#   \n#tag\n")]);
        }

        #[test]
        fn heading_grammar() {
            assert_eq!(parse_heading("### Deep title"), Some((3, "Deep title")));
            assert_eq!(parse_heading("#\tTabbed"), Some((1, "Tabbed")));
            assert_eq!(parse_heading("## Windows\r"), Some((2, "Windows")));
            assert_eq!(parse_heading("#"), None);
            assert_eq!(parse_heading("no heading"), None);
        }

        #[test]
        fn blank_documents_have_no_sections() {
            assert!(parse_note("").sections.is_empty());
            assert!(parse_note("\n\n   \n").sections.is_empty());
            let only_header = parse_note("---\nk: v\n---\n\n");
            assert_eq!(only_header.front_matter.len(), 1);
            assert!(only_header.sections.is_empty());
        }
    }
}

pub mod format {
    //! Serializes a parsed note back to text.
    //!
    //! Parts (front matter, then each section) are joined with `\n`; a blank separator line is
    //! inserted after any part that does not already end in a line break.

    use crate::core::{MetadataBlock, Section};
    use crate::syntax;

    pub fn format_note(front_matter: &MetadataBlock, sections: &[Section]) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(sections.len() * 2 + 1);
        if !front_matter.is_empty() {
            parts.push(front_matter.to_text());
        }
        for section in sections {
            if parts
                .last()
                .is_some_and(|part| !part.ends_with(syntax::NEWLINE))
            {
                parts.push(String::new());
            }
            parts.push(section.render());
        }
        parts.join(syntax::NEWLINE)
    }

    /// Sections only, without the front matter or separator lines.
    pub fn format_sections(sections: &[Section]) -> String {
        sections
            .iter()
            .map(Section::render)
            .collect::<Vec<_>>()
            .join(syntax::NEWLINE)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::MetadataValue;
        use crate::parser::{ParsedNote, parse_note};

        type Structure = (Vec<(String, MetadataValue)>, Vec<(String, u8, String)>);

        fn structure(note: &ParsedNote) -> Structure {
            let front_matter = note
                .front_matter
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            let sections = note
                .sections
                .iter()
                .map(|s| (s.title().to_string(), s.level(), s.body().to_string()))
                .collect();
            (front_matter, sections)
        }

        fn save(note: &ParsedNote) -> String {
            format_note(&note.front_matter, &note.sections)
        }

        #[test]
        fn documented_layout_is_reproduced() {
            let input = r#"---
key: "stringValue"
numKey: 42
flagKey: true
listKey: ["a", "b"]
---
# Heading Level 1
body text for this section

## Heading Level 2
more body text
"#;
            let expected = r#"---
key: "stringValue"
numKey: 42
flagKey: true
listKey: ["a", "b"]
---

# Heading Level 1
body text for this section

## Heading Level 2
more body text
"#;
            assert_eq!(save(&parse_note(input)), expected);
        }

        #[test]
        fn saved_text_is_a_fixed_point() {
            let input = "---\ntags: work, urgent\ncount: 2\n---\nintro\n# A\nalpha\n### C\n## B\nbeta\n\n\n# D";
            let saved = save(&parse_note(input));
            let reparsed = parse_note(&saved);
            let resaved = save(&reparsed);
            assert_eq!(structure(&reparsed), structure(&parse_note(&resaved)));
            assert_eq!(saved, resaved);
        }

        #[test]
        fn separators_only_follow_parts_without_line_breaks() {
            let mut note = parse_note("# A\none\n# B\ntwo\n");
            assert_eq!(save(&note), "# A\none\n\n# B\ntwo\n");
            note.sections[0].append("extra\n");
            assert_eq!(save(&note), "# A\none\nextra\n\n# B\ntwo\n");
        }

        #[test]
        fn sections_render_without_front_matter() {
            let note = parse_note("---\na: 1\n---\n# A\nx\n## B\ny");
            assert_eq!(format_sections(&note.sections), "# A\nx\n## B\ny");
        }

        #[test]
        fn empty_note_formats_to_nothing() {
            assert_eq!(save(&parse_note("")), "");
        }
    }
}

pub mod sections {
    //! Ordered view over a note's sections with lookup, insertion and removal.
    //!
    //! Levels are tags on a flat sequence rather than an enforced tree: "nested under" means
    //! "follows, with no section at the same or a shallower level in between".

    use crate::core::{DirtyHandle, NoteError, Section, SectionId};
    use crate::syntax;
    use serde::Serialize;

    /// Identifies a section for removal: first exact title match, or one exact entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SectionKey<'a> {
        Title(&'a str),
        Id(SectionId),
    }

    impl<'a> From<&'a str> for SectionKey<'a> {
        fn from(title: &'a str) -> Self {
            Self::Title(title)
        }
    }

    impl From<SectionId> for SectionKey<'_> {
        fn from(id: SectionId) -> Self {
            Self::Id(id)
        }
    }

    impl<'a> From<&'a Section> for SectionKey<'a> {
        fn from(section: &'a Section) -> Self {
            Self::Id(section.id())
        }
    }

    /// Flat outline entry for a titled section.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Header {
        pub title: String,
        pub level: u8,
        pub id: SectionId,
    }

    pub struct SectionIndex<'a> {
        sections: &'a mut Vec<Section>,
        notifier: DirtyHandle,
    }

    fn titles_match(a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    impl<'a> SectionIndex<'a> {
        pub fn new(sections: &'a mut Vec<Section>, notifier: DirtyHandle) -> Self {
            Self { sections, notifier }
        }

        pub fn len(&self) -> usize {
            self.sections.len()
        }

        pub fn is_empty(&self) -> bool {
            self.sections.is_empty()
        }

        pub fn get(&self, index: usize) -> Option<&Section> {
            self.sections.get(index)
        }

        pub fn get_mut(&mut self, index: usize) -> Option<&mut Section> {
            self.sections.get_mut(index)
        }

        pub fn as_slice(&self) -> &[Section] {
            self.sections.as_slice()
        }

        pub fn iter(&self) -> std::slice::Iter<'_, Section> {
            self.sections.iter()
        }

        pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Section> {
            self.sections.iter_mut()
        }

        /* ----------------------------- Lookup ----------------------------- */

        /// Index of the first section whose title matches case-insensitively.
        pub fn position(&self, title: &str) -> Option<usize> {
            self.sections
                .iter()
                .position(|s| titles_match(s.title(), title))
        }

        pub fn find(&self, title: &str) -> Option<&Section> {
            self.position(title).map(|index| &self.sections[index])
        }

        pub fn find_mut(&mut self, title: &str) -> Option<&mut Section> {
            let index = self.position(title)?;
            self.sections.get_mut(index)
        }

        pub fn find_all(&self, title: &str) -> Vec<&Section> {
            self.sections
                .iter()
                .filter(|s| titles_match(s.title(), title))
                .collect()
        }

        pub fn find_by_level(&self, level: u8) -> Vec<&Section> {
            self.sections.iter().filter(|s| s.level() == level).collect()
        }

        pub fn position_by_path(&self, path: &str) -> Option<usize> {
            self.position_by_path_with(path, syntax::PATH_DELIMITER)
        }

        /// Resolve `A > B > C` left to right. Each component is searched after the previous
        /// match and gives up at the first section at or above the previous match's level.
        pub fn position_by_path_with(&self, path: &str, delimiter: &str) -> Option<usize> {
            let mut found: Option<usize> = None;
            for component in path.split(delimiter).map(str::trim) {
                let (start, parent_level) = match found {
                    Some(index) => (index + 1, self.sections[index].level()),
                    None => (0, 0),
                };
                found = None;
                for (offset, section) in self.sections[start..].iter().enumerate() {
                    if parent_level > 0 && section.level() <= parent_level {
                        break;
                    }
                    if titles_match(section.title(), component) {
                        found = Some(start + offset);
                        break;
                    }
                }
                found?;
            }
            found
        }

        pub fn find_by_path(&self, path: &str) -> Option<&Section> {
            self.find_by_path_with(path, syntax::PATH_DELIMITER)
        }

        pub fn find_by_path_with(&self, path: &str, delimiter: &str) -> Option<&Section> {
            self.position_by_path_with(path, delimiter)
                .map(|index| &self.sections[index])
        }

        pub fn find_by_path_mut(&mut self, path: &str) -> Option<&mut Section> {
            let index = self.position_by_path(path)?;
            self.sections.get_mut(index)
        }

        fn position_by_key(&self, key: SectionKey<'_>) -> Option<usize> {
            match key {
                SectionKey::Title(title) => self.sections.iter().position(|s| s.title() == title),
                SectionKey::Id(id) => self.sections.iter().position(|s| s.id() == id),
            }
        }

        /// Subsections of the section identified by `key`; empty when it is missing.
        pub fn subsections_of<'k>(&self, key: impl Into<SectionKey<'k>>) -> &[Section] {
            match self.position_by_key(key.into()) {
                Some(index) => self.sections[index].subsections(self.sections.as_slice()),
                None => &[],
            }
        }

        pub fn headers(&self) -> Vec<Header> {
            self.sections
                .iter()
                .filter(|s| !s.title().is_empty())
                .map(|s| Header {
                    title: s.title().to_string(),
                    level: s.level(),
                    id: s.id(),
                })
                .collect()
        }

        /* ---------------------------- Mutation ---------------------------- */

        /// Insert a new section right after the first section titled exactly `insert_after`,
        /// or at the end when that title is absent.
        pub fn add(
            &mut self,
            title: &str,
            body: &str,
            level: u8,
            insert_after: Option<&str>,
        ) -> Result<&mut Section, NoteError> {
            let index = insert_after
                .and_then(|after| self.position_by_key(SectionKey::Title(after)))
                .map_or(self.sections.len(), |index| index + 1);
            self.insert(index, title, body, level)
        }

        /// Insert a new section at `index`, clamped to the end of the sequence.
        pub fn insert(
            &mut self,
            index: usize,
            title: &str,
            body: &str,
            level: u8,
        ) -> Result<&mut Section, NoteError> {
            let mut section = Section::new(title, body, level)?;
            section.attach(self.notifier.clone());
            let index = index.min(self.sections.len());
            self.sections.insert(index, section);
            self.notifier.mark();
            Ok(&mut self.sections[index])
        }

        /// Index just past the section at `index` and its subsections.
        pub fn end_of_subtree(&self, index: usize) -> usize {
            match self.sections.get(index) {
                Some(section) => index + 1 + section.subsections(self.sections.as_slice()).len(),
                None => self.sections.len(),
            }
        }

        pub fn remove<'k>(&mut self, key: impl Into<SectionKey<'k>>) -> bool {
            match self.position_by_key(key.into()) {
                Some(index) => {
                    self.sections.remove(index);
                    self.notifier.mark();
                    true
                }
                None => false,
            }
        }
    }

    impl<'s> IntoIterator for &'s SectionIndex<'_> {
        type Item = &'s Section;
        type IntoIter = std::slice::Iter<'s, Section>;

        fn into_iter(self) -> Self::IntoIter {
            self.sections.iter()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_note;
        use std::{cell::Cell, rc::Rc};

        fn titles(index: &SectionIndex<'_>) -> Vec<String> {
            index.iter().map(|s| s.title().to_string()).collect()
        }

        #[test]
        fn level_scan_and_subsections() {
            let mut note = parse_note("# One\n## Two a\n## Two b\n# Three\n");
            let index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());

            let level_two: Vec<&str> = index
                .find_by_level(2)
                .into_iter()
                .map(|s| s.title())
                .collect();
            assert_eq!(level_two, ["Two a", "Two b"]);

            let one = index.find("one").expect("level one");
            let subs: Vec<&str> = one.subsections(index.as_slice()).iter().map(|s| s.title()).collect();
            assert_eq!(subs, ["Two a", "Two b"]);
            assert!(index.subsections_of("Three").is_empty());
            assert!(index.subsections_of("Missing").is_empty());
        }

        #[test]
        fn lookup_by_title_is_case_insensitive() {
            let mut note = parse_note("# Notes\na\n## notes\nb\n# Other\n");
            let index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());
            assert_eq!(index.find("NOTES").map(|s| s.body()), Some("a"));
            assert_eq!(index.find_all("notes").len(), 2);
            assert!(index.find("absent").is_none());
        }

        #[test]
        fn path_lookup_requires_nesting() {
            let mut note = parse_note("# A\n## B\n## C\n# D\n## Z\n");
            let index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());
            assert_eq!(index.find_by_path("A > B").map(|s| s.title()), Some("B"));
            assert_eq!(index.find_by_path("a > c").map(|s| s.title()), Some("C"));
            assert!(index.find_by_path("A > Z").is_none());
            assert_eq!(index.find_by_path("D > Z").map(|s| s.title()), Some("Z"));
            assert_eq!(index.find_by_path_with("A/B", "/").map(|s| s.title()), Some("B"));
            assert!(index.find_by_path("B > C").is_none());
        }

        #[test]
        fn add_and_remove_track_dirty_state() {
            let flag = Rc::new(Cell::new(false));
            let mut note = parse_note("# A\n# B\n");
            let mut index = SectionIndex::new(&mut note.sections, DirtyHandle::new(&flag));

            index.add("New", "body", 2, Some("A")).expect("add");
            assert_eq!(titles(&index), ["A", "New", "B"]);
            assert!(flag.get());

            flag.set(false);
            assert!(index.remove("New"));
            assert_eq!(titles(&index), ["A", "B"]);
            assert!(flag.get());

            flag.set(false);
            assert!(!index.remove("New"));
            assert!(!flag.get());
        }

        #[test]
        fn add_appends_when_anchor_is_missing() {
            let mut note = parse_note("# A\n");
            let mut index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());
            index.add("Tail", "", 1, Some("a")).expect("add");
            index.add("End", "", 1, None).expect("add");
            assert_eq!(titles(&index), ["A", "Tail", "End"]);
            assert!(index.add("Bad", "", 9, None).is_err());
            assert_eq!(index.len(), 3);
        }

        #[test]
        fn insert_places_sections_after_a_subtree() {
            let mut note = parse_note("# Projects\n## Active\n### Detail\n# Other\n");
            let mut index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());
            assert_eq!(index.end_of_subtree(0), 3);
            assert_eq!(index.end_of_subtree(3), 4);

            let end = index.end_of_subtree(0);
            index.insert(end, "Later", "", 2).expect("insert");
            assert_eq!(titles(&index), ["Projects", "Active", "Detail", "Later", "Other"]);
            assert_eq!(
                index.find_by_path_mut("projects > later").map(|s| s.level()),
                Some(2)
            );

            index.insert(99, "Tail", "", 1).expect("insert past end");
            assert_eq!(index.get(5).map(|s| s.title()), Some("Tail"));
        }

        #[test]
        fn remove_by_id_targets_one_entry() {
            let mut note = parse_note("# Dup\nfirst\n# Dup\nsecond\n");
            let mut index = SectionIndex::new(&mut note.sections, DirtyHandle::detached());
            let second = index.get(1).expect("second").id();
            assert!(index.remove(second));
            assert_eq!(index.len(), 1);
            assert_eq!(index.get(0).map(|s| s.body()), Some("first"));
        }

        #[test]
        fn added_sections_notify_the_document() {
            let flag = Rc::new(Cell::new(false));
            let mut note = parse_note("");
            let mut index = SectionIndex::new(&mut note.sections, DirtyHandle::new(&flag));
            index.add("Log", "", 1, None).expect("add");
            flag.set(false);
            index.find_mut("log").expect("log").append("entry");
            assert!(flag.get());
            let headers = index.headers();
            assert_eq!(headers.len(), 1);
            assert_eq!(headers[0].title, "Log");
        }
    }
}

pub mod task {
    //! Checkbox task lines in the Obsidian Tasks style:
    //! `- [ ] description 📅 2025-10-05 ⏰ 2025-10-04 🛫 2025-10-01 ⏫ #tag`.

    use crate::core::Tags;
    use crate::dates::ISO_DATE;
    use crate::syntax;
    use chrono::NaiveDate;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::tag,
        character::complete::space1,
        combinator::value,
        error::VerboseError,
        sequence::terminated,
    };
    use serde::{Deserialize, Serialize};
    use std::{fmt::Write, str::FromStr};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Priority {
        Highest,
        High,
        Medium,
        Low,
        Lowest,
    }

    impl Priority {
        pub const ALL: [Priority; 5] = [
            Priority::Highest,
            Priority::High,
            Priority::Medium,
            Priority::Low,
            Priority::Lowest,
        ];

        pub fn symbol(self) -> &'static str {
            match self {
                Priority::Highest => "🔺",
                Priority::High => "⏫",
                Priority::Medium => "🔼",
                Priority::Low => "🔽",
                Priority::Lowest => "⏬",
            }
        }

        pub fn from_symbol(symbol: &str) -> Option<Self> {
            Self::ALL.into_iter().find(|p| p.symbol() == symbol)
        }
    }

    impl FromStr for Priority {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "highest" => Ok(Priority::Highest),
                "high" => Ok(Priority::High),
                "medium" => Ok(Priority::Medium),
                "low" => Ok(Priority::Low),
                "lowest" => Ok(Priority::Lowest),
                other => Err(format!(
                    "unknown priority {other:?} (expected highest, high, medium, low or lowest)"
                )),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Task {
        pub description: String,
        pub completed: bool,
        pub due: Option<NaiveDate>,
        pub scheduled: Option<NaiveDate>,
        pub start: Option<NaiveDate>,
        pub priority: Option<Priority>,
        #[serde(default)]
        pub tags: Tags,
    }

    impl Task {
        pub fn new(description: impl Into<String>) -> Self {
            Self {
                description: description.into(),
                ..Self::default()
            }
        }

        pub fn to_markdown(&self) -> String {
            let mut line = String::from(if self.completed {
                syntax::CHECKBOX_DONE
            } else {
                syntax::CHECKBOX_OPEN
            });
            line.push(' ');
            line.push_str(&self.description);
            for (marker, date) in [
                (syntax::DUE_MARKER, self.due),
                (syntax::SCHEDULED_MARKER, self.scheduled),
                (syntax::START_MARKER, self.start),
            ] {
                if let Some(date) = date {
                    let _ = write!(line, " {marker} {}", date.format(ISO_DATE));
                }
            }
            if let Some(priority) = self.priority {
                line.push(' ');
                line.push_str(priority.symbol());
            }
            if !self.tags.is_empty() {
                line.push(' ');
                line.push_str(&self.tags.to_inline_string());
            }
            line
        }

        /// Parse a checkbox line. Date markers without a valid date stay in the description.
        pub fn parse_line(line: &str) -> Option<Self> {
            let (rest, completed) = checkbox(line.trim_start()).ok()?;
            let mut task = Task {
                completed,
                ..Task::default()
            };
            let mut words: Vec<&str> = Vec::new();
            let mut tokens = rest.split_whitespace().peekable();

            while let Some(token) = tokens.next() {
                let slot = match token {
                    syntax::DUE_MARKER => Some(&mut task.due),
                    syntax::SCHEDULED_MARKER => Some(&mut task.scheduled),
                    syntax::START_MARKER => Some(&mut task.start),
                    _ => None,
                };
                if let Some(slot) = slot {
                    let date = tokens
                        .peek()
                        .and_then(|next| NaiveDate::parse_from_str(next, ISO_DATE).ok());
                    if let Some(date) = date {
                        *slot = Some(date);
                        tokens.next();
                    } else {
                        words.push(token);
                    }
                    continue;
                }
                if let Some(priority) = Priority::from_symbol(token) {
                    task.priority = Some(priority);
                } else if token.len() > 1 && token.starts_with(syntax::TAG_PREFIX) {
                    task.tags.add(token);
                } else {
                    words.push(token);
                }
            }

            task.description = words.join(" ");
            Some(task)
        }
    }

    fn checkbox(i: &str) -> IResult<&str, bool, VerboseError<&str>> {
        terminated(
            alt((
                value(false, tag(syntax::CHECKBOX_OPEN)),
                value(true, tag(syntax::CHECKBOX_DONE)),
                value(true, tag(syntax::CHECKBOX_DONE_UPPER)),
            )),
            space1,
        )(i)
    }

}

pub mod storage {
    //! File collaborator: where note text is read from and written to.

    use crate::syntax;
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::{
        cell::{Cell, RefCell},
        collections::BTreeMap,
        fs, io,
        path::{Path, PathBuf},
    };

    pub trait NoteStore {
        fn exists(&self, path: &Path) -> bool;

        /// Text of the note, or an empty string when it does not exist.
        fn read(&self, path: &Path) -> Result<String>;

        fn write(&self, path: &Path, text: &str) -> Result<()>;

        /// Append `text` on a new line without parsing the note.
        fn append(&self, path: &Path, text: &str) -> Result<()> {
            let existing = self.read(path)?;
            if existing.is_empty() {
                self.write(path, text)
            } else {
                self.write(path, &[existing.as_str(), text].join(syntax::NEWLINE))
            }
        }
    }

    impl<T: NoteStore + ?Sized> NoteStore for &T {
        fn exists(&self, path: &Path) -> bool {
            (**self).exists(path)
        }

        fn read(&self, path: &Path) -> Result<String> {
            (**self).read(path)
        }

        fn write(&self, path: &Path, text: &str) -> Result<()> {
            (**self).write(path, text)
        }

        fn append(&self, path: &Path, text: &str) -> Result<()> {
            (**self).append(path, text)
        }
    }

    /// Notes on the local filesystem.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FsStore;

    impl NoteStore for FsStore {
        fn exists(&self, path: &Path) -> bool {
            path.is_file()
        }

        fn read(&self, path: &Path) -> Result<String> {
            match fs::read_to_string(path) {
                Ok(text) => Ok(text),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
                Err(err) => Err(err).with_context(|| format!("reading {:?}", path)),
            }
        }

        fn write(&self, path: &Path, text: &str) -> Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
            }
            fs::write(path, text.as_bytes()).with_context(|| format!("writing {:?}", path))
        }
    }

    /// In-process store for tests and dry runs.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        files: RefCell<BTreeMap<PathBuf, String>>,
        reads: Cell<usize>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file(self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
            self.files.borrow_mut().insert(path.into(), text.into());
            self
        }

        pub fn contents(&self, path: &Path) -> Option<String> {
            self.files.borrow().get(path).cloned()
        }

        /// Number of `read` calls served so far.
        pub fn read_count(&self) -> usize {
            self.reads.get()
        }
    }

    impl NoteStore for MemoryStore {
        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }

        fn read(&self, path: &Path) -> Result<String> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.files.borrow().get(path).cloned().unwrap_or_default())
        }

        fn write(&self, path: &Path, text: &str) -> Result<()> {
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), text.to_string());
            Ok(())
        }
    }

    /// Where a note lives: vault root, optional subfolder, file name.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NoteLocation {
        pub vault: PathBuf,
        pub folder: Option<PathBuf>,
        pub file_name: String,
    }

    impl NoteLocation {
        pub fn new(vault: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
            Self {
                vault: vault.into(),
                folder: None,
                file_name: file_name.into(),
            }
        }

        /// An empty folder means the vault root.
        pub fn in_folder(mut self, folder: impl Into<PathBuf>) -> Self {
            let folder = folder.into();
            self.folder = (!folder.as_os_str().is_empty()).then_some(folder);
            self
        }

        pub fn resolve(&self) -> PathBuf {
            match &self.folder {
                Some(folder) => self.vault.join(folder).join(&self.file_name),
                None => self.vault.join(&self.file_name),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn fs_store_reads_missing_files_as_empty() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("absent.md");
            assert!(!FsStore.exists(&path));
            assert_eq!(FsStore.read(&path).expect("read"), "");
        }

        #[test]
        fn fs_store_write_creates_folders() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("journal").join("2025").join("day.md");
            FsStore.write(&path, "# Day").expect("write");
            assert!(FsStore.exists(&path));
            FsStore.append(&path, "- note").expect("append");
            assert_eq!(fs::read_to_string(&path).expect("read back"), "# Day\n- note");
        }

        #[test]
        fn append_to_missing_note_writes_text_alone() {
            let store = MemoryStore::new();
            let path = Path::new("inbox.md");
            store.append(path, "first").expect("append");
            store.append(path, "second").expect("append");
            assert_eq!(store.contents(path).as_deref(), Some("first\nsecond"));
        }

        #[test]
        fn location_resolves_folder_once() {
            let root = NoteLocation::new("/vault", "a.md");
            assert_eq!(root.resolve(), PathBuf::from("/vault/a.md"));
            let nested = NoteLocation::new("/vault", "a.md").in_folder("daily");
            assert_eq!(nested.resolve(), PathBuf::from("/vault/daily/a.md"));
            assert_eq!(NoteLocation::new("/vault", "a.md").in_folder("").folder, None);
        }
    }
}

pub mod document {
    //! A note bound to a path: lazy parse on first access, dirty tracking, save.

    use crate::core::{DirtyHandle, MetadataBlock, MetadataValue};
    use crate::format::{format_note, format_sections};
    use crate::parser::{ParsedNote, parse_note};
    use crate::sections::{Header, SectionIndex};
    use crate::storage::{NoteLocation, NoteStore};
    use anyhow::{Context, Result, anyhow};
    use std::{
        cell::Cell,
        path::{Path, PathBuf},
        rc::Rc,
    };
    use tracing::debug;

    enum ParseState {
        Unparsed,
        Parsed(ParsedNote),
    }

    pub struct Document<S: NoteStore> {
        store: S,
        path: PathBuf,
        state: ParseState,
        dirty: Rc<Cell<bool>>,
    }

    impl<S: NoteStore> Document<S> {
        pub fn new(store: S, location: &NoteLocation) -> Self {
            Self::at_path(store, location.resolve())
        }

        pub fn at_path(store: S, path: impl Into<PathBuf>) -> Self {
            Self {
                store,
                path: path.into(),
                state: ParseState::Unparsed,
                dirty: Rc::new(Cell::new(false)),
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn exists(&self) -> bool {
            self.store.exists(&self.path)
        }

        pub fn is_parsed(&self) -> bool {
            matches!(self.state, ParseState::Parsed(_))
        }

        /// Unsaved mutations since the last parse or save.
        pub fn is_dirty(&self) -> bool {
            self.dirty.get()
        }

        /// Read and parse the note once; later calls do nothing. A failed read leaves the
        /// document unparsed.
        pub fn parse(&mut self) -> Result<()> {
            self.ensure_parsed().map(|_| ())
        }

        fn ensure_parsed(&mut self) -> Result<&mut ParsedNote> {
            if let ParseState::Unparsed = self.state {
                let text = self
                    .store
                    .read(&self.path)
                    .with_context(|| format!("reading note {:?}", self.path))?;
                let mut note = parse_note(&text);
                let handle = DirtyHandle::new(&self.dirty);
                for section in &mut note.sections {
                    section.attach(handle.clone());
                }
                debug!(
                    path = ?self.path,
                    front_matter = note.front_matter.len(),
                    sections = note.sections.len(),
                    "parsed note"
                );
                self.state = ParseState::Parsed(note);
            }
            match &mut self.state {
                ParseState::Parsed(note) => Ok(note),
                ParseState::Unparsed => Err(anyhow!("note {:?} is not parsed", self.path)),
            }
        }

        pub fn note(&mut self) -> Result<&ParsedNote> {
            self.ensure_parsed().map(|note| &*note)
        }

        pub fn front_matter(&mut self) -> Result<&MetadataBlock> {
            Ok(&self.ensure_parsed()?.front_matter)
        }

        pub fn sections(&mut self) -> Result<SectionIndex<'_>> {
            let handle = DirtyHandle::new(&self.dirty);
            let note = self.ensure_parsed()?;
            Ok(SectionIndex::new(&mut note.sections, handle))
        }

        pub fn set_front_matter_property(
            &mut self,
            key: impl Into<String>,
            value: impl Into<MetadataValue>,
        ) -> Result<&mut Self> {
            self.ensure_parsed()?.front_matter.set(key, value);
            self.dirty.set(true);
            Ok(self)
        }

        pub fn set_front_matter<I, K, V>(&mut self, entries: I) -> Result<&mut Self>
        where
            I: IntoIterator<Item = (K, V)>,
            K: Into<String>,
            V: Into<MetadataValue>,
        {
            for (key, value) in entries {
                self.set_front_matter_property(key, value)?;
            }
            Ok(self)
        }

        /// Marks the document dirty only when the key was present.
        pub fn remove_front_matter_property(&mut self, key: &str) -> Result<Option<MetadataValue>> {
            let removed = self.ensure_parsed()?.front_matter.remove(key);
            if removed.is_some() {
                self.dirty.set(true);
            }
            Ok(removed)
        }

        pub fn headers(&mut self) -> Result<Vec<Header>> {
            Ok(self.sections()?.headers())
        }

        /// Section text without the front matter.
        pub fn content(&mut self) -> Result<String> {
            Ok(format_sections(&self.ensure_parsed()?.sections))
        }

        /// The exact text `save` would write.
        pub fn render(&mut self) -> Result<String> {
            let note = self.ensure_parsed()?;
            Ok(format_note(&note.front_matter, &note.sections))
        }

        pub fn save(&mut self) -> Result<()> {
            let text = self.render()?;
            self.store
                .write(&self.path, &text)
                .with_context(|| format!("saving note {:?}", self.path))?;
            self.dirty.set(false);
            debug!(path = ?self.path, bytes = text.len(), "saved note");
            Ok(())
        }
    }

}

pub mod dates {
    //! Date strings used in task lines and daily notes.

    use crate::syntax;
    use chrono::NaiveDate;

    pub const ISO_DATE: &str = "%Y-%m-%d";

    /// `2025-10-05`
    pub fn to_iso(date: NaiveDate) -> String {
        date.format(ISO_DATE).to_string()
    }

    /// `2025-10-05.md`
    pub fn daily_file_name(date: NaiveDate) -> String {
        format!("{}.{}", to_iso(date), syntax::NOTE_EXTENSION)
    }

    /// `October 5, 2025`
    pub fn display_date(date: NaiveDate) -> String {
        date.format("%B %-d, %Y").to_string()
    }

    /// `Sunday`
    pub fn day_of_week(date: NaiveDate) -> String {
        date.format("%A").to_string()
    }

}

pub use document::Document;
pub use format::format_note;
pub use parser::{ParsedNote, parse_note};
