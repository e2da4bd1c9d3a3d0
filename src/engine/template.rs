//! 输出路径模板（`%(field)s` / `%(field)03d` 风格）。
//!
//! 模板解析一次，之后按条目元数据渲染出目标路径；同一份模板也会原样交给引擎。

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

use super::ItemInfo;

pub const FIELD_ID: &str = "id";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_EXT: &str = "ext";
pub const FIELD_PLAYLIST_INDEX: &str = "playlist_index";

const KNOWN_FIELDS: [&str; 4] = [FIELD_ID, FIELD_TITLE, FIELD_EXT, FIELD_PLAYLIST_INDEX];

static RE_PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn re_placeholder() -> &'static Regex {
    RE_PLACEHOLDER.get_or_init(|| {
        Regex::new(r"%(?:%|\((?P<name>[A-Za-z_][A-Za-z0-9_]*)\)(?P<flags>[-0 #+]*)(?P<width>\d*)(?P<conv>[sd]))")
            .expect("compile RE_PLACEHOLDER")
    })
}

/// 被替换字符的标记，清理结束前会全部移除。
const SUBSTITUTE: char = '\0';
const SUBSTITUTE_RUN: &str = "\0 ";

static RE_TIMESTAMP: OnceLock<Regex> = OnceLock::new();
static RE_REPEATED_SUBSTITUTE: OnceLock<Regex> = OnceLock::new();
static RE_EDGE_SUBSTITUTE: OnceLock<Regex> = OnceLock::new();

fn re_timestamp() -> &'static Regex {
    RE_TIMESTAMP.get_or_init(|| Regex::new(r"[0-9]+(?::[0-9]+)+").expect("compile RE_TIMESTAMP"))
}

fn re_repeated_substitute() -> &'static Regex {
    RE_REPEATED_SUBSTITUTE
        .get_or_init(|| Regex::new(r"(?:\x00 ){2,}").expect("compile RE_REPEATED_SUBSTITUTE"))
}

/// 开头或结尾的标记，连同相邻的 `[ _-]`。
fn re_edge_substitute() -> &'static Regex {
    RE_EDGE_SUBSTITUTE.get_or_init(|| {
        Regex::new(r"(?s)^\x00.(?:\x00.|[ _-])*|(?:\x00.|[ _-])*\x00.$")
            .expect("compile RE_EDGE_SUBSTITUTE")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown template field `{0}`")]
    UnknownField(String),
    #[error("item has no value for template field `{0}`")]
    MissingField(String),
    #[error("template field `{field}` cannot be formatted with `%{conversion}`")]
    BadConversion { field: String, conversion: char },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    name: String,
    zero_pad: bool,
    width: usize,
    conversion: char,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// 从条目元数据中取出的值。
#[derive(Debug, Clone, Copy)]
enum FieldValue<'a> {
    Text(&'a str),
    Number(u64),
}

/// 输出目录 + 逐条目的文件名模式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    dir: PathBuf,
    segments: Vec<Segment>,
}

impl OutputTemplate {
    pub fn parse(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            dir: dir.into(),
            segments: parse_segments(pattern)?,
        })
    }

    /// 文件名模式，字面 `%` 会重新转义。
    pub fn pattern(&self) -> String {
        self.segments
            .iter()
            .map(|seg| match seg {
                Segment::Literal(text) => text.replace('%', "%%"),
                Segment::Field(ph) => ph.raw.clone(),
            })
            .collect()
    }

    /// 交给引擎的完整模板：目录拼接文件名模式。
    pub fn engine_template(&self) -> String {
        let dir = self.dir.to_string_lossy().replace('%', "%%");
        PathBuf::from(dir)
            .join(self.pattern())
            .to_string_lossy()
            .into_owned()
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|seg| matches!(seg, Segment::Field(ph) if ph.name == name))
    }

    /// 去掉所有 `name` 占位符及其后紧跟的一个分隔符，
    /// 例如 `%(playlist_index)03d-%(title)s` 变为 `%(title)s`。
    pub fn without_field(&self, name: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        let mut strip_separator = false;
        for seg in &self.segments {
            match seg {
                Segment::Field(ph) if ph.name == name => {
                    strip_separator = true;
                }
                Segment::Literal(text) if strip_separator => {
                    strip_separator = false;
                    let rest = text
                        .strip_prefix(['-', '_', ' ', '.'])
                        .unwrap_or(text.as_str());
                    if !rest.is_empty() {
                        push_literal(&mut segments, rest);
                    }
                }
                Segment::Literal(text) => push_literal(&mut segments, text),
                other => {
                    strip_separator = false;
                    segments.push(other.clone());
                }
            }
        }
        Self {
            dir: self.dir.clone(),
            segments,
        }
    }

    /// 该条目实际使用的模板：不在播放列表中的条目使用去掉序号占位符的版本。
    pub fn for_item(&self, info: &ItemInfo) -> Cow<'_, Self> {
        if info.playlist_index.is_none() && self.contains_field(FIELD_PLAYLIST_INDEX) {
            Cow::Owned(self.without_field(FIELD_PLAYLIST_INDEX))
        } else {
            Cow::Borrowed(self)
        }
    }

    pub fn render(&self, info: &ItemInfo) -> Result<PathBuf, TemplateError> {
        let mut name = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => name.push_str(text),
                Segment::Field(ph) => {
                    let value = lookup(info, &ph.name)
                        .ok_or_else(|| TemplateError::MissingField(ph.name.clone()))?;
                    name.push_str(&format_value(ph, value)?);
                }
            }
        }
        Ok(self.dir.join(name))
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Literal(prev)) = segments.last_mut() {
        prev.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_string()));
    }
}

fn parse_segments(pattern: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut last = 0;

    for caps in re_placeholder().captures_iter(pattern) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        literal.push_str(&pattern[last..whole.start()]);
        last = whole.end();

        let Some(name) = caps.name("name") else {
            // `%%`
            literal.push('%');
            continue;
        };
        let name = name.as_str();
        if !KNOWN_FIELDS.contains(&name) {
            return Err(TemplateError::UnknownField(name.to_string()));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        let flags = caps.name("flags").map(|m| m.as_str()).unwrap_or("");
        let width = caps
            .name("width")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let conversion = caps
            .name("conv")
            .and_then(|m| m.as_str().chars().next())
            .unwrap_or('s');
        segments.push(Segment::Field(Placeholder {
            name: name.to_string(),
            zero_pad: flags.contains('0'),
            width,
            conversion,
            raw: whole.as_str().to_string(),
        }));
    }

    literal.push_str(&pattern[last..]);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn lookup<'a>(info: &'a ItemInfo, name: &str) -> Option<FieldValue<'a>> {
    match name {
        FIELD_ID => info.id.as_deref().map(FieldValue::Text),
        FIELD_TITLE => info.title.as_deref().map(FieldValue::Text),
        FIELD_EXT => info.ext.as_deref().map(FieldValue::Text),
        FIELD_PLAYLIST_INDEX => info.playlist_index.map(FieldValue::Number),
        _ => None,
    }
}

fn format_value(ph: &Placeholder, value: FieldValue<'_>) -> Result<String, TemplateError> {
    let width = ph.width;
    match (ph.conversion, value) {
        ('d', FieldValue::Number(n)) if ph.zero_pad => Ok(format!("{n:0width$}")),
        ('d', FieldValue::Number(n)) => Ok(format!("{n:width$}")),
        ('s', FieldValue::Number(n)) => Ok(format!("{n:width$}")),
        ('s', FieldValue::Text(text)) => Ok(format!("{:width$}", sanitize_component(text))),
        (conversion, _) => Err(TemplateError::BadConversion {
            field: ph.name.clone(),
            conversion,
        }),
    }
}

/// 把元数据值变成单个安全的路径分量，规则与引擎默认（非 restricted）的文件名清理一致。
pub fn sanitize_component(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let value = re_timestamp().replace_all(value, |caps: &Captures<'_>| caps[0].replace(':', "_"));
    let mut marked = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => {
                marked.push(SUBSTITUTE);
                marked.push(' ');
            }
            '/' => marked.push('\u{29F8}'),
            '\\' => marked.push('\u{29F9}'),
            // 全角对应字符
            '"' | '*' | ':' | '<' | '>' | '?' | '|' => {
                if let Some(wide) = char::from_u32(ch as u32 + 0xFEE0) {
                    marked.push(wide);
                }
            }
            c if (c as u32) < 32 || c as u32 == 127 => {}
            c => marked.push(c),
        }
    }

    let marked = re_repeated_substitute().replace_all(&marked, SUBSTITUTE_RUN);
    let marked = re_edge_substitute().replace_all(&marked, "");
    let mut cleaned: String = marked.chars().filter(|&c| c != SUBSTITUTE).collect();
    if cleaned.is_empty() {
        return "_".to_string();
    }

    while cleaned.contains("__") {
        cleaned = cleaned.replace("__", "_");
    }
    let mut cleaned = cleaned.trim_matches('_').to_string();
    if let Some(rest) = cleaned.strip_prefix('-') {
        cleaned = format!("_{rest}");
    }
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, ext: &str, index: Option<u64>) -> ItemInfo {
        ItemInfo {
            id: Some("abc".to_string()),
            title: Some(title.to_string()),
            ext: Some(ext.to_string()),
            playlist_index: index,
        }
    }

    #[test]
    fn renders_zero_padded_index() {
        let tpl = OutputTemplate::parse("out", "%(playlist_index)03d-%(title)s.%(ext)s").unwrap();
        let path = tpl.render(&item("Song", "mp3", Some(7))).unwrap();
        assert_eq!(path, PathBuf::from("out").join("007-Song.mp3"));
    }

    #[test]
    fn missing_index_is_reported_by_name() {
        let tpl = OutputTemplate::parse("out", "%(playlist_index)03d-%(title)s.%(ext)s").unwrap();
        let err = tpl.render(&item("Song", "mp3", None)).unwrap_err();
        assert_eq!(err, TemplateError::MissingField(FIELD_PLAYLIST_INDEX.to_string()));
    }

    #[test]
    fn without_field_strips_placeholder_and_separator() {
        let tpl = OutputTemplate::parse("out", "%(playlist_index)03d-%(title)s.%(ext)s").unwrap();
        let stripped = tpl.without_field(FIELD_PLAYLIST_INDEX);
        assert_eq!(stripped.pattern(), "%(title)s.%(ext)s");
        assert!(!stripped.contains_field(FIELD_PLAYLIST_INDEX));
        assert_eq!(
            stripped.render(&item("Song", "mp3", None)).unwrap(),
            PathBuf::from("out").join("Song.mp3")
        );
    }

    #[test]
    fn for_item_keeps_template_inside_playlist() {
        let tpl = OutputTemplate::parse("out", "%(playlist_index)03d-%(title)s.%(ext)s").unwrap();
        assert!(matches!(tpl.for_item(&item("a", "mp4", Some(1))), Cow::Borrowed(_)));
        assert_eq!(
            tpl.for_item(&item("a", "mp4", None)).pattern(),
            "%(title)s.%(ext)s"
        );
    }

    #[test]
    fn unknown_field_is_rejected_at_parse_time() {
        let err = OutputTemplate::parse("out", "%(uploader)s.%(ext)s").unwrap_err();
        assert_eq!(err, TemplateError::UnknownField("uploader".to_string()));
    }

    #[test]
    fn number_conversion_on_text_is_an_error() {
        let tpl = OutputTemplate::parse("out", "%(title)03d").unwrap();
        let err = tpl.render(&item("Song", "mp3", Some(1))).unwrap_err();
        assert!(matches!(err, TemplateError::BadConversion { conversion: 'd', .. }));
    }

    #[test]
    fn engine_template_escapes_percent_in_directory() {
        let tpl = OutputTemplate::parse("100%", "%(title)s.%(ext)s").unwrap();
        assert_eq!(
            tpl.engine_template(),
            PathBuf::from("100%%")
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
        );
    }

    #[test]
    fn literal_percent_survives_round_trip() {
        let tpl = OutputTemplate::parse("out", "100%% %(title)s.%(ext)s").unwrap();
        assert_eq!(tpl.pattern(), "100%% %(title)s.%(ext)s");
        assert_eq!(
            tpl.render(&item("x", "mp4", None)).unwrap(),
            PathBuf::from("out").join("100% x.mp4")
        );
    }

    #[test]
    fn sanitize_replaces_separators_and_reserved_chars() {
        assert_eq!(sanitize_component("AC/DC: Live?"), "AC⧸DC： Live？");
        assert_eq!(sanitize_component("-intro"), "_intro");
        assert_eq!(sanitize_component("..hidden"), "hidden");
        assert_eq!(sanitize_component("a\u{7}b"), "ab");
        assert_eq!(sanitize_component(""), "");
        assert_eq!(sanitize_component("?"), "？");
    }

    #[test]
    fn timestamp_colons_become_underscores() {
        assert_eq!(sanitize_component("Live at 10:30"), "Live at 10_30");
        assert_eq!(sanitize_component("Set 1:02:03 - Intro: Part"), "Set 1_02_03 - Intro： Part");
    }

    #[test]
    fn line_breaks_are_trimmed_at_the_edges() {
        assert_eq!(sanitize_component("\nIntro"), "Intro");
        assert_eq!(sanitize_component("Outro -\n"), "Outro");
        assert_eq!(sanitize_component("Side A\n\nSide B"), "Side A Side B");
        assert_eq!(sanitize_component("\n"), "_");
    }
}
