//! Legacy `.ccf` command-table files.
//!
//! The first generation of the acquisition software stored its configuration
//! as a Python dictionary literal, one entry per parameter:
//!
//! ```text
//! {'gain': ['#G', None, 0, [0, 1]], 'frameformat': ['#R', ['FG_XOFFSET', ...], [0, 0, 1280, 1024], ...], ...}
//! ```
//!
//! Each entry is `[camera command, grabber parameter(s), value, valid range]`.
//! Files are loaded without evaluating anything: a small literal parser keeps
//! the source text and the byte span of every value slot, so saving splices
//! new values into the original text and leaves everything else untouched.

use super::camera::{CameraSettings, FrameWindow, Gain};
use crate::error::{AppResult, CameraError};
use std::fmt::Write as _;
use std::ops::Range;

/// A Python literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    /// `None`
    None,
    /// `True` or `False`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float together with its source text, so untouched values keep their spelling.
    Float { value: f64, text: String },
    /// Quoted string
    Str(String),
    /// `[...]`
    List(Vec<PyValue>),
    /// `(...)`
    Tuple(Vec<PyValue>),
    /// Key/value pairs in source order.
    Dict(Vec<(PyValue, PyValue)>),
}

impl PyValue {
    /// Float printed the way Python prints it.
    pub fn float(value: f64) -> Self {
        let text = if value.fract() == 0.0 && value.abs() < 1e16 {
            format!("{value:.1}")
        } else {
            format!("{value}")
        };
        PyValue::Float { value, text }
    }

    /// Numeric value; booleans count as 0 and 1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PyValue::Int(v) => Some(*v as f64),
            PyValue::Float { value, .. } => Some(*value),
            PyValue::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Contents of a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub fn as_list(&self) -> Option<&[PyValue]> {
        match self {
            PyValue::List(items) | PyValue::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Python `repr` of the value.
    pub fn to_python(&self) -> String {
        let mut out = String::new();
        self.write_python(&mut out);
        out
    }

    fn write_python(&self, out: &mut String) {
        match self {
            PyValue::None => out.push_str("None"),
            PyValue::Bool(true) => out.push_str("True"),
            PyValue::Bool(false) => out.push_str("False"),
            PyValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            PyValue::Float { text, .. } => out.push_str(text),
            PyValue::Str(s) => {
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
            PyValue::List(items) => {
                out.push('[');
                write_items(items, out);
                out.push(']');
            }
            PyValue::Tuple(items) => {
                out.push('(');
                write_items(items, out);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            PyValue::Dict(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_python(out);
                    out.push_str(": ");
                    v.write_python(out);
                }
                out.push('}');
            }
        }
    }
}

fn write_items(items: &[PyValue], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_python(out);
    }
}

/// One `key: [command, grabber, value, range]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntry {
    /// Key as written in the file
    pub key: String,
    /// Camera opcode, or `None` for grabber-only entries
    pub command: Option<String>,
    /// Grabber parameter names fed by this entry
    pub grabber: Vec<String>,
    /// Value slot
    pub value: PyValue,
    /// Declared `[min, max]`, as written
    pub range: PyValue,
    value_span: Range<usize>,
    dirty: bool,
}

impl LegacyEntry {
    /// Declared `[min, max]` bounds; `None` means unbounded.
    pub fn declared_range(&self) -> Option<(Option<f64>, Option<f64>)> {
        match self.range.as_list()? {
            [min, max] => Some((min.as_f64(), max.as_f64())),
            _ => None,
        }
    }

    fn check_range(&self, value: f64) -> AppResult<()> {
        if let Some((min, max)) = self.declared_range() {
            let below = min.is_some_and(|m| value < m);
            let above = max.is_some_and(|m| value > m);
            if below || above {
                return Err(CameraError::SettingsFormat(format!(
                    "'{}' value {value} outside its declared range {}",
                    self.key,
                    self.range.to_python()
                )));
            }
        }
        Ok(())
    }
}

/// Values of a legacy file that have no place in [`CameraSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyExtras {
    /// Ring capacity for counted recordings (`numpicsbuffer`)
    pub buffer_frames: Option<u32>,
    /// Frames to record after a trigger (`picsaftertrigger`)
    pub frames_after_trigger: Option<u32>,
}

/// A parsed `.ccf` file.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyDocument {
    source: String,
    entries: Vec<LegacyEntry>,
}

impl LegacyDocument {
    /// Parse a whole file. Unknown keys are kept verbatim.
    pub fn parse(text: &str) -> AppResult<Self> {
        let mut parser = Parser::new(text);
        let entries = parser
            .parse_document()
            .map_err(|e| CameraError::SettingsFormat(format!("legacy settings: {e}")))?;
        Ok(Self {
            source: text.to_string(),
            entries,
        })
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[LegacyEntry] {
        &self.entries
    }

    /// Entry named `key`, if present.
    pub fn entry(&self, key: &str) -> Option<&LegacyEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Camera settings described by the file; keys it lacks keep their defaults.
    pub fn to_settings(&self) -> AppResult<(CameraSettings, LegacyExtras)> {
        let mut settings = CameraSettings::default();
        let mut extras = LegacyExtras::default();

        for entry in &self.entries {
            if entry.key == "frameformat" {
                settings.set_window(window_from(entry)?);
                continue;
            }
            let Some(value) = entry.value.as_f64() else {
                continue;
            };
            // The gain slot holds a step index; its declared range predates
            // the full step list.
            if entry.key == "gain" {
                settings.gain = legacy_gain(value).ok_or_else(|| {
                    CameraError::SettingsFormat(format!("unsupported legacy gain index {value}"))
                })?;
                continue;
            }
            entry.check_range(value)?;
            let int = || to_u32(&entry.key, value);
            match entry.key.as_str() {
                "fpn" => settings.fpn_correction = int()? != 0,
                "framerate" => settings.framerate = int()?,
                "exptime" => settings.exposure = int()?,
                "dualslope" => settings.dualslope = int()? != 0,
                "dualslopetime" => settings.dualslope_time = int()?,
                "tripleslope" => settings.tripleslope = int()? != 0,
                "tripleslopetime" => settings.tripleslope_time = int()?,
                "blacklevel" => settings.blacklevel = int()?,
                "numpicsbuffer" => extras.buffer_frames = Some(int()?),
                "picsaftertrigger" => extras.frames_after_trigger = Some(int()?),
                other => tracing::debug!(key = other, "Ignoring unknown legacy settings key"),
            }
        }

        Ok((settings, extras))
    }

    /// Write `settings` into the value slots whose meaning changed.
    pub fn update_from(&mut self, settings: &CameraSettings) {
        for entry in &mut self.entries {
            let next = match entry.key.as_str() {
                "gain" => {
                    if entry.value.as_f64().and_then(legacy_gain) == Some(settings.gain) {
                        continue;
                    }
                    PyValue::Int(settings.gain.index() as i64)
                }
                "frameformat" => {
                    let window = settings.window();
                    if window_from(entry).ok() == Some(window) {
                        continue;
                    }
                    PyValue::List(
                        [window.x, window.y, window.width, window.height]
                            .into_iter()
                            .map(|v| PyValue::Int(i64::from(v)))
                            .collect(),
                    )
                }
                "fpn" => flag(settings.fpn_correction),
                "framerate" => PyValue::Int(i64::from(settings.framerate)),
                "exptime" => PyValue::Int(i64::from(settings.exposure)),
                "dualslope" => flag(settings.dualslope),
                "dualslopetime" => PyValue::Int(i64::from(settings.dualslope_time)),
                "tripleslope" => flag(settings.tripleslope),
                "tripleslopetime" => PyValue::Int(i64::from(settings.tripleslope_time)),
                "blacklevel" => PyValue::Int(i64::from(settings.blacklevel)),
                _ => continue,
            };
            if let PyValue::List(_) = next {
                entry.value = next;
            } else {
                let Some(number) = next.as_f64() else {
                    continue;
                };
                if entry.value.as_f64() == Some(number) {
                    continue;
                }
                entry.value = number_like(&entry.value, number);
            }
            entry.dirty = true;
        }
    }

    /// File text with every changed value spliced in.
    pub fn render(&self) -> String {
        let mut dirty: Vec<&LegacyEntry> = self.entries.iter().filter(|e| e.dirty).collect();
        dirty.sort_by_key(|e| e.value_span.start);

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for entry in dirty {
            out.push_str(&self.source[cursor..entry.value_span.start]);
            out.push_str(&entry.value.to_python());
            cursor = entry.value_span.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

/// Legacy files store the index of the gain step, not the gain itself.
fn legacy_gain(value: f64) -> Option<Gain> {
    if value.fract() == 0.0 && value >= 0.0 {
        Gain::ALL.get(value as usize).copied()
    } else {
        None
    }
}

fn flag(on: bool) -> PyValue {
    PyValue::Int(i64::from(on))
}

/// `value` spelled like `template`: integers stay integers where possible.
fn number_like(template: &PyValue, value: f64) -> PyValue {
    match template {
        PyValue::Float { .. } => PyValue::float(value),
        _ if value.fract() == 0.0 => PyValue::Int(value as i64),
        _ => PyValue::float(value),
    }
}

fn to_u32(key: &str, value: f64) -> AppResult<u32> {
    if value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Err(CameraError::SettingsFormat(format!(
            "'{key}' must be a non-negative integer, got {value}"
        )))
    }
}

fn window_from(entry: &LegacyEntry) -> AppResult<FrameWindow> {
    let values: Vec<f64> = entry
        .value
        .as_list()
        .map(|items| items.iter().filter_map(PyValue::as_f64).collect())
        .unwrap_or_default();
    match values.as_slice() {
        [x, y, w, h] => Ok(FrameWindow {
            x: to_u32("frameformat", *x)?,
            y: to_u32("frameformat", *y)?,
            width: to_u32("frameformat", *w)?,
            height: to_u32("frameformat", *h)?,
        }),
        _ => Err(CameraError::SettingsFormat(
            "'frameformat' must hold [x, y, width, height]".to_string(),
        )),
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

type ParseResult<T> = Result<T, String>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn parse_document(&mut self) -> ParseResult<Vec<LegacyEntry>> {
        self.skip_ws();
        self.expect(b'{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                break;
            }
            let key = match self.parse_value()?.0 {
                PyValue::Str(key) => key,
                other => return Err(format!("expected string key, got {}", other.to_python())),
            };
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            self.expect(b'[')?;
            let items = self.parse_items(b']')?;
            entries.push(entry_from(key, items)?);
            self.skip_ws();
            if !self.eat(b',') {
                self.skip_ws();
                self.expect(b'}')?;
                break;
            }
        }
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(format!("unexpected trailing text at byte {}", self.pos));
        }
        Ok(entries)
    }

    /// Items up to `close`, each with its byte span. The opening bracket is consumed.
    fn parse_items(&mut self, close: u8) -> ParseResult<Vec<(PyValue, Range<usize>)>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            if !self.eat(b',') {
                self.skip_ws();
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn parse_value(&mut self) -> ParseResult<(PyValue, Range<usize>)> {
        self.skip_ws();
        let start = self.pos;
        let value = match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                PyValue::List(self.parse_items(b']')?.into_iter().map(|(v, _)| v).collect())
            }
            Some(b'(') => {
                self.pos += 1;
                PyValue::Tuple(self.parse_items(b')')?.into_iter().map(|(v, _)| v).collect())
            }
            Some(b'{') => {
                self.pos += 1;
                self.parse_dict()?
            }
            Some(q @ (b'\'' | b'"')) => self.parse_string(q)?,
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.parse_number()?,
            Some(_) => self.parse_word()?,
            None => return Err("unexpected end of input".to_string()),
        };
        Ok((value, start..self.pos))
    }

    fn parse_dict(&mut self) -> ParseResult<PyValue> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                return Ok(PyValue::Dict(entries));
            }
            let key = self.parse_value()?.0;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?.0;
            entries.push((key, value));
            self.skip_ws();
            if !self.eat(b',') {
                self.skip_ws();
                self.expect(b'}')?;
                return Ok(PyValue::Dict(entries));
            }
        }
    }

    fn parse_string(&mut self, quote: u8) -> ParseResult<PyValue> {
        self.pos += 1;
        let mut out = String::new();
        let mut chunk_start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'\\' => {
                    out.push_str(&self.src[chunk_start..self.pos]);
                    match self.bytes.get(self.pos + 1).copied() {
                        Some(escaped) if escaped.is_ascii() => {
                            out.push(match escaped {
                                b'n' => '\n',
                                b't' => '\t',
                                other => char::from(other),
                            });
                            self.pos += 2;
                        }
                        Some(_) => {
                            out.push('\\');
                            self.pos += 1;
                        }
                        None => return Err("unterminated escape".to_string()),
                    }
                    chunk_start = self.pos;
                }
                b if b == quote => {
                    out.push_str(&self.src[chunk_start..self.pos]);
                    self.pos += 1;
                    return Ok(PyValue::Str(out));
                }
                _ => self.pos += 1,
            }
        }
        Err("unterminated string".to_string())
    }

    fn parse_number(&mut self) -> ParseResult<PyValue> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E' | b'_') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        let clean = text.replace('_', "");
        if let Ok(v) = clean.parse::<i64>() {
            return Ok(PyValue::Int(v));
        }
        clean
            .parse::<f64>()
            .map(|value| PyValue::Float {
                value,
                text: text.to_string(),
            })
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn parse_word(&mut self) -> ParseResult<PyValue> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            "None" => Ok(PyValue::None),
            "True" => Ok(PyValue::Bool(true)),
            "False" => Ok(PyValue::Bool(false)),
            "" => Err(format!("unexpected character at byte {start}")),
            other => Err(format!("unsupported expression '{other}'")),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> ParseResult<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(format!("expected '{}' at byte {}", char::from(b), self.pos))
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}

fn entry_from(key: String, items: Vec<(PyValue, Range<usize>)>) -> ParseResult<LegacyEntry> {
    let mut items = items.into_iter();
    let (Some((command, _)), Some((grabber, _)), Some((value, value_span)), Some((range, _))) =
        (items.next(), items.next(), items.next(), items.next())
    else {
        return Err(format!("entry '{key}' must have four fields"));
    };

    let command = match command {
        PyValue::None => None,
        PyValue::Str(s) => Some(s),
        other => return Err(format!("entry '{key}': bad command {}", other.to_python())),
    };
    let grabber = match grabber {
        PyValue::None => Vec::new(),
        PyValue::Str(s) => vec![s],
        PyValue::List(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        other => return Err(format!("entry '{key}': bad grabber field {}", other.to_python())),
    };

    Ok(LegacyEntry {
        key,
        command,
        grabber,
        value,
        range,
        value_span,
        dirty: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = "{'gain': ['#G', None, 0, [0, 1]], 'fpn': ['#F', None, 1, [0, 1]], \
'frameformat': ['#R', ['FG_XOFFSET', 'FG_YOFFSET', 'FG_WIDTH', 'FG_HEIGHT'], [0, 0, 1280, 1024], \
[[0, 1280], [0, 1024], [1, 1280], [1, 1024]]], 'framerate': ['#r', 'FG_FRAMESPERSEC', 400, [20, None]], \
'exptime': ['#e', 'FG_EXPOSURE', 1000, [1, None]], 'dualslope': ['#D', None, 0, [0, 1]], \
'dualslopetime': ['#d', None, 1, [1, 1000]], 'tripleslope': ['#T', None, 0, [0, 1]], \
'tripleslopetime': ['#t', None, 1, [1, 150]], 'blacklevel': ['#z', None, 100, [0, 255]], \
'numpicsbuffer': [None, None, 1000, [1, None]], 'picsaftertrigger': [None, None, 0, [None, None]]}\n";

    #[test]
    fn parses_the_command_table() {
        let doc = LegacyDocument::parse(LEGACY).unwrap();
        assert_eq!(doc.entries().len(), 12);

        let frameformat = doc.entry("frameformat").unwrap();
        assert_eq!(frameformat.command.as_deref(), Some("#R"));
        assert_eq!(frameformat.grabber.len(), 4);

        let framerate = doc.entry("framerate").unwrap();
        assert_eq!(framerate.declared_range(), Some((Some(20.0), None)));
    }

    #[test]
    fn converts_to_settings() {
        let doc = LegacyDocument::parse(LEGACY).unwrap();
        let (settings, extras) = doc.to_settings().unwrap();
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.height, 1024);
        assert_eq!(settings.framerate, 400);
        assert_eq!(settings.exposure, 1000);
        assert_eq!(settings.gain, Gain::X1);
        assert!(settings.fpn_correction);
        assert_eq!(extras.buffer_frames, Some(1000));
        assert_eq!(extras.frames_after_trigger, Some(0));
    }

    #[test]
    fn unchanged_document_renders_byte_identical() {
        let mut doc = LegacyDocument::parse(LEGACY).unwrap();
        let (settings, _) = doc.to_settings().unwrap();
        doc.update_from(&settings);
        assert_eq!(doc.render(), LEGACY);
    }

    #[test]
    fn hand_formatted_document_survives_round_trip() {
        let text = "{'gain':             ['#G', None,0, [0, 1]],\n 'exptime': ['#e', 'FG_EXPOSURE', 1000, [1, None]],\n}\n";
        let mut doc = LegacyDocument::parse(text).unwrap();
        let (settings, _) = doc.to_settings().unwrap();
        doc.update_from(&settings);
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn changed_values_are_spliced_in_place() {
        let mut doc = LegacyDocument::parse(LEGACY).unwrap();
        let (mut settings, _) = doc.to_settings().unwrap();
        settings.exposure = 750;
        settings.width = 960;
        doc.update_from(&settings);

        let text = doc.render();
        assert!(text.contains("'exptime': ['#e', 'FG_EXPOSURE', 750, [1, None]]"));
        assert!(text.contains("[0, 0, 960, 1024]"));
        assert!(text.contains("'framerate': ['#r', 'FG_FRAMESPERSEC', 400, [20, None]]"));

        let reparsed = LegacyDocument::parse(&text).unwrap();
        assert_eq!(reparsed.to_settings().unwrap().0, settings);
    }

    #[test]
    fn every_gain_survives_save_and_reload() {
        for gain in Gain::ALL {
            let mut doc = LegacyDocument::parse(LEGACY).unwrap();
            let (mut settings, _) = doc.to_settings().unwrap();
            settings.gain = gain;
            doc.update_from(&settings);

            let text = doc.render();
            let expected = format!("'gain': ['#G', None, {}, [0, 1]]", gain.index());
            assert!(text.contains(&expected), "{gain}: {text}");

            let reparsed = LegacyDocument::parse(&text).unwrap();
            assert_eq!(reparsed.to_settings().unwrap().0.gain, gain);
        }
    }

    #[test]
    fn gain_slot_is_an_index() {
        let doc = LegacyDocument::parse("{'gain': ['#G', None, 3, [0, 1]]}").unwrap();
        assert_eq!(doc.to_settings().unwrap().0.gain, Gain::X2_25);

        for bad in ["1.5", "6", "-1"] {
            let text = format!("{{'gain': ['#G', None, {bad}, [0, 1]]}}");
            let doc = LegacyDocument::parse(&text).unwrap();
            assert!(
                matches!(doc.to_settings(), Err(CameraError::SettingsFormat(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn out_of_range_value_is_a_format_error() {
        let text = "{'tripleslopetime': ['#t', None, 500, [1, 150]]}";
        let doc = LegacyDocument::parse(text).unwrap();
        assert!(matches!(
            doc.to_settings(),
            Err(CameraError::SettingsFormat(_))
        ));
    }

    #[test]
    fn rejects_code() {
        assert!(LegacyDocument::parse("{'gain': ['#G', None, __import__('os'), [0, 1]]}").is_err());
        assert!(LegacyDocument::parse("{'gain': ['#G', None, 1]}").is_err());
    }

    #[test]
    fn python_repr_of_new_values() {
        assert_eq!(PyValue::float(2.0).to_python(), "2.0");
        assert_eq!(PyValue::float(2.25).to_python(), "2.25");
        assert_eq!(
            PyValue::Tuple(vec![PyValue::Int(1)]).to_python(),
            "(1,)"
        );
        assert_eq!(PyValue::Str("it's".into()).to_python(), "'it\\'s'");
    }
}
