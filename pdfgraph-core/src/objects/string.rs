use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// How a string's bytes are meant to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Text,
    Byte,
    Date,
}

/// Serialization syntax the string was read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Literal,
    Hex,
}

/// A PDF string. Equality, ordering and hashing look only at the bytes.
#[derive(Debug, Clone)]
pub struct PdfString {
    bytes: Vec<u8>,
    kind: StringKind,
    format: StringFormat,
}

impl PdfString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            kind: StringKind::Byte,
            format: StringFormat::Literal,
        }
    }

    pub fn hex(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format: StringFormat::Hex,
            ..Self::new(bytes)
        }
    }

    /// Encodes `text` as Latin-1 when every character fits, otherwise as
    /// UTF-16BE with a byte order mark.
    pub fn from_text(text: &str) -> Self {
        let bytes = if text.chars().all(|c| (c as u32) < 0x100) {
            text.chars().map(|c| c as u8).collect()
        } else {
            let mut bytes = vec![0xFE, 0xFF];
            for unit in text.encode_utf16() {
                bytes.extend_from_slice(&unit.to_be_bytes());
            }
            bytes
        };
        Self {
            bytes,
            kind: StringKind::Text,
            format: StringFormat::Literal,
        }
    }

    /// Formats `date` as `D:YYYYMMDDHHmmSSOHH'mm'`.
    pub fn from_date(date: &DateTime<FixedOffset>) -> Self {
        let offset = date.offset().local_minus_utc();
        let sign = if offset < 0 { '-' } else { '+' };
        let offset = offset.abs();
        let text = format!(
            "D:{:04}{:02}{:02}{:02}{:02}{:02}{}{:02}'{:02}'",
            date.year(),
            date.month(),
            date.day(),
            date.hour(),
            date.minute(),
            date.second(),
            sign,
            offset / 3600,
            (offset % 3600) / 60
        );
        Self {
            bytes: text.into_bytes(),
            kind: StringKind::Date,
            format: StringFormat::Literal,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn kind(&self) -> StringKind {
        self.kind
    }

    pub fn format(&self) -> StringFormat {
        self.format
    }

    pub fn with_kind(mut self, kind: StringKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the bytes as a text string (UTF-16BE or UTF-8 with BOM, else Latin-1).
    pub fn to_text(&self) -> String {
        match self.bytes.as_slice() {
            [0xFE, 0xFF, rest @ ..] => {
                let units: Vec<u16> = rest
                    .chunks(2)
                    .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
            bytes => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Parses the bytes as a PDF date. Missing trailing fields take their
    /// lowest value; a missing offset means UTC.
    pub fn to_date(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.bytes.strip_prefix(b"D:").unwrap_or(&self.bytes);
        let digits = raw.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits < 4 {
            return None;
        }

        let field = |start: usize, len: usize, default: u32| -> Option<u32> {
            if start + len > digits {
                return Some(default);
            }
            std::str::from_utf8(&raw[start..start + len])
                .ok()?
                .parse()
                .ok()
        };

        let year = field(0, 4, 0)? as i32;
        let month = field(4, 2, 1)?;
        let day = field(6, 2, 1)?;
        let hour = field(8, 2, 0)?;
        let minute = field(10, 2, 0)?;
        let second = field(12, 2, 0)?;

        let offset_seconds = match &raw[digits..] {
            [b'+' | b'-', rest @ ..] => {
                let sign = if raw[digits] == b'-' { -1 } else { 1 };
                let numbers: Vec<u32> = rest
                    .split(|b| !b.is_ascii_digit())
                    .filter(|part| !part.is_empty())
                    .filter_map(|part| std::str::from_utf8(part).ok()?.parse().ok())
                    .collect();
                let hours = numbers.first().copied().unwrap_or(0);
                let minutes = numbers.get(1).copied().unwrap_or(0);
                sign * (hours * 3600 + minutes * 60) as i32
            }
            _ => 0,
        };

        let offset = FixedOffset::east_opt(offset_seconds)?;
        let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
        offset.from_local_datetime(&naive).single()
    }
}

impl PartialEq for PdfString {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for PdfString {}

impl PartialOrd for PdfString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PdfString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for PdfString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl From<&str> for PdfString {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}
