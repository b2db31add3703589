//! Text serialization contract for everything that passes through the sort engine.
//!
//! One record per line, lines terminated by `\r`. Key/value pairs are written as
//! `key<TAB>value`; text fields escape the delimiter, the separator, newlines and
//! backslashes so any string survives a round trip through a spill file.

use memchr::memchr;
use std::io::Write;
use thiserror::Error;

pub const RECORD_DELIMITER: u8 = b'\r';
pub const FIELD_SEPARATOR: u8 = b'\t';

#[derive(Debug, Error)]
#[error("malformed record {text:?}: {reason}")]
pub struct RecordError {
    text: String,
    reason: String,
}

impl RecordError {
    pub fn new(text: &[u8], reason: impl Into<String>) -> Self {
        Self { text: String::from_utf8_lossy(text).into_owned(), reason: reason.into() }
    }
}

/// A totally ordered value with a textual line form.
///
/// Records equal under `Ord` are duplicates: the sort engine keeps one instance
/// and a count, then writes that instance once per occurrence.
pub trait Record: Ord + Sized {
    /// Appends the textual form without the line delimiter.
    /// The output must never contain `\r`; keys of a [`KeyValue`] must not contain `\t` either.
    fn encode(&self, out: &mut Vec<u8>);

    /// Parses one line (delimiter already stripped).
    fn decode(text: &[u8]) -> Result<Self, RecordError>;
}

fn as_str(text: &[u8]) -> Result<&str, RecordError> {
    std::str::from_utf8(text).map_err(|e| RecordError::new(text, e.to_string()))
}

macro_rules! integer_record {
    ($($t:ty),*) => {$(
        impl Record for $t {
            fn encode(&self, out: &mut Vec<u8>) {
                // io::Write for Vec<u8> cannot fail
                let _ = write!(out, "{}", self);
            }

            fn decode(text: &[u8]) -> Result<Self, RecordError> {
                as_str(text)?.trim().parse::<$t>().map_err(|e| RecordError::new(text, e.to_string()))
            }
        }
    )*};
}

integer_record!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Record for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(if *self { b'1' } else { b'0' });
    }

    fn decode(text: &[u8]) -> Result<Self, RecordError> {
        match as_str(text)?.trim() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(RecordError::new(text, format!("expected 0 or 1, got {other:?}"))),
        }
    }
}

impl Record for String {
    fn encode(&self, out: &mut Vec<u8>) {
        for &b in self.as_bytes() {
            match b {
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\t' => out.extend_from_slice(b"\\t"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\n' => out.extend_from_slice(b"\\n"),
                _ => out.push(b),
            }
        }
    }

    fn decode(text: &[u8]) -> Result<Self, RecordError> {
        let mut bytes = Vec::with_capacity(text.len());
        let mut iter = text.iter();
        while let Some(&b) = iter.next() {
            if b != b'\\' {
                bytes.push(b);
                continue;
            }
            match iter.next() {
                Some(b'\\') => bytes.push(b'\\'),
                Some(b't') => bytes.push(b'\t'),
                Some(b'r') => bytes.push(b'\r'),
                Some(b'n') => bytes.push(b'\n'),
                Some(&other) => {
                    return Err(RecordError::new(text, format!("unknown escape \\{}", other as char)))
                }
                None => return Err(RecordError::new(text, "dangling escape")),
            }
        }
        String::from_utf8(bytes).map_err(|e| RecordError::new(text, e.to_string()))
    }
}

/// An intermediate pair, ordered by key then by value so that a sorted stream is
/// already grouped by key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyValue<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

/// Writes `key<TAB>value` without building a [`KeyValue`].
pub fn encode_pair<K: Record, V: Record>(key: &K, value: &V, out: &mut Vec<u8>) {
    key.encode(out);
    out.push(FIELD_SEPARATOR);
    value.encode(out);
}

impl<K: Record, V: Record> Record for KeyValue<K, V> {
    fn encode(&self, out: &mut Vec<u8>) {
        encode_pair(&self.key, &self.value, out);
    }

    fn decode(text: &[u8]) -> Result<Self, RecordError> {
        let tab = memchr(FIELD_SEPARATOR, text)
            .ok_or_else(|| RecordError::new(text, "missing key/value separator"))?;
        Ok(Self { key: K::decode(&text[..tab])?, value: V::decode(&text[tab + 1..])? })
    }
}
