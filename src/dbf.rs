//! Minimal dBASE III attribute table codec.
//!
//! Only what the classification rewrite needs: header and field descriptors
//! are parsed, records stay as raw byte rows so untouched values round-trip
//! exactly. Layout reference: 32-byte file header, 32-byte field descriptors
//! terminated by `0x0D`, then fixed-width records prefixed by a deletion flag.

use std::fmt;

use chrono::Datelike;
use serde::Serialize;

use crate::error::HarvestError;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const FIELD_TERMINATOR: u8 = 0x0D;
const EOF_MARKER: u8 = 0x1A;
const MAX_FIELD_NAME: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: char,
    pub length: u8,
    pub decimals: u8,
    raw: [u8; DESCRIPTOR_LEN],
}

impl FieldDescriptor {
    pub fn numeric(name: &str, length: u8, decimals: u8) -> Result<Self, HarvestError> {
        if name.is_empty() || name.len() > MAX_FIELD_NAME || !name.is_ascii() {
            return Err(HarvestError::AttributeWriteFailure(format!(
                "invalid field name {name}"
            )));
        }
        let mut raw = [0u8; DESCRIPTOR_LEN];
        raw[..name.len()].copy_from_slice(name.as_bytes());
        raw[11] = b'N';
        raw[16] = length;
        raw[17] = decimals;
        Ok(Self {
            name: name.to_string(),
            field_type: 'N',
            length,
            decimals,
            raw,
        })
    }

    fn parse(raw: &[u8]) -> Self {
        let mut bytes = [0u8; DESCRIPTOR_LEN];
        bytes.copy_from_slice(&raw[..DESCRIPTOR_LEN]);
        let name_end = bytes[..11].iter().position(|b| *b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&bytes[..name_end]).trim().to_string();
        Self {
            name,
            field_type: bytes[11] as char,
            length: bytes[16],
            decimals: bytes[17],
            raw: bytes,
        }
    }

    /// Fixed-width rendering of an integer value for this field.
    fn format_integer(&self, value: i64) -> Result<Vec<u8>, HarvestError> {
        let width = self.length as usize;
        let text = match self.field_type.to_ascii_uppercase() {
            'N' | 'F' if self.decimals > 0 => {
                format!("{:>width$.prec$}", value as f64, prec = self.decimals as usize)
            }
            'N' | 'F' => format!("{value:>width$}"),
            'C' => format!("{value:<width$}"),
            other => {
                return Err(HarvestError::AttributeWriteFailure(format!(
                    "field {} has type {other}, cannot store an integer",
                    self.name
                )));
            }
        };
        if text.len() > width {
            return Err(HarvestError::AttributeWriteFailure(format!(
                "value {value} does not fit field {} (width {width})",
                self.name
            )));
        }
        Ok(text.into_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Cp1252,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Latin1 => write!(f, "latin1"),
            TextEncoding::Cp1252 => write!(f, "cp1252"),
        }
    }
}

impl TextEncoding {
    /// `None` when `bytes` is not valid text in this encoding. Latin-1 maps
    /// every byte, so it never fails.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            TextEncoding::Latin1 => Some(bytes.iter().map(|b| *b as char).collect()),
            TextEncoding::Cp1252 => bytes.iter().map(|b| cp1252_char(*b)).collect(),
        }
    }
}

fn cp1252_char(byte: u8) -> Option<char> {
    const HIGH: [Option<char>; 32] = [
        Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
        Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
        Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
        Some('\u{0152}'), None, Some('\u{017D}'), None,
        None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
        Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
        Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
        Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
    ];
    match byte {
        0x80..=0x9F => HIGH[(byte - 0x80) as usize],
        _ => Some(byte as char),
    }
}

#[derive(Debug, Clone)]
pub struct DbfTable {
    header: [u8; HEADER_LEN],
    fields: Vec<FieldDescriptor>,
    /// Bytes between the descriptor terminator and the first record
    /// (Visual FoxPro backlink area, padding).
    header_tail: Vec<u8>,
    records: Vec<Vec<u8>>,
}

impl DbfTable {
    pub fn parse(bytes: &[u8]) -> Result<Self, HarvestError> {
        if bytes.len() < HEADER_LEN + 1 {
            return Err(malformed("file shorter than its header"));
        }
        let version = bytes[0];
        if version & 0x07 == 0x04 {
            return Err(malformed("dBASE 7 tables are not supported"));
        }
        let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
        if header_len < HEADER_LEN + 1 || header_len > bytes.len() {
            return Err(malformed("invalid header length"));
        }

        let mut fields = Vec::new();
        let mut pos = HEADER_LEN;
        while pos < header_len && bytes[pos] != FIELD_TERMINATOR {
            if pos + DESCRIPTOR_LEN > header_len {
                return Err(malformed("truncated field descriptor"));
            }
            fields.push(FieldDescriptor::parse(&bytes[pos..pos + DESCRIPTOR_LEN]));
            pos += DESCRIPTOR_LEN;
        }
        if pos >= header_len {
            return Err(malformed("missing field terminator"));
        }
        let header_tail = bytes[pos + 1..header_len].to_vec();

        let expected_len = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
        if record_len != expected_len {
            return Err(malformed("record length does not match field widths"));
        }
        let data_end = header_len + record_count * record_len;
        if data_end > bytes.len() {
            return Err(malformed("fewer records than declared"));
        }
        let records = bytes[header_len..data_end]
            .chunks(record_len)
            .map(<[u8]>::to_vec)
            .collect();

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        Ok(Self {
            header,
            fields,
            header_tail,
            records,
        })
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// Raw bytes of one value, padding included.
    pub fn value(&self, record: usize, field: usize) -> Option<&[u8]> {
        let row = self.records.get(record)?;
        let descriptor = self.fields.get(field)?;
        let start = self.field_offset(field);
        row.get(start..start + descriptor.length as usize)
    }

    /// Raw bytes of every character or memo value.
    fn text_values(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let text_fields: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| matches!(field.field_type.to_ascii_uppercase(), 'C' | 'M'))
            .map(|(index, _)| index)
            .collect();
        (0..self.records.len()).flat_map(move |record| {
            text_fields
                .clone()
                .into_iter()
                .filter_map(move |field| self.value(record, field))
        })
    }

    /// Whether every character field of every record decodes under `encoding`.
    pub fn decodes_with(&self, encoding: TextEncoding) -> bool {
        self.text_values()
            .all(|bytes| encoding.decode(bytes).is_some())
    }

    /// First encoding of `candidates` the table decodes under.
    pub fn detect_encoding(&self, candidates: &[TextEncoding]) -> Option<TextEncoding> {
        candidates
            .iter()
            .copied()
            .find(|encoding| self.decodes_with(*encoding))
    }

    /// Label for text accepted under `accepted`. Latin-1 text whose C1 bytes
    /// all map to cp1252 characters is reported as cp1252; acceptance is
    /// unaffected.
    pub fn reported_encoding(&self, accepted: TextEncoding) -> TextEncoding {
        if accepted != TextEncoding::Latin1 {
            return accepted;
        }
        let c1: Vec<u8> = self
            .text_values()
            .flat_map(|bytes| bytes.iter().copied())
            .filter(|b| (0x80..=0x9F).contains(b))
            .collect();
        if !c1.is_empty() && c1.iter().all(|b| cp1252_char(*b).is_some()) {
            TextEncoding::Cp1252
        } else {
            TextEncoding::Latin1
        }
    }

    /// Sets `name` to `value` in every record, appending a numeric field of
    /// `width` digits when the table has none. Returns whether a field was added.
    pub fn set_integer_field(
        &mut self,
        name: &str,
        width: u8,
        value: i64,
    ) -> Result<bool, HarvestError> {
        match self.field_index(name) {
            Some(index) => {
                let start = self.field_offset(index);
                let formatted = self.fields[index].format_integer(value)?;
                let end = start + formatted.len();
                for row in &mut self.records {
                    row[start..end].copy_from_slice(&formatted);
                }
                Ok(false)
            }
            None => {
                let field = FieldDescriptor::numeric(name, width, 0)?;
                let formatted = field.format_integer(value)?;
                let record_len = self.record_len() + field.length as usize;
                if record_len > u16::MAX as usize {
                    return Err(HarvestError::AttributeWriteFailure(
                        "record length overflow".to_string(),
                    ));
                }
                for row in &mut self.records {
                    row.extend_from_slice(&formatted);
                }
                self.fields.push(field);
                Ok(true)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HarvestError> {
        let header_len =
            HEADER_LEN + self.fields.len() * DESCRIPTOR_LEN + 1 + self.header_tail.len();
        let header_len = u16::try_from(header_len)
            .map_err(|_| HarvestError::AttributeWriteFailure("header too large".to_string()))?;
        let record_len = u16::try_from(self.record_len())
            .map_err(|_| HarvestError::AttributeWriteFailure("record too large".to_string()))?;
        let record_count = u32::try_from(self.records.len())
            .map_err(|_| HarvestError::AttributeWriteFailure("too many records".to_string()))?;

        let mut header = self.header;
        let today = chrono::Utc::now().date_naive();
        header[1] = (today.year() - 1900).clamp(0, 255) as u8;
        header[2] = today.month() as u8;
        header[3] = today.day() as u8;
        header[4..8].copy_from_slice(&record_count.to_le_bytes());
        header[8..10].copy_from_slice(&header_len.to_le_bytes());
        header[10..12].copy_from_slice(&record_len.to_le_bytes());

        let mut out = Vec::with_capacity(
            header_len as usize + self.records.len() * record_len as usize + 1,
        );
        out.extend_from_slice(&header);
        for field in &self.fields {
            out.extend_from_slice(&field.raw);
        }
        out.push(FIELD_TERMINATOR);
        out.extend_from_slice(&self.header_tail);
        for row in &self.records {
            out.extend_from_slice(row);
        }
        out.push(EOF_MARKER);
        Ok(out)
    }

    fn record_len(&self) -> usize {
        1 + self.fields.iter().map(|f| f.length as usize).sum::<usize>()
    }

    fn field_offset(&self, index: usize) -> usize {
        1 + self.fields[..index]
            .iter()
            .map(|f| f.length as usize)
            .sum::<usize>()
    }
}

fn malformed(reason: &str) -> HarvestError {
    HarvestError::AttributeWriteFailure(format!("malformed attribute table: {reason}"))
}
