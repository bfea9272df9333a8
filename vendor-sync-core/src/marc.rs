//! MARC 21 transmission format (ISO 2709) codec.
//!
//! A file is a sequence of records, each laid out as a 24 byte leader, a
//! directory of 12 byte entries (tag, field length, field offset), and the
//! variable fields. [`MarcReader`] decodes lazily; decoding the same bytes
//! again restarts the sequence.

use thiserror::Error;

pub const RECORD_TERMINATOR: u8 = 0x1D;
pub const FIELD_TERMINATOR: u8 = 0x1E;
pub const SUBFIELD_DELIMITER: u8 = 0x1F;

const LEADER_LEN: usize = 24;
const DIRECTORY_ENTRY_LEN: usize = 12;
/// Largest value of the 5 digit record length and field offset slots.
const MAX_RECORD_LEN: usize = 99_999;
/// Largest value of the 4 digit field length slot.
const MAX_FIELD_LEN: usize = 9_999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarcError {
    #[error("record at byte {offset} is truncated: declared {declared} bytes, {available} available")]
    Truncated {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("record at byte {offset} has an invalid leader: {reason}")]
    Leader { offset: usize, reason: String },

    #[error("record at byte {offset} has an invalid directory: {reason}")]
    Directory { offset: usize, reason: String },

    #[error("record cannot be encoded: {reason}")]
    TooLarge { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

impl Subfield {
    pub fn new(code: char, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// `00X` fields: tag and unstructured data.
    Control { tag: String, data: String },
    /// Everything else: two indicators and coded subfields.
    Data {
        tag: String,
        indicators: [char; 2],
        subfields: Vec<Subfield>,
    },
}

impl Field {
    pub fn control(tag: impl Into<String>, data: impl Into<String>) -> Self {
        Field::Control {
            tag: tag.into(),
            data: data.into(),
        }
    }

    pub fn data(tag: impl Into<String>, indicators: [char; 2], subfields: Vec<Subfield>) -> Self {
        Field::Data {
            tag: tag.into(),
            indicators,
            subfields,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Field::Control { tag, .. } | Field::Data { tag, .. } => tag,
        }
    }

    /// First value of subfield `code`, if any.
    pub fn subfield(&self, code: char) -> Option<&str> {
        match self {
            Field::Control { .. } => None,
            Field::Data { subfields, .. } => subfields
                .iter()
                .find(|sf| sf.code == code)
                .map(|sf| sf.value.as_str()),
        }
    }
}

/// Control tags are `001`-`009`.
pub fn is_control_tag(tag: &str) -> bool {
    tag.len() == 3 && tag.starts_with("00")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub leader: String,
    pub fields: Vec<Field>,
}

impl Default for Record {
    fn default() -> Self {
        Self::new("00000nam a2200000 a 4500")
    }
}

impl Record {
    pub fn new(leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            fields: Vec::new(),
        }
    }

    pub fn add_field(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn remove_fields(&mut self, tag: &str) -> &mut Self {
        self.fields.retain(|field| field.tag() != tag);
        self
    }

    pub fn fields_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |field| field.tag() == tag)
    }

    pub fn has_field(&self, tag: &str) -> bool {
        self.fields.iter().any(|field| field.tag() == tag)
    }

    /// Data of the first control field tagged `tag`.
    pub fn control_value<'a>(&'a self, tag: &'a str) -> Option<&'a str> {
        self.fields_with_tag(tag).find_map(|field| match field {
            Field::Control { data, .. } => Some(data.as_str()),
            Field::Data { .. } => None,
        })
    }

    /// First subfield `code` found in any field tagged `tag`.
    pub fn subfield_value<'a>(&'a self, tag: &'a str, code: char) -> Option<&'a str> {
        self.fields_with_tag(tag).find_map(|field| field.subfield(code))
    }

    /// Encodes the record in transmission format, recomputing the record
    /// length and base address in the leader. Fails when a field or the
    /// whole record overflows the fixed-width length slots.
    pub fn to_marc21(&self) -> Result<Vec<u8>, MarcError> {
        let mut directory = Vec::with_capacity(self.fields.len() * DIRECTORY_ENTRY_LEN + 1);
        let mut body = Vec::new();
        for field in &self.fields {
            let start = body.len();
            match field {
                Field::Control { data, .. } => body.extend_from_slice(data.as_bytes()),
                Field::Data {
                    indicators,
                    subfields,
                    ..
                } => {
                    let mut buf = [0u8; 4];
                    body.extend_from_slice(indicators[0].encode_utf8(&mut buf).as_bytes());
                    body.extend_from_slice(indicators[1].encode_utf8(&mut buf).as_bytes());
                    for sf in subfields {
                        body.push(SUBFIELD_DELIMITER);
                        body.extend_from_slice(sf.code.encode_utf8(&mut buf).as_bytes());
                        body.extend_from_slice(sf.value.as_bytes());
                    }
                }
            }
            body.push(FIELD_TERMINATOR);
            let len = body.len() - start;
            if len > MAX_FIELD_LEN || start > MAX_RECORD_LEN {
                return Err(MarcError::TooLarge {
                    reason: format!("field {} is {len} bytes at offset {start}", field.tag()),
                });
            }
            let tag = format!("{:0>3.3}", field.tag());
            directory.extend_from_slice(tag.as_bytes());
            directory.extend_from_slice(format!("{len:04}{start:05}").as_bytes());
        }
        directory.push(FIELD_TERMINATOR);

        let base_address = LEADER_LEN + directory.len();
        let record_len = base_address + body.len() + 1;
        if record_len > MAX_RECORD_LEN {
            return Err(MarcError::TooLarge {
                reason: format!("record is {record_len} bytes"),
            });
        }

        let mut leader: Vec<u8> = self.leader.bytes().take(LEADER_LEN).collect();
        leader.resize(LEADER_LEN, b' ');
        leader[..5].copy_from_slice(format!("{:05}", record_len).as_bytes());
        leader[12..17].copy_from_slice(format!("{:05}", base_address).as_bytes());

        let mut out = Vec::with_capacity(record_len);
        out.extend_from_slice(&leader);
        out.extend_from_slice(&directory);
        out.extend_from_slice(&body);
        out.push(RECORD_TERMINATOR);
        Ok(out)
    }
}

/// Lazy decoder over the records of one payload.
///
/// Decoding stops after the first error: once a record boundary cannot be
/// trusted, nothing after it can.
pub struct MarcReader<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> MarcReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for MarcReader<'_> {
    type Item = Result<Record, MarcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        // Trailing newlines and DOS end-of-file markers are common after the last record.
        while self.offset < self.data.len()
            && matches!(self.data[self.offset], b'\r' | b'\n' | b' ' | 0x1A)
        {
            self.offset += 1;
        }
        if self.offset >= self.data.len() {
            return None;
        }

        let offset = self.offset;
        let result = record_length(&self.data[offset..], offset)
            .and_then(|len| decode_record(&self.data[offset..offset + len], offset).map(|r| (r, len)));
        match result {
            Ok((record, len)) => {
                self.offset += len;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn record_length(rest: &[u8], offset: usize) -> Result<usize, MarcError> {
    if rest.len() < LEADER_LEN {
        return Err(MarcError::Truncated {
            offset,
            declared: LEADER_LEN,
            available: rest.len(),
        });
    }
    let declared = ascii_number(&rest[..5]).ok_or_else(|| MarcError::Leader {
        offset,
        reason: "record length is not numeric".into(),
    })?;
    if declared < LEADER_LEN + 1 {
        return Err(MarcError::Leader {
            offset,
            reason: format!("record length {declared} is shorter than the leader"),
        });
    }
    if declared > rest.len() {
        return Err(MarcError::Truncated {
            offset,
            declared,
            available: rest.len(),
        });
    }
    Ok(declared)
}

/// Decodes exactly one record. `offset` is only used for error reporting.
pub fn decode_record(bytes: &[u8], offset: usize) -> Result<Record, MarcError> {
    if bytes.len() <= LEADER_LEN {
        return Err(MarcError::Truncated {
            offset,
            declared: LEADER_LEN + 1,
            available: bytes.len(),
        });
    }
    let leader = String::from_utf8_lossy(&bytes[..LEADER_LEN]).into_owned();
    let base_address = ascii_number(&bytes[12..17]).ok_or_else(|| MarcError::Leader {
        offset,
        reason: "base address is not numeric".into(),
    })?;
    if base_address <= LEADER_LEN || base_address > bytes.len() {
        return Err(MarcError::Leader {
            offset,
            reason: format!("base address {base_address} is out of range"),
        });
    }

    // The directory ends with a field terminator just before the base address.
    let directory = &bytes[LEADER_LEN..base_address - 1];
    if directory.len() % DIRECTORY_ENTRY_LEN != 0 {
        return Err(MarcError::Directory {
            offset,
            reason: format!("length {} is not a multiple of 12", directory.len()),
        });
    }

    let mut fields = Vec::with_capacity(directory.len() / DIRECTORY_ENTRY_LEN);
    for entry in directory.chunks(DIRECTORY_ENTRY_LEN) {
        let tag = String::from_utf8_lossy(&entry[..3]).into_owned();
        let (len, start) = match (ascii_number(&entry[3..7]), ascii_number(&entry[7..12])) {
            (Some(len), Some(start)) => (len, start),
            _ => {
                return Err(MarcError::Directory {
                    offset,
                    reason: format!("entry for tag {tag} is not numeric"),
                })
            }
        };
        let begin = base_address + start;
        let end = begin + len;
        if end > bytes.len() {
            return Err(MarcError::Directory {
                offset,
                reason: format!("field {tag} overruns the record"),
            });
        }
        let mut raw = &bytes[begin..end];
        if let Some((&FIELD_TERMINATOR, head)) = raw.split_last() {
            raw = head;
        }
        fields.push(decode_field(tag, raw));
    }

    Ok(Record { leader, fields })
}

fn decode_field(tag: String, raw: &[u8]) -> Field {
    if is_control_tag(&tag) {
        return Field::Control {
            tag,
            data: String::from_utf8_lossy(raw).into_owned(),
        };
    }
    let indicator = |i: usize| raw.get(i).map_or(' ', |&b| b as char);
    let indicators = [indicator(0), indicator(1)];
    let subfields = raw
        .get(2..)
        .unwrap_or_default()
        .split(|&b| b == SUBFIELD_DELIMITER)
        .skip(1)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| Subfield {
            code: chunk[0] as char,
            value: String::from_utf8_lossy(&chunk[1..]).into_owned(),
        })
        .collect();
    Field::Data {
        tag,
        indicators,
        subfields,
    }
}

fn ascii_number(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_record() -> Record {
        let mut record = Record::new("00454cam a22001575i 4500");
        record
            .add_field(Field::control("001", "on1381158740"))
            .add_field(Field::data(
                "245",
                ['1', '0'],
                vec![Subfield::new('a', "Zapiski"), Subfield::new('c', "Ivanov")],
            ))
            .add_field(Field::data(
                "852",
                ['8', ' '],
                vec![Subfield::new('h', "ReCAP 23-100000")],
            ));
        record
    }

    #[test]
    fn encoded_record_decodes_to_same_fields() {
        let record = stub_record();
        let bytes = record.to_marc21().unwrap();
        assert_eq!(*bytes.last().unwrap(), RECORD_TERMINATOR);

        let decoded: Vec<_> = MarcReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].fields, record.fields);
        assert_eq!(&decoded[0].leader[5..12], &record.leader[5..12]);
    }

    #[test]
    fn leader_carries_length_and_base_address() {
        let bytes = stub_record().to_marc21().unwrap();
        let len: usize = std::str::from_utf8(&bytes[..5]).unwrap().parse().unwrap();
        let base: usize = std::str::from_utf8(&bytes[12..17]).unwrap().parse().unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(base, 24 + 3 * 12 + 1);
    }

    #[test]
    fn reader_walks_consecutive_records_and_ignores_trailing_newline() {
        let mut second = stub_record();
        second.remove_fields("001").add_field(Field::control("001", "ocm0002"));
        let mut bytes = stub_record().to_marc21().unwrap();
        bytes.extend(second.to_marc21().unwrap());
        bytes.extend_from_slice(b"\r\n");

        let records: Vec<_> = MarcReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].control_value("001"), Some("ocm0002"));
    }

    #[test]
    fn truncated_payload_is_an_error_and_stops_the_reader() {
        let bytes = stub_record().to_marc21().unwrap();
        let cut = &bytes[..bytes.len() - 10];
        let mut reader = MarcReader::new(cut);
        assert!(matches!(reader.next(), Some(Err(MarcError::Truncated { .. }))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn garbage_leader_is_rejected() {
        let mut reader = MarcReader::new(b"this is definitely not a MARC record at all");
        assert!(matches!(reader.next(), Some(Err(MarcError::Leader { .. }))));
    }

    #[test]
    fn lookups_by_tag() {
        let record = stub_record();
        assert_eq!(record.control_value("001"), Some("on1381158740"));
        assert_eq!(record.subfield_value("852", 'h'), Some("ReCAP 23-100000"));
        assert_eq!(record.subfield_value("852", 'a'), None);
        assert!(record.has_field("245"));
        assert!(!record.has_field("960"));
    }

    #[test]
    fn lookups_borrow_from_the_record_not_the_tag() {
        let record = stub_record();
        let control = {
            let tag = String::from("001");
            record.fields_with_tag(&tag).count()
        };
        assert_eq!(control, 1);
        let call_number = record.subfield_value("852", 'h').map(str::to_owned);
        assert_eq!(call_number.as_deref(), Some("ReCAP 23-100000"));
    }

    #[test]
    fn oversized_field_is_rejected_by_the_encoder() {
        let mut record = stub_record();
        record.add_field(Field::data(
            "500",
            [' ', ' '],
            vec![Subfield::new('a', "x".repeat(MAX_FIELD_LEN))],
        ));
        assert!(matches!(record.to_marc21(), Err(MarcError::TooLarge { .. })));
    }

    #[test]
    fn oversized_record_is_rejected_by_the_encoder() {
        let mut record = stub_record();
        for _ in 0..12 {
            record.add_field(Field::data(
                "500",
                [' ', ' '],
                vec![Subfield::new('a', "x".repeat(9_000))],
            ));
        }
        let err = record.to_marc21().unwrap_err();
        assert!(err.to_string().contains("cannot be encoded"), "{err}");
    }
}
