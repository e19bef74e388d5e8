//! Binary Record Codec
//!
//! Every value in the cache is stored as a single contiguous record:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬──────────┬─────────────────────┐
//! │ payload_len (8)  │     ttl (8)      │ type (1) │   payload (n)       │
//! │   u64 LE         │   u64 LE         │   u8     │                     │
//! └──────────────────┴──────────────────┴──────────┴─────────────────────┘
//! ```
//!
//! Lists and dictionaries share one payload layout: an element count, a table
//! of element lengths, then the concatenated elements.
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────┬───────────┬───────────┬─────┐
//! │ n (2)   │ len0(2) │ len1(2) │ ... │ elem0     │ elem1     │ ... │
//! └─────────┴─────────┴─────────┴─────┴───────────┴───────────┴─────┘
//! ```
//!
//! Dictionary elements carry an extra 2-byte prefix holding the offset of the
//! `:` separator inside `key:value`, so a lookup can split the element without
//! scanning for the separator. Dictionary elements are sorted by key, which is
//! what makes the binary search in [`dict_lookup`] valid.
//!
//! All integers are little-endian. Nothing here reinterprets native memory.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Size of the fixed record header in bytes.
pub const HEADER_LEN: usize = 17;

/// Maximum number of elements in a list or dictionary.
pub const MAX_ELEMENTS: usize = u16::MAX as usize;

/// Maximum encoded size of a single list or dictionary element.
pub const MAX_ELEMENT_LEN: usize = u16::MAX as usize;

/// Separator between a dictionary key and its value.
pub const DICT_SEPARATOR: u8 = b':';

/// Size of the separator-offset prefix on every dictionary element.
const SEPARATOR_PREFIX_LEN: usize = 2;

/// Errors raised by the codec and the storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Key is absent, expired, or the requested element does not exist
    #[error("not found")]
    NotFound,

    /// Stored value has a different shape than the one requested
    #[error("incorrect key type: expected {expected}, found {found}")]
    WrongType { expected: KeyType, found: KeyType },

    /// Dictionary element without a `:` separator
    #[error("incorrect dictionary element, expected key:value")]
    MalformedElement,

    /// List or dictionary with more than 65535 elements
    #[error("maximum list/dictionary elements is {}", MAX_ELEMENTS)]
    TooManyElements,

    /// A single element does not fit its 2-byte length slot
    #[error("element of {0} bytes exceeds the 65535 byte limit")]
    ElementTooLarge(usize),

    /// Stored bytes violate the record layout
    #[error("corrupted record: {0}")]
    Corrupted(&'static str),
}

/// Result type for codec and storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The shape of a stored value, persisted as the last header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyType {
    String = 1,
    List = 2,
    Dict = 3,
}

impl KeyType {
    /// Parses a header type tag.
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(KeyType::String),
            2 => Some(KeyType::List),
            3 => Some(KeyType::Dict),
            _ => None,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Dict => "dict",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded form of the 17-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_type: KeyType,
    /// Absolute expiry in seconds since the Unix epoch, 0 = never
    pub ttl: u64,
    pub payload_len: u64,
}

impl RecordHeader {
    /// Returns true if the record has a TTL that is at or before `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl != 0 && self.ttl <= now
    }
}

/// Encodes a record header.
pub fn encode_header(key_type: KeyType, ttl: u64, payload_len: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&payload_len.to_le_bytes());
    header[8..16].copy_from_slice(&ttl.to_le_bytes());
    header[16] = key_type.as_byte();
    header
}

/// Decodes a record header from the first 17 bytes of `buf`.
pub fn decode_header(buf: &[u8]) -> StorageResult<RecordHeader> {
    if buf.len() < HEADER_LEN {
        return Err(StorageError::Corrupted("record shorter than header"));
    }

    let mut cursor = &buf[..HEADER_LEN];
    let payload_len = cursor.get_u64_le();
    let ttl = cursor.get_u64_le();
    let key_type =
        KeyType::from_byte(cursor.get_u8()).ok_or(StorageError::Corrupted("unknown type tag"))?;

    Ok(RecordHeader {
        key_type,
        ttl,
        payload_len,
    })
}

/// Builds a complete record: header followed by `payload`.
pub fn encode_record(key_type: KeyType, ttl: u64, payload: &[u8]) -> Bytes {
    let mut record = BytesMut::with_capacity(HEADER_LEN + payload.len());
    record.put_slice(&encode_header(key_type, ttl, payload.len() as u64));
    record.put_slice(payload);
    record.freeze()
}

/// Splits a record into its header and payload.
///
/// The payload shares the record's allocation.
pub fn decode_record(record: &Bytes) -> StorageResult<(RecordHeader, Bytes)> {
    let header = decode_header(record)?;
    if header.payload_len != (record.len() - HEADER_LEN) as u64 {
        return Err(StorageError::Corrupted("header length does not match payload"));
    }
    Ok((header, record.slice(HEADER_LEN..)))
}

/// Encodes a list payload.
pub fn encode_list<T: AsRef<[u8]>>(elements: &[T]) -> StorageResult<Vec<u8>> {
    if elements.len() > MAX_ELEMENTS {
        return Err(StorageError::TooManyElements);
    }

    let data_len: usize = elements.iter().map(|e| e.as_ref().len()).sum();
    let mut buf = Vec::with_capacity(2 + elements.len() * 2 + data_len);

    buf.put_u16_le(elements.len() as u16);
    for element in elements {
        buf.put_u16_le(element_len(element.as_ref().len())?);
    }
    for element in elements {
        buf.put_slice(element.as_ref());
    }

    Ok(buf)
}

/// Encodes a dictionary payload from `key:value` elements.
///
/// Elements are sorted by key before encoding. The sort is stable, so
/// duplicate keys keep their input order.
pub fn encode_dict<T: AsRef<[u8]>>(elements: &[T]) -> StorageResult<Vec<u8>> {
    if elements.len() > MAX_ELEMENTS {
        return Err(StorageError::TooManyElements);
    }

    let mut entries = elements
        .iter()
        .map(|element| {
            let element = element.as_ref();
            separator_index(element)
                .map(|sep| (element, sep))
                .ok_or(StorageError::MalformedElement)
        })
        .collect::<StorageResult<Vec<_>>>()?;

    entries.sort_by(|(a, a_sep), (b, b_sep)| a[..*a_sep].cmp(&b[..*b_sep]));

    let data_len: usize = entries
        .iter()
        .map(|(e, _)| SEPARATOR_PREFIX_LEN + e.len())
        .sum();
    let mut buf = Vec::with_capacity(2 + entries.len() * 2 + data_len);

    buf.put_u16_le(entries.len() as u16);
    for (element, _) in &entries {
        buf.put_u16_le(element_len(SEPARATOR_PREFIX_LEN + element.len())?);
    }
    for (element, sep) in &entries {
        // sep < element.len() <= MAX_ELEMENT_LEN - 2, checked above
        buf.put_u16_le(*sep as u16);
        buf.put_slice(element);
    }

    Ok(buf)
}

/// Decodes a list (or raw dictionary) payload into its elements.
///
/// The returned elements share the payload's allocation.
pub fn decode_list(payload: &Bytes) -> StorageResult<Vec<Bytes>> {
    Ok(element_spans(payload)?
        .into_iter()
        .map(|span| payload.slice(span))
        .collect())
}

/// Returns the byte range of every element in a list payload.
pub fn element_spans(payload: &[u8]) -> StorageResult<Vec<Range<usize>>> {
    let (count, mut lengths) = length_table(payload)?;

    let mut spans = Vec::with_capacity(count);
    let mut offset = 2 + count * 2;
    for _ in 0..count {
        let end = offset + lengths.get_u16_le() as usize;
        if end > payload.len() {
            return Err(StorageError::Corrupted("element overruns payload"));
        }
        spans.push(offset..end);
        offset = end;
    }

    Ok(spans)
}

/// Locates the element at `position`, returning `(offset, length)` within the
/// payload.
pub fn find_element(payload: &[u8], position: usize) -> StorageResult<(usize, usize)> {
    let (count, lengths) = length_table(payload)?;
    if position >= count {
        return Err(StorageError::NotFound);
    }

    let preceding: usize = lengths[..position * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as usize)
        .sum();
    let offset = 2 + count * 2 + preceding;
    let len = u16::from_le_bytes([lengths[position * 2], lengths[position * 2 + 1]]) as usize;

    if offset + len > payload.len() {
        return Err(StorageError::Corrupted("element overruns payload"));
    }
    Ok((offset, len))
}

/// Splits an encoded dictionary element into `(key, value)`.
pub fn split_dict_element(element: &[u8]) -> StorageResult<(&[u8], &[u8])> {
    if element.len() < SEPARATOR_PREFIX_LEN {
        return Err(StorageError::Corrupted("dictionary element without separator offset"));
    }

    let sep = u16::from_le_bytes([element[0], element[1]]) as usize;
    let body = &element[SEPARATOR_PREFIX_LEN..];
    if sep >= body.len() || body[sep] != DICT_SEPARATOR {
        return Err(StorageError::Corrupted("invalid dictionary separator offset"));
    }

    Ok((&body[..sep], &body[sep + 1..]))
}

/// Binary-searches a dictionary payload for `lookup`, returning the byte range
/// of the matching value.
///
/// This is a lower-bound search: it finds the first element whose key is
/// `>= lookup` and then requires an exact match.
pub fn dict_lookup(payload: &[u8], lookup: &[u8]) -> StorageResult<Range<usize>> {
    let spans = element_spans(payload)?;

    let mut lo = 0;
    let mut hi = spans.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (key, _) = split_dict_element(&payload[spans[mid].clone()])?;
        if key < lookup {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    let span = spans.get(lo).ok_or(StorageError::NotFound)?;
    let (key, _) = split_dict_element(&payload[span.clone()])?;
    if key != lookup {
        return Err(StorageError::NotFound);
    }

    Ok(span.start + SEPARATOR_PREFIX_LEN + key.len() + 1..span.end)
}

/// Reads the element count and returns it with the raw length table.
fn length_table(payload: &[u8]) -> StorageResult<(usize, &[u8])> {
    if payload.len() < 2 {
        return Err(StorageError::Corrupted("missing element count"));
    }

    let count = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let table_end = 2 + count * 2;
    if payload.len() < table_end {
        return Err(StorageError::Corrupted("truncated length table"));
    }

    Ok((count, &payload[2..table_end]))
}

#[inline]
fn element_len(len: usize) -> StorageResult<u16> {
    u16::try_from(len).map_err(|_| StorageError::ElementTooLarge(len))
}

#[inline]
fn separator_index(element: &[u8]) -> Option<usize> {
    element.iter().position(|&b| b == DICT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_dict() -> Bytes {
        Bytes::from(
            encode_dict(&[
                "foo:baz",
                "fooo:baz",
                "baz:foobaz",
                "zbaz:world",
                "bar:BAR",
                "c:hello",
                "d:hello",
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_header_layout() {
        let header = encode_header(KeyType::Dict, 0x0102, 72);
        assert_eq!(&header[0..8], &72u64.to_le_bytes());
        assert_eq!(&header[8..16], &0x0102u64.to_le_bytes());
        assert_eq!(header[16], 3);

        let decoded = decode_header(&header).unwrap();
        assert_eq!(decoded.key_type, KeyType::Dict);
        assert_eq!(decoded.ttl, 0x0102);
        assert_eq!(decoded.payload_len, 72);
    }

    #[test]
    fn test_decode_header_rejects_garbage() {
        assert_eq!(
            decode_header(&[0u8; 10]),
            Err(StorageError::Corrupted("record shorter than header"))
        );

        let mut header = encode_header(KeyType::String, 0, 0);
        header[16] = 9;
        assert!(matches!(
            decode_header(&header),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_record_length_mismatch() {
        let record = encode_record(KeyType::String, 0, b"hello");
        let (header, payload) = decode_record(&record).unwrap();
        assert_eq!(header.payload_len, 5);
        assert_eq!(payload, Bytes::from("hello"));

        let truncated = record.slice(..record.len() - 1);
        assert!(matches!(
            decode_record(&truncated),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_is_expired() {
        let header = RecordHeader {
            key_type: KeyType::String,
            ttl: 100,
            payload_len: 0,
        };
        assert!(!header.is_expired(99));
        assert!(header.is_expired(100));
        assert!(header.is_expired(101));

        let persistent = RecordHeader { ttl: 0, ..header };
        assert!(!persistent.is_expired(u64::MAX));
    }

    #[test]
    fn test_list_layout() {
        let payload = encode_list(&["ab", "", "cde"]).unwrap();
        assert_eq!(
            payload,
            vec![3, 0, 2, 0, 0, 0, 3, 0, b'a', b'b', b'c', b'd', b'e']
        );

        let decoded = decode_list(&Bytes::from(payload)).unwrap();
        assert_eq!(decoded, vec!["ab", "", "cde"]);
    }

    #[test]
    fn test_empty_list() {
        let payload = encode_list::<&str>(&[]).unwrap();
        assert_eq!(payload, vec![0, 0]);
        assert!(decode_list(&Bytes::from(payload)).unwrap().is_empty());
    }

    #[test]
    fn test_too_many_elements() {
        let elements = vec![""; MAX_ELEMENTS + 1];
        assert_eq!(encode_list(&elements), Err(StorageError::TooManyElements));

        let dict = vec!["a:b"; MAX_ELEMENTS + 1];
        assert_eq!(encode_dict(&dict), Err(StorageError::TooManyElements));

        let max = vec!["x"; MAX_ELEMENTS];
        assert!(encode_list(&max).is_ok());
    }

    #[test]
    fn test_element_too_large() {
        let big = vec![b'x'; MAX_ELEMENT_LEN + 1];
        assert_eq!(
            encode_list(&[big]),
            Err(StorageError::ElementTooLarge(MAX_ELEMENT_LEN + 1))
        );

        // the separator prefix counts against the dictionary element
        let mut entry = b"k:".to_vec();
        entry.resize(MAX_ELEMENT_LEN - 1, b'v');
        assert_eq!(
            encode_dict(&[entry]),
            Err(StorageError::ElementTooLarge(MAX_ELEMENT_LEN + 1))
        );
    }

    #[test]
    fn test_find_element() {
        let payload = encode_list(&["zero", "one", "two", "three", "four", "five"]).unwrap();

        let (offset, len) = find_element(&payload, 3).unwrap();
        assert_eq!(&payload[offset..offset + len], b"three");

        let (offset, len) = find_element(&payload, 0).unwrap();
        assert_eq!(&payload[offset..offset + len], b"zero");

        assert_eq!(find_element(&payload, 6), Err(StorageError::NotFound));
    }

    #[test]
    fn test_corrupted_payloads() {
        assert!(matches!(element_spans(&[]), Err(StorageError::Corrupted(_))));
        // claims two elements but has room for one length
        assert!(matches!(
            element_spans(&[2, 0, 1, 0]),
            Err(StorageError::Corrupted(_))
        ));
        // length points past the end
        assert!(matches!(
            element_spans(&[1, 0, 5, 0, b'a']),
            Err(StorageError::Corrupted(_))
        ));
        assert!(matches!(
            find_element(&[1, 0, 5, 0, b'a'], 0),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_dict_requires_separator() {
        assert_eq!(
            encode_dict(&["a:1", "novalue"]),
            Err(StorageError::MalformedElement)
        );
    }

    #[test]
    fn test_dict_sorted_by_key() {
        let payload = sample_dict();
        let keys: Vec<Vec<u8>> = decode_list(&payload)
            .unwrap()
            .iter()
            .map(|e| split_dict_element(e).unwrap().0.to_vec())
            .collect();

        assert_eq!(
            keys,
            vec![
                b"bar".to_vec(),
                b"baz".to_vec(),
                b"c".to_vec(),
                b"d".to_vec(),
                b"foo".to_vec(),
                b"fooo".to_vec(),
                b"zbaz".to_vec(),
            ]
        );
    }

    #[test]
    fn test_dict_sorts_on_key_not_whole_element() {
        // as whole strings "a-b:c" sorts first, since '-' (0x2d) < ':' (0x3a)
        let payload = Bytes::from(encode_dict(&["a-b:c", "a:z"]).unwrap());
        let elements = decode_list(&payload).unwrap();
        assert_eq!(split_dict_element(&elements[0]).unwrap().0, b"a");
        assert_eq!(split_dict_element(&elements[1]).unwrap().0, b"a-b");
    }

    #[test]
    fn test_split_dict_element() {
        let payload = Bytes::from(encode_dict(&["key:val:ue"]).unwrap());
        let elements = decode_list(&payload).unwrap();
        let (key, value) = split_dict_element(&elements[0]).unwrap();
        assert_eq!(key, b"key");
        assert_eq!(value, b"val:ue");

        assert!(split_dict_element(&[0]).is_err());
        assert!(split_dict_element(&[9, 0, b'a', b':']).is_err());
    }

    #[test]
    fn test_dict_lookup() {
        let payload = sample_dict();

        let range = dict_lookup(&payload, b"zbaz").unwrap();
        assert_eq!(&payload[range], b"world");

        let range = dict_lookup(&payload, b"bar").unwrap();
        assert_eq!(&payload[range], b"BAR");

        let range = dict_lookup(&payload, b"foo").unwrap();
        assert_eq!(&payload[range], b"baz");

        assert_eq!(dict_lookup(&payload, b"hello"), Err(StorageError::NotFound));
        assert_eq!(dict_lookup(&payload, b"zzz"), Err(StorageError::NotFound));
        assert_eq!(dict_lookup(&payload, b"a"), Err(StorageError::NotFound));
        assert_eq!(dict_lookup(&payload, b"fo"), Err(StorageError::NotFound));
    }

    #[test]
    fn test_dict_lookup_empty_value_and_empty_dict() {
        let payload = encode_dict(&["k:"]).unwrap();
        let range = dict_lookup(&payload, b"k").unwrap();
        assert!(range.is_empty());

        let empty = encode_dict::<&str>(&[]).unwrap();
        assert_eq!(dict_lookup(&empty, b"k"), Err(StorageError::NotFound));
    }

    fn dict_entry() -> impl Strategy<Value = Vec<u8>> {
        ("[a-z0-9]{0,8}", "[a-z0-9:]{0,8}").prop_map(|(k, v)| format!("{}:{}", k, v).into_bytes())
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(tag in 1u8..=3, ttl in any::<u64>(), len in any::<u64>()) {
            let key_type = KeyType::from_byte(tag).unwrap();
            let header = decode_header(&encode_header(key_type, ttl, len)).unwrap();
            prop_assert_eq!(header, RecordHeader { key_type, ttl, payload_len: len });
        }

        #[test]
        fn prop_list_roundtrip(elements in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 0..64)) {
            let payload = Bytes::from(encode_list(&elements).unwrap());
            let decoded: Vec<Vec<u8>> = decode_list(&payload).unwrap().iter().map(|e| e.to_vec()).collect();
            prop_assert_eq!(decoded, elements);
        }

        #[test]
        fn prop_dict_keys_ordered(entries in prop::collection::vec(dict_entry(), 0..64)) {
            let payload = Bytes::from(encode_dict(&entries).unwrap());
            let keys: Vec<Vec<u8>> = decode_list(&payload)
                .unwrap()
                .iter()
                .map(|e| split_dict_element(e).unwrap().0.to_vec())
                .collect();
            prop_assert_eq!(keys.len(), entries.len());
            prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn prop_dict_lookup_finds_every_key(entries in prop::collection::vec(dict_entry(), 1..64)) {
            let payload = encode_dict(&entries).unwrap();
            for entry in &entries {
                let sep = entry.iter().position(|&b| b == b':').unwrap();
                let range = dict_lookup(&payload, &entry[..sep]).unwrap();
                // duplicates resolve to the first occurrence, which shares the key
                let (key, _) = entry.split_at(sep);
                let value_start = range.start - key.len() - 1;
                prop_assert_eq!(&payload[value_start..value_start + key.len()], key);
            }
        }
    }
}
