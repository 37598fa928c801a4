//! Binary codec for persisted cache entries.
//!
//! Layout: `i32` format version, one kind byte (`'B'`, `'R'`, `'V'`), then
//! the kind-specific payload. Integers are fixed little-endian; strings are
//! `i32`-length-prefixed UTF-8. Instants persist as 100-ns ticks since the
//! Unix epoch, UTC.

use bytes::{BufMut, Bytes, BytesMut};
use time::OffsetDateTime;

use crate::entry::{CacheEntry, CachedResponse, CachedResponseBody, CachedVaryRules};

pub const FORMAT_VERSION: i32 = 1;

const KIND_BODY: u8 = b'B';
const KIND_RESPONSE: u8 = b'R';
const KIND_VARY_RULES: u8 = b'V';

const NANOS_PER_TICK: i128 = 100;

/// Encode an entry into its persisted form.
pub fn serialize(entry: &CacheEntry) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(FORMAT_VERSION);
    match entry {
        CacheEntry::Body(body) => {
            buf.put_u8(KIND_BODY);
            put_bytes(&mut buf, &body.body);
        }
        CacheEntry::Response(response) => {
            buf.put_u8(KIND_RESPONSE);
            put_string(&mut buf, &response.body_key_prefix);
            buf.put_i64_le(ticks_since_epoch(response.created));
            buf.put_i32_le(i32::from(response.status));
            buf.put_i32_le(response.headers.len() as i32);
            for (name, value) in &response.headers {
                put_string(&mut buf, name);
                put_string(&mut buf, value);
            }
            match &response.body {
                Some(body) => {
                    buf.put_u8(1);
                    put_bytes(&mut buf, body);
                }
                None => buf.put_u8(0),
            }
        }
        CacheEntry::VaryRules(rules) => {
            buf.put_u8(KIND_VARY_RULES);
            put_string(&mut buf, &rules.vary_key_prefix);
            put_string_list(&mut buf, &rules.headers);
            put_string_list(&mut buf, &rules.params);
        }
    }
    buf.freeze()
}

/// Decode an entry. `None` for empty input, a version other than
/// [`FORMAT_VERSION`], an unknown kind byte, or any truncated or malformed
/// payload.
pub fn deserialize(bytes: &[u8]) -> Option<CacheEntry> {
    let mut reader = Reader { buf: bytes };
    if reader.read_i32()? != FORMAT_VERSION {
        return None;
    }
    match reader.read_u8()? {
        KIND_BODY => Some(CacheEntry::Body(CachedResponseBody {
            body: reader.read_bytes()?,
        })),
        KIND_RESPONSE => {
            let body_key_prefix = reader.read_string()?;
            let created = instant_from_ticks(reader.read_i64()?)?;
            let status = u16::try_from(reader.read_i32()?).ok()?;
            let header_count = reader.read_len()?;
            let mut headers = Vec::new();
            for _ in 0..header_count {
                let name = reader.read_string()?;
                let value = reader.read_string()?;
                headers.push((name, value));
            }
            let body = match reader.read_u8()? {
                0 => None,
                1 => Some(reader.read_bytes()?),
                _ => return None,
            };
            Some(CacheEntry::Response(CachedResponse {
                body_key_prefix,
                created,
                status,
                headers,
                body,
            }))
        }
        KIND_VARY_RULES => {
            let vary_key_prefix = reader.read_string()?;
            let headers = reader.read_string_list()?;
            let params = reader.read_string_list()?;
            Some(CacheEntry::VaryRules(CachedVaryRules {
                vary_key_prefix,
                headers,
                params,
            }))
        }
        _ => None,
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_i32_le(bytes.len() as i32);
    buf.put_slice(bytes);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn put_string_list(buf: &mut BytesMut, values: &[String]) {
    buf.put_i32_le(values.len() as i32);
    for value in values {
        put_string(buf, value);
    }
}

fn ticks_since_epoch(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / NANOS_PER_TICK) as i64
}

fn instant_from_ticks(ticks: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ticks) * NANOS_PER_TICK).ok()
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.buf.len() < len {
            return None;
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Some(head)
    }

    fn read_u8(&mut self) -> Option<u8> {
        let (&first, rest) = self.buf.split_first()?;
        self.buf = rest;
        Some(first)
    }

    fn read_i32(&mut self) -> Option<i32> {
        let chunk = self.take(4)?;
        Some(i32::from_le_bytes(chunk.try_into().ok()?))
    }

    fn read_i64(&mut self) -> Option<i64> {
        let chunk = self.take(8)?;
        Some(i64::from_le_bytes(chunk.try_into().ok()?))
    }

    fn read_len(&mut self) -> Option<usize> {
        usize::try_from(self.read_i32()?).ok()
    }

    fn read_bytes(&mut self) -> Option<Bytes> {
        let len = self.read_len()?;
        Some(Bytes::copy_from_slice(self.take(len)?))
    }

    fn read_string(&mut self) -> Option<String> {
        let len = self.read_len()?;
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }

    fn read_string_list(&mut self) -> Option<Vec<String>> {
        let count = self.read_len()?;
        let mut values = Vec::new();
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Some(values)
    }
}
