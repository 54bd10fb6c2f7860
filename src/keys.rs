//! Order-preserving path encoding.
//!
//! Tree keys are byte strings compared lexicographically, so heterogeneous
//! typed values must encode to bytes whose lexicographic order matches the
//! values' natural order. Every element is framed as
//! `<type-byte> <body> <0x00>`; the type byte both dispatches decoding and
//! ranks values of different types against each other.
//!
//! ## Baseline type bytes
//!
//! ```text
//! 0x10  null
//! 0x20  boolean false
//! 0x21  boolean true
//! 0x25  instant            (RFC 3339 text, fixed-width nanoseconds)
//! 0x30  negative infinity
//! 0x31  finite number      (legacy decimal format, see below)
//! 0x32  positive infinity
//! 0x68  symbol             (identifier text)
//! 0x69  named tag          (name text)
//! 0x70  string             (raw text)
//! 0xa0  sequence           (concatenated encoded elements)
//! ```
//!
//! The set is extensible: [`KeyCodec::register`] attaches a decoder to any
//! free type byte. Registering the delimiter byte is refused; redefining
//! an existing byte warns and replaces.
//!
//! ## Number bodies
//!
//! Finite numbers use a legacy order-preserving decimal rendering:
//! a sign prefix (`_` for non-negative, `-` for negative), three digits
//! counting the integer-part length (counting down from 1000 for
//! negatives), an `x` separator, then the decimal digits — nines-
//! complemented for negatives so that more-negative numbers sort lower.
//! Text bodies must not contain the delimiter byte.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::error::{Error, Result};

/// Element terminator byte.
pub const DELIMITER: u8 = 0x00;

/// Baseline type bytes.
pub mod tag {
    /// Null element.
    pub const NULL: u8 = 0x10;
    /// Boolean false.
    pub const FALSE: u8 = 0x20;
    /// Boolean true.
    pub const TRUE: u8 = 0x21;
    /// High-resolution instant.
    pub const INSTANT: u8 = 0x25;
    /// Negative infinity.
    pub const NEG_INFINITY: u8 = 0x30;
    /// Finite number.
    pub const NUMBER: u8 = 0x31;
    /// Positive infinity.
    pub const POS_INFINITY: u8 = 0x32;
    /// Symbol (identifier text).
    pub const SYMBOL: u8 = 0x68;
    /// Named tag.
    pub const TAGGED: u8 = 0x69;
    /// String.
    pub const TEXT: u8 = 0x70;
    /// Sequence of elements.
    pub const SEQUENCE: u8 = 0xa0;
}

/// A typed path element.
#[derive(Debug, Clone, PartialEq)]
pub enum PathValue {
    /// Null, sorting below every other baseline type.
    Null,
    /// Boolean; false sorts before true.
    Bool(bool),
    /// High-resolution instant.
    Instant(DateTime<Utc>),
    /// Negative infinity, sorting below every finite number.
    NegInfinity,
    /// Finite integer.
    Int(i64),
    /// Finite float.
    Float(f64),
    /// Positive infinity, sorting above every finite number.
    PosInfinity,
    /// Symbol (identifier text).
    Symbol(String),
    /// Named tag.
    Tagged(String),
    /// String.
    Text(String),
    /// Composite element: children concatenate in order.
    Sequence(Vec<PathValue>),
    /// Extension element carrying a registered type byte and a raw body.
    Custom {
        /// The registered type byte.
        tag: u8,
        /// The element body (must not contain the delimiter).
        body: Vec<u8>,
    },
}

type Decoder = Box<dyn Fn(&[u8]) -> Result<PathValue> + Send + Sync>;

/// Encoder/decoder registry for path elements.
pub struct KeyCodec {
    decoders: HashMap<u8, Decoder>,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCodec {
    /// Creates a codec with the baseline type bytes registered.
    pub fn new() -> Self {
        let mut codec = Self { decoders: HashMap::new() };
        codec.register(tag::NULL, |_| Ok(PathValue::Null));
        codec.register(tag::FALSE, |_| Ok(PathValue::Bool(false)));
        codec.register(tag::TRUE, |_| Ok(PathValue::Bool(true)));
        codec.register(tag::INSTANT, decode_instant);
        codec.register(tag::NEG_INFINITY, |_| Ok(PathValue::NegInfinity));
        codec.register(tag::NUMBER, decode_number);
        codec.register(tag::POS_INFINITY, |_| Ok(PathValue::PosInfinity));
        codec.register(tag::SYMBOL, |body| text_body(body).map(PathValue::Symbol));
        codec.register(tag::TAGGED, |body| text_body(body).map(PathValue::Tagged));
        codec.register(tag::TEXT, |body| text_body(body).map(PathValue::Text));
        codec
    }

    /// Registers a decoder for a type byte. Returns `false` — refusing the
    /// registration — for the delimiter byte. Redefining an existing byte
    /// warns and replaces the previous decoder.
    pub fn register<F>(&mut self, type_byte: u8, decode: F) -> bool
    where
        F: Fn(&[u8]) -> Result<PathValue> + Send + Sync + 'static,
    {
        if type_byte == DELIMITER {
            warn!(type_byte, "refusing to register the delimiter as a type byte");
            return false;
        }
        if self.decoders.insert(type_byte, Box::new(decode)).is_some() {
            warn!(type_byte, "type byte redefined");
        }
        true
    }

    /// Encodes one element to its order-preserving byte string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMatchingEncoder`] for a [`PathValue::Custom`]
    /// with an unregistered type byte or a NaN float.
    pub fn encode(&self, value: &PathValue) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(value, &mut buf)?;
        Ok(buf)
    }

    /// Encodes an element for use as a range endpoint: trailing delimiters
    /// are trimmed so the endpoint compares against every extension of the
    /// element.
    ///
    /// # Errors
    ///
    /// Same as [`KeyCodec::encode`].
    pub fn encode_partial(&self, value: &PathValue) -> Result<Vec<u8>> {
        let mut buf = self.encode(value)?;
        while buf.last() == Some(&DELIMITER) {
            buf.pop();
        }
        Ok(buf)
    }

    fn encode_into(&self, value: &PathValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PathValue::Null => buf.push(tag::NULL),
            PathValue::Bool(false) => buf.push(tag::FALSE),
            PathValue::Bool(true) => buf.push(tag::TRUE),
            PathValue::Instant(instant) => {
                buf.push(tag::INSTANT);
                // Fixed-width rendering keeps lexicographic order
                // chronological.
                let text = instant.to_rfc3339_opts(SecondsFormat::Nanos, true);
                buf.extend_from_slice(text.as_bytes());
            },
            PathValue::NegInfinity => buf.push(tag::NEG_INFINITY),
            PathValue::Int(n) => {
                buf.push(tag::NUMBER);
                encode_decimal(&n.unsigned_abs().to_string(), *n < 0, buf);
            },
            PathValue::Float(f) => {
                if f.is_nan() {
                    return Err(Error::NoMatchingEncoder { value: format!("{value:?}") });
                }
                if *f == f64::INFINITY {
                    buf.push(tag::POS_INFINITY);
                } else if *f == f64::NEG_INFINITY {
                    buf.push(tag::NEG_INFINITY);
                } else {
                    buf.push(tag::NUMBER);
                    encode_decimal(&format!("{:.6}", f.abs()), *f < 0.0, buf);
                }
            },
            PathValue::PosInfinity => buf.push(tag::POS_INFINITY),
            PathValue::Symbol(text) => {
                buf.push(tag::SYMBOL);
                buf.extend_from_slice(text.as_bytes());
            },
            PathValue::Tagged(name) => {
                buf.push(tag::TAGGED);
                buf.extend_from_slice(name.as_bytes());
            },
            PathValue::Text(text) => {
                buf.push(tag::TEXT);
                buf.extend_from_slice(text.as_bytes());
            },
            PathValue::Sequence(elements) => {
                buf.push(tag::SEQUENCE);
                for element in elements {
                    self.encode_into(element, buf)?;
                }
            },
            PathValue::Custom { tag: type_byte, body } => {
                if !self.decoders.contains_key(type_byte) {
                    return Err(Error::NoMatchingEncoder { value: format!("{value:?}") });
                }
                buf.push(*type_byte);
                buf.extend_from_slice(body);
            },
        }
        buf.push(DELIMITER);
        Ok(())
    }

    /// Decodes one complete element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMatchingDecoder`] for an unregistered type byte
    /// and [`Error::Codec`] for a malformed body or framing.
    pub fn decode(&self, bytes: &[u8]) -> Result<PathValue> {
        let (value, consumed) = self.decode_element(bytes)?;
        if consumed != bytes.len() {
            return Err(malformed("trailing bytes after element"));
        }
        Ok(value)
    }

    fn decode_element(&self, bytes: &[u8]) -> Result<(PathValue, usize)> {
        let Some(&type_byte) = bytes.first() else {
            return Err(malformed("empty element"));
        };

        if type_byte == tag::SEQUENCE {
            // Children run until a bare delimiter at this nesting level.
            let mut elements = Vec::new();
            let mut pos = 1;
            loop {
                match bytes.get(pos) {
                    Some(&DELIMITER) => {
                        pos += 1;
                        break;
                    },
                    Some(_) => {
                        let (element, used) = self.decode_element(&bytes[pos..])?;
                        elements.push(element);
                        pos += used;
                    },
                    None => return Err(malformed("unterminated sequence")),
                }
            }
            return Ok((PathValue::Sequence(elements), pos));
        }

        let body_len = bytes[1..]
            .iter()
            .position(|&b| b == DELIMITER)
            .ok_or_else(|| malformed("unterminated element"))?;
        let body = &bytes[1..1 + body_len];

        let decode = self
            .decoders
            .get(&type_byte)
            .ok_or(Error::NoMatchingDecoder { tag: type_byte })?;
        let value = decode(body)?;
        Ok((value, 1 + body_len + 1))
    }
}

fn malformed(reason: &str) -> Error {
    Error::codec(std::io::Error::new(std::io::ErrorKind::InvalidData, reason.to_string()))
}

fn text_body(body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(Error::codec)
}

fn decode_instant(body: &[u8]) -> Result<PathValue> {
    let text = std::str::from_utf8(body).map_err(Error::codec)?;
    let parsed = DateTime::parse_from_rfc3339(text).map_err(Error::codec)?;
    Ok(PathValue::Instant(parsed.with_timezone(&Utc)))
}

/// Renders the order-preserving decimal body: sign prefix, three-digit
/// integer-part length (counting down from 1000 for negatives), `x`, then
/// the digits (nines-complemented for negatives).
fn encode_decimal(digits: &str, negative: bool, buf: &mut Vec<u8>) {
    let int_len = digits.find('.').unwrap_or(digits.len());
    if negative {
        buf.push(b'-');
        let field = 1000 - int_len;
        buf.extend_from_slice(format!("{field:03}").as_bytes());
        buf.push(b'x');
        for byte in digits.bytes() {
            if byte.is_ascii_digit() {
                buf.push(b'9' - (byte - b'0'));
            } else {
                buf.push(byte);
            }
        }
    } else {
        buf.push(b'_');
        buf.extend_from_slice(format!("{int_len:03}").as_bytes());
        buf.push(b'x');
        buf.extend_from_slice(digits.as_bytes());
    }
}

fn decode_number(body: &[u8]) -> Result<PathValue> {
    // sign byte + three length digits + 'x'
    if body.len() < 6 {
        return Err(malformed("number body too short"));
    }
    let negative = body[0] == b'-';
    let digits = &body[5..];

    let text: String = if negative {
        // Nines-complement is an involution; applying it again restores
        // the original digits.
        digits
            .iter()
            .map(|&b| if b.is_ascii_digit() { (b'9' - (b - b'0')) as char } else { b as char })
            .collect()
    } else {
        std::str::from_utf8(digits).map_err(Error::codec)?.to_string()
    };

    if text.contains('.') {
        let magnitude: f64 = text.parse().map_err(Error::codec)?;
        Ok(PathValue::Float(if negative { -magnitude } else { magnitude }))
    } else {
        // Parse the magnitude unsigned so that i64::MIN (whose magnitude
        // exceeds i64::MAX) round-trips.
        let magnitude: u64 = text.parse().map_err(Error::codec)?;
        let value = if negative {
            0i64.checked_sub_unsigned(magnitude)
                .ok_or_else(|| malformed("integer magnitude out of range"))?
        } else {
            i64::try_from(magnitude).map_err(Error::codec)?
        };
        Ok(PathValue::Int(value))
    }
}
