//! Schema-driven decoding of a serialized object's payload.
//!
//! The binary stream carries no type tags; layout is exactly the schema's
//! field order. Decoding is a pure function of (bytes, schema) and performs
//! bounds checks only: a schema that does not match the actual layout
//! produces garbage or an error, never memory unsafety.

use serde_json::{Map, Number, Value};

use crate::reader::EndianReader;
use crate::typetree::{Schema, ScalarKind};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of data while reading '{field}'")]
    UnexpectedEof { field: String },
    #[error("implausible length {len} for '{field}' with {remaining} bytes left")]
    ImplausibleLength {
        field: String,
        len: u32,
        remaining: usize,
    },
    #[error("string field '{field}' is not valid UTF-8")]
    InvalidString { field: String },
}

impl DecodeError {
    fn eof(field: &str) -> DecodeError {
        DecodeError::UnexpectedEof {
            field: field.to_owned(),
        }
    }
}

/// Decodes one object payload according to `schema`.
///
/// Deterministic: the same bytes and schema always produce a structurally
/// equal value.
pub fn decode_object(
    data: &[u8],
    schema: &Schema,
    big_endian: bool,
) -> Result<Value, DecodeError> {
    let mut r = EndianReader::new(data, big_endian);
    decode_value(&mut r, schema, "<root>", true)
}

fn decode_value(
    r: &mut EndianReader,
    schema: &Schema,
    field: &str,
    align_narrow: bool,
) -> Result<Value, DecodeError> {
    match schema {
        Schema::Scalar(kind) => decode_scalar(r, *kind, field, align_narrow),
        Schema::Array(element) => {
            let len = checked_count(r, field)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                // Array elements are packed; only the array itself pads.
                items.push(decode_value(r, element, field, false)?);
            }
            r.align4();
            Ok(Value::Array(items))
        }
        Schema::Map(value) => {
            let len = checked_count(r, field)?;
            let mut map = Map::new();
            for _ in 0..len {
                let key = read_string(r, field)?;
                let entry = decode_value(r, value, field, false)?;
                // duplicate keys: last write wins
                map.insert(key, entry);
            }
            r.align4();
            Ok(Value::Object(map))
        }
        Schema::Record(fields) => {
            let mut map = Map::new();
            for f in fields {
                map.insert(
                    f.name.clone(),
                    decode_value(r, &f.schema, &f.name, true)?,
                );
            }
            Ok(Value::Object(map))
        }
    }
}

fn decode_scalar(
    r: &mut EndianReader,
    kind: ScalarKind,
    field: &str,
    align_narrow: bool,
) -> Result<Value, DecodeError> {
    let eof = |_| DecodeError::eof(field);
    let value = match kind {
        ScalarKind::I8 => Value::from(r.i8().map_err(eof)?),
        ScalarKind::U8 => Value::from(r.u8().map_err(eof)?),
        ScalarKind::Bool => Value::from(r.bool().map_err(eof)?),
        ScalarKind::I16 => Value::from(r.i16().map_err(eof)?),
        ScalarKind::U16 => Value::from(r.u16().map_err(eof)?),
        ScalarKind::I32 => Value::from(r.i32().map_err(eof)?),
        ScalarKind::U32 => Value::from(r.u32().map_err(eof)?),
        ScalarKind::I64 => Value::from(r.i64().map_err(eof)?),
        ScalarKind::U64 => Value::from(r.u64().map_err(eof)?),
        ScalarKind::F32 => float_value(r.f32().map_err(eof)? as f64),
        ScalarKind::F64 => float_value(r.f64().map_err(eof)?),
        ScalarKind::String => return Ok(Value::String(read_string(r, field)?)),
    };
    if align_narrow && kind.is_narrow() {
        r.align4();
    }
    Ok(value)
}

/// Length-prefixed UTF-8 string, padded to the 4-byte boundary.
fn read_string(r: &mut EndianReader, field: &str) -> Result<String, DecodeError> {
    let len = r.u32().map_err(|_| DecodeError::eof(field))?;
    if len as usize > r.remaining() {
        return Err(DecodeError::ImplausibleLength {
            field: field.to_owned(),
            len,
            remaining: r.remaining(),
        });
    }
    let bytes = r.bytes(len as usize).map_err(|_| DecodeError::eof(field))?;
    let value = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::InvalidString {
            field: field.to_owned(),
        })?
        .to_owned();
    r.align4();
    Ok(value)
}

fn checked_count(r: &mut EndianReader, field: &str) -> Result<usize, DecodeError> {
    let len = r.u32().map_err(|_| DecodeError::eof(field))?;
    // each element occupies at least one byte
    if len as usize > r.remaining() {
        return Err(DecodeError::ImplausibleLength {
            field: field.to_owned(),
            len,
            remaining: r.remaining(),
        });
    }
    Ok(len as usize)
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
