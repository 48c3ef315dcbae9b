// Big-endian value codec: fixed-width scalars and length-prefixed BINARY.
use crate::core::bitmap::NullBitmap;
use crate::core::error::{Error, corrupt, malformed};
use crate::core::types::{DataType, Value};

pub const KEY_WIDTH: usize = 8;
pub const BINARY_LEN_PREFIX: usize = 4;

pub fn encode(value: &Value, data_type: DataType) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(value, data_type, &mut out)?;
    Ok(out)
}

pub fn encode_into(value: &Value, data_type: DataType, out: &mut Vec<u8>) -> Result<(), Error> {
    match (value, data_type) {
        (Value::Boolean(v), DataType::Boolean) => out.push(u8::from(*v)),
        (Value::Integer(v), DataType::Integer) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Long(v), DataType::Long) => out.extend_from_slice(&v.to_be_bytes()),
        (Value::Float(v), DataType::Float) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        (Value::Double(v), DataType::Double) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        (Value::Binary(bytes), DataType::Binary) => {
            let len = i32::try_from(bytes.len())
                .map_err(|_| malformed("binary value longer than i32::MAX bytes"))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(bytes);
        }
        (value, data_type) => {
            return Err(malformed(format!(
                "{} value cannot be encoded as {data_type}",
                value.data_type()
            )));
        }
    }
    Ok(())
}

pub fn encoded_len(value: &Value) -> usize {
    match value {
        Value::Binary(bytes) => BINARY_LEN_PREFIX + bytes.len(),
        other => other.data_type().fixed_width().unwrap_or(0),
    }
}

/// Decodes one value at `cursor`, returning it with the offset just past it.
pub fn decode(buf: &[u8], cursor: usize, data_type: DataType) -> Result<(Value, usize), Error> {
    let mut reader = ValueReader::at(buf, cursor);
    let value = reader.next_value(data_type)?;
    Ok((value, reader.position()))
}

/// Packs only the present values in order and records presence in a bitmap.
pub fn encode_present<'a, I>(entries: I, width: usize) -> Result<(Vec<u8>, NullBitmap), Error>
where
    I: IntoIterator<Item = (Option<&'a Value>, DataType)>,
{
    let mut bitmap = NullBitmap::new(width);
    let mut out = Vec::new();
    for (index, (value, data_type)) in entries.into_iter().enumerate() {
        if let Some(value) = value {
            encode_into(value, data_type, &mut out)?;
            bitmap.set(index);
        }
    }
    Ok((out, bitmap))
}

pub fn encode_keys(keys: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(keys.len() * KEY_WIDTH);
    for key in keys {
        out.extend_from_slice(&key.to_be_bytes());
    }
    out
}

pub fn decode_keys(buf: &[u8]) -> Result<Vec<i64>, Error> {
    if buf.len() % KEY_WIDTH != 0 {
        return Err(corrupt(
            format!("key buffer length {} is not a multiple of 8", buf.len()),
            buf.len() - buf.len() % KEY_WIDTH,
        ));
    }
    Ok(buf
        .chunks_exact(KEY_WIDTH)
        .map(|chunk| i64::from_be_bytes(read_8(chunk, 0)))
        .collect())
}

/// Dense decode of one value per type, with no bitmap; the buffer must be consumed exactly.
pub fn decode_values(buf: &[u8], types: &[DataType]) -> Result<Vec<Value>, Error> {
    let mut reader = ValueReader::new(buf);
    let values = types
        .iter()
        .map(|data_type| reader.next_value(*data_type))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(values)
}

/// Positional reader over a packed value buffer; never reads past the end.
#[derive(Debug)]
pub struct ValueReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ValueReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::at(buf, 0)
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn next_value(&mut self, data_type: DataType) -> Result<Value, Error> {
        let start = self.pos;
        let value = match data_type {
            DataType::Boolean => match self.take(1, data_type)?[0] {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(corrupt(format!("invalid BOOLEAN byte {other:#04x}"), start));
                }
            },
            DataType::Integer => Value::Integer(i32::from_be_bytes(read_4(self.take(4, data_type)?, 0))),
            DataType::Long => Value::Long(i64::from_be_bytes(read_8(self.take(8, data_type)?, 0))),
            DataType::Float => Value::Float(f32::from_bits(u32::from_be_bytes(read_4(
                self.take(4, data_type)?,
                0,
            )))),
            DataType::Double => Value::Double(f64::from_bits(u64::from_be_bytes(read_8(
                self.take(8, data_type)?,
                0,
            )))),
            DataType::Binary => Value::Binary(self.next_binary_payload()?.to_vec()),
        };
        Ok(value)
    }

    /// Raw payload bytes of the next field: the fixed-width bytes, or the
    /// BINARY body without its length prefix.
    pub fn next_payload(&mut self, data_type: DataType) -> Result<&'a [u8], Error> {
        match data_type.fixed_width() {
            Some(width) => self.take(width, data_type),
            None => self.next_binary_payload(),
        }
    }

    /// Errors when unread bytes remain.
    pub fn finish(&self) -> Result<(), Error> {
        if self.pos != self.buf.len() {
            return Err(corrupt(
                format!("{} trailing bytes after last value", self.remaining()),
                self.pos,
            ));
        }
        Ok(())
    }

    fn next_binary_payload(&mut self) -> Result<&'a [u8], Error> {
        let start = self.pos;
        let len = i32::from_be_bytes(read_4(self.take(4, DataType::Binary)?, 0));
        let len = usize::try_from(len)
            .map_err(|_| corrupt(format!("negative BINARY length {len}"), start))?;
        self.take(len, DataType::Binary)
    }

    fn take(&mut self, len: usize, data_type: DataType) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                corrupt(
                    format!(
                        "truncated {data_type}: need {len} bytes, {} left",
                        self.remaining()
                    ),
                    self.pos,
                )
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

#[cfg(test)]
mod tests {
    use super::{
        ValueReader, decode, decode_keys, decode_values, encode, encode_keys, encode_present,
    };
    use crate::core::error::ErrorKind;
    use crate::core::types::{DataType, MAX_KEY, MIN_KEY, Value};

    fn samples() -> Vec<Value> {
        vec![
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Integer(i32::MIN),
            Value::Integer(-1),
            Value::Long(MIN_KEY),
            Value::Long(MAX_KEY),
            Value::Float(f32::from_bits(0x7fc0_0001)),
            Value::Float(-0.0),
            Value::Double(f64::from_bits(0x7ff8_dead_beef_0001)),
            Value::Double(f64::INFINITY),
            Value::Binary(Vec::new()),
            Value::from("héllo"),
        ]
    }

    #[test]
    fn every_type_round_trips_bit_exact() {
        for value in samples() {
            let data_type = value.data_type();
            let buf = encode(&value, data_type).expect("encode");
            let (decoded, next) = decode(&buf, 0, data_type).expect("decode");
            assert!(decoded.bit_eq(&value), "{value:?} -> {decoded:?}");
            assert_eq!(next, buf.len());
        }
    }

    #[test]
    fn layout_is_big_endian() {
        assert_eq!(encode(&Value::Integer(1), DataType::Integer).unwrap(), [0, 0, 0, 1]);
        assert_eq!(
            encode(&Value::Long(42), DataType::Long).unwrap(),
            [0, 0, 0, 0, 0, 0, 0, 0x2a]
        );
        assert_eq!(
            encode(&Value::Double(1.0), DataType::Double).unwrap(),
            [0x3f, 0xf0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode(&Value::from("ab"), DataType::Binary).unwrap(),
            [0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn mismatched_type_is_malformed() {
        let err = encode(&Value::Integer(1), DataType::Long).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }

    #[test]
    fn truncated_buffers_are_protocol_errors() {
        let err = decode(&[0, 0, 0], 0, DataType::Integer).expect_err("short int");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
        assert_eq!(err.offset(), Some(0));

        let err = decode(&[0, 0, 0, 5, b'a'], 0, DataType::Binary).expect_err("short binary");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
        assert_eq!(err.offset(), Some(4));

        let err = decode(&[0xff, 0xff, 0xff, 0xff], 0, DataType::Binary).expect_err("negative");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);

        let err = decode(&[2], 0, DataType::Boolean).expect_err("bad bool");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
    }

    #[test]
    fn decode_advances_from_cursor() {
        let mut buf = encode(&Value::Integer(7), DataType::Integer).unwrap();
        buf.extend(encode(&Value::Boolean(true), DataType::Boolean).unwrap());
        let (first, next) = decode(&buf, 0, DataType::Integer).expect("first");
        let (second, end) = decode(&buf, next, DataType::Boolean).expect("second");
        assert_eq!(first, Value::Integer(7));
        assert_eq!(second, Value::Boolean(true));
        assert_eq!(end, 5);
    }

    #[test]
    fn absent_values_take_no_bytes() {
        let values = [Some(Value::Boolean(true)), None, Some(Value::Long(42))];
        let types = [DataType::Boolean, DataType::Integer, DataType::Long];
        let (buf, bitmap) = encode_present(
            values.iter().map(Option::as_ref).zip(types.iter().copied()),
            3,
        )
        .expect("encode");
        assert_eq!(buf, [0x01, 0, 0, 0, 0, 0, 0, 0, 0x2a]);
        assert!(bitmap.get(0));
        assert!(!bitmap.get(1));
        assert!(bitmap.get(2));
        assert_eq!(bitmap.as_bytes(), &[0b101]);
    }

    #[test]
    fn keys_round_trip_and_reject_ragged_buffers() {
        let keys = [MIN_KEY, -1, 0, 1, MAX_KEY];
        let buf = encode_keys(&keys);
        assert_eq!(buf.len(), 40);
        assert_eq!(decode_keys(&buf).expect("keys"), keys);

        let err = decode_keys(&buf[..39]).expect_err("ragged");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
    }

    #[test]
    fn dense_values_reject_trailing_bytes() {
        let mut buf = encode(&Value::Double(2.5), DataType::Double).unwrap();
        let values = decode_values(&buf, &[DataType::Double]).expect("dense");
        assert_eq!(values, vec![Value::Double(2.5)]);

        buf.push(0);
        let err = decode_values(&buf, &[DataType::Double]).expect_err("trailing");
        assert_eq!(err.kind(), ErrorKind::ProtocolDecode);
        assert_eq!(err.offset(), Some(8));
    }

    #[test]
    fn payload_reader_strips_binary_prefix() {
        let mut buf = encode(&Value::from("img"), DataType::Binary).unwrap();
        buf.extend(encode(&Value::Integer(3), DataType::Integer).unwrap());
        let mut reader = ValueReader::new(&buf);
        assert_eq!(reader.next_payload(DataType::Binary).expect("binary"), b"img");
        assert_eq!(reader.next_payload(DataType::Integer).expect("int"), [0, 0, 0, 3]);
        reader.finish().expect("consumed");
    }
}
