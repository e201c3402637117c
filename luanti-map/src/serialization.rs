//!
//! The byte-level encoding used by map blocks and content definitions.
//!
//! All integers are big endian, strings are length prefixed and floats travel as fixed point
//! numbers with three decimal places ("F1000").
//!

pub(crate) mod compression;

use std::string::FromUtf8Error;

/// Fixed point factor for floats on the wire
const F1000_FACTOR: f32 = 1000.0;

/// Everything that can go wrong while decoding map data.
///
/// This is deliberately distinct from I/O or backend failures so callers can tell a corrupt blob
/// apart from a database that could not be read.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeserializeError {
    /// The data ended before all mandatory fields were read
    #[error("unexpected end of data")]
    Eof,
    /// A field contained a value outside of its domain
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The format version is not supported by this reader
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    /// A compressed section could not be decompressed
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

impl From<FromUtf8Error> for DeserializeError {
    fn from(value: FromUtf8Error) -> Self {
        Self::InvalidValue(format!("invalid utf-8: {value}"))
    }
}

/// Result type of all decoding operations
pub type DeserializeResult<T> = Result<T, DeserializeError>;

/// Everything that can go wrong while encoding map data.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// The requested protocol version is too old to be served
    #[error("protocol version {0} is not supported")]
    UnsupportedProtocol(u16),
    /// Blocks can only be written in the current format version
    #[error("block format version {0} cannot be written")]
    UnsupportedFormat(u8),
    /// A length-prefixed field exceeded the width of its prefix
    #[error("{0} is too large to be serialized")]
    TooLarge(&'static str),
    /// The compressor reported an error
    #[error("compression failed: {0}")]
    CompressionFailed(String),
}

/// Result type of all encoding operations
pub type SerializeResult<T = ()> = Result<T, SerializeError>;

/// Reads primitives from a borrowed byte slice.
pub struct Deserializer<'data> {
    data: &'data [u8],
}

impl<'data> Deserializer<'data> {
    /// Creates a reader over the given bytes.
    #[must_use]
    pub fn new(data: &'data [u8]) -> Self {
        Self { data }
    }

    /// Number of bytes that have not been consumed yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if all data has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all unconsumed bytes without consuming them.
    #[must_use]
    pub fn peek_all(&self) -> &'data [u8] {
        self.data
    }

    /// Consumes `count` bytes.
    ///
    /// # Errors
    ///
    /// Returns `DeserializeError::Eof` if fewer bytes are left.
    pub fn take(&mut self, count: usize) -> DeserializeResult<&'data [u8]> {
        if count > self.data.len() {
            return Err(DeserializeError::Eof);
        }
        let (head, tail) = self.data.split_at(count);
        self.data = tail;
        Ok(head)
    }

    /// Consumes a fixed number of bytes.
    ///
    /// # Errors
    ///
    /// Returns `DeserializeError::Eof` if fewer bytes are left.
    pub fn take_n<const N: usize>(&mut self) -> DeserializeResult<[u8; N]> {
        let bytes = self.take(N)?;
        bytes.try_into().map_err(|_err| DeserializeError::Eof)
    }

    /// Splits off a reader for the next `count` bytes.
    ///
    /// # Errors
    ///
    /// Returns `DeserializeError::Eof` if fewer bytes are left.
    pub fn slice(&mut self, count: usize) -> DeserializeResult<Deserializer<'data>> {
        Ok(Deserializer::new(self.take(count)?))
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_u8(&mut self) -> DeserializeResult<u8> {
        Ok(u8::from_be_bytes(self.take_n()?))
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted or the byte is neither `0` nor `1`.
    pub fn read_bool(&mut self) -> DeserializeResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DeserializeError::InvalidValue(format!(
                "invalid bool: {other}"
            ))),
        }
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_u16(&mut self) -> DeserializeResult<u16> {
        Ok(u16::from_be_bytes(self.take_n()?))
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_i16(&mut self) -> DeserializeResult<i16> {
        Ok(i16::from_be_bytes(self.take_n()?))
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_u32(&mut self) -> DeserializeResult<u32> {
        Ok(u32::from_be_bytes(self.take_n()?))
    }

    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_i32(&mut self) -> DeserializeResult<i32> {
        Ok(i32::from_be_bytes(self.take_n()?))
    }

    /// Reads a fixed point number with three decimals.
    ///
    /// # Errors
    ///
    /// Fails if the data is exhausted.
    #[expect(
        clippy::cast_precision_loss,
        reason = "F1000 values are small enough to be represented exactly"
    )]
    pub fn read_f1000(&mut self) -> DeserializeResult<f32> {
        Ok(self.read_i32()? as f32 / F1000_FACTOR)
    }

    /// Reads a byte string with a 16 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_bytes16(&mut self) -> DeserializeResult<&'data [u8]> {
        let len = self.read_u16()?;
        self.take(usize::from(len))
    }

    /// Reads a byte string with a 32 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the data is exhausted.
    pub fn read_bytes32(&mut self) -> DeserializeResult<&'data [u8]> {
        let len = self.read_u32()?;
        let len = usize::try_from(len).map_err(|_err| DeserializeError::Eof)?;
        self.take(len)
    }

    /// Reads a UTF-8 string with a 16 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the data is exhausted or not valid UTF-8.
    pub fn read_string16(&mut self) -> DeserializeResult<String> {
        Ok(String::from_utf8(self.read_bytes16()?.to_vec())?)
    }
}

/// A placeholder for a length prefix which is only known after the prefixed data was written.
#[must_use]
pub struct Marker {
    offset: usize,
    width: usize,
}

/// Collects primitives into a growing byte buffer.
#[derive(Default)]
pub struct Serializer {
    data: Vec<u8>,
}

impl Serializer {
    /// Creates a writer with a pre-allocated buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Appends a bool as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Appends a big endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Appends a big endian `i16`.
    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Appends a big endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Appends a big endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Appends a fixed point number with three decimals.
    pub fn write_f1000(&mut self, value: f32) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "truncation towards zero is part of the format"
        )]
        self.write_i32((value * F1000_FACTOR) as i32);
    }

    /// Appends a byte string with a 16 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the string is longer than `u16::MAX` bytes.
    pub fn write_bytes16(&mut self, what: &'static str, bytes: &[u8]) -> SerializeResult {
        let len = u16::try_from(bytes.len()).map_err(|_err| SerializeError::TooLarge(what))?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Appends a byte string with a 32 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the string is longer than `u32::MAX` bytes.
    pub fn write_bytes32(&mut self, what: &'static str, bytes: &[u8]) -> SerializeResult {
        let len = u32::try_from(bytes.len()).map_err(|_err| SerializeError::TooLarge(what))?;
        self.write_u32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Appends a UTF-8 string with a 16 bit length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the string is longer than `u16::MAX` bytes.
    pub fn write_string16(&mut self, what: &'static str, value: &str) -> SerializeResult {
        self.write_bytes16(what, value.as_bytes())
    }

    /// Reserves `width` bytes for a length prefix to be filled in by `finish_marker`.
    pub fn write_marker(&mut self, width: usize) -> Marker {
        let offset = self.data.len();
        self.data.resize(offset + width, 0);
        Marker { offset, width }
    }

    /// Fills in the length prefix with the number of bytes written since the marker.
    ///
    /// # Errors
    ///
    /// Fails if the distance does not fit into the width of the marker.
    pub fn finish_marker(&mut self, what: &'static str, marker: Marker) -> SerializeResult {
        let distance = self.data.len() - marker.offset - marker.width;
        let bytes = match marker.width {
            2 => u16::try_from(distance)
                .map_err(|_err| SerializeError::TooLarge(what))?
                .to_be_bytes()
                .to_vec(),
            4 => u32::try_from(distance)
                .map_err(|_err| SerializeError::TooLarge(what))?
                .to_be_bytes()
                .to_vec(),
            _ => return Err(SerializeError::TooLarge(what)),
        };
        if let Some(slot) = self
            .data
            .get_mut(marker.offset..marker.offset + marker.width)
        {
            slot.copy_from_slice(&bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_prefix_their_payload() {
        let mut ser = Serializer::default();
        ser.write_u8(1);
        let outer = ser.write_marker(4);
        let inner = ser.write_marker(2);
        ser.write_bytes(b"hello");
        ser.finish_marker("inner", inner).unwrap();
        ser.finish_marker("outer", outer).unwrap();

        let data = ser.into_inner();
        let mut deser = Deserializer::new(&data);
        assert_eq!(deser.read_u8().unwrap(), 1);
        let len = deser.read_u32().unwrap() as usize;
        let mut outer = deser.slice(len).unwrap();
        assert!(deser.is_empty(), "outer marker must span everything");
        assert_eq!(outer.read_bytes16().unwrap(), b"hello");
        assert!(outer.is_empty(), "inner marker must span the string");
    }

    #[test]
    fn fixed_point_floats() {
        let mut ser = Serializer::default();
        ser.write_f1000(-5.0);
        ser.write_f1000(0.25);
        let data = ser.into_inner();
        assert_eq!(data[..4], (-5000_i32).to_be_bytes());
        let mut deser = Deserializer::new(&data);
        assert!((deser.read_f1000().unwrap() + 5.0).abs() < f32::EPSILON);
        assert!((deser.read_f1000().unwrap() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut deser = Deserializer::new(&[0, 5, b'a']);
        assert_eq!(deser.read_bytes16(), Err(DeserializeError::Eof));
        let mut deser = Deserializer::new(&[2]);
        assert!(
            matches!(deser.read_bool(), Err(DeserializeError::InvalidValue(_))),
            "2 is not a valid bool"
        );
    }
}
