//! Little-endian readers and writers for the metadata and signature blobs.

use std::io::{self, Cursor, Read, Write};

use crate::variant::{VariantKind, VariantType};

pub struct BlobReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BlobReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(bytes) }
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.cursor.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.cursor.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "blob truncated"));
        }
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_utf16(&mut self, units: usize) -> io::Result<String> {
        let bytes = self.read_bytes(units * 2)?;
        let wide: Vec<u16> = bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
        String::from_utf16(&wide).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Fixed-size NUL-padded string field.
    pub fn read_fixed_str(&mut self, size: usize) -> io::Result<String> {
        let bytes = self.read_bytes(size)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec()).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    pub fn read_variant_type(&mut self) -> io::Result<VariantType> {
        let raw = self.read_u8()?;
        let kind = VariantKind::from_u8(raw)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("unknown variant kind {raw}")))?;
        let len = self.read_i32()?;
        if len < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "negative type name length"));
        }
        let name = self.read_bytes(len as usize)?;
        let name = String::from_utf8(name).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(VariantType { kind, type_name: (!name.is_empty()).then_some(name) })
    }
}

#[derive(Default)]
pub struct BlobWriter {
    buffer: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_utf16(&mut self, value: &str) -> &mut Self {
        for unit in value.encode_utf16() {
            self.buffer.extend_from_slice(&unit.to_le_bytes());
        }
        self
    }

    /// Writes `value` into a `size`-byte field, NUL-padded. A value filling the whole
    /// field is stored without a terminator.
    pub fn write_fixed_str(&mut self, value: &str, size: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let len = bytes.len().min(size);
        self.buffer.extend_from_slice(&bytes[..len]);
        self.buffer.resize(self.buffer.len() + (size - len), 0);
        self
    }

    pub fn write_variant_type(&mut self, ty: &VariantType) -> &mut Self {
        self.write_u8(ty.kind as u8);
        let name = ty.type_name.as_deref().unwrap_or_default();
        self.write_i32(name.len() as i32);
        self.buffer.extend_from_slice(name.as_bytes());
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_strings_are_nul_padded() {
        let bytes = BlobWriter::new().write_fixed_str("Actor", 32).write_u32(7).finish();
        assert_eq!(bytes.len(), 36);
        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.read_fixed_str(32).unwrap(), "Actor");
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncated_reads_fail() {
        let bytes = [1u8, 2];
        let mut reader = BlobReader::new(&bytes);
        assert!(reader.read_u32().is_err());
        let mut reader = BlobReader::new(&bytes);
        assert!(reader.read_bytes(8).is_err());
    }

    #[test]
    fn utf16_names_decode() {
        let bytes = BlobWriter::new().write_utf16("dt").finish();
        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.read_utf16(2).unwrap(), "dt");
    }
}
