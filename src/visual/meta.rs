use bitflags::bitflags;

use crate::binary::{BlobReader, BlobWriter};
use crate::error::AssetError;

pub const METADATA_VERSION: u32 = 1;
/// Size of the NUL-padded base type name field.
pub const BASE_TYPE_FIELD: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MetaFlags: u32 {
        const STATIC = 1 << 0;
        const SEALED = 1 << 1;
        const ABSTRACT = 1 << 2;
    }
}

/// Per-script metadata chunk: base type and type flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub base_type: String,
    pub flags: MetaFlags,
}

impl ScriptMetadata {
    pub fn new(base_type: impl Into<String>) -> Self {
        Self { base_type: base_type.into(), flags: MetaFlags::empty() }
    }

    pub fn with_flags(mut self, flags: MetaFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let mut reader = BlobReader::new(bytes);
        let truncated = |err: std::io::Error| AssetError::InvalidData(format!("metadata: {err}"));
        let version = reader.read_u32().map_err(truncated)?;
        if version != METADATA_VERSION {
            return Err(AssetError::InvalidData(format!("unsupported metadata version {version}")));
        }
        let base_type = reader.read_fixed_str(BASE_TYPE_FIELD).map_err(truncated)?;
        let flags = MetaFlags::from_bits_truncate(reader.read_u32().map_err(truncated)?);
        Ok(Self { base_type, flags })
    }

    /// Native type names up to 31 bytes are NUL-terminated; a 32-character script type
    /// name fills the field exactly.
    pub fn encode(&self) -> Result<Vec<u8>, AssetError> {
        if self.base_type.len() > BASE_TYPE_FIELD {
            return Err(AssetError::InvalidData(format!("base type name '{}' is too long", self.base_type)));
        }
        Ok(BlobWriter::new()
            .write_u32(METADATA_VERSION)
            .write_fixed_str(&self.base_type, BASE_TYPE_FIELD)
            .write_u32(self.flags.bits())
            .finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trip() {
        let meta = ScriptMetadata::new("Actor").with_flags(MetaFlags::SEALED);
        let bytes = meta.encode().unwrap();
        assert_eq!(bytes.len(), 4 + BASE_TYPE_FIELD + 4);
        assert_eq!(ScriptMetadata::decode(&bytes).unwrap(), meta);
    }

    #[test]
    fn only_version_one_is_accepted() {
        let mut bytes = ScriptMetadata::new("Actor").encode().unwrap();
        bytes[0] = 2;
        assert!(matches!(ScriptMetadata::decode(&bytes), Err(AssetError::InvalidData(_))));
        assert!(ScriptMetadata::decode(&bytes[..6]).is_err());
    }

    #[test]
    fn script_type_names_fill_the_base_name_field() {
        let hex = "0123456789abcdef0123456789abcdef";
        let bytes = ScriptMetadata::new(hex).encode().unwrap();
        assert_eq!(ScriptMetadata::decode(&bytes).unwrap().base_type, hex);
        assert!(ScriptMetadata::new(format!("{hex}0")).encode().is_err());
    }
}
