use crate::binary::{BlobReader, BlobWriter};
use crate::error::EvalError;
use crate::variant::VariantType;

pub const METHOD_SIGNATURE_VERSION: u8 = 4;

/// Name length, variant kind, type name length and out flag.
const MIN_ENCODED_PARAM_LEN: usize = 10;
/// Width of the out-parameter mask cached on Invoke Method nodes.
pub const MAX_OUT_PARAMETERS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSignature {
    pub name: String,
    pub ty: VariantType,
    pub is_out: bool,
}

impl ParamSignature {
    pub fn new(name: impl Into<String>, ty: VariantType) -> Self {
        Self { name: name.into(), ty, is_out: false }
    }

    pub fn out(name: impl Into<String>, ty: VariantType) -> Self {
        Self { name: name.into(), ty, is_out: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSignature {
    pub name: String,
    pub is_static: bool,
    pub return_type: VariantType,
    pub params: Vec<ParamSignature>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn returns(mut self, ty: VariantType) -> Self {
        self.return_type = ty;
        self
    }

    pub fn param(mut self, param: ParamSignature) -> Self {
        self.params.push(param);
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Bit `i` set when parameter `i` is an out parameter.
    ///
    /// Out parameters past index 31 cannot be represented and are reported as
    /// [`EvalError::TooManyOutParameters`].
    pub fn out_mask(&self) -> Result<u32, EvalError> {
        let mut mask = 0u32;
        for (index, param) in self.params.iter().enumerate() {
            if !param.is_out {
                continue;
            }
            if index >= MAX_OUT_PARAMETERS {
                return Err(EvalError::TooManyOutParameters { index });
            }
            mask |= 1 << index;
        }
        Ok(mask)
    }

    /// Decodes the signature literal stored on Invoke Method nodes. The blob carries no
    /// method name, so the returned signature has an empty one.
    pub fn from_blob(bytes: &[u8]) -> Result<Self, EvalError> {
        let mut reader = BlobReader::new(bytes);
        let invalid = |_: std::io::Error| EvalError::InvocationFailed("malformed method signature blob".to_string());
        let version = reader.read_u8().map_err(invalid)?;
        if version != METHOD_SIGNATURE_VERSION {
            return Err(EvalError::UnsupportedSignatureVersion(version));
        }
        let is_static = reader.read_bool().map_err(invalid)?;
        let return_type = reader.read_variant_type().map_err(invalid)?;
        let count = reader.read_i32().map_err(invalid)?;
        if count < 0 {
            return Err(EvalError::InvocationFailed("negative parameter count in signature".to_string()));
        }
        if count as usize > reader.remaining() / MIN_ENCODED_PARAM_LEN {
            return Err(EvalError::InvocationFailed(format!("signature declares {count} parameters past the end of the blob")));
        }
        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_len = reader.read_i32().map_err(invalid)?.max(0) as usize;
            let name = reader.read_utf16(name_len).map_err(invalid)?;
            let ty = reader.read_variant_type().map_err(invalid)?;
            let is_out = reader.read_bool().map_err(invalid)?;
            params.push(ParamSignature { name, ty, is_out });
        }
        Ok(Self { name: String::new(), is_static, return_type, params })
    }

    pub fn to_blob(&self) -> Vec<u8> {
        let mut writer = BlobWriter::new();
        writer
            .write_u8(METHOD_SIGNATURE_VERSION)
            .write_bool(self.is_static)
            .write_variant_type(&self.return_type)
            .write_i32(self.params.len() as i32);
        for param in &self.params {
            writer
                .write_i32(param.name.encode_utf16().count() as i32)
                .write_utf16(&param.name)
                .write_variant_type(&param.ty)
                .write_bool(param.is_out);
        }
        writer.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSignature {
    pub name: String,
    pub ty: VariantType,
    pub is_static: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantKind;

    fn float() -> VariantType {
        VariantType::new(VariantKind::Float)
    }

    #[test]
    fn blob_round_trip_keeps_out_flags() {
        let signature = MethodSignature::new("")
            .returns(VariantType::new(VariantKind::Bool))
            .param(ParamSignature::new("origin", float()))
            .param(ParamSignature::out("hit", VariantType::object("Actor")));
        let decoded = MethodSignature::from_blob(&signature.to_blob()).unwrap();
        assert_eq!(decoded, signature);
        assert_eq!(decoded.out_mask().unwrap(), 0b10);
    }

    #[test]
    fn other_versions_are_rejected() {
        let mut blob = MethodSignature::new("").to_blob();
        blob[0] = 3;
        assert_eq!(MethodSignature::from_blob(&blob), Err(EvalError::UnsupportedSignatureVersion(3)));
    }

    #[test]
    fn out_parameter_31_fits_and_32_does_not() {
        let mut signature = MethodSignature::new("Wide");
        for index in 0..32 {
            signature = signature.param(ParamSignature::new(format!("p{index}"), float()));
        }
        signature.params[31].is_out = true;
        assert_eq!(signature.out_mask().unwrap(), 1 << 31);

        signature = signature.param(ParamSignature::out("p32", float()));
        assert_eq!(signature.out_mask(), Err(EvalError::TooManyOutParameters { index: 32 }));
    }

    #[test]
    fn oversized_parameter_counts_are_rejected() {
        let mut blob = vec![METHOD_SIGNATURE_VERSION, 0, 0];
        blob.extend_from_slice(&0i32.to_le_bytes());
        blob.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(MethodSignature::from_blob(&blob), Err(EvalError::InvocationFailed(_))));

        let mut truncated = MethodSignature::new("").param(ParamSignature::new("a", float())).to_blob();
        truncated.truncate(truncated.len() - 1);
        assert!(MethodSignature::from_blob(&truncated).is_err());
    }
}
