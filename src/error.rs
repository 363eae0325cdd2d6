use thiserror::Error;
use uuid::Uuid;

/// Failures raised while a graph is being evaluated.
///
/// These never unwind the interpreter. Handlers report them through the shared error sink
/// and the affected box degrades to the zero value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("call stack overflow (depth limit {limit})")]
    CallStackOverflow { limit: usize },
    #[error("missing box {box_id} on node {node_id}")]
    NullBox { node_id: u32, box_id: u32 },
    #[error("missing object instance")]
    MissingInstance,
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("missing type '{0}'")]
    MissingType(String),
    #[error("missing method '{type_name}.{method}' with {params} parameter(s)")]
    MissingMethod { type_name: String, method: String, params: usize },
    #[error("missing field '{type_name}.{field}'")]
    MissingField { type_name: String, field: String },
    #[error("missing event '{type_name}.{event}'")]
    MissingEvent { type_name: String, event: String },
    #[error("expected value of type {expected}, got {actual}")]
    WrongVariantType { expected: String, actual: String },
    #[error("unsupported method signature version {0}")]
    UnsupportedSignatureVersion(u8),
    #[error("method parameter {index} cannot be an out parameter (limit is 32)")]
    TooManyOutParameters { index: usize },
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
}

impl EvalError {
    pub fn kind(&self) -> EvalErrorKind {
        match self {
            EvalError::CallStackOverflow { .. } => EvalErrorKind::CallStackOverflow,
            EvalError::NullBox { .. } => EvalErrorKind::NullBox,
            EvalError::MissingInstance => EvalErrorKind::MissingInstance,
            EvalError::UnknownParameter(_) => EvalErrorKind::UnknownParameter,
            EvalError::MissingType(_) => EvalErrorKind::MissingType,
            EvalError::MissingMethod { .. } => EvalErrorKind::MissingMethod,
            EvalError::MissingField { .. } => EvalErrorKind::MissingField,
            EvalError::MissingEvent { .. } => EvalErrorKind::MissingEvent,
            EvalError::WrongVariantType { .. } => EvalErrorKind::WrongVariantType,
            EvalError::UnsupportedSignatureVersion(_) => EvalErrorKind::UnsupportedSignatureVersion,
            EvalError::TooManyOutParameters { .. } => EvalErrorKind::TooManyOutParameters,
            EvalError::InvocationFailed(_) => EvalErrorKind::InvocationFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalErrorKind {
    CallStackOverflow,
    NullBox,
    MissingInstance,
    UnknownParameter,
    MissingType,
    MissingMethod,
    MissingField,
    MissingEvent,
    WrongVariantType,
    UnsupportedSignatureVersion,
    TooManyOutParameters,
    InvocationFailed,
}

/// Failures that abort loading a script asset and leave it in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("missing data chunk '{0}'")]
    MissingDataChunk(&'static str),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("failed to load graph: {0}")]
    GraphLoadFailed(String),
    #[error("missing base type '{0}'")]
    BaseTypeMissing(String),
    #[error("script {0} nests itself through its base type chain")]
    CircularNesting(Uuid),
}

/// Failures reported back to the engine type system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("type index {0} is out of range")]
    TypeIndexOutOfRange(u32),
    #[error("unknown type name '{0}'")]
    UnknownTypeName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_kind_matches_variant() {
        let err = EvalError::MissingMethod { type_name: "Actor".into(), method: "Jump".into(), params: 2 };
        assert_eq!(err.kind(), EvalErrorKind::MissingMethod);
        assert_eq!(err.to_string(), "missing method 'Actor.Jump' with 2 parameter(s)");
    }

    #[test]
    fn asset_error_messages_are_readable() {
        assert_eq!(AssetError::MissingDataChunk("graph").to_string(), "missing data chunk 'graph'");
        assert_eq!(AssetError::BaseTypeMissing("Pawn".into()).to_string(), "missing base type 'Pawn'");
    }
}
