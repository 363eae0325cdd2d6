pub mod binary;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod graph;
pub mod graph_harness;
pub mod interpreter;
pub mod logging;
pub mod main_thread;
pub mod native;
pub mod nodes;
pub mod objects;
pub mod profiler;
pub mod scripting;
pub mod signature;
pub mod types;
pub mod variant;
pub mod visual;
#[cfg(feature = "editor")]
pub mod watch;

pub use error::{AssetError, EvalError, EvalErrorKind, ModuleError};
pub use graph::{Graph, GraphData, NodeData};
pub use scripting::Scripting;
pub use variant::{Variant, VariantKind, VariantType};
pub use visual::{AssetState, ScriptMetadata, VisualScript, VisualScriptingModule};
