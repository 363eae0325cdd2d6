//! Visual script assets and the binary module that turns them into scripting types.

mod asset;
pub mod event_table;
pub mod instances;
pub mod meta;
mod module;
mod vtable;

pub use asset::{AssetState, LoadIssue, MethodFlags, ScriptField, ScriptMethod, ScriptProgram, ScriptSource, VisualScript};
pub use meta::{MetaFlags, ScriptMetadata};
pub use module::VisualScriptingModule;
pub use vtable::{method_id, split_method_id};
