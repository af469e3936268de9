// Makita Scripts
// Loading user scripts and the surface they are allowed to touch

pub mod api;
pub mod context;
pub mod registry;

pub use api::{response_to_lua, ScriptApi};
pub use context::{ScriptContext, ScriptLog, SharedContext};
pub use registry::{LoadError, ScriptDefinition, ScriptRegistry};
