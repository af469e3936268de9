// Makita Script Registry
// Named script bodies, compiled once into functions bound to their own environment

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use mlua::{Function, Lua, Table};

use super::api::ScriptApi;

/// Errors loading a script
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read script '{name}' from {}: {source}", .path.display())]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile script '{name}': {message}")]
    Parse { name: String, message: String },
}

/// A loaded script.
///
/// Cloning is cheap; tasks keep the clone they were created from, so a
/// reload never affects a task already in flight.
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    name: String,
    source: Arc<str>,
    path: Option<PathBuf>,
    chunk: Function,
    env: Table,
}

impl ScriptDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Compiled body
    pub fn chunk(&self) -> &Function {
        &self.chunk
    }

    /// Globals table of this script
    pub fn env(&self) -> &Table {
        &self.env
    }
}

/// Name -> definition, in registration order
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: IndexMap<String, ScriptDefinition>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, compile and store a script file, replacing any prior body
    pub fn load(
        &mut self,
        lua: &Lua,
        api: &ScriptApi,
        name: &str,
        path: &Path,
    ) -> Result<&ScriptDefinition, LoadError> {
        let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        self.insert(lua, api, name, source, Some(path.to_path_buf()))
    }

    /// Compile and store an in-memory script body
    pub fn load_source(
        &mut self,
        lua: &Lua,
        api: &ScriptApi,
        name: &str,
        source: &str,
    ) -> Result<&ScriptDefinition, LoadError> {
        self.insert(lua, api, name, source.to_string(), None)
    }

    fn insert(
        &mut self,
        lua: &Lua,
        api: &ScriptApi,
        name: &str,
        source: String,
        path: Option<PathBuf>,
    ) -> Result<&ScriptDefinition, LoadError> {
        let parse_error = |err: mlua::Error| LoadError::Parse {
            name: name.to_string(),
            message: err.to_string(),
        };

        let env = api.new_env().map_err(parse_error)?;
        let chunk = lua
            .load(source.as_str())
            .set_name(name.to_string())
            .set_environment(env.clone())
            .into_function()
            .map_err(parse_error)?;

        let definition = ScriptDefinition {
            name: name.to_string(),
            source: Arc::from(source),
            path,
            chunk,
            env,
        };

        // IndexMap::insert keeps the original position of an existing key
        let (index, _) = self.scripts.insert_full(name.to_string(), definition);
        Ok(&self.scripts[index])
    }

    pub fn get(&self, name: &str) -> Option<ScriptDefinition> {
        self.scripts.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// Script names in registration order
    pub fn names(&self) -> Vec<String> {
        self.scripts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
