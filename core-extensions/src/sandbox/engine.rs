//! Script evaluation.
//!
//! A [`ScriptEngine`] turns a script body into registered extension classes.
//! [`StaticScriptEngine`] links classes compiled into the app; a script body
//! for it is a manifest naming the classes to register:
//!
//! ```json
//! { "register": ["MangaDex"] }
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::extension::ExtensionFactory;
use super::registry::ExtensionRegistry;
use crate::error::SandboxError;

pub trait ScriptEngine: Send + Sync {
    /// Evaluate `script` for `extension_id`, registering its classes.
    fn evaluate(
        &self,
        extension_id: &str,
        script: &str,
        registry: &mut ExtensionRegistry,
    ) -> Result<(), SandboxError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    register: Vec<String>,
}

#[derive(Default)]
pub struct StaticScriptEngine {
    linked: HashMap<String, Arc<dyn ExtensionFactory>>,
}

impl StaticScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(mut self, class_name: impl Into<String>, factory: Arc<dyn ExtensionFactory>) -> Self {
        self.linked.insert(class_name.into(), factory);
        self
    }
}

impl ScriptEngine for StaticScriptEngine {
    fn evaluate(
        &self,
        extension_id: &str,
        script: &str,
        registry: &mut ExtensionRegistry,
    ) -> Result<(), SandboxError> {
        let load_error = |reason: String| SandboxError::Load {
            extension_id: extension_id.to_string(),
            reason,
        };

        let manifest: Manifest =
            serde_json::from_str(script).map_err(|e| load_error(format!("invalid script: {}", e)))?;

        for class_name in manifest.register {
            let factory = self
                .linked
                .get(&class_name)
                .ok_or_else(|| load_error(format!("class {} is not linked", class_name)))?;
            registry.register(class_name, Arc::clone(factory));
        }
        Ok(())
    }
}
