use std::sync::Arc;

use super::extension::ExtensionFactory;
use crate::error::SandboxError;

/// Extension classes registered by the script currently being loaded.
///
/// Owned by the sandbox host and cleared before every load, so classes from a
/// previous extension can never be picked up by the next one.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: Vec<(String, Arc<dyn ExtensionFactory>)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing an earlier class of the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ExtensionFactory>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Pick the class for `extension_id`: exact name, then case-insensitive
    /// name, then the only registered class.
    pub fn select(&self, extension_id: &str) -> Result<Arc<dyn ExtensionFactory>, SandboxError> {
        if let Some((_, factory)) = self.entries.iter().find(|(name, _)| name == extension_id) {
            return Ok(Arc::clone(factory));
        }
        if let Some((_, factory)) = self
            .entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(extension_id))
        {
            return Ok(Arc::clone(factory));
        }

        match self.entries.as_slice() {
            [(_, only)] => Ok(Arc::clone(only)),
            [] => Err(SandboxError::Load {
                extension_id: extension_id.to_string(),
                reason: "script registered no extension classes".to_string(),
            }),
            many => Err(SandboxError::AmbiguousRegistry {
                extension_id: extension_id.to_string(),
                count: many.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capabilities::SandboxCapabilities;
    use crate::sandbox::extension::{HtmlParser, SourceExtension};

    struct Named(&'static str);

    impl ExtensionFactory for Named {
        fn construct(
            &self,
            _capabilities: SandboxCapabilities,
            _html: Option<Arc<dyn HtmlParser>>,
        ) -> Result<Arc<dyn SourceExtension>, String> {
            Err(self.0.to_string())
        }
    }

    /// Identify which factory was selected through its construct error.
    fn selected(registry: &ExtensionRegistry, id: &str) -> Result<String, SandboxError> {
        let factory = registry.select(id)?;
        let caps = SandboxCapabilities::detached(id);
        match factory.construct(caps, None) {
            Err(name) => Ok(name),
            Ok(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_lookup_order() {
        let mut registry = ExtensionRegistry::new();
        registry.register("MangaDex", Arc::new(Named("exact")));
        registry.register("mangadex", Arc::new(Named("lower")));
        registry.register("Comick", Arc::new(Named("comick")));

        assert_eq!(selected(&registry, "MangaDex").unwrap(), "exact");
        assert_eq!(selected(&registry, "mangadex").unwrap(), "lower");
        assert_eq!(selected(&registry, "COMICK").unwrap(), "comick");
        assert_eq!(
            selected(&registry, "Other").unwrap_err(),
            SandboxError::AmbiguousRegistry {
                extension_id: "Other".to_string(),
                count: 3
            }
        );
    }

    #[tokio::test]
    async fn test_single_entry_fallback_and_empty() {
        let mut registry = ExtensionRegistry::new();
        assert!(matches!(
            registry.select("x"),
            Err(SandboxError::Load { .. })
        ));

        registry.register("SomethingElse", Arc::new(Named("only")));
        assert_eq!(selected(&registry, "x").unwrap(), "only");

        registry.clear();
        assert!(registry.is_empty());
    }
}
