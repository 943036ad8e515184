//! The surface a loaded extension class implements.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::capabilities::SandboxCapabilities;
use crate::error::{ExtensionError, Result};
use crate::network_proxy::{ProxyRequest, ProxyResponse};
use crate::settings_menu::MenuDecl;

/// HTML helper handed to extension constructors.
pub trait HtmlParser: Send + Sync {
    /// Text content of every element matching `selector`.
    fn select_text(&self, html: &str, selector: &str) -> std::result::Result<Vec<String>, String>;

    /// Value of `attribute` on every element matching `selector`.
    fn select_attr(
        &self,
        html: &str,
        selector: &str,
        attribute: &str,
    ) -> std::result::Result<Vec<String>, String>;
}

/// A content source running inside the sandbox.
#[async_trait]
pub trait SourceExtension: Send + Sync {
    /// Plain method dispatch (`getMangaDetails`, `getSearchResults`, ...).
    async fn invoke(&self, method: &str, args: Value) -> Result<Value>;

    /// Report home page sections through `sink`, possibly several times per
    /// section as items load.
    async fn home_page_sections(&self, sink: &SectionSink) -> Result<()> {
        let _ = sink;
        Err(ExtensionError::method(
            "getHomePageSections",
            "extension has no home page",
        ))
    }

    fn source_menu(&self) -> Option<MenuDecl> {
        None
    }

    /// Adjust an outgoing request (headers, cookies, signed urls).
    async fn intercept_request(&self, request: ProxyRequest) -> Result<ProxyRequest> {
        Ok(request)
    }

    /// Adjust a response before the extension sees it (descrambling).
    async fn intercept_response(
        &self,
        request: &ProxyRequest,
        response: ProxyResponse,
    ) -> Result<ProxyResponse> {
        let _ = request;
        Ok(response)
    }
}

/// A named extension class registered by a script.
pub trait ExtensionFactory: Send + Sync {
    fn construct(
        &self,
        capabilities: SandboxCapabilities,
        html: Option<Arc<dyn HtmlParser>>,
    ) -> std::result::Result<Arc<dyn SourceExtension>, String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Collects home sections; a later emit for the same id replaces the earlier
/// one but keeps its position.
#[derive(Default)]
pub struct SectionSink {
    sections: Mutex<Vec<HomeSection>>,
}

impl SectionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, section: HomeSection) {
        let mut sections = self.sections.lock();
        match sections.iter_mut().find(|s| s.id == section.id) {
            Some(existing) => *existing = section,
            None => sections.push(section),
        }
    }

    pub fn into_sections(self) -> Vec<HomeSection> {
        self.sections.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(id: &str, items: usize) -> HomeSection {
        HomeSection {
            id: id.to_string(),
            title: id.to_uppercase(),
            items: (0..items).map(|i| json!({"id": i})).collect(),
        }
    }

    #[test]
    fn test_last_emit_wins_and_order_is_kept() {
        let sink = SectionSink::new();
        sink.emit(section("popular", 0));
        sink.emit(section("latest", 2));
        sink.emit(section("popular", 5));

        let sections = sink.into_sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].id, "popular");
        assert_eq!(sections[0].items.len(), 5);
        assert_eq!(sections[1].id, "latest");
    }
}
