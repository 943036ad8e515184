//! # Settings Menu Resolver
//!
//! Extensions declare their settings as a tree of rows. Any list of rows or
//! sections may be produced lazily by an async function. The resolver walks
//! the declaration into a plain [`MenuTree`] the app can render, and applies
//! `/`-delimited path mutations back onto the declaration.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::MenuError;

/// Substring of a row id or label that marks it as a secret field.
const PASSWORD_HINT: &str = "password";

pub type MenuResult<T> = std::result::Result<T, MenuError>;

/// Lazily produced rows.
pub type RowsFn = Arc<dyn Fn() -> BoxFuture<'static, MenuResult<Vec<RowDecl>>> + Send + Sync>;
/// Lazily produced form sections.
pub type SectionsFn =
    Arc<dyn Fn() -> BoxFuture<'static, MenuResult<Vec<SectionDecl>>> + Send + Sync>;
pub type ChangeHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, MenuResult<()>> + Send + Sync>;
pub type TapHandler = Arc<dyn Fn() -> BoxFuture<'static, MenuResult<()>> + Send + Sync>;

/// A readable and writable setting value.
#[async_trait]
pub trait ValueBinding: Send + Sync {
    async fn get(&self) -> MenuResult<Value>;
    async fn set(&self, value: Value) -> MenuResult<()>;
}

/// In-memory binding.
pub struct MemoryBinding {
    value: Mutex<Value>,
}

impl MemoryBinding {
    pub fn new(initial: Value) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(initial),
        })
    }
}

#[async_trait]
impl ValueBinding for MemoryBinding {
    async fn get(&self) -> MenuResult<Value> {
        Ok(self.value.lock().clone())
    }

    async fn set(&self, value: Value) -> MenuResult<()> {
        *self.value.lock() = value;
        Ok(())
    }
}

#[derive(Clone)]
pub enum Rows {
    Static(Vec<RowDecl>),
    Deferred(RowsFn),
}

impl Rows {
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MenuResult<Vec<RowDecl>>> + Send + 'static,
    {
        Self::Deferred(Arc::new(move || f().boxed()))
    }

    async fn load(&self) -> MenuResult<Vec<RowDecl>> {
        match self {
            Self::Static(rows) => Ok(rows.clone()),
            Self::Deferred(produce) => produce().await,
        }
    }
}

impl Default for Rows {
    fn default() -> Self {
        Self::Static(Vec::new())
    }
}

#[derive(Clone)]
pub enum Sections {
    Static(Vec<SectionDecl>),
    Deferred(SectionsFn),
}

impl Sections {
    async fn load(&self) -> MenuResult<Vec<SectionDecl>> {
        match self {
            Self::Static(sections) => Ok(sections.clone()),
            Self::Deferred(produce) => produce().await,
        }
    }
}

#[derive(Clone)]
pub struct SectionDecl {
    pub id: String,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub rows: Rows,
}

impl SectionDecl {
    pub fn new(id: impl Into<String>, rows: Rows) -> Self {
        Self {
            id: id.into(),
            header: None,
            footer: None,
            rows,
        }
    }
}

#[derive(Clone)]
pub struct FormDecl {
    pub sections: Sections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub label: String,
}

/// One declared row. Which fields are set decides how it renders.
#[derive(Clone, Default)]
pub struct RowDecl {
    pub id: String,
    pub label: String,
    pub value: Option<Arc<dyn ValueBinding>>,
    pub on_change: Option<ChangeHandler>,
    pub on_tap: Option<TapHandler>,
    pub options: Option<Vec<SelectOption>>,
    pub form: Option<FormDecl>,
    pub is_label: bool,
    pub secure: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl RowDecl {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, binding: Arc<dyn ValueBinding>) -> Self {
        self.value = Some(binding);
        self
    }

    pub fn with_on_change<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MenuResult<()>> + Send + 'static,
    {
        self.on_change = Some(Arc::new(move |value| f(value).boxed()));
        self
    }

    pub fn with_on_tap<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MenuResult<()>> + Send + 'static,
    {
        self.on_tap = Some(Arc::new(move || f().boxed()));
        self
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_form(mut self, sections: Sections) -> Self {
        self.form = Some(FormDecl { sections });
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    pub fn label_only(mut self) -> Self {
        self.is_label = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    fn has_bounds(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn looks_secret(&self) -> bool {
        self.secure
            || self.id.to_lowercase().contains(PASSWORD_HINT)
            || self.label.to_lowercase().contains(PASSWORD_HINT)
    }
}

/// A menu as returned by an extension's `getSourceMenu`.
#[derive(Clone)]
pub struct MenuDecl {
    pub id: String,
    pub label: String,
    pub rows: Rows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowKind {
    Navigation,
    Button,
    Select,
    Label,
    SecureInput,
    Input,
    Switch,
    Stepper,
}

/// Decide how a row renders. The first matching rule wins:
///
/// 1. form -> navigation
/// 2. tap handler -> button
/// 3. options -> select
/// 4. label flag -> label
/// 5. value without change handler or bounds -> input / secure input
/// 6. value with change handler -> switch
/// 7. min/max bounds -> stepper
/// 8. anything else -> label
///
/// Rule 5 excludes bounded rows. A bounded value with no change handler
/// therefore classifies as a stepper; otherwise rule 7 would only ever match
/// rows without a value binding.
pub fn classify(row: &RowDecl) -> RowKind {
    if row.form.is_some() {
        RowKind::Navigation
    } else if row.on_tap.is_some() {
        RowKind::Button
    } else if row.options.is_some() {
        RowKind::Select
    } else if row.is_label {
        RowKind::Label
    } else if row.value.is_some() && row.on_change.is_none() && !row.has_bounds() {
        if row.looks_secret() {
            RowKind::SecureInput
        } else {
            RowKind::Input
        }
    } else if row.value.is_some() && row.on_change.is_some() {
        RowKind::Switch
    } else if row.has_bounds() {
        RowKind::Stepper
    } else {
        RowKind::Label
    }
}

/// A resolved row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SettingsNode {
    Navigation {
        id: String,
        label: String,
        sections: Vec<SectionNode>,
    },
    Button {
        id: String,
        label: String,
    },
    Select {
        id: String,
        label: String,
        options: Vec<SelectOption>,
        value: Value,
    },
    Label {
        id: String,
        label: String,
        value: Value,
    },
    SecureInput {
        id: String,
        label: String,
        value: Value,
    },
    Input {
        id: String,
        label: String,
        value: Value,
    },
    Switch {
        id: String,
        label: String,
        value: Value,
    },
    Stepper {
        id: String,
        label: String,
        value: Value,
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
}

impl SettingsNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Navigation { id, .. }
            | Self::Button { id, .. }
            | Self::Select { id, .. }
            | Self::Label { id, .. }
            | Self::SecureInput { id, .. }
            | Self::Input { id, .. }
            | Self::Switch { id, .. }
            | Self::Stepper { id, .. } => id,
        }
    }

    pub fn kind(&self) -> RowKind {
        match self {
            Self::Navigation { .. } => RowKind::Navigation,
            Self::Button { .. } => RowKind::Button,
            Self::Select { .. } => RowKind::Select,
            Self::Label { .. } => RowKind::Label,
            Self::SecureInput { .. } => RowKind::SecureInput,
            Self::Input { .. } => RowKind::Input,
            Self::Switch { .. } => RowKind::Switch,
            Self::Stepper { .. } => RowKind::Stepper,
        }
    }

    /// Current value, `Null` for rows without one.
    pub fn value(&self) -> &Value {
        match self {
            Self::Select { value, .. }
            | Self::Label { value, .. }
            | Self::SecureInput { value, .. }
            | Self::Input { value, .. }
            | Self::Switch { value, .. }
            | Self::Stepper { value, .. } => value,
            Self::Navigation { .. } | Self::Button { .. } => &Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    pub rows: Vec<SettingsNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuTree {
    pub id: String,
    pub label: String,
    pub rows: Vec<SettingsNode>,
}

/// Resolve every lazy list in `menu` and classify each row.
pub async fn resolve_menu(menu: &MenuDecl) -> MenuResult<MenuTree> {
    Ok(MenuTree {
        id: menu.id.clone(),
        label: menu.label.clone(),
        rows: resolve_rows(&menu.rows).await?,
    })
}

fn resolve_rows(rows: &Rows) -> BoxFuture<'_, MenuResult<Vec<SettingsNode>>> {
    async move {
        let mut nodes = Vec::new();
        for row in rows.load().await? {
            nodes.push(resolve_row(&row).await?);
        }
        Ok(nodes)
    }
    .boxed()
}

async fn current_value(row: &RowDecl) -> MenuResult<Value> {
    match &row.value {
        Some(binding) => binding.get().await,
        None => Ok(Value::Null),
    }
}

async fn resolve_row(row: &RowDecl) -> MenuResult<SettingsNode> {
    let id = row.id.clone();
    let label = row.label.clone();

    Ok(match classify(row) {
        RowKind::Navigation => {
            let mut sections = Vec::new();
            if let Some(form) = &row.form {
                for section in form.sections.load().await? {
                    sections.push(SectionNode {
                        id: section.id.clone(),
                        header: section.header.clone(),
                        footer: section.footer.clone(),
                        rows: resolve_rows(&section.rows).await?,
                    });
                }
            }
            SettingsNode::Navigation { id, label, sections }
        }
        RowKind::Button => SettingsNode::Button { id, label },
        RowKind::Select => SettingsNode::Select {
            id,
            label,
            options: row.options.clone().unwrap_or_default(),
            value: current_value(row).await?,
        },
        RowKind::Label => SettingsNode::Label {
            id,
            label,
            value: current_value(row).await?,
        },
        RowKind::SecureInput => SettingsNode::SecureInput {
            id,
            label,
            value: current_value(row).await?,
        },
        RowKind::Input => SettingsNode::Input {
            id,
            label,
            value: current_value(row).await?,
        },
        RowKind::Switch => SettingsNode::Switch {
            id,
            label,
            value: current_value(row).await?,
        },
        RowKind::Stepper => SettingsNode::Stepper {
            id,
            label,
            value: current_value(row).await?,
            min: row.min,
            max: row.max,
            step: row.step,
        },
    })
}

/// Walk `path` to its terminal row.
///
/// Between rows the walk descends into the form of the matched row: into the
/// section named by the next segment when there is one, else into the form's
/// first section without consuming a segment.
async fn find_row(menu: &MenuDecl, path: &str) -> MenuResult<Option<RowDecl>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut rows = menu.rows.load().await?;
    let mut index = 0;

    while let Some(segment) = segments.get(index) {
        let Some(row) = rows.into_iter().find(|row| row.id == *segment) else {
            return Ok(None);
        };
        index += 1;
        if index == segments.len() {
            return Ok(Some(row));
        }

        let Some(form) = &row.form else {
            return Ok(None);
        };
        let sections = form.sections.load().await?;
        let next = segments[index];
        let section = match sections.iter().position(|s| s.id == next) {
            Some(position) => {
                index += 1;
                sections.into_iter().nth(position)
            }
            None => sections.into_iter().next(),
        };
        let Some(section) = section else {
            return Ok(None);
        };
        if index == segments.len() {
            // Path ends on a section, not a row
            return Ok(None);
        }
        rows = section.rows.load().await?;
    }

    Ok(None)
}

/// Set the value of the row at `path`. Returns `false` when the path does not
/// lead to a row with a value binding or the update is rejected.
pub async fn set_value_in_menu(menu: &MenuDecl, path: &str, value: Value) -> bool {
    let row = match find_row(menu, path).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            debug!(menu = %menu.id, path, "No settings row at path");
            return false;
        }
        Err(e) => {
            warn!(menu = %menu.id, path, error = %e, "Failed to walk settings menu");
            return false;
        }
    };
    let Some(binding) = &row.value else {
        debug!(menu = %menu.id, path, "Settings row has no value binding");
        return false;
    };

    if let Err(e) = binding.set(value.clone()).await {
        warn!(menu = %menu.id, path, error = %e, "Settings value rejected");
        return false;
    }
    if let Some(on_change) = &row.on_change {
        if let Err(e) = on_change(value).await {
            warn!(menu = %menu.id, path, error = %e, "Settings change handler failed");
            return false;
        }
    }
    true
}

/// Run the tap handler of the row at `path`.
pub async fn invoke_action(menu: &MenuDecl, path: &str) -> bool {
    let row = match find_row(menu, path).await {
        Ok(Some(row)) => row,
        Ok(None) => return false,
        Err(e) => {
            warn!(menu = %menu.id, path, error = %e, "Failed to walk settings menu");
            return false;
        }
    };
    let Some(on_tap) = &row.on_tap else {
        return false;
    };
    match on_tap().await {
        Ok(()) => true,
        Err(e) => {
            warn!(menu = %menu.id, path, error = %e, "Settings action failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn opt(id: &str) -> SelectOption {
        SelectOption {
            id: id.to_string(),
            label: id.to_uppercase(),
        }
    }

    #[test]
    fn test_classifier_precedence() {
        let binding = || -> Arc<dyn ValueBinding> { MemoryBinding::new(Value::Null) };
        let form = || Sections::Static(Vec::new());

        let everything = RowDecl::new("a", "A")
            .with_form(form())
            .with_on_tap(|| async { Ok(()) })
            .with_options(vec![opt("x")])
            .label_only();
        assert_eq!(classify(&everything), RowKind::Navigation);

        let tap_and_options = RowDecl::new("a", "A")
            .with_on_tap(|| async { Ok(()) })
            .with_options(vec![opt("x")]);
        assert_eq!(classify(&tap_and_options), RowKind::Button);

        let options_and_label = RowDecl::new("a", "A")
            .with_options(vec![opt("x")])
            .with_value(binding())
            .label_only();
        assert_eq!(classify(&options_and_label), RowKind::Select);

        let label_with_value = RowDecl::new("a", "A").with_value(binding()).label_only();
        assert_eq!(classify(&label_with_value), RowKind::Label);

        assert_eq!(
            classify(&RowDecl::new("user", "Username").with_value(binding())),
            RowKind::Input
        );
        assert_eq!(
            classify(&RowDecl::new("pw", "Account Password").with_value(binding())),
            RowKind::SecureInput
        );
        assert_eq!(
            classify(&RowDecl::new("token", "Token").with_value(binding()).secure()),
            RowKind::SecureInput
        );

        let toggle = RowDecl::new("nsfw", "Show NSFW")
            .with_value(binding())
            .with_on_change(|_| async { Ok(()) });
        assert_eq!(classify(&toggle), RowKind::Switch);

        let stepper = RowDecl::new("pages", "Pages")
            .with_value(binding())
            .with_bounds(1.0, 10.0, 1.0);
        assert_eq!(classify(&stepper), RowKind::Stepper);

        assert_eq!(classify(&RowDecl::new("about", "About")), RowKind::Label);
    }

    fn language_menu(binding: Arc<MemoryBinding>) -> MenuDecl {
        MenuDecl {
            id: "main".to_string(),
            label: "Source Settings".to_string(),
            rows: Rows::Static(vec![RowDecl::new("language", "Language")
                .with_value(binding)
                .with_options(vec![opt("en"), opt("fr")])]),
        }
    }

    #[tokio::test]
    async fn test_select_value_round_trips_through_resolve() {
        let binding = MemoryBinding::new(json!("en"));
        let menu = language_menu(binding);

        let before = resolve_menu(&menu).await.unwrap();
        assert_eq!(before.rows[0].kind(), RowKind::Select);
        assert_eq!(before.rows[0].value(), &json!("en"));

        assert!(set_value_in_menu(&menu, "language", json!("fr")).await);

        let after = resolve_menu(&menu).await.unwrap();
        assert_eq!(after.rows[0].value(), &json!("fr"));
    }

    fn nested_menu(host: Arc<MemoryBinding>, mirror: Arc<MemoryBinding>) -> MenuDecl {
        let account_rows = Rows::Static(vec![RowDecl::new("host", "Host").with_value(host)]);
        let mirror_rows = Rows::deferred(move || {
            let mirror = Arc::clone(&mirror);
            async move {
                Ok(vec![RowDecl::new("mirror", "Mirror")
                    .with_value(mirror as Arc<dyn ValueBinding>)])
            }
        });

        MenuDecl {
            id: "main".to_string(),
            label: "Settings".to_string(),
            rows: Rows::Static(vec![RowDecl::new("advanced", "Advanced").with_form(
                Sections::Static(vec![
                    SectionDecl::new("account", account_rows),
                    SectionDecl::new("network", mirror_rows),
                ]),
            )]),
        }
    }

    #[tokio::test]
    async fn test_path_descends_into_named_and_first_section() {
        let host = MemoryBinding::new(json!(""));
        let mirror = MemoryBinding::new(json!("a"));
        let menu = nested_menu(Arc::clone(&host), Arc::clone(&mirror));

        assert!(set_value_in_menu(&menu, "advanced/network/mirror", json!("b")).await);
        assert_eq!(mirror.get().await.unwrap(), json!("b"));

        // No section id in the path: falls back to the first section
        assert!(set_value_in_menu(&menu, "advanced/host", json!("example.org")).await);
        assert_eq!(host.get().await.unwrap(), json!("example.org"));

        assert!(!set_value_in_menu(&menu, "advanced/mirror", json!("c")).await);
        assert!(!set_value_in_menu(&menu, "advanced/network", json!("c")).await);
        assert!(!set_value_in_menu(&menu, "missing", json!("c")).await);
    }

    #[tokio::test]
    async fn test_resolve_nested_deferred_rows() {
        let menu = nested_menu(MemoryBinding::new(json!("h")), MemoryBinding::new(json!("m")));
        let tree = resolve_menu(&menu).await.unwrap();

        let SettingsNode::Navigation { sections, .. } = &tree.rows[0] else {
            panic!("expected navigation row");
        };
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].rows[0].id(), "mirror");
        assert_eq!(sections[1].rows[0].value(), &json!("m"));

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["rows"][0]["type"], "navigation");
        assert_eq!(json["rows"][0]["sections"][0]["rows"][0]["type"], "input");
    }

    #[tokio::test]
    async fn test_change_handler_runs_after_set() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let menu = MenuDecl {
            id: "main".to_string(),
            label: "Settings".to_string(),
            rows: Rows::Static(vec![RowDecl::new("nsfw", "NSFW")
                .with_value(MemoryBinding::new(json!(false)))
                .with_on_change(move |value| {
                    let counter = Arc::clone(&counter);
                    async move {
                        assert_eq!(value, json!(true));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })]),
        };

        assert!(set_value_in_menu(&menu, "nsfw", json!(true)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_action() {
        let taps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&taps);
        let menu = MenuDecl {
            id: "main".to_string(),
            label: "Settings".to_string(),
            rows: Rows::Static(vec![
                RowDecl::new("reset", "Reset").with_on_tap(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                RowDecl::new("broken", "Broken").with_on_tap(|| async {
                    Err(MenuError::Action {
                        id: "broken".to_string(),
                        reason: "offline".to_string(),
                    })
                }),
                RowDecl::new("about", "About"),
            ]),
        };

        assert!(invoke_action(&menu, "reset").await);
        assert!(!invoke_action(&menu, "broken").await);
        assert!(!invoke_action(&menu, "about").await);
        assert_eq!(taps.load(Ordering::SeqCst), 1);
    }
}
