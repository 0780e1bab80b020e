//! Prompt templates.
//!
//! Templates are loaded from a [`TemplateSource`] by name and kept in a
//! [`TemplateCache`] that the caller creates and passes to the
//! [`PromptRenderer`]. There is no process-wide cache: two renderers only
//! share templates if they were given the same cache.

mod builtin;

pub use builtin::BuiltinTemplates;

use crate::errors::EvergreenError;
use dashmap::DashMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid regex"));

/// Variables substituted into a template.
pub type PromptVars = BTreeMap<String, String>;

/// Where template text comes from.
pub trait TemplateSource: Send + Sync {
    /// Loads the raw template text for a name.
    ///
    /// # Errors
    ///
    /// Returns a `Template` error if the template does not exist.
    fn load(&self, name: &str) -> Result<String, EvergreenError>;
}

/// Templates read from `<dir>/<name>.txt`.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    dir: PathBuf,
}

impl DirectoryTemplates {
    /// Creates a source rooted at a directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TemplateSource for DirectoryTemplates {
    fn load(&self, name: &str) -> Result<String, EvergreenError> {
        let path = self.dir.join(format!("{name}.txt"));
        std::fs::read_to_string(&path).map_err(|e| {
            EvergreenError::Template(format!("cannot read template {}: {e}", path.display()))
        })
    }
}

/// Loaded templates keyed by name.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<String, Arc<str>>,
}

impl TemplateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a cached template.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<str>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Stores a template.
    pub fn insert(&self, name: impl Into<String>, text: Arc<str>) {
        self.entries.insert(name.into(), text);
    }

    /// Drops one template so the next render reloads it.
    pub fn invalidate(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Drops every template.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Renders named templates with `{{variable}}` substitution.
#[derive(Clone)]
pub struct PromptRenderer {
    source: Arc<dyn TemplateSource>,
    cache: Arc<TemplateCache>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl PromptRenderer {
    /// Creates a renderer over a source and an explicit cache.
    #[must_use]
    pub fn new(source: Arc<dyn TemplateSource>, cache: Arc<TemplateCache>) -> Self {
        Self { source, cache }
    }

    /// A renderer over the built-in templates with a fresh cache.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinTemplates), Arc::new(TemplateCache::new()))
    }

    /// The cache this renderer reads through.
    #[must_use]
    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    fn template(&self, name: &str) -> Result<Arc<str>, EvergreenError> {
        if let Some(text) = self.cache.get(name) {
            return Ok(text);
        }
        debug!(template = name, "Loading prompt template");
        let text: Arc<str> = Arc::from(self.source.load(name)?);
        self.cache.insert(name, Arc::clone(&text));
        Ok(text)
    }

    /// Renders a template.
    ///
    /// # Errors
    ///
    /// Returns a `Template` error if the template cannot be loaded or a
    /// placeholder has no value.
    pub fn render(&self, name: &str, vars: &PromptVars) -> Result<String, EvergreenError> {
        let template = self.template(name)?;

        let missing: Vec<&str> = PLACEHOLDER
            .captures_iter(&template)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|key| !vars.contains_key(*key))
            .collect();
        if let Some(first) = missing.first() {
            return Err(EvergreenError::Template(format!(
                "template '{name}' needs variable '{first}'"
            )));
        }

        Ok(PLACEHOLDER
            .replace_all(&template, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}

/// Builds a [`PromptVars`] map.
#[derive(Debug, Clone, Default)]
pub struct VarsBuilder {
    vars: PromptVars,
}

impl VarsBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    /// Finishes the map.
    #[must_use]
    pub fn build(self) -> PromptVars {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
    }

    impl TemplateSource for CountingSource {
        fn load(&self, name: &str) -> Result<String, EvergreenError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match name {
                "greet" => Ok("Hello {{ name }}, welcome to {{show}}.".to_string()),
                _ => Err(EvergreenError::Template(format!("unknown template '{name}'"))),
            }
        }
    }

    fn renderer() -> (PromptRenderer, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let renderer = PromptRenderer::new(source.clone(), Arc::new(TemplateCache::new()));
        (renderer, source)
    }

    #[test]
    fn test_render_substitutes() {
        let (renderer, _) = renderer();
        let vars = VarsBuilder::new().set("name", "Ada").set("show", "Roots").build();

        assert_eq!(
            renderer.render("greet", &vars).unwrap(),
            "Hello Ada, welcome to Roots."
        );
    }

    #[test]
    fn test_missing_variable_is_error() {
        let (renderer, _) = renderer();
        let vars = VarsBuilder::new().set("name", "Ada").build();

        let err = renderer.render("greet", &vars).unwrap_err();
        assert!(err.to_string().contains("show"));
    }

    #[test]
    fn test_cache_hits_and_invalidation() {
        let (renderer, source) = renderer();
        let vars = VarsBuilder::new().set("name", "A").set("show", "B").build();

        renderer.render("greet", &vars).unwrap();
        renderer.render("greet", &vars).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        assert!(renderer.cache().invalidate("greet"));
        renderer.render("greet", &vars).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        renderer.cache().clear();
        assert!(renderer.cache().is_empty());
    }

    #[test]
    fn test_shared_cache_between_renderers() {
        let cache = Arc::new(TemplateCache::new());
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let a = PromptRenderer::new(source.clone(), Arc::clone(&cache));
        let b = PromptRenderer::new(source.clone(), Arc::clone(&cache));
        let vars = VarsBuilder::new().set("name", "A").set("show", "B").build();

        a.render("greet", &vars).unwrap();
        b.render("greet", &vars).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_template() {
        let (renderer, _) = renderer();
        assert!(matches!(
            renderer.render("nope", &PromptVars::new()),
            Err(EvergreenError::Template(_))
        ));
    }

    #[test]
    fn test_directory_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("email_campaign.txt"), "Write about {{topic}}").unwrap();
        let renderer = PromptRenderer::new(
            Arc::new(DirectoryTemplates::new(dir.path())),
            Arc::new(TemplateCache::new()),
        );

        let vars = VarsBuilder::new().set("topic", "soil").build();
        assert_eq!(renderer.render("email_campaign", &vars).unwrap(), "Write about soil");
    }
}
