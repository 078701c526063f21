//! The host-CMS surface consumed by the view layer.
//!
//! Everything the crate needs from its host goes through the [`Host`] trait:
//! filesystem roots, configuration lookup, the extension registry, the
//! callable table used by legacy helper declarations, the error-page
//! facility, and the host's own legacy template renderer. The crate never
//! reaches around the trait — routing, content storage, and response
//! transport stay entirely on the host side.
//!
//! [`StaticHost`] is an owned, builder-style implementation for embedders
//! that configure everything up front, and for tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::helpers::HelperFn;

/// Failure reported by a host-side facility (legacy renderer, error page).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// The filesystem roots a host declares.
///
/// `templates` and `cache` are required; `snippets` and `plugins` back the
/// conventionally-optional template namespaces and may point at directories
/// that do not exist (they are then skipped during path assembly). `assets`
/// is only registered as a namespace when the host declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoots {
    pub templates: PathBuf,
    pub snippets: PathBuf,
    pub plugins: PathBuf,
    pub assets: Option<PathBuf>,
    pub cache: PathBuf,
}

/// A template-components path contributed by a host extension.
///
/// Contributions are either literal paths or computed lazily the first time
/// the search roots are assembled.
#[derive(Clone)]
pub enum TemplateContribution {
    Path(PathBuf),
    Provider(Arc<dyn Fn() -> PathBuf + Send + Sync>),
}

impl TemplateContribution {
    pub fn resolve(&self) -> PathBuf {
        match self {
            TemplateContribution::Path(path) => path.clone(),
            TemplateContribution::Provider(provider) => provider(),
        }
    }
}

impl fmt::Debug for TemplateContribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateContribution::Path(path) => f.debug_tuple("Path").field(path).finish(),
            TemplateContribution::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// An installed host extension, as seen by the view layer.
///
/// Only the template-components contribution matters here; everything else
/// an extension does is the host's business.
#[derive(Debug, Clone)]
pub struct HostExtension {
    pub id: String,
    pub template_components: Option<TemplateContribution>,
}

impl HostExtension {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template_components: None,
        }
    }

    /// Declares a literal template-components directory.
    pub fn with_template_components(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_components = Some(TemplateContribution::Path(path.into()));
        self
    }

    /// Declares a lazily computed template-components directory.
    pub fn with_lazy_template_components(
        mut self,
        provider: impl Fn() -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        self.template_components = Some(TemplateContribution::Provider(Arc::new(provider)));
        self
    }
}

/// The contract a host CMS implements to plug the view layer in.
///
/// Implementations must be cheap to call: `option` is consulted on every
/// environment build and `render_error_page` only on the page-mode error
/// path. All methods except `roots`, `option`, `option_keys` and
/// `render_legacy` have conservative defaults so minimal hosts stay small.
pub trait Host: Send + Sync {
    /// The host's filesystem roots.
    fn roots(&self) -> &HostRoots;

    /// Looks up a configuration value by key.
    fn option(&self, key: &str) -> Option<&JsonValue>;

    /// All configuration keys, in a deterministic order.
    ///
    /// Used by the legacy dotted-key helper discovery; the order decides
    /// which of several colliding legacy declarations wins.
    fn option_keys(&self) -> Vec<String>;

    /// Installed extensions, in registration order.
    fn extensions(&self) -> &[HostExtension] {
        &[]
    }

    /// Resolves a name from the host's callable registration table.
    ///
    /// This is the target of legacy dotted-key helper declarations: the
    /// declaration's value names an entry here. The table is built by the
    /// host at startup; there is no runtime symbol resolution.
    fn callable(&self, _name: &str) -> Option<HelperFn> {
        None
    }

    /// Renders the host's configured error page, if there is one.
    ///
    /// Returning `None` — whether because no error page is configured or
    /// because rendering it failed — makes the presenter re-raise the
    /// original engine failure.
    fn render_error_page(&self) -> Option<String> {
        None
    }

    /// Renders a legacy-format template through the host's own renderer.
    fn render_legacy(&self, path: &Path, data: &JsonValue) -> Result<String, HostError>;

    /// Fallback template resolution for names the template root does not
    /// cover, typically backed by the host's extension registry.
    fn contributed_template(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    /// The file extension of the host's legacy template format.
    fn legacy_extension(&self) -> &str {
        "tpl"
    }
}

type LegacyRenderFn = Arc<dyn Fn(&Path, &JsonValue) -> Result<String, HostError> + Send + Sync>;

/// An owned [`Host`] built up front from plain values.
///
/// Options live in a sorted map, so `option_keys` order is stable. Hosts
/// with richer needs (live configuration, lazy error pages) implement
/// [`Host`] directly.
///
/// # Example
///
/// ```rust,ignore
/// let host = StaticHost::new(roots)
///     .with_option("debug", true)
///     .with_option("vellum.paths", json!(["/srv/site/shared"]))
///     .with_error_page("<h1>Something went wrong</h1>".to_string());
/// let vellum = Vellum::new(Arc::new(host));
/// ```
pub struct StaticHost {
    roots: HostRoots,
    options: BTreeMap<String, JsonValue>,
    extensions: Vec<HostExtension>,
    callables: HashMap<String, HelperFn>,
    error_page: Option<String>,
    legacy_renderer: Option<LegacyRenderFn>,
    contributed: HashMap<String, PathBuf>,
    legacy_extension: String,
}

impl StaticHost {
    pub fn new(roots: HostRoots) -> Self {
        Self {
            roots,
            options: BTreeMap::new(),
            extensions: Vec::new(),
            callables: HashMap::new(),
            error_page: None,
            legacy_renderer: None,
            contributed: HashMap::new(),
            legacy_extension: "tpl".to_string(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_extension(mut self, extension: HostExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Registers an entry in the callable table consulted by legacy helper
    /// declarations.
    pub fn with_callable(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[minijinja::Value]) -> Result<minijinja::Value, minijinja::Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.callables.insert(name.into(), Arc::new(func));
        self
    }

    /// Sets the pre-rendered body served for page-mode render failures.
    pub fn with_error_page(mut self, body: impl Into<String>) -> Self {
        self.error_page = Some(body.into());
        self
    }

    pub fn with_legacy_renderer(
        mut self,
        renderer: impl Fn(&Path, &JsonValue) -> Result<String, HostError> + Send + Sync + 'static,
    ) -> Self {
        self.legacy_renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_contributed_template(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.contributed.insert(name.into(), path.into());
        self
    }

    pub fn with_legacy_extension(mut self, extension: impl Into<String>) -> Self {
        self.legacy_extension = extension.into();
        self
    }
}

impl Host for StaticHost {
    fn roots(&self) -> &HostRoots {
        &self.roots
    }

    fn option(&self, key: &str) -> Option<&JsonValue> {
        self.options.get(key)
    }

    fn option_keys(&self) -> Vec<String> {
        self.options.keys().cloned().collect()
    }

    fn extensions(&self) -> &[HostExtension] {
        &self.extensions
    }

    fn callable(&self, name: &str) -> Option<HelperFn> {
        self.callables.get(name).cloned()
    }

    fn render_error_page(&self) -> Option<String> {
        self.error_page.clone()
    }

    fn render_legacy(&self, path: &Path, data: &JsonValue) -> Result<String, HostError> {
        match &self.legacy_renderer {
            Some(renderer) => renderer(path, data),
            None => Err(HostError(format!(
                "no legacy renderer configured for {}",
                path.display()
            ))),
        }
    }

    fn contributed_template(&self, name: &str) -> Option<PathBuf> {
        self.contributed.get(name).cloned()
    }

    fn legacy_extension(&self) -> &str {
        &self.legacy_extension
    }
}
