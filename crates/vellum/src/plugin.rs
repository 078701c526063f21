//! The plugin facade a host wires in once and keeps for the life of the
//! process.
//!
//! [`Vellum`] owns the host handle, the code-level [`EngineOptions`], and
//! the *current* environment: a mutex-guarded `Arc` slot that is filled
//! lazily on first render and replaced whenever a template component with
//! a different view path is constructed. Replacement hands out a fresh
//! environment; renders holding the old `Arc` finish against it
//! undisturbed.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::EngineOptions;
use crate::environment::{Environment, Rendered};
use crate::error::{BuildError, RenderError};
use crate::host::Host;
use crate::template::{
    self, Flavor, LegacyTemplate, NativeTemplate, TemplateRenderer, NATIVE_EXTENSION,
};

/// The view layer's entry point.
///
/// # Example
///
/// ```rust,ignore
/// let vellum = Vellum::with_options(Arc::new(host), options);
///
/// // Page render through a template component:
/// let page = vellum.template("blog/article", "html", "html")?;
/// let response = page.render(&data)?;
///
/// // Fragment render from other output:
/// let teaser = vellum.render("partials/teaser", &data)?;
/// ```
pub struct Vellum {
    host: Arc<dyn Host>,
    options: EngineOptions,
    current: Mutex<Option<Arc<Environment>>>,
}

impl Vellum {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_options(host, EngineOptions::default())
    }

    pub fn with_options(host: Arc<dyn Host>, options: EngineOptions) -> Self {
        Self {
            host,
            options,
            current: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Environment>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current environment, built lazily against the host template
    /// root on first use.
    pub fn environment(&self) -> Result<Arc<Environment>, BuildError> {
        let mut slot = self.slot();
        if let Some(env) = slot.as_ref() {
            return Ok(env.clone());
        }
        let view = self.host.roots().templates.clone();
        let env = Arc::new(Environment::build(self.host.clone(), &self.options, &view)?);
        *slot = Some(env.clone());
        Ok(env)
    }

    /// The environment for a specific view path: the current one when the
    /// view path matches, a freshly built replacement otherwise.
    pub fn environment_for(&self, view_path: &Path) -> Result<Arc<Environment>, BuildError> {
        let mut slot = self.slot();
        if let Some(env) = slot.as_ref() {
            if env.view_path() == view_path {
                return Ok(env.clone());
            }
            debug!(view = %view_path.display(), "replacing template environment");
        }
        let env = Arc::new(Environment::build(
            self.host.clone(),
            &self.options,
            view_path,
        )?);
        *slot = Some(env.clone());
        Ok(env)
    }

    /// Creates the template component for a logical name and content type.
    ///
    /// Selection is driven by the resolved backing file; see the
    /// [`template`](crate::template) module. Constructing a native
    /// component (re)targets the current environment at the file's
    /// directory, so plugin-provided templates resolve their own includes
    /// first.
    pub fn template(
        &self,
        name: &str,
        content_type: &str,
        default_type: &str,
    ) -> Result<Box<dyn TemplateRenderer>, BuildError> {
        let base = template::candidate_base(name, content_type, default_type);
        let location = template::resolve_location(&*self.host, &base);

        if let Some(location) = &location {
            if location.flavor == Flavor::Legacy {
                return Ok(Box::new(LegacyTemplate::new(
                    name,
                    location.path.clone(),
                    self.host.clone(),
                )));
            }
        }

        let view_path = location
            .as_ref()
            .and_then(|l| l.path.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.host.roots().templates.clone());
        let env = self.environment_for(&view_path)?;

        let loader_name = location
            .as_ref()
            .and_then(|l| l.path.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{base}.{NATIVE_EXTENSION}"));
        let file = location.map(|l| l.path);

        Ok(Box::new(NativeTemplate::new(name, loader_name, file, env)))
    }

    /// Renders a named template as a fragment, for embedding inside other
    /// output. Names without an extension get the native one appended.
    pub fn render(&self, template: &str, data: &JsonValue) -> Result<Rendered, RenderError> {
        let name = if Path::new(template).extension().is_some() {
            template.to_string()
        } else {
            format!("{template}.{NATIVE_EXTENSION}")
        };
        self.environment()?.render_path(&name, data, false)
    }

    /// Renders an inline template string as a fragment.
    pub fn render_string(&self, source: &str, data: &JsonValue) -> Result<Rendered, RenderError> {
        self.environment()?.render_string(source, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostRoots, StaticHost};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> (TempDir, HostRoots) {
        let dir = TempDir::new().unwrap();
        let templates = dir.path().join("templates");
        fs::create_dir_all(&templates).unwrap();
        let roots = HostRoots {
            templates,
            snippets: dir.path().join("snippets"),
            plugins: dir.path().join("plugins"),
            assets: None,
            cache: dir.path().join("cache"),
        };
        (dir, roots)
    }

    #[test]
    fn test_environment_is_built_lazily_and_reused() {
        let (_dir, roots) = site();
        let vellum = Vellum::new(Arc::new(StaticHost::new(roots)));

        let first = vellum.environment().unwrap();
        let second = vellum.environment().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_environment_for_swaps_on_view_path_change() {
        let (dir, roots) = site();
        let plugin_views = dir.path().join("plugin-views");
        fs::create_dir_all(&plugin_views).unwrap();

        let vellum = Vellum::new(Arc::new(StaticHost::new(roots.clone())));
        let base = vellum.environment().unwrap();

        let same = vellum.environment_for(&roots.templates).unwrap();
        assert!(Arc::ptr_eq(&base, &same));

        let swapped = vellum.environment_for(&plugin_views).unwrap();
        assert!(!Arc::ptr_eq(&base, &swapped));
        assert_eq!(swapped.view_path(), plugin_views.as_path());

        // The old environment is still usable by whoever held on to it.
        let rendered = base.render_string("{{ 1 + 1 }}", &json!({})).unwrap();
        assert_eq!(rendered.body, "2");
    }

    #[test]
    fn test_factory_selects_native_component() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("home.jinja"), "home {{ n }}").unwrap();

        let vellum = Vellum::new(Arc::new(StaticHost::new(roots)));
        let component = vellum.template("home", "html", "html").unwrap();

        assert!(component.is_native());
        assert_eq!(component.name(), "home");
        assert!(component.file().is_some());
        let rendered = component.render(&json!({ "n": 3 })).unwrap();
        assert_eq!(rendered.body, "home 3");
    }

    #[test]
    fn test_factory_selects_legacy_component() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("about.tpl"), "ignored").unwrap();

        let host = StaticHost::new(roots).with_legacy_renderer(|path, _data| {
            Ok(format!("legacy:{}", path.file_name().unwrap().to_string_lossy()))
        });
        let vellum = Vellum::new(Arc::new(host));
        let component = vellum.template("about", "html", "html").unwrap();

        assert!(!component.is_native());
        let rendered = component.render(&json!({})).unwrap();
        assert_eq!(rendered.body, "legacy:about.tpl");
    }

    #[test]
    fn test_factory_uses_contributed_template() {
        let (dir, roots) = site();
        let plugin_view = dir.path().join("plugin").join("special.jinja");
        fs::create_dir_all(plugin_view.parent().unwrap()).unwrap();
        fs::write(&plugin_view, "special!").unwrap();

        let host = StaticHost::new(roots).with_contributed_template("special", &plugin_view);
        let vellum = Vellum::new(Arc::new(host));
        let component = vellum.template("special", "html", "html").unwrap();

        assert!(component.is_native());
        let rendered = component.render(&json!({})).unwrap();
        assert_eq!(rendered.body, "special!");
    }

    #[test]
    fn test_typed_template_resolution() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("article.json.jinja"), "{ \"ok\": true }").unwrap();

        let vellum = Vellum::new(Arc::new(StaticHost::new(roots)));
        let component = vellum.template("article", "json", "html").unwrap();
        let rendered = component.render(&json!({})).unwrap();
        assert_eq!(rendered.body, "{ \"ok\": true }");
    }

    #[test]
    fn test_fragment_render_appends_extension() {
        let (_dir, roots) = site();
        let partials = roots.templates.join("partials");
        fs::create_dir_all(&partials).unwrap();
        fs::write(partials.join("teaser.jinja"), "teaser").unwrap();

        let vellum = Vellum::new(Arc::new(StaticHost::new(roots)));
        let rendered = vellum.render("partials/teaser", &json!({})).unwrap();
        assert_eq!(rendered.body, "teaser");
    }

    #[test]
    fn test_render_string_fragment() {
        let (_dir, roots) = site();
        let vellum = Vellum::new(Arc::new(StaticHost::new(roots)));
        let rendered = vellum
            .render_string("Hi {{ who }}", &json!({ "who": "there" }))
            .unwrap();
        assert_eq!(rendered.body, "Hi there");
    }
}
