//! The engine environment: built once, immutable afterwards.
//!
//! [`Environment::build`] assembles everything a render needs — merged
//! configuration, the helper tables, the search roots, the loader — into a
//! single object that is shared read-only behind an `Arc` for the rest of
//! its life. Replacing the current environment (see
//! [`Vellum`](crate::Vellum)) never touches an existing instance, so
//! renders that already hold one are unaffected.
//!
//! Registration order matters and is fixed: the debug introspection
//! function first, then extension hooks in configured order, then all
//! functions, all filters, all tests. Anything an extension registers can
//! therefore be overridden by user configuration.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::{AutoEscape, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{self, AutoescapePolicy, EngineConfig, EngineOptions};
use crate::error::{BuildError, RenderError};
use crate::helpers::{self, HelperKind, HelperTable};
use crate::host::Host;
use crate::paths::{loader_relative, TemplatePaths};
use crate::present;
use crate::template::NATIVE_EXTENSION;

/// A finished render: the body plus the HTTP status the host should attach.
///
/// Plain renders carry 200; only the debug diagnostic page downgrades the
/// response to 500.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendered {
    pub body: String,
    pub status: u16,
}

impl Rendered {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status: 200,
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }
}

/// One configured engine instance plus the state renders need around it.
pub struct Environment {
    engine: minijinja::Environment<'static>,
    pub(crate) paths: Arc<TemplatePaths>,
    pub(crate) config: EngineConfig,
    pub(crate) host: Arc<dyn Host>,
    template_root: PathBuf,
    view_path: PathBuf,
}

impl Environment {
    /// Builds an environment for the given view path.
    ///
    /// Fails only on configuration errors (a required search root that
    /// does not exist); helper problems are swallowed at registration.
    pub fn build(
        host: Arc<dyn Host>,
        options: &EngineOptions,
        view_path: &Path,
    ) -> Result<Self, BuildError> {
        let config = EngineConfig::resolve(&*host, options);
        debug!(
            debug = config.debug,
            strict = config.strict_variables,
            view = %view_path.display(),
            "building template environment"
        );

        let mut functions = HelperTable::new();
        for (name, func) in helpers::default_functions() {
            functions.insert(name, func);
        }
        for (name, func) in &options.functions {
            functions.insert(name, func.clone());
        }

        let mut filters = HelperTable::new();
        for (name, func) in &options.filters {
            filters.insert(name, func.clone());
        }

        let mut tests = HelperTable::new();
        for (name, func) in helpers::default_tests() {
            tests.insert(name, func);
        }
        for (name, func) in &options.tests {
            tests.insert(name, func.clone());
        }

        for declaration in config::legacy_declarations(&*host) {
            let Some(func) = host.callable(&declaration.callable) else {
                warn!(
                    callable = %declaration.callable,
                    "legacy helper declaration names an unknown host callable"
                );
                continue;
            };
            let table = match declaration.kind {
                HelperKind::Function => &mut functions,
                HelperKind::Filter => &mut filters,
                HelperKind::Test => &mut tests,
            };
            table.insert_if_absent(&declaration.raw_name, func);
        }

        let paths = Arc::new(TemplatePaths::assemble(&*host, view_path)?);

        let mut engine = minijinja::Environment::new();
        engine.set_debug(config.debug);
        engine.set_undefined_behavior(if config.strict_variables {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });
        match &config.autoescape {
            AutoescapePolicy::Html => {
                engine.set_auto_escape_callback(|_| AutoEscape::Html);
            }
            AutoescapePolicy::Off => {
                engine.set_auto_escape_callback(|_| AutoEscape::None);
            }
            AutoescapePolicy::Callback(decide) => {
                let decide = decide.clone();
                engine.set_auto_escape_callback(move |name| {
                    if decide(name) {
                        AutoEscape::Html
                    } else {
                        AutoEscape::None
                    }
                });
            }
        }

        {
            let paths = paths.clone();
            engine.set_loader(move |name| match paths.resolve(name) {
                Some(path) => fs::read_to_string(&path).map(Some).map_err(|err| {
                    minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!("failed to read template {}: {err}", path.display()),
                    )
                }),
                None => Ok(None),
            });
        }

        helpers::register_dump(&mut engine);
        for hook in &options.extensions {
            hook(&mut engine);
        }
        functions.install(&mut engine, HelperKind::Function);
        filters.install(&mut engine, HelperKind::Filter);
        tests.install(&mut engine, HelperKind::Test);

        if config.cache_dir.is_some() {
            precompile(&mut engine, &paths);
        }

        let template_root = host.roots().templates.clone();
        Ok(Self {
            engine,
            paths,
            config,
            host,
            template_root,
            view_path: view_path.to_path_buf(),
        })
    }

    /// The underlying engine, for read-only introspection.
    pub fn engine(&self) -> &minijinja::Environment<'static> {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn view_path(&self) -> &Path {
        &self.view_path
    }

    pub fn template_root(&self) -> &Path {
        &self.template_root
    }

    /// The assembled search roots.
    pub fn search_paths(&self) -> &TemplatePaths {
        &self.paths
    }

    /// Renders a template by file path or loader-relative name.
    ///
    /// The path is normalized against the template root so callers may pass
    /// either form. Engine failures are handed to the error presenter; only
    /// its propagate decision surfaces as an `Err`.
    pub fn render_path(
        &self,
        file_path: &str,
        data: &JsonValue,
        is_page: bool,
    ) -> Result<Rendered, RenderError> {
        let relative = loader_relative(&self.template_root, file_path);
        match self.dispatch(&relative, data) {
            Ok(body) => Ok(Rendered::ok(body)),
            Err(err) => present::present(self, err, is_page, None),
        }
    }

    /// Renders an inline template string. Failures are always treated as
    /// fragment renders: the host error page is never consulted.
    pub fn render_string(&self, source: &str, data: &JsonValue) -> Result<Rendered, RenderError> {
        match self.engine.render_str(source, Value::from_serialize(data)) {
            Ok(body) => Ok(Rendered::ok(body)),
            Err(err) => present::present(self, err, false, Some(source)),
        }
    }

    /// The raw dispatch boundary: success or the engine's failure, nothing
    /// decided yet.
    fn dispatch(&self, name: &str, data: &JsonValue) -> Result<String, minijinja::Error> {
        let template = self.engine.get_template(name)?;
        template.render(Value::from_serialize(data))
    }
}

/// Eagerly compiles every native template under the default roots, so the
/// environment keeps compiled templates for its whole lifetime instead of
/// loading lazily.
fn precompile(engine: &mut minijinja::Environment<'static>, paths: &TemplatePaths) {
    for root in paths.default_roots() {
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(OsStr::to_str) != Some(NATIVE_EXTENSION) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative.to_string_lossy().replace('\\', "/");
            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(template = %path.display(), error = %err, "failed to read template for precompilation");
                    continue;
                }
            };
            if let Err(err) = engine.add_template_owned(name, source) {
                warn!(template = %path.display(), error = %err, "failed to precompile template");
            }
        }
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

    fn build(host: StaticHost) -> Environment {
        let view = host.roots().templates.clone();
        Environment::build(Arc::new(host), &EngineOptions::default(), &view).unwrap()
    }

    #[test]
    fn test_render_path_round_trip() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("plain.jinja"), "X").unwrap();

        let env = build(StaticHost::new(roots));
        let rendered = env.render_path("plain.jinja", &json!({}), true).unwrap();
        assert_eq!(rendered.body, "X");
        assert_eq!(rendered.status, 200);
    }

    #[test]
    fn test_render_path_accepts_absolute_path() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("plain.jinja"), "X").unwrap();
        let absolute = roots.templates.join("plain.jinja");

        let env = build(StaticHost::new(roots));
        let rendered = env
            .render_path(&absolute.to_string_lossy(), &json!({}), true)
            .unwrap();
        assert_eq!(rendered.body, "X");
    }

    #[test]
    fn test_render_string_with_data() {
        let (_dir, roots) = site();
        let env = build(StaticHost::new(roots));
        let rendered = env
            .render_string("Hello, {{ name }}!", &json!({ "name": "World" }))
            .unwrap();
        assert_eq!(rendered.body, "Hello, World!");
    }

    #[test]
    fn test_includes_resolve_through_namespaces() {
        let (dir, roots) = site();
        let snippets = dir.path().join("snippets");
        fs::create_dir_all(&snippets).unwrap();
        fs::write(snippets.join("nav.jinja"), "NAV").unwrap();
        fs::write(
            roots.templates.join("page.jinja"),
            "{% include '@snippets/nav.jinja' %}!",
        )
        .unwrap();

        let env = build(StaticHost::new(roots));
        let rendered = env.render_path("page.jinja", &json!({}), true).unwrap();
        assert_eq!(rendered.body, "NAV!");
    }

    #[test]
    fn test_strict_variables_follow_debug() {
        let (_dir, roots) = site();

        // Lenient by default: undefined renders as empty.
        let env = build(StaticHost::new(roots.clone()));
        let rendered = env.render_string("[{{ missing }}]", &json!({})).unwrap();
        assert_eq!(rendered.body, "[]");

        // Strict when requested: undefined is an error, presented as a
        // fragment because debug is off.
        let env = build(StaticHost::new(roots).with_option("vellum.strict", true));
        let rendered = env.render_string("[{{ missing }}]", &json!({})).unwrap();
        assert_eq!(rendered.body, "");
    }

    #[test]
    fn test_autoescape_off_policy() {
        let (_dir, roots) = site();
        let env = build(StaticHost::new(roots).with_option("vellum.autoescape", "off"));
        let rendered = env
            .render_string("{{ markup }}", &json!({ "markup": "<b>raw</b>" }))
            .unwrap();
        assert_eq!(rendered.body, "<b>raw</b>");
    }

    #[test]
    fn test_structured_function_overrides_builtin() {
        let (_dir, roots) = site();
        let options = EngineOptions::default()
            .function("error", |_args| Ok(Value::from("no error here")));
        let view = roots.templates.clone();
        let env =
            Environment::build(Arc::new(StaticHost::new(roots)), &options, &view).unwrap();

        let rendered = env.render_string("{{ error('x') }}", &json!({})).unwrap();
        assert_eq!(rendered.body, "no error here");
    }

    #[test]
    fn test_extension_hook_runs_before_user_functions() {
        let (_dir, roots) = site();
        let options = EngineOptions::default()
            .extension(|env| {
                env.add_function("badge", || "from extension");
                env.add_function("keep", || "kept");
            })
            .function("badge", |_args| Ok(Value::from("from user")));
        let view = roots.templates.clone();
        let env =
            Environment::build(Arc::new(StaticHost::new(roots)), &options, &view).unwrap();

        let rendered = env
            .render_string("{{ badge() }}/{{ keep() }}", &json!({}))
            .unwrap();
        assert_eq!(rendered.body, "from user/kept");
    }

    #[test]
    fn test_legacy_declaration_does_not_override_structured() {
        let (_dir, roots) = site();
        let host = StaticHost::new(roots)
            .with_option("vellum.function.slug", "Str::slug")
            .with_callable("Str::slug", |_args| Ok(Value::from("from legacy")));
        let options =
            EngineOptions::default().function("slug", |_args| Ok(Value::from("from structured")));
        let view = host.roots().templates.clone();
        let env = Environment::build(Arc::new(host), &options, &view).unwrap();

        let rendered = env.render_string("{{ slug() }}", &json!({})).unwrap();
        assert_eq!(rendered.body, "from structured");
    }

    #[test]
    fn test_legacy_declaration_fills_gaps() {
        let (_dir, roots) = site();
        let host = StaticHost::new(roots)
            .with_option("vellum.filter.shout", "Text::upper")
            .with_callable("Text::upper", |args: &[Value]| {
                let input = args.first().and_then(Value::as_str).unwrap_or("");
                Ok(Value::from(input.to_uppercase()))
            });
        let view = host.roots().templates.clone();
        let env = Environment::build(Arc::new(host), &EngineOptions::default(), &view).unwrap();

        let rendered = env
            .render_string("{{ 'quiet' | shout }}", &json!({}))
            .unwrap();
        assert_eq!(rendered.body, "QUIET");
    }

    #[test]
    fn test_missing_required_root_aborts_build() {
        let (_dir, roots) = site();
        let host = StaticHost::new(roots).with_option("vellum.paths", json!(["/no/such/dir"]));
        let view = host.roots().templates.clone();
        let result = Environment::build(Arc::new(host), &EngineOptions::default(), &view);
        assert!(result.is_err());
    }

    #[test]
    fn test_precompiled_templates_render_without_loader() {
        let (_dir, roots) = site();
        fs::write(roots.templates.join("cached.jinja"), "cached {{ n }}").unwrap();
        let env = build(StaticHost::new(roots).with_option("vellum.cache", true));

        // The template was registered at build time.
        assert!(env.engine().get_template("cached.jinja").is_ok());
        let rendered = env
            .render_path("cached.jinja", &json!({ "n": 7 }), true)
            .unwrap();
        assert_eq!(rendered.body, "cached 7");
    }
}
