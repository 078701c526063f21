//! Template components: the renderer capability the host's template
//! subsystem depends on, with one implementation per backing format.
//!
//! The host never cares which engine serves a template; it asks the
//! factory on [`Vellum`](crate::Vellum) for a component and calls
//! [`TemplateRenderer::render`]. Which implementation it gets is decided
//! by the backing file: an engine-native `.jinja` file produces a
//! [`NativeTemplate`], a legacy-extension file (when the `vellum.fallback`
//! option is on, the default) produces a [`LegacyTemplate`] that delegates
//! to the host's own renderer.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::environment::{Environment, Rendered};
use crate::error::RenderError;
use crate::host::Host;

/// The engine-native template file extension.
pub const NATIVE_EXTENSION: &str = "jinja";

/// What a resolved template location is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Native,
    Legacy,
}

/// A resolved backing file for a logical template name.
#[derive(Debug, Clone)]
pub(crate) struct Location {
    pub path: PathBuf,
    pub flavor: Flavor,
}

/// Resolves the backing file for a candidate base name (already including
/// the content type where it differs from the default).
///
/// Preference order: legacy file when fallback is on and no native file
/// exists, then the native file, then a host-contributed path. `None`
/// means the name will surface as an engine template-not-found failure.
pub(crate) fn resolve_location(host: &dyn Host, base: &str) -> Option<Location> {
    let root = &host.roots().templates;
    let native = root.join(format!("{base}.{NATIVE_EXTENSION}"));
    let legacy = root.join(format!("{base}.{}", host.legacy_extension()));
    let fallback = crate::config::bool_option(host, "vellum.fallback", true);

    if fallback && !native.is_file() && legacy.is_file() {
        return Some(Location {
            path: legacy,
            flavor: Flavor::Legacy,
        });
    }
    if native.is_file() {
        return Some(Location {
            path: native,
            flavor: Flavor::Native,
        });
    }
    host.contributed_template(base).map(|path| {
        let flavor = if path.extension().and_then(OsStr::to_str) == Some(NATIVE_EXTENSION) {
            Flavor::Native
        } else {
            Flavor::Legacy
        };
        Location { path, flavor }
    })
}

/// Builds the candidate base name for a logical template and content type.
pub(crate) fn candidate_base(name: &str, content_type: &str, default_type: &str) -> String {
    if content_type == default_type {
        name.to_string()
    } else {
        format!("{name}.{content_type}")
    }
}

/// A renderable template component.
///
/// The host's template subsystem depends only on this trait; the factory
/// decides which implementation backs a given name.
pub trait TemplateRenderer: Send + Sync {
    /// The logical template name this component was created for.
    fn name(&self) -> &str;

    /// The resolved backing file, when one exists.
    fn file(&self) -> Option<&Path>;

    /// Whether this component renders through the native engine, judged by
    /// the backing file's extension.
    fn is_native(&self) -> bool;

    /// Renders the template as a full page.
    fn render(&self, data: &JsonValue) -> Result<Rendered, RenderError>;
}

/// An engine-native template, rendered through a shared [`Environment`].
pub struct NativeTemplate {
    name: String,
    loader_name: String,
    file: Option<PathBuf>,
    env: Arc<Environment>,
}

impl NativeTemplate {
    pub(crate) fn new(
        name: impl Into<String>,
        loader_name: impl Into<String>,
        file: Option<PathBuf>,
        env: Arc<Environment>,
    ) -> Self {
        Self {
            name: name.into(),
            loader_name: loader_name.into(),
            file,
            env,
        }
    }
}

impl TemplateRenderer for NativeTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn is_native(&self) -> bool {
        match &self.file {
            Some(path) => path.extension().and_then(OsStr::to_str) == Some(NATIVE_EXTENSION),
            // No backing file yet: the render goes through the engine and
            // surfaces as a template-not-found failure there.
            None => true,
        }
    }

    fn render(&self, data: &JsonValue) -> Result<Rendered, RenderError> {
        self.env.render_path(&self.loader_name, data, true)
    }
}

/// A legacy-format template, rendered by the host itself.
pub struct LegacyTemplate {
    name: String,
    file: PathBuf,
    host: Arc<dyn Host>,
}

impl LegacyTemplate {
    pub(crate) fn new(name: impl Into<String>, file: PathBuf, host: Arc<dyn Host>) -> Self {
        Self {
            name: name.into(),
            file,
            host,
        }
    }
}

impl TemplateRenderer for LegacyTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn file(&self) -> Option<&Path> {
        Some(&self.file)
    }

    fn is_native(&self) -> bool {
        false
    }

    fn render(&self, data: &JsonValue) -> Result<Rendered, RenderError> {
        let body = self.host.render_legacy(&self.file, data)?;
        Ok(Rendered::ok(body))
    }
}
