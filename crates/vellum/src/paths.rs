//! Template search roots: the ordered namespace table and path
//! normalization.
//!
//! A template reference is either plain (`partials/teaser.jinja`), searched
//! through the default-namespace roots in registration order, or prefixed
//! (`@snippets/nav.jinja`), searched through the named namespace's roots.
//! First match wins in both cases.
//!
//! Three namespaces are conventionally optional — `snippets`, `plugins`
//! and `assets` — and are skipped quietly when their declared directory
//! does not exist, tolerating hosts that never created them. Every other
//! search root must exist; a missing one is a configuration error that
//! aborts environment construction.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::host::Host;

/// Namespaces that may point at directories that do not exist.
pub const OPTIONAL_NAMESPACES: &[&str] = &["snippets", "plugins", "assets"];

/// Failure while assembling the search roots.
#[derive(Debug, Error)]
pub enum PathsError {
    /// A required named namespace points nowhere.
    #[error("template namespace \"@{namespace}\" points to a missing directory: {}", .path.display())]
    MissingNamespaceRoot { namespace: String, path: PathBuf },

    /// A default-namespace search root points nowhere.
    #[error("template search path does not exist: {}", .0.display())]
    MissingSearchRoot(PathBuf),
}

/// The ordered table of template search roots.
#[derive(Debug, Clone, Default)]
pub struct TemplatePaths {
    defaults: Vec<PathBuf>,
    namespaces: Vec<(String, Vec<PathBuf>)>,
}

impl TemplatePaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a root to the default namespace. The directory must exist.
    pub fn add_default_root(&mut self, path: impl Into<PathBuf>) -> Result<(), PathsError> {
        let path = path.into();
        if !path.is_dir() {
            return Err(PathsError::MissingSearchRoot(path));
        }
        if !self.defaults.contains(&path) {
            self.defaults.push(path);
        }
        Ok(())
    }

    /// Appends a root to a named namespace.
    ///
    /// The conventionally-optional namespaces are skipped when the
    /// directory is missing; all others fail.
    pub fn add_namespace(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<(), PathsError> {
        let path = path.into();
        if !path.is_dir() {
            if OPTIONAL_NAMESPACES.contains(&name) {
                debug!(
                    namespace = name,
                    path = %path.display(),
                    "skipping optional template namespace with missing root"
                );
                return Ok(());
            }
            return Err(PathsError::MissingNamespaceRoot {
                namespace: name.to_string(),
                path,
            });
        }
        match self.namespaces.iter_mut().find(|(n, _)| n == name) {
            Some((_, roots)) => roots.push(path),
            None => self.namespaces.push((name.to_string(), vec![path])),
        }
        Ok(())
    }

    /// The default-namespace roots, in search order.
    pub fn default_roots(&self) -> &[PathBuf] {
        &self.defaults
    }

    /// The roots of a named namespace, if it was registered.
    pub fn namespace_roots(&self, name: &str) -> Option<&[PathBuf]> {
        self.namespaces
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, roots)| roots.as_slice())
    }

    /// Resolves a template reference to the first existing file.
    ///
    /// `@name/rel` references search the named namespace, everything else
    /// the default namespace. Parent-directory traversal never resolves.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim_start_matches('/');
        let (roots, relative): (&[PathBuf], &str) = match name.strip_prefix('@') {
            Some(rest) => {
                let (namespace, relative) = rest.split_once('/')?;
                (self.namespace_roots(namespace)?, relative)
            }
            None => (&self.defaults, name),
        };
        if relative.is_empty() || relative.split('/').any(|segment| segment == "..") {
            return None;
        }
        roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
    }

    /// Builds the full search-root table for one environment.
    ///
    /// Ordering: the host template root, the view path when it differs,
    /// the named namespaces (host defaults merged with the
    /// `vellum.namespaces` option, option values winning per name), the
    /// `vellum.paths` extras, and finally every extension-contributed
    /// template-components directory in registration order.
    pub(crate) fn assemble(host: &dyn Host, view_path: &Path) -> Result<Self, PathsError> {
        let roots = host.roots();
        let mut paths = Self::new();

        paths.add_default_root(&roots.templates)?;
        if view_path != roots.templates {
            paths.add_default_root(view_path)?;
        }

        let mut named: Vec<(String, PathBuf)> = vec![
            ("templates".to_string(), roots.templates.clone()),
            ("snippets".to_string(), roots.snippets.clone()),
            ("plugins".to_string(), roots.plugins.clone()),
        ];
        if let Some(assets) = &roots.assets {
            named.push(("assets".to_string(), assets.clone()));
        }
        if let Some(JsonValue::Object(map)) = host.option("vellum.namespaces") {
            for (name, value) in map {
                let Some(path) = value.as_str() else { continue };
                match named.iter_mut().find(|(n, _)| n == name) {
                    Some(entry) => entry.1 = PathBuf::from(path),
                    None => named.push((name.clone(), PathBuf::from(path))),
                }
            }
        }
        for (name, path) in named {
            paths.add_namespace(&name, path)?;
        }

        if let Some(JsonValue::Array(extra)) = host.option("vellum.paths") {
            for value in extra {
                if let Some(path) = value.as_str() {
                    paths.add_default_root(path)?;
                }
            }
        }

        for extension in host.extensions() {
            if let Some(contribution) = &extension.template_components {
                paths.add_default_root(contribution.resolve())?;
            }
        }

        Ok(paths)
    }
}

/// Normalizes a file path into a loader-relative reference: runs of `/`
/// and `\` collapse to a single `/`, the template-root prefix is stripped,
/// and the leading `/` is trimmed. Already-relative references pass
/// through unchanged, so the function is idempotent.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use vellum::paths::loader_relative;
///
/// let root = Path::new("/srv/site/templates");
/// assert_eq!(loader_relative(root, "/srv/site/templates/home.jinja"), "home.jinja");
/// assert_eq!(loader_relative(root, "home.jinja"), "home.jinja");
/// ```
pub fn loader_relative(template_root: &Path, file_path: &str) -> String {
    let path = squash_separators(file_path);
    let root = squash_separators(&template_root.to_string_lossy());
    let stripped = path.strip_prefix(root.as_str()).unwrap_or(path.as_str());
    stripped.trim_start_matches('/').to_string()
}

fn squash_separators(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_was_separator = false;
    for c in s.chars() {
        if c == '/' || c == '\\' {
            if !previous_was_separator {
                out.push('/');
            }
            previous_was_separator = true;
        } else {
            out.push(c);
            previous_was_separator = false;
        }
    }
    out
}
