//! Engine configuration: core flags, the structured options builder, and
//! legacy dotted-key helper discovery.
//!
//! Configuration arrives from two directions. Data-shaped settings (flags,
//! paths, namespace maps) come from the host's option store and are merged
//! over built-in defaults, host values winning. Code-shaped settings
//! (helper closures, extension hooks, a custom autoescape callback) cannot
//! travel through an option store and are supplied through the
//! [`EngineOptions`] builder instead.
//!
//! The legacy dotted-key scheme (`vellum.function.<name>` and friends) is
//! kept for hosts migrating old configuration: each such key's value names
//! an entry in the host's callable table. A legacy declaration never
//! overrides a name that structured configuration already registered.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::helpers::{HelperFn, HelperKind};
use crate::host::Host;

/// Output-escaping policy for the engine.
#[derive(Clone)]
pub enum AutoescapePolicy {
    /// HTML-escape everything that is not marked safe. The default.
    Html,
    /// No automatic escaping.
    Off,
    /// Decide per template name; `true` means HTML-escape.
    Callback(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for AutoescapePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoescapePolicy::Html => f.write_str("Html"),
            AutoescapePolicy::Off => f.write_str("Off"),
            AutoescapePolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Core engine flags, resolved from built-in defaults and host options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Debug mode. Drives error presentation and the engine's own
    /// diagnostics verbosity.
    pub debug: bool,
    /// Whether referencing an undefined variable is an error. Defaults to
    /// the debug flag.
    pub strict_variables: bool,
    pub autoescape: AutoescapePolicy,
    /// When set, all default-root templates are compiled eagerly at build
    /// time and retained for the environment's lifetime.
    pub cache_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub(crate) fn resolve(host: &dyn Host, options: &EngineOptions) -> Self {
        let debug = bool_option(host, "debug", false);
        let strict_variables = bool_option(host, "vellum.strict", debug);

        let autoescape = match &options.autoescape {
            Some(policy) => policy.clone(),
            None => match host.option("vellum.autoescape") {
                None | Some(JsonValue::Null) => AutoescapePolicy::Html,
                Some(JsonValue::Bool(true)) => AutoescapePolicy::Html,
                Some(JsonValue::Bool(false)) => AutoescapePolicy::Off,
                Some(JsonValue::String(s)) => match s.as_str() {
                    "html" => AutoescapePolicy::Html,
                    "off" | "none" | "false" => AutoescapePolicy::Off,
                    other => {
                        warn!(policy = other, "unrecognized autoescape policy, using html");
                        AutoescapePolicy::Html
                    }
                },
                Some(_) => {
                    warn!("autoescape option is neither a string nor a bool, using html");
                    AutoescapePolicy::Html
                }
            },
        };

        let cache_dir = if bool_option(host, "vellum.cache", false) {
            Some(host.roots().cache.join("vellum"))
        } else {
            None
        };

        Self {
            debug,
            strict_variables,
            autoescape,
            cache_dir,
        }
    }
}

/// A hook applied to the engine at build time, after the built-in debug
/// helpers and before user functions/filters/tests. The engine-extension
/// analogue: a hook may register anything user configuration can then
/// override.
pub type ExtensionHook = Arc<dyn Fn(&mut minijinja::Environment<'static>) + Send + Sync>;

/// Code-level configuration: helper registrations and extension hooks.
///
/// Names may carry the `*` safety sigil; see
/// [`HelperEntry`](crate::helpers::HelperEntry).
///
/// # Example
///
/// ```rust,ignore
/// let options = EngineOptions::default()
///     .function("*csrf_field", |_args| Ok(Value::from("<input type=\"hidden\" ..>")))
///     .filter("excerpt", |args| { /* .. */ })
///     .extension(|env| env.add_global("version", "2.1"));
/// ```
#[derive(Default, Clone)]
pub struct EngineOptions {
    pub(crate) functions: Vec<(String, HelperFn)>,
    pub(crate) filters: Vec<(String, HelperFn)>,
    pub(crate) tests: Vec<(String, HelperFn)>,
    pub(crate) extensions: Vec<ExtensionHook>,
    pub(crate) autoescape: Option<AutoescapePolicy>,
}

impl EngineOptions {
    pub fn function(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[minijinja::Value]) -> Result<minijinja::Value, minijinja::Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.functions.push((name.into(), Arc::new(func)));
        self
    }

    pub fn filter(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[minijinja::Value]) -> Result<minijinja::Value, minijinja::Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.filters.push((name.into(), Arc::new(func)));
        self
    }

    pub fn test(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[minijinja::Value]) -> Result<minijinja::Value, minijinja::Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.tests.push((name.into(), Arc::new(func)));
        self
    }

    pub fn extension(
        mut self,
        hook: impl Fn(&mut minijinja::Environment<'static>) + Send + Sync + 'static,
    ) -> Self {
        self.extensions.push(Arc::new(hook));
        self
    }

    pub fn autoescape(mut self, policy: AutoescapePolicy) -> Self {
        self.autoescape = Some(policy);
        self
    }
}

/// A helper declared through the legacy dotted-key scheme.
pub(crate) struct LegacyDeclaration {
    pub kind: HelperKind,
    pub raw_name: String,
    pub callable: String,
}

/// Scans the host options for legacy `vellum.<bucket>.<name>` helper
/// declarations, in the host's deterministic key order.
pub(crate) fn legacy_declarations(host: &dyn Host) -> Vec<LegacyDeclaration> {
    const BUCKETS: &[(&str, HelperKind)] = &[
        ("vellum.function.", HelperKind::Function),
        ("vellum.filter.", HelperKind::Filter),
        ("vellum.test.", HelperKind::Test),
    ];

    let mut declarations = Vec::new();
    for key in host.option_keys() {
        for (prefix, kind) in BUCKETS {
            let Some(raw_name) = key.strip_prefix(prefix) else {
                continue;
            };
            if raw_name.is_empty() || raw_name.contains('.') {
                continue;
            }
            match host.option(&key).and_then(JsonValue::as_str) {
                Some(callable) => declarations.push(LegacyDeclaration {
                    kind: *kind,
                    raw_name: raw_name.to_string(),
                    callable: callable.to_string(),
                }),
                None => warn!(key = %key, "legacy helper declaration value is not a string"),
            }
        }
    }
    declarations
}

pub(crate) fn bool_option(host: &dyn Host, key: &str, default: bool) -> bool {
    match host.option(key) {
        Some(JsonValue::Bool(value)) => *value,
        Some(JsonValue::String(value)) => matches!(value.as_str(), "true" | "1" | "on" | "yes"),
        _ => default,
    }
}
