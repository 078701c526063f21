//! Helper registration: host functions, filters and tests exposed to
//! templates.
//!
//! Helpers are registered under a raw key that may carry a leading `*`
//! safety sigil, marking the helper's output as pre-escaped so the engine's
//! autoescaping leaves it alone. The sigil is stripped before the helper is
//! exposed; `::` in callable-style keys is substituted with `__` so the
//! exposed name stays a valid identifier.
//!
//! Registration failures are swallowed by policy: a bad key drops that one
//! helper (with a `warn!`) instead of breaking every render that follows.

use std::sync::Arc;

use minijinja::value::{Rest, ValueKind};
use minijinja::{ErrorKind, Value};
use once_cell::sync::Lazy;
use tracing::warn;

/// A helper callable: receives the evaluated arguments, returns a value or
/// an engine error. For filters the piped value is the first argument; for
/// tests the result is interpreted as a boolean.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, minijinja::Error> + Send + Sync>;

/// Which engine registry a helper goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HelperKind {
    Function,
    Filter,
    Test,
}

/// A parsed helper registration.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use vellum::helpers::{HelperEntry, HelperFn};
/// use vellum::minijinja::Value;
///
/// let func: HelperFn = Arc::new(|_args| Ok(Value::from("ok")));
/// let entry = HelperEntry::parse("*csrf_field", func).unwrap();
/// assert_eq!(entry.name, "csrf_field");
/// assert!(entry.safe);
/// ```
#[derive(Clone)]
pub struct HelperEntry {
    /// The exposed name, sigil stripped and `::` mangled away.
    pub name: String,
    /// Whether the helper's string output bypasses autoescaping.
    pub safe: bool,
    pub func: HelperFn,
}

impl HelperEntry {
    /// Parses a raw registration key. Returns `None` (and logs) when the
    /// key does not mangle to a valid identifier; the caller drops the
    /// helper silently.
    pub fn parse(raw: &str, func: HelperFn) -> Option<Self> {
        let safe = raw.starts_with('*');
        let name = raw.trim_start_matches('*').replace("::", "__");
        if !valid_name(&name) {
            warn!(key = raw, "ignoring helper registration with invalid name");
            return None;
        }
        Some(Self { name, safe, func })
    }
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// An ordered helper table with the two merge rules the build needs:
/// explicit registration replaces by final name, legacy discovery only
/// fills gaps.
#[derive(Default)]
pub(crate) struct HelperTable {
    entries: Vec<HelperEntry>,
}

impl HelperTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a helper, replacing any existing entry with the same
    /// final name. Built-ins go in first so structured configuration can
    /// override them.
    pub fn insert(&mut self, raw: &str, func: HelperFn) {
        let Some(entry) = HelperEntry::parse(raw, func) else {
            return;
        };
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Registers a helper only if the final name is still free. The legacy
    /// discovery path: structured configuration always wins.
    pub fn insert_if_absent(&mut self, raw: &str, func: HelperFn) {
        let Some(entry) = HelperEntry::parse(raw, func) else {
            return;
        };
        if self.entries.iter().any(|e| e.name == entry.name) {
            warn!(
                name = %entry.name,
                "skipping legacy helper declaration, name already registered"
            );
            return;
        }
        self.entries.push(entry);
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Installs every entry into the engine registry for `kind`. Safe
    /// entries get their string output re-wrapped as pre-escaped.
    pub fn install(&self, env: &mut minijinja::Environment<'static>, kind: HelperKind) {
        for entry in &self.entries {
            let func = entry.func.clone();
            let safe = entry.safe;
            match kind {
                HelperKind::Function => env.add_function(
                    entry.name.clone(),
                    move |args: Rest<Value>| -> Result<Value, minijinja::Error> {
                        func(&args.0).map(|v| mark_safe(v, safe))
                    },
                ),
                HelperKind::Filter => env.add_filter(
                    entry.name.clone(),
                    move |value: Value, args: Rest<Value>| -> Result<Value, minijinja::Error> {
                        let mut all = Vec::with_capacity(args.0.len() + 1);
                        all.push(value);
                        all.extend(args.0);
                        func(&all).map(|v| mark_safe(v, safe))
                    },
                ),
                HelperKind::Test => env.add_test(
                    entry.name.clone(),
                    move |value: Value, args: Rest<Value>| -> Result<bool, minijinja::Error> {
                        let mut all = Vec::with_capacity(args.0.len() + 1);
                        all.push(value);
                        all.extend(args.0);
                        func(&all).map(|v| v.is_true())
                    },
                ),
            }
        }
    }
}

fn mark_safe(value: Value, safe: bool) -> Value {
    if !safe {
        return value;
    }
    match value.as_str() {
        Some(s) => Value::from_safe_string(s.to_string()),
        None => value,
    }
}

static DEFAULT_FUNCTIONS: Lazy<Vec<(&'static str, HelperFn)>> =
    Lazy::new(|| vec![("error", Arc::new(raise_error) as HelperFn)]);

static DEFAULT_TESTS: Lazy<Vec<(&'static str, HelperFn)>> =
    Lazy::new(|| vec![("of_type", Arc::new(of_type) as HelperFn)]);

/// The built-in function set every environment starts from.
pub(crate) fn default_functions() -> Vec<(&'static str, HelperFn)> {
    DEFAULT_FUNCTIONS
        .iter()
        .map(|(name, func)| (*name, func.clone()))
        .collect()
}

/// The built-in test set every environment starts from.
pub(crate) fn default_tests() -> Vec<(&'static str, HelperFn)> {
    DEFAULT_TESTS
        .iter()
        .map(|(name, func)| (*name, func.clone()))
        .collect()
}

/// Registers the debug introspection function. Installed unconditionally,
/// before extension hooks, so hooks and user configuration can override it.
pub(crate) fn register_dump(env: &mut minijinja::Environment<'static>) {
    env.add_function(
        "dump",
        |args: Rest<Value>| -> Result<Value, minijinja::Error> {
            let mut out = String::new();
            for value in &args.0 {
                let pretty = serde_json::to_string_pretty(value).map_err(|err| {
                    minijinja::Error::new(ErrorKind::BadSerialization, err.to_string())
                })?;
                out.push_str("<pre>");
                out.push_str(&pretty);
                out.push_str("</pre>\n");
            }
            Ok(Value::from_safe_string(out))
        },
    );
}

/// `error(message, source?, context?)`: raise an engine error from inside a
/// template. The optional context is appended to the message.
fn raise_error(args: &[Value]) -> Result<Value, minijinja::Error> {
    let message = args
        .first()
        .and_then(Value::as_str)
        .unwrap_or("template raised an error")
        .to_string();
    let detail = match args.get(2).and_then(Value::as_str) {
        Some(context) if !context.is_empty() => format!("{message}<br>{context}"),
        _ => message,
    };
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, detail))
}

/// `value is of_type("string")`: kind test over engine values.
///
/// Unknown type names test false, as does the class-identity arm of the
/// system this replaces, which has no engine analogue here.
fn of_type(args: &[Value]) -> Result<Value, minijinja::Error> {
    let value = args.first().cloned().unwrap_or(Value::UNDEFINED);
    let type_name = args.get(1).and_then(Value::as_str).unwrap_or("");

    let matches = match type_name {
        "array" => value.kind() == ValueKind::Seq,
        "bool" => value.kind() == ValueKind::Bool,
        "int" => value.kind() == ValueKind::Number && i64::try_from(value.clone()).is_ok(),
        "float" => value.kind() == ValueKind::Number && i64::try_from(value.clone()).is_err(),
        "numeric" => {
            value.kind() == ValueKind::Number
                || value
                    .as_str()
                    .map(|s| s.trim().parse::<f64>().is_ok())
                    .unwrap_or(false)
        }
        "object" => value.kind() == ValueKind::Map,
        "scalar" => matches!(
            value.kind(),
            ValueKind::Bool | ValueKind::Number | ValueKind::String
        ),
        "string" => value.kind() == ValueKind::String,
        _ => false,
    };
    Ok(Value::from(matches))
}
