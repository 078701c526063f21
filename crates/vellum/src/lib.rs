//! # Vellum - a host-pluggable template view layer
//!
//! `vellum` swaps a content-management host's default template renderer for
//! a Jinja-compatible one (minijinja), taking care of the plumbing that
//! sits between the two: resolving logical template names across an
//! ordered set of named search roots, exposing host helper functions to
//! templates, and turning render failures into something a website can
//! actually serve.
//!
//! ## Core Concepts
//!
//! - [`Host`]: the contract the CMS implements - roots, options,
//!   extensions, the error-page facility, and its own legacy renderer
//! - [`Vellum`]: the facade the host keeps around - component factory,
//!   fragment rendering, and the current-environment slot
//! - [`Environment`]: one configured engine instance, immutable after
//!   build and shared read-only behind an `Arc`
//! - [`TemplateRenderer`]: the capability the host's template subsystem
//!   depends on, backed by either the native engine or the host's legacy
//!   format
//! - [`EngineOptions`]: code-level configuration - helper closures,
//!   extension hooks, the autoescape policy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use vellum::{EngineOptions, HostRoots, StaticHost, Vellum};
//!
//! let host = StaticHost::new(HostRoots {
//!     templates: "/srv/site/templates".into(),
//!     snippets: "/srv/site/snippets".into(),
//!     plugins: "/srv/site/plugins".into(),
//!     assets: None,
//!     cache: "/srv/site/cache".into(),
//! })
//! .with_option("debug", true);
//!
//! let options = EngineOptions::default()
//!     .function("*csrf_field", |_args| {
//!         Ok(minijinja::Value::from("<input type=\"hidden\" name=\"csrf\">"))
//!     });
//!
//! let vellum = Vellum::with_options(Arc::new(host), options);
//!
//! // Full page render through a template component:
//! let article = vellum.template("blog/article", "html", "html")?;
//! let response = article.render(&json!({ "title": "Hello" }))?;
//!
//! // Fragment render from inside other output:
//! let teaser = vellum.render("partials/teaser", &json!({}))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Template Resolution
//!
//! Template references are searched through the default-namespace roots in
//! registration order, or through a named namespace when prefixed
//! (`@snippets/nav.jinja`). The search-root table is assembled per
//! environment from the host template root, the component's view path,
//! the built-in and user-configured namespaces, extra search paths, and
//! extension-contributed directories; see [`paths`] for the exact order
//! and the optional-namespace rule.
//!
//! ## Helper Registration
//!
//! Helpers registered with a leading `*` are marked pre-escaped and bypass
//! autoescaping:
//!
//! ```rust
//! use std::sync::Arc;
//! use vellum::helpers::{HelperEntry, HelperFn};
//! use vellum::minijinja::Value;
//!
//! let func: HelperFn = Arc::new(|_args| Ok(Value::from("<br>")));
//! let entry = HelperEntry::parse("*html", func).unwrap();
//! assert_eq!(entry.name, "html");
//! assert!(entry.safe);
//! ```
//!
//! ## Error Handling
//!
//! Render failures are presented according to the debug flag and whether
//! the render is a full page or a fragment: production fragments fail to
//! an empty string, production pages fall back to the host error page (or
//! re-raise), and debug renders always produce visible diagnostics. See
//! [`RenderError`] and the `present` module documentation.

pub mod config;
pub mod environment;
pub mod error;
pub mod helpers;
pub mod host;
pub mod paths;
pub mod plugin;
mod present;
pub mod template;

// Configuration
pub use config::{AutoescapePolicy, EngineConfig, EngineOptions, ExtensionHook};

// Environment and render output
pub use environment::{Environment, Rendered};

// Error types
pub use error::{BuildError, RenderError};

// Helper registration
pub use helpers::{HelperEntry, HelperFn};

// Host surface
pub use host::{Host, HostError, HostExtension, HostRoots, StaticHost, TemplateContribution};

// Search roots
pub use paths::{loader_relative, PathsError, TemplatePaths, OPTIONAL_NAMESPACES};

// Facade
pub use plugin::Vellum;

// Template components
pub use template::{LegacyTemplate, NativeTemplate, TemplateRenderer, NATIVE_EXTENSION};

// Re-export the engine so hosts can write extension hooks and helper
// values against the exact version this crate is built with.
pub use minijinja;
