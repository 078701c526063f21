//! Error types for environment construction and rendering.
//!
//! Failures fall into three buckets with different handling policies:
//!
//! - Configuration failures ([`BuildError`]) are fatal and abort environment
//!   construction.
//! - Registration failures (bad helper names) are swallowed at the
//!   registration site; the helper is simply omitted. They never surface here.
//! - Render failures are normally converted into a presentable result by the
//!   error presenter; [`RenderError::Engine`] carries the original engine
//!   failure in the one case where it is re-raised instead (page render,
//!   debug off, no usable error page).

use thiserror::Error;

use crate::host::HostError;
use crate::paths::PathsError;

/// Fatal failure while constructing an [`Environment`](crate::Environment).
///
/// Build errors are propagated, never presented: a misconfigured search path
/// is a deployment problem, not something a template author can fix.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The template search roots could not be assembled.
    #[error(transparent)]
    Paths(#[from] PathsError),
}

/// Failure surfaced by a render entry point.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The environment could not be built for this render.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// An engine failure that the error presenter decided to re-raise
    /// unchanged, leaving the final fallback to the host.
    #[error("template engine error: {0}")]
    Engine(#[source] minijinja::Error),

    /// The host's own renderer failed while handling a legacy template.
    #[error("host renderer error: {0}")]
    Host(#[from] HostError),
}
