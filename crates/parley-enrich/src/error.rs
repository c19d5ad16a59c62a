use std::sync::Arc;

use parley_core::{BackendError, EnrichmentBundle, EnrichmentKind};
use thiserror::Error;

/// Errors that can occur in the enrichment pipeline.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("no backend registered for enrichment kind '{0}'")]
    MissingBackend(EnrichmentKind),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("backend for '{kind}' returned an unexpected payload")]
    UnexpectedPayload { kind: EnrichmentKind },
    /// An analysis finished with at least one failed kind. Carries the
    /// partial bundle so callers can still use the kinds that succeeded;
    /// the cache never stores it.
    #[error("analysis incomplete: {} kind(s) failed", .0.failed_kinds().len())]
    Incomplete(Arc<EnrichmentBundle>),
}
