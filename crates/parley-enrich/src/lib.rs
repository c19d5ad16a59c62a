//! Enrichment pipeline for Parley.
//!
//! Provides:
//! - A gateway that fans text out to pluggable analysis backends, one call
//!   per requested kind, recording per-kind failures instead of aborting
//! - A process-lifetime analysis cache with single-flight population
//! - Local heuristic backends (entities, key phrases, sentiment, summary)
//!   for running without remote NLP services

pub mod analysis;
pub mod cache;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod phrases;
pub mod sentiment;
pub mod summary;

pub use analysis::AnalysisService;
pub use cache::{normalize_text, AnalysisCache, AnalysisKey};
pub use entity::PatternEntityBackend;
pub use error::EnrichError;
pub use gateway::{EnrichmentBackend, EnrichmentGateway};
pub use phrases::KeyPhraseBackend;
pub use sentiment::LexiconSentimentBackend;
pub use summary::ExtractiveSummaryBackend;

use std::sync::Arc;

use parley_core::EnrichmentKind;

/// Register the local heuristic backends for the kinds they serve.
pub fn register_local_backends(gateway: &mut EnrichmentGateway) {
    gateway.register(EnrichmentKind::ENTITIES, Arc::new(PatternEntityBackend::new()));
    gateway.register(EnrichmentKind::KEY_PHRASES, Arc::new(KeyPhraseBackend::new()));
    gateway.register(EnrichmentKind::SENTIMENT, Arc::new(LexiconSentimentBackend::new()));
    gateway.register(EnrichmentKind::SUMMARY, Arc::new(ExtractiveSummaryBackend::default()));
}
