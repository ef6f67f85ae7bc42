//! Artifact lifecycle and conversion services.

pub mod artifact_store;
pub mod cleanup_scheduler;
pub mod converter;
pub mod expiry_sweeper;
