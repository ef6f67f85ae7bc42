//! Core data models for the conversion service.
//!
//! `artifact` describes converted files tracked by the artifact store;
//! `conversion` describes the file kinds the service accepts and produces.

pub mod artifact;
pub mod conversion;
