//! Domain scan common types.
//!
//! This crate provides foundational types shared across the dispatcher:
//! - Run identity (`ScanUuid`)
//! - Domain normalization, base-domain derivation, and input loading

pub mod domain;
pub mod id;

pub use domain::{base_domain, load_domains, normalize_domain, DomainError};
pub use id::ScanUuid;
