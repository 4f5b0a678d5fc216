//! camli-core: content references, wire format, and configuration.
//! All other camli crates depend on this one.

pub mod config;
pub mod reference;
pub mod wire;

pub use config::{CamliConfig, ConfigError};
pub use reference::{ContentReference, DigestAlgorithm, Hasher, InvalidReference};
