//! Shared models, configuration, and infrastructure clients used by the
//! control plane and the HTTP surface: the State Store (Redis), the data
//! model, error taxonomy, JWT issuance, fingerprinting, and the Catalog
//! Store (Postgres) repositories.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod jwt;
pub mod logging;
pub mod models;
pub mod state_store;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{Error, Result};
pub use state_store::StateStore;
