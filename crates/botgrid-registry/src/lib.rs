//! botgrid-registry: the in-memory bot registry.
//!
//! The registry is the single source of truth for which bots exist and
//! where they run. It lives for the lifetime of the process; nothing is
//! persisted.
//!
//! Records are handed out as clones. All mutation goes through
//! [`BotRegistry`] methods.

pub mod error;
pub mod store;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use store::BotRegistry;
pub use types::BotRecord;
