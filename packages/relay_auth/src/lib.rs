//! Connection trust primitives for the session relay.

pub mod capability;
pub mod error;
pub mod trust;

pub use capability::{Capability, Trust};
pub use error::AuthError;
pub use trust::{BackendGrant, BackendSecret, classify};
