//! Backend trust classification.
//!
//! The agent backend authenticates with a shared secret presented in a request
//! header. Comparison is constant-time over equal-length inputs; a length
//! mismatch returns early without looking at content.

use std::fmt;

use subtle::ConstantTimeEq;

/// The server-held shared secret. `Debug` never prints the value.
#[derive(Clone)]
pub struct BackendSecret(Vec<u8>);

impl BackendSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// An empty secret means backend trust is disabled.
    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BackendSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSecret")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Proof that a connection presented the backend secret.
///
/// Only [`classify`] can mint one, so any API that takes a `BackendGrant`
/// is reachable from backend-trusted code paths only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendGrant {
    _private: (),
}

/// Decide whether the presented header value grants backend trust.
///
/// Returns `None` when the header is absent, the configured secret is empty,
/// the lengths differ, or the bytes differ.
pub fn classify(presented: Option<&[u8]>, secret: &BackendSecret) -> Option<BackendGrant> {
    let presented = presented?;
    if secret.is_disabled() || presented.len() != secret.0.len() {
        return None;
    }
    if bool::from(presented.ct_eq(&secret.0)) {
        Some(BackendGrant { _private: () })
    } else {
        None
    }
}
