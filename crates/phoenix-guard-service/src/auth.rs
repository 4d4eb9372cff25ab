//! Admin authentication.
//!
//! Credential extraction is transport-specific. This module only handles
//! verification.

use subtle::ConstantTimeEq;

/// Bearer-token check for the administrative surface (counter resets,
/// block list management).
#[derive(Clone)]
pub struct AuthProvider {
    admin_token: String,
}

impl AuthProvider {
    /// Returns `None` if no token is configured.
    pub fn new(admin_token: Option<String>) -> Option<Self> {
        admin_token
            .filter(|t| !t.is_empty())
            .map(|admin_token| Self { admin_token })
    }

    /// Check a bearer token.
    pub fn check_bearer(&self, token: &str) -> bool {
        ct_eq(token.as_bytes(), self.admin_token.as_bytes())
    }
}

/// Constant-time comparison of two byte slices.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}
