//! The authentication collaborator.
//!
//! Signing is approved by a separate surface (the popup) that the host does
//! not control. The orchestrator only depends on [`Authenticator`]; the
//! production implementation talks to the popup over the bridge.

pub mod remote;

pub use remote::BridgeAuthenticator;

use sigbridge_core::{
    error::AuthError,
    types::{AuthRequest, SignedTransaction},
};

pub type AuthResult<T> = Result<T, AuthError>;

pub trait Authenticator: Send + Sync + 'static {
    /// Resolves one [`AuthRequest`].
    ///
    /// `Ok(None)` means the request was approved without a signature being
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the user declines, the collaborator times
    /// out, or the request cannot be delivered.
    fn authenticate(
        &self,
        request: AuthRequest,
    ) -> impl Future<Output = AuthResult<Option<SignedTransaction>>> + Send;
}
