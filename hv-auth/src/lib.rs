//! hv-auth: application sessions for the hv-rs health-record client.
//!
//! An application proves itself with an [`ApplicationCredential`], the
//! [`CredentialSessionManager`] mints and caches a session token plus HMAC
//! keyset per application id, and [`SessionClient`] signs outbound calls with
//! that keyset, re-authenticating once when the service answers 401.

pub mod client;
pub mod credential;
pub mod keyset;
pub mod minter;
pub mod options;
pub mod session;
pub mod signing;
pub mod token;

pub use client::SessionClient;
pub use credential::{
    ApplicationCredential, CredentialKind, CredentialProof, SharedSecretCredential,
    SigningKeyCredential,
};
pub use keyset::{HmacAlgorithm, HmacKeyset};
pub use minter::{HttpTokenMinter, MintedToken, TokenMinter};
pub use options::SessionOptions;
pub use session::{CredentialSessionManager, ExpiryReason, SessionKeysetPair, SessionState};
pub use signing::{RequestSigner, SignedHeaders};
pub use token::{AuthenticationToken, TokenStatus};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ApplicationCredential, AuthenticationToken, CredentialSessionManager, ExpiryReason,
        HttpTokenMinter, SessionClient, SessionOptions, SessionState, TokenMinter,
    };
    pub use hv_core::{HvError, HvResult};
}
