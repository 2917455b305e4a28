//! # Credential session cache
//!
//! One [`SessionKeysetPair`] per application id holds the current token and
//! the keyset that signs requests under it. Readers get owned clones; a
//! refresh for one application never waits on another application's entry.
//!
//! ```text
//! Uninitialized --mint--> Authenticated --expire--> Expired --mint--> Authenticated
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hv_core::{HvError, HvResult};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::credential::ApplicationCredential;
use crate::keyset::HmacKeyset;
use crate::minter::TokenMinter;
use crate::options::SessionOptions;
use crate::token::AuthenticationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Authenticated,
    Expired,
}

/// Why a caller is expiring a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The service rejected the token or its HMAC; the keyset is rotated
    /// before the next mint
    Unauthorized,
    /// The token is simply out of date
    Stale,
}

#[derive(Debug)]
struct PairState {
    state: SessionState,
    token: Option<AuthenticationToken>,
    /// When the cached token stops being handed out
    refresh_at: Option<Instant>,
    keyset: HmacKeyset,
    issuance: u64,
    rotate_keyset: bool,
}

/// Cache entry for one application.
#[derive(Debug)]
pub struct SessionKeysetPair {
    application_id: String,
    inner: RwLock<PairState>,
    /// Serializes mint round-trips for this application only
    refresh: Mutex<()>,
}

impl SessionKeysetPair {
    fn new(application_id: &str, keyset: HmacKeyset) -> Self {
        Self {
            application_id: application_id.to_string(),
            inner: RwLock::new(PairState {
                state: SessionState::Uninitialized,
                token: None,
                refresh_at: None,
                keyset,
                issuance: 0,
                rotate_keyset: false,
            }),
            refresh: Mutex::new(()),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn issuance(&self) -> u64 {
        self.inner.read().issuance
    }

    /// Clone of the token when it is not yet due for refresh.
    fn current(&self, now: Instant) -> Option<AuthenticationToken> {
        let inner = self.inner.read();
        match (&inner.state, &inner.token, inner.refresh_at) {
            (SessionState::Authenticated, Some(token), Some(refresh_at)) if now < refresh_at => {
                Some(token.clone())
            }
            _ => None,
        }
    }

    /// Clone of a still valid token installed after issuance `seen`.
    fn installed_since(&self, seen: u64, now: Instant) -> Option<AuthenticationToken> {
        let inner = self.inner.read();
        match (&inner.state, &inner.token) {
            (SessionState::Authenticated, Some(token))
                if inner.issuance > seen && !token.is_expired_at(now) =>
            {
                Some(token.clone())
            }
            _ => None,
        }
    }

    /// Keyset to propose on the next mint, rotated first if the last token
    /// was rejected.
    fn keyset_for_mint(&self, secret_len: usize) -> HmacKeyset {
        let mut inner = self.inner.write();
        if inner.rotate_keyset {
            inner.keyset = HmacKeyset::generate(secret_len);
            inner.rotate_keyset = false;
            debug!(application_id = %self.application_id, "rotated shared-secret keyset");
        }
        inner.keyset.clone()
    }

    fn mint_failed(&self) {
        let mut inner = self.inner.write();
        if inner.state == SessionState::Authenticated {
            inner.state = SessionState::Expired;
        }
    }

    /// Cache a fresh token. It is refreshed `window` before expiry, or halfway
    /// through its lifetime when that is shorter.
    fn install(
        &self,
        token: String,
        keyset: HmacKeyset,
        lifetime: Duration,
        window: Duration,
        now: Instant,
    ) -> AuthenticationToken {
        let expires_at = now + lifetime;
        let mut inner = self.inner.write();
        inner.issuance += 1;
        inner.keyset = keyset.clone();
        let token = AuthenticationToken {
            application_id: self.application_id.clone(),
            token,
            shared_secret: keyset,
            status: crate::token::TokenStatus::Success,
            issuance: inner.issuance,
            expires_at,
        };
        inner.token = Some(token.clone());
        inner.refresh_at = Some(expires_at - window.min(lifetime / 2));
        inner.state = SessionState::Authenticated;
        token
    }

    fn expire(&self, issuance: u64, reason: ExpiryReason) -> bool {
        let mut inner = self.inner.write();
        if inner.state != SessionState::Authenticated || inner.issuance != issuance {
            return false;
        }
        inner.state = SessionState::Expired;
        if reason == ExpiryReason::Unauthorized {
            inner.rotate_keyset = true;
        }
        true
    }
}

/// Obtains, caches and refreshes session tokens per application id.
pub struct CredentialSessionManager {
    minter: Arc<dyn TokenMinter>,
    options: SessionOptions,
    entries: DashMap<String, Arc<SessionKeysetPair>>,
}

impl CredentialSessionManager {
    pub fn new<M: TokenMinter + 'static>(minter: M, options: SessionOptions) -> Self {
        Self::from_arc(Arc::new(minter), options)
    }

    pub fn from_arc(minter: Arc<dyn TokenMinter>, options: SessionOptions) -> Self {
        Self {
            minter,
            options,
            entries: DashMap::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn entry(&self, application_id: &str) -> Arc<SessionKeysetPair> {
        if let Some(pair) = self.entries.get(application_id) {
            return pair.value().clone();
        }
        self.entries
            .entry(application_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionKeysetPair::new(
                    application_id,
                    HmacKeyset::generate(self.options.shared_secret_len),
                ))
            })
            .value()
            .clone()
    }

    /// Current token for `application_id`, minting one if there is none or
    /// the cached one is expired or about to expire.
    #[instrument(skip(self, credential))]
    pub async fn get_or_refresh(
        &self,
        application_id: &str,
        credential: &dyn ApplicationCredential,
    ) -> HvResult<AuthenticationToken> {
        let pair = self.entry(application_id);
        let window = self.options.refresh_window;

        if let Some(token) = pair.current(Instant::now()) {
            return Ok(token);
        }
        let seen = pair.issuance();

        let _refresh = pair.refresh.lock().await;
        let now = Instant::now();
        if let Some(token) = pair.current(now).or_else(|| pair.installed_since(seen, now)) {
            debug!("token refreshed by a concurrent caller");
            return Ok(token);
        }

        let proposed = pair.keyset_for_mint(self.options.shared_secret_len);
        let minted = match self.minter.mint(application_id, &proposed, credential).await {
            Ok(minted) => minted,
            Err(err) => {
                pair.mint_failed();
                warn!(error = %err, "token mint failed");
                return Err(err);
            }
        };

        if !minted.status.is_success() {
            pair.mint_failed();
            return Err(HvError::service(
                401,
                format!("token mint returned `{}`", minted.status),
            ));
        }
        let Some(token) = minted.token else {
            pair.mint_failed();
            return Err(HvError::protocol("successful mint response carried no token"));
        };

        let lifetime = minted.lifetime.unwrap_or(self.options.default_token_lifetime);
        let keyset = minted.shared_secret.unwrap_or(proposed);
        let token = pair.install(token, keyset, lifetime, window, Instant::now());

        info!(issuance = token.issuance, ?lifetime, "minted session token");
        Ok(token)
    }

    /// Mark the token of `issuance` expired. A token that has already been
    /// replaced is left alone; returns whether anything changed.
    pub fn expire_authentication_result(
        &self,
        application_id: &str,
        issuance: u64,
        reason: ExpiryReason,
    ) -> bool {
        let Some(pair) = self.entries.get(application_id).map(|p| p.value().clone()) else {
            return false;
        };
        let expired = pair.expire(issuance, reason);
        debug!(application_id, issuance, ?reason, expired, "expire authentication result");
        expired
    }

    pub fn state(&self, application_id: &str) -> SessionState {
        self.entries
            .get(application_id)
            .map(|pair| pair.state())
            .unwrap_or(SessionState::Uninitialized)
    }

    pub fn issuance(&self, application_id: &str) -> Option<u64> {
        self.entries.get(application_id).map(|pair| pair.issuance())
    }

    /// Run `op` with a current token. If it fails as unauthorized, expire that
    /// token, re-authenticate once and run `op` once more; a second
    /// unauthorized failure is returned as is.
    pub async fn execute_authorized<T, F, Fut>(
        &self,
        application_id: &str,
        credential: &dyn ApplicationCredential,
        mut op: F,
    ) -> HvResult<T>
    where
        F: FnMut(AuthenticationToken) -> Fut,
        Fut: Future<Output = HvResult<T>>,
    {
        let token = self.get_or_refresh(application_id, credential).await?;
        let issuance = token.issuance;

        match op(token).await {
            Err(err) if err.is_unauthorized() => {
                warn!(application_id, issuance, "request unauthorized, re-authenticating");
                self.expire_authentication_result(application_id, issuance, ExpiryReason::Unauthorized);
                let token = self.get_or_refresh(application_id, credential).await?;
                let issuance = token.issuance;
                let result = op(token).await;
                if matches!(&result, Err(err) if err.is_unauthorized()) {
                    self.expire_authentication_result(application_id, issuance, ExpiryReason::Unauthorized);
                }
                result
            }
            other => other,
        }
    }
}
