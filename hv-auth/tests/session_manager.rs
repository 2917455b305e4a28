use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hv_auth::{
    ApplicationCredential, CredentialSessionManager, ExpiryReason, HmacKeyset, MintedToken,
    SessionOptions, SessionState, SharedSecretCredential, TokenMinter, TokenStatus,
};
use hv_core::{HvError, HvResult};
use tokio::sync::Notify;

/// Minter double: counts calls, records proposed keys, can be delayed or
/// told to fail.
#[derive(Default)]
struct ScriptedMinter {
    calls: AtomicUsize,
    proposed: Mutex<Vec<String>>,
    delay: Option<Duration>,
    lifetime: Option<Duration>,
    fail_next: AtomicBool,
    status: Option<TokenStatus>,
}

#[async_trait]
impl TokenMinter for ScriptedMinter {
    async fn mint(
        &self,
        application_id: &str,
        proposed: &HmacKeyset,
        _credential: &dyn ApplicationCredential,
    ) -> HvResult<MintedToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.proposed.lock().unwrap().push(proposed.key_base64());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(HvError::transient("mint", Some(503), "unavailable"));
        }
        Ok(MintedToken {
            status: self.status.unwrap_or(TokenStatus::Success),
            token: Some(format!("{application_id}-token-{n}")),
            shared_secret: None,
            lifetime: self.lifetime,
        })
    }
}

/// Blocks the mint for one application until released.
struct GatedMinter {
    slow_app: &'static str,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl TokenMinter for GatedMinter {
    async fn mint(
        &self,
        application_id: &str,
        _proposed: &HmacKeyset,
        _credential: &dyn ApplicationCredential,
    ) -> HvResult<MintedToken> {
        if application_id == self.slow_app {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(MintedToken {
            status: TokenStatus::Success,
            token: Some(format!("{application_id}-token")),
            shared_secret: None,
            lifetime: None,
        })
    }
}

fn credential() -> SharedSecretCredential {
    SharedSecretCredential::new(HmacKeyset::generate(32))
}

fn manager(minter: ScriptedMinter) -> (Arc<ScriptedMinter>, Arc<CredentialSessionManager>) {
    let minter = Arc::new(minter);
    let manager = CredentialSessionManager::from_arc(minter.clone(), SessionOptions::default());
    (minter, Arc::new(manager))
}

/// Two concurrent callers for an uncached application share one mint.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_mints_once() {
    let (minter, manager) = manager(ScriptedMinter {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_or_refresh("app-A", &credential()).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for task in tasks {
        tokens.push(task.await.unwrap().unwrap());
    }

    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tokens[0].token, tokens[1].token);
    assert_eq!(tokens[0].issuance, 1);
    assert_eq!(tokens[1].issuance, 1);
    assert_eq!(manager.state("app-A"), SessionState::Authenticated);
}

/// A refresh stuck on one application leaves others untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_for_one_app_does_not_block_another() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let manager = Arc::new(CredentialSessionManager::new(
        GatedMinter {
            slow_app: "slow-app",
            entered: entered.clone(),
            release: release.clone(),
        },
        SessionOptions::default(),
    ));

    let slow = tokio::spawn({
        let manager = manager.clone();
        async move { manager.get_or_refresh("slow-app", &credential()).await }
    });
    entered.notified().await;

    let fast = tokio::time::timeout(
        Duration::from_secs(2),
        manager.get_or_refresh("fast-app", &credential()),
    )
    .await
    .expect("fast-app waited on slow-app's refresh")
    .unwrap();

    assert_eq!(fast.token, "fast-app-token");
    assert!(!slow.is_finished());
    assert_eq!(manager.state("slow-app"), SessionState::Uninitialized);

    release.notify_one();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.token, "slow-app-token");
}

/// Expiring with a superseded issuance does nothing.
#[tokio::test]
async fn test_stale_issuance_cannot_expire_newer_token() {
    let (minter, manager) = manager(ScriptedMinter::default());
    let cred = credential();

    let first = manager.get_or_refresh("app", &cred).await.unwrap();
    assert!(manager.expire_authentication_result("app", first.issuance, ExpiryReason::Stale));
    assert_eq!(manager.state("app"), SessionState::Expired);

    let second = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(second.issuance, first.issuance + 1);

    // a slow caller still holding the first token reports it
    assert!(!manager.expire_authentication_result("app", first.issuance, ExpiryReason::Unauthorized));
    assert_eq!(manager.state("app"), SessionState::Authenticated);

    let again = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(again.token, second.token);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 2);
}

/// A 401 once: one re-authentication, one retry, success.
#[tokio::test]
async fn test_single_unauthorized_is_retried_once() {
    let (minter, manager) = manager(ScriptedMinter::default());
    let cred = credential();
    let attempts = AtomicUsize::new(0);

    let result = manager
        .execute_authorized("app", &cred, |token| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(HvError::unauthorized("hmac rejected"))
                } else {
                    Ok(token.issuance)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 2);
}

/// A 401 twice: surfaced after exactly one retry.
#[tokio::test]
async fn test_repeated_unauthorized_is_permanent() {
    let (minter, manager) = manager(ScriptedMinter::default());
    let cred = credential();
    let attempts = AtomicUsize::new(0);

    let err = manager
        .execute_authorized("app", &cred, |_token| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(HvError::unauthorized("still rejected")) }
        })
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 2);

    // the twice-rejected token is not handed out again
    assert_eq!(manager.state("app"), SessionState::Expired);
    let next = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(next.issuance, 3);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 3);
}

/// Other failures are not treated as authorization problems.
#[tokio::test]
async fn test_other_errors_are_not_retried() {
    let (minter, manager) = manager(ScriptedMinter::default());
    let attempts = AtomicUsize::new(0);

    let err = manager
        .execute_authorized("app", &credential(), |_token| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(HvError::service(3, "bad item")) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, HvError::Service { code: 3, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);
}

/// The keyset is replaced after a rejection, kept after a plain expiry.
#[tokio::test]
async fn test_keyset_rotates_after_rejection_only() {
    let (minter, manager) = manager(ScriptedMinter::default());
    let cred = credential();

    let first = manager.get_or_refresh("app", &cred).await.unwrap();
    manager.expire_authentication_result("app", first.issuance, ExpiryReason::Stale);
    let second = manager.get_or_refresh("app", &cred).await.unwrap();
    manager.expire_authentication_result("app", second.issuance, ExpiryReason::Unauthorized);
    let third = manager.get_or_refresh("app", &cred).await.unwrap();

    let proposed = minter.proposed.lock().unwrap().clone();
    assert_eq!(proposed.len(), 3);
    assert_eq!(proposed[0], proposed[1]);
    assert_ne!(proposed[1], proposed[2]);
    assert_eq!(third.shared_secret.key_base64(), proposed[2]);
}

/// Tokens inside the refresh window are replaced before use.
#[tokio::test(start_paused = true)]
async fn test_token_refreshes_inside_window() {
    let (minter, manager) = manager(ScriptedMinter {
        lifetime: Some(Duration::from_secs(120)),
        ..Default::default()
    });
    let cred = credential();

    manager.get_or_refresh("app", &cred).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(40)).await;
    let refreshed = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(minter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(refreshed.issuance, 2);
}

/// A failed mint propagates and leaves the entry retryable.
#[tokio::test]
async fn test_failed_mint_leaves_entry_retryable() {
    let (minter, manager) = manager(ScriptedMinter::default());
    minter.fail_next.store(true, Ordering::SeqCst);
    let cred = credential();

    let err = manager.get_or_refresh("app", &cred).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(manager.state("app"), SessionState::Uninitialized);

    let token = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(token.issuance, 1);
    assert_eq!(manager.state("app"), SessionState::Authenticated);
}

/// A non-success mint status is never cached.
#[tokio::test]
async fn test_unsuccessful_status_is_not_cached() {
    let (minter, manager) = manager(ScriptedMinter {
        status: Some(TokenStatus::Unknown),
        ..Default::default()
    });

    let err = manager.get_or_refresh("app", &credential()).await.unwrap_err();
    assert!(matches!(err, HvError::Service { .. }));
    assert_eq!(manager.state("app"), SessionState::Uninitialized);
    assert_eq!(manager.issuance("app"), Some(0));
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);
}

/// A server lifetime shorter than the refresh window still caches the token.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_short_server_lifetime_still_caches() {
    let (minter, manager) = manager(ScriptedMinter {
        lifetime: Some(Duration::from_secs(30)),
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_or_refresh("app-A", &credential()).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().issuance, 1);
    }
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);

    let cred = credential();
    for _ in 0..3 {
        let token = manager.get_or_refresh("app-A", &cred).await.unwrap();
        assert_eq!(token.issuance, 1);
    }
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);
}

/// Short-lived tokens are refreshed halfway through their lifetime.
#[tokio::test(start_paused = true)]
async fn test_short_lifetime_refreshes_at_half_life() {
    let (minter, manager) = manager(ScriptedMinter {
        lifetime: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let cred = credential();

    manager.get_or_refresh("app", &cred).await.unwrap();
    tokio::time::advance(Duration::from_secs(14)).await;
    manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(minter.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let refreshed = manager.get_or_refresh("app", &cred).await.unwrap();
    assert_eq!(refreshed.issuance, 2);
    assert_eq!(minter.calls.load(Ordering::SeqCst), 2);
}
