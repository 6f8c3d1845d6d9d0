//! Produces a usable access token: verify, then refresh, then clear.

use crate::api::errors::Result as ApiResult;
use crate::session::store::{Session, SessionStore, Token};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tokens minted by a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: Token,
    /// Present when the server rotates the refresh token.
    pub refresh: Option<Token>,
}

/// The verify and refresh endpoints the validator depends on.
#[async_trait]
pub trait TokenEndpoints: Send + Sync {
    async fn verify(&self, access: &Token) -> ApiResult<()>;
    async fn refresh(&self, refresh: &Token) -> ApiResult<TokenPair>;
}

type Flight = Shared<BoxFuture<'static, Option<Token>>>;

struct InFlight {
    epoch: u64,
    flight: Flight,
}

struct Verified {
    token: Token,
    at: Instant,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    endpoints: Arc<dyn TokenEndpoints>,
    verify_ttl: Duration,
    verified: Mutex<Option<Verified>>,
    /// Bumped by every login and logout. Writes from a validation that
    /// started under an older epoch are dropped.
    epoch: Mutex<u64>,
    in_flight: tokio::sync::Mutex<Option<InFlight>>,
}

/// Owns the verify → refresh → clear protocol over an injected session store.
///
/// Concurrent callers share one in-flight validation, so a rotating refresh
/// token is never presented twice.
#[derive(Clone)]
pub struct TokenValidator {
    inner: Arc<Inner>,
}

impl TokenValidator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        endpoints: Arc<dyn TokenEndpoints>,
        verify_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                endpoints,
                verify_ttl,
                verified: Mutex::new(None),
                epoch: Mutex::new(0),
                in_flight: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Returns a currently usable access token, or `None` when unauthenticated.
    pub async fn usable_access_token(&self) -> Option<Token> {
        let flight = {
            let mut slot = self.inner.in_flight.lock().await;
            let epoch = self.inner.current_epoch();
            match slot.as_ref().filter(|current| current.epoch == epoch) {
                Some(current) => current.flight.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let flight = async move { inner.validate(epoch).await }.boxed().shared();
                    *slot = Some(InFlight {
                        epoch,
                        flight: flight.clone(),
                    });
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        let mut slot = self.inner.in_flight.lock().await;
        if slot
            .as_ref()
            .is_some_and(|current| Shared::ptr_eq(&current.flight, &flight))
        {
            *slot = None;
        }

        outcome
    }

    /// True when an access token is stored. Makes no network call.
    pub fn has_session(&self) -> bool {
        self.inner
            .load()
            .is_some_and(|session| session.access.is_some())
    }

    /// Forgets the last successful verify so the next call re-verifies.
    pub fn invalidate(&self) {
        *self.inner.verified() = None;
    }

    /// Stores a freshly issued token pair from an explicit login.
    pub fn begin_session(&self, access: Token, refresh: Token) {
        {
            let mut epoch = self.inner.epoch();
            *epoch += 1;
            self.inner.save(&Session::pair(access.clone(), refresh));
            self.inner.mark_verified(access);
        }
        self.inner.forget_flight();
        info!("session established");
    }

    /// Clears both stored tokens from an explicit logout. A validation still
    /// in flight can no longer write the session back.
    pub fn end_session(&self) {
        {
            let mut epoch = self.inner.epoch();
            *epoch += 1;
            self.invalidate();
            self.inner.save(&Session::empty());
        }
        self.inner.forget_flight();
        info!("session cleared");
    }

    /// Current stored refresh token, used by logout to revoke it.
    pub fn refresh_token(&self) -> Option<Token> {
        self.inner.load().and_then(|session| session.refresh)
    }
}

impl Inner {
    async fn validate(&self, epoch: u64) -> Option<Token> {
        let session = self.load()?;
        let access = session.access?;

        if self.recently_verified(&access) {
            return Some(access);
        }

        match self.endpoints.verify(&access).await {
            Ok(()) => {
                return self.commit(epoch, |inner| {
                    inner.mark_verified(access.clone());
                    access
                });
            }
            Err(error) if error.is_unavailable() => {
                warn!(%error, "token verify unreachable; continuing anonymously");
                return None;
            }
            Err(error) => warn!(%error, "access token rejected"),
        }

        let Some(refresh) = session.refresh else {
            self.commit(epoch, |inner| inner.save(&Session::empty()));
            return None;
        };

        match self.endpoints.refresh(&refresh).await {
            Ok(pair) => {
                let rotated = pair.refresh.unwrap_or(refresh);
                let access = self.commit(epoch, |inner| {
                    inner.save(&Session::pair(pair.access.clone(), rotated));
                    inner.mark_verified(pair.access.clone());
                    pair.access
                })?;
                info!("access token refreshed");
                Some(access)
            }
            Err(error) if error.is_unavailable() => {
                warn!(%error, "token refresh unreachable; keeping stored tokens");
                None
            }
            Err(error) => {
                warn!(%error, "token refresh rejected; clearing session");
                self.commit(epoch, |inner| {
                    *inner.verified() = None;
                    inner.save(&Session::empty());
                });
                None
            }
        }
    }

    /// Runs `write` only if no login or logout happened since `epoch`. The
    /// epoch lock is held for the duration so the check and the write are
    /// atomic with respect to `begin_session` and `end_session`.
    fn commit<T>(&self, epoch: u64, write: impl FnOnce(&Self) -> T) -> Option<T> {
        let current = self.epoch();
        if *current != epoch {
            debug!("session changed while validating; dropping result");
            return None;
        }
        Some(write(self))
    }

    fn current_epoch(&self) -> u64 {
        *self.epoch()
    }

    fn epoch(&self) -> std::sync::MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detaches any in-flight validation so later callers start fresh.
    fn forget_flight(&self) {
        if let Ok(mut slot) = self.in_flight.try_lock() {
            *slot = None;
        }
    }

    fn recently_verified(&self, access: &Token) -> bool {
        self.verified()
            .as_ref()
            .is_some_and(|entry| entry.token == *access && entry.at.elapsed() < self.verify_ttl)
    }

    fn mark_verified(&self, token: Token) {
        *self.verified() = Some(Verified {
            token,
            at: Instant::now(),
        });
    }

    fn verified(&self) -> std::sync::MutexGuard<'_, Option<Verified>> {
        self.verified.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Option<Session> {
        match self.store.load() {
            Ok(session) => Some(session),
            Err(error) => {
                warn!(%error, "failed to load session; treating as signed out");
                None
            }
        }
    }

    fn save(&self, session: &Session) {
        if let Err(error) = self.store.save(session) {
            warn!(%error, "failed to persist session");
        }
    }
}
