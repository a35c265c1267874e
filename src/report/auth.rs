use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ReportError;

/// Token returned by the auth collaborator.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Expiry hint; the cache falls back to its default lifetime when absent.
    pub expires_in: Option<Duration>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Bearer token cache with a single-writer refresh.
///
/// The lock is held across a refresh, so concurrent callers wait for the
/// new token instead of authenticating in parallel.
#[derive(Debug)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
    margin: Duration,
    default_ttl: Duration,
}

impl TokenCache {
    pub fn new(margin: Duration, default_ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            margin,
            default_ttl,
        }
    }

    /// Cached token, or a fresh one from `refresh` if absent or within the margin of expiry.
    pub fn get_or_refresh<F>(&self, refresh: F) -> Result<String, ReportError>
    where
        F: FnOnce() -> Result<AccessToken, ReportError>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > now + self.margin {
                return Ok(cached.token.clone());
            }
        }

        debug!("refreshing reporting token");
        let fresh = refresh()?;
        let ttl = fresh.expires_in.unwrap_or(self.default_ttl);
        *slot = Some(CachedToken {
            token: fresh.token.clone(),
            expires_at: now + ttl,
        });
        Ok(fresh.token)
    }

    /// Drops the cached token, e.g. after the service rejected it.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    pub fn is_cached(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}
