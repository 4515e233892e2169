//! Session token cache shared by both Salus clients.

use std::time::{Duration, Instant};

use log::{debug, info};

/// Keeps the last session token and the moment it was retrieved.
///
/// A token is reused while it is strictly younger than `max_age`. Past that
/// age the caller has to log in again and [`TokenCache::store`] the new one.
///
/// # Examples
///
/// ```no_run
/// use std::time::{Duration, Instant};
///
/// let mut cache = TokenCache::new(Duration::from_secs(600));
/// assert!(cache.get(Instant::now()).is_none());
///
/// cache.store("abcd".to_string(), Instant::now());
/// assert_eq!(cache.get(Instant::now()), Some("abcd"));
/// ```
#[derive(Debug)]
pub struct TokenCache {
    /// Last retrieved token
    token: Option<String>,
    /// When `token` was retrieved
    retrieved_at: Option<Instant>,
    /// Age after which the token is considered expired
    max_age: Duration,
}

impl TokenCache {
    pub fn new(max_age: Duration) -> Self {
        TokenCache {
            token: None,
            retrieved_at: None,
            max_age,
        }
    }

    /// Returns the cached token if it is still fresh at `now`.
    pub fn get(&self, now: Instant) -> Option<&str> {
        let (token, retrieved_at) = match (&self.token, self.retrieved_at) {
            (Some(token), Some(retrieved_at)) => (token, retrieved_at),
            _ => {
                info!("retrieving token for the first time this session");
                return None;
            }
        };

        if now.saturating_duration_since(retrieved_at) < self.max_age {
            debug!("using cached token");
            return Some(token);
        }

        info!("token has expired, getting a new one");
        None
    }

    /// Records a freshly retrieved token.
    pub fn store(&mut self, token: String, now: Instant) {
        self.token = Some(token);
        self.retrieved_at = Some(now);
    }

    /// Forgets the cached token, the next request logs in again.
    pub fn clear(&mut self) {
        self.token = None;
        self.retrieved_at = None;
    }
}
