//! Rotating pool of API tokens.
//!
//! Every token starts untried. Quota readings come back from the API after
//! each call and are fed in through [`CredentialPool::observe`]; selection
//! then sticks with the current token until it drops below the low-water
//! mark.

use beacon_core::secrets::SecretValue;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Quota reading taken from API response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u32,
    pub limit: Option<u32>,
    /// When the quota window resets.
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimit {
    pub fn remaining(remaining: u32) -> Self {
        Self {
            remaining,
            limit: None,
            reset: None,
        }
    }

    /// An exhausted reading, used when the API rejects a call for rate limiting.
    pub fn exhausted() -> Self {
        Self::remaining(0)
    }
}

/// A token picked for one outward call.
#[derive(Debug, Clone)]
pub struct Credential {
    pub index: usize,
    pub token: SecretValue,
}

#[derive(Debug)]
struct TokenState {
    token: SecretValue,
    /// `None` until the first response for this token is observed.
    quota: Option<RateLimit>,
}

impl TokenState {
    /// Remaining quota, treating a passed reset time as a fresh window.
    fn remaining(&self, now: DateTime<Utc>) -> Option<u32> {
        let quota = self.quota?;
        match quota.reset {
            Some(reset) if reset <= now => None,
            _ => Some(quota.remaining),
        }
    }

    fn is_usable(&self, low_water: u32, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_none_or(|remaining| remaining >= low_water)
    }
}

#[derive(Debug)]
struct PoolState {
    tokens: Vec<TokenState>,
    current: usize,
}

/// Ordered set of interchangeable tokens for one outward API.
#[derive(Debug)]
pub struct CredentialPool {
    low_water: u32,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<SecretValue>, low_water: u32) -> Self {
        Self {
            low_water,
            state: Mutex::new(PoolState {
                tokens: tokens
                    .into_iter()
                    .map(|token| TokenState { token, quota: None })
                    .collect(),
                current: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn low_water(&self) -> u32 {
        self.low_water
    }

    /// Pick the token for the next call.
    ///
    /// The current token is kept while it is untried or at or above the
    /// low-water mark. Otherwise the next usable token in pool order takes
    /// over. When every token is below the mark, the one with the most
    /// remaining quota is used and a warning is logged. Returns `None` only
    /// for an empty pool.
    pub fn select(&self) -> Option<Credential> {
        let now = Utc::now();
        let mut state = self.lock();
        let count = state.tokens.len();
        if count == 0 {
            return None;
        }

        let current = state.current;
        if state.tokens[current].is_usable(self.low_water, now) {
            return Some(state.credential(current));
        }

        let next = (1..count)
            .map(|offset| (current + offset) % count)
            .find(|&i| state.tokens[i].is_usable(self.low_water, now));

        let chosen = match next {
            Some(index) => {
                info!(
                    from = current,
                    to = index,
                    low_water = self.low_water,
                    "Rotating API credential"
                );
                index
            }
            None => {
                let (index, remaining) = state
                    .tokens
                    .iter()
                    .enumerate()
                    .filter_map(|(i, t)| t.remaining(now).map(|remaining| (i, remaining)))
                    .max_by_key(|&(i, remaining)| (remaining, std::cmp::Reverse(i)))
                    .unwrap_or((current, 0));
                warn!(
                    index,
                    remaining,
                    low_water = self.low_water,
                    "All API credentials are below the low-water mark"
                );
                index
            }
        };

        state.current = chosen;
        Some(state.credential(chosen))
    }

    /// Record the quota reported for the token at `index`.
    pub fn observe(&self, index: usize, limit: RateLimit) {
        let mut state = self.lock();
        if let Some(token) = state.tokens.get_mut(index) {
            token.quota = Some(limit);
        }
    }

    /// Last observed remaining quota of the token at `index`.
    pub fn remaining(&self, index: usize) -> Option<u32> {
        let now = Utc::now();
        self.lock().tokens.get(index).and_then(|t| t.remaining(now))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PoolState {
    fn credential(&self, index: usize) -> Credential {
        Credential {
            index,
            token: self.tokens[index].token.clone(),
        }
    }
}
