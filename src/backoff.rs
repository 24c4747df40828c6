// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded exponential backoff.
//!
//! A [`Backoff`] is created per retry loop and consumed attempt by attempt:
//! each call to [`Backoff::backoff`] either sleeps and lets the caller retry,
//! or reports that the retry budget is exhausted.

use std::time::Duration;

use log::debug;
use log::warn;
use rand::Rng;

use crate::errors::ScanError;

/// How a computed exponential delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Jitter {
    /// Sleep exactly `min(cap, base * 2^attempt)`.
    #[default]
    None,
    /// Sleep a random duration in `[0, delay]`.
    Full,
    /// Sleep `delay / 2` plus a random duration in `[0, delay / 2]`.
    Equal,
    /// Sleep a random duration in `[base, last * 3]`, capped.
    Decorrelated,
}

/// Tuning of one retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_retries: u32,
    pub jitter: Jitter,
}

impl BackoffConfig {
    pub const fn new(base_ms: u64, cap_ms: u64, max_retries: u32, jitter: Jitter) -> Self {
        Self {
            base_ms,
            cap_ms,
            max_retries,
            jitter,
        }
    }

    /// Policy for waiting on another transaction's lock to be committed or rolled back.
    pub const fn txn_lock() -> Self {
        Self::new(100, 3000, 100, Jitter::Equal)
    }

    /// Policy for retrying a request whose range routing turned out stale.
    pub const fn range_miss() -> Self {
        Self::new(100, 500, 5, Jitter::None)
    }

    /// Retries without sleeping. Useful in tests.
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(0, 0, max_retries, Jitter::None)
    }
}

/// Stateful bounded retry generator.
///
/// Two `Backoff`s never share state: the cursor holds one per retry loop.
#[derive(Debug)]
pub struct Backoff {
    name: &'static str,
    config: BackoffConfig,
    attempts: u32,
    last_sleep_ms: u64,
}

impl Backoff {
    pub fn new(name: &'static str, config: BackoffConfig) -> Self {
        Self {
            name,
            config,
            attempts: 0,
            last_sleep_ms: config.base_ms,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of sleeps performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_retries
    }

    /// Sleep before the next attempt, or fail with [`ScanError::Retryable`] if
    /// the retry budget is used up.
    pub async fn backoff(&mut self) -> Result<(), ScanError> {
        if self.is_exhausted() {
            warn!(
                "backoff {}: still fail after {} retries",
                self.name, self.config.max_retries
            );
            return Err(ScanError::retryable(format!(
                "{}: still fail after {} retries",
                self.name, self.config.max_retries
            )));
        }

        let sleep_ms = self.next_sleep_ms();
        debug!(
            "backoff {}: attempt {}, sleep {}ms",
            self.name, self.attempts, sleep_ms
        );

        self.attempts += 1;
        self.last_sleep_ms = sleep_ms;

        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        Ok(())
    }

    fn next_sleep_ms(&self) -> u64 {
        let BackoffConfig { base_ms, cap_ms, .. } = self.config;
        let delay = expo(base_ms, cap_ms, self.attempts);

        match self.config.jitter {
            Jitter::None => delay,
            Jitter::Full => rand::thread_rng().gen_range(0..=delay),
            Jitter::Equal => delay / 2 + rand::thread_rng().gen_range(0..=delay / 2),
            Jitter::Decorrelated => {
                let spread = self.last_sleep_ms.saturating_mul(3).saturating_sub(base_ms);
                let sleep = base_ms.saturating_add(rand::thread_rng().gen_range(0..=spread));
                sleep.min(cap_ms)
            }
        }
    }
}

/// `min(cap, base * 2^attempt)`, saturating.
fn expo(base: u64, cap: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base.saturating_mul(factor).min(cap)
}
