//! Retry and rate-limit governance for remote host calls.
//!
//! Every remote operation in a sync run goes through one [`Governor`]
//! instead of carrying its own retry loop. The governor applies a bounded,
//! policy-driven backoff to transient failures, enforces a per-attempt
//! timeout, and turns a rate-limit signal into a pool-wide pause: all
//! workers await the shared gate before issuing further remote calls, so a
//! single throttled response quiets the whole pool instead of one file
//! hammering the host.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::time::{Duration, Instant, sleep, timeout};

use crate::{config::Config, error::HostError};

/// Shape of the delay between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
   Fixed,
   Exponential,
}

/// Retry policy applied uniformly to every remote call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
   pub max_attempts:        u32,
   pub base_delay:          Duration,
   pub max_delay:           Duration,
   pub backoff:             Backoff,
   pub attempt_timeout:     Duration,
   pub rate_limit_wait:     Duration,
   pub pause_on_rate_limit: bool,
}

impl RetryPolicy {
   pub fn from_config(cfg: &Config) -> Self {
      Self {
         max_attempts:        cfg.effective_max_retries().max(1),
         base_delay:          Duration::from_millis(cfg.retry_base_delay_ms),
         max_delay:           Duration::from_millis(cfg.retry_max_delay_ms),
         backoff:             Backoff::Exponential,
         attempt_timeout:     Duration::from_millis(cfg.fetch_timeout_ms),
         rate_limit_wait:     Duration::from_millis(cfg.rate_limit_wait_ms),
         pause_on_rate_limit: cfg.pause_on_rate_limit,
      }
   }

   /// Delay before the given (1-based) retry attempt.
   fn delay_for(&self, attempt: u32) -> Duration {
      let delay = match self.backoff {
         Backoff::Fixed => self.base_delay,
         Backoff::Exponential => {
            let shift = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1u32 << shift)
         },
      };
      delay.min(self.max_delay)
   }
}

/// Governs retries and the shared rate-limit pause for a worker pool
pub struct Governor {
   policy:           RetryPolicy,
   pause_until:      Mutex<Option<Instant>>,
   retries:          AtomicUsize,
   rate_limit_waits: AtomicUsize,
}

impl Governor {
   pub fn new(policy: RetryPolicy) -> Self {
      Self {
         policy,
         pause_until: Mutex::new(None),
         retries: AtomicUsize::new(0),
         rate_limit_waits: AtomicUsize::new(0),
      }
   }

   pub const fn policy(&self) -> &RetryPolicy {
      &self.policy
   }

   /// Total retry attempts observed across the pool.
   pub fn retries_observed(&self) -> usize {
      self.retries.load(Ordering::Relaxed)
   }

   /// Number of pool-wide rate-limit pauses triggered.
   pub fn rate_limit_waits(&self) -> usize {
      self.rate_limit_waits.load(Ordering::Relaxed)
   }

   /// Whether the pool is currently paused by a rate-limit signal.
   pub fn is_paused(&self) -> bool {
      self
         .pause_until
         .lock()
         .is_some_and(|until| until > Instant::now())
   }

   /// Blocks until the shared pause gate is open.
   ///
   /// Called before every remote attempt, including the first one, so every
   /// worker observes a pause triggered by any other worker.
   pub async fn ready(&self) {
      loop {
         let remaining = {
            let mut guard = self.pause_until.lock();
            match *guard {
               Some(until) if until > Instant::now() => Some(until - Instant::now()),
               Some(_) => {
                  *guard = None;
                  None
               },
               None => None,
            }
         };
         match remaining {
            Some(wait) => sleep(wait).await,
            None => return,
         }
      }
   }

   /// Pauses all in-flight work for `wait`. Extends an existing pause only
   /// if the new deadline is later.
   fn pause_all(&self, wait: Duration) {
      let until = Instant::now() + wait;
      let mut guard = self.pause_until.lock();
      if guard.is_none_or(|existing| existing < until) {
         *guard = Some(until);
      }
   }

   /// Runs a remote operation under the retry policy.
   ///
   /// - `Transient`/`Timeout`/`Http` errors retry with backoff up to the
   ///   attempt limit, then surface the last error.
   /// - `RateLimited` pauses the whole pool for the host-suggested or
   ///   configured wait, then retries.
   /// - `Auth` and `NotFound` are returned immediately: retrying cannot
   ///   succeed.
   pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, HostError>
   where
      F: FnMut() -> Fut,
      Fut: Future<Output = Result<T, HostError>>,
   {
      let mut attempt = 0u32;

      loop {
         self.ready().await;
         attempt += 1;

         let result = match timeout(self.policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout(self.policy.attempt_timeout.as_millis() as u64)),
         };

         let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
         };

         if err.is_run_fatal() || !err.is_retryable() {
            return Err(err);
         }

         if let HostError::RateLimited { retry_after_secs } = &err {
            if self.policy.pause_on_rate_limit {
               let wait = retry_after_secs
                  .map(Duration::from_secs)
                  .unwrap_or(self.policy.rate_limit_wait)
                  .min(self.policy.rate_limit_wait.max(self.policy.max_delay));
               tracing::warn!(
                  op = op_name,
                  wait_ms = wait.as_millis() as u64,
                  "rate limit hit, pausing all workers"
               );
               self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
               self.pause_all(wait);
            }
         }

         if attempt >= self.policy.max_attempts {
            tracing::warn!(op = op_name, attempts = attempt, error = %err, "retries exhausted");
            return Err(err);
         }

         self.retries.fetch_add(1, Ordering::Relaxed);
         let delay = self.policy.delay_for(attempt);
         tracing::debug!(
            op = op_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
         );
         sleep(delay).await;
      }
   }
}
