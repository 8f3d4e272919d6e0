//! Multi-server checkout queue simulated with real threads.
//!
//! A [`Shop`] owns a bounded waiting line, a fixed set of [`Checkout`]s and a
//! dispatcher thread pairing waiting customers with idle checkouts. Every
//! checkout runs its own service loop, consuming items at a fixed rate in
//! wall-clock time. The shop accumulates [`Stats`] that are compared against
//! the closed-form M/M/n/m results in [`analysis`].
//!
//! Key pieces:
//! - Shop: admission control, dispatcher, two-phase close
//! - Checkout: per-server service loop and direct-injection hook
//! - ArrivalProcess: load generator offering customers to a shop
//! - analysis: theoretical and observed queueing metrics

use std::time::{Duration, Instant};

use serde::Serialize;

pub mod analysis;
pub mod arrivals;
pub mod checkout;
pub mod config;
pub mod shop;

pub use arrivals::{ArrivalProcess, ArrivalSummary, spawn_customers};
pub use checkout::Checkout;
pub use config::{ArrivalConfig, ExperimentConfig, ShopConfig};
pub use shop::{Admission, Shop};

/// A customer waiting to be served
///
/// Immutable once created. `born_at` marks the arrival at the shop door and
/// is the origin of the customer's sojourn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Customer {
    items_count: usize,
    born_at: Instant,
}

impl Customer {
    /// Create a customer arriving now
    ///
    /// # Panics
    ///
    /// Panics if `items_count` is zero.
    pub fn new(items_count: usize) -> Customer {
        Customer::born_at(items_count, Instant::now())
    }

    /// Create a customer with an explicit arrival instant
    ///
    /// # Panics
    ///
    /// Panics if `items_count` is zero.
    pub fn born_at(items_count: usize, born_at: Instant) -> Customer {
        assert!(items_count > 0, "a customer must carry at least one item");
        Customer {
            items_count,
            born_at,
        }
    }

    pub fn items_count(&self) -> usize {
        self.items_count
    }

    pub fn arrived_at(&self) -> Instant {
        self.born_at
    }
}

/// Shop-wide measurements
///
/// Only mutated while the shop floor lock is held; [`Shop::stats`] hands out
/// a consistent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Customers admitted to the waiting line
    pub accepted_count: usize,
    /// Customers turned away at the door
    pub declined_count: usize,
    /// Completed service bursts
    pub served_count: usize,
    /// Busy time per checkout, indexed by checkout id
    pub checkout_busy_times: Vec<Duration>,
    /// Sum over served customers of waiting time plus service time
    pub total_alive_time: Duration,
    /// Time between opening and closing the shop
    pub total_open_time: Duration,
    /// Sum of sampled waiting-line lengths
    pub queue_length_sum: u64,
    /// Number of waiting-line samples taken
    pub queue_length_samples: u64,
    /// Samples in which at least one customer was waiting
    pub queue_nonempty_samples: u64,
}

impl Stats {
    pub(crate) fn with_checkouts(checkouts: usize) -> Stats {
        Stats {
            checkout_busy_times: vec![Duration::ZERO; checkouts],
            ..Stats::default()
        }
    }

    pub(crate) fn sample_queue(&mut self, length: usize) {
        self.queue_length_sum += length as u64;
        self.queue_length_samples += 1;
        if length > 0 {
            self.queue_nonempty_samples += 1;
        }
    }

    pub(crate) fn record_wait(&mut self, wait: Duration) {
        self.total_alive_time += wait;
    }

    pub(crate) fn record_burst(&mut self, checkout_id: usize, busy: Duration) {
        self.checkout_busy_times[checkout_id] += busy;
        self.total_alive_time += busy;
        self.served_count += 1;
    }

    /// Customers that reached the door, accepted or not
    pub fn offered(&self) -> usize {
        self.accepted_count + self.declined_count
    }

    pub fn decline_probability(&self) -> Option<f64> {
        match self.offered() {
            0 => None,
            offered => Some(self.declined_count as f64 / offered as f64),
        }
    }

    /// Mean of the sampled waiting-line length
    pub fn avg_queue_length(&self) -> Option<f64> {
        match self.queue_length_samples {
            0 => None,
            samples => Some(self.queue_length_sum as f64 / samples as f64),
        }
    }

    /// Fraction of samples in which somebody was waiting
    pub fn queue_probability(&self) -> Option<f64> {
        match self.queue_length_samples {
            0 => None,
            samples => Some(self.queue_nonempty_samples as f64 / samples as f64),
        }
    }

    /// Mean sojourn time of an accepted customer, in seconds
    pub fn avg_alive_time(&self) -> Option<f64> {
        match self.accepted_count {
            0 => None,
            accepted => Some(self.total_alive_time.as_secs_f64() / accepted as f64),
        }
    }

    pub fn total_busy_time(&self) -> Duration {
        self.checkout_busy_times.iter().sum()
    }

    /// Share of the opening time that checkout `id` spent serving
    pub fn utilization(&self, id: usize) -> Option<f64> {
        let busy = self.checkout_busy_times.get(id)?;
        if self.total_open_time.is_zero() {
            return None;
        }
        Some(busy.as_secs_f64() / self.total_open_time.as_secs_f64())
    }

    pub fn avg_utilization(&self) -> Option<f64> {
        let checkouts = self.checkout_busy_times.len();
        if checkouts == 0 || self.total_open_time.is_zero() {
            return None;
        }
        let busy = self.total_busy_time().as_secs_f64() / checkouts as f64;
        Some(busy / self.total_open_time.as_secs_f64())
    }
}

/// Errors surfaced to callers of the simulation API
#[derive(Debug, thiserror::Error)]
pub enum ShopError {
    #[error("a shop needs at least one checkout")]
    NoCheckouts,
    #[error("service rate must be a positive finite number, got {0}")]
    InvalidServiceRate(f64),
    #[error("arrival rate must be a positive finite number, got {0}")]
    InvalidArrivalRate(f64),
    #[error("average item count must be at least 1")]
    InvalidAverageItems,
    #[error("cannot assign zero items to checkout {id}")]
    ZeroItems { id: usize },
    #[error("checkout {id} is already serving a customer")]
    CheckoutBusy { id: usize },
    #[error("checkout {id} is closed")]
    CheckoutClosed { id: usize },
    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub(crate) fn validate_rate(rate: f64, err: fn(f64) -> ShopError) -> Result<f64, ShopError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(err(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_is_stamped_on_creation() {
        let before = Instant::now();
        let customer = Customer::new(5);
        let after = Instant::now();

        assert_eq!(customer.items_count(), 5);
        assert!(customer.arrived_at() >= before);
        assert!(customer.arrived_at() <= after);
    }

    #[test]
    #[should_panic(expected = "at least one item")]
    fn customer_without_items_panics() {
        Customer::new(0);
    }

    #[test]
    fn fresh_stats_are_empty() {
        let stats = Stats::default();

        assert_eq!(stats.accepted_count, 0);
        assert_eq!(stats.declined_count, 0);
        assert_eq!(stats.queue_length_sum, 0);
        assert_eq!(stats.queue_length_samples, 0);
        assert_eq!(stats.total_open_time, Duration::ZERO);
        assert_eq!(stats.total_alive_time, Duration::ZERO);
        assert!(stats.checkout_busy_times.is_empty());
        assert_eq!(stats.decline_probability(), None);
        assert_eq!(stats.avg_queue_length(), None);
        assert_eq!(stats.avg_alive_time(), None);
    }

    #[test]
    fn queue_samples_track_mean_and_nonempty_share() {
        let mut stats = Stats::with_checkouts(1);
        for length in [0, 2, 0, 4] {
            stats.sample_queue(length);
        }

        assert_eq!(stats.avg_queue_length(), Some(1.5));
        assert_eq!(stats.queue_probability(), Some(0.5));
    }

    #[test]
    fn bursts_feed_busy_and_alive_time() {
        let mut stats = Stats::with_checkouts(2);
        stats.accepted_count = 2;
        stats.record_wait(Duration::from_millis(500));
        stats.record_burst(1, Duration::from_secs(2));
        stats.record_burst(1, Duration::from_secs(1));
        stats.total_open_time = Duration::from_secs(6);

        assert_eq!(stats.checkout_busy_times[0], Duration::ZERO);
        assert_eq!(stats.checkout_busy_times[1], Duration::from_secs(3));
        assert_eq!(stats.served_count, 2);
        assert_eq!(stats.avg_alive_time(), Some(1.75));
        assert_eq!(stats.utilization(1), Some(0.5));
        assert_eq!(stats.avg_utilization(), Some(0.25));
        assert_eq!(stats.utilization(2), None);
    }

    #[test]
    fn rates_must_be_positive_and_finite() {
        assert!(validate_rate(1.5, ShopError::InvalidServiceRate).is_ok());
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                validate_rate(bad, ShopError::InvalidServiceRate),
                Err(ShopError::InvalidServiceRate(_))
            ));
        }
    }
}
