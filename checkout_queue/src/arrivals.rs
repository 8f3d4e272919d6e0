//! Load generator offering customers to a shop
//!
//! Interarrival times are exponential with the configured arrival rate, so
//! arrivals form a Poisson stream. Item counts are uniform on
//! `[1, 2 * avg_items - 1]`, which keeps the mean at `avg_items`.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use rand::SeedableRng;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::Exp;

use crate::{Admission, ArrivalConfig, Customer, Shop, ShopError, validate_rate};

pub struct ArrivalProcess {
    interarrival: Exp<f64>,
    items: Uniform<usize>,
    rng: StdRng,
}

impl ArrivalProcess {
    /// Create an arrival process
    ///
    /// # Arguments
    ///
    /// * `arrival_rate` - Customers per second
    /// * `avg_items` - Mean items per customer, at least 1
    /// * `seed` - Fixed seed for reproducible runs, `None` for OS entropy
    pub fn new(
        arrival_rate: f64,
        avg_items: usize,
        seed: Option<u64>,
    ) -> Result<ArrivalProcess, ShopError> {
        let arrival_rate = validate_rate(arrival_rate, ShopError::InvalidArrivalRate)?;
        // the mean interval must fit in a Duration
        Duration::try_from_secs_f64(1.0 / arrival_rate)
            .map_err(|_| ShopError::InvalidArrivalRate(arrival_rate))?;
        if avg_items == 0 {
            return Err(ShopError::InvalidAverageItems);
        }
        let interarrival =
            Exp::new(arrival_rate).map_err(|_| ShopError::InvalidArrivalRate(arrival_rate))?;
        let items = Uniform::new_inclusive(1, 2 * avg_items - 1)
            .map_err(|_| ShopError::InvalidAverageItems)?;
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Ok(ArrivalProcess {
            interarrival,
            items,
            rng,
        })
    }

    pub fn from_config(config: &ArrivalConfig) -> Result<ArrivalProcess, ShopError> {
        ArrivalProcess::new(config.arrival_rate, config.avg_items, config.seed)
    }

    pub fn draw_items(&mut self) -> usize {
        self.items.sample(&mut self.rng)
    }

    /// Exponential interval, saturating at `Duration::MAX` in the far tail
    pub fn draw_interval(&mut self) -> Duration {
        Duration::try_from_secs_f64(self.interarrival.sample(&mut self.rng))
            .unwrap_or(Duration::MAX)
    }

    pub fn next_customer(&mut self) -> Customer {
        Customer::new(self.draw_items())
    }

    /// Offer `count` customers to `shop`, sleeping a drawn interval after each
    ///
    /// Runs on the calling thread and returns once the last customer has
    /// been offered and its interval has elapsed.
    pub fn run(&mut self, shop: &Shop, count: usize) -> ArrivalSummary {
        let started = Instant::now();
        let mut summary = ArrivalSummary::default();
        for _ in 0..count {
            let customer = self.next_customer();
            summary.total_items += customer.items_count();
            match shop.customer_come(customer) {
                Admission::Accepted => summary.accepted += 1,
                Admission::Declined => summary.declined += 1,
            }
            summary.offered += 1;
            thread::sleep(self.draw_interval());
        }
        summary.elapsed = started.elapsed();
        debug!(
            "offered {} customers in {:?}, {} declined",
            summary.offered, summary.elapsed, summary.declined
        );
        summary
    }
}

/// What the arrival process saw while feeding a shop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrivalSummary {
    pub offered: usize,
    pub accepted: usize,
    pub declined: usize,
    pub total_items: usize,
    pub elapsed: Duration,
}

impl ArrivalSummary {
    pub fn avg_items(&self) -> Option<f64> {
        match self.offered {
            0 => None,
            offered => Some(self.total_items as f64 / offered as f64),
        }
    }
}

/// Feed `count` unseeded customers into `shop`
pub fn spawn_customers(
    shop: &Shop,
    count: usize,
    arrival_rate: f64,
    avg_items: usize,
) -> Result<ArrivalSummary, ShopError> {
    let mut arrivals = ArrivalProcess::new(arrival_rate, avg_items, None)?;
    Ok(arrivals.run(shop, count))
}
