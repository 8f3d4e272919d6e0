//! Queueing metrics: closed-form M/M/n/m results and their observed
//! counterparts derived from a finished shop's [`Stats`].
//!
//! Rates are in customers per second. For a shop whose checkouts process
//! `r` items per second and whose customers carry `k` items on average, the
//! customer service rate of one checkout is `r / k`.

use serde::Serialize;

use crate::Stats;

/// Queueing metrics of one shop configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Arrival rate (λ)
    pub lambda: f64,
    /// Service rate of a single checkout (μ)
    pub mu: f64,
    /// Offered load λ/μ (ρ)
    pub rho: f64,
    /// Probability that every checkout is idle and nobody waits
    pub free_probability: f64,
    /// Probability that an arriving customer has to wait
    pub queue_probability: f64,
    pub decline_probability: f64,
    /// Share of arrivals that get served
    pub relative_capacity: f64,
    /// Customers served per second
    pub absolute_capacity: f64,
    pub avg_queue_length: f64,
    /// Mean number of busy checkouts
    pub avg_busy_checkouts: f64,
    /// Mean time an accepted customer waits before service
    pub avg_wait_time: f64,
    /// Mean time an accepted customer spends in the shop
    pub avg_alive_time: f64,
}

/// M/M/n/m results for `checkouts` servers and `queue_length` waiting places
///
/// # Panics
///
/// Panics if `checkouts` is zero or a rate is not positive.
pub fn theoretical(
    arrival_rate: f64,
    service_rate: f64,
    checkouts: usize,
    queue_length: usize,
) -> Metrics {
    assert!(checkouts > 0, "need at least one checkout");
    assert!(arrival_rate > 0.0 && service_rate > 0.0, "rates must be positive");

    let rho = arrival_rate / service_rate;
    let chi = rho / checkouts as f64;

    // Σ ρ^k / k! for k = 0..=n, ending with ρ^n / n!
    let mut rho_n = 1.0;
    let mut head = 1.0;
    for k in 1..=checkouts {
        rho_n *= rho / k as f64;
        head += rho_n;
    }

    let chi_pow = |s: usize| chi.powi(s as i32);
    let tail: f64 = (1..=queue_length).map(chi_pow).sum();
    let free_probability = 1.0 / (head + rho_n * tail);

    let decline_probability = rho_n * chi_pow(queue_length) * free_probability;
    let queue_probability = rho_n * (0..queue_length).map(chi_pow).sum::<f64>() * free_probability;
    let avg_queue_length = rho_n
        * (1..=queue_length).map(|s| s as f64 * chi_pow(s)).sum::<f64>()
        * free_probability;

    let relative_capacity = 1.0 - decline_probability;
    let absolute_capacity = arrival_rate * relative_capacity;
    let avg_wait_time = avg_queue_length / absolute_capacity;

    Metrics {
        lambda: arrival_rate,
        mu: service_rate,
        rho,
        free_probability,
        queue_probability,
        decline_probability,
        relative_capacity,
        absolute_capacity,
        avg_queue_length,
        avg_busy_checkouts: absolute_capacity / service_rate,
        avg_wait_time,
        avg_alive_time: avg_wait_time + 1.0 / service_rate,
    }
}

/// Metrics measured on a closed shop
///
/// Returns `None` until the shop has been open for a while, served somebody
/// and recorded busy time.
pub fn observed(stats: &Stats) -> Option<Metrics> {
    let open = stats.total_open_time.as_secs_f64();
    let busy = stats.total_busy_time().as_secs_f64();
    if open <= 0.0 || busy <= 0.0 || stats.accepted_count == 0 || stats.served_count == 0 {
        return None;
    }
    let checkouts = stats.checkout_busy_times.len();

    let lambda = stats.offered() as f64 / open;
    let mu = stats.served_count as f64 / busy;
    let decline_probability = stats.decline_probability()?;
    let relative_capacity = 1.0 - decline_probability;
    let absolute_capacity = stats.accepted_count as f64 / open;
    let avg_queue_length = stats.avg_queue_length().unwrap_or(0.0);
    let avg_alive_time = stats.avg_alive_time()?;
    let avg_wait_time = avg_queue_length / absolute_capacity;

    // treats the checkouts as independent, good enough for a sanity check
    let idle_share = 1.0 - stats.avg_utilization()?;
    let free_probability = idle_share.max(0.0).powi(checkouts as i32);

    Some(Metrics {
        lambda,
        mu,
        rho: lambda / mu,
        free_probability,
        queue_probability: stats.queue_probability().unwrap_or(0.0),
        decline_probability,
        relative_capacity,
        absolute_capacity,
        avg_queue_length,
        avg_busy_checkouts: busy / open,
        avg_wait_time,
        avg_alive_time,
    })
}
