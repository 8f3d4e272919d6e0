//! The shop: bounded waiting line, idle registry and dispatcher
//!
//! All shop-wide state (waiting customers, idle checkouts, statistics and
//! the open flag) lives in one [`FloorState`] behind a single lock. Paths
//! that also touch a checkout counter take the floor lock first and the
//! checkout lock second.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::prelude::*;

use crate::checkout::{Checkout, Till};
use crate::{Customer, ShopConfig, ShopError, Stats, validate_rate};

/// How long the dispatcher sleeps between queue samples when idle
const SAMPLE_TICK: Duration = Duration::from_millis(1);

/// Outcome of offering a customer to the shop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Declined,
}

pub(crate) struct FloorState {
    open: bool,
    waiting: VecDeque<Customer>,
    idle: VecDeque<usize>,
    retired: Vec<bool>,
    stats: Stats,
}

impl FloorState {
    fn new(checkouts: usize) -> FloorState {
        FloorState {
            open: true,
            waiting: VecDeque::new(),
            idle: (0..checkouts).collect(),
            retired: vec![false; checkouts],
            stats: Stats::with_checkouts(checkouts),
        }
    }

    /// Nobody waiting and every checkout either idle or closed
    fn is_drained(&self) -> bool {
        let retired = self.retired.iter().filter(|r| **r).count();
        self.waiting.is_empty() && self.idle.len() + retired == self.retired.len()
    }

    fn all_retired(&self) -> bool {
        self.retired.iter().all(|r| *r)
    }

    /// Room for one more customer, and somebody left to serve them
    fn has_room(&self, max_queue_length: usize) -> bool {
        !self.all_retired() && self.waiting.len() < self.idle.len() + max_queue_length
    }

    /// A checkout may leave an open shop only if another one can take the line
    pub(crate) fn can_retire(&self, id: usize) -> bool {
        !self.open
            || self.waiting.is_empty()
            || self
                .retired
                .iter()
                .enumerate()
                .any(|(other, retired)| other != id && !retired)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn close_doors(&mut self) {
        self.open = false;
    }

    /// First idle checkout and first waiting customer, if both exist
    fn pair(&mut self) -> Option<(usize, Customer)> {
        if self.idle.is_empty() || self.waiting.is_empty() {
            return None;
        }
        Some((self.idle.pop_front()?, self.waiting.pop_front()?))
    }

    /// Take a specific checkout out of the idle registry
    pub(crate) fn claim(&mut self, id: usize) -> bool {
        match self.idle.iter().position(|idle| *idle == id) {
            Some(index) => {
                self.idle.remove(index);
                true
            }
            None => false,
        }
    }

    fn release(&mut self, id: usize) {
        if self.retired[id] {
            return;
        }
        assert!(
            !self.idle.contains(&id),
            "checkout {id} registered idle while already idle"
        );
        self.idle.push_back(id);
    }

    /// Withdraw a closed checkout while the shop still dispatches
    pub(crate) fn retire(&mut self, id: usize) {
        if !self.open {
            return;
        }
        self.claim(id);
        self.retired[id] = true;
    }
}

/// Shop-wide state and the signal raised whenever it changes
pub(crate) struct Floor {
    state: Mutex<FloorState>,
    changed: Condvar,
}

impl Floor {
    pub(crate) fn new(checkouts: usize) -> Floor {
        Floor {
            state: Mutex::new(FloorState::new(checkouts)),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, FloorState> {
        self.state.lock()
    }

    pub(crate) fn wait(&self, state: &mut MutexGuard<'_, FloorState>) {
        self.changed.wait(state);
    }

    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }

    /// Record a completed burst and put the checkout back in the registry
    pub(crate) fn finish_burst(&self, id: usize, busy: Duration) {
        let mut state = self.lock();
        state.stats.record_burst(id, busy);
        state.release(id);
        drop(state);
        self.notify();
    }
}

/// A shop with a fixed set of checkouts and a bounded waiting line
///
/// Construction starts one service thread per checkout and one dispatcher
/// thread. [`Shop::close`] drains the shop and stops them all; dropping the
/// shop closes it too.
///
/// # Example
///
/// ```no_run
/// use checkout_queue::{Customer, Shop};
///
/// let shop = Shop::new(2, 10.0, 5).unwrap();
/// shop.customer_come(Customer::new(3));
/// shop.close();
/// assert_eq!(shop.stats().accepted_count, 1);
/// ```
pub struct Shop {
    floor: Arc<Floor>,
    checkouts: Vec<Checkout>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    service_rate: f64,
    max_queue_length: usize,
    opened_at: Instant,
}

impl Shop {
    /// Open a shop and start all of its threads
    ///
    /// # Arguments
    ///
    /// * `checkouts` - Number of checkouts, at least one
    /// * `service_rate` - Items per second each checkout processes
    /// * `max_queue_length` - Waiting places beyond the checkouts themselves
    pub fn new(
        checkouts: usize,
        service_rate: f64,
        max_queue_length: usize,
    ) -> Result<Shop, ShopError> {
        if checkouts == 0 {
            return Err(ShopError::NoCheckouts);
        }
        let service_rate = validate_rate(service_rate, ShopError::InvalidServiceRate)?;
        let opened_at = Instant::now();
        let floor = Arc::new(Floor::new(checkouts));

        let checkouts = (0..checkouts)
            .map(|id| Checkout::open(id, service_rate, Arc::clone(&floor)))
            .collect::<Result<Vec<_>, _>>()?;
        let tills: Vec<Arc<Till>> = checkouts.iter().map(Checkout::till).collect();

        let dispatcher = thread::Builder::new()
            .name("shop-dispatcher".to_string())
            .spawn({
                let floor = Arc::clone(&floor);
                move || dispatch(&floor, &tills)
            })
            .map_err(ShopError::Spawn)?;

        debug!(
            "shop opened with {} checkouts at {} items/s, {} waiting places",
            checkouts.len(),
            service_rate,
            max_queue_length
        );

        Ok(Shop {
            floor,
            checkouts,
            dispatcher: Mutex::new(Some(dispatcher)),
            service_rate,
            max_queue_length,
            opened_at,
        })
    }

    pub fn from_config(config: &ShopConfig) -> Result<Shop, ShopError> {
        Shop::new(config.checkouts, config.service_rate, config.max_queue_length)
    }

    /// Offer a customer to the shop without blocking
    ///
    /// The customer is accepted when it can go straight to an idle checkout
    /// or a waiting place is free, and declined otherwise. A closed shop, or
    /// one whose checkouts have all been closed, declines everybody. Both
    /// outcomes are counted in [`Stats`].
    pub fn customer_come(&self, customer: Customer) -> Admission {
        let mut state = self.floor.lock();
        if !state.open {
            state.stats.declined_count += 1;
            drop(state);
            warn!("customer arrived after the shop closed");
            return Admission::Declined;
        }
        if !state.has_room(self.max_queue_length) {
            state.stats.declined_count += 1;
            trace!("declined customer with {} items", customer.items_count());
            return Admission::Declined;
        }

        state.stats.accepted_count += 1;
        state.waiting.push_back(customer);
        trace!(
            "accepted customer with {} items, {} waiting",
            customer.items_count(),
            state.waiting.len()
        );
        drop(state);
        self.floor.notify();
        Admission::Accepted
    }

    /// Drain the shop and stop every thread
    ///
    /// Blocks until nobody is waiting and every checkout is idle, stops the
    /// dispatcher, records the opening time and closes all checkouts.
    /// Calling it again is a no-op.
    pub fn close(&self) {
        let mut dispatcher = self.dispatcher.lock();
        let Some(handle) = dispatcher.take() else {
            return;
        };

        let mut state = self.floor.lock();
        while !state.is_drained() {
            assert!(
                !state.all_retired(),
                "customers waiting with every checkout closed"
            );
            self.floor.wait(&mut state);
        }
        state.close_doors();
        drop(state);
        self.floor.notify();

        if let Err(panic) = handle.join() {
            std::panic::resume_unwind(panic);
        }
        let open_time = self.opened_at.elapsed();
        self.floor.lock().stats.total_open_time = open_time;

        self.checkouts.par_iter().for_each(Checkout::close);
        debug!("shop closed after {:?}", open_time);
    }

    pub fn is_open(&self) -> bool {
        self.floor.lock().open
    }

    /// Checkout `id`, for `0 <= id < checkout_count()`
    pub fn checkout(&self, id: usize) -> Option<&Checkout> {
        self.checkouts.get(id)
    }

    /// Consistent copy of the statistics
    pub fn stats(&self) -> Stats {
        self.floor.lock().stats.clone()
    }

    pub fn checkout_count(&self) -> usize {
        self.checkouts.len()
    }

    pub fn service_rate(&self) -> f64 {
        self.service_rate
    }

    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    pub fn waiting_customers(&self) -> usize {
        self.floor.lock().waiting.len()
    }

    /// Checkouts currently registered as idle
    pub fn idle_checkouts(&self) -> usize {
        self.floor.lock().idle.len()
    }
}

impl Drop for Shop {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.close();
        }
    }
}

fn dispatch(floor: &Floor, tills: &[Arc<Till>]) {
    let mut state = floor.lock();
    loop {
        let waiting = state.waiting.len();
        state.stats.sample_queue(waiting);

        if let Some((id, customer)) = state.pair() {
            state.stats.record_wait(customer.arrived_at().elapsed());
            tills[id].assign(id, customer.items_count());
            trace!("dispatched {} items to checkout {id}", customer.items_count());
            continue;
        }
        if !state.open {
            debug_assert!(state.waiting.is_empty());
            break;
        }
        floor.changed.wait_for(&mut state, SAMPLE_TICK);
    }
    debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "registered idle while already idle")]
    fn releasing_an_idle_checkout_panics() {
        let mut state = FloorState::new(2);
        state.release(0);
    }

    #[test]
    fn released_checkout_goes_to_the_back_of_the_registry() {
        let mut state = FloorState::new(3);
        assert!(state.claim(0));
        assert!(!state.claim(0));

        state.release(0);

        assert_eq!(state.idle, VecDeque::from([1, 2, 0]));
    }

    #[test]
    fn retired_checkout_is_not_released_again() {
        let mut state = FloorState::new(2);
        state.claim(1);
        state.retire(1);

        state.release(1);

        assert_eq!(state.idle, VecDeque::from([0]));
        assert!(state.is_drained());
    }

    #[test]
    fn no_room_once_every_checkout_retired() {
        let mut state = FloorState::new(1);
        assert!(state.has_room(2));

        state.retire(0);

        assert!(state.all_retired());
        assert!(!state.has_room(2));
    }

    #[test]
    fn last_checkout_cannot_leave_a_waiting_line() {
        let mut state = FloorState::new(2);
        state.waiting.push_back(Customer::new(1));
        assert!(state.can_retire(0));

        state.retire(0);
        assert!(!state.can_retire(1));

        state.waiting.clear();
        assert!(state.can_retire(1));

        state.waiting.push_back(Customer::new(1));
        state.close_doors();
        assert!(state.can_retire(1));
    }

    #[test]
    fn pairing_needs_both_a_customer_and_a_checkout() {
        let mut state = FloorState::new(1);
        assert_eq!(state.pair(), None);

        let customer = Customer::new(3);
        state.waiting.push_back(customer);
        assert_eq!(state.pair(), Some((0, customer)));
        assert_eq!(state.pair(), None);
    }
}
