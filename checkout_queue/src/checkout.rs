//! A single checkout and its service loop
//!
//! Each checkout owns a pending-item counter guarded by its own lock, so the
//! service loops of different checkouts never contend. The counter moves
//! from zero to positive only through an assignment made while the shop
//! floor lock is held and the checkout sits in the idle registry; it moves
//! back to zero only through the checkout's own loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::ShopError;
use crate::shop::Floor;

struct Counter {
    pending: usize,
    alive: bool,
}

/// Checkout-local state shared between the handle, its service thread and
/// the dispatcher.
pub(crate) struct Till {
    counter: Mutex<Counter>,
    wake: Condvar,
}

impl Till {
    fn new() -> Till {
        Till {
            counter: Mutex::new(Counter {
                pending: 0,
                alive: true,
            }),
            wake: Condvar::new(),
        }
    }

    /// Hand a burst to an idle checkout. Caller holds the floor lock.
    pub(crate) fn assign(&self, id: usize, items: usize) {
        let mut counter = self.counter.lock();
        assert!(counter.alive, "checkout {id} assigned after close");
        assert_eq!(counter.pending, 0, "checkout {id} assigned while busy");
        counter.pending = items;
        self.wake.notify_all();
    }

    fn pending(&self) -> usize {
        self.counter.lock().pending
    }

    fn is_alive(&self) -> bool {
        self.counter.lock().alive
    }

    /// Block until there is work; `None` once the checkout is closed and idle.
    fn wait_for_work(&self) -> Option<usize> {
        let mut counter = self.counter.lock();
        loop {
            if counter.pending > 0 {
                return Some(counter.pending);
            }
            if !counter.alive {
                return None;
            }
            self.wake.wait(&mut counter);
        }
    }

    fn finish_item(&self, id: usize) -> usize {
        let mut counter = self.counter.lock();
        counter.pending = counter
            .pending
            .checked_sub(1)
            .unwrap_or_else(|| panic!("checkout {id} pending item count underflow"));
        self.wake.notify_all();
        counter.pending
    }

    fn wait_until_idle(&self) {
        let mut counter = self.counter.lock();
        while counter.pending > 0 {
            self.wake.wait(&mut counter);
        }
    }

    fn retire_if_idle(&self) -> bool {
        let mut counter = self.counter.lock();
        if counter.pending > 0 {
            return false;
        }
        counter.alive = false;
        self.wake.notify_all();
        true
    }
}

/// One simulated server with a fixed processing rate
///
/// Created by [`Shop::new`](crate::Shop::new); the shop closes every checkout
/// when it closes. Dropping a checkout closes it as well.
pub struct Checkout {
    id: usize,
    service_rate: f64,
    till: Arc<Till>,
    floor: Arc<Floor>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Checkout {
    pub(crate) fn open(
        id: usize,
        service_rate: f64,
        floor: Arc<Floor>,
    ) -> Result<Checkout, ShopError> {
        let per_item = Duration::try_from_secs_f64(1.0 / service_rate)
            .map_err(|_| ShopError::InvalidServiceRate(service_rate))?;
        let till = Arc::new(Till::new());
        let worker = thread::Builder::new()
            .name(format!("checkout-{id}"))
            .spawn({
                let till = Arc::clone(&till);
                let floor = Arc::clone(&floor);
                move || serve(id, per_item, &till, &floor)
            })
            .map_err(ShopError::Spawn)?;

        Ok(Checkout {
            id,
            service_rate,
            till,
            floor,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub(crate) fn till(&self) -> Arc<Till> {
        Arc::clone(&self.till)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Items processed per second
    pub fn service_rate(&self) -> f64 {
        self.service_rate
    }

    /// Items left in the current burst
    pub fn pending_items(&self) -> usize {
        self.till.pending()
    }

    pub fn is_alive(&self) -> bool {
        self.till.is_alive()
    }

    /// Start a burst of `items_count` items directly on this checkout
    ///
    /// Equivalent to the dispatcher assigning a customer: the checkout must
    /// be idle, and it leaves the idle registry until the burst completes.
    /// No waiting time is recorded since there is no customer arrival.
    pub fn customer_come(&self, items_count: usize) -> Result<(), ShopError> {
        if items_count == 0 {
            return Err(ShopError::ZeroItems { id: self.id });
        }
        let mut floor = self.floor.lock();
        // a closing shop has already stopped its clock
        if !floor.is_open() || !self.till.is_alive() {
            return Err(ShopError::CheckoutClosed { id: self.id });
        }
        if !floor.claim(self.id) {
            return Err(ShopError::CheckoutBusy { id: self.id });
        }
        self.till.assign(self.id, items_count);
        trace!("checkout {} injected with {} items", self.id, items_count);
        Ok(())
    }

    /// Wait for the current burst to finish, then stop the service thread
    ///
    /// Idempotent. While the shop is still open, a closed checkout is taken
    /// out of the idle registry so the dispatcher no longer picks it. The
    /// last open checkout stays until the waiting line is empty.
    pub fn close(&self) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };

        loop {
            self.till.wait_until_idle();
            let mut floor = self.floor.lock();
            if !floor.can_retire(self.id) {
                self.floor.wait(&mut floor);
                continue;
            }
            // the dispatcher may have assigned a new burst in between
            if self.till.retire_if_idle() {
                floor.retire(self.id);
                break;
            }
        }
        self.floor.notify();

        if let Err(panic) = handle.join() {
            std::panic::resume_unwind(panic);
        }
        debug!("checkout {} closed", self.id);
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.close();
        }
    }
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("id", &self.id)
            .field("service_rate", &self.service_rate)
            .field("pending_items", &self.pending_items())
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn serve(id: usize, per_item: Duration, till: &Till, floor: &Floor) {
    debug!("checkout {id} serving at {:?} per item", per_item);
    while let Some(items) = till.wait_for_work() {
        let started = Instant::now();
        trace!("checkout {id} starts burst of {items} items");
        loop {
            thread::sleep(per_item);
            if till.finish_item(id) == 0 {
                break;
            }
        }
        let busy = started.elapsed();
        trace!("checkout {id} finished burst in {:?}", busy);
        floor.finish_burst(id, busy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "pending item count underflow")]
    fn finishing_an_item_on_an_idle_till_panics() {
        let till = Till::new();
        till.finish_item(3);
    }

    #[test]
    #[should_panic(expected = "assigned while busy")]
    fn assigning_to_a_busy_till_panics() {
        let till = Till::new();
        till.assign(0, 2);
        till.assign(0, 1);
    }

    #[test]
    fn till_counts_down_a_burst() {
        let till = Till::new();
        till.assign(1, 2);
        assert_eq!(till.wait_for_work(), Some(2));
        assert!(!till.retire_if_idle());

        assert_eq!(till.finish_item(1), 1);
        assert_eq!(till.finish_item(1), 0);

        assert!(till.retire_if_idle());
        assert_eq!(till.wait_for_work(), None);
    }

    #[test]
    fn rate_too_small_for_a_duration_is_rejected() {
        let floor = Arc::new(Floor::new(1));
        let opened = Checkout::open(0, 1e-300, floor);
        assert!(matches!(opened, Err(ShopError::InvalidServiceRate(_))));
    }

    #[test]
    fn injection_after_doors_close_is_rejected() {
        let floor = Arc::new(Floor::new(1));
        let checkout = Checkout::open(0, 100.0, Arc::clone(&floor)).unwrap();

        floor.lock().close_doors();

        assert!(matches!(
            checkout.customer_come(1),
            Err(ShopError::CheckoutClosed { id: 0 })
        ));
        assert!(checkout.is_alive());
        assert_eq!(checkout.pending_items(), 0);
        checkout.close();
        assert!(!checkout.is_alive());
    }
}
