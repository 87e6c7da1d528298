use std::sync::{Mutex, MutexGuard, PoisonError};

/// Admission counter bounding in-flight processor invocations.
///
/// The gate never blocks or queues. `acquire` and `release` only report
/// whether the in-flight count is below capacity afterwards, and the caller
/// pauses or resumes polling on that signal. Callbacks passed to the `_with`
/// variants run while the counter lock is held, so pause/resume decisions are
/// serialized with the count that produced them.
#[derive(Debug)]
pub struct BoundedGate {
    capacity: usize,
    in_flight: Mutex<usize>,
}

impl BoundedGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Mutex::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    pub fn has_capacity(&self) -> bool {
        *self.lock() < self.capacity
    }

    /// Admits one invocation. Returns whether capacity remains.
    pub fn acquire(&self) -> bool {
        self.acquire_with(|_| {})
    }

    /// Retires one invocation. Returns whether capacity is available.
    pub fn release(&self) -> bool {
        self.release_with(|_| {})
    }

    pub fn acquire_with<F: FnOnce(bool)>(&self, on_acquired: F) -> bool {
        let mut in_flight = self.lock();
        *in_flight = in_flight.saturating_add(1);
        let has_capacity = *in_flight < self.capacity;
        on_acquired(has_capacity);
        has_capacity
    }

    pub fn release_with<F: FnOnce(bool)>(&self, on_released: F) -> bool {
        let mut in_flight = self.lock();
        *in_flight = in_flight.saturating_sub(1);
        let has_capacity = *in_flight < self.capacity;
        on_released(has_capacity);
        has_capacity
    }

    /// Acquires and returns a permit that releases on drop, including when the
    /// holder unwinds.
    pub fn admit<A, R>(&self, on_acquired: A, on_released: R) -> GatePermit<'_, R>
    where
        A: FnOnce(bool),
        R: FnOnce(bool),
    {
        self.acquire_with(on_acquired);
        GatePermit {
            gate: self,
            on_released: Some(on_released),
        }
    }

    /// Like [`Self::admit`], but refuses without touching the count when the
    /// gate is already full. The check and the increment happen under one lock.
    pub fn try_admit<A, R>(&self, on_acquired: A, on_released: R) -> Option<GatePermit<'_, R>>
    where
        A: FnOnce(bool),
        R: FnOnce(bool),
    {
        let mut in_flight = self.lock();
        if *in_flight >= self.capacity {
            return None;
        }
        *in_flight += 1;
        on_acquired(*in_flight < self.capacity);
        drop(in_flight);

        Some(GatePermit {
            gate: self,
            on_released: Some(on_released),
        })
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct GatePermit<'a, R: FnOnce(bool)> {
    gate: &'a BoundedGate,
    on_released: Option<R>,
}

impl<R: FnOnce(bool)> Drop for GatePermit<'_, R> {
    fn drop(&mut self) {
        if let Some(on_released) = self.on_released.take() {
            self.gate.release_with(on_released);
        }
    }
}
