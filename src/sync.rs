//! Heaplet parking.
//!
//! Global-collection coordination needs exactly three operations: take the
//! heap lock (a `Mutex` around the heap state), block the current heaplet
//! until another thread wakes it, and wake a parked heaplet. The first is the
//! heap's business; the latter two live behind [`Coordination`] so a build
//! without sharing pays nothing for them.

/// Per-heaplet blocking primitive.
#[cfg_attr(not(feature = "sharing"), allow(dead_code))]
pub(crate) trait Coordination: Send + Sync {
    /// Blocks the calling thread until [`Coordination::unpark`] is called.
    /// A wake issued before the park is not lost.
    fn park(&self);
    /// Wakes the owning heaplet's thread.
    fn unpark(&self);
}

/// Binary-semaphore coordination on a mutex and condition variable.
#[cfg(feature = "sharing")]
pub(crate) struct CondvarCoordination {
    woken: std::sync::Mutex<bool>,
    cond: std::sync::Condvar,
}

#[cfg(feature = "sharing")]
impl CondvarCoordination {
    pub fn new() -> Self {
        Self {
            woken: std::sync::Mutex::new(false),
            cond: std::sync::Condvar::new(),
        }
    }
}

#[cfg(feature = "sharing")]
impl Coordination for CondvarCoordination {
    fn park(&self) {
        let mut woken = self
            .woken
            .lock()
            .unwrap_or_else(|_| panic!("hearth: heaplet parking mutex poisoned"));
        while !*woken {
            woken = self
                .cond
                .wait(woken)
                .unwrap_or_else(|_| panic!("hearth: heaplet parking wait failed"));
        }
        *woken = false;
    }

    fn unpark(&self) {
        let mut woken = self
            .woken
            .lock()
            .unwrap_or_else(|_| panic!("hearth: heaplet parking mutex poisoned"));
        *woken = true;
        self.cond.notify_one();
    }
}

/// Trivial coordination for builds without sharing: nothing ever parks.
#[allow(dead_code)]
pub(crate) struct NoCoordination;

#[allow(dead_code)]
impl Coordination for NoCoordination {
    fn park(&self) {}
    fn unpark(&self) {}
}
