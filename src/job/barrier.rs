// Copyright 2024 Saptak Santra
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

//! Sync-point barrier: `nworkers - 1` waiter-jobs plus a single wake-job,
//! tolerant of the scheduling thread also being one of the workers.

use parking_lot::{Condvar, Mutex};

#[cfg(feature = "tracing")]
use tracing::trace;

/// Shared barrier state. A full sync-point is `nworkers - 1` calls to
/// [`Barrier::wait`] plus one call to [`Barrier::wake`], scheduled as
/// consecutive jobs so every worker passes through exactly one of the two.
pub struct Barrier {
    counter: Mutex<usize>,
    cv1: Condvar,
    cv2: Condvar,
    nworkers: usize,
}

impl Barrier {
    pub fn new(nworkers: usize) -> Self {
        Self {
            counter: Mutex::new(nworkers),
            cv1: Condvar::new(),
            cv2: Condvar::new(),
            nworkers,
        }
    }

    /// Run by each of the `nworkers - 1` waiter-jobs: decrement the
    /// counter and signal the wake-job once every waiter has arrived.
    pub fn wait(&self) {
        let mut counter = self.counter.lock();
        self.cv1.wait_while(&mut counter, |c| *c >= self.nworkers);
        *counter -= 1;
        drop(counter);
        #[cfg(feature = "tracing")]
        trace!(worker = ?std::thread::current().id(), "barrier wait arrived");
        self.cv2.notify_one();
    }

    /// Run by the single wake-job: release every waiter, block until the
    /// last one has decremented the counter to 1, then reset for the next
    /// sync-point.
    pub fn wake(&self) {
        {
            let mut counter = self.counter.lock();
            *counter -= 1;
        }
        self.cv1.notify_all();
        #[cfg(feature = "tracing")]
        trace!(worker = ?std::thread::current().id(), "barrier wake released waiters");

        let mut counter = self.counter.lock();
        self.cv2.wait_while(&mut counter, |c| *c != 1);
        *counter = self.nworkers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn all_waiters_and_the_waker_converge() {
        const NWORKERS: usize = 4;
        let barrier = Arc::new(Barrier::new(NWORKERS));
        let arrivals = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 1..NWORKERS {
            let barrier = Arc::clone(&barrier);
            let arrivals = Arc::clone(&arrivals);
            handles.push(thread::spawn(move || {
                barrier.wait();
                arrivals.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let waker_barrier = Arc::clone(&barrier);
        let waker = thread::spawn(move || waker_barrier.wake());

        for h in handles {
            h.join().unwrap();
        }
        waker.join().unwrap();
        assert_eq!(arrivals.load(Ordering::SeqCst), NWORKERS - 1);
        assert_eq!(*barrier.counter.lock(), NWORKERS);
    }
}
