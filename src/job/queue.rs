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

//! Fixed-capacity, blocking FIFO queue of boxed closures.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// A unit of work submitted to a [`super::JobSystem`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded blocking ring buffer shared by the worker pool. `push` blocks
/// while the queue is at capacity; `pop` blocks while it is empty.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
}

impl JobQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn push(&self, job: Job) {
        let mut jobs = self.jobs.lock();
        self.not_full.wait_while(&mut jobs, |q| q.len() == self.capacity);
        jobs.push_back(job);
        drop(jobs);
        self.not_empty.notify_one();
    }

    pub fn pop(&self) -> Job {
        let mut jobs = self.jobs.lock();
        self.not_empty.wait_while(&mut jobs, |q| q.is_empty());
        let job = jobs.pop_front().expect("not_empty wait_while guarantees a job is present");
        drop(jobs);
        self.not_full.notify_one();
        job
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}
