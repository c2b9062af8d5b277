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

//! Job system: a worker-thread pool over a bounded [`queue::JobQueue`],
//! plus a sync-point barrier that temporarily serializes selected work.

mod barrier;
mod queue;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::debug;

use barrier::Barrier;
pub use queue::Job;
use queue::JobQueue;

/// Build-time sizing for a [`JobSystem`].
#[derive(Debug, Clone, Copy)]
pub struct JobSystemConfig {
    /// Capacity of the underlying bounded job queue.
    pub queue_capacity: usize,
    /// Whether the thread that drives the system will also call
    /// [`JobSystem::work`] in a loop, and so must be counted in barrier
    /// accounting even though no extra worker thread is spawned for it.
    pub caller_also_works: bool,
}

/// Owns the worker pool and the bounded job queue, and exposes the
/// sync-point barrier primitive on top of both.
pub struct JobSystem {
    queue: Arc<JobQueue>,
    barrier: Arc<Barrier>,
    sync_lock: Mutex<()>,
    nworkers: usize,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Spawn `max(available_parallelism(), 1)` worker threads, each looping
    /// on [`JobQueue::pop`] followed by invocation. Worker threads are never
    /// joined during normal operation; shutdown is implicit with process
    /// exit.
    pub fn new(config: JobSystemConfig) -> Self {
        let ncores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let mut nworkers = ncores.max(1);

        let queue = Arc::new(JobQueue::with_capacity(config.queue_capacity));
        let mut workers = Vec::with_capacity(nworkers);
        for i in 0..nworkers {
            let queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("dots-worker-{i}"))
                .spawn(move || loop {
                    let job = queue.pop();
                    job();
                })
                .expect("failed to spawn job-system worker thread");
            workers.push(handle);
        }

        if config.caller_also_works {
            nworkers += 1;
        }

        #[cfg(feature = "tracing")]
        debug!(nworkers, caller_also_works = config.caller_also_works, "job system started");

        Self {
            queue,
            barrier: Arc::new(Barrier::new(nworkers)),
            sync_lock: Mutex::new(()),
            nworkers,
            workers,
        }
    }

    /// Number of participants in a sync-point, including the calling thread
    /// if [`JobSystemConfig::caller_also_works`] was set.
    pub fn worker_count(&self) -> usize {
        self.nworkers
    }

    /// Number of threads actually spawned by this job system (always
    /// `worker_count()` minus one if the caller also works).
    pub fn spawned_thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue `job`, blocking if the queue is at capacity.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(job));
    }

    /// Dequeue and invoke the next job on the calling thread, blocking if
    /// the queue is empty. Called by spawned workers in a loop, and by the
    /// embedding application's own thread when `caller_also_works` is set.
    pub fn work(&self) {
        let job = self.queue.pop();
        job();
    }

    /// Schedule a bare sync-point: every worker but one blocks until all
    /// have arrived, then all are released together. Does not run any
    /// caller-supplied work inside the barrier.
    pub fn schedule_sync_point(&self) {
        // With a single participant there is nothing to serialize against.
        if self.nworkers <= 1 {
            return;
        }
        let _guard = self.sync_lock.lock();
        for _ in 1..self.nworkers {
            let barrier = Arc::clone(&self.barrier);
            self.schedule(move || barrier.wait());
        }
        let barrier = Arc::clone(&self.barrier);
        self.schedule(move || barrier.wake());
    }

    /// Schedule `job` to run with every other worker parked at the barrier,
    /// i.e. with exclusive access to whatever state `job` touches. The three
    /// parts (waiters, `job`, wake) are scheduled under one lock so they
    /// land in the queue contiguously, even if another thread calls
    /// `schedule_sync_point`/`schedule_not_concurrent` concurrently.
    pub fn schedule_not_concurrent(&self, job: impl FnOnce() + Send + 'static) {
        if self.nworkers <= 1 {
            self.schedule(job);
            return;
        }
        let _guard = self.sync_lock.lock();
        for _ in 1..self.nworkers {
            let barrier = Arc::clone(&self.barrier);
            self.schedule(move || barrier.wait());
        }
        self.schedule(job);
        let barrier = Arc::clone(&self.barrier);
        self.schedule(move || barrier.wake());
    }
}
