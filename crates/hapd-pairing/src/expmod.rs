//! Scheduler-driven exponentiation engine.
//!
//! Every job lives in an arena keyed by [`JobId`]. In chunked mode a job
//! advances once per `ExpModStep` event and re-emits the step until it
//! finishes, so each scheduler turn stays short and other connections keep
//! being served. Either mode delivers exactly one `ExpModFinal`.

use std::collections::HashMap;

use hapd_core::error::CryptoError;
use hapd_crypto::expmod::{ExpModJob, ExpModRequest, Progress};

use crate::event::{ConnectionId, Event, ExpModTarget, JobId};
use crate::scheduler::EventQueue;

struct PendingJob {
    job: ExpModJob,
    target: ExpModTarget,
    steps: u64,
}

/// Arena of in-flight exponentiation jobs.
pub struct ExpModEngine {
    jobs: HashMap<JobId, PendingJob>,
    next_id: u64,
    chunked: bool,
}

impl ExpModEngine {
    pub fn new(chunked: bool) -> Self {
        Self {
            jobs: HashMap::new(),
            next_id: 0,
            chunked,
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Start computing `request` on behalf of `target`.
    pub fn submit<C>(
        &mut self,
        request: ExpModRequest,
        target: ExpModTarget,
        queue: &mut EventQueue<C>,
    ) -> Result<JobId, CryptoError> {
        let id = JobId(self.next_id);
        self.next_id += 1;

        if !self.chunked {
            let value = request.compute()?;
            queue.emit(Event::ExpModFinal {
                job: id,
                target,
                value,
            });
            return Ok(id);
        }

        let job = request.into_job()?;
        tracing::trace!(
            job = id.0,
            conn = %target.conn,
            stage = ?target.stage,
            bits = job.bit_len(),
            "Exponentiation submitted"
        );
        self.jobs.insert(
            id,
            PendingJob {
                job,
                target,
                steps: 0,
            },
        );
        queue.emit(Event::ExpModStep(id));
        Ok(id)
    }

    /// Advance job `id` by one unit of work.
    ///
    /// Unknown ids (cancelled jobs) are ignored.
    pub fn step<C>(&mut self, id: JobId, queue: &mut EventQueue<C>) {
        let Some(pending) = self.jobs.get_mut(&id) else {
            return;
        };

        pending.steps += 1;
        match pending.job.advance() {
            Progress::Pending => queue.emit(Event::ExpModStep(id)),
            Progress::Done(value) => {
                let target = pending.target;
                tracing::trace!(job = id.0, steps = pending.steps, "Exponentiation finished");
                self.jobs.remove(&id);
                queue.emit(Event::ExpModFinal {
                    job: id,
                    target,
                    value,
                });
            }
        }
    }

    /// Drop every job submitted for `conn`. Returns how many were dropped.
    pub fn cancel_connection(&mut self, conn: ConnectionId) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, pending| pending.target.conn != conn);
        before - self.jobs.len()
    }

    /// Jobs still running.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }
}
