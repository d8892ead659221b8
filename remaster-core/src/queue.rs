use std::{
    path::Path,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info};

use crate::{coordinator::EncodeReport, settings::EncodeSettings};

/// Result of one queued job.
#[derive(Debug)]
pub struct JobOutcome {
    pub settings: EncodeSettings,
    pub result:   anyhow::Result<EncodeReport>,
}

/// Pending jobs run by a fixed number of encoder slots. Jobs taken by one
/// slot run one after another.
pub struct EncodeQueue {
    slots:      usize,
    next_index: AtomicUsize,
    sender:     Sender<EncodeSettings>,
    receiver:   Receiver<EncodeSettings>,
    cancelled:  Arc<AtomicBool>,
}

impl EncodeQueue {
    #[inline]
    pub fn new(slots: usize, cancelled: Arc<AtomicBool>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            slots: slots.max(1),
            next_index: AtomicUsize::new(1),
            sender,
            receiver,
            cancelled,
        }
    }

    /// Make new indices start past every job in `recovered`.
    #[inline]
    pub fn seeded(self, recovered: &[EncodeSettings]) -> Self {
        let next = recovered.iter().map(|job| job.job_index + 1).max().unwrap_or(1);
        self.next_index.fetch_max(next, Ordering::Relaxed);
        self
    }

    #[inline]
    pub fn allocate_index(&self) -> usize {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Settings for a new job on `file_name` with a fresh index.
    #[inline]
    pub fn new_job(&self, file_name: &Path, temp_directory: &Path) -> EncodeSettings {
        EncodeSettings::new(file_name, temp_directory, self.allocate_index())
    }

    #[inline]
    pub fn push(&self, settings: EncodeSettings) {
        debug!("Queued job {}", settings.job_index);
        self.next_index.fetch_max(settings.job_index + 1, Ordering::Relaxed);
        // The receiver lives as long as the queue
        let _ = self.sender.send(settings);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Run every queued job through `handler`. Jobs left when the queue is
    /// cancelled are reported as cancelled without running. Outcomes come
    /// back in job index order.
    #[inline]
    pub fn run<F>(self, handler: F) -> Vec<JobOutcome>
    where
        F: Fn(&mut EncodeSettings) -> anyhow::Result<EncodeReport> + Sync,
    {
        let Self {
            slots,
            sender,
            receiver,
            cancelled,
            ..
        } = self;
        drop(sender);
        info!("Running {} jobs on {} slots", receiver.len(), slots);

        let outcomes = Mutex::new(Vec::with_capacity(receiver.len()));
        thread::scope(|s| {
            for slot in 0..slots {
                let receiver = receiver.clone();
                let (handler, outcomes, cancelled) = (&handler, &outcomes, &cancelled);
                s.spawn(move || {
                    while !cancelled.load(Ordering::Relaxed) {
                        let Ok(mut settings) = receiver.recv() else {
                            break;
                        };
                        debug!("Slot {} takes job {}", slot, settings.job_index);
                        let result = handler(&mut settings);
                        if let Err(err) = &result {
                            error!("Job {} failed: {:#}", settings.job_index, err);
                        }
                        outcomes.lock().unwrap_or_else(PoisonError::into_inner).push(JobOutcome {
                            settings,
                            result,
                        });
                    }
                });
            }
        });

        let mut outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcomes.extend(receiver.try_iter().map(|settings| JobOutcome {
            settings,
            result: Ok(EncodeReport::Cancelled),
        }));
        outcomes.sort_by_key(|outcome| outcome.settings.job_index);
        outcomes
    }
}
