use std::collections::HashMap;
use super::types::{UploadEvent, UploadId, UploadStatus};

/// Overall 0..=100 progress of a batch, rebuilt from [`UploadEvent`]s.
///
/// The denominator is the high-water mark of the batch: the largest number of
/// items (live plus completed) ever seen. It only grows until [`start_batch`]
/// is called, so enqueueing more files rescales the figure once instead of
/// making it jump around, and cancelling a file never shrinks it.
///
/// [`start_batch`]: ProgressAggregator::start_batch
#[derive(Debug, Default, Clone)]
pub struct ProgressAggregator {
    live: HashMap<UploadId, LiveEntry>,
    high_water: usize,
    completed: usize,
}

#[derive(Debug, Clone, Copy)]
struct LiveEntry {
    status: UploadStatus,
    progress: u8,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event. Returns the new overall value when it changed.
    pub fn apply(&mut self, event: &UploadEvent) -> Option<u8> {
        let before = self.overall();

        match event {
            UploadEvent::Enqueued { identifier } => {
                self.live.insert(identifier.clone(), LiveEntry {
                    status: UploadStatus::Queued,
                    progress: 0,
                });
                self.observe();
            }
            UploadEvent::StateChanged { identifier, new_status, .. } => {
                if let Some(entry) = self.live.get_mut(identifier) {
                    entry.status = *new_status;
                }
            }
            UploadEvent::Progress { identifier, progress, .. } => {
                if let Some(entry) = self.live.get_mut(identifier) {
                    entry.progress = (*progress).min(100);
                }
            }
            UploadEvent::Completed { item, .. } => {
                if self.live.remove(&item.identifier).is_some() {
                    self.completed += 1;
                }
                self.observe();
            }
            UploadEvent::Cancelled { identifier } => {
                self.live.remove(identifier);
            }
            UploadEvent::BatchStarted { .. } => self.start_batch(),
            UploadEvent::Retrying { .. }
            | UploadEvent::Failed { .. }
            | UploadEvent::OverallProgress { .. } => {}
        }

        let after = self.overall();
        (after != before).then_some(after)
    }

    /// Forget completed items and restart the high-water mark at the live count.
    pub fn start_batch(&mut self) {
        self.completed = 0;
        self.high_water = self.live.len();
    }

    fn observe(&mut self) {
        self.high_water = self.high_water.max(self.live.len() + self.completed);
    }

    /// `round((completed * 100 + live progress) / (H * 100) * 100)`, 0 when nothing was queued.
    pub fn overall(&self) -> u8 {
        if self.high_water == 0 {
            return 0;
        }

        let live_sum: u64 = self.live
            .values()
            .filter(|entry| entry.status != UploadStatus::Queued)
            .map(|entry| entry.progress as u64)
            .sum();

        let numerator = self.completed as u64 * 100 + live_sum;
        let denominator = self.high_water as u64;
        let rounded = (numerator * 2 + denominator) / (denominator * 2);

        rounded.min(100) as u8
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
