use std::collections::VecDeque;

use crate::{status::load_factor, PoolOptions};

/// Sliding window of the most recent load factor samples.
pub(crate) struct LoadHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl LoadHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Average of the window, only available once the window has filled up.
    pub fn average(&self) -> Option<f32> {
        if self.samples.len() < self.capacity {
            return None;
        }

        let sum: f32 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f32)
    }
}

/// Counters observed by the manager at the start of a tick.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sample {
    pub live: usize,
    pub busy: usize,
    pub queued: usize,
}

impl Sample {
    pub fn load_factor(&self) -> f32 {
        load_factor(self.busy, self.live)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scale {
    Hold,
    Grow(usize),
    Shrink(usize),
}

/// Decide how the pool should be resized this tick.
///
/// Growth reacts to either a high smoothed load or an immediate backlog. Shrinking needs the
/// smoothed load, the instantaneous load and the cooldown to agree.
pub(crate) fn decide(
    options: &PoolOptions,
    history: &LoadHistory,
    sample: Sample,
    cooling_down: bool,
) -> Scale {
    let average = history.average();

    let headroom = options.max_threads.saturating_sub(sample.live);
    let overloaded = average.is_some_and(|average| average > options.grow_threshold);
    let backlogged = sample.queued > sample.live;
    if headroom > 0 && (overloaded || backlogged) {
        return Scale::Grow(headroom.min(options.batch));
    }

    let surplus = sample.live.saturating_sub(options.min_threads);
    let underloaded = average.is_some_and(|average| average < options.shrink_threshold);
    let idle = sample.busy * 2 < sample.live;
    if surplus > 0 && underloaded && idle && !cooling_down {
        return Scale::Shrink(surplus.min(options.batch));
    }

    Scale::Hold
}
