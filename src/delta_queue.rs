use std::collections::VecDeque;

/// Bounded, time-ordered history of per-tick increments for one fused scalar.
///
/// When a visual fix arrives late, everything recorded before its capture
/// time is already reflected in the fix and gets discarded; whatever was
/// recorded at or after that time is motion the fix has not seen yet and is
/// summed back on top of it.
#[derive(Clone, Debug)]
pub struct DeltaQueue {
    entries: VecDeque<(f64, f64)>,
    capacity: usize,
}

impl DeltaQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an increment, evicting the oldest entry once full.
    pub fn push(&mut self, timestamp: f64, increment: f64) {
        self.entries.push_back((timestamp, increment));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Drop entries strictly older than `since`, then drain and sum the rest.
    ///
    /// The queue is empty afterwards.
    pub fn replay_since(&mut self, since: f64) -> f64 {
        while let Some(&(ts, _)) = self.entries.front() {
            if ts < since {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        self.entries.drain(..).map(|(_, inc)| inc).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The three queues replayed together when a fix is folded in.
#[derive(Clone, Debug)]
pub struct DeltaQueues {
    pub dx: DeltaQueue,
    pub dy: DeltaQueue,
    pub dyaw: DeltaQueue,
}

impl DeltaQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            dx: DeltaQueue::new(capacity),
            dy: DeltaQueue::new(capacity),
            dyaw: DeltaQueue::new(capacity),
        }
    }

    pub fn push(&mut self, timestamp: f64, dx: f64, dy: f64, dyaw: f64) {
        self.dx.push(timestamp, dx);
        self.dy.push(timestamp, dy);
        self.dyaw.push(timestamp, dyaw);
    }

    pub fn clear(&mut self) {
        self.dx.clear();
        self.dy.clear();
        self.dyaw.clear();
    }
}
