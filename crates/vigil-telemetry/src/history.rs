//! Rolling window of host samples.

use std::collections::VecDeque;

use serde::Serialize;

/// One history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySample {
    /// Host CPU percent.
    pub cpu: f64,
    /// Host memory percent.
    pub memory: f64,
    /// GPU utilization percent, `0` when no GPU is present.
    pub gpu: f64,
    /// Wall-clock label, `HH:MM:SS`.
    pub timestamp: String,
}

impl HistorySample {
    /// Builds a sample stamped with the current local time.
    #[must_use]
    pub fn now(cpu: f64, memory: f64, gpu: Option<f64>) -> Self {
        Self {
            cpu,
            memory,
            gpu: gpu.unwrap_or(0.0),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// Column view of the buffer: four sequences of equal length, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    /// CPU percent per sample.
    pub cpu: Vec<f64>,
    /// Memory percent per sample.
    pub memory: Vec<f64>,
    /// GPU percent per sample.
    pub gpu: Vec<f64>,
    /// Timestamp label per sample.
    pub timestamps: Vec<String>,
}

/// Fixed-capacity FIFO of [`HistorySample`]s.
///
/// Samples are stored whole, so the four columns of a [`History`] can never
/// drift out of alignment.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    samples: VecDeque<HistorySample>,
}

impl HistoryBuffer {
    /// Creates an empty buffer. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: HistorySample) {
        if self.samples.len() == self.capacity {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copies the buffer into column form.
    #[must_use]
    pub fn snapshot(&self) -> History {
        let mut history = History {
            cpu: Vec::with_capacity(self.samples.len()),
            memory: Vec::with_capacity(self.samples.len()),
            gpu: Vec::with_capacity(self.samples.len()),
            timestamps: Vec::with_capacity(self.samples.len()),
        };
        for sample in &self.samples {
            history.cpu.push(sample.cpu);
            history.memory.push(sample.memory);
            history.gpu.push(sample.gpu);
            history.timestamps.push(sample.timestamp.clone());
        }
        history
    }
}
