use crate::record::TelemetryRecord;
use std::collections::VecDeque;

/// Arithmetic means over every record currently held in a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub avg_load: f32,
    pub avg_temp: f32,
    pub avg_fan: f32,
    pub avg_mhz: f32,
    pub samples: usize,
    pub last: TelemetryRecord,
}

/// Fixed-capacity FIFO of a client's most recent records.
///
/// Storage is reserved up front, so pushing into a full window never allocates.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    records: VecDeque<TelemetryRecord>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be greater than 0");
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends in receipt order, returning the evicted oldest record when full.
    pub fn push(&mut self, record: TelemetryRecord) -> Option<TelemetryRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `None` for an empty window; the mean of zero samples is undefined.
    pub fn mean(&self) -> Option<Aggregate> {
        let last = *self.records.back()?;
        let (mut load, mut temp, mut fan, mut mhz) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for r in &self.records {
            load += r.cpu_load as f64;
            temp += r.cpu_temp as f64;
            fan += r.fan_speed as f64;
            mhz += r.cpu_mhz as f64;
        }
        let n = self.records.len() as f64;
        Some(Aggregate {
            avg_load: (load / n) as f32,
            avg_temp: (temp / n) as f32,
            avg_fan: (fan / n) as f32,
            avg_mhz: (mhz / n) as f32,
            samples: self.records.len(),
            last,
        })
    }
}
