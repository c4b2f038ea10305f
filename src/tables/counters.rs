//! Counter tables and the delta-to-absolute normalizer.

use serde::{Deserialize, Serialize};

/// A capture-level counter (memory, event counts, ...).
///
/// When `relative` is set, each `count` value is a delta from the previous
/// sample rather than an absolute value; the first sample's delta is defined
/// against a zero baseline. [`normalize_counter`] converts such a counter to
/// absolute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub pid: u32,
    #[serde(default)]
    pub relative: bool,
    pub samples: CounterSamplesTable,
}

/// Columnar counter samples: one `time`/`count` pair per observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSamplesTable {
    pub time: Vec<f64>,
    pub count: Vec<f64>,
    pub length: usize,
}

impl CounterSamplesTable {
    pub fn push(&mut self, time: f64, count: f64) -> usize {
        self.time.push(time);
        self.count.push(count);
        self.length += 1;
        self.length - 1
    }
}

/// Convert a relative (delta-encoded) counter into an absolute one by
/// cumulative summation. Absolute counters pass through unchanged.
///
/// Pure and re-runnable: the output is never relative, so running it twice
/// is the identity after the first run. Sample count and order are preserved.
pub fn normalize_counter(counter: &Counter) -> Counter {
    if !counter.relative {
        return counter.clone();
    }
    let mut normalized = counter.clone();
    normalized.relative = false;
    let mut running = 0.0;
    for count in &mut normalized.samples.count {
        running += *count;
        *count = running;
    }
    normalized
}

/// Normalize every counter of a capture in place.
pub fn normalize_counters(counters: &mut [Counter]) {
    for counter in counters.iter_mut() {
        if counter.relative {
            *counter = normalize_counter(counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_counter(counts: &[f64]) -> Counter {
        Counter {
            name: "malloc".to_string(),
            category: "Memory".to_string(),
            description: String::new(),
            pid: 1,
            relative: true,
            samples: CounterSamplesTable {
                time: (0..counts.len()).map(|i| i as f64).collect(),
                count: counts.to_vec(),
                length: counts.len(),
            },
        }
    }

    #[test]
    fn test_relative_counter_is_accumulated() {
        let counter = relative_counter(&[0.0, 5.0, -2.0, 3.0]);
        let normalized = normalize_counter(&counter);
        assert_eq!(normalized.samples.count, vec![0.0, 5.0, 3.0, 6.0]);
        assert!(!normalized.relative);
        // Times and sample count are untouched.
        assert_eq!(normalized.samples.time, counter.samples.time);
        assert_eq!(normalized.samples.length, counter.samples.length);
    }

    #[test]
    fn test_absolute_counter_passes_through() {
        let mut counter = relative_counter(&[1.0, 2.0, 3.0]);
        counter.relative = false;
        let normalized = normalize_counter(&counter);
        assert_eq!(normalized, counter);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let counter = relative_counter(&[0.0, 5.0, -2.0, 3.0]);
        let once = normalize_counter(&counter);
        let twice = normalize_counter(&once);
        assert_eq!(once, twice);
    }
}
