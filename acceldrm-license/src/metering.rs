//! Metering aggregation and consistency diagnosis.
//!
//! Activator counters are cumulative over the life of the bitstream. The
//! aggregator keeps the counter values seen at session start and a running
//! tally per activator, so reported usage is always relative to the session.

use acceldrm_types::{DrmError, DrmResult};
use serde::Serialize;

/// Outcome of comparing the local tally, the hardware counter and the
/// caller's expected value for one activator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MeteringDiagnosis {
    /// Hardware and local tally agree.
    Consistent,
    /// Hardware matches the expected value, the local tally does not.
    LocalTallyCorrupted,
    /// The local tally matches the expected value, the hardware does not.
    ControllerCorrupted,
    /// Nothing matches; attributed to the local tally by default.
    Unattributed,
}

impl MeteringDiagnosis {
    /// Compares local tally `local`, hardware value `hardware` and optional
    /// expected value `expected`.
    #[must_use]
    pub fn diagnose(local: u64, hardware: u64, expected: Option<u64>) -> Self {
        if hardware == local {
            Self::Consistent
        } else if expected == Some(hardware) {
            Self::LocalTallyCorrupted
        } else if expected == Some(local) {
            Self::ControllerCorrupted
        } else {
            Self::Unattributed
        }
    }

    #[must_use]
    pub fn is_consistent(self) -> bool {
        self == Self::Consistent
    }
}

/// Result of checking one activator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivatorCheck {
    pub index: usize,
    pub local: u64,
    pub hardware: u64,
    pub expected: Option<u64>,
    pub diagnosis: MeteringDiagnosis,
}

impl ActivatorCheck {
    /// Error describing an inconsistent check.
    #[must_use]
    pub fn to_error(&self) -> Option<DrmError> {
        let culprit = match self.diagnosis {
            MeteringDiagnosis::Consistent => return None,
            MeteringDiagnosis::ControllerCorrupted => "DRM controller",
            MeteringDiagnosis::LocalTallyCorrupted | MeteringDiagnosis::Unattributed => {
                "local metering counter"
            }
        };
        Some(DrmError::CtlrError(format!(
            "metering mismatch on activator {}: {culprit} corrupted \
             (local={}, hardware={}, expected={})",
            self.index,
            self.local,
            self.hardware,
            self.expected
                .map_or_else(|| "n/a".to_string(), |e| e.to_string())
        )))
    }
}

/// Per-session usage tallies.
#[derive(Debug, Clone, Default)]
pub struct MeteringAggregator {
    baselines: Vec<u64>,
    tallies: Vec<u64>,
    acknowledged: u64,
}

impl MeteringAggregator {
    pub fn new(activators: usize) -> Self {
        Self {
            baselines: vec![0; activators],
            tallies: vec![0; activators],
            acknowledged: 0,
        }
    }

    /// Records the counters at session start and zeroes every tally.
    pub fn start_session(&mut self, counters: &[u64]) {
        self.baselines = counters.to_vec();
        self.tallies = vec![0; counters.len()];
        self.acknowledged = 0;
    }

    /// Zeroes every tally at session close.
    pub fn reset(&mut self) {
        self.tallies.iter_mut().for_each(|t| *t = 0);
        self.acknowledged = 0;
    }

    /// Updates the tallies from fresh counter values.
    ///
    /// # Errors
    ///
    /// Returns `CtlrError` if a counter went backwards or the activator count
    /// changed; affected tallies keep their previous value.
    pub fn observe(&mut self, counters: &[u64]) -> DrmResult<()> {
        if counters.len() != self.tallies.len() {
            return Err(DrmError::CtlrError(format!(
                "expected {} metering counters, read {}",
                self.tallies.len(),
                counters.len()
            )));
        }

        let mut first_error = None;
        for (index, &counter) in counters.iter().enumerate() {
            let usage = counter.checked_sub(self.baselines[index]);
            match usage {
                Some(usage) if usage >= self.tallies[index] => self.tallies[index] = usage,
                _ => {
                    first_error.get_or_insert_with(|| {
                        DrmError::CtlrError(format!(
                            "metering counter of activator {index} went backwards \
                             (baseline {}, tally {}, read {counter})",
                            self.baselines[index], self.tallies[index]
                        ))
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Usage per activator since session start.
    #[must_use]
    pub fn tallies(&self) -> &[u64] {
        &self.tallies
    }

    /// Total usage since session start.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.tallies.iter().sum()
    }

    /// Total last acknowledged by the licensing service.
    #[must_use]
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn acknowledge(&mut self, total: u64) {
        self.acknowledged = total;
    }

    /// Diagnoses every activator against raw `counters` and the caller's
    /// `expected` usage since session start.
    #[must_use]
    pub fn check(&self, counters: &[u64], expected: &[u64]) -> Vec<ActivatorCheck> {
        self.tallies
            .iter()
            .enumerate()
            .map(|(index, &local)| {
                let hardware = counters
                    .get(index)
                    .map_or(0, |c| c.saturating_sub(self.baselines[index]));
                let expected = expected.get(index).copied();
                ActivatorCheck {
                    index,
                    local,
                    hardware,
                    expected,
                    diagnosis: MeteringDiagnosis::diagnose(local, hardware, expected),
                }
            })
            .collect()
    }
}
