//! Pure statistical calculators: dominant direction and tendency.
//!
//! Both functions are deterministic by construction. The direction mode is
//! computed over a fixed 360-slot histogram scanned in ascending degree
//! order, so ties always resolve to the lowest degree — never to whatever
//! a hash map happened to yield first.

use std::collections::BTreeMap;

use crate::types::Tendency;

// ============================================================================
// Direction histogram
// ============================================================================

/// Frequency histogram over rounded wind-direction degrees.
///
/// Fixed-size array indexed 0-359. Directions are rounded to the nearest
/// whole degree on increment; 359.5 and above wrap to 0.
#[derive(Debug, Clone)]
pub struct DirectionHistogram {
    counts: [u32; 360],
}

impl Default for DirectionHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectionHistogram {
    pub fn new() -> Self {
        Self { counts: [0; 360] }
    }

    /// Count one observation of `direction_deg`, rounded to a whole degree.
    pub fn increment(&mut self, direction_deg: f64) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let degree = (direction_deg.round().rem_euclid(360.0)) as usize;
        self.counts[degree] = self.counts[degree].saturating_add(1);
    }

    /// Fold another histogram into this one.
    pub fn merge(&mut self, other: &Self) {
        for (slot, count) in self.counts.iter_mut().zip(other.counts.iter()) {
            *slot = slot.saturating_add(*count);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Total number of observations recorded.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// The dominant (modal) direction, or `None` for an empty histogram.
    ///
    /// Scans ascending from 0°; a later degree must have a strictly greater
    /// count to displace the current winner, so the lowest degree wins ties.
    pub fn dominant(&self) -> Option<u16> {
        let mut best: Option<(u16, u32)> = None;
        for (degree, &count) in self.counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let degree = degree as u16;
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((degree, count)),
            }
        }
        best.map(|(degree, _)| degree)
    }
}

// ============================================================================
// Mode over discrete votes
// ============================================================================

/// Mode of a list of direction votes (one vote per contributing record).
///
/// Used by the rollup aggregators, where each finer-grained record
/// contributes its dominant direction as a single unweighted vote. Same
/// tie-break as [`DirectionHistogram::dominant`]: ascending scan, strictly
/// greater count wins, lowest degree wins ties.
pub fn dominant_vote(votes: &[u16]) -> Option<u16> {
    let mut tally: BTreeMap<u16, u32> = BTreeMap::new();
    for &vote in votes {
        *tally.entry(vote).or_insert(0) += 1;
    }

    let mut best: Option<(u16, u32)> = None;
    for (degree, count) in tally {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((degree, count)),
        }
    }
    best.map(|(degree, _)| degree)
}

// ============================================================================
// Tendency
// ============================================================================

/// Classify the trend between the current average and its predecessor.
///
/// Boundary values resolve to `Stable`: a trend requires the current value
/// to be *strictly* beyond `previous ± threshold`. No predecessor means
/// `Stable` by definition.
pub fn tendency(current_avg: f64, previous_avg: Option<f64>, threshold: f64) -> Tendency {
    let Some(previous) = previous_avg else {
        return Tendency::Stable;
    };

    if current_avg > previous + threshold {
        Tendency::Increasing
    } else if current_avg < previous - threshold {
        Tendency::Decreasing
    } else {
        Tendency::Stable
    }
}
