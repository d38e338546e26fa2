//! Reduces a waveform to the disjoint sample ranges containing signal.
use std::ops::Range;

/// The half-open sample range `[start, stop)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HitWindow {
    pub(crate) start: usize,
    pub(crate) stop: usize,
}

impl HitWindow {
    pub(crate) fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    pub(crate) fn len(&self) -> usize {
        self.stop - self.start
    }

    pub(crate) fn range(&self) -> Range<usize> {
        self.start..self.stop
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WindowParameters {
    /// A sample is active if its value exceeds this.
    pub(crate) min_amplitude: f64,
    /// Number of samples each window is extended backwards by.
    pub(crate) buffer: usize,
    /// A run of active samples is only kept if its highest sample is not exceeded
    /// by any sample within this many indices of it. Zero keeps every run.
    pub(crate) peak_window: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct WindowExtractor {
    parameters: WindowParameters,
}

impl WindowExtractor {
    pub(crate) fn new(parameters: WindowParameters) -> Self {
        Self { parameters }
    }

    pub(crate) fn buffer(&self) -> usize {
        self.parameters.buffer
    }

    /// Returns the ordered, disjoint and non-adjacent windows around each qualifying run of active samples.
    #[tracing::instrument(skip_all, level = "trace", fields(num_samples = waveform.len(), num_windows))]
    pub(crate) fn extract<T: Copy + Into<f64>>(&self, waveform: &[T]) -> Vec<HitWindow> {
        let windows = merge(self.find_candidates(waveform));
        tracing::Span::current().record("num_windows", windows.len());
        windows
    }

    /// Candidate windows in scan order, which may overlap once padded.
    fn find_candidates<T: Copy + Into<f64>>(&self, waveform: &[T]) -> Vec<HitWindow> {
        let mut candidates = Vec::new();
        let mut run_start = None;
        // The trailing `false` closes a run which reaches the end of the waveform.
        let activity = waveform
            .iter()
            .map(|&value| value.into() > self.parameters.min_amplitude)
            .chain(std::iter::once(false));
        for (index, active) in activity.enumerate() {
            match (run_start, active) {
                (None, true) => run_start = Some(index),
                (Some(start), false) => {
                    if self.is_local_maximum(waveform, start..index) {
                        candidates.push(HitWindow::new(
                            start.saturating_sub(self.parameters.buffer),
                            index,
                        ));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        candidates
    }

    fn is_local_maximum<T: Copy + Into<f64>>(&self, waveform: &[T], run: Range<usize>) -> bool {
        if self.parameters.peak_window == 0 {
            return true;
        }
        let Some((peak_index, peak)) = run
            .clone()
            .zip(waveform.get(run).unwrap_or_default().iter().map(|&v| v.into()))
            .fold(None, |best: Option<(usize, f64)>, (index, value)| match best {
                Some((_, best_value)) if best_value >= value => best,
                _ => Some((index, value)),
            })
        else {
            return false;
        };
        let neighbourhood = peak_index.saturating_sub(self.parameters.peak_window)
            ..(peak_index + self.parameters.peak_window + 1).min(waveform.len());
        waveform
            .get(neighbourhood)
            .unwrap_or_default()
            .iter()
            .all(|&value| value.into() <= peak)
    }
}

/// Merges overlapping or adjacent windows in a single pass.
/// `windows` must be ordered by start; the result satisfies `stop[i] < start[i + 1]`.
pub(crate) fn merge(windows: impl IntoIterator<Item = HitWindow>) -> Vec<HitWindow> {
    let mut merged = Vec::<HitWindow>::new();
    for window in windows {
        match merged.last_mut() {
            Some(current) if window.start <= current.stop => {
                current.stop = current.stop.max(window.stop)
            }
            _ => merged.push(window),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn extractor(min_amplitude: f64, buffer: usize, peak_window: usize) -> WindowExtractor {
        WindowExtractor::new(WindowParameters {
            min_amplitude,
            buffer,
            peak_window,
        })
    }

    fn windows(pairs: &[(usize, usize)]) -> Vec<HitWindow> {
        pairs
            .iter()
            .map(|&(start, stop)| HitWindow::new(start, stop))
            .collect()
    }

    #[test]
    fn zero_data() {
        let data: [i32; 0] = [];
        assert!(extractor(0.0, 2, 0).extract(&data).is_empty());
    }

    #[test]
    fn nothing_above_threshold() {
        let data = [0, 1, 2, 3, 3, 2, 1];
        assert!(extractor(3.0, 2, 0).extract(&data).is_empty());
    }

    #[test]
    fn single_run_with_buffer() {
        let data = [0, 0, 0, 0, 5, 7, 6, 0, 0, 0];
        assert_eq!(extractor(1.0, 2, 0).extract(&data), windows(&[(2, 7)]));
    }

    #[test]
    fn buffer_clipped_at_zero() {
        let data = [0, 5, 5, 0, 0];
        assert_eq!(extractor(1.0, 4, 0).extract(&data), windows(&[(0, 3)]));
    }

    #[test]
    fn run_reaching_the_end() {
        let data = [0.0, 0.0, 0.0, 0.5, 2.5, 3.0];
        assert_eq!(extractor(0.4, 1, 0).extract(&data), windows(&[(2, 6)]));
    }

    #[test]
    fn separate_runs() {
        let data = [0, 4, 4, 0, 0, 0, 0, 4, 0];
        assert_eq!(
            extractor(1.0, 2, 0).extract(&data),
            windows(&[(0, 3), (5, 8)])
        );
    }

    #[test]
    fn padded_runs_merge() {
        // The second window would start at the first window's stop.
        let data = [0, 4, 4, 0, 0, 4, 0];
        assert_eq!(extractor(1.0, 2, 0).extract(&data), windows(&[(0, 6)]));
        // Without padding they remain apart.
        assert_eq!(
            extractor(1.0, 0, 0).extract(&data),
            windows(&[(1, 3), (5, 6)])
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        let data = [3, 4, 3];
        assert_eq!(extractor(3.0, 0, 0).extract(&data), windows(&[(1, 2)]));
    }

    #[test]
    fn peak_qualification() {
        let data = [0, 3, 0, 9, 9, 0, 0, 0, 2, 0];
        // The run at index 1 is overshadowed by the run at index 3.
        assert_eq!(
            extractor(1.0, 0, 2).extract(&data),
            windows(&[(3, 5), (8, 9)])
        );
        // Equal samples do not disqualify a peak.
        assert_eq!(extractor(1.0, 0, 1).extract(&data[3..5]), windows(&[(0, 2)]));
        assert_eq!(
            extractor(1.0, 0, 0).extract(&data),
            windows(&[(1, 2), (3, 5), (8, 9)])
        );
    }

    #[test]
    fn merge_absorbs_overlapping_and_adjacent() {
        let merged = merge(windows(&[(0, 4), (2, 6), (6, 8), (9, 12), (10, 11)]));
        assert_eq!(merged, windows(&[(0, 8), (9, 12)]));
    }

    #[test]
    fn merge_is_idempotent() {
        let merged = merge(windows(&[(0, 4), (3, 5), (7, 9), (9, 10), (20, 25)]));
        assert_eq!(merge(merged.clone()), merged);
    }

    #[test]
    fn random_waveforms_give_disjoint_windows() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let data = (0..rng.random_range(1..200))
                .map(|_| rng.random_range(0..10))
                .collect::<Vec<i32>>();
            let extractor = extractor(
                rng.random_range(0..8) as f64,
                rng.random_range(0..6),
                rng.random_range(0..3),
            );
            let found = extractor.extract(&data);
            assert!(found.iter().all(|w| w.stop > w.start && w.stop <= data.len()));
            assert!(found.windows(2).all(|pair| pair[0].stop < pair[1].start));
            assert_eq!(merge(found.clone()), found);
        }
    }
}
