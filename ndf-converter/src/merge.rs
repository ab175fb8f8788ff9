//! Multi-channel merger
//!
//! Aligns several channels on one time grid for a single unified export.
//! The grid runs at the export sample rate across the window every channel
//! covers: from the latest first sample to the earliest last sample. At
//! each grid point every channel contributes its nearest sample within half
//! of its own sample period. Rows where any channel has no such sample are
//! skipped entirely; nothing is interpolated and no partial row is emitted.

use crate::config::ExportConfig;
use crate::export::counts_to_millivolts;
use crate::glitch::glitch_filter;
use crate::types::{ChannelData, ConverterError, ExportRecord, Result};
use std::collections::BTreeMap;

/// Slack absorbing floating point noise between grid and sample times
const TIME_EPSILON: f64 = 1e-9;

/// Result of merging channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Channels that made it into the export, in request order
    pub channels: Vec<u8>,
    /// Requested channels left out because they had no samples
    pub excluded: Vec<u8>,
    /// Rows in strictly increasing time order
    pub records: Vec<ExportRecord>,
    /// Grid points skipped because at least one channel had no sample
    pub rows_dropped: usize,
    /// Per channel: grid points where that channel had no sample
    pub dropped_per_channel: BTreeMap<u8, usize>,
    /// Common coverage window, if the channels overlap at all
    pub window: Option<(f64, f64)>,
}

/// Time-ordered samples of one channel, flattened across intervals
struct SampleTrack {
    times: Vec<f64>,
    values: Vec<u16>,
    tolerance: f64,
}

impl SampleTrack {
    fn new(channel: &ChannelData, glitch_threshold: u16) -> Self {
        let count = channel.sample_count();
        let mut times = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);

        for interval in &channel.intervals {
            let filtered = glitch_filter(&interval.samples, glitch_threshold);
            for (i, value) in filtered.into_iter().enumerate() {
                times.push(interval.start_time + i as f64 / channel.sample_rate);
                values.push(value);
            }
        }

        Self {
            times,
            values,
            tolerance: 0.5 / channel.sample_rate + TIME_EPSILON,
        }
    }

    /// Nearest sample to `t` within tolerance; the earlier one wins a tie
    fn nearest(&self, t: f64) -> Option<u16> {
        let idx = self.times.partition_point(|&x| x < t);

        let earlier = idx.checked_sub(1).map(|i| (i, t - self.times[i]));
        let later = self.times.get(idx).map(|&x| (idx, x - t));

        let best = match (earlier, later) {
            (Some(e), Some(l)) => {
                if e.1 <= l.1 + TIME_EPSILON {
                    e
                } else {
                    l
                }
            }
            (Some(e), None) => e,
            (None, Some(l)) => l,
            (None, None) => return None,
        };

        if best.1 <= self.tolerance {
            Some(self.values[best.0])
        } else {
            None
        }
    }
}

/// Merge `requested` channels, in that column order, into export records
pub fn merge_channels(
    requested: &[u8],
    channels: &BTreeMap<u8, ChannelData>,
    config: &ExportConfig,
) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();
    let mut included: Vec<(u8, &ChannelData)> = Vec::new();

    for &id in requested {
        match channels.get(&id) {
            Some(data) if !data.is_empty() => included.push((id, data)),
            _ => {
                log::warn!("Channel {} has no samples, excluded from merge", id);
                outcome.excluded.push(id);
            }
        }
    }

    if included.is_empty() {
        return Err(ConverterError::NoChannels);
    }

    outcome.channels = included.iter().map(|(id, _)| *id).collect();
    for &(id, _) in &included {
        outcome.dropped_per_channel.insert(id, 0);
    }

    let start = included
        .iter()
        .filter_map(|(_, d)| d.first_time())
        .fold(f64::NEG_INFINITY, f64::max);
    let end = included
        .iter()
        .filter_map(|(_, d)| d.last_time())
        .fold(f64::INFINITY, f64::min);

    if end < start {
        log::warn!(
            "Channels {:?} do not overlap in time, nothing to merge",
            outcome.channels
        );
        return Ok(outcome);
    }
    outcome.window = Some((start, end));

    let tracks: Vec<SampleTrack> = included
        .iter()
        .map(|(_, data)| SampleTrack::new(data, config.glitch_threshold))
        .collect();

    let rate = config.sample_rate;
    let rows = ((end - start) * rate + TIME_EPSILON).floor() as usize + 1;
    outcome.records.reserve(rows);

    for k in 0..rows {
        let t = start + k as f64 / rate;
        let mut values = Vec::with_capacity(tracks.len());
        let mut complete = true;

        for (track, (id, _)) in tracks.iter().zip(&included) {
            match track.nearest(t) {
                Some(sample) => values.push(counts_to_millivolts(sample, config.range_mv)),
                None => {
                    complete = false;
                    if let Some(count) = outcome.dropped_per_channel.get_mut(id) {
                        *count += 1;
                    }
                }
            }
        }

        if complete {
            outcome.records.push(ExportRecord { time: t, values });
        } else {
            outcome.rows_dropped += 1;
        }
    }

    if outcome.rows_dropped > 0 {
        log::info!(
            "Merge skipped {} of {} rows for coverage mismatch {:?}",
            outcome.rows_dropped,
            rows,
            outcome.dropped_per_channel
        );
    }
    log::debug!(
        "Merged {} rows over [{:.6}, {:.6}] s",
        outcome.records.len(),
        start,
        end
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;

    fn data(id: u8, rate: f64, intervals: Vec<Interval>) -> ChannelData {
        ChannelData {
            channel_id: id,
            sample_rate: rate,
            intervals,
        }
    }

    fn set(channels: Vec<ChannelData>) -> BTreeMap<u8, ChannelData> {
        channels.into_iter().map(|c| (c.channel_id, c)).collect()
    }

    fn config() -> ExportConfig {
        ExportConfig::new().with_glitch_threshold(0)
    }

    #[test]
    fn test_full_overlap_row_count() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 512])]),
            data(2, 512.0, vec![Interval::new(0.0, vec![32768; 512])]),
        ]);
        let outcome = merge_channels(&[1, 2], &channels, &config()).unwrap();

        let duration = 511.0 / 512.0;
        let expected = (duration * 512.0_f64).floor() as usize + 1;
        assert_eq!(outcome.records.len(), expected);
        assert!(outcome.records.iter().all(|r| r.values.len() == 2));
        assert_eq!(outcome.rows_dropped, 0);
        assert!(outcome.records.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn test_window_is_intersection() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 1024])]),
            data(2, 512.0, vec![Interval::new(0.5, vec![32768; 1024])]),
        ]);
        let outcome = merge_channels(&[1, 2], &channels, &config()).unwrap();

        let (start, end) = outcome.window.unwrap();
        assert_eq!(start, 0.5);
        assert_eq!(end, 1023.0 / 512.0);
        assert_eq!(outcome.records.len(), 768);
        assert_eq!(outcome.records[0].time, 0.5);
    }

    #[test]
    fn test_column_order_follows_request() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![0; 4])]),
            data(2, 512.0, vec![Interval::new(0.0, vec![65535; 4])]),
        ]);
        let outcome = merge_channels(&[2, 1], &channels, &config()).unwrap();
        assert_eq!(outcome.channels, vec![2, 1]);
        assert!(outcome.records[0].values[0] > 0.0);
        assert_eq!(outcome.records[0].values[1], -60.0);
    }

    #[test]
    fn test_gap_drops_rows_all_or_nothing() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 100])]),
            data(
                2,
                512.0,
                vec![
                    Interval::new(0.0, vec![32768; 40]),
                    Interval::new(50.0 / 512.0, vec![32768; 50]),
                ],
            ),
        ]);
        let outcome = merge_channels(&[1, 2], &channels, &config()).unwrap();

        // Window covers samples 0..=99 of channel 2's range; 40..49 are missing
        assert_eq!(outcome.rows_dropped, 10);
        assert_eq!(outcome.dropped_per_channel[&2], 10);
        assert_eq!(outcome.dropped_per_channel[&1], 0);
        assert_eq!(outcome.records.len(), 90);
        assert!(outcome.records.iter().all(|r| r.values.len() == 2));
    }

    #[test]
    fn test_equidistant_tie_takes_earlier_sample() {
        // 128 Hz samples sit every 4th row; row 2 is exactly between two of them
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 9])]),
            data(0, 128.0, vec![Interval::new(0.0, vec![0, 65535, 0])]),
        ]);
        let outcome = merge_channels(&[1, 0], &channels, &config()).unwrap();

        assert_eq!(outcome.records.len(), 9);
        assert_eq!(outcome.records[2].values[1], -60.0);
        assert!(outcome.records[3].values[1] > 59.0);
        assert_eq!(outcome.records[6].values[1], counts_to_millivolts(65535, 120.0));
    }

    #[test]
    fn test_empty_channel_excluded() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 8])]),
            data(3, 512.0, vec![]),
        ]);
        let outcome = merge_channels(&[1, 3, 9], &channels, &config()).unwrap();
        assert_eq!(outcome.channels, vec![1]);
        assert_eq!(outcome.excluded, vec![3, 9]);
        assert_eq!(outcome.records.len(), 8);
    }

    #[test]
    fn test_no_channels_is_error() {
        let channels = set(vec![data(3, 512.0, vec![])]);
        let result = merge_channels(&[3], &channels, &config());
        assert!(matches!(result, Err(ConverterError::NoChannels)));
    }

    #[test]
    fn test_disjoint_channels_produce_no_rows() {
        let channels = set(vec![
            data(1, 512.0, vec![Interval::new(0.0, vec![32768; 8])]),
            data(2, 512.0, vec![Interval::new(5.0, vec![32768; 8])]),
        ]);
        let outcome = merge_channels(&[1, 2], &channels, &config()).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.window, None);
    }

    #[test]
    fn test_glitch_filter_before_merge() {
        let channels = set(vec![data(
            1,
            512.0,
            vec![Interval::new(0.0, vec![32768, 60000, 32768])],
        )]);
        let outcome =
            merge_channels(&[1], &channels, &ExportConfig::new().with_glitch_threshold(500)).unwrap();
        assert!(outcome.records.iter().all(|r| r.values[0] == 0.0));
    }
}
