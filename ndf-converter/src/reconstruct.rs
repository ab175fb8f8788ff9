//! Channel timing reconstruction
//!
//! Turns the interleaved message stream into one interval sequence per
//! channel:
//! 1. partition messages by channel, keeping each message's arrival index
//! 2. resolve every message to a time through the [`ClockModel`]
//! 3. restore time order (out-of-order arrival) and drop duplicate ticks
//! 4. split into contiguous runs wherever a sample leaves its grid slot
//! 5. chunk runs into intervals of the configured duration
//!
//! Lost messages show up as interval boundaries. No sample is ever
//! fabricated and no gap is ever compressed.

use crate::clock::ClockModel;
use crate::config::ExportConfig;
use crate::glitch::count_glitches;
use crate::types::{ChannelData, Interval, RawMessage};
use serde::Serialize;
use std::collections::BTreeMap;

/// A message tagged with its position in the original stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivedMessage {
    pub arrival: usize,
    pub message: RawMessage,
}

/// Per-channel diagnostics from reconstruction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    /// Messages received for the channel
    pub messages: usize,
    /// Interval boundaries forced by spacing outside the tolerance
    pub gaps: usize,
    /// Messages that arrived after a later-timed message
    pub reordered: usize,
    /// Messages dropped because their tick repeated the previous one
    pub duplicates: usize,
    /// Samples the export glitch filter will correct
    pub glitches: usize,
}

/// Reconstructed channels plus their diagnostics
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub channels: BTreeMap<u8, ChannelData>,
    pub reports: BTreeMap<u8, ChannelReport>,
}

/// Group messages by channel id, preserving arrival order
pub fn partition(messages: &[RawMessage]) -> BTreeMap<u8, Vec<ArrivedMessage>> {
    let mut grouped: BTreeMap<u8, Vec<ArrivedMessage>> = BTreeMap::new();
    for (arrival, message) in messages.iter().enumerate() {
        grouped
            .entry(message.channel_id)
            .or_default()
            .push(ArrivedMessage {
                arrival,
                message: *message,
            });
    }
    grouped
}

/// Reconstruct every channel selected by `config`
///
/// Channels requested explicitly but absent from the stream are returned
/// with no intervals.
pub fn reconstruct_all(
    messages: &[RawMessage],
    clock: &ClockModel,
    config: &ExportConfig,
) -> Reconstruction {
    let mut grouped = partition(messages);
    let mut result = Reconstruction::default();

    let selected: Vec<u8> = match &config.channels {
        Some(channels) => channels.clone(),
        None => grouped.keys().copied().collect(),
    };

    for channel in selected {
        let entries = grouped.remove(&channel).unwrap_or_default();
        let rate = config.rate_for(channel);
        let (data, report) = reconstruct_channel(channel, &entries, clock, rate, config);

        if data.is_empty() {
            log::warn!("Channel {} has no samples", channel);
        } else {
            log::info!(
                "Channel {}: {} samples in {} intervals ({} gaps)",
                channel,
                data.sample_count(),
                data.intervals.len(),
                report.gaps
            );
        }

        result.channels.insert(channel, data);
        result.reports.insert(channel, report);
    }

    result
}

/// Reconstruct one channel's intervals
pub fn reconstruct_channel(
    channel: u8,
    entries: &[ArrivedMessage],
    clock: &ClockModel,
    rate: f64,
    config: &ExportConfig,
) -> (ChannelData, ChannelReport) {
    let mut report = ChannelReport {
        messages: entries.len(),
        ..Default::default()
    };

    let timed = timed_samples(entries, clock, &mut report);
    let runs = contiguous_runs(channel, &timed, rate, config.timing.sample_tolerance, &mut report);
    let per_interval = config.samples_per_interval(rate).max(1);

    let intervals: Vec<Interval> = runs
        .into_iter()
        .flat_map(|run| chunk_run(run, per_interval, rate))
        .collect();
    report.glitches = intervals
        .iter()
        .map(|interval| count_glitches(&interval.samples, config.glitch_threshold))
        .sum();

    let data = ChannelData {
        channel_id: channel,
        sample_rate: rate,
        intervals,
    };
    (data, report)
}

/// Resolve times, restore time order and drop repeated ticks
fn timed_samples(
    entries: &[ArrivedMessage],
    clock: &ClockModel,
    report: &mut ChannelReport,
) -> Vec<(f64, u16)> {
    let mut timed: Vec<(f64, u16)> = Vec::with_capacity(entries.len());
    let mut latest = f64::NEG_INFINITY;

    for entry in entries {
        let time = clock.time_at(entry.arrival, entry.message.tick);
        if time < latest {
            report.reordered += 1;
        }
        latest = latest.max(time);
        timed.push((time, entry.message.sample_value));
    }

    if report.reordered > 0 {
        log::debug!("Restoring time order of {} late messages", report.reordered);
        // Stable: equal times keep arrival order
        timed.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    let before = timed.len();
    timed.dedup_by(|later, earlier| later.0 == earlier.0);
    report.duplicates = before - timed.len();

    timed
}

/// Split time-ordered samples into gap-free runs
///
/// Each run is returned as one interval starting at its first sample's
/// reconstructed time; samples inside a run sit on the nominal grid. A
/// sample whose time is more than `tolerance` periods away from its grid
/// slot (`start + n / rate`) opens a new run, so drift accumulated over
/// many small deviations is caught as well as a single lost message.
pub fn contiguous_runs(
    channel: u8,
    timed: &[(f64, u16)],
    rate: f64,
    tolerance: f64,
    report: &mut ChannelReport,
) -> Vec<Interval> {
    let period = 1.0 / rate;
    let max_deviation = tolerance * period;
    let mut runs: Vec<Interval> = Vec::new();

    let mut iter = timed.iter();
    let (first_time, first_value) = match iter.next() {
        Some(&first) => first,
        None => return runs,
    };
    let mut current = Interval::new(first_time, vec![first_value]);

    for &(time, value) in iter {
        let slot = current.start_time + current.samples.len() as f64 * period;
        if (time - slot).abs() > max_deviation {
            log::info!(
                "Channel {} gap at {:.6} s: expected {:.6} s",
                channel,
                time,
                slot
            );
            report.gaps += 1;
            runs.push(std::mem::replace(&mut current, Interval::new(time, Vec::new())));
        }
        current.samples.push(value);
    }

    runs.push(current);
    runs
}

/// Cut a run into intervals of `per_interval` samples; the last may be short
fn chunk_run(run: Interval, per_interval: usize, rate: f64) -> Vec<Interval> {
    run.samples
        .chunks(per_interval)
        .enumerate()
        .map(|(k, chunk)| {
            Interval::new(
                run.start_time + (k * per_interval) as f64 / rate,
                chunk.to_vec(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;

    /// Interleave 128 Hz clock messages with one 512 Hz data channel
    fn stream(seconds: usize, skip_data: &[usize]) -> Vec<RawMessage> {
        let mut messages = Vec::new();
        for i in 0..seconds * 512 {
            if i % 4 == 0 {
                messages.push(RawMessage::new(0, 1000, 10_000 + 64 * i as u64));
            }
            if !skip_data.contains(&i) {
                messages.push(RawMessage::new(1, (i % 65536) as u16, 10_000 + 64 * i as u64));
            }
        }
        messages
    }

    fn config(interval_length: f64) -> ExportConfig {
        ExportConfig::new().with_interval_length(interval_length)
    }

    #[test]
    fn test_partition_preserves_arrival() {
        let grouped = partition(&stream(1, &[]));
        assert_eq!(grouped[&0].len(), 128);
        assert_eq!(grouped[&1].len(), 512);
        assert_eq!(grouped[&1][0].arrival, 1);
        assert!(grouped[&1].windows(2).all(|w| w[0].arrival < w[1].arrival));
    }

    #[test]
    fn test_uniform_stream_is_one_interval() {
        let messages = stream(3, &[]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(10.0));

        let data = &result.channels[&1];
        assert_eq!(data.intervals.len(), 1);
        let expected = 3 * 512;
        assert!(data.sample_count().abs_diff(expected) <= 1);
        assert_eq!(data.intervals[0].start_time, 0.0);
        assert_eq!(result.reports[&1].gaps, 0);
    }

    #[test]
    fn test_dropped_message_splits_in_two() {
        let messages = stream(2, &[700]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(10.0));

        let data = &result.channels[&1];
        assert_eq!(data.intervals.len(), 2);
        assert_eq!(data.intervals[0].len(), 700);
        assert_eq!(data.intervals[1].len(), 1024 - 701);
        assert_eq!(data.intervals[1].start_time, 701.0 / 512.0);
        assert_eq!(result.reports[&1].gaps, 1);
    }

    #[test]
    fn test_chunking_into_intervals() {
        let messages = stream(2, &[]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let mut partial = messages.clone();
        // Trim the tail so the last interval is short
        partial.truncate(partial.len() - 10);
        let result = reconstruct_all(&partial, &clock, &config(1.0));

        let data = &result.channels[&1];
        assert_eq!(data.intervals.len(), 2);
        assert_eq!(data.intervals[0].len(), 512);
        assert!(data.intervals[1].len() < 512);
        assert_eq!(data.intervals[1].start_time, 1.0);
    }

    #[test]
    fn test_gap_forces_boundary_inside_interval() {
        let messages = stream(1, &[100]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(1.0));

        let lens: Vec<_> = result.channels[&1].intervals.iter().map(|i| i.len()).collect();
        assert_eq!(lens, vec![100, 411]);
    }

    #[test]
    fn test_out_of_order_arrival_is_restored() {
        let mut messages = stream(1, &[]);
        // Swap two consecutive data messages of channel 1
        let a = messages.iter().position(|m| m.channel_id == 1 && m.tick == 10_000 + 64 * 10).unwrap();
        let b = messages.iter().position(|m| m.channel_id == 1 && m.tick == 10_000 + 64 * 11).unwrap();
        messages.swap(a, b);

        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(10.0));

        let data = &result.channels[&1];
        assert_eq!(data.intervals.len(), 1);
        assert_eq!(data.intervals[0].samples[10], 10);
        assert_eq!(data.intervals[0].samples[11], 11);
        assert_eq!(result.reports[&1].reordered, 1);
    }

    #[test]
    fn test_duplicate_ticks_dropped() {
        let mut messages = stream(1, &[]);
        let dup = *messages.iter().find(|m| m.channel_id == 1).unwrap();
        messages.insert(3, dup);

        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(10.0));
        assert_eq!(result.channels[&1].sample_count(), 512);
        assert_eq!(result.reports[&1].duplicates, 1);
    }

    #[test]
    fn test_clock_channel_at_clock_rate() {
        let messages = stream(1, &[]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(1.0));

        let data = &result.channels[&0];
        assert_eq!(data.sample_rate, 128.0);
        assert_eq!(data.intervals.len(), 1);
        assert_eq!(data.sample_count(), 128);
    }

    #[test]
    fn test_requested_missing_channel_is_empty() {
        let messages = stream(1, &[]);
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let cfg = config(1.0).with_channels(vec![1, 5]);
        let result = reconstruct_all(&messages, &clock, &cfg);

        assert!(result.channels[&5].is_empty());
        assert_eq!(result.channels[&5].intervals.len(), 0);
        assert!(!result.channels.contains_key(&0));
    }

    #[test]
    fn test_steady_off_rate_stream_is_not_compressed() {
        let period = 1.0 / 512.0;
        let timed: Vec<(f64, u16)> = (0..100).map(|i| (i as f64 * 1.4 * period, i as u16)).collect();
        let mut report = ChannelReport::default();
        let runs = contiguous_runs(1, &timed, 512.0, 0.5, &mut report);

        assert!(runs.len() > 1);
        assert_eq!(report.gaps, runs.len() - 1);
        assert_eq!(runs.iter().map(|r| r.len()).sum::<usize>(), 100);
        // Every placed sample stays within half a period of its real time
        let mut n = 0;
        for run in &runs {
            for i in 0..run.len() {
                let placed = run.start_time + i as f64 * period;
                assert!((placed - timed[n].0).abs() <= 0.5 * period + 1e-12);
                n += 1;
            }
        }
    }

    #[test]
    fn test_small_jitter_stays_one_run() {
        let period = 1.0 / 512.0;
        let timed: Vec<(f64, u16)> = (0..200)
            .map(|i| {
                let jitter = if i % 2 == 0 { 0.2 } else { -0.2 } * period;
                (i as f64 * period + jitter, 0)
            })
            .collect();
        let mut report = ChannelReport::default();
        let runs = contiguous_runs(1, &timed, 512.0, 0.5, &mut report);
        assert_eq!(runs.len(), 1);
        assert_eq!(report.gaps, 0);
    }

    #[test]
    fn test_glitches_counted_per_interval() {
        let mut messages = stream(1, &[]);
        let spike = messages
            .iter_mut()
            .find(|m| m.channel_id == 1 && m.tick == 10_000 + 64 * 20)
            .unwrap();
        spike.sample_value = 60_000;

        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(1.0));
        assert_eq!(result.reports[&1].glitches, 1);

        let off = config(1.0).with_glitch_threshold(0);
        let result = reconstruct_all(&messages, &clock, &off);
        assert_eq!(result.reports[&1].glitches, 0);
    }

    #[test]
    fn test_single_sample_channel() {
        let messages = vec![RawMessage::new(0, 0, 0), RawMessage::new(2, 7, 64)];
        let clock = ClockModel::from_messages(&messages, &TimingConfig::default());
        let result = reconstruct_all(&messages, &clock, &config(1.0));
        assert_eq!(result.channels[&2].intervals, vec![Interval::new(64.0 / 32768.0, vec![7])]);
    }
}
