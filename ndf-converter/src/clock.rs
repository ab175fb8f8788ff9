//! Reference clock model
//!
//! Channel 0 carries clock messages at a fixed rate. The model is derived
//! once from those messages and then consulted read-only by every channel
//! reconstruction, so no reconstruction depends on hidden shared state.
//!
//! The clock is split into segments. A segment ends where a clock tick goes
//! backwards or jumps further than the configured tolerance; the next
//! segment's time origin is reset to one clock period after the previous
//! segment's last message rather than extrapolated across the jump.

use crate::config::TimingConfig;
use crate::types::RawMessage;

/// A run of clock messages with monotonic, bounded tick spacing
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSegment {
    /// Arrival index (position in the message stream) of the first clock message
    pub first_arrival: usize,
    /// Tick of the first clock message
    pub start_tick: u64,
    /// Tick of the last clock message
    pub end_tick: u64,
    /// Time in seconds assigned to `start_tick`
    pub origin: f64,
    /// Number of clock messages in the segment
    pub messages: usize,
}

impl ClockSegment {
    fn time_of(&self, tick: u64, tick_rate: f64) -> f64 {
        self.origin + (tick as f64 - self.start_tick as f64) / tick_rate
    }
}

/// Immutable tick → time mapping derived from the clock channel
#[derive(Debug, Clone, PartialEq)]
pub struct ClockModel {
    segments: Vec<ClockSegment>,
    tick_rate: f64,
    clock_period: f64,
    /// True when the recording had no clock messages at all
    synthetic: bool,
}

impl ClockModel {
    /// Build the model from the full, arrival-ordered message stream
    pub fn from_messages(messages: &[RawMessage], timing: &TimingConfig) -> Self {
        let tick_rate = timing.tick_rate;
        let clock_period = 1.0 / timing.clock_rate;
        let max_jump = timing.max_clock_jump();
        let mut segments: Vec<ClockSegment> = Vec::new();

        for (arrival, msg) in messages.iter().enumerate().filter(|(_, m)| m.is_clock()) {
            if segments.is_empty() {
                segments.push(ClockSegment {
                    first_arrival: arrival,
                    start_tick: msg.tick,
                    end_tick: msg.tick,
                    origin: 0.0,
                    messages: 1,
                });
                continue;
            }
            let last = segments.len() - 1;
            let current = &mut segments[last];

            let step = msg.tick as f64 - current.end_tick as f64;
            if step > 0.0 && step <= max_jump {
                current.end_tick = msg.tick;
                current.messages += 1;
                continue;
            }

            let origin = current.time_of(current.end_tick, tick_rate) + clock_period;
            log::info!(
                "Clock discontinuity at message {}: tick {} -> {} (step {}), new origin {:.6} s",
                arrival,
                current.end_tick,
                msg.tick,
                step,
                origin
            );
            segments.push(ClockSegment {
                first_arrival: arrival,
                start_tick: msg.tick,
                end_tick: msg.tick,
                origin,
                messages: 1,
            });
        }

        let synthetic = segments.is_empty();
        if synthetic {
            if let Some(first) = messages.first() {
                log::warn!(
                    "No clock messages found, anchoring time at first message tick {}",
                    first.tick
                );
                segments.push(ClockSegment {
                    first_arrival: 0,
                    start_tick: first.tick,
                    end_tick: first.tick,
                    origin: 0.0,
                    messages: 0,
                });
            }
        }

        Self {
            segments,
            tick_rate,
            clock_period,
            synthetic,
        }
    }

    /// Time in seconds of a message with `tick` that arrived at position `arrival`
    ///
    /// The segment active at the message's arrival is used, so a tick
    /// counter reset never folds later data onto earlier time.
    pub fn time_at(&self, arrival: usize, tick: u64) -> f64 {
        let idx = self
            .segments
            .partition_point(|s| s.first_arrival <= arrival)
            .saturating_sub(1);
        match self.segments.get(idx) {
            Some(segment) => segment.time_of(tick, self.tick_rate),
            None => tick as f64 / self.tick_rate,
        }
    }

    /// Clock segments in arrival order
    pub fn segments(&self) -> &[ClockSegment] {
        &self.segments
    }

    /// Number of discontinuities (segment boundaries)
    pub fn discontinuities(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    /// True if no clock messages were present
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Clock period in seconds
    pub fn period(&self) -> f64 {
        self.clock_period
    }

    /// Seconds between the earliest and latest message of the stream
    ///
    /// `messages` must be the stream the model was built from. Returns
    /// `None` for an empty stream.
    pub fn span(&self, messages: &[RawMessage]) -> Option<f64> {
        let mut times = messages
            .iter()
            .enumerate()
            .map(|(arrival, m)| self.time_at(arrival, m.tick));
        let first = times.next()?;
        let (min, max) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        Some(max - min)
    }
}
