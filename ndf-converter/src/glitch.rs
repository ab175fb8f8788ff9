//! Single-sample glitch suppression
//!
//! A sample is a glitch when it differs from both neighbours by more than
//! the threshold. It is replaced by the rounded mean of its neighbours.
//! Runs of two or more outliers are left alone so that genuine fast
//! transients survive.
//!
//! Every decision looks at the unfiltered input. A second pass is therefore
//! a no-op except on alternating patterns such as `0, 1000, 0, 1000, 0`,
//! where correcting one position turns its neighbour into a new glitch.

/// Return a copy of `samples` with isolated spikes corrected
///
/// A threshold of 0 disables the filter.
pub fn glitch_filter(samples: &[u16], threshold: u16) -> Vec<u16> {
    let mut filtered = samples.to_vec();
    if threshold == 0 || samples.len() < 3 {
        return filtered;
    }

    let threshold = i32::from(threshold);
    for (i, window) in samples.windows(3).enumerate() {
        let (prev, current, next) = (
            i32::from(window[0]),
            i32::from(window[1]),
            i32::from(window[2]),
        );
        if (current - prev).abs() > threshold && (current - next).abs() > threshold {
            // Round half up; the mean of two u16 values always fits
            filtered[i + 1] = ((prev + next + 1) / 2) as u16;
        }
    }

    filtered
}

/// Number of positions the filter would change
pub fn count_glitches(samples: &[u16], threshold: u16) -> usize {
    glitch_filter(samples, threshold)
        .iter()
        .zip(samples)
        .filter(|(a, b)| a != b)
        .count()
}
