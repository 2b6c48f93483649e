// profile.rs — transfer/kernel timing types.
//
// Every blocking device operation can report a `CompletionToken`: a
// start/end pair in nanoseconds. Tokens come from two clocks —
//
//   * GPU timestamp queries (kernel execution, when the adapter has
//     TIMESTAMP_QUERY): device ticks scaled by the queue's timestamp
//     period;
//   * host monotonic spans (transfers, and the kernel fallback when
//     timestamp queries are unavailable): `Instant` around the blocking
//     submit-and-wait.
//
// Tokens from the two clocks share no epoch. Only durations are
// meaningful, which is all `TimeProfile` consumes.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Instant;

/// Start/end of one completed device operation, in nanoseconds.
///
/// Construct from a measured host span (`begin`/`finish`) or directly
/// from device timestamps (`from_device_ns`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionToken {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl CompletionToken {
    /// Build a token from raw device-clock nanoseconds.
    pub fn from_device_ns(start_ns: u64, end_ns: u64) -> Self {
        CompletionToken { start_ns, end_ns }
    }

    /// Duration in seconds. A token whose end precedes its start (a
    /// wrapped or misordered device clock) reads as zero rather than a
    /// huge unsigned difference.
    pub fn duration_secs(&self) -> f64 {
        self.end_ns.saturating_sub(self.start_ns) as f64 / 1e9
    }
}

/// Host-clock span measurement. `HostSpan::begin()` before the blocking
/// call, `.finish()` after it returns.
pub(crate) struct HostSpan {
    epoch: Instant,
}

impl HostSpan {
    pub(crate) fn begin() -> Self {
        HostSpan { epoch: Instant::now() }
    }

    pub(crate) fn finish(self) -> CompletionToken {
        let elapsed_ns = self.epoch.elapsed().as_nanos() as u64;
        CompletionToken { start_ns: 0, end_ns: elapsed_ns }
    }
}

/// Upload / kernel / download durations for one trace call, in seconds.
///
/// Field-wise addition aggregates profiles across repeated calls:
///
/// ```
/// use token_trace::TimeProfile;
///
/// let total: TimeProfile = [TimeProfile::default(); 3].into_iter().sum();
/// assert_eq!(total, TimeProfile::default());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeProfile {
    /// Host→device transfer time (binary image + counter reset).
    pub upload: f64,
    /// Kernel execution time.
    pub kernel: f64,
    /// Device→host transfer time (contour table).
    pub download: f64,
}

impl TimeProfile {
    /// Derive a profile from completion tokens. An absent token
    /// contributes zero to its field.
    pub fn from_tokens(
        upload: Option<CompletionToken>,
        kernel: Option<CompletionToken>,
        download: Option<CompletionToken>,
    ) -> Self {
        TimeProfile {
            upload: upload.map_or(0.0, |t| t.duration_secs()),
            kernel: kernel.map_or(0.0, |t| t.duration_secs()),
            download: download.map_or(0.0, |t| t.duration_secs()),
        }
    }

    /// Sum of the three fields.
    pub fn total(&self) -> f64 {
        self.upload + self.kernel + self.download
    }
}

impl Add for TimeProfile {
    type Output = TimeProfile;

    fn add(self, rhs: TimeProfile) -> TimeProfile {
        TimeProfile {
            upload: self.upload + rhs.upload,
            kernel: self.kernel + rhs.kernel,
            download: self.download + rhs.download,
        }
    }
}

impl AddAssign for TimeProfile {
    fn add_assign(&mut self, rhs: TimeProfile) {
        *self = *self + rhs;
    }
}

impl Sum for TimeProfile {
    fn sum<I: Iterator<Item = TimeProfile>>(iter: I) -> TimeProfile {
        iter.fold(TimeProfile::default(), Add::add)
    }
}

impl fmt::Display for TimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload {:.1} µs | kernel {:.1} µs | download {:.1} µs",
            self.upload * 1e6,
            self.kernel * 1e6,
            self.download * 1e6
        )
    }
}
