// ── Tick clock ──
//
// Wrapping 32-bit millisecond timestamps. All scheduling in the core is
// expressed as "not yet due" comparisons against a `Tick`, so the only
// arithmetic allowed is wrapping subtraction.

use std::time::{Duration, Instant};

const HALF_RANGE: u32 = 1 << 31;

/// Monotonic millisecond timestamp that wraps every ~49.7 days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Self = Self(0);

    pub const fn from_millis(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, correct across one wrap.
    pub fn since(self, earlier: Self) -> Duration {
        Duration::from_millis(u64::from(self.0.wrapping_sub(earlier.0)))
    }

    /// `self` plus `delta`, wrapping. Deltas beyond `u32::MAX` ms saturate.
    pub fn after(self, delta: Duration) -> Self {
        let ms = u32::try_from(delta.as_millis()).unwrap_or(u32::MAX);
        Self(self.0.wrapping_add(ms))
    }

    /// Whether `self` lies strictly before `other`, treating any distance
    /// under half the range as forward.
    pub fn is_before(self, other: Self) -> bool {
        let diff = other.0.wrapping_sub(self.0);
        diff != 0 && diff < HALF_RANGE
    }
}

/// Produces `Tick`s from a process-local monotonic start point.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Tick {
        let ms = self.start.elapsed().as_millis() & u128::from(u32::MAX);
        Tick(u32::try_from(ms).unwrap_or_default())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}
