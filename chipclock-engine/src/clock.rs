//! Tick clock.
//!
//! The context renders audio in frames but sequences in ticks. This clock
//! converts between the two with an integer accumulator: every frame adds
//! `clock_rate`, a tick elapses each time the accumulator passes
//! `sample_rate`. There is no rounding, so the tick count never drifts
//! against the frame count (`ticks == frames * clock_rate / sample_rate`).

/// Frame/tick bookkeeping for one context.
#[derive(Copy, Clone, Debug)]
pub struct Clock {
    sample_rate: u32,
    rate: u32,
    acc: u64,
    frames: u64,
    ticks: u64,
}

impl Clock {
    /// `rate` ticks per second at `sample_rate`; `1 <= rate <= sample_rate`.
    #[inline]
    pub fn new(sample_rate: u32, rate: u32) -> Self {
        Self { sample_rate: sample_rate.max(1), rate: rate.clamp(1, sample_rate.max(1)), acc: 0, frames: 0, ticks: 0 }
    }

    #[inline] pub fn sample_rate(&self) -> u32 { self.sample_rate }
    #[inline] pub fn rate(&self) -> u32 { self.rate }
    #[inline] pub fn frames(&self) -> u64 { self.frames }
    #[inline] pub fn ticks(&self) -> u64 { self.ticks }

    /// Frames to render before the next tick elapses (at least 1).
    #[inline]
    pub fn frames_until_tick(&self) -> u64 {
        let remaining = u64::from(self.sample_rate) - self.acc;
        remaining.div_ceil(u64::from(self.rate))
    }

    /// Account for `n` rendered frames; returns true when a tick elapsed.
    ///
    /// `n` must not exceed [`frames_until_tick`](Self::frames_until_tick), so
    /// at most one tick elapses per call.
    #[inline]
    pub fn advance(&mut self, n: u64) -> bool {
        self.frames += n;
        self.acc += n * u64::from(self.rate);
        if self.acc >= u64::from(self.sample_rate) {
            self.acc -= u64::from(self.sample_rate);
            self.ticks += 1;
            true
        } else {
            false
        }
    }

    /// Change the sample rate; the partial tick is kept when it still fits.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.rate = self.rate.min(self.sample_rate);
        self.acc = self.acc.min(u64::from(self.sample_rate) - 1);
    }

    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate.clamp(1, self.sample_rate);
    }

    /// Back to frame and tick zero.
    pub fn reset(&mut self) {
        self.acc = 0;
        self.frames = 0;
        self.ticks = 0;
    }
}
