//! Fixed-point units, pitch math and mixing helpers shared by the data model
//! and the engine.
//!
//! Conventions:
//! - Volumes are integers in `0..=MAX_VOLUME`.
//! - Panning is an integer in `-MAX_VOLUME..=MAX_VOLUME` (-max = hard left).
//! - Notes, pitches and arpeggio offsets are semitones in 12.20 fixed point
//!   (`FINT20_UNIT` = one semitone), with `C0 = 0` and `A4 = 57`.
//! - Periods are frames per waveform cycle in 12.20 fixed point.
//!
//! Features used by this file:
//! - `fast-math` : polynomial sine for table generation (approx.)

use core::f32::consts::PI;

use cfg_if::cfg_if;

// ----------------------------- Math backend selection -----------------------------

cfg_if! {
    if #[cfg(feature = "fast-math")] {
        #[inline]
        fn m_sin(x: f32) -> f32 {
            let k = (x / TAU).round();
            let xr = x - k * TAU;
            let x2 = xr * xr;
            xr * (0.999_979_313_3 + x2 * (-0.166_624_432_0 + x2 * 0.008_308_978_98))
        }
    } else {
        #[inline] fn m_sin(x: f32) -> f32 { x.sin() }
    }
}

// --------------------------------- Constants -------------------------------------

/// 2π
pub const TAU: f32 = 2.0 * PI;

/// Largest volume value; also the magnitude of hard panning.
pub const MAX_VOLUME: i32 = 32_767;

pub const FINT20_SHIFT: u32 = 20;
pub const FINT20_UNIT: i32 = 1 << FINT20_SHIFT;

/// Semitone index of A4 (440 Hz) when C0 is 0.
pub const NOTE_A4: i32 = 57;
pub const NOTE_C0: i32 = 0;
pub const NOTE_C8: i32 = 96;

/// Note sentinel: enter the release phase of the current note.
pub const NOTE_RELEASE: i32 = -1;
/// Note sentinel: silence the track immediately.
pub const NOTE_MUTE: i32 = -2;

/// Sample repeat modes.
pub const NO_REPEAT: i32 = 0;
pub const REPEAT: i32 = 1;
pub const PALINDROME: i32 = 2;

// --------------------------------- Utilities -------------------------------------

/// Clamp a mix accumulator into a 16-bit frame.
#[inline]
pub fn clamp_frame(x: i32) -> i16 {
    x.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// `value * volume / MAX_VOLUME`, in 64-bit to avoid overflow.
#[inline]
pub fn scale_volume(value: i32, volume: i32) -> i32 {
    ((i64::from(value) * i64::from(volume)) / i64::from(MAX_VOLUME)) as i32
}

/// Linear pan law: returns (left, right) gains in `0..=MAX_VOLUME`.
#[inline]
pub fn pan_gains(panning: i32) -> (i32, i32) {
    let p = panning.clamp(-MAX_VOLUME, MAX_VOLUME);
    if p >= 0 { (MAX_VOLUME - p, MAX_VOLUME) } else { (MAX_VOLUME, MAX_VOLUME + p) }
}

/// Whole semitones to 12.20 fixed point.
#[inline]
pub fn semitones(n: i32) -> i32 {
    n.saturating_mul(FINT20_UNIT)
}

/// Frequency in Hz of a note given in fixed-point semitones.
#[inline]
pub fn note_to_freq(note: i32) -> f32 {
    let st = (i64::from(note) - i64::from(semitones(NOTE_A4))) as f32 / FINT20_UNIT as f32;
    440.0 * (st / 12.0).exp2()
}

/// Playback rate ratio for a fixed-point semitone offset (0 = 1.0).
#[inline]
pub fn pitch_ratio(offset: i32) -> f32 {
    (offset as f32 / FINT20_UNIT as f32 / 12.0).exp2()
}

/// Cycle length in fixed-point frames for a note at `sample_rate`.
///
/// Returns 0 for frequencies the rate cannot represent.
#[inline]
pub fn note_to_period(note: i32, sample_rate: u32) -> i64 {
    let f = note_to_freq(note);
    if !(f.is_finite() && f > 0.0) {
        return 0;
    }
    let frames = sample_rate as f64 / f64::from(f);
    (frames * f64::from(FINT20_UNIT)) as i64
}

/// Wrap phase into [0, 1).
#[inline]
pub fn wrap_phase01(mut p: f32) -> f32 {
    p = p - (p + 1.0).floor() + 1.0;
    if p >= 1.0 { p - 1.0 } else { p }
}

/// Sine of a [0, 1) phase.
#[inline]
pub fn sin01(phase01: f32) -> f32 {
    m_sin(TAU * wrap_phase01(phase01))
}

// --------------------------------- Tests -----------------------------------------
