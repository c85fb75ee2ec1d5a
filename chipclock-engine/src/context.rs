//! The sequencing context: owns the clock, the mix list of tracks and the
//! dividers, and renders interleaved frames.
//!
//! Locking
//! - One `parking_lot::ReentrantMutex` guards the whole context state. The
//!   render path takes it for the full call, control-thread operations take it
//!   for each mutation, and callers may hold [`Context::lock`] to group several.
//! - The state sits in a `RefCell` inside the mutex. A borrow is never held
//!   while a divider callback runs, so callbacks may re-enter any API.
//! - Lock order is context first, then the per-object mutex of a track or
//!   divider.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use chipclock_core::attr::{check_range, AttrKind, AttrValue, Attributes};
use chipclock_core::dsp::{clamp_frame, scale_volume, MAX_VOLUME};
use chipclock_core::sample::MAX_CHANNELS;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::clock::Clock;
use crate::divider::DividerInner;
use crate::error::{Error, Result};
use crate::track::TrackInner;

/// Frames rendered per inner pass; bounds the preallocated mix buffer.
pub const MAX_CHUNK: usize = 1024;

pub const MIN_SAMPLE_RATE: u32 = 16_000;
pub const MAX_SAMPLE_RATE: u32 = 96_000;

/// Sample rate, channel count and tick rate of a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Engine ticks per second.
    pub clock_rate: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { sample_rate: 44_100, channels: 2, clock_rate: 240 }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}",
                self.sample_rate
            )));
        }
        if !(1..=MAX_CHANNELS).contains(&self.channels) {
            return Err(Error::InvalidConfig(format!("channel count {} outside 1..={MAX_CHANNELS}", self.channels)));
        }
        if self.clock_rate == 0 || self.clock_rate > self.sample_rate {
            return Err(Error::InvalidConfig(format!(
                "clock rate {} outside 1..={}",
                self.clock_rate, self.sample_rate
            )));
        }
        Ok(())
    }
}

pub(crate) struct ContextState {
    pub(crate) config: ContextConfig,
    pub(crate) clock: Clock,
    pub(crate) master_volume: i32,
    pub(crate) tracks: Vec<Arc<TrackInner>>,
    pub(crate) dividers: Vec<Arc<DividerInner>>,
    mix: Vec<i32>,
    fired: Vec<(Arc<DividerInner>, u64)>,
    /// Nesting depth of `generate_frames` calls.
    rendering: u32,
}

impl ContextState {
    /// Mix `out.len() / channels` frames of every track into `out`.
    fn render(&mut self, out: &mut [i16]) {
        let ContextState { config, master_volume, tracks, mix, .. } = self;
        let mix = &mut mix[..out.len()];
        mix.fill(0);
        for t in tracks.iter() {
            t.render(mix, config.channels);
        }
        for (o, &m) in out.iter_mut().zip(mix.iter()) {
            *o = clamp_frame(scale_volume(m, *master_volume));
        }
    }
}

pub(crate) struct ContextShared {
    pub(crate) state: ReentrantMutex<RefCell<ContextState>>,
}

/// Objects that can be attached to a context.
pub(crate) trait Linked {
    fn link(&self) -> Option<&Weak<ContextShared>>;

    fn is_linked_to(&self, shared: &Arc<ContextShared>) -> bool {
        self.link().is_some_and(|w| w.as_ptr() == Arc::as_ptr(shared))
    }
}

/// Run `f` on `state`, holding the lock of the context it is attached to.
///
/// The link is re-checked after both locks are taken; a concurrent
/// attach/detach makes the loop retry.
pub(crate) fn locked<S: Linked, R>(state: &Mutex<S>, f: impl FnOnce(&mut S) -> R) -> R {
    loop {
        let ctx = state.lock().link().and_then(Weak::upgrade);
        match ctx {
            Some(shared) => {
                let _guard = shared.state.lock();
                let mut s = state.lock();
                if s.is_linked_to(&shared) {
                    return f(&mut s);
                }
            }
            None => {
                let mut s = state.lock();
                if s.link().and_then(Weak::upgrade).is_none() {
                    return f(&mut s);
                }
            }
        }
    }
}

/// Holds the context lock; see [`Context::lock`].
pub struct ContextGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<ContextState>>,
}

/// Cheap, cloneable handle to a context.
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    pub fn new(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let state = ContextState {
            config,
            clock: Clock::new(config.sample_rate, config.clock_rate),
            master_volume: MAX_VOLUME,
            tracks: Vec::new(),
            dividers: Vec::new(),
            mix: vec![0; MAX_CHUNK * MAX_CHANNELS],
            fired: Vec::new(),
            rendering: 0,
        };
        log::info!(
            "context created: {} Hz, {} channel(s), {} ticks/s",
            config.sample_rate,
            config.channels,
            config.clock_rate
        );
        Ok(Self { shared: Arc::new(ContextShared { state: ReentrantMutex::new(RefCell::new(state)) }) })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    #[inline]
    pub(crate) fn from_shared(shared: Arc<ContextShared>) -> Self {
        Self { shared }
    }

    /// True when both handles refer to the same context.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    /// Take the context lock until the guard drops.
    ///
    /// Every method takes the lock itself; hold a guard to make a group of
    /// calls atomic with respect to rendering. The lock is reentrant on the
    /// same thread. Holding it stalls the render callback.
    pub fn lock(&self) -> ContextGuard<'_> {
        ContextGuard { _guard: self.shared.state.lock() }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let guard = self.shared.state.lock();
        let mut st = guard.borrow_mut();
        f(&mut st)
    }

    pub fn config(&self) -> ContextConfig {
        self.with_state(|st| st.config)
    }

    /// Engine ticks since creation or the last reset.
    pub fn ticks(&self) -> u64 {
        self.with_state(|st| st.clock.ticks())
    }

    /// Frames rendered since creation or the last reset.
    pub fn time(&self) -> u64 {
        self.with_state(|st| st.clock.frames())
    }

    /// Number of attached tracks.
    pub fn tracks(&self) -> usize {
        self.with_state(|st| st.tracks.len())
    }

    /// Number of attached dividers.
    pub fn dividers(&self) -> usize {
        self.with_state(|st| st.dividers.len())
    }

    /// Render `frames` interleaved frames into `out`.
    ///
    /// Returns `frames`, or 0 (with `out` untouched) when `frames` is 0 or
    /// `out` holds fewer than `frames * channels` values. Dividers due at a
    /// tick boundary fire in attachment order before tracks advance, so their
    /// changes are heard from that boundary on.
    pub fn generate_frames(&self, out: &mut [i16], frames: usize) -> usize {
        let guard = self.shared.state.lock();
        let channels = guard.borrow().config.channels;
        let needed = match frames.checked_mul(channels) {
            Some(n) if frames > 0 && n <= out.len() => n,
            _ => {
                if frames > 0 {
                    log::warn!("render buffer of {} values too small for {frames} frames", out.len());
                }
                return 0;
            }
        };

        guard.borrow_mut().rendering += 1;
        let mut done = 0;
        while done < needed {
            let ticked = {
                let mut st = guard.borrow_mut();
                let left = (needed - done) / channels;
                let n = (left as u64).min(st.clock.frames_until_tick()).min(MAX_CHUNK as u64) as usize;
                st.render(&mut out[done..done + n * channels]);
                done += n * channels;
                st.clock.advance(n as u64)
            };
            if ticked {
                self.tick(&guard);
            }
        }
        guard.borrow_mut().rendering -= 1;
        frames
    }

    /// Tick boundary: fire due dividers with no borrow held, then advance tracks.
    fn tick(&self, state: &RefCell<ContextState>) {
        let (mut fired, ticks) = {
            let mut st = state.borrow_mut();
            let mut fired = std::mem::take(&mut st.fired);
            for d in &st.dividers {
                if let Some(epoch) = d.count_tick() {
                    fired.push((Arc::clone(d), epoch));
                }
            }
            (fired, st.clock.ticks())
        };

        for (d, epoch) in &fired {
            d.fire(self, ticks, *epoch);
        }

        let mut st = state.borrow_mut();
        for t in &st.tracks {
            t.tick();
        }
        fired.clear();
        st.fired = fired;
    }

    /// Rewind time, silence every track and restart divider counts. Attached
    /// objects and their attributes stay.
    pub fn reset(&self) {
        self.with_state(|st| {
            st.clock.reset();
            for t in &st.tracks {
                t.stop();
            }
            for d in &st.dividers {
                d.restart();
            }
        });
        log::debug!("context reset");
    }

    pub(crate) fn push_track(&self, track: Arc<TrackInner>) -> usize {
        self.with_state(|st| {
            st.tracks.push(track);
            st.tracks.len()
        })
    }

    pub(crate) fn remove_track(&self, track: &Arc<TrackInner>) {
        self.with_state(|st| st.tracks.retain(|t| !Arc::ptr_eq(t, track)));
    }

    pub(crate) fn push_divider(&self, divider: Arc<DividerInner>) -> usize {
        self.with_state(|st| {
            st.dividers.push(divider);
            let n = st.dividers.len();
            st.fired.reserve(n);
            n
        })
    }

    pub(crate) fn remove_divider(&self, divider: &Arc<DividerInner>) {
        self.with_state(|st| st.dividers.retain(|d| !Arc::ptr_eq(d, divider)));
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (config, tracks, dividers, ticks) =
            self.with_state(|st| (st.config, st.tracks.len(), st.dividers.len(), st.clock.ticks()));
        f.debug_struct("Context")
            .field("config", &config)
            .field("tracks", &tracks)
            .field("dividers", &dividers)
            .field("ticks", &ticks)
            .finish()
    }
}

impl Attributes for Context {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        self.with_state(|st| {
            let v = match kind {
                AttrKind::NumChannels => st.config.channels as i32,
                AttrKind::SampleRate => st.config.sample_rate as i32,
                AttrKind::Time => i32::try_from(st.clock.frames()).unwrap_or(i32::MAX),
                AttrKind::ClockPeriod => st.config.clock_rate as i32,
                AttrKind::MasterVolume => st.master_volume,
                k => return Err(Error::UnknownAttribute(k)),
            };
            Ok(AttrValue::Int(v))
        })
    }

    fn set_attribute(&self, kind: AttrKind, value: &AttrValue) -> Result<()> {
        let v = value.expect_int(kind)?;
        self.with_state(|st| {
            let mut config = st.config;
            match kind {
                AttrKind::NumChannels => {
                    config.channels = check_range(kind, v, 1, MAX_CHANNELS as i32)? as usize;
                    if st.rendering > 0 && config.channels != st.config.channels {
                        return Err(Error::Busy(kind));
                    }
                }
                AttrKind::SampleRate => {
                    config.sample_rate = check_range(kind, v, MIN_SAMPLE_RATE as i32, MAX_SAMPLE_RATE as i32)? as u32;
                }
                AttrKind::ClockPeriod => config.clock_rate = check_range(kind, v, 1, config.sample_rate as i32)? as u32,
                AttrKind::MasterVolume => {
                    st.master_volume = check_range(kind, v, 0, MAX_VOLUME)?;
                    return Ok(());
                }
                AttrKind::Time => return Err(Error::ReadOnlyAttribute(kind)),
                k => return Err(Error::UnknownAttribute(k)),
            }
            config
                .validate()
                .map_err(|_| Error::OutOfRange { kind, value: i64::from(v) })?;
            if config.sample_rate != st.config.sample_rate {
                st.clock.set_sample_rate(config.sample_rate);
                for t in &st.tracks {
                    t.set_sample_rate(config.sample_rate);
                }
            }
            st.clock.set_rate(config.clock_rate);
            st.config = config;
            Ok(())
        })
    }
}
