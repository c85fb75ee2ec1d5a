//! Tracks: attachable synthesis channels.
//!
//! A `Track` is created detached, holds its attributes and data bindings
//! across attach/detach cycles and is mixed by at most one context at a
//! time. Dropping the handle detaches it.

use std::sync::{Arc, Weak};

use chipclock_core::attr::{AttrKind, AttrValue, Attributes};
use chipclock_core::instrument::Instrument;
use chipclock_core::sample::Sample;
use chipclock_core::shared::Shared;
use chipclock_core::waveform::Waveform;
use parking_lot::Mutex;

use crate::context::{locked, Context, ContextConfig, ContextShared, Linked};
use crate::effect::EffectValues;
use crate::error::{Error, Result};
use crate::voice::Voice;

pub(crate) struct TrackState {
    context: Option<Weak<ContextShared>>,
    voice: Voice,
}

impl Linked for TrackState {
    fn link(&self) -> Option<&Weak<ContextShared>> {
        self.context.as_ref()
    }
}

pub(crate) struct TrackInner {
    state: Mutex<TrackState>,
}

// Called by the context with its lock held.
impl TrackInner {
    pub(crate) fn render(&self, mix: &mut [i32], channels: usize) {
        self.state.lock().voice.render(mix, channels);
    }

    pub(crate) fn tick(&self) {
        self.state.lock().voice.tick();
    }

    pub(crate) fn stop(&self) {
        self.state.lock().voice.stop();
    }

    pub(crate) fn set_sample_rate(&self, sample_rate: u32) {
        self.state.lock().voice.set_sample_rate(sample_rate);
    }
}

pub struct Track {
    inner: Arc<TrackInner>,
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

impl Track {
    /// Detached track playing the square preset.
    pub fn new() -> Self {
        Self::from_voice(Voice::new(ContextConfig::default().sample_rate))
    }

    /// Detached track playing `waveform`. Preset tables select the preset.
    pub fn with_waveform(waveform: Shared<Waveform>) -> Self {
        Self::from_voice(Voice::with_waveform(ContextConfig::default().sample_rate, waveform))
    }

    fn from_voice(voice: Voice) -> Self {
        Self { inner: Arc::new(TrackInner { state: Mutex::new(TrackState { context: None, voice }) }) }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TrackState) -> R) -> R {
        locked(&self.inner.state, f)
    }

    /// Append to `ctx`'s mix list. Fails without side effect when already
    /// attached to any context.
    pub fn attach(&self, ctx: &Context) -> Result<()> {
        let _guard = ctx.lock();
        {
            let mut st = self.inner.state.lock();
            if st.context.as_ref().and_then(Weak::upgrade).is_some() {
                return Err(Error::AlreadyAttached);
            }
            st.voice.set_sample_rate(ctx.config().sample_rate);
            st.context = Some(Arc::downgrade(ctx.shared()));
        }
        let n = ctx.push_track(Arc::clone(&self.inner));
        log::debug!("track attached, {n} in mix");
        Ok(())
    }

    /// Leave the mix and silence the channel. No-op when detached.
    pub fn detach(&self) {
        let Some(ctx) = self.context() else {
            self.inner.state.lock().context = None;
            return;
        };
        let _guard = ctx.lock();
        {
            let mut st = self.inner.state.lock();
            if !st.is_linked_to(ctx.shared()) {
                return;
            }
            st.context = None;
            st.voice.stop();
        }
        ctx.remove_track(&self.inner);
        log::debug!("track detached");
    }

    pub fn is_attached(&self) -> bool {
        self.context().is_some()
    }

    /// Context this track is attached to.
    pub fn context(&self) -> Option<Context> {
        let shared = self.inner.state.lock().context.as_ref().and_then(Weak::upgrade);
        shared.map(Context::from_shared)
    }

    pub fn set_effect(&self, kind: AttrKind, values: EffectValues) -> Result<()> {
        self.with_state(|st| st.voice.set_effect(kind, values))
    }

    pub fn effect(&self, kind: AttrKind) -> Result<EffectValues> {
        self.with_state(|st| st.voice.effect(kind))
    }

    pub fn instrument(&self) -> Option<Shared<Instrument>> {
        self.with_state(|st| st.voice.instrument().cloned())
    }

    pub fn waveform(&self) -> Option<Shared<Waveform>> {
        self.with_state(|st| st.voice.waveform().cloned())
    }

    pub fn sample(&self) -> Option<Shared<Sample>> {
        self.with_state(|st| st.voice.sample().cloned())
    }

    /// Bind or clear the instrument; other bindings are kept.
    pub fn set_instrument(&self, instrument: Option<Shared<Instrument>>) {
        self.with_state(|st| st.voice.set_instrument(instrument));
    }

    /// Bind or clear the custom waveform; other bindings are kept.
    pub fn set_waveform(&self, waveform: Option<Shared<Waveform>>) {
        self.with_state(|st| st.voice.set_waveform(waveform));
    }

    /// Bind or clear the sample; other bindings are kept.
    pub fn set_sample(&self, sample: Option<Shared<Sample>>) {
        self.with_state(|st| st.voice.set_sample(sample));
    }

    /// Restore default attributes and silence the channel. Bindings and the
    /// attachment are kept.
    pub fn reset(&self) {
        self.with_state(|st| st.voice.reset());
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track").field("attached", &self.is_attached()).finish()
    }
}

impl Attributes for Track {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        self.with_state(|st| st.voice.attribute(kind))
    }

    fn set_attribute(&self, kind: AttrKind, value: &AttrValue) -> Result<()> {
        self.with_state(|st| st.voice.set_attribute(kind, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipclock_core::dsp::{semitones, NOTE_A4};
    use chipclock_core::waveform::WaveformKind;

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    #[test]
    fn attach_once() {
        let (a, b) = (ctx(), ctx());
        let t = Track::new();
        t.attach(&a).unwrap();
        assert_eq!(t.attach(&a), Err(Error::AlreadyAttached));
        assert_eq!(t.attach(&b), Err(Error::AlreadyAttached));
        assert_eq!(a.tracks(), 1);
        assert_eq!(b.tracks(), 0);
    }

    #[test]
    fn detach_is_idempotent() {
        let c = ctx();
        let t = Track::new();
        t.detach();
        t.attach(&c).unwrap();
        t.detach();
        t.detach();
        assert_eq!(c.tracks(), 0);
        assert!(!t.is_attached());
        t.attach(&c).unwrap();
        assert_eq!(c.tracks(), 1);
    }

    #[test]
    fn drop_detaches() {
        let c = ctx();
        {
            let t = Track::new();
            t.attach(&c).unwrap();
            assert_eq!(c.tracks(), 1);
        }
        assert_eq!(c.tracks(), 0);
    }

    #[test]
    fn dropped_context_counts_as_detached() {
        let t = Track::new();
        {
            let c = ctx();
            t.attach(&c).unwrap();
        }
        assert!(!t.is_attached());
        t.attach(&ctx()).unwrap();
    }

    #[test]
    fn attributes_survive_reattach() {
        let c = ctx();
        let t = Track::with_waveform(Waveform::sawtooth());
        t.set_int(AttrKind::Volume, 1234).unwrap();
        t.attach(&c).unwrap();
        t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();
        t.detach();
        assert_eq!(t.get_int(AttrKind::Volume).unwrap(), 1234);
        assert_eq!(t.get_int(AttrKind::Waveform).unwrap(), WaveformKind::Sawtooth as i32);
        t.attach(&c).unwrap();
        assert_eq!(t.get_int(AttrKind::Volume).unwrap(), 1234);
    }

    #[test]
    fn preset_built_track_switches_waveform() {
        let t = Track::with_waveform(Waveform::square());
        assert!(t.waveform().is_none());
        t.set_int(AttrKind::Waveform, WaveformKind::Sine as i32).unwrap();
        assert_eq!(t.get_int(AttrKind::Waveform).unwrap(), WaveformKind::Sine as i32);
        t.set_int(AttrKind::Waveform, WaveformKind::Square as i32).unwrap();
        t.set_int(AttrKind::DutyCycle, 8).unwrap();
        assert_eq!(t.get_int(AttrKind::DutyCycle).unwrap(), 8);
    }

    #[test]
    fn effects_round_trip_through_attributes() {
        let t = Track::new();
        t.set_effect(AttrKind::EffectVibrato, [8, semitones(1), 4]).unwrap();
        let mut out = [0; 3];
        t.get_ints(AttrKind::EffectVibrato, &mut out).unwrap();
        assert_eq!(out, [8, semitones(1), 4]);
        t.set_ints(AttrKind::EffectPortamento, &[6, 0, 0]).unwrap();
        assert_eq!(t.effect(AttrKind::EffectPortamento).unwrap(), [6, 0, 0]);
        assert!(t.set_ints(AttrKind::EffectPortamento, &[6, 0]).is_err());
    }

    #[test]
    fn bindings_are_independent() {
        let t = Track::new();
        let inst = Shared::new(Instrument::new());
        t.set_instrument(Some(inst.clone()));
        t.set_sample(Some(Shared::new(Sample::from_frames(&[0, 0], 1).unwrap())));
        t.set_sample(None);
        assert!(t.instrument().is_some_and(|i| Shared::ptr_eq(&i, &inst)));
        assert_eq!(t.get_int(AttrKind::Instrument).unwrap(), 1);
    }
}
