//! Reference voice: the engine-side channel behind a track.
//!
//! A voice plays one source, resolved at render time: a bound sample wins over
//! a bound custom waveform, which wins over the preset chosen with the
//! `Waveform` attribute. The bound instrument (if any) modulates volume,
//! panning, pitch, arpeggio and duty cycle once per instrument tick.
//!
//! Rendering adds into an `i32` mix buffer; nothing here allocates. Per-frame
//! work uses the cached step/level values that [`Voice::update`] derives after
//! every tick and attribute change.

use std::ops::Range;

use chipclock_core::attr::{check_range, AttrKind, AttrValue, MAX_ARPEGGIO};
use chipclock_core::dsp::{
    note_to_period, pan_gains, pitch_ratio, scale_volume, semitones, FINT20_SHIFT, MAX_VOLUME, NOTE_C8,
    NOTE_MUTE, NOTE_RELEASE, NO_REPEAT, PALINDROME, REPEAT,
};
use chipclock_core::envelope::Cursor;
use chipclock_core::error::{Error, Result};
use chipclock_core::instrument::{Instrument, InstrumentSequence, SequenceData, SequenceKind};
use chipclock_core::sample::{Sample, MAX_CHANNELS};
use chipclock_core::shared::Shared;
use chipclock_core::waveform::{self, Waveform, WaveformKind, SQUARE_PHASES};

use crate::effect::{EffectValues, Effects, MAX_EFFECT_TICKS};

pub const DEFAULT_VOLUME: i32 = MAX_VOLUME;
pub const DEFAULT_MASTER_VOLUME: i32 = MAX_VOLUME / 4;
pub const DEFAULT_DUTY_CYCLE: i32 = 4;
pub const DEFAULT_ARPEGGIO_DIVIDER: i32 = 4;
pub const DEFAULT_EFFECT_DIVIDER: i32 = 1;
pub const DEFAULT_INSTRUMENT_DIVIDER: i32 = 4;

/// Note at which a sample plays at its native rate (C4).
pub const SAMPLE_BASE_NOTE: i32 = 48;

const PHASE_SHIFT: u32 = 32;
const SQUARE_AMPLITUDE: i32 = i16::MAX as i32;
/// Fastest sample playback, in sample frames per output frame.
const MAX_SAMPLE_STEP: u64 = 64 << PHASE_SHIFT;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NoteState {
    Off,
    On,
    Released,
}

/// Values produced by the instrument sequences.
#[derive(Copy, Clone, Debug)]
struct Modulation {
    volume: i32,
    panning: i32,
    arpeggio: i32,
    pitch: i32,
    duty_cycle: Option<i32>,
}

impl Default for Modulation {
    fn default() -> Self {
        Self { volume: MAX_VOLUME, panning: 0, arpeggio: 0, pitch: 0, duty_cycle: None }
    }
}

#[derive(Copy, Clone, Debug)]
enum CursorOp {
    Start,
    Step,
    Release,
}

/// Transient playback state; cleared by [`Voice::stop`].
#[derive(Clone, Debug)]
struct Playback {
    state: NoteState,
    phase: u64,
    sample_pos: u64,
    forward: bool,
    sample_done: bool,
    arp_index: usize,
    arp_tick: i32,
    fx_tick: i32,
    instr_tick: i32,
    cursors: [Cursor; 5],
    modulation: Modulation,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            state: NoteState::Off,
            phase: 0,
            sample_pos: 0,
            forward: true,
            sample_done: false,
            arp_index: 0,
            arp_tick: 0,
            fx_tick: 0,
            instr_tick: 0,
            cursors: [Cursor::default(); 5],
            modulation: Modulation::default(),
        }
    }
}

/// Attribute values; cleared by [`Voice::reset`].
#[derive(Clone, Debug)]
struct Params {
    preset: WaveformKind,
    duty_cycle: i32,
    master_volume: i32,
    channel_volumes: [i32; MAX_CHANNELS],
    mute: bool,
    pitch: i32,
    note: i32,
    period: Option<i64>,
    phase_wrap: i32,
    arpeggio: [i32; MAX_ARPEGGIO],
    arpeggio_len: usize,
    sample_range: (i32, i32),
    sample_repeat: i32,
    sample_period: i32,
    sample_pitch: i32,
    arpeggio_divider: i32,
    effect_divider: i32,
    instrument_divider: i32,
    triangle_ignores_volume: bool,
    halt_silent_phase: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            preset: WaveformKind::Square,
            duty_cycle: DEFAULT_DUTY_CYCLE,
            master_volume: DEFAULT_MASTER_VOLUME,
            channel_volumes: [MAX_VOLUME; MAX_CHANNELS],
            mute: false,
            pitch: 0,
            note: 0,
            period: None,
            phase_wrap: 0,
            arpeggio: [0; MAX_ARPEGGIO],
            arpeggio_len: 0,
            sample_range: (0, 0),
            sample_repeat: NO_REPEAT,
            sample_period: 0,
            sample_pitch: 0,
            arpeggio_divider: DEFAULT_ARPEGGIO_DIVIDER,
            effect_divider: DEFAULT_EFFECT_DIVIDER,
            instrument_divider: DEFAULT_INSTRUMENT_DIVIDER,
            triangle_ignores_volume: true,
            halt_silent_phase: false,
        }
    }
}

pub struct Voice {
    instrument: Option<Shared<Instrument>>,
    waveform: Option<Shared<Waveform>>,
    sample: Option<Shared<Sample>>,
    preset_table: Shared<Waveform>,
    params: Params,
    effects: Effects,
    play: Playback,
    sample_rate: u32,
    // derived by `update`
    step: u64,
    sample_step: u64,
    level: i32,
    pan: i32,
    duty: i32,
}

impl Voice {
    pub fn new(sample_rate: u32) -> Self {
        let params = Params::default();
        let mut v = Self {
            instrument: None,
            waveform: None,
            sample: None,
            preset_table: waveform::preset(params.preset),
            effects: Effects::new(DEFAULT_VOLUME, 0),
            params,
            play: Playback::default(),
            sample_rate: sample_rate.max(1),
            step: 0,
            sample_step: 0,
            level: 0,
            pan: 0,
            duty: DEFAULT_DUTY_CYCLE,
        };
        v.update();
        v
    }

    /// Voice playing `waveform` instead of the default square.
    pub fn with_waveform(sample_rate: u32, waveform: Shared<Waveform>) -> Self {
        let mut v = Self::new(sample_rate);
        v.set_waveform(Some(waveform));
        v
    }

    // ------------------------------- bindings -------------------------------

    #[inline] pub fn instrument(&self) -> Option<&Shared<Instrument>> { self.instrument.as_ref() }
    #[inline] pub fn waveform(&self) -> Option<&Shared<Waveform>> { self.waveform.as_ref() }
    #[inline] pub fn sample(&self) -> Option<&Shared<Sample>> { self.sample.as_ref() }

    pub fn set_instrument(&mut self, instrument: Option<Shared<Instrument>>) {
        self.instrument = instrument;
        if self.play.state != NoteState::Off {
            self.run_cursors(CursorOp::Start);
        } else {
            self.play.modulation = Modulation::default();
        }
        self.update();
    }

    /// Bind or clear the custom waveform. A preset table selects that preset
    /// instead, as if set through the `Waveform` attribute.
    pub fn set_waveform(&mut self, waveform: Option<Shared<Waveform>>) {
        let preset = waveform.as_ref().map(|w| w.read().kind()).filter(|k| k.is_preset());
        match preset {
            Some(kind) => {
                self.params.preset = kind;
                self.preset_table = waveform::preset(kind);
                self.waveform = None;
            }
            None => self.waveform = waveform,
        }
        self.update();
    }

    pub fn set_sample(&mut self, sample: Option<Shared<Sample>>) {
        self.sample = sample;
        self.restart_sample();
        self.update();
    }

    /// Kind of the source that currently plays.
    pub fn source_kind(&self) -> WaveformKind {
        if self.sample.is_some() {
            WaveformKind::Sample
        } else if let Some(w) = &self.waveform {
            w.read().kind()
        } else {
            self.params.preset
        }
    }

    // ------------------------------- lifecycle ------------------------------

    #[inline] pub fn sample_rate(&self) -> u32 { self.sample_rate }
    #[inline] pub fn is_playing(&self) -> bool { self.play.state != NoteState::Off }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate.max(1);
            self.update();
        }
    }

    /// Silence and rewind; attributes and bindings stay.
    pub fn stop(&mut self) {
        self.play = Playback::default();
        self.effects.settle();
        self.update();
    }

    /// Back to default attributes; bindings stay.
    pub fn reset(&mut self) {
        self.params = Params::default();
        self.preset_table = waveform::preset(self.params.preset);
        self.effects = Effects::new(DEFAULT_VOLUME, 0);
        self.stop();
    }

    // -------------------------------- notes ---------------------------------

    fn note_on(&mut self, note: i32) {
        let glide = self.play.state == NoteState::On && self.effects.portamento_steps() > 0;
        if glide {
            self.effects.note.slide_to(note, self.effects.portamento_steps());
        } else {
            self.effects.note.jump(note);
        }
        self.params.note = note;
        self.params.period = None;
        self.play.state = NoteState::On;
        self.play.arp_index = 0;
        self.play.arp_tick = 0;
        self.play.instr_tick = 0;
        self.run_cursors(CursorOp::Start);
        self.restart_sample();
    }

    fn note_release(&mut self) {
        if self.play.state != NoteState::On {
            return;
        }
        self.play.state = NoteState::Released;
        let has_volume = self
            .instrument
            .as_ref()
            .is_some_and(|i| i.read().sequence(SequenceKind::Volume).is_some_and(|s| s.is_enabled() && !s.is_empty()));
        if has_volume {
            self.run_cursors(CursorOp::Release);
            self.check_released();
        } else {
            self.play.state = NoteState::Off;
        }
    }

    fn note_mute(&mut self) {
        self.play.state = NoteState::Off;
        self.play.cursors = [Cursor::default(); 5];
        self.play.modulation = Modulation::default();
    }

    /// A released note ends once its volume envelope has run out.
    fn check_released(&mut self) {
        let vol = &self.play.cursors[slot(SequenceKind::Volume)];
        if self.play.state == NoteState::Released && !vol.is_active() && vol.value() == 0 {
            self.play.state = NoteState::Off;
        }
    }

    fn restart_sample(&mut self) {
        let start = self.params.sample_range.0.max(0) as u64;
        self.play.sample_pos = start << PHASE_SHIFT;
        self.play.forward = true;
        self.play.sample_done = false;
    }

    fn run_cursors(&mut self, op: CursorOp) {
        let mut m = Modulation::default();
        if let Some(instrument) = &self.instrument {
            let instrument = instrument.read();
            for kind in SequenceKind::ALL {
                let cursor = &mut self.play.cursors[slot(kind)];
                let Some(seq) = instrument.sequence(kind).filter(|s| s.is_enabled() && !s.is_empty()) else {
                    *cursor = Cursor::default();
                    continue;
                };
                let v = step_cursor(cursor, seq, op);
                match kind {
                    SequenceKind::Volume => m.volume = v.clamp(0, MAX_VOLUME),
                    SequenceKind::Panning => m.panning = v,
                    SequenceKind::Arpeggio => m.arpeggio = v,
                    SequenceKind::Pitch => m.pitch = v,
                    SequenceKind::DutyCycle => m.duty_cycle = Some(v),
                }
            }
        }
        self.play.modulation = m;
    }

    // --------------------------------- tick ---------------------------------

    /// One engine tick: effects, arpeggio and instrument sequences.
    pub fn tick(&mut self) {
        let p = &self.params;
        let play = &mut self.play;

        play.fx_tick += 1;
        if play.fx_tick >= p.effect_divider {
            play.fx_tick = 0;
            self.effects.step();
        }

        if p.arpeggio_len > 0 {
            play.arp_tick += 1;
            if play.arp_tick >= p.arpeggio_divider {
                play.arp_tick = 0;
                play.arp_index = (play.arp_index + 1) % p.arpeggio_len;
            }
        }

        if self.instrument.is_some() && play.state != NoteState::Off {
            play.instr_tick += 1;
            if play.instr_tick >= p.instrument_divider {
                play.instr_tick = 0;
                self.run_cursors(CursorOp::Step);
                self.check_released();
            }
        }

        self.update();
    }

    /// Effective note in fixed-point semitones.
    fn effective_note(&self) -> i32 {
        let p = &self.params;
        let arp = if p.arpeggio_len > 0 { p.arpeggio[self.play.arp_index % p.arpeggio_len] } else { 0 };
        let m = &self.play.modulation;
        self.effects
            .note
            .value()
            .saturating_add(arp)
            .saturating_add(m.arpeggio)
            .saturating_add(p.pitch)
            .saturating_add(m.pitch)
            .saturating_add(self.effects.vibrato.value())
    }

    fn effective_period(&self) -> i64 {
        self.params.period.unwrap_or_else(|| note_to_period(self.effective_note(), self.sample_rate))
    }

    /// Recompute cached per-frame values.
    pub fn update(&mut self) {
        let p = &self.params;
        let m = self.play.modulation;

        let kind = self.source_kind();
        let volume = if kind == WaveformKind::Triangle && p.triangle_ignores_volume {
            MAX_VOLUME
        } else {
            let v = scale_volume(self.effects.volume.value(), m.volume);
            (v - self.effects.tremolo_cut()).clamp(0, MAX_VOLUME)
        };
        self.level = scale_volume(volume, p.master_volume);
        self.pan = self
            .effects
            .panning
            .value()
            .saturating_add(m.panning)
            .clamp(-MAX_VOLUME, MAX_VOLUME);
        self.duty = m.duty_cycle.unwrap_or(p.duty_cycle).clamp(1, SQUARE_PHASES as i32 - 1);

        let len = self.table_len();
        self.step = table_step(len, self.effective_period());
        self.sample_step = match &self.sample {
            Some(s) => self.sample_increment(&s.read()),
            None => 0,
        };
    }

    fn sample_increment(&self, sample: &Sample) -> u64 {
        if self.params.sample_period > 0 {
            let v = (1u128 << (PHASE_SHIFT + FINT20_SHIFT)) / self.params.sample_period as u128;
            return (v as u64).min(MAX_SAMPLE_STEP);
        }
        let native = f64::from(sample.sample_rate().unwrap_or(self.sample_rate));
        let offset = self
            .effective_note()
            .saturating_sub(semitones(SAMPLE_BASE_NOTE))
            .saturating_add(self.params.sample_pitch);
        let ratio = f64::from(pitch_ratio(offset)) * native / f64::from(self.sample_rate);
        ((ratio * (1u64 << PHASE_SHIFT) as f64) as u64).min(MAX_SAMPLE_STEP)
    }

    /// Phases in one cycle of the active table (after phase wrap).
    fn table_len(&self) -> usize {
        let len = match &self.waveform {
            Some(w) => w.read().len(),
            None => self.preset_table.read().len(),
        };
        match usize::try_from(self.params.phase_wrap) {
            Ok(wrap) if wrap > 0 => len.min(wrap),
            _ => len,
        }
    }

    fn sample_range(&self, len: usize) -> Range<usize> {
        let (start, end) = self.params.sample_range;
        let end = if end <= 0 { len } else { (end as usize).min(len) };
        (start.max(0) as usize).min(end)..end
    }

    // -------------------------------- render --------------------------------

    fn gains(&self, channels: usize) -> [i32; MAX_CHANNELS] {
        let mut g = [0; MAX_CHANNELS];
        let (left, right) = pan_gains(self.pan);
        for (ch, gain) in g.iter_mut().enumerate().take(channels) {
            let mut v = scale_volume(self.level, self.params.channel_volumes[ch]);
            if channels >= 2 {
                v = match ch {
                    0 => scale_volume(v, left),
                    1 => scale_volume(v, right),
                    _ => v,
                };
            }
            *gain = v;
        }
        g
    }

    /// Add `mix.len() / channels` frames of this voice into `mix`.
    pub fn render(&mut self, mix: &mut [i32], channels: usize) {
        if channels == 0 || channels > MAX_CHANNELS {
            return;
        }
        let frames = mix.len() / channels;
        let silent = self.play.state == NoteState::Off || self.params.mute || self.level == 0;

        if let Some(sample) = &self.sample {
            let sample = sample.read();
            if silent {
                return;
            }
            let gains = self.gains(channels);
            let range = self.sample_range(sample.len());
            render_sample(
                &mut self.play,
                &sample,
                range,
                self.params.sample_repeat,
                self.sample_step,
                &gains,
                mix,
                channels,
            );
            return;
        }

        let table = match &self.waveform {
            Some(w) => w.read(),
            None => self.preset_table.read(),
        };
        let len = match usize::try_from(self.params.phase_wrap) {
            Ok(wrap) if wrap > 0 => table.len().min(wrap),
            _ => table.len(),
        };
        if len == 0 {
            return;
        }
        let wrap = (len as u64) << PHASE_SHIFT;
        self.play.phase %= wrap;

        if silent {
            if !self.params.halt_silent_phase {
                let advanced = u128::from(self.play.phase) + u128::from(self.step) * frames as u128;
                self.play.phase = (advanced % u128::from(wrap)) as u64;
            }
            return;
        }

        let square = self.waveform.is_none() && self.params.preset == WaveformKind::Square;
        let duty = self.duty as usize;
        let gains = self.gains(channels);
        let values = table.frames();
        for frame in mix.chunks_exact_mut(channels) {
            let idx = (self.play.phase >> PHASE_SHIFT) as usize;
            let v = if square {
                if idx < duty { SQUARE_AMPLITUDE } else { -SQUARE_AMPLITUDE }
            } else {
                i32::from(values[idx])
            };
            for (out, &g) in frame.iter_mut().zip(gains.iter()) {
                *out += scale_volume(v, g);
            }
            self.play.phase += self.step;
            if self.play.phase >= wrap {
                self.play.phase %= wrap;
            }
        }
    }

    // ------------------------------ attributes ------------------------------

    pub fn effect(&self, kind: AttrKind) -> Result<EffectValues> {
        self.effects.get(kind)
    }

    pub fn set_effect(&mut self, kind: AttrKind, values: EffectValues) -> Result<()> {
        self.effects.set(kind, values)?;
        self.update();
        Ok(())
    }

    pub fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        let p = &self.params;
        if let Some(ch) = kind.channel_volume_index() {
            return Ok(AttrValue::Int(p.channel_volumes[ch]));
        }
        if kind.is_effect() {
            return Ok(AttrValue::Ints(self.effects.get(kind)?.to_vec()));
        }
        let v = match kind {
            AttrKind::Waveform => self.source_kind() as i32,
            AttrKind::DutyCycle => p.duty_cycle,
            AttrKind::Period => self.effective_period().clamp(0, i64::from(i32::MAX)) as i32,
            AttrKind::Phase => (self.play.phase >> PHASE_SHIFT) as i32,
            AttrKind::PhaseWrap => p.phase_wrap,
            AttrKind::NumPhases => match &self.sample {
                Some(s) => s.read().len() as i32,
                None => self.table_len() as i32,
            },
            AttrKind::MasterVolume => p.master_volume,
            AttrKind::Volume => self.effects.volume.target(),
            AttrKind::Mute => i32::from(p.mute),
            AttrKind::Pitch => p.pitch,
            AttrKind::SampleRange => {
                return Ok(AttrValue::Ints(vec![p.sample_range.0, p.sample_range.1]));
            }
            AttrKind::SampleRepeat => p.sample_repeat,
            AttrKind::SamplePeriod => p.sample_period,
            AttrKind::SamplePitch => p.sample_pitch,
            AttrKind::Note => match self.play.state {
                NoteState::On => p.note,
                NoteState::Released => NOTE_RELEASE,
                NoteState::Off => NOTE_MUTE,
            },
            AttrKind::Arpeggio => {
                let mut v = Vec::with_capacity(MAX_ARPEGGIO + 1);
                v.push(p.arpeggio_len as i32);
                v.extend_from_slice(&p.arpeggio);
                return Ok(AttrValue::Ints(v));
            }
            AttrKind::Panning => self.effects.panning.target(),
            AttrKind::Instrument => i32::from(self.instrument.is_some()),
            AttrKind::ArpeggioDivider => p.arpeggio_divider,
            AttrKind::EffectDivider => p.effect_divider,
            AttrKind::InstrumentDivider => p.instrument_divider,
            AttrKind::TriangleIgnoresVolume => i32::from(p.triangle_ignores_volume),
            AttrKind::HaltSilentPhase => i32::from(p.halt_silent_phase),
            k => return Err(Error::UnknownAttribute(k)),
        };
        Ok(AttrValue::Int(v))
    }

    /// Validate and apply; nothing changes on error.
    pub fn set_attribute(&mut self, kind: AttrKind, value: &AttrValue) -> Result<()> {
        let pitch_span = semitones(NOTE_C8);
        if let Some(ch) = kind.channel_volume_index() {
            self.params.channel_volumes[ch] = check_range(kind, value.expect_int(kind)?, 0, MAX_VOLUME)?;
            return Ok(());
        }
        if kind.is_effect() {
            let v = value.expect_ints(kind, 3)?;
            return self.set_effect(kind, [v[0], v[1], v[2]]);
        }
        match kind {
            AttrKind::SampleRange => {
                let v = value.expect_ints(kind, 2)?;
                let (start, end) = (v[0], v[1]);
                let len = self.sample.as_ref().map(|s| s.read().len() as i64);
                let fits = start >= 0 && end >= 0 && (end == 0 || start <= end) && len.map_or(true, |l| i64::from(end) <= l);
                if !fits {
                    return Err(Error::OutOfRange { kind, value: i64::from(if start < 0 { start } else { end }) });
                }
                self.params.sample_range = (start, end);
                self.restart_sample();
            }
            AttrKind::Arpeggio => {
                let v = value.expect_ints(kind, MAX_ARPEGGIO + 1)?;
                let count = check_range(kind, v[0], 0, MAX_ARPEGGIO as i32)? as usize;
                for &x in &v[1..=count] {
                    check_range(kind, x, -pitch_span, pitch_span)?;
                }
                let p = &mut self.params;
                p.arpeggio = [0; MAX_ARPEGGIO];
                p.arpeggio[..count].copy_from_slice(&v[1..=count]);
                p.arpeggio_len = count;
                self.play.arp_index = 0;
                self.play.arp_tick = 0;
            }
            _ => self.set_int_attribute(kind, value.expect_int(kind)?, pitch_span)?,
        }
        self.update();
        Ok(())
    }

    fn set_int_attribute(&mut self, kind: AttrKind, v: i32, pitch_span: i32) -> Result<()> {
        let flag = |v: i32| check_range(kind, v, 0, 1).map(|v| v != 0);
        let ticks = |v: i32| check_range(kind, v, 1, MAX_EFFECT_TICKS);
        let p = &mut self.params;
        match kind {
            AttrKind::Waveform => {
                let w = WaveformKind::try_from(v)?;
                if !w.is_preset() {
                    return Err(Error::OutOfRange { kind, value: i64::from(v) });
                }
                p.preset = w;
                self.preset_table = waveform::preset(w);
            }
            AttrKind::DutyCycle => p.duty_cycle = check_range(kind, v, 1, SQUARE_PHASES as i32 - 1)?,
            AttrKind::Period => p.period = Some(i64::from(check_range(kind, v, 1, i32::MAX)?)),
            AttrKind::Phase => {
                let len = self.table_len() as i32;
                let idx = check_range(kind, v, 0, len - 1)?;
                self.play.phase = (idx as u64) << PHASE_SHIFT;
            }
            AttrKind::PhaseWrap => p.phase_wrap = check_range(kind, v, 0, i32::MAX)?,
            AttrKind::MasterVolume => p.master_volume = check_range(kind, v, 0, MAX_VOLUME)?,
            AttrKind::Volume => {
                let v = check_range(kind, v, 0, MAX_VOLUME)?;
                self.effects.volume.slide_to(v, self.effects.volume_steps());
            }
            AttrKind::Mute => p.mute = flag(v)?,
            AttrKind::Pitch => p.pitch = check_range(kind, v, -pitch_span, pitch_span)?,
            AttrKind::SampleRepeat => p.sample_repeat = check_range(kind, v, NO_REPEAT, PALINDROME)?,
            AttrKind::SamplePeriod => p.sample_period = check_range(kind, v, 0, i32::MAX)?,
            AttrKind::SamplePitch => p.sample_pitch = check_range(kind, v, -pitch_span, pitch_span)?,
            AttrKind::Note => match v {
                NOTE_RELEASE => self.note_release(),
                NOTE_MUTE => self.note_mute(),
                n => {
                    let n = check_range(kind, n, 0, pitch_span)?;
                    self.note_on(n);
                }
            },
            AttrKind::Panning => {
                let v = check_range(kind, v, -MAX_VOLUME, MAX_VOLUME)?;
                self.effects.panning.slide_to(v, self.effects.panning_steps());
            }
            AttrKind::ArpeggioDivider => p.arpeggio_divider = ticks(v)?,
            AttrKind::EffectDivider => p.effect_divider = ticks(v)?,
            AttrKind::InstrumentDivider => p.instrument_divider = ticks(v)?,
            AttrKind::TriangleIgnoresVolume => p.triangle_ignores_volume = flag(v)?,
            AttrKind::HaltSilentPhase => p.halt_silent_phase = flag(v)?,
            AttrKind::NumPhases | AttrKind::Instrument => return Err(Error::ReadOnlyAttribute(kind)),
            k => return Err(Error::UnknownAttribute(k)),
        }
        Ok(())
    }
}

#[inline]
fn slot(kind: SequenceKind) -> usize {
    match kind {
        SequenceKind::Volume => 0,
        SequenceKind::Panning => 1,
        SequenceKind::Arpeggio => 2,
        SequenceKind::Pitch => 3,
        SequenceKind::DutyCycle => 4,
    }
}

fn step_cursor(cursor: &mut Cursor, seq: &InstrumentSequence, op: CursorOp) -> i32 {
    match (seq.data(), op) {
        (SequenceData::Values(s), CursorOp::Start) => cursor.start_values(s),
        (SequenceData::Values(s), CursorOp::Step) => cursor.step_values(s),
        (SequenceData::Values(s), CursorOp::Release) => cursor.release_values(s),
        (SequenceData::Envelope(s), CursorOp::Start) => cursor.start_phases(s, 0),
        (SequenceData::Envelope(s), CursorOp::Step) => cursor.step_phases(s),
        (SequenceData::Envelope(s), CursorOp::Release) => cursor.release_phases(s),
    }
}

/// Waveform table step per frame in 32.32 phases; at most one cycle per frame.
fn table_step(len: usize, period: i64) -> u64 {
    if period <= 0 || len == 0 {
        return 0;
    }
    let v = ((len as u128) << (PHASE_SHIFT + FINT20_SHIFT)) / period as u128;
    v.min(((len as u128) << PHASE_SHIFT) - 1) as u64
}

#[allow(clippy::too_many_arguments)]
fn render_sample(
    play: &mut Playback,
    sample: &Sample,
    range: Range<usize>,
    repeat: i32,
    step: u64,
    gains: &[i32; MAX_CHANNELS],
    mix: &mut [i32],
    channels: usize,
) {
    let sc = sample.channels();
    if sc == 0 || range.is_empty() {
        play.sample_done = true;
        return;
    }
    let start = (range.start as u64) << PHASE_SHIFT;
    let end = (range.end as u64) << PHASE_SHIFT;
    if play.sample_pos < start || play.sample_pos >= end {
        play.sample_pos = start;
    }

    for frame in mix.chunks_exact_mut(channels) {
        if play.sample_done {
            break;
        }
        let Some(src) = sample.frame((play.sample_pos >> PHASE_SHIFT) as usize) else {
            play.sample_done = true;
            break;
        };
        for (ch, (out, &g)) in frame.iter_mut().zip(gains.iter()).enumerate() {
            *out += scale_volume(i32::from(src[ch % sc]), g);
        }

        if play.forward {
            play.sample_pos += step;
            if play.sample_pos >= end {
                let over = play.sample_pos - end;
                match repeat {
                    REPEAT => play.sample_pos = start + over % (end - start),
                    PALINDROME => {
                        play.sample_pos = end.saturating_sub(1 + over).max(start);
                        play.forward = false;
                    }
                    _ => play.sample_done = true,
                }
            }
        } else if play.sample_pos >= start + step {
            play.sample_pos -= step;
        } else {
            let under = start + step - play.sample_pos;
            play.sample_pos = (start + under).min(end - 1);
            play.forward = true;
        }
    }
}
