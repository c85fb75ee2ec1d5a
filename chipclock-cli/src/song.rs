//! Built-in demo pattern: a 16-step loop for lead, bass and an optional drum
//! sample, stepped by one divider.

use std::ops::ControlFlow;
use std::sync::Arc;

use chipclock_engine::prelude::*;
use chipclock_engine::Result;

/// Steps per beat.
const STEPS_PER_BEAT: u32 = 4;

const HOLD: i32 = i32::MIN;
const OFF: i32 = NOTE_RELEASE;

const fn n(octave: i32, semitone: i32) -> i32 {
    NOTE_C0 + octave * 12 + semitone
}

#[rustfmt::skip]
const LEAD: [i32; 16] = [
    n(4, 0), HOLD, n(4, 4), n(4, 7),  n(5, 0), HOLD, n(4, 7), OFF,
    n(4, 9), HOLD, n(4, 7), n(4, 4),  n(4, 2), HOLD, HOLD,    OFF,
];

#[rustfmt::skip]
const BASS: [i32; 16] = [
    n(2, 0), HOLD, HOLD, OFF,  n(2, 0), HOLD, HOLD, OFF,
    n(1, 9), HOLD, HOLD, OFF,  n(1, 7), HOLD, n(1, 11), OFF,
];

#[rustfmt::skip]
const DRUM: [bool; 16] = [
    true, false, false, false,  false, false, true,  false,
    true, false, false, false,  false, false, false, false,
];

/// Divider period for `bpm` at `clock_rate` ticks per second.
pub fn ticks_per_step(clock_rate: u32, bpm: u32) -> u32 {
    let steps_per_minute = bpm.max(1) * STEPS_PER_BEAT;
    (clock_rate * 60 / steps_per_minute).max(1)
}

pub struct Demo {
    tracks: Vec<Arc<Track>>,
    step: Divider,
}

impl Demo {
    /// Build the tracks and start the step divider on `ctx`.
    pub fn attach(ctx: &Context, bpm: u32, drum: Option<Sample>) -> Result<Self> {
        let _guard = ctx.lock();

        let lead = Arc::new(Track::with_waveform(Waveform::square()));
        lead.set_instrument(Some(Shared::new(Instrument::with_adsr(2, 12, i64::from(MAX_VOLUME * 3 / 5), 36)?)));
        lead.set_int(AttrKind::DutyCycle, 6)?;
        lead.set_int(AttrKind::Panning, -MAX_VOLUME / 4)?;
        lead.set_ints(AttrKind::EffectVibrato, &[12, semitones(1) / 8, 0])?;
        lead.set_ints(AttrKind::EffectPortamento, &[3, 0, 0])?;

        let bass = Arc::new(Track::with_waveform(Waveform::triangle()));
        bass.set_int(AttrKind::Panning, MAX_VOLUME / 8)?;

        let mut tracks = vec![lead, bass];
        if let Some(sample) = drum {
            let t = Track::new();
            t.set_sample(Some(Shared::new(sample)));
            t.set_int(AttrKind::Volume, MAX_VOLUME * 3 / 4)?;
            tracks.push(Arc::new(t));
        }
        for t in &tracks {
            t.attach(ctx)?;
        }

        let voices: Vec<Arc<Track>> = tracks.iter().map(Arc::clone).collect();
        let step = Divider::new(ticks_per_step(ctx.config().clock_rate, bpm), move |_, ev| {
            let i = ((ev.count - 1) % 16) as usize;
            for (track, note) in voices.iter().zip([LEAD[i], BASS[i]]) {
                if note != HOLD {
                    if let Err(e) = track.set_int(AttrKind::Note, note_value(note)) {
                        log::warn!("step {i}: {e}");
                    }
                }
            }
            if let (Some(drum), true) = (voices.get(2), DRUM[i]) {
                // retrigger from the start
                let _ = drum.set_int(AttrKind::Note, semitones(n(4, 0)));
            }
            ControlFlow::Continue(())
        });
        step.attach(ctx)?;

        log::info!("demo pattern: {} track(s), {bpm} bpm, {} ticks/step", tracks.len(), step.ticks());
        Ok(Self { tracks, step })
    }

    pub fn steps(&self) -> u64 {
        self.step.count()
    }

    pub fn detach(&self) {
        self.step.detach();
        for t in &self.tracks {
            t.detach();
        }
    }
}

fn note_value(note: i32) -> i32 {
    if note < 0 { note } else { semitones(note) }
}
