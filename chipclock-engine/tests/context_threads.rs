use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chipclock_engine::prelude::*;
use chipclock_engine::Error;

fn stereo() -> Context {
    Context::new(ContextConfig { sample_rate: 48_000, channels: 2, clock_rate: 240 }).unwrap()
}

#[test]
fn generate_writes_all_or_nothing() {
    for channels in [1usize, 2, 5, 8] {
        let ctx = Context::new(ContextConfig { channels, ..Default::default() }).unwrap();
        let t = Track::new();
        t.attach(&ctx).unwrap();
        t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();

        let mut buf = vec![i16::MIN; 100 * channels + 3];
        assert_eq!(ctx.generate_frames(&mut buf, 100), 100);
        // tail past frames * channels is untouched
        assert!(buf[100 * channels..].iter().all(|&x| x == i16::MIN));

        let mut short = vec![i16::MIN; 100 * channels - 1];
        assert_eq!(ctx.generate_frames(&mut short, 100), 0);
        assert!(short.iter().all(|&x| x == i16::MIN));
        assert_eq!(ctx.time(), 100);
    }
}

#[test]
fn attach_is_exclusive_and_detach_is_idempotent() {
    let (a, b) = (stereo(), stereo());
    let t = Track::new();
    let d = Divider::new(4, |_, _| ControlFlow::Continue(()));

    t.detach();
    d.detach();

    t.attach(&a).unwrap();
    d.attach(&a).unwrap();
    assert_eq!(t.attach(&b), Err(Error::AlreadyAttached));
    assert_eq!(d.attach(&a), Err(Error::AlreadyAttached));
    assert_eq!((a.tracks(), a.dividers()), (1, 1));
    assert_eq!((b.tracks(), b.dividers()), (0, 0));
    assert!(t.context().is_some_and(|c| Context::ptr_eq(&c, &a)));

    t.detach();
    d.detach();
    t.detach();
    assert_eq!((a.tracks(), a.dividers()), (0, 0));

    t.attach(&b).unwrap();
    assert_eq!(b.tracks(), 1);
}

#[test]
fn grouped_changes_are_atomic_for_the_renderer() {
    let ctx = stereo();
    let tracks: Vec<Track> = (0..4).map(|_| Track::new()).collect();
    {
        let _guard = ctx.lock();
        for t in &tracks {
            t.attach(&ctx).unwrap();
            t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();
        }
        assert_eq!(ctx.tracks(), 4);
    }
    let mut buf = vec![0i16; 2 * 256];
    assert_eq!(ctx.generate_frames(&mut buf, 256), 256);
}

struct Song {
    ctx: Context,
    lead: Track,
    extra: Track,
    beat: Divider,
    fired: Arc<AtomicU64>,
}

fn song() -> Song {
    let ctx = stereo();
    let lead = Track::with_waveform(Waveform::sawtooth());
    lead.attach(&ctx).unwrap();
    lead.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();

    let fired = Arc::new(AtomicU64::new(0));
    let f = Arc::clone(&fired);
    let beat = Divider::new(6, move |_, _| {
        f.fetch_add(1, Ordering::Relaxed);
        ControlFlow::Continue(())
    });
    beat.attach(&ctx).unwrap();
    Song { ctx, lead, extra: Track::new(), beat, fired }
}

/// One control-thread step; the caller holds the context lock.
fn mutate(song: &Song, i: i32) {
    let Song { ctx, lead, extra, beat, .. } = song;
    lead.set_int(AttrKind::Note, semitones(NOTE_A4 + i % 12)).unwrap();
    lead.set_int(AttrKind::Volume, (i * 97) % MAX_VOLUME).unwrap();
    lead.set_int(AttrKind::Panning, (i * 31) % MAX_VOLUME - MAX_VOLUME / 2).unwrap();
    if i % 3 == 0 {
        extra.attach(ctx).unwrap();
        extra.set_int(AttrKind::Note, semitones(NOTE_C0 + i % 48)).unwrap();
    } else if i % 3 == 2 {
        extra.detach();
    }
    if i % 500 == 0 {
        beat.set_ticks(1 + (i as u32 / 500)).unwrap();
    }
}

const PASS: usize = 512;
const STEPS: i32 = 2_000;

#[test]
fn control_thread_mutation_during_render() {
    let live = song();
    let done = Arc::new(AtomicBool::new(false));
    let renderer = {
        let ctx = live.ctx.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut rendered = Vec::new();
            let mut buf = vec![0i16; 2 * PASS];
            while !done.load(Ordering::Acquire) {
                buf.fill(i16::MIN);
                assert_eq!(ctx.generate_frames(&mut buf, PASS), PASS);
                rendered.extend_from_slice(&buf);
            }
            rendered
        })
    };

    // frame time at which each step landed
    let mut applied = Vec::with_capacity(STEPS as usize);
    for i in 0..STEPS {
        let _guard = live.ctx.lock();
        applied.push(live.ctx.time());
        mutate(&live, i);
    }
    let extra_detached_at = {
        let _guard = live.ctx.lock();
        live.extra.detach();
        live.ctx.time()
    };
    done.store(true, Ordering::Release);
    let rendered = renderer.join().unwrap();

    let passes = rendered.len() / (2 * PASS);
    assert_eq!(live.ctx.time(), (passes * PASS) as u64);
    assert_eq!(live.ctx.tracks(), 1);
    assert_eq!(live.ctx.dividers(), 1);
    assert_eq!(live.beat.count(), live.fired.load(Ordering::Relaxed));
    assert_eq!(live.lead.get_int(AttrKind::Note).unwrap(), semitones(NOTE_A4 + (STEPS - 1) % 12));
    assert!(applied.iter().all(|&t| t % PASS as u64 == 0));

    // Single-threaded replay applying each step between the same passes
    // must reproduce every rendered value.
    let replay = song();
    let mut steps = applied.iter().zip(0..).peekable();
    let mut expected = Vec::with_capacity(rendered.len());
    let mut buf = vec![0i16; 2 * PASS];
    for pass in 0..passes {
        let now = (pass * PASS) as u64;
        while let Some((_, i)) = steps.next_if(|&(&t, _)| t == now) {
            mutate(&replay, i);
        }
        if extra_detached_at == now {
            replay.extra.detach();
        }
        buf.fill(i16::MAX);
        assert_eq!(replay.ctx.generate_frames(&mut buf, PASS), PASS);
        expected.extend_from_slice(&buf);
    }
    assert!(rendered == expected, "threaded render diverged from replay");
    assert_eq!(replay.fired.load(Ordering::Relaxed), live.fired.load(Ordering::Relaxed));
}

#[test]
fn handles_move_across_threads() {
    let ctx = stereo();
    let t = Track::new();
    let worker = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            t.attach(&ctx).unwrap();
            t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();
            t
        })
    };
    let t = worker.join().unwrap();
    assert!(t.is_attached());
    drop(t);
    assert_eq!(ctx.tracks(), 0);
}
