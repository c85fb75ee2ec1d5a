use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chipclock_engine::prelude::*;

// 48 kHz at 240 ticks/s: one tick every 200 frames.
const FRAMES_PER_TICK: usize = 200;

fn mono() -> Context {
    Context::new(ContextConfig { sample_rate: 48_000, channels: 1, clock_rate: 240 }).unwrap()
}

/// Render `frames` frames in uneven chunks.
fn render(ctx: &Context, frames: usize) {
    let mut buf = vec![0i16; 333];
    let mut left = frames;
    while left > 0 {
        let n = left.min(buf.len());
        assert_eq!(ctx.generate_frames(&mut buf, n), n);
        left -= n;
    }
}

fn counting(ticks: u32) -> (Divider, Arc<AtomicU64>) {
    let hits = Arc::new(AtomicU64::new(0));
    let h = Arc::clone(&hits);
    let d = Divider::new(ticks, move |_, _| {
        h.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    });
    (d, hits)
}

#[test]
fn fires_once_per_period_without_drift() {
    let ctx = mono();
    let (d, hits) = counting(3);
    d.attach(&ctx).unwrap();

    render(&ctx, 7 * 3 * FRAMES_PER_TICK);
    assert_eq!(ctx.ticks(), 21);
    assert_eq!(hits.load(Ordering::SeqCst), 7);
    assert_eq!(d.count(), 7);

    // one frame short of the next period
    render(&ctx, 3 * FRAMES_PER_TICK - 1);
    assert_eq!(hits.load(Ordering::SeqCst), 7);
    render(&ctx, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 8);
}

#[test]
fn uneven_rates_keep_whole_ticks() {
    // 44 100 / 240 is not integral
    let ctx = Context::new(ContextConfig { sample_rate: 44_100, channels: 2, clock_rate: 240 }).unwrap();
    let (d, hits) = counting(1);
    d.attach(&ctx).unwrap();
    let mut buf = vec![0i16; 2 * 4410];
    for _ in 0..10 {
        assert_eq!(ctx.generate_frames(&mut buf, 4410), 4410);
    }
    // one second of audio
    assert_eq!(ctx.ticks(), 240);
    assert_eq!(hits.load(Ordering::SeqCst), 240);
}

#[test]
fn shrinking_the_period_fires_at_the_next_tick() {
    let ctx = mono();
    let (d, hits) = counting(10);
    d.attach(&ctx).unwrap();
    render(&ctx, 6 * FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    d.set_ticks(4).unwrap();
    render(&ctx, FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // counting restarted from zero at tick 7
    render(&ctx, 3 * FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    render(&ctx, FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn dividers_fire_in_attachment_order() {
    let ctx = mono();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let dividers: Vec<Divider> = (0..3)
        .map(|id| {
            let o = Arc::clone(&order);
            Divider::new(2, move |_, _| {
                o.lock().push(id);
                ControlFlow::Continue(())
            })
        })
        .collect();
    for d in dividers.iter().rev() {
        d.attach(&ctx).unwrap();
    }
    render(&ctx, 4 * FRAMES_PER_TICK);
    assert_eq!(*order.lock(), [2, 1, 0, 2, 1, 0]);
}

#[test]
fn callback_changes_are_heard_from_the_boundary() {
    let ctx = mono();
    let track = Arc::new(Track::new());
    track.attach(&ctx).unwrap();

    let t = Arc::clone(&track);
    let d = Divider::new(1, move |_, ev| {
        if ev.count == 1 {
            t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();
        }
        ControlFlow::Continue(())
    });
    d.attach(&ctx).unwrap();

    let mut buf = vec![0i16; 2 * FRAMES_PER_TICK];
    assert_eq!(ctx.generate_frames(&mut buf, 2 * FRAMES_PER_TICK), 2 * FRAMES_PER_TICK);
    let (before, after) = buf.split_at(FRAMES_PER_TICK);
    assert!(before.iter().all(|&x| x == 0));
    assert!(after.iter().any(|&x| x != 0));
}

#[test]
fn callback_may_attach_and_detach() {
    let ctx = mono();
    let (late, late_hits) = counting(1);
    let late = Arc::new(late);
    let l = Arc::clone(&late);
    let starter = Divider::new(2, move |c, _| {
        l.attach(c).unwrap();
        ControlFlow::Break(())
    });
    starter.attach(&ctx).unwrap();

    render(&ctx, 5 * FRAMES_PER_TICK);
    assert!(!starter.is_attached());
    assert!(late.is_attached());
    // attached during tick 2, first counts tick 3
    assert_eq!(late_hits.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.dividers(), 1);

    late.detach();
    late.detach();
    assert_eq!(ctx.dividers(), 0);
}

#[test]
fn reset_restarts_counting() {
    let ctx = mono();
    let (d, hits) = counting(4);
    d.attach(&ctx).unwrap();
    render(&ctx, 3 * FRAMES_PER_TICK);
    ctx.reset();
    render(&ctx, 3 * FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    render(&ctx, FRAMES_PER_TICK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.ticks(), 4);
}
