//! Dividers: callbacks fired every N engine ticks.
//!
//! The callback runs on the render thread with the context lock held and
//! may call back into any context, track or divider method. Returning
//! `ControlFlow::Break(())` detaches the divider after the call.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use chipclock_core::attr::AttrKind;
use parking_lot::Mutex;

use crate::context::{locked, Context, ContextShared, Linked};
use crate::error::{Error, Result};

/// Describes one divider firing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TickEvent {
    /// Always [`AttrKind::EventDivider`].
    pub kind: AttrKind,
    /// Context tick counter at the firing.
    pub ticks: u64,
    /// Divider period in ticks.
    pub divider_ticks: u32,
    /// Number of firings since attach, this one included.
    pub count: u64,
}

pub type DividerCallback = Box<dyn FnMut(&Context, &TickEvent) -> ControlFlow<()> + Send + 'static>;

pub(crate) struct DividerState {
    context: Option<Weak<ContextShared>>,
    ticks: u32,
    counter: u32,
    count: u64,
    /// Bumped on every attach and detach.
    epoch: u64,
    callback: Option<DividerCallback>,
}

impl Linked for DividerState {
    fn link(&self) -> Option<&Weak<ContextShared>> {
        self.context.as_ref()
    }
}

pub(crate) struct DividerInner {
    state: Mutex<DividerState>,
}

impl DividerInner {
    /// Count one tick; the attach epoch when the threshold is reached. A
    /// threshold lowered below the running count fires on the next tick.
    pub(crate) fn count_tick(&self) -> Option<u64> {
        let mut s = self.state.lock();
        s.counter += 1;
        if s.counter >= s.ticks {
            s.counter = 0;
            Some(s.epoch)
        } else {
            None
        }
    }

    pub(crate) fn restart(&self) {
        self.state.lock().counter = 0;
    }

    /// Run the callback without holding the state mutex. `epoch` is the one
    /// returned by `count_tick`.
    pub(crate) fn fire(self: &Arc<Self>, ctx: &Context, ticks: u64, epoch: u64) {
        let (mut callback, event) = {
            let mut s = self.state.lock();
            // detached, or detached and attached again, earlier in this tick
            if s.epoch != epoch || !s.is_linked_to(ctx.shared()) {
                return;
            }
            let Some(cb) = s.callback.take() else { return };
            s.count += 1;
            (cb, TickEvent { kind: AttrKind::EventDivider, ticks, divider_ticks: s.ticks, count: s.count })
        };

        let flow = callback(ctx, &event);

        {
            let mut s = self.state.lock();
            // keep a callback installed from inside the call
            if s.callback.is_none() {
                s.callback = Some(callback);
            }
        }
        if flow.is_break() {
            detach(self, ctx);
            log::debug!("divider detached itself after {} firing(s)", event.count);
        }
    }
}

fn detach(inner: &Arc<DividerInner>, ctx: &Context) {
    let _guard = ctx.lock();
    {
        let mut s = inner.state.lock();
        if !s.is_linked_to(ctx.shared()) {
            return;
        }
        s.context = None;
        s.counter = 0;
        s.epoch += 1;
    }
    ctx.remove_divider(inner);
}

pub struct Divider {
    inner: Arc<DividerInner>,
}

impl Divider {
    /// Detached divider firing `callback` every `ticks` ticks.
    pub fn new<F>(ticks: u32, callback: F) -> Self
    where
        F: FnMut(&Context, &TickEvent) -> ControlFlow<()> + Send + 'static,
    {
        Self {
            inner: Arc::new(DividerInner {
                state: Mutex::new(DividerState {
                    context: None,
                    ticks,
                    counter: 0,
                    count: 0,
                    epoch: 0,
                    callback: Some(Box::new(callback)),
                }),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DividerState) -> R) -> R {
        locked(&self.inner.state, f)
    }

    /// Start counting ticks of `ctx`. Fails without side effect when ticks
    /// are 0 or the divider is already attached.
    pub fn attach(&self, ctx: &Context) -> Result<()> {
        let _guard = ctx.lock();
        {
            let mut s = self.inner.state.lock();
            if s.context.as_ref().and_then(Weak::upgrade).is_some() {
                return Err(Error::AlreadyAttached);
            }
            if s.ticks == 0 {
                return Err(Error::InvalidTicks(0));
            }
            s.context = Some(Arc::downgrade(ctx.shared()));
            s.counter = 0;
            s.count = 0;
            s.epoch += 1;
        }
        let n = ctx.push_divider(Arc::clone(&self.inner));
        log::debug!("divider attached, {n} on context");
        Ok(())
    }

    /// Stop firing immediately. No-op when detached.
    pub fn detach(&self) {
        match self.context() {
            Some(ctx) => detach(&self.inner, &ctx),
            None => self.inner.state.lock().context = None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.context().is_some()
    }

    pub fn context(&self) -> Option<Context> {
        let shared = self.inner.state.lock().context.as_ref().and_then(Weak::upgrade);
        shared.map(Context::from_shared)
    }

    pub fn ticks(&self) -> u32 {
        self.with_state(|s| s.ticks)
    }

    /// Change the period; applies at the next threshold check.
    pub fn set_ticks(&self, ticks: u32) -> Result<()> {
        if ticks == 0 {
            return Err(Error::InvalidTicks(0));
        }
        self.with_state(|s| s.ticks = ticks);
        Ok(())
    }

    /// Firings since the last attach.
    pub fn count(&self) -> u64 {
        self.with_state(|s| s.count)
    }

    /// Replace the callback.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&Context, &TickEvent) -> ControlFlow<()> + Send + 'static,
    {
        self.with_state(|s| s.callback = Some(Box::new(callback)));
    }
}

impl Drop for Divider {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Divider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ticks, count, attached) = self.with_state(|s| (s.ticks, s.count, s.context.is_some()));
        f.debug_struct("Divider")
            .field("ticks", &ticks)
            .field("count", &count)
            .field("attached", &attached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn ctx() -> Context {
        Context::new(ContextConfig { sample_rate: 48_000, channels: 1, clock_rate: 240 }).unwrap()
    }

    fn run_ticks(ctx: &Context, ticks: usize) {
        let mut buf = vec![0i16; 200 * ticks];
        assert_eq!(ctx.generate_frames(&mut buf, 200 * ticks), 200 * ticks);
    }

    #[test]
    fn zero_ticks_cannot_attach() {
        let c = ctx();
        let d = Divider::new(0, |_, _| ControlFlow::Continue(()));
        assert_eq!(d.attach(&c), Err(Error::InvalidTicks(0)));
        assert_eq!(d.set_ticks(0), Err(Error::InvalidTicks(0)));
        d.set_ticks(3).unwrap();
        d.attach(&c).unwrap();
        assert_eq!(d.attach(&c), Err(Error::AlreadyAttached));
        assert_eq!(c.dividers(), 1);
    }

    #[test]
    fn break_detaches() {
        let c = ctx();
        let d = Divider::new(1, |_, ev| if ev.count == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) });
        d.attach(&c).unwrap();
        run_ticks(&c, 10);
        assert_eq!(d.count(), 3);
        assert!(!d.is_attached());
        assert_eq!(c.dividers(), 0);
    }

    #[test]
    fn event_describes_firing() {
        let c = ctx();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let d = Divider::new(2, move |_, ev| {
            sink.lock().push(*ev);
            ControlFlow::Continue(())
        });
        d.attach(&c).unwrap();
        run_ticks(&c, 4);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], TickEvent { kind: AttrKind::EventDivider, ticks: 4, divider_ticks: 2, count: 2 });
    }

    #[test]
    fn callback_can_detach_a_later_divider() {
        let c = ctx();
        let fired = Arc::new(AtomicU64::new(0));
        let second = Arc::new(Mutex::new(None::<Divider>));
        let f = Arc::clone(&fired);
        let victim = Divider::new(1, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        let slot = Arc::clone(&second);
        let first = Divider::new(1, move |_, _| {
            if let Some(d) = slot.lock().as_ref() {
                d.detach();
            }
            ControlFlow::Continue(())
        });
        first.attach(&c).unwrap();
        victim.attach(&c).unwrap();
        *second.lock() = Some(victim);
        run_ticks(&c, 3);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(c.dividers(), 1);
    }

    #[test]
    fn reattach_within_a_tick_waits_for_the_new_period() {
        let c = ctx();
        let fired = Arc::new(AtomicU64::new(0));
        let second = Arc::new(Mutex::new(None::<Divider>));
        let f = Arc::clone(&fired);
        let victim = Divider::new(1, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        let slot = Arc::clone(&second);
        let first = Divider::new(1, move |ctx, ev| {
            if ev.count == 1 {
                if let Some(d) = slot.lock().as_ref() {
                    d.detach();
                    d.attach(ctx).unwrap();
                }
            }
            ControlFlow::Continue(())
        });
        first.attach(&c).unwrap();
        victim.attach(&c).unwrap();
        *second.lock() = Some(victim);
        run_ticks(&c, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(second.lock().as_ref().map(Divider::count), Some(0));
        run_ticks(&c, 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(c.dividers(), 2);
    }
}
