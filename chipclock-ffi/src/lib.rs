//! chipclock-ffi: C ABI for embedding the chipclock context in C/C++ hosts.
//!
//! ABI notes
//! - All functions are `extern "C"` and `#[no_mangle]`.
//! - Opaque handles: `ChipclockContext`, `ChipclockTrack`, `ChipclockDivider`
//!   (heap-allocated; you own them and free them with the matching
//!   `*_destroy`).
//! - Fallible calls return `CHIPCLOCK_OK` (0) or a negative `CHIPCLOCK_ERR_*`.
//! - Attributes are addressed by the integer tags of `AttrKind`.
//!
//! Threading
//! - Every handle may be used from any thread; the context lock serializes
//!   access. A divider callback runs on the rendering thread with the lock
//!   held and may call back into this API.
//! - The lock cannot be held across calls from C; each call is atomic on its
//!   own.

use std::ffi::c_void;
use std::ops::ControlFlow;

use chipclock_engine::core::attr::{AttrKind, AttrValue, Attributes};
use chipclock_engine::core::shared::Shared;
use chipclock_engine::core::waveform::{self, Waveform, WaveformKind};
use chipclock_engine::{Context, ContextConfig, Divider, Error, Track};

pub const CHIPCLOCK_OK: i32 = 0;
pub const CHIPCLOCK_ERR_NULL: i32 = -1;
pub const CHIPCLOCK_ERR_ALREADY_ATTACHED: i32 = -2;
pub const CHIPCLOCK_ERR_INVALID_TICKS: i32 = -3;
pub const CHIPCLOCK_ERR_UNKNOWN_ATTRIBUTE: i32 = -4;
pub const CHIPCLOCK_ERR_READ_ONLY: i32 = -5;
pub const CHIPCLOCK_ERR_SIZE: i32 = -6;
pub const CHIPCLOCK_ERR_OUT_OF_RANGE: i32 = -7;
pub const CHIPCLOCK_ERR_INVALID: i32 = -8;

fn code(e: &Error) -> i32 {
    match e {
        Error::AlreadyAttached => CHIPCLOCK_ERR_ALREADY_ATTACHED,
        Error::InvalidTicks(_) => CHIPCLOCK_ERR_INVALID_TICKS,
        Error::UnknownAttribute(_) | Error::UnknownTag(_) => CHIPCLOCK_ERR_UNKNOWN_ATTRIBUTE,
        Error::ReadOnly | Error::ReadOnlyAttribute(_) => CHIPCLOCK_ERR_READ_ONLY,
        Error::SizeMismatch { .. } | Error::WrongShape(_) => CHIPCLOCK_ERR_SIZE,
        Error::OutOfRange { .. } => CHIPCLOCK_ERR_OUT_OF_RANGE,
        _ => CHIPCLOCK_ERR_INVALID,
    }
}

fn status(r: chipclock_engine::Result<()>) -> i32 {
    match r {
        Ok(()) => CHIPCLOCK_OK,
        Err(e) => code(&e),
    }
}

/// Opaque context handle.
pub struct ChipclockContext {
    inner: Context,
}

/// Opaque track handle.
pub struct ChipclockTrack {
    inner: Track,
}

/// Opaque divider handle.
pub struct ChipclockDivider {
    inner: Divider,
}

/// Divider callback: `user_data`, context tick counter, firing count.
/// Return non-zero to detach the divider.
pub type ChipclockDividerFn = extern "C" fn(user_data: *mut c_void, ticks: u64, count: u64) -> i32;

/// Host pointer moved to the render thread.
struct UserData(*mut c_void);

// The host guarantees `user_data` may be used from the rendering thread.
unsafe impl Send for UserData {}

/// Borrow a handle, bailing out with `$err` on null.
macro_rules! handle {
    ($ptr:expr, $err:expr) => {
        match unsafe { $ptr.as_ref() } {
            Some(h) => &h.inner,
            None => return $err,
        }
    };
}

fn get_int(target: &impl Attributes, tag: i32, out: *mut i32) -> i32 {
    let Some(out) = (unsafe { out.as_mut() }) else { return CHIPCLOCK_ERR_NULL };
    match AttrKind::try_from(tag).and_then(|k| target.get_int(k)) {
        Ok(v) => {
            *out = v;
            CHIPCLOCK_OK
        }
        Err(e) => code(&e),
    }
}

fn set_int(target: &impl Attributes, tag: i32, value: i32) -> i32 {
    status(AttrKind::try_from(tag).and_then(|k| target.set_attribute(k, &AttrValue::Int(value))))
}

// --- Context -------------------------------------------------------------------

/// Create a context. Returns null when the configuration is rejected.
#[no_mangle]
pub extern "C" fn chipclock_context_create(sample_rate: u32, channels: u32, clock_rate: u32) -> *mut ChipclockContext {
    let config = ContextConfig { sample_rate, channels: channels as usize, clock_rate };
    match Context::new(config) {
        Ok(inner) => Box::into_raw(Box::new(ChipclockContext { inner })),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a context handle. Attached tracks and dividers count as detached
/// once the last handle is gone.
#[no_mangle]
pub extern "C" fn chipclock_context_destroy(ctx: *mut ChipclockContext) {
    if !ctx.is_null() {
        unsafe { drop(Box::from_raw(ctx)); }
    }
}

/// Render `frames` interleaved frames into `out` (capacity `out_len` values).
/// Returns `frames`, or 0 when nothing was written.
#[no_mangle]
pub extern "C" fn chipclock_context_generate(
    ctx: *mut ChipclockContext,
    out: *mut i16,
    out_len: usize,
    frames: usize,
) -> usize {
    let ctx = handle!(ctx, 0);
    if out.is_null() || out_len == 0 {
        return 0;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out, out_len) };
    ctx.generate_frames(out, frames)
}

/// Rewind time and silence every attached track.
#[no_mangle]
pub extern "C" fn chipclock_context_reset(ctx: *mut ChipclockContext) {
    handle!(ctx, ()).reset();
}

#[no_mangle]
pub extern "C" fn chipclock_context_get_attr(ctx: *mut ChipclockContext, tag: i32, out: *mut i32) -> i32 {
    get_int(handle!(ctx, CHIPCLOCK_ERR_NULL), tag, out)
}

#[no_mangle]
pub extern "C" fn chipclock_context_set_attr(ctx: *mut ChipclockContext, tag: i32, value: i32) -> i32 {
    set_int(handle!(ctx, CHIPCLOCK_ERR_NULL), tag, value)
}

// --- Track ---------------------------------------------------------------------

/// Create a detached track on a preset waveform (`WaveformKind` tag).
/// Returns null for unknown or non-preset kinds.
#[no_mangle]
pub extern "C" fn chipclock_track_create(waveform_kind: i32) -> *mut ChipclockTrack {
    match WaveformKind::try_from(waveform_kind) {
        Ok(kind) if kind.is_preset() => {
            let inner = Track::with_waveform(waveform::preset(kind));
            Box::into_raw(Box::new(ChipclockTrack { inner }))
        }
        _ => std::ptr::null_mut(),
    }
}

/// Destroy a track; detaches it first.
#[no_mangle]
pub extern "C" fn chipclock_track_destroy(track: *mut ChipclockTrack) {
    if !track.is_null() {
        unsafe { drop(Box::from_raw(track)); }
    }
}

#[no_mangle]
pub extern "C" fn chipclock_track_attach(track: *mut ChipclockTrack, ctx: *mut ChipclockContext) -> i32 {
    let track = handle!(track, CHIPCLOCK_ERR_NULL);
    let ctx = handle!(ctx, CHIPCLOCK_ERR_NULL);
    status(track.attach(ctx))
}

/// No-op when the track is not attached.
#[no_mangle]
pub extern "C" fn chipclock_track_detach(track: *mut ChipclockTrack) {
    handle!(track, ()).detach();
}

/// Restore default attributes, keeping bindings and the attachment.
#[no_mangle]
pub extern "C" fn chipclock_track_reset(track: *mut ChipclockTrack) {
    handle!(track, ()).reset();
}

#[no_mangle]
pub extern "C" fn chipclock_track_get_attr(track: *mut ChipclockTrack, tag: i32, out: *mut i32) -> i32 {
    get_int(handle!(track, CHIPCLOCK_ERR_NULL), tag, out)
}

#[no_mangle]
pub extern "C" fn chipclock_track_set_attr(track: *mut ChipclockTrack, tag: i32, value: i32) -> i32 {
    set_int(handle!(track, CHIPCLOCK_ERR_NULL), tag, value)
}

/// Read an array attribute (arpeggio, sample range, effects) into `out`.
/// `len` must match the attribute's element count.
#[no_mangle]
pub extern "C" fn chipclock_track_get_attr_ints(track: *mut ChipclockTrack, tag: i32, out: *mut i32, len: usize) -> i32 {
    let track = handle!(track, CHIPCLOCK_ERR_NULL);
    if out.is_null() {
        return CHIPCLOCK_ERR_NULL;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(out, len) };
    status(AttrKind::try_from(tag).and_then(|k| track.get_ints(k, out)))
}

#[no_mangle]
pub extern "C" fn chipclock_track_set_attr_ints(
    track: *mut ChipclockTrack,
    tag: i32,
    values: *const i32,
    len: usize,
) -> i32 {
    let track = handle!(track, CHIPCLOCK_ERR_NULL);
    if values.is_null() && len > 0 {
        return CHIPCLOCK_ERR_NULL;
    }
    let values = if len == 0 { &[][..] } else { unsafe { std::slice::from_raw_parts(values, len) } };
    status(AttrKind::try_from(tag).and_then(|k| track.set_ints(k, values)))
}

/// Bind a custom waveform copied from `frames` (at least 2 values).
#[no_mangle]
pub extern "C" fn chipclock_track_set_custom_waveform(track: *mut ChipclockTrack, frames: *const i16, len: usize) -> i32 {
    let track = handle!(track, CHIPCLOCK_ERR_NULL);
    if frames.is_null() {
        return CHIPCLOCK_ERR_NULL;
    }
    let frames = unsafe { std::slice::from_raw_parts(frames, len) };
    match Waveform::from_frames(frames) {
        Ok(w) => {
            track.set_waveform(Some(Shared::new(w)));
            CHIPCLOCK_OK
        }
        Err(e) => code(&e),
    }
}

// --- Divider -------------------------------------------------------------------

/// Create a detached divider calling `callback(user_data, ticks, count)` every
/// `ticks` engine ticks. Returns null when `callback` is null.
#[no_mangle]
pub extern "C" fn chipclock_divider_create(
    ticks: u32,
    callback: Option<ChipclockDividerFn>,
    user_data: *mut c_void,
) -> *mut ChipclockDivider {
    let Some(callback) = callback else { return std::ptr::null_mut() };
    let user = UserData(user_data);
    let inner = Divider::new(ticks, move |_, ev| {
        let user = &user;
        if callback(user.0, ev.ticks, ev.count) != 0 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    Box::into_raw(Box::new(ChipclockDivider { inner }))
}

/// Destroy a divider; detaches it first. Must not be called from inside its
/// own callback.
#[no_mangle]
pub extern "C" fn chipclock_divider_destroy(divider: *mut ChipclockDivider) {
    if !divider.is_null() {
        unsafe { drop(Box::from_raw(divider)); }
    }
}

#[no_mangle]
pub extern "C" fn chipclock_divider_attach(divider: *mut ChipclockDivider, ctx: *mut ChipclockContext) -> i32 {
    let divider = handle!(divider, CHIPCLOCK_ERR_NULL);
    let ctx = handle!(ctx, CHIPCLOCK_ERR_NULL);
    status(divider.attach(ctx))
}

#[no_mangle]
pub extern "C" fn chipclock_divider_detach(divider: *mut ChipclockDivider) {
    handle!(divider, ()).detach();
}

#[no_mangle]
pub extern "C" fn chipclock_divider_set_ticks(divider: *mut ChipclockDivider, ticks: u32) -> i32 {
    status(handle!(divider, CHIPCLOCK_ERR_NULL).set_ticks(ticks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    extern "C" fn count_to_three(user: *mut c_void, _ticks: u64, count: u64) -> i32 {
        let hits = unsafe { &*(user as *const AtomicU64) };
        hits.fetch_add(1, Ordering::SeqCst);
        i32::from(count >= 3)
    }

    #[test]
    fn lifecycle_through_the_abi() {
        let ctx = chipclock_context_create(48_000, 2, 240);
        assert!(!ctx.is_null());
        assert!(chipclock_context_create(1_000, 2, 240).is_null());

        let track = chipclock_track_create(WaveformKind::Square as i32);
        assert!(chipclock_track_create(WaveformKind::Custom as i32).is_null());
        assert_eq!(chipclock_track_attach(track, ctx), CHIPCLOCK_OK);
        assert_eq!(chipclock_track_attach(track, ctx), CHIPCLOCK_ERR_ALREADY_ATTACHED);
        assert_eq!(chipclock_track_set_attr(track, AttrKind::Note as i32, 57 << 20), CHIPCLOCK_OK);
        assert_eq!(chipclock_track_set_attr(track, 0x7fff, 0), CHIPCLOCK_ERR_UNKNOWN_ATTRIBUTE);
        let mut kind = 0;
        assert_eq!(chipclock_track_set_attr(track, AttrKind::Waveform as i32, WaveformKind::Triangle as i32), CHIPCLOCK_OK);
        assert_eq!(chipclock_track_get_attr(track, AttrKind::Waveform as i32, &mut kind), CHIPCLOCK_OK);
        assert_eq!(kind, WaveformKind::Triangle as i32);
        assert_eq!(chipclock_track_set_attr_ints(track, AttrKind::EffectVibrato as i32, [4, 1 << 19].as_ptr(), 2), CHIPCLOCK_ERR_SIZE);

        let mut rate = 0;
        assert_eq!(chipclock_context_get_attr(ctx, AttrKind::SampleRate as i32, &mut rate), CHIPCLOCK_OK);
        assert_eq!(rate, 48_000);

        let hits = AtomicU64::new(0);
        let divider = chipclock_divider_create(1, Some(count_to_three), &hits as *const AtomicU64 as *mut c_void);
        assert_eq!(chipclock_divider_attach(divider, ctx), CHIPCLOCK_OK);

        let mut buf = vec![0i16; 2 * 1000];
        assert_eq!(chipclock_context_generate(ctx, buf.as_mut_ptr(), buf.len(), 1000), 1000);
        assert_eq!(chipclock_context_generate(ctx, buf.as_mut_ptr(), buf.len(), 1001), 0);
        assert!(buf.iter().any(|&x| x != 0));
        // five ticks rendered, detached after the third
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        chipclock_divider_destroy(divider);
        chipclock_track_destroy(track);
        chipclock_context_destroy(ctx);
    }

    #[test]
    fn null_handles_are_rejected() {
        let mut v = 0;
        assert_eq!(chipclock_track_get_attr(std::ptr::null_mut(), 0, &mut v), CHIPCLOCK_ERR_NULL);
        assert_eq!(chipclock_context_generate(std::ptr::null_mut(), std::ptr::null_mut(), 0, 1), 0);
        assert!(chipclock_divider_create(1, None, std::ptr::null_mut()).is_null());
        chipclock_track_detach(std::ptr::null_mut());
        chipclock_context_destroy(std::ptr::null_mut());
    }
}
