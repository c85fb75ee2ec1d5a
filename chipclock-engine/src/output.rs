//! Audio output: connects a context to a pull-model device callback.
//!
//! [`AudioOutput`] owns a backend and a handle to the context. The backend
//! calls the render closure once per device buffer; the closure takes the
//! context lock for the whole call, renders interleaved `i16` frames and pads
//! whatever it could not render with silence.
//!
//! Features used by this file:
//! - `realtime` : [`CpalBackend`] over the default `cpal` host

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cfg_if::cfg_if;

use crate::context::Context;
use crate::error::OutputError;

/// Render closure handed to a backend; fills one interleaved device buffer.
pub type RenderFn = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// Device side of an [`AudioOutput`].
pub trait OutputBackend {
    /// Create a stream calling `render` for every device buffer. The stream
    /// does not need to be running afterwards.
    fn open(&mut self, channels: usize, sample_rate: u32, render: RenderFn) -> Result<(), OutputError>;

    fn play(&mut self) -> Result<(), OutputError>;

    fn pause(&mut self) -> Result<(), OutputError>;

    /// Drop the stream. Must not return while a render call is running.
    fn close(&mut self);

    /// True once the device reported that it went away.
    fn is_interrupted(&self) -> bool {
        false
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputState {
    Stopped,
    Started,
    /// Stream exists but is paused.
    Suspended,
}

pub struct AudioOutput<B: OutputBackend> {
    context: Context,
    backend: B,
    state: OutputState,
    active: Arc<AtomicBool>,
    /// Channel count and sample rate the open stream was created with.
    stream: Option<(usize, u32)>,
}

impl<B: OutputBackend> AudioOutput<B> {
    pub fn new(context: Context, backend: B) -> Self {
        Self { context, backend, state: OutputState::Stopped, active: Arc::new(AtomicBool::new(false)), stream: None }
    }

    #[inline] pub fn context(&self) -> &Context { &self.context }
    #[inline] pub fn backend(&self) -> &B { &self.backend }
    #[inline] pub fn backend_mut(&mut self) -> &mut B { &mut self.backend }
    #[inline] pub fn state(&self) -> OutputState { self.state }
    #[inline] pub fn is_started(&self) -> bool { self.state != OutputState::Stopped }
    #[inline] pub fn is_interrupted(&self) -> bool { self.backend.is_interrupted() }

    /// Open and run the stream. Calling it again while started does nothing,
    /// unless the device was interrupted, in which case the stream is reopened.
    pub fn start(&mut self) -> Result<(), OutputError> {
        if self.is_started() {
            return match self.backend.is_interrupted() {
                true => self.reopen(),
                false => Ok(()),
            };
        }
        self.open_stream(true)?;
        let config = self.context.config();
        log::info!("audio output started ({} Hz, {} ch)", config.sample_rate, config.channels);
        Ok(())
    }

    /// Stop rendering and close the stream. Returns once no render call is
    /// running; attached tracks and dividers are untouched. Closing cannot
    /// fail, so this is always `Ok`.
    pub fn stop(&mut self) -> Result<(), OutputError> {
        if !self.is_started() {
            return Ok(());
        }
        {
            let _guard = self.context.lock();
            self.active.store(false, Ordering::Release);
        }
        self.backend.close();
        self.stream = None;
        self.state = OutputState::Stopped;
        log::info!("audio output stopped");
        Ok(())
    }

    /// Pause the stream, e.g. on a device interruption.
    pub fn suspend(&mut self) -> Result<(), OutputError> {
        if self.state != OutputState::Started {
            return Ok(());
        }
        self.backend.pause()?;
        self.state = OutputState::Suspended;
        log::info!("audio output suspended");
        Ok(())
    }

    /// Continue a suspended stream; an interrupted device gets a new stream.
    pub fn resume(&mut self) -> Result<(), OutputError> {
        if self.state != OutputState::Suspended {
            return Ok(());
        }
        if self.backend.is_interrupted() {
            self.state = OutputState::Started;
            return self.reopen();
        }
        self.backend.play()?;
        self.state = OutputState::Started;
        log::info!("audio output resumed");
        Ok(())
    }

    /// Reopen the stream when the device was interrupted or the context's
    /// channel count or sample rate no longer match it. Returns true when a
    /// new stream was opened. Context state is not touched.
    pub fn poll(&mut self) -> Result<bool, OutputError> {
        if !self.is_started() {
            return Ok(false);
        }
        let config = self.context.config();
        if self.backend.is_interrupted() {
            log::warn!("output device interrupted, reopening stream");
        } else if self.stream != Some((config.channels, config.sample_rate)) {
            log::info!("context now {} Hz, {} ch; reopening stream", config.sample_rate, config.channels);
        } else {
            return Ok(false);
        }
        self.reopen()?;
        Ok(true)
    }

    /// Replace the stream, keeping the started or suspended state.
    fn reopen(&mut self) -> Result<(), OutputError> {
        let play = self.state == OutputState::Started;
        self.backend.close();
        self.stream = None;
        self.state = OutputState::Stopped;
        self.open_stream(play)
    }

    fn open_stream(&mut self, play: bool) -> Result<(), OutputError> {
        let config = self.context.config();
        self.active.store(true, Ordering::Release);
        let render = render_callback(self.context.clone(), Arc::clone(&self.active), config.channels);
        let opened = self
            .backend
            .open(config.channels, config.sample_rate, render)
            .and_then(|_| if play { self.backend.play() } else { Ok(()) });
        if let Err(e) = opened {
            self.active.store(false, Ordering::Release);
            self.backend.close();
            return Err(e);
        }
        self.stream = Some((config.channels, config.sample_rate));
        self.state = if play { OutputState::Started } else { OutputState::Suspended };
        Ok(())
    }
}

impl<B: OutputBackend> Drop for AudioOutput<B> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Render closure for a stream of `channels` interleaved channels. Buffers
/// are silent once the context's channel count differs from the stream's.
fn render_callback(context: Context, active: Arc<AtomicBool>, channels: usize) -> RenderFn {
    Box::new(move |out: &mut [i16]| {
        let _guard = context.lock();
        if !active.load(Ordering::Acquire) || channels == 0 || context.config().channels != channels {
            out.fill(0);
            return;
        }
        let frames = out.len() / channels;
        let written = context.generate_frames(out, frames) * channels;
        out[written..].fill(0);
    })
}

cfg_if! {
    if #[cfg(feature = "realtime")] {
        use std::fmt;

        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        /// Values preallocated for device buffer conversion.
        const SCRATCH_VALUES: usize = 16_384;

        /// `cpal` output on the default host.
        pub struct CpalBackend {
            device: Option<cpal::Device>,
            stream: Option<cpal::Stream>,
            interrupted: Arc<AtomicBool>,
        }

        impl Default for CpalBackend {
            fn default() -> Self {
                Self::new()
            }
        }

        impl CpalBackend {
            /// Use the default output device when the stream opens.
            pub fn new() -> Self {
                Self { device: None, stream: None, interrupted: Arc::new(AtomicBool::new(false)) }
            }

            pub fn with_device(device: cpal::Device) -> Self {
                Self { device: Some(device), ..Self::new() }
            }

            /// Name of the output device, once known.
            pub fn device_name(&self) -> Option<String> {
                self.device.as_ref().and_then(|d| d.name().ok())
            }
        }

        impl fmt::Debug for CpalBackend {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct("CpalBackend")
                    .field("device", &self.device_name())
                    .field("open", &self.stream.is_some())
                    .finish()
            }
        }

        impl OutputBackend for CpalBackend {
            fn open(&mut self, channels: usize, sample_rate: u32, render: RenderFn) -> Result<(), OutputError> {
                // a device that went away is replaced by the current default
                if self.interrupted.load(Ordering::Acquire) {
                    if let Some(gone) = self.device.take() {
                        log::warn!("dropping interrupted device {:?}", gone.name().ok());
                    }
                }
                let device = match self.device.take() {
                    Some(d) => d,
                    None => cpal::default_host().default_output_device().ok_or(OutputError::NoDevice)?,
                };
                let channels = u16::try_from(channels).map_err(|_| OutputError::Config(format!("{channels} channels")))?;
                let format = match stream_format(&device, channels, sample_rate) {
                    Ok(f) => f,
                    Err(e) => {
                        self.device = Some(device);
                        return Err(e);
                    }
                };
                let config = cpal::StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                self.interrupted.store(false, Ordering::Release);
                let interrupted = Arc::clone(&self.interrupted);
                let err_fn = move |e: cpal::StreamError| {
                    log::warn!("output stream error: {e}");
                    if matches!(e, cpal::StreamError::DeviceNotAvailable) {
                        interrupted.store(true, Ordering::Release);
                    }
                };

                let built = match format {
                    cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, render, err_fn),
                    cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, render, err_fn),
                    cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, render, err_fn),
                    other => Err(OutputError::Config(format!("unsupported device sample format: {other:?}"))),
                };
                let stream = match built {
                    Ok(s) => s,
                    Err(e) => {
                        self.device = Some(device);
                        return Err(e);
                    }
                };
                log::debug!("opened {format:?} stream on {:?}", device.name().ok());
                self.device = Some(device);
                self.stream = Some(stream);
                Ok(())
            }

            fn play(&mut self) -> Result<(), OutputError> {
                match &self.stream {
                    Some(s) => s.play().map_err(|e| OutputError::Play(e.to_string())),
                    None => Err(OutputError::Play("stream not open".into())),
                }
            }

            fn pause(&mut self) -> Result<(), OutputError> {
                match &self.stream {
                    Some(s) => s.pause().map_err(|e| OutputError::Pause(e.to_string())),
                    None => Ok(()),
                }
            }

            fn close(&mut self) {
                self.stream = None;
            }

            fn is_interrupted(&self) -> bool {
                self.interrupted.load(Ordering::Acquire)
            }
        }

        fn stream_format(device: &cpal::Device, channels: u16, sample_rate: u32) -> Result<cpal::SampleFormat, OutputError> {
            let preferred = device.default_output_config().ok().map(|c| c.sample_format());
            let ranges = device.supported_output_configs().map_err(|e| OutputError::Config(e.to_string()))?;
            choose_format(ranges, preferred, channels, sample_rate)
        }

        /// Sample format of a supported range matching `channels` and holding
        /// `sample_rate`. `preferred` wins when several ranges match.
        fn choose_format(
            ranges: impl IntoIterator<Item = cpal::SupportedStreamConfigRange>,
            preferred: Option<cpal::SampleFormat>,
            channels: u16,
            sample_rate: u32,
        ) -> Result<cpal::SampleFormat, OutputError> {
            let formats: Vec<cpal::SampleFormat> = ranges
                .into_iter()
                .filter(|r| r.channels() == channels)
                .filter(|r| (r.min_sample_rate().0..=r.max_sample_rate().0).contains(&sample_rate))
                .map(|r| r.sample_format())
                .filter(|f| matches!(f, cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16))
                .collect();
            match preferred.filter(|p| formats.contains(p)) {
                Some(f) => Ok(f),
                None => formats.first().copied().ok_or_else(|| {
                    OutputError::Config(format!("device has no i16, u16 or f32 stream at {sample_rate} Hz, {channels} ch"))
                }),
            }
        }

        fn build_stream<T>(
            device: &cpal::Device,
            config: &cpal::StreamConfig,
            mut render: RenderFn,
            err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
        ) -> Result<cpal::Stream, OutputError>
        where
            T: cpal::Sample + cpal::FromSample<i16> + cpal::SizedSample + Send + 'static,
        {
            let mut scratch = vec![0i16; SCRATCH_VALUES];
            device
                .build_output_stream(
                    config,
                    move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                        if scratch.len() < output.len() {
                            scratch.resize(output.len(), 0);
                        }
                        let buf = &mut scratch[..output.len()];
                        render(buf);
                        for (o, &s) in output.iter_mut().zip(buf.iter()) {
                            *o = T::from_sample(s);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| OutputError::Build(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::track::Track;
    use chipclock_core::attr::{AttrKind, Attributes};
    use chipclock_core::dsp::{semitones, NOTE_A4};

    /// Backend that keeps the render closure so tests can pull buffers.
    #[derive(Default)]
    struct Recorder {
        opened: usize,
        channels: usize,
        playing: bool,
        interrupted: bool,
        render: Option<RenderFn>,
    }

    impl Recorder {
        fn pull(&mut self, values: usize) -> Vec<i16> {
            let mut buf = vec![1i16; values];
            if let Some(r) = self.render.as_mut() {
                r(&mut buf);
            }
            buf
        }
    }

    impl OutputBackend for Recorder {
        fn open(&mut self, channels: usize, _sample_rate: u32, render: RenderFn) -> Result<(), OutputError> {
            self.opened += 1;
            self.channels = channels;
            self.interrupted = false;
            self.render = Some(render);
            Ok(())
        }

        fn play(&mut self) -> Result<(), OutputError> {
            self.playing = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<(), OutputError> {
            self.playing = false;
            Ok(())
        }

        fn close(&mut self) {
            self.playing = false;
        }

        fn is_interrupted(&self) -> bool {
            self.interrupted
        }
    }

    struct Broken;

    impl OutputBackend for Broken {
        fn open(&mut self, _: usize, _: u32, _: RenderFn) -> Result<(), OutputError> {
            Err(OutputError::NoDevice)
        }
        fn play(&mut self) -> Result<(), OutputError> { Ok(()) }
        fn pause(&mut self) -> Result<(), OutputError> { Ok(()) }
        fn close(&mut self) {}
    }

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    #[test]
    fn start_is_idempotent() {
        let mut out = AudioOutput::new(ctx(), Recorder::default());
        out.start().unwrap();
        out.start().unwrap();
        assert_eq!(out.backend().opened, 1);
        assert!(out.is_started());
        out.stop().unwrap();
        out.stop().unwrap();
        assert!(!out.is_started());
        out.start().unwrap();
        assert_eq!(out.backend().opened, 2);
    }

    #[test]
    fn stopped_output_renders_silence() {
        let c = ctx();
        let t = Track::new();
        t.attach(&c).unwrap();
        t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();

        let mut out = AudioOutput::new(c.clone(), Recorder::default());
        out.start().unwrap();
        assert!(out.backend_mut().pull(512).iter().any(|&x| x != 0));
        let time = c.time();
        assert_eq!(time, 256);

        out.stop().unwrap();
        assert!(out.backend_mut().pull(512).iter().all(|&x| x == 0));
        assert_eq!(c.time(), time);
    }

    #[test]
    fn partial_frame_is_padded() {
        let mut out = AudioOutput::new(ctx(), Recorder::default());
        out.start().unwrap();
        let buf = out.backend_mut().pull(5);
        assert_eq!(buf, vec![0; 5]);
        assert_eq!(out.context().time(), 2);
    }

    #[test]
    fn suspend_and_resume() {
        let mut out = AudioOutput::new(ctx(), Recorder::default());
        out.suspend().unwrap();
        assert_eq!(out.state(), OutputState::Stopped);
        out.start().unwrap();
        out.suspend().unwrap();
        assert_eq!(out.state(), OutputState::Suspended);
        assert!(!out.backend().playing);
        out.resume().unwrap();
        assert!(out.backend().playing);
        assert_eq!(out.state(), OutputState::Started);
    }

    #[test]
    fn failed_open_leaves_output_stopped() {
        let mut out = AudioOutput::new(ctx(), Broken);
        assert!(matches!(out.start(), Err(OutputError::NoDevice)));
        assert!(!out.is_started());
    }

    fn playing_context() -> (Context, Track) {
        let c = ctx();
        let t = Track::new();
        t.attach(&c).unwrap();
        t.set_int(AttrKind::Note, semitones(NOTE_A4)).unwrap();
        (c, t)
    }

    #[test]
    fn interrupted_stream_is_reopened() {
        let (c, _t) = playing_context();
        let mut out = AudioOutput::new(c.clone(), Recorder::default());
        out.start().unwrap();
        assert!(!out.poll().unwrap());
        out.backend_mut().pull(512);
        let time = c.time();

        out.backend_mut().interrupted = true;
        assert!(out.poll().unwrap());
        assert_eq!(out.backend().opened, 2);
        assert!(out.backend().playing);
        assert_eq!(out.state(), OutputState::Started);
        assert_eq!(c.time(), time);
        assert_eq!(c.tracks(), 1);
        assert!(out.backend_mut().pull(512).iter().any(|&x| x != 0));
        assert_eq!(c.time(), time + 256);
    }

    #[test]
    fn start_and_resume_recover_from_interruption() {
        let mut out = AudioOutput::new(ctx(), Recorder::default());
        out.start().unwrap();
        out.backend_mut().interrupted = true;
        out.start().unwrap();
        assert_eq!(out.backend().opened, 2);
        assert!(!out.is_interrupted());

        out.suspend().unwrap();
        out.backend_mut().interrupted = true;
        out.resume().unwrap();
        assert_eq!(out.backend().opened, 3);
        assert!(out.backend().playing);
        assert_eq!(out.state(), OutputState::Started);
    }

    #[test]
    fn suspended_output_stays_paused_across_reopen() {
        let mut out = AudioOutput::new(ctx(), Recorder::default());
        out.start().unwrap();
        out.suspend().unwrap();
        out.backend_mut().interrupted = true;
        assert!(out.poll().unwrap());
        assert_eq!(out.state(), OutputState::Suspended);
        assert!(!out.backend().playing);
    }

    #[test]
    fn channel_change_silences_until_reopened() {
        let (c, _t) = playing_context();
        let mut out = AudioOutput::new(c.clone(), Recorder::default());
        out.start().unwrap();
        assert_eq!(out.backend().channels, 2);

        c.set_int(AttrKind::NumChannels, 1).unwrap();
        let time = c.time();
        assert!(out.backend_mut().pull(512).iter().all(|&x| x == 0));
        assert_eq!(c.time(), time);

        assert!(out.poll().unwrap());
        assert_eq!(out.backend().channels, 1);
        assert!(out.backend_mut().pull(512).iter().any(|&x| x != 0));
        assert_eq!(c.time(), time + 512);
    }

    #[cfg(feature = "realtime")]
    #[test]
    fn stream_format_follows_matching_range() {
        use cpal::{SampleFormat, SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

        let range = |ch, lo, hi, f| SupportedStreamConfigRange::new(ch, SampleRate(lo), SampleRate(hi), SupportedBufferSize::Unknown, f);
        let ranges = vec![
            range(2, 44_100, 48_000, SampleFormat::F32),
            range(1, 8_000, 96_000, SampleFormat::I16),
            range(2, 88_200, 96_000, SampleFormat::I16),
        ];
        assert_eq!(choose_format(ranges.clone(), Some(SampleFormat::F32), 1, 48_000).unwrap(), SampleFormat::I16);
        assert_eq!(choose_format(ranges.clone(), Some(SampleFormat::F32), 2, 96_000).unwrap(), SampleFormat::I16);
        assert_eq!(choose_format(ranges.clone(), Some(SampleFormat::I16), 2, 44_100).unwrap(), SampleFormat::F32);
        assert!(matches!(choose_format(ranges, None, 4, 48_000), Err(OutputError::Config(_))));
    }
}
