//! chipclock CLI: plays the demo pattern live or renders it to a WAVE file.

mod song;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cfg_if::cfg_if;
use chipclock_engine::prelude::*;

use crate::song::Demo;

#[derive(Debug, Default)]
struct Args {
    list_devices: bool,
    device_name: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    clock_rate: Option<u32>,
    duration_sec: Option<u64>,
    bpm: Option<u32>,
    drum: Option<PathBuf>,
    render: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut a = Args::default();
    for s in std::env::args().skip(1) {
        if s == "--list-devices" { a.list_devices = true; continue; }
        if let Some(rest) = s.strip_prefix("--device=")      { a.device_name  = Some(rest.to_string()); continue; }
        if let Some(rest) = s.strip_prefix("--sample-rate=") { a.sample_rate  = rest.parse().ok();      continue; }
        if let Some(rest) = s.strip_prefix("--channels=")    { a.channels     = rest.parse().ok();      continue; }
        if let Some(rest) = s.strip_prefix("--clock=")       { a.clock_rate   = rest.parse().ok();      continue; }
        if let Some(rest) = s.strip_prefix("--duration=")    { a.duration_sec = rest.parse().ok();      continue; }
        if let Some(rest) = s.strip_prefix("--bpm=")         { a.bpm          = rest.parse().ok();      continue; }
        if let Some(rest) = s.strip_prefix("--drum=")        { a.drum         = Some(rest.into());      continue; }
        if let Some(rest) = s.strip_prefix("--render=")      { a.render       = Some(rest.into());      continue; }
        log::warn!("unknown arg: {s}");
    }
    a
}

fn context_config(args: &Args, sample_rate: u32, channels: u16) -> ContextConfig {
    let defaults = ContextConfig::default();
    ContextConfig {
        sample_rate,
        channels: usize::from(channels),
        clock_rate: args.clock_rate.unwrap_or(defaults.clock_rate),
    }
}

fn load_drum(path: Option<&Path>) -> Result<Option<Sample>, Box<dyn Error>> {
    let Some(path) = path else { return Ok(None) };
    let sample = Sample::from_wave_file(path)?;
    log::info!("drum sample {}: {} frame(s), {} channel(s)", path.display(), sample.len(), sample.channels());
    Ok(Some(sample))
}

/// Render the demo offline into a 16-bit WAVE file.
fn render_to_file(args: &Args, path: &Path) -> Result<(), Box<dyn Error>> {
    let defaults = ContextConfig::default();
    let sample_rate = args.sample_rate.unwrap_or(defaults.sample_rate);
    let channels = args.channels.unwrap_or(defaults.channels as u16);
    let ctx = Context::new(context_config(args, sample_rate, channels))?;
    let demo = Demo::attach(&ctx, args.bpm.unwrap_or(120), load_drum(args.drum.as_deref())?)?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    const BLOCK: usize = 1024;
    let total = u64::from(sample_rate) * args.duration_sec.unwrap_or(8);
    let mut buf = vec![0i16; BLOCK * usize::from(channels)];
    let mut done = 0u64;
    while done < total {
        let frames = (total - done).min(BLOCK as u64) as usize;
        let written = ctx.generate_frames(&mut buf, frames);
        if written == 0 {
            return Err("engine produced no frames".into());
        }
        for &s in &buf[..written * usize::from(channels)] {
            writer.write_sample(s)?;
        }
        done += written as u64;
    }
    writer.finalize()?;

    println!("Rendered {done} frames ({} steps) to {}", demo.steps(), path.display());
    Ok(())
}

cfg_if! {
    if #[cfg(feature = "realtime")] {
        use chipclock_engine::CpalBackend;
        use cpal::traits::{DeviceTrait, HostTrait};

        fn list_output_devices() -> Result<(), Box<dyn Error>> {
            let host = cpal::default_host();
            println!("Available output devices:");
            for dev in host.output_devices()? {
                println!("- {}", dev.name()?);
            }
            Ok(())
        }

        fn pick_device(args: &Args) -> Result<cpal::Device, Box<dyn Error>> {
            let host = cpal::default_host();
            if let Some(name) = &args.device_name {
                for d in host.output_devices()? {
                    if d.name()? == *name { return Ok(d); }
                }
                return Err(format!("requested device not found: {name}").into());
            }
            host.default_output_device()
                .ok_or_else(|| "no default output device".into())
        }

        /// Device-supported rate and channel count closest to the request.
        fn choose_config(
            device: &cpal::Device,
            req_sr: Option<u32>,
            req_ch: Option<u16>,
        ) -> Result<(u32, u16), Box<dyn Error>> {
            let default = device.default_output_config()?;
            if req_sr.is_none() && req_ch.is_none() {
                return Ok((default.sample_rate().0, default.channels()));
            }

            let mut best: Option<(u64, cpal::SupportedStreamConfigRange)> = None;
            for range in device.supported_output_configs()? {
                let ch     = range.channels();
                let sr_min = range.min_sample_rate().0;
                let sr_max = range.max_sample_rate().0;

                let ch_pen = match req_ch { Some(c) => u64::from(ch.abs_diff(c)), None => 0 };
                let sr_pen = match req_sr {
                    Some(sr) => if (sr_min..=sr_max).contains(&sr) { 0 } else { u64::from(sr_min.abs_diff(sr).min(sr_max.abs_diff(sr))) },
                    None => 0,
                };

                let score = sr_pen.saturating_mul(1000) + ch_pen;
                if best.as_ref().map_or(true, |(s, _)| score < *s) {
                    best = Some((score, range));
                }
            }

            let (_, range) = best.ok_or("no supported output configs")?;
            let sr = req_sr
                .unwrap_or(default.sample_rate().0)
                .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            Ok((sr, range.channels()))
        }

        fn play(args: &Args) -> Result<(), Box<dyn Error>> {
            let device = pick_device(args)?;
            let (sample_rate, channels) = choose_config(&device, args.sample_rate, args.channels)?;
            println!("Using device: {}", device.name()?);

            let ctx = Context::new(context_config(args, sample_rate, channels))?;
            let demo = Demo::attach(&ctx, args.bpm.unwrap_or(120), load_drum(args.drum.as_deref())?)?;
            let mut output = AudioOutput::new(ctx.clone(), CpalBackend::with_device(device));
            output.start()?;

            println!("Stream: {sample_rate} Hz, {channels} ch | clock {} ticks/s", ctx.config().clock_rate);
            match args.duration_sec {
                Some(d) => println!("Auto-stop after {d} seconds"),
                None => println!("Press Ctrl+C to stop…"),
            }

            let deadline = args.duration_sec.map(|d| std::time::Instant::now() + Duration::from_secs(d));
            loop {
                std::thread::sleep(Duration::from_millis(250));
                match output.poll() {
                    Ok(true) => log::warn!("output stream reopened after {} steps", demo.steps()),
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("output device lost: {e}");
                        break;
                    }
                }
                if deadline.is_some_and(|t| std::time::Instant::now() >= t) {
                    break;
                }
            }

            output.stop()?;
            demo.detach();
            Ok(())
        }
    } else {
        fn list_output_devices() -> Result<(), Box<dyn Error>> {
            Err("built without the `realtime` feature".into())
        }

        fn play(_: &Args) -> Result<(), Box<dyn Error>> {
            Err("built without the `realtime` feature; use --render=<file.wav>".into())
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    if args.list_devices {
        return list_output_devices();
    }

    println!("chipclock: tick-driven chip synth\n");

    match &args.render {
        Some(path) => render_to_file(&args, path),
        None => play(&args),
    }
}
