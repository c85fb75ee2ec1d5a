//! Decoded PCM for sampled playback.
//!
//! A `Sample` owns interleaved 16-bit frames and their channel count. Decoding
//! raw PCM is done here; WAVE containers are decoded with `hound`.

use std::io::Cursor;
use std::path::Path;

use crate::attr::{AttrKind, AttrValue, Attributes};
use crate::error::{Error, LoadError, Result};

/// Channel limit shared with the context.
pub const MAX_CHANNELS: usize = 8;

/// Layout of headerless PCM input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawFormat {
    /// 8-bit unsigned, 128 = silence
    U8,
    I16Le,
    I16Be,
}

impl RawFormat {
    #[inline]
    pub fn bytes_per_value(self) -> usize {
        match self {
            RawFormat::U8 => 1,
            RawFormat::I16Le | RawFormat::I16Be => 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    frames: Vec<i16>,
    channels: usize,
    sample_rate: Option<u32>,
}

impl Sample {
    /// Copy interleaved frames.
    pub fn from_frames(frames: &[i16], channels: usize) -> std::result::Result<Self, LoadError> {
        let mut s = Self::default();
        s.load_frames(frames, channels)?;
        Ok(s)
    }

    /// Decode headerless PCM.
    pub fn from_raw(bytes: &[u8], channels: usize, format: RawFormat) -> std::result::Result<Self, LoadError> {
        let mut s = Self::default();
        s.load_raw(bytes, channels, format)?;
        Ok(s)
    }

    pub fn from_raw_file(
        path: impl AsRef<Path>,
        channels: usize,
        format: RawFormat,
    ) -> std::result::Result<Self, LoadError> {
        let bytes = std::fs::read(path)?;
        Self::from_raw(&bytes, channels, format)
    }

    /// Decode an in-memory WAVE file.
    pub fn from_wave(bytes: &[u8]) -> std::result::Result<Self, LoadError> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        Self::decode_wave(reader)
    }

    pub fn from_wave_file(path: impl AsRef<Path>) -> std::result::Result<Self, LoadError> {
        let reader = hound::WavReader::open(path)?;
        Self::decode_wave(reader)
    }

    /// Frame count.
    #[inline] pub fn len(&self) -> usize { if self.channels == 0 { 0 } else { self.frames.len() / self.channels } }
    #[inline] pub fn is_empty(&self) -> bool { self.frames.is_empty() }
    #[inline] pub fn channels(&self) -> usize { self.channels }
    #[inline] pub fn sample_rate(&self) -> Option<u32> { self.sample_rate }
    #[inline] pub fn frames(&self) -> &[i16] { &self.frames }

    /// Channel values of frame `index`.
    #[inline]
    pub fn frame(&self, index: usize) -> Option<&[i16]> {
        let start = index.checked_mul(self.channels)?;
        self.frames.get(start..start + self.channels)
    }

    /// Replace the content with interleaved frames.
    pub fn load_frames(&mut self, frames: &[i16], channels: usize) -> std::result::Result<(), LoadError> {
        check_layout(frames.len(), channels)?;
        let buf = alloc(frames.len())?;
        self.install(buf, channels, None, |b| b.extend_from_slice(frames));
        Ok(())
    }

    /// Replace the content with decoded raw PCM.
    pub fn load_raw(&mut self, bytes: &[u8], channels: usize, format: RawFormat) -> std::result::Result<(), LoadError> {
        let width = format.bytes_per_value();
        if bytes.len() % width != 0 {
            return Err(LoadError::Format(format!("{} bytes is not a multiple of {width}", bytes.len())));
        }
        let count = bytes.len() / width;
        check_layout(count, channels)?;
        let buf = alloc(count)?;
        self.install(buf, channels, None, |b| match format {
            RawFormat::U8 => b.extend(bytes.iter().map(|&x| (i16::from(x) - 128) << 8)),
            RawFormat::I16Le => b.extend(bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]))),
            RawFormat::I16Be => b.extend(bytes.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]]))),
        });
        Ok(())
    }

    fn decode_wave<R: std::io::Read>(mut reader: hound::WavReader<R>) -> std::result::Result<Self, LoadError> {
        let spec = reader.spec();
        let channels = usize::from(spec.channels);
        let count = reader.len() as usize;
        check_layout(count, channels)?;
        let mut buf = alloc(count)?;
        match spec.sample_format {
            hound::SampleFormat::Int => {
                let bits = u32::from(spec.bits_per_sample);
                if bits == 0 || bits > 32 {
                    return Err(LoadError::Format(format!("unsupported bit depth {bits}")));
                }
                for s in reader.samples::<i32>() {
                    let s = s?;
                    let v = if bits > 16 { s >> (bits - 16) } else { s << (16 - bits) };
                    buf.push(v as i16);
                }
            }
            hound::SampleFormat::Float => {
                for s in reader.samples::<f32>() {
                    let s = s?;
                    buf.push((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16);
                }
            }
        }
        if buf.len() % channels != 0 {
            return Err(LoadError::Format("truncated frame".into()));
        }
        log::debug!(
            "decoded WAVE: {} frame(s), {channels} ch, {} Hz, {}-bit {:?}",
            buf.len() / channels,
            spec.sample_rate,
            spec.bits_per_sample,
            spec.sample_format
        );
        Ok(Self { frames: buf, channels, sample_rate: Some(spec.sample_rate) })
    }

    fn install(&mut self, mut buf: Vec<i16>, channels: usize, rate: Option<u32>, fill: impl FnOnce(&mut Vec<i16>)) {
        fill(&mut buf);
        self.frames = buf;
        self.channels = channels;
        self.sample_rate = rate;
    }
}

fn check_layout(values: usize, channels: usize) -> std::result::Result<(), LoadError> {
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(LoadError::Format(format!("unsupported channel count {channels}")));
    }
    if values % channels != 0 {
        return Err(LoadError::Format(format!("{values} values do not form whole {channels}-channel frames")));
    }
    Ok(())
}

fn alloc(values: usize) -> std::result::Result<Vec<i16>, LoadError> {
    let mut v = Vec::new();
    v.try_reserve_exact(values).map_err(|_| LoadError::Alloc(values))?;
    Ok(v)
}

impl Attributes for Sample {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        match kind {
            AttrKind::NumFrames => Ok(AttrValue::Int(self.len() as i32)),
            AttrKind::NumChannels => Ok(AttrValue::Int(self.channels as i32)),
            k => Err(Error::UnknownAttribute(k)),
        }
    }

    fn set_attribute(&self, kind: AttrKind, _value: &AttrValue) -> Result<()> {
        match kind {
            AttrKind::NumFrames | AttrKind::NumChannels => Err(Error::ReadOnlyAttribute(kind)),
            k => Err(Error::UnknownAttribute(k)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave_bytes(channels: u16, bits: u16, values: &[i32]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22_050,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &v in values {
                w.write_sample(v).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn raw_formats_decode() {
        let s = Sample::from_raw(&[128, 255, 0, 128], 2, RawFormat::U8).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.frames(), &[0, 127 << 8, -128 << 8, 0]);

        let le = Sample::from_raw(&[0x34, 0x12], 1, RawFormat::I16Le).unwrap();
        let be = Sample::from_raw(&[0x12, 0x34], 1, RawFormat::I16Be).unwrap();
        assert_eq!(le.frames(), be.frames());
        assert_eq!(le.frames(), &[0x1234]);
    }

    #[test]
    fn raw_layout_errors_are_format_errors() {
        assert!(matches!(Sample::from_raw(&[1, 2, 3], 1, RawFormat::I16Le), Err(LoadError::Format(_))));
        assert!(matches!(Sample::from_raw(&[1, 2, 3], 2, RawFormat::U8), Err(LoadError::Format(_))));
        assert!(matches!(Sample::from_frames(&[1], 0), Err(LoadError::Format(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Sample::from_wave_file("/nonexistent/chipclock/sample.wav").unwrap_err();
        assert!(matches!(err, LoadError::Io(_)), "{err:?}");
        let err = Sample::from_raw_file("/nonexistent/chipclock/sample.raw", 1, RawFormat::U8).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn wave_decodes_and_rescales() {
        let bytes = wave_bytes(2, 16, &[100, -100, 200, -200, 300, -300]);
        let s = Sample::from_wave(&bytes).unwrap();
        assert_eq!(s.channels(), 2);
        assert_eq!(s.len(), 3);
        assert_eq!(s.frame(1), Some(&[200, -200][..]));
        assert_eq!(s.sample_rate(), Some(22_050));

        let bytes8 = wave_bytes(1, 8, &[1, -1]);
        let s8 = Sample::from_wave(&bytes8).unwrap();
        assert_eq!(s8.frames(), &[256, -256]);
    }

    #[test]
    fn garbage_wave_is_format_error() {
        assert!(matches!(Sample::from_wave(b"not a wave file at all"), Err(LoadError::Format(_))));
    }

    #[test]
    fn attributes_report_counts() {
        let s = Sample::from_frames(&[0; 12], 3).unwrap();
        assert_eq!(s.get_int(AttrKind::NumFrames).unwrap(), 4);
        assert_eq!(s.get_int(AttrKind::NumChannels).unwrap(), 3);
        assert!(s.set_int(AttrKind::NumFrames, 1).is_err());
    }
}
