//! # Frame Sinks
//!
//! Completed frames leave the pipeline through `FrameSink`. `GifSink`
//! encodes indexed frames as an endlessly looping animated GIF on a 1/100
//! second timeline; each frame's delay is the distance to the next frame's
//! pts, so one frame is always held back until its successor arrives.

use std::borrow::Cow;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::MediaError;
use crate::frame::{Frame, PixelFormat, Rational};

/// Frame encoder contract
pub trait FrameSink {
    /// Time base the submitted pts are expected in
    fn time_base(&self) -> Rational;

    fn submit(&mut self, frame: Frame) -> Result<(), MediaError>;

    /// Finalise the output. Called once, after the last `submit`.
    fn flush(&mut self) -> Result<(), MediaError>;
}

// ============================================================================
// GIF Encoder
// ============================================================================

/// GIF timestamps are centiseconds.
pub const GIF_TIME_BASE: Rational = Rational::new(1, 100);

/// Highest frame rate a GIF can express; delays are whole centiseconds.
pub const MAX_GIF_FPS: u32 = 100;

pub struct GifSink<W: Write> {
    encoder: Option<gif::Encoder<W>>,
    output: Option<W>,
    width: u16,
    height: u16,
    /// Delay of the final frame, in centiseconds
    last_delay: u16,
    pending: Option<Frame>,
    frames_written: u64,
}

impl<W: Write> GifSink<W> {
    /// Write the GIF header for a `width`x`height` canvas into `writer`.
    pub fn new(writer: W, width: u32, height: u32, last_delay: i64) -> Result<Self, MediaError> {
        let (width, height) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(MediaError::Unsupported(format!("{width}x{height} GIF canvas")));
            }
        };
        let mut encoder = gif::Encoder::new(writer, width, height, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;

        Ok(Self {
            encoder: Some(encoder),
            output: None,
            width,
            height,
            last_delay: clamp_delay(last_delay),
            pending: None,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write(&mut self, frame: Frame, delay: u16) -> Result<(), MediaError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| MediaError::Unsupported("write after GIF trailer".into()))?;
        let palette = frame
            .palette
            .as_ref()
            .ok_or_else(|| MediaError::InvalidFrame("indexed frame without palette".into()))?;

        let frame_id = frame.id;
        let out = gif::Frame {
            width: frame.width as u16,
            height: frame.height as u16,
            delay,
            palette: Some(palette.to_rgb_bytes()),
            buffer: Cow::Owned(frame.data),
            ..gif::Frame::default()
        };
        encoder.write_frame(&out)?;
        tracing::trace!(frame = frame_id, delay, "GIF frame written");
        self.frames_written += 1;
        Ok(())
    }

    /// Write the held-back frame and the trailer.
    pub fn finish(&mut self) -> Result<(), MediaError> {
        if let Some(last) = self.pending.take() {
            self.write(last, self.last_delay)?;
        }
        if let Some(encoder) = self.encoder.take() {
            self.output = Some(encoder.into_inner()?);
        }
        Ok(())
    }

    /// The underlying writer, once `finish` has run.
    pub fn take_output(&mut self) -> Option<W> {
        self.output.take()
    }
}

fn clamp_delay(ticks: i64) -> u16 {
    ticks.clamp(0, u16::MAX as i64) as u16
}

impl<W: Write> FrameSink for GifSink<W> {
    fn time_base(&self) -> Rational {
        GIF_TIME_BASE
    }

    fn submit(&mut self, frame: Frame) -> Result<(), MediaError> {
        if frame.format != PixelFormat::Pal8 || !frame.is_consistent() {
            return Err(MediaError::InvalidFrame(format!(
                "GIF sink expects indexed frames, got {:?} {}x{}",
                frame.format, frame.width, frame.height
            )));
        }
        if frame.width > self.width as u32 || frame.height > self.height as u32 {
            return Err(MediaError::InvalidFrame(format!(
                "{}x{} frame on a {}x{} canvas",
                frame.width, frame.height, self.width, self.height
            )));
        }

        if let Some(previous) = self.pending.take() {
            let delay = clamp_delay(frame.pts - previous.pts);
            self.write(previous, delay)?;
        }
        self.pending = Some(frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.finish()?;
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        Ok(())
    }
}

// ============================================================================
// GIF File
// ============================================================================

/// GIF written to a temporary file next to `path`, renamed into place on
/// `flush`. Dropping the sink unflushed removes the temporary file.
pub struct GifFileSink {
    inner: GifSink<BufWriter<NamedTempFile>>,
    path: PathBuf,
    persisted: bool,
}

impl GifFileSink {
    pub fn create(path: &Path, width: u32, height: u32, last_delay: i64) -> Result<Self, MediaError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        tracing::debug!("Encoding {:?} via {:?}", path, temp.path());

        Ok(Self {
            inner: GifSink::new(BufWriter::new(temp), width, height, last_delay)?,
            path: path.to_path_buf(),
            persisted: false,
        })
    }
}

impl FrameSink for GifFileSink {
    fn time_base(&self) -> Rational {
        self.inner.time_base()
    }

    fn submit(&mut self, frame: Frame) -> Result<(), MediaError> {
        self.inner.submit(frame)
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        if self.persisted {
            return Err(MediaError::Unsupported(format!("{:?} already written", self.path)));
        }
        self.inner.flush()?;
        let writer = self
            .inner
            .take_output()
            .ok_or_else(|| MediaError::Unsupported("GIF output already taken".into()))?;
        let temp = writer.into_inner().map_err(|e| e.into_error())?;

        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        temp.persist(&self.path).map_err(io::Error::from)?;
        self.persisted = true;
        tracing::debug!("Wrote {:?} ({} frames)", self.path, self.inner.frames_written());
        Ok(())
    }
}
