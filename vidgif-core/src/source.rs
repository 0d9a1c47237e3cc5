//! # Frame Sources
//!
//! Decoded frames enter the pipeline through `FrameSource`. Two decoders are
//! provided on top of the `image` crate:
//!
//! - `AnimationSource`: animated GIF and APNG files, timestamps taken from the
//!   per-frame delays on a millisecond timeline.
//! - `ImageSequenceSource`: a directory of still images played at a fixed
//!   frame rate, in file name order.
//!
//! There is no video codec. Video files are rejected up front; extract their
//! frames into a directory first and convert that.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, Frames, ImageDecoder, ImageFormat};

use crate::error::MediaError;
use crate::frame::{Frame, PixelFormat, Rational};

/// What a source produced
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    /// Nothing available right now; ask again
    Again,
    EndOfStream,
}

/// Frame decoder contract
pub trait FrameSource {
    /// Time base of the pts values this source emits
    fn time_base(&self) -> Rational;

    /// Nominal frame size
    fn geometry(&self) -> (u32, u32);

    fn pixel_format(&self) -> PixelFormat;

    fn next_frame(&mut self) -> Result<SourceEvent, MediaError>;
}

// ============================================================================
// In-memory Source
// ============================================================================

/// Frames already in memory. Useful for synthetic streams.
pub struct FrameListSource {
    frames: VecDeque<Frame>,
    time_base: Rational,
    geometry: (u32, u32),
    format: PixelFormat,
}

impl FrameListSource {
    pub fn new(frames: Vec<Frame>, time_base: Rational) -> Self {
        let (geometry, format) = frames
            .first()
            .map(|f| ((f.width, f.height), f.format))
            .unwrap_or(((1, 1), PixelFormat::Rgb24));
        Self {
            frames: frames.into(),
            time_base,
            geometry,
            format,
        }
    }
}

impl FrameSource for FrameListSource {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn geometry(&self) -> (u32, u32) {
        self.geometry
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<SourceEvent, MediaError> {
        Ok(self
            .frames
            .pop_front()
            .map(SourceEvent::Frame)
            .unwrap_or(SourceEvent::EndOfStream))
    }
}

// ============================================================================
// Animated Images
// ============================================================================

/// GIF players treat very short delays as this default (milliseconds).
const DEFAULT_DELAY_MS: f64 = 100.0;
/// Delays below this are replaced by `DEFAULT_DELAY_MS`.
const MIN_DELAY_MS: f64 = 20.0;

pub struct AnimationSource {
    frames: Frames<'static>,
    width: u32,
    height: u32,
    elapsed_ms: f64,
    finished: bool,
}

/// Container extensions that need a video decoder
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mkv", "webm", "mov", "avi", "ts", "flv", "wmv", "mpg", "mpeg"];

fn is_video_container(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
}

impl AnimationSource {
    /// Open an animated GIF or APNG, chosen by file extension.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        if is_video_container(path) {
            return Err(MediaError::Unsupported(format!(
                "{:?} is a video container; extract its frames into a directory and convert that",
                path
            )));
        }
        match ImageFormat::from_path(path)? {
            ImageFormat::Gif => Self::open_gif(path),
            ImageFormat::Png => Self::open_png(path),
            other => Err(MediaError::Unsupported(format!("{other:?} animation"))),
        }
    }

    pub fn open_gif(path: &Path) -> Result<Self, MediaError> {
        let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions();
        Ok(Self::from_frames(decoder.into_frames(), width, height))
    }

    /// APNG, or a plain PNG as a one-frame animation.
    pub fn open_png(path: &Path) -> Result<Self, MediaError> {
        let decoder = PngDecoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions();
        if !decoder.is_apng()? {
            let image = image::open(path)?.to_rgba8();
            let frame = image::Frame::new(image);
            let frames = Frames::new(Box::new(std::iter::once(Ok(frame))));
            return Ok(Self::from_frames(frames, width, height));
        }
        Ok(Self::from_frames(decoder.apng()?.into_frames(), width, height))
    }

    fn from_frames(frames: Frames<'static>, width: u32, height: u32) -> Self {
        Self {
            frames,
            width,
            height,
            elapsed_ms: 0.0,
            finished: false,
        }
    }
}

impl FrameSource for AnimationSource {
    fn time_base(&self) -> Rational {
        Rational::new(1, 1000)
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba32
    }

    fn next_frame(&mut self) -> Result<SourceEvent, MediaError> {
        if self.finished {
            return Ok(SourceEvent::EndOfStream);
        }
        let Some(decoded) = self.frames.next() else {
            self.finished = true;
            return Ok(SourceEvent::EndOfStream);
        };
        let decoded = decoded?;

        let (numer, denom) = decoded.delay().numer_denom_ms();
        let mut delay_ms = numer as f64 / denom.max(1) as f64;
        if delay_ms < MIN_DELAY_MS {
            delay_ms = DEFAULT_DELAY_MS;
        }

        let pts = self.elapsed_ms.round() as i64;
        self.elapsed_ms += delay_ms;

        let buffer = decoded.into_buffer();
        let (width, height) = buffer.dimensions();
        Ok(SourceEvent::Frame(Frame::new(
            width,
            height,
            PixelFormat::Rgba32,
            buffer.into_raw(),
            pts,
        )))
    }
}

// ============================================================================
// Image Sequences
// ============================================================================

pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    time_base: Rational,
    width: u32,
    height: u32,
    index: i64,
}

impl ImageSequenceSource {
    /// Every decodable image in `dir`, sorted by file name, one frame per
    /// tick of `1/fps`.
    pub fn open(dir: &Path, fps: u32) -> Result<Self, MediaError> {
        if fps == 0 {
            return Err(MediaError::Unsupported("image sequence at 0 fps".into()));
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && ImageFormat::from_path(path).is_ok())
            .collect();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| MediaError::InvalidFrame(format!("no images in {:?}", dir)))?;
        let (width, height) = image::image_dimensions(first)?;
        tracing::debug!("Image sequence: {} frames of {}x{} in {:?}", paths.len(), width, height, dir);

        Ok(Self {
            paths: paths.into(),
            time_base: Rational::new(1, fps),
            width,
            height,
            index: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba32
    }

    fn next_frame(&mut self) -> Result<SourceEvent, MediaError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(SourceEvent::EndOfStream);
        };
        let image = image::open(&path)?.to_rgba8();
        let (width, height) = image.dimensions();
        let pts = self.index;
        self.index += 1;
        Ok(SourceEvent::Frame(Frame::new(
            width,
            height,
            PixelFormat::Rgba32,
            image.into_raw(),
            pts,
        )))
    }
}
