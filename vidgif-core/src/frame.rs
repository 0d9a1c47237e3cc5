//! # Frames
//!
//! Move-only frame handle passed between the scheduler, the filter workers
//! and the sink. `Frame` deliberately does not implement `Clone`: a frame has
//! exactly one owner at a time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::palette::Palette;

// ============================================================================
// Time Base
// ============================================================================

/// Tick duration of a timeline, `num/den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Ticks per second.
    pub fn ticks_per_second(&self) -> f64 {
        self.den as f64 / self.num as f64
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Frame Data
// ============================================================================

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA
    Rgba32,
    /// One palette index per pixel
    Pal8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
            Self::Pal8 => 1,
        }
    }

    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// A video frame
#[derive(Debug)]
pub struct Frame {
    /// Process-unique id for tracing
    pub id: u64,
    /// Pixel data, layout given by `format`
    pub data: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Colour table for `Pal8` frames
    pub palette: Option<Palette>,
    /// Presentation timestamp in ticks of the owning stream's time base
    pub pts: i64,
}

impl Frame {
    /// Wrap an existing pixel buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>, pts: i64) -> Self {
        static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: FRAME_COUNTER.fetch_add(1, Ordering::Relaxed),
            data,
            format,
            width,
            height,
            palette: None,
            pts,
        }
    }

    /// Solid-colour RGB frame. Handy for synthetic sources.
    pub fn filled_rgb(width: u32, height: u32, rgb: [u8; 3], pts: i64) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(PixelFormat::Rgb24.buffer_size(width, height))
            .collect();
        Self::new(width, height, PixelFormat::Rgb24, data, pts)
    }

    /// Indexed frame with its palette.
    pub fn indexed(width: u32, height: u32, indices: Vec<u8>, palette: Palette, pts: i64) -> Self {
        let mut frame = Self::new(width, height, PixelFormat::Pal8, indices, pts);
        frame.palette = Some(palette);
        frame
    }

    /// Check the buffer length against geometry and format.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
            && (self.format != PixelFormat::Pal8 || self.palette.is_some())
    }
}
