//! Filter graph contract used by the workers.
//!
//! A graph is built once per worker, before the worker thread starts, and is
//! only ever touched by that thread afterwards.

use std::fmt;

use crate::error::MediaError;
use crate::frame::{Frame, PixelFormat, Rational};

/// Result of pulling from a graph
#[derive(Debug)]
pub enum Pull {
    /// A filtered frame, pts still on the input timeline
    Frame(Frame),
    /// The graph buffered its input and has nothing to emit yet
    Retry,
}

/// Filter graph instance - one per worker
///
/// Graphs are never flushed: whatever a graph still buffers when its worker
/// is closed at end of stream is dropped with it, and shows up in
/// `JobReport::frames_unreturned`.
pub trait FilterGraph: Send {
    /// Feed one input frame.
    fn push(&mut self, frame: Frame) -> Result<(), MediaError>;

    /// Fetch the next output frame.
    fn pull(&mut self) -> Result<Pull, MediaError>;

    /// Name for logging
    fn name(&self) -> &str {
        "graph"
    }
}

/// Filter chain description
///
/// `scale -> split -> palettegen / paletteuse`: scale to the target size, build
/// a palette of at most `max_colors` from the frame itself, then map the frame
/// onto that palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChainSpec {
    pub scale_width: u32,
    pub scale_height: u32,
    pub max_colors: u16,
}

impl FilterChainSpec {
    /// Chain for a `width`x`height` input scaled by `scale`, keeping the
    /// aspect ratio (the `scale=W:-1` rule).
    pub fn for_input(width: u32, height: u32, scale: f32, max_colors: usize) -> Self {
        let scale_width = ((scale as f64 * width as f64).round() as u32).max(1);
        let scale_height = if width == 0 {
            1
        } else {
            ((scale_width as f64 * height as f64 / width as f64).round() as u32).max(1)
        };
        Self {
            scale_width,
            scale_height,
            max_colors: max_colors.clamp(1, 256) as u16,
        }
    }

    /// Stage names, in order
    pub fn display_chain(&self) -> String {
        ["scale", "palettegen", "paletteuse"].join(" → ")
    }
}

impl fmt::Display for FilterChainSpec {
    /// The equivalent libavfilter description
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[in]scale={}:{},split[s1][s2];[s1]palettegen=max_colors={}:stats_mode=single[pal];[s2][pal]paletteuse[out]",
            self.scale_width, self.scale_height, self.max_colors
        )
    }
}

/// Everything a graph needs to configure itself
#[derive(Debug, Clone)]
pub struct GraphParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
    pub chain: FilterChainSpec,
    pub output_format: PixelFormat,
}

/// Builds one graph per worker
pub trait GraphFactory {
    fn build(&self, params: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError>;
}

impl<F> GraphFactory for F
where
    F: Fn(&GraphParams) -> Result<Box<dyn FilterGraph>, MediaError>,
{
    fn build(&self, params: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        self(params)
    }
}
