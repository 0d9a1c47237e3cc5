//! # Software Filter Graph
//!
//! CPU implementation of the `scale → palettegen → paletteuse` chain, built
//! from individual stages the same way a filter chain is assembled from
//! registered filters.

use image::{imageops, ImageBuffer, Rgb, RgbImage};

use crate::error::MediaError;
use crate::frame::{Frame, PixelFormat};
use crate::graph::{FilterChainSpec, FilterGraph, GraphFactory, GraphParams, Pull};
use crate::palette;

/// One processing step of a chain
pub trait FilterStage: Send {
    fn name(&self) -> &str;
    fn process_frame(&mut self, frame: Frame) -> Result<Frame, MediaError>;
}

pub struct FilterChain {
    stages: Vec<Box<dyn FilterStage>>,
    spec: FilterChainSpec,
}

impl FilterChain {
    pub fn new(spec: FilterChainSpec) -> Self {
        Self {
            stages: Vec::new(),
            spec,
        }
    }

    /// Standard palette chain for `spec`.
    pub fn palette_chain(spec: FilterChainSpec) -> Self {
        let mut chain = Self::new(spec.clone());
        chain.add_stage(Box::new(ScaleStage::new(spec.scale_width, spec.scale_height)));
        chain.add_stage(Box::new(PaletteStage::new(spec.max_colors as usize)));
        chain
    }

    pub fn add_stage(&mut self, stage: Box<dyn FilterStage>) {
        self.stages.push(stage);
    }

    pub fn process_frame(&mut self, mut frame: Frame) -> Result<Frame, MediaError> {
        for stage in &mut self.stages {
            frame = stage.process_frame(frame)?;
        }
        Ok(frame)
    }

    pub fn spec(&self) -> &FilterChainSpec {
        &self.spec
    }

    #[cfg(test)]
    fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Resize to a fixed size; always emits RGB24 (alpha is dropped).
pub struct ScaleStage {
    width: u32,
    height: u32,
}

impl ScaleStage {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

fn to_rgb(frame: Frame) -> Result<RgbImage, MediaError> {
    if !frame.is_consistent() {
        return Err(MediaError::InvalidFrame(format!(
            "{}x{} {:?} frame with {} bytes",
            frame.width,
            frame.height,
            frame.format,
            frame.data.len()
        )));
    }
    let data = match frame.format {
        PixelFormat::Rgb24 => frame.data,
        PixelFormat::Rgba32 => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Pal8 => {
            return Err(MediaError::Unsupported("scaling indexed frames".into()));
        }
    };
    ImageBuffer::<Rgb<u8>, _>::from_raw(frame.width, frame.height, data)
        .ok_or_else(|| MediaError::InvalidFrame("buffer does not match geometry".into()))
}

impl FilterStage for ScaleStage {
    fn name(&self) -> &str {
        "scale"
    }

    fn process_frame(&mut self, frame: Frame) -> Result<Frame, MediaError> {
        let pts = frame.pts;
        let image = to_rgb(frame)?;
        let scaled = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            imageops::resize(&image, self.width, self.height, imageops::FilterType::CatmullRom)
        };
        Ok(Frame::new(
            self.width,
            self.height,
            PixelFormat::Rgb24,
            scaled.into_raw(),
            pts,
        ))
    }
}

/// Per-frame palette generation followed by palette application.
pub struct PaletteStage {
    max_colors: usize,
}

impl PaletteStage {
    pub fn new(max_colors: usize) -> Self {
        Self { max_colors }
    }
}

impl FilterStage for PaletteStage {
    fn name(&self) -> &str {
        "palette"
    }

    fn process_frame(&mut self, frame: Frame) -> Result<Frame, MediaError> {
        if frame.format != PixelFormat::Rgb24 || !frame.is_consistent() {
            return Err(MediaError::InvalidFrame(format!(
                "palette stage expects RGB24, got {:?}",
                frame.format
            )));
        }
        let palette = palette::median_cut(&frame.data, self.max_colors);
        let indices = palette.apply(&frame.data);
        Ok(Frame::indexed(frame.width, frame.height, indices, palette, frame.pts))
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Strictly 1:1 graph over a `FilterChain`.
pub struct SoftwareGraph {
    chain: FilterChain,
    ready: Option<Frame>,
}

impl SoftwareGraph {
    pub fn new(chain: FilterChain) -> Self {
        Self { chain, ready: None }
    }
}

impl FilterGraph for SoftwareGraph {
    fn push(&mut self, frame: Frame) -> Result<(), MediaError> {
        if self.ready.is_some() {
            return Err(MediaError::Graph("output not pulled before next push".into()));
        }
        self.ready = Some(self.chain.process_frame(frame)?);
        Ok(())
    }

    fn pull(&mut self) -> Result<Pull, MediaError> {
        Ok(self.ready.take().map(Pull::Frame).unwrap_or(Pull::Retry))
    }

    fn name(&self) -> &str {
        "software"
    }
}

/// Factory for `SoftwareGraph`
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareGraphFactory;

impl GraphFactory for SoftwareGraphFactory {
    fn build(&self, params: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        if params.output_format != PixelFormat::Pal8 {
            return Err(MediaError::Unsupported(format!(
                "output format {:?}",
                params.output_format
            )));
        }
        if params.pixel_format == PixelFormat::Pal8 {
            return Err(MediaError::Unsupported("indexed input".into()));
        }
        let chain = FilterChain::palette_chain(params.chain.clone());
        tracing::debug!("Software graph: {}", chain.spec());
        Ok(Box::new(SoftwareGraph::new(chain)))
    }
}
