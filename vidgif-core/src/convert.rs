//! # File Conversion
//!
//! Wires a decoded input file, the software filter graph and a GIF file sink
//! into one pipeline job.

use std::path::Path;

use crate::config::ConvertConfig;
use crate::error::ConvertError;
use crate::filter::SoftwareGraphFactory;
use crate::scheduler::{graph_params, JobReport, Pipeline};
use crate::sink::{FrameSink, GifFileSink, GIF_TIME_BASE, MAX_GIF_FPS};
use crate::source::{AnimationSource, FrameSource, ImageSequenceSource};
use crate::timeline::Timeline;

/// Input handling not covered by `ConvertConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Frame rate of image-sequence directories
    pub input_fps: u32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self { input_fps: 25 }
    }
}

/// Decoder for `path`: a directory is an image sequence, anything else an
/// animated image.
pub fn open_source(path: &Path, options: &ConvertOptions) -> Result<Box<dyn FrameSource>, ConvertError> {
    let opened: Result<Box<dyn FrameSource>, _> = if path.is_dir() {
        ImageSequenceSource::open(path, options.input_fps).map(|s| Box::new(s) as Box<dyn FrameSource>)
    } else {
        AnimationSource::open(path).map(|s| Box::new(s) as Box<dyn FrameSource>)
    };
    opened.map_err(|source| ConvertError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert `src` into an animated GIF at `dst`.
///
/// `dst` only appears once the whole job has succeeded.
pub fn convert_file(
    src: &Path,
    dst: &Path,
    config: &ConvertConfig,
    options: &ConvertOptions,
) -> Result<JobReport, ConvertError> {
    config.validate()?;
    if config.fps > MAX_GIF_FPS {
        return Err(ConvertError::Config(format!(
            "GIF output supports at most {MAX_GIF_FPS} fps, got {}",
            config.fps
        )));
    }

    let mut source = open_source(src, options)?;
    let params = graph_params(source.as_ref(), config);
    let timeline = Timeline::new(source.time_base(), GIF_TIME_BASE, config.speed, config.fps)?;

    let mut sink = GifFileSink::create(
        dst,
        params.chain.scale_width,
        params.chain.scale_height,
        timeline.frame_delay(),
    )
    .map_err(ConvertError::Encode)?;
    debug_assert_eq!(sink.time_base(), GIF_TIME_BASE);

    tracing::info!(
        "Converting {:?} -> {:?} ({}x{} -> {}x{}, {} colors, x{} speed, {} fps)",
        src,
        dst,
        params.width,
        params.height,
        params.chain.scale_width,
        params.chain.scale_height,
        params.chain.max_colors,
        config.speed,
        config.fps
    );

    let pipeline = Pipeline::new(config, timeline, &SoftwareGraphFactory, &params)?;
    pipeline.run(source.as_mut(), &mut sink)
}
