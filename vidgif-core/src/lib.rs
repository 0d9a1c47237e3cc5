//! # vidgif Core
//!
//! Animated GIF conversion around a parallel filter pipeline: a fixed pool of
//! filter workers fed round-robin by one scheduler thread, with frame-rate
//! decimation and speed changes applied on the way through.

// ============================================================================
// Core Types
// ============================================================================
pub mod error;
pub mod frame;
pub mod palette;
pub mod timeline;

// ============================================================================
// Filtering
// ============================================================================
pub mod graph;
pub mod filter;
pub mod worker;

// ============================================================================
// Pipeline
// ============================================================================
pub mod scheduler;
pub mod source;
pub mod sink;

// ============================================================================
// Conversion
// ============================================================================
pub mod config;
pub mod convert;
pub mod paths;

pub use config::ConvertConfig;
pub use convert::{convert_file, open_source, ConvertOptions};
pub use error::{ConfigError, ConvertError, MediaError};
pub use frame::{Frame, PixelFormat, Rational};
pub use graph::{FilterChainSpec, FilterGraph, GraphFactory, GraphParams, Pull};
pub use scheduler::{run, Completion, JobReport, Pipeline};
pub use sink::{FrameSink, GifFileSink, GifSink};
pub use source::{FrameSource, SourceEvent};
pub use timeline::Timeline;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
