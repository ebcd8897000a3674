//! Image transformation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TransformPipeline                           │
//! │   pre-crop → target size → crop mode → filters → finalise       │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  geometry   │  │   filters   │  │      ImageEngine        │  │
//! │  │ (pure math) │  │ (id / name  │  │  (RasterEngine on the   │  │
//! │  │             │  │  → FilterOp)│  │   `image` crate)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pipeline is CPU-bound and synchronous; the service runs it on the
//! blocking thread pool.

pub mod engine;
pub mod filters;
pub mod geometry;
pub mod pipeline;
pub mod raster;

pub use engine::{EncodeSettings, ImageArtifact, ImageEngine, OutputFormat};
pub use filters::{resolve_chain, resolve_filter, FilterOp};
pub use pipeline::{RenderedImage, TransformPipeline};
pub use raster::RasterEngine;
