//! Test harness for the Vellum GPU layer.
//!
//! Provides a recording mock backend for driving the layer without a GPU, and a
//! headless renderer with image readback for tests that need real hardware.

pub mod harness;
pub mod mock;

pub use harness::{compare_images, HeadlessRenderer};
pub use mock::{Call, MockDevice, MockSurface, MockWindow};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] vellum_gpu::GpuError),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TestError>;
