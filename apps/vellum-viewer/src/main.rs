//! Vellum demo viewer
//!
//! Opens a window and runs the swapchain frame pipeline, clearing every frame to a
//! slowly cycling color.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vellum-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--width <N>`: Initial window width (default: 1280)
//! - `--height <N>`: Initial window height (default: 720)
//! - `--no-vsync`: Prefer mailbox or immediate presentation
//! - `--frames-in-flight <N>`: Frame slots (default: 2)
//! - `--frames <N>`: Exit after N presented frames
//! - `--validation`: Enable Vulkan validation layers
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::event_loop::{ControlFlow, EventLoop};

use crate::app::{Viewer, ViewerConfig};

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ViewerConfig::parse(std::env::args().skip(1));
    info!("Vellum viewer starting: {config:?}");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut viewer = Viewer::new(config);
    if let Err(e) = event_loop.run_app(&mut viewer) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

fn print_help() {
    eprintln!(
        "Vellum demo viewer

USAGE:
    cargo run -p vellum-viewer -- [OPTIONS]

OPTIONS:
    --width <N>             Initial window width (default: 1280)
    --height <N>            Initial window height (default: 720)
    --no-vsync              Prefer mailbox or immediate presentation
    --frames-in-flight <N>  Frame slots, 1-3 (default: 2)
    --frames <N>            Exit after N presented frames
    --validation            Enable Vulkan validation layers
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
