//! Renderer runtime: configuration, filesystem layout and the render path.

mod core;
pub mod layout;
mod metrics;
pub mod options;

pub use self::core::Renderer;
pub use layout::FilesystemLayout;
pub use metrics::RenderMetrics;
pub use options::{ConverterOptions, LoggingOptions, PixelforgeOptions, ServerOptions};
