//! Types shared between the pixelforge library, server and tests.

pub mod errors;

pub use errors::{ExitInfo, PixelforgeError, PixelforgeResult};
