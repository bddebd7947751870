//! Configuration options for the renderer, server and logging.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::header::HeaderValue;
use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};
use serde::{Deserialize, Serialize};

use crate::build::BuildCommand;
use crate::pipeline::{DEFAULT_MAX_DIAGNOSTIC_BYTES, RunOptions};

/// Top-level options.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelforgeOptions {
    /// Directory holding the built executable. Created on demand.
    pub work_dir: PathBuf,
    /// Source file the generator is built from. Read-only.
    pub source: PathBuf,
    /// File name of the built generator inside `work_dir`.
    pub executable_name: String,
    pub build: BuildCommand,
    pub build_timeout_secs: Option<u64>,
    pub converter: ConverterOptions,
    /// Per-request pipeline deadline. `None` waits forever.
    pub run_timeout_secs: Option<u64>,
    /// Diagnostic output retained per stage for error logs.
    pub max_diagnostic_bytes: usize,
    pub server: ServerOptions,
    pub logging: LoggingOptions,
}

impl Default for PixelforgeOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./tmp"),
            source: PathBuf::from("./src/lib/server/cuda/mandelbrot.cu"),
            executable_name: "mandelbrot".into(),
            build: BuildCommand::default(),
            build_timeout_secs: Some(300),
            converter: ConverterOptions::default(),
            run_timeout_secs: Some(60),
            max_diagnostic_bytes: DEFAULT_MAX_DIAGNOSTIC_BYTES,
            server: ServerOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl PixelforgeOptions {
    /// Load options from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> PixelforgeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PixelforgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            PixelforgeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> PixelforgeResult<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(PixelforgeError::Config("work_dir is empty".into()));
        }
        if self.source.as_os_str().is_empty() {
            return Err(PixelforgeError::Config("source is empty".into()));
        }
        if self.executable_name.is_empty()
            || self.executable_name.contains(std::path::MAIN_SEPARATOR)
        {
            return Err(PixelforgeError::Config(format!(
                "executable_name must be a plain file name, got '{}'",
                self.executable_name
            )));
        }
        if self.converter.program.trim().is_empty() {
            return Err(PixelforgeError::Config("converter program is empty".into()));
        }
        if self.run_timeout_secs == Some(0) || self.build_timeout_secs == Some(0) {
            return Err(PixelforgeError::Config(
                "timeouts must be positive; omit them to disable".into(),
            ));
        }
        if !self.server.route.starts_with('/') {
            return Err(PixelforgeError::Config(format!(
                "route must start with '/', got '{}'",
                self.server.route
            )));
        }
        HeaderValue::from_str(&self.server.content_type).map_err(|_| {
            PixelforgeError::Config(format!(
                "content_type is not a valid header value: '{}'",
                self.server.content_type
            ))
        })?;
        self.build.validate()
    }

    pub fn executable_path(&self) -> PathBuf {
        self.work_dir.join(&self.executable_name)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            deadline: self.run_timeout_secs.map(Duration::from_secs),
            max_diagnostic_bytes: self.max_diagnostic_bytes,
        }
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }
}

/// Second pipeline stage: reads the generator's output, writes the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterOptions {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            program: "convert".into(),
            // Read PPM from stdin, write PNG to stdout
            args: vec!["ppm:-".into(), "png:-".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    pub route: String,
    pub content_type: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5173)),
            route: "/api/mandelbrot.png".into(),
            content_type: "image/png".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write logs to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            log_dir: None,
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = PixelforgeOptions::default();
        options.validate().unwrap();
        assert_eq!(options.executable_path(), PathBuf::from("./tmp/mandelbrot"));
        assert_eq!(options.run_options().deadline, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options: PixelforgeOptions = serde_json::from_str(
            r#"{
                "work_dir": "/var/cache/pixelforge",
                "run_timeout_secs": null,
                "converter": { "program": "magick" },
                "server": { "listen": "0.0.0.0:8080" }
            }"#,
        )
        .unwrap();

        assert_eq!(options.work_dir, PathBuf::from("/var/cache/pixelforge"));
        assert_eq!(options.run_options().deadline, None);
        assert_eq!(options.converter.program, "magick");
        assert_eq!(options.converter.args, vec!["ppm:-", "png:-"]);
        assert_eq!(options.server.listen.port(), 8080);
        assert_eq!(options.server.route, "/api/mandelbrot.png");
        assert_eq!(options.executable_name, "mandelbrot");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut options = PixelforgeOptions::default();
        options.executable_name = "bin/mandelbrot".into();
        assert!(options.validate().is_err());

        let mut options = PixelforgeOptions::default();
        options.run_timeout_secs = Some(0);
        assert!(options.validate().is_err());

        let mut options = PixelforgeOptions::default();
        options.server.route = "api".into();
        assert!(options.validate().is_err());

        let mut options = PixelforgeOptions::default();
        options.server.content_type = "image/png\n".into();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixelforge.json");
        std::fs::write(&path, r#"{ "executable_name": "fractal" }"#).unwrap();

        let options = PixelforgeOptions::from_json_file(&path).unwrap();
        assert_eq!(options.executable_name, "fractal");

        let err = PixelforgeOptions::from_json_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, PixelforgeError::Config(_)));
    }
}
