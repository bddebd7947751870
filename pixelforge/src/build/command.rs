//! Build tool invocation template.

use std::ffi::OsString;
use std::path::Path;

use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};
use serde::{Deserialize, Serialize};

/// Replaced with the source file path.
pub const SOURCE_PLACEHOLDER: &str = "{source}";
/// Replaced with the path the tool must write the executable to.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// External compiler command.
///
/// Arguments are templates: an argument equal to a placeholder is replaced by
/// the path verbatim, an argument containing one gets it substituted inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self {
            program: "nvcc".into(),
            args: vec![
                "-o".into(),
                OUTPUT_PLACEHOLDER.into(),
                SOURCE_PLACEHOLDER.into(),
                "-lcudart".into(),
            ],
        }
    }
}

impl BuildCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Check that the template can actually produce a build.
    pub fn validate(&self) -> PixelforgeResult<()> {
        if self.program.trim().is_empty() {
            return Err(PixelforgeError::Config("build program is empty".into()));
        }
        for placeholder in [SOURCE_PLACEHOLDER, OUTPUT_PLACEHOLDER] {
            if !self.args.iter().any(|arg| arg.contains(placeholder)) {
                return Err(PixelforgeError::Config(format!(
                    "build arguments never reference {}",
                    placeholder
                )));
            }
        }
        Ok(())
    }

    /// Arguments with both placeholders filled in.
    pub fn render_args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                SOURCE_PLACEHOLDER => source.as_os_str().to_owned(),
                OUTPUT_PLACEHOLDER => output.as_os_str().to_owned(),
                _ => arg
                    .replace(SOURCE_PLACEHOLDER, &source.to_string_lossy())
                    .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy())
                    .into(),
            })
            .collect()
    }

    pub fn command_line(&self, source: &Path, output: &Path) -> String {
        let mut line = self.program.clone();
        for arg in self.render_args(source, output) {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_nvcc() {
        let cmd = BuildCommand::default();
        assert_eq!(
            cmd.command_line(Path::new("src/m.cu"), Path::new("tmp/m")),
            "nvcc -o tmp/m src/m.cu -lcudart"
        );
        cmd.validate().unwrap();
    }

    #[test]
    fn test_inline_substitution() {
        let cmd = BuildCommand::new("cc", ["-o{output}", "{source}"]);
        let args = cmd.render_args(Path::new("a.c"), Path::new("out/a"));
        assert_eq!(args, vec![OsString::from("-oout/a"), OsString::from("a.c")]);
    }

    #[test]
    fn test_validate_requires_both_placeholders() {
        let err = BuildCommand::new("cc", ["{source}"]).validate().unwrap_err();
        assert!(err.to_string().contains(OUTPUT_PLACEHOLDER));

        let err = BuildCommand::new(" ", ["{source}", "{output}"])
            .validate()
            .unwrap_err();
        assert!(matches!(err, PixelforgeError::Config(_)));
    }
}
