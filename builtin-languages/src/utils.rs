//! Small helpers shared by the language provider modules.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

/// A provider's on-disk configuration, loaded from a YAML file at startup.
/// Mirrors the teacher's per-language config structs (testlib include/lib
/// directories, interpreter search paths).
pub trait Config: DeserializeOwned {
    /// Load this configuration from the YAML file at `path`. Missing files
    /// fall back to `Default` so a provider can still register (with
    /// whatever defaults it defines) in environments that do not customize
    /// it.
    fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>>
        where Self: Default {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Derive the path of a compiled artifact from its source file, placing it
/// under `output_dir` when given, and next to the source file otherwise.
pub fn make_output_file_path(source: &Path, output_dir: Option<&Path>) -> PathBuf {
    let file_name = source.file_stem().unwrap_or_default();
    match output_dir {
        Some(dir) => dir.join(file_name),
        None => source.with_file_name(file_name),
    }
}
