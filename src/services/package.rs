//! In-memory builder for service package archives.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FleetError, Result};

/// Collects named files and writes them into a zip archive.
///
/// ```ignore
/// let archive = PackageBuilder::new()
///     .file("config.toml", "Name = \"greet\"\nVersion = \"1.0\"\n")
///     .file("greet.exe", std::fs::read("target/release/greet")?)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct PackageBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: impl Into<String>, contents: impl AsRef<[u8]>) -> Self {
        self.files.push((name.into(), contents.as_ref().to_vec()));
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o755);

        for (name, contents) in self.files {
            writer.start_file(name, options).map_err(zip_error)?;
            writer.write_all(&contents)?;
        }
        let cursor = writer.finish().map_err(zip_error)?;
        Ok(cursor.into_inner())
    }
}

fn zip_error(e: zip::result::ZipError) -> FleetError {
    FleetError::Io(std::io::Error::other(e.to_string()))
}
