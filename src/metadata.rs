//! Package metadata extraction
//!
//! Reads the control fields of a `.deb` through the package tool and turns
//! them into a [`PackageMetadata`] value.
//!
//! # Rules
//!
//! - The archive must be sniffed as a Debian package before the tool runs
//! - Only `Package` is mandatory; every other field may be missing
//! - `Description` keeps its synopsis line only
//! - `Installed-Size` is KiB in the control file and bytes in the model

use crate::error::ExtractError;
use crate::mime::MimeClassifier;
use crate::tool::PackageTool;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, info};

/// Control fields read from an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum ControlField {
    Package,
    Version,
    Maintainer,
    Description,
    Homepage,
    #[strum(serialize = "Installed-Size")]
    InstalledSize,
}

/// Structured metadata of one package archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub maintainer: String,
    pub description: String,
    pub homepage: Option<String>,
    /// Installed size in bytes
    pub installed_size: Option<u64>,
}

impl PackageMetadata {
    /// Installed size rendered with binary units, e.g. `"1.5 MB"`
    pub fn formatted_installed_size(&self) -> Option<String> {
        self.installed_size.map(|bytes| format_byte_size(bytes as f64))
    }
}

fn field_patterns() -> &'static HashMap<ControlField, Regex> {
    static PATTERNS: OnceLock<HashMap<ControlField, Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ControlField::iter()
            .map(|field| {
                let name: &'static str = field.into();
                let pattern = format!(r"(?m)^[ \t]*{}:[ \t]*(.*)$", regex::escape(name));
                // Field names are fixed identifiers; the pattern always compiles
                let regex = Regex::new(&pattern)
                    .expect("INTERNAL ERROR: control field pattern failed to compile");
                (field, regex)
            })
            .collect()
    })
}

/// Find `field` in `dpkg -I` style output and return its trimmed value.
///
/// Empty values are reported as `None`.
pub fn parse_control_field(output: &str, field: ControlField) -> Option<String> {
    let value = field_patterns()
        .get(&field)?
        .captures(output)?
        .get(1)?
        .as_str()
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Keep only the text before the first line break.
pub fn first_line(text: &str) -> &str {
    text.split(['\n', '\r']).next().unwrap_or_default()
}

/// Convert an `Installed-Size` value (KiB, possibly fractional) to bytes.
pub fn parse_installed_size(raw: &str) -> Option<u64> {
    let kib: f64 = raw.trim().parse().ok()?;
    if !kib.is_finite() || kib < 0.0 {
        return None;
    }
    Some((kib * 1024.0).round() as u64)
}

const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Render a byte count with 1024-based units.
///
/// One decimal place except for plain bytes. Scaling stops at YB even when
/// the value would warrant another step.
pub fn format_byte_size(bytes: f64) -> String {
    let mut size = bytes;
    let mut unit = 0;
    while size.abs() >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{:.0} {}", size, SIZE_UNITS[unit])
    } else {
        format!("{:.1} {}", size, SIZE_UNITS[unit])
    }
}

/// Extracts [`PackageMetadata`] from archives.
#[derive(Clone)]
pub struct PackageMetadataExtractor {
    tool: Arc<dyn PackageTool>,
    classifier: Arc<dyn MimeClassifier>,
}

impl PackageMetadataExtractor {
    pub fn new(tool: Arc<dyn PackageTool>, classifier: Arc<dyn MimeClassifier>) -> Self {
        Self { tool, classifier }
    }

    /// Extract metadata from `archive`.
    ///
    /// # Errors
    ///
    /// - `InvalidArchiveType` if content sniffing rejects the file; the tool
    ///   is not invoked in that case
    /// - `ToolFailure` if inspection fails, times out or exits non-zero
    /// - `MalformedPackage` if the `Package` field is missing or empty
    pub fn extract(&self, archive: &Path) -> Result<PackageMetadata, ExtractError> {
        let detected = self.classifier.classify(archive);
        if detected != crate::mime::DEBIAN_PACKAGE_MIME {
            debug!("Rejecting {} ({})", archive.display(), detected);
            return Err(ExtractError::InvalidArchiveType {
                path: archive.to_path_buf(),
                detected,
            });
        }

        let output = self.tool.inspect(archive)?;
        if !output.success {
            return Err(ExtractError::ToolFailure(format!(
                "inspection exited with code {}: {}",
                output.exit_code.unwrap_or(-1),
                output.stderr.trim()
            )));
        }

        let metadata = parse_metadata(&output.stdout)
            .ok_or_else(|| ExtractError::MalformedPackage(archive.to_path_buf()))?;
        info!(
            "Extracted {} {} from {}",
            metadata.name,
            metadata.version,
            archive.display()
        );
        Ok(metadata)
    }
}

/// Build metadata from inspection output; `None` when there is no package name.
pub fn parse_metadata(output: &str) -> Option<PackageMetadata> {
    let name = parse_control_field(output, ControlField::Package)?;
    let text = |field| parse_control_field(output, field).unwrap_or_default();

    Some(PackageMetadata {
        name,
        version: text(ControlField::Version),
        maintainer: text(ControlField::Maintainer),
        description: first_line(&text(ControlField::Description)).to_string(),
        homepage: parse_control_field(output, ControlField::Homepage),
        installed_size: parse_control_field(output, ControlField::InstalledSize)
            .as_deref()
            .and_then(parse_installed_size),
    })
}
