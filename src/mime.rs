//! Content-based archive classification
//!
//! A `.deb` is an `ar` archive whose first member is `debian-binary`.
//! File extensions are never consulted.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// MIME type of a Debian binary package
pub const DEBIAN_PACKAGE_MIME: &str = "application/vnd.debian.binary-package";

const AR_MAGIC: &[u8] = b"!<arch>\n";
const DEBIAN_BINARY_MEMBER: &[u8] = b"debian-binary";
const AR_NAME_LEN: usize = 16;

/// Maps a file path to a MIME type string by inspecting its content.
pub trait MimeClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> String;

    /// Whether `path` is a Debian binary package.
    fn is_debian_package(&self, path: &Path) -> bool {
        self.classify(path) == DEBIAN_PACKAGE_MIME
    }
}

/// Magic-byte sniffer for the handful of types the installer cares about.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicClassifier;

impl MimeClassifier for MagicClassifier {
    fn classify(&self, path: &Path) -> String {
        if path.is_dir() {
            return "inode/directory".to_string();
        }

        let mut header = [0u8; 24];
        let n = match File::open(path).and_then(|mut f| read_up_to(&mut f, &mut header)) {
            Ok(n) => n,
            Err(e) => {
                debug!("Cannot sniff {}: {}", path.display(), e);
                return "application/octet-stream".to_string();
            }
        };

        classify_header(&header[..n]).to_string()
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn classify_header(header: &[u8]) -> &'static str {
    if header.is_empty() {
        return "application/x-zerosize";
    }
    if header.starts_with(AR_MAGIC) {
        // ar member header: 16-byte name field right after the global magic
        let member = &header[AR_MAGIC.len()..];
        if member.len() >= AR_NAME_LEN && is_debian_binary_name(&member[..AR_NAME_LEN]) {
            return DEBIAN_PACKAGE_MIME;
        }
        return "application/x-archive";
    }
    "application/octet-stream"
}

/// `debian-binary`, optionally GNU-terminated with `/`, space padded.
fn is_debian_binary_name(field: &[u8]) -> bool {
    let Some(rest) = field.strip_prefix(DEBIAN_BINARY_MEMBER) else {
        return false;
    };
    let rest = rest.strip_prefix(b"/").unwrap_or(rest);
    rest.iter().all(|&b| b == b' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(bytes).expect("write");
        file
    }

    #[test]
    fn test_debian_package_detected_by_content() {
        let file = file_with(b"!<arch>\ndebian-binary   1342943816  0     0     100644  4         `\n2.0\n");
        assert_eq!(MagicClassifier.classify(file.path()), DEBIAN_PACKAGE_MIME);
        assert!(MagicClassifier.is_debian_package(file.path()));
    }

    #[test]
    fn test_member_name_must_match_exactly() {
        let gnu = file_with(b"!<arch>\ndebian-binary/  1342943816  0     0     100644  4         `\n2.0\n");
        assert!(MagicClassifier.is_debian_package(gnu.path()));

        let longer = file_with(b"!<arch>\ndebian-binaryX  1342943816  0     0     100644  4         `\n2.0\n");
        assert_eq!(MagicClassifier.classify(longer.path()), "application/x-archive");

        let truncated = file_with(b"!<arch>\ndebian-binary");
        assert_eq!(MagicClassifier.classify(truncated.path()), "application/x-archive");
    }

    #[test]
    fn test_plain_ar_archive_is_not_a_package() {
        let file = file_with(b"!<arch>\nlibfoo.o/       0           0     0     644     8         `\n");
        assert_eq!(MagicClassifier.classify(file.path()), "application/x-archive");
    }

    #[test]
    fn test_extension_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake.deb");
        std::fs::write(&path, b"#!/bin/sh\necho not a package\n").expect("write");
        assert!(!MagicClassifier.is_debian_package(&path));
    }

    #[test]
    fn test_missing_and_empty_files() {
        assert_eq!(
            MagicClassifier.classify(Path::new("/nonexistent/file.deb")),
            "application/octet-stream"
        );
        let empty = file_with(b"");
        assert_eq!(MagicClassifier.classify(empty.path()), "application/x-zerosize");
    }

    #[test]
    fn test_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(MagicClassifier.classify(dir.path()), "inode/directory");
    }
}
