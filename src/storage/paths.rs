//! # Path Sanitizer
//!
//! Turns user-supplied filenames into safe single-component names and checks
//! that paths built from them stay inside their storage root.
//!
//! Two layers, both mandatory for anything derived from user input:
//! 1. [`sanitize`] rejects traversal outright and reduces the rest to `[A-Za-z0-9_.-]`
//! 2. [`resolves_within`] canonicalizes and compares components, catching symlink escapes

use crate::error::{AppError, AppResult};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Reserved device names on Windows; a bare `CON.wav` is not a usable file there.
const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a raw filename into a filesystem-safe token.
///
/// Absolute paths and `..` components are refused (logged as a security event).
/// Plain directory prefixes such as `recordings/talk.wav` are stripped to the
/// last component.
pub fn sanitize(raw_name: &str) -> AppResult<String> {
    if is_traversal_attempt(raw_name) {
        warn!(raw_name = %raw_name, "Rejected path traversal attempt");
        return Err(AppError::InvalidPath(raw_name.to_string()));
    }

    let last_component = raw_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let ascii: String = last_component.chars().filter(char::is_ascii).collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == '_');

    if trimmed.is_empty() {
        warn!(raw_name = %raw_name, "Filename is empty after sanitizing");
        return Err(AppError::InvalidPath(raw_name.to_string()));
    }

    let stem = trimmed.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
    {
        return Ok(format!("_{}", trimmed));
    }

    Ok(trimmed.to_string())
}

fn is_traversal_attempt(raw_name: &str) -> bool {
    if raw_name.starts_with('/') || raw_name.starts_with('\\') {
        return true;
    }

    // C:\ or C:/ style drive prefixes
    let bytes = raw_name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }

    raw_name
        .split(|c: char| c == '/' || c == '\\')
        .any(|component| component.trim() == "..")
}

/// True only if `candidate` canonically resolves to a strict descendant of `base_dir`.
///
/// The candidate may not exist yet (uploads about to be written); in that case its
/// parent is canonicalized and the final component re-attached. Any I/O error while
/// resolving is treated as "not within".
pub fn resolves_within(base_dir: &Path, candidate: &Path) -> bool {
    let Ok(base) = base_dir.canonicalize() else {
        return false;
    };

    let resolved = match candidate.canonicalize() {
        Ok(path) => path,
        Err(_) => match resolve_missing(candidate) {
            Some(path) => path,
            None => return false,
        },
    };

    resolved != base && resolved.starts_with(&base)
}

fn resolve_missing(candidate: &Path) -> Option<PathBuf> {
    let file_name = candidate.file_name()?;
    if matches!(
        Path::new(file_name).components().next(),
        Some(Component::ParentDir | Component::CurDir)
    ) {
        return None;
    }

    let parent = match candidate.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(file_name))
}

/// Join a sanitized name onto `base_dir` and enforce containment.
pub fn contained_path(base_dir: &Path, safe_name: &str) -> AppResult<PathBuf> {
    let candidate = base_dir.join(safe_name);
    if !resolves_within(base_dir, &candidate) {
        warn!(
            base_dir = %base_dir.display(),
            candidate = %candidate.display(),
            "Path escapes its storage root"
        );
        return Err(AppError::InvalidPath(safe_name.to_string()));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize("sample.wav").unwrap(), "sample.wav");
        assert_eq!(sanitize("My Talk 2024.MP3").unwrap(), "My_Talk_2024.MP3");
        assert_eq!(sanitize("recordings/talk.wav").unwrap(), "talk.wav");
        assert_eq!(sanitize("  .hidden.ogg").unwrap(), "hidden.ogg");
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        for raw in [
            "../secret.wav",
            "a/../../etc/passwd.wav",
            "..\\boot.ini",
            "/etc/passwd",
            "\\\\server\\share.wav",
            "C:\\Windows\\win.wav",
            "..",
        ] {
            assert!(
                matches!(sanitize(raw), Err(AppError::InvalidPath(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_sanitize_rejects_empty_results() {
        assert!(sanitize("").is_err());
        assert!(sanitize("___").is_err());
        assert!(sanitize("日本語").is_err());
        assert!(sanitize("dir/").is_err());
    }

    #[test]
    fn test_sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize("a;rm -rf*.wav").unwrap(), "arm_-rf.wav");
        assert_eq!(sanitize("café.mp3").unwrap(), "caf.mp3");
        assert_eq!(sanitize("CON.wav").unwrap(), "_CON.wav");
    }

    #[test]
    fn test_sanitize_prefixes_every_device_name() {
        assert_eq!(sanitize("COM7.wav").unwrap(), "_COM7.wav");
        assert_eq!(sanitize("lpt9.mp3").unwrap(), "_lpt9.mp3");
        assert_eq!(sanitize("Com5.tar.ogg").unwrap(), "_Com5.tar.ogg");
        assert_eq!(sanitize("COM10.wav").unwrap(), "COM10.wav");
    }

    #[test]
    fn test_resolves_within() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("uploads");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("exists.wav"), b"x").unwrap();

        assert!(resolves_within(&base, &base.join("exists.wav")));
        assert!(resolves_within(&base, &base.join("not-yet.wav")));
        assert!(!resolves_within(&base, &base));
        assert!(!resolves_within(&base, &base.join("..").join("escape.wav")));
        assert!(!resolves_within(&base, &root.path().join("sibling.wav")));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_within_rejects_symlink_escape() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("uploads");
        let outside = root.path().join("outside");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("target.wav"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.join("target.wav"), base.join("link.wav")).unwrap();

        assert!(!resolves_within(&base, &base.join("link.wav")));
        assert!(matches!(
            contained_path(&base, "link.wav"),
            Err(AppError::InvalidPath(_))
        ));
    }
}
