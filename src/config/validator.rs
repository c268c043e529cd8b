//! Configuration validation
//!
//! Everything here runs at construction time, before any dispatch attempt.

use crate::error::ConfigurationError;
use std::path::{Path, PathBuf};

/// Input and output dimensions must be non-zero
pub fn validate_dimensions(n_input: usize, n_output: usize) -> Result<(), ConfigurationError> {
    if n_input == 0 {
        return Err(ConfigurationError::ZeroDimension { name: "input" });
    }
    if n_output == 0 {
        return Err(ConfigurationError::ZeroDimension { name: "output" });
    }
    Ok(())
}

/// The wrapper must exist; returns its absolute path
pub fn validate_wrapper(wrapper: &Path) -> Result<PathBuf, ConfigurationError> {
    if wrapper.as_os_str().is_empty() {
        return Err(ConfigurationError::MissingWrapper);
    }
    // canonicalize fails on missing files
    wrapper
        .canonicalize()
        .map_err(|_| ConfigurationError::WrapperNotFound(wrapper.to_path_buf()))
}

/// Every staged file must exist
pub fn validate_files_to_send(files: &[PathBuf]) -> Result<(), ConfigurationError> {
    match files.iter().find(|f| !f.exists()) {
        Some(missing) => Err(ConfigurationError::StagedFileNotFound(missing.clone())),
        None => Ok(()),
    }
}

/// `/tmp/` -> `/tmp`
pub fn strip_trailing_separator(path: &Path) -> PathBuf {
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(1, 1).is_ok());
        assert!(matches!(
            validate_dimensions(0, 1),
            Err(ConfigurationError::ZeroDimension { name: "input" })
        ));
        assert!(matches!(
            validate_dimensions(2, 0),
            Err(ConfigurationError::ZeroDimension { name: "output" })
        ));
    }

    #[test]
    fn test_validate_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = dir.path().join("w.py");
        fs::write(&wrapper, "").unwrap();

        let resolved = validate_wrapper(&wrapper).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("w.py"));

        assert!(matches!(
            validate_wrapper(&dir.path().join("nope.py")),
            Err(ConfigurationError::WrapperNotFound(_))
        ));
        assert!(matches!(
            validate_wrapper(Path::new("")),
            Err(ConfigurationError::MissingWrapper)
        ));
    }

    #[test]
    fn test_validate_files_to_send() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("mesh.dat");
        fs::write(&present, "1 2 3").unwrap();
        let absent = dir.path().join("absent.dat");

        assert!(validate_files_to_send(&[]).is_ok());
        assert!(validate_files_to_send(&[present.clone()]).is_ok());
        match validate_files_to_send(&[present, absent.clone()]) {
            Err(ConfigurationError::StagedFileNotFound(p)) => assert_eq!(p, absent),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_strip_trailing_separator() {
        assert_eq!(strip_trailing_separator(Path::new("/tmp/")), PathBuf::from("/tmp"));
        assert_eq!(strip_trailing_separator(Path::new("/tmp")), PathBuf::from("/tmp"));
        assert_eq!(strip_trailing_separator(Path::new("rel/dir/")), PathBuf::from("rel/dir"));
    }
}
