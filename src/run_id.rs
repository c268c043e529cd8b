//! Run identity
//!
//! Every `evaluate` call gets a basename of the form
//! `<wrapper stem>_<YYYY-MM-DD_HH-MM-SS>_<6 chars of [0-9A-Z]>`, used to
//! namespace the run's working directories. The random suffix makes clashes
//! between runs started in the same second unlikely (36^6 combinations), not
//! impossible.

use rand::Rng;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 6;

const SUFFIX_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Identifier of one dispatch run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    basename: String,
}

impl RunIdentity {
    /// Generate a fresh identity for a run of `wrapper_path`
    pub fn generate(wrapper_path: &Path) -> Self {
        let stem = wrapper_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");

        let basename = format!("{}_{}_{}", stem, timestamp, random_suffix());
        info!("workdir basename: {}", basename);

        Self { basename }
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// The random suffix part of the basename
    pub fn suffix(&self) -> &str {
        &self.basename[self.basename.len() - SUFFIX_LEN..]
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.basename)
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_layout() {
        let id = RunIdentity::generate(Path::new("/some/dir/model_wrapper.py"));
        let basename = id.basename();

        assert!(basename.starts_with("model_wrapper_"));
        // stem + '_' + 19 chars timestamp + '_' + suffix
        assert_eq!(basename.len(), "model_wrapper".len() + 1 + 19 + 1 + SUFFIX_LEN);

        let timestamp = &basename["model_wrapper_".len().."model_wrapper_".len() + 19];
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d_%H-%M-%S").is_ok());
    }

    #[test]
    fn test_suffix_alphabet() {
        let id = RunIdentity::generate(Path::new("wrapper.sh"));
        let suffix = id.suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_back_to_back_identities_differ() {
        let path = Path::new("wrapper.sh");
        let a = RunIdentity::generate(path);
        let b = RunIdentity::generate(path);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrapper_without_extension() {
        let id = RunIdentity::generate(Path::new("/opt/bin/solver"));
        assert!(id.to_string().starts_with("solver_"));
    }
}
