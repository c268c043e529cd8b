//! Sample files
//!
//! Text samples hold one point per line, values separated by whitespace or
//! commas; blank lines and `#` comments are skipped. Files ending in `.json`
//! hold an array of arrays.

use crate::config::cli::OutputFormat;
use crate::error::SampleError;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Read a sample of `n_input`-dimensional points
pub fn read_sample(path: &Path, n_input: usize) -> Result<Vec<Vec<f64>>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read sample file {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let sample = if is_json {
        serde_json::from_str::<Vec<Vec<f64>>>(&contents)
            .with_context(|| format!("Invalid JSON sample in {}", path.display()))?
    } else {
        parse_text_sample(&contents)?
    };

    check_dimension(&sample, n_input)?;
    Ok(sample)
}

/// Parse a text sample, without dimension checks
pub fn parse_text_sample(contents: &str) -> std::result::Result<Vec<Vec<f64>>, SampleError> {
    let mut sample = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let point = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>().map_err(|_| SampleError::InvalidValue {
                    line: lineno + 1,
                    value: s.to_string(),
                })
            })
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        sample.push(point);
    }
    Ok(sample)
}

/// Every point must have `dimension` values
pub fn check_dimension(sample: &[Vec<f64>], dimension: usize) -> std::result::Result<(), SampleError> {
    match sample.iter().position(|p| p.len() != dimension) {
        Some(index) => Err(SampleError::DimensionMismatch {
            index,
            expected: dimension,
            actual: sample[index].len(),
        }),
        None => Ok(()),
    }
}

/// Render a sample in `format`
pub fn format_sample(sample: &[Vec<f64>], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Csv => {
            let mut out = String::new();
            for point in sample {
                let row: Vec<String> = point.iter().map(|v| v.to_string()).collect();
                out.push_str(&row.join(","));
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(sample)?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Write a sample to `path`, or stdout when `None`
pub fn write_sample(path: Option<&Path>, sample: &[Vec<f64>], format: OutputFormat) -> Result<()> {
    let rendered = format_sample(sample, format)?;
    match path {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Failed to write output sample {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_sample() {
        let text = "# x y\n1 2\n3,4\n\n  5.5 ,-6e1  # last\n";
        let sample = parse_text_sample(text).unwrap();
        assert_eq!(sample, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.5, -60.0]]);
    }

    #[test]
    fn test_parse_invalid_value() {
        let err = parse_text_sample("1 2\n3 x\n").unwrap_err();
        assert_eq!(
            err,
            SampleError::InvalidValue {
                line: 2,
                value: "x".to_string()
            }
        );
    }

    #[test]
    fn test_read_sample_checks_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        fs::write(&path, "1 2\n3\n").unwrap();

        let err = read_sample(&path, 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SampleError>(),
            Some(&SampleError::DimensionMismatch {
                index: 1,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_read_json_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        fs::write(&path, "[[1, 2.5], [3, 4]]").unwrap();
        assert_eq!(read_sample(&path, 2).unwrap(), vec![vec![1.0, 2.5], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_format_sample() {
        let sample = vec![vec![1.0, 2.5], vec![-3.0, 0.0]];
        assert_eq!(format_sample(&sample, OutputFormat::Csv).unwrap(), "1,2.5\n-3,0\n");

        let json = format_sample(&sample, OutputFormat::Json).unwrap();
        let parsed: Vec<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn test_write_sample_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_sample(Some(&path), &[vec![4.0]], OutputFormat::Csv).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "4\n");
    }
}
