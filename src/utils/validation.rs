use anyhow::{Result, anyhow};
use std::path::Path;

/// Maximum length of a staged filename component
const MAX_FILENAME_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Sanitizes an uploaded filename so it can be embedded in a staging path.
/// Returns an error if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    // Windows clients sometimes send the full path
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').to_string();

    let sanitized = if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.trim_matches('_').is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "No file uploaded or filename empty".to_string(),
        }));
    }

    Ok(sanitized)
}

/// Checks the number of data rows in an upload against the configured bounds.
/// A `max` of zero disables the upper bound.
pub fn check_row_bounds(count: usize, min: usize, max: usize) -> Result<()> {
    if count < min {
        return Err(anyhow!(ValidationError {
            code: "TOO_FEW_RECORDS",
            message: format!(
                "CSV must contain at least {} users. Your file has {} user(s).",
                min, count
            ),
        }));
    }

    if max > 0 && count > max {
        return Err(anyhow!(ValidationError {
            code: "TOO_MANY_RECORDS",
            message: format!(
                "CSV must contain at most {} users. Your file has {} user(s).",
                max, count
            ),
        }));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("users.csv").unwrap(), "users.csv");
        assert_eq!(sanitize_filename("my users.csv").unwrap(), "my_users.csv");
        assert_eq!(
            sanitize_filename("list<script>.csv").unwrap(),
            "list_script_.csv"
        );
        assert_eq!(sanitize_filename("Übersicht.csv").unwrap(), "Übersicht.csv");

        // Path traversal
        assert_eq!(sanitize_filename("../../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_filename("C:\\Users\\ops\\batch.csv").unwrap(),
            "batch.csv"
        );

        // Hidden files lose their leading dots
        assert_eq!(sanitize_filename(".hidden.csv").unwrap(), "hidden.csv");

        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("///").is_err());
        assert!(sanitize_filename("***").is_err());
    }

    #[test]
    fn test_sanitize_filename_truncates() {
        let long = format!("{}.csv", "a".repeat(400));
        assert_eq!(sanitize_filename(&long).unwrap().len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_check_row_bounds() {
        assert!(check_row_bounds(30, 30, 100).is_ok());
        assert!(check_row_bounds(100, 30, 100).is_ok());
        assert!(check_row_bounds(5_000, 1, 0).is_ok());

        let err = check_row_bounds(3, 30, 100).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CSV must contain at least 30 users. Your file has 3 user(s)."
        );

        let err = check_row_bounds(101, 30, 100).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CSV must contain at most 100 users. Your file has 101 user(s)."
        );
        assert_eq!(
            err.downcast_ref::<ValidationError>().unwrap().code,
            "TOO_MANY_RECORDS"
        );
    }
}
