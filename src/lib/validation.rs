//! Input validation utilities with consistent error messages.

use std::path::Path;

use crate::errors::{BurnishError, Result};

/// Validate that a file exists.
///
/// # Arguments
/// * `path` - Path to validate
/// * `description` - Human-readable description of the file (e.g., "Input BAM")
///
/// # Errors
/// Returns an error if the file does not exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(BurnishError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that a SAM tag is exactly two characters.
///
/// # Errors
/// Returns an error if the tag has any other length
pub fn validate_tag(tag: &str, name: &str) -> Result<[u8; 2]> {
    let bytes = tag.as_bytes();
    if bytes.len() != 2 {
        return Err(BurnishError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("SAM tag must be exactly 2 characters, got '{tag}'"),
        });
    }
    Ok([bytes[0], bytes[1]])
}
