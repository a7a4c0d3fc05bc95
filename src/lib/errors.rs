//! Custom error types for burnish operations.

use thiserror::Error;

/// Result type alias for burnish operations
pub type Result<T> = std::result::Result<T, BurnishError>;

/// Error type for burnish operations
#[derive(Error, Debug)]
pub enum BurnishError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// Window overlap incompatible with window length
    #[error(
        "Invalid windowing: overlap ({overlap}) must be smaller than the window length ({window_len})"
    )]
    InvalidWindowing {
        /// Requested window length
        window_len: i64,
        /// Requested overlap
        overlap: i64,
    },

    /// A user-supplied region string could not be resolved
    #[error("Invalid region '{region}': {reason}")]
    InvalidRegion {
        /// The region string as given
        region: String,
        /// Explanation of the problem
        reason: String,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM", "FASTA")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Required reference sequence not found
    #[error("Reference sequence '{ref_name}' not found")]
    ReferenceNotFound {
        /// The reference sequence name
        ref_name: String,
    },

    /// A sample violated one of its structural invariants; indicates a bug
    #[error("Sample invariant violated: {reason}")]
    SampleInvariant {
        /// What went wrong
        reason: String,
    },

    /// A trim interval violated its invariants; indicates a trim-planner bug
    #[error("Trim invariant violated: {reason}")]
    TrimInvariant {
        /// What went wrong
        reason: String,
    },

    /// Inference failed (device error, model error)
    #[error("Inference failed: {reason}")]
    Inference {
        /// What went wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter() {
        let error = BurnishError::InvalidParameter {
            parameter: "window-len".to_string(),
            reason: "must be >= 1".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid parameter 'window-len'"));
        assert!(msg.contains("must be >= 1"));
    }

    #[test]
    fn test_invalid_windowing() {
        let error = BurnishError::InvalidWindowing { window_len: 100, overlap: 100 };
        let msg = format!("{error}");
        assert!(msg.contains("overlap (100)"));
        assert!(msg.contains("window length (100)"));
    }

    #[test]
    fn test_invalid_file_format() {
        let error = BurnishError::InvalidFileFormat {
            file_type: "BAM".to_string(),
            path: "/path/to/file.bam".to_string(),
            reason: "missing index".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid BAM file"));
        assert!(msg.contains("missing index"));
    }

    #[test]
    fn test_reference_not_found() {
        let error = BurnishError::ReferenceNotFound { ref_name: "contig_1".to_string() };
        let msg = format!("{error}");
        assert!(msg.contains("Reference sequence 'contig_1' not found"));
    }
}
