use crate::{UploadError, UploadResult};

/// Default chunk size: 5 MiB, also the S3 minimum multipart part size
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Configuration for chunked uploads
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Fixed chunk size handed to every new session
    pub chunk_size: u64,

    /// Absolute max size allowed for a single file (safety guard)
    pub max_file_bytes: u64,

    /// If true: a received chunk must be exactly the size of its planned span
    pub require_exact_chunk_size: bool,

    /// Max transient-object deletions in flight after a merge
    pub cleanup_concurrency: usize,

    /// Prefix for per-chunk staging objects
    pub chunk_prefix: String,

    /// Prefix for assembled objects
    pub final_prefix: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_bytes: 5 * 1024 * 1024 * 1024, // 5GB
            require_exact_chunk_size: true,
            cleanup_concurrency: 4,
            chunk_prefix: "uploads".to_string(),
            final_prefix: "files".to_string(),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set max file size
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Accept chunks whose size differs from the plan (relaxed mode)
    pub fn allow_variable_chunk_sizes(mut self) -> Self {
        self.require_exact_chunk_size = false;
        self
    }

    /// Set cleanup concurrency
    pub fn with_cleanup_concurrency(mut self, max: usize) -> Self {
        self.cleanup_concurrency = max;
        self
    }

    pub fn with_chunk_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.chunk_prefix = prefix.into();
        self
    }

    pub fn with_final_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.final_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> UploadResult<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::validation("chunk_size must be greater than zero"));
        }
        if self.cleanup_concurrency == 0 {
            return Err(UploadError::validation(
                "cleanup_concurrency must be greater than zero",
            ));
        }
        if self.chunk_prefix.is_empty() || self.final_prefix.is_empty() {
            return Err(UploadError::validation("key prefixes must not be empty"));
        }
        if self.chunk_prefix == self.final_prefix {
            return Err(UploadError::validation(
                "chunk_prefix and final_prefix must differ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_s3_minimum_part_size() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 5_242_880);
        assert!(config.require_exact_chunk_size);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = UploadConfig::new()
            .with_chunk_size(1024)
            .with_cleanup_concurrency(1)
            .allow_variable_chunk_sizes();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.cleanup_concurrency, 1);
        assert!(!config.require_exact_chunk_size);
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(UploadConfig::new().with_chunk_size(0).validate().is_err());
        assert!(UploadConfig::new().with_cleanup_concurrency(0).validate().is_err());
        assert!(UploadConfig::new()
            .with_final_prefix("uploads")
            .validate()
            .is_err());
    }
}
