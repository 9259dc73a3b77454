//! Error types for the vg-core crate.

/// Errors that can occur during configuration validation.
///
/// # Examples
///
/// ```
/// use vg_core::ConfigError;
///
/// let error = ConfigError::InvalidOption {
///     option: "VIGIA_INTERVAL".to_owned(),
///     reason: "must be a positive integer".to_owned(),
/// };
/// assert!(error.to_string().contains("VIGIA_INTERVAL"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_option_display() {
        let error = ConfigError::InvalidOption {
            option: "interval".to_owned(),
            reason: "must be a positive integer".to_owned(),
        };
        let msg = error.to_string();
        assert!(msg.contains("interval"));
        assert!(msg.contains("positive integer"));
    }
}
