//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use crate::domain::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme used to reach the broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TargetScheme {
    #[default]
    Http,
    Https,
}

impl TargetScheme {
    /// Parse a scheme name (case-insensitive).
    ///
    /// # Examples
    /// ```
    /// use pod_broadcaster::domain::value_objects::TargetScheme;
    ///
    /// assert_eq!(TargetScheme::parse("HTTPS").unwrap(), TargetScheme::Https);
    /// assert!(TargetScheme::parse("ftp").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(ConfigError::UnknownScheme(other.to_string())),
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Port implied by the scheme when none is written in a URL.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for TargetScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
