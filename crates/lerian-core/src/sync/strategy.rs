use serde::{Deserialize, Serialize};

/// How files present on both sides are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStrategy {
    /// Modified iff the source is newer
    Timestamp,
    /// Modified iff the digests differ
    Checksum,
    /// Timestamps first, digests only when the source is newer
    #[default]
    TimestampChecksum,
}

impl ComparisonStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Checksum => "checksum",
            Self::TimestampChecksum => "timestamp_checksum",
        }
    }
}

impl std::fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
