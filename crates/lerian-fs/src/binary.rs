//! Text/binary classification from a leading byte sample

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::{Error, Result};

/// Whether `sample` looks like binary content.
///
/// Any NUL byte makes it binary. Otherwise the share of suspicious bytes
/// (C0 controls other than TAB/LF/CR, DEL, and everything at or above 0x80)
/// must exceed `threshold`. An empty sample is text.
pub fn classify_sample(sample: &[u8], threshold: f64) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let suspicious = sample
        .iter()
        .filter(|&&b| (b < 32 && !matches!(b, b'\t' | b'\n' | b'\r')) || b >= 127)
        .count();
    (suspicious as f64 / sample.len() as f64) > threshold
}

/// Read up to `sample_size` leading bytes of `path` and classify them.
pub async fn is_binary(path: &Path, sample_size: usize, threshold: f64) -> Result<bool> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let mut sample = Vec::with_capacity(sample_size);
    file.take(sample_size as u64)
        .read_to_end(&mut sample)
        .await
        .map_err(|e| Error::io(path, e))?;
    Ok(classify_sample(&sample, threshold))
}
