//! Files named like `frame_0001.png` or `page_12.pdf`, i.e., a stem with a sequence
//! number after the last underscore.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
#[error("the file '{0}' does not have a sequence number in its name")]
pub struct UnnumberedError(pub PathBuf);

/// The sequence number of a numbered file, e.g., 12 for `page_12.pdf`.
pub fn sequence_number(path: impl AsRef<Path>) -> Option<u64> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    let (_, digits) = stem.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sorts the paths by their sequence numbers, never lexically. Fails on the first path
/// that isn't numbered.
pub fn sort_numbered(
    paths: impl IntoIterator<Item = PathBuf>,
) -> Result<Vec<PathBuf>, UnnumberedError> {
    let mut numbered = paths
        .into_iter()
        .map(|path| match sequence_number(&path) {
            Some(num) => Ok((num, path)),
            None => Err(UnnumberedError(path)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    numbered.sort_by_key(|(num, _)| *num);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}
