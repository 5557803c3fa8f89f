//! Directory helpers used by stat, backup and merge adoption

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size of the regular files directly inside `dir`
pub fn dir_disk_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Copy the regular files of `src` into `dest`, skipping names in `exclude`
///
/// `dest` is created if missing; existing files with the same name are
/// overwritten.
pub fn copy_dir(src: &Path, dest: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if exclude.iter().any(|ex| name.to_str() == Some(*ex)) {
            continue;
        }
        fs::copy(entry.path(), dest.join(&name))?;
    }

    Ok(())
}
