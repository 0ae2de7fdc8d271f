//! Zip packaging of a crawl's working directory

use crate::error::Result;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip every file under `src_dir` into `dest`, paths relative to `src_dir`.
///
/// Writes to a temporary sibling first and renames it into place, so a
/// concurrent or repeated run for the same task never leaves a truncated
/// archive behind.
pub fn zip_dir(src_dir: &Path, dest: &Path) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial = dest.with_extension(format!("zip.{:08x}.partial", rand::random::<u32>()));
    let file = File::create(&partial)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = Vec::new();
    collect_files(src_dir, &mut files)?;
    files.sort();

    let mut buffer = Vec::new();
    for path in &files {
        let relative = path
            .strip_prefix(src_dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(relative, options)?;
        buffer.clear();
        File::open(path)?.read_to_end(&mut buffer)?;
        writer.write_all(&buffer)?;
    }

    writer.finish()?;
    std::fs::rename(&partial, dest)?;
    debug!("Archived {} files into {}", files.len(), dest.display());

    Ok(dest.to_path_buf())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
