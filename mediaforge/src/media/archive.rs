//! Bundling of numbered image sequences into a single archive.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::{Error, Result};

/// Zip every regular file in `frames_dir` into `archive_path`, in name order.
///
/// Returns the number of frames written. An empty directory is an error since
/// the engine is expected to have produced at least one frame.
pub async fn bundle_frames(frames_dir: &Path, archive_path: &Path) -> Result<usize> {
    let frames_dir = frames_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || write_archive(&frames_dir, &archive_path))
        .await
        .map_err(|e| Error::Other(format!("archive task failed: {e}")))?
}

fn collect_frames(frames_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(frames_dir)
        .map_err(|e| Error::io_path("listing frames", frames_dir, e))?;

    let mut frames = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io_path("listing frames", frames_dir, e))?;
        let path = entry.path();
        if path.is_file() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn write_archive(frames_dir: &Path, archive_path: &Path) -> Result<usize> {
    let frames = collect_frames(frames_dir)?;
    if frames.is_empty() {
        return Err(Error::Other("engine produced no frames".to_string()));
    }

    let file = File::create(archive_path)
        .map_err(|e| Error::io_path("creating archive", archive_path, e))?;
    let mut zip = ZipWriter::new(file);

    // jpg/png payloads are already compressed.
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut buffer = Vec::new();
    for frame in &frames {
        let name = frame
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Other("frame file name is not UTF-8".to_string()))?;

        buffer.clear();
        File::open(frame)
            .and_then(|mut f| f.read_to_end(&mut buffer))
            .map_err(|e| Error::io_path("reading frame", frame, e))?;

        zip.start_file(name, options)
            .map_err(|e| Error::Other(format!("failed to start archive entry: {e}")))?;
        zip.write_all(&buffer)
            .map_err(|e| Error::io_path("writing archive", archive_path, e))?;
    }

    zip.finish()
        .map_err(|e| Error::Other(format!("failed to finalize archive: {e}")))?;

    debug!(frames = frames.len(), "frame archive written");
    Ok(frames.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bundles_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir(&frames).unwrap();
        for i in [3, 1, 2] {
            std::fs::write(frames.join(format!("frame_{i:05}.jpg")), [i as u8; 16]).unwrap();
        }

        let archive = dir.path().join("out.zip");
        let count = bundle_frames(&frames, &archive).await.unwrap();
        assert_eq!(count, 3);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            ["frame_00001.jpg", "frame_00002.jpg", "frame_00003.jpg"]
        );
    }

    #[tokio::test]
    async fn empty_sequence_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out.zip");
        assert!(bundle_frames(dir.path(), &archive).await.is_err());
    }
}
