//! Parallel zip and unzip for temp storage blocks.
//!
//! Compression is CPU-bound, so files are spread over one archive per
//! worker: workers pull whole files from a queue sorted largest first until
//! it is empty. Extraction runs one worker per archive.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use buildgraph_core::error::{BuildGraphError, Result};

use crate::manifest::{TempStorageFile, TempStorageZipFile};
use crate::retry::RetryPolicy;

/// Logical CPU count, or 1 if it cannot be determined.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Name of the archive written by worker `index` of `workers`.
pub fn archive_name(base_name: &str, index: usize, workers: usize) -> String {
    if workers > 1 {
        format!("{}-{:02}.zip", base_name, index + 1)
    } else {
        format!("{}.zip", base_name)
    }
}

/// Compress `files` (relative to `root`) into archives in `out_dir`.
///
/// At most `workers` archives are written. Workers that find the queue
/// empty write nothing, so every returned archive is non-empty.
pub fn create_archives(
    root: &Path,
    files: &[TempStorageFile],
    out_dir: &Path,
    base_name: &str,
    workers: usize,
) -> Result<Vec<TempStorageZipFile>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(out_dir)?;

    let mut sorted: Vec<&TempStorageFile> = files.iter().collect();
    sorted.sort_by(|a, b| b.length.cmp(&a.length));
    let queue = Mutex::new(VecDeque::from(sorted));
    let workers = workers.clamp(1, files.len());

    let results: Vec<Result<Option<TempStorageZipFile>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|index| {
                let name = archive_name(base_name, index, workers);
                let queue = &queue;
                scope.spawn(move || compress_worker(root, queue, out_dir, name))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(BuildGraphError::Archive("compression worker panicked".into())))
            })
            .collect()
    });

    let mut archives = Vec::new();
    for result in results {
        if let Some(archive) = result? {
            archives.push(archive);
        }
    }
    Ok(archives)
}

fn next_file<'a>(queue: &Mutex<VecDeque<&'a TempStorageFile>>) -> Result<Option<&'a TempStorageFile>> {
    queue
        .lock()
        .map(|mut queue| queue.pop_front())
        .map_err(|_| BuildGraphError::Archive("compression queue poisoned".into()))
}

fn compress_worker(
    root: &Path,
    queue: &Mutex<VecDeque<&TempStorageFile>>,
    out_dir: &Path,
    name: String,
) -> Result<Option<TempStorageZipFile>> {
    let Some(first) = next_file(queue)? else {
        return Ok(None);
    };

    let path = out_dir.join(&name);
    let mut writer = ZipWriter::new(File::create(&path)?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(1));

    let mut count = 0;
    let mut next = Some(first);
    while let Some(file) = next {
        writer
            .start_file(
                file.relative_path.clone(),
                options.large_file(file.length >= u64::from(u32::MAX)),
            )
            .map_err(zip_error)?;
        let mut input = File::open(file.path(root))?;
        io::copy(&mut input, &mut writer)?;
        count += 1;
        next = next_file(queue)?;
    }
    writer.finish().map_err(zip_error)?;

    let length = fs::metadata(&path)?.len();
    debug!(archive = %name, files = count, bytes = length, "Wrote archive");
    Ok(Some(TempStorageZipFile { name, length }))
}

/// Extract `archives` into `root`, one worker per archive up to `workers`.
/// Each archive is retried according to `retry`.
pub fn extract_archives(
    archives: &[PathBuf],
    root: &Path,
    workers: usize,
    retry: &RetryPolicy,
) -> Result<()> {
    if archives.is_empty() {
        return Ok(());
    }
    let queue = Mutex::new(archives.iter().collect::<VecDeque<_>>());
    let workers = workers.clamp(1, archives.len());

    let results: Vec<Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let queue = &queue;
                scope.spawn(move || -> Result<()> {
                    loop {
                        let next = queue
                            .lock()
                            .map(|mut queue| queue.pop_front())
                            .map_err(|_| BuildGraphError::Archive("extraction queue poisoned".into()))?;
                        let Some(archive) = next else {
                            return Ok(());
                        };
                        let operation = format!("extract {}", archive.display());
                        retry.run(&operation, || extract_archive(archive, root))?;
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(BuildGraphError::Archive("extraction worker panicked".into())))
            })
            .collect()
    });

    results.into_iter().collect()
}

/// Extract a single archive into `root`. Returns the number of files written.
pub fn extract_archive(archive_path: &Path, root: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(File::open(archive_path)?).map_err(zip_error)?;
    let mut count = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(BuildGraphError::Archive(format!(
                "{}: entry '{}' is outside the extraction root",
                archive_path.display(),
                entry.name()
            )));
        };
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        count += 1;
    }
    debug!(archive = %archive_path.display(), files = count, "Extracted archive");
    Ok(count)
}

fn zip_error(e: ZipError) -> BuildGraphError {
    match e {
        ZipError::Io(e) => BuildGraphError::Io(e),
        other => BuildGraphError::Archive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_files(root: &Path, files: &[(&str, usize)]) -> Vec<TempStorageFile> {
        files
            .iter()
            .map(|(name, size)| {
                let path = root.join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, "x".repeat(*size)).unwrap();
                TempStorageFile::from_disk(root, Path::new(name), &[]).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name("Manifest", 0, 1), "Manifest.zip");
        assert_eq!(archive_name("Manifest-Binaries", 2, 4), "Manifest-Binaries-03.zip");
    }

    #[test]
    fn test_zip_and_unzip_with_several_workers() {
        let source = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();

        let files = write_files(
            source.path(),
            &[
                ("Binaries/Editor.exe", 4096),
                ("Binaries/Editor.dll", 2048),
                ("Content/Map.umap", 100),
                ("readme.txt", 0),
            ],
        );

        let archives = create_archives(source.path(), &files, staging.path(), "Manifest", 2).unwrap();
        assert!(!archives.is_empty() && archives.len() <= 2);
        for archive in &archives {
            assert!(archive.name.starts_with("Manifest-0"));
            assert!(archive.length > 0);
        }

        let paths: Vec<PathBuf> = archives.iter().map(|a| staging.path().join(&a.name)).collect();
        let retry = RetryPolicy::new(1, Duration::ZERO);
        extract_archives(&paths, target.path(), 4, &retry).unwrap();

        for file in &files {
            let restored = fs::metadata(target.path().join(&file.relative_path)).unwrap();
            assert_eq!(restored.len(), file.length);
        }
    }

    #[test]
    fn test_single_worker_writes_unsuffixed_archive() {
        let source = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let files = write_files(source.path(), &[("a.txt", 10), ("b.txt", 20)]);

        let archives = create_archives(source.path(), &files, staging.path(), "Manifest-Tools", 1).unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name, "Manifest-Tools.zip");
    }

    #[test]
    fn test_no_files_writes_no_archives() {
        let staging = tempfile::tempdir().unwrap();
        let archives = create_archives(staging.path(), &[], staging.path(), "Manifest", 8).unwrap();
        assert!(archives.is_empty());
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_archive_fails() {
        let target = tempfile::tempdir().unwrap();
        let retry = RetryPolicy::new(2, Duration::ZERO);
        let missing = vec![target.path().join("Missing.zip")];
        let err = extract_archives(&missing, target.path(), 1, &retry).unwrap_err();
        assert!(matches!(err, BuildGraphError::Transient { attempts: 2, .. }));
    }
}
