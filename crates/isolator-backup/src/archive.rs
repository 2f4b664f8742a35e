//! Gzip-compressed tar codec for backup archives.
//!
//! Layout: the volume tree under `data/` and an optional `config.json`
//! snapshot at the root. Everything here is blocking I/O and is meant to
//! run on the blocking pool.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

pub const DATA_PREFIX: &str = "data";
pub const CONFIG_MEMBER: &str = "config.json";

const MAX_NAME_ATTEMPTS: usize = 100;

/// Exclusively create `{stem}.tar.gz` in `dir`, falling back to
/// `{stem}-1.tar.gz`, `{stem}-2.tar.gz`, ... when a same-second backup
/// already claimed the name.
pub fn reserve_archive(dir: &Path, stem: &str) -> io::Result<(String, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let filename = if attempt == 0 {
            format!("{stem}.tar.gz")
        } else {
            format!("{stem}-{attempt}.tar.gz")
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&filename))
        {
            Ok(file) => return Ok((filename, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free archive name for {stem}"),
    ))
}

/// Write a complete archive into `file` and flush it to disk.
///
/// `config_json` is staged through a temporary file in `scratch_dir`, which
/// is gone once this returns.
pub fn write_archive(
    file: File,
    volume: Option<&Path>,
    config_json: Option<&str>,
    scratch_dir: &Path,
) -> io::Result<()> {
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    // Symlinks are stored as links, not followed out of the volume.
    builder.follow_symlinks(false);

    if let Some(volume) = volume {
        builder.append_dir_all(DATA_PREFIX, volume)?;
    }

    if let Some(json) = config_json {
        let mut scratch = NamedTempFile::new_in(scratch_dir)?;
        scratch.write_all(json.as_bytes())?;
        scratch.flush()?;
        builder.append_path_with_name(scratch.path(), CONFIG_MEMBER)?;
    }

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()
}

/// What an unpack pass found besides the data tree.
#[derive(Debug, Default)]
pub struct Unpacked {
    pub data_entries: usize,
    pub config_json: Option<String>,
}

/// Extract the `data/` members of `archive` into `staging` with the prefix
/// stripped, and read `config.json` through a scratch file in `scratch_dir`.
/// Any other member is ignored.
pub fn unpack_archive(archive: &Path, staging: &Path, scratch_dir: &Path) -> io::Result<Unpacked> {
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    tar.set_preserve_permissions(true);

    let mut unpacked = Unpacked::default();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        if path == Path::new(CONFIG_MEMBER) {
            unpacked.config_json = Some(read_through_scratch(&mut entry, scratch_dir)?);
            continue;
        }

        let Ok(relative) = path.strip_prefix(DATA_PREFIX) else {
            debug!(member = %path.display(), "Skipping archive member outside data/");
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let relative = confined(relative)?;
        if entry.header().entry_type().is_hard_link() {
            return Err(rejected("archive member is a hard link", &path));
        }
        if passes_through_symlink(staging, &relative) {
            return Err(rejected("archive member passes through a symlink", &path));
        }

        let dest = staging.join(&relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest)?;
        unpacked.data_entries += 1;
    }
    Ok(unpacked)
}

fn read_through_scratch(entry: &mut impl Read, scratch_dir: &Path) -> io::Result<String> {
    let mut scratch = NamedTempFile::new_in(scratch_dir)?;
    io::copy(entry, &mut scratch)?;
    let file = scratch.as_file_mut();
    file.rewind()?;
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;
    Ok(raw)
}

/// Reject member paths that would land outside the extraction root.
fn confined(relative: &Path) -> io::Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(rejected("archive member escapes data/", relative)),
        }
    }
    Ok(clean)
}

/// Whether `relative`, or any directory above it, already exists under
/// `root` as a symlink.
fn passes_through_symlink(root: &Path, relative: &Path) -> bool {
    let mut current = root.to_path_buf();
    relative.components().any(|component| {
        current.push(component);
        fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink())
    })
}

fn rejected(reason: &str, member: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{reason}: {}", member.display()),
    )
}

/// Member paths of an archive, in archive order.
pub fn member_names(archive: &Path) -> io::Result<Vec<String>> {
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    tar.entries()?
        .map(|entry| Ok(entry?.path()?.to_string_lossy().into_owned()))
        .collect()
}

/// Remove every entry of `dir`, leaving the directory itself in place.
pub fn clear_directory(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Move every entry of `from` into `to`. Both must be on the same filesystem.
pub fn move_entries(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        fs::rename(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}
