//! File moves and command line construction around one command repetition.
//!
//! Everything here is synchronous file work; the engine runs it on the
//! blocking pool.

use crate::core::command::{FilePostProcessor, FilePreProcessor, InputFile, OutputFile};
use crate::core::error::ComputationError;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Name of the file collecting stdout and stderr of one repetition.
pub fn log_file_name(command_id: &str, index: usize) -> String {
    format!("{command_id}_{index}.out")
}

/// Makes every input file available in the working directory.
///
/// A file already present in the working directory wins over the common
/// directory. Plain files found in the common directory are copied; files
/// with a pre-processor are expanded straight from the common directory.
pub fn pre_process(working_dir: &Path, common_dir: &Path, files: &[InputFile]) -> Result<()> {
    for file in files {
        let source = resolve_input(working_dir, common_dir, file)?;
        match file.pre_processor() {
            None => {}
            Some(FilePreProcessor::Gunzip) => gunzip(&source, working_dir, file.name())?,
            Some(FilePreProcessor::ArchiveUnzip) => unzip(&source, working_dir)?,
        }
    }
    Ok(())
}

fn resolve_input(working_dir: &Path, common_dir: &Path, file: &InputFile) -> Result<PathBuf> {
    let in_working_dir = working_dir.join(file.name());
    if in_working_dir.is_file() {
        return Ok(in_working_dir);
    }

    let in_common_dir = common_dir.join(file.name());
    if !in_common_dir.is_file() {
        return Err(ComputationError::InputFileNotFound {
            name: file.name().to_string(),
        }
        .into());
    }

    if file.pre_processor().is_none() {
        ensure_parent(&in_working_dir)?;
        std::fs::copy(&in_common_dir, &in_working_dir).with_context(|| {
            format!(
                "Failed to copy common file {} to {}",
                in_common_dir.display(),
                in_working_dir.display()
            )
        })?;
        tracing::trace!("Copied common file {}", file.name());
    }
    Ok(in_common_dir)
}

fn gunzip(source: &Path, working_dir: &Path, name: &str) -> Result<()> {
    // validated to end with ".gz" when the command was built
    let target_name = name.strip_suffix(".gz").unwrap_or(name);
    let target = working_dir.join(target_name);
    ensure_parent(&target)?;

    let input = File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(
        File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?,
    );
    std::io::copy(&mut decoder, &mut output)
        .with_context(|| format!("Failed to gunzip {}", source.display()))?;
    output
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush {}", target.display()))?;
    Ok(())
}

fn unzip(archive_path: &Path, working_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read archive {}", archive_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read entry #{i} of {}", archive_path.display()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ComputationError::UnsafeArchiveEntry {
                archive: archive_path.to_path_buf(),
                entry: entry.name().to_string(),
            }
            .into());
        };
        let target = working_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }

        ensure_parent(&target)?;
        // File::create truncates, so existing files are overwritten
        let mut output = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut output)
            .with_context(|| format!("Failed to extract {}", target.display()))?;
    }
    Ok(())
}

/// Compresses declared outputs. Only called after a zero exit code.
pub fn post_process(working_dir: &Path, files: &[OutputFile]) -> Result<()> {
    for file in files {
        let Some(post_processor) = file.post_processor() else {
            continue;
        };
        let path = working_dir.join(file.name());
        if !path.is_file() {
            tracing::debug!("Output file {} not produced, skipping", path.display());
            continue;
        }
        match post_processor {
            FilePostProcessor::Gzip => gzip(&path)?,
        }
    }
    Ok(())
}

fn gzip(path: &Path) -> Result<()> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let output =
        File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    std::io::copy(&mut input, &mut encoder)
        .with_context(|| format!("Failed to gzip {}", path.display()))?;
    encoder
        .finish()
        .and_then(|w| w.into_inner().map_err(|e| e.into_error()))
        .with_context(|| format!("Failed to finish {}", target.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Caller variables plus `TMPDIR` pointing at the working directory.
pub fn execution_variables(
    variables: &BTreeMap<String, String>,
    working_dir: &Path,
) -> Result<BTreeMap<String, String>> {
    let absolute = std::path::absolute(working_dir).with_context(|| {
        format!(
            "Failed to resolve absolute path of {}",
            working_dir.display()
        )
    })?;
    let mut all = variables.clone();
    all.insert("TMPDIR".to_string(), absolute.to_string_lossy().into_owned());
    Ok(all)
}

/// Builds the `sh -c` script: one `export` per variable, then the program.
///
/// Variables whose name ends in `PATH` are prepended to the inherited value
/// instead of replacing it.
pub fn build_command_line(
    program: &str,
    args: &[String],
    variables: &BTreeMap<String, String>,
) -> String {
    let mut line = String::new();
    for (name, value) in variables {
        let _ = write!(line, "export {name}={value}");
        if name.ends_with("PATH") {
            let _ = write!(line, ":${name}");
        }
        line.push_str("; ");
    }
    line.push_str(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
