//! Scanner module for discovering numbered frame sequences.
//!
//! A frame is any file directly inside a directory whose name is
//! `prefix + digits + suffix`. Frames are grouped into sequences: maximal
//! runs whose numbers step by one and whose names all follow the zero-padded
//! template of the run's first frame.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    /// The parent path is missing or is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A directory could not be listed
    #[error("Failed to list {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A directory entry whose name decomposes as `prefix + digits + suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    /// Full path to the frame file.
    pub path: PathBuf,
    /// The digit substring exactly as written, leading zeros included.
    pub digits: String,
    /// Integer value of `digits`.
    pub value: u64,
}

/// Extracts the digit substring between `prefix` and `suffix`.
///
/// Returns `None` unless the name starts with `prefix`, ends with `suffix`
/// and everything in between is a non-empty run of ASCII digits.
pub fn frame_number<'a>(name: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let digits = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

/// Stable identifier of a sequence: its directory plus its start-digit string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId {
    pub directory: PathBuf,
    pub start: String,
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.directory.display(), self.start)
    }
}

/// A maximal contiguous run of frames inside one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub directory: PathBuf,
    pub prefix: String,
    pub suffix: String,
    /// Digit string of the first frame; its length is the zero-pad width.
    pub start_digits: String,
    pub start_value: u64,
    /// Member frames in ascending order. Never empty.
    pub frames: Vec<PathBuf>,
}

impl Sequence {
    pub fn id(&self) -> SequenceId {
        SequenceId {
            directory: self.directory.clone(),
            start: self.start_digits.clone(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Zero-pad width of the run's filename template.
    pub fn pad_width(&self) -> usize {
        self.start_digits.len()
    }

    /// First member frame, used for the dimension probe.
    pub fn first_frame(&self) -> &Path {
        &self.frames[0]
    }

    /// Name of the owning directory, or an empty string for a root path.
    pub fn directory_name(&self) -> String {
        self.directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Encoder input pattern for this run, e.g. `P%04d.JPG`.
    ///
    /// Literal `%` in the prefix or suffix is doubled so the encoder does not
    /// read it as a conversion.
    pub fn input_pattern(&self) -> String {
        format!(
            "{}%0{}d{}",
            self.prefix.replace('%', "%%"),
            self.pad_width(),
            self.suffix.replace('%', "%%")
        )
    }

    /// Returns the first member frame that no longer exists as a file.
    pub fn first_missing_frame(&self) -> Option<&Path> {
        self.frames
            .iter()
            .find(|p| !p.is_file())
            .map(PathBuf::as_path)
    }
}

/// Renders the frame name for `value` using a zero-pad `width`.
fn template_name(prefix: &str, suffix: &str, width: usize, value: u64) -> String {
    format!("{}{:0width$}{}", prefix, value, suffix, width = width)
}

/// Lists every matching frame directly inside `directory`, sorted by
/// `(value, file name)`.
fn list_matches(directory: &Path, prefix: &str, suffix: &str) -> Result<Vec<FileMatch>, ScanError> {
    let mut matches = Vec::new();

    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(digits) = frame_number(name, prefix, suffix) else {
            continue;
        };
        match digits.parse::<u64>() {
            Ok(value) => matches.push(FileMatch {
                path: path.to_path_buf(),
                digits: digits.to_string(),
                value,
            }),
            Err(_) => warn!(
                path = %path.display(),
                "Frame number does not fit in 64 bits; skipping file"
            ),
        }
    }

    matches.sort_by(|a, b| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
    Ok(matches)
}

/// Lazy iterator over the sequences of one directory.
///
/// Created by [`enumerate_sequences`]. The directory listing happens once up
/// front; runs are then carved out one per `next()` call.
#[derive(Debug)]
pub struct Sequences {
    directory: PathBuf,
    prefix: String,
    suffix: String,
    matches: Vec<FileMatch>,
    by_name: HashMap<String, usize>,
    claimed: Vec<bool>,
    cursor: usize,
}

impl Sequences {
    fn new(directory: PathBuf, prefix: &str, suffix: &str, matches: Vec<FileMatch>) -> Self {
        let by_name = matches
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                m.path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| (n.to_string(), i))
            })
            .collect();
        let claimed = vec![false; matches.len()];
        Self {
            directory,
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            matches,
            by_name,
            claimed,
            cursor: 0,
        }
    }
}

impl Iterator for Sequences {
    type Item = Sequence;

    fn next(&mut self) -> Option<Sequence> {
        while self.cursor < self.matches.len() {
            let start_idx = self.cursor;
            self.cursor += 1;
            if self.claimed[start_idx] {
                continue;
            }

            let start = &self.matches[start_idx];
            let width = start.digits.len();
            let mut frames = Vec::new();
            let mut value = Some(start.value);

            while let Some(v) = value {
                let name = template_name(&self.prefix, &self.suffix, width, v);
                match self.by_name.get(&name) {
                    Some(&idx) if !self.claimed[idx] => {
                        self.claimed[idx] = true;
                        frames.push(self.matches[idx].path.clone());
                        value = v.checked_add(1);
                    }
                    Some(_) => {
                        // Already part of an earlier run. Stopping here keeps
                        // the runs a partition.
                        debug!(
                            directory = %self.directory.display(),
                            frame = %name,
                            "Run ends at a frame claimed by an earlier run"
                        );
                        break;
                    }
                    None => break,
                }
            }

            if frames.is_empty() {
                continue;
            }

            return Some(Sequence {
                directory: self.directory.clone(),
                prefix: self.prefix.clone(),
                suffix: self.suffix.clone(),
                start_digits: start.digits.clone(),
                start_value: start.value,
                frames,
            });
        }
        None
    }
}

/// Lists the immediate subdirectories of `parent` that hold at least one
/// matching frame, sorted by name.
///
/// # Errors
/// Returns [`ScanError::NotADirectory`] if `parent` does not exist or is not a
/// directory. Subdirectories that cannot be listed are logged and skipped.
pub fn discover_candidate_directories(
    parent: &Path,
    prefix: &str,
    suffix: &str,
) -> Result<Vec<PathBuf>, ScanError> {
    if !parent.is_dir() {
        return Err(ScanError::NotADirectory(parent.to_path_buf()));
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(parent)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: parent.to_path_buf(),
            source,
        })?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if has_matching_frame(dir, prefix, suffix) {
            debug!(directory = %dir.display(), "Found candidate directory");
            found.push(dir.to_path_buf());
        }
    }

    Ok(found)
}

fn has_matching_frame(dir: &Path, prefix: &str, suffix: &str) -> bool {
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        match entry {
            Ok(entry) => {
                let matched = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| frame_number(name, prefix, suffix))
                    .is_some();
                if matched && entry.path().is_file() {
                    return true;
                }
            }
            Err(e) => {
                warn!(directory = %dir.display(), error = %e, "Skipping unreadable directory");
                return false;
            }
        }
    }
    false
}

/// Partitions the frames of `directory` into maximal contiguous runs.
///
/// Runs are produced in ascending order of their first frame. Each run starts
/// at the lowest unclaimed frame and extends while the next zero-padded name
/// exists. A frame with the same number but a different padding than its
/// neighbours starts its own run rather than being dropped.
pub fn enumerate_sequences(
    directory: &Path,
    prefix: &str,
    suffix: &str,
) -> Result<Sequences, ScanError> {
    let matches = list_matches(directory, prefix, suffix)?;
    Ok(Sequences::new(directory.to_path_buf(), prefix, suffix, matches))
}

/// Total number of runs across `directories`.
///
/// Directories that cannot be listed contribute zero and are logged.
pub fn count_sequences(directories: &[PathBuf], prefix: &str, suffix: &str) -> usize {
    directories
        .iter()
        .map(|dir| match enumerate_sequences(dir, prefix, suffix) {
            Ok(sequences) => sequences.count(),
            Err(e) => {
                warn!(directory = %dir.display(), error = %e, "Cannot count sequences");
                0
            }
        })
        .sum()
}

/// Sequences from a scan, indexed by their stable identifier.
#[derive(Debug, Default, Clone)]
pub struct SequenceCatalog {
    sequences: BTreeMap<SequenceId, Sequence>,
}

impl SequenceCatalog {
    /// Enumerates every directory and indexes the runs found.
    ///
    /// Directories that cannot be listed are logged and skipped.
    pub fn scan(directories: &[PathBuf], prefix: &str, suffix: &str) -> Self {
        let mut catalog = Self::default();
        for dir in directories {
            match enumerate_sequences(dir, prefix, suffix) {
                Ok(sequences) => {
                    for sequence in sequences {
                        catalog.insert(sequence);
                    }
                }
                Err(e) => warn!(directory = %dir.display(), error = %e, "Skipping directory"),
            }
        }
        catalog
    }

    pub fn insert(&mut self, sequence: Sequence) {
        self.sequences.insert(sequence.id(), sequence);
    }

    pub fn get(&self, id: &SequenceId) -> Option<&Sequence> {
        self.sequences.get(id)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Sequences ordered by directory, then start digits.
    pub fn iter(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Sequences that live in `directory`.
    pub fn in_directory<'a>(&'a self, directory: &'a Path) -> impl Iterator<Item = &'a Sequence> {
        self.sequences
            .values()
            .filter(move |s| s.directory == directory)
    }
}
