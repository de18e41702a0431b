//! File-pair naming.
//!
//! A committed range of messages is stored as a meta file and a data file
//! sharing one stem: `{start_msg_id:020}_{start_timestamp:020}`. Zero padding
//! keeps lexicographic order equal to message-id order. The block cache picks
//! its pool purely from the suffix.

/// Suffix of data files.
pub const DATA_SUFFIX: &str = ".data";

/// Suffix of meta files.
pub const META_SUFFIX: &str = ".meta";

/// Which half of a file pair a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Fixed-size index entries.
    Meta,
    /// Concatenated payloads.
    Data,
}

/// Returns true if `name` is a data file.
#[inline]
#[must_use]
pub fn is_data_file(name: &str) -> bool {
    name.ends_with(DATA_SUFFIX)
}

/// Returns the shared stem of a file pair.
#[must_use]
pub fn file_stem(start_msg_id: u64, start_timestamp: i64) -> String {
    format!("{start_msg_id:020}_{:020}", start_timestamp.max(0))
}

/// Returns the meta file name for a pair.
#[must_use]
pub fn meta_file_name(start_msg_id: u64, start_timestamp: i64) -> String {
    format!("{}{META_SUFFIX}", file_stem(start_msg_id, start_timestamp))
}

/// Returns the data file name for a pair.
#[must_use]
pub fn data_file_name(start_msg_id: u64, start_timestamp: i64) -> String {
    format!("{}{DATA_SUFFIX}", file_stem(start_msg_id, start_timestamp))
}

/// Parses a file name or path into `(start_msg_id, start_timestamp, kind)`.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<(u64, i64, FileKind)> {
    let name = name.rsplit('/').next().unwrap_or(name);
    let (stem, kind) = if let Some(stem) = name.strip_suffix(DATA_SUFFIX) {
        (stem, FileKind::Data)
    } else if let Some(stem) = name.strip_suffix(META_SUFFIX) {
        (stem, FileKind::Meta)
    } else {
        return None;
    };
    let (id, ts) = stem.split_once('_')?;
    Some((id.parse().ok()?, ts.parse().ok()?, kind))
}

/// Returns the start message id encoded in a file name.
#[must_use]
pub fn parse_start_id(name: &str) -> Option<u64> {
    parse_file_name(name).map(|(id, _, _)| id)
}
