//! Reader-relative positions and distances.
//!
//! Cached blocks and reader positions are compared within one directory
//! only: a directory holds the file pairs of one partition, so positions in
//! different directories are unrelated. Within a directory a position is
//! `(file start id, block index)`.
//!
//! The distance of a block is the estimated number of seconds until the
//! nearest reader behind it reaches it.

use std::collections::HashMap;

use rill_common::naming::parse_start_id;

use super::FileBlockKey;
use crate::reader::ReaderPosition;

/// Position of a block or reader inside its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Position {
    pub(crate) start_id: u64,
    pub(crate) block_index: u64,
}

pub(crate) fn directory(file_name: &str) -> &str {
    file_name.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn position(file_name: &str, block_index: u64) -> Position {
    Position {
        start_id: parse_start_id(file_name).unwrap_or(0),
        block_index,
    }
}

/// Slowest reader position per directory.
pub(crate) fn slowest_positions(readers: &[ReaderPosition]) -> HashMap<&str, Position> {
    let mut slowest: HashMap<&str, Position> = HashMap::new();
    for reader in readers {
        let pos = Position {
            start_id: reader.file_start_id,
            block_index: reader.block_index,
        };
        slowest
            .entry(directory(&reader.file_name))
            .and_modify(|current| *current = (*current).min(pos))
            .or_insert(pos);
    }
    slowest
}

/// Returns true if no reader in the block's directory can reach it again.
pub(crate) fn is_obsolete(key: &FileBlockKey, slowest: &HashMap<&str, Position>) -> bool {
    match slowest.get(directory(&key.file_name)) {
        Some(bound) => position(&key.file_name, key.block_index) < *bound,
        None => true,
    }
}

/// Estimates how long until the nearest trailing reader reaches `key`.
///
/// `fixed_msg_size` replaces the reader's average message size for pools
/// whose entries have a fixed size. Returns `0.0` when a reader sits on the
/// block and `f64::INFINITY` when no reader is behind it with a known rate.
pub(crate) fn distance(
    key: &FileBlockKey,
    readers: &[ReaderPosition],
    block_size: usize,
    fixed_msg_size: Option<f64>,
) -> f64 {
    let dir = directory(&key.file_name);
    let entry = position(&key.file_name, key.block_index);
    let block_size = block_size as f64;

    let mut nearest = f64::INFINITY;
    for reader in readers.iter().filter(|r| directory(&r.file_name) == dir) {
        let at = Position {
            start_id: reader.file_start_id,
            block_index: reader.block_index,
        };
        if at > entry {
            continue;
        }
        if at == entry {
            return 0.0;
        }
        if reader.rate <= 0.0 {
            continue;
        }
        let blocks = entry.block_index as f64 - at.block_index as f64;
        let bytes = if at.start_id == entry.start_id {
            blocks * block_size
        } else {
            let msg_size = fixed_msg_size.unwrap_or(reader.avg_msg_size);
            if msg_size <= 0.0 {
                continue;
            }
            let ids = (entry.start_id - at.start_id) as f64;
            (ids * msg_size + blocks * block_size).max(block_size)
        };
        nearest = nearest.min(bytes / reader.rate);
    }
    nearest
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::naming::data_file_name;

    fn reader(file: &str, start_id: u64, block: u64, rate: f64) -> ReaderPosition {
        ReaderPosition {
            file_name: file.to_string(),
            file_start_id: start_id,
            block_index: block,
            rate,
            avg_msg_size: 100.0,
        }
    }

    fn key(file: &str, block: u64) -> FileBlockKey {
        FileBlockKey::new(file, block)
    }

    #[test]
    fn test_obsolete_is_strictly_before_slowest() {
        let file = format!("t/0/{}", data_file_name(0, 0));
        let readers = vec![reader(&file, 0, 4, 1.0), reader(&file, 0, 9, 1.0)];
        let slowest = slowest_positions(&readers);
        assert!(is_obsolete(&key(&file, 3), &slowest));
        assert!(!is_obsolete(&key(&file, 4), &slowest));
        assert!(!is_obsolete(&key(&file, 6), &slowest));
    }

    #[test]
    fn test_directory_without_readers_is_obsolete() {
        let readers = vec![reader(&format!("t/0/{}", data_file_name(0, 0)), 0, 0, 1.0)];
        let slowest = slowest_positions(&readers);
        assert!(is_obsolete(&key(&format!("t/1/{}", data_file_name(0, 0)), 5), &slowest));
    }

    #[test]
    fn test_same_file_distance() {
        let file = format!("t/0/{}", data_file_name(0, 0));
        let readers = vec![reader(&file, 0, 2, 1000.0)];
        assert_eq!(distance(&key(&file, 2), &readers, 100, None), 0.0);
        assert!((distance(&key(&file, 5), &readers, 100, None) - 0.3).abs() < 1e-9);
        assert!(distance(&key(&file, 1), &readers, 100, None).is_infinite());
    }

    #[test]
    fn test_cross_file_distance_orders_by_id() {
        let first = format!("t/0/{}", data_file_name(0, 0));
        let near = format!("t/0/{}", data_file_name(100, 0));
        let far = format!("t/0/{}", data_file_name(1000, 0));
        let readers = vec![reader(&first, 0, 0, 1000.0)];

        let d_near = distance(&key(&near, 0), &readers, 100, None);
        let d_far = distance(&key(&far, 0), &readers, 100, None);
        assert!(d_near.is_finite());
        assert!(d_far > d_near);
    }

    #[test]
    fn test_nearest_trailing_reader_wins() {
        let file = format!("t/0/{}", data_file_name(0, 0));
        let readers = vec![reader(&file, 0, 0, 100.0), reader(&file, 0, 8, 100.0)];
        assert!((distance(&key(&file, 10), &readers, 100, None) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_rate_is_infinite() {
        let file = format!("t/0/{}", data_file_name(0, 0));
        let readers = vec![reader(&file, 0, 0, 0.0)];
        assert!(distance(&key(&file, 3), &readers, 100, None).is_infinite());
    }
}
