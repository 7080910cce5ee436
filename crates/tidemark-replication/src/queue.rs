//! Durable, bounded, append-only byte queue for replication payloads.
//!
//! One queue exists per replication, stored as numbered segment files inside
//! the replication's directory. Records are framed with a magic, a length,
//! and a crc32c so an interrupted append is detected and truncated away on
//! open instead of surfacing a torn record to the consumer. When an append
//! would push the queue past its bound, whole segments are dropped oldest
//! first to make room.

use crc32c::crc32c;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tidemark_core::ReplicationId;
use tracing::warn;

const FRAME_MAGIC: u32 = 0x5444_5131; // "TDQ1"
const FRAME_HEADER_LEN: u64 = 12;
const SEGMENT_SUFFIX: &str = ".seg";

const MIN_SEGMENT_TARGET_BYTES: u64 = 4 * 1024;
const MAX_SEGMENT_TARGET_BYTES: u64 = 4 * 1024 * 1024;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors from the durable queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Disk I/O failure.
    #[error("queue I/O error at {path}: {source}")]
    Io {
        /// Path the failing operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A queue is already registered for the replication.
    #[error("queue for replication {id} is already initialized")]
    AlreadyInitialized {
        /// The replication whose queue already exists.
        id: ReplicationId,
    },

    /// No queue is registered for the replication.
    #[error("unknown replication {id}")]
    UnknownReplication {
        /// The replication that has no registered queue.
        id: ReplicationId,
    },

    /// The queue manager has been shut down.
    #[error("queue manager is closed")]
    Closed,

    /// A single record cannot fit the queue bound even with every older
    /// record evicted.
    #[error("record of {record_bytes} bytes cannot fit the queue bound of {max_bytes} bytes")]
    RecordTooLarge {
        /// Size of the rejected record including framing.
        record_bytes: u64,
        /// The queue's configured bound.
        max_bytes: u64,
    },

    /// A sealed segment failed frame verification while being read back.
    #[error("corrupt frame in segment {path}")]
    CorruptFrame {
        /// Path of the corrupt segment.
        path: PathBuf,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn segment_target_for(max_bytes: u64) -> u64 {
    (max_bytes / 8).clamp(MIN_SEGMENT_TARGET_BYTES, MAX_SEGMENT_TARGET_BYTES)
}

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:020}{SEGMENT_SUFFIX}"))
}

fn parse_segment_seq(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Best-effort directory fsync so segment creation/removal survives a crash.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

struct SealedSegment {
    path: PathBuf,
    bytes: u64,
}

struct ActiveSegment {
    seq: u64,
    path: PathBuf,
    file: File,
    bytes: u64,
}

enum FrameRead {
    Frame(Vec<u8>),
    /// Clean end of file.
    Eof,
    /// Partial or corrupt frame at the tail.
    Torn,
}

fn read_frame(reader: &mut impl Read) -> std::io::Result<FrameRead> {
    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    let mut filled = 0usize;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                FrameRead::Eof
            } else {
                FrameRead::Torn
            });
        }
        filled += n;
    }

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != FRAME_MAGIC {
        return Ok(FrameRead::Torn);
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

    let mut payload = vec![0u8; len];
    let mut filled = 0usize;
    while filled < len {
        let n = reader.read(&mut payload[filled..])?;
        if n == 0 {
            return Ok(FrameRead::Torn);
        }
        filled += n;
    }

    if crc32c(&payload) != expected_crc {
        return Ok(FrameRead::Torn);
    }
    Ok(FrameRead::Frame(payload))
}

/// Returns the byte length of the leading run of intact frames in a segment.
fn scan_valid_len(path: &Path) -> QueueResult<u64> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut valid = 0u64;
    loop {
        match read_frame(&mut file).map_err(|e| io_err(path, e))? {
            FrameRead::Frame(payload) => valid += FRAME_HEADER_LEN + payload.len() as u64,
            FrameRead::Eof | FrameRead::Torn => return Ok(valid),
        }
    }
}

fn read_segment_records(path: &Path, out: &mut Vec<Vec<u8>>) -> QueueResult<()> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    loop {
        match read_frame(&mut file).map_err(|e| io_err(path, e))? {
            FrameRead::Frame(payload) => out.push(payload),
            FrameRead::Eof => return Ok(()),
            FrameRead::Torn => {
                return Err(QueueError::CorruptFrame {
                    path: path.to_path_buf(),
                })
            }
        }
    }
}

/// A crash-safe bounded append log owned by exactly one replication.
///
/// The directory is owned exclusively by this value; external processes must
/// not touch it.
pub struct DurableQueue {
    dir: PathBuf,
    max_bytes: u64,
    segment_target: u64,
    sealed: VecDeque<SealedSegment>,
    active: ActiveSegment,
    total_bytes: u64,
}

impl DurableQueue {
    /// Opens the queue rooted at `dir`, creating the directory and an empty
    /// first segment when absent. Any torn tail left by an interrupted
    /// append is truncated away.
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> QueueResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let mut found: Vec<(u64, PathBuf, u64)> = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_segment_seq(&name) {
                Some(seq) => {
                    let len = entry
                        .metadata()
                        .map_err(|e| io_err(&entry.path(), e))?
                        .len();
                    found.push((seq, entry.path(), len));
                }
                None => {
                    warn!(
                        path = %entry.path().display(),
                        "ignoring unrecognized file in queue directory"
                    );
                }
            }
        }
        found.sort_by_key(|(seq, _, _)| *seq);

        let mut sealed = VecDeque::new();
        let active = match found.pop() {
            Some((seq, path, len)) => {
                let valid = scan_valid_len(&path)?;
                if valid < len {
                    warn!(
                        path = %path.display(),
                        valid_bytes = valid,
                        file_bytes = len,
                        "truncating torn tail of queue segment"
                    );
                    let file = OpenOptions::new()
                        .write(true)
                        .open(&path)
                        .map_err(|e| io_err(&path, e))?;
                    file.set_len(valid).map_err(|e| io_err(&path, e))?;
                    file.sync_all().map_err(|e| io_err(&path, e))?;
                }
                for (_, path, bytes) in found {
                    sealed.push_back(SealedSegment { path, bytes });
                }
                let file = OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .map_err(|e| io_err(&path, e))?;
                ActiveSegment {
                    seq,
                    path,
                    file,
                    bytes: valid,
                }
            }
            None => Self::create_segment(&dir, 0)?,
        };

        let total_bytes = sealed.iter().map(|s| s.bytes).sum::<u64>() + active.bytes;
        let mut queue = Self {
            dir,
            max_bytes,
            segment_target: segment_target_for(max_bytes),
            sealed,
            active,
            total_bytes,
        };
        // The recorded bound may have shrunk since the queue was last open.
        queue.evict(0)?;
        Ok(queue)
    }

    fn create_segment(dir: &Path, seq: u64) -> QueueResult<ActiveSegment> {
        let path = segment_path(dir, seq);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        sync_dir(dir);
        Ok(ActiveSegment {
            seq,
            path,
            file,
            bytes: 0,
        })
    }

    /// Appends one record and fdatasyncs it before returning.
    ///
    /// When the append would exceed the bound, the oldest segments are
    /// dropped first; a record whose frame alone exceeds the bound is
    /// rejected.
    pub fn enqueue(&mut self, payload: &[u8]) -> QueueResult<()> {
        let framed = FRAME_HEADER_LEN + payload.len() as u64;
        if payload.len() > u32::MAX as usize || framed > self.max_bytes {
            return Err(QueueError::RecordTooLarge {
                record_bytes: framed,
                max_bytes: self.max_bytes,
            });
        }
        self.evict(framed)?;

        let mut frame = Vec::with_capacity(framed as usize);
        frame.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32c(payload).to_le_bytes());
        frame.extend_from_slice(payload);

        self.active
            .file
            .write_all(&frame)
            .map_err(|e| io_err(&self.active.path, e))?;
        self.active
            .file
            .sync_data()
            .map_err(|e| io_err(&self.active.path, e))?;
        self.active.bytes += framed;
        self.total_bytes += framed;

        if self.active.bytes >= self.segment_target {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> QueueResult<()> {
        let next_seq = self.active.seq + 1;
        let replacement = Self::create_segment(&self.dir, next_seq)?;
        let old = std::mem::replace(&mut self.active, replacement);
        self.sealed.push_back(SealedSegment {
            path: old.path,
            bytes: old.bytes,
        });
        Ok(())
    }

    fn evict(&mut self, incoming: u64) -> QueueResult<()> {
        while self.total_bytes + incoming > self.max_bytes {
            if let Some(seg) = self.sealed.pop_front() {
                fs::remove_file(&seg.path).map_err(|e| io_err(&seg.path, e))?;
                sync_dir(&self.dir);
                self.total_bytes -= seg.bytes;
                warn!(
                    path = %seg.path.display(),
                    dropped_bytes = seg.bytes,
                    "queue over bound, dropped oldest segment"
                );
            } else if self.active.bytes > 0 {
                self.active
                    .file
                    .set_len(0)
                    .map_err(|e| io_err(&self.active.path, e))?;
                self.active
                    .file
                    .sync_data()
                    .map_err(|e| io_err(&self.active.path, e))?;
                self.total_bytes -= self.active.bytes;
                warn!(
                    path = %self.active.path.display(),
                    dropped_bytes = self.active.bytes,
                    "queue over bound, truncated active segment"
                );
                self.active.bytes = 0;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Adjusts the bound. Shrinking below the current size evicts the
    /// oldest segments immediately.
    pub fn set_max_bytes(&mut self, max_bytes: u64) -> QueueResult<()> {
        self.max_bytes = max_bytes;
        self.segment_target = segment_target_for(max_bytes);
        self.evict(0)
    }

    /// Decodes every record currently in the queue, oldest first.
    ///
    /// This is the read surface the downstream shipper drains.
    pub fn records(&self) -> QueueResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for seg in &self.sealed {
            read_segment_records(&seg.path, &mut out)?;
        }
        read_segment_records(&self.active.path, &mut out)?;
        Ok(out)
    }

    /// Bytes currently on disk for this queue.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// The configured bound.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// The directory this queue owns.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flushes everything to disk ahead of shutdown.
    pub fn close(&mut self) -> QueueResult<()> {
        self.active
            .file
            .sync_all()
            .map_err(|e| io_err(&self.active.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue(dir: &Path, max_bytes: u64) -> DurableQueue {
        DurableQueue::open(dir, max_bytes).unwrap()
    }

    #[test]
    fn test_enqueue_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 1 << 20);

        queue.enqueue(b"first").unwrap();
        queue.enqueue(b"second").unwrap();

        let records = queue.records().unwrap();
        assert_eq!(records, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(
            queue.total_bytes(),
            2 * FRAME_HEADER_LEN + 5 + 6
        );
    }

    #[test]
    fn test_empty_payload_is_a_record() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 1 << 20);

        queue.enqueue(b"").unwrap();

        let records = queue.records().unwrap();
        assert_eq!(records, vec![Vec::<u8>::new()]);
        assert_eq!(queue.total_bytes(), FRAME_HEADER_LEN);
    }

    #[test]
    fn test_reopen_preserves_records() {
        let tmp = TempDir::new().unwrap();
        {
            let mut queue = open_queue(tmp.path(), 1 << 20);
            queue.enqueue(b"persisted").unwrap();
            queue.close().unwrap();
        }

        let queue = open_queue(tmp.path(), 1 << 20);
        assert_eq!(queue.records().unwrap(), vec![b"persisted".to_vec()]);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let mut queue = open_queue(tmp.path(), 1 << 20);
            queue.enqueue(b"intact").unwrap();
            queue.close().unwrap();
        }

        // Simulate a crash mid-append: a valid header with a missing payload.
        let seg = segment_path(tmp.path(), 0);
        let mut file = OpenOptions::new().append(true).open(&seg).unwrap();
        file.write_all(&FRAME_MAGIC.to_le_bytes()).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let mut queue = open_queue(tmp.path(), 1 << 20);
        assert_eq!(queue.records().unwrap(), vec![b"intact".to_vec()]);
        assert_eq!(queue.total_bytes(), FRAME_HEADER_LEN + 6);

        // The queue stays appendable after truncation.
        queue.enqueue(b"after").unwrap();
        assert_eq!(
            queue.records().unwrap(),
            vec![b"intact".to_vec(), b"after".to_vec()]
        );
    }

    #[test]
    fn test_garbage_tail_is_truncated_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let mut queue = open_queue(tmp.path(), 1 << 20);
            queue.enqueue(b"kept").unwrap();
            queue.close().unwrap();
        }

        let seg = segment_path(tmp.path(), 0);
        let mut file = OpenOptions::new().append(true).open(&seg).unwrap();
        file.write_all(b"\xde\xad\xbe\xef").unwrap();
        drop(file);

        let queue = open_queue(tmp.path(), 1 << 20);
        assert_eq!(queue.records().unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_eviction_drops_oldest_first() {
        let tmp = TempDir::new().unwrap();
        // Bound of 32 KiB gives a 4 KiB segment target, so each 8 KiB
        // record seals its own segment.
        let mut queue = open_queue(tmp.path(), 32 * 1024);

        for fill in 0u8..4 {
            queue.enqueue(&vec![fill; 8 * 1024]).unwrap();
        }

        let records = queue.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], vec![1u8; 8 * 1024]);
        assert_eq!(records[2], vec![3u8; 8 * 1024]);
        assert!(queue.total_bytes() <= 32 * 1024);
    }

    #[test]
    fn test_shrink_evicts_immediately() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 32 * 1024);
        for fill in 0u8..3 {
            queue.enqueue(&vec![fill; 8 * 1024]).unwrap();
        }
        assert_eq!(queue.records().unwrap().len(), 3);

        queue.set_max_bytes(10_000).unwrap();

        let records = queue.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], vec![2u8; 8 * 1024]);
        assert!(queue.total_bytes() <= 10_000);
    }

    #[test]
    fn test_grow_keeps_records() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 32 * 1024);
        queue.enqueue(b"stays").unwrap();

        queue.set_max_bytes(1 << 30).unwrap();

        assert_eq!(queue.records().unwrap(), vec![b"stays".to_vec()]);
        assert_eq!(queue.max_bytes(), 1 << 30);
    }

    #[test]
    fn test_zero_bound_rejects_everything() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 0);
        let err = queue.enqueue(b"nope").unwrap_err();
        assert!(matches!(err, QueueError::RecordTooLarge { .. }));
        assert_eq!(queue.total_bytes(), 0);
    }

    #[test]
    fn test_oversized_record_rejected_without_eviction() {
        let tmp = TempDir::new().unwrap();
        let mut queue = open_queue(tmp.path(), 4 * 1024);
        queue.enqueue(b"small").unwrap();

        let err = queue.enqueue(&vec![0u8; 8 * 1024]).unwrap_err();
        assert!(matches!(err, QueueError::RecordTooLarge { .. }));

        // The rejection left the existing record alone.
        assert_eq!(queue.records().unwrap(), vec![b"small".to_vec()]);
    }

    #[test]
    fn test_truncates_active_segment_when_it_is_all_that_remains() {
        let tmp = TempDir::new().unwrap();
        // Everything stays in the active segment at this bound.
        let mut queue = open_queue(tmp.path(), 4 * 1024);
        queue.enqueue(&vec![1u8; 2 * 1024]).unwrap();

        // 3 KiB will not fit next to the 2 KiB record.
        queue.enqueue(&vec![2u8; 3 * 1024]).unwrap();

        let records = queue.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], vec![2u8; 3 * 1024]);
    }

    #[test]
    fn test_reopen_after_rotation_keeps_order() {
        let tmp = TempDir::new().unwrap();
        {
            let mut queue = open_queue(tmp.path(), 64 * 1024);
            for fill in 0u8..5 {
                queue.enqueue(&vec![fill; 8 * 1024]).unwrap();
            }
            queue.close().unwrap();
        }

        let queue = open_queue(tmp.path(), 64 * 1024);
        let records = queue.records().unwrap();
        assert_eq!(records.len(), 5);
        for (fill, record) in records.iter().enumerate() {
            assert_eq!(record, &vec![fill as u8; 8 * 1024]);
        }
    }

    #[test]
    fn test_unrecognized_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), b"not a segment").unwrap();

        let mut queue = open_queue(tmp.path(), 1 << 20);
        queue.enqueue(b"ok").unwrap();
        assert_eq!(queue.records().unwrap(), vec![b"ok".to_vec()]);
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_segment_name_parsing() {
        assert_eq!(parse_segment_seq("00000000000000000042.seg"), Some(42));
        assert_eq!(parse_segment_seq("00000000000000000000.seg"), Some(0));
        assert_eq!(parse_segment_seq("42.seg"), None);
        assert_eq!(parse_segment_seq("0000000000000000004x.seg"), None);
        assert_eq!(parse_segment_seq("00000000000000000042.tmp"), None);
    }
}
