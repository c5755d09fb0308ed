use flate2::read::MultiGzDecoder;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::LogError;

/// File name of a month's log inside `{root}/{host}/{month}/`
pub const LOG_FILE_NAME: &str = "watchguard.log";

/// Compressed variant of [`LOG_FILE_NAME`]
pub const GZ_LOG_FILE_NAME: &str = "watchguard.log.gz";

/// Block size used when reading plain files backwards
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Upper bound on the ring buffer's initial allocation
const RING_PREALLOC: usize = 4096;

/// Log files laid out as `{root}/{host}/{month}/watchguard.log[.gz]`
#[derive(Clone, Debug)]
pub struct LogSource {
    root: PathBuf,
}

impl LogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host directories under the root, sorted. A missing root has no hosts.
    pub fn hosts(&self) -> Vec<String> {
        child_dirs(&self.root)
    }

    /// Month directories for a host, sorted
    pub fn months(&self, host: &str) -> Vec<String> {
        match check_component(host) {
            Ok(host) => child_dirs(&self.root.join(host)),
            Err(_) => Vec::new(),
        }
    }

    /// Path of the log for a (host, month) pair.
    ///
    /// Prefers the plain file, falls back to the gzip variant, and returns the
    /// plain path when neither exists.
    pub fn resolve(&self, host: &str, month: &str) -> Result<PathBuf, LogError> {
        let dir = self
            .root
            .join(check_component(host)?)
            .join(check_component(month)?);

        let plain = dir.join(LOG_FILE_NAME);
        if plain.exists() {
            return Ok(plain);
        }
        let gz = dir.join(GZ_LOG_FILE_NAME);
        if gz.exists() {
            return Ok(gz);
        }
        Ok(plain)
    }

    /// Last `n` lines of a host's log for a month
    pub fn tail(&self, host: &str, month: &str, n: usize) -> Result<Vec<String>, LogError> {
        let path = self.resolve(host, month)?;
        tail_file(&path, n)
    }
}

/// Last `n` lines of a file, in file order.
///
/// Files ending in `.gz` are decompressed as a stream; anything else is read
/// backwards in [`DEFAULT_BLOCK_SIZE`] blocks.
pub fn tail_file(path: &Path, n: usize) -> Result<Vec<String>, LogError> {
    tail_file_with_block_size(path, n, DEFAULT_BLOCK_SIZE)
}

pub fn tail_file_with_block_size(
    path: &Path,
    n: usize,
    block_size: usize,
) -> Result<Vec<String>, LogError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => LogError::NotFound {
            path: path.to_path_buf(),
        },
        _ => LogError::Io(e),
    })?;

    if is_gzip(path) {
        debug!(path = %path.display(), n, "streaming compressed log");
        return Ok(tail_gzip(file, n));
    }

    let mut file = file;
    Ok(tail_reader(&mut file, n, block_size)?)
}

/// Read the last `n` lines of a seekable reader, walking backwards one block
/// at a time until more than `n` line pieces are buffered or the start is
/// reached.
pub fn tail_reader<R: Read + Seek>(
    reader: &mut R,
    n: usize,
    block_size: usize,
) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let size = reader.seek(SeekFrom::End(0))?;
    let block_size = block_size.max(1) as u64;

    // Chunks are collected back to front and joined once at the end
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut newlines = 0usize;
    let mut trailing_newline = false;
    let mut pos = size;
    let mut reads = 0usize;

    while pos > 0 {
        let len = block_size.min(pos);
        pos -= len;
        reader.seek(SeekFrom::Start(pos))?;

        let mut chunk = vec![0u8; len as usize];
        reader.read_exact(&mut chunk)?;
        reads += 1;

        if chunks.is_empty() {
            trailing_newline = chunk.last() == Some(&b'\n');
        }
        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunks.push(chunk);

        // The first piece may be cut off, so stop only once it is surplus
        let pieces = newlines - usize::from(trailing_newline) + 1;
        if pieces > n {
            break;
        }
    }
    debug!(size, reads, "tail read complete");

    let total = chunks.iter().map(Vec::len).sum();
    let mut buf = Vec::with_capacity(total);
    for chunk in chunks.iter().rev() {
        buf.extend_from_slice(chunk);
    }

    Ok(last_lines(&buf, n))
}

/// Split a buffer into lines and decode the last `n` of them
fn last_lines(buf: &[u8], n: usize) -> Vec<String> {
    let pieces = split_lines(buf);
    let start = pieces.len().saturating_sub(n);
    pieces[start..].iter().map(|p| decode_line(p)).collect()
}

/// Split at `\n`, `\r\n` or a lone `\r`. A final terminator does not start
/// another line.
fn split_lines(buf: &[u8]) -> Vec<&[u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            b'\n' => {
                pieces.push(&buf[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                pieces.push(&buf[start..i]);
                i += if buf.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < buf.len() {
        pieces.push(&buf[start..]);
    }
    pieces
}

/// Stream a gzip file from the start, keeping only the last `n` lines.
///
/// A corrupt or truncated stream ends the read; lines decoded before the
/// problem are still returned.
fn tail_gzip<R: Read>(reader: R, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }

    let mut decoder = BufReader::new(MultiGzDecoder::new(reader));
    let mut ring: VecDeque<String> = VecDeque::with_capacity(n.min(RING_PREALLOC));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match decoder.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                for piece in split_lines(&buf) {
                    if ring.len() >= n {
                        ring.pop_front();
                    }
                    ring.push_back(decode_line(piece));
                }
            }
            Err(e) => {
                warn!(error = %e, kept = ring.len(), "compressed log ended early");
                break;
            }
        }
    }

    ring.into()
}

/// Decode one line, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Reject names that would step outside their parent directory
fn check_component(name: &str) -> Result<&str, LogError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(LogError::InvalidComponent(name.to_string())),
    }
}

/// Sorted names of the sub-directories of `dir`
fn child_dirs(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};

    fn numbered(count: usize) -> String {
        (1..=count).map(|i| format!("line {}\n", i)).collect()
    }

    fn expected(from: usize, to: usize) -> Vec<String> {
        (from..=to).map(|i| format!("line {}", i)).collect()
    }

    #[test]
    fn test_tail_returns_all_when_short() {
        let mut cursor = Cursor::new(numbered(5).into_bytes());
        let lines = tail_reader(&mut cursor, 10, DEFAULT_BLOCK_SIZE).unwrap();
        assert_eq!(lines, expected(1, 5));
    }

    #[test]
    fn test_tail_returns_last_n_across_block_sizes() {
        let data = numbered(200);
        for block_size in [1, 2, 3, 7, 16, 64, 100, 1000, DEFAULT_BLOCK_SIZE] {
            for n in [1, 2, 10, 199, 200] {
                let mut cursor = Cursor::new(data.clone().into_bytes());
                let lines = tail_reader(&mut cursor, n, block_size).unwrap();
                assert_eq!(
                    lines,
                    expected(201 - n, 200),
                    "block_size={} n={}",
                    block_size,
                    n
                );
            }
        }
    }

    #[test]
    fn test_tail_without_trailing_newline() {
        let mut cursor = Cursor::new(b"a\nb\nc".to_vec());
        let lines = tail_reader(&mut cursor, 2, 1).unwrap();
        assert_eq!(lines, vec!["b", "c"]);
    }

    #[test]
    fn test_tail_keeps_blank_lines_and_strips_cr() {
        let mut cursor = Cursor::new(b"a\r\n\r\nb\r\n".to_vec());
        let lines = tail_reader(&mut cursor, 10, 2).unwrap();
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn test_tail_splits_on_lone_cr() {
        for block_size in [1, 3, DEFAULT_BLOCK_SIZE] {
            let mut cursor = Cursor::new(b"a\rb\rc\n".to_vec());
            let lines = tail_reader(&mut cursor, 2, block_size).unwrap();
            assert_eq!(lines, vec!["b", "c"], "block size {}", block_size);
        }

        let mut cursor = Cursor::new(b"x\ry\r\nz\r".to_vec());
        let lines = tail_reader(&mut cursor, 10, 2).unwrap();
        assert_eq!(lines, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_tail_empty_and_zero() {
        let mut empty = Cursor::new(Vec::new());
        assert!(tail_reader(&mut empty, 5, 4).unwrap().is_empty());

        let mut cursor = Cursor::new(numbered(3).into_bytes());
        assert!(tail_reader(&mut cursor, 0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_tail_replaces_invalid_utf8() {
        let mut data = b"good one\n".to_vec();
        data.extend_from_slice(&[0xff, 0xfe, b'x', b'\n']);
        data.extend_from_slice("caf\u{e9}\n".as_bytes());
        let mut cursor = Cursor::new(data);
        let lines = tail_reader(&mut cursor, 3, 2).unwrap();
        assert_eq!(lines[0], "good one");
        assert!(lines[1].contains('\u{fffd}'));
        assert!(lines[1].ends_with('x'));
        // The two-byte character straddles a block boundary
        assert_eq!(lines[2], "caf\u{e9}");
    }

    #[test]
    fn test_tail_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = tail_file(&dir.path().join("missing.log"), 10).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_tail_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GZ_LOG_FILE_NAME);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(numbered(50).as_bytes()).unwrap();
        encoder.finish().unwrap();

        assert_eq!(tail_file(&path, 3).unwrap(), expected(48, 50));
        assert_eq!(tail_file(&path, 500).unwrap(), expected(1, 50));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a\rb\r\nc\rd\n").unwrap();
        let bytes = encoder.finish().unwrap();
        assert_eq!(tail_gzip(Cursor::new(bytes), 3), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_tail_gzip_truncated_keeps_decoded_lines() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(numbered(2000).as_bytes()).unwrap();
        let mut bytes = encoder.finish().unwrap();
        bytes.truncate(bytes.len() - 8);

        // Must not panic; whatever was decoded is returned in order
        let lines = tail_gzip(Cursor::new(bytes), 5);
        assert!(lines.len() <= 5);
        for pair in lines.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_source_layout() {
        let dir = tempfile::tempdir().unwrap();
        let month_dir = dir.path().join("fw01").join("2024-05");
        fs::create_dir_all(&month_dir).unwrap();
        fs::create_dir_all(dir.path().join("fw00").join("2024-04")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();
        fs::write(month_dir.join(LOG_FILE_NAME), numbered(10)).unwrap();

        let source = LogSource::new(dir.path());
        assert_eq!(source.hosts(), vec!["fw00", "fw01"]);
        assert_eq!(source.months("fw01"), vec!["2024-05"]);
        assert!(source.months("nope").is_empty());

        assert_eq!(source.tail("fw01", "2024-05", 2).unwrap(), expected(9, 10));
        assert!(source.tail("fw00", "2024-04", 2).unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_prefers_plain_then_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let month_dir = dir.path().join("fw01").join("2024-05");
        fs::create_dir_all(&month_dir).unwrap();
        let source = LogSource::new(dir.path());

        let missing = source.resolve("fw01", "2024-05").unwrap();
        assert!(missing.ends_with(LOG_FILE_NAME));

        fs::write(month_dir.join(GZ_LOG_FILE_NAME), b"").unwrap();
        let gz = source.resolve("fw01", "2024-05").unwrap();
        assert!(gz.ends_with(GZ_LOG_FILE_NAME));

        fs::write(month_dir.join(LOG_FILE_NAME), b"").unwrap();
        let plain = source.resolve("fw01", "2024-05").unwrap();
        assert!(plain.ends_with(LOG_FILE_NAME));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let source = LogSource::new("/var/log/watchguard");
        for bad in ["..", ".", "", "a/b", "/etc"] {
            assert!(
                matches!(
                    source.resolve(bad, "2024-05"),
                    Err(LogError::InvalidComponent(_))
                ),
                "{:?}",
                bad
            );
        }
        assert!(source.resolve("fw01", "../..").is_err());
    }

    #[test]
    fn test_empty_file_is_not_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, b"").unwrap();
        assert!(tail_file(&path, 10).unwrap().is_empty());
    }
}
