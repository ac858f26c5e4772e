//! Data-channel file transfer
//!
//! A `sendfile` announcement opens a fresh file; binary payloads are appended
//! until the declared size is reached.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const FALLBACK_NAME: &str = "upload.bin";

/// Progress after a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferProgress {
    /// More bytes expected
    Partial { received: u64, expected: u64 },
    /// Declared size reached; the file is flushed
    Complete(PathBuf),
}

/// One in-flight upload
#[derive(Debug)]
pub struct FileTransfer {
    path: PathBuf,
    expected: u64,
    received: u64,
    file: File,
}

impl FileTransfer {
    /// Create `dir/<name>` (truncating) for an upload of `expected` bytes
    ///
    /// Only the final component of `name` is used.
    pub async fn open(dir: &Path, name: &str, expected: u64) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize(name));
        let file = File::create(&path).await?;

        Ok(Self {
            path,
            expected,
            received: 0,
            file,
        })
    }

    /// Append a chunk; bytes past the declared size are discarded
    pub async fn append(&mut self, chunk: &[u8]) -> io::Result<TransferProgress> {
        let room = self.expected.saturating_sub(self.received);
        let take = (chunk.len() as u64).min(room) as usize;
        if take > 0 {
            self.file.write_all(&chunk[..take]).await?;
            self.received += take as u64;
        }

        if self.is_complete() {
            self.file.flush().await?;
            Ok(TransferProgress::Complete(self.path.clone()))
        } else {
            Ok(TransferProgress::Partial {
                received: self.received,
                expected: self.expected,
            })
        }
    }

    /// Whether the declared size has been reached
    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }

    /// Flush and close whatever has been written
    pub async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }
}

fn sanitize(name: &str) -> String {
    // Browsers may send either separator
    let last = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        FALLBACK_NAME.to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("clip.wav"), "clip.wav");
        assert_eq!(sanitize("../../etc/passwd"), "passwd");
        assert_eq!(sanitize("C:\\Users\\me\\a.mp3"), "a.mp3");
        assert_eq!(sanitize(".."), FALLBACK_NAME);
        assert_eq!(sanitize(""), FALLBACK_NAME);
        assert_eq!(sanitize("dir/"), FALLBACK_NAME);
    }

    #[tokio::test]
    async fn test_complete_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = assert_ok!(FileTransfer::open(dir.path(), "a.bin", 8).await);

        assert_eq!(
            t.append(b"abcd").await.unwrap(),
            TransferProgress::Partial {
                received: 4,
                expected: 8
            }
        );
        let done = t.append(b"efgh").await.unwrap();
        assert_eq!(done, TransferProgress::Complete(dir.path().join("a.bin")));

        t.close().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_excess_bytes_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = FileTransfer::open(dir.path(), "a.bin", 3).await.unwrap();

        assert!(matches!(
            t.append(b"abcdef").await.unwrap(),
            TransferProgress::Complete(_)
        ));
        t.close().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_partial_close_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = FileTransfer::open(dir.path(), "nested/../p.bin", 100).await.unwrap();

        t.append(&[1u8; 10]).await.unwrap();
        assert!(!t.is_complete());
        assert_eq!(t.received(), 10);
        t.close().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("p.bin")).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_zero_size_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let t = FileTransfer::open(dir.path(), "empty", 0).await.unwrap();
        assert!(t.is_complete());
    }
}
