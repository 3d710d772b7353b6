//! Common I/O code using sync I/O.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::bufread::MultiGzDecoder;
use sha2::{Digest, Sha256};

/// Returns whether the path looks like a gzip or bgzip file.
pub fn is_gz<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    [Some(Some("gz")), Some(Some("bgz"))].contains(&path.as_ref().extension().map(|s| s.to_str()))
}

/// Transparently open a possibly-gzipped file for buffered reading.
///
/// Note that decoding of multi-member gzip files is automatically supported,
/// as is needed for `bgzip` files.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if is_gz(path.as_ref()) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path).map(BufReader::new)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read wrapper counting the bytes pulled through it.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the shared byte counter.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.count.clone()
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// A buffered text stream plus the bookkeeping needed for byte progress.
pub struct TrackedReader {
    pub reader: Box<dyn BufRead>,
    /// On-disk bytes consumed so far. The counter sits below the gzip
    /// decoder, so for compressed input it tracks the file on disk rather
    /// than the decompressed logical offset.
    pub offset: Arc<AtomicU64>,
    /// Total on-disk size of the input.
    pub total_bytes: u64,
}

/// Open `path` for reading with transparent gzip decoding and the byte
/// counter attached to the raw file.
pub fn open_tracked<P>(path: P) -> Result<TrackedReader, anyhow::Error>
where
    P: AsRef<Path>,
{
    let total_bytes = std::fs::metadata(path.as_ref())?.len();
    let counting = CountingReader::new(File::open(path.as_ref())?);
    let offset = counting.counter();
    let reader: Box<dyn BufRead> = if is_gz(path.as_ref()) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            counting,
        ))))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        Box::new(BufReader::new(counting))
    };
    Ok(TrackedReader {
        reader,
        offset,
        total_bytes,
    })
}

/// Compute SHA256 sum for file at `path`, hex-encoded.
pub fn sha256_file<P>(path: P) -> Result<String, anyhow::Error>
where
    P: AsRef<Path> + std::fmt::Debug,
{
    tracing::debug!("Computing SHA256 checksum for {:?}", &path);

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let _n = std::io::copy(&mut file, &mut hasher)?;
    let hash = hasher.finalize();
    let mut buf = [0u8; 64];
    let checksum = base16ct::lower::encode_str(&hash, &mut buf).unwrap();
    tracing::debug!(" SHA256 = {}", &checksum);
    Ok(checksum.to_owned())
}
