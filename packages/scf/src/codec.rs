use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::bounded::BoundedReader;
use super::error::{Result, ScfError};
use super::hash::ContentHasher;
use super::header::{CURRENT_VERSION, ContainerHeader, STAT_UNKNOWN, header_len};
use super::kind::{AssetKind, CompressionKind};

/// Default zstd level, the speed/ratio sweet spot for bulk game assets.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Caller-supplied levels are clamped into this band so a hostile or buggy
/// caller cannot push the encoder into pathological CPU cost.
const MIN_COMPRESSION_LEVEL: i32 = 1;
const MAX_COMPRESSION_LEVEL: i32 = 19;

/// 64 KiB read buffer, same chunking as the blob streaming paths.
const CHUNK_SIZE: usize = 64 * 1024;

/// Options for [`encode`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub kind: AssetKind,
    /// Requested zstd level; clamped to 1..=19.
    pub level: i32,
    /// Use multithreaded compression when more than one core is available.
    pub multithreaded: bool,
    pub triangle_count: Option<i64>,
    pub vram_usage: Option<i64>,
}

impl EncodeOptions {
    pub fn new(kind: AssetKind) -> Self {
        Self {
            kind,
            level: DEFAULT_COMPRESSION_LEVEL,
            multithreaded: true,
            triangle_count: None,
            vram_usage: None,
        }
    }
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encode `input` into a container written to `output`.
///
/// The output must be positioned at the start of an otherwise empty stream;
/// [`encode_to_path`] handles truncation for files. A zeroed header is
/// written first to reserve the exact header length, the payload is streamed
/// through the fused hash+compress pipeline, and the header is patched in
/// place once the final sizes and digest are known. Nothing buffers the
/// whole artifact in memory.
pub fn encode<R, W>(input: R, output: W, options: &EncodeOptions) -> Result<ContainerHeader>
where
    R: Read,
    W: Write + Seek,
{
    encode_with_progress(input, output, options, |_| {})
}

/// [`encode`] with a progress callback receiving cumulative uncompressed
/// bytes processed.
pub fn encode_with_progress<R, W, F>(
    mut input: R,
    mut output: W,
    options: &EncodeOptions,
    mut progress: F,
) -> Result<ContainerHeader>
where
    R: Read,
    W: Write + Seek,
    F: FnMut(u64),
{
    output.seek(SeekFrom::Start(0))?;
    output.write_all(&vec![0u8; header_len(CURRENT_VERSION)? as usize])?;

    let level = options.level.clamp(MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL);
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut hasher = ContentHasher::new();
    let mut uncompressed: u64 = 0;

    let counting = CountingWriter {
        inner: &mut output,
        written: 0,
    };
    let mut encoder = zstd::stream::write::Encoder::new(counting, level)?;
    if options.multithreaded && workers > 1 {
        encoder.multithread(workers as u32)?;
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }

        uncompressed += n as u64;
        if uncompressed > u32::MAX as u64 {
            return Err(ScfError::SizeOverflow {
                bytes: uncompressed,
            });
        }

        hasher.update(&buf[..n]);
        encoder.write_all(&buf[..n])?;
        progress(uncompressed);
    }

    let counting = encoder.finish()?;
    let compressed = counting.written;

    let header = ContainerHeader {
        version: CURRENT_VERSION,
        hash: hasher.finalize(),
        compression: CompressionKind::Zstd,
        kind: options.kind,
        uncompressed_size: uncompressed as u32,
        compressed_size: u32::try_from(compressed)
            .map_err(|_| ScfError::SizeOverflow { bytes: compressed })?,
        triangle_count: options.triangle_count.unwrap_or(STAT_UNKNOWN),
        vram_usage: options.vram_usage.unwrap_or(STAT_UNKNOWN),
    };

    output.seek(SeekFrom::Start(0))?;
    header.write_to(&mut output)?;
    output.flush()?;

    debug!(
        hash = %header.hash,
        kind = ?header.kind,
        uncompressed = header.uncompressed_size,
        compressed = header.compressed_size,
        level,
        "container encoded"
    );

    Ok(header)
}

/// Encode the file at `input_path` into a container at `output_path`,
/// truncating any pre-existing output.
pub fn encode_to_path(
    input_path: &Path,
    output_path: &Path,
    options: &EncodeOptions,
) -> Result<ContainerHeader> {
    let input = BufReader::new(File::open(input_path)?);
    let output = BufWriter::new(File::create(output_path)?);
    encode(input, output, options)
}

/// Read just the header of an existing container file.
pub fn read_header_from_path(path: &Path) -> Result<ContainerHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    ContainerHeader::read_from(&mut reader)
}

/// Removes the temporary extraction file unless defused.
struct TmpGuard<'a> {
    path: &'a Path,
    defused: bool,
}

impl<'a> TmpGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            defused: false,
        }
    }

    fn defuse(&mut self) {
        self.defused = true;
    }
}

impl Drop for TmpGuard<'_> {
    fn drop(&mut self) {
        if !self.defused {
            let _ = fs::remove_file(self.path);
        }
    }
}

/// Decode a container stream into `dest_dir`.
///
/// The payload is decompressed into `{HASH}.{ext}.tmp` while being
/// re-hashed, verified against the header's declared hash, and atomically
/// renamed to `{HASH}.{ext}`. The rename overwrites, so two extractions of
/// the same content race harmlessly to the same final name. The tmp file is
/// removed on every failure path.
pub fn decode<R: Read>(mut input: R, dest_dir: &Path) -> Result<PathBuf> {
    let header = ContainerHeader::read_from(&mut input)?;

    fs::create_dir_all(dest_dir)?;
    let final_path = dest_dir.join(format!("{}.{}", header.hash, header.kind.as_str()));
    let tmp_path = final_path.with_extension(format!("{}.tmp", header.kind.as_str()));

    let mut guard = TmpGuard::new(&tmp_path);
    let mut tmp_file = File::create(&tmp_path)?;

    // The header's size is untrusted; the bounded reader caps how much the
    // decompressor may hand back regardless of what the payload expands to.
    let decoder = zstd::stream::read::Decoder::new(input)?;
    let mut bounded = BoundedReader::new(decoder, header.uncompressed_size as u64);

    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = bounded.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        tmp_file.write_all(&buf[..n])?;
    }

    tmp_file.flush()?;
    drop(tmp_file);

    let actual = hasher.finalize();
    if actual != header.hash {
        return Err(ScfError::HashMismatch {
            expected: header.hash.to_hex(),
            actual: actual.to_hex(),
        });
    }

    // On Windows a rename does not replace an existing destination.
    #[cfg(windows)]
    let _ = fs::remove_file(&final_path);

    match fs::rename(&tmp_path, &final_path) {
        Ok(()) => {}
        // A concurrent extraction of the same hash may have renamed the
        // shared tmp file already; its output is byte-identical to ours.
        Err(_) if final_path.exists() => {}
        Err(e) => return Err(e.into()),
    }
    guard.defuse();

    debug!(hash = %header.hash, path = %final_path.display(), "container extracted");

    Ok(final_path)
}
