use crate::checkpoint::blob::{BlobHandle, BlobKind};
use crate::checkpoint::error::Result;
use crate::checkpoint::format;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Position of a count field reserved with [`CheckpointWriter::reserve_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSlot(usize);

/// Builds one checkpoint payload in memory.
///
/// Contents reach the stream only through [`commit`](Self::commit).
/// [`copy`](Self::copy) snapshots the bytes into a blob and keeps them for a
/// later commit; [`into_blob`](Self::into_blob) moves them out so nothing is
/// committed.
#[derive(Debug, Default)]
pub struct CheckpointWriter {
    buf: Vec<u8>,
}

impl CheckpointWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.buf.try_reserve(additional)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Write a length-prefixed string. Strings longer than `u16::MAX` bytes are
    /// cut at the last char boundary that fits.
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        let mut end = s.len().min(u16::MAX as usize);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.write_bytes(&(end as u16).to_le_bytes())?;
        self.write_bytes(&s.as_bytes()[..end])
    }

    pub fn write_type(&mut self, type_id: u64) -> Result<()> {
        self.write_u64(type_id)
    }

    pub fn write_count(&mut self, count: u32) -> Result<()> {
        self.write_u32(count)
    }

    /// Reserve a count field to be patched once the true count is known.
    pub fn reserve_count(&mut self) -> Result<CountSlot> {
        let slot = CountSlot(self.buf.len());
        self.write_u32(0)?;
        Ok(slot)
    }

    pub fn patch_count(&mut self, slot: CountSlot, count: u32) {
        self.buf[slot.0..slot.0 + 4].copy_from_slice(&count.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Snapshot the current contents into a new blob.
    pub fn copy(&self, kind: BlobKind) -> Result<BlobHandle> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(self.buf.len())?;
        bytes.extend_from_slice(&self.buf);
        Ok(BlobHandle::new(kind, bytes))
    }

    /// Move the contents into a blob; nothing is left to commit.
    pub fn into_blob(self, kind: BlobKind) -> BlobHandle {
        BlobHandle::new(kind, self.buf)
    }

    /// Hand the payload to `sink` as one checkpoint. Empty writers commit nothing.
    pub fn commit(self, sink: &mut dyn CheckpointSink) -> Result<()> {
        if !self.buf.is_empty() {
            sink.write_checkpoint(&self.buf)?;
        }
        Ok(())
    }
}

/// Destination of committed checkpoints.
pub trait CheckpointSink: Send {
    fn write_checkpoint(&mut self, payload: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
    /// True once the current chunk is full and a rotation is due.
    fn needs_rotation(&self) -> bool {
        false
    }
    /// Start a new chunk. The caller must start a new epoch right after.
    fn rotate(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct SimpleBinarySink {
    writer: BufWriter<File>,
}

impl SimpleBinarySink {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        format::write_header(&mut writer)?;
        Ok(Self { writer })
    }
}

impl CheckpointSink for SimpleBinarySink {
    fn write_checkpoint(&mut self, payload: &[u8]) -> std::io::Result<()> {
        format::write_checkpoint_frame(&mut self.writer, payload)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A sink that discards all checkpoints. Useful for benchmarking the passes
/// without I/O costs.
pub struct NullSink;

impl CheckpointSink for NullSink {
    fn write_checkpoint(&mut self, _payload: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A sink that splits the stream into self-contained chunk files.
///
/// - `max_chunk_size`: a rotation is due once the current chunk reaches this size
/// - `max_total_size`: delete oldest chunks when total size across all chunks exceeds this
///
/// Chunks are named `{base_path}.0.bin`, `{base_path}.1.bin`, etc. Each chunk
/// has its own header. Rotation only happens through [`CheckpointSink::rotate`],
/// between passes, so a checkpoint never straddles two chunks.
pub struct RotatingSink {
    base_path: PathBuf,
    max_chunk_size: u64,
    max_total_size: u64,
    /// Tracks (path, size) of chunks oldest-first.
    chunks: VecDeque<(PathBuf, u64)>,
    total_size: u64,
    current_writer: BufWriter<File>,
    current_size: u64,
    next_index: u32,
    /// Set when we've hit the total size cap; silently drops further checkpoints.
    stopped: bool,
}

impl RotatingSink {
    pub fn new(
        base_path: impl Into<PathBuf>,
        max_chunk_size: u64,
        max_total_size: u64,
    ) -> std::io::Result<Self> {
        let base_path = base_path.into();
        if let Some(parent) = base_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let first_path = Self::chunk_path(&base_path, 0);
        let file = File::create(&first_path)?;
        let mut writer = BufWriter::new(file);
        format::write_header(&mut writer)?;
        let header_size = format::HEADER_SIZE as u64;

        let mut chunks = VecDeque::new();
        chunks.push_back((first_path, header_size));

        Ok(Self {
            base_path,
            max_chunk_size,
            max_total_size,
            chunks,
            total_size: header_size,
            current_writer: writer,
            current_size: header_size,
            next_index: 1,
            stopped: false,
        })
    }

    fn chunk_path(base: &Path, index: u32) -> PathBuf {
        let stem = base.file_stem().unwrap_or_default().to_string_lossy();
        let parent = base.parent().unwrap_or(Path::new("."));
        parent.join(format!("{}.{}.bin", stem, index))
    }

    /// Path of the chunk currently being written.
    pub fn current_path(&self) -> Option<&Path> {
        self.chunks.back().map(|(p, _)| p.as_path())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn evict_oldest(&mut self) -> std::io::Result<()> {
        // Always keep at least the current chunk.
        while self.total_size > self.max_total_size && self.chunks.len() > 1 {
            if let Some((path, size)) = self.chunks.pop_front() {
                self.total_size -= size;
                let _ = fs::remove_file(&path);
            }
        }
        // Resumes once eviction brings the total back under budget.
        self.stopped = self.total_size > self.max_total_size;
        Ok(())
    }
}

impl CheckpointSink for RotatingSink {
    fn write_checkpoint(&mut self, payload: &[u8]) -> std::io::Result<()> {
        if self.stopped {
            return Ok(());
        }
        let size = format::checkpoint_frame_size(payload.len()) as u64;
        format::write_checkpoint_frame(&mut self.current_writer, payload)?;
        self.current_size += size;
        self.total_size += size;
        if let Some(last) = self.chunks.back_mut() {
            last.1 = self.current_size;
        }
        if self.total_size > self.max_total_size {
            self.current_writer.flush()?;
            tracing::warn!(
                target: "oldobj_checkpoint",
                total_size = self.total_size,
                max_total_size = self.max_total_size,
                "checkpoint budget exhausted, dropping further checkpoints"
            );
            self.stopped = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.stopped {
            self.current_writer.flush()?;
        }
        Ok(())
    }

    fn needs_rotation(&self) -> bool {
        !self.stopped && self.current_size >= self.max_chunk_size
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.current_writer.flush()?;
        let new_path = Self::chunk_path(&self.base_path, self.next_index);
        self.next_index += 1;
        let file = File::create(&new_path)?;
        self.current_writer = BufWriter::new(file);
        format::write_header(&mut self.current_writer)?;
        let header_size = format::HEADER_SIZE as u64;
        self.current_size = header_size;
        self.total_size += header_size;
        self.chunks.push_back((new_path, header_size));
        tracing::debug!(target: "oldobj_checkpoint", chunk = self.next_index - 1, "rotated chunk");

        self.evict_oldest()
    }
}
