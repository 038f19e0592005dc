//! Binary checkpoint stream format (v1).
//!
//! ## File layout
//! ```text
//! Header:  MAGIC (8 bytes) + VERSION (u32 LE) = 12 bytes
//!
//! Checkpoint frame:
//!   tag(u8 = 1) + payload_len(u32) + payload(N)
//!
//! Payload: one or more type blocks, back to back:
//!   type_id(u64) + count(u32) + count * record
//!
//! Records:
//!   THREAD(1)          → tid(u64) + os_tid(u64) + name(str) + virtual(u8)
//!   CLASS(2)           → class_id(u64) + name(str)
//!   STACKTRACE(3)      → id(u64) + truncated(u8) + frame_count(u32) + frame_count * frame
//!     frame            → class_id(u64) + method_id(u64) + line(i32) + bci(i32) + type(u8) = 25 bytes
//!   REFERENCE_CHAIN(4) → edge_id(u64) + referrer_id(u64) + field(str)
//!
//!   str              → len(u16) + utf8 bytes(len)
//! ```
//!
//! `truncated` is the inverse of the trace's reached-root flag.
//! All integers are little endian.

use crate::checkpoint::blob::{BlobHandle, BlobKind};
use crate::checkpoint::error::{CheckpointError, Result};
use crate::checkpoint::ids::{ClassId, MethodId, TraceId};
use crate::checkpoint::stacktrace::{FrameType, StackFrame, StackTrace};
use crate::checkpoint::writer::CheckpointWriter;
use serde::Serialize;
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"OLDOBJCK";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 12; // 8 magic + 4 version

const WIRE_CHECKPOINT: u8 = 1;
/// tag(u8) + payload_len(u32)
pub const FRAME_OVERHEAD: usize = 5;

pub const TYPE_THREAD: u64 = 1;
pub const TYPE_CLASS: u64 = 2;
pub const TYPE_STACKTRACE: u64 = 3;
pub const TYPE_REFERENCE_CHAIN: u64 = 4;

pub const FRAME_SIZE: usize = 25;

pub fn write_header(w: &mut impl Write) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())
}

pub fn read_header(r: &mut impl Read) -> io::Result<(String, u32)> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    let mut version = [0u8; 4];
    r.read_exact(&mut version)?;
    Ok((
        String::from_utf8_lossy(&magic).to_string(),
        u32::from_le_bytes(version),
    ))
}

/// Size on disk of a checkpoint frame carrying `payload_len` bytes.
pub const fn checkpoint_frame_size(payload_len: usize) -> usize {
    FRAME_OVERHEAD + payload_len
}

pub fn write_checkpoint_frame(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "checkpoint exceeds 4 GiB"))?;
    w.write_all(&[WIRE_CHECKPOINT])?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)
}

/// Read one checkpoint payload. Returns `Ok(None)` at EOF.
pub fn read_checkpoint_frame(r: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut tag = [0u8; 1];
    if r.read_exact(&mut tag).is_err() {
        return Ok(None);
    }
    if tag[0] != WIRE_CHECKPOINT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame tag {}", tag[0]),
        ));
    }
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as u64;
    // Grows with the bytes actually present, not with the claimed length.
    let mut payload = Vec::new();
    r.by_ref().take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("checkpoint frame truncated: {} of {len} bytes", payload.len()),
        ));
    }
    Ok(Some(payload))
}

/// Serialize a stack trace record, invoking `on_frame` after each frame is written.
pub fn write_stacktrace_with(
    writer: &mut CheckpointWriter,
    trace: &StackTrace,
    mut on_frame: impl FnMut(&StackFrame) -> Result<()>,
) -> Result<()> {
    let frames = trace.frames();
    let frame_count = u32::try_from(frames.len()).map_err(|_| {
        CheckpointError::Format(format!("stack trace {} has too many frames", trace.id().0))
    })?;
    writer.write_u64(trace.id().as_u64())?;
    writer.write_bool(!trace.reached_root())?;
    writer.write_u32(frame_count)?;
    for frame in frames {
        write_frame(writer, frame)?;
        on_frame(frame)?;
    }
    Ok(())
}

pub fn write_stacktrace(writer: &mut CheckpointWriter, trace: &StackTrace) -> Result<()> {
    write_stacktrace_with(writer, trace, |_| Ok(()))
}

fn write_frame(writer: &mut CheckpointWriter, frame: &StackFrame) -> Result<()> {
    writer.write_u64(frame.class_id.as_u64())?;
    writer.write_u64(frame.method_id.as_u64())?;
    writer.write_i32(frame.line)?;
    writer.write_i32(frame.bci)?;
    writer.write_u8(frame.frame_type as u8)
}

/// Descriptor of a thread that allocated a sampled object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadDescriptor {
    pub tid: TraceId,
    pub os_thread_id: u64,
    pub name: String,
    pub is_virtual: bool,
}

impl ThreadDescriptor {
    /// Serialize as a one-record thread block, ready to attach to samples.
    pub fn to_blob(&self) -> Result<BlobHandle> {
        let mut writer = CheckpointWriter::new();
        writer.write_type(TYPE_THREAD)?;
        writer.write_count(1)?;
        writer.write_u64(self.tid.as_u64())?;
        writer.write_u64(self.os_thread_id)?;
        writer.write_str(&self.name)?;
        writer.write_bool(self.is_virtual)?;
        Ok(writer.into_blob(BlobKind::Thread))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRecord {
    pub class_id: ClassId,
    pub name: String,
}

/// Accumulates the classes used by a type-set pass into one class block.
#[derive(Debug, Default)]
pub struct TypeSetBuilder {
    classes: Vec<ClassRecord>,
}

impl TypeSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class_id: ClassId, name: impl Into<String>) -> Self {
        self.classes.push(ClassRecord {
            class_id,
            name: name.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn build(&self) -> Result<BlobHandle> {
        let count = u32::try_from(self.classes.len())
            .map_err(|_| CheckpointError::Format("type set too large".into()))?;
        let mut writer = CheckpointWriter::new();
        writer.write_type(TYPE_CLASS)?;
        writer.write_count(count)?;
        for class in &self.classes {
            writer.write_u64(class.class_id.as_u64())?;
            writer.write_str(&class.name)?;
        }
        Ok(writer.into_blob(BlobKind::TypeSet))
    }
}

/// One edge of a reference chain towards a GC root. `referrer_id == 0` marks the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    pub edge_id: u64,
    pub referrer_id: u64,
    pub field: String,
}

impl EdgeRecord {
    pub fn write(&self, writer: &mut CheckpointWriter) -> Result<()> {
        writer.write_u64(self.edge_id)?;
        writer.write_u64(self.referrer_id)?;
        writer.write_str(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackTraceRecord {
    pub id: TraceId,
    pub reached_root: bool,
    pub frames: Vec<StackFrame>,
}

/// A decoded record from a checkpoint payload.
///
/// NOTE: the `Serialize` impl is for JSON dumps; it does NOT reflect the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record")]
pub enum CheckpointRecord {
    Thread(ThreadDescriptor),
    Class(ClassRecord),
    StackTrace(StackTraceRecord),
    Edge(EdgeRecord),
}

/// A decoded type block: its type id and records, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeBlock {
    pub type_id: u64,
    pub records: Vec<CheckpointRecord>,
}

fn format_err(e: io::Error) -> CheckpointError {
    CheckpointError::Format(e.to_string())
}

fn read_u8(r: &mut impl Read) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(format_err)?;
    Ok(b[0])
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(format_err)?;
    Ok(u32::from_le_bytes(b))
}

fn read_i32(r: &mut impl Read) -> Result<i32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(format_err)?;
    Ok(i32::from_le_bytes(b))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(format_err)?;
    Ok(u64::from_le_bytes(b))
}

fn read_str(r: &mut impl Read) -> Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len).map_err(format_err)?;
    let mut bytes = vec![0u8; u16::from_le_bytes(len) as usize];
    r.read_exact(&mut bytes).map_err(format_err)?;
    String::from_utf8(bytes).map_err(|_| CheckpointError::Format("invalid UTF-8".into()))
}

fn read_record(r: &mut impl Read, type_id: u64) -> Result<CheckpointRecord> {
    let record = match type_id {
        TYPE_THREAD => CheckpointRecord::Thread(ThreadDescriptor {
            tid: TraceId(read_u64(r)?),
            os_thread_id: read_u64(r)?,
            name: read_str(r)?,
            is_virtual: read_u8(r)? != 0,
        }),
        TYPE_CLASS => CheckpointRecord::Class(ClassRecord {
            class_id: ClassId(read_u64(r)?),
            name: read_str(r)?,
        }),
        TYPE_STACKTRACE => {
            let id = TraceId(read_u64(r)?);
            let reached_root = read_u8(r)? == 0;
            let frame_count = read_u32(r)? as usize;
            // Cap the up-front allocation; a corrupt count fails on read instead.
            let mut frames = Vec::with_capacity(frame_count.min(1024));
            for _ in 0..frame_count {
                let class_id = ClassId(read_u64(r)?);
                let method_id = MethodId(read_u64(r)?);
                let line = read_i32(r)?;
                let bci = read_i32(r)?;
                let frame_type = FrameType::from_u8(read_u8(r)?);
                frames.push(StackFrame {
                    class_id,
                    method_id,
                    line,
                    bci,
                    frame_type,
                });
            }
            CheckpointRecord::StackTrace(StackTraceRecord {
                id,
                reached_root,
                frames,
            })
        }
        TYPE_REFERENCE_CHAIN => CheckpointRecord::Edge(EdgeRecord {
            edge_id: read_u64(r)?,
            referrer_id: read_u64(r)?,
            field: read_str(r)?,
        }),
        other => {
            return Err(CheckpointError::Format(format!("unknown type id {other}")));
        }
    };
    Ok(record)
}

/// Decode every type block in a checkpoint payload.
pub fn read_type_blocks(payload: &[u8]) -> Result<Vec<TypeBlock>> {
    let mut cursor = io::Cursor::new(payload);
    let mut blocks = Vec::new();
    while (cursor.position() as usize) < payload.len() {
        let type_id = read_u64(&mut cursor)?;
        let count = read_u32(&mut cursor)?;
        let mut records = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            records.push(read_record(&mut cursor, type_id)?);
        }
        blocks.push(TypeBlock { type_id, records });
    }
    Ok(blocks)
}
