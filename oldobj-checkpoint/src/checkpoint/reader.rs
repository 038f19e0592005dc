use crate::checkpoint::error::Result;
use crate::checkpoint::format::{
    self, CheckpointRecord, ClassRecord, StackTraceRecord, ThreadDescriptor, TypeBlock,
};
use crate::checkpoint::ids::{ClassId, TraceId};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reads a checkpoint stream (one chunk file).
pub struct CheckpointReader {
    reader: BufReader<File>,
    /// Stack trace records seen so far, by id.
    pub stack_traces: HashMap<TraceId, StackTraceRecord>,
    /// Thread descriptors seen so far, by thread id.
    pub threads: HashMap<TraceId, ThreadDescriptor>,
    /// Class names seen so far.
    pub classes: HashMap<ClassId, String>,
    /// Stack-trace records per id; more than one means the same trace was emitted twice.
    pub stack_trace_emissions: HashMap<TraceId, usize>,
}

impl CheckpointReader {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            stack_traces: HashMap::new(),
            threads: HashMap::new(),
            classes: HashMap::new(),
            stack_trace_emissions: HashMap::new(),
        })
    }

    pub fn read_header(&mut self) -> std::io::Result<(String, u32)> {
        format::read_header(&mut self.reader)
    }

    /// Read the next raw checkpoint payload without decoding it.
    pub fn read_payload(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        format::read_checkpoint_frame(&mut self.reader)
    }

    /// Read and decode the next checkpoint, accumulating the lookup tables.
    pub fn read_checkpoint(&mut self) -> Result<Option<Vec<TypeBlock>>> {
        let Some(payload) = self.read_payload()? else {
            return Ok(None);
        };
        let blocks = format::read_type_blocks(&payload)?;
        for block in &blocks {
            for record in &block.records {
                self.accumulate(record);
            }
        }
        Ok(Some(blocks))
    }

    fn accumulate(&mut self, record: &CheckpointRecord) {
        match record {
            CheckpointRecord::StackTrace(st) => {
                *self.stack_trace_emissions.entry(st.id).or_insert(0) += 1;
                self.stack_traces.insert(st.id, st.clone());
            }
            CheckpointRecord::Thread(t) => {
                self.threads.insert(t.tid, t.clone());
            }
            CheckpointRecord::Class(ClassRecord { class_id, name }) => {
                self.classes.insert(*class_id, name.clone());
            }
            CheckpointRecord::Edge(_) => {}
        }
    }

    /// Read every remaining checkpoint.
    pub fn read_all(&mut self) -> Result<Vec<Vec<TypeBlock>>> {
        let mut checkpoints = Vec::new();
        while let Some(blocks) = self.read_checkpoint()? {
            checkpoints.push(blocks);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::format::TypeSetBuilder;
    use crate::checkpoint::writer::{CheckpointSink, SimpleBinarySink};

    #[test]
    fn test_reader_accumulates_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stream.bin");
        let mut sink = SimpleBinarySink::new(&path).unwrap();

        let thread = ThreadDescriptor {
            tid: TraceId(3),
            os_thread_id: 30,
            name: "main".into(),
            is_virtual: false,
        };
        let mut payload = thread.to_blob().unwrap().bytes().to_vec();
        payload.extend_from_slice(
            TypeSetBuilder::new()
                .class(ClassId(1), "Leaky")
                .build()
                .unwrap()
                .bytes(),
        );
        sink.write_checkpoint(&payload).unwrap();
        sink.flush().unwrap();

        let mut reader = CheckpointReader::new(&path).unwrap();
        reader.read_header().unwrap();
        let all = reader.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].len(), 2);
        assert_eq!(reader.threads.get(&TraceId(3)), Some(&thread));
        assert_eq!(reader.classes.get(&ClassId(1)).map(String::as_str), Some("Leaky"));
        assert!(reader.stack_traces.is_empty());
    }
}
