use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: LogStream,
    pub bytes: Vec<u8>,
}

impl LogChunk {
    pub fn stdout(text: &str) -> Self {
        Self {
            stream: LogStream::Stdout,
            bytes: text.as_bytes().to_vec(),
        }
    }

    pub fn stderr(text: &str) -> Self {
        Self {
            stream: LogStream::Stderr,
            bytes: text.as_bytes().to_vec(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Receives container output as it arrives.
pub trait LogSink: Send {
    fn write_chunk(&mut self, chunk: &LogChunk) -> std::io::Result<()>;
}

/// Forwards container output to this process's stdout/stderr, flushing
/// after every chunk.
#[derive(Debug, Default)]
pub struct StdioSink;

impl LogSink for StdioSink {
    fn write_chunk(&mut self, chunk: &LogChunk) -> std::io::Result<()> {
        match chunk.stream {
            LogStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&chunk.bytes)?;
                out.flush()
            }
            LogStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&chunk.bytes)?;
                err.flush()
            }
        }
    }
}

/// Collects chunks in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub chunks: Vec<LogChunk>,
}

impl MemorySink {
    pub fn text(&self) -> String {
        self.chunks.iter().map(LogChunk::text).collect()
    }
}

impl LogSink for MemorySink {
    fn write_chunk(&mut self, chunk: &LogChunk) -> std::io::Result<()> {
        self.chunks.push(chunk.clone());
        Ok(())
    }
}
