use std::collections::VecDeque;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// The sender's source of data. Implementations are drained exactly once: after returning
///  `None` for the first time, they must keep returning `None`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ByteSource: Send {
    /// the next chunk of at most `max_len` (and at least one) bytes, or `None` at the end of input
    async fn next_chunk(&mut self, max_len: usize) -> anyhow::Result<Option<Bytes>>;
}

/// The receiver's destination for data. `write()` is called once per delivered DATA packet, in
///  sequence order, without gaps or duplicates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ByteSink: Send {
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;

    async fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reads chunks from an [AsyncRead], typically a file. Short reads produce short chunks.
pub struct ReaderSource<R: AsyncRead + Unpin + Send> {
    reader: R,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> ReaderSource<R> {
        ReaderSource {
            reader,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for ReaderSource<R> {
    async fn next_chunk(&mut self, max_len: usize) -> anyhow::Result<Option<Bytes>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(max_len);
        let num_read = self.reader.read(&mut buf).await?;
        if num_read == 0 {
            trace!("reader source: end of input");
            self.exhausted = true;
            return Ok(None);
        }

        buf.truncate(num_read);
        Ok(Some(buf.freeze()))
    }
}

/// Hands out an in-memory buffer in chunks of the requested size
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> MemorySource {
        MemorySource { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn next_chunk(&mut self, max_len: usize) -> anyhow::Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let len = max_len.min(self.data.len());
        Ok(Some(self.data.split_to(len)))
    }
}

/// Hands out a predefined sequence of chunks regardless of the requested size - this is for
///  sources with natural record boundaries, and for tests that need precise control over the
///  packet payloads
pub struct ChunkSource {
    chunks: VecDeque<Bytes>,
}

impl ChunkSource {
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> ChunkSource {
        ChunkSource {
            chunks: chunks.into_iter()
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl ByteSource for ChunkSource {
    async fn next_chunk(&mut self, max_len: usize) -> anyhow::Result<Option<Bytes>> {
        match self.chunks.pop_front() {
            None => Ok(None),
            Some(mut chunk) => {
                if chunk.len() > max_len {
                    let rest = chunk.split_off(max_len);
                    self.chunks.push_front(rest);
                }
                Ok(Some(chunk))
            }
        }
    }
}

pub struct WriterSink<W: AsyncWrite + Unpin + Send> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> WriterSink<W> {
        WriterSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for WriterSink<W> {
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ByteSink for Vec<u8> {
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}
