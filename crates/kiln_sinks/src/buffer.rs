//! Threshold-buffered record sink.

use std::time::Duration;

use tracing::debug;

use kiln_protocol::ResultRecord;

/// Per-flush (and cumulative) outcome counters.
///
/// Failures are counted per record or per destination operation; one
/// record's failure never aborts its siblings in the same flush.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteSummary {
    /// Records accepted by the destination.
    pub written: usize,
    /// Records or destination operations that failed.
    pub failed: usize,
    /// Primary-table update operations (table destinations only).
    pub request_updates: usize,
    /// Detail-row put operations (table destinations only).
    pub detail_puts: usize,
    /// Wall time spent inside the destination.
    pub elapsed: Duration,
}

impl WriteSummary {
    pub fn merge(&mut self, other: &WriteSummary) {
        self.written += other.written;
        self.failed += other.failed;
        self.request_updates += other.request_updates;
        self.detail_puts += other.detail_puts;
        self.elapsed += other.elapsed;
    }
}

/// A destination for result records.
pub trait RecordWriter {
    fn write_batch(
        &mut self,
        records: Vec<ResultRecord>,
    ) -> impl std::future::Future<Output = WriteSummary> + Send;
}

/// Buffers records and flushes in `chunk_size` batches.
///
/// After any successful `put` the buffer holds fewer than `chunk_size`
/// records. `finish` flushes the remainder and must be called on every
/// exit path, success or failure.
pub struct BufferedSink<W> {
    writer: W,
    buffer: Vec<ResultRecord>,
    chunk_size: usize,
    summary: WriteSummary,
}

impl<W: RecordWriter> BufferedSink<W> {
    pub fn new(writer: W, chunk_size: usize) -> Self {
        Self {
            writer,
            buffer: Vec::new(),
            chunk_size: chunk_size.max(1),
            summary: WriteSummary::default(),
        }
    }

    /// Buffer one record, flushing if the threshold is reached.
    ///
    /// Returns the number of records flushed by this call (0 while
    /// buffering).
    pub async fn put(&mut self, record: ResultRecord) -> usize {
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            self.flush().await
        } else {
            0
        }
    }

    pub async fn put_many(&mut self, records: impl IntoIterator<Item = ResultRecord>) -> usize {
        let mut flushed = 0;
        for record in records {
            flushed += self.put(record).await;
        }
        flushed
    }

    /// Flush the buffer unconditionally. Empty buffer is a no-op.
    pub async fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let batch = std::mem::take(&mut self.buffer);
        let count = batch.len();
        debug!(records = count, "flushing buffered records");
        let summary = self.writer.write_batch(batch).await;
        self.summary.merge(&summary);
        count
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn summary(&self) -> &WriteSummary {
        &self.summary
    }

    /// Flush the remainder and hand back the writer with the cumulative
    /// summary.
    pub async fn finish(mut self) -> (W, WriteSummary) {
        self.flush().await;
        (self.writer, self.summary)
    }
}
