//! Single-writer, many-reader fan-out for a job's merged output.
//!
//! One event-loop task per job owns the full log buffer and the set of
//! parked followers. Readers talk to the loop over channels only, so the
//! producer is never blocked by a slow reader, and a reader that joins
//! after the process ended still drains the complete history before EOF.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

const INPUT_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 16;

/// A reader's one-slot response mailbox. `None` signals end of stream.
///
/// Each reader has at most one outstanding request, so a send into the slot
/// never blocks: either the reader is parked waiting or the single buffer
/// spot is free.
type ResponseSlot = mpsc::Sender<Option<Bytes>>;

struct LogRequest {
    start_idx: u64,
    slot: ResponseSlot,
}

/// Handle to a running dispatcher event loop. Held by the owning job and
/// cloned into every reader.
#[derive(Clone)]
pub(crate) struct LogDispatcher {
    request_tx: mpsc::Sender<LogRequest>,
    done_tx: mpsc::Sender<ResponseSlot>,
}

/// Producer side of a dispatcher. The spawn layer clones one sink per
/// output pipe; dropping the last clone closes the input.
#[derive(Clone)]
pub(crate) struct LogSink {
    input_tx: mpsc::Sender<Bytes>,
}

impl LogSink {
    /// Appends an owned chunk to the log. Callers must not alias a reused
    /// read buffer; hand over a copy.
    pub(crate) async fn write(&self, chunk: Bytes) {
        // The loop only goes away once the job and all readers are gone,
        // at which point the chunk has no audience anyway.
        let _ = self.input_tx.send(chunk).await;
    }
}

impl LogDispatcher {
    /// Starts a dispatcher event loop and returns its handle and the
    /// producer sink.
    pub(crate) fn start() -> (Self, LogSink) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(EVENT_CAPACITY);
        let (done_tx, done_rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(run(input_rx, request_rx, done_rx));
        (
            Self {
                request_tx,
                done_tx,
            },
            LogSink { input_tx },
        )
    }

    /// Creates an independent reader positioned at the start of the log.
    ///
    /// The cancel token controls the reader's lifetime: once it fires,
    /// pending and subsequent reads fail with [`JobError::ReaderCancelled`].
    pub(crate) fn new_reader(&self, cancel: CancellationToken) -> LogReader {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        LogReader {
            start_idx: 0,
            slot_tx,
            slot_rx,
            request_tx: self.request_tx.clone(),
            done_tx: self.done_tx.clone(),
            cancel,
            end_of_log: false,
        }
    }
}

/// Dispatcher event loop. Serialized owner of the buffer and followers.
async fn run(
    mut input_rx: mpsc::Receiver<Bytes>,
    mut request_rx: mpsc::Receiver<LogRequest>,
    mut done_rx: mpsc::Receiver<ResponseSlot>,
) {
    let mut full_log: Vec<u8> = Vec::new();
    let mut followers: Vec<ResponseSlot> = Vec::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            chunk = input_rx.recv(), if input_open => match chunk {
                Some(chunk) => {
                    full_log.extend_from_slice(&chunk);
                    for follower in followers.drain(..) {
                        let _ = follower.try_send(Some(chunk.clone()));
                    }
                }
                None => {
                    input_open = false;
                    for follower in followers.drain(..) {
                        let _ = follower.try_send(None);
                    }
                }
            },
            request = request_rx.recv() => match request {
                Some(LogRequest { start_idx, slot }) => {
                    if (start_idx as usize) < full_log.len() {
                        let history = Bytes::copy_from_slice(&full_log[start_idx as usize..]);
                        let _ = slot.try_send(Some(history));
                    } else if input_open {
                        followers.push(slot);
                    } else {
                        let _ = slot.try_send(None);
                    }
                }
                // The job and every reader dropped their handles,
                // nothing can request data anymore.
                None => return,
            },
            Some(slot) = done_rx.recv() => {
                followers.retain(|follower| !follower.same_channel(&slot));
            },
        }
    }
}

/// Reads a job's log from the beginning, following new output as it is
/// produced.
///
/// Reads block until data arrives, the log ends or the cancel token fires.
/// Successive reads return the log bytes in order; once the producer is
/// closed and the history is drained, reads return `Ok(0)` permanently.
pub struct LogReader {
    start_idx: u64,
    slot_tx: ResponseSlot,
    slot_rx: mpsc::Receiver<Option<Bytes>>,
    request_tx: mpsc::Sender<LogRequest>,
    done_tx: mpsc::Sender<ResponseSlot>,
    cancel: CancellationToken,
    end_of_log: bool,
}

impl LogReader {
    /// Reads the next chunk of log data into `buf`, returning the number of
    /// bytes copied. `Ok(0)` means end of stream.
    ///
    /// A chunk larger than `buf` is truncated; the rest is served again on
    /// the next call.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::ReaderCancelled);
        }
        if self.end_of_log {
            return Ok(0);
        }

        let request = LogRequest {
            start_idx: self.start_idx,
            slot: self.slot_tx.clone(),
        };
        if self.request_tx.send(request).await.is_err() {
            self.end_of_log = true;
            return Ok(0);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                // Hand the slot back so the loop forgets this follower.
                let _ = self.done_tx.send(self.slot_tx.clone()).await;
                Err(JobError::ReaderCancelled)
            }
            response = self.slot_rx.recv() => match response.flatten() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    self.start_idx += n as u64;
                    Ok(n)
                }
                None => {
                    self.end_of_log = true;
                    Ok(0)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn read_to_end(reader: &mut LogReader, buf_size: usize) -> String {
        let mut buf = vec![0u8; buf_size];
        let mut collected = Vec::new();
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                return String::from_utf8(collected).unwrap();
            }
            collected.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn single_chunk_then_eof() {
        let (dispatcher, sink) = LogDispatcher::start();
        sink.write(Bytes::from_static(b"hello")).await;
        drop(sink);

        let mut reader = dispatcher.new_reader(CancellationToken::new());
        let mut buf = [0u8; 10];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        // End of stream is sticky.
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_immediate_eof() {
        let (dispatcher, sink) = LogDispatcher::start();
        drop(sink);

        let mut reader = dispatcher.new_reader(CancellationToken::new());
        let mut buf = [0u8; 10];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn small_buffer_truncates_and_resumes() {
        let (dispatcher, sink) = LogDispatcher::start();
        sink.write(Bytes::from_static(b"hello")).await;
        drop(sink);

        let mut reader = dispatcher.new_reader(CancellationToken::new());
        assert_eq!(read_to_end(&mut reader, 2).await, "hello");
    }

    #[tokio::test]
    async fn many_readers_see_the_same_log() {
        const READERS: usize = 100;

        let (dispatcher, sink) = LogDispatcher::start();
        let mut handles = Vec::new();
        for _ in 0..READERS {
            let mut reader = dispatcher.new_reader(CancellationToken::new());
            handles.push(tokio::spawn(
                async move { read_to_end(&mut reader, 3).await },
            ));
        }

        sink.write(Bytes::from_static(b"hel")).await;
        sink.write(Bytes::from_static(b"lo")).await;
        drop(sink);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "hello");
        }
    }

    #[tokio::test]
    async fn late_subscriber_reads_full_history() {
        let (dispatcher, sink) = LogDispatcher::start();
        sink.write(Bytes::from_static(b"first ")).await;
        sink.write(Bytes::from_static(b"second")).await;
        drop(sink);

        // Give the loop a moment to absorb the input before subscribing.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut reader = dispatcher.new_reader(CancellationToken::new());
        assert_eq!(read_to_end(&mut reader, 4).await, "first second");
    }

    #[tokio::test]
    async fn chunked_input_arrives_in_order() {
        let (dispatcher, sink) = LogDispatcher::start();
        let mut reader = dispatcher.new_reader(CancellationToken::new());

        let writer = tokio::spawn(async move {
            for byte in b"Hello slow, slow world!" {
                sink.write(Bytes::copy_from_slice(&[*byte])).await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        assert_eq!(read_to_end(&mut reader, 8).await, "Hello slow, slow world!");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_reader_fails_and_leaves_others_alone() {
        let (dispatcher, sink) = LogDispatcher::start();
        let cancel = CancellationToken::new();
        let mut reader = dispatcher.new_reader(cancel.clone());

        let blocked = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });

        cancel.cancel();
        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(JobError::ReaderCancelled)));

        // The history stays readable for fresh subscribers.
        sink.write(Bytes::from_static(b"hi")).await;
        drop(sink);
        let mut reader = dispatcher.new_reader(CancellationToken::new());
        assert_eq!(read_to_end(&mut reader, 8).await, "hi");
    }

    #[tokio::test]
    async fn cancelled_before_first_read() {
        let (dispatcher, _sink) = LogDispatcher::start();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut reader = dispatcher.new_reader(cancel);
        let mut buf = [0u8; 8];
        let result = reader.read(&mut buf).await;
        assert!(matches!(result, Err(JobError::ReaderCancelled)));
    }

    #[tokio::test]
    async fn follower_receives_data_written_after_subscription() {
        let (dispatcher, sink) = LogDispatcher::start();
        let mut reader = dispatcher.new_reader(CancellationToken::new());

        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = reader.read(&mut buf).await.unwrap();
            (reader, buf[..n].to_vec())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.write(Bytes::from_static(b"live")).await;

        let (mut reader, chunk) = pending.await.unwrap();
        assert_eq!(chunk, b"live");

        drop(sink);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
