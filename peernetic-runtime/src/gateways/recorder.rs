//! Recording and replaying message traffic.
//!
//! [`RecorderGateway`] captures every batch submitted to its shuttle into a
//! file of length-prefixed blocks; [`ReplayerGateway`] reads such a file
//! back, sleeping the recorded inter-block gaps and re-addressing the
//! messages under a caller-chosen destination prefix. Together they let a
//! live run be captured once and replayed against a fresh actor offline.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! file  := block*
//! block := u32 len, u64 unix-millis, u32 count, entry{count}
//! entry := u32 src-len, src-utf8, u32 suffix-len, suffix-utf8,
//!          u32 payload-len, payload-bytes
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{error, warn};

use peernetic_core::{Address, AddressError, Message, SerializeError, Serializer, Shuttle};

use crate::bus::{Bus, BusRecord, BusShuttle};
use crate::gateway::InputGateway;

/// Errors from recording or replaying.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Underlying file I/O failed.
    #[error("recorder i/o failed: {0}")]
    Io(#[from] io::Error),
    /// A payload could not cross the serialization boundary.
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    /// A recorded address failed to parse.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// The file contents did not match the block layout.
    #[error("malformed recording: {0}")]
    MalformedRecording(String),
}

const DRAIN_BATCH: usize = 64;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Gateway that writes every delivered batch to a recording file.
pub struct RecorderGateway {
    prefix: String,
    bus: Bus,
    worker: Option<JoinHandle<Result<(), RecorderError>>>,
}

impl RecorderGateway {
    /// Create a recorder listening under `prefix`, writing to `path`.
    pub fn new(
        prefix: impl Into<String>,
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, RecorderError> {
        let prefix = prefix.into();
        let file = File::create(path)?;
        let bus = Bus::new();
        let worker_bus = bus.clone();
        let worker_prefix = prefix.clone();
        let worker = std::thread::Builder::new()
            .name(format!("recorder-gateway-{prefix}"))
            .spawn(move || record_loop(worker_prefix, worker_bus, file, serializer))
            .expect("failed to spawn recorder gateway thread");
        Ok(RecorderGateway {
            prefix,
            bus,
            worker: Some(worker),
        })
    }

    /// The prefix this recorder listens under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stop recording, flush, and surface any write error. Idempotent.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        self.bus.close();
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_else(|_| {
                Err(RecorderError::MalformedRecording(
                    "recorder worker panicked".to_string(),
                ))
            }),
            None => Ok(()),
        }
    }
}

impl InputGateway for RecorderGateway {
    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        Arc::new(BusShuttle::new(self.prefix.clone(), self.bus.clone()))
    }
}

impl Drop for RecorderGateway {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(prefix = %self.prefix, error = %e, "recorder close failed");
        }
    }
}

fn record_loop(
    prefix: String,
    bus: Bus,
    file: File,
    serializer: Arc<dyn Serializer>,
) -> Result<(), RecorderError> {
    let prefix_address =
        Address::of_element(prefix.clone()).expect("gateway prefix is non-empty");
    let mut writer = BufWriter::new(file);
    loop {
        for record in bus.drain(DRAIN_BATCH, DRAIN_TIMEOUT) {
            match record {
                BusRecord::Deliver(messages) => {
                    let block = encode_block(&prefix_address, &messages, serializer.as_ref());
                    writer.write_all(&(block.len() as u32).to_be_bytes())?;
                    writer.write_all(&block)?;
                }
                BusRecord::Close => {
                    writer.flush()?;
                    return Ok(());
                }
                other => warn!(record = ?other, "recorder ignoring non-delivery record"),
            }
        }
    }
}

fn encode_block(
    prefix_address: &Address,
    messages: &[Message],
    serializer: &dyn Serializer,
) -> BytesMut {
    let mut entries = BytesMut::new();
    let mut count: u32 = 0;
    for message in messages {
        let suffix = match message.destination().remove_prefix(prefix_address) {
            Ok(suffix) => suffix,
            Err(e) => {
                warn!(error = %e, "recorded message not under recorder prefix, skipping");
                continue;
            }
        };
        let payload_bytes = match serializer.serialize(message.payload()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "payload not serializable, skipping");
                continue;
            }
        };
        put_str(&mut entries, &message.source().to_string());
        put_str(&mut entries, &suffix.to_string());
        entries.put_u32(payload_bytes.len() as u32);
        entries.put_slice(&payload_bytes);
        count += 1;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64;
    let mut block = BytesMut::with_capacity(12 + entries.len());
    block.put_u64(timestamp);
    block.put_u32(count);
    block.put_slice(&entries);
    block
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Replays a recording file into a destination shuttle, preserving the
/// recorded pacing.
pub struct ReplayerGateway {
    worker: JoinHandle<Result<(), RecorderError>>,
}

impl ReplayerGateway {
    /// Start replaying `path`. Each recorded message is re-addressed to
    /// `destination_prefix ++ recorded-suffix` and submitted to
    /// `destination`; the thread sleeps the real gap between consecutive
    /// block timestamps.
    pub fn replay(
        destination: Arc<dyn Shuttle>,
        destination_prefix: Address,
        path: impl AsRef<Path>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self, RecorderError> {
        let file = File::open(path)?;
        let worker = std::thread::Builder::new()
            .name("replayer-gateway".to_string())
            .spawn(move || replay_loop(file, destination, destination_prefix, serializer))
            .expect("failed to spawn replayer gateway thread");
        Ok(ReplayerGateway { worker })
    }

    /// Wait for the whole recording to be replayed.
    pub fn join(self) -> Result<(), RecorderError> {
        self.worker.join().unwrap_or_else(|_| {
            Err(RecorderError::MalformedRecording(
                "replayer worker panicked".to_string(),
            ))
        })
    }
}

fn replay_loop(
    file: File,
    destination: Arc<dyn Shuttle>,
    destination_prefix: Address,
    serializer: Arc<dyn Serializer>,
) -> Result<(), RecorderError> {
    let mut reader = BufReader::new(file);
    let mut previous_timestamp: Option<u64> = None;

    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut block = vec![0u8; len];
        reader.read_exact(&mut block)?;

        let (timestamp, messages) = decode_block(
            Bytes::from(block),
            &destination_prefix,
            serializer.as_ref(),
        )?;
        if let Some(previous) = previous_timestamp {
            let gap = timestamp.saturating_sub(previous);
            if gap > 0 {
                std::thread::sleep(Duration::from_millis(gap));
            }
        }
        previous_timestamp = Some(timestamp);

        if !messages.is_empty() {
            destination.submit(messages);
        }
    }
}

fn decode_block(
    mut block: Bytes,
    destination_prefix: &Address,
    serializer: &dyn Serializer,
) -> Result<(u64, Vec<Message>), RecorderError> {
    if block.remaining() < 12 {
        return Err(RecorderError::MalformedRecording(
            "block shorter than its header".to_string(),
        ));
    }
    let timestamp = block.get_u64();
    let count = block.get_u32();

    let mut messages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let source: Address = get_str(&mut block)?.parse()?;
        let suffix: Address = get_str(&mut block)?.parse()?;
        let payload_len = get_u32(&mut block)? as usize;
        if block.remaining() < payload_len {
            return Err(RecorderError::MalformedRecording(
                "payload extends past block".to_string(),
            ));
        }
        let payload = serializer.deserialize(&block.copy_to_bytes(payload_len))?;
        messages.push(Message::new(
            source,
            destination_prefix.append_suffix(&suffix),
            payload,
        ));
    }
    Ok((timestamp, messages))
}

fn get_u32(buf: &mut Bytes) -> Result<u32, RecorderError> {
    if buf.remaining() < 4 {
        return Err(RecorderError::MalformedRecording(
            "truncated field length".to_string(),
        ));
    }
    Ok(buf.get_u32())
}

fn get_str(buf: &mut Bytes) -> Result<String, RecorderError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(RecorderError::MalformedRecording(
            "truncated string field".to_string(),
        ));
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec())
        .map_err(|_| RecorderError::MalformedRecording("string field not utf-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernetic_core::{payload, JsonSerializer, RecordingShuttle};

    #[test]
    fn record_then_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.rec");
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer::<String>::new());

        let mut recorder =
            RecorderGateway::new("rec", &path, Arc::clone(&serializer)).unwrap();
        let incoming = recorder.incoming_shuttle();
        incoming.submit(vec![
            Message::new(
                "src:a".parse().unwrap(),
                "rec:echoer:sub".parse().unwrap(),
                payload("one".to_string()),
            ),
            Message::new(
                "src:b".parse().unwrap(),
                "rec:echoer".parse().unwrap(),
                payload("two".to_string()),
            ),
        ]);
        incoming.submit(vec![Message::new(
            "src:a".parse().unwrap(),
            "rec:echoer".parse().unwrap(),
            payload("three".to_string()),
        )]);
        // Give the worker a moment to drain before closing.
        std::thread::sleep(Duration::from_millis(50));
        recorder.close().unwrap();

        let sink = Arc::new(RecordingShuttle::new("replayed"));
        let replayer = ReplayerGateway::replay(
            sink.clone() as Arc<dyn Shuttle>,
            "replayed".parse().unwrap(),
            &path,
            serializer,
        )
        .unwrap();
        replayer.join().unwrap();

        let messages = sink.take();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].source().to_string(), "src:a");
        assert_eq!(messages[0].destination().to_string(), "replayed:echoer:sub");
        assert_eq!(messages[0].payload_as::<String>().unwrap(), "one");
        assert_eq!(messages[2].payload_as::<String>().unwrap(), "three");
    }

    #[test]
    fn unserializable_payloads_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.rec");
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer::<String>::new());

        let mut recorder =
            RecorderGateway::new("rec", &path, Arc::clone(&serializer)).unwrap();
        recorder.incoming_shuttle().submit(vec![
            Message::new(
                "src:a".parse().unwrap(),
                "rec:x".parse().unwrap(),
                payload(123u64), // not a String
            ),
            Message::new(
                "src:a".parse().unwrap(),
                "rec:x".parse().unwrap(),
                payload("kept".to_string()),
            ),
        ]);
        std::thread::sleep(Duration::from_millis(50));
        recorder.close().unwrap();

        let sink = Arc::new(RecordingShuttle::new("replayed"));
        ReplayerGateway::replay(
            sink.clone() as Arc<dyn Shuttle>,
            "replayed".parse().unwrap(),
            &path,
            serializer,
        )
        .unwrap()
        .join()
        .unwrap();

        let messages = sink.take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload_as::<String>().unwrap(), "kept");
    }

    #[test]
    fn truncated_file_is_a_malformed_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rec");
        std::fs::write(&path, [0, 0, 0, 50, 1, 2, 3]).unwrap();

        let sink = Arc::new(RecordingShuttle::new("replayed"));
        let result = ReplayerGateway::replay(
            sink as Arc<dyn Shuttle>,
            "replayed".parse().unwrap(),
            &path,
            Arc::new(JsonSerializer::<String>::new()),
        )
        .unwrap()
        .join();
        assert!(result.is_err());
    }
}
