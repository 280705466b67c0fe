// Stream client for the webcast push connection
//
// One task owns the connection and runs the receive loop: every binary message
// is decoded as a PushFrame, its batch is checked for `need_ack`, and the
// still-compressed payload is handed to the bounded queue. Outbound frames (acks
// from the receive loop, keepalives from the heartbeat task) go through a
// single writer task. The heartbeat task lives as long as the connection.
//
// Transport errors end the run; restarting is left to the process supervisor.

use crate::bootstrap::Session;
use crate::codec;
use crate::config::PickerConfig;
use crate::error::{PickerError, PickerResult};
use crate::queue::QueueSender;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub frames_received: u64,
    pub payloads_forwarded: u64,
    pub acks_sent: u64,
    pub heartbeats_sent: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct StreamCounters {
    frames_received: AtomicU64,
    payloads_forwarded: AtomicU64,
    acks_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    decode_failures: AtomicU64,
}

impl StreamCounters {
    fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            payloads_forwarded: self.payloads_forwarded.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct StreamClient {
    url: String,
    cookie: String,
    user_agent: String,
    heartbeat_interval: Duration,
    counters: Arc<StreamCounters>,
}

impl StreamClient {
    pub fn new(config: &PickerConfig, session: &Session) -> Self {
        Self::with_url(
            config.stream_url(&session.room_id),
            session.cookie_header(),
            config.user_agent.clone(),
            config.heartbeat_interval,
        )
    }

    pub fn with_url(
        url: String,
        cookie: String,
        user_agent: String,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            url,
            cookie,
            user_agent,
            heartbeat_interval,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    fn build_request(&self) -> PickerResult<Request> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(COOKIE, header_value(&self.cookie)?);
        headers.insert(USER_AGENT, header_value(&self.user_agent)?);
        Ok(request)
    }

    /// Connect and forward payloads until the connection closes or fails
    pub async fn run(&self, queue: QueueSender) -> PickerResult<()> {
        info!("Connecting to push endpoint {}", self.url);

        let request = self.build_request()?;
        let (ws_stream, _) = connect_async(request).await?;
        info!("Push connection established");

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_task(write, outbound_rx));
        let heartbeat = tokio::spawn(heartbeat_task(
            outbound_tx.clone(),
            self.heartbeat_interval,
            cancel.clone(),
            Arc::clone(&self.counters),
        ));

        let result = self.read_loop(read, &outbound_tx, &queue).await;

        cancel.cancel();
        drop(outbound_tx);
        let _ = heartbeat.await;
        let _ = writer.await;

        let stats = self.stats();
        info!(
            "Push connection ended: {} frames, {} forwarded, {} acks, {} heartbeats, {} decode failures",
            stats.frames_received,
            stats.payloads_forwarded,
            stats.acks_sent,
            stats.heartbeats_sent,
            stats.decode_failures
        );

        result
    }

    async fn read_loop<S>(
        &self,
        mut read: S,
        outbound: &mpsc::UnboundedSender<Message>,
        queue: &QueueSender,
    ) -> PickerResult<()>
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    self.handle_frame(&data, outbound, queue).await?;
                }
                Ok(Message::Text(text)) => {
                    debug!("Ignoring text message ({} bytes)", text.len());
                }
                Ok(Message::Close(frame)) => {
                    info!("Push connection closed by server: {:?}", frame);
                    return Ok(());
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => {
                    error!("Push connection error: {}", e);
                    return Err(e.into());
                }
            }
        }

        info!("Push stream ended");
        Ok(())
    }

    /// Ack if the batch asks for it, then forward the compressed payload.
    ///
    /// Only a closed queue is fatal; undecodable frames are logged and skipped.
    async fn handle_frame(
        &self,
        data: &[u8],
        outbound: &mpsc::UnboundedSender<Message>,
        queue: &QueueSender,
    ) -> PickerResult<()> {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        debug!("Received frame: {} bytes", data.len());

        let frame = match codec::decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping undecodable frame: {}", e);
                return Ok(());
            }
        };

        if codec::is_control_frame(&frame) || frame.payload.is_empty() {
            debug!("Control frame '{}' (log id {})", frame.payload_type, frame.log_id);
            return Ok(());
        }

        match codec::decode_batch(&frame.payload) {
            Ok(batch) if batch.need_ack => {
                let ack = codec::encode_ack(frame.log_id, &batch.internal_ext);
                if outbound.send(Message::Binary(ack.into())).is_err() {
                    warn!("Failed to send ack for log id {}: writer closed", frame.log_id);
                } else {
                    self.counters.acks_sent.fetch_add(1, Ordering::Relaxed);
                    debug!("Acked log id {}", frame.log_id);
                }
            }
            Ok(_) => {}
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Undecodable batch in frame {}: {}", frame.log_id, e);
            }
        }

        queue.put(frame.payload).await?;
        self.counters
            .payloads_forwarded
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn header_value(value: &str) -> PickerResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| PickerError::InvalidConfig(format!("invalid header value: {}", e)))
}

/// Single writer for the connection's outbound half
async fn write_task<W>(mut write: W, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to write to push connection: {}", e);
            break;
        }
    }

    debug!("Push writer task ended");
}

/// Sends a heartbeat frame every `period` until cancelled
async fn heartbeat_task(
    outbound: mpsc::UnboundedSender<Message>,
    period: Duration,
    cancel: CancellationToken,
    counters: Arc<StreamCounters>,
) {
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if outbound.send(Message::Binary(codec::encode_heartbeat().into())).is_err() {
                    break;
                }
                counters.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Sent heartbeat");
            }
        }
    }

    debug!("Heartbeat task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::{batch_payload, chat_message};
    use crate::proto::{PushFrame, Response};
    use crate::queue::{payload_queue, Received};
    use prost::Message as _;
    use tokio::time::Instant;

    fn client() -> StreamClient {
        StreamClient::with_url(
            "ws://127.0.0.1:1/push".to_string(),
            "ttwid=test".to_string(),
            "test-agent".to_string(),
            Duration::from_secs(10),
        )
    }

    fn data_frame(log_id: u64, need_ack: bool) -> Vec<u8> {
        let payload = codec::encode_batch(&Response {
            messages: vec![chat_message(1, "提问 hi", 100)],
            internal_ext: format!("ext-{}", log_id),
            need_ack,
            ..Default::default()
        })
        .unwrap();

        PushFrame {
            log_id,
            payload_type: codec::PAYLOAD_TYPE_DATA.to_string(),
            payload,
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn binary(message: Message) -> Vec<u8> {
        match message {
            Message::Binary(data) => data.to_vec(),
            other => panic!("expected binary message, got {:?}", other),
        }
    }

    #[test]
    fn test_request_carries_session_headers() {
        let request = client().build_request().unwrap();
        assert_eq!(request.headers()[COOKIE], "ttwid=test");
        assert_eq!(request.headers()[USER_AGENT], "test-agent");
    }

    #[tokio::test]
    async fn test_need_ack_sends_one_ack_and_forwards_payload() {
        let client = client();
        let (queue_tx, mut queue_rx) = payload_queue(8).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        client
            .handle_frame(&data_frame(77, true), &out_tx, &queue_tx)
            .await
            .unwrap();

        let ack = codec::decode_frame(&binary(out_rx.try_recv().unwrap())).unwrap();
        assert_eq!(ack.payload_type, codec::PAYLOAD_TYPE_ACK);
        assert_eq!(ack.log_id, 77);
        assert_eq!(ack.payload, b"ext-77");
        assert!(out_rx.try_recv().is_err());

        let deadline = Instant::now() + Duration::from_secs(1);
        match queue_rx.get_with_timeout(deadline).await.unwrap() {
            Received::Payload(payload) => {
                let batch = codec::decode_batch(&payload).unwrap();
                assert_eq!(batch.messages.len(), 1);
            }
            Received::Empty => panic!("payload was not forwarded"),
        }

        let stats = client.stats();
        assert_eq!(stats.acks_sent, 1);
        assert_eq!(stats.payloads_forwarded, 1);
    }

    #[tokio::test]
    async fn test_no_ack_when_not_requested() {
        let client = client();
        let (queue_tx, queue_rx) = payload_queue(8).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        client
            .handle_frame(&data_frame(5, false), &out_tx, &queue_tx)
            .await
            .unwrap();

        assert!(out_rx.try_recv().is_err());
        assert_eq!(queue_rx.len(), 1);
    }

    #[tokio::test]
    async fn test_control_and_garbage_frames_are_not_forwarded() {
        let client = client();
        let (queue_tx, queue_rx) = payload_queue(8).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        client
            .handle_frame(&codec::encode_heartbeat(), &out_tx, &queue_tx)
            .await
            .unwrap();
        client
            .handle_frame(&[0xff, 0xff, 0xff], &out_tx, &queue_tx)
            .await
            .unwrap();

        assert!(out_rx.try_recv().is_err());
        assert!(queue_rx.is_empty());
        assert_eq!(client.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_undecodable_batch_is_still_forwarded() {
        let client = client();
        let (queue_tx, queue_rx) = payload_queue(8).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let frame = PushFrame {
            log_id: 9,
            payload_type: codec::PAYLOAD_TYPE_DATA.to_string(),
            payload: b"not gzip".to_vec(),
            ..Default::default()
        }
        .encode_to_vec();

        client.handle_frame(&frame, &out_tx, &queue_tx).await.unwrap();

        assert!(out_rx.try_recv().is_err());
        assert_eq!(queue_rx.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_fatal() {
        let client = client();
        let (queue_tx, queue_rx) = payload_queue(8).unwrap();
        drop(queue_rx);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        let result = client
            .handle_frame(&data_frame(1, false), &out_tx, &queue_tx)
            .await;
        assert!(matches!(result, Err(PickerError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_read_loop_acks_before_next_frame() {
        let client = client();
        let (queue_tx, queue_rx) = payload_queue(8).unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let frames: Vec<Result<Message, WsError>> = vec![
            Ok(Message::Binary(data_frame(1, true).into())),
            Ok(Message::Binary(data_frame(2, true).into())),
            Ok(Message::Binary(
                PushFrame {
                    log_id: 3,
                    payload_type: codec::PAYLOAD_TYPE_DATA.to_string(),
                    payload: batch_payload(vec![]),
                    ..Default::default()
                }
                .encode_to_vec()
                .into(),
            )),
            Ok(Message::Close(None)),
            Ok(Message::Binary(data_frame(4, true).into())),
        ];
        let inbound = futures_util::stream::iter(frames);

        client.read_loop(inbound, &out_tx, &queue_tx).await.unwrap();

        let first = codec::decode_frame(&binary(out_rx.try_recv().unwrap())).unwrap();
        let second = codec::decode_frame(&binary(out_rx.try_recv().unwrap())).unwrap();
        assert_eq!((first.log_id, second.log_id), (1, 2));
        assert!(out_rx.try_recv().is_err());

        // Frame 4 arrives after the close and is never processed
        assert_eq!(queue_rx.len(), 3);
    }

    #[tokio::test]
    async fn test_read_loop_propagates_transport_error() {
        let client = client();
        let (queue_tx, _queue_rx) = payload_queue(8).unwrap();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        let inbound = futures_util::stream::iter(vec![Err(WsError::ConnectionClosed)]);
        let result = client.read_loop(inbound, &out_tx, &queue_tx).await;
        assert!(matches!(result, Err(PickerError::WebSocket(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_ticks_until_cancelled() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let counters = Arc::new(StreamCounters::default());

        let task = tokio::spawn(heartbeat_task(
            out_tx,
            Duration::from_secs(10),
            cancel.clone(),
            Arc::clone(&counters),
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        task.await.unwrap();

        let mut beats = 0;
        while let Ok(message) = out_rx.try_recv() {
            let frame = codec::decode_frame(&binary(message)).unwrap();
            assert_eq!(frame.payload_type, codec::PAYLOAD_TYPE_HEARTBEAT);
            beats += 1;
        }
        // Ticks at 0s, 10s and 20s
        assert_eq!(beats, 3);
        assert_eq!(counters.heartbeats_sent.load(Ordering::Relaxed), 3);
    }
}
