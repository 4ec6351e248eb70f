//! In-process danmaku server and frame builders shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use liverec_core::danmaku::codec::{op, protover};
use liverec_core::danmaku::{encode_frame, ConnectionEndpoint, EndpointSource, FrameHeader};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// One scripted server action on a connection
#[derive(Debug, Clone)]
pub enum Step {
    Send(Vec<u8>),
    Wait(Duration),
    /// Close the socket from the server side
    Close,
}

#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub connection: usize,
    pub header: FrameHeader,
    pub body: Vec<u8>,
    pub at: Instant,
}

/// Accepts WebSocket connections and plays `scripts[n]` on the n-th one.
/// Connections past the end of the script list just stay open.
pub struct MockDanmakuServer {
    addr: SocketAddr,
    frames: Arc<Mutex<Vec<ReceivedFrame>>>,
    connections: Arc<AtomicUsize>,
    endpoint_fetches: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl MockDanmakuServer {
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept = tokio::spawn({
            let frames = frames.clone();
            let connections = connections.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let script = scripts.get(index).cloned().unwrap_or_default();
                    tokio::spawn(serve(stream, index, script, frames.clone()));
                }
            }
        });

        Self {
            addr,
            frames,
            connections,
            endpoint_fetches: Arc::new(AtomicUsize::new(0)),
            accept,
        }
    }

    pub fn endpoint(&self) -> ConnectionEndpoint {
        ConnectionEndpoint::insecure("127.0.0.1", self.addr.port(), "test-token")
    }

    /// Endpoint source that always points at this server
    pub fn source(&self) -> Arc<StaticEndpoint> {
        Arc::new(StaticEndpoint {
            endpoint: self.endpoint(),
            fetches: self.endpoint_fetches.clone(),
        })
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.frames.lock().clone()
    }

    pub fn frames_with_op(&self, operation: u32) -> Vec<ReceivedFrame> {
        self.frames()
            .into_iter()
            .filter(|f| f.header.operation == operation)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn endpoint_fetches(&self) -> usize {
        self.endpoint_fetches.load(Ordering::SeqCst)
    }
}

impl Drop for MockDanmakuServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, index: usize, script: Vec<Step>, frames: Arc<Mutex<Vec<ReceivedFrame>>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = source.next().await {
            match message {
                Message::Binary(data) => {
                    let Some(header) = FrameHeader::parse(&data) else {
                        continue;
                    };
                    let end = (header.total_length as usize).min(data.len());
                    let start = (header.header_length as usize).min(end);
                    frames.lock().push(ReceivedFrame {
                        connection: index,
                        header,
                        body: data[start..end].to_vec(),
                        at: Instant::now(),
                    });
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    for step in script {
        match step {
            Step::Send(bytes) => {
                if sink.send(Message::binary(bytes)).await.is_err() {
                    break;
                }
            }
            Step::Wait(duration) => tokio::time::sleep(duration).await,
            Step::Close => {
                let _ = sink.close().await;
                reader.abort();
                return;
            }
        }
    }

    // keep the socket open until the client goes away
    let _ = reader.await;
}

/// Fixed endpoint, counting lookups
pub struct StaticEndpoint {
    endpoint: ConnectionEndpoint,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl EndpointSource for StaticEndpoint {
    async fn fetch_endpoint(&self, _room_id: u64) -> Option<ConnectionEndpoint> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Some(self.endpoint.clone())
    }
}

/// Uncompressed message frame carrying `value`
pub fn json_frame(value: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(value).unwrap();
    encode_frame(op::MESSAGE, protover::JSON, 0, &body).to_vec()
}

/// zlib message frame wrapping already-encoded frames
pub fn zlib_frame(inner: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(inner).unwrap();
    let compressed = encoder.finish().unwrap();
    encode_frame(op::MESSAGE, protover::ZLIB, 0, &compressed).to_vec()
}

pub fn live_event() -> Value {
    json!({"cmd": "LIVE", "roomid": 42})
}

pub fn preparing_event() -> Value {
    json!({"cmd": "PREPARING", "roomid": 42})
}

pub fn danmu_event(user: &str, text: &str) -> Value {
    json!({
        "cmd": "DANMU_MSG:4:0:2:2:2:0",
        "info": [[0, 1, 25, 16_777_215, 1_700_000_000_000_i64], text, [10_086, user, 0, 0, 0], [], []]
    })
}

/// Poll `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
