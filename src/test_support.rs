//! テスト用のダミー実装

use crate::audio_input::{AudioDevice, CaptureConstraints, InputStream};
use crate::audio_output::ReplyPlayer;
use crate::error::CaptureError;
use crate::submission::SubmissionClient;
use crate::types::{AudioFormat, CaptureBundle, Evaluation, SampleF32};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

#[derive(Default)]
struct DeviceCounters {
    active_tracks: AtomicUsize,
    opens: AtomicUsize,
    stops: AtomicUsize,
    sink: Mutex<Option<mpsc::Sender<Vec<SampleF32>>>>,
}

/// デバイスの様子を外から覗くためのハンドル
#[derive(Clone)]
pub struct DeviceMonitor {
    counters: Arc<DeviceCounters>,
}

impl DeviceMonitor {
    pub fn active_tracks(&self) -> usize {
        self.counters.active_tracks.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// 入力コールバックの代わりにブロックを流す
    pub async fn send_block(&self, block: Vec<SampleF32>) {
        let sink = self.counters.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            let _ = sink.send(block).await;
        }
    }
}

/// マイクの代わり
pub struct FakeDevice {
    format: AudioFormat,
    failure: Option<String>,
    stop_error: bool,
    counters: Arc<DeviceCounters>,
}

impl FakeDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: AudioFormat {
                sample_rate,
                channels,
            },
            failure: None,
            stop_error: false,
            counters: Arc::new(DeviceCounters::default()),
        }
    }

    /// 取得に必ず失敗するデバイス
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(16000, 1)
        }
    }

    /// 停止時にエラーを返すデバイス
    pub fn with_stop_error(mut self) -> Self {
        self.stop_error = true;
        self
    }

    pub fn monitor(&self) -> DeviceMonitor {
        DeviceMonitor {
            counters: self.counters.clone(),
        }
    }
}

impl AudioDevice for FakeDevice {
    fn open(
        &mut self,
        _constraints: &CaptureConstraints,
        sink: mpsc::Sender<Vec<SampleF32>>,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(CaptureError::Device(message.clone()));
        }
        *self.counters.sink.lock().unwrap() = Some(sink);
        self.counters.active_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            format: self.format,
            live: true,
            stop_error: self.stop_error,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeStream {
    format: AudioFormat,
    live: bool,
    stop_error: bool,
    counters: Arc<DeviceCounters>,
}

impl InputStream for FakeStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.live {
            return Err(CaptureError::Teardown("already stopped".to_string()));
        }
        self.live = false;
        self.counters.active_tracks.fetch_sub(1, Ordering::SeqCst);
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        *self.counters.sink.lock().unwrap() = None;
        if self.stop_error {
            return Err(CaptureError::Teardown("track ended unexpectedly".to_string()));
        }
        Ok(())
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        if self.live {
            let _ = self.stop();
        }
    }
}

/// 評価サービスの代わり
///
/// 呼び出し回数と受け取ったバンドルを記録する。
/// ゲートを付けると `release` されるまで応答を返さない。
pub struct FakeSubmissionClient {
    calls: AtomicUsize,
    concept_ids: Mutex<Vec<String>>,
    reply: Option<Evaluation>,
    gate: Option<Arc<Notify>>,
}

impl FakeSubmissionClient {
    pub fn replying(evaluation: Evaluation) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            concept_ids: Mutex::new(Vec::new()),
            reply: Some(evaluation),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            ..Self::replying(Evaluation::default())
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn concept_ids(&self) -> Vec<String> {
        self.concept_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionClient for FakeSubmissionClient {
    async fn submit(&self, bundle: CaptureBundle) -> Result<Evaluation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.concept_ids.lock().unwrap().push(bundle.concept_id);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.reply {
            Some(evaluation) => Ok(evaluation.clone()),
            None => Err(CaptureError::Transport("connection refused".to_string()).into()),
        }
    }
}

#[derive(Default)]
struct PlayerLog {
    played: Vec<usize>,
    stops: usize,
    playing: bool,
}

/// 再生要求を記録するだけのプレイヤー
#[derive(Clone, Default)]
pub struct RecordingPlayer {
    log: Arc<Mutex<PlayerLog>>,
}

impl RecordingPlayer {
    pub fn play_count(&self) -> usize {
        self.log.lock().unwrap().played.len()
    }

    pub fn stop_count(&self) -> usize {
        self.log.lock().unwrap().stops
    }
}

impl ReplyPlayer for RecordingPlayer {
    fn play(&mut self, audio: &[u8]) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.played.push(audio.len());
        log.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.log.lock().unwrap().playing
    }
}

/// ダミー HTTP サーバーの応答
pub struct CannedResponse {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self::binary(status, "application/json", body.as_bytes())
    }

    pub fn binary(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
        }
    }
}

/// 応答を順番に返すダミー HTTP サーバーを立てる
///
/// 接続ごとに1応答を返して切断する。受け取ったリクエスト（ヘッダー＋ボディ）を
/// 文字列として返すハンドルも返す。
pub async fn serve_http(responses: Vec<CannedResponse>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            requests.push(String::from_utf8_lossy(&request).to_string());

            let head = format!(
                "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                response.status,
                response.content_type,
                response.body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&response.body).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });

    (base_url, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if request_complete(&data) {
            break;
        }
    }
    data
}

fn request_complete(data: &[u8]) -> bool {
    let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&data[..header_end]).to_ascii_lowercase();
    let body = &data[header_end + 4..];

    if head.contains("transfer-encoding: chunked") {
        return body.ends_with(b"0\r\n\r\n");
    }
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    body.len() >= content_length
}
