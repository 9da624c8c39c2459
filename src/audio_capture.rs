use crate::audio_input::{AudioDevice, CaptureConstraints, InputStream};
use crate::buffer::ChunkBuffer;
use crate::config::{AudioConfig, FlacConfig, MeterConfig};
use crate::error::CaptureError;
use crate::flac_encoder::FlacEncoder;
use crate::level_meter::{AnalyserTap, MeterLoop};
use crate::types::{AudioChunk, AudioContainer, AudioFormat, PcmFrames, SampleF32};
use crate::wav_writer::encode_wav;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};

/// 処理コンテキスト（解析タップ＋メーター）の状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// 終端状態。再利用はできず、次のセッションはデバイスを取り直す
    Closed,
}

/// レコーダーの状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Recording,
    Inactive,
}

/// 録音セッション中に発生するイベント
#[derive(Debug)]
pub enum CaptureEvent {
    /// 入力コールバックから届いたブロック
    Samples(Vec<SampleF32>),
    /// チャンク確定のタイミング
    ChunkDue,
    /// デバイス側が送信を止めた
    InputClosed,
}

/// 1回分の録音セッション
///
/// デバイスのストリームと処理コンテキストを専有する。
struct RecordingSession {
    started_at: Instant,
    format: AudioFormat,
    chunks: ChunkBuffer,
    pending: Vec<SampleF32>,
    pending_started_ns: u128,
    recorder: RecorderState,
    meter: MeterLoop,
    stream: Option<Box<dyn InputStream>>,
    tap: AnalyserTap,
    samples_rx: mpsc::Receiver<Vec<SampleF32>>,
    input_open: bool,
    chunk_timer: Interval,
}

impl RecordingSession {
    fn on_samples(&mut self, block: &[SampleF32]) {
        if self.recorder != RecorderState::Recording {
            return;
        }
        self.tap.feed(block, self.format.channels);
        if self.pending.is_empty() {
            self.pending_started_ns = self.started_at.elapsed().as_nanos();
        }
        self.pending.extend_from_slice(block);
    }

    /// 溜まっているサンプルを1チャンクとして確定
    fn flush_chunk(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let chunk = AudioChunk {
            samples: std::mem::take(&mut self.pending),
            format: self.format,
            timestamp_ns: self.pending_started_ns,
        };
        log::debug!(
            "チャンク確定: #{} ({}フレーム)",
            self.chunks.chunk_count(),
            chunk.frame_count()
        );
        self.chunks.push(chunk);
    }

    /// キュー済みのブロックを取り込み、最後のチャンクを確定してから停止
    fn stop_recorder(&mut self) {
        if self.recorder != RecorderState::Recording {
            return;
        }
        while let Ok(block) = self.samples_rx.try_recv() {
            self.on_samples(&block);
        }
        self.flush_chunk();
        self.recorder = RecorderState::Inactive;
        self.samples_rx.close();
    }
}

/// マイク録音
///
/// デバイス取得、レベルメーター、1秒ごとのチャンク録音、WAV 化を受け持つ。
/// 後片付けは `teardown` に一本化されており、キャンセル・Drop・エラー経路の
/// どこから何度呼ばれても同じ結果になる。
pub struct AudioCapture {
    device: Box<dyn AudioDevice>,
    audio_config: AudioConfig,
    meter_config: MeterConfig,
    flac_config: FlacConfig,
    session: Option<RecordingSession>,
    context_state: Option<ContextState>,
}

impl AudioCapture {
    pub fn new(
        device: Box<dyn AudioDevice>,
        audio_config: &AudioConfig,
        meter_config: &MeterConfig,
        flac_config: &FlacConfig,
    ) -> Self {
        Self {
            device,
            audio_config: audio_config.clone(),
            meter_config: meter_config.clone(),
            flac_config: flac_config.clone(),
            session: None,
            context_state: None,
        }
    }

    /// マイクを取得して録音を開始
    ///
    /// tokio ランタイム上で呼ぶこと（メーターループを起動するため）。
    ///
    /// # Errors
    ///
    /// デバイス取得に失敗した場合は `CaptureError::Device`。リトライはしない。
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            log::warn!("前の録音セッションが残っていたため破棄します");
            self.teardown();
        }

        let (samples_tx, samples_rx) = mpsc::channel(1024);
        let constraints = CaptureConstraints::from(&self.audio_config);
        let stream = self.device.open(&constraints, samples_tx)?;
        let format = stream.format();

        let tap = AnalyserTap::new(self.meter_config.fft_size);
        let meter = MeterLoop::spawn(&self.meter_config, tap.clone());

        let period = Duration::from_millis(self.audio_config.chunk_interval_ms.max(1));
        let started_at = Instant::now();
        let mut chunk_timer = tokio::time::interval_at(started_at + period, period);
        chunk_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.session = Some(RecordingSession {
            started_at,
            format,
            chunks: ChunkBuffer::new(),
            pending: Vec::new(),
            pending_started_ns: 0,
            recorder: RecorderState::Recording,
            meter,
            stream: Some(stream),
            tap,
            samples_rx,
            input_open: true,
            chunk_timer,
        });
        self.context_state = Some(ContextState::Running);

        log::info!(
            "録音を開始しました: {}Hz, {}ch ({})",
            format.sample_rate,
            format.channels,
            chrono::Local::now().format("%H:%M:%S")
        );
        Ok(())
    }

    /// 次の録音イベントを待つ
    ///
    /// セッションが無い間は永遠に返らない。`tokio::select!` の分岐として使う想定で、
    /// キャンセルされても取りこぼしは起きない。
    pub async fn next_event(&mut self) -> CaptureEvent {
        match self.session.as_mut() {
            Some(session) if session.recorder == RecorderState::Recording => {
                let input_open = session.input_open;
                tokio::select! {
                    block = session.samples_rx.recv(), if input_open => match block {
                        Some(block) => CaptureEvent::Samples(block),
                        None => CaptureEvent::InputClosed,
                    },
                    _ = session.chunk_timer.tick() => CaptureEvent::ChunkDue,
                }
            }
            _ => std::future::pending().await,
        }
    }

    /// 録音イベントを処理
    pub fn handle_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Samples(block) => self.on_samples(&block),
            CaptureEvent::ChunkDue => {
                if let Some(session) = self.session.as_mut() {
                    session.flush_chunk();
                }
            }
            CaptureEvent::InputClosed => {
                if let Some(session) = self.session.as_mut() {
                    log::warn!("入力デバイスからの送信が止まりました");
                    session.input_open = false;
                }
            }
        }
    }

    /// 入力ブロックを受け取る
    pub fn on_samples(&mut self, block: &[SampleF32]) {
        if let Some(session) = self.session.as_mut() {
            session.on_samples(block);
        }
    }

    /// 確定済みチャンクを追記する
    pub fn on_chunk(&mut self, chunk: AudioChunk) {
        if let Some(session) = self.session.as_mut() {
            if session.recorder == RecorderState::Recording {
                session.chunks.push(chunk);
            }
        }
    }

    /// レコーダーを停止する（最後の端数チャンクを確定させる）
    pub fn on_stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop_recorder();
        }
    }

    /// 録音を終了し、PCM フレーム列を取り出す
    ///
    /// 成否にかかわらずセッションは後片付けされる。
    ///
    /// # Errors
    ///
    /// チャンクが1つも無い場合は `CaptureError::Encoding`。
    pub fn finish(&mut self) -> Result<PcmFrames, CaptureError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CaptureError::Encoding(
                "録音セッションがありません".to_string(),
            ));
        };

        session.stop_recorder();
        let chunks = std::mem::take(&mut session.chunks);
        self.teardown();

        log::debug!(
            "録音チャンク: {}個, {:.2}秒",
            chunks.chunk_count(),
            chunks.duration_seconds()
        );
        chunks.decode()
    }

    /// 録音を終了し、指定コンテナにエンコードしたバイト列を返す
    pub fn finalize(&mut self, container: AudioContainer) -> Result<Vec<u8>, CaptureError> {
        let frames = self.finish()?;
        let bytes = match container {
            AudioContainer::Wav => encode_wav(&frames),
            AudioContainer::Flac => {
                FlacEncoder::new(self.flac_config.compression_level).encode(&frames)
            }
        }
        .map_err(|e| CaptureError::Encoding(format!("{:#}", e)))?;

        log::info!(
            "録音をエンコードしました: {:?}, {}フレーム ({:.2}秒) → {}バイト",
            container,
            frames.frame_count(),
            frames.frame_count() as f64 / frames.format.sample_rate.max(1) as f64,
            bytes.len()
        );
        Ok(bytes)
    }

    /// 後片付け
    ///
    /// 順序は「レコーダー停止 → メーター停止 → トラック停止 → コンテキストを閉じる」。
    /// 停止済みリソースに対するエラーはログに残すだけで伝播しない。
    pub fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.recorder = RecorderState::Inactive;
        session.pending.clear();
        session.samples_rx.close();

        session.meter.cancel();

        if let Some(mut stream) = session.stream.take() {
            if let Err(e) = stream.stop() {
                log::warn!("トラック停止時のエラーを無視します: {}", e);
            }
        }

        session.tap.close();
        self.context_state = Some(ContextState::Closed);

        log::info!(
            "録音セッションを終了しました ({:.2}秒)",
            session.started_at.elapsed().as_secs_f64()
        );
    }

    /// 録音中かどうか
    pub fn is_recording(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.recorder == RecorderState::Recording)
            .unwrap_or(false)
    }

    /// 生きている入力トラック数
    pub fn active_tracks(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.stream.as_ref())
            .map(|s| s.active_tracks())
            .unwrap_or(0)
    }

    /// 処理コンテキストの状態（一度も開始していなければ None）
    pub fn context_state(&self) -> Option<ContextState> {
        self.context_state
    }

    /// レベルメーターが動いているか
    pub fn meter_running(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.meter.is_running())
            .unwrap_or(false)
    }

    /// 入力レベルの購読
    pub fn level_receiver(&self) -> Option<watch::Receiver<u8>> {
        self.session.as_ref().map(|s| s.meter.subscribe())
    }

    /// 現在の入力レベル (0–100)
    pub fn current_level(&self) -> u8 {
        self.session.as_ref().map(|s| s.meter.current()).unwrap_or(0)
    }

    /// 確定済みチャンク数
    pub fn chunk_count(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.chunks.chunk_count())
            .unwrap_or(0)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.teardown();
    }
}
