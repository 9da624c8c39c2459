use crate::audio_capture::{AudioCapture, CaptureEvent};
use crate::audio_input::AudioDevice;
use crate::audio_output::ReplyPlayer;
use crate::config::Config;
use crate::drawing::DrawingSurface;
use crate::error::CaptureError;
use crate::feedback::{time_seed, FallbackCatalog, ProgressTracker};
use crate::submission::SubmissionClient;
use crate::types::{
    AudioContainer, CaptureBundle, Concept, Evaluation, Mood, PointerEvent, SessionState, Tool,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// オーケストレーターが待つイベント
#[derive(Debug)]
pub enum OrchestratorEvent {
    Capture(CaptureEvent),
    /// 送信タスクの完了
    Submission {
        generation: u64,
        result: Result<Evaluation>,
    },
}

/// `done` の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoneOutcome {
    /// バンドルを送信した
    Submitted,
    /// 録音をエンコードできなかったのでフォールバック質問を表示した
    Fallback,
    /// 送信中のため何もしなかった
    AlreadyInFlight,
}

/// 表示用の状態スナップショット
#[derive(Debug, Serialize)]
pub struct StatusView {
    pub state: SessionState,
    pub concept_id: Option<String>,
    pub canvas_locked: bool,
    pub canvas_ready: bool,
    pub recording: bool,
    pub thinking: bool,
    pub showing_feedback: bool,
    pub celebrating: bool,
    pub level: u8,
    pub score: Option<u8>,
    pub mood: Option<Mood>,
    pub attempts: u32,
    pub feedback_text: Option<String>,
}

struct InFlight {
    generation: u64,
    handle: JoinHandle<Result<Evaluation>>,
}

/// 説明 → 評価 → フィードバックの状態機械
///
/// ```text
/// Idle ──start──▶ Explaining ──done──▶ Processing ──reply──▶ Feedback
///  ▲                  │                                         │
///  └──────cancel──────┘                 start / continue ◀──────┘
/// ```
///
/// 別のコンセプトへ移動すると、どの状態からでも録音を破棄して Idle に戻る。
/// 送信中のバンドルは常に高々1つ。
pub struct CaptureOrchestrator {
    state: SessionState,
    concepts: Vec<Concept>,
    current: Option<usize>,
    capture: AudioCapture,
    surface: DrawingSurface,
    client: Arc<dyn SubmissionClient>,
    player: Box<dyn ReplyPlayer>,
    in_flight: Option<InFlight>,
    /// コンセプト移動のたびに進める。古い応答を捨てるために使う
    generation: u64,
    progress: ProgressTracker,
    fallbacks: FallbackCatalog,
    feedback_text: Option<String>,
    attempts: u32,
    upload_format: AudioContainer,
    auto_start_next: bool,
}

impl CaptureOrchestrator {
    pub fn new(
        config: &Config,
        device: Box<dyn AudioDevice>,
        client: Arc<dyn SubmissionClient>,
        player: Box<dyn ReplyPlayer>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            concepts: config.concepts.clone(),
            current: None,
            capture: AudioCapture::new(device, &config.audio, &config.meter, &config.flac),
            surface: DrawingSurface::new(&config.canvas),
            client,
            player,
            in_flight: None,
            generation: 0,
            progress: ProgressTracker::new(&config.feedback),
            fallbacks: FallbackCatalog::new(),
            feedback_text: None,
            attempts: 0,
            upload_format: config.submission.upload_format,
            auto_start_next: config.feedback.auto_start_next,
        }
    }

    /// コンセプト一覧を差し替える
    ///
    /// 選択中のコンセプトが新しい一覧にも残っていれば、選択と進行中の説明はそのまま。
    /// 消えた場合だけ Idle に戻して選択を解除する。
    pub fn set_concepts(&mut self, concepts: Vec<Concept>) {
        let kept = self
            .current_concept()
            .and_then(|current| concepts.iter().position(|c| c.id == current.id));
        if kept.is_none() && self.current.is_some() {
            self.reset_to_idle();
            self.progress.reset();
            self.attempts = 0;
            log::info!("選択中のコンセプトが一覧から消えたため選択を解除しました");
        }
        self.current = kept;
        self.concepts = concepts;
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn current_concept(&self) -> Option<&Concept> {
        self.current.and_then(|idx| self.concepts.get(idx))
    }

    /// コンセプトを選ぶ
    ///
    /// 別のコンセプトなら、どの状態からでも録音を破棄して Idle に戻る。
    /// 選択中のコンセプトを選び直しても何もしない。
    pub fn select_concept(&mut self, concept_id: &str) -> Result<()> {
        let idx = self
            .concepts
            .iter()
            .position(|c| c.id == concept_id)
            .with_context(|| format!("コンセプトが見つかりません: {}", concept_id))?;
        if self.current == Some(idx) {
            log::debug!("選択中のコンセプトです: {}", concept_id);
            return Ok(());
        }
        self.navigate_to(idx);
        Ok(())
    }

    /// 次のコンセプトへ進む
    pub fn next_concept(&mut self) -> Result<()> {
        if self.concepts.is_empty() {
            anyhow::bail!("コンセプトがありません");
        }
        let idx = match self.current {
            Some(idx) => (idx + 1) % self.concepts.len(),
            None => 0,
        };
        self.navigate_to(idx);
        if self.auto_start_next {
            self.start()?;
        }
        Ok(())
    }

    fn navigate_to(&mut self, idx: usize) {
        self.reset_to_idle();
        self.progress.reset();
        self.attempts = 0;
        self.current = Some(idx);
        if let Some(concept) = self.concepts.get(idx) {
            log::info!("コンセプトを選択: {} ({})", concept.title, concept.id);
        }
    }

    /// 録音・送信・再生をすべて止めて Idle にする
    fn reset_to_idle(&mut self) {
        self.capture.teardown();
        self.abandon_in_flight();
        self.player.stop();
        self.surface.clear();
        self.feedback_text = None;
        self.state = SessionState::Idle;
    }

    fn abandon_in_flight(&mut self) {
        self.generation += 1;
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
            log::info!("送信中の評価を破棄しました");
        }
    }

    /// 説明を開始する（Idle / Feedback から）
    ///
    /// # Errors
    ///
    /// 状態が不正な場合は `CaptureError::InvalidState`、
    /// マイクを取得できなければ `CaptureError::Device`。どちらも状態は変わらない。
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Feedback) {
            return Err(CaptureError::InvalidState {
                action: "録音開始",
                state: self.state,
            }
            .into());
        }
        let concept = self
            .current_concept()
            .context("コンセプトが選択されていません")?
            .id
            .clone();

        self.player.stop();
        self.capture.start()?;
        self.surface.clear();
        self.feedback_text = None;
        self.state = SessionState::Explaining;
        log::info!("説明を開始: {}", concept);
        Ok(())
    }

    /// フィードバック後に同じコンセプトでもう一度説明する
    pub fn continue_same(&mut self) -> Result<()> {
        if self.state != SessionState::Feedback {
            return Err(CaptureError::InvalidState {
                action: "続行",
                state: self.state,
            }
            .into());
        }
        self.start()
    }

    /// 説明を取り消す（送信はしない）
    pub fn cancel(&mut self) -> Result<()> {
        if self.state != SessionState::Explaining {
            return Err(CaptureError::InvalidState {
                action: "取り消し",
                state: self.state,
            }
            .into());
        }
        self.capture.teardown();
        self.surface.clear();
        self.state = SessionState::Idle;
        log::info!("説明を取り消しました");
        Ok(())
    }

    /// 説明を終えて評価に送る
    ///
    /// 録音をエンコードできない場合は送信せずフォールバック質問を表示する。
    /// 送信中に呼ばれた場合は何もしない。
    pub fn done(&mut self) -> Result<DoneOutcome> {
        match self.state {
            SessionState::Explaining => {}
            SessionState::Processing => {
                log::debug!("送信中のため done を無視します");
                return Ok(DoneOutcome::AlreadyInFlight);
            }
            state => {
                return Err(CaptureError::InvalidState {
                    action: "送信",
                    state,
                }
                .into())
            }
        }

        // 描きかけの線はここで閉じる
        if self.surface.is_stroking() {
            log::debug!("描画中のストロークを終了して送信します");
            self.surface.end_stroke();
        }

        let audio = self.capture.finalize(self.upload_format);
        self.attempts += 1;

        let audio_bytes = match audio {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("録音を送信できないためフォールバックします: {}", e);
                self.show_fallback();
                self.state = SessionState::Feedback;
                return Ok(DoneOutcome::Fallback);
            }
        };

        let image_bytes = match self.surface.snapshot() {
            Ok(Some(jpeg)) => jpeg,
            Ok(None) => {
                log::warn!("キャンバスが未初期化のため空の画像を送ります");
                Vec::new()
            }
            Err(e) => {
                log::warn!("スナップショットに失敗したため空の画像を送ります: {:#}", e);
                Vec::new()
            }
        };

        let concept_id = self
            .current_concept()
            .map(|c| c.id.clone())
            .unwrap_or_default();
        let bundle = CaptureBundle {
            concept_id,
            image_bytes,
            audio_bytes,
            audio_container: self.upload_format,
        };

        let client = self.client.clone();
        let handle = tokio::spawn(async move { client.submit(bundle).await });
        self.in_flight = Some(InFlight {
            generation: self.generation,
            handle,
        });
        self.state = SessionState::Processing;
        Ok(DoneOutcome::Submitted)
    }

    /// 次のイベントを待つ
    ///
    /// 録音中はマイク入力とチャンク確定、送信中はその完了を待つ。
    /// どちらも無ければ返らない。キャンセルしても取りこぼさない。
    pub async fn next_event(&mut self) -> OrchestratorEvent {
        let in_flight = &mut self.in_flight;
        let capture = &mut self.capture;

        let event = tokio::select! {
            event = capture.next_event() => OrchestratorEvent::Capture(event),
            (generation, result) = async {
                match in_flight.as_mut() {
                    Some(task) => {
                        let joined = (&mut task.handle).await;
                        (task.generation, joined)
                    }
                    None => std::future::pending().await,
                }
            } => OrchestratorEvent::Submission {
                generation,
                result: result.unwrap_or_else(|e| Err(anyhow::anyhow!("送信タスクが異常終了: {}", e))),
            },
        };

        if matches!(event, OrchestratorEvent::Submission { .. }) {
            self.in_flight = None;
        }
        event
    }

    pub fn handle_event(&mut self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::Capture(event) => self.capture.handle_event(event),
            OrchestratorEvent::Submission { generation, result } => {
                self.on_reply(generation, result)
            }
        }
    }

    /// 送信中の評価を待って反映する
    pub async fn resolve_submission(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let result = in_flight
            .handle
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("送信タスクが異常終了: {}", e)));
        self.on_reply(in_flight.generation, result);
    }

    fn on_reply(&mut self, generation: u64, result: Result<Evaluation>) {
        if generation != self.generation || self.state != SessionState::Processing {
            log::info!("古い評価結果を破棄しました");
            return;
        }

        match result {
            Ok(evaluation) => {
                self.progress.record(evaluation.score);
                if let Some(audio) = evaluation.reply_audio.as_deref() {
                    if let Err(e) = self.player.play(audio) {
                        log::warn!("返答音声を再生できません: {:#}", e);
                    }
                }
                if evaluation.feedback_text.is_empty() && evaluation.reply_audio.is_none() {
                    self.show_fallback();
                } else {
                    self.feedback_text = Some(evaluation.feedback_text);
                }
            }
            Err(e) => {
                // 通信エラーの詳細は利用者には見せない
                log::warn!("評価サービスから応答が得られません: {:#}", e);
                self.show_fallback();
            }
        }
        self.state = SessionState::Feedback;
    }

    fn show_fallback(&mut self) {
        let question = self.fallbacks.pick(time_seed());
        self.feedback_text = Some(question.to_string());
    }

    /// ポインタ操作を渡す。キャンバスがロック中なら無視して false
    pub fn pointer(&mut self, event: PointerEvent) -> bool {
        if self.canvas_locked() {
            return false;
        }
        self.surface.handle(event);
        true
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.surface.set_tool(tool);
    }

    /// キャンバスを消す（説明中のみ）
    pub fn clear_canvas(&mut self) -> bool {
        if self.canvas_locked() {
            return false;
        }
        self.surface.clear();
        true
    }

    pub fn resize(&mut self, client_width: u32, client_height: u32) {
        self.surface.resize(client_width, client_height);
    }

    /// 終了処理（Drop でも呼ばれる）
    pub fn shutdown(&mut self) {
        self.capture.teardown();
        self.abandon_in_flight();
        self.player.stop();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn canvas_locked(&self) -> bool {
        self.state != SessionState::Explaining
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Explaining && self.capture.is_recording()
    }

    pub fn is_thinking(&self) -> bool {
        self.state == SessionState::Processing
    }

    pub fn showing_feedback(&self) -> bool {
        self.state == SessionState::Feedback
    }

    pub fn is_celebrating(&self) -> bool {
        self.progress.is_celebrating()
    }

    pub fn mood(&self) -> Option<Mood> {
        self.progress.mood()
    }

    pub fn score(&self) -> Option<u8> {
        self.progress.score()
    }

    pub fn feedback_text(&self) -> Option<&str> {
        self.feedback_text.as_deref()
    }

    pub fn level(&self) -> u8 {
        self.capture.current_level()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn surface(&self) -> &DrawingSurface {
        &self.surface
    }

    pub fn capture(&self) -> &AudioCapture {
        &self.capture
    }

    pub fn status(&self) -> StatusView {
        StatusView {
            state: self.state,
            concept_id: self.current_concept().map(|c| c.id.clone()),
            canvas_locked: self.canvas_locked(),
            canvas_ready: self.surface.is_initialized(),
            recording: self.is_recording(),
            thinking: self.is_thinking(),
            showing_feedback: self.showing_feedback(),
            celebrating: self.is_celebrating(),
            level: self.level(),
            score: self.score(),
            mood: self.mood(),
            attempts: self.attempts,
            feedback_text: self.feedback_text.clone(),
        }
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
