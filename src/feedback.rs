use crate::config::FeedbackConfig;
use crate::types::Mood;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// 評価サービスに届かなかった時に出す定型の質問
const FALLBACK_QUESTIONS: &[&str] = &[
    "Oh my, that's interesting! Could you tell me a bit more about that?",
    "I'm not sure I quite followed, dear. Can you explain it another way?",
    "Goodness, my hearing isn't what it used to be. Could you say that once more?",
    "That sounds important! Can you give me an example?",
    "Hmm, how would you explain that to someone my age?",
    "Wait a moment, dear. What does that part of your drawing mean?",
    "How interesting! Why do you think it works that way?",
];

/// フォールバック質問の一覧
///
/// 固定・不変の一覧から一様に選ぶ。選択はシードで決まるので、
/// テストでは任意のシードを渡せる。
#[derive(Clone, Copy, Debug)]
pub struct FallbackCatalog {
    questions: &'static [&'static str],
}

impl FallbackCatalog {
    pub fn new() -> Self {
        Self {
            questions: FALLBACK_QUESTIONS,
        }
    }

    pub fn pick(&self, seed: u64) -> &'static str {
        self.questions[(seed % self.questions.len() as u64) as usize]
    }

    pub fn contains(&self, text: &str) -> bool {
        self.questions.contains(&text)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Default for FallbackCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// 時刻から作るシード
pub fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() ^ d.subsec_nanos() as u64)
        .unwrap_or(0)
}

/// 進捗スコアとお祝い表示
///
/// スコアが閾値以上の応答を受けると、一定時間お祝いフラグが立つ。
/// 表示中にもう一度閾値を超えても延長しない。
pub struct ProgressTracker {
    score: Option<u8>,
    celebration_until: Option<Instant>,
    threshold: u8,
    window: Duration,
}

impl ProgressTracker {
    pub fn new(config: &FeedbackConfig) -> Self {
        Self {
            score: None,
            celebration_until: None,
            threshold: config.celebration_threshold,
            window: Duration::from_secs(config.celebration_secs),
        }
    }

    /// 評価結果のスコアを反映
    ///
    /// お祝いが新しく始まった場合は true。
    /// `None`（採点失敗）の場合は直前のスコアを保持する。
    pub fn record(&mut self, score: Option<u8>) -> bool {
        let Some(score) = score else {
            return false;
        };
        let score = score.min(100);
        self.score = Some(score);

        if score >= self.threshold && !self.is_celebrating() {
            self.celebration_until = Some(Instant::now() + self.window);
            log::info!("スコア {} でお祝い表示を開始", score);
            return true;
        }
        false
    }

    pub fn score(&self) -> Option<u8> {
        self.score
    }

    pub fn mood(&self) -> Option<Mood> {
        self.score.map(Mood::from_score)
    }

    pub fn is_celebrating(&self) -> bool {
        self.celebration_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// コンセプト切り替え時にリセット
    pub fn reset(&mut self) {
        self.score = None;
        self.celebration_until = None;
    }
}
