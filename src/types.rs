use serde::{Deserialize, Serialize};

/// 浮動小数点型のオーディオサンプル
///
/// -1.0 から 1.0 の範囲に正規化された PCM 値。
pub type SampleF32 = f32;

/// オーディオフォーマット情報
///
/// 音声データのサンプリングレートとチャンネル数を保持する。
///
/// # Examples
///
/// ```
/// # use sketch_explain::types::AudioFormat;
/// let format = AudioFormat {
///     sample_rate: 48000,  // 48kHz
///     channels: 1,          // モノラル
/// };
/// assert_eq!(format.bytes_per_frame(), 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// チャンネル数
    ///
    /// 1: モノラル, 2: ステレオ
    pub channels: u16,
}

impl AudioFormat {
    /// 16bit PCM 1フレームあたりのバイト数 (block align)
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels as u32 * 2
    }

    /// 16bit PCM 1秒あたりのバイト数 (byte rate)
    ///
    /// `u32` に収まらない組み合わせでは `None`。
    pub fn byte_rate(&self) -> Option<u32> {
        self.sample_rate.checked_mul(self.bytes_per_frame())
    }
}

/// オーディオチャンク
///
/// レコーダーが一定間隔で吐き出す、タイムスタンプ付きの音声データのまとまり。
/// サンプルはチャンネルインターリーブ済み。
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// インターリーブされた PCM サンプル
    pub samples: Vec<SampleF32>,

    /// オーディオフォーマット情報
    pub format: AudioFormat,

    /// このチャンクの開始タイムスタンプ (ナノ秒)
    ///
    /// 録音開始からの経過時間
    pub timestamp_ns: u128,
}

impl AudioChunk {
    /// チャンクに含まれるフレーム数
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }
}

/// デコード済みの PCM フレーム列
#[derive(Clone, Debug, PartialEq)]
pub struct PcmFrames {
    pub format: AudioFormat,
    /// インターリーブされたサンプル
    pub samples: Vec<SampleF32>,
}

impl PcmFrames {
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }
}

/// セッション状態
///
/// UI がいま何をしてよいかを決める唯一の情報源。
/// キャンバスのロックや「考え中」表示などはすべてここから導出する。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 待機中（キャンバスはロック、録音なし）
    Idle,
    /// 説明中（録音中、キャンバス描画可）
    Explaining,
    /// 評価サービスの応答待ち
    Processing,
    /// フィードバック表示中
    Feedback,
}

/// 描画ツール
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pen,
    /// 背景色で塗りつぶす不透明消しゴム
    Eraser,
}

/// 表示座標系（クライアント座標）上の点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// ポインタ操作イベント
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    Up,
    /// キャンバス外へ出た（ストロークを終了する）
    Leave,
}

/// スコアから導出される表情
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    /// 0–25
    Sad,
    /// 26–50
    MediumSad,
    /// 51–90
    MediumHappy,
    /// 91–100
    VeryHappy,
}

impl Mood {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=25 => Mood::Sad,
            26..=50 => Mood::MediumSad,
            51..=90 => Mood::MediumHappy,
            _ => Mood::VeryHappy,
        }
    }

    /// 表情画像のファイル名
    pub fn image_name(&self) -> &'static str {
        match self {
            Mood::Sad => "sad_grandma.png",
            Mood::MediumSad => "medium_sad_grandma.png",
            Mood::MediumHappy => "medium_happy_grandma.png",
            Mood::VeryHappy => "very_happy_grandma.png",
        }
    }
}

/// 説明対象のコンセプト（講義の1項目）
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Concept {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// 評価サービスへ送る1回分の成果物
///
/// "done" 1回につき1つだけ作られ、送信で消費される。
/// 二重送信を型で防ぐため `Clone` は実装しない。
#[derive(Debug)]
pub struct CaptureBundle {
    pub concept_id: String,
    /// JPEG エンコードされたスケッチ（レイアウト前なら空）
    pub image_bytes: Vec<u8>,
    /// WAV (または FLAC) の音声
    pub audio_bytes: Vec<u8>,
    /// `audio_bytes` のコンテナ種別
    pub audio_container: AudioContainer,
}

/// アップロード音声のコンテナ形式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    Wav,
    Flac,
}

impl AudioContainer {
    pub fn file_name(&self) -> &'static str {
        match self {
            AudioContainer::Wav => "recording.wav",
            AudioContainer::Flac => "recording.flac",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AudioContainer::Wav => "audio/wav",
            AudioContainer::Flac => "audio/flac",
        }
    }
}

/// 評価サービスからの応答
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// フィードバック文
    pub feedback_text: String,
    /// 返答音声（MP3/WAV など、コンテナはサービス次第）
    pub reply_audio: Option<Vec<u8>>,
    /// 0–100 のスコア（採点呼び出しが失敗した場合は None）
    pub score: Option<u8>,
}
