//! sketch-explain - 声とスケッチで概念を説明する学習セッション
//!
//! 利用者はコンセプトを1つ選び、マイクに向かって説明しながらキャンバスに図を描く。
//! 説明を終えると、録音（WAV）とスケッチ（JPEG）を評価サービスへ送り、
//! 返ってきたフィードバック文・返答音声・スコアを表示する。
//!
//! # 主な機能
//!
//! - **録音**: マイク取得、レベルメーター、1秒ごとのチャンク録音、16bit PCM WAV 化
//! - **キャンバス**: 表示サイズとは独立した固定解像度のラスタにペン／消しゴムで描画
//! - **状態機械**: Idle → Explaining → Processing → Feedback の遷移と後片付け
//! - **フィードバック**: スコアから表情を決め、高得点なら一定時間お祝い表示
//!
//! # アーキテクチャ
//!
//! ```text
//! [Microphone] → [AudioInput] → [AudioCapture] ─┐
//!                                   │           │ WAV
//!                              [LevelMeter]     ▼
//! [Pointer] ──→ [DrawingSurface] ──JPEG──→ [CaptureOrchestrator] ──→ [SubmissionClient]
//!                                               │                          │
//!                                               ▼                          ▼
//!                                        [ReplyPlayer] ◀──── reply audio / score
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use sketch_explain::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod audio_capture;
pub mod audio_input;
pub mod audio_output;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod drawing;
pub mod error;
pub mod feedback;
pub mod flac_encoder;
pub mod level_meter;
pub mod orchestrator;
pub mod submission;
pub mod types;
pub mod wav_writer;

#[cfg(test)]
pub(crate) mod test_support;
