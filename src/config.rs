use crate::types::{AudioContainer, Concept};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub flac: FlacConfig,
    /// 静的なコンセプト一覧。空なら評価サービスから取得する
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

/// オーディオ入力設定
///
/// マイク取得と録音チャンクに関する設定。
///
/// # デフォルト値
///
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `sample_rate`: 16000 Hz
/// - `channels`: 1 (モノラル)
/// - `chunk_interval_ms`: 1000 ms (1秒ごとにチャンクを確定)
/// - `echo_cancellation` / `noise_suppression` / `auto_gain_control`: true
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub echo_cancellation: bool,
    #[serde(default = "default_enabled")]
    pub noise_suppression: bool,
    #[serde(default = "default_enabled")]
    pub auto_gain_control: bool,
    /// 入力デバイス一覧から除外するデバイス名の正規表現
    #[serde(default = "default_excluded_devices")]
    pub excluded_devices: String,
}

/// レベルメーター設定
///
/// # デフォルト値
///
/// - `fft_size`: 32 (低レイテンシのため小さく取る)
/// - `interval_ms`: 16 ms (約60fps)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeterConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_meter_interval_ms")]
    pub interval_ms: u64,
}

/// キャンバス設定
///
/// # デフォルト値
///
/// - `width` x `height`: 800 x 600 (バッキングバッファの解像度)
/// - `pen_width`: 2.0, `eraser_width`: 20.0
/// - `pen_color`: 黒, `background_color`: 白
/// - `jpeg_quality`: 80
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanvasConfig {
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
    #[serde(default = "default_pen_width")]
    pub pen_width: f32,
    #[serde(default = "default_eraser_width")]
    pub eraser_width: f32,
    #[serde(default = "default_pen_color")]
    pub pen_color: [u8; 3],
    #[serde(default = "default_background_color")]
    pub background_color: [u8; 3],
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// 評価サービス設定
///
/// # デフォルト値
///
/// - `base_url`: "http://localhost:8000"
/// - `timeout_seconds`: 60
/// - `upload_format`: wav
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_follow_up_path")]
    pub follow_up_path: String,
    #[serde(default = "default_score_path")]
    pub score_path: String,
    #[serde(default = "default_concepts_path")]
    pub concepts_path: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_upload_format")]
    pub upload_format: AudioContainer,
}

/// フィードバック表示設定
///
/// # デフォルト値
///
/// - `celebration_threshold`: 95
/// - `celebration_secs`: 5
/// - `auto_start_next`: false (次のコンセプトは Idle から始める)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_celebration_threshold")]
    pub celebration_threshold: u8,
    #[serde(default = "default_celebration_secs")]
    pub celebration_secs: u64,
    #[serde(default)]
    pub auto_start_next: bool,
}

/// 返答音声の再生設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 出力デバイス名。省略時はデフォルトデバイス
    pub device: Option<String>,
}

/// 出力設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// FLAC圧縮設定
///
/// `submission.upload_format = "flac"` のときのみ使用する。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlacConfig {
    #[serde(default = "default_flac_compression_level")]
    pub compression_level: u32,
}

// Default functions
fn default_device_id() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_chunk_interval_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

fn default_excluded_devices() -> String {
    "Webcam|Background|Microsoft Teams|ZoomAudioDevice".to_string()
}

fn default_fft_size() -> usize {
    32
}

fn default_meter_interval_ms() -> u64 {
    16
}

fn default_canvas_width() -> u32 {
    800
}

fn default_canvas_height() -> u32 {
    600
}

fn default_pen_width() -> f32 {
    2.0
}

fn default_eraser_width() -> f32 {
    20.0
}

fn default_pen_color() -> [u8; 3] {
    [0, 0, 0]
}

fn default_background_color() -> [u8; 3] {
    [255, 255, 255]
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_follow_up_path() -> String {
    "/api/ask-follow-up".to_string()
}

fn default_score_path() -> String {
    "/api/evaluate".to_string()
}

fn default_concepts_path() -> String {
    "/api/get-key-concepts".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_upload_format() -> AudioContainer {
    AudioContainer::Wav
}

fn default_celebration_threshold() -> u8 {
    95
}

fn default_celebration_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_flac_compression_level() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            meter: MeterConfig::default(),
            canvas: CanvasConfig::default(),
            submission: SubmissionConfig::default(),
            feedback: FeedbackConfig::default(),
            playback: PlaybackConfig::default(),
            output: OutputConfig::default(),
            flac: FlacConfig::default(),
            concepts: Vec::new(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_interval_ms: default_chunk_interval_ms(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            excluded_devices: default_excluded_devices(),
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            interval_ms: default_meter_interval_ms(),
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            pen_width: default_pen_width(),
            eraser_width: default_eraser_width(),
            pen_color: default_pen_color(),
            background_color: default_background_color(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            follow_up_path: default_follow_up_path(),
            score_path: default_score_path(),
            concepts_path: default_concepts_path(),
            timeout_seconds: default_timeout_seconds(),
            upload_format: default_upload_format(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            celebration_threshold: default_celebration_threshold(),
            celebration_secs: default_celebration_secs(),
            auto_start_next: false,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for FlacConfig {
    fn default() -> Self {
        Self {
            compression_level: default_flac_compression_level(),
        }
    }
}

impl SubmissionConfig {
    /// ベースURLとパスを連結
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sketch_explain::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.chunk_interval_ms, 1000);
        assert!(config.audio.echo_cancellation);
        assert_eq!(config.meter.fft_size, 32);
        assert_eq!(config.canvas.width, 800);
        assert_eq!(config.feedback.celebration_threshold, 95);
        assert_eq!(config.feedback.celebration_secs, 5);
        assert_eq!(config.submission.upload_format, AudioContainer::Wav);
        assert!(config.concepts.is_empty());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.submission.base_url, "http://localhost:8000");
        assert_eq!(config.canvas.background_color, [255, 255, 255]);
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[audio]
device_id = "USB Microphone"
sample_rate = 48000
channels = 2
noise_suppression = false

[meter]
fft_size = 64

[canvas]
width = 1024
height = 768
eraser_width = 30.0
jpeg_quality = 60

[submission]
base_url = "http://grandma.local:9000/"
timeout_seconds = 15
upload_format = "flac"

[feedback]
celebration_threshold = 90
auto_start_next = true

[playback]
enabled = false

[[concepts]]
id = "sleep"
title = "Why we sleep"
description = "Explain the purpose of sleep"

[[concepts]]
id = "entropy"
title = "Entropy"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.audio.device_id, "USB Microphone");
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 2);
        assert!(!config.audio.noise_suppression);
        assert!(config.audio.echo_cancellation);
        assert_eq!(config.meter.fft_size, 64);
        assert_eq!(config.meter.interval_ms, 16);
        assert_eq!(config.canvas.width, 1024);
        assert_eq!(config.canvas.eraser_width, 30.0);
        assert_eq!(config.canvas.jpeg_quality, 60);
        assert_eq!(config.submission.timeout_seconds, 15);
        assert_eq!(config.submission.upload_format, AudioContainer::Flac);
        assert_eq!(config.feedback.celebration_threshold, 90);
        assert!(config.feedback.auto_start_next);
        assert!(!config.playback.enabled);
        assert_eq!(config.concepts.len(), 2);
        assert_eq!(config.concepts[0].id, "sleep");
        assert_eq!(config.concepts[1].description, "");
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_endpoint_join() {
        let mut submission = SubmissionConfig::default();
        assert_eq!(
            submission.endpoint(&submission.follow_up_path),
            "http://localhost:8000/api/ask-follow-up"
        );

        submission.base_url = "http://example.com/".to_string();
        assert_eq!(
            submission.endpoint("api/evaluate"),
            "http://example.com/api/evaluate"
        );
    }

    #[test]
    fn test_invalid_config_fails() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio]\nsample_rate = \"fast\"\n").unwrap();
        temp_file.flush().unwrap();

        assert!(Config::from_file(temp_file.path()).is_err());
    }
}
