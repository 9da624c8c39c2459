use crate::config::SubmissionConfig;
use crate::error::CaptureError;
use crate::types::{CaptureBundle, Evaluation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

/// 評価サービスへの送信口
///
/// バンドルは値で受け取り、送信で消費する。
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    async fn submit(&self, bundle: CaptureBundle) -> Result<Evaluation>;
}

/// follow-up 応答（JSON の場合）
#[derive(Debug, Deserialize)]
struct FollowUpResponse {
    #[serde(default)]
    feedback: String,
    /// base64 エンコードされた返答音声
    #[serde(default)]
    audio_data: Option<String>,
}

/// 採点応答
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// HTTP の評価サービスクライアント
///
/// 1回の送信で2つのリクエストを投げる。
///
/// 1. follow-up: multipart (`concept_id`, `audio_file`, `notepad_image`)
///    → `{ feedback, audio_data }` の JSON か、音声そのもの
/// 2. 採点: multipart (`concept_id`) → `{ score }`
///
/// 採点の失敗は応答全体の失敗にはせず、スコア無しとして返す。
pub struct HttpSubmissionClient {
    config: SubmissionConfig,
    client: reqwest::Client,
}

impl HttpSubmissionClient {
    pub fn new(config: &SubmissionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .context("評価サービス用HTTPクライアント作成失敗")?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    async fn ask_follow_up(&self, bundle: CaptureBundle) -> Result<(String, Option<Vec<u8>>)> {
        let audio_part = multipart::Part::bytes(bundle.audio_bytes)
            .file_name(bundle.audio_container.file_name())
            .mime_str(bundle.audio_container.mime())?;
        let image_part = multipart::Part::bytes(bundle.image_bytes)
            .file_name("drawing.jpg")
            .mime_str("image/jpeg")?;

        let form = multipart::Form::new()
            .text("concept_id", bundle.concept_id)
            .part("audio_file", audio_part)
            .part("notepad_image", image_part);

        let url = self.config.endpoint(&self.config.follow_up_path);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("follow-up リクエスト失敗: {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("follow-up エラー: {} - {}", status, error_text);
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let body: FollowUpResponse = response
                .json()
                .await
                .context("follow-up レスポンスパース失敗")?;
            let audio = match body.audio_data.as_deref() {
                Some(encoded) if !encoded.is_empty() => Some(
                    base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .context("返答音声の base64 デコード失敗")?,
                ),
                _ => None,
            };
            Ok((body.feedback, audio))
        } else {
            // 音声が直接返ってくる形式
            let bytes = response
                .bytes()
                .await
                .context("返答音声の受信失敗")?;
            let audio = if bytes.is_empty() {
                None
            } else {
                Some(bytes.to_vec())
            };
            Ok((String::new(), audio))
        }
    }

    async fn fetch_score(&self, concept_id: &str) -> Result<u8> {
        let form = multipart::Form::new().text("concept_id", concept_id.to_string());
        let url = self.config.endpoint(&self.config.score_path);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("採点リクエスト失敗: {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("採点エラー: {} - {}", status, error_text);
        }

        let body: ScoreResponse = response.json().await.context("採点レスポンスパース失敗")?;
        Ok(body.score.round().clamp(0.0, 100.0) as u8)
    }
}

#[async_trait]
impl SubmissionClient for HttpSubmissionClient {
    async fn submit(&self, bundle: CaptureBundle) -> Result<Evaluation> {
        let concept_id = bundle.concept_id.clone();
        log::info!(
            "評価サービスへ送信: concept={}, 音声 {}バイト, 画像 {}バイト",
            concept_id,
            bundle.audio_bytes.len(),
            bundle.image_bytes.len()
        );

        let (feedback_text, reply_audio) = self
            .ask_follow_up(bundle)
            .await
            .map_err(|e| CaptureError::Transport(format!("{:#}", e)))?;

        let score = match self.fetch_score(&concept_id).await {
            Ok(score) => Some(score),
            Err(e) => {
                log::warn!("採点に失敗したため前回のスコアを維持します: {:#}", e);
                None
            }
        };

        log::info!(
            "評価結果を受信: スコア {:?}, 返答音声 {}",
            score,
            reply_audio.as_ref().map(|a| a.len()).unwrap_or(0)
        );

        Ok(Evaluation {
            feedback_text,
            reply_audio,
            score,
        })
    }
}
