use crate::config::SubmissionConfig;
use crate::types::Concept;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// コンセプト一覧の取得元
#[async_trait]
pub trait ConceptCatalog: Send + Sync {
    async fn concepts(&self) -> Result<Vec<Concept>>;
}

/// 設定ファイルに書かれた固定の一覧
pub struct StaticCatalog {
    concepts: Vec<Concept>,
}

impl StaticCatalog {
    pub fn new(concepts: Vec<Concept>) -> Self {
        Self { concepts }
    }
}

#[async_trait]
impl ConceptCatalog for StaticCatalog {
    async fn concepts(&self) -> Result<Vec<Concept>> {
        Ok(self.concepts.clone())
    }
}

/// 評価サービスが返すキーコンセプト
#[derive(Debug, Deserialize)]
struct KeyConcept {
    id: String,
    concept: String,
    #[serde(default)]
    question: String,
}

impl From<KeyConcept> for Concept {
    fn from(key: KeyConcept) -> Self {
        Concept {
            id: key.id,
            title: key.concept,
            description: key.question,
        }
    }
}

/// 評価サービスからキーコンセプトを取得する
pub struct HttpCatalog {
    url: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(config: &SubmissionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .context("カタログ用HTTPクライアント作成失敗")?;
        Ok(Self {
            url: config.endpoint(&config.concepts_path),
            client,
        })
    }
}

#[async_trait]
impl ConceptCatalog for HttpCatalog {
    async fn concepts(&self) -> Result<Vec<Concept>> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("コンセプト一覧の取得失敗: {}", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("コンセプト一覧の取得エラー: {} - {}", status, error_text);
        }

        let keys: Vec<KeyConcept> = response
            .json()
            .await
            .context("コンセプト一覧のパース失敗")?;
        log::info!("コンセプトを {} 件取得しました", keys.len());
        Ok(keys.into_iter().map(Concept::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_http, CannedResponse};

    #[tokio::test]
    async fn test_static_catalog() {
        let catalog = StaticCatalog::new(vec![Concept {
            id: "gravity".to_string(),
            title: "Gravity".to_string(),
            description: String::new(),
        }]);
        let concepts = catalog.concepts().await.unwrap();
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].id, "gravity");
    }

    #[tokio::test]
    async fn test_http_catalog_maps_key_concepts() {
        let (base_url, requests) = serve_http(vec![CannedResponse::json(
            200,
            r#"[{"id":"1","concept":"Osmosis","question":"What moves?","answer":"water"},
                {"id":"2","concept":"Diffusion"}]"#,
        )])
        .await;

        let catalog = HttpCatalog::new(&SubmissionConfig {
            base_url,
            ..SubmissionConfig::default()
        })
        .unwrap();
        let concepts = catalog.concepts().await.unwrap();

        assert_eq!(concepts.len(), 2);
        assert_eq!(concepts[0].title, "Osmosis");
        assert_eq!(concepts[0].description, "What moves?");
        assert_eq!(concepts[1].description, "");

        let requests = requests.await.unwrap();
        assert!(requests[0].starts_with("GET /api/get-key-concepts"));
    }

    #[tokio::test]
    async fn test_http_catalog_error_status() {
        let (base_url, _requests) =
            serve_http(vec![CannedResponse::json(503, r#"{"detail":"down"}"#)]).await;
        let catalog = HttpCatalog::new(&SubmissionConfig {
            base_url,
            ..SubmissionConfig::default()
        })
        .unwrap();
        assert!(catalog.concepts().await.is_err());
    }
}
