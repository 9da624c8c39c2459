use crate::error::CaptureError;
use crate::types::{AudioChunk, PcmFrames};

/// 録音セッションのチャンクバッファ
///
/// レコーダーが1秒ごとに確定させたチャンクを到着順に保持する。
/// 追記のみで、途中のチャンクを削除・並べ替えすることはない。
pub struct ChunkBuffer {
    chunks: Vec<AudioChunk>,
    total_samples: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            total_samples: 0,
        }
    }

    /// チャンクを追加
    ///
    /// 空のチャンクは記録しない（"data available" でサイズ0のものは無視）。
    pub fn push(&mut self, chunk: AudioChunk) {
        if chunk.samples.is_empty() {
            log::debug!("空のチャンクを無視しました");
            return;
        }
        self.total_samples += chunk.samples.len();
        self.chunks.push(chunk);
    }

    /// 全チャンクを連結して PCM フレーム列に戻す
    ///
    /// # Errors
    ///
    /// チャンクが1つも無い場合は `CaptureError::Encoding`。
    /// 長さ0の WAV を有効な録音として扱わないため。
    /// 途中でフォーマットが変わっている場合も同様にエラー。
    pub fn decode(&self) -> Result<PcmFrames, CaptureError> {
        let first = self
            .chunks
            .first()
            .ok_or_else(|| CaptureError::Encoding("録音チャンクがありません".to_string()))?;
        let format = first.format;

        let mut samples = Vec::with_capacity(self.total_samples);
        for (idx, chunk) in self.chunks.iter().enumerate() {
            if chunk.format != format {
                return Err(CaptureError::Encoding(format!(
                    "チャンク {} のフォーマットが異なります: {:?} != {:?}",
                    idx, chunk.format, format
                )));
            }
            samples.extend_from_slice(&chunk.samples);
        }

        // 端数サンプルは最後の不完全なフレームなので落とす
        let channels = format.channels.max(1) as usize;
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);

        Ok(PcmFrames { format, samples })
    }

    /// チャンク数
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// バッファ内のサンプル数
    pub fn len(&self) -> usize {
        self.total_samples
    }

    /// バッファが空かどうか
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// バッファ内のデータ時間（秒）
    pub fn duration_seconds(&self) -> f64 {
        self.chunks
            .iter()
            .map(|c| c.frame_count() as f64 / c.format.sample_rate.max(1) as f64)
            .sum()
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}
