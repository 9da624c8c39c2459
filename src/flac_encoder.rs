use crate::types::PcmFrames;
use crate::wav_writer::quantize;
use anyhow::Result;
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use flacenc::source::MemSource;

/// FLAC エンコーダー
///
/// 録音を評価サービスへ送る前に FLAC に圧縮する。
/// `submission.upload_format = "flac"` のときだけ使われ、
/// 既定のアップロード形式は WAV のまま。
///
/// 量子化は WAV と同じ `quantize` を通すので、
/// デコード結果は WAV 経由のものとサンプル単位で一致する。
///
/// # Examples
///
/// ```no_run
/// # use sketch_explain::flac_encoder::FlacEncoder;
/// # use sketch_explain::types::{AudioFormat, PcmFrames};
/// let mut encoder = FlacEncoder::new(5);
/// let frames = PcmFrames {
///     format: AudioFormat { sample_rate: 16000, channels: 1 },
///     samples: vec![0.0; 16000],
/// };
/// let flac_data = encoder.encode(&frames).unwrap();
/// ```
pub struct FlacEncoder {
    compression_level: u32,
}

impl FlacEncoder {
    /// 新しいFLACエンコーダーを作成
    ///
    /// # Arguments
    ///
    /// * `compression_level` - 圧縮レベル (0-8)
    pub fn new(compression_level: u32) -> Self {
        Self {
            compression_level: compression_level.min(8),
        }
    }

    /// PCM フレーム列を FLAC 形式にエンコード
    ///
    /// # Errors
    ///
    /// フレームが空、またはエンコードに失敗した場合にエラーを返す
    pub fn encode(&mut self, frames: &PcmFrames) -> Result<Vec<u8>> {
        if frames.samples.is_empty() {
            anyhow::bail!("FLACエンコード対象のサンプルがありません");
        }

        // flacenc は i32 のインターリーブ配列を要求する
        let samples_i32: Vec<i32> = frames
            .samples
            .iter()
            .map(|&s| quantize(s) as i32)
            .collect();

        let source = MemSource::from_samples(
            &samples_i32,
            frames.format.channels as usize,
            16,
            frames.format.sample_rate as usize,
        );

        let config = flacenc::config::Encoder::default();
        let verified_config = config
            .into_verified()
            .map_err(|e| anyhow::anyhow!("FLAC設定の検証に失敗: {:?}", e))?;

        let flac_stream = flacenc::encode_with_fixed_block_size(
            &verified_config,
            source,
            verified_config.block_size,
        )
        .map_err(|e| anyhow::anyhow!("FLACエンコードに失敗: {:?}", e))?;

        let mut sink = ByteSink::new();
        flac_stream
            .write(&mut sink)
            .map_err(|e| anyhow::anyhow!("FLACストリームの書き込みに失敗: {:?}", e))?;
        let flac_bytes = sink.into_inner();

        log::debug!(
            "FLACエンコード完了: {} サンプル → {} バイト (level {})",
            samples_i32.len(),
            flac_bytes.len(),
            self.compression_level
        );

        Ok(flac_bytes)
    }

    /// 現在の圧縮レベルを取得
    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }
}
