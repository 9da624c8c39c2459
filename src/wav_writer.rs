use crate::types::{AudioFormat, PcmFrames, SampleF32};
use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Cursor, Write};

/// RIFF ヘッダ + fmt サブチャンク + data サブチャンクヘッダの合計バイト数
pub const WAV_HEADER_LEN: usize = 44;

/// 16bit リニア PCM WAV のメモリ上ライター
///
/// 下流（評価サービス）との互換性のため、ヘッダと量子化はビット単位で固定:
///
/// ```text
/// "RIFF" <36 + dataLen> "WAVE"
/// "fmt " <16> <1=PCM> <N> <R> <R*N*2> <N*2> <16>
/// "data" <dataLen = frameCount*N*2>
/// ```
///
/// 量子化は `s < 0 ? s * 32768 : s * 32767`（ゼロ方向への切り捨て）、
/// リトルエンディアン、チャンネルインターリーブ。
pub struct WavWriter {
    format: AudioFormat,
    data: Vec<u8>,
    samples_written: usize,
}

impl WavWriter {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            data: Vec::new(),
            samples_written: 0,
        }
    }

    /// インターリーブ済みサンプルを書き込み
    pub fn write_samples(&mut self, samples: &[SampleF32]) -> Result<()> {
        self.data.reserve(samples.len() * 2);
        for &sample in samples {
            self.data
                .write_i16::<LittleEndian>(quantize(sample))
                .context("WAVサンプル書き込み失敗")?;
        }
        self.samples_written += samples.len();
        Ok(())
    }

    /// ヘッダを付けて WAV バイト列を返す
    pub fn finalize(self) -> Result<Vec<u8>> {
        let channels = self.format.channels as usize;
        if channels == 0 {
            anyhow::bail!("チャンネル数が0です");
        }
        if self.samples_written % channels != 0 {
            anyhow::bail!(
                "サンプル数 {} がチャンネル数 {} の倍数ではありません",
                self.samples_written,
                channels
            );
        }

        let data_len = u32::try_from(self.data.len())
            .ok()
            .filter(|len| *len <= u32::MAX - 36)
            .context("WAVデータが大きすぎます")?;
        let byte_rate = self.format.byte_rate().with_context(|| {
            format!(
                "バイトレートが大きすぎます: {}Hz, {}ch",
                self.format.sample_rate, self.format.channels
            )
        })?;
        let block_align = u16::try_from(self.format.bytes_per_frame())
            .with_context(|| format!("チャンネル数が多すぎます: {}", self.format.channels))?;

        let mut out = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + self.data.len()));
        out.write_all(b"RIFF")?;
        out.write_u32::<LittleEndian>(36 + data_len)?;
        out.write_all(b"WAVE")?;

        out.write_all(b"fmt ")?;
        out.write_u32::<LittleEndian>(16)?;
        out.write_u16::<LittleEndian>(1)?; // PCM
        out.write_u16::<LittleEndian>(self.format.channels)?;
        out.write_u32::<LittleEndian>(self.format.sample_rate)?;
        out.write_u32::<LittleEndian>(byte_rate)?;
        out.write_u16::<LittleEndian>(block_align)?;
        out.write_u16::<LittleEndian>(16)?;

        out.write_all(b"data")?;
        out.write_u32::<LittleEndian>(data_len)?;
        out.write_all(&self.data)?;

        log::debug!(
            "WAVエンコード完了: {}フレーム ({:.2}秒), {}Hz, {}ch, {}バイト",
            self.samples_written / channels,
            self.duration_seconds(),
            self.format.sample_rate,
            self.format.channels,
            WAV_HEADER_LEN + self.data.len()
        );

        Ok(out.into_inner())
    }

    /// 書き込んだ時間（秒）
    fn duration_seconds(&self) -> f64 {
        let channels = self.format.channels.max(1) as f64;
        self.samples_written as f64 / channels / self.format.sample_rate.max(1) as f64
    }
}

/// 浮動小数点サンプルを 16bit 符号付き整数に量子化
pub fn quantize(sample: SampleF32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// `quantize` の逆変換
pub fn dequantize(value: i16) -> SampleF32 {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

/// PCM フレーム列を WAV バイト列にエンコード
pub fn encode_wav(frames: &PcmFrames) -> Result<Vec<u8>> {
    let mut writer = WavWriter::new(frames.format);
    writer.write_samples(&frames.samples)?;
    writer.finalize()
}

/// WAV バイト列をデコード
pub fn decode_wav(bytes: &[u8]) -> Result<PcmFrames> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("WAVヘッダの読み込みに失敗")?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        anyhow::bail!(
            "16bit PCM 以外の WAV には対応していません: {}bit {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(dequantize))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("WAVサンプルの読み込みに失敗")?;

    Ok(PcmFrames {
        format: AudioFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
        samples,
    })
}
