use crate::config::AudioConfig;
use crate::error::CaptureError;
use crate::types::{AudioFormat, SampleF32};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use tokio::sync::mpsc;

/// マイク取得時の要求条件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub device_id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl From<&AudioConfig> for CaptureConstraints {
    fn from(config: &AudioConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

/// マイク入力デバイス
///
/// `open` が成功すると入力トラックが生き、
/// インターリーブされた f32 ブロックが `sink` に流れ始める。
pub trait AudioDevice {
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        sink: mpsc::Sender<Vec<SampleF32>>,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// 開かれた入力ストリーム（メディアトラック群）
pub trait InputStream {
    /// 実際に確保できたフォーマット
    fn format(&self) -> AudioFormat;

    /// 全トラックを停止
    ///
    /// 既に停止済みなら `CaptureError::Teardown` を返す。
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// 生きているトラック数（マイク1本につき1トラック）
    fn active_tracks(&self) -> usize;
}

/// cpal によるマイク入力
pub struct CpalDevice {
    excluded_devices: String,
}

impl CpalDevice {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            excluded_devices: config.excluded_devices.clone(),
        }
    }

    fn find_device(&self, device_id: &str) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if device_id == "default" {
            host.default_input_device()
                .context("デフォルト入力デバイスが見つかりません")
        } else {
            Self::input_devices(&self.excluded_devices)?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(device_id))
                .with_context(|| format!("デバイスが見つかりません: {}", device_id))
        }
    }

    /// デバイス一覧を表示
    pub fn list_devices(excluded_devices: &str) -> Result<()> {
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in Self::input_devices(excluded_devices)?.into_iter().enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// 除外パターンに一致するデバイス（仮想デバイスなど）を除いた入力デバイス一覧
    fn input_devices(excluded_devices: &str) -> Result<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let excluded = if excluded_devices.is_empty() {
            None
        } else {
            Some(Regex::new(excluded_devices).context("除外デバイスの正規表現が不正です")?)
        };

        let devices = host
            .input_devices()?
            .filter(|device| match (&excluded, device.name()) {
                (Some(re), Ok(name)) => !re.is_match(&name),
                _ => true,
            })
            .collect();
        Ok(devices)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        sink: mpsc::Sender<Vec<SampleF32>>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let block: Vec<SampleF32> = data
                .iter()
                .map(|s| {
                    let f: f32 = s.to_float_sample().into();
                    f.clamp(-1.0, 1.0)
                })
                .collect();

            match sink.try_send(block) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("入力ブロックの送信失敗: バッファ満杯");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // セッション終了後に届いたブロック
                }
            }
        };

        let error_callback = move |err| {
            log::error!("入力ストリームエラー: {}", err);
        };

        device
            .build_input_stream(config, data_callback, error_callback, None)
            .context("入力ストリームの構築に失敗")
    }
}

impl AudioDevice for CpalDevice {
    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        sink: mpsc::Sender<Vec<SampleF32>>,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let device = self
            .find_device(&constraints.device_id)
            .map_err(|e| CaptureError::Device(format!("{:#}", e)))?;
        log::info!("入力デバイス: {:?}", device.name());

        // cpal はエコーキャンセル等の切り替えを公開していないため、要求内容を記録するのみ
        if constraints.echo_cancellation
            || constraints.noise_suppression
            || constraints.auto_gain_control
        {
            log::debug!(
                "音声処理の要求: echo_cancellation={}, noise_suppression={}, auto_gain_control={} (ホスト側の設定に従います)",
                constraints.echo_cancellation,
                constraints.noise_suppression,
                constraints.auto_gain_control
            );
        }

        let default_config = device
            .default_input_config()
            .map_err(|e| CaptureError::Device(format!("デフォルト入力設定が取得できません: {}", e)))?;

        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: constraints.channels,
            sample_rate: cpal::SampleRate(constraints.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, sink),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, sink),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, sink),
            cpal::SampleFormat::I32 => Self::build_stream::<i32>(&device, &stream_config, sink),
            other => Err(anyhow::anyhow!(
                "サポートされていないサンプルフォーマット: {:?}",
                other
            )),
        }
        .map_err(|e| CaptureError::Device(format!("{:#}", e)))?;

        stream
            .play()
            .map_err(|e| CaptureError::Device(format!("ストリームの開始に失敗: {}", e)))?;

        log::info!("音声入力ストリームを開始しました");

        Ok(Box::new(CpalInputStream {
            stream: Some(stream),
            format: AudioFormat {
                sample_rate: constraints.sample_rate,
                channels: constraints.channels,
            },
        }))
    }
}

/// cpal の入力ストリーム
struct CpalInputStream {
    stream: Option<cpal::Stream>,
    format: AudioFormat,
}

impl InputStream for CpalInputStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| CaptureError::Teardown("入力ストリームは既に停止しています".to_string()))?;
        if let Err(e) = stream.pause() {
            log::warn!("入力ストリームの一時停止に失敗: {}", e);
        }
        drop(stream);
        log::info!("音声入力ストリームを停止しました");
        Ok(())
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.stream.is_some())
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        if self.stream.is_some() {
            let _ = self.stop();
        }
    }
}
