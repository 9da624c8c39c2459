use crate::config::PlaybackConfig;
use crate::types::{AudioFormat, PcmFrames};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// 返答音声の再生
pub trait ReplyPlayer {
    /// 音声バイト列（MP3/WAV など）を再生する。再生中のものは止める
    fn play(&mut self, audio: &[u8]) -> Result<()>;
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

/// 返答音声をデコードして PCM フレーム列にする
///
/// コンテナは先頭バイトから判別する。壊れたパケットは読み飛ばす。
pub fn decode_reply(audio: &[u8]) -> Result<PcmFrames> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(audio.to_vec())), Default::default());
    let detected = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("返答音声の形式を判別できません")?;

    let mut reader = detected.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("返答音声にトラックがありません")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("返答音声のデコーダー作成失敗")?;

    let mut samples = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e).context("返答音声の読み込み失敗"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("返答音声の壊れたパケットを読み飛ばします: {}", e);
            }
            Err(e) => return Err(e).context("返答音声のデコード失敗"),
        }
    }

    if channels == 0 || sample_rate == 0 {
        anyhow::bail!("返答音声のフォーマットが不明です");
    }

    Ok(PcmFrames {
        format: AudioFormat {
            sample_rate,
            channels,
        },
        samples,
    })
}

/// 再生しない（playback.enabled = false のとき）
#[derive(Default)]
pub struct NullPlayer;

impl ReplyPlayer for NullPlayer {
    fn play(&mut self, audio: &[u8]) -> Result<()> {
        log::debug!("再生無効のため返答音声を破棄: {}バイト", audio.len());
        Ok(())
    }

    fn stop(&mut self) {}

    fn is_playing(&self) -> bool {
        false
    }
}

/// cpal で返答音声を再生する
pub struct CpalReplyPlayer {
    device: Device,
    stream: Option<Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
}

impl CpalReplyPlayer {
    pub fn new(config: &PlaybackConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = config.device.as_deref() {
            host.output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("出力デバイス '{}' が見つかりません", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("デフォルト出力デバイスが見つかりません"))?
        };

        log::info!("出力デバイス: {}", device.name()?);

        Ok(Self {
            device,
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("利用可能な出力デバイス:");
        println!();

        for (idx, device) in host.output_devices()?.enumerate() {
            let name = device.name()?;
            let is_default = host
                .default_output_device()
                .and_then(|d| d.name().ok())
                .map(|default_name| default_name == name)
                .unwrap_or(false);

            let marker = if is_default { " (デフォルト)" } else { "" };
            println!("  [{}] {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "      サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    fn build_stream<T>(&self, config: &StreamConfig) -> Result<Stream>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue.lock() else {
                        return;
                    };
                    for sample in data.iter_mut() {
                        *sample = match queue.pop_front() {
                            Some(s) => T::from_sample(s),
                            None => Sample::EQUILIBRIUM,
                        };
                    }
                },
                move |err| {
                    log::error!("出力ストリームエラー: {}", err);
                },
                None,
            )
            .context("出力ストリームの構築に失敗")
    }
}

impl ReplyPlayer for CpalReplyPlayer {
    fn play(&mut self, audio: &[u8]) -> Result<()> {
        self.stop();

        let frames = decode_reply(audio)?;
        log::info!(
            "返答音声を再生: {}Hz, {}ch, {:.1}秒",
            frames.format.sample_rate,
            frames.format.channels,
            frames.frame_count() as f64 / frames.format.sample_rate as f64
        );

        let default_config = self
            .device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;

        let config = StreamConfig {
            channels: frames.format.channels,
            sample_rate: cpal::SampleRate(frames.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
            queue.extend(frames.samples.iter().copied());
        }

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(&config)?,
            SampleFormat::I16 => self.build_stream::<i16>(&config)?,
            SampleFormat::U16 => self.build_stream::<u16>(&config)?,
            other => anyhow::bail!("サポートされていないサンプルフォーマット: {:?}", other),
        };

        stream.play().context("ストリームの再生開始に失敗")?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("返答音声の再生を停止しました");
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn is_playing(&self) -> bool {
        self.stream.is_some()
            && self
                .queue
                .lock()
                .map(|q| !q.is_empty())
                .unwrap_or(false)
    }
}

impl Drop for CpalReplyPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
