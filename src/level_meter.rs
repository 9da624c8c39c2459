use crate::config::MeterConfig;
use crate::types::SampleF32;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// dB → バイト値変換の下限
const MIN_DECIBELS: f32 = -100.0;
/// dB → バイト値変換の上限
const MAX_DECIBELS: f32 = -30.0;

/// 入力レベルの周波数解析器
///
/// 小さい解析サイズ（既定32点）で DFT をかけ、各ビンの振幅を
/// 0–255 のバイト値に正規化する。レベルは
/// `mean(bins) * 2` を [0, 100] にクランプしたもの。
///
/// # アルゴリズム
///
/// 1. 直近 `fft_size` サンプルに Blackman 窓をかける
/// 2. DFT で `fft_size / 2` 個のビンの振幅 `|X[k]| / N` を求める
/// 3. dB に変換し、[-100, -30] dB を [0, 255] に線形写像する
/// 4. ビンの平均 × 2 をレベルとする
///
/// # Examples
///
/// ```
/// # use sketch_explain::level_meter::LevelAnalyzer;
/// let analyzer = LevelAnalyzer::new(32);
/// assert_eq!(analyzer.level(&[0.0; 32]), 0);
/// ```
pub struct LevelAnalyzer {
    fft_size: usize,
    window: Vec<f32>,
}

impl LevelAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let window = (0..fft_size)
            .map(|i| {
                let a = 2.0 * PI * i as f32 / fft_size as f32;
                0.42 - 0.5 * a.cos() + 0.08 * (2.0 * a).cos()
            })
            .collect();
        Self { fft_size, window }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// 各周波数ビンのバイト値 (0–255)
    ///
    /// サンプルが `fft_size` に満たない場合は先頭をゼロ埋めする。
    pub fn byte_frequency_data(&self, samples: &[SampleF32]) -> Vec<u8> {
        let n = self.fft_size;
        let mut frame = vec![0.0f32; n];
        let take = samples.len().min(n);
        frame[n - take..].copy_from_slice(&samples[samples.len() - take..]);
        for (s, w) in frame.iter_mut().zip(self.window.iter()) {
            *s *= w;
        }

        (0..n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (i, &s) in frame.iter().enumerate() {
                    let phase = 2.0 * PI * k as f32 * i as f32 / n as f32;
                    re += s * phase.cos();
                    im -= s * phase.sin();
                }
                let magnitude = (re * re + im * im).sqrt() / n as f32;
                Self::magnitude_to_byte(magnitude)
            })
            .collect()
    }

    /// 入力レベル (0–100)
    pub fn level(&self, samples: &[SampleF32]) -> u8 {
        let bins = self.byte_frequency_data(samples);
        if bins.is_empty() {
            return 0;
        }
        let mean = bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32;
        (mean * 2.0).clamp(0.0, 100.0) as u8
    }

    fn magnitude_to_byte(magnitude: f32) -> u8 {
        if magnitude <= 0.0 {
            return 0;
        }
        let db = 20.0 * magnitude.log10();
        let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
        scaled.clamp(0.0, 255.0) as u8
    }
}

/// 解析用タップ
///
/// 入力コールバックから直近のモノラルサンプルを受け取り、
/// メーターループが読み出す。処理コンテキストが閉じられた後は書き込みを無視する。
#[derive(Clone)]
pub struct AnalyserTap {
    inner: Arc<Mutex<TapState>>,
}

struct TapState {
    samples: VecDeque<SampleF32>,
    capacity: usize,
    closed: bool,
}

impl AnalyserTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapState {
                samples: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                closed: false,
            })),
        }
    }

    /// インターリーブされたブロックをモノラルにして追加
    pub fn feed(&self, block: &[SampleF32], channels: u16) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if state.closed {
            return;
        }
        let channels = channels.max(1) as usize;
        for frame in block.chunks(channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            if state.samples.len() == state.capacity {
                state.samples.pop_front();
            }
            state.samples.push_back(mono);
        }
    }

    /// 直近のサンプルを取得
    pub fn snapshot(&self) -> Vec<SampleF32> {
        match self.inner.lock() {
            Ok(state) => state.samples.iter().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// タップを閉じる（以降の feed は無視される）
    pub fn close(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.closed = true;
            state.samples.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|s| s.closed).unwrap_or(true)
    }
}

/// レベルメーターの定期実行ループ
///
/// ブロッキングループではなく、一定間隔で起きるキャンセル可能なタスク。
/// 停止時に `cancel` し忘れると、閉じたコンテキストに対してタスクが残り続ける。
pub struct MeterLoop {
    task: Option<JoinHandle<()>>,
    level_rx: watch::Receiver<u8>,
}

impl MeterLoop {
    /// ループを開始
    ///
    /// tokio ランタイム上で呼ぶこと。
    pub fn spawn(config: &MeterConfig, tap: AnalyserTap) -> Self {
        let analyzer = LevelAnalyzer::new(config.fft_size);
        let period = Duration::from_millis(config.interval_ms.max(1));
        let (level_tx, level_rx) = watch::channel(0u8);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tap.is_closed() {
                    log::debug!("レベルメーター: コンテキストが閉じられたため終了");
                    break;
                }
                let level = analyzer.level(&tap.snapshot());
                if level_tx.send(level).is_err() {
                    break;
                }
            }
        });

        Self {
            task: Some(task),
            level_rx,
        }
    }

    /// レベル購読用のレシーバ
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.level_rx.clone()
    }

    /// 最新のレベル
    pub fn current(&self) -> u8 {
        *self.level_rx.borrow()
    }

    /// ループを止める（何度呼んでもよい）
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("レベルメーターを停止しました");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for MeterLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(amplitude: f32, bin: usize, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / n as f32).sin() * amplitude)
            .collect()
    }

    #[test]
    fn test_silence_is_zero() {
        let analyzer = LevelAnalyzer::new(32);
        assert_eq!(analyzer.level(&[0.0; 32]), 0);
        assert!(analyzer.byte_frequency_data(&[0.0; 32]).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bin_count_is_half_fft_size() {
        let analyzer = LevelAnalyzer::new(32);
        assert_eq!(analyzer.byte_frequency_data(&[0.1; 32]).len(), 16);
    }

    #[test]
    fn test_louder_input_gives_higher_level() {
        let analyzer = LevelAnalyzer::new(32);
        let quiet = analyzer.level(&sine(0.001, 4, 32));
        let loud = analyzer.level(&sine(0.8, 4, 32));
        assert!(loud > quiet, "loud={} quiet={}", loud, quiet);
        assert!(loud <= 100);
    }

    #[test]
    fn test_level_is_twice_mean_bin_clamped() {
        fn expected(bins: &[u8]) -> u8 {
            let mean = bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32;
            (mean * 2.0).clamp(0.0, 100.0) as u8
        }

        let analyzer = LevelAnalyzer::new(32);
        let mut impulse = vec![0.0f32; 32];
        impulse[16] = 1.0;
        let silence = vec![0.0f32; 32];
        let mid = sine(0.001, 4, 32);
        let saturating = sine(0.8, 4, 32);

        for samples in [&silence, &mid, &saturating, &impulse] {
            let bins = analyzer.byte_frequency_data(samples);
            assert_eq!(analyzer.level(samples), expected(&bins));
        }

        assert_eq!(analyzer.level(&silence), 0);
        let mid_level = analyzer.level(&mid);
        assert!(mid_level > 0 && mid_level < 100, "mid={}", mid_level);
        assert_eq!(analyzer.level(&saturating), 100);
        // 窓の中央のインパルスは全ビンがほぼ上限の -30 dB になる
        assert!(analyzer.byte_frequency_data(&impulse).iter().all(|&b| b >= 250));
        assert_eq!(analyzer.level(&impulse), 100);
    }

    #[test]
    fn test_peak_bin_dominates() {
        let analyzer = LevelAnalyzer::new(32);
        // 窓の主ローブが隣のビンまで広がるので、飽和しない振幅で比べる
        let bins = analyzer.byte_frequency_data(&sine(0.08, 4, 32));
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 4);
        assert!(bins[4] > bins[3]);
        assert!(bins[4] > bins[5]);
        assert!(bins[4] < 255);
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let analyzer = LevelAnalyzer::new(32);
        let bins = analyzer.byte_frequency_data(&[0.5; 4]);
        assert_eq!(bins.len(), 16);
    }

    #[test]
    fn test_tap_keeps_latest_mono_samples() {
        let tap = AnalyserTap::new(4);
        tap.feed(&[0.2, 0.4, 0.6, 0.8, 1.0, 1.0], 2);
        assert_eq!(tap.snapshot().len(), 3);
        tap.feed(&[0.0, 0.0, 0.0, 0.0], 2);
        let snap = tap.snapshot();
        assert_eq!(snap.len(), 4);
        assert!((snap[0] - 0.7).abs() < 1e-6);
        assert_eq!(snap[3], 0.0);
    }

    #[test]
    fn test_closed_tap_ignores_feed() {
        let tap = AnalyserTap::new(8);
        tap.close();
        tap.feed(&[0.5; 8], 1);
        assert!(tap.snapshot().is_empty());
        assert!(tap.is_closed());
    }

    #[tokio::test]
    async fn test_meter_loop_publishes_levels() {
        let tap = AnalyserTap::new(32);
        tap.feed(&sine(0.8, 4, 32), 1);
        let config = MeterConfig {
            fft_size: 32,
            interval_ms: 5,
        };
        let mut meter = MeterLoop::spawn(&config, tap.clone());
        let mut rx = meter.subscribe();

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("レベルが更新されません")
            .unwrap();
        assert!(*rx.borrow() > 0);

        meter.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_and_is_idempotent() {
        let tap = AnalyserTap::new(32);
        let config = MeterConfig {
            fft_size: 32,
            interval_ms: 5,
        };
        let mut meter = MeterLoop::spawn(&config, tap);
        let mut rx = meter.subscribe();
        assert!(meter.is_running());

        meter.cancel();
        meter.cancel();
        assert!(!meter.is_running());

        // タスクが破棄されると送信側も落ちる
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.changed().await.is_ok() {}
        })
        .await;
        assert!(drained.is_ok(), "メーターループが残っています");
    }
}
