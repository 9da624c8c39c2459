use crate::types::SessionState;
use std::fmt;

/// キャプチャ処理のエラー分類
///
/// 呼び出し側が回復方法を選べるよう、発生源ごとに分けている。
///
/// - `Device`: マイクの取得失敗。セッション開始を中止する（自動リトライなし）
/// - `Encoding`: 録音チャンクが無いなど、音声を WAV にできない
/// - `Transport`: 評価サービスとの通信失敗。定型のフォールバック応答で回復する
/// - `Teardown`: 停止済みリソースの再停止など。ログのみで握りつぶす
/// - `InvalidState`: 現在の状態では許可されない操作
#[derive(Debug)]
pub enum CaptureError {
    Device(String),
    Encoding(String),
    Transport(String),
    Teardown(String),
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Device(msg) => write!(f, "マイクを利用できません: {}", msg),
            CaptureError::Encoding(msg) => write!(f, "音声のエンコードに失敗: {}", msg),
            CaptureError::Transport(msg) => write!(f, "評価サービスとの通信に失敗: {}", msg),
            CaptureError::Teardown(msg) => write!(f, "リソース解放に失敗: {}", msg),
            CaptureError::InvalidState { action, state } => {
                write!(f, "状態 {:?} では {} できません", state, action)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

impl CaptureError {
    /// ユーザーにそのまま見せてよいエラーかどうか
    ///
    /// 通信エラーの詳細は表示しない。
    pub fn is_user_visible(&self) -> bool {
        matches!(self, CaptureError::Device(_) | CaptureError::InvalidState { .. })
    }
}
