/// デコード済みオーディオクリップ
///
/// ファイルから全デコードした音声データを表現する。
/// サンプルはチャンネルインターリーブ済みの f32 (-1.0〜1.0) で保持する。
///
/// # Examples
///
/// ```
/// # use pondashi::types::AudioClip;
/// let clip = AudioClip {
///     samples: vec![0.0f32; 3200], // 100ms分 @ 16kHz ステレオ
///     sample_rate: 16000,
///     channels: 2,
/// };
/// assert_eq!(clip.frames(), 1600);
/// ```
#[derive(Clone, Debug)]
pub struct AudioClip {
    /// インターリーブ済みPCMサンプルの配列
    pub samples: Vec<f32>,

    /// サンプリングレート (Hz)
    ///
    /// 典型的な値: 8000, 16000, 44100, 48000
    pub sample_rate: u32,

    /// チャンネル数
    ///
    /// 1: モノラル, 2: ステレオ
    pub channels: u16,
}

impl AudioClip {
    /// フレーム数 (チャンネルをまたいだサンプルの組の数) を返す
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// 再生時間を秒で返す
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}
