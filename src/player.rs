use crate::types::AudioClip;
use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 再生完了のポーリング間隔 (ミリ秒)
const DRAIN_POLL_MS: u64 = 20;

/// 最終バッファがデバイスから出力されるまでの待機時間 (ミリ秒)
const DEVICE_FLUSH_MS: u64 = 150;

/// 音量を 0.0〜1.0 に丸める
///
/// NaN は 0.0 (無音) として扱う。
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// インターリーブ済みサンプルのチャンネル数を変換する
///
/// 出力チャンネル c には入力チャンネル `c % src_channels` の値を入れる。
/// モノラル → Nチャンネルでは全チャンネルに同じ値が入り、
/// 入力の方が多い場合は先頭の `dst_channels` チャンネルだけが残る。
pub fn adapt_channels(samples: &[f32], src_channels: u16, dst_channels: u16) -> Vec<f32> {
    if src_channels == 0 || dst_channels == 0 || samples.is_empty() {
        return Vec::new();
    }
    if src_channels == dst_channels {
        return samples.to_vec();
    }

    let src = src_channels as usize;
    let dst = dst_channels as usize;
    let frames = samples.len() / src;

    let mut out = Vec::with_capacity(frames * dst);
    for frame in 0..frames {
        for ch in 0..dst {
            out.push(samples[frame * src + (ch % src)]);
        }
    }
    out
}

/// 全サンプルに音量を掛ける
pub fn apply_volume(mut samples: Vec<f32>, volume: f32) -> Vec<f32> {
    for sample in &mut samples {
        *sample *= volume;
    }
    samples
}

/// 再生位置を共有するバッファ
///
/// コールバックが `pos` を進めながらサンプルをデバイスへ書き出す。
/// バッファを使い切った後は無音で埋める。
struct PlaybackCursor {
    samples: Vec<f32>,
    pos: AtomicUsize,
}

impl PlaybackCursor {
    fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            pos: AtomicUsize::new(0),
        }
    }

    /// 出力バッファを埋めて再生位置を進める
    fn fill<T>(&self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let start = self.pos.fetch_add(data.len(), Ordering::SeqCst);
        for (i, slot) in data.iter_mut().enumerate() {
            let idx = start + i;
            *slot = if idx < self.samples.len() {
                T::from_sample(self.samples[idx])
            } else {
                Sample::EQUILIBRIUM
            };
        }
    }

    /// 再生位置を末尾へ進め、以後の出力を無音にする
    fn halt(&self) {
        self.pos.store(self.samples.len(), Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.pos.load(Ordering::SeqCst) >= self.samples.len()
    }
}

/// 再生スレッドへのコマンド
enum PlayerCommand {
    Play {
        clip: AudioClip,
        volume: f32,
        done_tx: Option<Sender<Result<()>>>,
    },
    Stop,
    WaitIdle {
        done_tx: Sender<()>,
    },
    Shutdown,
}

/// 音声再生マネージャ
///
/// cpalのStreamはスレッド間で移動できないため、専用スレッドが
/// デバイスとストリームを所有し、コマンドチャンネル経由で操作する。
/// 再生中に次のクリップが来た場合は現在の再生を打ち切って差し替える。
pub struct Player {
    cmd_tx: Sender<PlayerCommand>,
    device_name: String,
    handle: Option<thread::JoinHandle<()>>,
}

impl Player {
    /// 新しいPlayerを作成
    ///
    /// # Arguments
    ///
    /// * `device_index` - 出力デバイスのインデックス。Noneならデフォルトデバイス
    ///
    /// # Errors
    ///
    /// デバイスが見つからない、または出力設定が取得できない場合にエラーを返す。
    pub fn new(device_index: Option<usize>) -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("audio-player".to_string())
            .spawn(move || run_worker(device_index, ready_tx, cmd_rx))
            .context("再生スレッドの起動に失敗")?;

        let device_name = ready_rx
            .recv()
            .context("再生スレッドが応答しません")??;

        Ok(Self {
            cmd_tx,
            device_name,
            handle: Some(handle),
        })
    }

    /// 選択された出力デバイス名
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// クリップを再生
    ///
    /// 音量は 0.0〜1.0 に丸めてから適用する。`blocking` がtrueの場合は
    /// 再生が終わるか [`stop`](Self::stop) で打ち切られるまで戻らない。
    /// falseの場合はすぐに戻り、再生はバックグラウンドで続く。
    ///
    /// # Errors
    ///
    /// ストリームの構築に失敗した場合にエラーを返す (blocking時のみ)。
    /// 非blocking時の再生エラーはログに出力される。
    pub fn play(&self, clip: AudioClip, volume: f32, blocking: bool) -> Result<()> {
        if blocking {
            let (done_tx, done_rx) = bounded(1);
            self.cmd_tx
                .send(PlayerCommand::Play {
                    clip,
                    volume,
                    done_tx: Some(done_tx),
                })
                .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))?;
            done_rx
                .recv()
                .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))?
        } else {
            self.cmd_tx
                .send(PlayerCommand::Play {
                    clip,
                    volume,
                    done_tx: None,
                })
                .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))
        }
    }

    /// 現在の再生を停止
    ///
    /// ブロッキング再生中に別スレッドから呼ぶと、そのクリップを
    /// 打ち切って呼び出し元を解放する。
    pub fn stop(&self) -> Result<()> {
        self.cmd_tx
            .send(PlayerCommand::Stop)
            .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))
    }

    /// バックグラウンド再生が終わるまで待つ
    ///
    /// 何も再生していない場合はすぐに戻る。
    pub fn wait_idle(&self) -> Result<()> {
        let (done_tx, done_rx) = bounded(1);
        self.cmd_tx
            .send(PlayerCommand::WaitIdle { done_tx })
            .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))?;
        done_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("再生スレッドが停止しています"))
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::debug!("再生スレッドを終了しました");
    }
}

/// 再生中のストリームと、完了を待っている呼び出し元
struct Playing {
    stream: Stream,
    cursor: Arc<PlaybackCursor>,
    done_tx: Option<Sender<Result<()>>>,
}

/// 出力デバイスを解決する
fn resolve_device(device_index: Option<usize>) -> Result<Device> {
    match device_index {
        Some(index) => crate::device::output_device_by_index(index),
        None => cpal::default_host()
            .default_output_device()
            .context("デフォルト出力デバイスが見つかりません"),
    }
}

/// 再生スレッドの本体
fn run_worker(
    device_index: Option<usize>,
    ready_tx: Sender<Result<String>>,
    cmd_rx: Receiver<PlayerCommand>,
) {
    let setup: Result<(Device, String)> = (|| {
        let device = resolve_device(device_index)?;
        let name = device
            .name()
            .unwrap_or_else(|_| "(名称不明)".to_string());
        let default_config = device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;
        log::info!(
            "出力デバイス: {} ({:?}, {}Hz, {}ch)",
            name,
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );
        Ok((device, name))
    })();

    let (device, name) = match setup {
        Ok(v) => v,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(name));

    let mut current: Option<Playing> = None;
    let mut idle_waiters: Vec<Sender<()>> = Vec::new();

    loop {
        // 再生中は完了を検出するため短い間隔でポーリングしつつ、
        // 停止や差し替えのコマンドも受け付ける
        let cmd = if current.is_some() {
            match cmd_rx.recv_timeout(Duration::from_millis(DRAIN_POLL_MS)) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        match cmd {
            Some(PlayerCommand::Play {
                clip,
                volume,
                done_tx,
            }) => {
                // 再生中のストリームは打ち切って差し替える
                finish_current(&mut current);
                match start_clip(&device, clip, volume) {
                    Ok((stream, cursor)) => {
                        current = Some(Playing {
                            stream,
                            cursor,
                            done_tx,
                        });
                    }
                    Err(e) => match done_tx {
                        Some(done_tx) => {
                            let _ = done_tx.send(Err(e));
                        }
                        None => log::error!("再生の開始に失敗: {:#}", e),
                    },
                }
            }
            Some(PlayerCommand::Stop) => {
                if current.is_some() {
                    finish_current(&mut current);
                    log::info!("再生を停止しました");
                }
            }
            Some(PlayerCommand::WaitIdle { done_tx }) => {
                idle_waiters.push(done_tx);
            }
            Some(PlayerCommand::Shutdown) => break,
            None => {}
        }

        // 末尾まで再生し終えたら、デバイス側の出力完了を待って閉じる
        let drained = current
            .as_ref()
            .map(|playing| playing.cursor.is_done())
            .unwrap_or(false);
        if drained {
            thread::sleep(Duration::from_millis(DEVICE_FLUSH_MS));
            finish_current(&mut current);
        }

        if current.is_none() {
            for done_tx in idle_waiters.drain(..) {
                let _ = done_tx.send(());
            }
        }
    }

    // 終了時もブロック中の呼び出し元を解放する
    finish_current(&mut current);
    for done_tx in idle_waiters.drain(..) {
        let _ = done_tx.send(());
    }
}

/// 現在のストリームを閉じ、完了を待っている呼び出し元へ通知する
///
/// ストリームの破棄とコールバックの実行は競合しうるため、
/// 先にカーソルを止めて残りの出力を無音にする。
fn finish_current(current: &mut Option<Playing>) {
    if let Some(playing) = current.take() {
        playing.cursor.halt();
        drop(playing.stream);
        if let Some(done_tx) = playing.done_tx {
            let _ = done_tx.send(Ok(()));
        }
    }
}

/// クリップのストリームを構築して再生を開始する
///
/// クリップのサンプルレートをそのままストリームに要求するため、
/// デバイスが対応しないレートの場合はエラーになる。
fn start_clip(
    device: &Device,
    clip: AudioClip,
    volume: f32,
) -> Result<(Stream, Arc<PlaybackCursor>)> {
    if clip.channels == 0 || clip.samples.is_empty() {
        bail!("空のクリップは再生できません");
    }

    let default_config = device
        .default_output_config()
        .context("デフォルト出力設定が取得できません")?;
    let device_channels = default_config.channels();
    if device_channels == 0 {
        bail!("出力チャンネルがありません");
    }

    let volume = clamp_volume(volume);
    let adapted = adapt_channels(&clip.samples, clip.channels, device_channels);
    let samples = apply_volume(adapted, volume);

    log::debug!(
        "再生開始: {}Hz, {}ch → {}ch, 音量 {:.2}, {} フレーム",
        clip.sample_rate,
        clip.channels,
        device_channels,
        volume,
        samples.len() / device_channels as usize
    );

    let cursor = Arc::new(PlaybackCursor::new(samples));
    let config = StreamConfig {
        channels: device_channels,
        sample_rate: cpal::SampleRate(clip.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match default_config.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(device, &config, cursor.clone())?,
        SampleFormat::I16 => build_stream::<i16>(device, &config, cursor.clone())?,
        SampleFormat::U16 => build_stream::<u16>(device, &config, cursor.clone())?,
        other => bail!("サポートされていないサンプルフォーマット: {:?}", other),
    };

    stream.play().context("ストリームの再生開始に失敗")?;
    Ok((stream, cursor))
}

/// 指定されたサンプルフォーマットで出力ストリームを構築
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    cursor: Arc<PlaybackCursor>,
) -> Result<Stream>
where
    T: SizedSample + Sample + FromSample<f32> + Send + 'static,
{
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                cursor.fill(data);
            },
            move |err| {
                log::error!("出力ストリームエラー: {}", err);
            },
            None,
        )
        .context("出力ストリームの構築に失敗")?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(0.7), 0.7);
        assert_eq!(clamp_volume(1.5), 1.0);
        assert_eq!(clamp_volume(-0.5), 0.0);
        assert_eq!(clamp_volume(0.0), 0.0);
        assert_eq!(clamp_volume(1.0), 1.0);
    }

    #[test]
    fn test_clamp_volume_non_finite() {
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(f32::INFINITY), 1.0);
        assert_eq!(clamp_volume(f32::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_adapt_channels_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(adapt_channels(&samples, 2, 2), samples);
    }

    #[test]
    fn test_adapt_channels_mono_to_stereo() {
        let samples = vec![0.1, 0.2];
        assert_eq!(adapt_channels(&samples, 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_adapt_channels_mono_to_many() {
        let samples = vec![0.5];
        assert_eq!(adapt_channels(&samples, 1, 4), vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_adapt_channels_stereo_to_mono() {
        // 先頭チャンネルだけが残る
        let samples = vec![0.1, 0.9, 0.2, 0.8];
        assert_eq!(adapt_channels(&samples, 2, 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_adapt_channels_surround_to_stereo() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(adapt_channels(&samples, 4, 2), vec![0.1, 0.2]);
    }

    #[test]
    fn test_adapt_channels_empty() {
        assert!(adapt_channels(&[], 1, 2).is_empty());
        assert!(adapt_channels(&[0.1], 0, 2).is_empty());
        assert!(adapt_channels(&[0.1], 1, 0).is_empty());
    }

    #[test]
    fn test_apply_volume() {
        let samples = vec![0.2, -0.4, 1.0];
        let result = apply_volume(samples, 0.5);
        assert_eq!(result, vec![0.1, -0.2, 0.5]);
    }

    #[test]
    fn test_apply_volume_zero_silences() {
        let samples = vec![0.2, -0.4, 1.0];
        let result = apply_volume(samples, 0.0);
        assert!(result.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_cursor_fill_f32() {
        let cursor = PlaybackCursor::new(vec![0.1, 0.2, 0.3]);
        let mut out = [0.0f32; 2];

        cursor.fill(&mut out);
        assert_eq!(out, [0.1, 0.2]);
        assert!(!cursor.is_done());

        // 残り1サンプル + 無音埋め
        cursor.fill(&mut out);
        assert_eq!(out, [0.3, 0.0]);
        assert!(cursor.is_done());
    }

    #[test]
    fn test_cursor_fill_converts_to_i16() {
        let cursor = PlaybackCursor::new(vec![0.5, -0.5]);
        let mut out = [0i16; 4];
        cursor.fill(&mut out);

        assert!((out[0] - 16384).abs() <= 1);
        assert!((out[1] + 16384).abs() <= 1);
        // バッファを使い切った後は無音
        assert_eq!(out[2], 0);
        assert_eq!(out[3], 0);
    }

    #[test]
    fn test_cursor_halt() {
        let cursor = PlaybackCursor::new(vec![0.5; 8]);
        let mut out = [0.0f32; 2];

        cursor.fill(&mut out);
        assert!(!cursor.is_done());

        cursor.halt();
        assert!(cursor.is_done());

        // 停止後は無音のみを出力する
        cursor.fill(&mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_cursor_empty_is_done() {
        let cursor = PlaybackCursor::new(Vec::new());
        assert!(cursor.is_done());
    }
}
