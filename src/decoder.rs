use crate::types::AudioClip;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// ファイルを開いてフォーマットを判別する
fn probe_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path)
        .with_context(|| format!("ファイルのオープンに失敗: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // 拡張子をヒントとして渡す
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("フォーマットの判別に失敗: {:?}", path))?;

    Ok(probed.format)
}

/// 音声ファイルを最後までデコードする
///
/// コンテナの既定トラックをパケット単位でデコードし、
/// インターリーブ済みf32サンプルとしてまとめて返す。
/// 途中の壊れたパケットは警告を出してスキップする。
///
/// # Arguments
///
/// * `path` - 音声ファイルのパス
///
/// # Errors
///
/// ファイルが開けない、フォーマットが判別できない、
/// または1サンプルもデコードできなかった場合にエラーを返す。
///
/// # Examples
///
/// ```no_run
/// # use pondashi::decoder::decode_file;
/// # use std::path::Path;
/// let clip = decode_file(Path::new("sounds/airhorn.wav")).unwrap();
/// println!("{} Hz, {} ch", clip.sample_rate, clip.channels);
/// ```
pub fn decode_file(path: &Path) -> Result<AudioClip> {
    let mut format = probe_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .with_context(|| format!("オーディオトラックが見つかりません: {:?}", path))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .with_context(|| format!("デコーダの作成に失敗: {:?}", path))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("パケットの読み込みに失敗: {}: {:?}", e, path);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate.is_none() {
                    sample_rate = Some(spec.rate);
                }
                if channels.is_none() {
                    channels = Some(spec.channels.count() as u16);
                }
                if sample_buf.is_none() {
                    let duration = decoded.capacity() as u64;
                    sample_buf = Some(SampleBuffer::new(duration, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(e) => {
                log::warn!("パケットのデコードに失敗 (スキップ): {}: {:?}", e, path);
                continue;
            }
        }
    }

    if samples.is_empty() {
        bail!("音声データがありません: {:?}", path);
    }

    let sample_rate =
        sample_rate.with_context(|| format!("サンプルレートが特定できません: {:?}", path))?;
    let channels =
        channels.with_context(|| format!("チャンネル数が特定できません: {:?}", path))?;

    log::debug!(
        "デコード完了: {:?} ({} Hz, {} ch, {} フレーム)",
        path,
        sample_rate,
        channels,
        samples.len() / channels.max(1) as usize
    );

    Ok(AudioClip {
        samples,
        sample_rate,
        channels,
    })
}

/// 音声ファイルとして読めるか検査する
///
/// ヘッダの判別とオーディオトラックの存在確認のみを行い、
/// 全体のデコードはしない。
///
/// # Errors
///
/// ファイルが開けない、フォーマットが判別できない、
/// またはオーディオトラックが存在しない場合にエラーを返す。
pub fn probe_file(path: &Path) -> Result<()> {
    let format = probe_format(path)?;
    format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .with_context(|| format!("オーディオトラックが見つかりません: {:?}", path))?;
    Ok(())
}
