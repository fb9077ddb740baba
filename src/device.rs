use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// 仮想ケーブルとみなすデバイス名のキーワード (小文字)
pub const VIRTUAL_CABLE_KEYWORDS: &[&str] = &["cable", "virtual", "vb-audio", "voicemeeter"];

/// 出力デバイスのスナップショット
///
/// `index` は列挙順の番号で、設定ファイルの `output_device_id` と対応する。
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// 列挙順のインデックス
    pub index: usize,

    /// デバイス名
    pub name: String,

    /// 出力チャンネル数
    ///
    /// 既定設定が取得できなかったデバイスは 0 になる。
    pub channels: u16,

    /// 既定のサンプリングレート (Hz)
    pub sample_rate: u32,

    /// システムのデフォルト出力デバイスかどうか
    pub is_default: bool,
}

/// 出力デバイス一覧を取得
///
/// インデックスはホストの列挙順をそのまま使う。設定が取得できない
/// デバイスも一覧には残し、チャンネル数 0 として返す。
///
/// # Errors
///
/// デバイスの列挙自体に失敗した場合にエラーを返す。
pub fn list_outputs() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    for (index, device) in host
        .output_devices()
        .context("出力デバイスの列挙に失敗")?
        .enumerate()
    {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                log::warn!("デバイス {} の名前が取得できません: {}", index, e);
                format!("(不明なデバイス {})", index)
            }
        };

        let (channels, sample_rate) = match device.default_output_config() {
            Ok(config) => (config.channels(), config.sample_rate().0),
            Err(e) => {
                log::warn!("デバイス {} の既定設定が取得できません: {}", name, e);
                (0, 0)
            }
        };

        let is_default = default_name.as_deref() == Some(name.as_str());
        infos.push(DeviceInfo {
            index,
            name,
            channels,
            sample_rate,
            is_default,
        });
    }

    Ok(infos)
}

/// インデックス指定で出力デバイスを取得
///
/// インデックスは [`list_outputs`] の列挙順と一致する。
///
/// # Errors
///
/// 列挙に失敗した場合、またはインデックスが範囲外の場合にエラーを返す。
pub fn output_device_by_index(index: usize) -> Result<cpal::Device> {
    let host = cpal::default_host();
    host.output_devices()
        .context("出力デバイスの列挙に失敗")?
        .nth(index)
        .with_context(|| format!("デバイス {} が見つかりません", index))
}

/// デバイス一覧から仮想ケーブルを探す
///
/// デバイス名を小文字化し、[`VIRTUAL_CABLE_KEYWORDS`] のいずれかを
/// 部分文字列として含む最初の出力可能デバイスを返す。
pub fn match_virtual_cable(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices.iter().find(|d| {
        if d.channels == 0 {
            return false;
        }
        let name = d.name.to_lowercase();
        VIRTUAL_CABLE_KEYWORDS.iter().any(|kw| name.contains(kw))
    })
}

/// 接続中のデバイスから仮想ケーブルを探す
///
/// # Errors
///
/// デバイスの列挙に失敗した場合にエラーを返す。
/// 仮想ケーブルが見つからないだけなら `Ok(None)` を返す。
pub fn find_virtual_cable() -> Result<Option<DeviceInfo>> {
    let devices = list_outputs()?;
    Ok(match_virtual_cable(&devices).cloned())
}

/// デバイス一覧を表示
///
/// # Arguments
///
/// * `selected` - 設定で選択中のデバイスインデックス
pub fn print_devices(devices: &[DeviceInfo], selected: Option<usize>) {
    println!("利用可能な出力デバイス:");
    println!();

    for device in devices {
        let mut markers = String::new();
        if device.is_default {
            markers.push_str(" (デフォルト)");
        }
        if selected == Some(device.index) {
            markers.push_str(" (選択中)");
        }
        println!("  [{}] {}{}", device.index, device.name, markers);
        if device.channels > 0 {
            println!(
                "      {}ch, {} Hz",
                device.channels, device.sample_rate
            );
        } else {
            println!("      出力設定を取得できません");
        }
    }
    println!();
}
