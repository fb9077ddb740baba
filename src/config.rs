use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 設定ファイルのホームディレクトリ以下のパス
const CONFIG_DIR_NAME: &str = ".pondashi";
const CONFIG_FILE_NAME: &str = "config.json";

/// サウンドボード設定
///
/// JSON形式で `~/.pondashi/config.json` に永続化される。
///
/// # デフォルト値
///
/// - `output_device_id`: なし (システムのデフォルトデバイス)
/// - `volume`: 1.0 (最大音量)
/// - `sounds_dir`: "sounds" (カレントディレクトリ基準)
/// - `hotkeys`: 空 (listen時にF1〜F10が自動割り当てされる)
///
/// # JSON例
///
/// ```json
/// {
///   "output_device_id": 3,
///   "volume": 0.8,
///   "sounds_dir": "sounds",
///   "hotkeys": { "ctrl+alt+a": "airhorn" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// 出力デバイスのインデックス
    ///
    /// `devices` コマンドで表示される番号。未設定の場合は
    /// システムのデフォルト出力デバイスが使われる。
    #[serde(default)]
    pub output_device_id: Option<usize>,

    /// 再生音量 (0.0〜1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// サウンドファイルを走査するディレクトリ
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: PathBuf,

    /// ホットキーの組み合わせ → サウンド名
    ///
    /// キーは "ctrl+alt+a" のような正規化済みの組み合わせ文字列。
    #[serde(default)]
    pub hotkeys: BTreeMap<String, String>,
}

// Default functions
fn default_volume() -> f32 {
    1.0
}

fn default_sounds_dir() -> PathBuf {
    PathBuf::from("sounds")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_device_id: None,
            volume: default_volume(),
            sounds_dir: default_sounds_dir(),
            hotkeys: BTreeMap::new(),
        }
    }
}

/// 設定ファイルの置き場所を返す
///
/// # Errors
///
/// ホームディレクトリが特定できない場合にエラーを返す。
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("ホームディレクトリが特定できません")?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// JSON形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Arguments
    ///
    /// * `path` - 設定ファイルのパス
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pondashi::config::Config;
    /// let config = Config::from_file("config.json").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            serde_json::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// 設定をファイルに書き出し
    ///
    /// 親ディレクトリが存在しない場合は作成する。
    /// 既存のファイルは上書きされる。
    ///
    /// # Arguments
    ///
    /// * `path` - 出力先のパス
    ///
    /// # Errors
    ///
    /// ディレクトリの作成またはファイルの書き込みに失敗した場合にエラーを返す。
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("設定ディレクトリの作成に失敗: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 既定の場所に設定を保存
    ///
    /// # Errors
    ///
    /// ホームディレクトリの特定または書き込みに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pondashi::config::Config;
    /// let config = Config::default();
    /// config.save().unwrap();
    /// ```
    pub fn save(&self) -> Result<()> {
        self.save_to(config_path()?)
    }

    /// 既定の場所の設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pondashi::config::Config;
    /// let config = Config::load();
    /// ```
    pub fn load() -> Self {
        match config_path() {
            Ok(path) => Self::load_or_default(path),
            Err(e) => {
                log::warn!("{:#}。デフォルト設定を使用します", e);
                Config::default()
            }
        }
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// ファイルが存在しない、または壊れている場合はデフォルト設定に
    /// フォールバックする。このときプロセスは終了しない。
    ///
    /// # Examples
    ///
    /// ```
    /// # use pondashi::config::Config;
    /// let config = Config::load_or_default("nonexistent.json");
    /// assert_eq!(config.volume, 1.0);
    /// ```
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::info!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path
            );
            return Config::default();
        }

        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{:#}。デフォルト設定を使用します", e);
                Config::default()
            }
        }
    }

    /// 音量を設定 (0.0〜1.0に丸める)
    ///
    /// NaN は 0.0 として扱う。保存される値は常に 0.0〜1.0 の有限値になる。
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output_device_id, None);
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.sounds_dir, PathBuf::from("sounds"));
        assert!(config.hotkeys.is_empty());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = Config::default();
        config.output_device_id = Some(3);
        config.set_volume(0.8);
        config
            .hotkeys
            .insert("ctrl+alt+a".to_string(), "airhorn".to_string());
        config.save_to(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.output_device_id, Some(3));
        assert_eq!(loaded.volume, 0.8);
        assert_eq!(loaded.hotkeys.get("ctrl+alt+a").map(String::as_str), Some("airhorn"));
    }

    #[test]
    fn test_custom_config() {
        let json_content = r#"
{
  "output_device_id": 5,
  "volume": 0.25,
  "sounds_dir": "/tmp/sounds",
  "hotkeys": {
    "f1": "seikai",
    "ctrl+alt+z": "zannen"
  }
}
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.output_device_id, Some(5));
        assert_eq!(config.volume, 0.25);
        assert_eq!(config.sounds_dir, PathBuf::from("/tmp/sounds"));
        assert_eq!(config.hotkeys.len(), 2);
        assert_eq!(config.hotkeys.get("f1").map(String::as_str), Some("seikai"));
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let json_content = r#"{ "volume": 0.5 }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        // 指定した値
        assert_eq!(config.volume, 0.5);

        // デフォルト値
        assert_eq!(config.output_device_id, None);
        assert_eq!(config.sounds_dir, PathBuf::from("sounds"));
        assert!(config.hotkeys.is_empty());
    }

    #[test]
    fn test_malformed_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ not json }").unwrap();
        temp_file.flush().unwrap();

        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_or_default(temp_dir.path().join("no_such.json"));

        // デフォルト設定が返されることを確認
        assert_eq!(config.output_device_id, None);
        assert_eq!(config.volume, 1.0);
        assert!(config.hotkeys.is_empty());
    }

    #[test]
    fn test_load_or_default_malformed_falls_back() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ this is not json").unwrap();
        temp_file.flush().unwrap();

        let config = Config::load_or_default(temp_file.path());
        assert_eq!(config.output_device_id, None);
        assert_eq!(config.volume, 1.0);
        assert!(config.hotkeys.is_empty());
    }

    #[test]
    fn test_load_or_default_reads_existing() {
        let temp_file = NamedTempFile::new().unwrap();

        let mut config = Config::default();
        config.set_volume(0.25);
        config.save_to(temp_file.path()).unwrap();

        let loaded = Config::load_or_default(temp_file.path());
        assert_eq!(loaded.volume, 0.25);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let config = Config::default();
        config.save_to(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_save_round_trip_stable() {
        // 保存 → 読み込み → 再保存でファイル内容が変わらないこと
        let temp_dir = TempDir::new().unwrap();
        let path1 = temp_dir.path().join("config1.json");
        let path2 = temp_dir.path().join("config2.json");

        let mut config = Config::default();
        config.output_device_id = Some(1);
        config.hotkeys.insert("f2".to_string(), "pon".to_string());
        config.save_to(&path1).unwrap();

        let loaded = Config::from_file(&path1).unwrap();
        loaded.save_to(&path2).unwrap();

        let content1 = fs::read_to_string(&path1).unwrap();
        let content2 = fs::read_to_string(&path2).unwrap();
        assert_eq!(content1, content2);
    }

    #[test]
    fn test_set_volume_clamps() {
        let mut config = Config::default();
        config.set_volume(1.5);
        assert_eq!(config.volume, 1.0);
        config.set_volume(-0.2);
        assert_eq!(config.volume, 0.0);
        config.set_volume(0.3);
        assert_eq!(config.volume, 0.3);
    }

    #[test]
    fn test_set_volume_non_finite() {
        let mut config = Config::default();
        config.set_volume(f32::NAN);
        assert_eq!(config.volume, 0.0);
        config.set_volume(f32::INFINITY);
        assert_eq!(config.volume, 1.0);
        config.set_volume(f32::NEG_INFINITY);
        assert_eq!(config.volume, 0.0);
    }

    #[test]
    fn test_nan_volume_round_trip() {
        // NaN を渡しても保存内容は読み込み可能なJSONのままで、
        // 他の設定値が失われないこと
        let temp_file = NamedTempFile::new().unwrap();

        let mut config = Config::default();
        config.output_device_id = Some(2);
        config.hotkeys.insert("f1".to_string(), "pon".to_string());
        config.set_volume(f32::NAN);
        config.save_to(temp_file.path()).unwrap();

        let loaded = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.volume, 0.0);
        assert_eq!(loaded.output_device_id, Some(2));
        assert_eq!(loaded.hotkeys.get("f1").map(String::as_str), Some("pon"));
    }
}
