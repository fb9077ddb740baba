use crate::decoder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 対応するサウンドファイルの拡張子 (小文字)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "flac", "m4a"];

/// デフォルトホットキーで割り当てるサウンドの上限 (F1〜F10)
const DEFAULT_HOTKEY_COUNT: usize = 10;

/// 対応拡張子かどうかを判定する (大文字小文字は区別しない)
pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// サウンドファイルの一覧
///
/// ディレクトリを再帰的に走査し、サウンド名 (拡張子を除いた
/// ファイル名) からパスへの対応表を保持する。同名のファイルが
/// 複数ある場合は後から走査された方で上書きされる。
pub struct Soundboard {
    sounds: BTreeMap<String, PathBuf>,
    invalid: Vec<(PathBuf, String)>,
}

impl Soundboard {
    /// ディレクトリを走査してサウンド一覧を構築する
    ///
    /// 対応拡張子のファイルだけを対象にし、各ファイルは音声として
    /// 読めるかを検査する。読めないファイルは一覧から除外され、
    /// [`invalid_files`](Self::invalid_files) で理由つきで参照できる。
    /// ディレクトリが存在しない場合は警告を出して空の一覧を返す。
    pub fn scan(sounds_dir: &Path) -> Self {
        let mut sounds = BTreeMap::new();
        let mut invalid = Vec::new();

        if !sounds_dir.is_dir() {
            log::warn!("サウンドディレクトリが見つかりません: {:?}", sounds_dir);
            return Self { sounds, invalid };
        }

        for entry in WalkDir::new(sounds_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("ディレクトリの走査に失敗 (スキップ): {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !is_supported_extension(path) {
                continue;
            }

            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => {
                    log::warn!("ファイル名が取得できません (スキップ): {:?}", path);
                    continue;
                }
            };

            match decoder::probe_file(path) {
                Ok(()) => {
                    if let Some(prev) = sounds.insert(stem.to_string(), path.to_path_buf()) {
                        log::warn!(
                            "サウンド名が重複しています。後から見つかった方を使います: {} ({:?} → {:?})",
                            stem,
                            prev,
                            path
                        );
                    }
                }
                Err(e) => {
                    log::warn!("読めないサウンドファイル (除外): {:?}", path);
                    invalid.push((path.to_path_buf(), format!("{:#}", e)));
                }
            }
        }

        if invalid.is_empty() {
            log::info!("サウンドを {} 件読み込みました", sounds.len());
        } else {
            log::info!(
                "サウンドを {} 件読み込みました ({} 件は読めないため除外)",
                sounds.len(),
                invalid.len()
            );
        }

        Self { sounds, invalid }
    }

    /// サウンド名からパスを引く
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.sounds.get(name).map(PathBuf::as_path)
    }

    /// ソート済みのサウンド名一覧
    pub fn names(&self) -> Vec<&str> {
        self.sounds.keys().map(String::as_str).collect()
    }

    /// 読み込めたサウンドの数
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    /// 読めなかったファイルの一覧 (パスと理由)
    pub fn invalid_files(&self) -> &[(PathBuf, String)] {
        &self.invalid
    }

    /// F1〜F10 を名前順の先頭サウンドに割り当てたホットキー表を作る
    ///
    /// `listen` で設定にホットキーがひとつもない場合に使われる。
    pub fn default_hotkeys(&self) -> BTreeMap<String, String> {
        self.sounds
            .keys()
            .take(DEFAULT_HOTKEY_COUNT)
            .enumerate()
            .map(|(i, name)| (format!("f{}", i + 1), name.clone()))
            .collect()
    }

    /// サウンド一覧を表示
    ///
    /// # Arguments
    ///
    /// * `hotkeys` - 組み合わせ文字列 → サウンド名の対応表。割り当てがあれば併記する
    pub fn print_sounds(&self, hotkeys: &BTreeMap<String, String>) {
        if self.sounds.is_empty() {
            println!("サウンドが見つかりません");
            return;
        }

        println!("サウンド一覧 ({} 件):", self.sounds.len());
        println!();
        for name in self.sounds.keys() {
            let combos: Vec<&str> = hotkeys
                .iter()
                .filter(|(_, sound)| sound.as_str() == name.as_str())
                .map(|(combo, _)| combo.as_str())
                .collect();
            if combos.is_empty() {
                println!("  {}", name);
            } else {
                println!("  {:<24} [{}]", name, combos.join(", "));
            }
        }

        if !self.invalid.is_empty() {
            println!();
            println!(
                "読めないファイルが {} 件あります (validate で詳細を表示)",
                self.invalid.len()
            );
        }
    }

    /// 読めなかったファイルの詳細を表示
    pub fn print_invalid(&self) {
        if self.invalid.is_empty() {
            println!("すべてのサウンドファイルが読み込み可能です");
            return;
        }

        println!("読めないサウンドファイル ({} 件):", self.invalid.len());
        println!();
        for (path, reason) in &self.invalid {
            println!("  {:?}", path);
            println!("      {}", reason);
        }
    }
}
