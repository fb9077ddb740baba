//! pondashi - 仮想ケーブル向けサウンドボード
//!
//! このクレートは、登録したサウンドファイルをコマンドまたはグローバル
//! ホットキーで再生し、仮想オーディオケーブルなど任意の出力デバイスに
//! 流すためのCLIツールを提供します。
//!
//! # 主な機能
//!
//! - **サウンドの走査**: ディレクトリを再帰的に走査し、読めるファイルだけを登録
//! - **デバイス選択**: 出力デバイスの列挙と仮想ケーブルの自動検出
//! - **デコードと再生**: 主要フォーマット (wav/mp3/ogg/flac/m4a) を全デコードして再生
//! - **グローバルホットキー**: どのアプリにフォーカスがあってもキー操作で再生
//! - **JSON設定**: デバイス・音量・ホットキー割り当てをホームディレクトリに永続化
//!
//! # アーキテクチャ
//!
//! ```text
//! [CLI] → [Soundboard] ─ 名前解決 ─→ [decoder]
//!   │                                    │
//!   │                               AudioClip
//!   │                                    ↓
//!   └──── [hotkey listener] ──────→ [Player] → [出力デバイス]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use pondashi::config::Config;
//! use pondashi::soundboard::Soundboard;
//!
//! let config = Config::load();
//! let board = Soundboard::scan(&config.sounds_dir);
//! for name in board.names() {
//!     println!("{}", name);
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod device;
pub mod hotkey;
pub mod player;
pub mod soundboard;
pub mod types;
