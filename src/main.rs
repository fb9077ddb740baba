use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use rand::seq::SliceRandom;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use pondashi::config::Config;
use pondashi::decoder;
use pondashi::device;
use pondashi::hotkey::{self, HotkeyBinding};
use pondashi::player::Player;
use pondashi::soundboard::Soundboard;

#[derive(Parser)]
#[command(name = "pondashi")]
#[command(about = "仮想オーディオケーブルに音を流すサウンドボード")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 出力デバイス一覧を表示
    Devices,

    /// 出力デバイスを選択して保存
    Device {
        /// devices コマンドで表示されるインデックス
        id: usize,
    },

    /// 仮想ケーブルを自動検出して出力デバイスに設定
    Cable,

    /// 再生音量を設定 (0.0〜1.0)
    Volume { level: f32 },

    /// サウンド一覧を表示
    List,

    /// 読めないサウンドファイルの詳細を表示
    Validate,

    /// サウンドを再生
    Play {
        /// サウンド名 (拡張子を除いたファイル名)
        name: String,

        /// 再生が終わるまで待ってから完了を表示する
        #[arg(long)]
        blocking: bool,
    },

    /// ホットキーにサウンドを割り当てて保存
    Bind {
        /// 組み合わせ文字列 (例: f1, ctrl+alt+a)
        key: String,

        /// サウンド名
        sound: String,
    },

    /// 保存済みのホットキー割り当てを表示
    Hotkeys,

    /// グローバルホットキーでサウンドを再生
    Listen,

    /// 全サウンドを順番に再生
    Auto {
        /// 再生順をシャッフルする
        #[arg(long)]
        shuffle: bool,
    },
}

fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Devices => cmd_devices(&config),
        Commands::Device { id } => cmd_device(config, id),
        Commands::Cable => cmd_cable(config),
        Commands::Volume { level } => cmd_volume(config, level),
        Commands::List => cmd_list(&config),
        Commands::Validate => cmd_validate(&config),
        Commands::Play { name, blocking } => cmd_play(&config, &name, blocking),
        Commands::Bind { key, sound } => cmd_bind(config, &key, &sound),
        Commands::Hotkeys => cmd_hotkeys(&config),
        Commands::Listen => cmd_listen(&config),
        Commands::Auto { shuffle } => cmd_auto(&config, shuffle),
    }
}

/// サウンド名を解決してデコードし、プレイヤーに渡す
fn play_sound(
    board: &Soundboard,
    player: &Player,
    name: &str,
    volume: f32,
    blocking: bool,
) -> Result<()> {
    let path = board.get(name).with_context(|| {
        format!(
            "サウンド '{}' が見つかりません。list で一覧を確認してください",
            name
        )
    })?;
    let clip = decoder::decode_file(path)?;
    player.play(clip, volume, blocking)
}

fn cmd_devices(config: &Config) -> Result<()> {
    let devices = device::list_outputs()?;
    if devices.is_empty() {
        println!("出力デバイスが見つかりません");
        return Ok(());
    }
    device::print_devices(&devices, config.output_device_id);
    Ok(())
}

fn cmd_device(mut config: Config, id: usize) -> Result<()> {
    let devices = device::list_outputs()?;
    let selected = devices.iter().find(|d| d.index == id).with_context(|| {
        format!(
            "デバイス {} が見つかりません。devices で一覧を確認してください",
            id
        )
    })?;
    if selected.channels == 0 {
        bail!("デバイス {} ({}) は音声を出力できません", id, selected.name);
    }

    config.output_device_id = Some(id);
    config.save()?;
    println!("出力デバイスを設定しました: [{}] {}", id, selected.name);
    Ok(())
}

fn cmd_cable(mut config: Config) -> Result<()> {
    match device::find_virtual_cable()? {
        Some(cable) => {
            config.output_device_id = Some(cable.index);
            config.save()?;
            println!("仮想ケーブルを検出しました: [{}] {}", cable.index, cable.name);
        }
        None => {
            println!("仮想ケーブルが見つかりません。VB-CABLE などのインストールを確認してください");
            println!("devices で一覧を表示し、device <id> で手動設定もできます");
        }
    }
    Ok(())
}

fn cmd_volume(mut config: Config, level: f32) -> Result<()> {
    if !level.is_finite() {
        bail!("音量には 0.0〜1.0 の数値を指定してください: {}", level);
    }
    if !(0.0..=1.0).contains(&level) {
        log::warn!("音量 {} は 0.0〜1.0 の範囲に丸められます", level);
    }
    config.set_volume(level);
    config.save()?;
    println!("音量を {:.2} に設定しました", config.volume);
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let board = Soundboard::scan(&config.sounds_dir);
    board.print_sounds(&config.hotkeys);
    Ok(())
}

fn cmd_validate(config: &Config) -> Result<()> {
    let board = Soundboard::scan(&config.sounds_dir);
    board.print_invalid();
    Ok(())
}

fn cmd_play(config: &Config, name: &str, blocking: bool) -> Result<()> {
    let board = Soundboard::scan(&config.sounds_dir);
    let player = Player::new(config.output_device_id)?;

    if blocking {
        play_sound(&board, &player, name, config.volume, true)?;
        println!("再生が完了しました: {}", name);
    } else {
        play_sound(&board, &player, name, config.volume, false)?;
        println!("再生中: {} ({})", name, player.device_name());
        // プロセス終了でストリームが落ちる前に再生し切る
        player.wait_idle()?;
    }
    Ok(())
}

fn cmd_bind(mut config: Config, key: &str, sound: &str) -> Result<()> {
    let binding = HotkeyBinding::new(key, sound)?;

    let board = Soundboard::scan(&config.sounds_dir);
    if board.get(sound).is_none() {
        bail!(
            "サウンド '{}' が見つかりません。list で一覧を確認してください",
            sound
        );
    }

    if let Some(prev) = config
        .hotkeys
        .insert(binding.label.clone(), sound.to_string())
    {
        log::info!("既存の割り当てを上書きします: {} (旧: {})", binding.label, prev);
    }
    config.save()?;
    println!("ホットキーを割り当てました: {} → {}", binding.label, sound);
    Ok(())
}

fn cmd_hotkeys(config: &Config) -> Result<()> {
    if config.hotkeys.is_empty() {
        println!("ホットキーが設定されていません (bind <key> <sound> で追加)");
        return Ok(());
    }

    println!("ホットキー割り当て ({} 件):", config.hotkeys.len());
    println!();
    for (combo, sound) in &config.hotkeys {
        println!("  {:<20} → {}", combo, sound);
    }
    Ok(())
}

fn cmd_listen(config: &Config) -> Result<()> {
    let board = Soundboard::scan(&config.sounds_dir);
    if board.is_empty() {
        bail!("サウンドが見つかりません: {:?}", config.sounds_dir);
    }

    // 設定の割り当てを使う。未設定なら F1〜F10 を自動割り当て
    let entries = if config.hotkeys.is_empty() {
        log::info!("ホットキーが未設定のため F1〜F10 を自動割り当てします");
        board.default_hotkeys()
    } else {
        config.hotkeys.clone()
    };

    let mut bindings = Vec::new();
    for (combo_str, sound) in &entries {
        let binding = match HotkeyBinding::new(combo_str, sound) {
            Ok(binding) => binding,
            Err(e) => {
                log::warn!("無効なホットキーを無視します: {:#}", e);
                continue;
            }
        };
        if board.get(sound).is_none() {
            log::warn!(
                "割り当て先のサウンドが見つかりません (無視): {} → {}",
                binding.label,
                sound
            );
            continue;
        }
        bindings.push(binding);
    }
    if bindings.is_empty() {
        bail!("有効なホットキー割り当てがありません");
    }

    let player = Arc::new(Player::new(config.output_device_id)?);
    let board = Arc::new(board);

    println!("ホットキー待ち受け中 (Ctrl+C で終了):");
    println!();
    for binding in &bindings {
        println!("  {:<20} → {}", binding.label, binding.sound);
    }
    println!();

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let volume = config.volume;
    let cb_board = board.clone();
    let cb_player = player.clone();
    let handle = hotkey::spawn_listener(bindings, move |binding| {
        if let Err(e) = play_sound(&cb_board, &cb_player, &binding.sound, volume, false) {
            log::error!("サウンド '{}' の再生に失敗: {:#}", binding.sound, e);
        }
    })?;

    while running.load(Ordering::SeqCst) && !handle.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }

    // 監視スレッドが先に死んだ場合はその理由を返す
    if handle.is_finished() {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("監視スレッドが異常終了しました"),
        }
    }

    log::info!("ホットキーの待ち受けを終了します");
    Ok(())
}

fn cmd_auto(config: &Config, shuffle: bool) -> Result<()> {
    let board = Soundboard::scan(&config.sounds_dir);
    if board.is_empty() {
        bail!("サウンドが見つかりません: {:?}", config.sounds_dir);
    }

    let mut names = board.names();
    if shuffle {
        names.shuffle(&mut rand::rng());
    }

    let player = Arc::new(Player::new(config.output_device_id)?);

    // Ctrl+C ハンドラを設定 (再生中のクリップも打ち切る)
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    let handler_player = player.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
        if let Err(e) = handler_player.stop() {
            log::warn!("再生の停止に失敗: {:#}", e);
        }
    })?;

    let total = names.len();
    println!("全 {} 件のサウンドを再生します (Ctrl+C で停止)", total);

    for (i, name) in names.iter().enumerate() {
        if !running.load(Ordering::SeqCst) {
            println!("残り {} 件をスキップして停止します", total - i);
            break;
        }
        println!("[{}/{}] {}", i + 1, total, name);
        if let Err(e) = play_sound(&board, &player, name, config.volume, true) {
            log::error!("サウンド '{}' の再生に失敗: {:#}", name, e);
        }
    }

    Ok(())
}
