use anyhow::{bail, Context, Result};
use rdev::{Event, EventType, Key};
use std::fmt;
use std::thread;

/// 修飾キーの組
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    /// 要求された修飾キーがすべて含まれているか
    fn contains(&self, required: &Modifiers) -> bool {
        (!required.ctrl || self.ctrl)
            && (!required.alt || self.alt)
            && (!required.shift || self.shift)
            && (!required.meta || self.meta)
    }

    /// 有効な修飾キーの数
    fn count(&self) -> usize {
        [self.ctrl, self.alt, self.shift, self.meta]
            .iter()
            .filter(|&&held| held)
            .count()
    }
}

/// ホットキーの組み合わせ
///
/// `+` 区切りの文字列からパースする。大文字小文字は区別せず、
/// 山括弧つきの表記 (`<ctrl>+<alt>+a`) も受け付ける。
///
/// # Examples
///
/// ```
/// # use pondashi::hotkey::HotkeyCombo;
/// let combo = HotkeyCombo::parse("ctrl+alt+a").unwrap();
/// assert_eq!(combo.to_string(), "ctrl+alt+a");
///
/// // 山括弧つきでも同じ組み合わせとして扱う
/// let bracketed = HotkeyCombo::parse("<ctrl>+<alt>+a").unwrap();
/// assert_eq!(combo, bracketed);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotkeyCombo {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl HotkeyCombo {
    /// 組み合わせ文字列をパースする
    ///
    /// # Errors
    ///
    /// 不明なトークンを含む場合、修飾キー以外のキーがない場合、
    /// またはキーが複数指定されている場合にエラーを返す。
    pub fn parse(combo: &str) -> Result<Self> {
        let mut modifiers = Modifiers::default();
        let mut key = None;

        for raw_token in combo.split('+') {
            let token = raw_token
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_lowercase();
            if token.is_empty() {
                bail!("空のトークンが含まれています: '{}'", combo);
            }

            match token.as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "meta" | "cmd" | "win" | "super" => modifiers.meta = true,
                other => {
                    let parsed =
                        parse_key(other).with_context(|| format!("不明なキー: '{}'", other))?;
                    if key.is_some() {
                        bail!("キーが複数指定されています: '{}'", combo);
                    }
                    key = Some(parsed);
                }
            }
        }

        let key = key.with_context(|| format!("修飾キー以外のキーがありません: '{}'", combo))?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for HotkeyCombo {
    /// 正規化された組み合わせ文字列 (修飾キーは ctrl, alt, shift, meta の順)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.ctrl {
            write!(f, "ctrl+")?;
        }
        if self.modifiers.alt {
            write!(f, "alt+")?;
        }
        if self.modifiers.shift {
            write!(f, "shift+")?;
        }
        if self.modifiers.meta {
            write!(f, "meta+")?;
        }
        f.write_str(key_name(self.key))
    }
}

/// キー名をrdevのキーに変換する
fn parse_key(name: &str) -> Option<Key> {
    match name {
        "a" => Some(Key::KeyA),
        "b" => Some(Key::KeyB),
        "c" => Some(Key::KeyC),
        "d" => Some(Key::KeyD),
        "e" => Some(Key::KeyE),
        "f" => Some(Key::KeyF),
        "g" => Some(Key::KeyG),
        "h" => Some(Key::KeyH),
        "i" => Some(Key::KeyI),
        "j" => Some(Key::KeyJ),
        "k" => Some(Key::KeyK),
        "l" => Some(Key::KeyL),
        "m" => Some(Key::KeyM),
        "n" => Some(Key::KeyN),
        "o" => Some(Key::KeyO),
        "p" => Some(Key::KeyP),
        "q" => Some(Key::KeyQ),
        "r" => Some(Key::KeyR),
        "s" => Some(Key::KeyS),
        "t" => Some(Key::KeyT),
        "u" => Some(Key::KeyU),
        "v" => Some(Key::KeyV),
        "w" => Some(Key::KeyW),
        "x" => Some(Key::KeyX),
        "y" => Some(Key::KeyY),
        "z" => Some(Key::KeyZ),
        "0" => Some(Key::Num0),
        "1" => Some(Key::Num1),
        "2" => Some(Key::Num2),
        "3" => Some(Key::Num3),
        "4" => Some(Key::Num4),
        "5" => Some(Key::Num5),
        "6" => Some(Key::Num6),
        "7" => Some(Key::Num7),
        "8" => Some(Key::Num8),
        "9" => Some(Key::Num9),
        "f1" => Some(Key::F1),
        "f2" => Some(Key::F2),
        "f3" => Some(Key::F3),
        "f4" => Some(Key::F4),
        "f5" => Some(Key::F5),
        "f6" => Some(Key::F6),
        "f7" => Some(Key::F7),
        "f8" => Some(Key::F8),
        "f9" => Some(Key::F9),
        "f10" => Some(Key::F10),
        "f11" => Some(Key::F11),
        "f12" => Some(Key::F12),
        "space" => Some(Key::Space),
        "enter" | "return" => Some(Key::Return),
        "esc" | "escape" => Some(Key::Escape),
        "tab" => Some(Key::Tab),
        "backspace" => Some(Key::Backspace),
        "delete" | "del" => Some(Key::Delete),
        "insert" | "ins" => Some(Key::Insert),
        "home" => Some(Key::Home),
        "end" => Some(Key::End),
        "pageup" | "pgup" => Some(Key::PageUp),
        "pagedown" | "pgdn" => Some(Key::PageDown),
        "up" => Some(Key::UpArrow),
        "down" => Some(Key::DownArrow),
        "left" => Some(Key::LeftArrow),
        "right" => Some(Key::RightArrow),
        _ => None,
    }
}

/// rdevのキーを表示用の名前に戻す
fn key_name(key: Key) -> &'static str {
    match key {
        Key::KeyA => "a",
        Key::KeyB => "b",
        Key::KeyC => "c",
        Key::KeyD => "d",
        Key::KeyE => "e",
        Key::KeyF => "f",
        Key::KeyG => "g",
        Key::KeyH => "h",
        Key::KeyI => "i",
        Key::KeyJ => "j",
        Key::KeyK => "k",
        Key::KeyL => "l",
        Key::KeyM => "m",
        Key::KeyN => "n",
        Key::KeyO => "o",
        Key::KeyP => "p",
        Key::KeyQ => "q",
        Key::KeyR => "r",
        Key::KeyS => "s",
        Key::KeyT => "t",
        Key::KeyU => "u",
        Key::KeyV => "v",
        Key::KeyW => "w",
        Key::KeyX => "x",
        Key::KeyY => "y",
        Key::KeyZ => "z",
        Key::Num0 => "0",
        Key::Num1 => "1",
        Key::Num2 => "2",
        Key::Num3 => "3",
        Key::Num4 => "4",
        Key::Num5 => "5",
        Key::Num6 => "6",
        Key::Num7 => "7",
        Key::Num8 => "8",
        Key::Num9 => "9",
        Key::F1 => "f1",
        Key::F2 => "f2",
        Key::F3 => "f3",
        Key::F4 => "f4",
        Key::F5 => "f5",
        Key::F6 => "f6",
        Key::F7 => "f7",
        Key::F8 => "f8",
        Key::F9 => "f9",
        Key::F10 => "f10",
        Key::F11 => "f11",
        Key::F12 => "f12",
        Key::Space => "space",
        Key::Return => "enter",
        Key::Escape => "esc",
        Key::Tab => "tab",
        Key::Backspace => "backspace",
        Key::Delete => "delete",
        Key::Insert => "insert",
        Key::Home => "home",
        Key::End => "end",
        Key::PageUp => "pageup",
        Key::PageDown => "pagedown",
        Key::UpArrow => "up",
        Key::DownArrow => "down",
        Key::LeftArrow => "left",
        Key::RightArrow => "right",
        _ => "?",
    }
}

/// ホットキーの割り当て
#[derive(Clone, Debug)]
pub struct HotkeyBinding {
    /// パース済みの組み合わせ
    pub combo: HotkeyCombo,

    /// 表示用の組み合わせ文字列
    pub label: String,

    /// 再生するサウンド名
    pub sound: String,
}

impl HotkeyBinding {
    /// 組み合わせ文字列とサウンド名からバインディングを作る
    ///
    /// # Errors
    ///
    /// 組み合わせ文字列がパースできない場合にエラーを返す。
    pub fn new(combo_str: &str, sound: &str) -> Result<Self> {
        let combo = HotkeyCombo::parse(combo_str)?;
        let label = combo.to_string();
        Ok(Self {
            combo,
            label,
            sound: sound.to_string(),
        })
    }
}

/// 押下中の修飾キーを追跡してバインディングの発火を判定する
///
/// rdevのイベント列に対してのみ動作するため、実際のキー入力なしで
/// テストできる。
#[derive(Debug, Default)]
pub struct ComboTracker {
    held: Modifiers,
}

impl ComboTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// イベントを処理し、発火したバインディングのインデックスを返す
    ///
    /// 修飾キーの条件を満たす候補が複数ある場合は、要求する修飾キーが
    /// 最も多いもの (最も限定的なもの) を選ぶ。同数の場合は先に
    /// 登録されたものを選ぶ。
    pub fn handle(&mut self, event: &EventType, combos: &[HotkeyCombo]) -> Option<usize> {
        match event {
            EventType::KeyPress(key) => {
                if self.update_modifier(*key, true) {
                    return None;
                }
                let mut best: Option<(usize, usize)> = None;
                for (index, combo) in combos.iter().enumerate() {
                    if combo.key != *key || !self.held.contains(&combo.modifiers) {
                        continue;
                    }
                    let count = combo.modifiers.count();
                    match best {
                        Some((_, best_count)) if count <= best_count => {}
                        _ => best = Some((index, count)),
                    }
                }
                best.map(|(index, _)| index)
            }
            EventType::KeyRelease(key) => {
                self.update_modifier(*key, false);
                None
            }
            _ => None,
        }
    }

    /// 修飾キーなら状態を更新してtrueを返す
    fn update_modifier(&mut self, key: Key, pressed: bool) -> bool {
        match key {
            Key::ControlLeft | Key::ControlRight => self.held.ctrl = pressed,
            Key::Alt | Key::AltGr => self.held.alt = pressed,
            Key::ShiftLeft | Key::ShiftRight => self.held.shift = pressed,
            Key::MetaLeft | Key::MetaRight => self.held.meta = pressed,
            _ => return false,
        }
        true
    }
}

/// グローバルホットキーの監視スレッドを起動する
///
/// `rdev::listen` はスレッドを占有して戻らないため、専用スレッドで
/// 実行する。バインディングが発火するたびに `on_trigger` が監視
/// スレッド上で呼ばれるので、コールバック内で長時間ブロックしないこと。
/// キャプチャの失敗 (権限不足など) はJoinHandleの結果として返る。
///
/// # Errors
///
/// スレッドの起動に失敗した場合にエラーを返す。
pub fn spawn_listener<F>(
    bindings: Vec<HotkeyBinding>,
    on_trigger: F,
) -> Result<thread::JoinHandle<Result<()>>>
where
    F: Fn(&HotkeyBinding) + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("hotkey-listener".to_string())
        .spawn(move || {
            let combos: Vec<HotkeyCombo> = bindings.iter().map(|b| b.combo.clone()).collect();
            let mut tracker = ComboTracker::new();
            rdev::listen(move |event: Event| {
                if let Some(index) = tracker.handle(&event.event_type, &combos) {
                    let binding = &bindings[index];
                    log::info!("ホットキー検出: {} → {}", binding.label, binding.sound);
                    on_trigger(binding);
                }
            })
            .map_err(|e| anyhow::anyhow!("キー入力の監視に失敗: {:?}", e))
        })
        .context("監視スレッドの起動に失敗")?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_key() {
        let combo = HotkeyCombo::parse("f1").unwrap();
        assert_eq!(combo.key, Key::F1);
        assert_eq!(combo.modifiers, Modifiers::default());
    }

    #[test]
    fn test_parse_with_modifiers() {
        let combo = HotkeyCombo::parse("ctrl+alt+a").unwrap();
        assert_eq!(combo.key, Key::KeyA);
        assert!(combo.modifiers.ctrl);
        assert!(combo.modifiers.alt);
        assert!(!combo.modifiers.shift);
        assert!(!combo.modifiers.meta);
    }

    #[test]
    fn test_parse_angle_brackets() {
        let combo = HotkeyCombo::parse("<ctrl>+<alt>+a").unwrap();
        assert_eq!(combo, HotkeyCombo::parse("ctrl+alt+a").unwrap());
    }

    #[test]
    fn test_parse_case_insensitive() {
        let combo = HotkeyCombo::parse("CTRL+Shift+F5").unwrap();
        assert_eq!(combo.key, Key::F5);
        assert!(combo.modifiers.ctrl);
        assert!(combo.modifiers.shift);
    }

    #[test]
    fn test_parse_digit() {
        let combo = HotkeyCombo::parse("meta+1").unwrap();
        assert_eq!(combo.key, Key::Num1);
        assert!(combo.modifiers.meta);
    }

    #[test]
    fn test_parse_unknown_token() {
        assert!(HotkeyCombo::parse("ctrl+hyper").is_err());
        assert!(HotkeyCombo::parse("f13").is_err());
    }

    #[test]
    fn test_parse_modifier_only() {
        assert!(HotkeyCombo::parse("ctrl").is_err());
        assert!(HotkeyCombo::parse("ctrl+alt").is_err());
    }

    #[test]
    fn test_parse_multiple_keys() {
        assert!(HotkeyCombo::parse("a+b").is_err());
    }

    #[test]
    fn test_parse_empty_token() {
        assert!(HotkeyCombo::parse("ctrl+").is_err());
        assert!(HotkeyCombo::parse("").is_err());
    }

    #[test]
    fn test_display_normalizes_order() {
        let combo = HotkeyCombo::parse("<alt>+<ctrl>+x").unwrap();
        assert_eq!(combo.to_string(), "ctrl+alt+x");
    }

    #[test]
    fn test_tracker_plain_key() {
        let combos = vec![HotkeyCombo::parse("f1").unwrap()];
        let mut tracker = ComboTracker::new();

        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::F1), &combos),
            Some(0)
        );
        assert_eq!(tracker.handle(&EventType::KeyRelease(Key::F1), &combos), None);
    }

    #[test]
    fn test_tracker_requires_modifiers() {
        let combos = vec![HotkeyCombo::parse("ctrl+alt+a").unwrap()];
        let mut tracker = ComboTracker::new();

        // 修飾キーなしでは発火しない
        assert_eq!(tracker.handle(&EventType::KeyPress(Key::KeyA), &combos), None);

        tracker.handle(&EventType::KeyPress(Key::ControlLeft), &combos);
        tracker.handle(&EventType::KeyPress(Key::Alt), &combos);
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::KeyA), &combos),
            Some(0)
        );
    }

    #[test]
    fn test_tracker_release_resets() {
        let combos = vec![HotkeyCombo::parse("ctrl+a").unwrap()];
        let mut tracker = ComboTracker::new();

        tracker.handle(&EventType::KeyPress(Key::ControlLeft), &combos);
        tracker.handle(&EventType::KeyRelease(Key::ControlLeft), &combos);
        assert_eq!(tracker.handle(&EventType::KeyPress(Key::KeyA), &combos), None);
    }

    #[test]
    fn test_tracker_most_specific_wins() {
        let combos = vec![
            HotkeyCombo::parse("a").unwrap(),
            HotkeyCombo::parse("ctrl+a").unwrap(),
        ];
        let mut tracker = ComboTracker::new();

        // 修飾キーなし → 素のaが発火
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::KeyA), &combos),
            Some(0)
        );

        // ctrl押下中 → ctrl+aが優先される
        tracker.handle(&EventType::KeyPress(Key::ControlLeft), &combos);
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::KeyA), &combos),
            Some(1)
        );
    }

    #[test]
    fn test_tracker_equal_specificity_first_wins() {
        let combos = vec![
            HotkeyCombo::parse("ctrl+a").unwrap(),
            HotkeyCombo::parse("shift+a").unwrap(),
        ];
        let mut tracker = ComboTracker::new();

        // 両方の条件を満たす場合は先に登録された方が発火する
        tracker.handle(&EventType::KeyPress(Key::ControlLeft), &combos);
        tracker.handle(&EventType::KeyPress(Key::ShiftLeft), &combos);
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::KeyA), &combos),
            Some(0)
        );
    }

    #[test]
    fn test_tracker_right_side_modifier() {
        let combos = vec![HotkeyCombo::parse("ctrl+z").unwrap()];
        let mut tracker = ComboTracker::new();

        tracker.handle(&EventType::KeyPress(Key::ControlRight), &combos);
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::KeyZ), &combos),
            Some(0)
        );
    }

    #[test]
    fn test_tracker_modifier_press_does_not_fire() {
        let combos = vec![HotkeyCombo::parse("ctrl+a").unwrap()];
        let mut tracker = ComboTracker::new();
        assert_eq!(
            tracker.handle(&EventType::KeyPress(Key::ControlLeft), &combos),
            None
        );
    }

    #[test]
    fn test_binding_new_normalizes_label() {
        let binding = HotkeyBinding::new("<ALT>+<CTRL>+P", "pon").unwrap();
        assert_eq!(binding.label, "ctrl+alt+p");
        assert_eq!(binding.sound, "pon");
    }

    #[test]
    fn test_binding_new_invalid_combo() {
        assert!(HotkeyBinding::new("ctrl+nosuchkey", "pon").is_err());
    }
}
