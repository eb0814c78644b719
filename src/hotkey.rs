//! Hotkey vocabulary: modifiers, key identifiers, bindings and the
//! listener contract consumed by the window switcher.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;
use regex::Regex;

use crate::error::{MonkeyError, Result};
use crate::keysyms::NamedKey;
use crate::window_info::WindowInfo;

/// An abstract modifier, independent of the protocol bit it is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Control,
    Alt,
    AltGr,
    Shift,
    Super,
    Hyper,
    Meta,
    CapsLock,
    NumLock,
}

impl Modifier {
    pub const ALL: [Modifier; 9] = [
        Modifier::Control,
        Modifier::Alt,
        Modifier::AltGr,
        Modifier::Shift,
        Modifier::Super,
        Modifier::Hyper,
        Modifier::Meta,
        Modifier::CapsLock,
        Modifier::NumLock,
    ];

    /// The named key whose keysyms produce this modifier.
    pub fn key(self) -> NamedKey {
        match self {
            Modifier::Control => NamedKey::Control,
            Modifier::Alt => NamedKey::Alt,
            Modifier::AltGr => NamedKey::AltGr,
            Modifier::Shift => NamedKey::Shift,
            Modifier::Super => NamedKey::Super,
            Modifier::Hyper => NamedKey::Hyper,
            Modifier::Meta => NamedKey::Meta,
            Modifier::CapsLock => NamedKey::CapsLock,
            Modifier::NumLock => NamedKey::NumLock,
        }
    }

    pub fn is_lock(self) -> bool {
        matches!(self, Modifier::CapsLock | Modifier::NumLock)
    }

    fn flag(self) -> Modifiers {
        match self {
            Modifier::Control => Modifiers::CONTROL,
            Modifier::Alt => Modifiers::ALT,
            Modifier::AltGr => Modifiers::ALT_GR,
            Modifier::Shift => Modifiers::SHIFT,
            Modifier::Super => Modifiers::SUPER,
            Modifier::Hyper => Modifiers::HYPER,
            Modifier::Meta => Modifiers::META,
            Modifier::CapsLock => Modifiers::CAPS_LOCK,
            Modifier::NumLock => Modifiers::NUM_LOCK,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key().ident())
    }
}

bitflags! {
    /// Set of abstract modifiers, used for the shared modifier state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u16 {
        const CONTROL = 1 << 0;
        const ALT = 1 << 1;
        const ALT_GR = 1 << 2;
        const SHIFT = 1 << 3;
        const SUPER = 1 << 4;
        const HYPER = 1 << 5;
        const META = 1 << 6;
        const CAPS_LOCK = 1 << 7;
        const NUM_LOCK = 1 << 8;
    }
}

/// LED mask bits reported by the keyboard control.
const CAPSLOCK_LED: u32 = 1 << 0;
const NUMLOCK_LED: u32 = 1 << 1;

/// Which modifiers are currently held, plus the CapsLock/NumLock lock state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState(Modifiers);

impl ModifierState {
    /// Initial state: nothing held, lock flags taken from the keyboard LEDs.
    pub fn from_led_mask(led_mask: u32) -> Self {
        let mut held = Modifiers::empty();
        held.set(Modifiers::CAPS_LOCK, led_mask & CAPSLOCK_LED != 0);
        held.set(Modifiers::NUM_LOCK, led_mask & NUMLOCK_LED != 0);
        ModifierState(held)
    }

    pub fn is_active(&self, modifier: Modifier) -> bool {
        self.0.contains(modifier.flag())
    }

    /// Lock modifiers toggle on press; everything else is held until release.
    pub fn press(&mut self, modifier: Modifier) {
        if modifier.is_lock() {
            self.0.toggle(modifier.flag());
        } else {
            self.0.insert(modifier.flag());
        }
    }

    pub fn release(&mut self, modifier: Modifier) {
        if !modifier.is_lock() {
            self.0.remove(modifier.flag());
        }
    }

    pub fn bits(&self) -> u16 {
        self.0.bits()
    }
}

/// Single-writer modifier state readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct SharedModifierState(Arc<AtomicU16>);

impl SharedModifierState {
    pub fn load(&self) -> ModifierState {
        ModifierState(Modifiers::from_bits_truncate(
            self.0.load(Ordering::Acquire),
        ))
    }

    pub fn store(&self, state: ModifierState) {
        self.0.store(state.bits(), Ordering::Release);
    }
}

/// The non-modifier part of a hotkey.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Named(NamedKey),
    Char(char),
    /// Literal keycode, written `<code{N}>`.
    Code(u8),
}

impl Key {
    /// Parse a key identifier: `<named>`, a single character or `<codeN>`.
    pub fn parse(s: &str) -> Result<Key> {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Key::Char(c));
        }

        if let Some(code) = s.strip_prefix("<code").and_then(|r| r.strip_suffix('>')) {
            return code
                .parse::<u8>()
                .map(Key::Code)
                .map_err(|_| MonkeyError::UnknownKey(s.to_string()));
        }

        NamedKey::from_ident(s)
            .map(Key::Named)
            .ok_or_else(|| MonkeyError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Named(named) => write!(f, "{}", named.ident()),
            Key::Char(c) => write!(f, "{}", c),
            Key::Code(code) => write!(f, "<code{}>", code),
        }
    }
}

/// A set of modifiers plus one key. Immutable and compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub modifiers: BTreeSet<Modifier>,
    pub key: Key,
}

impl Hotkey {
    pub fn new(modifiers: impl IntoIterator<Item = Modifier>, key: Key) -> Self {
        Hotkey {
            modifiers: modifiers.into_iter().collect(),
            key,
        }
    }

    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "{}", self.key)
    }
}

/// Restricts a binding to windows whose title or class matches.
#[derive(Debug, Clone)]
pub struct WindowFilter(Regex);

impl WindowFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(WindowFilter)
            .map_err(|e| MonkeyError::Config(format!("Invalid window filter {:?}: {}", pattern, e)))
    }

    pub fn matches(&self, info: &WindowInfo) -> bool {
        self.0.is_match(&info.title) || self.0.is_match(&info.class)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// A hotkey as configured: optional window filter and the target handed
/// to the switcher when it fires.
#[derive(Debug, Clone)]
pub struct Binding {
    pub hotkey: Hotkey,
    pub filter: Option<WindowFilter>,
    pub target: String,
}

impl Binding {
    pub fn global(hotkey: Hotkey, target: impl Into<String>) -> Self {
        Binding {
            hotkey,
            filter: None,
            target: target.into(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.filter.is_none()
    }

    /// Whether this binding should be grabbed in a window with `info`.
    pub fn applies_to(&self, info: &WindowInfo) -> bool {
        self.filter.as_ref().is_some_and(|f| f.matches(info))
    }
}

/// Callbacks invoked on the dispatch thread after a key event was decoded.
///
/// Implementations must not block on the interface's own queries
/// (`get_window_title` and friends) from inside a callback.
pub trait HotkeyListener: Send {
    fn handle_modifier_down(&mut self, modifier: Modifier);

    fn handle_modifier_up(&mut self, modifier: Modifier);

    fn handle_keypress(&mut self, key: &str);

    fn handle_mouse_click(&mut self, _button: u8) {}
}
