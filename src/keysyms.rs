//! Embedded keysym table and the named-key vocabulary.
//!
//! Bump [`KEYSYM_TABLE_VERSION`] whenever an entry changes meaning, so
//! stored bindings can be revalidated.

pub type Keysym = u32;

pub const KEYSYM_TABLE_VERSION: u32 = 1;

pub const NO_SYMBOL: Keysym = 0;

pub const XK_BACKSPACE: Keysym = 0xff08;
pub const XK_TAB: Keysym = 0xff09;
pub const XK_RETURN: Keysym = 0xff0d;
pub const XK_PAUSE: Keysym = 0xff13;
pub const XK_SCROLL_LOCK: Keysym = 0xff14;
pub const XK_ESCAPE: Keysym = 0xff1b;
pub const XK_HOME: Keysym = 0xff50;
pub const XK_LEFT: Keysym = 0xff51;
pub const XK_UP: Keysym = 0xff52;
pub const XK_RIGHT: Keysym = 0xff53;
pub const XK_DOWN: Keysym = 0xff54;
pub const XK_PAGE_UP: Keysym = 0xff55;
pub const XK_PAGE_DOWN: Keysym = 0xff56;
pub const XK_END: Keysym = 0xff57;
pub const XK_PRINT: Keysym = 0xff61;
pub const XK_INSERT: Keysym = 0xff63;
pub const XK_MENU: Keysym = 0xff67;
pub const XK_NUM_LOCK: Keysym = 0xff7f;
pub const XK_KP_ENTER: Keysym = 0xff8d;
pub const XK_KP_HOME: Keysym = 0xff95;
pub const XK_KP_LEFT: Keysym = 0xff96;
pub const XK_KP_UP: Keysym = 0xff97;
pub const XK_KP_RIGHT: Keysym = 0xff98;
pub const XK_KP_DOWN: Keysym = 0xff99;
pub const XK_KP_PAGE_UP: Keysym = 0xff9a;
pub const XK_KP_PAGE_DOWN: Keysym = 0xff9b;
pub const XK_KP_END: Keysym = 0xff9c;
pub const XK_KP_BEGIN: Keysym = 0xff9d;
pub const XK_KP_INSERT: Keysym = 0xff9e;
pub const XK_KP_DELETE: Keysym = 0xff9f;
pub const XK_KP_MULTIPLY: Keysym = 0xffaa;
pub const XK_KP_ADD: Keysym = 0xffab;
pub const XK_KP_SUBTRACT: Keysym = 0xffad;
pub const XK_KP_DIVIDE: Keysym = 0xffaf;
pub const XK_F1: Keysym = 0xffbe;
pub const XK_F35: Keysym = 0xffe0;
pub const XK_SHIFT_L: Keysym = 0xffe1;
pub const XK_SHIFT_R: Keysym = 0xffe2;
pub const XK_CONTROL_L: Keysym = 0xffe3;
pub const XK_CONTROL_R: Keysym = 0xffe4;
pub const XK_CAPS_LOCK: Keysym = 0xffe5;
pub const XK_META_L: Keysym = 0xffe7;
pub const XK_META_R: Keysym = 0xffe8;
pub const XK_ALT_L: Keysym = 0xffe9;
pub const XK_ALT_R: Keysym = 0xffea;
pub const XK_SUPER_L: Keysym = 0xffeb;
pub const XK_SUPER_R: Keysym = 0xffec;
pub const XK_HYPER_L: Keysym = 0xffed;
pub const XK_HYPER_R: Keysym = 0xffee;
pub const XK_DELETE: Keysym = 0xffff;
pub const XK_ISO_LEVEL3_SHIFT: Keysym = 0xfe03;

const UNICODE_KEYSYM_OFFSET: Keysym = 0x0100_0000;

/// Keys with a `<name>` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamedKey {
    Shift,
    Control,
    Alt,
    AltGr,
    Super,
    Hyper,
    Meta,
    CapsLock,
    NumLock,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Enter,
    Backspace,
    ScrollLock,
    PrintScreen,
    Pause,
    Menu,
    Escape,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    /// F1 through F35.
    Function(u8),
    NpInsert,
    NpDelete,
    NpEnd,
    NpDown,
    NpPageDown,
    NpLeft,
    Np5,
    NpRight,
    NpHome,
    NpUp,
    NpPageUp,
    NpDivide,
    NpMultiply,
    NpAdd,
    NpSubtract,
}

/// Named keys other than the function keys, with their identifiers.
const NAMES: &[(NamedKey, &str)] = &[
    (NamedKey::Shift, "<shift>"),
    (NamedKey::Control, "<ctrl>"),
    (NamedKey::Alt, "<alt>"),
    (NamedKey::AltGr, "<alt_gr>"),
    (NamedKey::Super, "<super>"),
    (NamedKey::Hyper, "<hyper>"),
    (NamedKey::Meta, "<meta>"),
    (NamedKey::CapsLock, "<capslock>"),
    (NamedKey::NumLock, "<numlock>"),
    (NamedKey::Tab, "<tab>"),
    (NamedKey::Left, "<left>"),
    (NamedKey::Right, "<right>"),
    (NamedKey::Up, "<up>"),
    (NamedKey::Down, "<down>"),
    (NamedKey::Enter, "<enter>"),
    (NamedKey::Backspace, "<backspace>"),
    (NamedKey::ScrollLock, "<scroll_lock>"),
    (NamedKey::PrintScreen, "<print_screen>"),
    (NamedKey::Pause, "<pause>"),
    (NamedKey::Menu, "<menu>"),
    (NamedKey::Escape, "<escape>"),
    (NamedKey::Insert, "<insert>"),
    (NamedKey::Delete, "<delete>"),
    (NamedKey::Home, "<home>"),
    (NamedKey::End, "<end>"),
    (NamedKey::PageUp, "<page_up>"),
    (NamedKey::PageDown, "<page_down>"),
    (NamedKey::NpInsert, "<np_insert>"),
    (NamedKey::NpDelete, "<np_delete>"),
    (NamedKey::NpEnd, "<np_end>"),
    (NamedKey::NpDown, "<np_down>"),
    (NamedKey::NpPageDown, "<np_page_down>"),
    (NamedKey::NpLeft, "<np_left>"),
    (NamedKey::Np5, "<np_5>"),
    (NamedKey::NpRight, "<np_right>"),
    (NamedKey::NpHome, "<np_home>"),
    (NamedKey::NpUp, "<np_up>"),
    (NamedKey::NpPageUp, "<np_page_up>"),
    (NamedKey::NpDivide, "<np_divide>"),
    (NamedKey::NpMultiply, "<np_multiply>"),
    (NamedKey::NpAdd, "<np_add>"),
    (NamedKey::NpSubtract, "<np_subtract>"),
];

/// Keysym to named key. Order matters for the reverse direction: the first
/// keysym listed for a key is the one used to look up its keycode.
const KEYSYM_TABLE: &[(Keysym, NamedKey)] = &[
    (XK_SHIFT_L, NamedKey::Shift),
    (XK_SHIFT_R, NamedKey::Shift),
    (XK_CONTROL_L, NamedKey::Control),
    (XK_CONTROL_R, NamedKey::Control),
    (XK_ALT_L, NamedKey::Alt),
    (XK_ALT_R, NamedKey::Alt),
    (XK_ISO_LEVEL3_SHIFT, NamedKey::AltGr),
    (XK_SUPER_L, NamedKey::Super),
    (XK_SUPER_R, NamedKey::Super),
    (XK_HYPER_L, NamedKey::Hyper),
    (XK_HYPER_R, NamedKey::Hyper),
    (XK_META_L, NamedKey::Meta),
    (XK_META_R, NamedKey::Meta),
    (XK_CAPS_LOCK, NamedKey::CapsLock),
    (XK_NUM_LOCK, NamedKey::NumLock),
    (XK_TAB, NamedKey::Tab),
    (XK_LEFT, NamedKey::Left),
    (XK_RIGHT, NamedKey::Right),
    (XK_UP, NamedKey::Up),
    (XK_DOWN, NamedKey::Down),
    (XK_RETURN, NamedKey::Enter),
    (XK_KP_ENTER, NamedKey::Enter),
    (XK_BACKSPACE, NamedKey::Backspace),
    (XK_SCROLL_LOCK, NamedKey::ScrollLock),
    (XK_PRINT, NamedKey::PrintScreen),
    (XK_PAUSE, NamedKey::Pause),
    (XK_MENU, NamedKey::Menu),
    (XK_ESCAPE, NamedKey::Escape),
    (XK_INSERT, NamedKey::Insert),
    (XK_DELETE, NamedKey::Delete),
    (XK_HOME, NamedKey::Home),
    (XK_END, NamedKey::End),
    (XK_PAGE_UP, NamedKey::PageUp),
    (XK_PAGE_DOWN, NamedKey::PageDown),
    (XK_KP_INSERT, NamedKey::NpInsert),
    (XK_KP_DELETE, NamedKey::NpDelete),
    (XK_KP_END, NamedKey::NpEnd),
    (XK_KP_DOWN, NamedKey::NpDown),
    (XK_KP_PAGE_DOWN, NamedKey::NpPageDown),
    (XK_KP_LEFT, NamedKey::NpLeft),
    (XK_KP_BEGIN, NamedKey::Np5),
    (XK_KP_RIGHT, NamedKey::NpRight),
    (XK_KP_HOME, NamedKey::NpHome),
    (XK_KP_UP, NamedKey::NpUp),
    (XK_KP_PAGE_UP, NamedKey::NpPageUp),
    (XK_KP_DIVIDE, NamedKey::NpDivide),
    (XK_KP_MULTIPLY, NamedKey::NpMultiply),
    (XK_KP_ADD, NamedKey::NpAdd),
    (XK_KP_SUBTRACT, NamedKey::NpSubtract),
];

/// Keypad keysyms that produce a digit or operator while NumLock is on.
const NUMLOCK_TABLE: &[(Keysym, &str)] = &[
    (XK_KP_INSERT, "0"),
    (XK_KP_DELETE, "."),
    (XK_KP_END, "1"),
    (XK_KP_DOWN, "2"),
    (XK_KP_PAGE_DOWN, "3"),
    (XK_KP_LEFT, "4"),
    (XK_KP_BEGIN, "5"),
    (XK_KP_RIGHT, "6"),
    (XK_KP_HOME, "7"),
    (XK_KP_UP, "8"),
    (XK_KP_PAGE_UP, "9"),
    (XK_KP_DIVIDE, "/"),
    (XK_KP_MULTIPLY, "*"),
    (XK_KP_ADD, "+"),
    (XK_KP_SUBTRACT, "-"),
    (XK_KP_ENTER, "<enter>"),
];

impl NamedKey {
    pub fn ident(self) -> String {
        if let NamedKey::Function(n) = self {
            return format!("<f{}>", n);
        }
        NAMES
            .iter()
            .find(|(key, _)| *key == self)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_default()
    }

    /// Parse `<name>`. Function keys outside F1..F35 are rejected.
    pub fn from_ident(s: &str) -> Option<NamedKey> {
        if let Some(n) = s
            .strip_prefix("<f")
            .and_then(|r| r.strip_suffix('>'))
            .and_then(|n| n.parse::<u8>().ok())
        {
            return (1..=35).contains(&n).then_some(NamedKey::Function(n));
        }
        NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(key, _)| *key)
    }

    /// First keysym that produces this key.
    pub fn keysym(self) -> Option<Keysym> {
        if let NamedKey::Function(n) = self {
            return (1..=35).contains(&n).then(|| XK_F1 + u32::from(n) - 1);
        }
        KEYSYM_TABLE
            .iter()
            .find(|(_, key)| *key == self)
            .map(|(sym, _)| *sym)
    }

    /// Every keysym that produces this key, in table order.
    pub fn keysyms(self) -> Vec<Keysym> {
        if let NamedKey::Function(_) = self {
            return self.keysym().into_iter().collect();
        }
        KEYSYM_TABLE
            .iter()
            .filter(|(_, key)| *key == self)
            .map(|(sym, _)| *sym)
            .collect()
    }
}

pub fn named_key(sym: Keysym) -> Option<NamedKey> {
    if (XK_F1..=XK_F35).contains(&sym) {
        return Some(NamedKey::Function((sym - XK_F1 + 1) as u8));
    }
    KEYSYM_TABLE
        .iter()
        .find(|(s, _)| *s == sym)
        .map(|(_, key)| *key)
}

pub fn numlock_string(sym: Keysym) -> Option<&'static str> {
    NUMLOCK_TABLE
        .iter()
        .find(|(s, _)| *s == sym)
        .map(|(_, text)| *text)
}

/// Printable character for a keysym: Latin-1 directly, Unicode through the
/// 0x01000000 range.
pub fn keysym_to_char(sym: Keysym) -> Option<char> {
    match sym {
        0x20..=0x7e | 0xa0..=0xff => char::from_u32(sym),
        s if s > UNICODE_KEYSYM_OFFSET && s <= UNICODE_KEYSYM_OFFSET + 0x10_ffff => {
            char::from_u32(s - UNICODE_KEYSYM_OFFSET).filter(|c| !c.is_control())
        }
        _ => None,
    }
}

pub fn char_to_keysym(c: char) -> Keysym {
    let code = c as u32;
    match code {
        0x20..=0x7e | 0xa0..=0xff => code,
        _ => UNICODE_KEYSYM_OFFSET + code,
    }
}
