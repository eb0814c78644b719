//! Keycode <-> key identifier translation for the current keyboard mapping.

use crate::error::{MonkeyError, Result};
use crate::hotkey::{Key, Modifier};
use crate::keysyms::{self, Keysym, NO_SYMBOL, XK_ISO_LEVEL3_SHIFT};

/// Identifier returned for keycode 0.
pub const UNKNOWN_KEY: &str = "<unknown>";

/// Keyboard mapping as reported by the server: `keysyms_per_keycode`
/// columns for every keycode starting at `min_keycode`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardMapping {
    pub min_keycode: u8,
    pub keysyms_per_keycode: u8,
    pub keysyms: Vec<Keysym>,
}

impl KeyboardMapping {
    pub fn keysym(&self, code: u8, column: usize) -> Keysym {
        let per = usize::from(self.keysyms_per_keycode);
        if code < self.min_keycode || column >= per {
            return NO_SYMBOL;
        }
        let index = usize::from(code - self.min_keycode) * per + column;
        self.keysyms.get(index).copied().unwrap_or(NO_SYMBOL)
    }

    fn keycodes(&self) -> impl Iterator<Item = u8> + '_ {
        let per = usize::from(self.keysyms_per_keycode).max(1);
        let count = self.keysyms.len() / per;
        (0..count).filter_map(move |i| u8::try_from(usize::from(self.min_keycode) + i).ok())
    }

    fn columns(&self) -> usize {
        usize::from(self.keysyms_per_keycode)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Keymap {
    mapping: KeyboardMapping,
    offsets: Vec<usize>,
}

impl Keymap {
    pub fn new(mapping: KeyboardMapping) -> Self {
        let alt_graph = mapping
            .keycodes()
            .any(|code| mapping.keysym(code, 0) == XK_ISO_LEVEL3_SHIFT);
        let offsets = if alt_graph {
            vec![0, 1, 4, 5]
        } else {
            vec![0, 1]
        };
        Keymap { mapping, offsets }
    }

    /// Columns searched first when turning a keysym into a keycode.
    pub fn usable_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn has_alt_graph(&self) -> bool {
        self.offsets.len() > 2
    }

    /// Identifier for a keycode given the active shift state.
    pub fn lookup_string(&self, code: u8, shifted: bool, numlock: bool, alt_graph: bool) -> String {
        if code == 0 {
            return UNKNOWN_KEY.to_string();
        }

        let base = self.mapping.keysym(code, 0);
        if numlock && !shifted {
            if let Some(text) = keysyms::numlock_string(base) {
                return text.to_string();
            }
        }

        if let Some(named) = keysyms::named_key(base) {
            return named.ident();
        }

        let mut column = 0;
        if shifted {
            column += 1;
        }
        if alt_graph {
            column += 4;
        }
        keysyms::keysym_to_char(self.mapping.keysym(code, column))
            .map(String::from)
            .unwrap_or_else(|| format!("<code{}>", code))
    }

    /// The modifier a keycode produces, judged by its unshifted keysym.
    pub fn modifier_for(&self, code: u8) -> Option<Modifier> {
        let named = keysyms::named_key(self.mapping.keysym(code, 0))?;
        Modifier::ALL.into_iter().find(|m| m.key() == named)
    }

    pub fn lookup_keycode(&self, key: &Key) -> Result<u8> {
        let code = match key {
            Key::Code(code) => Some(*code).filter(|c| *c != 0),
            Key::Named(named) => named.keysym().and_then(|sym| self.keysym_to_keycode(sym)),
            Key::Char(c) => self.keysym_to_keycode(keysyms::char_to_keysym(*c)),
        };
        code.ok_or_else(|| MonkeyError::UnknownKey(key.to_string()))
    }

    /// Usable columns win over the rest, lowest keycode first.
    pub fn keysym_to_keycode(&self, sym: Keysym) -> Option<u8> {
        if sym == NO_SYMBOL {
            return None;
        }
        let rest = (0..self.mapping.columns()).filter(|c| !self.offsets.contains(c));
        self.offsets.iter().copied().chain(rest).find_map(|column| {
            self.mapping
                .keycodes()
                .find(|code| self.mapping.keysym(*code, column) == sym)
        })
    }

    /// Every keycode carrying `sym` in any column.
    pub fn keycodes_for(&self, sym: Keysym) -> Vec<u8> {
        if sym == NO_SYMBOL {
            return Vec::new();
        }
        self.mapping
            .keycodes()
            .filter(|code| (0..self.mapping.columns()).any(|col| self.mapping.keysym(*code, col) == sym))
            .collect()
    }
}
