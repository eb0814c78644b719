//! Abstract modifier -> X11 modifier bitmask resolution.

use std::collections::{BTreeSet, HashMap};

use crate::display::XDisplay;
use crate::error::{MonkeyError, Result};
use crate::hotkey::Modifier;
use crate::keymap::Keymap;

/// The server's 8 modifier rows (Shift, Lock, Control, Mod1..Mod5), each
/// `keycodes_per_modifier` wide. Zero entries are unused slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierMapping {
    pub keycodes_per_modifier: u8,
    pub keycodes: Vec<u8>,
}

impl ModifierMapping {
    fn rows(&self) -> impl Iterator<Item = (usize, &[u8])> {
        let width = usize::from(self.keycodes_per_modifier).max(1);
        self.keycodes.chunks(width).take(8).enumerate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierMasks(HashMap<Modifier, u16>);

impl ModifierMasks {
    /// For each modifier, the first row holding one of its keycodes.
    pub fn resolve(keymap: &Keymap, mapping: &ModifierMapping) -> Self {
        let mut masks = HashMap::new();
        for modifier in Modifier::ALL {
            let row = modifier.key().keysyms().into_iter().find_map(|sym| {
                let codes = keymap.keycodes_for(sym);
                mapping
                    .rows()
                    .find(|(_, row)| row.iter().any(|c| *c != 0 && codes.contains(c)))
                    .map(|(index, _)| index)
            });
            if let Some(row) = row {
                masks.insert(modifier, 1u16 << row);
            }
        }
        ModifierMasks(masks)
    }

    pub fn mask(&self, modifier: Modifier) -> Option<u16> {
        self.0.get(&modifier).copied()
    }

    /// OR of the masks for `modifiers`. A modifier with no mask is an error.
    pub fn combined(&self, modifiers: &BTreeSet<Modifier>) -> Result<u16> {
        modifiers.iter().try_fold(0u16, |acc, m| {
            self.mask(*m)
                .map(|mask| acc | mask)
                .ok_or(MonkeyError::UnmappedModifier(*m))
        })
    }

    /// `base` plus every combination of the known CapsLock/NumLock masks,
    /// so a grab fires whatever the lock state.
    pub fn lock_variants(&self, base: u16) -> Vec<u16> {
        let locks: Vec<u16> = [Modifier::NumLock, Modifier::CapsLock]
            .into_iter()
            .filter_map(|m| self.mask(m))
            .collect();

        let mut variants = vec![base];
        for lock in locks {
            let with_lock: Vec<u16> = variants.iter().map(|v| v | lock).collect();
            for v in with_lock {
                if !variants.contains(&v) {
                    variants.push(v);
                }
            }
        }
        variants
    }

    pub fn iter(&self) -> impl Iterator<Item = (Modifier, u16)> + '_ {
        self.0.iter().map(|(m, mask)| (*m, *mask))
    }
}

/// Keymap and modifier masks read together and swapped as one value.
#[derive(Debug, Clone, Default)]
pub struct KeyboardLayout {
    pub keymap: Keymap,
    pub masks: ModifierMasks,
}

impl KeyboardLayout {
    pub fn load(display: &dyn XDisplay) -> Result<Self> {
        let keymap = Keymap::new(display.keyboard_mapping()?);
        let masks = ModifierMasks::resolve(&keymap, &display.modifier_mapping()?);
        tracing::debug!(
            alt_graph = keymap.has_alt_graph(),
            modifiers = masks.iter().count(),
            "Loaded keyboard layout"
        );
        Ok(KeyboardLayout { keymap, masks })
    }
}
