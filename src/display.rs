//! Display session: the X11 connection used for grabs and queries.
//!
//! Everything above this module talks to [`XDisplay`] so it can run
//! against an in-memory server in tests.

use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::atom_manager;
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, GrabMode, Mapping, ModMask,
};
use x11rb::rust_connection::RustConnection;

use crate::error::{MonkeyError, Result};
use crate::events::{EventSource, XEvent};
use crate::keymap::KeyboardMapping;
use crate::modmask::ModifierMapping;

pub type Window = u32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowTree {
    pub parent: Option<Window>,
    pub children: Vec<Window>,
}

/// Window title sources, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TitleProperty {
    VisibleName,
    Name,
    LegacyName,
}

impl TitleProperty {
    pub const ORDER: [TitleProperty; 3] = [
        TitleProperty::VisibleName,
        TitleProperty::Name,
        TitleProperty::LegacyName,
    ];
}

pub trait XDisplay: Send {
    fn root(&self) -> Window;

    fn query_tree(&self, window: Window) -> Result<WindowTree>;

    /// Checked: fails if another client holds the combination.
    fn grab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()>;

    fn ungrab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()>;

    /// `None` when the window lacks the property.
    fn title(&self, window: Window, property: TitleProperty) -> Result<Option<String>>;

    /// `(instance, class)` from `WM_CLASS`.
    fn wm_class(&self, window: Window) -> Result<Option<(String, String)>>;

    fn input_focus(&self) -> Result<Window>;

    fn keyboard_mapping(&self) -> Result<KeyboardMapping>;

    fn modifier_mapping(&self) -> Result<ModifierMapping>;

    fn led_mask(&self) -> Result<u32>;

    /// Subscribe to child create/destroy notifications on the root window.
    fn watch_root(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Idempotent. Later calls fail with `ConnectionClosed`.
    fn close(&mut self);
}

atom_manager! {
    pub Atoms: AtomsCookie {
        UTF8_STRING,
        WM_CLASS,
        WM_NAME,
        _NET_WM_NAME,
        _NET_WM_VISIBLE_NAME,
    }
}

pub struct X11Session {
    conn: Option<Arc<RustConnection>>,
    root: Window,
    atoms: Atoms,
}

impl X11Session {
    /// Connect to `display`, or `$DISPLAY` when `None`.
    pub fn open(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| MonkeyError::X11(format!("screen {} not found", screen_num)))?;
        let atoms = Atoms::new(&conn)?.reply()?;

        tracing::info!(root, "Connected to X server");

        Ok(X11Session {
            conn: Some(Arc::new(conn)),
            root,
            atoms,
        })
    }

    fn conn(&self) -> Result<&RustConnection> {
        self.conn.as_deref().ok_or(MonkeyError::ConnectionClosed)
    }

    /// Event source reading from this session's connection.
    pub fn events(&self) -> Result<X11Events> {
        let conn = self.conn.clone().ok_or(MonkeyError::ConnectionClosed)?;
        Ok(X11Events { conn })
    }

    fn property(&self, window: Window, atom: u32) -> Result<Option<Vec<u8>>> {
        let reply = self
            .conn()?
            .get_property(false, window, atom, AtomEnum::ANY, 0, u32::MAX)?
            .reply()?;
        if reply.type_ == u32::from(AtomEnum::NONE) {
            return Ok(None);
        }
        Ok(Some(reply.value))
    }
}

impl XDisplay for X11Session {
    fn root(&self) -> Window {
        self.root
    }

    fn query_tree(&self, window: Window) -> Result<WindowTree> {
        let reply = self.conn()?.query_tree(window)?.reply()?;
        Ok(WindowTree {
            parent: Some(reply.parent).filter(|p| *p != x11rb::NONE),
            children: reply.children,
        })
    }

    fn grab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()> {
        self.conn()?
            .grab_key(
                true,
                window,
                ModMask::from(mask),
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )?
            .check()
            .map_err(|e| match MonkeyError::from(e) {
                MonkeyError::X11(msg) => MonkeyError::Grab(msg),
                other => other,
            })
    }

    fn ungrab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()> {
        self.conn()?
            .ungrab_key(keycode, window, ModMask::from(mask))?
            .check()?;
        Ok(())
    }

    fn title(&self, window: Window, property: TitleProperty) -> Result<Option<String>> {
        let atom = match property {
            TitleProperty::VisibleName => self.atoms._NET_WM_VISIBLE_NAME,
            TitleProperty::Name => self.atoms._NET_WM_NAME,
            TitleProperty::LegacyName => self.atoms.WM_NAME,
        };
        Ok(self
            .property(window, atom)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn wm_class(&self, window: Window) -> Result<Option<(String, String)>> {
        let Some(bytes) = self.property(window, self.atoms.WM_CLASS)? else {
            return Ok(None);
        };
        let mut parts = bytes.split(|b| *b == 0);
        let instance = parts
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();
        let class = parts
            .next()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();
        Ok(Some((instance, class)))
    }

    fn input_focus(&self) -> Result<Window> {
        Ok(self.conn()?.get_input_focus()?.reply()?.focus)
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping> {
        let conn = self.conn()?;
        let setup = conn.setup();
        let (min, max) = (setup.min_keycode, setup.max_keycode);
        let reply = conn.get_keyboard_mapping(min, max - min + 1)?.reply()?;
        Ok(KeyboardMapping {
            min_keycode: min,
            keysyms_per_keycode: reply.keysyms_per_keycode,
            keysyms: reply.keysyms,
        })
    }

    fn modifier_mapping(&self) -> Result<ModifierMapping> {
        let reply = self.conn()?.get_modifier_mapping()?.reply()?;
        Ok(ModifierMapping {
            keycodes_per_modifier: reply.keycodes_per_modifier(),
            keycodes: reply.keycodes,
        })
    }

    fn led_mask(&self) -> Result<u32> {
        Ok(self.conn()?.get_keyboard_control()?.reply()?.led_mask)
    }

    fn watch_root(&mut self) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new()
            .event_mask(EventMask::SUBSTRUCTURE_NOTIFY | EventMask::STRUCTURE_NOTIFY);
        self.conn()?
            .change_window_attributes(self.root, &aux)?
            .check()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.conn()?.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.flush() {
                tracing::debug!(error = %e, "Flush before close failed");
            }
            tracing::info!("Closed X server connection");
        }
    }
}

/// Reads structure and mapping notifications off the session connection.
pub struct X11Events {
    conn: Arc<RustConnection>,
}

impl EventSource for X11Events {
    fn drain(&mut self) -> Result<Vec<XEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.conn.poll_for_event()? {
            events.push(match event {
                Event::CreateNotify(e) => XEvent::Created(e.window),
                Event::DestroyNotify(e) => XEvent::Destroyed(e.window),
                Event::MappingNotify(e) if e.request != Mapping::POINTER => XEvent::MappingChanged,
                _ => XEvent::Other,
            });
        }
        Ok(events)
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let mut fds = [PollFd::new(self.conn.stream().as_fd(), PollFlags::POLLIN)];
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => Ok(n > 0),
            Err(nix::Error::EINTR) => Ok(false),
            Err(e) => Err(MonkeyError::Io(e.into())),
        }
    }
}
