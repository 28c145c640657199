use super::UsageService;
use crate::error::UsageError;
use crate::models::UsageRecord;
use log::{info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::screensaver;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, Window};

/// Usage service backed by the X server.
///
/// X11 keeps no usage history, so a query reports at most one record: the
/// window that currently has focus, last used when the user last produced
/// input. Without a display connection the service behaves as if access had
/// been revoked.
pub struct X11UsageService {
    conn: Option<x11rb::rust_connection::RustConnection>,
    root: Window,
}

impl Default for X11UsageService {
    fn default() -> Self {
        Self::new()
    }
}

impl X11UsageService {
    pub fn new() -> Self {
        match x11rb::connect(None) {
            Ok((conn, screen_num)) => {
                let Some(root) = conn.setup().roots.get(screen_num).map(|s| s.root) else {
                    warn!(
                        "Invalid screen number {screen_num} ({} screens available). Usage tracking disabled.",
                        conn.setup().roots.len()
                    );
                    return Self { conn: None, root: 0 };
                };
                Self {
                    conn: Some(conn),
                    root,
                }
            }
            Err(e) => {
                // Wayland or headless: keep running, every query reports a denied grant
                warn!("Failed to connect to X server: {e}. Usage tracking disabled.");
                Self { conn: None, root: 0 }
            }
        }
    }

    fn get_atom(&self, name: &str) -> Option<Atom> {
        self.conn
            .as_ref()?
            .intern_atom(false, name.as_bytes())
            .ok()?
            .reply()
            .ok()
            .map(|r| r.atom)
    }

    fn get_window_property(&self, window: Window, atom: Atom) -> Option<String> {
        let reply = self
            .conn
            .as_ref()?
            .get_property(false, window, atom, AtomEnum::ANY, 0, 1024)
            .ok()?
            .reply()
            .ok()?;

        if reply.value.is_empty() {
            return None;
        }

        String::from_utf8(reply.value).ok()
    }

    fn get_active_window_id(&self) -> Option<Window> {
        let conn = self.conn.as_ref()?;
        let atom = self.get_atom("_NET_ACTIVE_WINDOW")?;
        let reply = conn
            .get_property(false, self.root, atom, AtomEnum::WINDOW, 0, 1)
            .ok()?
            .reply()
            .ok()?;

        // Bound first: the iterator borrows `reply`, which drops at the end of this block
        let id = reply.value32()?.next().filter(|id| *id != 0);
        id
    }

    /// `WM_CLASS` holds "instance\0class\0"; the instance name is the stable identifier.
    fn get_window_identifier(&self, window: Window) -> Option<String> {
        let class = self.get_window_property(window, AtomEnum::WM_CLASS.into())?;
        class
            .split('\0')
            .find(|part| !part.is_empty())
            .map(ToString::to_string)
    }

    fn get_idle_millis(&self) -> i64 {
        let Some(conn) = self.conn.as_ref() else {
            return 0;
        };

        screensaver::query_info(conn, self.root)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map_or(0, |info| i64::from(info.ms_since_user_input))
    }
}

impl UsageService for X11UsageService {
    fn query_usage(&self, begin_millis: i64, end_millis: i64) -> Result<Vec<UsageRecord>, UsageError> {
        if self.conn.is_none() {
            return Err(UsageError::PermissionDenied);
        }

        let Some(window) = self.get_active_window_id() else {
            return Ok(Vec::new());
        };
        let Some(identifier) = self.get_window_identifier(window) else {
            return Ok(Vec::new());
        };

        let last_used = end_millis.saturating_sub(self.get_idle_millis());
        if last_used < begin_millis {
            return Ok(Vec::new());
        }

        Ok(vec![UsageRecord::new(&identifier, last_used)])
    }

    fn has_permission(&self) -> bool {
        self.conn.is_some()
    }

    fn request_permission(&self) {
        if self.conn.is_none() {
            info!("Usage tracking needs an X11 session; set DISPLAY and restart the host");
        }
    }
}
