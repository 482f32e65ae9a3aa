use parking_lot::Mutex;
use playtime_core::{ForegroundQuery, ProcessError, ProcessId};
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, Window};
use x11rb::rust_connection::RustConnection;

struct X11Session {
    conn: RustConnection,
    root: Window,
    active_window: Atom,
    wm_pid: Atom,
}

fn x11_error(e: impl std::fmt::Display) -> ProcessError {
    ProcessError::Other(format!("X11: {e}"))
}

impl X11Session {
    fn connect() -> Result<Self, ProcessError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| ProcessError::Unsupported(format!("no X11 display: {e}")))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| x11_error("screen not found"))?;

        let active_window = Self::intern(&conn, "_NET_ACTIVE_WINDOW")?;
        let wm_pid = Self::intern(&conn, "_NET_WM_PID")?;

        debug!("Connected to X11 for foreground queries");
        Ok(Self {
            conn,
            root,
            active_window,
            wm_pid,
        })
    }

    fn intern(conn: &RustConnection, name: &str) -> Result<Atom, ProcessError> {
        Ok(conn
            .intern_atom(false, name.as_bytes())
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?
            .atom)
    }

    fn read_u32(&self, window: Window, property: Atom, kind: AtomEnum) -> Result<Option<u32>, ProcessError> {
        let reply = self
            .conn
            .get_property(false, window, property, kind, 0, 1)
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?;

        Ok(reply.value32().and_then(|mut values| values.next()))
    }

    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
        let window = match self.read_u32(self.root, self.active_window, AtomEnum::WINDOW)? {
            Some(window) if window != 0 => window,
            _ => return Ok(None),
        };

        Ok(self
            .read_u32(window, self.wm_pid, AtomEnum::CARDINAL)?
            .filter(|pid| *pid != 0)
            .map(ProcessId::from))
    }
}

/// Foreground owner via the EWMH `_NET_ACTIVE_WINDOW` and `_NET_WM_PID`
/// properties. Connects lazily and reconnects after a failed request.
pub struct X11ForegroundQuery {
    session: Mutex<Option<X11Session>>,
}

impl Default for X11ForegroundQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl X11ForegroundQuery {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }
}

impl ForegroundQuery for X11ForegroundQuery {
    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
        let mut guard = self.session.lock();
        if guard.is_none() {
            *guard = Some(X11Session::connect()?);
        }

        let result = match guard.as_ref() {
            Some(session) => session.foreground_pid(),
            None => return Ok(None),
        };

        if result.is_err() {
            *guard = None;
        }
        result
    }
}
