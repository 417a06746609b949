//! Terminal collaborator: raw-mode discipline and the keyboard-backed
//! [`InputSource`].

use std::collections::VecDeque;
use std::io::{self, stdin, IsTerminal, Read, Stdout, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};

use crate::interrupt;
use crate::mem::InputSource;

/// Holds the terminal in raw mode for the duration of a run.
///
/// Raw mode disables line buffering and echo so characters arrive one at a
/// time. Restoration happens on drop, which covers every exit path: normal
/// halt, fault, and interrupt.
///
/// A no-op when stdin is not a terminal; piped input is already unbuffered
/// and never echoes.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn new() -> io::Result<RawModeGuard> {
        let active = stdin().is_terminal();
        if active {
            terminal::enable_raw_mode()?;
        }
        Ok(RawModeGuard { active })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// Keyboard port backed by the process terminal.
///
/// Interactive input is read as key events, which deliver multi-byte
/// characters as whole `char`s; these are split into UTF-8 bytes and handed
/// out one call at a time. Piped input is read bytewise from stdin.
///
/// Caller must ensure the terminal is in raw mode while stdin is interactive.
pub struct TermSource {
    pending: VecDeque<u8>,
    interactive: bool,
}

impl TermSource {
    pub fn new() -> TermSource {
        TermSource {
            pending: VecDeque::new(),
            interactive: stdin().is_terminal(),
        }
    }

    /// Queue the UTF-8 encoding of `ch`, returning its first byte.
    fn push_char(&mut self, ch: char) -> u8 {
        let mut buf = [0u8; 4];
        let len = ch.encode_utf8(&mut buf).len();
        self.pending.extend(&buf[1..len]);
        buf[0]
    }
}

impl Default for TermSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for TermSource {
    fn poll(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Some(byte);
        }

        if !self.interactive {
            if !stdin_ready() {
                return None;
            }
            let mut buf = [0u8; 1];
            return match stdin().read(&mut buf) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(buf[0]),
            };
        }

        // Only drain events that are already queued; the check must not block.
        while event::poll(Duration::ZERO).unwrap_or(false) {
            let Ok(Event::Key(key)) = event::read() else {
                continue;
            };
            match translate(key) {
                Translated::Char(ch) => return Some(self.push_char(ch)),
                Translated::Interrupt => {
                    interrupt::raise();
                    return None;
                }
                Translated::Skip => continue,
            }
        }
        None
    }

    fn read(&mut self) -> io::Result<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Ok(byte);
        }

        if !self.interactive {
            let mut buf = [0u8; 1];
            stdin().read_exact(&mut buf)?;
            return Ok(buf[0]);
        }

        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match translate(key) {
                Translated::Char(ch) => return Ok(self.push_char(ch)),
                Translated::Interrupt => {
                    interrupt::raise();
                    return Err(io::ErrorKind::Interrupted.into());
                }
                Translated::Skip => continue,
            }
        }
    }
}

/// Zero-timeout readiness check on stdin, for the piped case. An open pipe
/// with no data must read as "not ready", never block.
fn stdin_ready() -> bool {
    let mut fds = libc::pollfd {
        fd: stdin().as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: fds points to one valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut fds, 1, 0) };
    ready > 0 && fds.revents & libc::POLLIN != 0
}

enum Translated {
    Char(char),
    Interrupt,
    Skip,
}

fn translate(event: KeyEvent) -> Translated {
    if matches!(event.kind, KeyEventKind::Release) {
        return Translated::Skip;
    }

    match (event.modifiers, event.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Translated::Interrupt,
        (_, KeyCode::Enter) => Translated::Char('\n'),
        (_, KeyCode::Tab) => Translated::Char('\t'),
        (_, KeyCode::Backspace) => Translated::Char('\u{8}'),
        (_, KeyCode::Esc) => Translated::Char('\u{1b}'),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Translated::Char(ch),
        _ => Translated::Skip,
    }
}

/// Stdout writer that rewrites `\n` to `\r\n`.
///
/// Raw mode disables output post-processing, so bare newlines would leave the
/// cursor in the middle of the screen.
pub struct RawWriter {
    inner: Stdout,
}

impl RawWriter {
    pub fn new() -> RawWriter {
        RawWriter {
            inner: io::stdout(),
        }
    }
}

impl Default for RawWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for RawWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if byte == b'\n' {
                self.inner.write_all(b"\r\n")?;
            } else {
                self.inner.write_all(&[byte])?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
