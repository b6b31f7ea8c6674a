use crate::bus::Device;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::io::{stdin, stdout, IsTerminal};
use std::time::Duration;

pub const BIT_A_UP: u8 = 1 << 7;
pub const BIT_A_DOWN: u8 = 1 << 6;
pub const BIT_B_UP: u8 = 1 << 5;
pub const BIT_B_DOWN: u8 = 1 << 4;
pub const BIT_START: u8 = 1 << 3;
pub const BIT_RESET: u8 = 1 << 2;

/// One-byte input port. Construction puts the terminal into raw mode for
/// the joystick's lifetime (skipped when stdin/stdout are not terminals);
/// Drop restores it on every exit path.
pub struct Joystick {
    state: u8,
    quit: bool,
    raw_mode: bool,
}

impl Joystick {
    pub fn new() -> std::io::Result<Self> {
        let raw_mode = stdin().is_terminal() && stdout().is_terminal();
        if raw_mode {
            crossterm::terminal::enable_raw_mode()?;
        }
        Ok(Self {
            state: 0,
            quit: false,
            raw_mode,
        })
    }

    /// Frame scan: clear the state byte, then fold every pending key event
    /// into it.
    pub fn update(&mut self) {
        self.state = 0;
        while matches!(event::poll(Duration::ZERO), Ok(true)) {
            match event::read() {
                Ok(Event::Key(key)) => self.apply_key(key),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    /// Latched once Ctrl+C or 'q' is seen. Raw mode swallows SIGINT, so the
    /// interactive driver polls this for its exit path.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    fn apply_key(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        if key.code == KeyCode::Char('q')
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
        {
            self.quit = true;
            return;
        }
        self.state |= button_bits(key.code);
    }
}

impl Device for Joystick {
    fn read(&mut self, _addr: u64) -> u8 {
        self.state
    }

    fn write(&mut self, _addr: u64, _data: u8) {
        // Input-only port.
    }
}

impl Drop for Joystick {
    fn drop(&mut self) {
        if self.raw_mode {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

/// Key-to-button mapping. The arrow keys arrive as the `ESC [ A` / `ESC [ B`
/// escape sequences of the B pair.
pub fn button_bits(code: KeyCode) -> u8 {
    match code {
        KeyCode::Char('w') | KeyCode::Char('W') => BIT_A_UP,
        KeyCode::Char('s') | KeyCode::Char('S') => BIT_A_DOWN,
        KeyCode::Up => BIT_B_UP,
        KeyCode::Down => BIT_B_DOWN,
        KeyCode::Char('e') | KeyCode::Char('E') => BIT_START,
        KeyCode::Char('r') | KeyCode::Char('R') => BIT_RESET,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Joystick {
        Joystick {
            state: 0,
            quit: false,
            raw_mode: false,
        }
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn button_mapping_matches_the_port_layout() {
        assert_eq!(button_bits(KeyCode::Char('w')), BIT_A_UP);
        assert_eq!(button_bits(KeyCode::Char('W')), BIT_A_UP);
        assert_eq!(button_bits(KeyCode::Char('s')), BIT_A_DOWN);
        assert_eq!(button_bits(KeyCode::Up), BIT_B_UP);
        assert_eq!(button_bits(KeyCode::Down), BIT_B_DOWN);
        assert_eq!(button_bits(KeyCode::Char('e')), BIT_START);
        assert_eq!(button_bits(KeyCode::Char('r')), BIT_RESET);
        assert_eq!(button_bits(KeyCode::Char('x')), 0);
    }

    #[test]
    fn keys_accumulate_within_a_frame() {
        let mut joystick = detached();
        joystick.apply_key(press(KeyCode::Char('w')));
        joystick.apply_key(press(KeyCode::Down));
        assert_eq!(joystick.read(0), BIT_A_UP | BIT_B_DOWN);
    }

    #[test]
    fn release_events_are_ignored() {
        let mut joystick = detached();
        let mut release = press(KeyCode::Char('w'));
        release.kind = KeyEventKind::Release;
        joystick.apply_key(release);
        assert_eq!(joystick.read(0), 0);
    }

    #[test]
    fn ctrl_c_latches_quit() {
        let mut joystick = detached();
        joystick.apply_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(joystick.quit_requested());
        assert_eq!(joystick.read(0), 0);
    }

    #[test]
    fn writes_are_ignored() {
        let mut joystick = detached();
        joystick.write(0, 0xFF);
        assert_eq!(joystick.read(0), 0);
    }
}
