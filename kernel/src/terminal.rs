//! Terminal line discipline. Raw keystrokes land in a
//! `Fifo`; `read` cooks them into a line buffer honoring erase and
//! carriage-return; `write` expands `\n` to `\r\n` and `\t` to seven
//! spaces (eight bytes total) on the way out, echoing input back as it
//! arrives.

use crate::config::{LINE_BUFFER_SIZE, TERMINAL_CHAR_CR, TERMINAL_CHAR_ERASE, TERMINAL_FIFO_SIZE};
use crate::fifo::Fifo;

/// Anything the terminal can write raw bytes to. Implemented by the
/// PL011 shim on target and by an in-memory sink on host builds/tests.
pub trait ByteSink {
    fn write(&self, bytes: &[u8]);
}

#[cfg(target_arch = "arm")]
impl ByteSink for crate::drivers::uart::Uart {
    fn write(&self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }
}

impl ByteSink for crate::drivers::uart::HostUart {
    fn write(&self, bytes: &[u8]) {
        if let Ok(s) = core::str::from_utf8(bytes) {
            self.write_str(s);
        }
    }
}

struct LineBuffer {
    buf: [u8; LINE_BUFFER_SIZE],
    cursor: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        LineBuffer {
            buf: [0; LINE_BUFFER_SIZE],
            cursor: 0,
        }
    }

    /// Returns `None` if the buffer is already full (spec: `cursor ==
    /// LINE_BUFFER_SIZE - 1` rejects further inserts).
    fn insert_char(&mut self, c: u8) -> Option<()> {
        if self.cursor == LINE_BUFFER_SIZE - 1 {
            return None;
        }
        self.buf[self.cursor] = c;
        self.cursor += 1;
        Some(())
    }

    fn remove_char(&mut self) -> Option<()> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(())
    }
}

pub struct Terminal<S: ByteSink> {
    raw: Fifo<TERMINAL_FIFO_SIZE>,
    cooked: LineBuffer,
    sink: S,
}

impl<S: ByteSink> Terminal<S> {
    pub const fn new(sink: S) -> Self {
        Terminal {
            raw: Fifo::new(),
            cooked: LineBuffer::new(),
            sink,
        }
    }

    /// Called from the keystroke-arrival path (e.g. a UART RX IRQ):
    /// echoes `c` and queues it for `read` to consume.
    pub fn process_input_char(&mut self, c: u8) {
        self.echo_char(c);
        let _ = self.raw.push(c);
    }

    fn echo_char(&mut self, c: u8) {
        match c {
            TERMINAL_CHAR_ERASE => self.sink.write(b"\x08 \x08"),
            TERMINAL_CHAR_CR => self.sink.write(b"\r\n"),
            _ => self.sink.write(&[c]),
        }
    }

    /// Pops raw bytes, applying erase/CR, until a line is completed or
    /// the line buffer rejects a char; copies up to `buf.len()` cooked
    /// bytes out and resets the cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        loop {
            let c = match self.raw.pop() {
                Some(c) => c,
                None => continue,
            };

            let (done, inserted) = match c {
                TERMINAL_CHAR_ERASE => {
                    self.cooked.remove_char();
                    (false, true)
                }
                TERMINAL_CHAR_CR => (true, self.cooked.insert_char(b'\n').is_some()),
                _ => (false, self.cooked.insert_char(c).is_some()),
            };

            if done || !inserted {
                break;
            }
        }

        let count = buf.len().min(self.cooked.cursor);
        buf[..count].copy_from_slice(&self.cooked.buf[..count]);
        self.cooked.cursor = 0;
        count
    }

    /// Writes `data`, expanding `\n`/`\t` on the way out.
    pub fn write(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let run_end = data[i..]
                .iter()
                .position(|&c| c == b'\n' || c == b'\t')
                .map(|p| i + p)
                .unwrap_or(data.len());
            if run_end > i {
                self.sink.write(&data[i..run_end]);
            }
            i = run_end;
            if i >= data.len() {
                break;
            }
            match data[i] {
                b'\n' => self.sink.write(b"\r\n"),
                b'\t' => self.sink.write(&[b' '; 7]),
                c => self.sink.write(&[c]),
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::uart::HostUart;

    fn read_line(term: &mut Terminal<HostUart>, keys: &[u8]) -> alloc::string::String {
        for &k in keys {
            term.process_input_char(k);
        }
        let mut out = [0u8; LINE_BUFFER_SIZE];
        let n = term.read(&mut out);
        alloc::string::String::from_utf8_lossy(&out[..n]).into_owned()
    }

    #[test]
    fn erase_removes_the_previous_character() {
        let mut term = Terminal::new(HostUart::new());
        let line = read_line(&mut term, b"abx\x7fc\r");
        assert_eq!(line, "abc\n");
    }

    #[test]
    fn carriage_return_terminates_the_line() {
        let mut term = Terminal::new(HostUart::new());
        let line = read_line(&mut term, b"hi\r");
        assert_eq!(line, "hi\n");
    }

    #[test]
    fn write_expands_newline_and_tab() {
        let mut term = Terminal::new(HostUart::new());
        term.write(b"a\nb\tc");
        let written = term.sink.lines.lock().clone();
        assert!(written.starts_with("a\r\nb"));
    }
}
