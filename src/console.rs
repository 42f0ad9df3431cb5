use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Console is where serial traffic is echoed. Reader and writer threads share
/// it; each echo is written and flushed under the lock so characters from the
/// two directions never tear each other.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<dyn Write + Send>>,
}

impl Console {
    pub fn stdout() -> Console {
        Console::new(Arc::new(Mutex::new(std::io::stdout())))
    }

    pub fn new(out: Arc<Mutex<dyn Write + Send>>) -> Console {
        Console { out }
    }

    pub fn echo_char(&self, c: char) {
        let mut buf = [0u8; 4];
        self.echo(c.encode_utf8(&mut buf));
    }

    pub fn echo(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // There's nowhere sensible to report a broken stdout to.
        if out.write_all(text.as_bytes()).is_ok() {
            let _ = out.flush();
        }
    }

    pub fn line_break(&self) {
        self.echo("\n");
    }
}

/// Spawns the thread that reads operator lines from stdin.
// Blocking reads on stdin can't be cancelled, hence the extra thread: the
// writer polls the receiver and so still notices Ctrl-C while the operator is
// idle. The pump itself stays stuck in read_line at shutdown and only goes
// away with the process, which is fine since it owns nothing but stdin.
// TODO: poll the stdin fd (or use a non-blocking console API on Windows) so
// the pump can be stopped and joined like the other threads.
pub fn spawn_stdin_pump() -> Receiver<String> {
    let (tx_line, rx_line) = mpsc::channel();
    thread::spawn(move || pump_lines(std::io::stdin().lock(), tx_line));
    rx_line
}

/// Forwards each line of `input` (without its line terminator) to `tx_line`.
/// Returns at end of input, on a read error, or once nobody is listening;
/// dropping `tx_line` is how the writer learns that input has ended.
pub fn pump_lines<R: BufRead>(mut input: R, tx_line: Sender<String>) {
    let mut buf = String::new();
    loop {
        buf.clear();
        match input.read_line(&mut buf) {
            Ok(0) => return,
            Ok(_) => (),
            Err(e) => {
                log::error!("console input failed: {e}");
                return;
            }
        }
        let line = buf.trim_end_matches(['\n', '\r']).to_string();
        if tx_line.send(line).is_err() {
            return;
        }
    }
}
