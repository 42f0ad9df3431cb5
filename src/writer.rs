use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::channel::ChannelError;
use crate::line::CARRIAGE_RETURN;
use crate::session::Shared;

pub const EXIT_COMMAND: &str = "exit";

/// Why the writer loop ended. Every variant except Shutdown means the writer
/// itself requested the shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// The operator typed the exit command.
    ExitCommand,
    /// Console input ended (e.g. Ctrl-D, or stdin was a file).
    EndOfInput,
    /// Another party (usually the Ctrl-C handler) requested shutdown.
    Shutdown,
    /// The device could not be written to.
    ConnectionLost,
    /// The writer thread panicked.
    Panicked,
}

impl fmt::Display for WriterExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriterExit::ExitCommand => "exit command",
            WriterExit::EndOfInput => "end of console input",
            WriterExit::Shutdown => "shutdown requested",
            WriterExit::ConnectionLost => "serial connection lost",
            WriterExit::Panicked => "writer panicked",
        })
    }
}

pub fn is_exit_command(line: &str) -> bool {
    line.eq_ignore_ascii_case(EXIT_COMMAND)
}

/// Sends one operator line to the device, one character at a time, followed
/// by a carriage return. Each character is logged (via the line accumulator)
/// and echoed as it goes out.
pub fn send_line(shared: &Shared, text: &str) -> Result<(), ChannelError> {
    let mut buf = [0u8; 4];
    for c in text.chars() {
        shared.channel.write(c.encode_utf8(&mut buf).as_bytes())?;
        shared.line.append(c);
        shared.console.echo_char(c);
    }
    shared.channel.write(&[CARRIAGE_RETURN as u8])?;
    shared
        .line
        .append_and_flush(CARRIAGE_RETURN, |line| shared.sink.record_or_warn(line));
    shared.console.line_break();
    Ok(())
}

/// Forwards operator lines from `rx_line` until the operator exits, input
/// ends, the device goes away, or someone else requests shutdown. `poll`
/// bounds how long a shutdown requested elsewhere goes unnoticed.
pub fn run_writer(shared: &Shared, rx_line: &Receiver<String>, poll: Duration) -> WriterExit {
    loop {
        if shared.shutdown.is_requested() {
            return WriterExit::Shutdown;
        }
        let text = match rx_line.recv_timeout(poll) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("console input closed, exiting");
                shared.shutdown.request();
                return WriterExit::EndOfInput;
            }
        };
        if let Err(e) = send_line(shared, &text) {
            log::error!("writing to {} failed: {e}", shared.channel.port_name());
            shared.shutdown.request();
            return WriterExit::ConnectionLost;
        }
        if is_exit_command(&text) {
            log::info!("exiting");
            shared.shutdown.request();
            return WriterExit::ExitCommand;
        }
    }
}

pub fn start_writer_thread(
    shared: Shared,
    rx_line: Receiver<String>,
    poll: Duration,
) -> thread::JoinHandle<WriterExit> {
    thread::spawn(move || run_writer(&shared, &rx_line, poll))
}
