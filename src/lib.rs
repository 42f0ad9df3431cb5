//! serlog is an interactive serial terminal. Everything the device sends and
//! everything the operator types is echoed to the console and logged, one
//! timestamped entry per carriage-return terminated line. Optionally the
//! current network time is sent to the device at a fixed interval.
//!
//! A [`Session`] owns one open port and its log file, and runs three loops on
//! their own threads:
//!
//! * the reader, which echoes and logs whatever the device sends;
//! * the writer, which forwards operator lines until `exit`;
//! * the time announcer (optional).
//!
//! Any of the writer, the Ctrl-C handler or end of console input can request
//! shutdown; the session then joins every loop before closing the port.

pub mod announcer;
pub mod channel;
pub mod clock;
pub mod config;
pub mod console;
pub mod decode;
pub mod line;
pub mod log_sink;
pub mod reader;
pub mod session;
pub mod setup;
pub mod shutdown;
pub mod writer;

pub use channel::{ChannelError, SerialChannel};
pub use clock::Clock;
pub use config::{Cli, SessionConfig};
pub use console::Console;
pub use log_sink::{LogSink, LogSinkError};
pub use session::{Session, SessionError, SessionSummary};
pub use shutdown::Shutdown;
pub use writer::WriterExit;
