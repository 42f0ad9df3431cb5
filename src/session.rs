use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::announcer::{self, AnnouncerSettings, HttpTimeSource, TimeSource};
use crate::channel::{ChannelError, SerialChannel};
use crate::clock::Clock;
use crate::config::{SessionConfig, DEFAULT_IDLE_POLL, DEFAULT_INPUT_POLL};
use crate::console::Console;
use crate::line::LineAccumulator;
use crate::log_sink::{LogSink, LogSinkError};
use crate::reader;
use crate::shutdown::Shutdown;
use crate::writer::{self, WriterExit};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    LogSink(#[from] LogSinkError),
}

/// Shared is what every loop of a session gets a clone of: the resources they
/// all use, plus the shutdown flag.
#[derive(Clone)]
pub struct Shared {
    pub channel: Arc<SerialChannel>,
    pub sink: Arc<LogSink>,
    pub line: Arc<LineAccumulator>,
    pub console: Console,
    pub shutdown: Shutdown,
}

/// SessionSummary describes how a session ended.
#[derive(Debug)]
pub struct SessionSummary {
    pub writer_exit: WriterExit,
    /// Set if the reader stopped early because the device failed.
    pub reader_error: Option<ChannelError>,
    pub entries_written: u64,
}

/// Session owns one run of the terminal: an open port, its log, and the
/// threads that service them.
// Only the session closes the port and the log, after every loop is joined.
pub struct Session {
    shared: Shared,
    idle_poll: Duration,
    input_poll: Duration,
    announcer: Option<(Box<dyn TimeSource>, AnnouncerSettings)>,
}

impl Session {
    /// Opens the port and the log described by `config`. Any failure here is
    /// fatal for the session; nothing has been started yet.
    pub fn open(
        config: &SessionConfig,
        clock: Clock,
        console: Console,
    ) -> Result<Session, SessionError> {
        let channel = SerialChannel::open(&config.port, config.baud_rate, config.read_timeout)?;
        let sink = LogSink::create(&config.log_path, clock)?;
        log::info!(
            "opened {} at {} baud, logging to {}",
            config.port,
            config.baud_rate,
            sink.path().display()
        );

        let mut session = Session::new(channel, sink, console)
            .with_poll_intervals(config.idle_poll, config.input_poll);
        if let Some(time_sync) = &config.announcer {
            session = session.with_announcer(
                Box::new(HttpTimeSource::new(&time_sync.url, time_sync.request_timeout)),
                time_sync.settings.clone(),
            );
        }
        Ok(session)
    }

    pub fn new(channel: SerialChannel, sink: LogSink, console: Console) -> Session {
        Session {
            shared: Shared {
                channel: Arc::new(channel),
                sink: Arc::new(sink),
                line: Arc::new(LineAccumulator::new()),
                console,
                shutdown: Shutdown::new(),
            },
            idle_poll: DEFAULT_IDLE_POLL,
            input_poll: DEFAULT_INPUT_POLL,
            announcer: None,
        }
    }

    /// `idle` is how long the reader sleeps when the device is quiet, `input`
    /// how long the writer waits for a line before rechecking shutdown.
    pub fn with_poll_intervals(mut self, idle: Duration, input: Duration) -> Session {
        self.idle_poll = idle;
        self.input_poll = input;
        self
    }

    pub fn with_announcer(
        mut self,
        source: Box<dyn TimeSource>,
        settings: AnnouncerSettings,
    ) -> Session {
        self.announcer = Some((source, settings));
        self
    }

    /// Returns a handle that can end the session from outside, e.g. from a
    /// Ctrl-C handler.
    pub fn shutdown(&self) -> Shutdown {
        self.shared.shutdown.clone()
    }

    pub fn log_sink(&self) -> Arc<LogSink> {
        self.shared.sink.clone()
    }

    /// Runs the session until the writer loop ends, then stops and joins the
    /// other loops and releases the port and log. `rx_line` supplies operator
    /// input, one line per message; dropping its sender ends the session.
    pub fn run(mut self, rx_line: Receiver<String>) -> SessionSummary {
        let reader = reader::start_reader_thread(self.shared.clone(), self.idle_poll);
        let announcer = self.announcer.take().map(|(source, settings)| {
            announcer::start_announcer_thread(self.shared.clone(), source, settings)
        });
        let writer = writer::start_writer_thread(self.shared.clone(), rx_line, self.input_poll);

        // Only the writer ever decides we're done (exit, EOF, Ctrl-C via the
        // flag, or a dead port). Everything else just follows the flag, so
        // wait for the writer first and then make sure the flag is set.
        let writer_exit = writer.join().unwrap_or_else(|_| {
            log::error!("writer loop panicked");
            WriterExit::Panicked
        });
        self.shared.shutdown.request();

        let reader_error = match reader.join() {
            Ok(result) => result.err(),
            Err(_) => {
                log::error!("reader loop panicked");
                None
            }
        };
        if let Some(announcer) = announcer {
            if announcer.join().is_err() {
                log::error!("time announcer panicked");
            }
        }

        self.close();
        SessionSummary {
            writer_exit,
            reader_error,
            entries_written: self.shared.sink.entries_written(),
        }
    }

    /// Releases the port and the log. Safe to call any number of times.
    pub fn close(&self) {
        if self.shared.channel.close() {
            log::info!("closed {}", self.shared.channel.port_name());
        }
        self.shared.sink.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
