use std::io::{ErrorKind, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type ReadHalf = Box<dyn Read + Send>;
pub type WriteHalf = Box<dyn Write + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("unable to open {port} at {baud_rate} baud: {source}")]
    Open {
        port: String,
        baud_rate: u32,
        source: serialport::Error,
    },
    #[error("serial read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("serial write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("serial channel is closed")]
    Closed,
}

/// SerialChannel is the connection to the device, shared by every loop.
///
/// serialport gives us a single object for both directions, and reads hold
/// it for up to the read timeout. We therefore clone the port and keep the
/// read and write halves behind separate locks, so a reader sitting in its
/// timeout never delays a keystroke or a time announcement.
pub struct SerialChannel {
    port_name: String,
    baud_rate: u32,
    reader: Mutex<Option<ReadHalf>>,
    writer: Mutex<Option<WriteHalf>>,
}

impl SerialChannel {
    /// Opens `port_name` as 8N1 without flow control. `read_timeout` bounds
    /// how long read_available can block, and hence how quickly the reader
    /// notices a shutdown.
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<SerialChannel, ChannelError> {
        let open_error = |source: serialport::Error| ChannelError::Open {
            port: port_name.to_string(),
            baud_rate,
            source,
        };
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(open_error)?;
        // Reads and writes need to happen independently (and both need &mut),
        // so a shared Mutex around a single handle doesn't work. Cloning the
        // port is a little ugly but it's what serialport offers.
        let reader = port.try_clone().map_err(open_error)?;
        Ok(SerialChannel::from_halves(
            port_name,
            baud_rate,
            Box::new(reader),
            Box::new(port),
        ))
    }

    /// Builds a channel from arbitrary halves, e.g. a pty or an in-memory
    /// port.
    pub fn from_halves(
        port_name: &str,
        baud_rate: u32,
        reader: ReadHalf,
        writer: WriteHalf,
    ) -> SerialChannel {
        SerialChannel {
            port_name: port_name.to_string(),
            baud_rate,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Reads whatever the device has sent, returning 0 if nothing arrived
    /// within the read timeout.
    pub fn read_available(&self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let mut reader = lock(&self.reader);
        let Some(reader) = reader.as_mut() else {
            return Err(ChannelError::Closed);
        };
        match reader.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(ChannelError::Read(e)),
        }
    }

    /// Writes all of `bytes` in one go. Concurrent writers are serialised,
    /// so one call's bytes are never split by another's.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return Err(ChannelError::Closed);
        };
        writer.write_all(bytes).map_err(ChannelError::Write)?;
        writer.flush().map_err(ChannelError::Write)
    }

    /// Releases the port. Returns true if this call released it; later calls
    /// are no-ops returning false.
    pub fn close(&self) -> bool {
        // Lock order is writer then reader. Nothing else holds both.
        let writer = lock(&self.writer).take();
        let reader = lock(&self.reader).take();
        let released = writer.is_some() || reader.is_some();
        drop(writer);
        drop(reader);
        released
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.writer).is_none() && lock(&self.reader).is_none()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
