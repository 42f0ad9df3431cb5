use std::thread;
use std::time::Duration;

use crate::channel::ChannelError;
use crate::decode::Utf8Decoder;
use crate::session::Shared;

/// Drains the device until shutdown, echoing every character and logging each
/// completed line.
// A read failure only ends this loop. I went back and forth on whether it
// should take the whole session down, but a flaky adapter that stops talking
// can still often be written to, and the operator is better placed to decide
// when to give up than we are.
pub fn run_reader(shared: &Shared, idle: Duration) -> Result<(), ChannelError> {
    let mut buf = [0u8; 256];
    let mut decoder = Utf8Decoder::new();
    while !shared.shutdown.is_requested() {
        let n = match shared.channel.read_available(&mut buf) {
            Ok(n) => n,
            // Expected: the port is closed under us during teardown.
            Err(_) if shared.shutdown.is_requested() => break,
            Err(e) => {
                log::error!("reading from {} stopped: {e}", shared.channel.port_name());
                return Err(e);
            }
        };
        if n == 0 {
            thread::sleep(idle);
            continue;
        }
        for c in decoder.decode(&buf[..n]).chars() {
            shared.console.echo_char(c);
            shared
                .line
                .append_and_flush(c, |line| shared.sink.record_or_warn(line));
        }
    }
    Ok(())
}

pub fn start_reader_thread(
    shared: Shared,
    idle: Duration,
) -> thread::JoinHandle<Result<(), ChannelError>> {
    thread::spawn(move || run_reader(&shared, idle))
}
