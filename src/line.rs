use std::sync::Mutex;

pub const CARRIAGE_RETURN: char = '\r';

/// LineAccumulator collects characters from both directions of the link until
/// a carriage return completes a line.
// Device output and operator input share one buffer, so the log mirrors what
// was on screen. The flip side: typing while the device is talking produces
// mixed lines.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    buffer: Mutex<String>,
}

impl LineAccumulator {
    pub fn new() -> LineAccumulator {
        LineAccumulator::default()
    }

    pub fn append(&self, c: char) {
        self.lock().push(c);
    }

    /// Returns everything accumulated so far (whitespace-trimmed, which also
    /// drops the terminating carriage return) and empties the buffer.
    pub fn snapshot_and_clear(&self) -> String {
        let mut buffer = self.lock();
        take_trimmed(&mut buffer)
    }

    /// Appends `c`, and if it completes a line, hands the line to `emit`
    /// before releasing the lock. Emitting under the lock means lines reach
    /// `emit` (usually the log sink) in exactly the order they were completed.
    pub fn append_and_flush<F: FnOnce(&str)>(&self, c: char, emit: F) {
        let mut buffer = self.lock();
        buffer.push(c);
        if c == CARRIAGE_RETURN {
            let line = take_trimmed(&mut buffer);
            emit(&line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        // A panic while holding the lock can only have happened between two
        // pushes, the buffer is still a valid string.
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn take_trimmed(buffer: &mut String) -> String {
    let line = buffer.trim().to_string();
    buffer.clear();
    line
}
