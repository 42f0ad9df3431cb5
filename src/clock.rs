use time::{OffsetDateTime, UtcOffset};

/// Clock produces local wall-clock times for log entries and file names.
///
/// The local offset must be looked up before any other thread exists: on
/// Unix the `time` crate refuses to read it from a multithreaded process. The
/// binary therefore builds its Clock first thing in main and hands copies to
/// everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    pub fn local() -> Clock {
        let offset = match UtcOffset::current_local_offset() {
            Ok(offset) => offset,
            Err(e) => {
                log::warn!("unable to determine local time offset ({e}), timestamps will be UTC");
                UtcOffset::UTC
            }
        };
        Clock { offset }
    }

    pub fn with_offset(offset: UtcOffset) -> Clock {
        Clock { offset }
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Formats `date_time` as `YYYY-MM-DD HH:MM:SS.mmm` in its own offset.
pub fn format_millis(date_time: OffsetDateTime) -> Result<String, time::error::Format> {
    let format = time::macros::format_description!(
        version = 2,
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    date_time.format(format)
}

/// Formats the date part of `date_time` as `YYYYMMDD`, as used in log file names.
pub fn format_compact_date(date_time: OffsetDateTime) -> Result<String, time::error::Format> {
    let format = time::macros::format_description!(version = 2, "[year][month][day]");
    date_time.format(format)
}
