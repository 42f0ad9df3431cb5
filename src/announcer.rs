use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::channel::ChannelError;
use crate::clock;
use crate::line::CARRIAGE_RETURN;
use crate::session::Shared;

/// worldtimeapi.org answers with the time in the caller's timezone (by IP).
pub const DEFAULT_TIME_URL: &str = "http://worldtimeapi.org/api/ip";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("time service request failed: {0}")]
    Request(#[from] ureq::Error),
    #[error("time service returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("time service returned invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: time::error::Parse,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unable to format announced time: {0}")]
    Format(#[from] time::error::Format),
    #[error("unable to send announcement: {0}")]
    Channel(#[from] ChannelError),
}

/// A source of the current time. Implementations block for the duration of
/// the lookup; the announcer measures how long that takes.
pub trait TimeSource: Send {
    fn fetch(&self) -> Result<OffsetDateTime, FetchError>;
}

/// Fetches the time from a JSON endpoint with an RFC 3339 `datetime` field.
pub struct HttpTimeSource {
    agent: ureq::Agent,
    url: String,
}

impl HttpTimeSource {
    /// `timeout` caps the whole request, and should exceed the latency budget.
    pub fn new(url: &str, timeout: Duration) -> HttpTimeSource {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        HttpTimeSource {
            agent: ureq::Agent::new_with_config(config),
            url: url.to_string(),
        }
    }
}

impl TimeSource for HttpTimeSource {
    fn fetch(&self) -> Result<OffsetDateTime, FetchError> {
        let mut response = self.agent.get(&self.url).call()?;
        let body = response.body_mut().read_to_string()?;
        parse_time_response(&body)
    }
}

#[derive(Deserialize)]
struct TimeResponse {
    datetime: String,
}

pub fn parse_time_response(body: &str) -> Result<OffsetDateTime, FetchError> {
    let response: TimeResponse = serde_json::from_str(body)?;
    OffsetDateTime::parse(&response.datetime, &Rfc3339).map_err(|source| FetchError::Timestamp {
        value: response.datetime.clone(),
        source,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncerSettings {
    /// Time between the start of one announcement and the next fetch.
    pub interval: Duration,
    /// How often the interval wait checks for shutdown.
    pub poll: Duration,
    /// Fetches taking this long or longer are discarded.
    pub budget: Duration,
}

impl Default for AnnouncerSettings {
    fn default() -> AnnouncerSettings {
        AnnouncerSettings {
            interval: Duration::from_secs(600),
            poll: Duration::from_secs(1),
            budget: Duration::from_millis(500),
        }
    }
}

/// A time is only worth announcing if it arrived strictly within budget: a
/// fetch that took exactly the budget is already too stale.
pub fn within_budget(latency: Duration, budget: Duration) -> bool {
    latency < budget
}

#[derive(Debug, PartialEq, Eq)]
pub enum Announcement {
    /// The time was sent to the device and logged.
    Sent(String),
    /// The fetch was too slow; nothing was sent.
    Discarded { latency: Duration },
}

/// Performs one fetch-and-announce cycle. The announcement is a complete line,
/// so it goes straight to the log sink rather than through the line
/// accumulator.
pub fn announce_once(
    shared: &Shared,
    source: &dyn TimeSource,
    budget: Duration,
) -> Result<Announcement, AnnounceError> {
    let started = Instant::now();
    let fetched = source.fetch();
    let latency = started.elapsed();
    let now = fetched?;
    if !within_budget(latency, budget) {
        return Ok(Announcement::Discarded { latency });
    }

    let text = clock::format_millis(now)?;
    let mut wire = text.clone();
    wire.push(CARRIAGE_RETURN);
    shared.channel.write(wire.as_bytes())?;
    shared.sink.record_or_warn(&text);
    Ok(Announcement::Sent(text))
}

/// Announces the time every `settings.interval` until shutdown. Every failure
/// is soft: it is reported and the next cycle proceeds as usual.
pub fn run_announcer(shared: &Shared, source: &dyn TimeSource, settings: &AnnouncerSettings) {
    while !shared.shutdown.is_requested() {
        match announce_once(shared, source, settings.budget) {
            Ok(Announcement::Sent(text)) => log::debug!("announced time {text}"),
            Ok(Announcement::Discarded { latency }) => log::warn!(
                "discarded time fetched in {}ms (budget {}ms)",
                latency.as_millis(),
                settings.budget.as_millis()
            ),
            Err(_) if shared.shutdown.is_requested() => break,
            Err(e) => log::error!("time announcement failed: {e}"),
        }
        if shared.shutdown.wait(settings.interval, settings.poll) {
            break;
        }
    }
}

pub fn start_announcer_thread(
    shared: Shared,
    source: Box<dyn TimeSource>,
    settings: AnnouncerSettings,
) -> thread::JoinHandle<()> {
    thread::spawn(move || run_announcer(&shared, source.as_ref(), &settings))
}


#[cfg(test)]
mod tests {
    use super::testing::FakeTimeSource;
    use super::*;
    use crate::session::testing::{wait_until, Fixture};
    use std::sync::atomic::Ordering;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:34:56.789 +09:00);

    #[test]
    fn test_within_budget() {
        struct TestCase<'a> {
            name: &'a str,
            input: Duration,
            expected_result: bool,
        }
        let budget = Duration::from_millis(500);
        let tests = [
            TestCase {
                name: "Instant",
                input: Duration::ZERO,
                expected_result: true,
            },
            TestCase {
                name: "JustUnder",
                input: Duration::from_micros(499_999),
                expected_result: true,
            },
            TestCase {
                name: "ExactlyAtBudget",
                input: budget,
                expected_result: false,
            },
            TestCase {
                name: "JustOver",
                input: Duration::from_micros(500_001),
                expected_result: false,
            },
            TestCase {
                name: "WaySlow",
                input: Duration::from_millis(800),
                expected_result: false,
            },
        ];
        for case in tests {
            let got = within_budget(case.input, budget);
            assert_eq!(
                got, case.expected_result,
                "{}: got={got:?}, want={:?}",
                case.name, case.expected_result
            );
        }
    }

    #[test]
    fn test_parse_time_response() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a str,
            expected_result: Option<OffsetDateTime>,
        }
        let tests = [
            TestCase {
                name: "WorldTimeApi",
                input: r#"{"abbreviation":"JST","datetime":"2024-05-01T12:34:56.789012+09:00","unixtime":1714534496}"#,
                expected_result: Some(datetime!(2024-05-01 12:34:56.789012 +09:00)),
            },
            TestCase {
                name: "Utc",
                input: r#"{"datetime":"2024-05-01T03:34:56Z"}"#,
                expected_result: Some(datetime!(2024-05-01 03:34:56 UTC)),
            },
            TestCase {
                name: "MissingField",
                input: r#"{"utc_datetime":"2024-05-01T03:34:56Z"}"#,
                expected_result: None,
            },
            TestCase {
                name: "NotIso",
                input: r#"{"datetime":"May 1st, noon"}"#,
                expected_result: None,
            },
            TestCase {
                name: "NoOffset",
                input: r#"{"datetime":"2024-05-01T12:34:56.789"}"#,
                expected_result: None,
            },
            TestCase {
                name: "NotJson",
                input: "<html>rate limited</html>",
                expected_result: None,
            },
        ];
        for case in tests {
            let got = parse_time_response(case.input).ok();
            assert_eq!(
                got, case.expected_result,
                "{}: got={got:?}, want={:?}",
                case.name, case.expected_result
            );
        }
    }

    #[test]
    fn test_announce_once_sends_and_logs() {
        let fixture = Fixture::new();
        let source = FakeTimeSource::new(NOW);

        let got = announce_once(&fixture.shared, &source, Duration::from_millis(500)).unwrap();
        assert_eq!(got, Announcement::Sent("2024-05-01 12:34:56.789".to_string()));
        assert_eq!(fixture.port.written(), b"2024-05-01 12:34:56.789\r");
        assert_eq!(fixture.log_texts(), vec!["2024-05-01 12:34:56.789"]);
        assert_eq!(
            fixture.shared.line.snapshot_and_clear(),
            "",
            "announcements bypass the line accumulator"
        );
    }

    #[test]
    fn test_slow_fetch_is_discarded() {
        let fixture = Fixture::new();
        let source = FakeTimeSource {
            delay: Duration::from_millis(800),
            ..FakeTimeSource::new(NOW)
        };

        let got = announce_once(&fixture.shared, &source, Duration::from_millis(500)).unwrap();
        assert!(
            matches!(got, Announcement::Discarded { latency } if latency >= Duration::from_millis(800)),
            "got {got:?}"
        );
        assert!(fixture.port.written().is_empty());
        assert_eq!(fixture.shared.sink.entries_written(), 0);
    }

    #[test]
    fn test_fetch_failure_sends_nothing() {
        let fixture = Fixture::new();
        let source = FakeTimeSource {
            failures: 1,
            ..FakeTimeSource::new(NOW)
        };
        assert!(matches!(
            announce_once(&fixture.shared, &source, Duration::from_millis(500)),
            Err(AnnounceError::Fetch(_))
        ));
        assert!(fixture.port.written().is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let fixture = Fixture::new();
        fixture.port.fail_writes();
        let source = FakeTimeSource::new(NOW);
        assert!(matches!(
            announce_once(&fixture.shared, &source, Duration::from_millis(500)),
            Err(AnnounceError::Channel(_))
        ));
        assert_eq!(fixture.shared.sink.entries_written(), 0);
    }

    #[test]
    fn test_loop_survives_failures_and_stops_on_shutdown() {
        let fixture = Fixture::new();
        let source = FakeTimeSource {
            failures: 2,
            ..FakeTimeSource::new(NOW)
        };
        let fetches = source.fetches.clone();
        let settings = AnnouncerSettings {
            interval: Duration::from_millis(10),
            poll: Duration::from_millis(2),
            budget: Duration::from_millis(500),
        };

        let announcer = start_announcer_thread(fixture.shared.clone(), Box::new(source), settings);
        wait_until("two announcements after two failures", || {
            fixture.shared.sink.entries_written() >= 2
        });
        fixture.shared.shutdown.request();
        announcer.join().unwrap();

        assert!(fetches.load(Ordering::SeqCst) >= 4);
        let written = String::from_utf8(fixture.port.written()).unwrap();
        assert!(written.starts_with("2024-05-01 12:34:56.789\r2024-05-01 12:34:56.789\r"));
    }

    #[test]
    fn test_shutdown_interrupts_interval_wait() {
        let fixture = Fixture::new();
        let settings = AnnouncerSettings {
            poll: Duration::from_millis(5),
            ..AnnouncerSettings::default()
        };
        let announcer = start_announcer_thread(
            fixture.shared.clone(),
            Box::new(FakeTimeSource::new(NOW)),
            settings,
        );
        wait_until("first announcement", || {
            fixture.shared.sink.entries_written() == 1
        });
        let requested = Instant::now();
        fixture.shared.shutdown.request();
        announcer.join().unwrap();
        assert!(requested.elapsed() < Duration::from_secs(5));
    }
}
