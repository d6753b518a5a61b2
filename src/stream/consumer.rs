//! Consumer side of the channel: one non-blocking poll per timer tick.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, Instant};

use super::channel::StreamChannel;
use super::status::StatusRecord;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default silence after which a stream is abandoned.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing new (or the content file could not be read this tick).
    Idle,
    /// Text appended since the previous delta.
    Delta(String),
    /// The producer finished. `tail` is any text not yet delivered.
    /// Both channel files have been removed.
    Completed { tail: String, status: StatusRecord },
    /// No content arrived for longer than the timeout.
    /// Both channel files have been removed.
    TimedOut { idle: Duration },
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollOutcome::Completed { .. } | PollOutcome::TimedOut { .. }
        )
    }
}

/// Tracks how much of the content file has been delivered.
///
/// The cursor only moves forward, so each byte is delivered once and in
/// file order. A delta never ends in the middle of a UTF-8 sequence; the
/// incomplete bytes are picked up by the next poll.
#[derive(Debug)]
pub struct StreamConsumer {
    channel: StreamChannel,
    cursor: u64,
    /// Content length at the last poll that saw the file grow.
    seen_len: u64,
    last_activity: Instant,
    timeout: Duration,
    finished: bool,
}

impl StreamConsumer {
    pub fn new(channel: StreamChannel, timeout: Duration) -> Self {
        Self::started_at(channel, timeout, Instant::now())
    }

    /// Consumer whose activity clock starts at `now`.
    pub fn started_at(channel: StreamChannel, timeout: Duration, now: Instant) -> Self {
        Self {
            channel,
            cursor: 0,
            seen_len: 0,
            last_activity: now,
            timeout,
            finished: false,
        }
    }

    pub fn poll(&mut self) -> PollOutcome {
        self.poll_at(Instant::now())
    }

    /// One tick at time `now`. Never blocks beyond reading the files.
    pub fn poll_at(&mut self, now: Instant) -> PollOutcome {
        if self.finished {
            return PollOutcome::Idle;
        }

        if self.channel.status_path.exists() {
            if let Some(outcome) = self.complete() {
                return outcome;
            }
            // Status file created but not written yet; try again next tick
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle > self.timeout {
            self.teardown();
            tracing::warn!(
                stream = %self.channel.content_path.display(),
                idle_ms = idle.as_millis() as u64,
                delivered = self.cursor,
                "stream timed out"
            );
            return PollOutcome::TimedOut { idle };
        }

        match read_from(&self.channel.content_path, self.cursor) {
            Ok(bytes) if !bytes.is_empty() => {
                // Held-back partial sequences are re-read every tick and must
                // not count as activity
                let len = self.cursor + bytes.len() as u64;
                if len > self.seen_len {
                    self.seen_len = len;
                    self.last_activity = now;
                }
                let complete = bytes.len() - incomplete_suffix_len(&bytes);
                if complete == 0 {
                    return PollOutcome::Idle;
                }
                self.cursor += complete as u64;
                PollOutcome::Delta(String::from_utf8_lossy(&bytes[..complete]).into_owned())
            }
            // No new bytes, missing file, or a read racing the writer
            _ => PollOutcome::Idle,
        }
    }

    fn complete(&mut self) -> Option<PollOutcome> {
        let raw = match std::fs::read(&self.channel.status_path) {
            Ok(raw) if !raw.iter().all(u8::is_ascii_whitespace) => raw,
            _ => return None,
        };

        let tail = match read_from(&self.channel.content_path, self.cursor) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                // Undelivered output is still in the file; retry next tick
                tracing::debug!(error = %e, "final stream read failed");
                return None;
            }
        };

        let status = serde_json::from_slice::<StatusRecord>(&raw).unwrap_or_else(|e| {
            StatusRecord::failure(format!("Invalid status file from worker: {e}"))
        });

        self.cursor += tail.len() as u64;
        let tail = String::from_utf8_lossy(&tail).into_owned();

        self.teardown();
        tracing::debug!(
            stream = %self.channel.content_path.display(),
            delivered = self.cursor,
            error = status.error_message().unwrap_or(""),
            "stream completed"
        );
        Some(PollOutcome::Completed { tail, status })
    }

    fn teardown(&mut self) {
        self.finished = true;
        if let Err(e) = self.channel.remove() {
            tracing::warn!(error = %e, "failed to remove stream files");
        }
    }

    /// Bytes delivered so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn channel(&self) -> &StreamChannel {
        &self.channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Bytes of `path` from `offset` to the current end.
fn read_from(path: &Path, offset: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len <= offset {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::with_capacity((len - offset) as usize);
    file.take(len - offset).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Length of a trailing UTF-8 sequence that is still missing bytes.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    fn setup() -> (tempfile::TempDir, StreamChannel, StreamConsumer, Instant) {
        let temp = tempfile::tempdir().unwrap();
        let channel = StreamChannel::allocate(temp.path());
        let t0 = Instant::now();
        let consumer = StreamConsumer::started_at(channel.clone(), DEFAULT_STREAM_TIMEOUT, t0);
        (temp, channel, consumer, t0)
    }

    #[test]
    fn test_idle_before_worker_creates_file() {
        let (_temp, _channel, mut consumer, t0) = setup();
        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);
        assert!(!consumer.is_finished());
    }

    #[test]
    fn test_deltas_only_contain_new_bytes() {
        let (_temp, channel, mut consumer, t0) = setup();

        append(&channel.content_path, b"Hello");
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta("Hello".into()));
        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);

        append(&channel.content_path, b", world");
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta(", world".into()));
        assert_eq!(consumer.cursor(), 12);
    }

    #[test]
    fn test_split_utf8_sequence_held_back() {
        let (_temp, channel, mut consumer, t0) = setup();
        let text = "café ✓";
        let bytes = text.as_bytes();
        // Cut inside the three-byte check mark
        let cut = bytes.len() - 1;

        append(&channel.content_path, &bytes[..cut]);
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta("café ".into()));

        append(&channel.content_path, &bytes[cut..]);
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta("✓".into()));
    }

    #[test]
    fn test_only_partial_sequence_is_idle() {
        let (_temp, channel, mut consumer, t0) = setup();
        append(&channel.content_path, &"é".as_bytes()[..1]);

        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);
        assert_eq!(consumer.cursor(), 0);
    }

    #[test]
    fn test_completion_flushes_tail_and_removes_files() {
        let (_temp, channel, mut consumer, t0) = setup();
        append(&channel.content_path, b"part one, ");
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta("part one, ".into()));

        append(&channel.content_path, b"part two");
        fs::write(
            &channel.status_path,
            r#"{"done": true, "error": null, "session_id": "s"}"#,
        )
        .unwrap();

        match consumer.poll_at(t0) {
            PollOutcome::Completed { tail, status } => {
                assert_eq!(tail, "part two");
                assert_eq!(status.session_id(), Some("s"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(!channel.content_path.exists());
        assert!(!channel.status_path.exists());
        assert!(consumer.is_finished());
        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);
    }

    #[test]
    fn test_completion_without_content_file() {
        let (_temp, channel, mut consumer, t0) = setup();
        fs::write(&channel.status_path, r#"{"done": true, "error": "No report text provided"}"#)
            .unwrap();

        match consumer.poll_at(t0) {
            PollOutcome::Completed { tail, status } => {
                assert!(tail.is_empty());
                assert_eq!(status.error_message(), Some("No report text provided"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_status_file_waits() {
        let (_temp, channel, mut consumer, t0) = setup();
        fs::write(&channel.status_path, "").unwrap();

        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);
        assert!(!consumer.is_finished());
    }

    #[test]
    fn test_corrupt_status_becomes_error() {
        let (_temp, channel, mut consumer, t0) = setup();
        fs::write(&channel.status_path, "{not json").unwrap();

        match consumer.poll_at(t0) {
            PollOutcome::Completed { status, .. } => {
                assert!(status
                    .error_message()
                    .unwrap()
                    .contains("Invalid status file"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_after_silence_removes_files() {
        let (_temp, channel, mut consumer, t0) = setup();
        append(&channel.content_path, b"started");
        assert!(matches!(consumer.poll_at(t0), PollOutcome::Delta(_)));

        let just_inside = t0 + DEFAULT_STREAM_TIMEOUT;
        assert_eq!(consumer.poll_at(just_inside), PollOutcome::Idle);

        let past = t0 + DEFAULT_STREAM_TIMEOUT + Duration::from_millis(100);
        match consumer.poll_at(past) {
            PollOutcome::TimedOut { idle } => assert!(idle > DEFAULT_STREAM_TIMEOUT),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!channel.content_path.exists());
        assert!(!channel.status_path.exists());
    }

    #[test]
    fn test_dangling_partial_sequence_still_times_out() {
        let (_temp, channel, mut consumer, t0) = setup();
        append(&channel.content_path, b"ok \xC3");

        let mut outcome = PollOutcome::Idle;
        for i in 0..=1300u32 {
            outcome = consumer.poll_at(t0 + Duration::from_millis(100) * i);
            if outcome.is_terminal() {
                break;
            }
        }

        assert!(matches!(outcome, PollOutcome::TimedOut { .. }), "got {outcome:?}");
        assert_eq!(consumer.cursor(), 3);
        assert!(!channel.content_path.exists());
    }

    #[test]
    fn test_new_content_resets_activity_clock() {
        let (_temp, channel, mut consumer, t0) = setup();
        let t1 = t0 + Duration::from_secs(100);
        append(&channel.content_path, b"a");
        assert!(matches!(consumer.poll_at(t1), PollOutcome::Delta(_)));

        // 200s after start but only 100s after the last content
        let t2 = t0 + Duration::from_secs(200);
        assert_eq!(consumer.poll_at(t2), PollOutcome::Idle);
    }

    #[test]
    fn test_non_utf8_status_becomes_error() {
        let (_temp, channel, mut consumer, t0) = setup();
        fs::write(&channel.status_path, b"\xff\xfe{\"done\": tr\xc3").unwrap();

        match consumer.poll_at(t0) {
            PollOutcome::Completed { status, .. } => {
                assert!(status
                    .error_message()
                    .unwrap()
                    .contains("Invalid status file"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_final_read_retries_instead_of_dropping_tail() {
        let (_temp, channel, mut consumer, t0) = setup();
        append(&channel.content_path, b"first ");
        assert_eq!(consumer.poll_at(t0), PollOutcome::Delta("first ".into()));

        // Content path briefly unreadable when the status lands
        fs::remove_file(&channel.content_path).unwrap();
        fs::create_dir(&channel.content_path).unwrap();
        fs::write(channel.content_path.join("entry-so-the-directory-has-a-size"), "").unwrap();
        fs::write(&channel.status_path, r#"{"done": true}"#).unwrap();

        assert_eq!(consumer.poll_at(t0), PollOutcome::Idle);
        assert!(!consumer.is_finished());
        assert!(channel.status_path.exists());

        fs::remove_dir_all(&channel.content_path).unwrap();
        fs::write(&channel.content_path, b"first second").unwrap();

        match consumer.poll_at(t0) {
            PollOutcome::Completed { tail, .. } => assert_eq!(tail, "second"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(consumer.cursor(), 12);
    }

    #[test]
    fn test_status_wins_over_timeout() {
        let (_temp, channel, mut consumer, t0) = setup();
        fs::write(&channel.status_path, r#"{"done": true}"#).unwrap();

        let late = t0 + Duration::from_secs(600);
        assert!(matches!(
            consumer.poll_at(late),
            PollOutcome::Completed { .. }
        ));
    }

    #[test]
    fn test_incomplete_suffix_len() {
        assert_eq!(incomplete_suffix_len(b"abc"), 0);
        assert_eq!(incomplete_suffix_len("é".as_bytes()), 0);
        assert_eq!(incomplete_suffix_len(&"é".as_bytes()[..1]), 1);
        assert_eq!(incomplete_suffix_len(&"✓".as_bytes()[..2]), 2);
        assert_eq!(incomplete_suffix_len(&"😀".as_bytes()[..3]), 3);
        assert_eq!(incomplete_suffix_len(b""), 0);
    }
}
