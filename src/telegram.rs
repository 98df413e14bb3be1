use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How often the reader re-checks whether the pipeline released the buffer.
const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A complete telegram as captured between two framing boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTelegram {
    pub sequence: u64,
    pub lines: Vec<String>,
}

impl RawTelegram {
    /// Splits the capture buffer into the sequence counter (first line) and
    /// the wire records that follow it.
    pub fn from_buffer(buffer: &[String]) -> Self {
        match buffer.split_first() {
            Some((first, rest)) => match first.trim().parse::<u64>() {
                Ok(sequence) => Self {
                    sequence,
                    lines: rest.to_vec(),
                },
                Err(_) => Self {
                    sequence: 0,
                    lines: buffer.to_vec(),
                },
            },
            None => Self {
                sequence: 0,
                lines: Vec::new(),
            },
        }
    }
}

/// Shared capture buffer plus the "telegram complete" flag between the line
/// reader and the pipeline.
///
/// The reader appends lines only while the flag is clear and raises it once a
/// telegram is complete. The pipeline copies the buffer, clears it and then
/// clears the flag, after which the reader may start filling it again.
#[derive(Debug, Default)]
pub struct TelegramHandoff {
    buffer: Mutex<Vec<String>>,
    ready: AtomicBool,
    notify: Notify,
}

impl TelegramHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock leaves a plain Vec behind; keep going.
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True while a finished telegram waits to be picked up.
    pub fn is_pending(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Reader side: append one line to the telegram being captured.
    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Reader side: lines captured so far for the current telegram.
    pub fn captured_lines(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Reader side: append lines produced from the captured ones.
    pub fn extend_lines(&self, lines: impl IntoIterator<Item = String>) {
        self.lock().extend(lines);
    }

    /// Reader side: the telegram is complete.
    pub fn signal_complete(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Reader side: block until the pipeline has taken the previous telegram.
    ///
    /// Returns `false` if `stop` fired while waiting.
    pub fn wait_until_released(&self, stop: &CancellationToken) -> bool {
        while self.is_pending() {
            if stop.is_cancelled() {
                return false;
            }
            std::thread::sleep(RELEASE_POLL_INTERVAL);
        }
        !stop.is_cancelled()
    }

    /// Pipeline side: copy out the finished telegram, clear the buffer and
    /// release the reader. `None` if no telegram is pending.
    pub fn take_snapshot(&self) -> Option<RawTelegram> {
        if !self.is_pending() {
            return None;
        }
        let snapshot = {
            let mut buffer = self.lock();
            let snapshot = RawTelegram::from_buffer(&buffer);
            buffer.clear();
            snapshot
        };
        self.ready.store(false, Ordering::Release);
        Some(snapshot)
    }

    /// Pipeline side: wait up to `timeout` for a telegram.
    pub async fn wait_for_telegram(&self, timeout: Duration) -> Option<RawTelegram> {
        if let Some(telegram) = self.take_snapshot() {
            return Some(telegram);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.take_snapshot()
    }
}
