use crate::config::{SerialFraming, SourceConfig};
use crate::derived_fields::{self, VirtualField};
use crate::telegram::TelegramHandoff;
use anyhow::Context;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Meters send one telegram per second; replay at the same pace.
const SIMULATED_TELEGRAM_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on how long a device read blocks before the stop token is
/// checked again.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens the P1 device, or the recorded telegram file in simulation mode.
pub fn open_input(config: &SourceConfig) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let path = config.input_path();
    if config.is_simulation() {
        let file = File::open(path)
            .with_context(|| format!("Cannot open simulator file {}", path.display()))?;
        info!(path = %path.display(), "Replaying recorded telegrams");
        return Ok(Box::new(BufReader::new(file)));
    }

    let (data_bits, parity) = match config.framing {
        SerialFraming::EightNoneOne => (DataBits::Eight, Parity::None),
        SerialFraming::SevenEvenOne => (DataBits::Seven, Parity::Even),
    };
    let port = serialport::new(path.to_string_lossy(), config.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("Cannot open P1 device {}", path.display()))?;
    info!(
        path = %path.display(),
        baud_rate = config.baud_rate,
        framing = ?config.framing,
        "Opened P1 device"
    );
    Ok(Box::new(BufReader::new(port)))
}

/// Reads telegrams line by line and hands each complete one to the pipeline.
///
/// Runs on its own OS thread because reads from the device block.
pub struct TelegramReader<R> {
    input: R,
    handoff: Arc<TelegramHandoff>,
    stop: CancellationToken,
    simulation: bool,
    telegram_interval: Duration,
    virtual_fields: &'static [VirtualField],
    counter: u64,
}

impl<R: BufRead + Send + 'static> TelegramReader<R> {
    pub fn new(
        input: R,
        handoff: Arc<TelegramHandoff>,
        stop: CancellationToken,
        simulation: bool,
    ) -> Self {
        Self {
            input,
            handoff,
            stop,
            simulation,
            telegram_interval: if simulation {
                SIMULATED_TELEGRAM_INTERVAL
            } else {
                Duration::ZERO
            },
            virtual_fields: derived_fields::TARIFF_TOTALS,
            counter: 0,
        }
    }

    pub fn with_telegram_interval(mut self, interval: Duration) -> Self {
        self.telegram_interval = interval;
        self
    }

    /// Spawns the reader on a dedicated thread. When the reader stops, for
    /// whatever reason, it cancels the stop token so the rest of the process
    /// shuts down too.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("telegram-reader".to_string())
            .spawn(move || {
                let mut reader = self;
                if let Err(e) = reader.run() {
                    error!(error = %e, "P1 input failed");
                }
                reader.stop.cancel();
                info!("Telegram reader exiting");
            })
    }

    /// Capture loop. Returns when the input ends or the stop token fires.
    pub fn run(&mut self) -> io::Result<()> {
        info!("Starting telegram reader");

        while !self.stop.is_cancelled() {
            if !self.handoff.wait_until_released(&self.stop) {
                break;
            }

            let more = self.capture_telegram()?;
            if !more {
                debug!("End of P1 input");
                break;
            }

            if !self.telegram_interval.is_zero() {
                std::thread::sleep(self.telegram_interval);
            }
        }
        Ok(())
    }

    /// Captures one telegram into the handoff buffer and signals it.
    /// Returns `false` when the input has ended.
    fn capture_telegram(&mut self) -> io::Result<bool> {
        self.counter += 1;
        self.handoff.push_line(self.counter.to_string());

        let mut more = true;
        let mut nrof_lines = 0usize;
        loop {
            if self.stop.is_cancelled() {
                more = false;
                break;
            }
            let Some(line) = self.read_line()? else {
                more = false;
                break;
            };
            // Checksum line closes the telegram
            if line.starts_with('!') {
                break;
            }
            if self.simulation && line.starts_with("EOF") {
                more = false;
                break;
            }
            self.handoff.push_line(line);
            nrof_lines += 1;
        }

        let virtual_lines =
            derived_fields::synthesize(&self.handoff.captured_lines(), self.virtual_fields);
        self.handoff.extend_lines(virtual_lines);
        self.handoff.signal_complete();
        debug!(sequence = self.counter, lines = nrof_lines, "Telegram captured");

        Ok(more)
    }

    /// Reads one line. A read timeout only means the meter is quiet: bytes
    /// read so far are kept and reading resumes unless the stop token fired.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        loop {
            match self.input.read_until(b'\n', &mut raw) {
                Ok(_) => break,
                Err(e) if is_timeout(&e) => {
                    if self.stop.is_cancelled() {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&raw).trim_end().to_string()))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Cursor, Read};

    const RECORDING: &str = "/ISK5\\2M550T-1012\r\n\
        \r\n\
        1-3:0.2.8(50)\r\n\
        1-0:1.8.1(016230.132*kWh)\r\n\
        1-0:1.8.2(007449.542*kWh)\r\n\
        1-0:32.7.0(230.0*V)\r\n\
        !E8A3\r\n\
        /ISK5\\2M550T-1012\r\n\
        1-0:32.7.0(231.0*V)\r\n\
        !1F2B\r\n\
        EOF\r\n";

    fn reader(
        input: &str,
        simulation: bool,
    ) -> (TelegramReader<Cursor<Vec<u8>>>, Arc<TelegramHandoff>) {
        let handoff = Arc::new(TelegramHandoff::new());
        let reader = TelegramReader::new(
            Cursor::new(input.as_bytes().to_vec()),
            handoff.clone(),
            CancellationToken::new(),
            simulation,
        )
        .with_telegram_interval(Duration::ZERO);
        (reader, handoff)
    }

    #[test]
    fn test_capture_frames_one_telegram() {
        let (mut reader, handoff) = reader(RECORDING, true);
        assert!(reader.capture_telegram().unwrap());

        let telegram = handoff.take_snapshot().unwrap();
        assert_eq!(telegram.sequence, 1);
        assert_eq!(
            telegram.lines,
            vec![
                "/ISK5\\2M550T-1012",
                "",
                "1-3:0.2.8(50)",
                "1-0:1.8.1(016230.132*kWh)",
                "1-0:1.8.2(007449.542*kWh)",
                "1-0:32.7.0(230.0*V)",
                "1-0:1.8.3(023679.674*kWh)",
            ]
        );
    }

    #[test]
    fn test_eof_marker_ends_simulation() {
        let (mut reader, handoff) = reader(RECORDING, true);
        assert!(reader.capture_telegram().unwrap());
        handoff.take_snapshot().unwrap();

        assert!(reader.capture_telegram().unwrap());
        let second = handoff.take_snapshot().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.lines, vec!["/ISK5\\2M550T-1012", "1-0:32.7.0(231.0*V)"]);

        // Only the EOF marker is left
        assert!(!reader.capture_telegram().unwrap());
    }

    #[test]
    fn test_eof_marker_is_data_outside_simulation() {
        let (mut reader, handoff) = reader("EOF\r\n1-0:32.7.0(230.0*V)\r\n!0000\r\n", false);
        assert!(reader.capture_telegram().unwrap());
        let telegram = handoff.take_snapshot().unwrap();
        assert_eq!(telegram.lines, vec!["EOF", "1-0:32.7.0(230.0*V)"]);
    }

    #[test]
    fn test_end_of_input_hands_off_partial_telegram() {
        let (mut reader, handoff) = reader("1-0:32.7.0(230.0*V)\n", false);
        assert!(!reader.capture_telegram().unwrap());
        let telegram = handoff.take_snapshot().unwrap();
        assert_eq!(telegram.lines, vec!["1-0:32.7.0(230.0*V)"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let handoff = Arc::new(TelegramHandoff::new());
        let mut reader = TelegramReader::new(
            Cursor::new(b"1-0:32.7.0(230.0*V)\xff\n!\n".to_vec()),
            handoff.clone(),
            CancellationToken::new(),
            false,
        );
        assert!(reader.capture_telegram().unwrap());
        let telegram = handoff.take_snapshot().unwrap();
        assert_eq!(telegram.lines, vec!["1-0:32.7.0(230.0*V)\u{fffd}"]);
    }

    #[test]
    fn test_run_stops_and_cancels_at_end_of_input() {
        let (reader, handoff) = reader(RECORDING, true);
        let stop = reader.stop.clone();

        // Pipeline stand-in: keep draining the buffer
        let drain = handoff.clone();
        let drain_stop = stop.clone();
        let collector = std::thread::spawn(move || {
            let mut sequences = Vec::new();
            loop {
                if let Some(t) = drain.take_snapshot() {
                    sequences.push(t.sequence);
                } else if drain_stop.is_cancelled() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            sequences
        });

        reader.spawn().unwrap().join().unwrap();
        assert!(stop.is_cancelled());
        let sequences = collector.join().unwrap();
        assert_eq!(&sequences[..2], &[1, 2]);
    }

    #[test]
    fn test_open_missing_input_fails() {
        let config = SourceConfig {
            device: "/nonexistent/ttyUSB9".into(),
            baud_rate: 115_200,
            framing: SerialFraming::EightNoneOne,
            simulator_file: None,
        };
        assert!(open_input(&config).is_err());

        let config = SourceConfig {
            simulator_file: Some("/nonexistent/dsmr.raw".into()),
            ..config
        };
        assert!(open_input(&config).is_err());
    }

    /// Input that fails with a read timeout before each chunk, like a quiet
    /// serial port.
    struct QuietPort {
        chunks: VecDeque<&'static [u8]>,
        timed_out: bool,
    }

    impl QuietPort {
        fn new(chunks: &[&'static [u8]]) -> BufReader<Self> {
            BufReader::new(Self {
                chunks: chunks.iter().copied().collect(),
                timed_out: false,
            })
        }
    }

    impl Read for QuietPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            self.timed_out = false;
            let Some(chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_read_timeouts_keep_partial_lines() {
        let handoff = Arc::new(TelegramHandoff::new());
        let input = QuietPort::new(&[b"1-0:32.7", b".0(230.0*V)\r\n", b"!E8A3\r\n"]);
        let stop = CancellationToken::new();
        let mut reader = TelegramReader::new(input, handoff.clone(), stop, false);

        assert!(reader.capture_telegram().unwrap());
        let telegram = handoff.take_snapshot().unwrap();
        assert_eq!(telegram.lines, vec!["1-0:32.7.0(230.0*V)"]);
    }

    #[test]
    fn test_read_timeout_observes_stop() {
        let handoff = Arc::new(TelegramHandoff::new());
        let stop = CancellationToken::new();
        let input = QuietPort::new(&[b"1-0:32.7.0(230.0*V)\r\n"]);
        let mut reader = TelegramReader::new(input, handoff, stop.clone(), false);

        stop.cancel();
        assert_eq!(reader.read_line().unwrap(), None);
    }
}
