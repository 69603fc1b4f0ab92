//! In-memory serial plumbing for ESP302 protocol tests.
//!
//! - `MockSerialPort` / `MockDeviceHarness`: a pair of unbounded channels
//!   posing as a serial line. The port goes to the driver, the harness stays
//!   in the test.
//! - `SimulatedController`: a minimal ESP302 running on a harness in its own
//!   task. It records every command line and answers queries from a small
//!   state model that tests can tweak.

#![allow(dead_code)] // Not every test file uses every helper

use scope_driver_newport::{Esp302Stage, StageConfig};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

// =============================================================================
// Mock serial line
// =============================================================================

/// Driver-facing end of the mock line.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test-facing end of the mock line.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

pub fn mock_port() -> (MockSerialPort, MockDeviceHarness) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (reads_tx, reads_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx,
        reads_rx,
        read_buffer: VecDeque::new(),
    };
    let harness = MockDeviceHarness {
        writes_rx,
        reads_tx,
        write_buffer: Vec::new(),
    };
    (port, harness)
}

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = buf.remaining().min(self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // Harness gone: end of file
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    pub fn send_response(&self, data: &[u8]) {
        self.reads_tx
            .send(data.to_vec())
            .expect("client port disconnected");
    }

    /// Wait up to two seconds for exactly `expected` to be written.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match tokio::time::timeout(Duration::from_secs(2), self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("client port closed while expecting a write"),
                Err(_) => panic!(
                    "timeout waiting for `{}`, got `{}`",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer)
                ),
            }
        }

        let actual: Vec<u8> = self.write_buffer.drain(..expected.len()).collect();
        assert_eq!(
            actual,
            expected,
            "expected `{}`, got `{}`",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&actual)
        );
    }

    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        self.send_response(response);
    }

    /// Next CR LF terminated command, without its terminator.
    ///
    /// `None` once the driver side has been dropped.
    pub async fn next_command(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.write_buffer.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.write_buffer.drain(..end + 2).collect();
                return Some(String::from_utf8_lossy(&line[..end]).into_owned());
            }
            let chunk = self.writes_rx.recv().await?;
            self.write_buffer.extend_from_slice(&chunk);
        }
    }
}

// =============================================================================
// Simulated ESP302
// =============================================================================

/// Controller state visible to tests.
#[derive(Debug)]
pub struct ControllerState {
    /// Every command line received, in order.
    pub commands: Vec<String>,
    pub position_mm: f64,
    pub velocity: f64,
    /// `TS` polls that answer busy after each `OR`.
    pub busy_polls_after_home: u32,
    pub busy_remaining: u32,
    /// Codes answered to successive `TE` queries; `@` once exhausted.
    pub error_codes: VecDeque<char>,
    /// Answer every `TS` with busy.
    pub never_ready: bool,
    /// Answer `PA?` with this text instead of the position.
    pub position_reply: Option<String>,
    /// Record commands but never answer.
    pub silent: bool,
    /// Drop the line after the next command.
    pub hang_up: bool,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            position_mm: 0.0,
            velocity: 5.0,
            busy_polls_after_home: 2,
            busy_remaining: 0,
            error_codes: VecDeque::new(),
            never_ready: false,
            position_reply: None,
            silent: false,
            hang_up: false,
        }
    }
}

#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<ControllerState>>,
}

impl SimulatedController {
    /// Run the controller on `harness` until the driver drops its port.
    pub fn spawn(mut harness: MockDeviceHarness, state: ControllerState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let shared = state.clone();

        tokio::spawn(async move {
            while let Some(line) = harness.next_command().await {
                let (reply, hang_up) = {
                    let mut state = shared.lock().unwrap();
                    state.commands.push(line.clone());
                    let reply = respond(&mut state, &line);
                    (if state.silent { None } else { reply }, state.hang_up)
                };
                if hang_up {
                    break;
                }
                if let Some(reply) = reply {
                    harness.send_response(format!("{}\r\n", reply).as_bytes());
                }
            }
        });

        Self { state }
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Number of recorded commands whose mnemonic part starts with `mnemonic`.
    pub fn count(&self, mnemonic: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.trim_start_matches(|ch: char| ch.is_ascii_digit()).starts_with(mnemonic))
            .count()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

fn respond(state: &mut ControllerState, line: &str) -> Option<String> {
    let address_len = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let (address, rest) = line.split_at(address_len);
    if rest.len() < 2 {
        return None;
    }
    let (mnemonic, argument) = rest.split_at(2);

    match (mnemonic, argument) {
        ("PA", "?") => Some(
            state
                .position_reply
                .clone()
                .unwrap_or_else(|| format!("{:.6}", state.position_mm)),
        ),
        ("PA", value) => {
            state.position_mm = value.parse().ok()?;
            None
        }
        ("PR", value) => {
            state.position_mm += value.parse::<f64>().ok()?;
            None
        }
        ("OR", _) => {
            state.position_mm = 0.0;
            state.busy_remaining = state.busy_polls_after_home;
            None
        }
        ("TS", _) => {
            let busy = state.never_ready || state.busy_remaining > 0;
            state.busy_remaining = state.busy_remaining.saturating_sub(1);
            // 'D' has bit 2 set, '@' does not
            Some(if busy { "D" } else { "@" }.to_string())
        }
        ("TE", _) => {
            let code = state.error_codes.pop_front().unwrap_or('@');
            Some(format!("{}TE{}", address, code))
        }
        ("VA", "?") => Some(format!("{:.6}", state.velocity)),
        ("VA", value) => {
            state.velocity = value.parse().ok()?;
            None
        }
        _ => None,
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Fast-polling configuration for tests.
pub fn test_config() -> StageConfig {
    StageConfig {
        port: "mock".into(),
        poll_interval_ms: 1,
        reply_timeout_ms: 500,
        ready_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// Stage wired to a simulated controller.
pub fn simulated_stage(
    config: StageConfig,
    state: ControllerState,
) -> (Esp302Stage, SimulatedController) {
    let (port, harness) = mock_port();
    let controller = SimulatedController::spawn(harness, state);
    let stage = Esp302Stage::with_port(Box::new(port), config).unwrap();
    (stage, controller)
}

/// Poll `condition` every millisecond for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5 s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
