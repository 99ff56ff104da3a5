//! The capture → convert → encode → send loop.
//!
//! Each cycle polls the frame source with a bounded wait, turns the frame
//! into JPEG, and writes it to the client as a 4-byte little-endian length
//! followed by the JPEG bytes. Everything happens in order on one task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::MirrorConfig;
use crate::encode::JpegEncoder;
use crate::error::{MirrorError, Result};
use crate::frame::convert::to_canonical;
use crate::frame::{EncodedFrame, RawFrame};
use crate::source::FrameSource;

/// Result of one frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Sent { bytes: u64 },
    /// No frame within the poll budget; nothing was sent.
    TimedOut,
    /// Frame could not be converted or encoded and was dropped.
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
}

enum PollResult {
    Ready,
    Cancelled,
}

/// Convert (if needed) and encode one raw frame.
pub fn process_frame(encoder: &JpegEncoder, raw: &RawFrame<'_>) -> Result<EncodedFrame> {
    let canonical = to_canonical(raw)?;
    tracing::trace!(
        format = ?raw.format,
        passthrough = canonical.is_borrowed(),
        "frame normalized"
    );
    let encoded = encoder.encode_frame(&canonical)?;
    // reject oversize payloads before anything reaches the socket
    encoded.length_prefix()?;
    Ok(encoded)
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(transport: &mut W, frame: &EncodedFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let prefix = frame.length_prefix()?;
    transport.write_all(&prefix).await?;
    transport.write_all(&frame.data).await?;
    transport.flush().await?;
    Ok(())
}

pub struct StreamLoop<S, W> {
    source: S,
    transport: W,
    encoder: JpegEncoder,
    poll_interval: Duration,
    max_poll_attempts: u32,
    abort_on_encode_error: bool,
    running: Arc<AtomicBool>,
    stats: StreamStats,
}

impl<S, W> StreamLoop<S, W>
where
    S: FrameSource,
    W: AsyncWrite + Unpin,
{
    pub fn new(source: S, transport: W, config: &MirrorConfig) -> Self {
        Self {
            source,
            transport,
            encoder: JpegEncoder::new(config.quality),
            poll_interval: config.poll_interval(),
            max_poll_attempts: config.max_poll_attempts.max(1),
            abort_on_encode_error: config.abort_on_encode_error(),
            running: Arc::new(AtomicBool::new(true)),
            stats: StreamStats::default(),
        }
    }

    /// Share an externally owned running flag.
    pub fn with_cancel(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (S, W) {
        (self.source, self.transport)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stream until the client goes away or the loop is cancelled.
    ///
    /// A dead client ends the stream normally. Capture failures, and encode
    /// failures when `on_encode_error = "abort"`, are returned as errors.
    pub async fn run(&mut self) -> Result<StreamStats> {
        tracing::info!(
            quality = self.encoder.quality(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_poll_attempts = self.max_poll_attempts,
            "streaming"
        );
        loop {
            match self.run_cycle().await {
                Ok(CycleOutcome::Cancelled) => {
                    tracing::info!("stream cancelled");
                    break;
                }
                Ok(_) => {}
                Err(MirrorError::Transport(e)) => {
                    tracing::info!(error = %e, "client disconnected");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.stats())
    }

    /// Run one frame cycle: poll, fetch, convert, encode, send, release.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if !self.is_running() {
            return Ok(CycleOutcome::Cancelled);
        }

        let wait_start = Instant::now();
        match self.poll().await {
            Ok(PollResult::Ready) => {}
            Ok(PollResult::Cancelled) => return Ok(CycleOutcome::Cancelled),
            Err(MirrorError::CaptureTimeout { attempts }) => {
                self.stats.timeouts += 1;
                tracing::debug!(attempts, "wait image overtime");
                return Ok(CycleOutcome::TimedOut);
            }
            Err(e) => return Err(e),
        }
        let wait = wait_start.elapsed();

        let fetch_start = Instant::now();
        let encoder = self.encoder;
        let (encoded, fetch, encode) = match self.source.fetch_frame() {
            Some(raw) => {
                let fetch = fetch_start.elapsed();
                let encode_start = Instant::now();
                let encoded = process_frame(&encoder, &raw);
                (encoded, fetch, encode_start.elapsed())
            }
            None => (
                Err(MirrorError::InvalidInput(
                    "source reported ready but returned no frame".into(),
                )),
                fetch_start.elapsed(),
                Duration::ZERO,
            ),
        };

        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                self.source.reset_flag();
                return self.skip_or_abort(e);
            }
        };

        let send_start = Instant::now();
        let sent = write_frame(&mut self.transport, &encoded).await;
        self.source.reset_flag();
        if let Err(e) = sent {
            return self.skip_or_abort(e);
        }

        let bytes = encoded.size();
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += bytes + 4;
        tracing::debug!(
            bytes,
            wait_ms = wait.as_millis() as u64,
            fetch_ms = fetch.as_millis() as u64,
            encode_ms = encode.as_millis() as u64,
            send_ms = send_start.elapsed().as_millis() as u64,
            "frame sent"
        );
        Ok(CycleOutcome::Sent { bytes })
    }

    fn skip_or_abort(&mut self, e: MirrorError) -> Result<CycleOutcome> {
        if e.is_terminal(self.abort_on_encode_error) {
            return Err(e);
        }
        self.stats.frames_skipped += 1;
        tracing::warn!(error = %e, "skipping frame");
        Ok(CycleOutcome::Skipped)
    }

    async fn poll(&mut self) -> Result<PollResult> {
        let mut attempts = 0;
        loop {
            if !self.is_running() {
                return Ok(PollResult::Cancelled);
            }
            if self.source.is_frame_ready() {
                return Ok(PollResult::Ready);
            }
            if !self.source.is_alive() {
                return Err(MirrorError::Capture("frame source closed".into()));
            }
            attempts += 1;
            if attempts >= self.max_poll_attempts {
                return Err(MirrorError::CaptureTimeout { attempts });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
