use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use crate::config::MirrorConfig;
use crate::source::capture::ScreenCapture;
use crate::source::FrameSource;
use crate::stream::{StreamLoop, StreamStats};

/// Single-client mirroring server.
/// - Accepts exactly one connection, then closes the listener
/// - No handshake: frames start flowing as soon as the client connects
/// - The stream ends when the client goes away or on ctrl-c
pub struct MirrorServer {
    listener: TcpListener,
    config: MirrorConfig,
}

impl MirrorServer {
    pub async fn bind(config: MirrorConfig) -> Result<Self> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the one client. Further connection attempts are refused.
    pub async fn accept_client(self) -> Result<(TcpStream, SocketAddr, MirrorConfig)> {
        let (socket, peer) = self
            .listener
            .accept()
            .await
            .context("Failed to accept client")?;
        socket.set_nodelay(true)?;
        tracing::info!(%peer, "client connected");
        Ok((socket, peer, self.config))
    }

    /// Accept a client, start screen capture, and stream until done.
    pub async fn run(self) -> Result<StreamStats> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "waiting for client");

        let (socket, _peer, config) = self.accept_client().await?;

        let mut capture = ScreenCapture::start(config.capture.clone())?;
        let source = capture
            .take_source()
            .context("capture source already taken")?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, stopping");
                running_clone.store(false, Ordering::Relaxed);
            }
        });

        let stats = stream_to_client(socket, source, &config, running).await;
        capture.stop();
        stats
    }
}

/// Stream frames from `source` to an accepted client.
///
/// Clearing `running` stops the stream at the next cycle or poll tick.
pub async fn stream_to_client<S: FrameSource>(
    socket: TcpStream,
    source: S,
    config: &MirrorConfig,
    running: Arc<AtomicBool>,
) -> Result<StreamStats> {
    let mut stream_loop = StreamLoop::new(source, socket, config).with_cancel(running);
    let stats = stream_loop.run().await.context("stream ended with error")?;
    tracing::info!(
        frames_sent = stats.frames_sent,
        frames_skipped = stats.frames_skipped,
        timeouts = stats.timeouts,
        bytes_sent = stats.bytes_sent,
        "stream finished"
    );
    Ok(stats)
}

pub async fn start_server(config: MirrorConfig) -> Result<()> {
    let server = MirrorServer::bind(config).await?;
    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::source::{CapturedFrame, FrameHandoff};
    use tokio::io::AsyncReadExt;

    fn local_config() -> MirrorConfig {
        MirrorConfig {
            bind: "127.0.0.1:0".into(),
            poll_interval_ms: 1,
            max_poll_attempts: 5,
            ..Default::default()
        }
    }

    fn gray_frame() -> CapturedFrame {
        CapturedFrame {
            width: 4,
            height: 4,
            row_stride: 4 * 2,
            format: PixelFormat::Rgb565,
            data: vec![0x10; 4 * 4 * 2],
        }
    }

    #[tokio::test]
    async fn test_single_client_receives_frame() {
        let server = MirrorServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (accepted, client) = tokio::join!(server.accept_client(), TcpStream::connect(addr));
        let (socket, _peer, config) = accepted.unwrap();
        let mut client = client.unwrap();

        // listener is gone once the first client is accepted
        assert!(TcpStream::connect(addr).await.is_err());

        let (producer, consumer) = FrameHandoff::channel();
        producer.publish(gray_frame());

        let running = Arc::new(AtomicBool::new(true));
        let server_task = tokio::spawn({
            let running = running.clone();
            async move { stream_to_client(socket, consumer, &config, running).await }
        });

        let mut prefix = [0u8; 4];
        client.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_le_bytes(prefix) as usize;
        let mut jpeg = vec![0u8; len];
        client.read_exact(&mut jpeg).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[len - 2..], &[0xFF, 0xD9]);

        running.store(false, Ordering::Relaxed);
        let stats = server_task.await.unwrap().unwrap();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_sent, 4 + len as u64);
        drop(producer);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = MirrorConfig {
            bind: "nowhere".into(),
            ..Default::default()
        };
        assert!(MirrorServer::bind(config).await.is_err());
    }
}
