//! Error types for the frame pipeline.

/// Errors produced while capturing, converting, encoding, or sending a frame.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Source buffer missing or too short, destination too small, or zero pixel count.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The JPEG engine rejected the frame or failed mid-session.
    #[error("JPEG encode failed: {0}")]
    Encode(String),

    /// Encoded payload does not fit the 31-bit length prefix.
    #[error("encoded frame too large: {0} bytes")]
    FrameTooLarge(u64),

    /// Write to the client socket failed. Ends the stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No frame became ready within the poll budget.
    #[error("no frame ready after {attempts} polls")]
    CaptureTimeout { attempts: u32 },

    /// The capture subsystem failed or went away.
    #[error("capture error: {0}")]
    Capture(String),
}

impl MirrorError {
    /// Whether this error ends the stream for the connected client.
    ///
    /// `abort_on_encode` reflects the configured encode-error policy.
    pub fn is_terminal(&self, abort_on_encode: bool) -> bool {
        match self {
            Self::Transport(_) | Self::Capture(_) => true,
            Self::Encode(_) | Self::FrameTooLarge(_) => abort_on_encode,
            Self::InvalidInput(_) | Self::CaptureTimeout { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        let io = MirrorError::Transport(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(io.is_terminal(false));

        let enc = MirrorError::Encode("boom".into());
        assert!(!enc.is_terminal(false));
        assert!(enc.is_terminal(true));

        assert!(!MirrorError::InvalidInput("empty".into()).is_terminal(true));
        assert!(!MirrorError::CaptureTimeout { attempts: 3 }.is_terminal(true));
    }
}
