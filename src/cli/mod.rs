use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{EncodeErrorPolicy, MirrorConfig};

#[derive(Parser)]
#[command(name = "screen-mirror")]
#[command(about = "Stream the screen as length-prefixed JPEG frames to one client", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for one client and stream the screen to it
    Serve(ServeArgs),

    /// List displays available for capture
    Displays,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// TOML config file; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long)]
    pub bind: Option<String>,

    /// JPEG quality (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Delay between frame-ready checks, in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Frame-ready checks per cycle before the cycle is skipped
    #[arg(long)]
    pub max_poll_attempts: Option<u32>,

    /// Display index (see `displays`)
    #[arg(short, long)]
    pub display: Option<usize>,

    /// Output frame width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Output frame height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Stop streaming on the first frame that fails to encode
    #[arg(long)]
    pub abort_on_encode_error: bool,
}

impl ServeArgs {
    /// Build the effective configuration: file (or defaults), then flags.
    pub fn into_config(self) -> Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::load(path)?,
            None => MirrorConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(n) = self.max_poll_attempts {
            config.max_poll_attempts = n;
        }
        if let Some(display) = self.display {
            config.capture.display = display;
        }
        if self.width.is_some() {
            config.capture.output_width = self.width;
        }
        if self.height.is_some() {
            config.capture.output_height = self.height;
        }
        if self.abort_on_encode_error {
            config.on_encode_error = EncodeErrorPolicy::Abort;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Serve(args) => args,
            Commands::Displays => panic!("expected serve"),
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = serve_args(&[
            "screen-mirror",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "-q",
            "80",
            "--width",
            "370",
            "--abort-on-encode-error",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.quality, 80);
        assert_eq!(config.capture.output_width, Some(370));
        assert_eq!(config.on_encode_error, EncodeErrorPolicy::Abort);
        assert_eq!(config.max_poll_attempts, 200);
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        assert!(Cli::try_parse_from(["screen-mirror", "serve", "-q", "0"]).is_err());
        assert!(Cli::try_parse_from(["screen-mirror", "serve", "-q", "101"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "quality = 30\npoll_interval_ms = 10").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = serve_args(&["screen-mirror", "serve", "-c", &path, "-q", "90"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.quality, 90);
        assert_eq!(config.poll_interval_ms, 10);
    }

    #[test]
    fn test_oversize_output_rejected_at_startup() {
        let args = serve_args(&["screen-mirror", "serve", "--width", "70000"]);
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["screen-mirror", "displays", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
