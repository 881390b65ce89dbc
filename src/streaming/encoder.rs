//! External HLS encoder process
//!
//! The encoder reads concatenated audio files from its stdin at real-time
//! pace and writes rolling `.ts` segments plus a manifest into the segment
//! directory. Its read rate is what throttles the producer loop.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::process::{Child, ChildStdin, Command};

use crate::config::EncoderConfig;

/// Segment file name pattern for a run, e.g. `stream_1700000000_%03d.ts`
pub fn segment_pattern(dir: &Path, run_id: i64) -> PathBuf {
    dir.join(format!("stream_{run_id}_%03d.ts"))
}

fn flag(args: &mut Vec<String>, name: &str, value: &str) {
    args.push(name.to_string());
    args.push(value.to_string());
}

/// Fully resolved encoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    binary: String,
    args: Vec<String>,
}

impl EncoderCommand {
    /// Build the HLS transcoding command line
    pub fn hls(
        config: &EncoderConfig,
        segment_dir: &Path,
        manifest_name: &str,
        run_id: i64,
        start_sequence: u64,
    ) -> Self {
        let segments = segment_pattern(segment_dir, run_id);
        let manifest = segment_dir.join(manifest_name);

        let mut args: Vec<String> = Vec::with_capacity(40);
        flag(&mut args, "-loglevel", &config.log_level);
        flag(&mut args, "-f", &config.input_format);
        flag(&mut args, "-fflags", &config.fflags);
        args.push("-re".to_string());
        flag(&mut args, "-i", "pipe:0");
        args.push("-vn".to_string());
        flag(&mut args, "-map", "0:a:0");

        if !config.audio_filter.is_empty() {
            flag(&mut args, "-af", &config.audio_filter);
        }
        flag(&mut args, "-c:a", &config.codec);
        flag(&mut args, "-b:a", &config.bitrate);
        flag(&mut args, "-ac", &config.channels.to_string());

        flag(&mut args, "-f", "hls");
        flag(&mut args, "-hls_time", &config.segment_time.to_string());
        flag(&mut args, "-hls_list_size", &config.list_size.to_string());
        flag(&mut args, "-hls_flags", &config.hls_flags);
        flag(&mut args, "-start_number", &start_sequence.to_string());
        flag(&mut args, "-hls_segment_filename", &segments.to_string_lossy());
        args.push(manifest.to_string_lossy().into_owned());

        Self {
            binary: config.binary.clone(),
            args,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Start the encoder with a piped stdin
    pub fn spawn(&self) -> Result<EncoderProcess> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start encoder '{}'", self.binary))?;

        let stdin = child
            .stdin
            .take()
            .context("encoder stdin was not captured")?;

        tracing::info!(binary = %self.binary, pid = ?child.id(), "Encoder started");
        Ok(EncoderProcess {
            child,
            stdin: Some(stdin),
        })
    }
}

/// A running encoder
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderProcess {
    /// Take the write end of the encoder's input pipe
    pub fn take_input(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Wait for the encoder to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.context("Failed to wait for encoder")
    }

    /// Terminate the encoder
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.context("Failed to stop encoder")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_hls_command_line() {
        let config = EncoderConfig::default();
        let cmd = EncoderCommand::hls(&config, Path::new("/tmp/hls"), "stream.m3u8", 1700000000, 502);
        let args = cmd.args();

        assert_eq!(cmd.binary(), "ffmpeg");
        assert_eq!(args[position(args, "-i") + 1], "pipe:0");
        assert_eq!(args[position(args, "-start_number") + 1], "502");
        assert_eq!(
            args[position(args, "-hls_segment_filename") + 1],
            "/tmp/hls/stream_1700000000_%03d.ts"
        );
        assert_eq!(args.last().unwrap(), "/tmp/hls/stream.m3u8");
        assert!(position(args, "-re") < position(args, "-i"));
        assert_eq!(args[position(args, "-c:a") + 1], config.codec);
    }

    #[test]
    fn test_empty_filter_is_omitted() {
        let config = EncoderConfig {
            audio_filter: String::new(),
            ..Default::default()
        };
        let cmd = EncoderCommand::hls(&config, Path::new("out"), "live.m3u8", 1, 0);
        assert!(!cmd.args().iter().any(|a| a == "-af"));
        assert_eq!(cmd.args().last().unwrap(), "out/live.m3u8");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = EncoderConfig {
            binary: "/nonexistent/onair-encoder".to_string(),
            ..Default::default()
        };
        let cmd = EncoderCommand::hls(&config, Path::new("out"), "stream.m3u8", 1, 0);
        assert!(cmd.spawn().is_err());
    }
}
