use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::{HandDetector, replay::HandRecord};
use crate::{
    config::DetectorConfig,
    types::{DetectedHand, Frame},
};

#[derive(Serialize)]
struct FrameHeader {
    sequence: u64,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct DetectionReply {
    #[serde(default)]
    hands: Vec<HandRecord>,
    #[serde(default)]
    error: Option<String>,
}

/// Landmark detector running as a child process.
///
/// The child prints `READY` once its model is loaded. For each frame it
/// receives a JSON header line followed by `width * height * 4` RGBA bytes on
/// stdin, and answers with one JSON line `{"hands": [...]}` on stdout.
pub struct SubprocessDetector {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SubprocessDetector {
    pub fn spawn(program: &str, args: &[String], config: &DetectorConfig) -> Result<Self> {
        log::info!("starting hand detector subprocess {program}");

        let mut process = Command::new(program)
            .args(args)
            .arg("--max-hands")
            .arg(config.max_hands.to_string())
            .arg("--min-detection-confidence")
            .arg(config.min_detection_confidence.to_string())
            .arg("--min-tracking-confidence")
            .arg(config.min_tracking_confidence.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start detector {program}"))?;

        match handshake(&mut process) {
            Ok((stdin, stdout)) => {
                log::info!("hand detector ready");
                Ok(Self {
                    process,
                    stdin,
                    stdout,
                })
            }
            Err(err) => {
                let _ = process.kill();
                let _ = process.wait();
                Err(err)
            }
        }
    }
}

fn handshake(process: &mut Child) -> Result<(ChildStdin, BufReader<ChildStdout>)> {
    let stdin = process.stdin.take().context("detector stdin unavailable")?;
    let stdout = process.stdout.take().context("detector stdout unavailable")?;
    let mut stdout = BufReader::new(stdout);

    let mut ready = String::new();
    stdout
        .read_line(&mut ready)
        .context("detector handshake failed")?;
    if ready.trim() != "READY" {
        bail!("detector did not signal ready, got {:?}", ready.trim());
    }
    Ok((stdin, stdout))
}

impl HandDetector for SubprocessDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedHand>> {
        let header = FrameHeader {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
        };
        serde_json::to_writer(&mut self.stdin, &header)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.write_all(&frame.rgba)?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            bail!("detector exited");
        }
        parse_reply(&line)
    }
}

fn parse_reply(line: &str) -> Result<Vec<DetectedHand>> {
    let reply: DetectionReply =
        serde_json::from_str(line.trim()).context("detector sent invalid JSON")?;
    if let Some(err) = reply.error {
        bail!("detector error: {err}");
    }
    reply.hands.into_iter().map(HandRecord::into_hand).collect()
}

impl Drop for SubprocessDetector {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_without_hands_are_empty() {
        assert!(parse_reply(r#"{"hands": []}"#).unwrap().is_empty());
        assert!(parse_reply("{}").unwrap().is_empty());
    }

    fn pid_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gesture-mixer-{name}-{}.pid", std::process::id()))
    }

    /// Spawns `sh -c script` where the script records its pid first, and
    /// returns the spawn result with that pid.
    fn spawn_shell(name: &str, script: &str) -> (Result<SubprocessDetector>, u32) {
        let pid_path = pid_file(name);
        let script = format!("echo $$ > '{}'; {script}", pid_path.display());
        let result = SubprocessDetector::spawn(
            "sh",
            &["-c".to_string(), script],
            &DetectorConfig::default(),
        );
        let pid = std::fs::read_to_string(&pid_path)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let _ = std::fs::remove_file(&pid_path);
        (result, pid)
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn garbled_handshake_reaps_the_child() {
        let (result, pid) = spawn_shell("garbled", r"printf '\377\376\n'; exec sleep 30");
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("detector handshake failed"));
        assert!(!is_running(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn wrong_greeting_reaps_the_child() {
        let (result, pid) = spawn_shell("greeting", "echo hello; exec sleep 30");
        let err = result.err().unwrap();
        assert!(err.to_string().contains("did not signal ready"));
        assert!(!is_running(pid));
    }

    #[test]
    fn detector_errors_surface() {
        let err = parse_reply(r#"{"error": "model not loaded"}"#).unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
        assert!(parse_reply("not json").is_err());
    }
}
