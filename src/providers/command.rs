/*!
 * External TTS program as a speech provider.
 *
 * The program receives the text on stdin and its configured arguments with
 * `{audio}` replaced by the path it must write the audio to and `{voice}` by
 * the voice name. On success it prints a JSON document on stdout:
 *
 * ```json
 * { "duration": 3.2, "marks": [{ "text": "Hello", "offset": 0.0, "duration": 0.4 }] }
 * ```
 *
 * Exit status 75 (EX_TEMPFAIL) and timeouts are transient failures; any other
 * non-zero status is permanent.
 */

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::app_config::CommandConfig;
use crate::errors::ProviderError;
use crate::providers::{SpeechOutput, SpeechProvider};
use crate::speech::TimingMark;

/// Exit status a program uses to ask for a retry
const EX_TEMPFAIL: i32 = 75;

/// Exit status for rejected credentials
const EX_NOPERM: i32 = 77;

/// JSON reply printed by the program
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    marks: Vec<TimingMark>,
}

/// Speech provider running an external program
#[derive(Debug, Clone)]
pub struct CommandSpeechProvider {
    config: CommandConfig,
}

impl CommandSpeechProvider {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    fn expand_args(&self, audio_path: &str, voice: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{audio}", audio_path).replace("{voice}", voice))
            .collect()
    }
}

#[async_trait]
impl SpeechProvider for CommandSpeechProvider {
    async fn speak(&self, text: &str, voice: &str) -> Result<SpeechOutput, ProviderError> {
        let work_dir = tempfile::Builder::new()
            .prefix("bookcast-tts-")
            .tempdir()
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to create work dir: {}", e)))?;
        let audio_path = work_dir.path().join(format!("audio.{}", self.config.audio_extension));
        let args = self.expand_args(&audio_path.to_string_lossy(), voice);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::InvalidInput(format!("Failed to start {}: {}", self.config.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                debug!("{} closed stdin early: {}", self.config.program, e);
            }
        }

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ProviderError::RequestFailed(format!("Failed to run {}: {}", self.config.program, e)))?
            },
            _ = tokio::time::sleep(timeout_duration) => {
                return Err(ProviderError::Timeout(self.config.timeout_secs));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("{} failed ({}): {}", self.config.program, output.status, stderr);
            return Err(match output.status.code() {
                Some(EX_TEMPFAIL) => ProviderError::RequestFailed(stderr),
                Some(EX_NOPERM) => ProviderError::AuthenticationError(stderr),
                _ => ProviderError::InvalidInput(format!("{} exited with {}: {}", self.config.program, output.status, stderr)),
            });
        }

        let reply: CommandReply = serde_json::from_slice(&output.stdout)
            .map_err(|e| ProviderError::ParseError(format!("Invalid JSON from {}: {}", self.config.program, e)))?;

        let audio = tokio::fs::read(&audio_path).await.map_err(|e| {
            ProviderError::ParseError(format!("{} did not write audio to {}: {}", self.config.program, audio_path.display(), e))
        })?;

        Ok(SpeechOutput {
            audio: Bytes::from(audio),
            extension: self.config.audio_extension.clone(),
            marks: reply.marks,
            duration: reply.duration,
        })
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}
