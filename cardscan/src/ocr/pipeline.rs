use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{CardscanError, Result};

use super::{preprocess_file, preprocessed_path, validate_language, ImageLimits, Recognizer};

const PREPROCESS_TOOL: &str = "Preprocessing";
const TESSERACT_TOOL: &str = "Tesseract";

#[derive(Debug, Clone)]
enum PreprocessStep {
    /// External program; the input path is appended to `args`.
    External { program: String, args: Vec<String> },
    /// In-process preprocessing with the `image` crate.
    Builtin,
}

/// Preprocess, then run the `tesseract` CLI on the normalised image.
#[derive(Debug, Clone)]
pub struct PipelineRecognizer {
    preprocess: PreprocessStep,
    tesseract_bin: String,
    tessdata_dir: Option<String>,
    timeout: Duration,
    limits: ImageLimits,
}

/// Removes the derived image when recognition is done or abandoned.
struct DerivedFile(PathBuf);

impl Drop for DerivedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl PipelineRecognizer {
    /// Fails when the tesseract binary cannot be executed.
    pub fn new(config: &OcrConfig) -> Result<Self> {
        probe_binary(&config.tesseract_bin)?;
        Ok(Self::new_unchecked(config))
    }

    /// Skip the startup probe. Tool problems then surface per request.
    pub fn new_unchecked(config: &OcrConfig) -> Self {
        let preprocess = match config.preprocess_command.as_deref() {
            Some([program, args @ ..]) => PreprocessStep::External {
                program: program.clone(),
                args: args.to_vec(),
            },
            _ => PreprocessStep::Builtin,
        };

        Self {
            preprocess,
            tesseract_bin: config.tesseract_bin.clone(),
            tessdata_dir: config.tessdata_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            limits: ImageLimits::from(config),
        }
    }

    async fn preprocess(&self, input: &Path, output: &Path) -> Result<()> {
        match &self.preprocess {
            PreprocessStep::External { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(input);
                run_tool(PREPROCESS_TOOL, cmd, self.timeout).await?;

                if !tokio::fs::try_exists(output).await.unwrap_or(false) {
                    return Err(CardscanError::Recognition(format!(
                        "{PREPROCESS_TOOL} error: no output image was produced"
                    )));
                }
                Ok(())
            }
            PreprocessStep::Builtin => {
                let input = input.to_path_buf();
                let output = output.to_path_buf();
                let limits = self.limits;
                // Fires on timeout and when this future is dropped, e.g. by a
                // fail-fast sibling. The blocking task cannot be aborted, so
                // it checks the token before writing.
                let cancel = CancellationToken::new();
                let _cancel_on_drop = cancel.clone().drop_guard();

                let task = tokio::task::spawn_blocking(move || {
                    preprocess_file(&input, &output, limits, &cancel).map_err(|e| match e {
                        CardscanError::Recognition(msg) => {
                            CardscanError::Recognition(format!("{PREPROCESS_TOOL} error: {msg}"))
                        }
                        other => other,
                    })
                });

                match tokio::time::timeout(self.timeout, task).await {
                    Ok(joined) => joined.map_err(|e| {
                        CardscanError::Internal(format!("Preprocessing task panicked: {e}"))
                    })?,
                    Err(_) => Err(CardscanError::Recognition(format!(
                        "{PREPROCESS_TOOL} timed out after {} seconds",
                        self.timeout.as_secs()
                    ))),
                }
            }
        }
    }

    async fn run_tesseract(&self, image: &Path, language: &str) -> Result<String> {
        let mut cmd = Command::new(&self.tesseract_bin);
        cmd.arg(image).arg("stdout").arg("-l").arg(language);
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }

        let stdout = run_tool(TESSERACT_TOOL, cmd, self.timeout).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[async_trait]
impl Recognizer for PipelineRecognizer {
    async fn recognize(&self, path: &Path, language: &str) -> Result<String> {
        validate_language(language)?;

        let derived = DerivedFile(preprocessed_path(path));
        debug!(input = %path.display(), output = %derived.0.display(), "Preprocessing image");
        self.preprocess(path, &derived.0).await?;

        self.run_tesseract(&derived.0, language).await
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}

/// Run one external tool to completion, capturing stdout and stderr.
///
/// The child is killed if the timeout fires or the future is dropped.
async fn run_tool(tool: &str, mut cmd: Command, timeout: Duration) -> Result<Vec<u8>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| CardscanError::Recognition(format!("{tool} could not be started: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => Err(CardscanError::Recognition(format!(
            "{tool} timed out after {} seconds",
            timeout.as_secs()
        ))),
        Ok(Err(e)) => Err(CardscanError::Recognition(format!("{tool} error: {e}"))),
        Ok(Ok(output)) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CardscanError::Recognition(format!(
                "{tool} error: {}\n{}",
                output.status,
                stderr.trim()
            )))
        }
        Ok(Ok(output)) => Ok(output.stdout),
    }
}

fn probe_binary(bin: &str) -> Result<()> {
    let status = std::process::Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| CardscanError::RecognitionUnavailable(format!("cannot run '{bin}': {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(CardscanError::RecognitionUnavailable(format!(
            "'{bin} --version' exited with {status}"
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script into `dir`.
    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn config_with(tesseract_bin: String, preprocess: Option<Vec<String>>) -> OcrConfig {
        OcrConfig {
            tesseract_bin,
            preprocess_command: preprocess,
            timeout_secs: 5,
            ..OcrConfig::default()
        }
    }

    /// Preprocessor stand-in: copies `$1` to `<stem>_preprocessed.png`.
    fn copying_preprocessor(dir: &Path) -> Vec<String> {
        vec![script(
            dir,
            "preprocess.sh",
            r#"cp "$1" "${1%.*}_preprocessed.png""#,
        )]
    }

    #[tokio::test]
    async fn test_pipeline_runs_both_steps() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the file it was handed and the language back on stdout.
        let tesseract = script(dir.path(), "tesseract", r#"echo "  $(basename "$1") $4  ""#);
        let input = dir.path().join("card.jpg");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer = PipelineRecognizer::new_unchecked(&config_with(
            tesseract,
            Some(copying_preprocessor(dir.path())),
        ));
        let text = recognizer.recognize(&input, "deu").await.unwrap();

        assert_eq!(text, "card_preprocessed.png deu");
        assert!(
            !dir.path().join("card_preprocessed.png").exists(),
            "derived image should be cleaned up"
        );
    }

    #[tokio::test]
    async fn test_tesseract_failure_embeds_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tesseract = script(
            dir.path(),
            "tesseract",
            "echo 'Failed loading language xyz' >&2; exit 1",
        );
        let input = dir.path().join("card.png");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer = PipelineRecognizer::new_unchecked(&config_with(
            tesseract,
            Some(copying_preprocessor(dir.path())),
        ));
        let err = recognizer.recognize(&input, "xyz").await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Tesseract error"), "{message}");
        assert!(message.contains("Failed loading language xyz"), "{message}");
    }

    #[tokio::test]
    async fn test_preprocess_failure_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("tesseract-ran");
        let tesseract = script(
            dir.path(),
            "tesseract",
            &format!("touch '{}'", marker.display()),
        );
        let preprocess = script(
            dir.path(),
            "preprocess.sh",
            "echo 'ERROR: Cannot read image' >&2; exit 2",
        );
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer =
            PipelineRecognizer::new_unchecked(&config_with(tesseract, Some(vec![preprocess])));
        let err = recognizer.recognize(&input, "eng").await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Preprocessing error"), "{message}");
        assert!(message.contains("Cannot read image"), "{message}");
        assert!(!marker.exists(), "tesseract must not run after a failed preprocess");
    }

    #[tokio::test]
    async fn test_preprocess_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tesseract = script(dir.path(), "tesseract", "echo text");
        let preprocess = script(dir.path(), "preprocess.sh", "exit 0");
        let input = dir.path().join("card.png");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer =
            PipelineRecognizer::new_unchecked(&config_with(tesseract, Some(vec![preprocess])));
        let err = recognizer.recognize(&input, "eng").await.unwrap_err();
        assert!(err.to_string().contains("no output image"), "{err}");
    }

    #[tokio::test]
    async fn test_builtin_preprocess_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let tesseract = script(dir.path(), "tesseract", "echo text");
        let input = dir.path().join("notes.png");
        std::fs::write(&input, b"this is not a png").unwrap();

        let recognizer = PipelineRecognizer::new_unchecked(&config_with(tesseract, None));
        let err = recognizer.recognize(&input, "eng").await.unwrap_err();

        assert!(matches!(err, CardscanError::Recognition(_)));
        assert!(err.to_string().contains("Preprocessing error"), "{err}");
    }

    #[tokio::test]
    async fn test_external_tool_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tesseract = script(dir.path(), "tesseract", "sleep 10");
        let input = dir.path().join("card.png");
        std::fs::write(&input, b"raw").unwrap();

        let config = OcrConfig {
            timeout_secs: 1,
            ..config_with(tesseract, Some(copying_preprocessor(dir.path())))
        };
        let recognizer = PipelineRecognizer::new_unchecked(&config);
        let err = recognizer.recognize(&input, "eng").await.unwrap_err();
        assert!(err.to_string().contains("timed out after 1 seconds"), "{err}");
    }

    #[tokio::test]
    async fn test_missing_tool_reports_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("card.png");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer = PipelineRecognizer::new_unchecked(&config_with(
            "/nonexistent/tesseract".to_string(),
            Some(copying_preprocessor(dir.path())),
        ));
        let err = recognizer.recognize(&input, "eng").await.unwrap_err();
        assert!(err.to_string().contains("could not be started"), "{err}");
    }

    #[tokio::test]
    async fn test_rejects_suspicious_language_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let preprocess = script(
            dir.path(),
            "preprocess.sh",
            &format!("touch '{}'", marker.display()),
        );
        let input = dir.path().join("card.png");
        std::fs::write(&input, b"raw").unwrap();

        let recognizer = PipelineRecognizer::new_unchecked(&config_with(
            "tesseract".to_string(),
            Some(vec![preprocess]),
        ));
        let result = recognizer.recognize(&input, "eng --oem 0").await;
        assert!(result.is_err());
        assert!(!marker.exists());
    }

    #[test]
    fn test_probe_missing_binary() {
        assert!(probe_binary("/nonexistent/tesseract").is_err());
    }
}
