//! Translation on an SSH-attached worker.
//!
//! The input is uploaded to `<remote_dir>/jobs/<uuid>.in`, the configured
//! translate command runs in `remote_dir`, and the output file is read back
//! with `cat`. Job files are removed afterwards on a best-effort basis.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use polyglot_core::{RemoteConfig, Translate, TranslateError};
use polyglot_remote::{transfer, RemoteShell};
use polyglot_sync::shell::{in_dir, quote};

pub struct SshTranslator {
    shell: Arc<dyn RemoteShell>,
    worker_id: String,
    translate_command: String,
}

impl SshTranslator {
    pub fn new(shell: Arc<dyn RemoteShell>, config: &RemoteConfig) -> Self {
        Self {
            shell,
            worker_id: config.id.clone(),
            translate_command: config.translate_command.clone(),
        }
    }
}

/// Fill `{input}`, `{output}` and `{hint}` with shell-quoted values.
pub fn render_command(template: &str, input: &str, output: &str, hint: &str) -> String {
    template
        .replace("{input}", &quote(input))
        .replace("{output}", &quote(output))
        .replace("{hint}", &quote(hint))
}

#[async_trait]
impl Translate for SshTranslator {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let remote_dir = self.shell.remote_dir();
        let dir = remote_dir.trim_end_matches('/');
        let job = Uuid::new_v4();
        let input = format!("{dir}/jobs/{job}.in");
        let output = format!("{dir}/jobs/{job}.out");

        transfer::upload_data(self.shell.as_ref(), cancel, text.as_bytes(), &input).await?;

        let command = render_command(&self.translate_command, &input, &output, hint);
        let outcome = async {
            self.shell
                .execute_checked(cancel, &in_dir(remote_dir, &command))
                .await?;
            self.shell
                .execute_checked(cancel, &format!("cat {}", quote(&output)))
                .await
        }
        .await;

        let cleanup = format!("rm -f {} {}", quote(&input), quote(&output));
        if let Err(err) = self.shell.execute(&CancellationToken::new(), &cleanup).await {
            tracing::debug!(worker = %self.worker_id, error = %err, "job cleanup failed");
        }

        let translated = outcome?.stdout.trim_end().to_string();
        if translated.is_empty() {
            return Err(TranslateError::provider(format!(
                "worker {} produced no output",
                self.worker_id
            )));
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_quoted() {
        let rendered = render_command(
            "./bin/translate --file {input} --hint {hint} > {output}",
            "/w/jobs/a.in",
            "/w/jobs/a.out",
            "chapter one; rm -rf /",
        );
        assert_eq!(
            rendered,
            "./bin/translate --file /w/jobs/a.in --hint 'chapter one; rm -rf /' > /w/jobs/a.out"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_template_in_remote_dir_and_cleans_up() {
        let remote = tempfile::tempdir().unwrap();
        let mut config = RemoteConfig::new("local", "localhost", "worker");
        config.translate_command = "tr a-z A-Z < {input} > {output}".to_string();
        let shell = Arc::new(polyglot_remote::LocalShell::new(remote.path()));
        let translator = SshTranslator::new(shell, &config);

        let out = translator
            .translate(&CancellationToken::new(), "bonjour", "")
            .await
            .unwrap();
        assert_eq!(out, "BONJOUR");
        let leftovers = std::fs::read_dir(remote.path().join("jobs")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_a_provider_error() {
        let remote = tempfile::tempdir().unwrap();
        let mut config = RemoteConfig::new("local", "localhost", "worker");
        config.translate_command = "exit 4".to_string();
        let shell = Arc::new(polyglot_remote::LocalShell::new(remote.path()));
        let err = SshTranslator::new(shell, &config)
            .translate(&CancellationToken::new(), "bonjour", "")
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Provider(_)), "got {err}");
    }
}
