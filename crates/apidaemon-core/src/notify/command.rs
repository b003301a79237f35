use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Notifier, NotifyError};

/// Environment variable carrying the subject to the notification command.
pub const SUBJECT_ENV: &str = "APIDAEMON_SUBJECT";

const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Delivers reports by running an external program (e.g. `mail`).
///
/// The report text is written to the program's stdin. The subject is exported
/// as [`SUBJECT_ENV`] and substituted for `{subject}` in the arguments.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    #[must_use]
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    fn render_args(&self, subject: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(SUBJECT_PLACEHOLDER, subject))
            .collect()
    }

    async fn run(&self, subject: &str, text: &str) -> Result<(), NotifyError> {
        debug!("Running notification command: {}", self.program);

        let mut child = Command::new(&self.program)
            .args(self.render_args(subject))
            .env(SUBJECT_ENV, subject)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(NotifyError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

impl Notifier for CommandNotifier {
    fn send<'a>(
        &'a self,
        subject: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.run(subject, text))
                .await
                .map_err(|_| NotifyError::Timeout(self.timeout))?
        })
    }
}
