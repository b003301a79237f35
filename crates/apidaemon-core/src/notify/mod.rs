//! Failure notifications.
//!
//! A [`Notifier`] reports dispatch failures out-of-band. At most one is
//! configured per server; plugins that opt in with `use_notify` get a handle
//! to the same instance.

mod command;
mod log;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::config::{NotifierConfig, NotifierKind};
use crate::{Error, Result};

pub use command::{CommandNotifier, SUBJECT_ENV};
pub use log::LogNotifier;

/// Subject used for reports about requests that failed in the dispatcher.
pub const GENERAL_FAILURE_SUBJECT: &str = "ApiDaemon: general failure";

/// Errors raised while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),

    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Sink for failure reports.
pub trait Notifier: Send + Sync {
    fn send<'a>(&'a self, subject: &'a str, text: &'a str)
    -> BoxFuture<'a, std::result::Result<(), NotifyError>>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Build the configured notifier. Returns `None` when notifications are
/// absent or disabled.
///
/// # Errors
///
/// Returns [`Error::Config`] when the notifier settings are unusable.
pub fn build_notifier(config: Option<&NotifierConfig>) -> Result<Option<SharedNotifier>> {
    let Some(config) = config.filter(|c| c.enabled) else {
        return Ok(None);
    };

    let notifier: SharedNotifier = match &config.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Command {
            program,
            args,
            timeout_secs,
        } => {
            if program.trim().is_empty() {
                return Err(Error::Config(
                    "notificator.program must not be empty".to_string(),
                ));
            }
            Arc::new(CommandNotifier::new(
                program.clone(),
                args.clone(),
                Duration::from_secs(*timeout_secs),
            ))
        }
    };

    Ok(Some(notifier))
}

/// Diagnostic context sent when a request fails.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub request_id: String,
    pub peer: Option<SocketAddr>,
    pub error: String,
    pub trace: String,
    pub request: String,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peer = self
            .peer
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());

        writeln!(f, "Request {} from {peer} failed.", self.request_id)?;
        writeln!(f)?;
        writeln!(f, "Error:")?;
        writeln!(f, "{}", self.error)?;
        writeln!(f)?;
        writeln!(f, "Traceback:")?;
        writeln!(f, "{}", self.trace)?;
        writeln!(f)?;
        writeln!(f, "Request:")?;
        write!(f, "{}", self.request)
    }
}
