use futures_util::future::BoxFuture;
use tracing::error;

use super::{Notifier, NotifyError};

/// Writes reports to the daemon log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(
        &'a self,
        subject: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            error!(target: "apidaemon::notify", subject, "{text}");
            Ok(())
        })
    }
}
