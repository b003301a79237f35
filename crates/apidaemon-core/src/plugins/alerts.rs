use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Handle;
use tracing::warn;

use crate::Result;
use crate::notify::SharedNotifier;
use crate::plugin::{MethodError, MethodResult, MethodTable, Params, Plugin, PluginContext};

pub const KIND: &str = "alerts";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertsParams {
    #[serde(default)]
    subject_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendArgs {
    subject: String,
    text: String,
    #[serde(default)]
    background: bool,
}

/// Forwards client-supplied messages to the configured notifier.
pub struct Alerts {
    notifier: SharedNotifier,
    runtime: Handle,
    subject_prefix: Option<String>,
}

impl Alerts {
    #[must_use]
    pub fn new(notifier: SharedNotifier, runtime: Handle) -> Self {
        Self {
            notifier,
            runtime,
            subject_prefix: None,
        }
    }

    fn subject(&self, subject: &str) -> String {
        match &self.subject_prefix {
            Some(prefix) => format!("{prefix} {subject}"),
            None => subject.to_string(),
        }
    }

    async fn send(self: Arc<Self>, params: Params) -> MethodResult {
        let args: SendArgs = params.into_struct()?;
        let subject = self.subject(&args.subject);

        if args.background {
            let notifier = Arc::clone(&self.notifier);
            self.runtime.spawn(async move {
                if let Err(e) = notifier.send(&subject, &args.text).await {
                    warn!("Background alert '{}' failed: {}", subject, e);
                }
            });
            return Ok(json!({"queued": true}));
        }

        self.notifier
            .send(&subject, &args.text)
            .await
            .map_err(|e| MethodError::failed(format!("notification failed: {e}")))?;
        Ok(json!({"sent": true}))
    }
}

/// # Errors
///
/// Fails when the entry did not opt into `use_notify` or no notifier is
/// configured, or on unknown plugin parameters.
pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>> {
    let params: AlertsParams = ctx.params()?;
    let notifier = ctx.require_notifier()?;
    let mut alerts = Alerts::new(notifier, ctx.runtime);
    alerts.subject_prefix = params.subject_prefix;
    Ok(Arc::new(alerts))
}

impl Plugin for Alerts {
    fn methods(self: Arc<Self>) -> MethodTable {
        MethodTable::new().asynchronous("send", move |p| Arc::clone(&self).send(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notifier, NotifyError};
    use crate::plugin::Handler;
    use futures_util::future::BoxFuture;
    use serde_json::{Map, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for Recorder {
        fn send<'a>(
            &'a self,
            subject: &'a str,
            text: &'a str,
        ) -> BoxFuture<'a, std::result::Result<(), NotifyError>> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), text.to_string()));
            Box::pin(async { Ok(()) })
        }
    }

    struct Unreachable;

    impl Notifier for Unreachable {
        fn send<'a>(
            &'a self,
            _subject: &'a str,
            _text: &'a str,
        ) -> BoxFuture<'a, std::result::Result<(), NotifyError>> {
            Box::pin(async { Err(NotifyError::Timeout(Duration::from_secs(5))) })
        }
    }

    async fn invoke(plugin: Arc<Alerts>, args: Value) -> MethodResult {
        let Some(Handler::Async(f)) = plugin.methods().get("send").cloned() else {
            panic!("send should be async");
        };
        let Value::Object(map) = args else {
            panic!("args must be an object");
        };
        f(Params::new(map)).await
    }

    #[tokio::test]
    async fn test_send_forwards_to_notifier() {
        let recorder = Arc::new(Recorder::default());
        let mut alerts = Alerts::new(recorder.clone(), Handle::current());
        alerts.subject_prefix = Some("[ops]".to_string());

        let result = invoke(Arc::new(alerts), json!({"subject": "disk", "text": "full"}))
            .await
            .unwrap();

        assert_eq!(result, json!({"sent": true}));
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[("[ops] disk".to_string(), "full".to_string())]);
    }

    #[tokio::test]
    async fn test_send_in_background() {
        let recorder = Arc::new(Recorder::default());
        let alerts = Alerts::new(recorder.clone(), Handle::current());

        let result = invoke(
            Arc::new(alerts),
            json!({"subject": "s", "text": "t", "background": true}),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"queued": true}));

        for _ in 0..50 {
            if !recorder.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_a_method_error() {
        let alerts = Alerts::new(Arc::new(Unreachable), Handle::current());
        let err = invoke(Arc::new(alerts), json!({"subject": "s", "text": "t"}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("notification failed: "));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_send_requires_subject_and_text() {
        let alerts = Alerts::new(Arc::new(Recorder::default()), Handle::current());
        let err = invoke(Arc::new(alerts), json!({"subject": "s"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn test_factory_requires_notifier() {
        let ctx = PluginContext::new("alerts", Handle::current());
        let err = factory(ctx).err().unwrap();
        assert!(err.to_string().contains("use_notify"));
    }

    #[tokio::test]
    async fn test_factory_with_notifier() {
        let mut params = Map::new();
        params.insert("subject_prefix".to_string(), json!("[x]"));
        let ctx = PluginContext::new("alerts", Handle::current())
            .with_params(params)
            .with_notifier(Arc::new(Recorder::default()));
        assert!(factory(ctx).is_ok());
    }
}
