//! Request dispatch: raw payload in, response envelope out.
//!
//! A request moves through `Reading -> Parsing -> Resolving -> Invoking` and
//! any stage can short-circuit to an error response. The dispatcher is the
//! only code that knows how to run both sync and async plugin methods.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as _;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use apidaemon_core::PluginRegistry;
use apidaemon_core::notify::{FailureReport, GENERAL_FAILURE_SUBJECT, SharedNotifier};
use apidaemon_core::plugin::{Handler, Params};
use apidaemon_rpc::{Request, Response};
use bytes::Bytes;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{DispatchError, Stage};
use crate::handler::ConnectionId;

/// Shared, read-only state used by every connection.
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    notifier: Option<SharedNotifier>,
    invoke_timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        notifier: Option<SharedNotifier>,
        invoke_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            invoke_timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    #[must_use]
    pub fn invoke_timeout(&self) -> Duration {
        self.invoke_timeout
    }

    /// Turn the outcome of reading a connection into a response.
    ///
    /// `read` is the raw payload, or the reason reading failed. Failures are
    /// reported to the notifier (when configured) before the response is
    /// returned; a failing notifier is logged and otherwise ignored.
    pub async fn dispatch(
        &self,
        read: Result<Bytes, DispatchError>,
        id: &ConnectionId,
        peer: Option<SocketAddr>,
    ) -> Response {
        let (payload, result) = match read {
            Ok(payload) => {
                let result = self.process(&payload).await;
                (Some(payload), result)
            }
            Err(e) => (None, Err(e)),
        };

        match result {
            Ok(data) => Response::success(data),
            Err(err) => {
                warn!("Request failed while {}: {}", err.stage(), err);
                self.report(&err, payload.as_deref(), id, peer).await;
                Response::failure(err.to_string())
            }
        }
    }

    async fn process(&self, payload: &[u8]) -> Result<Value, DispatchError> {
        let text = std::str::from_utf8(payload)?;
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyRequest);
        }

        let request: Request = serde_json::from_str(text)?;
        request.validate()?;
        debug!("Dispatching {}", request.method);

        let segments: Vec<&str> = request.segments().collect();
        let handler = self.registry.resolve(&segments)?.clone();

        self.invoke(handler, Params::new(request.parameters)).await
    }

    async fn invoke(&self, handler: Handler, params: Params) -> Result<Value, DispatchError> {
        let call = async move {
            match handler {
                Handler::Sync(method) => method(params),
                Handler::Async(method) => method(params).await,
            }
        };

        match tokio::time::timeout(self.invoke_timeout, AssertUnwindSafe(call).catch_unwind()).await
        {
            Err(_) => Err(DispatchError::Timeout {
                stage: Stage::Invoking,
                after: self.invoke_timeout,
            }),
            Ok(Err(panic)) => Err(DispatchError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result.map_err(DispatchError::Invocation),
        }
    }

    async fn report(
        &self,
        err: &DispatchError,
        payload: Option<&[u8]>,
        id: &ConnectionId,
        peer: Option<SocketAddr>,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let report = FailureReport {
            request_id: id.to_string(),
            peer,
            error: format!("{err:?}"),
            trace: trace(err),
            request: payload.map_or_else(
                || "<not received>".to_string(),
                |p| String::from_utf8_lossy(p).into_owned(),
            ),
        };

        if let Err(e) = notifier
            .send(GENERAL_FAILURE_SUBJECT, &report.to_string())
            .await
        {
            error!("Failed to send failure notification: {}", e);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("notifier", &self.notifier.is_some())
            .field("invoke_timeout", &self.invoke_timeout)
            .finish()
    }
}

/// Stage, cause chain and (when `RUST_BACKTRACE` is set) a backtrace.
fn trace(err: &DispatchError) -> String {
    let mut lines = vec![format!("failed while {}", err.stage())];

    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push(backtrace.to_string());
    }

    lines.join("\n")
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apidaemon_core::notify::{Notifier, NotifyError};
    use apidaemon_core::plugin::{MethodError, MethodTable, Plugin};
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;

    struct Calc;

    impl Plugin for Calc {
        fn methods(self: Arc<Self>) -> MethodTable {
            MethodTable::new()
                .sync("add", |p| {
                    let a: i64 = p.required("a")?;
                    let b: i64 = p.required("b")?;
                    Ok(json!(a + b))
                })
                .asynchronous("later", |_| async { Ok(json!("done")) })
                .asynchronous("forever", |_| async {
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                })
                .sync("boom", |_| Err(MethodError::failed("boom")))
                .sync("panic", |_| panic!("plugin bug"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for Recorder {
        fn send<'a>(
            &'a self,
            subject: &'a str,
            text: &'a str,
        ) -> BoxFuture<'a, Result<(), NotifyError>> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), text.to_string()));
            Box::pin(async { Ok(()) })
        }
    }

    fn dispatcher(notifier: Option<SharedNotifier>) -> Dispatcher {
        let plugin: Arc<dyn Plugin> = Arc::new(Calc);
        let registry = PluginRegistry::from_plugins([("calc".to_string(), plugin)]).unwrap();
        Dispatcher::new(Arc::new(registry), notifier, Duration::from_millis(200))
    }

    async fn run(dispatcher: &Dispatcher, body: &str) -> Response {
        dispatcher
            .dispatch(
                Ok(Bytes::from(body.to_string())),
                &ConnectionId::new(),
                None,
            )
            .await
    }

    #[tokio::test]
    async fn test_sync_and_async_methods() {
        let d = dispatcher(None);

        let resp = run(&d, r#"{"method":"calc.add","parameters":{"a":2,"b":3}}"#).await;
        assert_eq!(resp, Response::success(json!(5)));

        let resp = run(&d, r#"{"method":"calc.later"}"#).await;
        assert_eq!(resp, Response::success(json!("done")));
    }

    #[tokio::test]
    async fn test_each_stage_short_circuits() {
        let d = dispatcher(None);

        let cases = [
            ("", "empty request"),
            ("{", "malformed request"),
            (r#"{"parameters":{}}"#, "malformed request"),
            (r#"{"method":"calc..add"}"#, "malformed method path"),
            (r#"{"method":"calc"}"#, "no method given"),
            (r#"{"method":"nope.add"}"#, "no such namespace"),
            (r#"{"method":"calc.sub"}"#, "no such method"),
            (r#"{"method":"calc.add","parameters":{"a":1}}"#, "missing required argument"),
            (r#"{"method":"calc.boom"}"#, "boom"),
        ];

        for (body, expected) in cases {
            let resp = run(&d, body).await;
            let error = resp.error.unwrap_or_default();
            assert!(error.contains(expected), "{body:?}: got {error:?}");
            assert_eq!(resp.data, Value::Null);
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let d = dispatcher(None);
        let resp = d
            .dispatch(
                Ok(Bytes::from_static(&[0xff, 0xfe, 0x00])),
                &ConnectionId::new(),
                None,
            )
            .await;
        assert!(resp.error.unwrap().contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let d = dispatcher(None);
        let resp = run(&d, r#"{"method":"calc.panic"}"#).await;
        assert_eq!(resp.error.as_deref(), Some("method panicked: plugin bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_timeout() {
        let d = dispatcher(None);
        let resp = run(&d, r#"{"method":"calc.forever"}"#).await;
        assert!(resp.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(Some(recorder.clone()));

        let resp = d
            .dispatch(
                Err(DispatchError::EmptyRequest),
                &ConnectionId::new(),
                None,
            )
            .await;

        assert_eq!(resp, Response::failure("empty request"));
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("<not received>"));
    }

    #[tokio::test]
    async fn test_notifies_once_per_failure() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(Some(recorder.clone()));
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let body = r#"{"method":"calc.boom"}"#;

        d.dispatch(Ok(Bytes::from(body)), &ConnectionId::from("req-1"), Some(peer))
            .await;
        run(&d, r#"{"method":"calc.add","parameters":{"a":1,"b":1}}"#).await;

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (subject, text) = &sent[0];
        assert_eq!(subject, GENERAL_FAILURE_SUBJECT);
        assert!(text.contains("Request req-1 from 10.0.0.1:5555 failed."));
        assert!(text.contains("failed while invoking"));
        assert!(text.ends_with(body));
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }
}
