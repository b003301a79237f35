use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::Result;
use crate::plugin::{MethodError, MethodTable, Params, Plugin, PluginContext};

pub const KIND: &str = "system";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemParams {
    #[serde(default = "default_greeting")]
    greeting: String,
    #[serde(default = "default_max_sleep_ms")]
    max_sleep_ms: u64,
}

fn default_greeting() -> String {
    "Hello".to_string()
}

fn default_max_sleep_ms() -> u64 {
    60_000
}

/// Liveness and diagnostics methods.
#[derive(Debug)]
pub struct System {
    greeting: String,
    max_sleep: Duration,
    started: DateTime<Utc>,
    pings: AtomicU64,
}

impl System {
    #[must_use]
    pub fn new(greeting: impl Into<String>, max_sleep: Duration) -> Self {
        Self {
            greeting: greeting.into(),
            max_sleep,
            started: Utc::now(),
            pings: AtomicU64::new(0),
        }
    }

    fn ping(&self) -> Value {
        self.pings.fetch_add(1, Ordering::Relaxed);
        json!("pong")
    }

    fn hello(&self, params: &Params) -> std::result::Result<Value, MethodError> {
        params.deny_unknown(&["name"])?;
        let name = params
            .optional::<String>("name")?
            .unwrap_or_else(|| "world".to_string());
        Ok(json!(format!("{}, {name}!", self.greeting)))
    }

    fn stats(&self) -> Value {
        let uptime = Utc::now().signed_duration_since(self.started);
        json!({
            "started": self.started.to_rfc3339(),
            "uptime_secs": uptime.num_seconds(),
            "pings": self.pings.load(Ordering::Relaxed),
        })
    }

    async fn sleep(&self, params: Params) -> std::result::Result<Value, MethodError> {
        params.deny_unknown(&["ms"])?;
        let ms: u64 = params.required("ms")?;
        let duration = Duration::from_millis(ms);
        if duration > self.max_sleep {
            return Err(MethodError::invalid(
                "ms",
                format!("must not exceed {}", self.max_sleep.as_millis()),
            ));
        }
        tokio::time::sleep(duration).await;
        Ok(json!(ms))
    }
}

/// # Errors
///
/// Fails on unknown or mistyped plugin parameters.
pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>> {
    let params: SystemParams = ctx.params()?;
    Ok(Arc::new(System::new(
        params.greeting,
        Duration::from_millis(params.max_sleep_ms),
    )))
}

fn no_args(params: &Params) -> std::result::Result<(), MethodError> {
    params.deny_unknown(&[])
}

impl Plugin for System {
    fn methods(self: Arc<Self>) -> MethodTable {
        let info = MethodTable::new()
            .sync("version", |p| {
                no_args(&p)?;
                Ok(json!(env!("CARGO_PKG_VERSION")))
            })
            .sync("stats", {
                let this = Arc::clone(&self);
                move |p| {
                    no_args(&p)?;
                    Ok(this.stats())
                }
            });

        MethodTable::new()
            .sync("ping", {
                let this = Arc::clone(&self);
                move |p| {
                    no_args(&p)?;
                    Ok(this.ping())
                }
            })
            .sync("hello", {
                let this = Arc::clone(&self);
                move |p| this.hello(&p)
            })
            .sync("time", |p| {
                no_args(&p)?;
                Ok(json!(Utc::now().to_rfc3339()))
            })
            .sync("echo", |p| Ok(Value::Object(p.into_inner())))
            .sync("fail", |p| {
                p.deny_unknown(&["message"])?;
                let message = p
                    .optional::<String>("message")?
                    .unwrap_or_else(|| "requested failure".to_string());
                Err(MethodError::Failed(message))
            })
            .asynchronous("sleep", move |p| {
                let this = Arc::clone(&self);
                async move { this.sleep(p).await }
            })
            .nest("info", info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Handler, MethodResult};
    use serde_json::Map;

    fn system() -> Arc<System> {
        Arc::new(System::new("Hi", Duration::from_millis(500)))
    }

    fn args(value: Value) -> Params {
        match value {
            Value::Object(map) => Params::new(map),
            _ => Params::new(Map::new()),
        }
    }

    async fn call(plugin: Arc<System>, path: &str, value: Value) -> MethodResult {
        let table = plugin.methods();
        match table.get(path).cloned() {
            Some(Handler::Sync(f)) => f(args(value)),
            Some(Handler::Async(f)) => f(args(value)).await,
            None => panic!("no method {path}"),
        }
    }

    #[tokio::test]
    async fn test_ping_counts() {
        let plugin = system();
        assert_eq!(call(plugin.clone(), "ping", json!({})).await.unwrap(), json!("pong"));
        call(plugin.clone(), "ping", json!({})).await.unwrap();

        let stats = call(plugin, "info.stats", json!({})).await.unwrap();
        assert_eq!(stats["pings"], json!(2));
    }

    #[tokio::test]
    async fn test_ping_rejects_arguments() {
        let err = call(system(), "ping", json!({"x": 1})).await.unwrap_err();
        assert_eq!(err, MethodError::UnexpectedArgument("x".to_string()));
    }

    #[tokio::test]
    async fn test_hello_uses_greeting() {
        let result = call(system(), "hello", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(result, json!("Hi, Ada!"));

        let result = call(system(), "hello", json!({})).await.unwrap();
        assert_eq!(result, json!("Hi, world!"));
    }

    #[tokio::test]
    async fn test_echo_returns_parameters() {
        let result = call(system(), "echo", json!({"a": [1, 2], "b": null}))
            .await
            .unwrap();
        assert_eq!(result, json!({"a": [1, 2], "b": null}));
    }

    #[tokio::test]
    async fn test_fail_raises_message() {
        let err = call(system(), "fail", json!({"message": "kaboom"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "kaboom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_async_and_bounded() {
        let table = system().methods();
        assert!(table.get("sleep").unwrap().is_async());

        let result = call(system(), "sleep", json!({"ms": 200})).await.unwrap();
        assert_eq!(result, json!(200));

        let err = call(system(), "sleep", json!({"ms": 10_000})).await.unwrap_err();
        assert!(matches!(err, MethodError::InvalidArgument { ref name, .. } if name == "ms"));
    }

    #[tokio::test]
    async fn test_info_version() {
        let result = call(system(), "info.version", json!({})).await.unwrap();
        assert_eq!(result, json!(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_time_is_rfc3339() {
        let result = call(system(), "time", json!({})).await.unwrap();
        let text = result.as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(text).is_ok());
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_params() {
        let mut params = Map::new();
        params.insert("bogus".to_string(), json!(true));
        let ctx = PluginContext::new("system", tokio::runtime::Handle::current()).with_params(params);
        assert!(factory(ctx).is_err());
    }
}
