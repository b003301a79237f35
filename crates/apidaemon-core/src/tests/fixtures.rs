//! Test fixtures and helpers

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use crate::config::PluginConfig;
use crate::notify::{Notifier, NotifyError, SharedNotifier};
use crate::plugin::{MethodError, MethodTable, Plugin};

/// Notifier that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn shared() -> (Arc<Self>, SharedNotifier) {
        let recorder = Arc::new(Self::default());
        let shared: SharedNotifier = recorder.clone();
        (recorder, shared)
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
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

/// Minimal plugin with one nested method and one that always fails.
pub struct Stub;

impl Plugin for Stub {
    fn methods(self: Arc<Self>) -> MethodTable {
        let nested = MethodTable::new().sync("deep", |_| Ok(json!("deep")));
        MethodTable::new()
            .sync("ok", |_| Ok(json!(true)))
            .sync("boom", |_| Err(MethodError::failed("boom")))
            .nest("inner", nested)
    }
}

/// Plugin whose method table contains a duplicate path.
pub struct Broken;

impl Plugin for Broken {
    fn methods(self: Arc<Self>) -> MethodTable {
        MethodTable::new()
            .sync("x", |_| Ok(Value::Null))
            .sync("x", |_| Ok(Value::Null))
    }
}

/// Config entry of `kind` with extra plugin parameters.
pub fn entry(kind: &str, params: Value) -> PluginConfig {
    let mut config = PluginConfig::new(kind);
    if let Value::Object(map) = params {
        config.params = map;
    }
    config
}

pub fn entries(items: Vec<(&str, PluginConfig)>) -> BTreeMap<String, PluginConfig> {
    items
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect()
}
