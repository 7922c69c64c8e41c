use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use vent_core::{Broker, HandlerError, HandlerResult, Reply, Token};

/// Ordered list of broker operations, read from TOML `[[step]]` tables.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse scenario: {e}"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    On(Subscribe),
    Once(Subscribe),
    /// Remove the subscription called `name`, or every subscriber of `key`.
    Off {
        key: String,
        name: Option<String>,
    },
    Trigger {
        key: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Request {
        key: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// A recording subscriber and how it answers.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscribe {
    pub key: String,
    pub name: String,
    pub reply: Option<Value>,
    /// Fail synchronously with this message.
    pub fail: Option<String>,
    /// Reply with a deferred rejection carrying this message.
    pub reject: Option<String>,
    /// Settle the reply after this many milliseconds.
    pub delay_ms: Option<u64>,
}

/// Executes scenarios against one broker and keeps a transcript of every
/// delivery and outcome.
pub struct Runner {
    broker: Broker,
    /// subscription name → token
    tokens: HashMap<String, Token>,
    transcript: Arc<Mutex<Vec<String>>>,
}

impl Runner {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            tokens: HashMap::new(),
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn run(&mut self, scenario: &Scenario) -> Vec<String> {
        for step in &scenario.steps {
            self.step(step).await;
        }
        std::mem::take(&mut *self.transcript.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn log(&self, line: String) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    async fn step(&mut self, step: &Step) {
        match step {
            Step::On(sub) => {
                let token = self.broker.on(&sub.key, self.recorder(sub));
                tracing::debug!(name = %sub.name, key = %sub.key, token = %token, "on");
                self.tokens.insert(sub.name.clone(), token);
            }
            Step::Once(sub) => {
                let token = self.broker.once(&sub.key, self.recorder(sub));
                tracing::debug!(name = %sub.name, key = %sub.key, token = %token, "once");
                self.tokens.insert(sub.name.clone(), token);
            }
            Step::Off { key, name: None } => self.broker.off(key, None),
            Step::Off {
                key,
                name: Some(name),
            } => match self.tokens.remove(name) {
                Some(token) => self.broker.off(key, Some(&token)),
                None => self.log(format!("! unknown subscription `{name}`")),
            },
            Step::Trigger { key, args } => {
                if let Err(err) = self.broker.trigger(key, args.clone()) {
                    self.log(format!("! {err}"));
                }
            }
            Step::Request { key, args } => match self.broker.request(key, args.clone()) {
                Ok(pending) => match pending.await {
                    Ok(results) => self.log(format!("{key} => {}", Value::Array(results))),
                    Err(err) => self.log(format!("! {err}")),
                },
                Err(err) => self.log(format!("! {err}")),
            },
        }
    }

    fn recorder(
        &self,
        sub: &Subscribe,
    ) -> impl Fn(&Broker, &[Value]) -> HandlerResult + Send + Sync + 'static {
        let transcript = self.transcript.clone();
        let sub = sub.clone();
        move |_, args| {
            transcript
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("{} <- {}", sub.name, Value::Array(args.to_vec())));

            if let Some(message) = &sub.fail {
                return Err(HandlerError::new(message.clone()));
            }

            let delay = sub.delay_ms.map(Duration::from_millis);
            let outcome = match &sub.reject {
                Some(message) => Err(HandlerError::new(message.clone())),
                None => Ok(sub.reply.clone().unwrap_or(Value::Null)),
            };
            match (delay, outcome) {
                (None, Ok(value)) => Ok(Reply::Ready(value)),
                (delay, outcome) => Ok(Reply::deferred(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    outcome
                })),
            }
        }
    }
}
