use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::config::{SyncFailure, VentConfig};
use crate::error::{HandlerError, Result, VentError};
use crate::key::{ChannelEvent, WILDCARD};
use crate::reply::{Handler, HandlerResult};
use crate::token::Token;

/// Aggregate returned by [`Broker::request`]: every reply, in invocation order.
pub type Pending = BoxFuture<'static, Result<Vec<Value>>>;

/// event → ordered subscribers
type EventMap = HashMap<String, Vec<Subscription>>;

static GLOBAL: OnceLock<Arc<Broker>> = OnceLock::new();

#[derive(Clone)]
struct Subscription {
    token: Token,
    handler: Handler,
    /// Present for `once` subscriptions.
    once: Option<Arc<OnceState>>,
}

struct OnceState {
    key: ChannelEvent,
    fired: AtomicBool,
}

impl Subscription {
    /// Returns false if a one-shot subscription already fired. Otherwise, for
    /// one-shots, removes the subscription before the caller invokes it.
    fn claim(&self, broker: &Broker) -> bool {
        let Some(once) = &self.once else {
            return true;
        };
        if once.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        broker.remove(&once.key, &self.token);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Exact,
    ChannelWildcard,
    Global,
}

/// In-process publish/subscribe broker.
///
/// Subscribers are registered under `channel.event` keys (see
/// [`ChannelEvent`]) and invoked in registration order. Publishing to
/// `C.E` reaches three tiers, in order:
/// 1. subscribers of exactly `C.E`,
/// 2. subscribers of `C.*`,
/// 3. subscribers of `*.*`.
///
/// Tiers 2 and 3 receive the published key as an extra trailing argument.
///
/// Handlers never run while the registry lock is held. Each dispatch pass
/// works on a snapshot of the subscriber lists, so handlers may freely call
/// back into the broker.
pub struct Broker {
    /// channel → event → subscribers
    channels: Mutex<HashMap<String, EventMap>>,
    config: VentConfig,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(VentConfig::default())
    }

    pub fn with_config(config: VentConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The process-wide broker.
    pub fn global() -> Arc<Broker> {
        GLOBAL.get_or_init(|| Arc::new(Broker::new())).clone()
    }

    pub fn config(&self) -> &VentConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, EventMap>> {
        // No handler runs under the lock, so a poisoned guard is still consistent.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscriber list for `key`, created empty if absent.
    fn resolve<'a>(
        registry: &'a mut HashMap<String, EventMap>,
        key: &ChannelEvent,
    ) -> &'a mut Vec<Subscription> {
        registry
            .entry(key.channel.clone())
            .or_default()
            .entry(key.event.clone())
            .or_default()
    }

    fn subscribe(&self, key: ChannelEvent, handler: Handler, once: bool) -> Token {
        let token = Token::generate(&self.config.token_prefix);
        let once = once.then(|| {
            Arc::new(OnceState {
                key: key.clone(),
                fired: AtomicBool::new(false),
            })
        });

        let mut registry = self.registry();
        Self::resolve(&mut registry, &key).push(Subscription {
            token: token.clone(),
            handler,
            once: once.clone(),
        });
        drop(registry);

        tracing::debug!(key = %key, token = %token, once = once.is_some(), "subscribed");
        token
    }

    fn remove(&self, key: &ChannelEvent, token: &Token) {
        let mut registry = self.registry();
        Self::resolve(&mut registry, key).retain(|sub| &sub.token != token);
    }

    /// Register `handler` for `key`. The same handler may be registered any
    /// number of times; each registration gets its own token.
    pub fn on<F>(&self, key: &str, handler: F) -> Token
    where
        F: Fn(&Broker, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(ChannelEvent::parse(key), Arc::new(handler), false)
    }

    /// Register a handler that may be missing, e.g. one looked up by name.
    ///
    /// Fails with [`VentError::InvalidHandler`] when `handler` is `None`;
    /// nothing is registered in that case.
    pub fn on_with(&self, key: &str, handler: Option<Handler>) -> Result<Token> {
        let handler = handler.ok_or_else(|| VentError::InvalidHandler {
            key: key.to_string(),
        })?;
        Ok(self.subscribe(ChannelEvent::parse(key), handler, false))
    }

    /// As [`Broker::on`], but the subscription removes itself right before its
    /// first invocation, so it fires at most once.
    ///
    /// The returned token can cancel the subscription before it fires.
    pub fn once<F>(&self, key: &str, handler: F) -> Token
    where
        F: Fn(&Broker, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(ChannelEvent::parse(key), Arc::new(handler), true)
    }

    pub fn once_with(&self, key: &str, handler: Option<Handler>) -> Result<Token> {
        let handler = handler.ok_or_else(|| VentError::InvalidHandler {
            key: key.to_string(),
        })?;
        Ok(self.subscribe(ChannelEvent::parse(key), handler, true))
    }

    /// Unsubscribe from `key`.
    ///
    /// With a token only that subscription goes; without one the whole
    /// subscriber list of exactly `key` is cleared. Wildcard subscriptions
    /// are untouched unless `key` itself names them. Unknown tokens and keys
    /// are ignored.
    pub fn off(&self, key: &str, token: Option<&Token>) {
        let resolved = ChannelEvent::parse(key);
        let mut registry = self.registry();
        let queue = Self::resolve(&mut registry, &resolved);
        match token {
            Some(token) => queue.retain(|sub| &sub.token != token),
            None => queue.clear(),
        }
        drop(registry);

        match token {
            Some(token) => tracing::debug!(key = %resolved, token = %token, "unsubscribed"),
            None => tracing::debug!(key = %resolved, "cleared subscribers"),
        }
    }

    /// Snapshot every subscriber reached by publishing to `key`, tagged with
    /// its tier. A partition is visited at most once even when a wildcard key
    /// makes two tiers alias it.
    fn snapshot(&self, key: &ChannelEvent) -> Vec<(Tier, Subscription)> {
        let channel_wildcard = ChannelEvent::new(key.channel.clone(), WILDCARD);
        let global = ChannelEvent::catch_all();

        let mut registry = self.registry();
        let mut visited: Vec<&ChannelEvent> = Vec::with_capacity(3);
        let mut snapshot = Vec::new();

        for (tier, partition) in [
            (Tier::Exact, key),
            (Tier::ChannelWildcard, &channel_wildcard),
            (Tier::Global, &global),
        ] {
            if visited.contains(&partition) {
                continue;
            }
            visited.push(partition);

            // The channel-wildcard tier is only read, never created.
            let subs = match tier {
                Tier::ChannelWildcard => registry
                    .get(&partition.channel)
                    .and_then(|events| events.get(&partition.event))
                    .cloned()
                    .unwrap_or_default(),
                _ => Self::resolve(&mut registry, partition).clone(),
            };
            snapshot.extend(subs.into_iter().map(|sub| (tier, sub)));
        }

        snapshot
    }

    /// Publish `args` to every matching subscriber, ignoring replies.
    ///
    /// Exact subscribers receive `args` as-is; wildcard subscribers receive
    /// `args` followed by `key`. The first handler error stops the pass and
    /// is returned; handlers already invoked are not rolled back.
    pub fn trigger(&self, key: &str, args: Vec<Value>) -> Result<()> {
        let resolved = ChannelEvent::parse(key);
        let subscribers = self.snapshot(&resolved);
        tracing::trace!(key, subscribers = subscribers.len(), "trigger");

        let keyed = with_key(&args, key);
        for (tier, sub) in subscribers {
            if !sub.claim(self) {
                continue;
            }
            let args = match tier {
                Tier::Exact => &args,
                Tier::ChannelWildcard | Tier::Global => &keyed,
            };
            if let Err(source) = (sub.handler)(self, args) {
                return Err(VentError::Handler {
                    key: key.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Publish `args` and collect every subscriber's reply.
    ///
    /// All tiers, exact included, receive `args` followed by `key`. Handlers
    /// run eagerly, before this returns; the returned future resolves to the
    /// replies in invocation order, or to the first rejection.
    ///
    /// A handler that fails synchronously makes `request` itself return the
    /// error, unless the broker is configured with [`SyncFailure::Reject`].
    pub fn request(&self, key: &str, args: Vec<Value>) -> Result<Pending> {
        let resolved = ChannelEvent::parse(key);
        let subscribers = self.snapshot(&resolved);
        tracing::trace!(key, subscribers = subscribers.len(), "request");

        let keyed = with_key(&args, key);
        let mut replies = Vec::with_capacity(subscribers.len());
        for (_, sub) in subscribers {
            if !sub.claim(self) {
                continue;
            }
            match (sub.handler)(self, &keyed) {
                Ok(reply) => replies.push(reply.into_future()),
                Err(source) => match self.config.request.sync_failure {
                    SyncFailure::Propagate => {
                        return Err(VentError::Handler {
                            key: key.to_string(),
                            source,
                        })
                    }
                    SyncFailure::Reject => replies.push(rejected(source)),
                },
            }
        }

        let key = key.to_string();
        Ok(async move {
            future::try_join_all(replies)
                .await
                .map_err(|source| VentError::Rejected { key, source })
        }
        .boxed())
    }

    /// Number of subscribers registered under exactly `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        let mut registry = self.registry();
        Self::resolve(&mut registry, &ChannelEvent::parse(key)).len()
    }

    /// Names of every channel known to the registry, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.registry().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Drop every subscription on every channel.
    pub fn clear(&self) {
        self.registry().clear();
        tracing::debug!("registry cleared");
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("channels", &self.channels().len())
            .field("config", &self.config)
            .finish()
    }
}

fn with_key(args: &[Value], key: &str) -> Vec<Value> {
    let mut keyed = Vec::with_capacity(args.len() + 1);
    keyed.extend_from_slice(args);
    keyed.push(Value::String(key.to_string()));
    keyed
}

fn rejected(source: HandlerError) -> BoxFuture<'static, std::result::Result<Value, HandlerError>> {
    future::ready(Err(source)).boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::reply::Reply;

    type Calls = Arc<Mutex<Vec<(&'static str, Vec<Value>)>>>;

    fn recorder(calls: &Calls, name: &'static str) -> impl Fn(&Broker, &[Value]) -> HandlerResult {
        let calls = calls.clone();
        move |_, args| {
            calls.lock().unwrap().push((name, args.to_vec()));
            Ok(Reply::none())
        }
    }

    fn names(calls: &Calls) -> Vec<&'static str> {
        calls.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    #[test]
    fn lookup_creates_empty_partitions() {
        let broker = Broker::new();
        assert!(broker.channels().is_empty());

        assert_eq!(broker.subscriber_count("orders.created"), 0);
        broker.trigger("billing.paid", vec![]).unwrap();
        broker.off("solo", None);

        assert_eq!(broker.channels(), vec!["*", "billing", "default", "orders"]);
    }

    #[test]
    fn channel_wildcard_is_not_created_by_dispatch() {
        let broker = Broker::new();
        broker.trigger("orders.created", vec![]).unwrap();
        let registry = broker.registry();
        assert!(!registry["orders"].contains_key(WILDCARD));
        assert!(registry["*"].contains_key(WILDCARD));
    }

    #[test]
    fn wildcard_key_does_not_alias_tiers() {
        let broker = Broker::new();
        let calls = Calls::default();
        broker.on("*.*", recorder(&calls, "all"));
        broker.on("orders.*", recorder(&calls, "orders"));

        broker.trigger("*.*", vec![]).unwrap();
        assert_eq!(names(&calls), vec!["all"]);

        calls.lock().unwrap().clear();
        broker.trigger("orders.*", vec![json!(1)]).unwrap();
        assert_eq!(names(&calls), vec!["orders", "all"]);
        // The exact tier of a wildcard key keeps the bare arguments.
        assert_eq!(calls.lock().unwrap()[0].1, vec![json!(1)]);
    }

    #[test]
    fn once_fires_once_under_reentrant_trigger() {
        let broker = Broker::new();
        let calls = Calls::default();

        // Fires the same key again from inside the outer pass; the inner pass
        // consumes the one-shot, so the outer pass must skip it.
        let reentered = Arc::new(AtomicBool::new(false));
        let flag = reentered.clone();
        broker.on("jobs.done", move |b, _| {
            if !flag.swap(true, Ordering::SeqCst) {
                b.trigger("jobs.done", vec![]).map_err(HandlerError::wrap)?;
            }
            Ok(Reply::none())
        });
        broker.once("jobs.done", recorder(&calls, "once"));

        broker.trigger("jobs.done", vec![]).unwrap();
        assert_eq!(names(&calls), vec!["once"]);
        assert_eq!(broker.subscriber_count("jobs.done"), 1);
    }

    #[test]
    fn removal_during_dispatch_does_not_skip_siblings() {
        let broker = Arc::new(Broker::new());
        let calls = Calls::default();

        let first = broker.once("tick", recorder(&calls, "a"));
        broker.on("tick", recorder(&calls, "b"));
        broker.on("tick", recorder(&calls, "c"));

        broker.trigger("tick", vec![]).unwrap();
        broker.trigger("tick", vec![]).unwrap();
        assert_eq!(names(&calls), vec!["a", "b", "c", "b", "c"]);

        // Token of an already-fired one-shot is simply unknown now.
        broker.off("tick", Some(&first));
        assert_eq!(broker.subscriber_count("tick"), 2);
    }

    #[test]
    fn config_prefix_applies_to_tokens() {
        let broker = Broker::with_config(VentConfig {
            token_prefix: "sub-".into(),
            ..VentConfig::default()
        });
        let token = broker.on("x", |_, _| Ok(Reply::none()));
        assert!(token.as_str().starts_with("sub-"));
    }

    #[test]
    fn clear_drops_every_subscription() {
        let broker = Broker::new();
        let calls = Calls::default();
        broker.on("a.b", recorder(&calls, "exact"));
        broker.on("*.*", recorder(&calls, "all"));

        broker.clear();
        assert!(broker.channels().is_empty());

        broker.trigger("a.b", vec![]).unwrap();
        assert!(names(&calls).is_empty());
    }

    #[test]
    fn global_is_shared() {
        let a = Broker::global();
        let b = Broker::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
