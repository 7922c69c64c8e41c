use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::Result;
use crate::reply::{Handler, HandlerResult};
use crate::token::Token;

/// Name under which [`VentPlugin::install`] exposes the broker to a host.
pub const GLOBAL_PROPERTY: &str = "$vent";

/// Host application the plugin installs into.
pub trait Host {
    /// Expose `broker` as an ambient property named `name`.
    fn provide(&mut self, name: &'static str, broker: Arc<Broker>);
}

/// Identity of a component instance, used to find its tokens on deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A component whose listeners are wired on activation and unwired on
/// deactivation.
pub trait Component: Send + Sync + 'static {
    fn id(&self) -> ComponentId;

    /// Resolve a handler by method name, bound to this instance.
    fn method(self: &Arc<Self>, _name: &str) -> Option<Handler> {
        None
    }
}

/// Function receiving the component it is bound to.
pub type ComponentFn<C> = Arc<dyn Fn(&C, &Broker, &[Value]) -> HandlerResult + Send + Sync>;

/// Right-hand side of a listener entry.
pub enum Binding<C> {
    Inline(ComponentFn<C>),
    /// Looked up through [`Component::method`] at activation.
    Method(String),
}

impl<C: Component> Binding<C> {
    fn bind(&self, instance: &Arc<C>) -> Option<Handler> {
        match self {
            Self::Inline(f) => {
                let f = f.clone();
                let instance = instance.clone();
                let handler: Handler = Arc::new(move |broker: &Broker, args: &[Value]| {
                    f(&instance, broker, args)
                });
                Some(handler)
            }
            Self::Method(name) => instance.method(name),
        }
    }
}

impl<C> Clone for Binding<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Inline(f) => Self::Inline(f.clone()),
            Self::Method(name) => Self::Method(name.clone()),
        }
    }
}

impl<C> fmt::Debug for Binding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(..)"),
            Self::Method(name) => f.debug_tuple("Method").field(name).finish(),
        }
    }
}

/// Declarative `channelEvent → handler` map of a component.
///
/// Keys are unique; inserting an existing key replaces its binding in place.
pub struct Listeners<C> {
    entries: Vec<(String, Binding<C>)>,
}

impl<C> Listeners<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn inline<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Broker, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(key.into(), Binding::Inline(Arc::new(f)));
        self
    }

    pub fn method(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.insert(key.into(), Binding::Method(name.into()));
        self
    }

    pub fn insert(&mut self, key: String, binding: Binding<C>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = binding,
            None => self.entries.push((key, binding)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding<C>)> {
        self.entries.iter().map(|(k, b)| (k.as_str(), b))
    }
}

impl<C> Clone for Listeners<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<C> fmt::Debug for Listeners<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, b)| (k, b)))
            .finish()
    }
}

impl<C> Default for Listeners<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires component lifecycles to a broker.
///
/// `activate` subscribes a component's listeners bound to the instance and
/// remembers the tokens; `deactivate` removes exactly those subscriptions.
pub struct VentPlugin {
    broker: Arc<Broker>,
    installed: AtomicBool,
    /// component → (key, token) in registration order
    active: Mutex<HashMap<ComponentId, Vec<(String, Token)>>>,
}

impl VentPlugin {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            installed: AtomicBool::new(false),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Expose the broker to `host`. Returns false, doing nothing, if this
    /// plugin was already installed.
    pub fn install<H: Host + ?Sized>(&self, host: &mut H) -> bool {
        if self.installed.swap(true, Ordering::AcqRel) {
            tracing::debug!("vent plugin already installed");
            return false;
        }
        host.provide(GLOBAL_PROPERTY, self.broker.clone());
        true
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Subscribe every listener of `instance`. Returns how many were added.
    ///
    /// If a method binding cannot be resolved, the subscriptions made so far
    /// by this call are removed again and
    /// [`VentError::InvalidHandler`](crate::VentError::InvalidHandler) is returned.
    pub fn activate<C: Component>(
        &self,
        instance: &Arc<C>,
        listeners: &Listeners<C>,
    ) -> Result<usize> {
        let id = instance.id();
        let mut tokens = Vec::with_capacity(listeners.len());

        for (key, binding) in listeners.iter() {
            match self.broker.on_with(key, binding.bind(instance)) {
                Ok(token) => tokens.push((key.to_string(), token)),
                Err(err) => {
                    tracing::warn!(component = %id, key, error = %err, "activation rolled back");
                    for (key, token) in &tokens {
                        self.broker.off(key, Some(token));
                    }
                    return Err(err);
                }
            }
        }

        let added = tokens.len();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .extend(tokens);
        tracing::debug!(component = %id, listeners = added, "component activated");
        Ok(added)
    }

    /// Remove every subscription made for `id`. Returns how many were removed;
    /// unknown components are a no-op.
    pub fn deactivate(&self, id: ComponentId) -> usize {
        let tokens = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .unwrap_or_default();

        for (key, token) in &tokens {
            self.broker.off(key, Some(token));
        }
        if !tokens.is_empty() {
            tracing::debug!(component = %id, listeners = tokens.len(), "component deactivated");
        }
        tokens.len()
    }

    pub fn is_active(&self, id: ComponentId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

impl Default for VentPlugin {
    /// A plugin over the process-wide broker.
    fn default() -> Self {
        Self::new(Broker::global())
    }
}

impl fmt::Debug for VentPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VentPlugin")
            .field("installed", &self.is_installed())
            .finish_non_exhaustive()
    }
}
