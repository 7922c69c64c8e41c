use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::broker::Broker;
use crate::error::HandlerError;

/// What a handler returns when it does not fail synchronously.
pub type HandlerResult = Result<Reply, HandlerError>;

/// A subscriber callable. The broker performing the dispatch is passed as the
/// first argument; any other context is captured by the closure.
pub type Handler = Arc<dyn Fn(&Broker, &[Value]) -> HandlerResult + Send + Sync>;

/// Return value of a handler.
///
/// `trigger` ignores replies entirely (a deferred reply is dropped without
/// being polled). `request` collects them in invocation order.
pub enum Reply {
    /// A plain value, treated as an already-resolved result.
    Ready(Value),
    /// A result that settles later. An `Err` output rejects the request.
    Deferred(BoxFuture<'static, Result<Value, HandlerError>>),
}

impl Reply {
    /// `null` reply, for handlers that only cause side effects.
    pub fn none() -> Self {
        Self::Ready(Value::Null)
    }

    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(value.into())
    }

    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Deferred(fut.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, Result<Value, HandlerError>> {
        match self {
            Self::Ready(value) => future::ready(Ok(value)).boxed(),
            Self::Deferred(fut) => fut,
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}
