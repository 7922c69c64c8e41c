use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared by every broker so tokens stay unique process-wide.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque subscription handle returned by `on`/`once`, used for targeted `off`.
///
/// Tokens are never reused. They carry no meaning beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub(crate) fn generate(prefix: &str) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
