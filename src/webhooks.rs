//! Pluggable notification registry. A rule's `webhook: [kind, recipient,
//! message?]` action resolves `kind` here; unknown kinds are logged and
//! swallowed so a misconfigured rule cannot take down the ingest loop.

use std::collections::HashMap;

use tracing::{error, warn};

/// Handler contract: deliver `message` to `recipient`, report success.
pub type WebhookHandler = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Default)]
pub struct WebhookRegistry {
    handlers: HashMap<String, WebhookHandler>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: &str, handler: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.handlers.insert(kind.to_string(), Box::new(handler));
    }

    /// Dispatch to the handler for `kind`. Returns false when no handler is
    /// registered or the handler reports failure; the core never retries.
    pub fn send(&self, kind: &str, recipient: &str, message: &str) -> bool {
        let Some(handler) = self.handlers.get(kind) else {
            warn!(
                "webhook kind '{}' not registered (skipping); available: {:?}",
                kind,
                self.handlers.keys().collect::<Vec<_>>()
            );
            return false;
        };
        let ok = handler(recipient, message);
        if !ok {
            error!("webhook '{kind}' to '{recipient}' reported failure");
        }
        ok
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispatch() {
        let sent = Arc::new(AtomicU32::new(0));
        let s = sent.clone();
        let mut reg = WebhookRegistry::new();
        reg.register("pager", move |_rcpt, _msg| {
            s.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(reg.send("pager", "oncall", "two aircraft converging"));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_kind_swallowed() {
        let reg = WebhookRegistry::new();
        assert!(!reg.send("discord", "chan", "msg"));
    }

    #[test]
    fn test_handler_failure_propagates() {
        let mut reg = WebhookRegistry::new();
        reg.register("flaky", |_r, _m| false);
        assert!(!reg.send("flaky", "x", "y"));
    }
}
