//! Swappable observability hooks.
//!
//! Each hook lives behind its own [`ArcSwapOption`], so registering or
//! replacing one never blocks traffic and never takes a lock. An invocation
//! already in flight keeps the hook it loaded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::net::state::ConnState;
use crate::net::stream::Addr;
use crate::server::error::ServerError;

/// Receives every reported error.
pub type ErrorFn = dyn Fn(&ServerError) + Send + Sync;
/// Receives per-connection state changes: `(local, remote, state)`.
pub type InfoFn = dyn Fn(&Addr, &Addr, ConnState) + Send + Sync;
/// Receives server lifecycle messages.
pub type ServerInfoFn = dyn Fn(&str) + Send + Sync;

// arc-swap needs a sized pointee, hence the wrappers.
struct ErrorHook(Box<ErrorFn>);
struct InfoHook(Box<InfoFn>);
struct ServerInfoHook(Box<ServerInfoFn>);

#[derive(Default)]
pub struct Callbacks {
    error: ArcSwapOption<ErrorHook>,
    info: ArcSwapOption<InfoHook>,
    server_info: ArcSwapOption<ServerInfoHook>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("error", &self.error.load().is_some())
            .field("info", &self.info.load().is_some())
            .field("server_info", &self.server_info.load().is_some())
            .finish()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error(&self, hook: Option<Box<ErrorFn>>) {
        self.error.store(hook.map(|f| Arc::new(ErrorHook(f))));
    }

    pub fn set_info(&self, hook: Option<Box<InfoFn>>) {
        self.info.store(hook.map(|f| Arc::new(InfoHook(f))));
    }

    pub fn set_server_info(&self, hook: Option<Box<ServerInfoFn>>) {
        self.server_info.store(hook.map(|f| Arc::new(ServerInfoHook(f))));
    }

    pub fn error(&self, error: &ServerError) {
        if let Some(hook) = self.error.load_full() {
            guarded("error", || (hook.0)(error));
        }
    }

    pub fn info(&self, local: &Addr, remote: &Addr, state: ConnState) {
        if let Some(hook) = self.info.load_full() {
            guarded("info", || (hook.0)(local, remote, state));
        }
    }

    pub fn server_info(&self, message: &str) {
        if let Some(hook) = self.server_info.load_full() {
            guarded("server_info", || (hook.0)(message));
        }
    }
}

/// Run a user hook, containing any panic it raises.
fn guarded(hook: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(hook, "Callback panicked; ignoring");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr() -> Addr {
        Addr::Tcp("127.0.0.1:1".parse().unwrap())
    }

    #[test]
    fn unset_hooks_are_noops() {
        let callbacks = Callbacks::new();
        callbacks.error(&ServerError::Gone);
        callbacks.info(&addr(), &addr(), ConnState::New);
        callbacks.server_info("hello");
    }

    #[test]
    fn hooks_can_be_swapped_and_cleared() {
        let callbacks = Callbacks::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        callbacks.set_server_info(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        callbacks.server_info("a");

        let counter = second.clone();
        callbacks.set_server_info(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        callbacks.server_info("b");
        callbacks.server_info("c");

        callbacks.set_server_info(None);
        callbacks.server_info("d");

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_hook_is_contained() {
        let callbacks = Callbacks::new();
        callbacks.set_info(Some(Box::new(|_, _, _| panic!("observer bug"))));
        callbacks.info(&addr(), &addr(), ConnState::Close);
    }

    #[test]
    fn panic_payload_text() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }
}
