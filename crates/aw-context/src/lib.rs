//! Request-context carrier.
//!
//! Thread-safe, cooperative-concurrency-safe storage of `{request_id,
//! actor_id, peer_id}`. Built on [`tokio::task_local!`] so that each
//! suspended task sees its own view: the context lives in the task that
//! calls [`scope`], and a task spawned from inside that scope does *not*
//! automatically inherit it — callers that want inheritance take an
//! explicit [`snapshot`] and re-enter it with [`scope`] inside the child
//! task. This makes the inheritance point visible at every `tokio::spawn`
//! call site instead of leaking across task boundaries implicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static CONTEXT: RefCell<ContextSlots>;
}

/// The three request-scoped identifiers, independently settable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSlots {
    pub request_id: Option<String>,
    pub actor_id: Option<String>,
    pub peer_id: Option<String>,
}

/// Generate a new UUIDv4 request id.
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn with_slots<R>(f: impl FnOnce(&mut ContextSlots) -> R) -> Option<R> {
    CONTEXT.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

fn read_slots<R>(f: impl FnOnce(&ContextSlots) -> R) -> Option<R> {
    CONTEXT.try_with(|cell| f(&cell.borrow())).ok()
}

/// Set the request id for the current task's context. A no-op outside a [`scope`].
pub fn set_request_id(request_id: Option<String>) {
    with_slots(|s| s.request_id = request_id);
}

/// Get the request id for the current task's context, or `None` if unset or unscoped.
#[must_use]
pub fn get_request_id() -> Option<String> {
    read_slots(|s| s.request_id.clone()).flatten()
}

/// Set the actor id for the current task's context.
pub fn set_actor_id(actor_id: Option<String>) {
    with_slots(|s| s.actor_id = actor_id);
}

/// Get the actor id for the current task's context.
#[must_use]
pub fn get_actor_id() -> Option<String> {
    read_slots(|s| s.actor_id.clone()).flatten()
}

/// Set the peer id for the current task's context.
pub fn set_peer_id(peer_id: Option<String>) {
    with_slots(|s| s.peer_id = peer_id);
}

/// Get the peer id for the current task's context.
#[must_use]
pub fn get_peer_id() -> Option<String> {
    read_slots(|s| s.peer_id.clone()).flatten()
}

/// Last 8 characters of the request id with hyphens stripped, or `"-"` if unset.
#[must_use]
pub fn get_short_request_id() -> String {
    match get_request_id() {
        Some(id) if !id.is_empty() => {
            let stripped: String = id.chars().filter(|c| *c != '-').collect();
            let len = stripped.len();
            stripped[len.saturating_sub(8)..].to_string()
        }
        _ => "-".to_string(),
    }
}

/// The substring of the peer id after its final `:`, or the whole id if there is none.
/// `"-"` if unset.
#[must_use]
pub fn get_short_peer_id() -> String {
    match get_peer_id() {
        Some(id) if !id.is_empty() => id
            .rsplit(':')
            .next()
            .unwrap_or(id.as_str())
            .to_string(),
        _ => "-".to_string(),
    }
}

/// Set all three context values at once. Generates a fresh request id when
/// `request_id` is `None` and `generate_id` is true. Returns the request id
/// that was set (empty string if none was set and none was generated).
pub fn set_request_context(
    request_id: Option<String>,
    actor_id: Option<String>,
    peer_id: Option<String>,
    generate_id: bool,
) -> String {
    let resolved_request_id = match request_id {
        Some(id) => Some(id),
        None if generate_id => Some(generate_request_id()),
        None => None,
    };
    let out = resolved_request_id.clone().unwrap_or_default();
    with_slots(|s| {
        s.request_id = resolved_request_id;
        s.actor_id = actor_id;
        s.peer_id = peer_id;
    });
    out
}

/// Clear all three context values for the current task.
pub fn clear_request_context() {
    with_slots(|s| *s = ContextSlots::default());
}

/// Snapshot all context values as a map, for structured logging.
#[must_use]
pub fn as_dict() -> HashMap<&'static str, Option<String>> {
    let slots = read_slots(Clone::clone).unwrap_or_default();
    HashMap::from([
        ("request_id", slots.request_id),
        ("actor_id", slots.actor_id),
        ("peer_id", slots.peer_id),
    ])
}

/// Format as `"[<short_request_id>:<actor_id>:<short_peer_id>]"`, substituting
/// `-` for each missing slot.
#[must_use]
pub fn format_compact() -> String {
    let actor = get_actor_id().unwrap_or_else(|| "-".to_string());
    format!(
        "[{}:{}:{}]",
        get_short_request_id(),
        actor,
        get_short_peer_id()
    )
}

/// Take a snapshot of the current task's context, to be re-entered via
/// [`scope`] inside a spawned child task.
#[must_use]
pub fn snapshot() -> ContextSlots {
    read_slots(Clone::clone).unwrap_or_default()
}

/// Run `fut` with `slots` installed as the task-local context. Any nested
/// `tokio::spawn` inside `fut` starts with an empty context unless it also
/// calls `scope` with an explicit [`snapshot`].
pub async fn scope<F: Future>(slots: ContextSlots, fut: F) -> F::Output {
    CONTEXT.scope(RefCell::new(slots), fut).await
}
