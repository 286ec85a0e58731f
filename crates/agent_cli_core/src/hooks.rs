//! Permission-callback and hook-callback types (§4.D reverse dispatch).
//!
//! Callbacks are trait objects behind `Arc` rather than a generic
//! parameter, matching the teacher's `NotificationHook` fan-out sinks
//! in `codex/src/mcp/jsonrpc.rs` (there an `Arc<Mutex<Vec<Sender<_>>>>`
//! per event kind; here a single registered callback per concern,
//! since this crate has exactly one permission gate and an ordered
//! hook list rather than an open subscriber set).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Payload handed to a registered permission callback for a
/// `can_use_tool` reverse request.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: Map<String, Value>,
    pub tool_permission_context: Value,
}

/// A permission callback's verdict. Serializes into the `response`
/// payload of the `ControlResponse` success envelope (§8 scenario 5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Value>,
    },
    Deny {
        message: String,
    },
}

impl PermissionDecision {
    pub fn allow() -> Self {
        PermissionDecision::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        PermissionDecision::Deny {
            message: message.into(),
        }
    }
}

pub type PermissionCallback =
    Arc<dyn Fn(PermissionRequest) -> BoxFuture<PermissionDecision> + Send + Sync>;

/// Payload handed to a matching hook callback for a `hook_callback`
/// reverse request.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    pub event: String,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub input: Value,
}

/// A hook callback's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HookDecision {
    Approve,
    Deny { reason: String },
    Modify { input: Value },
}

pub type HookCallback = Arc<dyn Fn(HookInput) -> BoxFuture<HookDecision> + Send + Sync>;

/// One hook registration: an event name plus an optional tool-name
/// matcher, matching the spec's "hook registration matching the event
/// name and optional tool-name matcher" (§4.D step 2).
#[derive(Clone)]
pub struct HookRegistration {
    pub event: String,
    pub tool_name_matcher: Option<String>,
    pub callback: HookCallback,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("event", &self.event)
            .field("tool_name_matcher", &self.tool_name_matcher)
            .finish_non_exhaustive()
    }
}

impl HookRegistration {
    pub fn matches(&self, event: &str, tool_name: Option<&str>) -> bool {
        if self.event != event {
            return false;
        }
        match (&self.tool_name_matcher, tool_name) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
        }
    }
}

/// Ordered collection of hook registrations; first match wins.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    registrations: Vec<HookRegistration>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: HookRegistration) {
        self.registrations.push(registration);
    }

    pub fn find(&self, event: &str, tool_name: Option<&str>) -> Option<&HookRegistration> {
        self.registrations
            .iter()
            .find(|reg| reg.matches(event, tool_name))
    }

    /// Distinct event names registered, for the `initialize` control
    /// request's `hooks` field (§4.D outbound subtypes).
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registrations
            .iter()
            .map(|reg| reg.event.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> HookCallback {
        Arc::new(|_input| Box::pin(async { HookDecision::Approve }))
    }

    #[test]
    fn tool_name_matcher_restricts_match() {
        let mut registry = HookRegistry::new();
        registry.register(HookRegistration {
            event: "pre_tool_use".to_string(),
            tool_name_matcher: Some("Bash".to_string()),
            callback: noop_callback(),
        });

        assert!(registry.find("pre_tool_use", Some("Bash")).is_some());
        assert!(registry.find("pre_tool_use", Some("Write")).is_none());
        assert!(registry.find("post_tool_use", Some("Bash")).is_none());
    }

    #[test]
    fn missing_matcher_matches_any_tool() {
        let mut registry = HookRegistry::new();
        registry.register(HookRegistration {
            event: "pre_tool_use".to_string(),
            tool_name_matcher: None,
            callback: noop_callback(),
        });
        assert!(registry.find("pre_tool_use", Some("anything")).is_some());
        assert!(registry.find("pre_tool_use", None).is_some());
    }
}
