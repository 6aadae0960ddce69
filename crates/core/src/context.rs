//! Per-request context threaded explicitly through call chains.
//!
//! [`RequestContext`] is created once per inbound logical request and passed
//! down as an argument to whatever needs ambient request identity. It is a
//! plain value, not task-local storage, so ownership of the context is always
//! visible at the call site.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context slot key under which the authenticated user is stored.
const USER_KEY: &str = "_user";

/// The authenticated principal attached to a request, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    /// The user's id as carried in their token.
    pub id: String,
    /// Display name, when the token carries one.
    pub username: Option<String>,
    /// Role name (e.g. `"Admin"`, `"User"`).
    pub role: String,
    /// Whether this is an internal service principal rather than a person.
    pub internal: bool,
}

/// A read/write key-value slot scoped to one logical request.
///
/// Each context gets a fresh `request_id` at construction, and arbitrary
/// values can be stashed under string keys. The authenticated user has typed
/// accessors but lives in the same slot map as everything else.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    values: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    /// Create an empty context with a fresh request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            values: HashMap::new(),
        }
    }

    /// The unique id assigned to this request at context creation.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Read the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// The authenticated user attached to this request, if any.
    pub fn user(&self) -> Option<AuthUser> {
        self.values
            .get(USER_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Attach the authenticated user to this request.
    pub fn set_user(&mut self, user: &AuthUser) {
        // AuthUser serialization cannot fail: all fields are plain data.
        if let Ok(value) = serde_json::to_value(user) {
            self.values.insert(USER_KEY.to_string(), value);
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
