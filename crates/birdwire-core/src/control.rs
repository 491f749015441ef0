//! Stream control messages.
//!
//! A control message reports the session settings of a stream connection and the
//! users it currently follows:
//!
//! ```text
//! { "info": { "include_followings_activity": bool?, "include_user_changes": bool?,
//!             "replies": string?, "with": string?, "users": [ {..}, .. ] } }
//! ```

use std::{fmt, sync::Arc};

use serde::Serialize;
use serde_json::Value;

use crate::{
    errors::Error,
    parse::{as_object, get_bool, get_raw_string, require_array, require_object},
    raw_json::RawJsonScope,
    user::UserResolver,
    Result,
};

/// Decoded control message. Immutable once built.
///
/// Equality and hashing are structural; raw JSON recorded for a message does
/// not take part in either.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ControlMessage<U> {
    users: Vec<Arc<U>>,
    include_followings_activity: bool,
    include_user_changes: bool,
    replies: Option<String>,
    with: Option<String>,
}

impl<U> ControlMessage<U> {
    /// Users in payload order.
    pub fn users(&self) -> &[Arc<U>] {
        &self.users
    }

    pub fn include_followings_activity(&self) -> bool {
        self.include_followings_activity
    }

    pub fn include_user_changes(&self) -> bool {
        self.include_user_changes
    }

    pub fn replies(&self) -> Option<&str> {
        self.replies.as_deref()
    }

    pub fn with(&self) -> Option<&str> {
        self.with.as_deref()
    }
}

impl<U: fmt::Debug> fmt::Display for ControlMessage<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "control message: users={:?}, include_followings_activity={}, include_user_changes={}, replies={}, with={}",
            self.users,
            self.include_followings_activity,
            self.include_user_changes,
            self.replies.as_deref().unwrap_or("-"),
            self.with.as_deref().unwrap_or("-"),
        )
    }
}

/// Decode a control message without recording raw JSON.
pub fn decode_control_message<R: UserResolver>(
    json: &Value,
    resolver: &R,
) -> Result<ControlMessage<R::User>> {
    let (message, _) = extract(json, resolver)?;
    Ok(message)
}

/// Builds the message and keeps each user's source subtree alongside it.
///
/// Nothing is registered here, so a failure part way leaves no trace.
fn extract<'j, R: UserResolver>(
    json: &'j Value,
    resolver: &R,
) -> Result<(ControlMessage<R::User>, &'j [Value])> {
    let root = as_object(json, "control message")?;
    let info = require_object(root, "info")?;

    let include_followings_activity = get_bool(info, "include_followings_activity");
    let include_user_changes = get_bool(info, "include_user_changes");
    let replies = get_raw_string(info, "replies");
    let with = get_raw_string(info, "with");

    let users_json = require_array(info, "users")?;
    let mut users = Vec::with_capacity(users_json.len());
    for (idx, user_json) in users_json.iter().enumerate() {
        if !user_json.is_object() {
            return Err(Error::Parse(format!("users[{idx}] is not an object")));
        }
        users.push(Arc::new(resolver.resolve(user_json)?));
    }

    let message = ControlMessage {
        users,
        include_followings_activity,
        include_user_changes,
        replies,
        with,
    };
    Ok((message, users_json.as_slice()))
}

/// Control message decoder with optional raw JSON recording.
///
/// With a scope attached, a successful decode registers the message against its
/// source text and each user against its element of the `users` array.
pub struct ControlMessageDecoder<'a, R> {
    resolver: &'a R,
    scope: Option<&'a RawJsonScope>,
}

impl<'a, R: UserResolver> ControlMessageDecoder<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self {
            resolver,
            scope: None,
        }
    }

    pub fn with_raw_json(mut self, scope: &'a RawJsonScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Drop the attached scope unless `enabled` (driven by `json_store_enabled`).
    pub fn with_raw_json_enabled(mut self, enabled: bool) -> Self {
        if !enabled {
            self.scope = None;
        }
        self
    }

    pub fn records_raw_json(&self) -> bool {
        self.scope.is_some()
    }

    pub fn decode(&self, json: &Value) -> Result<Arc<ControlMessage<R::User>>> {
        self.decode_with_source(json, None)
    }

    /// Parse `text` and decode it. The text itself is what gets recorded.
    pub fn decode_str(&self, text: &str) -> Result<Arc<ControlMessage<R::User>>> {
        let json: Value = serde_json::from_str(text)
            .map_err(|e| Error::Parse(format!("malformed control message: {e}")))?;
        self.decode_with_source(&json, Some(text))
    }

    fn decode_with_source(
        &self,
        json: &Value,
        source: Option<&str>,
    ) -> Result<Arc<ControlMessage<R::User>>> {
        let (message, users_json) = extract(json, self.resolver)?;
        tracing::debug!(
            users = message.users.len(),
            include_user_changes = message.include_user_changes,
            include_followings_activity = message.include_followings_activity,
            "decoded control message"
        );

        let message = Arc::new(message);
        let Some(scope) = self.scope else {
            return Ok(message);
        };

        for (user, user_json) in message.users.iter().zip(users_json) {
            scope.register(Arc::clone(user), user_json.to_string());
        }
        let raw = match source {
            Some(text) => text.to_string(),
            None => json.to_string(),
        };
        Ok(scope.register(message, raw))
    }
}
