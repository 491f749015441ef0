use std::{fmt::Debug, hash::Hash};

use serde::Serialize;
use serde_json::Value;

use crate::{
    domain::UserId,
    parse::{as_object, require_i64, require_str},
    Result,
};

/// Turns one element of a payload's `users` array into a typed user reference.
///
/// Errors returned here reach the caller of the decoder unchanged.
pub trait UserResolver {
    type User: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn resolve(&self, json: &Value) -> Result<Self::User>;
}

impl<U, F> UserResolver for F
where
    F: Fn(&Value) -> Result<U>,
    U: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    type User = U;

    fn resolve(&self, json: &Value) -> Result<U> {
        self(json)
    }
}

/// A user referenced by a stream control message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct StreamUser {
    id: UserId,
    name: String,
}

impl StreamUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for StreamUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Default resolver: reads `id` and `name`, both required.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamUserResolver;

impl UserResolver for StreamUserResolver {
    type User = StreamUser;

    fn resolve(&self, json: &Value) -> Result<StreamUser> {
        let obj = as_object(json, "user")?;
        let id = require_i64(obj, "id")?;
        let name = require_str(obj, "name")?;
        Ok(StreamUser::new(UserId(id), name))
    }
}
