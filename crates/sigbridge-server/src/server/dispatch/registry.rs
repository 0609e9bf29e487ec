//! Action registry.
//!
//! The registry is assembled once at startup from a list of
//! [`BackgroundModule`]s and never changes afterwards, so it can be shared
//! across tasks without locking. Names are validated at assembly: two modules
//! under one name fail fast instead of one silently shadowing the other.

use crate::server::wallet::{Permission, origin_of};
use futures::future::BoxFuture;
use serde_json::Value;
use sigbridge_core::{
    address::SenderMeta,
    error::{DispatchError, ModuleError},
};
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

/// The caller of a module: the context that sent the API call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub sender: SenderMeta,
}

impl Connection {
    pub const fn new(sender: SenderMeta) -> Self {
        Self { sender }
    }

    pub fn url(&self) -> Option<&str> {
        self.sender.url.as_deref()
    }

    /// Origin of the page behind the caller, if it has one.
    pub fn origin(&self) -> Option<String> {
        self.url().and_then(origin_of)
    }
}

pub type ModuleFuture = BoxFuture<'static, Result<Value, ModuleError>>;

/// A module's handler, callable with a connection and positional params.
#[derive(Clone)]
pub struct ModuleFunction(Arc<dyn Fn(Connection, Vec<Value>) -> ModuleFuture + Send + Sync>);

impl ModuleFunction {
    /// Wraps a handler that answers immediately.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Connection, Vec<Value>) -> Result<Value, ModuleError> + Send + Sync + 'static,
    {
        Self(Arc::new(move |connection, params| {
            Box::pin(futures::future::ready(f(&connection, params)))
        }))
    }

    /// Wraps a handler whose answer is itself asynchronous.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Connection, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ModuleError>> + Send + 'static,
    {
        Self(Arc::new(move |connection, params| {
            Box::pin(f(connection, params))
        }))
    }

    pub fn call(&self, connection: Connection, params: Vec<Value>) -> ModuleFuture {
        (self.0)(connection, params)
    }
}

impl core::fmt::Debug for ModuleFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ModuleFunction")
    }
}

/// An action name, its metadata and its handler.
#[derive(Clone, Debug)]
pub struct BackgroundModule {
    pub name: String,
    /// Permissions the calling application must hold.
    pub permissions: Vec<Permission>,
    pub function: ModuleFunction,
}

impl BackgroundModule {
    pub fn new(
        name: impl Into<String>,
        permissions: impl Into<Vec<Permission>>,
        function: ModuleFunction,
    ) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into(),
            function,
        }
    }
}

#[derive(Debug)]
pub struct ModuleRegistry {
    modules: HashMap<String, BackgroundModule>,
}

impl ModuleRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateAction`] for the first name that
    /// appears twice.
    pub fn new(modules: impl IntoIterator<Item = BackgroundModule>) -> Result<Self, DispatchError> {
        let mut registry = HashMap::new();
        for module in modules {
            match registry.entry(module.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(DispatchError::DuplicateAction {
                        action: module.name,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(module);
                }
            }
        }
        Ok(Self { modules: registry })
    }

    pub fn get(&self, action: &str) -> Option<&BackgroundModule> {
        self.modules.get(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Runs the handler registered under exactly `action`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownAction`] if nothing is registered under
    /// `action`; otherwise the handler's own error, unchanged.
    pub async fn dispatch(
        &self,
        connection: Connection,
        action: &str,
        params: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        let module = self.get(action).ok_or_else(|| DispatchError::UnknownAction {
            action: action.to_string(),
        })?;
        Ok(module.function.call(connection, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(name: &str) -> BackgroundModule {
        BackgroundModule::new(
            name,
            [],
            ModuleFunction::sync(|_, params| Ok(Value::Array(params))),
        )
    }

    fn connection() -> Connection {
        Connection::new(SenderMeta::new("content_script", Some(1)).with_url("https://a.example/p"))
    }

    #[test]
    fn duplicate_names_fail_at_assembly() {
        let err = ModuleRegistry::new([echo("a"), echo("b"), echo("a")]).unwrap_err();
        assert_eq!(
            err,
            DispatchError::DuplicateAction {
                action: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let registry = ModuleRegistry::new([echo("a")]).unwrap();
        assert_eq!(
            registry.dispatch(connection(), "A", vec![]).await,
            Err(DispatchError::UnknownAction {
                action: "A".to_string()
            })
        );
    }

    #[tokio::test]
    async fn dispatches_sync_and_async_handlers() {
        let slow = BackgroundModule::new(
            "slow",
            [],
            ModuleFunction::asynchronous(|connection: Connection, _| async move {
                tokio::task::yield_now().await;
                Ok(json!(connection.origin()))
            }),
        );
        let registry = ModuleRegistry::new([echo("echo"), slow]).unwrap();
        assert_eq!(registry.len(), 2);

        assert_eq!(
            registry.dispatch(connection(), "echo", vec![json!(1), json!("x")]).await,
            Ok(json!([1, "x"]))
        );
        assert_eq!(
            registry.dispatch(connection(), "slow", vec![]).await,
            Ok(json!("https://a.example"))
        );
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let failing = BackgroundModule::new(
            "fail",
            [],
            ModuleFunction::sync(|_, _| Err(ModuleError::NoActiveWallet)),
        );
        let registry = ModuleRegistry::new([failing]).unwrap();
        assert_eq!(
            registry.dispatch(connection(), "fail", vec![]).await,
            Err(DispatchError::Module(ModuleError::NoActiveWallet))
        );
    }
}
