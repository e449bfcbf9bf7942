use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{Error, RemoteError};

/// What a registered function produces: a value shipped back as the response
/// result, or a [`RemoteError`] shipped back as the response error.
pub type HandlerResult = std::result::Result<Value, RemoteError>;

/// Type-erased registered function. Shared with the execution task that runs
/// it, so the registry entry survives concurrent invocations.
pub(crate) type BoxedHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Locally exposed procedures, by name. Registration is one-shot and
/// permanent: there is no unregister, and a taken name stays taken.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    functions: HashMap<String, BoxedHandler>,
}

impl FunctionRegistry {
    pub fn register(&mut self, name: String, handler: BoxedHandler) -> crate::Result<()> {
        match self.functions.entry(name) {
            Entry::Occupied(taken) => Err(Error::DuplicateRegistration {
                name: taken.key().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxedHandler> {
        self.functions.get(name)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys())
            .finish()
    }
}
