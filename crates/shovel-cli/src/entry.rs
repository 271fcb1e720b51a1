//! Entry module registry: maps the `entry` path named on the command
//! line to the `EntryModule` that runs inside each worker. A real
//! deployment links its own worker script crate and registers it here
//! before calling [`EntryRegistry::get`]; this binary ships only the
//! `echo` entry used for smoke-testing `develop`/`build` themselves.

use shovel_common::{Result, ShovelError};
use shovel_sw::Response;
use shovel_worker::{EntryModule, GlobalScope};
use std::collections::HashMap;
use std::sync::Arc;

type EntryConstructor = Box<dyn Fn() -> EntryModule + Send + Sync>;

pub struct EntryRegistry {
    constructors: HashMap<String, EntryConstructor>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register("echo", Box::new(echo_entry));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: EntryConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn get(&self, name: &str) -> Result<EntryModule> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ShovelError::ConfigInvalid(format!("no entry module named \"{name}\"")))?;
        Ok(constructor())
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Responds `200 ok` to every fetch; registers nothing for
/// install/activate. Useful for proving the runtime boots end to end
/// without a real worker script.
fn echo_entry() -> EntryModule {
    Box::new(|global: Arc<GlobalScope>| {
        Box::pin(async move {
            global
                .registration
                .add_fetch_listener(Box::new(|event| {
                    event
                        .respond_with(Box::pin(async { Response::text(200, "ok") }))
                        .unwrap();
                }))
                .await;
        })
    })
}
