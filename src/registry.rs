//! Handler registry and the seeded execution context
//!
//! Module business logic plugs in through [`ModuleHandler`]: a pure
//! function of (seed, payload, pre-state). Handlers never see a clock,
//! unseeded randomness, or live ledger state. Client-generated values that
//! are inherently nondeterministic (encryption nonces and the like) must
//! arrive as explicit payload fields; the engine treats them as opaque and
//! never regenerates them.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;

use crate::canonical;
use crate::error::{ConfigurationError, EngineError, ValidationError};
use crate::types::{LedgerDelta, LedgerKey, StateSnapshot};

/// Controlled environment handed to a handler for one application.
///
/// Randomness is a ChaCha8 stream seeded from the recorded run seed, and
/// stdout lines are captured into the bundle, so both replay identically.
#[derive(Debug)]
pub struct ExecutionContext {
    seed: u64,
    rng: ChaCha8Rng,
    stdout: String,
}

impl ExecutionContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stdout: String::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seeded random stream for this run
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Append one line to the run's stdout capture
    pub fn emit(&mut self, line: impl AsRef<str>) {
        self.stdout.push_str(line.as_ref());
        self.stdout.push('\n');
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn into_stdout(self) -> String {
        self.stdout
    }
}

/// Result of one handler application
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub outputs: Value,
    pub deltas: Vec<LedgerDelta>,
}

/// A pure business handler for one (module, action) pair
pub trait ModuleHandler: Send + Sync {
    /// The ledger keys this handler may read or write for the given
    /// payload. The executor snapshots exactly these keys into the run's
    /// recorded inputs, and the handler sees nothing outside them.
    fn footprint(&self, payload: &Value) -> Result<Vec<LedgerKey>, ValidationError>;

    /// Apply the action. Must be a pure function of the context seed, the
    /// payload, and the pre-state snapshot.
    fn apply(
        &self,
        ctx: &mut ExecutionContext,
        payload: &Value,
        pre_state: &StateSnapshot,
    ) -> Result<HandlerOutcome, EngineError>;
}

/// Registry mapping (module, action) to handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<(String, String), Box<dyn ModuleHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a duplicate (module, action) pair is rejected
    pub fn register(
        &mut self,
        module: &str,
        action: &str,
        handler: Box<dyn ModuleHandler>,
    ) -> Result<(), ConfigurationError> {
        let key = (module.to_string(), action.to_string());
        if self.handlers.contains_key(&key) {
            return Err(ConfigurationError::DuplicateHandler {
                module: module.to_string(),
                action: action.to_string(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn get(&self, module: &str, action: &str) -> Option<&dyn ModuleHandler> {
        self.handlers
            .get(&(module.to_string(), action.to_string()))
            .map(|h| h.as_ref())
    }

    /// Digest of the sorted handler catalog; part of the protocol anchor
    pub fn catalog_digest(&self) -> String {
        let catalog: Vec<String> = self
            .handlers
            .keys()
            .map(|(module, action)| format!("{}/{}", module, action))
            .collect();
        canonical::digest(catalog.join("\n").as_bytes())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
