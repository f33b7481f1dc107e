//! Fixtures shared by the deltagraph test suites: the `Car` schema from the end-to-end
//! scenario, canned deltas and a merge strategy that records what it was asked.

use std::sync::{Arc, Mutex, Once};

use deltagraph_core::{
    Delta, Event, MergeInput, MergeOutput, MergeStrategy, ObjectChange, RepositoryConfig, Result,
    Schema, Strategies, TypeConfig, VersionManager,
};
use serde_json::Value;

pub const CAR: &str = "Car";
pub const CAR_DIMS: [&str; 5] = ["oid", "xvel", "yvel", "xpos", "ypos"];

pub fn car_schema() -> Schema {
    Schema::new().with_type(CAR, CAR_DIMS, [CAR])
}

pub fn car_config(app_name: &str) -> RepositoryConfig {
    RepositoryConfig::new(app_name).with_type(
        CAR,
        TypeConfig {
            dims: CAR_DIMS.iter().map(|dim| dim.to_string()).collect(),
            chain: vec![CAR.to_string()],
        },
    )
}

pub fn car_manager() -> VersionManager {
    VersionManager::new("server", car_schema(), Strategies::new())
}

pub fn car_manager_with(strategy: Arc<dyn MergeStrategy>) -> VersionManager {
    let mut strategies = Strategies::new();
    strategies.insert(CAR.to_string(), strategy);
    VersionManager::new("server", car_schema(), strategies)
}

/// Creation of car `oid` with every dimension set to `value`.
pub fn new_car(oid: &str, value: i64) -> Delta {
    let change = CAR_DIMS
        .iter()
        .fold(ObjectChange::new(CAR, Event::New), |change, dim| {
            change.with_dim(*dim, value)
        });
    Delta::new().with_object(CAR, oid, change)
}

/// Modification of the given dimensions of car `oid`.
pub fn modify_car(oid: &str, dims: &[(&str, i64)]) -> Delta {
    let change = dims
        .iter()
        .fold(ObjectChange::new(CAR, Event::Modification), |change, (dim, value)| {
            change.with_dim(*dim, *value)
        });
    Delta::new().with_object(CAR, oid, change)
}

pub fn delete_car(oid: &str) -> Delta {
    Delta::new().with_object(CAR, oid, ObjectChange::new(CAR, Event::Delete))
}

/// Value of `dim` on car `oid` in `delta`.
pub fn dim(delta: &Delta, oid: &str, dim: &str) -> Option<Value> {
    delta
        .object(CAR, oid)
        .and_then(|change| change.dims.get(dim).cloned())
}

type Respond = dyn Fn(&MergeInput) -> MergeOutput + Send + Sync;

/// Strategy that remembers every input and answers with `respond`.
pub struct RecordingStrategy {
    calls: Mutex<Vec<MergeInput>>,
    respond: Box<Respond>,
}

impl RecordingStrategy {
    pub fn new(respond: impl Fn(&MergeInput) -> MergeOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Remote values win every dimension both sides hold.
    pub fn remote_wins() -> Arc<Self> {
        Self::new(|input| {
            let local_patch = input.remote.as_ref().map(|remote| {
                let mut change = ObjectChange::new(input.type_name.clone(), Event::Modification);
                for (name, value) in remote {
                    if input.local.as_ref().and_then(|local| local.get(name)) != Some(value) {
                        change.dims.insert(name.clone(), value.clone());
                    }
                }
                change
            });
            let remote_patch = match (&input.local, &input.remote) {
                (Some(local), Some(remote)) => {
                    let mut change =
                        ObjectChange::new(input.type_name.clone(), Event::Modification);
                    for (name, value) in local {
                        if !remote.contains_key(name) {
                            change.dims.insert(name.clone(), value.clone());
                        }
                    }
                    Some(change)
                }
                _ => None,
            };
            MergeOutput {
                local: local_patch,
                remote: remote_patch,
            }
        })
    }

    pub fn calls(&self) -> Vec<MergeInput> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl MergeStrategy for RecordingStrategy {
    fn merge(&self, input: MergeInput) -> Result<MergeOutput> {
        let output = (self.respond)(&input);
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(input);
        Ok(output)
    }
}

/// Installs a `RUST_LOG`-filtered subscriber once per test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
