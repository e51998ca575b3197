//! Processors available to scripts through `function:`.

use std::time::{SystemTime, UNIX_EPOCH};

use ekoload_core::{Error, FnProcessor, Processors, Vars};
use serde_json::Value;

/// Sets `timestamp` to the current Unix time in milliseconds.
pub(crate) const TIMESTAMP: &str = "timestamp";
/// Sets `uuid` to a fresh random UUID.
pub(crate) const UUID: &str = "uuid";

pub(crate) fn builtin() -> Processors {
    Processors::new()
        .with(TIMESTAMP, FnProcessor(timestamp))
        .with(UUID, FnProcessor(uuid))
}

/// Names listed in `config.processor` that nothing registers.
pub(crate) fn missing<'a>(registry: &Processors, declared: &'a [String]) -> Vec<&'a str> {
    declared
        .iter()
        .filter(|name| registry.get(name).is_none())
        .map(String::as_str)
        .collect()
}

fn timestamp(vars: &mut Vars) -> ekoload_core::Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::processor(format!("system clock before unix epoch: {e}")))?;
    let millis = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
    vars.insert(TIMESTAMP.to_string(), Value::from(millis));
    Ok(())
}

fn uuid(vars: &mut Vars) -> ekoload_core::Result<()> {
    vars.insert(
        UUID.to_string(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );
    Ok(())
}
