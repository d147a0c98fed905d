//! Access controller
//!
//! Client reads and writes go through [`AccessController`], which enforces
//! the per-FC read and write policies, the read-only flag and exact type
//! matching. Every successful write is handed to the report engine before
//! the model lock is released.

use std::collections::BTreeMap;

use chrono::Utc;
use errors::{IedError, IedResult};
use iec61850_model::{FunctionalConstraint, IedModel, NodeId, Value};
use tracing::debug;

use crate::config::{AccessPolicy, ServerConfig};
use crate::report::ReportEngine;

/// Per-FC access policies
///
/// Reads are allowed and writes denied unless a policy says otherwise.
#[derive(Debug, Clone, Default)]
pub struct AccessController {
    read: BTreeMap<FunctionalConstraint, AccessPolicy>,
    write: BTreeMap<FunctionalConstraint, AccessPolicy>,
}

impl AccessController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read: config.read_policy.clone(),
            write: config.write_policy.clone(),
        }
    }

    pub fn set_read_policy(&mut self, fc: FunctionalConstraint, policy: AccessPolicy) {
        self.read.insert(fc, policy);
    }

    pub fn set_write_policy(&mut self, fc: FunctionalConstraint, policy: AccessPolicy) {
        self.write.insert(fc, policy);
    }

    pub fn read_policy(&self, fc: FunctionalConstraint) -> AccessPolicy {
        self.read.get(&fc).copied().unwrap_or(AccessPolicy::Allow)
    }

    pub fn write_policy(&self, fc: FunctionalConstraint) -> AccessPolicy {
        self.write.get(&fc).copied().unwrap_or(AccessPolicy::Deny)
    }

    /// Read `path` restricted to `fc`
    pub fn read(&self, model: &IedModel, path: &str, fc: FunctionalConstraint) -> IedResult<Value> {
        let id = model.resolve(path)?;
        let value = model.read_with_fc(id, fc)?;
        if !self.read_policy(fc).is_allowed() {
            return Err(IedError::access_denied(path, fc.as_str()));
        }
        Ok(value)
    }

    /// Write a basic attribute on behalf of a client
    ///
    /// Checks run in order: resolve, FC match, write policy, read-only flag,
    /// exact type. The first failure wins and leaves the model untouched.
    pub fn write(
        &self,
        model: &mut IedModel,
        reports: &mut ReportEngine,
        path: &str,
        fc: FunctionalConstraint,
        value: Value,
    ) -> IedResult<()> {
        let id = model.resolve(path)?;
        let attribute = model.node(id).attribute();

        if attribute.is_some_and(|a| a.fc != fc) {
            return Err(IedError::not_found(format!("{} [{}]", path, fc)));
        }
        if !self.write_policy(fc).is_allowed() {
            return Err(IedError::access_denied(path, fc.as_str()));
        }
        if attribute.is_some_and(|a| a.read_only) {
            return Err(IedError::read_only(path));
        }

        debug!("Write {} [{}] = {}", path, fc, value);
        store(model, reports, id, value.clone())?;

        if fc == FunctionalConstraint::Control {
            mirror_control(model, reports, id, value)?;
        }
        Ok(())
    }
}

/// Replace an attribute value and run report evaluation
pub(crate) fn store(
    model: &mut IedModel,
    reports: &mut ReportEngine,
    id: NodeId,
    value: Value,
) -> IedResult<()> {
    let old = model.set_value(id, value)?;
    if let Some(new) = model.value(id) {
        reports.on_attribute_written(model, id, &old, new);
    }
    Ok(())
}

/// Direct control: `<DO>.Oper.ctlVal` is mirrored into `<DO>.stVal` and
/// `<DO>.t` is refreshed
fn mirror_control(
    model: &mut IedModel,
    reports: &mut ReportEngine,
    ctl_val: NodeId,
    value: Value,
) -> IedResult<()> {
    let node = model.node(ctl_val);
    if node.name() != "ctlVal" {
        return Ok(());
    }
    let Some(oper) = node.parent().filter(|&p| model.node(p).name() == "Oper") else {
        return Ok(());
    };
    let Some(object) = model.node(oper).parent() else {
        return Ok(());
    };

    let declared = |id: NodeId| model.node(id).attribute().and_then(|a| a.basic_type);
    let st_val = model
        .find_child(object, "stVal")
        .filter(|&id| declared(id) == value.basic_type());
    let timestamp = model
        .find_child(object, "t")
        .filter(|&id| declared(id) == Some(iec61850_model::BasicType::UtcTimestamp));

    if let Some(st_val) = st_val {
        debug!("Control {} -> {}", model.path(ctl_val), model.path(st_val));
        store(model, reports, st_val, value)?;
    }
    if let Some(t) = timestamp {
        store(model, reports, t, Value::UtcTimestamp(Utc::now()))?;
    }
    Ok(())
}
