//! Report/subscription engine
//!
//! A subscription binds a session to a data set (ordered `(reference, FC)`
//! members) and a set of trigger options. Every successful write runs
//! [`ReportEngine::on_attribute_written`] while the model lock is still
//! held; qualifying writes are turned into [`Report`]s and pushed onto the
//! owning session's unbounded channel, so scheduling never blocks the writer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use errors::{IedError, IedResult};
use iec61850_model::{FunctionalConstraint, IedModel, NodeId, TriggerOptions, Value};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Server-assigned session identifier
pub type SessionId = u64;

/// Identifier of a subscription, unique among the live subscriptions of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionHandle(pub u32);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Data sets and triggers
// ============================================================================

/// One data set element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetMember {
    pub reference: String,
    pub fc: FunctionalConstraint,
}

impl DataSetMember {
    pub fn new(reference: impl Into<String>, fc: FunctionalConstraint) -> Self {
        Self {
            reference: reference.into(),
            fc,
        }
    }
}

/// Named, ordered list of members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSet {
    pub name: String,
    pub members: Vec<DataSetMember>,
}

impl DataSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, reference: impl Into<String>, fc: FunctionalConstraint) -> Self {
        self.members.push(DataSetMember::new(reference, fc));
        self
    }
}

/// Trigger options of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportTriggers {
    pub data_change: bool,
    pub quality_change: bool,
    pub data_update: bool,
    /// Send every member with reason `Integrity` at this period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_period_ms: Option<u64>,
    /// Allow general interrogation requests
    pub general_interrogation: bool,
}

impl Default for ReportTriggers {
    fn default() -> Self {
        Self::on_change()
    }
}

impl ReportTriggers {
    /// Data change and quality change, with general interrogation enabled
    pub fn on_change() -> Self {
        Self {
            data_change: true,
            quality_change: true,
            data_update: false,
            integrity_period_ms: None,
            general_interrogation: true,
        }
    }

    /// No event triggers at all
    pub fn none() -> Self {
        Self {
            data_change: false,
            quality_change: false,
            data_update: false,
            integrity_period_ms: None,
            general_interrogation: false,
        }
    }

    pub fn with_data_update(mut self) -> Self {
        self.data_update = true;
        self
    }

    pub fn with_integrity(mut self, period: Duration) -> Self {
        self.integrity_period_ms = Some(period.as_millis() as u64);
        self
    }

    pub fn with_general_interrogation(mut self, enabled: bool) -> Self {
        self.general_interrogation = enabled;
        self
    }

    /// The event part, comparable with an attribute's trigger options
    pub fn options(&self) -> TriggerOptions {
        TriggerOptions {
            data_change: self.data_change,
            quality_change: self.quality_change,
            data_update: self.data_update,
        }
    }

    pub fn integrity_period(&self) -> Option<Duration> {
        self.integrity_period_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Why a data set element was included in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    DataChange,
    QualityChange,
    DataUpdate,
    Integrity,
    GeneralInterrogation,
    NotIncluded,
}

impl ReasonCode {
    pub fn is_included(&self) -> bool {
        !matches!(self, Self::NotIncluded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub reference: String,
    pub value: Value,
    pub reason: ReasonCode,
}

/// Notification for one subscription; entries follow data set order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub subscription: SubscriptionHandle,
    pub data_set: String,
    pub seq_num: u32,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    /// Entries whose reason is not `NotIncluded`
    pub fn included(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.reason.is_included())
    }
}

// ============================================================================
// Per-session report queue
// ============================================================================

/// Create the outbound report queue of one session
pub fn report_channel() -> (ReportSender, ReportReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        ReportSender {
            tx,
            pending: pending.clone(),
        },
        ReportReceiver { rx, pending },
    )
}

/// Sending half; cloned into every subscription of the session
#[derive(Debug, Clone)]
pub struct ReportSender {
    tx: mpsc::UnboundedSender<Report>,
    pending: Arc<AtomicUsize>,
}

impl ReportSender {
    /// Queue a report; returns the queue depth, or `None` when the session is gone
    fn send(&self, report: Report) -> Option<usize> {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(report).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(depth)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, drained by the session's connection task
#[derive(Debug)]
pub struct ReportReceiver {
    rx: mpsc::UnboundedReceiver<Report>,
    pending: Arc<AtomicUsize>,
}

impl ReportReceiver {
    pub async fn recv(&mut self) -> Option<Report> {
        let report = self.rx.recv().await;
        if report.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        report
    }

    pub fn try_recv(&mut self) -> Option<Report> {
        let report = self.rx.try_recv().ok();
        if report.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        report
    }

    /// Reports queued but not yet received
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug)]
struct Member {
    reference: String,
    fc: FunctionalConstraint,
    node: NodeId,
}

#[derive(Debug)]
struct Subscription {
    session: SessionId,
    data_set: String,
    members: Vec<Member>,
    triggers: ReportTriggers,
    seq_num: u32,
    sender: ReportSender,
    integrity: Option<CancellationToken>,
}

impl Subscription {
    /// Build and queue a report; `false` when the session has gone away
    fn dispatch(
        &mut self,
        handle: SubscriptionHandle,
        model: &IedModel,
        reasons: &[ReasonCode],
        queue_warn: usize,
    ) -> bool {
        let entries = self
            .members
            .iter()
            .zip(reasons)
            .map(|(member, &reason)| ReportEntry {
                reference: member.reference.clone(),
                value: model
                    .read_with_fc(member.node, member.fc)
                    .unwrap_or_else(|e| Value::DataAccessError((&e).into())),
                reason,
            })
            .collect();

        let report = Report {
            subscription: handle,
            data_set: self.data_set.clone(),
            seq_num: self.seq_num,
            entries,
        };
        self.seq_num = self.seq_num.wrapping_add(1);

        match self.sender.send(report) {
            Some(depth) => {
                if depth == queue_warn {
                    warn!(
                        "Session {} report queue reached {} pending reports",
                        self.session, depth
                    );
                }
                true
            },
            None => false,
        }
    }

    fn dispatch_all(
        &mut self,
        handle: SubscriptionHandle,
        model: &IedModel,
        reason: ReasonCode,
        queue_warn: usize,
    ) -> bool {
        let reasons = vec![reason; self.members.len()];
        self.dispatch(handle, model, &reasons, queue_warn)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(token) = &self.integrity {
            token.cancel();
        }
    }
}

/// Reason for a write on an attribute, given the trigger options shared by
/// the subscription and the attribute
fn trigger_reason(shared: TriggerOptions, changed: bool) -> Option<ReasonCode> {
    if shared.data_change && changed {
        Some(ReasonCode::DataChange)
    } else if shared.quality_change && changed {
        Some(ReasonCode::QualityChange)
    } else if shared.data_update {
        Some(ReasonCode::DataUpdate)
    } else {
        None
    }
}

/// All subscriptions of the server
#[derive(Debug)]
pub struct ReportEngine {
    subscriptions: BTreeMap<SubscriptionHandle, Subscription>,
    next_handle: u32,
    queue_warn: usize,
}

impl Default for ReportEngine {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ReportEngine {
    /// `queue_warn` is the per-session queue depth that triggers a warning
    pub fn new(queue_warn: usize) -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            next_handle: 1,
            queue_warn: queue_warn.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Handles owned by `session`, oldest first
    pub fn session_subscriptions(&self, session: SessionId) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .iter()
            .filter(|(_, sub)| sub.session == session)
            .map(|(&handle, _)| handle)
            .collect()
    }

    /// Register a subscription
    ///
    /// Every member must resolve and carry data with its FC; otherwise the
    /// whole subscription is rejected with the member's error.
    pub fn subscribe(
        &mut self,
        model: &IedModel,
        session: SessionId,
        sender: ReportSender,
        data_set: &DataSet,
        triggers: ReportTriggers,
    ) -> IedResult<SubscriptionHandle> {
        if data_set.members.is_empty() {
            return Err(IedError::protocol(format!(
                "data set '{}' has no members",
                data_set.name
            )));
        }
        if triggers.integrity_period_ms == Some(0) {
            return Err(IedError::protocol("integrity period must be positive"));
        }

        let members = data_set
            .members
            .iter()
            .map(|m| {
                let node = model.resolve(&m.reference)?;
                model.read_with_fc(node, m.fc)?;
                Ok(Member {
                    reference: model.path(node),
                    fc: m.fc,
                    node,
                })
            })
            .collect::<IedResult<Vec<_>>>()?;

        let handle = self.allocate_handle();
        self.subscriptions.insert(
            handle,
            Subscription {
                session,
                data_set: data_set.name.clone(),
                members,
                triggers,
                seq_num: 0,
                sender,
                integrity: None,
            },
        );
        debug!(
            "Session {} subscribed {} to data set '{}' ({} members)",
            session,
            handle,
            data_set.name,
            data_set.members.len()
        );
        Ok(handle)
    }

    /// Next free handle; after wrapping past `u32::MAX` live handles are skipped
    fn allocate_handle(&mut self) -> SubscriptionHandle {
        loop {
            let handle = SubscriptionHandle(self.next_handle);
            self.next_handle = self.next_handle.checked_add(1).unwrap_or(1);
            if !self.subscriptions.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Attach the cancellation token of the integrity timer task
    ///
    /// The token is cancelled when the subscription goes away.
    pub fn set_integrity_token(
        &mut self,
        handle: SubscriptionHandle,
        token: CancellationToken,
    ) -> bool {
        match self.subscriptions.get_mut(&handle) {
            Some(sub) => {
                sub.integrity = Some(token);
                true
            },
            None => {
                token.cancel();
                false
            },
        }
    }

    pub fn unsubscribe(&mut self, session: SessionId, handle: SubscriptionHandle) -> IedResult<()> {
        match self.subscriptions.get(&handle) {
            Some(sub) if sub.session == session => {
                self.subscriptions.remove(&handle);
                debug!("Session {} unsubscribed {}", session, handle);
                Ok(())
            },
            _ => Err(IedError::SubscriptionNotFound(handle.0)),
        }
    }

    /// Remove every subscription of a session; returns how many were removed
    pub fn drop_session(&mut self, session: SessionId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, sub| sub.session != session);
        let removed = before - self.subscriptions.len();
        if removed > 0 {
            debug!("Dropped {} subscriptions of session {}", removed, session);
        }
        removed
    }

    /// Evaluate one successful write against all subscriptions
    pub fn on_attribute_written(
        &mut self,
        model: &IedModel,
        attribute: NodeId,
        old: &Value,
        new: &Value,
    ) {
        let Some(spec) = model.node(attribute).attribute() else {
            return;
        };
        let changed = old != new;
        let queue_warn = self.queue_warn;
        let mut gone = Vec::new();

        for (&handle, sub) in self.subscriptions.iter_mut() {
            let Some(reason) = trigger_reason(sub.triggers.options().intersection(spec.trigger), changed)
            else {
                continue;
            };

            let reasons: Vec<ReasonCode> = sub
                .members
                .iter()
                .map(|m| {
                    if m.fc == spec.fc && model.is_ancestor_or_self(m.node, attribute) {
                        reason
                    } else {
                        ReasonCode::NotIncluded
                    }
                })
                .collect();
            if !reasons.iter().any(ReasonCode::is_included) {
                continue;
            }

            if !sub.dispatch(handle, model, &reasons, queue_warn) {
                gone.push(handle);
            }
        }

        self.remove_vanished(gone);
    }

    /// Send every member of a subscription with reason `GeneralInterrogation`
    pub fn general_interrogation(
        &mut self,
        model: &IedModel,
        session: SessionId,
        handle: SubscriptionHandle,
    ) -> IedResult<()> {
        let queue_warn = self.queue_warn;
        let sub = match self.subscriptions.get_mut(&handle) {
            Some(sub) if sub.session == session => sub,
            _ => return Err(IedError::SubscriptionNotFound(handle.0)),
        };
        if !sub.triggers.general_interrogation {
            return Err(IedError::access_denied(sub.data_set.clone(), "GI"));
        }

        if !sub.dispatch_all(handle, model, ReasonCode::GeneralInterrogation, queue_warn) {
            self.remove_vanished(vec![handle]);
            return Err(IedError::ConnectionClosing);
        }
        Ok(())
    }

    /// Send every member with reason `Integrity`; `false` once the
    /// subscription no longer exists
    pub fn integrity_report(&mut self, model: &IedModel, handle: SubscriptionHandle) -> bool {
        let queue_warn = self.queue_warn;
        let Some(sub) = self.subscriptions.get_mut(&handle) else {
            return false;
        };
        if sub.dispatch_all(handle, model, ReasonCode::Integrity, queue_warn) {
            true
        } else {
            self.remove_vanished(vec![handle]);
            false
        }
    }

    fn remove_vanished(&mut self, handles: Vec<SubscriptionHandle>) {
        for handle in handles {
            if let Some(sub) = self.subscriptions.remove(&handle) {
                debug!(
                    "Session {} is gone, dropping subscription {}",
                    sub.session, handle
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use iec61850_model::{cdc, Quality};

    fn model() -> IedModel {
        let mut model = IedModel::new("testmodel");
        let ld = model.create_device("Battery").unwrap();
        let zbat = model
            .add_child(ld, cdc::logical_node_with_mandatory("ZBAT"))
            .unwrap();
        model.add_child(zbat, cdc::mv("Vol")).unwrap();
        model.add_child(zbat, cdc::mv("Amp")).unwrap();
        model.freeze();
        model
    }

    fn write(engine: &mut ReportEngine, model: &mut IedModel, path: &str, value: Value) {
        let id = model.resolve(path).unwrap();
        let old = model.set_value(id, value).unwrap();
        let new = model.value(id).unwrap().clone();
        engine.on_attribute_written(model, id, &old, &new);
    }

    fn vol_data_set() -> DataSet {
        DataSet::new("Measurements")
            .with_member("Battery/ZBAT.Vol", FunctionalConstraint::Measurand)
            .with_member("Battery/ZBAT.Amp", FunctionalConstraint::Measurand)
    }

    #[test]
    fn test_trigger_reason() {
        assert_eq!(
            trigger_reason(TriggerOptions::DCHG, true),
            Some(ReasonCode::DataChange)
        );
        assert_eq!(trigger_reason(TriggerOptions::DCHG, false), None);
        assert_eq!(
            trigger_reason(TriggerOptions::QCHG, true),
            Some(ReasonCode::QualityChange)
        );
        assert_eq!(
            trigger_reason(TriggerOptions::DUPD, false),
            Some(ReasonCode::DataUpdate)
        );
        assert_eq!(trigger_reason(TriggerOptions::NONE, true), None);
    }

    #[test]
    fn test_data_change_report() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        let handle = engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(1.5));

        let report = rx.try_recv().unwrap();
        assert_eq!(report.subscription, handle);
        assert_eq!(report.data_set, "Measurements");
        assert_eq!(report.seq_num, 0);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].reference, "Battery/ZBAT.Vol");
        assert_eq!(report.entries[0].reason, ReasonCode::DataChange);
        assert_eq!(report.entries[1].reason, ReasonCode::NotIncluded);
        assert_eq!(
            report.entries[0].value,
            Value::Structured(vec![
                Value::Structured(vec![Value::Float32(1.5)]),
                Value::Quality(Quality::GOOD),
                Value::UtcTimestamp(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
            ])
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_identical_write_is_silent() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(0.0));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_nan_write_reports_once() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(f32::NAN));
        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(f32::NAN));

        let report = rx.try_recv().unwrap();
        assert_eq!(report.entries[0].reason, ReasonCode::DataChange);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_data_update_needs_attribute_dupd() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        let triggers = ReportTriggers::none().with_data_update();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), triggers)
            .unwrap();

        // mag.f declares dchg only, so dupd is not shared
        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(2.0));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_quality_change_reason() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        write(
            &mut engine,
            &mut model,
            "Battery/ZBAT.Amp.q",
            Value::Quality(Quality::INVALID),
        );
        let report = rx.try_recv().unwrap();
        assert_eq!(report.entries[0].reason, ReasonCode::NotIncluded);
        assert_eq!(report.entries[1].reason, ReasonCode::QualityChange);
    }

    #[test]
    fn test_timestamp_write_not_reported() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        write(
            &mut engine,
            &mut model,
            "Battery/ZBAT.Vol.t",
            Value::UtcTimestamp(chrono::Utc::now()),
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        for i in 1..=3 {
            write(
                &mut engine,
                &mut model,
                "Battery/ZBAT.Vol.mag.f",
                Value::Float32(i as f32),
            );
        }
        let seqs: Vec<u32> = std::iter::from_fn(|| rx.try_recv()).map(|r| r.seq_num).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_unknown_member_rejected() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, _rx) = report_channel();
        let data_set = DataSet::new("Bad").with_member("Battery/ZBAT.NoSuchAttr", FunctionalConstraint::Measurand);
        assert!(matches!(
            engine.subscribe(&model, 1, tx.clone(), &data_set, ReportTriggers::on_change()),
            Err(IedError::NotFound { .. })
        ));

        let wrong_fc = DataSet::new("Bad").with_member("Battery/ZBAT.Vol", FunctionalConstraint::Status);
        assert!(matches!(
            engine.subscribe(&model, 1, tx, &wrong_fc, ReportTriggers::on_change()),
            Err(IedError::NotFound { .. })
        ));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unsubscribe_requires_owner() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, _rx) = report_channel();
        let handle = engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        assert!(matches!(
            engine.unsubscribe(2, handle),
            Err(IedError::SubscriptionNotFound(_))
        ));
        engine.unsubscribe(1, handle).unwrap();
        assert!(matches!(
            engine.unsubscribe(1, handle),
            Err(IedError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn test_handle_wrap_skips_live_subscriptions() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, _rx) = report_channel();
        let first = engine
            .subscribe(&model, 1, tx.clone(), &vol_data_set(), ReportTriggers::on_change())
            .unwrap();
        assert_eq!(first, SubscriptionHandle(1));

        engine.next_handle = u32::MAX;
        let last = engine
            .subscribe(&model, 2, tx.clone(), &vol_data_set(), ReportTriggers::on_change())
            .unwrap();
        assert_eq!(last, SubscriptionHandle(u32::MAX));

        // Handle 1 is still held by session 1
        let wrapped = engine
            .subscribe(&model, 2, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();
        assert_eq!(wrapped, SubscriptionHandle(2));
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.session_subscriptions(1), vec![first]);
    }

    #[test]
    fn test_drop_session_cancels_integrity() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, _rx) = report_channel();
        let handle = engine
            .subscribe(&model, 7, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();
        let token = CancellationToken::new();
        assert!(engine.set_integrity_token(handle, token.clone()));

        assert_eq!(engine.drop_session(7), 1);
        assert!(token.is_cancelled());
        assert!(engine.session_subscriptions(7).is_empty());
    }

    #[test]
    fn test_vanished_session_is_dropped() {
        let mut model = model();
        let mut engine = ReportEngine::default();
        let (tx, rx) = report_channel();
        engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();
        drop(rx);

        write(&mut engine, &mut model, "Battery/ZBAT.Vol.mag.f", Value::Float32(3.0));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_general_interrogation_and_integrity() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, mut rx) = report_channel();
        let handle = engine
            .subscribe(&model, 1, tx, &vol_data_set(), ReportTriggers::on_change())
            .unwrap();

        engine.general_interrogation(&model, 1, handle).unwrap();
        let gi = rx.try_recv().unwrap();
        assert!(gi
            .entries
            .iter()
            .all(|e| e.reason == ReasonCode::GeneralInterrogation));

        assert!(engine.integrity_report(&model, handle));
        let integrity = rx.try_recv().unwrap();
        assert_eq!(integrity.seq_num, 1);
        assert_eq!(integrity.included().count(), 2);

        assert!(matches!(
            engine.general_interrogation(&model, 2, handle),
            Err(IedError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn test_gi_disabled_is_denied() {
        let model = model();
        let mut engine = ReportEngine::default();
        let (tx, _rx) = report_channel();
        let triggers = ReportTriggers::on_change().with_general_interrogation(false);
        let handle = engine
            .subscribe(&model, 1, tx, &vol_data_set(), triggers)
            .unwrap();
        assert!(matches!(
            engine.general_interrogation(&model, 1, handle),
            Err(IedError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_triggers_serde_defaults() {
        let triggers: ReportTriggers = serde_json::from_str("{}").unwrap();
        assert_eq!(triggers, ReportTriggers::on_change());
        let triggers: ReportTriggers =
            serde_json::from_str(r#"{"data_update":true,"integrity_period_ms":500}"#).unwrap();
        assert!(triggers.data_update);
        assert_eq!(triggers.integrity_period(), Some(Duration::from_millis(500)));
    }
}
