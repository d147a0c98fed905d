//! The IED data model
//!
//! [`IedModel`] owns every node in a flat arena. It is built single-threaded,
//! then frozen: freezing builds the path and FC indexes and from then on only
//! attribute values may change.

use errors::{IedError, IedResult};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::fc::{FcIndex, FunctionalConstraint};
use crate::node::{AttributeSpec, Node, NodeId, NodeKind, NodeSpec};
use crate::reference::ObjectReference;
use crate::validation;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct IedModel {
    ied_name: String,
    nodes: Vec<Node>,
    devices: Vec<NodeId>,
    frozen: bool,
    path_index: FxHashMap<String, NodeId>,
    fc_index: FcIndex,
}

impl IedModel {
    pub fn new(ied_name: impl Into<String>) -> Self {
        Self {
            ied_name: ied_name.into(),
            nodes: Vec::new(),
            devices: Vec::new(),
            frozen: false,
            path_index: FxHashMap::default(),
            fc_index: FcIndex::default(),
        }
    }

    pub fn ied_name(&self) -> &str {
        &self.ied_name
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Add a logical device at the top level
    pub fn create_device(&mut self, name: &str) -> IedResult<NodeId> {
        self.ensure_mutable()?;
        validation::validate_node_name(name)?;
        if self.devices.iter().any(|&id| self.node(id).name == name) {
            return Err(IedError::DuplicateName {
                parent: self.ied_name.clone(),
                name: name.to_string(),
            });
        }

        let id = self.push_node(name.to_string(), NodeKind::Device, None, None);
        self.devices.push(id);
        Ok(id)
    }

    /// Add `spec` and its whole subtree under `parent`
    ///
    /// The subtree is checked completely before anything is inserted, so a
    /// failed call leaves the model untouched.
    pub fn add_child(&mut self, parent: NodeId, spec: NodeSpec) -> IedResult<NodeId> {
        self.ensure_mutable()?;
        let parent_node = self
            .get(parent)
            .ok_or_else(|| IedError::not_found(format!("node #{}", parent.0)))?;
        if parent_node.children.iter().any(|&c| self.node(c).name == spec.name) {
            return Err(IedError::DuplicateName {
                parent: self.path(parent),
                name: spec.name,
            });
        }
        check_subtree(&parent_node.kind, &self.path(parent), &spec)?;

        Ok(self.insert_subtree(parent, spec))
    }

    fn insert_subtree(&mut self, parent: NodeId, spec: NodeSpec) -> NodeId {
        let value = match &spec.kind {
            NodeKind::DataAttribute(AttributeSpec {
                basic_type: Some(ty),
                ..
            }) => Some(spec.initial.unwrap_or_else(|| ty.zero())),
            _ => None,
        };
        let id = self.push_node(spec.name, spec.kind, Some(parent), value);
        self.nodes[parent.0].children.push(id);
        for child in spec.children {
            self.insert_subtree(id, child);
        }
        id
    }

    fn push_node(
        &mut self,
        name: String,
        kind: NodeKind,
        parent: Option<NodeId>,
        value: Option<Value>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            kind,
            parent,
            children: Vec::new(),
            value,
        });
        id
    }

    fn ensure_mutable(&self) -> IedResult<()> {
        if self.frozen {
            Err(IedError::ModelFrozen)
        } else {
            Ok(())
        }
    }

    /// Check that every logical node carries the mandatory data objects
    pub fn validate(&self) -> IedResult<()> {
        validation::check_mandatory_objects(self)
    }

    /// Build the path and FC indexes and reject further structural changes
    ///
    /// Calling `freeze` twice is a no-op.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }

        let mut path_index = FxHashMap::default();
        let mut fc_index = FcIndex::default();
        // Depth-first walk keeps declaration order inside the FC index
        let mut stack: Vec<NodeId> = self.devices.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            path_index.insert(self.path(id), id);
            let node = self.node(id);
            if let Some(fc) = node.fc() {
                fc_index.insert(fc, id);
            }
            stack.extend(node.children.iter().rev().copied());
        }

        debug!(
            "Model '{}' frozen: {} nodes, {} attributes indexed",
            self.ied_name,
            path_index.len(),
            fc_index.len()
        );
        self.path_index = path_index;
        self.fc_index = fc_index;
        self.frozen = true;
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Node for an id handed out by this model
    ///
    /// Ids are only created by the model itself, so indexing cannot fail for
    /// ids obtained from it.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn devices(&self) -> &[NodeId] {
        &self.devices
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    /// Look up a device by its own name or by the IED-prefixed name
    pub fn find_device(&self, name: &str) -> Option<NodeId> {
        let by_name = |n: &str| {
            self.devices
                .iter()
                .copied()
                .find(|&id| self.node(id).name == n)
        };
        by_name(name).or_else(|| {
            name.strip_prefix(self.ied_name.as_str())
                .filter(|rest| !rest.is_empty())
                .and_then(by_name)
        })
    }

    /// Fully qualified path of a node, e.g. `Battery/ZBAT.Vol.mag.f`
    pub fn path(&self, id: NodeId) -> String {
        self.reference(id).to_string()
    }

    pub fn reference(&self, id: NodeId) -> ObjectReference {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            names.push(node.name.as_str());
            cursor = node.parent;
        }
        names.reverse();

        let (device, rest) = names.split_first().map_or(("", &[][..]), |(d, r)| (*d, r));
        rest.iter()
            .fold(ObjectReference::device_only(device), |r, name| r.child(name))
    }

    /// Resolve a client reference string to a node
    pub fn resolve(&self, path: &str) -> IedResult<NodeId> {
        let reference = ObjectReference::parse(path)?;
        self.resolve_reference(&reference)
    }

    pub fn resolve_reference(&self, reference: &ObjectReference) -> IedResult<NodeId> {
        let not_found = || IedError::not_found(reference.to_string());
        let device = self.find_device(reference.device()).ok_or_else(not_found)?;

        if self.frozen {
            let canonical = reference.with_device(self.node(device).name.as_str());
            return self
                .path_index
                .get(&canonical.to_string())
                .copied()
                .ok_or_else(not_found);
        }

        reference
            .segments()
            .iter()
            .try_fold(device, |id, name| self.find_child(id, name))
            .ok_or_else(not_found)
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.node(current).parent;
        }
        false
    }

    /// Basic attributes in the subtree of `id` (including `id`), declaration order
    pub fn basic_attributes_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if node.is_basic_attribute() {
                out.push(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    // ========================================================================
    // Directory browsing
    // ========================================================================

    pub fn logical_device_names(&self) -> Vec<&str> {
        self.devices
            .iter()
            .map(|&id| self.node(id).name.as_str())
            .collect()
    }

    pub fn logical_node_names(&self, device: &str) -> IedResult<Vec<&str>> {
        let id = self
            .find_device(device)
            .ok_or_else(|| IedError::not_found(device))?;
        Ok(self.child_names(id))
    }

    pub fn child_names(&self, id: NodeId) -> Vec<&str> {
        self.node(id)
            .children
            .iter()
            .map(|&c| self.node(c).name.as_str())
            .collect()
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn fc_index(&self) -> &FcIndex {
        &self.fc_index
    }

    /// Attributes carrying `fc`; empty until the model is frozen
    pub fn attributes_with_fc(&self, fc: FunctionalConstraint) -> &[NodeId] {
        self.fc_index.attributes(fc)
    }

    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.get(id)?.value.as_ref()
    }

    /// Value of a data attribute; constructed attributes read as `Structured`
    pub fn read_value(&self, id: NodeId) -> IedResult<Value> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::DataAttribute(spec) if spec.basic_type.is_some() => node
                .value
                .clone()
                .ok_or_else(|| IedError::Internal(format!("{} has no value", self.path(id)))),
            NodeKind::DataAttribute(_) => node
                .children
                .iter()
                .map(|&c| self.read_value(c))
                .collect::<IedResult<Vec<_>>>()
                .map(Value::Structured),
            other => Err(IedError::type_mismatch("data attribute", other.as_str())),
        }
    }

    /// Read a node restricted to one functional constraint
    ///
    /// A data attribute must carry `fc` itself. A data object reads as the
    /// structure of its descendant attributes with `fc`, in declaration order.
    pub fn read_with_fc(&self, id: NodeId, fc: FunctionalConstraint) -> IedResult<Value> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::DataAttribute(spec) if spec.fc == fc => self.read_value(id),
            NodeKind::DataAttribute(_) => {
                Err(IedError::not_found(format!("{} [{}]", self.path(id), fc)))
            },
            NodeKind::DataObject { .. } => self
                .object_value_with_fc(id, fc)
                .ok_or_else(|| IedError::not_found(format!("{} [{}]", self.path(id), fc))),
            other => Err(IedError::type_mismatch("data object or attribute", other.as_str())),
        }
    }

    fn object_value_with_fc(&self, id: NodeId, fc: FunctionalConstraint) -> Option<Value> {
        let items: Vec<Value> = self
            .node(id)
            .children
            .iter()
            .filter_map(|&c| {
                let child = self.node(c);
                match &child.kind {
                    NodeKind::DataAttribute(spec) if spec.fc == fc => self.read_value(c).ok(),
                    NodeKind::DataObject { .. } => self.object_value_with_fc(c, fc),
                    _ => None,
                }
            })
            .collect();
        (!items.is_empty()).then_some(Value::Structured(items))
    }

    /// Replace the value of a basic attribute, returning the previous value
    ///
    /// The new value must have exactly the declared type; nothing is coerced.
    /// On error the stored value is unchanged.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> IedResult<Value> {
        let path = self.path(id);
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| IedError::not_found(path.clone()))?;
        let declared = match &node.kind {
            NodeKind::DataAttribute(AttributeSpec {
                basic_type: Some(ty),
                ..
            }) => *ty,
            NodeKind::DataAttribute(_) => {
                return Err(IedError::type_mismatch("STRUCTURE", value.type_name()));
            },
            other => return Err(IedError::type_mismatch("data attribute", other.as_str())),
        };
        if value.basic_type() != Some(declared) {
            return Err(IedError::type_mismatch(declared.as_str(), value.type_name()));
        }

        let old = node.value.replace(value);
        old.ok_or_else(|| IedError::Internal(format!("{path} had no value")))
    }
}

/// Recursively check a subtree against hierarchy and naming rules
fn check_subtree(parent_kind: &NodeKind, parent_path: &str, spec: &NodeSpec) -> IedResult<()> {
    validation::validate_node_name(&spec.name)?;
    if !parent_kind.accepts(&spec.kind) {
        return Err(IedError::InvalidHierarchy {
            parent: format!("{parent_path} ({})", parent_kind.as_str()),
            child: format!("{} ({})", spec.name, spec.kind.as_str()),
        });
    }
    if let (Some(initial), NodeKind::DataAttribute(attr)) = (&spec.initial, &spec.kind) {
        if initial.basic_type() != attr.basic_type || attr.basic_type.is_none() {
            return Err(IedError::type_mismatch(
                attr.basic_type.map_or("STRUCTURE", |t| t.as_str()),
                initial.type_name(),
            ));
        }
    }

    let path = format!("{parent_path}.{}", spec.name);
    for (i, child) in spec.children.iter().enumerate() {
        if spec.children[..i].iter().any(|c| c.name == child.name) {
            return Err(IedError::DuplicateName {
                parent: path,
                name: child.name.clone(),
            });
        }
        check_subtree(&spec.kind, &path, child)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::cdc;
    use crate::value::BasicType;

    fn small_model() -> (IedModel, NodeId) {
        let mut model = IedModel::new("testmodel");
        let ld = model.create_device("Battery").unwrap();
        let ln = model
            .add_child(ld, cdc::logical_node_with_mandatory("ZBAT"))
            .unwrap();
        model.add_child(ln, cdc::mv("Vol")).unwrap();
        model.add_child(ln, cdc::sps("BatSt")).unwrap();
        (model, ln)
    }

    #[test]
    fn test_resolve_and_path() {
        let (model, _) = small_model();
        let id = model.resolve("Battery/ZBAT.Vol.mag.f").unwrap();
        assert_eq!(model.path(id), "Battery/ZBAT.Vol.mag.f");
        assert_eq!(model.read_value(id).unwrap(), Value::Float32(0.0));
        assert!(matches!(
            model.resolve("Battery/ZBAT.NoSuchAttr"),
            Err(IedError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_frozen_uses_index() {
        let (mut model, _) = small_model();
        let before = model.resolve("Battery/ZBAT.Vol.t").unwrap();
        model.freeze();
        assert_eq!(model.resolve("Battery/ZBAT.Vol.t").unwrap(), before);
        assert_eq!(model.resolve("testmodelBattery/ZBAT.Vol.t").unwrap(), before);
        assert!(model.resolve("Other/ZBAT.Vol.t").is_err());
    }

    #[test]
    fn test_duplicate_name() {
        let (mut model, ln) = small_model();
        let err = model.add_child(ln, cdc::mv("Vol")).unwrap_err();
        assert!(matches!(err, IedError::DuplicateName { .. }));
        assert!(matches!(
            model.create_device("Battery"),
            Err(IedError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_invalid_hierarchy_leaves_model_untouched() {
        let (mut model, ln) = small_model();
        let count = model.node_count();
        let bad = NodeSpec::data_object("Bad", crate::node::Cdc::Generic)
            .with_child(NodeSpec::logical_node("LLN1"));
        assert!(matches!(
            model.add_child(ln, bad),
            Err(IedError::InvalidHierarchy { .. })
        ));
        assert_eq!(model.node_count(), count);

        let ld = model.devices()[0];
        assert!(matches!(
            model.add_child(ld, cdc::sps("Direct")),
            Err(IedError::InvalidHierarchy { .. })
        ));
    }

    #[test]
    fn test_frozen_rejects_structure() {
        let (mut model, ln) = small_model();
        model.freeze();
        assert!(matches!(
            model.add_child(ln, cdc::sps("Late")),
            Err(IedError::ModelFrozen)
        ));
        assert!(matches!(model.create_device("Late"), Err(IedError::ModelFrozen)));
    }

    #[test]
    fn test_set_value_is_exact() {
        let (mut model, _) = small_model();
        let f = model.resolve("Battery/ZBAT.Vol.mag.f").unwrap();
        assert!(matches!(
            model.set_value(f, Value::Integer32(3)),
            Err(IedError::TypeMismatch { .. })
        ));
        assert_eq!(model.value(f), Some(&Value::Float32(0.0)));

        let old = model.set_value(f, Value::Float32(1.5)).unwrap();
        assert_eq!(old, Value::Float32(0.0));
        assert_eq!(model.value(f), Some(&Value::Float32(1.5)));

        let mag = model.resolve("Battery/ZBAT.Vol.mag").unwrap();
        assert!(model.set_value(mag, Value::Float32(2.0)).is_err());
    }

    #[test]
    fn test_constructed_reads_as_structure() {
        let (model, _) = small_model();
        let mag = model.resolve("Battery/ZBAT.Vol.mag").unwrap();
        assert_eq!(
            model.read_value(mag).unwrap(),
            Value::Structured(vec![Value::Float32(0.0)])
        );
    }

    #[test]
    fn test_read_with_fc() {
        let (mut model, _) = small_model();
        model.freeze();
        let vol = model.resolve("Battery/ZBAT.Vol").unwrap();

        let mx = model.read_with_fc(vol, FunctionalConstraint::Measurand).unwrap();
        let items = mx.as_structured().unwrap();
        // mag, q, t
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Value::Structured(vec![Value::Float32(0.0)]));

        assert!(matches!(
            model.read_with_fc(vol, FunctionalConstraint::Control),
            Err(IedError::NotFound { .. })
        ));
        let ln = model.resolve("Battery/ZBAT").unwrap();
        assert!(matches!(
            model.read_with_fc(ln, FunctionalConstraint::Measurand),
            Err(IedError::TypeMismatch { .. })
        ));
        let f = model.resolve("Battery/ZBAT.Vol.mag.f").unwrap();
        assert!(matches!(
            model.read_with_fc(f, FunctionalConstraint::Status),
            Err(IedError::NotFound { .. })
        ));
    }

    #[test]
    fn test_fc_index_after_freeze() {
        let (mut model, _) = small_model();
        assert!(model.attributes_with_fc(FunctionalConstraint::Measurand).is_empty());
        model.freeze();
        let mx: Vec<String> = model
            .attributes_with_fc(FunctionalConstraint::Measurand)
            .iter()
            .map(|&id| model.path(id))
            .collect();
        assert_eq!(
            mx,
            vec![
                "Battery/ZBAT.Vol.mag",
                "Battery/ZBAT.Vol.mag.f",
                "Battery/ZBAT.Vol.q",
                "Battery/ZBAT.Vol.t",
            ]
        );
    }

    #[test]
    fn test_directory() {
        let (model, ln) = small_model();
        assert_eq!(model.logical_device_names(), vec!["Battery"]);
        assert_eq!(model.logical_node_names("Battery").unwrap(), vec!["ZBAT"]);
        assert_eq!(
            model.child_names(ln),
            vec!["Mod", "Beh", "Health", "NamPlt", "Vol", "BatSt"]
        );
    }

    #[test]
    fn test_ancestry() {
        let (model, _) = small_model();
        let vol = model.resolve("Battery/ZBAT.Vol").unwrap();
        let f = model.resolve("Battery/ZBAT.Vol.mag.f").unwrap();
        let st = model.resolve("Battery/ZBAT.BatSt.stVal").unwrap();
        assert!(model.is_ancestor_or_self(vol, f));
        assert!(model.is_ancestor_or_self(f, f));
        assert!(!model.is_ancestor_or_self(vol, st));
        assert!(!model.is_ancestor_or_self(f, vol));
        assert_eq!(model.basic_attributes_under(vol).len(), 3);
    }

    #[test]
    fn test_initial_value_type_checked() {
        let (mut model, ln) = small_model();
        let bad = NodeSpec::data_object("Cnt", crate::node::Cdc::Generic).with_child(
            NodeSpec::attribute(
                "stVal",
                FunctionalConstraint::Status,
                BasicType::Integer32,
                crate::node::TriggerOptions::DCHG,
            )
            .with_initial(1.0f32),
        );
        assert!(matches!(
            model.add_child(ln, bad),
            Err(IedError::TypeMismatch { .. })
        ));
    }
}
