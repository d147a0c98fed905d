//! Model nodes
//!
//! Nodes live in the arena owned by [`crate::IedModel`] and refer to each
//! other through [`NodeId`]s. A node's parent id is a plain back-reference;
//! ownership always flows from parent to children.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fc::FunctionalConstraint;
use crate::value::{BasicType, Value};

/// Index of a node in the model arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

// ============================================================================
// Trigger options
// ============================================================================

/// Events on an attribute that may cause a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerOptions {
    /// dchg: value changed
    pub data_change: bool,
    /// qchg: quality changed
    pub quality_change: bool,
    /// dupd: value written, changed or not
    pub data_update: bool,
}

impl TriggerOptions {
    pub const NONE: TriggerOptions = TriggerOptions {
        data_change: false,
        quality_change: false,
        data_update: false,
    };
    pub const DCHG: TriggerOptions = TriggerOptions {
        data_change: true,
        quality_change: false,
        data_update: false,
    };
    pub const QCHG: TriggerOptions = TriggerOptions {
        data_change: false,
        quality_change: true,
        data_update: false,
    };
    pub const DUPD: TriggerOptions = TriggerOptions {
        data_change: false,
        quality_change: false,
        data_update: true,
    };
    pub const ALL: TriggerOptions = TriggerOptions {
        data_change: true,
        quality_change: true,
        data_update: true,
    };

    pub fn union(self, other: TriggerOptions) -> TriggerOptions {
        TriggerOptions {
            data_change: self.data_change || other.data_change,
            quality_change: self.quality_change || other.quality_change,
            data_update: self.data_update || other.data_update,
        }
    }

    pub fn intersection(self, other: TriggerOptions) -> TriggerOptions {
        TriggerOptions {
            data_change: self.data_change && other.data_change,
            quality_change: self.quality_change && other.quality_change,
            data_update: self.data_update && other.data_update,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.data_change || self.quality_change || self.data_update)
    }
}

// ============================================================================
// Common data classes
// ============================================================================

/// Common data class of a data object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cdc {
    /// Single point status
    Sps,
    /// Controllable single point
    Spc,
    /// Integer status
    Ins,
    /// Enumerated status
    Ens,
    /// Enumerated status setting
    Eng,
    /// Integer status setting
    Ing,
    /// Analogue setting
    Asg,
    /// Measured value
    Mv,
    /// Logical node name plate
    Lpl,
    /// Device name plate
    Dpl,
    /// Anything not covered by a template
    Generic,
}

impl Cdc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cdc::Sps => "SPS",
            Cdc::Spc => "SPC",
            Cdc::Ins => "INS",
            Cdc::Ens => "ENS",
            Cdc::Eng => "ENG",
            Cdc::Ing => "ING",
            Cdc::Asg => "ASG",
            Cdc::Mv => "MV",
            Cdc::Lpl => "LPL",
            Cdc::Dpl => "DPL",
            Cdc::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for Cdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Node kinds
// ============================================================================

/// Static properties of a data attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub fc: FunctionalConstraint,
    pub trigger: TriggerOptions,
    pub read_only: bool,
    /// `None` for constructed attributes, whose value is their children
    pub basic_type: Option<BasicType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Device,
    LogicalNode,
    DataObject { cdc: Cdc },
    DataAttribute(AttributeSpec),
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Device => "logical device",
            NodeKind::LogicalNode => "logical node",
            NodeKind::DataObject { .. } => "data object",
            NodeKind::DataAttribute(_) => "data attribute",
        }
    }

    /// Whether a node of kind `child` may be placed under a node of this kind
    pub fn accepts(&self, child: &NodeKind) -> bool {
        match (self, child) {
            (NodeKind::Device, NodeKind::LogicalNode) => true,
            (NodeKind::LogicalNode, NodeKind::DataObject { .. }) => true,
            (NodeKind::DataObject { .. }, NodeKind::DataObject { .. }) => true,
            (NodeKind::DataObject { .. }, NodeKind::DataAttribute(_)) => true,
            (NodeKind::DataAttribute(parent), NodeKind::DataAttribute(sub)) => {
                // Only constructed attributes have sub-attributes, all sharing the parent's FC
                parent.basic_type.is_none() && parent.fc == sub.fc
            },
            _ => false,
        }
    }
}

/// A node stored in the model arena
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Present for basic data attributes only
    pub(crate) value: Option<Value>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in declaration order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn attribute(&self) -> Option<&AttributeSpec> {
        match &self.kind {
            NodeKind::DataAttribute(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn fc(&self) -> Option<FunctionalConstraint> {
        self.attribute().map(|spec| spec.fc)
    }

    pub fn is_basic_attribute(&self) -> bool {
        self.attribute().is_some_and(|spec| spec.basic_type.is_some())
    }
}

// ============================================================================
// NodeSpec - owned subtree used while building
// ============================================================================

/// Description of a node (and its subtree) to be added to a model
///
/// CDC templates produce `NodeSpec`s; [`crate::IedModel::add_child`] turns
/// them into arena nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<NodeSpec>,
    /// Initial value for basic attributes, the type's zero value if unset
    pub initial: Option<Value>,
}

impl NodeSpec {
    pub fn logical_node(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::LogicalNode)
    }

    pub fn data_object(name: impl Into<String>, cdc: Cdc) -> Self {
        Self::new(name, NodeKind::DataObject { cdc })
    }

    /// Basic attribute holding a single value
    pub fn attribute(
        name: impl Into<String>,
        fc: FunctionalConstraint,
        basic_type: BasicType,
        trigger: TriggerOptions,
    ) -> Self {
        Self::new(
            name,
            NodeKind::DataAttribute(AttributeSpec {
                fc,
                trigger,
                read_only: false,
                basic_type: Some(basic_type),
            }),
        )
    }

    /// Constructed attribute whose value is the structure of its children
    pub fn constructed(
        name: impl Into<String>,
        fc: FunctionalConstraint,
        trigger: TriggerOptions,
    ) -> Self {
        Self::new(
            name,
            NodeKind::DataAttribute(AttributeSpec {
                fc,
                trigger,
                read_only: false,
                basic_type: None,
            }),
        )
    }

    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
            initial: None,
        }
    }

    pub fn with_child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }

    /// Mark a data attribute read-only for clients
    pub fn read_only(mut self) -> Self {
        if let NodeKind::DataAttribute(spec) = &mut self.kind {
            spec.read_only = true;
        }
        self
    }

    pub fn with_initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }
}
