//! Functional constraints
//!
//! Every data attribute carries exactly one functional constraint (FC). The
//! FC decides default access rights and report eligibility, and is given
//! separately from the object reference in every client request.

use errors::IedError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::node::NodeId;

/// IEC 61850-7-2 functional constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionalConstraint {
    /// Status information
    #[serde(rename = "ST", alias = "st")]
    Status,
    /// Measurands (analogue values)
    #[serde(rename = "MX", alias = "mx")]
    Measurand,
    /// Setpoint
    #[serde(rename = "SP", alias = "sp")]
    Setpoint,
    /// Substitution
    #[serde(rename = "SV", alias = "sv")]
    Substitution,
    /// Configuration
    #[serde(rename = "CF", alias = "cf")]
    Configuration,
    /// Description
    #[serde(rename = "DC", alias = "dc")]
    Description,
    /// Setting group
    #[serde(rename = "SG", alias = "sg")]
    SettingGroup,
    /// Setting group editable
    #[serde(rename = "SE", alias = "se")]
    SettingGroupEditable,
    /// Service response
    #[serde(rename = "SR", alias = "sr")]
    ServiceResponse,
    /// Operate received
    #[serde(rename = "OR", alias = "or")]
    OperateReceived,
    /// Blocking
    #[serde(rename = "BL", alias = "bl")]
    Blocking,
    /// Extended definition
    #[serde(rename = "EX", alias = "ex")]
    ExtendedDefinition,
    /// Control
    #[serde(rename = "CO", alias = "co")]
    Control,
}

impl FunctionalConstraint {
    pub const ALL: [FunctionalConstraint; 13] = [
        Self::Status,
        Self::Measurand,
        Self::Setpoint,
        Self::Substitution,
        Self::Configuration,
        Self::Description,
        Self::SettingGroup,
        Self::SettingGroupEditable,
        Self::ServiceResponse,
        Self::OperateReceived,
        Self::Blocking,
        Self::ExtendedDefinition,
        Self::Control,
    ];

    /// Two-letter FC code
    ///
    /// ```
    /// # use iec61850_model::FunctionalConstraint;
    /// assert_eq!(FunctionalConstraint::Measurand.as_str(), "MX");
    /// assert_eq!("dc".parse::<FunctionalConstraint>().unwrap(), FunctionalConstraint::Description);
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "ST",
            Self::Measurand => "MX",
            Self::Setpoint => "SP",
            Self::Substitution => "SV",
            Self::Configuration => "CF",
            Self::Description => "DC",
            Self::SettingGroup => "SG",
            Self::SettingGroupEditable => "SE",
            Self::ServiceResponse => "SR",
            Self::OperateReceived => "OR",
            Self::Blocking => "BL",
            Self::ExtendedDefinition => "EX",
            Self::Control => "CO",
        }
    }
}

impl fmt::Display for FunctionalConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionalConstraint {
    type Err = IedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|fc| fc.as_str() == upper)
            .ok_or_else(|| IedError::InvalidConfig {
                field: "functional_constraint".to_string(),
                reason: format!("unknown functional constraint '{s}'"),
            })
    }
}

// ============================================================================
// FC index
// ============================================================================

/// FC -> attributes carrying it, in declaration order
///
/// Built once when the model is frozen.
#[derive(Debug, Default, Clone)]
pub struct FcIndex {
    entries: FxHashMap<FunctionalConstraint, Vec<NodeId>>,
}

impl FcIndex {
    pub(crate) fn insert(&mut self, fc: FunctionalConstraint, node: NodeId) {
        self.entries.entry(fc).or_default().push(node);
    }

    /// Attributes tagged with `fc`
    pub fn attributes(&self, fc: FunctionalConstraint) -> &[NodeId] {
        self.entries.get(&fc).map_or(&[][..], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
