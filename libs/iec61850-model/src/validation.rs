//! Validation Utilities
//!
//! Pure validation logic for model construction.
//! No IO dependencies.

use errors::{IedError, IedResult};

use crate::cdc::MANDATORY_DATA_OBJECTS;
use crate::model::IedModel;
use crate::node::NodeKind;

/// Validate a node name
///
/// Rules:
/// - Length: 1-64 characters
/// - Characters: alphanumeric and underscore (_)
/// - Cannot start with a number
///
/// `/` and `.` are reference separators and can never appear in a name.
///
/// # Examples
/// ```
/// use iec61850_model::validate_node_name;
///
/// assert!(validate_node_name("LLN0").is_ok());
/// assert!(validate_node_name("ctlVal").is_ok());
/// assert!(validate_node_name("mag.f").is_err());
/// assert!(validate_node_name("0ZBAT").is_err());
/// assert!(validate_node_name("").is_err());
/// ```
pub fn validate_node_name(name: &str) -> IedResult<()> {
    if name.is_empty() {
        return Err(IedError::InvalidReference(
            "Node name cannot be empty".to_string(),
        ));
    }
    if name.len() > 64 {
        return Err(IedError::InvalidReference(format!(
            "Node name too long ({} characters). Maximum length is 64 characters.",
            name.len()
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IedError::InvalidReference(format!(
            "Node name can only contain letters, numbers and underscores. Invalid name: '{}'",
            name
        )));
    }

    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(IedError::InvalidReference(format!(
            "Node name cannot start with a number: '{}'",
            name
        )));
    }

    Ok(())
}

/// Check every logical node for the mandatory data objects
///
/// Returns the first missing object found, walking devices and logical nodes
/// in declaration order.
pub fn check_mandatory_objects(model: &IedModel) -> IedResult<()> {
    for &device in model.devices() {
        for &ln in model.node(device).children() {
            if !matches!(model.node(ln).kind(), NodeKind::LogicalNode) {
                continue;
            }
            for object in MANDATORY_DATA_OBJECTS {
                let present = model
                    .find_child(ln, object)
                    .is_some_and(|id| matches!(model.node(id).kind(), NodeKind::DataObject { .. }));
                if !present {
                    return Err(IedError::MissingMandatoryObject {
                        logical_node: model.path(ln),
                        object: object.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
