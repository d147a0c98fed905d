//! IEC 61850 Model Library
//!
//! The data model shared by the IED server and its clients: typed values,
//! functional constraints, object references, the node tree and the common
//! data class templates used to populate it. Pure logic, no IO.
//!
//! # Modules
//!
//! - `value`: attribute values, quality and data-access error codes
//! - `fc`: functional constraints and the FC index
//! - `reference`: `LD/LN.DO.DA` object references
//! - `node`: node kinds, trigger options and buildable node specs
//! - `model`: the arena-backed model tree
//! - `cdc`: common data class templates
//! - `validation`: naming and mandatory-object checks
//!
//! # Example
//!
//! ```
//! use iec61850_model::{cdc, FunctionalConstraint, IedModel, Value};
//!
//! let mut model = IedModel::new("testmodel");
//! let battery = model.create_device("Battery").unwrap();
//! let zbat = model.add_child(battery, cdc::logical_node_with_mandatory("ZBAT")).unwrap();
//! model.add_child(zbat, cdc::mv("Vol")).unwrap();
//! model.validate().unwrap();
//! model.freeze();
//!
//! let f = model.resolve("Battery/ZBAT.Vol.mag.f").unwrap();
//! assert_eq!(
//!     model.read_with_fc(f, FunctionalConstraint::Measurand).unwrap(),
//!     Value::Float32(0.0)
//! );
//! ```

pub mod cdc;
pub mod fc;
pub mod model;
pub mod node;
pub mod reference;
pub mod validation;
pub mod value;

// Re-exports for convenience
pub use fc::{FcIndex, FunctionalConstraint};
pub use model::IedModel;
pub use node::{AttributeSpec, Cdc, Node, NodeId, NodeKind, NodeSpec, TriggerOptions};
pub use reference::ObjectReference;
pub use validation::validate_node_name;
pub use value::{BasicType, DataAccessError, Quality, Value};
