//! Common data class templates
//!
//! Each function returns the [`NodeSpec`] of a data object with the standard
//! attribute set of its CDC, with the FC and trigger options IEC 61850-7-3
//! assigns to them. Optional attributes are left out.

use crate::fc::FunctionalConstraint as Fc;
use crate::node::{Cdc, NodeSpec, TriggerOptions};
use crate::value::BasicType;

/// Data objects every logical node must contain
pub const MANDATORY_DATA_OBJECTS: [&str; 4] = ["Mod", "Beh", "Health", "NamPlt"];

/// Control model written into `ctlModel` by the controllable templates
/// (direct control with normal security)
pub const CTL_MODEL_DIRECT_NORMAL: i32 = 1;

/// Logical node pre-populated with `Mod`, `Beh`, `Health` and `NamPlt`
pub fn logical_node_with_mandatory(name: impl Into<String>) -> NodeSpec {
    NodeSpec::logical_node(name).with_children([
        ins("Mod"),
        ins("Beh"),
        ins("Health"),
        lpl("NamPlt"),
    ])
}

fn quality(fc: Fc) -> NodeSpec {
    NodeSpec::attribute("q", fc, BasicType::Quality, TriggerOptions::QCHG)
}

fn timestamp(fc: Fc) -> NodeSpec {
    NodeSpec::attribute("t", fc, BasicType::UtcTimestamp, TriggerOptions::NONE)
}

/// `stVal`/`q`/`t` triple shared by the status classes
fn status(name: impl Into<String>, cdc: Cdc, st_val: BasicType) -> NodeSpec {
    NodeSpec::data_object(name, cdc).with_children([
        NodeSpec::attribute("stVal", Fc::Status, st_val, TriggerOptions::DCHG),
        quality(Fc::Status),
        timestamp(Fc::Status),
    ])
}

/// Single point status
pub fn sps(name: impl Into<String>) -> NodeSpec {
    status(name, Cdc::Sps, BasicType::Boolean)
}

/// Integer status
pub fn ins(name: impl Into<String>) -> NodeSpec {
    status(name, Cdc::Ins, BasicType::Integer32)
}

/// Enumerated status (the enumeration is carried as its ordinal)
pub fn ens(name: impl Into<String>) -> NodeSpec {
    status(name, Cdc::Ens, BasicType::Integer32)
}

/// Controllable single point with direct control
///
/// `Oper` holds the control request; `ctlModel` is read-only for clients.
pub fn spc(name: impl Into<String>) -> NodeSpec {
    status(name, Cdc::Spc, BasicType::Boolean).with_children([
        NodeSpec::constructed("Oper", Fc::Control, TriggerOptions::NONE).with_children([
            NodeSpec::attribute("ctlVal", Fc::Control, BasicType::Boolean, TriggerOptions::NONE),
            NodeSpec::attribute("ctlNum", Fc::Control, BasicType::Integer32, TriggerOptions::NONE),
            NodeSpec::attribute("T", Fc::Control, BasicType::UtcTimestamp, TriggerOptions::NONE),
            NodeSpec::attribute("Test", Fc::Control, BasicType::Boolean, TriggerOptions::NONE),
        ]),
        NodeSpec::attribute(
            "ctlModel",
            Fc::Configuration,
            BasicType::Integer32,
            TriggerOptions::DCHG,
        )
        .read_only()
        .with_initial(CTL_MODEL_DIRECT_NORMAL),
    ])
}

/// Enumerated status setting
pub fn eng(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Eng).with_child(NodeSpec::attribute(
        "setVal",
        Fc::Setpoint,
        BasicType::Integer32,
        TriggerOptions::DCHG,
    ))
}

/// Integer status setting
pub fn ing(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Ing).with_child(NodeSpec::attribute(
        "setVal",
        Fc::Setpoint,
        BasicType::Integer32,
        TriggerOptions::DCHG,
    ))
}

/// Analogue setting
pub fn asg(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Asg).with_child(analogue("setMag", Fc::Setpoint))
}

/// Measured value
pub fn mv(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Mv).with_children([
        analogue("mag", Fc::Measurand),
        quality(Fc::Measurand),
        timestamp(Fc::Measurand),
    ])
}

/// Analogue value: constructed attribute with a single float member `f`
fn analogue(name: &str, fc: Fc) -> NodeSpec {
    NodeSpec::constructed(name, fc, TriggerOptions::DCHG).with_child(NodeSpec::attribute(
        "f",
        fc,
        BasicType::Float32,
        TriggerOptions::DCHG,
    ))
}

fn description(name: &str) -> NodeSpec {
    NodeSpec::attribute(name, Fc::Description, BasicType::VisibleString, TriggerOptions::NONE)
}

/// Logical node name plate
pub fn lpl(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Lpl).with_children([
        description("vendor"),
        description("swRev"),
        description("d"),
        description("configRev"),
    ])
}

/// Device name plate
pub fn dpl(name: impl Into<String>) -> NodeSpec {
    NodeSpec::data_object(name, Cdc::Dpl).with_children([
        description("vendor"),
        description("hwRev"),
        description("swRev"),
        description("serNum"),
        description("model"),
        description("location"),
    ])
}
