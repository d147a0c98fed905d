//! Battery system data model
//!
//! Logical device `Battery` of IED `testmodel` with `LLN0`, the battery
//! (`ZBAT`), the battery charger (`ZBTC`) and the inverter (`ZINV`), plus the
//! loop that pushes a rising voltage measurement into `ZBAT.Vol`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use errors::IedResult;
use iec61850_model::cdc::{self, logical_node_with_mandatory};
use iec61850_model::{IedModel, NodeSpec};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::server::IedServer;

pub const IED_NAME: &str = "testmodel";
pub const DEVICE: &str = "Battery";

/// `ZBAT.Vol.mag.f`, updated by the update loop
pub const VOLTAGE_VALUE: &str = "Battery/ZBAT.Vol.mag.f";
/// `ZBAT.Vol.t`, refreshed together with the voltage
pub const VOLTAGE_TIMESTAMP: &str = "Battery/ZBAT.Vol.t";
/// Name plate vendor, writable through the description FC
pub const VENDOR: &str = "Battery/ZBAT.NamPlt.vendor";

/// Voltage increment per update
const VOLTAGE_STEP: f32 = 0.1;

/// Build and validate the battery model
pub fn build_model() -> IedResult<IedModel> {
    let mut model = IedModel::new(IED_NAME);
    let battery = model.create_device(DEVICE)?;

    model.add_child(battery, logical_node_with_mandatory("LLN0"))?;
    model.add_child(battery, zbat())?;
    model.add_child(battery, zbtc())?;
    model.add_child(battery, zinv())?;

    model.validate()?;
    debug!("Battery model built with {} nodes", model.node_count());
    Ok(model)
}

fn zbat() -> NodeSpec {
    logical_node_with_mandatory("ZBAT").with_children([
        cdc::sps("BatSt"),
        cdc::sps("BatTestRsl"),
        cdc::sps("BatVHi"),
        cdc::sps("BatVLo"),
        cdc::eng("BatTyp"),
        cdc::asg("AhrRtg"),
        cdc::asg("MinAhrRtg"),
        cdc::asg("BatVNom"),
        cdc::ing("BatSerCnt"),
        cdc::ing("BatParCnt"),
        cdc::asg("DisChaRte"),
        cdc::asg("MaxBatA"),
        cdc::asg("MaxChaV"),
        cdc::asg("HiBatVAlm"),
        cdc::asg("LoBatVAlm"),
        cdc::mv("Vol"),
        cdc::mv("VolChgRte"),
        cdc::mv("InBatV"),
        cdc::mv("Amp"),
        cdc::mv("InBatA"),
        cdc::mv("InBatTmp"),
        cdc::spc("BatSt0"),
        cdc::spc("BatTest"),
    ])
}

fn zbtc() -> NodeSpec {
    logical_node_with_mandatory("ZBTC").with_children([
        cdc::eng("BatChaSt"),
        cdc::ins("ChaTms"),
        cdc::eng("BatChaTyp"),
        cdc::asg("ReChaRte"),
        cdc::asg("BatChaPwr"),
        cdc::eng("BatChaMod"),
        cdc::mv("ChaV"),
        cdc::mv("ChaA"),
    ])
}

fn zinv() -> NodeSpec {
    logical_node_with_mandatory("ZINV").with_children([
        cdc::asg("WRtg"),
        cdc::asg("VarRtg"),
        cdc::eng("SwTyp"),
        cdc::eng("CoolTyp"),
        cdc::sps("Stdby"),
        cdc::sps("CurLev"),
        cdc::eng("CmutTyp"),
        cdc::eng("Isotyp"),
        cdc::asg("SwHz"),
        cdc::eng("GridMod"),
        cdc::eng("ACTyp"),
        cdc::asg("OutWSet"),
        cdc::asg("OutVarSet"),
        cdc::asg("OutPFSet"),
        cdc::asg("OutHzSet"),
        cdc::asg("InALim"),
        cdc::asg("InVLim"),
        cdc::eng("PhACnfg"),
        cdc::eng("PhBCnfg"),
        cdc::eng("PhCCnfg"),
        cdc::mv("HeatSinkTmp"),
        cdc::mv("EnclTmp"),
        cdc::mv("AmbAirTemp"),
        cdc::mv("FanSpdVal"),
    ])
}

/// Push a rising voltage and its timestamp every `interval` until cancelled
///
/// Both attributes are written under one model lock, so clients never see
/// a voltage with a stale timestamp.
pub async fn run_update_loop(
    server: Arc<IedServer>,
    interval: Duration,
    cancel: CancellationToken,
) -> IedResult<()> {
    let voltage = server.attribute(VOLTAGE_VALUE)?;
    let timestamp = server.attribute(VOLTAGE_TIMESTAMP)?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut value = 0.0_f32;
    info!("Update loop started ({:?})", interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut model = server.lock_model();
                model.update_timestamp(&timestamp, Utc::now())?;
                model.update_value(&voltage, value)?;
            }
        }
        value += VOLTAGE_STEP;
    }

    info!("Update loop stopped at {:.1}", value);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use iec61850_model::{FunctionalConstraint, Value};

    #[test]
    fn test_model_layout() {
        let model = build_model().unwrap();
        assert_eq!(model.logical_device_names(), vec!["Battery"]);
        assert_eq!(
            model.logical_node_names("Battery").unwrap(),
            vec!["LLN0", "ZBAT", "ZBTC", "ZINV"]
        );
        assert_eq!(
            model.logical_node_names("testmodelBattery").unwrap(),
            vec!["LLN0", "ZBAT", "ZBTC", "ZINV"]
        );
    }

    #[test]
    fn test_voltage_starts_at_zero() {
        let model = build_model().unwrap();
        let f = model.resolve(VOLTAGE_VALUE).unwrap();
        assert_eq!(
            model.read_with_fc(f, FunctionalConstraint::Measurand).unwrap(),
            Value::Float32(0.0)
        );
    }

    #[test]
    fn test_vendor_is_description() {
        let model = build_model().unwrap();
        let vendor = model.resolve(VENDOR).unwrap();
        assert_eq!(
            model.node(vendor).fc(),
            Some(FunctionalConstraint::Description)
        );
    }

    #[test]
    fn test_no_such_attribute() {
        let model = build_model().unwrap();
        assert!(model.resolve("Battery/ZBAT.NoSuchAttr").is_err());
    }
}
