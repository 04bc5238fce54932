use std::collections::HashMap;

use datatype::ecu::{EcuSerial, HardwareIdentifier};
use datatype::tuf::{TargetInfo, Targets};
use datatype::Error;
use uptane::delegation::resolve_target;


/// One entry of a resolved update plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub ecu_serial: EcuSerial,
    pub filepath: String,
    pub length: u64,
    pub hashes: HashMap<String, String>,
}

/// A known ECU the resolver may assign targets to.
#[derive(Debug, Clone)]
pub struct KnownEcu {
    pub serial: EcuSerial,
    pub hardware_id: HardwareIdentifier,
}

/// Cross-check Director targets against Image-repo targets and produce a
/// concrete, ordered update plan. `installed` is the persisted
/// ECU → currently-installed-hash map used for the no-op skip.
pub fn resolve_plan(
    director: &Targets,
    image: &Targets,
    image_fetched: &HashMap<String, Targets>,
    known_ecus: &[KnownEcu],
    installed: &HashMap<EcuSerial, String>,
) -> Result<Vec<PlanEntry>, Error> {
    let ecus_by_serial: HashMap<&str, &KnownEcu> =
        known_ecus.iter().map(|ecu| (&*ecu.serial, ecu)).collect();

    let mut plan = Vec::new();

    let mut director_entries: Vec<(&String, &TargetInfo)> = director.targets.iter().collect();
    director_entries.sort_by(|a, b| a.0.cmp(b.0));

    for (path, d_info) in director_entries {
        let custom = d_info.custom.as_ref().ok_or_else(|| {
            Error::VerifyMalformedDocument(format!("{}: director target missing custom field", path))
        })?;
        let ecu_id = custom.ecu_identifier.as_ref().ok_or_else(|| {
            Error::VerifyMalformedDocument(format!("{}: director target missing ecu_identifier", path))
        })?;

        let known = ecus_by_serial
            .get(ecu_id.as_str())
            .ok_or_else(|| Error::PlanUnknownEcu(ecu_id.clone()))?;

        let i_info = resolve_target(image, path, image_fetched)?
            .ok_or_else(|| Error::PlanTargetMismatch(format!("{}: not found in image repo", path)))?;

        if d_info.length != i_info.length {
            return Err(Error::PlanTargetMismatch(format!(
                "{}: length mismatch (director {}, image {})",
                path, d_info.length, i_info.length
            )));
        }

        let agree = d_info
            .hashes
            .iter()
            .any(|(alg, hash)| i_info.hashes.get(alg).map(|h| h == hash).unwrap_or(false));
        if !agree {
            return Err(Error::PlanTargetMismatch(format!("{}: no matching hash algorithm", path)));
        }

        if let Some(hw_ids) = custom.hardware_ids.as_ref() {
            if !hw_ids.iter().any(|id| id.as_str() == &*known.hardware_id) {
                return Err(Error::PlanHardwareIdMismatch(format!(
                    "{}: ecu {} hardware id not in {:?}",
                    path, ecu_id, hw_ids
                )));
            }
        }

        if let Some(current) = installed.get(&known.serial) {
            if d_info.hashes.values().any(|hash| hash == current) {
                continue;
            }
        }

        plan.push(PlanEntry {
            ecu_serial: known.serial.clone(),
            filepath: path.clone(),
            length: d_info.length,
            hashes: d_info.hashes.clone(),
        });
    }

    plan.sort_by(|a, b| (&*a.ecu_serial, &a.filepath).cmp(&(&*b.ecu_serial, &b.filepath)));
    Ok(plan)
}
