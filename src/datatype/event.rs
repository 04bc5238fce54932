use std::fmt::{self, Display, Formatter};

use datatype::ecu::EcuSerial;


/// Outcome of a check or cycle phase, reported alongside its completion
/// event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    Success,
    Failed(String),
}

/// System-wide progress/completion events broadcast to all interested
/// parties. Delivery is best-effort fan-out; no
/// subscriber may block the orchestrator (see `broadcast::Broadcast`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SendDeviceDataComplete,
    PutManifestComplete(bool),

    UpdateCheckComplete(CycleResult),

    DownloadProgressReport(String, String, u8),
    DownloadTargetComplete(String, bool),
    AllDownloadsComplete(CycleResult),

    InstallStarted(EcuSerial),
    InstallTargetComplete(EcuSerial, bool),
    AllInstallsComplete(CycleResult),

    CampaignCheckComplete(CycleResult),
    CampaignAcceptComplete,
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = Event::InstallStarted(EcuSerial("ecu-1".into()));
        assert_eq!(event.to_string(), "InstallStarted(EcuSerial(\"ecu-1\"))");
    }
}
