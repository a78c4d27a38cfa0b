use crate::clock::Timestamp;
use crate::config::DeviceConfig;
use serde::{Deserialize, Serialize};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Diagnostic document published on the info topic in answer to a ping and
/// after every (re)connection. All fields are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct StatusReport {
    pub time: String,
    pub version: String,
    pub ip: String,
    pub dns: String,
    pub gateway: String,
    pub subnet: String,
    pub mqtt: String,
    pub ntp: String,
    pub site: String,
    #[serde(rename = "EQUIPMENTID")]
    pub equipment_id: String,
    #[serde(rename = "CLIENTID")]
    pub client_id: String,
    #[serde(rename = "VTHRESHOLD")]
    pub voltage_threshold: String,
}

impl StatusReport {
    pub fn new(time: Timestamp, config: &DeviceConfig) -> Self {
        Self {
            time: time.to_string(),
            version: FIRMWARE_VERSION.to_string(),
            ip: config.ip.to_string(),
            dns: config.dns.to_string(),
            gateway: config.gateway.to_string(),
            subnet: config.subnet.to_string(),
            mqtt: config.mqtt.to_string(),
            ntp: config.ntp.to_string(),
            site: config.site.clone(),
            equipment_id: config.equipment_id.clone(),
            client_id: config.client_id.clone(),
            voltage_threshold: format!("{:.1}", config.voltage_threshold),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
