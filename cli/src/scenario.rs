// Scenario files: the devices to insert and place, plus messages to send once
// the mesh has settled
//
// {
//   "config": { "refresh_interval_ms": 2000 },
//   "devices": [ { "label": "A", "power": 10, "x": 0, "y": 0 } ],
//   "messages": [ { "sender": "A", "destination": "C", "content_type": "text", "body": "hi" } ]
// }

use anyhow::{Context, Result};
use meshsim_core::{MeshSimulator, NewDevice, OutgoingMessage, SimConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDevice {
    #[serde(flatten)]
    pub device: NewDevice,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Replaces the CLI's simulation settings when present
    #[serde(default)]
    pub config: Option<SimConfig>,
    pub devices: Vec<ScenarioDevice>,
    #[serde(default)]
    pub messages: Vec<OutgoingMessage>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse scenario")
    }

    /// A four-device line with a fast clock, used by `meshsim example`
    pub fn example() -> Self {
        let device = |label: &str, x: i32| ScenarioDevice {
            device: NewDevice::new(label, 10),
            x,
            y: 10,
        };
        Self {
            config: Some(SimConfig {
                inbox_interval_ms: 250,
                refresh_interval_ms: 2_000,
                handshake_deadline_ms: 1_500,
                seed: Some(42),
                ..Default::default()
            }),
            devices: vec![device("A", 0), device("B", 8), device("C", 16), device("D", 24)],
            messages: vec![OutgoingMessage {
                sender: "A".to_string(),
                destination: "D".to_string(),
                content_type: meshsim_core::ContentType::Text,
                body: "hello from A".to_string(),
            }],
        }
    }

    /// Insert and place every device; their jobs start immediately
    pub fn populate(&self, sim: &MeshSimulator) -> Result<()> {
        for entry in &self.devices {
            let label = entry.device.label.as_str();
            sim.insert_device(entry.device.clone())
                .with_context(|| format!("Failed to insert {}", label))?;
            sim.place_device(label, entry.x, entry.y)
                .with_context(|| format!("Failed to place {}", label))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let json = r#"{
            "devices": [
                { "label": "A", "power": 10, "x": 0, "y": 0 },
                { "label": "B", "power": 4, "x": 3, "y": 0, "walk": true, "refresh_interval_ms": 500 }
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert!(scenario.config.is_none());
        assert!(scenario.messages.is_empty());
        assert_eq!(scenario.devices[1].device.walk, Some(true));
        assert_eq!(scenario.devices[1].device.refresh_interval_ms, Some(500));
        assert_eq!(scenario.devices[1].x, 3);
    }

    #[test]
    fn test_example_survives_json() {
        let json = serde_json::to_string_pretty(&Scenario::example()).unwrap();
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back.devices.len(), 4);
        assert_eq!(back.messages[0].destination, "D");
    }

    #[tokio::test]
    async fn test_populate() {
        let scenario = Scenario::example();
        let sim = MeshSimulator::new(scenario.config.clone().unwrap_or_default()).unwrap();
        scenario.populate(&sim).unwrap();

        assert_eq!(sim.list_devices().len(), 4);
        assert_eq!(sim.chart()["C"].x, 16);
        assert!(scenario.populate(&sim).is_err());
        sim.shutdown().await;
    }
}
