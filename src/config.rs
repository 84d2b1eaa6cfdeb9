use std::path::Path;

use egui::{Color32, Stroke, Vec2, vec2};

use crate::connection::ConnectionStatus;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct WiringConfig {
    /// Size of the body ports are laid out around.
    pub base_element_size: Vec2,
    pub base_port_size: f32,
    pub inactive_color: Color32,
    pub active_color: Color32,
    pub invalid_color: Color32,
    pub selected_color: Color32,
    pub wire_thickness: f32,
    /// Used for invalid and selected wires.
    pub highlight_wire_thickness: f32,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            base_element_size: vec2(64.0, 64.0),
            base_port_size: 4.5,
            inactive_color: Color32::DARK_GREEN,
            active_color: Color32::GREEN,
            invalid_color: Color32::RED,
            selected_color: Color32::LIGHT_BLUE,
            wire_thickness: 3.0,
            highlight_wire_thickness: 5.0,
        }
    }
}

impl WiringConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded wiring config from: {}", path.display());
        Ok(config)
    }

    pub fn stroke_for(&self, status: ConnectionStatus, selected: bool) -> Stroke {
        if selected {
            return Stroke::new(self.highlight_wire_thickness, self.selected_color);
        }
        match status {
            ConnectionStatus::Inactive => Stroke::new(self.wire_thickness, self.inactive_color),
            ConnectionStatus::Active => Stroke::new(self.wire_thickness, self.active_color),
            ConnectionStatus::Invalid => {
                Stroke::new(self.highlight_wire_thickness, self.invalid_color)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_and_selected_wires_are_thicker() {
        let config = WiringConfig::default();
        assert_eq!(config.stroke_for(ConnectionStatus::Inactive, false).width, 3.0);
        assert_eq!(config.stroke_for(ConnectionStatus::Active, false).width, 3.0);
        assert_eq!(config.stroke_for(ConnectionStatus::Invalid, false).width, 5.0);
        let selected = config.stroke_for(ConnectionStatus::Active, true);
        assert_eq!(selected.width, 5.0);
        assert_eq!(selected.color, config.selected_color);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = WiringConfig::from_json(r#"{ "wire_thickness": 2.0 }"#)
            .expect("partial config should parse");
        assert_eq!(config.wire_thickness, 2.0);
        assert_eq!(config.base_element_size, WiringConfig::default().base_element_size);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            WiringConfig::from_json("{ wire_thickness"),
            Err(ConfigError::Json(_))
        ));
    }
}
