use sqlx::FromRow;
use uuid::Uuid;

/// Key used for fixes from protocols that don't identify the device.
pub const DEFAULT_VEHICLE_KEY: &str = "veh-default";
pub const DEFAULT_VEHICLE_TYPE: &str = "Motorbike";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Vehicle {
    pub id: Uuid,
    pub imei: String, // unique
    pub name: String,
    #[sqlx(rename = "type")]
    pub vehicle_type: String,
}

impl Vehicle {
    /// A vehicle as created on first sight of `imei`.
    pub fn first_seen(imei: &str) -> Self {
        let name = if imei == DEFAULT_VEHICLE_KEY {
            "Unlabeled Vehicle".to_string()
        } else {
            format!("Device {}", imei)
        };
        Self {
            id: Uuid::new_v4(),
            imei: imei.to_string(),
            name,
            vehicle_type: DEFAULT_VEHICLE_TYPE.to_string(),
        }
    }
}
