use serde::{Deserialize, Serialize};

use crate::db::models::environments::EnvironmentRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentResponse {
    pub id: String,
    pub display_name: String,
    pub description: Option<String>,
    /// Booking needs a stored SSH public key
    pub requires_secret_material: bool,
}

impl From<EnvironmentRow> for EnvironmentResponse {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            id: row.environment_id,
            display_name: row.display_name,
            description: row.description,
            requires_secret_material: row.requires_secret_material,
        }
    }
}
