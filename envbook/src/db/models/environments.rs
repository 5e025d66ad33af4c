use sqlx::FromRow;

use crate::types::EnvironmentId;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EnvironmentRow {
    pub environment_id: EnvironmentId,
    pub display_name: String,
    pub requires_secret_material: bool,
    pub description: Option<String>,
}
