//! DTO definitions used by the admin REST API and documentation layer.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_layout_rows;

/// Request replacing the shared map layout.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct MapUpdateRequest {
    /// Tile rows, top to bottom.
    #[validate(length(min = 1, max = 1024), custom(function = "validate_layout_rows"))]
    pub layout: Vec<String>,
}
