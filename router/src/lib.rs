/// Pairwise ranking webserver
pub mod logging;
pub mod server;

pub use server::run;

use pairrank_core::session::RankingUpdate;
use pairrank_core::store::Record;
use pairrank_core::RankError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub(crate) struct StartRankingRequest {
    pub session_id: String,
    /// Shuffle the pending queue before the first draw.
    #[serde(default)]
    #[schema(default = "false", example = "false")]
    pub randomize: bool,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct CompareRequest {
    pub session_id: String,
    /// `true` if the candidate (left item) ranks ahead of the opponent.
    pub candidate_preferred: bool,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct SessionRequest {
    pub session_id: String,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct UploadResponse {
    #[schema(example = "6f2c7d4e-8a31-4c3d-9b2a-5a0f0cb8e1d7")]
    pub session_id: String,
    #[schema(example = "42")]
    pub item_count: usize,
    pub fieldnames: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct CleanupResponse {
    pub success: bool,
}

/// The driving-call result: the next pair to show, or the finished order.
#[derive(Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum RankResponse {
    Ranking {
        session_id: String,
        #[schema(value_type = Object)]
        left_item: Map<String, Value>,
        #[schema(value_type = Object)]
        right_item: Map<String, Value>,
        items_done: usize,
        total_items: usize,
        comparisons: usize,
        fieldnames: Vec<String>,
    },
    Complete {
        session_id: String,
        #[schema(value_type = Vec<Object>)]
        sorted_items: Vec<Map<String, Value>>,
    },
}

impl RankResponse {
    pub(crate) fn from_update(session_id: String, update: RankingUpdate) -> Self {
        match update {
            RankingUpdate::Comparison(view) => RankResponse::Ranking {
                session_id,
                left_item: record_to_json(&view.schema, &view.left),
                right_item: record_to_json(&view.schema, &view.right),
                items_done: view.items_done,
                total_items: view.total_items,
                comparisons: view.comparisons,
                fieldnames: view.schema,
            },
            RankingUpdate::Complete(view) => RankResponse::Complete {
                session_id,
                sorted_items: view
                    .sorted
                    .iter()
                    .map(|record| record_to_json(&view.schema, record))
                    .collect(),
            },
        }
    }
}

pub(crate) fn record_to_json(schema: &[String], record: &Record) -> Map<String, Value> {
    schema
        .iter()
        .zip(record.values())
        .map(|(column, value)| (column.clone(), Value::String(value.clone())))
        .collect()
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorType {
    NotFound,
    Format,
    InvalidState,
    Validation,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub error_type: ErrorType,
}

impl From<RankError> for ErrorResponse {
    fn from(err: RankError) -> Self {
        let error_type = match err {
            RankError::SessionNotFound(_) => ErrorType::NotFound,
            RankError::Format(_) | RankError::Csv(_) => ErrorType::Format,
            RankError::NotComparing | RankError::NotComplete => ErrorType::InvalidState,
        };
        Self {
            error: err.to_string(),
            error_type,
        }
    }
}
