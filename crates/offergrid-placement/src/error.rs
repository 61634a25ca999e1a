use offergrid_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("task class {0} not found")]
    ClassNotFound(String),

    #[error("offer {offer_id} has no free port at or above {floor}")]
    NoPort { offer_id: String, floor: u64 },

    #[error("cannot encode launch command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
