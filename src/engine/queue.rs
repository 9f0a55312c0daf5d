use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct DispatchJob {
    pub order_id: Uuid,
    pub attempt: u32,
}

impl DispatchJob {
    pub fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            attempt: 1,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

pub async fn enqueue_dispatch(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    state
        .dispatch_tx
        .send(job)
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

    state.metrics.dispatch_queue_depth.inc();
    Ok(())
}
