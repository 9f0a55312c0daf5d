use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::principal::{Principal, Role};

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Forbidden(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::Forbidden(format!("{name} header is not valid text")))
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, PRINCIPAL_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Forbidden(format!("invalid principal id: {err}")))?;
        let role = header(parts, PRINCIPAL_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(AppError::Forbidden)?;

        Ok(Principal { id, role })
    }
}
