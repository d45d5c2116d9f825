use axum::http::StatusCode;
use thiserror::Error;

pub type GiftResult<T> = Result<T, GiftError>;

#[derive(Error, Debug)]
pub enum GiftError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("could not allocate a unique gift id")]
    AllocationExhausted,

    #[error("overlay covers {requested:.3} of the symbol, safe limit is {safe:.3}")]
    OverlayExceedsErrorBudget { requested: f32, safe: f32 },

    #[error("image validation failed: {reason}")]
    ImageValidationFailed { reason: String },

    #[error("stylization failed: {0}")]
    StylizationFailed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl GiftError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn image_validation(reason: impl Into<String>) -> Self {
        Self::ImageValidationFailed {
            reason: reason.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GiftError::InvalidPayload(_) | GiftError::ImageValidationFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            GiftError::OverlayExceedsErrorBudget { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GiftError::StylizationFailed(_) => StatusCode::BAD_GATEWAY,
            GiftError::AllocationExhausted => StatusCode::SERVICE_UNAVAILABLE,
            GiftError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            GiftError::Render(_) | GiftError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the person sharing the gift.
    pub fn user_message(&self) -> String {
        match self {
            GiftError::InvalidPayload(detail) => format!("The request cannot be used: {detail}."),
            GiftError::AllocationExhausted => {
                "We could not create a link for your gift right now. Please try again.".into()
            }
            GiftError::OverlayExceedsErrorBudget { safe, .. } => format!(
                "The logo is too large for this QR code. Shrink it to at most {:.0}% of the code or pick a higher error-correction level.",
                safe * 100.0
            ),
            GiftError::ImageValidationFailed { reason } => {
                format!("The photo cannot be used: {reason}.")
            }
            GiftError::StylizationFailed(_) => {
                "Artistic QR generation is unavailable, the standard QR code was used instead."
                    .into()
            }
            GiftError::Cancelled => "The request was cancelled.".into(),
            GiftError::Render(_) | GiftError::Store(_) => "Internal server error".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_bad_request() {
        assert_eq!(
            GiftError::invalid_payload("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GiftError::image_validation("too big").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn overlay_message_names_the_safe_limit() {
        let err = GiftError::OverlayExceedsErrorBudget {
            requested: 0.3,
            safe: 0.2,
        };
        assert!(err.user_message().contains("20%"));
        assert!(err.to_string().contains("0.300"));
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = GiftError::render("pixmap allocation failed");
        assert_eq!(err.user_message(), "Internal server error");
    }
}
