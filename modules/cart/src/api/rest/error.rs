use apikit::HandlerError;

use crate::domain::error::DomainError;

/// Map domain errors onto envelope error codes.
pub fn domain_error_to_handler(err: DomainError) -> HandlerError {
    match err {
        DomainError::EmptyQuantity => HandlerError::bad_request(err.to_string()),
        DomainError::QuantityLimit { .. } | DomainError::EmptyCart => {
            HandlerError::conflict(err.to_string())
        }
        DomainError::LineNotFound { .. } => HandlerError::not_found(err.to_string()),
    }
}

impl From<DomainError> for HandlerError {
    fn from(e: DomainError) -> Self {
        domain_error_to_handler(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_error_kind() {
        let limit = DomainError::QuantityLimit {
            menu_item_id: "m-1".into(),
            requested: 30,
            max: 20,
        };
        assert_eq!(HandlerError::from(limit).error_code, 409);
        assert_eq!(HandlerError::from(DomainError::EmptyQuantity).error_code, 400);
        let missing = HandlerError::from(DomainError::LineNotFound {
            menu_item_id: "m-1".into(),
        });
        assert_eq!(missing.error_code, 404);
        assert_eq!(missing.message, "item m-1 is not in the cart");
    }
}
