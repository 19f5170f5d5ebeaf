//! Translation of driven-port failures into the domain error taxonomy.

use serde_json::json;

use super::Error;
use super::ports::{IdentityRepositoryError, TransferIntentRepositoryError};

pub(crate) fn map_identity_repository_error(error: IdentityRepositoryError) -> Error {
    match error {
        IdentityRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("identity repository unavailable: {message}"))
        }
        IdentityRepositoryError::Query { message } => {
            Error::internal(format!("identity repository error: {message}"))
        }
        IdentityRepositoryError::DuplicateEmail { partition } => {
            Error::duplicate_email("email address is already registered")
                .with_details(json!({ "rejectedBy": partition }))
        }
        IdentityRepositoryError::NotFound { id } => {
            Error::not_found("identity does not exist").with_details(json!({ "id": id }))
        }
        IdentityRepositoryError::Conflict { id } => {
            Error::service_unavailable("identity is being modified concurrently; retry")
                .with_details(json!({ "id": id, "reason": "concurrentModification" }))
        }
    }
}

pub(crate) fn map_transfer_intent_error(error: TransferIntentRepositoryError) -> Error {
    match error {
        TransferIntentRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("transfer intent store unavailable: {message}"))
        }
        TransferIntentRepositoryError::Query { message } => {
            Error::internal(format!("transfer intent store error: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::rstest;

    #[rstest]
    #[case(IdentityRepositoryError::connection("down"), ErrorCode::ServiceUnavailable)]
    #[case(IdentityRepositoryError::query("syntax"), ErrorCode::InternalError)]
    #[case(IdentityRepositoryError::duplicate_email("teachers"), ErrorCode::DuplicateEmail)]
    #[case(IdentityRepositoryError::not_found("EXB-TC-1-0001"), ErrorCode::NotFound)]
    #[case(IdentityRepositoryError::conflict("EXB-TC-1-0001"), ErrorCode::ServiceUnavailable)]
    fn identity_errors_map_to_codes(
        #[case] error: IdentityRepositoryError,
        #[case] expected: ErrorCode,
    ) {
        assert_eq!(map_identity_repository_error(error).code(), expected);
    }

    #[rstest]
    fn intent_connection_errors_are_unavailable() {
        let mapped = map_transfer_intent_error(TransferIntentRepositoryError::connection("down"));
        assert_eq!(mapped.code(), ErrorCode::ServiceUnavailable);
    }
}
