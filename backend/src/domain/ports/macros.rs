//! Macro generating the error enums returned by driven ports.
//!
//! Each variant carries named fields and a display message. The macro derives
//! the error traits and adds one snake_case constructor per variant whose
//! parameters accept anything convertible into the field types, so adapters
//! can write `IdentityRepositoryError::query(err.to_string())` or pass a
//! `&str` directly.

macro_rules! define_port_error {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident { $($field:ident : $ty:ty),+ $(,)? } => $message:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant { $($field: $ty),+ },
            )+
        }

        impl $name {
            $(
                ::paste::paste! {
                    #[doc = concat!(
                        "Build [`", stringify!($name), "::", stringify!($variant), "`]."
                    )]
                    pub fn [<$variant:snake>]($($field: impl Into<$ty>),+) -> Self {
                        Self::$variant { $($field: $field.into()),+ }
                    }
                }
            )+
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Constructors and messages of the generated port errors.
    use super::super::{AuditLogError, IdentityRepositoryError, TransferIntentRepositoryError};
    use rstest::rstest;

    #[rstest]
    #[case(
        IdentityRepositoryError::duplicate_email("teachers").to_string(),
        "email address is already registered (rejected by teachers)"
    )]
    #[case(
        IdentityRepositoryError::conflict("EXB-TC-1-0001").to_string(),
        "identity EXB-TC-1-0001 changed since it was read"
    )]
    #[case(
        AuditLogError::write("disk full").to_string(),
        "audit log write failed: disk full"
    )]
    #[case(
        TransferIntentRepositoryError::connection(String::from("refused")).to_string(),
        "transfer intent connection failed: refused"
    )]
    fn constructors_render_their_message(#[case] rendered: String, #[case] expected: &str) {
        assert_eq!(rendered, expected);
    }

    #[rstest]
    fn constructors_convert_into_the_field_type() {
        let from_str = IdentityRepositoryError::not_found("EXB-AD-1-0001");
        let from_string = IdentityRepositoryError::not_found(String::from("EXB-AD-1-0001"));

        assert_eq!(from_str, from_string);
        assert_eq!(
            from_str,
            IdentityRepositoryError::NotFound {
                id: "EXB-AD-1-0001".to_owned()
            }
        );
    }
}
