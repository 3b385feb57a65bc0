//! ID newtypes used throughout the control plane.
//!
//! Every ID is a thin wrapper over a 12-character nanoid with manual `sqlx`
//! `Type`/`Encode`/`Decode` impls so it maps transparently onto a Postgres
//! `TEXT` column, the same convention the donor codebase uses for its own
//! entity IDs. The impls are generated by a macro rather than hand-repeated
//! per type since this workspace needs six of them.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs.
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(Self(s))
            }
        }
    };
}

id_newtype!(PrincipalId);
id_newtype!(SongId);
id_newtype!(SessionId);
id_newtype!(RecordingId);
id_newtype!(WebhookId);
id_newtype!(ShowId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_twelve_characters() {
        assert_eq!(PrincipalId::new().as_str().len(), 12);
        assert_eq!(SessionId::new().as_str().len(), 12);
    }

    #[test]
    fn from_string_round_trips() {
        let id = SongId::from_string("abc123".to_string());
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(WebhookId::new(), WebhookId::new());
    }
}
