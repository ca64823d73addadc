use super::require_non_empty;
use crate::framework::{MutationPolicy, Resource, ValidationError};
use crate::store::object_id::hex_string;
use crate::store::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "<redacted>";

/// A registered user.
///
/// `password` is stored and returned exactly as submitted; hashing is the caller's concern.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "hex_string")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a new user.
#[derive(Clone, Deserialize)]
pub struct UserCreate {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Payload for replacing a user.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReplace {
    pub name: String,
    pub email: String,
    pub password: String,
}

// Request payloads are logged at debug level; the password never is.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl fmt::Debug for UserCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCreate")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

impl fmt::Debug for UserReplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserReplace")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

fn validate_fields(name: &str, email: &str, password: &str) -> Result<(), ValidationError> {
    require_non_empty("name", name)?;
    require_non_empty("email", email)?;
    if !email.contains('@') {
        return Err(ValidationError::new(format!("email is not an address: {email:?}")));
    }
    require_non_empty("password", password)
}

impl Resource for User {
    const KIND: &'static str = "User";
    const COLLECTION: &'static str = "users";
    const POLICY: MutationPolicy = MutationPolicy::Direct;

    type Create = UserCreate;
    type Replace = UserReplace;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn from_create(
        id: ObjectId,
        created_at: DateTime<Utc>,
        params: UserCreate,
    ) -> Result<Self, ValidationError> {
        validate_fields(&params.name, &params.email, &params.password)?;
        Ok(Self {
            id,
            name: params.name,
            email: params.email,
            password: params.password,
            created_at,
        })
    }

    fn validate_replace(replace: &UserReplace) -> Result<(), ValidationError> {
        validate_fields(&replace.name, &replace.email, &replace.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_needs_an_at_sign() {
        let params = UserCreate {
            name: "Alice".into(),
            email: "alice.example.com".into(),
            password: "pw".into(),
        };
        assert!(User::from_create(ObjectId::new(), Utc::now(), params).is_err());
    }

    #[test]
    fn test_empty_password_is_invalid() {
        let replace = UserReplace {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password: String::new(),
        };
        let err = User::validate_replace(&replace).unwrap_err();
        assert!(err.0.contains("password"));
    }

    #[test]
    fn test_debug_output_hides_password() {
        let create = UserCreate {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password: "hunter2-plaintext".into(),
        };
        let replace = UserReplace {
            name: create.name.clone(),
            email: create.email.clone(),
            password: create.password.clone(),
        };
        let user = User::from_create(ObjectId::new(), Utc::now(), create.clone()).unwrap();

        for rendered in [format!("{create:?}"), format!("{replace:?}"), format!("{user:#?}")] {
            assert!(!rendered.contains("hunter2-plaintext"), "{rendered}");
            assert!(rendered.contains("alice@example.com"));
            assert!(rendered.contains(REDACTED));
        }
    }
}
