pub type PermResult<T> = Result<T, PermError>;

#[derive(thiserror::Error, Debug)]
pub enum PermError {
    #[error("object type not registered: {0}")]
    UnregisteredType(String),
    #[error("unknown permission '{permission}' for object type '{object_type}'")]
    UnknownPermission {
        object_type: String,
        permission: String,
    },
    #[error("grant storage for '{0}' is not provisioned yet")]
    NotReady(String),
    #[error("store error")]
    Store(#[from] sqlx::Error),
}

impl PermError {
    pub fn unregistered(object_type: impl Into<String>) -> Self {
        Self::UnregisteredType(object_type.into())
    }

    pub fn unknown_permission(
        object_type: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self::UnknownPermission {
            object_type: object_type.into(),
            permission: permission.into(),
        }
    }

    pub fn not_ready(object_type: impl Into<String>) -> Self {
        Self::NotReady(object_type.into())
    }

    /// Storage-readiness failures are absorbed by the registry; everything
    /// else surfaces to the caller unchanged.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}
