use std::convert::Infallible;

use super::resolve::ResolveErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
    /// A component the factory depends on couldn't be resolved
    #[error(transparent)]
    Resolve(Box<ResolveErrorKind>),
    #[error("Factory panicked: {message}")]
    Panicked { message: String },
}

impl From<ResolveErrorKind> for InstantiateErrorKind {
    #[inline]
    fn from(err: ResolveErrorKind) -> Self {
        Self::Resolve(Box::new(err))
    }
}

impl From<Infallible> for InstantiateErrorKind {
    #[inline]
    fn from(err: Infallible) -> Self {
        match err {}
    }
}
