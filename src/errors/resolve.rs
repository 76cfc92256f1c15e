use super::instantiate::InstantiateErrorKind;
use crate::utils::thread_safety::RcThreadSafety;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ResolveErrorKind {
    #[error("No component is registered under the name '{name}'")]
    NoProvider { name: String },
    #[error("Incorrect component type under the name '{name}'. Expected: {expected}")]
    IncorrectType { name: String, expected: &'static str },
    /// The factory failed. The failure is shared by every caller of the component.
    #[error("Component '{name}' failed to instantiate: {error}")]
    Factory {
        name: String,
        error: RcThreadSafety<InstantiateErrorKind>,
    },
    /// Every owning handle of the container was dropped, only factory handles are left
    #[error("Container is dropped, '{name}' can't be resolved")]
    ContainerDropped { name: String },
}

impl ResolveErrorKind {
    /// Name of the component the resolution was requested for.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NoProvider { name }
            | Self::IncorrectType { name, .. }
            | Self::Factory { name, .. }
            | Self::ContainerDropped { name } => name,
        }
    }
}
