use indexmap::{IndexMap, IndexSet};
use std::{convert::Infallible, future::Future};
use tracing::{debug, info};

use crate::{
    container::Container,
    errors::{InstantiateErrorKind, ResolveErrorKind},
    provider::Provider,
    utils::{
        thread_safety::{RcThreadSafety, SendSafety, SyncSafety},
        timing::measure_time,
    },
};

/// Components registered with this tag are instantiated when the container is built
pub const EAGER_TAG: &str = "@eager";

/// Assembles configuration for a [`Container`].
///
/// A builder can be reused: [`Builder::build`] resets it after a successful build.
#[derive(Default)]
pub struct Builder {
    providers: IndexMap<String, RcThreadSafety<Provider>>,
    eager: IndexSet<String>,
}

impl Builder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandons registered components and resets the builder to a default state
    pub fn reset(&mut self) {
        self.providers.clear();
        self.eager.clear();
        debug!("The container builder is now in the default state");
    }

    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registers an untagged component, replacing any component with the same name.
    ///
    /// The replacement takes over the tags, so a name registered with [`EAGER_TAG`] earlier
    /// stops being eager. The same goes for [`Builder::register_tagged`] without the tag
    /// and for [`Builder::constant`].
    pub fn register<F, Fut, T, E>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: FnOnce(Container) -> Fut + SendSafety + 'static,
        Fut: Future<Output = Result<T, E>> + SendSafety + 'static,
        T: SendSafety + SyncSafety + 'static,
        E: Into<InstantiateErrorKind> + 'static,
    {
        self.add_provider(Provider::new(name, factory))
    }

    /// Registers a component with tags, replacing any component with the same name and its tags.
    ///
    /// The [`EAGER_TAG`] tag makes the component instantiated by [`Builder::build`].
    pub fn register_tagged<F, Fut, T, E, I, Tag>(&mut self, name: impl Into<String>, factory: F, tags: I) -> &mut Self
    where
        F: FnOnce(Container) -> Fut + SendSafety + 'static,
        Fut: Future<Output = Result<T, E>> + SendSafety + 'static,
        T: SendSafety + SyncSafety + 'static,
        E: Into<InstantiateErrorKind> + 'static,
        I: IntoIterator<Item = Tag>,
        Tag: Into<String>,
    {
        self.add_provider(Provider::with_tags(name, factory, tags))
    }

    /// Registers a constant value as an untagged component, see [`Builder::register`]
    pub fn constant<T>(&mut self, name: impl Into<String>, value: T) -> &mut Self
    where
        T: SendSafety + SyncSafety + 'static,
    {
        self.register(name, move |_| async move { Ok::<_, Infallible>(value) })
    }

    /// Builds a new container and resets the builder to a default state.
    ///
    /// # Errors
    /// Returns the first error of the eager components. The builder keeps its registrations in this case.
    pub async fn build(&mut self) -> Result<Container, ResolveErrorKind> {
        info!(
            "Building a dependency injection container with {} components",
            self.providers.len()
        );

        let container = Container::new(self.providers.clone());
        if !self.eager.is_empty() {
            info!("Instantiating eager components: {:?}", self.eager);

            measure_time(container.get_all_any(&self.eager), "Instantiated eager components").await?;
        }

        self.reset();
        Ok(container)
    }
}

impl Builder {
    fn add_provider(&mut self, provider: Provider) -> &mut Self {
        let name = provider.name().to_owned();
        if provider.has_tag(EAGER_TAG) {
            self.eager.insert(name.clone());
        } else {
            self.eager.shift_remove(&name);
        }
        self.providers.insert(name, RcThreadSafety::new(provider));
        self
    }
}
