use futures::future::{FutureExt as _, Shared};
use parking_lot::Mutex;
use std::{any::Any, collections::BTreeSet, fmt, future::Future, panic::AssertUnwindSafe};
use tracing::{debug, error};

use crate::{
    container::Container,
    errors::{InstantiateErrorKind, ResolveErrorKind},
    utils::{
        thread_safety::{BoxFuture, RcAnyThreadSafety, RcThreadSafety, SendSafety, SyncSafety},
        timing::measure_time,
    },
};

#[cfg(feature = "thread_safe")]
type BoxedFactory = Box<dyn FnOnce(Container) -> BoxFuture<'static, Result<RcAnyThreadSafety, InstantiateErrorKind>> + Send>;

#[cfg(not(feature = "thread_safe"))]
type BoxedFactory = Box<dyn FnOnce(Container) -> BoxFuture<'static, Result<RcAnyThreadSafety, InstantiateErrorKind>>>;

/// In-flight (or finished) instantiation shared by every caller of a provider.
pub(crate) type SharedInstance = Shared<BoxFuture<'static, Result<RcAnyThreadSafety, ResolveErrorKind>>>;

struct Slot {
    factory: Option<BoxedFactory>,
    instance: Option<SharedInstance>,
}

/// A named, tagged component whose factory runs at most once.
///
/// The first call to [`Provider::provide`] stores the instantiation operation itself, so callers
/// that arrive before it finishes attach to the same operation instead of starting another one.
/// A failed instantiation is memoized the same way, a panicking factory counts as failed.
pub struct Provider {
    name: String,
    tags: BTreeSet<String>,
    slot: Mutex<Slot>,
}

impl Provider {
    /// Creates an untagged provider
    #[inline]
    #[must_use]
    pub fn new<F, Fut, T, E>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(Container) -> Fut + SendSafety + 'static,
        Fut: Future<Output = Result<T, E>> + SendSafety + 'static,
        T: SendSafety + SyncSafety + 'static,
        E: Into<InstantiateErrorKind> + 'static,
    {
        Self::with_tags(name, factory, [] as [&str; 0])
    }

    #[must_use]
    pub fn with_tags<F, Fut, T, E, I, Tag>(name: impl Into<String>, factory: F, tags: I) -> Self
    where
        F: FnOnce(Container) -> Fut + SendSafety + 'static,
        Fut: Future<Output = Result<T, E>> + SendSafety + 'static,
        T: SendSafety + SyncSafety + 'static,
        E: Into<InstantiateErrorKind> + 'static,
        I: IntoIterator<Item = Tag>,
        Tag: Into<String>,
    {
        let factory: BoxedFactory = Box::new(move |container: Container| {
            let instance = factory(container);
            Box::pin(async move {
                match instance.await {
                    Ok(value) => Ok::<_, InstantiateErrorKind>(RcThreadSafety::new(value) as RcAnyThreadSafety),
                    Err(err) => Err(err.into()),
                }
            }) as BoxFuture<'static, _>
        });

        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            slot: Mutex::new(Slot {
                factory: Some(factory),
                instance: None,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[inline]
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether the component has already been requested
    #[inline]
    #[must_use]
    pub fn is_instantiated(&self) -> bool {
        self.slot.lock().instance.is_some()
    }

    /// Resolves the component, invoking the factory on the first call only.
    ///
    /// # Errors
    /// Returns [`ResolveErrorKind::Factory`] if the factory failed or panicked, now or on an earlier call.
    pub async fn provide(&self, container: &Container) -> Result<RcAnyThreadSafety, ResolveErrorKind> {
        self.instance(container).await
    }

    pub(crate) fn instance(&self, container: &Container) -> SharedInstance {
        let mut slot = self.slot.lock();
        if let Some(instance) = &slot.instance {
            debug!("Found in cache");
            return instance.clone();
        }
        // No user code runs under the lock, so the factory is never taken without storing the instance
        let Some(factory) = slot.factory.take() else {
            unreachable!("factory is taken only together with storing the instance");
        };

        let instance = instantiate(self.name.clone(), factory, container.downgrade()).shared();
        slot.instance = Some(instance.clone());
        instance
    }
}

/// Builds the operation stored in the slot. The factory is called on its first poll, outside of the slot lock.
///
/// The factory receives a non-owning handle, so a pending operation doesn't keep the container alive.
fn instantiate(
    name: String,
    factory: BoxedFactory,
    container: Container,
) -> BoxFuture<'static, Result<RcAnyThreadSafety, ResolveErrorKind>> {
    let message = format!("Component instantiated: {name}");
    Box::pin(measure_time(
        async move {
            debug!("Instantiating component: {name}");

            let result = match AssertUnwindSafe(async move { factory(container).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(InstantiateErrorKind::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            };
            result.map_err(|err| {
                let err = ResolveErrorKind::Factory {
                    name,
                    error: RcThreadSafety::new(err),
                };
                error!("{}", err);
                err
            })
        },
        message,
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}
