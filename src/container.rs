use futures::future::try_join_all;
use indexmap::IndexMap;
use std::{any::type_name, collections::HashMap, fmt};
use tracing::{debug, debug_span, error, trace, warn, Instrument as _};

use crate::{
    errors::ResolveErrorKind,
    event::{boxed_listener, Event, EventTarget, ListenerId},
    provider::{Provider, SharedInstance},
    utils::thread_safety::{RcAnyThreadSafety, RcThreadSafety, SendSafety, SyncSafety, WeakThreadSafety},
};

/// A simplistic asynchronous dependency injection container.
///
/// Holds a fixed set of [`Provider`]s, indexed by name and by tag. Every component is a
/// singleton per container: its factory runs on the first resolution and the result is shared
/// by all later ones. Cloning a container is cheap and yields a handle to the same components.
///
/// Factories receive a handle that doesn't own the container. Once every owning handle is
/// dropped, resolving through a factory handle fails with [`ResolveErrorKind::ContainerDropped`].
#[derive(Clone)]
pub struct Container {
    inner: Handle,
}

#[derive(Clone)]
enum Handle {
    Owned(RcThreadSafety<ContainerInner>),
    Factory(WeakThreadSafety<ContainerInner>),
}

struct ContainerInner {
    providers: IndexMap<String, RcThreadSafety<Provider>>,
    by_tag: HashMap<String, Vec<RcThreadSafety<Provider>>>,
    events: EventTarget,
}

impl Container {
    /// Creates a container from providers keyed by component name.
    ///
    /// Names keep the order of the map, the tag index is built once here.
    #[must_use]
    pub fn new(providers: IndexMap<String, RcThreadSafety<Provider>>) -> Self {
        trace!("Number of value providers: {}", providers.len());

        let mut by_tag: HashMap<String, Vec<RcThreadSafety<Provider>>> = HashMap::new();
        for provider in providers.values() {
            for tag in provider.tags() {
                let tagged = by_tag.entry(tag.clone()).or_default();
                if !tagged.iter().any(|other| RcThreadSafety::ptr_eq(other, provider)) {
                    tagged.push(provider.clone());
                }
            }
        }
        trace!("Number of tags: {}", by_tag.len());

        Self {
            inner: Handle::Owned(RcThreadSafety::new(ContainerInner {
                providers,
                by_tag,
                events: EventTarget::new(),
            })),
        }
    }

    /// Creates a container from providers keyed by their own names.
    /// A later provider replaces an earlier one with the same name.
    #[must_use]
    pub fn from_providers(providers: impl IntoIterator<Item = Provider>) -> Self {
        Self::new(
            providers
                .into_iter()
                .map(|provider| (provider.name().to_owned(), RcThreadSafety::new(provider)))
                .collect(),
        )
    }

    /// Gets a named component from the container
    ///
    /// # Errors
    /// - Returns [`ResolveErrorKind::NoProvider`] if no component is registered under the name
    /// - Returns [`ResolveErrorKind::IncorrectType`] if the component isn't a `T`
    /// - Returns [`ResolveErrorKind::Factory`] if the component factory failed
    /// - Returns [`ResolveErrorKind::ContainerDropped`] if called through a factory handle of a dropped container
    pub async fn get<T>(&self, name: &str) -> Result<RcThreadSafety<T>, ResolveErrorKind>
    where
        T: SendSafety + SyncSafety + 'static,
    {
        let dependency = self.get_any(name).await?;
        downcast(name, dependency)
    }

    /// Gets a named component without checking its type
    ///
    /// # Errors
    /// Same as [`Container::get`], except for [`ResolveErrorKind::IncorrectType`]
    pub async fn get_any(&self, name: &str) -> Result<RcAnyThreadSafety, ResolveErrorKind> {
        let instance = self.instance(name)?;
        instance.instrument(debug_span!("resolve", name)).await
    }

    /// Gets multiple named components, resolved concurrently.
    ///
    /// Components are returned in the order of `names`, the same name may be requested more than once.
    ///
    /// # Errors
    /// Returns the first error of the requested components, see [`Container::get`]
    pub async fn get_all<T, I>(&self, names: I) -> Result<Vec<RcThreadSafety<T>>, ResolveErrorKind>
    where
        T: SendSafety + SyncSafety + 'static,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let names = collect_names(names);
        let dependencies = self.resolve_all(&names).await?;

        names
            .iter()
            .zip(dependencies)
            .map(|(name, dependency)| downcast(name, dependency))
            .collect()
    }

    /// Gets multiple named components without checking their types, see [`Container::get_all`]
    ///
    /// # Errors
    /// Same as [`Container::get_all`], except for [`ResolveErrorKind::IncorrectType`]
    pub async fn get_all_any<I>(&self, names: I) -> Result<Vec<RcAnyThreadSafety>, ResolveErrorKind>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let names = collect_names(names);
        self.resolve_all(&names).await
    }

    /// Gets every component registered under the tag, resolved concurrently.
    ///
    /// An unknown tag isn't an error, it resolves to no components.
    /// The order of the components is unspecified.
    ///
    /// # Errors
    /// Returns the first error of the tagged components, see [`Container::get`]
    pub async fn get_all_tagged<T>(&self, tag: &str) -> Result<Vec<RcThreadSafety<T>>, ResolveErrorKind>
    where
        T: SendSafety + SyncSafety + 'static,
    {
        // The container itself isn't held while the instances are awaited
        let instances: Vec<(String, SharedInstance)> = {
            let inner = self.upgrade(tag)?;
            let Some(providers) = inner.by_tag.get(tag) else {
                debug!(tag, "No components tagged");
                return Ok(Vec::new());
            };
            providers
                .iter()
                .map(|provider| (provider.name().to_owned(), provider.instance(self)))
                .collect()
        };

        try_join_all(instances.into_iter().map(|(name, instance)| async move {
            let dependency = instance
                .instrument(debug_span!("resolve", name = name.as_str(), tag))
                .await?;
            downcast(&name, dependency)
        }))
        .await
    }

    /// Names of all registered components in registration order
    #[must_use]
    pub fn get_names(&self) -> Vec<String> {
        self.inner()
            .map(|inner| inner.providers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// If this returns `true`, [`Container::get`] with the same name won't fail with [`ResolveErrorKind::NoProvider`]
    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.inner().is_some_and(|inner| inner.providers.contains_key(name))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner().map_or(0, |inner| inner.providers.len())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes `listener` to events of `event_type`
    pub fn add_listener<F>(&self, event_type: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + SendSafety + SyncSafety + 'static,
    {
        let event_type = event_type.into();
        match self.inner() {
            Some(inner) => inner.events.add_listener(event_type, boxed_listener(listener)),
            None => {
                warn!(event_type = %event_type, "Container is dropped, the listener is ignored");
                ListenerId::next()
            }
        }
    }

    /// Returns `false` if there was no such listener
    pub fn remove_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.inner()
            .is_some_and(|inner| inner.events.remove_listener(event_type, id))
    }

    /// Synchronously notifies the listeners of the event type in the order they were added.
    /// Returns the number of notified listeners.
    ///
    /// The container never dispatches events itself.
    pub fn dispatch(&self, event: &Event) -> usize {
        self.inner().map_or(0, |inner| inner.events.dispatch(event))
    }
}

impl Container {
    /// Handle passed to factories
    pub(crate) fn downgrade(&self) -> Self {
        let weak = match &self.inner {
            Handle::Owned(inner) => RcThreadSafety::downgrade(inner),
            Handle::Factory(weak) => weak.clone(),
        };
        Self {
            inner: Handle::Factory(weak),
        }
    }

    fn inner(&self) -> Option<RcThreadSafety<ContainerInner>> {
        match &self.inner {
            Handle::Owned(inner) => Some(inner.clone()),
            Handle::Factory(weak) => weak.upgrade(),
        }
    }

    fn upgrade(&self, name: &str) -> Result<RcThreadSafety<ContainerInner>, ResolveErrorKind> {
        self.inner().ok_or_else(|| {
            let err = ResolveErrorKind::ContainerDropped { name: name.to_owned() };
            error!("{}", err);
            err
        })
    }

    fn instance(&self, name: &str) -> Result<SharedInstance, ResolveErrorKind> {
        let span = debug_span!("resolve", name);
        let _guard = span.enter();

        let inner = self.upgrade(name)?;
        let Some(provider) = inner.providers.get(name) else {
            let err = ResolveErrorKind::NoProvider { name: name.to_owned() };
            error!("{}", err);
            return Err(err);
        };
        Ok(provider.instance(self))
    }

    async fn resolve_all(&self, names: &[String]) -> Result<Vec<RcAnyThreadSafety>, ResolveErrorKind> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        try_join_all(names.iter().map(|name| self.get_any(name))).await
    }
}

fn collect_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    names.into_iter().map(|name| name.as_ref().to_owned()).collect()
}

fn downcast<T>(name: &str, dependency: RcAnyThreadSafety) -> Result<RcThreadSafety<T>, ResolveErrorKind>
where
    T: SendSafety + SyncSafety + 'static,
{
    dependency.downcast::<T>().map_err(|_| {
        let err = ResolveErrorKind::IncorrectType {
            name: name.to_owned(),
            expected: type_name::<T>(),
        };
        error!("{}", err);
        err
    })
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(inner) = self.inner() else {
            return f.debug_struct("Container").field("dropped", &true).finish();
        };
        f.debug_struct("Container")
            .field("providers", &inner.providers.values().collect::<Vec<_>>())
            .field("tags", &inner.by_tag.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Container;
    use crate::{
        event::Event, utils::thread_safety::RcThreadSafety, InstantiateErrorKind, Provider, ResolveErrorKind,
    };

    use indexmap::IndexMap;
    use parking_lot::Mutex;
    use std::{
        collections::BTreeSet,
        convert::Infallible,
        sync::{
            atomic::{AtomicU8, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tracing_test::traced_test;

    fn constant(name: &str, value: &'static str) -> Provider {
        Provider::new(name, move |_| async move { Ok::<_, Infallible>(value) })
    }

    struct Tracked(Arc<AtomicU8>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Holder(Container);

    fn tagged(name: &str, value: &'static str, tags: &[&str]) -> Provider {
        Provider::with_tags(name, move |_| async move { Ok::<_, Infallible>(value) }, tags.iter().copied())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get() {
        let container = Container::from_providers([constant("foobar", "value")]);

        let actual = container.get::<&'static str>("foobar").await.unwrap();

        assert_eq!(*actual, "value");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_missing() {
        let container = Container::from_providers([constant("foobar", "test")]);

        let err = container.get::<&'static str>("missing").await.unwrap_err();

        assert!(matches!(&err, ResolveErrorKind::NoProvider { name } if name == "missing"));
        assert_eq!(err.to_string(), "No component is registered under the name 'missing'");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_incorrect_type() {
        let container = Container::from_providers([constant("foobar", "test")]);

        let err = container.get::<u32>("foobar").await.unwrap_err();

        assert!(matches!(&err, ResolveErrorKind::IncorrectType { name, expected } if name == "foobar" && *expected == "u32"));
        // The component itself is still usable with the right type
        assert_eq!(*container.get::<&'static str>("foobar").await.unwrap(), "test");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_with_dependency() {
        let container = Container::from_providers([
            Provider::new("a", |container: Container| async move {
                let b = container.get::<u32>("b").await?;
                Ok::<_, InstantiateErrorKind>(*b + 1)
            }),
            Provider::new("b", |_| async { Ok::<_, Infallible>(41_u32) }),
        ]);

        assert_eq!(*container.get::<u32>("a").await.unwrap(), 42);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_with_missing_dependency() {
        let container = Container::from_providers([Provider::new("a", |container: Container| async move {
            let b = container.get::<u32>("b").await?;
            Ok::<_, InstantiateErrorKind>(*b + 1)
        })]);

        let err = container.get::<u32>("a").await.unwrap_err();

        match err {
            ResolveErrorKind::Factory { name, error } => {
                assert_eq!(name, "a");
                assert!(matches!(&*error, InstantiateErrorKind::Resolve(err) if err.name() == "b"));
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_empty() {
        let container = Container::new(IndexMap::new());

        let actual = container.get_all::<&'static str, _>([] as [&str; 0]).await.unwrap();

        assert!(actual.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_does_not_instantiate_on_empty_input() {
        let call_count = Arc::new(AtomicU8::new(0));
        let container = Container::from_providers([Provider::new("foo", {
            let call_count = call_count.clone();
            move |_| async move {
                call_count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }
        })]);

        let actual = container.get_all::<(), _>(Vec::<String>::new()).await.unwrap();

        assert!(actual.is_empty());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_keeps_input_order() {
        let container = Container::from_providers([
            Provider::new("a", |_| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, Infallible>("A")
            }),
            Provider::new("b", |_| async { Ok::<_, Infallible>("B") }),
            constant("c", "C"),
        ]);

        let actual = container.get_all::<&'static str, _>(["a", "b", "a"]).await.unwrap();

        assert_eq!(actual.iter().map(|value| **value).collect::<Vec<_>>(), ["A", "B", "A"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_fails_on_missing_name() {
        let container = Container::from_providers([constant("foo", "foo")]);

        let err = container.get_all::<&'static str, _>(["foo", "missing"]).await.unwrap_err();

        assert_eq!(err.name(), "missing");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_tagged_unknown_tag() {
        let container = Container::new(IndexMap::new());

        let actual = container.get_all_tagged::<&'static str>("foobar").await.unwrap();

        assert!(actual.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_tagged() {
        let container = Container::from_providers([
            tagged("foo", "foo", &["test"]),
            tagged("bar", "bar", &["test", "other"]),
            tagged("baz", "baz", &["aoeuhtns"]),
        ]);

        let actual = container.get_all_tagged::<&'static str>("test").await.unwrap();

        assert_eq!(
            actual.iter().map(|value| **value).collect::<BTreeSet<_>>(),
            BTreeSet::from(["foo", "bar"])
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_tagged_shares_instances_with_get() {
        let container = Container::from_providers([Provider::with_tags(
            "foo",
            |_| async { Ok::<_, Infallible>(String::from("foo")) },
            ["test"],
        )]);

        let by_name = container.get::<String>("foo").await.unwrap();
        let by_tag = container.get_all_tagged::<String>("test").await.unwrap();

        assert_eq!(by_tag.len(), 1);
        assert!(RcThreadSafety::ptr_eq(&by_name, &by_tag[0]));
    }

    #[test]
    fn test_has() {
        let container = Container::from_providers([constant("foobar", "test")]);

        assert!(container.has("foobar"));
        assert!(!container.has("aoeuhtns"));
    }

    #[test]
    fn test_get_names() {
        let container = Container::from_providers([constant("foo", "foo"), constant("bar", "bar"), constant("baz", "baz")]);

        assert_eq!(container.get_names(), ["foo", "bar", "baz"]);
        assert_eq!(container.len(), 3);
        assert!(!container.is_empty());
    }

    #[test]
    fn test_new_copies_providers() {
        let mut providers = IndexMap::new();
        providers.insert("foo".to_owned(), RcThreadSafety::new(constant("foo", "foo")));
        let container = Container::new(providers.clone());

        providers.insert("bar".to_owned(), RcThreadSafety::new(constant("bar", "bar")));

        assert_eq!(container.get_names(), ["foo"]);
    }

    #[test]
    fn test_dispatch() {
        let container = Container::new(IndexMap::new());
        let received = Arc::new(Mutex::new(Vec::new()));

        let id = container.add_listener("testing", {
            let received = received.clone();
            move |event: &Event| received.lock().push(event.event_type().to_owned())
        });

        assert_eq!(container.dispatch(&Event::new("testing")), 1);
        assert_eq!(container.dispatch(&Event::new("other")), 0);
        assert_eq!(*received.lock(), ["testing"]);

        assert!(container.remove_listener("testing", id));
        assert_eq!(container.dispatch(&Event::new("testing")), 0);
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_any() {
        let container = Container::from_providers([
            constant("foo", "foo"),
            Provider::new("bar", |_| async { Ok::<_, Infallible>(1_u8) }),
        ]);

        let actual = container.get_all_any(["foo", "bar"]).await.unwrap();

        assert_eq!(actual.len(), 2);
        assert_eq!(actual[0].downcast_ref::<&'static str>(), Some(&"foo"));
        assert_eq!(actual[1].downcast_ref::<u8>(), Some(&1));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_get_all_incorrect_type() {
        let container = Container::from_providers([constant("foo", "foo")]);

        let err = container.get_all::<u8, _>(["foo"]).await.unwrap_err();

        assert!(matches!(&err, ResolveErrorKind::IncorrectType { name, .. } if name == "foo"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_dropped_container_releases_abandoned_instantiations() {
        let drop_count = Arc::new(AtomicU8::new(0));
        let container = Container::from_providers([
            Provider::new("tracked", {
                let drop_count = drop_count.clone();
                move |_| async move { Ok::<_, Infallible>(Tracked(drop_count)) }
            }),
            Provider::new("slow", |container: Container| async move {
                container.get::<Tracked>("tracked").await?;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, InstantiateErrorKind>(())
            }),
            Provider::new("fail", |_| async {
                Err::<(), _>(InstantiateErrorKind::Custom(anyhow::anyhow!("boom")))
            }),
        ]);

        container.get::<Tracked>("tracked").await.unwrap();
        let err = container.get_all::<(), _>(["slow", "fail"]).await.unwrap_err();
        assert_eq!(err.name(), "fail");
        assert_eq!(drop_count.load(Ordering::SeqCst), 0);

        drop(container);

        assert_eq!(drop_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_factory_handle_outlives_container() {
        let container = Container::from_providers([
            constant("foo", "foo"),
            Provider::new("holder", |container: Container| async move { Ok::<_, Infallible>(Holder(container)) }),
        ]);
        let holder = container.get::<Holder>("holder").await.unwrap();

        assert_eq!(*holder.0.get::<&'static str>("foo").await.unwrap(), "foo");
        assert!(holder.0.has("foo"));

        drop(container);

        let err = holder.0.get::<&'static str>("foo").await.unwrap_err();
        assert!(matches!(&err, ResolveErrorKind::ContainerDropped { name } if name == "foo"));
        assert!(!holder.0.has("foo"));
        assert!(holder.0.is_empty());
        assert_eq!(holder.0.dispatch(&Event::new("testing")), 0);
        assert!(logs_contain("Container is dropped, 'foo' can't be resolved"));
    }
}
