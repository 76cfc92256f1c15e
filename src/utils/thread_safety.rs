//! Pointer and future types selected by the `thread_safe` feature.
//!
//! With the feature enabled, components, errors and in-flight instantiations are shared
//! through [`std::sync::Arc`] and every future is `Send`. Without it [`std::rc::Rc`] is used
//! and factories may hold `!Send` state across awaits.

#[cfg(feature = "thread_safe")]
mod thread_safe {
    use std::{
        any::Any,
        future::Future,
        pin::Pin,
        sync::{Arc, Weak},
    };

    pub trait SendSafety: Send {}
    pub trait SyncSafety: Sync {}

    impl<T: Send> SendSafety for T {}
    impl<T: Sync> SyncSafety for T {}

    pub type RcThreadSafety<T> = Arc<T>;
    pub type WeakThreadSafety<T> = Weak<T>;
    pub type RcAnyThreadSafety = RcThreadSafety<dyn Any + Send + Sync>;

    pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

#[cfg(not(feature = "thread_safe"))]
mod thread_unsafe {
    use std::{
        any::Any,
        future::Future,
        pin::Pin,
        rc::{Rc, Weak},
    };

    pub trait SendSafety {}
    pub trait SyncSafety {}

    impl<T> SendSafety for T {}
    impl<T> SyncSafety for T {}

    pub type RcThreadSafety<T> = Rc<T>;
    pub type WeakThreadSafety<T> = Weak<T>;
    pub type RcAnyThreadSafety = RcThreadSafety<dyn Any>;

    pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
}

#[cfg(feature = "thread_safe")]
pub use thread_safe::{RcAnyThreadSafety, RcThreadSafety, SendSafety, SyncSafety, WeakThreadSafety};
#[cfg(feature = "thread_safe")]
pub(crate) use thread_safe::BoxFuture;

#[cfg(not(feature = "thread_safe"))]
pub use thread_unsafe::{RcAnyThreadSafety, RcThreadSafety, SendSafety, SyncSafety, WeakThreadSafety};
#[cfg(not(feature = "thread_safe"))]
pub(crate) use thread_unsafe::BoxFuture;
