//! A minimal asynchronous dependency injection container.
//!
//! Components are registered by name on a [`Builder`] as factories, optionally with tags.
//! [`Builder::build`] produces a [`Container`] which resolves components by name or by tag,
//! invoking every factory at most once.
//!
//! ```rust
//! use std::convert::Infallible;
//! use wiring::{Builder, Container, InstantiateErrorKind, EAGER_TAG};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = Builder::new();
//! builder
//!     .constant("greeting", "Hello")
//!     .register("message", |container: Container| async move {
//!         let greeting = container.get::<&'static str>("greeting").await?;
//!         Ok::<_, InstantiateErrorKind>(format!("{greeting}, World!"))
//!     })
//!     .register_tagged("startup", |_| async { Ok::<_, Infallible>(()) }, [EAGER_TAG]);
//!
//! let container = builder.build().await?;
//! assert_eq!(*container.get::<String>("message").await?, "Hello, World!");
//! # Ok(())
//! # }
//! ```

pub(crate) mod builder;
pub(crate) mod container;
pub(crate) mod errors;
pub(crate) mod event;
pub(crate) mod provider;

pub mod utils;

pub use builder::{Builder, EAGER_TAG};
pub use container::Container;
pub use errors::{InstantiateErrorKind, ResolveErrorKind};
pub use event::{Event, ListenerId};
pub use provider::Provider;
