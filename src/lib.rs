//! Chantal: mirrors RPM, DEB, APK, and Helm package repositories into a
//! content-addressed local store, catalogs them relationally, and
//! republishes immutable snapshots or composed views.
//!
//! See each module's doc comment for the spec section it implements.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod family;
pub mod publish;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod tools;
pub mod view;

pub use error::{ChantalError, Result};
