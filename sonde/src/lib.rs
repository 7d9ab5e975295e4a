//! Decoder for live Dart/Flutter AOT heap objects.
//!
//! Given a raw tagged word intercepted inside a running app, `sonde`
//! resolves the referenced object's class against an externally supplied
//! class table, reconstructs its fields from the per-class layout
//! metadata and expands child references up to a bounded depth. The
//! result is an owned, serializable value tree; process attachment, hook
//! selection and output formatting are the host's concern.

mod classes;
mod context;
mod extract;
mod memory;
mod session;
mod tagged;
mod value;

pub use classes::*;
pub use context::*;
pub use extract::*;
pub use memory::*;
pub use session::*;
pub use tagged::*;
pub use value::*;
