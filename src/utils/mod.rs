//! Utility Module
//!
//! - [`interner`]: string interning for shader define names and values
//!
//! ```rust,ignore
//! use resident::utils::interner;
//!
//! let a = interner::intern("USE_SHADOWS");
//! let b = interner::intern("USE_SHADOWS");
//! assert_eq!(a, b); // O(1) comparison
//! ```

pub mod interner;

pub use interner::Symbol;
