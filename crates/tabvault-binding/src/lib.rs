//! tabvault-binding: observable handles on stored values
//!
//! A [`ReactiveBinding`] owns one key and exposes `(value, set, remove)`
//! plus a `tokio::sync::watch` subscription for changes.
//!
//! ```text
//! plain:      load inline ── set/remove write through ── other tabs' writes
//!                                                        (debounced) update value
//! encrypted:  initial value ── background load (migrates a legacy plaintext
//!             record in place) ── exactly one transition to the loaded value;
//!             no cross-tab sync
//! ```

pub mod binding;
pub mod options;
mod sync;

pub use binding::{Bindable, ReactiveBinding};
pub use options::BindingOptions;
