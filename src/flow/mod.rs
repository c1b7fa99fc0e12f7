//! Screen-level navigation for the capture flow.
//!
//! The flow is a pure reducer over [`FlowState`]; [`FlowNavigator`] holds the
//! current state and performs the side effects of a full reset.

mod navigator;
mod reducer;
mod screen;

pub use navigator::FlowNavigator;
pub use reducer::{back, reduce, start_over};
pub use screen::{FlowEvent, FlowFlags, FlowState, Screen};
