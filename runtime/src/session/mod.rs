//! Authentication for the source: selector fallback chains and the login
//! state machine that drives them.

pub mod login;
pub mod probe;
pub mod selectors;

pub use login::{LoginFailure, LoginReport, LoginState, SessionManager};
pub use probe::{any_visible, probe_chain, Candidate};
pub use selectors::{ExportSelectors, LoginSelectors};
