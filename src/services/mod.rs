pub mod access_gate;
pub mod access_recorder;
pub mod credentials;
pub mod geo;
pub mod resolver;
pub mod schedule_selector;
pub mod short_code;
pub mod user_agent;

pub use access_gate::{AccessGate, GateDecision, GateScope};
pub use access_recorder::AccessRecorder;
pub use credentials::{BcryptHasher, CredentialHasher};
pub use resolver::{RedirectOutcome, RedirectResolver, Visitor};
pub use schedule_selector::select_schedule;
