//! Shared values for the intercept subsystem
//!
//! Everything in this crate is a plain, transferable value: the proxy side
//! and the control plane exchange these types and nothing else. Live flow
//! handles never leave the proxy process.

pub mod action;
pub mod headers;
pub mod messages;
pub mod snapshot;
pub mod toggle;
pub mod transport;

pub use action::{Action, ActionKind, ActionOutcome, Modification, ModificationError, OutcomeKind};
pub use headers::HeaderList;
pub use messages::{ClientMessage, ServerMessage};
pub use snapshot::{body_from_wire, body_to_wire, FlowId, FlowSnapshot, ResponseSnapshot};
pub use toggle::{InterceptToggle, ToggleState};
pub use transport::{ControlPlaneTransport, TransportError};
