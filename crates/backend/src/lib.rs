//! Session ownership, the wire protocol, and the duplex-turn glue that sits between
//! `gateway-core`'s adapter/processor and the binary's axum handlers.

pub mod session;
pub mod turn;
pub mod wire;

pub use session::{spawn_reaper, Session, SessionStore, StoreError};
pub use turn::{process_client_message, TurnContext};
pub use wire::{ErrorBody, IncomingFrame, ServerFrame};
