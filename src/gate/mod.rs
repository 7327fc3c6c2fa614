//! Gate server implementation

pub mod client_addr;
pub mod handler;
mod server;

pub use client_addr::ClientAddressMode;
pub use handler::{GateStage, GateState, gate_handler};
pub use server::{Gate, create_router};
