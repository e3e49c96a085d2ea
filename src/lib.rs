pub mod assembler;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod logging;
pub mod message;
pub mod providers;
pub mod relay;
pub mod server;
pub mod upstream;

pub use assembler::ToolCallAssembler;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use event::{AssembledToolCall, Event, FinishReason};
pub use logging::SessionLog;
pub use relay::{RelayConfig, RelayHooks, RelayOutcome, RelaySender, StreamRelay};
pub use server::{build_router, AppState};
