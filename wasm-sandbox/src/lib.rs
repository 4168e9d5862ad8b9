//! Host bridge (C2) + subprocess runner (C3): the WASM execution surface
//! (spec §4.2–§4.3). Consumed in-process by the scheduler and validation
//! service, and wrapped in an HTTP surface by `wasm-sandbox-server`.

pub mod bridge;
pub mod cache;
pub mod runner;
pub mod settings;

pub use bridge::HostBridge;
pub use cache::WasmCache;
pub use runner::{RunOutcome, RunRequest, WasmRunner};
