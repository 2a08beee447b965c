//! Agent bridge server — WebSocket connection hub, durable-queue
//! dispatcher, request/response correlation, and heartbeat liveness.

pub mod network;
pub mod relay;
pub mod storage;
pub mod traits;

pub use traits::{DurableQueue, StatusStore};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
