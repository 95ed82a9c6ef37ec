pub mod memory;
pub mod rpc;

pub use memory::{MemoryChainContext, MemoryRegistry, ScriptedFault};
pub use rpc::{RpcAdapter, RpcConfig};
