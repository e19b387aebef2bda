//! CLAP-ABI plugin hosting (spec §4.D, §4.H, §6): load/activate/process
//! lifecycle glue plus the thread-pool bridge that lets a plugin fan its
//! own internal work out across the job pool.

mod abi;
mod bridge;
mod host;
mod instance;
pub mod thread_ident;

pub use abi::ProcessStatus;
pub use bridge::ThreadPoolBridge;
pub use instance::PluginInstance;
