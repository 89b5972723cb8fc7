mod config;
mod emitter;
mod error;
mod proxy;
mod rpc;
mod run_state;
mod secrets;

pub use config::RuntimeConfig;
pub use emitter::{DEFAULT_CAPACITY, EmitOutcome, Emitter};
pub use error::{Error, Result};
pub use proxy::{ProxyOptions, run_proxy};
pub use rpc::RpcId;
pub use run_state::RunState;
pub use secrets::{
    ResolvedBinding, SecretBinding, SecretStore, ServerBindings, parse_bindings, resolve_bindings,
};
