//! Relay core library: tenant gate, completion relay, lifecycle hooks, and the HTTP gateway
//! used by the `relay` CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod hooks;
pub mod init;
pub mod llm;
pub mod relay;
pub mod tenant;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_support;
