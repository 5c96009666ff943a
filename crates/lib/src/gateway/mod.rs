//! Gateway: HTTP front door for the bot.
//!
//! `GET /` answers health probes. `POST /api/messages` takes one activity, runs the turn on
//! its own task, and streams the turn's sink events back as NDJSON.

mod server;

pub use server::{
    app, build_handler, build_handler_with, run_gateway, run_gateway_with, serve, GatewayState,
};
