//! HTTP transport for the Model Context Protocol
//!
//! Session-aware `/mcp` endpoint (request/response over `POST`, server push
//! over `GET`, teardown over `DELETE`) plus public metadata routes.

pub mod handlers;
