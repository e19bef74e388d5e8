//! Connection Handler Module
//!
//! TCP-facing transports. Each client connection is handled by its own async
//! task, so a slow client never holds up anyone else.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               TcpListener (binary or text)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept(), optional TLS handshake
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   ConnectionHandler (binary)  /  handle_text_connection     │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode cmd  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Listeners
//!
//! - **Binary** (`handler`): framed requests over a persistent connection,
//!   plain TCP or mutual TLS.
//! - **Text** (`text`): one command per connection, human-readable output,
//!   for use with `ncat`.

pub mod handler;
pub mod text;

// Re-export commonly used types
pub use handler::{handle_connection, serve, ConnectionError, ConnectionHandler, ConnectionStats};
pub use text::{handle_text_connection, serve_text};
