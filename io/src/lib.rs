//! Quarry IO Library
//!
//! This crate is the messaging and local-IPC substrate of the Quarry
//! job/worker platform. It lets a process exchange typed, framed messages
//! with remote peers over a ZeroMQ transport, and with local worker
//! processes over filesystem-addressed stream sockets, through one shared
//! serialization mechanism. It includes:
//!
//! - Socket abstraction with multipart framing, routing identity, and
//!   scoped (auto-reverting) option overrides
//! - Non-blocking pipe/acceptor primitives for process-to-process IPC
//!   over unix-domain sockets
//! - Compile-time serialization dispatch with a MessagePack default
//!   mapping and a custom codec for the recursive [`Dynamic`] value
//!
//! # Features
//!
//! - **Non-blocking by construction**: no operation suspends the calling
//!   thread; transient unavailability is a value, not an error
//! - **Exclusive ownership**: sockets, pipes and acceptors are move-only
//!   handles, so no internal synchronization is needed
//! - **Message-boundary recovery**: corrupt or mismatched payloads reject
//!   a single message and leave the connection usable

/// Static payload-type-to-codec dispatch and the serde default mapping
pub mod codec;

/// The recursive dynamic value and its wire codec
pub mod dynamic;

/// Error taxonomy shared by the messaging and IPC primitives
pub mod error;

/// Local non-blocking IPC over filesystem-addressed sockets
#[cfg(unix)]
pub mod pipe;

/// The messaging socket, multipart framing and scoped options
pub mod socket;

// Re-export commonly used types for convenience
pub use codec::{Decode, Encode};
pub use dynamic::Dynamic;
pub use error::{Error, Result};
#[cfg(unix)]
pub use pipe::{Acceptor, Pipe};
pub use socket::{
    ReceiveTimeout, RecvMultipart, ScopedOption, SendMultipart, SendTimeout, Socket, SocketOption,
};
