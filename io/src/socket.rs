//! The messaging socket: typed, framed messages over a ZeroMQ transport.
//!
//! A [`Socket`] owns exactly one transport endpoint. All operations are
//! non-blocking in posture: transient unavailability surfaces as
//! `Ok(false)` / `Ok(None)` and the caller's reactor decides when to retry,
//! driven by [`Socket::pending`] or the OS descriptor from [`Socket::fd`].
//! A bounded wait for a single operation goes through [`ScopedOption`].

use std::marker::PhantomData;

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};

/// One messaging-transport endpoint with typed framing on top.
///
/// Move-only: the transport handle is exclusively owned and never shared.
pub struct Socket {
    inner:    zmq::Socket,
    kind:     zmq::SocketType,
    endpoint: String,
}

impl Socket {
    /// Creates a socket of the given messaging pattern.
    pub fn new(context: &zmq::Context, kind: zmq::SocketType) -> Result<Socket> {
        let inner = context.socket(kind)?;

        Ok(Socket {
            inner,
            kind,
            endpoint: String::new(),
        })
    }

    /// Creates a socket and installs a routing identity before any
    /// bind/connect. Any encodable value works as an identity, so process
    /// identifiers such as UUIDs can be used directly.
    pub fn with_identity<T>(
        context: &zmq::Context,
        kind: zmq::SocketType,
        identity: &T,
    ) -> Result<Socket>
    where
        T: Encode + ?Sized,
    {
        let socket = Socket::new(context, kind)?;

        let mut packed = Vec::new();
        identity.pack(&mut packed)?;
        socket.inner.set_identity(&packed)?;

        Ok(socket)
    }

    /// Binds to an endpoint and records the resolved address. May be
    /// called multiple times to listen on several endpoints.
    pub fn bind(&mut self, endpoint: &str) -> Result<()> {
        self.inner.bind(endpoint)?;
        self.endpoint = self.last_endpoint()?;
        tracing::debug!(endpoint = %self.endpoint, "socket bound");

        Ok(())
    }

    /// Binds to a wildcard TCP endpoint; the resolved address (with the
    /// ephemeral port filled in) is available from [`Socket::endpoint`].
    pub fn bind_any(&mut self) -> Result<()> {
        self.bind("tcp://*:*")
    }

    /// Connects to a remote endpoint. Connection establishment is lazy at
    /// the transport level; this never waits for peer availability.
    pub fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.inner.connect(endpoint)?;
        self.endpoint = endpoint.to_owned();
        tracing::debug!(endpoint = %self.endpoint, "socket connected");

        Ok(())
    }

    /// Sends one raw frame. `Ok(false)` means the transport could not take
    /// the frame right now (try again later); other failures are
    /// [`Error::Transport`].
    pub fn send_frame<T>(&self, frame: T, flags: i32) -> Result<bool>
    where
        T: Into<zmq::Message>,
    {
        match self.inner.send(frame.into(), flags) {
            Ok(()) => Ok(true),
            Err(zmq::Error::EAGAIN | zmq::Error::EINTR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Receives one raw frame, or `Ok(None)` when nothing is available
    /// under the current non-blocking policy.
    pub fn recv_frame(&self, flags: i32) -> Result<Option<zmq::Message>> {
        let mut frame = zmq::Message::new();

        match self.inner.recv(&mut frame, flags) {
            Ok(()) => Ok(Some(frame)),
            Err(zmq::Error::EAGAIN | zmq::Error::EINTR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Serializes `value` through the codec registry and sends it as one
    /// frame.
    pub fn send<T>(&self, value: &T, flags: i32) -> Result<bool>
    where
        T: Encode + ?Sized,
    {
        let mut buffer = Vec::new();
        value.pack(&mut buffer)?;

        self.send_frame(buffer, flags)
    }

    /// Receives one frame and deserializes it into a `T`.
    ///
    /// Decode failures ([`Error::CorruptPayload`], [`Error::SchemaMismatch`])
    /// reject that single message; the socket itself stays usable.
    pub fn recv<T: Decode>(&self, flags: i32) -> Result<Option<T>> {
        match self.recv_frame(flags)? {
            Some(frame) => T::unpack(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Sends the tuple as one logical multi-frame message: every frame but
    /// the last is flagged "more follows". If a frame fails to send, the
    /// remaining frames are not sent; the peer detects the partial message
    /// through the missing continuation and discards it.
    pub fn send_multipart<M: SendMultipart>(&self, parts: &M, flags: i32) -> Result<bool> {
        parts.send_parts(self, flags)
    }

    /// Receives exactly the declared tuple arity from one logical message.
    ///
    /// A message with fewer or more frames than declared fails with
    /// [`Error::SchemaMismatch`]; the remainder of the offending message is
    /// drained so the socket stays on a message boundary.
    pub fn recv_multipart<M: RecvMultipart>(&self, flags: i32) -> Result<Option<M>> {
        M::recv_parts(self, flags)
    }

    /// Whether the most recently received frame announced more frames in
    /// the same logical message.
    pub fn more(&self) -> Result<bool> {
        Ok(self.inner.get_rcvmore()?)
    }

    /// Discards the remaining frames of the current logical message.
    pub fn drain(&self) -> Result<()> {
        while self.more()? {
            if self.recv_frame(zmq::DONTWAIT)?.is_none() {
                break;
            }
        }

        Ok(())
    }

    /// Non-blocking readiness probe; pass [`zmq::POLLIN`] to ask whether a
    /// receive would make progress.
    pub fn pending(&self, event: zmq::PollEvents) -> Result<bool> {
        Ok(self.inner.get_events()?.contains(event))
    }

    /// The configured routing identity, empty if none was installed.
    pub fn identity(&self) -> Result<Vec<u8>> {
        Ok(self.inner.get_identity()?)
    }

    /// The most recently bound or connected endpoint, empty until then.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The messaging pattern fixed at construction.
    pub fn kind(&self) -> zmq::SocketType {
        self.kind
    }

    /// The OS-level descriptor for external readiness polling.
    #[cfg(unix)]
    pub fn fd(&self) -> Result<std::os::unix::io::RawFd> {
        Ok(self.inner.get_fd()?)
    }

    fn last_endpoint(&self) -> Result<String> {
        let endpoint = self.inner.get_last_endpoint()?;

        Ok(endpoint.unwrap_or_default())
    }
}

/// Send side of a logical multi-frame message with a fixed arity.
pub trait SendMultipart {
    fn send_parts(&self, socket: &Socket, flags: i32) -> Result<bool>;
}

/// Receive side of a logical multi-frame message with a fixed arity.
pub trait RecvMultipart: Sized {
    /// Number of frames this tuple consumes per logical message.
    fn arity() -> usize;

    fn recv_parts(socket: &Socket, flags: i32) -> Result<Option<Self>>;
}

fn arity_mismatch(declared: usize, found: impl Into<String>) -> Error {
    Error::mismatch(format!("a logical message of {declared} frames"), found)
}

/// Receives and decodes the frame at `index` of an N-frame message.
///
/// Only the first frame may be transiently unavailable; once it has
/// arrived, the transport guarantees the rest of the logical message is
/// queued, so a missing continuation is a protocol violation.
fn recv_part<T: Decode>(
    socket: &Socket,
    flags: i32,
    index: usize,
    arity: usize,
) -> Result<Option<T>> {
    if index > 0 && !socket.more()? {
        return Err(arity_mismatch(arity, format!("a message of {index} frames")));
    }

    let frame = match socket.recv_frame(flags)? {
        Some(frame) => frame,
        None if index == 0 => return Ok(None),
        None => return Err(Error::corrupt("logical message truncated mid-delivery")),
    };

    match T::unpack(&frame) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            // Stay on a message boundary so the socket remains usable.
            let _ = socket.drain();
            Err(e)
        }
    }
}

macro_rules! tuple_multipart {
    ($($head:ident $head_idx:tt),* ; $last:ident $last_idx:tt) => {
        impl<$($head: Encode,)* $last: Encode> SendMultipart for ($($head,)* $last,) {
            fn send_parts(&self, socket: &Socket, flags: i32) -> Result<bool> {
                $(
                    if !socket.send(&self.$head_idx, flags | zmq::SNDMORE)? {
                        return Ok(false);
                    }
                )*

                socket.send(&self.$last_idx, flags)
            }
        }

        impl<$($head: Decode,)* $last: Decode> RecvMultipart for ($($head,)* $last,) {
            fn arity() -> usize {
                [$(stringify!($head),)* stringify!($last)].len()
            }

            fn recv_parts(socket: &Socket, flags: i32) -> Result<Option<Self>> {
                let arity = <Self as RecvMultipart>::arity();

                let parts = (
                    $(
                        match recv_part::<$head>(socket, flags, $head_idx, arity)? {
                            Some(value) => value,
                            None => return Ok(None),
                        },
                    )*
                    match recv_part::<$last>(socket, flags, $last_idx, arity)? {
                        Some(value) => value,
                        None => return Ok(None),
                    },
                );

                if socket.more()? {
                    let _ = socket.drain();
                    return Err(arity_mismatch(arity, "a message with additional frames"));
                }

                Ok(Some(parts))
            }
        }
    };
}

tuple_multipart!(; A 0);
tuple_multipart!(A 0; B 1);
tuple_multipart!(A 0, B 1; C 2);
tuple_multipart!(A 0, B 1, C 2; D 3);
tuple_multipart!(A 0, B 1, C 2, D 3; E 4);
tuple_multipart!(A 0, B 1, C 2, D 3, E 4; F 5);
tuple_multipart!(A 0, B 1, C 2, D 3, E 4, F 5; G 6);
tuple_multipart!(A 0, B 1, C 2, D 3, E 4, F 5, G 6; H 7);

/// A socket configuration parameter selected at compile time.
pub trait SocketOption {
    type Value: Copy;

    /// Human-readable name, used when restoration has to be reported.
    const NAME: &'static str;

    fn get(socket: &Socket) -> Result<Self::Value>;
    fn set(socket: &Socket, value: Self::Value) -> Result<()>;
}

/// Receive timeout in milliseconds; `-1` waits indefinitely.
pub struct ReceiveTimeout;

impl SocketOption for ReceiveTimeout {
    type Value = i32;

    const NAME: &'static str = "receive timeout";

    fn get(socket: &Socket) -> Result<i32> {
        Ok(socket.inner.get_rcvtimeo()?)
    }

    fn set(socket: &Socket, value: i32) -> Result<()> {
        Ok(socket.inner.set_rcvtimeo(value)?)
    }
}

/// Send timeout in milliseconds; `-1` waits indefinitely.
pub struct SendTimeout;

impl SocketOption for SendTimeout {
    type Value = i32;

    const NAME: &'static str = "send timeout";

    fn get(socket: &Socket) -> Result<i32> {
        Ok(socket.inner.get_sndtimeo()?)
    }

    fn set(socket: &Socket, value: i32) -> Result<()> {
        Ok(socket.inner.set_sndtimeo(value)?)
    }
}

/// Temporarily overrides one socket option, restoring the captured prior
/// value when dropped, on normal exit and on error unwind alike.
///
/// Used to bound the duration of an otherwise-blocking convenience call
/// (say, wait up to N milliseconds for a heartbeat reply) without changing
/// the socket's steady-state non-blocking posture. Must not be nested on
/// the same option/socket pair; nesting on different options or sockets is
/// fine.
pub struct ScopedOption<'a, O: SocketOption> {
    socket:  &'a Socket,
    saved:   O::Value,
    _option: PhantomData<O>,
}

impl<'a, O: SocketOption> ScopedOption<'a, O> {
    /// Captures the option's current value, then installs `value`.
    pub fn new(socket: &'a Socket, value: O::Value) -> Result<Self> {
        let saved = O::get(socket)?;
        O::set(socket, value)?;

        Ok(ScopedOption {
            socket,
            saved,
            _option: PhantomData,
        })
    }

    /// The value captured at construction, to be restored on drop.
    pub fn saved(&self) -> O::Value {
        self.saved
    }
}

impl<O: SocketOption> Drop for ScopedOption<'_, O> {
    fn drop(&mut self) {
        if let Err(e) = O::set(self.socket, self.saved) {
            tracing::warn!(option = O::NAME, error = %e, "failed to restore socket option");
        }
    }
}
