//! Transport: framed messages over a pair of byte streams, with synchronous calls
//! layered on top of the asynchronous stream.
//!
//! Everything here is blocking and single-threaded. A synchronous call reads
//! frames straight off the stream until the reply shows up: unrelated
//! asynchronous traffic is queued for later `receive` calls, and synchronous
//! calls coming the other way are serviced on the spot so both sides never
//! end up waiting on each other.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WireConfig;
use crate::error::{Direction, ProtocolError};
use crate::message::{Handle, Message};
use crate::registry::HandlerResult;
use crate::wire::{self, FrameDecodeError, HEADER_LEN};

type Reader = Box<dyn Read + Send>;
type Writer = Box<dyn Write + Send>;

/// Connection state. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
}

/// Receiver for synchronous calls that arrive while we are blocked in
/// [`Transport::send_sync`]. Usually the endpoint that owns the transport.
pub trait Dispatch {
    fn dispatch(&mut self, transport: &mut Transport, msg: Message) -> HandlerResult;
}

impl<F> Dispatch for F
where
    F: FnMut(&mut Transport, Message) -> HandlerResult,
{
    fn dispatch(&mut self, transport: &mut Transport, msg: Message) -> HandlerResult {
        self(transport, msg)
    }
}

/// Cancels a pending synchronous call from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits on a synchronous call.
///
/// Both are checked between frames. A read that is already blocked is only
/// interrupted if the underlying stream has its own read timeout.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Overrides the configured `sync_timeout_ms`.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl SyncOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancel(token: CancelToken) -> Self {
        Self {
            timeout: None,
            cancel: Some(token),
        }
    }
}

/// Owns the inbound and outbound streams of one connection.
pub struct Transport {
    reader: Option<Reader>,
    writer: Option<Writer>,
    queue: VecDeque<Message>,
    state: TransportState,
    config: WireConfig,
    // Replies still owed to sync calls that gave up waiting. Frames carry no
    // call id, so the next that many replies are discarded.
    abandoned_replies: usize,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::with_config(reader, writer, WireConfig::default())
    }

    pub fn with_config<R, W>(reader: R, writer: W, config: WireConfig) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::from_streams(Some(Box::new(reader)), Some(Box::new(writer)), config)
    }

    /// Build from optional streams. A missing stream makes every operation in
    /// that direction fail with `InvalidDescriptor`.
    pub fn from_streams(reader: Option<Reader>, writer: Option<Writer>, config: WireConfig) -> Self {
        Self {
            reader,
            writer,
            queue: VecDeque::new(),
            state: TransportState::Connected,
            config,
            abandoned_replies: 0,
        }
    }

    /// Adopt two inherited file descriptors. Negative descriptors are treated as
    /// unusable. Passing the same descriptor twice (a socket used in both
    /// directions) duplicates it for the write side.
    ///
    /// # Safety
    ///
    /// Each non-negative descriptor must be open and owned by nobody else; the
    /// transport closes them when dropped.
    #[cfg(unix)]
    pub unsafe fn from_raw_fds(
        read_fd: std::os::fd::RawFd,
        write_fd: std::os::fd::RawFd,
        config: WireConfig,
    ) -> io::Result<Self> {
        use std::fs::File;
        use std::os::fd::FromRawFd;

        let read_file = (read_fd >= 0).then(|| File::from_raw_fd(read_fd));
        let write_file = match &read_file {
            Some(file) if write_fd == read_fd => Some(file.try_clone()?),
            _ if write_fd >= 0 => Some(File::from_raw_fd(write_fd)),
            _ => None,
        };
        let reader = read_file.map(|f| Box::new(f) as Reader);
        let writer = write_file.map(|f| Box::new(f) as Writer);
        Ok(Self::from_streams(reader, writer, config))
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    /// Messages set aside by synchronous calls and not yet received.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Replies from abandoned synchronous calls that have not arrived yet.
    pub fn abandoned_replies(&self) -> usize {
        self.abandoned_replies
    }

    /// Drop both streams and any queued messages.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
        self.queue.clear();
        self.abandoned_replies = 0;
        self.state = TransportState::Disconnected;
    }

    /// Write one frame. Fails immediately, without touching the stream, once
    /// the transport is disconnected.
    pub fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        if self.state == TransportState::Disconnected {
            return Err(ProtocolError::SendOnDisconnected);
        }
        let header = wire::encode_header(msg, self.config.max_frame_len)?;
        let writer = self.writer.as_mut().ok_or(ProtocolError::InvalidDescriptor {
            direction: Direction::Write,
        })?;
        let result = write_frame(writer.as_mut(), &header, msg.payload());
        if let Err(e) = &result {
            tracing::warn!(name = %msg.name(), error = %e, "send failed, closing wire");
            self.state = TransportState::Disconnected;
        }
        result?;
        tracing::debug!(
            name = %msg.name(),
            dest = %msg.destination(),
            len = msg.payload_length(),
            sync = msg.wait_for_reply(),
            "sent"
        );
        tracing::trace!("{}", msg.dump());
        Ok(())
    }

    /// Build and send an asynchronous message with a raw payload.
    pub fn send_to(
        &mut self,
        destination: Handle,
        name: &str,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let mut msg = Message::new(name)?.with_destination(destination);
        msg.set_payload(payload.to_vec());
        self.send(&msg)
    }

    /// Next message: the oldest queued one if any, otherwise the next frame on
    /// the stream. `Ok(None)` means the peer has gone away.
    ///
    /// If the stream has an OS read timeout and it expires before the first
    /// byte of a frame, this returns `Timeout` and the transport stays
    /// connected; the call can simply be retried.
    pub fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(msg) = self.queue.pop_front() {
            tracing::debug!(name = %msg.name(), left = self.queue.len(), "dequeued");
            return Ok(Some(msg));
        }
        self.receive_from_stream()
    }

    /// Read the next frame from the stream, bypassing the queue. Replies owed
    /// to abandoned synchronous calls are read and discarded first.
    ///
    /// A clean end of stream before the header marks the transport
    /// disconnected and yields `Ok(None)`. Anything that leaves the stream
    /// out of frame (a partial header, a bad length, a truncated payload) is an
    /// error and also disconnects. An expired OS read timeout before the first
    /// header byte is `Timeout`, as for [`Transport::receive`].
    pub fn receive_from_stream(&mut self) -> Result<Option<Message>, ProtocolError> {
        loop {
            let msg = self.read_one()?;
            match msg {
                Some(msg) if msg.is_reply() && self.abandoned_replies > 0 => {
                    self.abandoned_replies -= 1;
                    tracing::debug!(
                        still_owed = self.abandoned_replies,
                        "discarding reply to an abandoned call"
                    );
                }
                other => return Ok(other),
            }
        }
    }

    fn read_one(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.state == TransportState::Disconnected {
            return Ok(None);
        }
        match self.read_frame() {
            Ok(Some(msg)) => {
                tracing::debug!(
                    name = %msg.name(),
                    dest = %msg.destination(),
                    len = msg.payload_length(),
                    sync = msg.wait_for_reply(),
                    "received"
                );
                tracing::trace!("{}", msg.dump());
                Ok(Some(msg))
            }
            Ok(None) => {
                tracing::debug!("peer closed the wire");
                self.state = TransportState::Disconnected;
                Ok(None)
            }
            Err(e) => {
                if e.is_fatal() {
                    tracing::warn!(error = %e, "receive failed, closing wire");
                    self.state = TransportState::Disconnected;
                }
                Err(e)
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<Message>, ProtocolError> {
        let max = self.config.max_frame_len;
        let reader = self.reader.as_mut().ok_or(ProtocolError::InvalidDescriptor {
            direction: Direction::Read,
        })?;

        let mut raw = [0u8; HEADER_LEN];
        match read_fully(reader.as_mut(), &mut raw) {
            (0, None) => return Ok(None),
            (0, Some(e)) if is_timeout(&e) => return Err(ProtocolError::Timeout),
            (0, Some(e)) => return Err(ProtocolError::Io(e)),
            (n, _) if n < HEADER_LEN => {
                return Err(ProtocolError::ShortRead {
                    expected: HEADER_LEN,
                    read: n,
                })
            }
            _ => {}
        }

        let header = wire::decode_header(&raw, max).map_err(|e| match e {
            FrameDecodeError::TooLarge { total_length } => ProtocolError::FrameTooLarge {
                len: total_length as usize,
                max,
            },
            other => other.into(),
        })?;

        let mut payload = vec![0u8; header.payload_length()];
        let (n, err) = read_fully(reader.as_mut(), &mut payload);
        if n < payload.len() {
            if let Some(e) = err {
                tracing::debug!(error = %e, "payload read interrupted");
            }
            return Err(ProtocolError::ShortRead {
                expected: payload.len(),
                read: n,
            });
        }
        Ok(Some(header.into_message(payload)))
    }

    /// Send `msg` as a synchronous call and block until the reply arrives.
    ///
    /// `Ok(None)` means the peer disconnected before replying. Synchronous
    /// calls from the peer that arrive in the meantime are handed to `owner`
    /// immediately; other messages are queued for [`Transport::receive`].
    pub fn send_sync(&mut self, owner: &mut dyn Dispatch, msg: Message) -> Result<Option<Message>, ProtocolError> {
        self.send_sync_with(owner, msg, &SyncOptions::default())
    }

    /// Like [`Transport::send_sync`], bounded by a timeout or cancel token.
    ///
    /// A call that gives up after its message went out still has a reply on
    /// the way; that reply is discarded when it arrives so it cannot be taken
    /// for the answer to a later call.
    pub fn send_sync_with(
        &mut self,
        owner: &mut dyn Dispatch,
        mut msg: Message,
        opts: &SyncOptions,
    ) -> Result<Option<Message>, ProtocolError> {
        if self.state == TransportState::Disconnected {
            return Err(ProtocolError::SendOnDisconnected);
        }
        msg.set_wait_for_reply(true);
        self.send(&msg)?;

        let result = self.await_reply(owner, &msg, opts);
        if result.is_err() && self.is_connected() {
            self.abandoned_replies += 1;
            tracing::warn!(
                name = %msg.name(),
                owed = self.abandoned_replies,
                "abandoning call, its reply will be discarded"
            );
        }
        result
    }

    fn await_reply(
        &mut self,
        owner: &mut dyn Dispatch,
        msg: &Message,
        opts: &SyncOptions,
    ) -> Result<Option<Message>, ProtocolError> {
        let deadline = opts
            .timeout
            .or_else(|| self.config.sync_timeout())
            .map(|t| Instant::now() + t);
        loop {
            if opts.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(ProtocolError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(name = %msg.name(), "no reply before deadline");
                return Err(ProtocolError::Timeout);
            }

            let Some(incoming) = self.receive_from_stream()? else {
                return Ok(None);
            };
            if incoming.is_reply() {
                tracing::debug!(call = %msg.name(), "reply received");
                return Ok(Some(incoming));
            }
            if incoming.wait_for_reply() {
                tracing::debug!(
                    call = %msg.name(),
                    nested = %incoming.name(),
                    "servicing nested call"
                );
                if let Some(extra) = owner.dispatch(self, incoming)? {
                    tracing::debug!(name = %extra.name(), "nested handler result dropped");
                }
                continue;
            }
            tracing::debug!(
                call = %msg.name(),
                queued = %incoming.name(),
                depth = self.queue.len() + 1,
                "queueing message while waiting for reply"
            );
            self.queue.push_back(incoming);
        }
    }

    /// Build and send a synchronous call with a raw payload.
    pub fn send_sync_to(
        &mut self,
        owner: &mut dyn Dispatch,
        destination: Handle,
        name: &str,
        payload: &[u8],
    ) -> Result<Option<Message>, ProtocolError> {
        let mut msg = Message::new(name)?.with_destination(destination);
        msg.set_payload(payload.to_vec());
        self.send_sync(owner, msg)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("pending", &self.queue.len())
            .field("readable", &self.reader.is_some())
            .field("writable", &self.writer.is_some())
            .finish()
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Fill `buf` from `reader`, accumulating short reads. Returns how many bytes
/// arrived and the error that stopped it early, if any. End of stream stops it
/// early without an error.
fn read_fully(reader: &mut dyn Read, buf: &mut [u8]) -> (usize, Option<io::Error>) {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }
    (filled, None)
}

fn write_fully(writer: &mut dyn Write, buf: &[u8]) -> Result<(), ProtocolError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(ProtocolError::ShortWrite {
                    expected: buf.len(),
                    written,
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

fn write_frame(writer: &mut dyn Write, header: &[u8], payload: &[u8]) -> Result<(), ProtocolError> {
    write_fully(writer, header)?;
    write_fully(writer, payload)?;
    writer.flush()?;
    Ok(())
}
