//! The client side of one compositor connection.
//!
//! A [`Display`] owns the socket ([`Transport`]) and a [`Dispatcher`].  It
//! pumps received bytes and descriptors into the dispatcher and routes every
//! outgoing frame, including those sent by handlers, back to the socket.
//!
//! ```text
//!   send_request ──► Dispatcher::send_request ──► TransportSink ──► socket
//!   dispatch     ◄── Dispatcher::feed ◄── recv(bytes, fds) ◄────── socket
//! ```
//!
//! Any fatal error (a protocol violation, a failed write, a socket error, or
//! a hangup) closes the connection.  Every later call returns
//! [`DisplayError::Closed`].

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use wl_core::{
    Argument, BindPolicy, CallbackHandler, Dispatcher, EventHandler, Globals, GlobalsState,
    ObjectId, ObjectRegistry, Protocol, WireSink, WlError,
};

use crate::config::{ClientConfig, ConfigError};
use crate::transport::{Transport, UnixTransport};

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wl(#[from] WlError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("the connection is closed")]
    Closed,

    #[error("the compositor closed the connection")]
    Hangup,
}

/// Adapts a [`Transport`] to the dispatcher's frame sink.
struct TransportSink<'a, T: Transport>(&'a mut T);

impl<T: Transport> WireSink for TransportSink<'_, T> {
    fn send_frame(&mut self, bytes: &[u8], fds: &[RawFd]) -> Result<(), WlError> {
        self.0
            .send(bytes, fds)
            .map_err(|e| WlError::Transmit(e.to_string()))
    }
}

/// A connection to a compositor.
pub struct Display<T: Transport = UnixTransport> {
    /// `None` once the connection is closed.
    transport: Option<T>,
    dispatcher: Dispatcher,
    dispatch_timeout: Option<Duration>,
}

// ── Connecting ────────────────────────────────────────────────────────────────

impl Display<UnixTransport> {
    /// Connects using the environment only (`$WAYLAND_DISPLAY`,
    /// `$XDG_RUNTIME_DIR`) and the process-wide protocol table.
    ///
    /// # Errors
    ///
    /// See [`connect_with`](Self::connect_with).
    pub fn connect(target: Option<&str>) -> Result<Self, DisplayError> {
        Self::connect_with(&ClientConfig::default(), target)
    }

    /// Connects using `config` for the socket path, the extra protocol
    /// files and the default dispatch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DisplayError::Config`] if a protocol file cannot be loaded
    /// and [`DisplayError::Connect`] if the socket cannot be reached.
    pub fn connect_with(config: &ClientConfig, target: Option<&str>) -> Result<Self, DisplayError> {
        let protocol = Arc::new(config.load_protocols()?);
        let path = config.socket_path(target);
        let transport = UnixTransport::connect(&path).map_err(|source| DisplayError::Connect {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "connected");

        let mut display = Self::with_transport(transport, protocol)?;
        display.dispatch_timeout = config.dispatch_timeout();
        Ok(display)
    }

    /// Wraps an already connected socket, e.g. one inherited from a parent
    /// process.
    ///
    /// # Errors
    ///
    /// Fails only if the display object cannot be registered.
    pub fn from_stream(stream: UnixStream) -> Result<Self, DisplayError> {
        Self::with_transport(UnixTransport::new(stream), wl_core::protocol::global())
    }
}

impl<T: Transport> Display<T> {
    /// Builds a display over any transport.  Object 1 is registered as the
    /// `wl_display` singleton.
    ///
    /// # Errors
    ///
    /// Fails only if the display object cannot be registered.
    pub fn with_transport(transport: T, protocol: Arc<Protocol>) -> Result<Self, DisplayError> {
        let mut registry = ObjectRegistry::default();
        registry.create_display().map_err(WlError::from)?;
        Ok(Self {
            transport: Some(transport),
            dispatcher: Dispatcher::new(protocol, registry),
            dispatch_timeout: None,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn protocol(&self) -> &Arc<Protocol> {
        self.dispatcher.protocol()
    }

    pub fn registry(&self) -> &ObjectRegistry {
        self.dispatcher.registry()
    }

    pub fn registry_mut(&mut self) -> &mut ObjectRegistry {
        self.dispatcher.registry_mut()
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Timeout from the config file; [`round_trip`](Self::round_trip) waits
    /// with it between reads.
    pub fn default_dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout
    }

    pub fn set_dispatch_timeout(&mut self, timeout: Option<Duration>) {
        self.dispatch_timeout = timeout;
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Sends `request` on `object`; returns the id of the object it created,
    /// if any.
    ///
    /// # Errors
    ///
    /// [`DisplayError::Closed`] after the connection closed, otherwise the
    /// validation or transmit error.  A transmit error closes the connection.
    pub fn send_request(
        &mut self,
        object: ObjectId,
        request: &str,
        args: Vec<Argument>,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<Option<ObjectId>, DisplayError> {
        let transport = self.transport.as_mut().ok_or(DisplayError::Closed)?;
        let mut sink = TransportSink(transport);
        match self
            .dispatcher
            .send_request(&mut sink, object, request, args, handler)
        {
            Ok(created) => Ok(created),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Creates the registry object with a [`Globals`] handler using `policy`.
    ///
    /// Globals arrive asynchronously; follow with [`round_trip`](Self::round_trip)
    /// to be sure the initial burst has been processed.
    ///
    /// # Errors
    ///
    /// Same as [`send_request`](Self::send_request).
    pub fn get_registry(
        &mut self,
        policy: BindPolicy,
    ) -> Result<(ObjectId, Rc<RefCell<GlobalsState>>), DisplayError> {
        let globals = Globals::new(policy);
        let state = globals.state();
        let registry = self
            .send_request(
                ObjectId::DISPLAY,
                "get_registry",
                vec![],
                Some(Box::new(globals)),
            )?
            .ok_or(DisplayError::Closed)?;
        Ok((registry, state))
    }

    /// Sends `wl_display.sync` and dispatches until its callback fires.
    ///
    /// Every request sent before this call has been processed by the
    /// compositor when it returns.  Returns the callback's serial.
    ///
    /// # Errors
    ///
    /// Any error from sending or dispatching.
    pub fn round_trip(&mut self) -> Result<u32, DisplayError> {
        let callback = CallbackHandler::new();
        let done = callback.done_flag();
        self.send_request(ObjectId::DISPLAY, "sync", vec![], Some(Box::new(callback)))?;
        loop {
            if let Some(serial) = done.get() {
                return Ok(serial);
            }
            self.dispatch(self.dispatch_timeout)?;
        }
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    /// Reads from the socket and dispatches every complete event.
    ///
    /// Frames still buffered from an earlier read are dispatched first, and
    /// if there were any the call returns without reading.
    ///
    /// With `timeout: None` this blocks until at least one event has been
    /// dispatched.  With a timeout it performs at most one read and returns
    /// the count, which may be zero.
    ///
    /// # Errors
    ///
    /// [`DisplayError::Hangup`] when the peer closes the socket,
    /// [`DisplayError::Io`] on socket errors and [`DisplayError::Wl`] for
    /// errors raised while dispatching.  All but non-fatal handler errors
    /// close the connection.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, DisplayError> {
        let transport = self.transport.as_mut().ok_or(DisplayError::Closed)?;
        let drained = match self.dispatcher.dispatch_pending(&mut TransportSink(transport)) {
            Ok(count) => count,
            Err(e) => return Err(self.fail(e)),
        };
        if drained > 0 {
            return Ok(drained);
        }

        loop {
            let transport = self.transport.as_mut().ok_or(DisplayError::Closed)?;
            let ready = match transport.wait_readable(timeout) {
                Ok(ready) => ready,
                Err(e) => return Err(self.fail_io(e)),
            };

            let mut count = 0;
            if ready {
                let received = match transport.recv() {
                    Ok(received) => received,
                    Err(e) => return Err(self.fail_io(e)),
                };
                if received.is_hangup() {
                    warn!("compositor closed the connection");
                    self.disconnect();
                    return Err(DisplayError::Hangup);
                }
                let mut sink = TransportSink(transport);
                count = match self
                    .dispatcher
                    .feed(&received.bytes, received.fds, &mut sink)
                {
                    Ok(count) => count,
                    Err(e) => return Err(self.fail(e)),
                };
            }

            if count > 0 || timeout.is_some() {
                return Ok(count);
            }
        }
    }

    // ── Closing ───────────────────────────────────────────────────────────────

    /// Shuts the socket down and drops every buffered byte and descriptor.
    /// Calling it again does nothing.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
            info!("disconnected");
        }
        self.dispatcher.reset();
    }

    fn fail(&mut self, e: WlError) -> DisplayError {
        if e.is_fatal() {
            error!("closing connection: {e}");
            self.disconnect();
        }
        DisplayError::Wl(e)
    }

    fn fail_io(&mut self, e: io::Error) -> DisplayError {
        error!("closing connection: {e}");
        self.disconnect();
        DisplayError::Io(e)
    }
}

impl<T: Transport> Drop for Display<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, Received};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use wl_core::wire::encode_message;
    use wl_core::{ProtocolError, ResourceError};

    fn event(protocol: &Protocol, interface: &str, object: u32, name: &str, args: &[Argument]) -> Vec<u8> {
        let spec = protocol.lookup(interface).unwrap().event_by_name(name).unwrap();
        encode_message(ObjectId::new(object).unwrap(), spec.opcode, name, &spec.args, args)
            .unwrap()
            .bytes
    }

    /// A mock whose reads are served from `reads` in order.
    fn mock_with_reads(reads: Vec<Vec<u8>>) -> MockTransport {
        let reads = Mutex::new(reads.into_iter().collect::<VecDeque<_>>());
        let mut mock = MockTransport::new();
        mock.expect_wait_readable().returning(|_| Ok(true));
        mock.expect_recv().returning(move || {
            let bytes = reads.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Received { bytes, fds: vec![] })
        });
        mock.expect_shutdown().returning(|| ());
        mock
    }

    fn display(mock: MockTransport) -> Display<MockTransport> {
        Display::with_transport(mock, Arc::new(Protocol::core().unwrap())).unwrap()
    }

    #[test]
    fn test_send_request_writes_one_frame() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|bytes, fds| bytes.to_vec() == [1, 0, 0, 0, 1, 0, 12, 0, 2, 0, 0, 0] && fds.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_shutdown().returning(|| ());
        let mut display = display(mock);

        // Act
        let created = display
            .send_request(ObjectId::DISPLAY, "get_registry", vec![], None)
            .unwrap();

        // Assert
        assert_eq!(created.map(ObjectId::raw), Some(2));
    }

    #[test]
    fn test_dispatch_with_timeout_returns_zero_when_idle() {
        let mut mock = MockTransport::new();
        mock.expect_wait_readable().returning(|_| Ok(false));
        mock.expect_recv().never();
        mock.expect_shutdown().returning(|| ());
        let mut display = display(mock);

        let count = display.dispatch(Some(Duration::from_millis(5))).unwrap();

        assert_eq!(count, 0);
        assert!(!display.is_closed());
    }

    #[test]
    fn test_round_trip_waits_for_callback() {
        // Arrange: the compositor answers sync with done + delete_id
        let protocol = Protocol::core().unwrap();
        let mut reply = event(&protocol, "wl_callback", 2, "done", &[Argument::Uint(77)]);
        reply.extend(event(&protocol, "wl_display", 1, "delete_id", &[Argument::Uint(2)]));
        let mut mock = mock_with_reads(vec![reply]);
        mock.expect_send().times(1).returning(|_, _| Ok(()));
        let mut display = display(mock);

        // Act
        let serial = display.round_trip().unwrap();

        // Assert
        assert_eq!(serial, 77);
        assert!(display.registry().resolve(2).is_none(), "callback id was released");
    }

    #[test]
    fn test_round_trip_waits_with_configured_timeout() {
        // Arrange: the first wait times out, the second finds the reply
        let protocol = Protocol::core().unwrap();
        let reply = event(&protocol, "wl_callback", 2, "done", &[Argument::Uint(5)]);
        let timeout = Duration::from_millis(40);
        let mut mock = MockTransport::new();
        let mut waits = 0;
        mock.expect_wait_readable()
            .withf(move |t| *t == Some(timeout))
            .times(2)
            .returning(move |_| {
                waits += 1;
                Ok(waits > 1)
            });
        mock.expect_recv()
            .times(1)
            .returning(move || Ok(Received { bytes: reply.clone(), fds: vec![] }));
        mock.expect_send().times(1).returning(|_, _| Ok(()));
        mock.expect_shutdown().returning(|| ());
        let mut display = display(mock);
        display.set_dispatch_timeout(Some(timeout));

        // Act
        let serial = display.round_trip().unwrap();

        // Assert
        assert_eq!(serial, 5);
        assert!(!display.is_closed());
    }

    #[test]
    fn test_frames_behind_a_missing_fd_are_still_dispatched() {
        // Arrange: a keymap whose fd never arrived, then a callback done
        let protocol = Protocol::core().unwrap();
        let mut read = event(
            &protocol,
            "wl_keyboard",
            2,
            "keymap",
            &[Argument::Uint(1), Argument::Fd(0), Argument::Uint(13)],
        );
        read.extend(event(&protocol, "wl_callback", 3, "done", &[Argument::Uint(11)]));
        let mut mock = MockTransport::new();
        mock.expect_wait_readable().times(1).returning(|_| Ok(true));
        mock.expect_recv()
            .times(1)
            .returning(move || Ok(Received { bytes: read.clone(), fds: vec![] }));
        mock.expect_shutdown().returning(|| ());
        let mut display = display(mock);
        display.registry_mut().create_local("wl_keyboard", 9, None).unwrap();
        let callback = CallbackHandler::new();
        let done = callback.done_flag();
        display
            .registry_mut()
            .create_local("wl_callback", 1, Some(Box::new(callback)))
            .unwrap();

        // Act
        let first = display.dispatch(None);
        let second = display.dispatch(None);

        // Assert
        assert!(matches!(
            first,
            Err(DisplayError::Wl(WlError::Resource(ResourceError::MissingFd(_))))
        ));
        assert!(matches!(second, Ok(1)));
        assert_eq!(done.get(), Some(11));
        assert!(!display.is_closed());
    }

    #[test]
    fn test_handler_requests_go_to_the_socket() {
        // Arrange: a ping on xdg_wm_base must be answered with pong
        let protocol = Protocol::core().unwrap();
        let ping = event(&protocol, "xdg_wm_base", 2, "ping", &[Argument::Uint(9)]);
        let mut mock = mock_with_reads(vec![ping]);
        mock.expect_send()
            .withf(|bytes, _| bytes[..4] == [2, 0, 0, 0] && bytes[8..] == [9, 0, 0, 0])
            .times(1)
            .returning(|_, _| Ok(()));
        let mut display = display(mock);
        display.registry_mut().create_local("xdg_wm_base", 1, None).unwrap();

        // Act
        let count = display.dispatch(None).unwrap();

        // Assert
        assert_eq!(count, 1);
    }

    #[test]
    fn test_hangup_closes_connection() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_wait_readable().returning(|_| Ok(true));
        mock.expect_recv().times(1).returning(|| Ok(Received::default()));
        mock.expect_shutdown().times(1).returning(|| ());
        let mut display = display(mock);

        // Act
        let first = display.dispatch(None);
        let second = display.dispatch(None);

        // Assert
        assert!(matches!(first, Err(DisplayError::Hangup)));
        assert!(matches!(second, Err(DisplayError::Closed)));
        assert!(display.is_closed());
    }

    #[test]
    fn test_transmit_failure_closes_connection() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        mock.expect_shutdown().times(1).returning(|| ());
        let mut display = display(mock);

        // Act
        let result = display.send_request(ObjectId::DISPLAY, "sync", vec![], None);

        // Assert
        assert!(matches!(result, Err(DisplayError::Wl(WlError::Transmit(_)))));
        assert!(display.is_closed());
        assert!(matches!(
            display.send_request(ObjectId::DISPLAY, "sync", vec![], None),
            Err(DisplayError::Closed)
        ));
    }

    #[test]
    fn test_protocol_error_closes_connection() {
        // Arrange: an event for an object that was never created
        let protocol = Protocol::core().unwrap();
        let stray = event(&protocol, "wl_callback", 42, "done", &[Argument::Uint(0)]);
        let display_mock = mock_with_reads(vec![stray]);
        let mut display = display(display_mock);

        // Act
        let result = display.dispatch(None);

        // Assert
        assert!(matches!(
            result,
            Err(DisplayError::Wl(WlError::Protocol(ProtocolError::UnknownObject(42))))
        ));
        assert!(display.is_closed());
    }

    #[test]
    fn test_validation_error_keeps_connection_open() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        mock.expect_shutdown().returning(|| ());
        let mut display = display(mock);

        // Act
        let result = display.send_request(ObjectId::new(9).unwrap(), "destroy", vec![], None);

        // Assert
        assert!(matches!(result, Err(DisplayError::Wl(WlError::Argument(_)))));
        assert!(!display.is_closed());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut mock = MockTransport::new();
        mock.expect_shutdown().times(1).returning(|| ());
        let mut display = display(mock);

        display.disconnect();
        display.disconnect();

        assert!(display.is_closed());
    }

    #[test]
    fn test_display_object_is_preregistered() {
        let mut mock = MockTransport::new();
        mock.expect_shutdown().returning(|| ());
        let display = display(mock);

        let entry = display.registry().get(ObjectId::DISPLAY).unwrap();

        assert_eq!(entry.interface(), "wl_display");
        assert_eq!(entry.version(), 1);
    }
}
