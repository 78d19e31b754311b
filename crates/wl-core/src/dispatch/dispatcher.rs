//! Framing state machine and event routing.
//!
//! ```text
//!            ≥ 8 bytes buffered                 ≥ body_len bytes buffered
//!   HEADER ─────────────────────▶ BODY ──────────────────────────────▶ HEADER
//!     ▲  │ object id 0: skip header                 decode + route
//!     └──┘
//! ```
//!
//! [`Dispatcher::feed`] never blocks: it consumes as many complete frames as
//! the buffered bytes allow and keeps the remainder for the next call, so a
//! byte stream produces the same events however it is chunked.

use std::collections::{HashSet, VecDeque};
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::dispatch::request::{send_request, WireSink};
use crate::error::{ProtocolError, ResourceError, WlError};
use crate::handler::{Event, EventContext, EventHandler};
use crate::object::{ObjectId, ObjectRegistry};
use crate::protocol::Protocol;
use crate::wire::{decode_args, Argument, DecodeError, MessageBuffer, MessageHeader, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body {
        object_id: u32,
        opcode: u16,
        len: usize,
    },
}

/// Turns received bytes into routed events for one connection.
///
/// The dispatcher owns the [`ObjectRegistry`] of its connection and the
/// protocol snapshot that connection was created with.
#[derive(Debug)]
pub struct Dispatcher {
    protocol: Arc<Protocol>,
    registry: ObjectRegistry,
    buffer: MessageBuffer,
    fds: VecDeque<OwnedFd>,
    phase: Phase,
    forbidden: HashSet<String>,
}

impl Dispatcher {
    pub fn new(protocol: Arc<Protocol>, registry: ObjectRegistry) -> Self {
        Self {
            protocol,
            registry,
            buffer: MessageBuffer::new(),
            fds: VecDeque::new(),
            phase: Phase::Header,
            forbidden: HashSet::new(),
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    /// Marks `event` as non-dispatchable.  Receiving it for a handler that
    /// would handle it is a [`ProtocolError::ForbiddenEvent`].
    pub fn forbid_event(&mut self, event: &str) {
        self.forbidden.insert(event.to_string());
    }

    /// Bytes buffered but not yet part of a dispatched frame (header bytes
    /// already consumed for the pending frame are not counted).
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Received descriptors not yet claimed by an fd-typed argument.
    pub fn pending_fds(&self) -> usize {
        self.fds.len()
    }

    /// Drops buffered bytes, queued descriptors (closing them), and any
    /// half-read frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fds.clear();
        self.phase = Phase::Header;
    }

    /// Appends received data and dispatches every complete frame.
    ///
    /// Returns the number of frames routed to an object (skip markers with
    /// object id 0 are not counted).
    ///
    /// # Errors
    ///
    /// Stops at the first error; every [`ProtocolError`] is fatal for the
    /// connection.  A handler's own error is returned as-is.  The failing
    /// frame is consumed; frames after it stay buffered for
    /// [`dispatch_pending`](Self::dispatch_pending).
    pub fn feed(
        &mut self,
        bytes: &[u8],
        fds: Vec<OwnedFd>,
        sink: &mut dyn WireSink,
    ) -> Result<usize, WlError> {
        self.buffer.write(bytes);
        self.fds.extend(fds);

        let mut count = 0;
        loop {
            match self.phase {
                Phase::Header => {
                    if self.buffer.len() < HEADER_SIZE {
                        break;
                    }
                    let mut raw = [0u8; HEADER_SIZE];
                    self.buffer
                        .read_into(&mut raw)
                        .map_err(ProtocolError::from)?;
                    let header = MessageHeader::decode(&raw);
                    if header.object_id == 0 {
                        trace!("skipping header addressed to object 0");
                        continue;
                    }
                    if usize::from(header.size) < HEADER_SIZE {
                        return Err(ProtocolError::InvalidFrameSize {
                            object_id: header.object_id,
                            size: header.size,
                        }
                        .into());
                    }
                    self.phase = Phase::Body {
                        object_id: header.object_id,
                        opcode: header.opcode,
                        len: usize::from(header.size) - HEADER_SIZE,
                    };
                }
                Phase::Body {
                    object_id,
                    opcode,
                    len,
                } => {
                    if self.buffer.len() < len {
                        break;
                    }
                    let body = self.buffer.read_exact(len).map_err(ProtocolError::from)?;
                    self.phase = Phase::Header;
                    self.route(object_id, opcode, &body, sink)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Dispatches complete frames still buffered from earlier reads.
    ///
    /// [`feed`](Self::feed) stops at its first error and leaves later frames
    /// in the buffer; call this before waiting for more input.
    ///
    /// # Errors
    ///
    /// Same as [`feed`](Self::feed).
    pub fn dispatch_pending(&mut self, sink: &mut dyn WireSink) -> Result<usize, WlError> {
        self.feed(&[], Vec::new(), sink)
    }

    /// Sends a request through this dispatcher's registry.  See
    /// [`send_request`].
    ///
    /// # Errors
    ///
    /// Propagates every error of [`send_request`].
    pub fn send_request(
        &mut self,
        sink: &mut dyn WireSink,
        object: ObjectId,
        request: &str,
        args: Vec<Argument>,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<Option<ObjectId>, WlError> {
        send_request(
            &self.protocol,
            &mut self.registry,
            sink,
            object,
            request,
            args,
            handler,
        )
    }

    fn route(
        &mut self,
        object_id: u32,
        opcode: u16,
        body: &[u8],
        sink: &mut dyn WireSink,
    ) -> Result<(), WlError> {
        let entry = self
            .registry
            .resolve(object_id)
            .ok_or(ProtocolError::UnknownObject(object_id))?;
        let id = entry.id();
        let version = entry.version();
        let interface = self
            .protocol
            .lookup(entry.interface())
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownInterface {
                object_id,
                interface: entry.interface().to_string(),
            })?;
        let spec = interface
            .event(opcode)
            .ok_or_else(|| ProtocolError::UnknownOpcode {
                interface: interface.name.clone(),
                opcode,
            })?;

        let args = decode_args(&spec.args, body, &mut self.fds).map_err(|err| match err {
            DecodeError::MissingFd(_) => {
                WlError::from(ResourceError::MissingFd(format!("{}.{}", interface.name, spec.name)))
            }
            other => ProtocolError::MalformedEvent {
                interface: interface.name.clone(),
                event: spec.name.clone(),
                reason: other.to_string(),
            }
            .into(),
        })?;

        let mut children = Vec::new();
        for (arg_spec, arg) in spec.args.iter().zip(&args) {
            let (child_interface, child, child_version) = match arg {
                Argument::NewId(child) => match &arg_spec.interface {
                    Some(child_interface) => (child_interface, *child, version),
                    None => continue,
                },
                Argument::NewDynamic {
                    interface: named,
                    version: named_version,
                    id: Some(child),
                } => (named, *child, *named_version),
                _ => continue,
            };
            if self
                .registry
                .bind_remote(child_interface, child, child_version, None)
                .is_err()
            {
                close_unclaimed(&args);
                return Err(ProtocolError::NewIdInUse {
                    interface: interface.name.clone(),
                    event: spec.name.clone(),
                    id: child.raw(),
                }
                .into());
            }
            children.push(child);
        }

        let event = Event {
            object: id,
            interface: interface.name.clone(),
            name: spec.name.clone(),
            opcode,
            args,
        };

        let Some(mut handler) = self.registry.take_handler(id) else {
            trace!("ev: ({object_id}) {}::{} {:?} (zombie)", event.interface, event.name, event.args);
            close_unclaimed(&event.args);
            if self.registry.get(id).is_some_and(|e| e.is_zombie()) {
                for child in children {
                    self.registry.retire(child);
                }
            }
            return Ok(());
        };
        if !handler.handles(&event.name) {
            self.registry.restore_handler(id, handler);
            trace!("ev: ({object_id}) {}::{} {:?}", event.interface, event.name, event.args);
            close_unclaimed(&event.args);
            return Ok(());
        }
        if self.forbidden.contains(&event.name) {
            self.registry.restore_handler(id, handler);
            close_unclaimed(&event.args);
            return Err(ProtocolError::ForbiddenEvent {
                interface: event.interface,
                event: event.name,
            }
            .into());
        }

        debug!("EV: ({object_id}) {}::{} {:?}", event.interface, event.name, event.args);
        let mut ctx = EventContext {
            protocol: &self.protocol,
            registry: &mut self.registry,
            sink,
        };
        let result = handler.on_event(&event, &mut ctx);
        self.registry.restore_handler(id, handler);
        result
    }
}

/// Closes descriptors of an event nobody received.
fn close_unclaimed(args: &[Argument]) {
    for fd in args.iter().filter_map(Argument::as_fd) {
        // SAFETY: the fd was released from the dispatcher's owned queue by
        // decode_args and no handler saw it, so this is the only owner.
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::handler::{CallbackHandler, Listeners};
    use crate::wire::{encode_message, EncodedMessage};

    fn dispatcher() -> Dispatcher {
        let mut registry = ObjectRegistry::default();
        registry.create_display().unwrap();
        Dispatcher::new(Arc::new(Protocol::core().unwrap()), registry)
    }

    /// Builds an event frame the way a server would.
    fn event_frame(d: &Dispatcher, object: ObjectId, event: &str, args: &[Argument]) -> Vec<u8> {
        let interface = d.registry().get(object).unwrap().interface().to_string();
        let iface = d.protocol().lookup(&interface).unwrap();
        let spec = iface.event_by_name(event).unwrap();
        encode_message(object, spec.opcode, event, &spec.args, args)
            .unwrap()
            .bytes
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        // Arrange
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let callback = d
            .send_request(&mut sink, ObjectId::DISPLAY, "sync", vec![], Some(Box::new(CallbackHandler::new())))
            .unwrap()
            .unwrap();
        let frame = event_frame(&d, callback, "done", &[Argument::Uint(5)]);

        // Act
        let first = d.feed(&frame[..5], vec![], &mut sink).unwrap();
        let second = d.feed(&frame[5..10], vec![], &mut sink).unwrap();
        let third = d.feed(&frame[10..], vec![], &mut sink).unwrap();

        // Assert
        assert_eq!((first, second, third), (0, 0, 1));
        assert_eq!(d.pending_bytes(), 0);
    }

    #[test]
    fn test_callback_done_is_routed() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let handler = CallbackHandler::new();
        let done = handler.done_flag();
        let callback = d
            .send_request(&mut sink, ObjectId::DISPLAY, "sync", vec![], Some(Box::new(handler)))
            .unwrap()
            .unwrap();

        let frame = event_frame(&d, callback, "done", &[Argument::Uint(99)]);
        let count = d.feed(&frame, vec![], &mut sink).unwrap();

        assert_eq!(count, 1);
        assert_eq!(done.get(), Some(99));
    }

    #[test]
    fn test_unknown_object_is_fatal() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let frame = [42, 0, 0, 0, 0, 0, 8, 0];

        let err = d.feed(&frame, vec![], &mut sink).unwrap_err();

        assert_eq!(err, ProtocolError::UnknownObject(42).into());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        // wl_display has two events; opcode 7 does not exist
        let frame = [1, 0, 0, 0, 7, 0, 8, 0];

        let err = d.feed(&frame, vec![], &mut sink).unwrap_err();

        assert!(matches!(
            err,
            WlError::Protocol(ProtocolError::UnknownOpcode { opcode: 7, .. })
        ));
    }

    #[test]
    fn test_object_zero_header_is_skipped() {
        // Arrange: a bare header for object 0, then a real delete_id
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let callback = d.registry_mut().create_local("wl_callback", 1, None).unwrap();
        let mut stream = vec![0, 0, 0, 0, 0, 0, 8, 0];
        stream.extend(event_frame(
            &d,
            ObjectId::DISPLAY,
            "delete_id",
            &[Argument::Uint(callback.raw())],
        ));

        // Act
        let count = d.feed(&stream, vec![], &mut sink).unwrap();

        // Assert
        assert_eq!(count, 1);
        assert!(d.registry().get(callback).is_none());
    }

    #[test]
    fn test_frame_smaller_than_header_is_rejected() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();

        let err = d.feed(&[1, 0, 0, 0, 0, 0, 4, 0], vec![], &mut sink).unwrap_err();

        assert_eq!(
            err,
            ProtocolError::InvalidFrameSize {
                object_id: 1,
                size: 4
            }
            .into()
        );
    }

    #[test]
    fn test_unhandled_event_is_discarded() {
        // Arrange: wl_surface has no default handler
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let surface = d.registry_mut().create_local("wl_surface", 6, None).unwrap();
        let frame = event_frame(&d, surface, "preferred_buffer_scale", &[Argument::Int(2)]);

        // Act
        let count = d.feed(&frame, vec![], &mut sink).unwrap();

        // Assert: counted as processed, nothing sent
        assert_eq!(count, 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_forbidden_event_fails_only_when_handled() {
        // Arrange
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        d.forbid_event("done");
        let watched = d
            .send_request(&mut sink, ObjectId::DISPLAY, "sync", vec![], Some(Box::new(CallbackHandler::new())))
            .unwrap()
            .unwrap();
        let ignored = d.registry_mut().create_local("wl_callback", 1, None).unwrap();

        // Act
        let quiet = d.feed(
            &event_frame(&d, ignored, "done", &[Argument::Uint(0)]),
            vec![],
            &mut sink,
        );
        let loud = d.feed(
            &event_frame(&d, watched, "done", &[Argument::Uint(0)]),
            vec![],
            &mut sink,
        );

        // Assert
        assert_eq!(quiet, Ok(1));
        assert!(matches!(
            loud,
            Err(WlError::Protocol(ProtocolError::ForbiddenEvent { .. }))
        ));
    }

    /// A tiny protocol whose events create objects.
    fn offer_dispatcher() -> Dispatcher {
        let mut protocol = Protocol::new();
        protocol
            .load_toml_str(
                r#"
                [wl_display]
                version = 1
                [[wl_display.events]]
                name = "error"
                args = [{ name = "o", type = "object" }, { name = "c", type = "uint" }, { name = "m", type = "string" }]
                [[wl_display.events]]
                name = "offer"
                args = [{ name = "id", type = "new_id", interface = "wl_data_offer" }]

                [wl_data_device]
                version = 3
                [[wl_data_device.events]]
                name = "data_offer"
                args = [{ name = "id", type = "new_id", interface = "wl_data_offer" }]

                [wl_data_offer]
                version = 3
                [[wl_data_offer.events]]
                name = "offer"
                args = [{ name = "mime_type", type = "string" }]
                "#,
            )
            .unwrap();
        let mut registry = ObjectRegistry::default();
        registry.create_display().unwrap();
        Dispatcher::new(Arc::new(protocol), registry)
    }

    #[test]
    fn test_event_new_id_binds_server_object() {
        // Arrange
        let mut d = offer_dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let server_id = ObjectId::new(0xFF00_0001).unwrap();
        let frame = event_frame(&d, ObjectId::DISPLAY, "offer", &[Argument::NewId(server_id)]);

        // Act
        d.feed(&frame, vec![], &mut sink).unwrap();

        // Assert
        let entry = d.registry().get(server_id).unwrap();
        assert_eq!(entry.interface(), "wl_data_offer");
        assert_eq!(entry.version(), 1, "inherits the parent's version");
    }

    #[test]
    fn test_event_new_id_on_live_id_is_fatal() {
        // Arrange: the server claims to create an object at id 1
        let mut d = offer_dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let frame = event_frame(&d, ObjectId::DISPLAY, "offer", &[Argument::NewId(ObjectId::DISPLAY)]);

        // Act
        let err = d.feed(&frame, vec![], &mut sink).unwrap_err();

        // Assert
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            WlError::Protocol(ProtocolError::NewIdInUse { id: 1, .. })
        ));
        assert_eq!(d.registry().get(ObjectId::DISPLAY).unwrap().interface(), "wl_display");
    }

    #[test]
    fn test_new_id_sent_to_zombie_is_released() {
        // Arrange: a destroyed data device still receives a data_offer
        let mut d = offer_dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let device = d.registry_mut().create_local("wl_data_device", 3, None).unwrap();
        let server_id = ObjectId::new(0xFF00_0002).unwrap();
        let frame = event_frame(&d, device, "data_offer", &[Argument::NewId(server_id)]);
        d.registry_mut().retire(device);

        // Act
        let count = d.feed(&frame, vec![], &mut sink).unwrap();

        // Assert
        assert_eq!(count, 1);
        assert!(d.registry().get(server_id).is_none());
        assert!(d.registry().get(device).unwrap().is_zombie());
    }

    #[test]
    fn test_handler_may_send_requests_while_dispatched() {
        // Arrange: xdg_wm_base answers ping through the sink
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let wm_base = d.registry_mut().create_local("xdg_wm_base", 6, None).unwrap();
        let frame = event_frame(&d, wm_base, "ping", &[Argument::Uint(3)]);

        // Act
        d.feed(&frame, vec![], &mut sink).unwrap();

        // Assert
        assert_eq!(sink.len(), 1);
        assert_eq!(&sink[0].bytes[8..], &3u32.to_le_bytes());
    }

    #[test]
    fn test_listeners_see_events_in_wire_order() {
        // Arrange
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let listeners = Listeners::for_interface(d.protocol(), "wl_shm")
            .unwrap()
            .on("format", move |event, _| {
                log.borrow_mut().push(event.uint(0)?);
                Ok(())
            })
            .unwrap();
        let shm = d
            .registry_mut()
            .create_local("wl_shm", 1, Some(Box::new(listeners)))
            .unwrap();
        let mut stream = Vec::new();
        for format in [0u32, 1, 0x3432_5258] {
            stream.extend(event_frame(&d, shm, "format", &[Argument::Uint(format)]));
        }

        // Act
        let count = d.feed(&stream, vec![], &mut sink).unwrap();

        // Assert
        assert_eq!(count, 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 0x3432_5258]);
    }

    #[test]
    fn test_missing_fd_is_a_resource_error() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let keyboard = d.registry_mut().create_local("wl_keyboard", 9, None).unwrap();
        // keymap(format uint, fd, size uint) with no fd queued
        let mut frame = MessageHeader {
            object_id: keyboard.raw(),
            opcode: 0,
            size: 16,
        }
        .encode()
        .to_vec();
        frame.extend([1, 0, 0, 0, 0, 16, 0, 0]);

        let err = d.feed(&frame, vec![], &mut sink).unwrap_err();

        assert!(matches!(err, WlError::Resource(ResourceError::MissingFd(_))));
    }

    #[test]
    fn test_frames_after_a_non_fatal_error_stay_dispatchable() {
        // Arrange: a keymap missing its fd, then a complete wl_shm.format
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        let keyboard = d.registry_mut().create_local("wl_keyboard", 9, None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let listeners = Listeners::for_interface(d.protocol(), "wl_shm")
            .unwrap()
            .on("format", move |event, _| {
                log.borrow_mut().push(event.uint(0)?);
                Ok(())
            })
            .unwrap();
        let shm = d
            .registry_mut()
            .create_local("wl_shm", 1, Some(Box::new(listeners)))
            .unwrap();
        let mut stream = MessageHeader {
            object_id: keyboard.raw(),
            opcode: 0,
            size: 16,
        }
        .encode()
        .to_vec();
        stream.extend([1, 0, 0, 0, 0, 16, 0, 0]);
        stream.extend(event_frame(&d, shm, "format", &[Argument::Uint(7)]));

        // Act
        let first = d.feed(&stream, vec![], &mut sink);
        let pending = d.pending_bytes();
        let second = d.dispatch_pending(&mut sink);

        // Assert
        assert!(matches!(first, Err(WlError::Resource(ResourceError::MissingFd(_)))));
        assert_eq!(pending, 12);
        assert_eq!(second, Ok(1));
        assert_eq!(*seen.borrow(), vec![7]);
        assert_eq!(d.pending_bytes(), 0);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut d = dispatcher();
        let mut sink: Vec<EncodedMessage> = Vec::new();
        d.feed(&[1, 0, 0, 0, 1, 0, 12, 0, 9], vec![], &mut sink).unwrap();

        d.reset();

        assert_eq!(d.pending_bytes(), 0);
        assert_eq!(d.feed(&[], vec![], &mut sink), Ok(0));
    }
}
