//! The request-sending path: validate, allocate, encode, transmit.

use std::os::fd::RawFd;

use tracing::debug;

use crate::error::{ArgumentError, WlError};
use crate::handler::EventHandler;
use crate::object::{ObjectId, ObjectRegistry};
use crate::protocol::{ArgType, Protocol};
use crate::wire::{encode_message, Argument, EncodedMessage};

/// Where encoded frames go.  One call per frame, in issue order.
pub trait WireSink {
    /// Transmits one frame and its ancillary fds in a single write.
    ///
    /// # Errors
    ///
    /// Returns [`WlError::Transmit`] when the frame could not be written.
    fn send_frame(&mut self, bytes: &[u8], fds: &[RawFd]) -> Result<(), WlError>;
}

/// Collects frames in memory.
impl WireSink for Vec<EncodedMessage> {
    fn send_frame(&mut self, bytes: &[u8], fds: &[RawFd]) -> Result<(), WlError> {
        self.push(EncodedMessage {
            bytes: bytes.to_vec(),
            fds: fds.to_vec(),
        });
        Ok(())
    }
}

/// Sends `request` on `object` and returns the object it created, if any.
///
/// `args` holds one value per schema argument *except* typed new_ids, which
/// are allocated here before encoding.  An untyped new_id is passed as
/// [`Argument::NewDynamic`] with `id: None` and is allocated here too.  The
/// optional `handler` is attached to the created object.
///
/// Objects created by a typed new_id inherit `object`'s version.  After a
/// destructor request the object is retired.
///
/// # Errors
///
/// - [`ArgumentError::NoSuchObject`] if `object`, or an object argument, is
///   not live.
/// - [`ArgumentError::UnknownRequest`], [`ArgumentError::VersionTooLow`],
///   [`ArgumentError::Count`], and the codec's encoding errors.  Every
///   object allocated for the request is released again on these.
/// - Whatever the sink returns; the created object then stays registered
///   because the connection is unusable anyway.
pub fn send_request(
    protocol: &Protocol,
    registry: &mut ObjectRegistry,
    sink: &mut dyn WireSink,
    object: ObjectId,
    request: &str,
    args: Vec<Argument>,
    handler: Option<Box<dyn EventHandler>>,
) -> Result<Option<ObjectId>, WlError> {
    let entry = registry
        .get(object)
        .filter(|e| !e.is_zombie())
        .ok_or(ArgumentError::NoSuchObject(object.raw()))?;
    let version = entry.version();
    let interface = protocol.require(entry.interface())?.clone();

    let spec = interface
        .request(request)
        .ok_or_else(|| ArgumentError::UnknownRequest {
            interface: interface.name.clone(),
            request: request.to_string(),
        })?;
    if spec.since > version {
        return Err(ArgumentError::VersionTooLow {
            interface: interface.name.clone(),
            request: request.to_string(),
            since: spec.since,
            version,
        }
        .into());
    }
    if args.len() != spec.caller_arg_count() {
        return Err(ArgumentError::Count {
            request: request.to_string(),
            expected: spec.caller_arg_count(),
            got: args.len(),
        }
        .into());
    }

    // Object references must point at something live before we allocate.
    let caller_specs = spec.args.iter().filter(|a| !a.is_typed_new_id());
    for (arg_spec, arg) in caller_specs.zip(&args) {
        if let (ArgType::Object, Argument::Object(Some(target))) = (arg_spec.arg_type, arg) {
            if !registry.contains(*target) {
                return Err(ArgumentError::NoSuchObject(target.raw()).into());
            }
        }
    }

    let mut handler = handler;
    let mut allocated = Vec::new();
    let mut caller_args = args.into_iter();
    let mut full = Vec::with_capacity(spec.args.len());
    let built = (|| -> Result<EncodedMessage, WlError> {
        for arg_spec in &spec.args {
            match &arg_spec.interface {
                Some(child) if arg_spec.is_typed_new_id() => {
                    let id = registry.create_local(child, version, handler.take())?;
                    allocated.push(id);
                    full.push(Argument::NewId(id));
                }
                _ => {
                    let mut arg = caller_args.next().ok_or_else(|| ArgumentError::Count {
                        request: request.to_string(),
                        expected: spec.caller_arg_count(),
                        got: 0,
                    })?;
                    if let Argument::NewDynamic {
                        interface: named,
                        version: named_version,
                        id: slot @ None,
                    } = &mut arg
                    {
                        let new = registry.create_local(named, *named_version, handler.take())?;
                        *slot = Some(new);
                        allocated.push(new);
                    }
                    full.push(arg);
                }
            }
        }
        Ok(encode_message(object, spec.opcode, &spec.name, &spec.args, &full)?)
    })();
    let message = match built {
        Ok(message) => message,
        Err(err) => {
            for id in allocated {
                registry.delete(id);
            }
            return Err(err);
        }
    };
    let created = allocated.last().copied();

    debug!(
        "RQ: ({}) {}::{} {:?}",
        object.raw(),
        interface.name,
        spec.name,
        full
    );
    sink.send_frame(&message.bytes, &message.fds)?;

    if spec.destructor {
        registry.retire(object);
    }
    Ok(created)
}
