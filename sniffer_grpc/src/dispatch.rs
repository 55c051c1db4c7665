//! Decode dispatch: schema first, then the generic wire decoder, then opaque bytes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use sniffer_core::{debug_trace, FlowKey, Resolution, Side};

use crate::message::RawMessage;
use crate::registry::{SchemaRegistry, TypedMessage};
use crate::report::{Report, Reporter};
use crate::wire::{self, WireTree};

/// Result of decoding one message body.
#[derive(Debug)]
pub enum DecodedMessage {
    /// A registered prototype accepted the body.
    Typed(Box<dyn TypedMessage>),
    /// Schema-free decode.
    Generic(WireTree),
    /// Neither parse succeeded.
    Opaque(Bytes),
    /// Compressed on the wire, never decoded.
    Compressed(Bytes),
}

impl DecodedMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Typed(_) => "typed",
            Self::Generic(_) => "generic",
            Self::Opaque(_) => "opaque",
            Self::Compressed(_) => "compressed",
        }
    }

    pub fn downcast_ref<M: 'static>(&self) -> Option<&M> {
        match self {
            Self::Typed(message) => message.downcast_ref::<M>(),
            _ => None,
        }
    }

    pub fn as_generic(&self) -> Option<&WireTree> {
        match self {
            Self::Generic(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn is_typed(&self) -> bool {
        matches!(self, Self::Typed(_))
    }
}

impl fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed(message) => write!(f, "{} {:?}", message.type_name(), message),
            Self::Generic(tree) if tree.is_empty() => f.write_str("<empty message>"),
            Self::Generic(tree) => write!(f, "\n{}", tree),
            Self::Opaque(bytes) => write!(f, "bytes=\"{}\"", bytes.escape_ascii()),
            Self::Compressed(bytes) => write!(f, "<compressed, {} bytes>", bytes.len()),
        }
    }
}

/// Decodes message bodies and hands the result to a [`Reporter`].
///
/// Holds nothing but the shared registry and sink, so one dispatcher can serve
/// every worker.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SchemaRegistry>,
    reporter: Arc<dyn Reporter>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SchemaRegistry>, reporter: Arc<dyn Reporter>) -> Self {
        Self { registry, reporter }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Decode an uncompressed body seen on `side` of `path`.
    ///
    /// With a schema entry, `Request` and `Response` try one prototype and
    /// `Unknown` tries both in registration order.
    pub fn decode(&self, path: &str, side: Side, body: &Bytes) -> DecodedMessage {
        if let Some(entry) = self.registry.get(path) {
            for prototype in entry.candidates(side) {
                match prototype.decode(body) {
                    Ok(message) => return DecodedMessage::Typed(message),
                    Err(_err) => {
                        debug_trace!("{} rejected body on {}: {}", prototype.name(), path, _err);
                    }
                }
            }
        }

        match wire::decode(body) {
            Ok(tree) => DecodedMessage::Generic(tree),
            Err(_err) => {
                debug_trace!("generic decode failed on {:?}: {}", path, _err);
                DecodedMessage::Opaque(body.clone())
            }
        }
    }

    pub fn decode_raw(&self, path: &str, side: Side, raw: RawMessage) -> DecodedMessage {
        if raw.compressed {
            return DecodedMessage::Compressed(raw.body);
        }
        self.decode(path, side, &raw.body)
    }

    /// Decode and emit one message.
    pub fn dispatch(&self, flow: FlowKey, stream_id: u32, resolution: &Resolution, raw: RawMessage) {
        let message = self.decode_raw(resolution.path_str(), resolution.side, raw);
        self.reporter.emit(Report {
            flow,
            stream_id,
            path: resolution.path_str().to_owned(),
            side: resolution.side,
            message,
        });
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("schemas", &self.registry.len())
            .finish_non_exhaustive()
    }
}
