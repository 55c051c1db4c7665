//! Schema registry: method path to request/response message types.
//!
//! Built once at startup and shared read-only by every worker.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use sniffer_core::debug_warn;
use sniffer_core::Side;

/// A decoded message whose concrete type is known to the registry.
pub trait TypedMessage: Any + Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Re-encode to protobuf bytes.
    fn encode_body(&self) -> Vec<u8>;
}

impl<M> TypedMessage for M
where
    M: prost::Message + Default + 'static,
{
    fn type_name(&self) -> &'static str {
        type_name::<M>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn encode_body(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

impl dyn TypedMessage {
    pub fn downcast_ref<M: 'static>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    pub fn is<M: 'static>(&self) -> bool {
        self.as_any().is::<M>()
    }
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn TypedMessage>, prost::DecodeError>;

/// Decoder for one protobuf message type.
#[derive(Clone, Copy)]
pub struct MessagePrototype {
    name: &'static str,
    decode: DecodeFn,
}

impl MessagePrototype {
    pub fn of<M>() -> Self
    where
        M: prost::Message + Default + 'static,
    {
        fn decode_as<M>(body: &[u8]) -> Result<Box<dyn TypedMessage>, prost::DecodeError>
        where
            M: prost::Message + Default + 'static,
        {
            Ok(Box::new(M::decode(body)?))
        }

        Self {
            name: type_name::<M>(),
            decode: decode_as::<M>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn decode(&self, body: &[u8]) -> Result<Box<dyn TypedMessage>, prost::DecodeError> {
        (self.decode)(body)
    }
}

impl fmt::Debug for MessagePrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessagePrototype").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidPath(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(path) => {
                write!(f, "Invalid gRPC method path {:?}, expected /package.Service/Method", path)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// A gRPC method path, `/package.Service/Method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    path: String,
    split: usize,
}

impl MethodPath {
    pub fn parse(path: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidPath(path.to_owned());
        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let (service, method) = rest.split_once('/').ok_or_else(invalid)?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            path: path.to_owned(),
            split: 1 + service.len(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Fully qualified service name, e.g. `greeter.Greeter`.
    pub fn service(&self) -> &str {
        &self.path[1..self.split]
    }

    pub fn method(&self) -> &str {
        &self.path[self.split + 1..]
    }

    /// Package part of the service name, empty when there is none.
    pub fn package(&self) -> &str {
        self.service().rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Request and response types of one method.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub path: MethodPath,
    prototypes: [MessagePrototype; 2],
}

impl SchemaEntry {
    pub fn request(&self) -> &MessagePrototype {
        &self.prototypes[0]
    }

    pub fn response(&self) -> &MessagePrototype {
        &self.prototypes[1]
    }

    /// Prototypes to try for a message seen on `side`, in order.
    pub fn candidates(&self, side: Side) -> &[MessagePrototype] {
        match side {
            Side::Request => &self.prototypes[..1],
            Side::Response => &self.prototypes[1..],
            Side::Unknown => &self.prototypes[..],
        }
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: HashMap<String, SchemaEntry>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// A registry with no schemas: every message goes to the generic decoder.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&SchemaEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`SchemaRegistry`].
///
/// ```rust
/// use sniffer_grpc::registry::SchemaRegistry;
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct Ping {
///     #[prost(uint32, tag = "1")]
///     seq: u32,
/// }
///
/// let registry = SchemaRegistry::builder()
///     .method::<Ping, Ping>("/health.Checker/Ping")
///     .build()
///     .unwrap();
/// assert!(registry.contains("/health.Checker/Ping"));
/// ```
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    entries: HashMap<String, SchemaEntry>,
    error: Option<RegistryError>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the message types of one method. The first registration of a path wins.
    pub fn method<Req, Resp>(self, path: &str) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + Default + 'static,
    {
        self.entry(path, MessagePrototype::of::<Req>(), MessagePrototype::of::<Resp>())
    }

    /// Register prototypes built elsewhere.
    pub fn entry(mut self, path: &str, request: MessagePrototype, response: MessagePrototype) -> Self {
        if self.error.is_some() {
            return self;
        }
        let path = match MethodPath::parse(path) {
            Ok(path) => path,
            Err(err) => {
                self.error = Some(err);
                return self;
            }
        };
        if self.entries.contains_key(path.as_str()) {
            debug_warn!("schema for {} registered twice, keeping the first", path);
            return self;
        }
        self.entries.insert(
            path.as_str().to_owned(),
            SchemaEntry {
                path,
                prototypes: [request, response],
            },
        );
        self
    }

    /// Fails with the first invalid path that was registered.
    pub fn build(self) -> Result<SchemaRegistry, RegistryError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(SchemaRegistry { entries: self.entries }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greeter::{HelloReply, HelloRequest, SAY_HELLO};
    use prost::Message;

    #[test]
    fn test_method_path_parts() {
        let path = MethodPath::parse("/greeter.Greeter/SayHello").unwrap();
        assert_eq!(path.service(), "greeter.Greeter");
        assert_eq!(path.method(), "SayHello");
        assert_eq!(path.package(), "greeter");
        assert_eq!(path.to_string(), "/greeter.Greeter/SayHello");

        let nested = MethodPath::parse("/com.example.UserService/GetUser").unwrap();
        assert_eq!(nested.package(), "com.example");

        let bare = MethodPath::parse("/Echo/Call").unwrap();
        assert_eq!(bare.package(), "");
    }

    #[test]
    fn test_invalid_method_paths() {
        for bad in ["", "/", "greeter.Greeter/SayHello", "/greeter.Greeter", "/greeter.Greeter/", "//SayHello", "/a/b/c"] {
            assert_eq!(
                MethodPath::parse(bad),
                Err(RegistryError::InvalidPath(bad.to_owned())),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SchemaRegistry::builder()
            .method::<HelloRequest, HelloReply>(SAY_HELLO)
            .build()
            .unwrap();

        let entry = registry.get(SAY_HELLO).unwrap();
        assert!(entry.request().name().ends_with("HelloRequest"));
        assert!(entry.response().name().ends_with("HelloReply"));
        assert_eq!(entry.candidates(Side::Unknown).len(), 2);
        assert!(entry.candidates(Side::Response)[0].name().ends_with("HelloReply"));
        assert!(registry.get("/greeter.Greeter/Other").is_none());
        assert_eq!(registry.paths().collect::<Vec<_>>(), vec![SAY_HELLO]);
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = SchemaRegistry::builder()
            .method::<HelloRequest, HelloReply>(SAY_HELLO)
            .method::<HelloReply, HelloRequest>(SAY_HELLO)
            .build()
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(SAY_HELLO).unwrap().request().name().ends_with("HelloRequest"));
    }

    #[test]
    fn test_invalid_path_fails_build() {
        let result = SchemaRegistry::builder()
            .method::<HelloRequest, HelloReply>("SayHello")
            .method::<HelloRequest, HelloReply>(SAY_HELLO)
            .build();
        assert_eq!(result.unwrap_err(), RegistryError::InvalidPath("SayHello".into()));
    }

    #[test]
    fn test_prototype_decodes_and_downcasts() {
        let request = HelloRequest { name: "grpc".into(), my_field: "x".into() };
        let proto = MessagePrototype::of::<HelloRequest>();

        let decoded = proto.decode(&request.encode_to_vec()).unwrap();
        assert!(decoded.is::<HelloRequest>());
        assert_eq!(decoded.downcast_ref::<HelloRequest>(), Some(&request));
        assert!(decoded.downcast_ref::<HelloReply>().is_none());
        assert_eq!(decoded.encode_body(), request.encode_to_vec());

        assert!(proto.decode(&[0x0a, 0x05, b'a']).is_err());
    }
}
