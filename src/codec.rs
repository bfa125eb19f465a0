//! Message codecs.
//!
//! A codec maps application messages to and from packet bodies. The session
//! that owns the connection is passed as context so a codec can key its
//! behavior off session attributes.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::network::Session;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid utf-8 body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("{0}")]
    Other(String),
}

/// Maps application messages to and from packet bodies.
///
/// Both endpoints of a connection must agree on the codec. The message type
/// is fixed at build time; swapping codecs at runtime is only possible
/// between codecs of the same message type.
pub trait Codec: Send + Sync + 'static {
    type Message: Send + Sync + 'static;

    /// Encode a message into a packet body.
    fn encode(
        &self,
        message: &Self::Message,
        session: &Session<Self::Message>,
    ) -> Result<Vec<u8>, CodecError>;

    /// Decode a packet body into a message.
    fn decode(
        &self,
        body: &[u8],
        session: &Session<Self::Message>,
    ) -> Result<Self::Message, CodecError>;
}

/// The default codec: messages are UTF-8 strings, bodies are their bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Message = String;

    fn encode(&self, message: &String, _session: &Session<String>) -> Result<Vec<u8>, CodecError> {
        Ok(message.as_bytes().to_vec())
    }

    fn decode(&self, body: &[u8], _session: &Session<String>) -> Result<String, CodecError> {
        Ok(String::from_utf8(body.to_vec())?)
    }
}

/// Bincode codec for any serde message type.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Message = T;

    fn encode(&self, message: &T, _session: &Session<T>) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(message)?)
    }

    fn decode(&self, body: &[u8], _session: &Session<T>) -> Result<T, CodecError> {
        Ok(bincode::deserialize(body)?)
    }
}
