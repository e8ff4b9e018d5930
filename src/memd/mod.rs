//! Memcached binary protocol with the cluster extensions SDKs rely on.
//!
//! # Header Format (24 bytes)
//!
//! ```text
//!   |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic         | Opcode        | Key length                    |
//!   +---------------+---------------+---------------+---------------+
//!  4| Extras length | Data type     | vbucket id / status           |
//!   +---------------+---------------+---------------+---------------+
//!  8| Total body length                                             |
//!   +---------------+---------------+---------------+---------------+
//! 12| Opaque                                                        |
//!   +---------------+---------------+---------------+---------------+
//! 16| CAS                                                           |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! With the alternative magics (`0x08`/`0x18`) byte 2 carries the framing
//! extras length and byte 3 the key length. The body is framing extras,
//! extras, key, value.

pub mod codec;
pub mod packet;

pub use codec::{decode, encode, DecodeResult};
pub use packet::Packet;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 24;

/// Datatype flag: value is JSON.
pub const DATATYPE_JSON: u8 = 0x01;
/// Datatype flag: value is snappy compressed.
pub const DATATYPE_SNAPPY: u8 = 0x02;
/// Datatype flag: value carries extended attributes.
pub const DATATYPE_XATTR: u8 = 0x04;

/// Frame magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Magic {
    /// Request.
    Req = 0x80,
    /// Response.
    Res = 0x81,
    /// Request with framing extras.
    ReqExt = 0x08,
    /// Response with framing extras.
    ResExt = 0x18,
}

impl Magic {
    /// Whether this magic denotes a request.
    pub fn is_request(self) -> bool {
        matches!(self, Magic::Req | Magic::ReqExt)
    }

    /// Whether the header uses the framing-extras layout.
    pub fn is_extended(self) -> bool {
        matches!(self, Magic::ReqExt | Magic::ResExt)
    }

    /// The response magic matching this request magic.
    pub fn response(self) -> Magic {
        match self {
            Magic::Req | Magic::Res => Magic::Res,
            Magic::ReqExt | Magic::ResExt => Magic::ResExt,
        }
    }
}

impl TryFrom<u8> for Magic {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Magic::Req),
            0x81 => Ok(Magic::Res),
            0x08 => Ok(Magic::ReqExt),
            0x18 => Ok(Magic::ResExt),
            _ => Err(value),
        }
    }
}

/// Command opcodes understood by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Noop = 0x0a,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    Touch = 0x1c,
    GetAndTouch = 0x1d,
    Hello = 0x1f,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    GetReplica = 0x83,
    SelectBucket = 0x89,
    ObserveSeqNo = 0x91,
    Observe = 0x92,
    GetLocked = 0x94,
    Unlock = 0x95,
    GetMeta = 0xa0,
    GetClusterConfig = 0xb5,
    GetRandom = 0xb6,
    CollectionsGetManifest = 0xba,
    CollectionsGetId = 0xbb,
    SubDocMultiLookup = 0xd0,
    SubDocMultiMutation = 0xd1,
    GetErrorMap = 0xfe,
}

impl Command {
    /// Human readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Command::Get => "GET",
            Command::Set => "SET",
            Command::Add => "ADD",
            Command::Replace => "REPLACE",
            Command::Delete => "DELETE",
            Command::Increment => "INCREMENT",
            Command::Decrement => "DECREMENT",
            Command::Noop => "NOOP",
            Command::Append => "APPEND",
            Command::Prepend => "PREPEND",
            Command::Stat => "STAT",
            Command::Touch => "TOUCH",
            Command::GetAndTouch => "GAT",
            Command::Hello => "HELLO",
            Command::SaslListMechs => "SASL_LIST_MECHS",
            Command::SaslAuth => "SASL_AUTH",
            Command::SaslStep => "SASL_STEP",
            Command::GetReplica => "GET_REPLICA",
            Command::SelectBucket => "SELECT_BUCKET",
            Command::ObserveSeqNo => "OBSERVE_SEQNO",
            Command::Observe => "OBSERVE",
            Command::GetLocked => "GET_LOCKED",
            Command::Unlock => "UNLOCK",
            Command::GetMeta => "GET_META",
            Command::GetClusterConfig => "GET_CLUSTER_CONFIG",
            Command::GetRandom => "GET_RANDOM",
            Command::CollectionsGetManifest => "COLLECTIONS_GET_MANIFEST",
            Command::CollectionsGetId => "COLLECTIONS_GET_ID",
            Command::SubDocMultiLookup => "SUBDOC_MULTI_LOOKUP",
            Command::SubDocMultiMutation => "SUBDOC_MULTI_MUTATION",
            Command::GetErrorMap => "GET_ERROR_MAP",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::Get),
            0x01 => Ok(Command::Set),
            0x02 => Ok(Command::Add),
            0x03 => Ok(Command::Replace),
            0x04 => Ok(Command::Delete),
            0x05 => Ok(Command::Increment),
            0x06 => Ok(Command::Decrement),
            0x0a => Ok(Command::Noop),
            0x0e => Ok(Command::Append),
            0x0f => Ok(Command::Prepend),
            0x10 => Ok(Command::Stat),
            0x1c => Ok(Command::Touch),
            0x1d => Ok(Command::GetAndTouch),
            0x1f => Ok(Command::Hello),
            0x20 => Ok(Command::SaslListMechs),
            0x21 => Ok(Command::SaslAuth),
            0x22 => Ok(Command::SaslStep),
            0x83 => Ok(Command::GetReplica),
            0x89 => Ok(Command::SelectBucket),
            0x91 => Ok(Command::ObserveSeqNo),
            0x92 => Ok(Command::Observe),
            0x94 => Ok(Command::GetLocked),
            0x95 => Ok(Command::Unlock),
            0xa0 => Ok(Command::GetMeta),
            0xb5 => Ok(Command::GetClusterConfig),
            0xb6 => Ok(Command::GetRandom),
            0xba => Ok(Command::CollectionsGetManifest),
            0xbb => Ok(Command::CollectionsGetId),
            0xd0 => Ok(Command::SubDocMultiLookup),
            0xd1 => Ok(Command::SubDocMultiMutation),
            0xfe => Ok(Command::GetErrorMap),
            _ => Err(value),
        }
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    Success = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    TooBig = 0x0003,
    InvalidArguments = 0x0004,
    NotStored = 0x0005,
    BadDelta = 0x0006,
    NotMyVbucket = 0x0007,
    NoBucket = 0x0008,
    Locked = 0x0009,
    AuthStale = 0x001f,
    AuthError = 0x0020,
    AuthContinue = 0x0021,
    RangeError = 0x0022,
    AccessError = 0x0024,
    NotInitialized = 0x0025,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
    NotSupported = 0x0083,
    InternalError = 0x0084,
    Busy = 0x0085,
    TmpFail = 0x0086,
    UnknownCollection = 0x0088,
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status as u16
    }
}

impl TryFrom<u16> for Status {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(Status::Success),
            0x0001 => Ok(Status::KeyNotFound),
            0x0002 => Ok(Status::KeyExists),
            0x0003 => Ok(Status::TooBig),
            0x0004 => Ok(Status::InvalidArguments),
            0x0005 => Ok(Status::NotStored),
            0x0006 => Ok(Status::BadDelta),
            0x0007 => Ok(Status::NotMyVbucket),
            0x0008 => Ok(Status::NoBucket),
            0x0009 => Ok(Status::Locked),
            0x001f => Ok(Status::AuthStale),
            0x0020 => Ok(Status::AuthError),
            0x0021 => Ok(Status::AuthContinue),
            0x0022 => Ok(Status::RangeError),
            0x0024 => Ok(Status::AccessError),
            0x0025 => Ok(Status::NotInitialized),
            0x0081 => Ok(Status::UnknownCommand),
            0x0082 => Ok(Status::OutOfMemory),
            0x0083 => Ok(Status::NotSupported),
            0x0084 => Ok(Status::InternalError),
            0x0085 => Ok(Status::Busy),
            0x0086 => Ok(Status::TmpFail),
            0x0088 => Ok(Status::UnknownCollection),
            _ => Err(value),
        }
    }
}

/// HELLO feature codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum HelloFeature {
    Datatype = 0x01,
    Tls = 0x02,
    TcpNoDelay = 0x03,
    MutationSeqno = 0x04,
    TcpDelay = 0x05,
    Xattr = 0x06,
    Xerror = 0x07,
    SelectBucket = 0x08,
    Snappy = 0x0a,
    Json = 0x0b,
    Duplex = 0x0c,
    ClustermapChangeNotification = 0x0d,
    UnorderedExecution = 0x0e,
    Tracing = 0x0f,
    AltRequests = 0x10,
    SyncReplication = 0x11,
    Collections = 0x12,
}

impl TryFrom<u16> for HelloFeature {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(HelloFeature::Datatype),
            0x02 => Ok(HelloFeature::Tls),
            0x03 => Ok(HelloFeature::TcpNoDelay),
            0x04 => Ok(HelloFeature::MutationSeqno),
            0x05 => Ok(HelloFeature::TcpDelay),
            0x06 => Ok(HelloFeature::Xattr),
            0x07 => Ok(HelloFeature::Xerror),
            0x08 => Ok(HelloFeature::SelectBucket),
            0x0a => Ok(HelloFeature::Snappy),
            0x0b => Ok(HelloFeature::Json),
            0x0c => Ok(HelloFeature::Duplex),
            0x0d => Ok(HelloFeature::ClustermapChangeNotification),
            0x0e => Ok(HelloFeature::UnorderedExecution),
            0x0f => Ok(HelloFeature::Tracing),
            0x10 => Ok(HelloFeature::AltRequests),
            0x11 => Ok(HelloFeature::SyncReplication),
            0x12 => Ok(HelloFeature::Collections),
            _ => Err(value),
        }
    }
}
