//! Junction core
//!
//! Protocol model shared by the router and its transports: message kinds,
//! typed options, identifiers, URI rules, errors and the JSON wire codec.

pub mod codec;
pub mod error;
pub mod ids;
pub mod message;
pub mod options;
pub mod uri;

pub use error::{ProtocolError, RoutingError};
pub use ids::{
    random_id, Id, IdSequence, PublicationId, RegistrationId, RequestId, SessionId,
    SubscriptionId, MAX_ID,
};
pub use message::{close, Message, MessageKind};
pub use options::{
    router_roles, CallOptions, CancelMode, CancelOptions, CloseDetails, EventDetails,
    HelloDetails, InterruptOptions, InvocationDetails, InvocationPolicy, Kwargs, Payload,
    PublishOptions, RegisterOptions, ResultDetails, SubscribeOptions, WelcomeDetails,
    YieldOptions,
};
pub use uri::MatchPolicy;

/// Result type alias for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
