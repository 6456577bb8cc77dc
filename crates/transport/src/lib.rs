//! Signed gRPC transport for the subnet matcher and validator services.
//!
//! # Architecture
//!
//! ```text
//! RequestSigner ──► RpcClient (tonic Grpc<Channel>) ──► MatcherClient
//!                                                   └─► ValidatorClient
//! ```
//!
//! Every call is signed with the caller's secp256k1 key (see [`signing`]).
//! Server streams are exposed as [`Subscription`]s: an item channel plus a
//! side channel for the terminal error. The clients never retry; reconnect
//! policy belongs to the caller.

#![warn(missing_docs)]

pub mod channel;
pub mod error;
pub mod matcher;
#[allow(missing_docs)]
pub mod proto;
mod rpc;
pub mod signing;
pub mod subscription;
pub mod validator;

pub use channel::{ClientConfig, TlsSettings, DEFAULT_CONNECT_TIMEOUT};
pub use error::{SigningError, SigningResult, TransportError, TransportResult};
pub use matcher::{MatcherClient, MatcherTransport};
pub use signing::{generate_nonce, recover_signer, RequestSigner, SignedMetadata, Signer};
pub use subscription::{Subscription, SubscriptionSender};
pub use validator::{ReportBatchAck, ValidatorClient, ValidatorTransport};

pub use alloy_primitives::Address;
