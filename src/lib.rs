//! An LDAPv3 (RFC 4511) protocol engine for clients and servers over TCP,
//! with optional TLS and in-band StartTLS upgrade. Implements the generic
//! BER codec, the RFC 4515 filter grammar, typed codecs for the standard
//! operations, a multiplexing client and a dispatching server over a
//! pluggable backend.

pub mod backend;
pub mod ber;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod messages;
pub mod proto;
pub mod server;
pub mod tls;

pub use backend::{Backend, DebugBackend};
pub use ber::{BerClass, BerError, BerValue, Packet, MAX_PACKET_SIZE};
pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use filter::Filter;
pub use messages::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, DerefAliases, ExtendedRequest,
    ExtendedResponse, Mod, ModOp, ModifyDnRequest, ModifyRequest, PasswordModifyRequest, Scope,
    SearchRequest, SearchResponse, SearchResult,
};
pub use proto::{LdapResult, ResultCode};
pub use server::Server;
