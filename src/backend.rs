//! The contract a directory implementation fulfils to serve requests.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::messages::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, ExtendedRequest, ExtendedResponse,
    ModifyDnRequest, ModifyRequest, PasswordModifyRequest, SearchRequest, SearchResponse,
    SearchResult,
};
use crate::proto::{LdapResult, ResultCode};

/// Backing store for a [`crate::server::Server`].
///
/// `State` is opaque per-connection state, created on accept and threaded
/// through every call until disconnect. Backends populate result codes and
/// diagnostics directly; returning `Err` tears the connection down after an
/// error reply. Calls run under the server's processing deadline and are
/// cancelled (dropped) when it expires.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type State: Send + 'static;

    async fn connect(&self, remote_addr: SocketAddr) -> Result<Self::State>;
    async fn disconnect(&self, state: Self::State);
    async fn bind(&self, state: &mut Self::State, req: &BindRequest) -> Result<LdapResult>;
    async fn search(&self, state: &mut Self::State, req: &SearchRequest)
        -> Result<SearchResponse>;
    async fn add(&self, state: &mut Self::State, req: &AddRequest) -> Result<LdapResult>;
    async fn delete(&self, state: &mut Self::State, req: &DeleteRequest) -> Result<LdapResult>;
    async fn modify(&self, state: &mut Self::State, req: &ModifyRequest) -> Result<LdapResult>;
    async fn modify_dn(&self, state: &mut Self::State, req: &ModifyDnRequest)
        -> Result<LdapResult>;
    async fn compare(&self, state: &mut Self::State, req: &CompareRequest) -> Result<LdapResult>;
    async fn extended(
        &self,
        state: &mut Self::State,
        req: &ExtendedRequest,
    ) -> Result<ExtendedResponse>;
    /// Returns the generated password when the server chose one.
    async fn password_modify(
        &self,
        state: &mut Self::State,
        req: &PasswordModifyRequest,
    ) -> Result<Option<Vec<u8>>>;
    /// Returns the authorization identity bound to this connection.
    async fn whoami(&self, state: &mut Self::State) -> Result<String>;
}

/// Backend that logs every request and answers with canned data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugBackend;

#[async_trait]
impl Backend for DebugBackend {
    type State = ();

    async fn connect(&self, remote_addr: SocketAddr) -> Result<()> {
        info!("CONNECT {}", remote_addr);
        Ok(())
    }

    async fn disconnect(&self, _state: ()) {}

    async fn bind(&self, _state: &mut (), req: &BindRequest) -> Result<LdapResult> {
        info!("BIND dn={}", req.dn);
        Ok(LdapResult::default())
    }

    async fn search(&self, _state: &mut (), req: &SearchRequest) -> Result<SearchResponse> {
        info!("SEARCH base={} filter={}", req.base_dn, req.filter);
        let mut entry = SearchResult {
            dn: "cn=admin,dc=example,dc=com".to_string(),
            attributes: Default::default(),
        };
        entry
            .attributes
            .insert("objectClass".to_string(), vec![b"person".to_vec()]);
        entry
            .attributes
            .insert("cn".to_string(), vec![b"admin".to_vec()]);
        Ok(SearchResponse {
            result: LdapResult::default(),
            results: vec![entry],
        })
    }

    async fn add(&self, _state: &mut (), req: &AddRequest) -> Result<LdapResult> {
        info!("ADD dn={}", req.dn);
        Ok(LdapResult::default())
    }

    async fn delete(&self, _state: &mut (), req: &DeleteRequest) -> Result<LdapResult> {
        info!("DELETE dn={}", req.dn);
        Ok(LdapResult::default())
    }

    async fn modify(&self, _state: &mut (), req: &ModifyRequest) -> Result<LdapResult> {
        info!("MODIFY dn={} mods={}", req.dn, req.mods.len());
        Ok(LdapResult::default())
    }

    async fn modify_dn(&self, _state: &mut (), req: &ModifyDnRequest) -> Result<LdapResult> {
        info!("MODIFYDN dn={} newrdn={}", req.dn, req.new_rdn);
        Ok(LdapResult::default())
    }

    async fn compare(&self, _state: &mut (), req: &CompareRequest) -> Result<LdapResult> {
        info!("COMPARE dn={} attr={}", req.dn, req.attribute);
        Ok(LdapResult::new(ResultCode::COMPARE_FALSE, ""))
    }

    async fn extended(&self, _state: &mut (), req: &ExtendedRequest) -> Result<ExtendedResponse> {
        info!("EXTENDED oid={}", req.name);
        Err(Error::protocol("unsupported extended request"))
    }

    async fn password_modify(
        &self,
        _state: &mut (),
        _req: &PasswordModifyRequest,
    ) -> Result<Option<Vec<u8>>> {
        info!("PASSWORD MODIFY");
        Ok(Some(b"genpass".to_vec()))
    }

    async fn whoami(&self, _state: &mut ()) -> Result<String> {
        info!("WHOAMI");
        Ok("cn=someone,o=somewhere".to_string())
    }
}
