//! End-to-end tests: the real client against the real server over loopback
//! TCP, including TLS and the in-band StartTLS upgrade.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use ldap_engine::backend::Backend;
use ldap_engine::messages::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, ExtendedRequest, ExtendedResponse,
    Mod, ModOp, ModifyDnRequest, ModifyRequest, PasswordModifyRequest, Scope, SearchRequest,
    SearchResponse, SearchResult,
};
use ldap_engine::proto::{self, LdapResult, ResultCode};
use ldap_engine::{tls, Client, Error, Packet, Server};

const CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/certs/cert.pem");
const KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/certs/key.pem");

/// Fixed-content backend; connection state tracks the bound DN.
struct TestBackend;

#[async_trait]
impl Backend for TestBackend {
    type State = Option<String>;

    async fn connect(&self, _remote_addr: SocketAddr) -> ldap_engine::Result<Self::State> {
        Ok(None)
    }

    async fn disconnect(&self, _state: Self::State) {}

    async fn bind(
        &self,
        state: &mut Self::State,
        req: &BindRequest,
    ) -> ldap_engine::Result<LdapResult> {
        if req.dn == "cn=test" && req.password == b"verysecure" {
            *state = Some(req.dn.clone());
            Ok(LdapResult::default())
        } else {
            Ok(LdapResult::new(ResultCode::INVALID_CREDENTIALS, "invalid credentials"))
        }
    }

    async fn search(
        &self,
        _state: &mut Self::State,
        req: &SearchRequest,
    ) -> ldap_engine::Result<SearchResponse> {
        if req.base_dn == "dc=missing" {
            return Ok(SearchResponse {
                result: LdapResult::new(ResultCode::NO_SUCH_OBJECT, ""),
                results: vec![],
            });
        }
        let mut first = SearchResult {
            dn: "cn=admin,dc=example,dc=com".to_string(),
            attributes: HashMap::new(),
        };
        first
            .attributes
            .insert("cn".to_string(), vec![b"admin".to_vec()]);
        let mut second = SearchResult {
            dn: "cn=guest,dc=example,dc=com".to_string(),
            attributes: HashMap::new(),
        };
        second
            .attributes
            .insert("cn".to_string(), vec![b"guest".to_vec()]);
        Ok(SearchResponse {
            result: LdapResult::default(),
            results: vec![first, second],
        })
    }

    async fn add(&self, _state: &mut Self::State, _req: &AddRequest) -> ldap_engine::Result<LdapResult> {
        Ok(LdapResult::default())
    }

    async fn delete(
        &self,
        _state: &mut Self::State,
        req: &DeleteRequest,
    ) -> ldap_engine::Result<LdapResult> {
        if req.dn == "cn=protected" {
            Ok(LdapResult::new(ResultCode::UNWILLING_TO_PERFORM, "protected entry"))
        } else {
            Ok(LdapResult::default())
        }
    }

    async fn modify(
        &self,
        _state: &mut Self::State,
        _req: &ModifyRequest,
    ) -> ldap_engine::Result<LdapResult> {
        Ok(LdapResult::default())
    }

    async fn modify_dn(
        &self,
        _state: &mut Self::State,
        _req: &ModifyDnRequest,
    ) -> ldap_engine::Result<LdapResult> {
        Ok(LdapResult::default())
    }

    async fn compare(
        &self,
        _state: &mut Self::State,
        req: &CompareRequest,
    ) -> ldap_engine::Result<LdapResult> {
        if req.value == b"match" {
            Ok(LdapResult::new(ResultCode::COMPARE_TRUE, ""))
        } else {
            Ok(LdapResult::new(ResultCode::COMPARE_FALSE, ""))
        }
    }

    async fn extended(
        &self,
        _state: &mut Self::State,
        req: &ExtendedRequest,
    ) -> ldap_engine::Result<ExtendedResponse> {
        Ok(ExtendedResponse {
            result: LdapResult::new(ResultCode::UNWILLING_TO_PERFORM, "unknown extension"),
            name: Some(req.name.clone()),
            value: None,
        })
    }

    async fn password_modify(
        &self,
        _state: &mut Self::State,
        _req: &PasswordModifyRequest,
    ) -> ldap_engine::Result<Option<Vec<u8>>> {
        Ok(Some(b"generated".to_vec()))
    }

    async fn whoami(&self, state: &mut Self::State) -> ldap_engine::Result<String> {
        match state {
            Some(dn) => Ok(format!("dn:{}", dn)),
            None => Ok(String::new()),
        }
    }
}

async fn start_server(with_tls: bool) -> (Server<TestBackend>, SocketAddr, JoinHandle<()>) {
    let tls_config = if with_tls {
        Some(tls::server_config_from_files(CERT, KEY).unwrap())
    } else {
        None
    };
    let server = Server::new(TestBackend, tls_config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = server.clone();
    let handle = tokio::spawn(async move {
        srv.serve_listener(listener).await.unwrap();
    });
    (server, addr, handle)
}

#[tokio::test]
async fn bind_success_and_failure() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    client.bind("cn=test", b"verysecure").await.unwrap();

    let err = client.bind("cn=test", b"wrong").await.unwrap_err();
    match err {
        Error::Result { code, .. } => assert_eq!(code.0, 49),
        other => panic!("expected typed result error, got {:?}", other),
    }
    client.close().await;
}

#[tokio::test]
async fn search_streams_entries_until_done() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let req = SearchRequest {
        base_dn: "dc=example,dc=com".into(),
        filter: ldap_engine::filter::parse("(cn=*)").unwrap(),
        ..Default::default()
    };
    let entries = client.search(&req).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].dn, "cn=admin,dc=example,dc=com");
    assert_eq!(entries[1].dn, "cn=guest,dc=example,dc=com");
    assert_eq!(entries[0].attributes["cn"], vec![b"admin".to_vec()]);
    client.close().await;
}

#[tokio::test]
async fn empty_search_surfaces_no_such_object() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let req = SearchRequest {
        base_dn: "dc=missing".into(),
        ..Default::default()
    };
    let err = client.search(&req).await.unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::NO_SUCH_OBJECT));
    client.close().await;
}

#[tokio::test]
async fn root_dse_search() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let req = SearchRequest {
        base_dn: String::new(),
        scope: Scope::BaseObject,
        attributes: ["+".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let entries = client.search(&req).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.dn, "");
    assert_eq!(entry.attributes["supportedLDAPVersion"], vec![b"3".to_vec()]);
    assert!(entry.attributes["supportedFeatures"]
        .iter()
        .any(|v| v == b"1.3.6.1.1.14"));
    client.close().await;
}

#[tokio::test]
async fn root_dse_without_attributes_returns_object_class() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let req = SearchRequest {
        base_dn: String::new(),
        scope: Scope::BaseObject,
        ..Default::default()
    };
    let entries = client.search(&req).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attributes["objectClass"], vec![b"top".to_vec()]);
    client.close().await;
}

#[tokio::test]
async fn write_operations_roundtrip() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    client
        .modify(
            "cn=test",
            vec![Mod {
                op: ModOp::Replace,
                name: "mail".into(),
                values: vec![b"new@example.com".to_vec()],
            }],
        )
        .await
        .unwrap();

    let mut attributes = HashMap::new();
    attributes.insert("objectClass".to_string(), vec![b"person".to_vec()]);
    client
        .add(&AddRequest {
            dn: "cn=new,dc=example,dc=com".into(),
            attributes,
        })
        .await
        .unwrap();

    client.delete("cn=old").await.unwrap();
    let err = client.delete("cn=protected").await.unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::UNWILLING_TO_PERFORM));

    client
        .modify_dn(&ModifyDnRequest {
            dn: "cn=new,dc=example,dc=com".into(),
            new_rdn: "cn=renamed".into(),
            delete_old_rdn: true,
            new_superior: None,
        })
        .await
        .unwrap();
    client.close().await;
}

#[tokio::test]
async fn compare_maps_result_codes() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    assert!(client.compare("cn=test", "cn", b"match").await.unwrap());
    assert!(!client.compare("cn=test", "cn", b"other").await.unwrap());
    client.close().await;
}

#[tokio::test]
async fn whoami_reflects_bind_state() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    // Anonymous before binding: the backend returns an empty authzId.
    assert_eq!(client.whoami().await.unwrap(), "anonymous");
    client.bind("cn=test", b"verysecure").await.unwrap();
    assert_eq!(client.whoami().await.unwrap(), "dn:cn=test");
    client.close().await;
}

#[tokio::test]
async fn password_modify_returns_generated_password() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let generated = client
        .password_modify(Some("cn=test"), Some(b"verysecure"), None)
        .await
        .unwrap();
    assert_eq!(generated, Some(b"generated".to_vec()));
    client.close().await;
}

#[tokio::test]
async fn unknown_extension_passes_through_to_backend() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let res = client.extended("1.2.3.4.5", None).await.unwrap();
    assert_eq!(res.result.code, ResultCode::UNWILLING_TO_PERFORM);
    assert_eq!(res.name.as_deref(), Some("1.2.3.4.5"));
    client.close().await;
}

/// An unknown application tag gets exactly one UnwillingToPerform reply and
/// the connection is closed.
#[tokio::test]
async fn unknown_tag_replies_unwilling_and_closes() {
    let (_server, addr, _handle) = start_server(false).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let op = Packet::constructed(ldap_engine::BerClass::Application, 20);
    proto::envelope(1, op).write(&mut stream).await.unwrap();

    let reply = Packet::read(&mut stream).await.unwrap();
    let (msg_id, _) = proto::open_envelope(&reply).unwrap();
    assert_eq!(msg_id, 1);
    let res = LdapResult::parse(&reply.items[1]).unwrap();
    assert_eq!(res.code, ResultCode::UNWILLING_TO_PERFORM);

    // Exactly one reply, then EOF.
    assert!(Packet::read(&mut stream).await.is_err());
}

/// Abandon never gets a response; the next reply on the wire belongs to
/// the following request.
#[tokio::test]
async fn abandon_gets_no_reply() {
    let (_server, addr, _handle) = start_server(false).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    proto::envelope(7, ldap_engine::messages::abandon_packet(3))
        .write(&mut stream)
        .await
        .unwrap();
    let bind = BindRequest {
        dn: "cn=test".into(),
        password: b"verysecure".to_vec(),
    };
    proto::envelope(8, bind.to_packet()).write(&mut stream).await.unwrap();

    let reply = Packet::read(&mut stream).await.unwrap();
    let (msg_id, _) = proto::open_envelope(&reply).unwrap();
    assert_eq!(msg_id, 8, "the only reply belongs to the bind");
    let res = LdapResult::parse(&reply.items[1]).unwrap();
    assert_eq!(res.code, ResultCode::SUCCESS);
}

/// A protocol error (bind with version 2) earns an error reply but keeps
/// the connection open for the next request.
#[tokio::test]
async fn protocol_error_keeps_connection() {
    let (_server, addr, _handle) = start_server(false).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bad_bind = Packet::constructed(ldap_engine::BerClass::Application, 0)
        .with(Packet::integer(2))
        .with(Packet::octet_str("cn=test"))
        .with(Packet::context_bytes(0, b"verysecure".to_vec()));
    proto::envelope(1, bad_bind).write(&mut stream).await.unwrap();

    let reply = Packet::read(&mut stream).await.unwrap();
    let res = LdapResult::parse(&reply.items[1]).unwrap();
    assert_eq!(res.code, ResultCode::PROTOCOL_ERROR);

    let good_bind = BindRequest {
        dn: "cn=test".into(),
        password: b"verysecure".to_vec(),
    };
    proto::envelope(2, good_bind.to_packet())
        .write(&mut stream)
        .await
        .unwrap();
    let reply = Packet::read(&mut stream).await.unwrap();
    let (msg_id, _) = proto::open_envelope(&reply).unwrap();
    assert_eq!(msg_id, 2);
    let res = LdapResult::parse(&reply.items[1]).unwrap();
    assert_eq!(res.code, ResultCode::SUCCESS);
}

#[tokio::test]
async fn ldaps_end_to_end() {
    let tls_config = tls::server_config_from_files(CERT, KEY).unwrap();
    let server = Server::new(TestBackend, Some(tls_config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = server.clone();
    tokio::spawn(async move {
        srv.serve_listener_tls(listener).await.unwrap();
    });

    let client = Client::dial_tls(
        &addr.to_string(),
        tls::danger::insecure_client_config(),
        "localhost",
    )
    .await
    .unwrap();
    client.bind("cn=test", b"verysecure").await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn start_tls_upgrade_then_bind() {
    let (_server, addr, _handle) = start_server(true).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    client
        .start_tls(tls::danger::insecure_client_config(), "localhost")
        .await
        .unwrap();

    // The mux resumed on the TLS stream: requests traverse it.
    client.bind("cn=test", b"verysecure").await.unwrap();
    assert_eq!(client.whoami().await.unwrap(), "dn:cn=test");

    // A second upgrade must be refused locally.
    match client
        .start_tls(tls::danger::insecure_client_config(), "localhost")
        .await
    {
        Err(Error::AlreadyTls) => {}
        other => panic!("expected AlreadyTls, got {:?}", other),
    }
    client.close().await;
}

#[tokio::test]
async fn start_tls_unavailable_without_server_config() {
    let (_server, addr, _handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();

    let err = client
        .start_tls(tls::danger::insecure_client_config(), "localhost")
        .await
        .unwrap_err();
    assert_eq!(err.result_code(), Some(ResultCode::UNAVAILABLE));

    // The refusal resumed the loops on the cleartext stream.
    client.bind("cn=test", b"verysecure").await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn shutdown_closes_listener_and_drains_connections() {
    let (server, addr, handle) = start_server(false).await;
    let client = Client::dial(&addr.to_string()).await.unwrap();
    client.bind("cn=test", b"verysecure").await.unwrap();

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown must drain promptly");
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("accept loop must stop")
        .unwrap();

    // The draining server closed the open connection.
    match timeout(Duration::from_secs(5), client.bind("cn=test", b"verysecure")).await {
        Ok(Err(_)) => {}
        other => panic!("expected the closed connection to error, got {:?}", other),
    }

    // And nothing is listening any more.
    assert!(TcpStream::connect(addr).await.is_err());
    client.close().await;
}
