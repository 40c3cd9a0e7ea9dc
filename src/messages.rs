//! Typed request/response values for the nine standard operations plus the
//! Password Modify extended operation, and their BER codecs.
//!
//! Every parser maps a structural mismatch to [`Error::Protocol`]; every
//! encoder produces a tree the matching parser maps back to the same value.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::ber::{BerClass, BerValue, Packet};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::proto::{
    LdapResult, APP_ABANDON_REQUEST, APP_ADD_REQUEST, APP_BIND_REQUEST, APP_COMPARE_REQUEST,
    APP_DEL_REQUEST, APP_EXTENDED_REQUEST, APP_EXTENDED_RESPONSE, APP_MODIFY_DN_REQUEST,
    APP_MODIFY_REQUEST, APP_SEARCH_REQUEST, APP_SEARCH_RESULT_DONE, APP_SEARCH_RESULT_ENTRY,
    PROTOCOL_VERSION,
};

/// Search scope. `Children` is sent by ldapsearch (`-s children`) but is not
/// part of RFC 4511.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
    Children = 3,
}

impl TryFrom<i64> for Scope {
    type Error = Error;

    fn try_from(v: i64) -> Result<Scope> {
        match v {
            0 => Ok(Scope::BaseObject),
            1 => Ok(Scope::SingleLevel),
            2 => Ok(Scope::WholeSubtree),
            3 => Ok(Scope::Children),
            _ => Err(Error::protocol(format!("invalid search scope {}", v))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefAliases {
    Never = 0,
    InSearching = 1,
    FindingBaseObj = 2,
    Always = 3,
}

impl TryFrom<i64> for DerefAliases {
    type Error = Error;

    fn try_from(v: i64) -> Result<DerefAliases> {
        match v {
            0 => Ok(DerefAliases::Never),
            1 => Ok(DerefAliases::InSearching),
            2 => Ok(DerefAliases::FindingBaseObj),
            3 => Ok(DerefAliases::Always),
            _ => Err(Error::protocol(format!("invalid derefAliases {}", v))),
        }
    }
}

/// Simple bind. SASL mechanisms are out of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub dn: String,
    pub password: Vec<u8>,
}

impl BindRequest {
    pub fn to_packet(&self) -> Packet {
        Packet::constructed(BerClass::Application, APP_BIND_REQUEST)
            .with(Packet::integer(PROTOCOL_VERSION))
            .with(Packet::octet_str(self.dn.clone()))
            .with(Packet::context_bytes(0, self.password.clone()))
    }

    pub fn parse(pkt: &Packet) -> Result<BindRequest> {
        if pkt.items.len() != 3 {
            return Err(Error::protocol("bind request should have 3 values"));
        }
        match pkt.items[0].as_i64() {
            Some(PROTOCOL_VERSION) => {}
            _ => return Err(Error::protocol("unsupported or invalid version")),
        }
        let dn = pkt.items[1]
            .as_str()
            .ok_or_else(|| Error::protocol("can't parse dn for bind request"))?
            .to_string();
        let password = pkt.items[2]
            .as_bytes()
            .ok_or_else(|| Error::protocol("can't parse simple password for bind request"))?
            .to_vec();
        Ok(BindRequest { dn, password })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: Scope,
    pub deref_aliases: DerefAliases,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    pub filter: Filter,
    /// Requested attributes as sent. Empty means "all user attributes";
    /// the pseudo-attribute `+` requests operational attributes.
    pub attributes: HashSet<String>,
}

impl Default for SearchRequest {
    fn default() -> SearchRequest {
        SearchRequest {
            base_dn: String::new(),
            scope: Scope::WholeSubtree,
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::Present {
                attribute: "objectClass".to_string(),
            },
            attributes: HashSet::new(),
        }
    }
}

impl SearchRequest {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_SEARCH_REQUEST);
        pkt.add(Packet::octet_str(self.base_dn.clone()));
        pkt.add(Packet::enumerated(self.scope as i64));
        pkt.add(Packet::enumerated(self.deref_aliases as i64));
        pkt.add(Packet::integer(self.size_limit));
        pkt.add(Packet::integer(self.time_limit));
        pkt.add(Packet::boolean(self.types_only));
        pkt.add(self.filter.to_packet());
        let attrs = pkt.add(Packet::sequence());
        for a in &self.attributes {
            attrs.add(Packet::octet_str(a.clone()));
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<SearchRequest> {
        if pkt.items.len() != 8 {
            return Err(Error::protocol("search request should have 8 items"));
        }
        let base_dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("can't parse baseObject for search request"))?
            .to_string();
        let scope = pkt.items[1]
            .as_i64()
            .ok_or_else(|| Error::protocol("can't parse scope for search request"))?
            .try_into()?;
        let deref_aliases = pkt.items[2]
            .as_i64()
            .ok_or_else(|| Error::protocol("can't parse derefAliases for search request"))?
            .try_into()?;
        let size_limit = pkt.items[3]
            .as_i64()
            .ok_or_else(|| Error::protocol("can't parse sizeLimit for search request"))?;
        let time_limit = pkt.items[4]
            .as_i64()
            .ok_or_else(|| Error::protocol("can't parse timeLimit for search request"))?;
        let types_only = pkt.items[5]
            .as_bool()
            .ok_or_else(|| Error::protocol("can't parse typesOnly for search request"))?;
        let filter = Filter::from_packet(&pkt.items[6])?;
        let mut attributes = HashSet::new();
        for it in &pkt.items[7].items {
            let a = it
                .as_str()
                .ok_or_else(|| Error::protocol("can't parse attribute list for search request"))?;
            attributes.insert(a.to_string());
        }
        Ok(SearchRequest {
            base_dn,
            scope,
            deref_aliases,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
        })
    }
}

/// One directory entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub dn: String,
    pub attributes: HashMap<String, Vec<Vec<u8>>>,
}

pub fn is_printable(v: &[u8]) -> bool {
    match std::str::from_utf8(v) {
        Ok(s) => s.chars().all(|c| c as u32 >= 32),
        Err(_) => false,
    }
}

impl SearchResult {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_SEARCH_RESULT_ENTRY);
        pkt.add(Packet::octet_str(self.dn.clone()));
        let attrs = pkt.add(Packet::sequence());
        for (name, vals) in &self.attributes {
            let attr = attrs.add(Packet::sequence());
            attr.add(Packet::octet_str(name.clone()));
            let set = attr.add(Packet::set());
            for v in vals {
                set.add(Packet::octet_string(v.clone()));
            }
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<SearchResult> {
        if pkt.items.len() != 2 {
            return Err(Error::protocol("search result entry should have 2 items"));
        }
        let dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("failed to parse dn for search result entry"))?
            .to_string();
        let mut attributes = HashMap::new();
        for attr in &pkt.items[1].items {
            if attr.items.len() != 2 {
                return Err(Error::protocol("search result attribute should have 2 items"));
            }
            let name = attr.items[0]
                .as_str()
                .ok_or_else(|| Error::protocol("failed to parse attribute name in entry"))?
                .to_string();
            let mut values = Vec::with_capacity(attr.items[1].items.len());
            for v in &attr.items[1].items {
                values.push(
                    v.as_bytes()
                        .ok_or_else(|| Error::protocol("failed to parse attribute value in entry"))?
                        .to_vec(),
                );
            }
            attributes.entry(name).or_insert_with(Vec::new).extend(values);
        }
        Ok(SearchResult { dn, attributes })
    }

    /// Render the entry as LDIF, base64-encoding values that are not
    /// printable.
    pub fn to_ldif(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "dn: {}", self.dn);
        for (name, values) in &self.attributes {
            for v in values {
                if is_printable(v) {
                    let _ = writeln!(out, "{}: {}", name, String::from_utf8_lossy(v));
                } else {
                    let _ = writeln!(out, "{}:: {}", name, BASE64.encode(v));
                }
            }
        }
        out
    }
}

/// Server-side aggregate: entries followed by one done message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    pub result: LdapResult,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    /// Application-tagged packets to send, in order. An empty successful
    /// response degrades to NoSuchObject on the done message.
    pub fn to_packets(&self) -> Vec<Packet> {
        let mut out: Vec<Packet> = self.results.iter().map(SearchResult::to_packet).collect();
        let mut done = self.result.clone();
        if self.results.is_empty() && done.code == crate::proto::ResultCode::SUCCESS {
            done.code = crate::proto::ResultCode::NO_SUCH_OBJECT;
        }
        out.push(done.to_packet(APP_SEARCH_RESULT_DONE));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add = 0,
    Delete = 1,
    Replace = 2,
    /// RFC 4525 increment.
    Increment = 3,
}

impl TryFrom<i64> for ModOp {
    type Error = Error;

    fn try_from(v: i64) -> Result<ModOp> {
        match v {
            0 => Ok(ModOp::Add),
            1 => Ok(ModOp::Delete),
            2 => Ok(ModOp::Replace),
            3 => Ok(ModOp::Increment),
            _ => Err(Error::protocol(format!("unknown mod op {}", v))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub op: ModOp,
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub mods: Vec<Mod>,
}

impl ModifyRequest {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_MODIFY_REQUEST);
        pkt.add(Packet::octet_str(self.dn.clone()));
        let changes = pkt.add(Packet::sequence());
        for m in &self.mods {
            let change = changes.add(Packet::sequence());
            change.add(Packet::enumerated(m.op as i64));
            let attr = change.add(Packet::sequence());
            attr.add(Packet::octet_str(m.name.clone()));
            let vals = attr.add(Packet::set());
            for v in &m.values {
                vals.add(Packet::octet_string(v.clone()));
            }
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<ModifyRequest> {
        if pkt.items.len() != 2 {
            return Err(Error::protocol("modify request requires exactly 2 items"));
        }
        let dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid dn in modify request"))?
            .to_string();
        let mut mods = Vec::new();
        for change in &pkt.items[1].items {
            if change.items.len() != 2 || change.items[1].items.len() != 2 {
                return Err(Error::protocol("mod operation requires 2 items"));
            }
            let op = change.items[0]
                .as_i64()
                .ok_or_else(|| Error::protocol("invalid mod op"))?
                .try_into()?;
            let name = change.items[1].items[0]
                .as_str()
                .ok_or_else(|| Error::protocol("invalid attribute name in modify request"))?
                .to_string();
            let mut values = Vec::with_capacity(change.items[1].items[1].items.len());
            for v in &change.items[1].items[1].items {
                values.push(
                    v.as_bytes()
                        .ok_or_else(|| Error::protocol("invalid attribute value in modify request"))?
                        .to_vec(),
                );
            }
            mods.push(Mod { op, name, values });
        }
        Ok(ModifyRequest { dn, mods })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl AddRequest {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_ADD_REQUEST);
        pkt.add(Packet::octet_str(self.dn.clone()));
        let attrs = pkt.add(Packet::sequence());
        for (name, vals) in &self.attributes {
            let attr = attrs.add(Packet::sequence());
            attr.add(Packet::octet_str(name.clone()));
            let set = attr.add(Packet::set());
            for v in vals {
                set.add(Packet::octet_string(v.clone()));
            }
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<AddRequest> {
        if pkt.items.len() != 2 {
            return Err(Error::protocol("add request requires 2 items"));
        }
        let dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid dn in add request"))?
            .to_string();
        let mut attributes = HashMap::new();
        for attr in &pkt.items[1].items {
            if attr.items.len() != 2 {
                return Err(Error::protocol("invalid attribute in add request"));
            }
            let name = attr.items[0]
                .as_str()
                .ok_or_else(|| Error::protocol("invalid attribute name in add request"))?
                .to_string();
            let mut values = Vec::with_capacity(attr.items[1].items.len());
            for v in &attr.items[1].items {
                values.push(
                    v.as_bytes()
                        .ok_or_else(|| Error::protocol("invalid attribute value in add request"))?
                        .to_vec(),
                );
            }
            attributes.insert(name, values);
        }
        Ok(AddRequest { dn, attributes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub dn: String,
}

impl DeleteRequest {
    pub fn to_packet(&self) -> Packet {
        // DelRequest is the DN itself, application-tagged and primitive.
        Packet::primitive(
            BerClass::Application,
            APP_DEL_REQUEST,
            BerValue::Str(self.dn.clone()),
        )
    }

    pub fn parse(pkt: &Packet) -> Result<DeleteRequest> {
        let dn = pkt
            .as_str()
            .ok_or_else(|| Error::protocol("invalid dn in delete request"))?
            .to_string();
        Ok(DeleteRequest { dn })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

impl ModifyDnRequest {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_MODIFY_DN_REQUEST);
        pkt.add(Packet::octet_str(self.dn.clone()));
        pkt.add(Packet::octet_str(self.new_rdn.clone()));
        pkt.add(Packet::boolean(self.delete_old_rdn));
        if let Some(sup) = &self.new_superior {
            pkt.add(Packet::context_str(0, sup.clone()));
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<ModifyDnRequest> {
        if pkt.items.len() < 3 || pkt.items.len() > 4 {
            return Err(Error::protocol("wrong number of items in modify dn request"));
        }
        let dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid dn in modify dn request"))?
            .to_string();
        let new_rdn = pkt.items[1]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid newrdn in modify dn request"))?
            .to_string();
        let delete_old_rdn = pkt.items[2]
            .as_bool()
            .ok_or_else(|| Error::protocol("invalid deleteoldrdn in modify dn request"))?;
        let new_superior = match pkt.items.get(3) {
            Some(it) => Some(
                it.as_str()
                    .ok_or_else(|| Error::protocol("invalid newSuperior in modify dn request"))?
                    .to_string(),
            ),
            None => None,
        };
        Ok(ModifyDnRequest {
            dn,
            new_rdn,
            delete_old_rdn,
            new_superior,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub value: Vec<u8>,
}

impl CompareRequest {
    pub fn to_packet(&self) -> Packet {
        let ava = Packet::sequence()
            .with(Packet::octet_str(self.attribute.clone()))
            .with(Packet::octet_string(self.value.clone()));
        Packet::constructed(BerClass::Application, APP_COMPARE_REQUEST)
            .with(Packet::octet_str(self.dn.clone()))
            .with(ava)
    }

    pub fn parse(pkt: &Packet) -> Result<CompareRequest> {
        if pkt.items.len() != 2 || pkt.items[1].items.len() != 2 {
            return Err(Error::protocol("compare request requires entry and ava"));
        }
        let dn = pkt.items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid dn in compare request"))?
            .to_string();
        let attribute = pkt.items[1].items[0]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid attribute in compare request"))?
            .to_string();
        let value = pkt.items[1].items[1]
            .as_bytes()
            .ok_or_else(|| Error::protocol("invalid assertion value in compare request"))?
            .to_vec();
        Ok(CompareRequest {
            dn,
            attribute,
            value,
        })
    }
}

/// AbandonRequest carries only the message ID to abandon. No response is
/// ever sent for it.
pub fn abandon_packet(msg_id: i64) -> Packet {
    Packet::primitive(
        BerClass::Application,
        APP_ABANDON_REQUEST,
        BerValue::Int(msg_id),
    )
}

/// The message ID arrives as the raw content octets of the implicitly
/// tagged application packet.
pub fn parse_abandon(pkt: &Packet) -> Result<i64> {
    match &pkt.value {
        Some(BerValue::Int(v)) => Ok(*v),
        Some(BerValue::Bytes(b)) => crate::ber::decode_integer(b)
            .map_err(|_| Error::protocol("invalid message id in abandon request")),
        _ => Err(Error::protocol("invalid message id in abandon request")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub name: String,
    pub value: Option<Vec<u8>>,
}

impl ExtendedRequest {
    pub fn new(name: impl Into<String>) -> ExtendedRequest {
        ExtendedRequest {
            name: name.into(),
            value: None,
        }
    }

    pub fn to_packet(&self) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, APP_EXTENDED_REQUEST);
        pkt.add(Packet::context_str(0, self.name.clone()));
        if let Some(v) = &self.value {
            pkt.add(Packet::context_bytes(1, v.clone()));
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<ExtendedRequest> {
        if pkt.items.len() > 2 {
            return Err(Error::protocol("too many tags for extended request"));
        }
        let mut name = None;
        let mut value = None;
        for it in &pkt.items {
            match it.tag {
                0 => {
                    name = Some(
                        it.as_str()
                            .ok_or_else(|| Error::protocol("invalid extended request oid"))?
                            .to_string(),
                    )
                }
                1 => {
                    value = Some(
                        it.as_bytes()
                            .ok_or_else(|| Error::protocol("invalid extended request value"))?
                            .to_vec(),
                    )
                }
                _ => return Err(Error::protocol("unsupported extended request tag")),
            }
        }
        Ok(ExtendedRequest {
            name: name.ok_or_else(|| Error::protocol("extended request without oid"))?,
            value,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ExtendedResponse {
    pub fn to_packet(&self) -> Packet {
        let mut pkt = self.result.to_packet(APP_EXTENDED_RESPONSE);
        if let Some(name) = &self.name {
            pkt.add(Packet::context_str(10, name.clone()));
        }
        if let Some(value) = &self.value {
            pkt.add(Packet::context_bytes(11, value.clone()));
        }
        pkt
    }

    pub fn parse(pkt: &Packet) -> Result<ExtendedResponse> {
        let result = LdapResult::parse(pkt)?;
        let mut name = None;
        let mut value = None;
        for it in pkt.items.iter().skip(3) {
            match it.tag {
                // Referral, already folded into `result`.
                3 => {}
                10 => {
                    name = Some(
                        it.as_str()
                            .ok_or_else(|| Error::protocol("invalid extended response oid"))?
                            .to_string(),
                    )
                }
                11 => {
                    value = Some(
                        it.as_bytes()
                            .ok_or_else(|| Error::protocol("invalid extended response value"))?
                            .to_vec(),
                    )
                }
                _ => return Err(Error::protocol("unsupported extended response tag")),
            }
        }
        Ok(ExtendedResponse {
            result,
            name,
            value,
        })
    }
}

/// Password Modify (RFC 3062) request value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub old_password: Option<Vec<u8>>,
    pub new_password: Option<Vec<u8>>,
}

impl PasswordModifyRequest {
    /// The request value carried inside the ExtendedRequest.
    pub fn to_value(&self) -> Result<Vec<u8>> {
        let mut seq = Packet::sequence();
        if let Some(u) = &self.user_identity {
            seq.add(Packet::context_str(0, u.clone()));
        }
        if let Some(p) = &self.old_password {
            seq.add(Packet::context_bytes(1, p.clone()));
        }
        if let Some(p) = &self.new_password {
            seq.add(Packet::context_bytes(2, p.clone()));
        }
        Ok(seq.encode()?)
    }

    pub fn parse(pkt: &Packet) -> Result<PasswordModifyRequest> {
        let mut req = PasswordModifyRequest::default();
        for it in &pkt.items {
            match it.tag {
                0 => {
                    req.user_identity = Some(
                        it.as_str()
                            .ok_or_else(|| Error::protocol("invalid user identity tag"))?
                            .to_string(),
                    )
                }
                1 => {
                    req.old_password = Some(
                        it.as_bytes()
                            .ok_or_else(|| Error::protocol("invalid old password tag"))?
                            .to_vec(),
                    )
                }
                2 => {
                    req.new_password = Some(
                        it.as_bytes()
                            .ok_or_else(|| Error::protocol("invalid new password tag"))?
                            .to_vec(),
                    )
                }
                _ => return Err(Error::protocol("unknown tag in password modify request")),
            }
        }
        Ok(req)
    }
}

/// Password Modify response value: an optional generated password.
pub fn password_modify_response_value(gen_password: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut seq = Packet::sequence();
    if let Some(gen) = gen_password {
        seq.add(Packet::context_bytes(0, gen.to_vec()));
    }
    Ok(seq.encode()?)
}

pub fn parse_password_modify_response_value(value: &[u8]) -> Result<Option<Vec<u8>>> {
    let (pkt, _) = Packet::parse(value)?;
    for it in &pkt.items {
        if it.tag == 0 {
            return Ok(Some(
                it.as_bytes()
                    .ok_or_else(|| Error::protocol("invalid generated password tag"))?
                    .to_vec(),
            ));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ResultCode;

    /// Encode to wire bytes and parse back, exercising the real codec path.
    fn rewire(pkt: &Packet) -> Packet {
        let buf = pkt.encode().unwrap();
        let (parsed, n) = Packet::parse(&buf).unwrap();
        assert_eq!(n, buf.len());
        parsed
    }

    #[test]
    fn bind_request_roundtrip() {
        let req = BindRequest {
            dn: "cn=admin,dc=example,dc=com".into(),
            password: b"verysecure".to_vec(),
        };
        assert_eq!(BindRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
    }

    #[test]
    fn bind_request_rejects_wrong_version() {
        let pkt = Packet::constructed(BerClass::Application, APP_BIND_REQUEST)
            .with(Packet::integer(2))
            .with(Packet::octet_str("cn=x"))
            .with(Packet::context_bytes(0, b"pw".to_vec()));
        match BindRequest::parse(&rewire(&pkt)) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("version")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn bind_request_rejects_wrong_shape() {
        let pkt = Packet::constructed(BerClass::Application, APP_BIND_REQUEST)
            .with(Packet::integer(3));
        assert!(BindRequest::parse(&pkt).is_err());
    }

    #[test]
    fn search_request_roundtrip() {
        let req = SearchRequest {
            base_dn: "dc=example,dc=com".into(),
            scope: Scope::SingleLevel,
            deref_aliases: DerefAliases::Always,
            size_limit: 10,
            time_limit: 30,
            types_only: true,
            filter: crate::filter::parse("(&(cn=admin)(uid=1))").unwrap(),
            attributes: ["cn".to_string(), "uid".to_string()].into_iter().collect(),
        };
        assert_eq!(SearchRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
    }

    #[test]
    fn search_request_rejects_bad_scope() {
        let mut req = SearchRequest::default();
        req.base_dn = "dc=x".into();
        let mut pkt = req.to_packet();
        pkt.items[1] = Packet::enumerated(9);
        assert!(SearchRequest::parse(&rewire(&pkt)).is_err());
    }

    #[test]
    fn search_result_roundtrip() {
        let mut attributes = HashMap::new();
        attributes.insert("cn".to_string(), vec![b"admin".to_vec()]);
        attributes.insert(
            "objectClass".to_string(),
            vec![b"person".to_vec(), b"top".to_vec()],
        );
        let entry = SearchResult {
            dn: "cn=admin,dc=example,dc=com".into(),
            attributes,
        };
        assert_eq!(SearchResult::parse(&rewire(&entry.to_packet())).unwrap(), entry);
    }

    #[test]
    fn search_response_empty_success_becomes_no_such_object() {
        let resp = SearchResponse::default();
        let pkts = resp.to_packets();
        assert_eq!(pkts.len(), 1);
        let done = LdapResult::parse(&rewire(&pkts[0])).unwrap();
        assert_eq!(done.code, ResultCode::NO_SUCH_OBJECT);
    }

    #[test]
    fn search_response_orders_entries_before_done() {
        let resp = SearchResponse {
            result: LdapResult::default(),
            results: vec![SearchResult {
                dn: "cn=a".into(),
                attributes: HashMap::new(),
            }],
        };
        let pkts = resp.to_packets();
        assert_eq!(pkts.len(), 2);
        assert_eq!(pkts[0].tag, APP_SEARCH_RESULT_ENTRY);
        assert_eq!(pkts[1].tag, APP_SEARCH_RESULT_DONE);
        let done = LdapResult::parse(&pkts[1]).unwrap();
        assert_eq!(done.code, ResultCode::SUCCESS);
    }

    #[test]
    fn modify_request_roundtrip() {
        let req = ModifyRequest {
            dn: "cn=test,dc=example,dc=com".into(),
            mods: vec![
                Mod {
                    op: ModOp::Replace,
                    name: "mail".into(),
                    values: vec![b"new@example.com".to_vec()],
                },
                Mod {
                    op: ModOp::Delete,
                    name: "description".into(),
                    values: vec![],
                },
                Mod {
                    op: ModOp::Increment,
                    name: "uidNumber".into(),
                    values: vec![b"1".to_vec()],
                },
            ],
        };
        assert_eq!(ModifyRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
    }

    #[test]
    fn add_request_roundtrip() {
        let mut attributes = HashMap::new();
        attributes.insert("objectClass".to_string(), vec![b"person".to_vec()]);
        attributes.insert("cn".to_string(), vec![b"test".to_vec()]);
        let req = AddRequest {
            dn: "cn=test,dc=example,dc=com".into(),
            attributes,
        };
        assert_eq!(AddRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
    }

    #[test]
    fn delete_request_roundtrip() {
        let req = DeleteRequest { dn: "cn=gone".into() };
        let pkt = rewire(&req.to_packet());
        assert!(pkt.primitive);
        assert_eq!(DeleteRequest::parse(&pkt).unwrap(), req);
    }

    #[test]
    fn modify_dn_request_roundtrip() {
        for new_superior in [None, Some("ou=people,dc=example,dc=com".to_string())] {
            let req = ModifyDnRequest {
                dn: "cn=old,dc=example,dc=com".into(),
                new_rdn: "cn=new".into(),
                delete_old_rdn: true,
                new_superior,
            };
            assert_eq!(ModifyDnRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
        }
    }

    #[test]
    fn compare_request_roundtrip() {
        let req = CompareRequest {
            dn: "cn=test".into(),
            attribute: "mail".into(),
            value: b"x@example.com".to_vec(),
        };
        assert_eq!(CompareRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
    }

    #[test]
    fn abandon_roundtrip() {
        assert_eq!(parse_abandon(&rewire(&abandon_packet(42))).unwrap(), 42);
    }

    #[test]
    fn extended_request_roundtrip() {
        for value in [None, Some(b"payload".to_vec())] {
            let req = ExtendedRequest {
                name: crate::proto::OID_WHO_AM_I.into(),
                value,
            };
            assert_eq!(ExtendedRequest::parse(&rewire(&req.to_packet())).unwrap(), req);
        }
    }

    #[test]
    fn extended_response_roundtrip() {
        let resp = ExtendedResponse {
            result: LdapResult::new(ResultCode::SUCCESS, ""),
            name: Some(crate::proto::OID_START_TLS.into()),
            value: Some(b"dn:cn=test".to_vec()),
        };
        assert_eq!(ExtendedResponse::parse(&rewire(&resp.to_packet())).unwrap(), resp);
    }

    #[test]
    fn password_modify_value_roundtrip() {
        let req = PasswordModifyRequest {
            user_identity: Some("cn=me".into()),
            old_password: Some(b"old".to_vec()),
            new_password: Some(b"new".to_vec()),
        };
        let value = req.to_value().unwrap();
        let (pkt, _) = Packet::parse(&value).unwrap();
        assert_eq!(PasswordModifyRequest::parse(&pkt).unwrap(), req);
    }

    #[test]
    fn password_modify_response_value_roundtrip() {
        let value = password_modify_response_value(Some(b"genpass")).unwrap();
        assert_eq!(
            parse_password_modify_response_value(&value).unwrap(),
            Some(b"genpass".to_vec())
        );
        let empty = password_modify_response_value(None).unwrap();
        assert_eq!(parse_password_modify_response_value(&empty).unwrap(), None);
    }

    #[test]
    fn ldif_rendering() {
        let mut attributes = HashMap::new();
        attributes.insert("cn".to_string(), vec![b"admin".to_vec()]);
        attributes.insert("photo".to_string(), vec![vec![0x00, 0x01]]);
        let entry = SearchResult {
            dn: "cn=admin".into(),
            attributes,
        };
        let ldif = entry.to_ldif();
        assert!(ldif.starts_with("dn: cn=admin\n"));
        assert!(ldif.contains("cn: admin\n"));
        assert!(ldif.contains("photo:: AAE=\n"));
    }

    #[test]
    fn is_printable_rules() {
        assert!(is_printable(b"hello"));
        assert!(is_printable("привет".as_bytes()));
        assert!(!is_printable(b"\x01"));
        assert!(!is_printable(&[0xff, 0xfe]));
    }
}
