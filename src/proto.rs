//! LDAPv3 protocol registry: application tags, extension OIDs, result codes,
//! the shared LDAPResult shape and the LDAPMessage envelope.
//!
//! Registry reference: <http://www.iana.org/assignments/ldap-parameters>

use std::collections::HashMap;
use std::fmt;

use crate::ber::{BerClass, Packet, TAG_INTEGER, TAG_SEQUENCE};
use crate::error::{Error, Result};

pub const PROTOCOL_VERSION: i64 = 3;

// Extensions
pub const OID_CANCEL: &str = "1.3.6.1.1.8"; // RFC 3909
pub const OID_START_TLS: &str = "1.3.6.1.4.1.1466.20037"; // RFC 4511 / RFC 4513
pub const OID_PASSWORD_MODIFY: &str = "1.3.6.1.4.1.4203.1.11.1"; // RFC 3062
pub const OID_WHO_AM_I: &str = "1.3.6.1.4.1.4203.1.11.3"; // RFC 4532

// Features
pub const OID_MODIFY_INCREMENT: &str = "1.3.6.1.1.14"; // RFC 4525
pub const OID_ALL_OPERATIONAL_ATTRIBUTES: &str = "1.3.6.1.4.1.4203.1.5.1"; // RFC 3673

/// Application tags of RFC 4511 §4.
pub const APP_BIND_REQUEST: u32 = 0;
pub const APP_BIND_RESPONSE: u32 = 1;
pub const APP_UNBIND_REQUEST: u32 = 2;
pub const APP_SEARCH_REQUEST: u32 = 3;
pub const APP_SEARCH_RESULT_ENTRY: u32 = 4;
pub const APP_SEARCH_RESULT_DONE: u32 = 5;
pub const APP_MODIFY_REQUEST: u32 = 6;
pub const APP_MODIFY_RESPONSE: u32 = 7;
pub const APP_ADD_REQUEST: u32 = 8;
pub const APP_ADD_RESPONSE: u32 = 9;
pub const APP_DEL_REQUEST: u32 = 10;
pub const APP_DEL_RESPONSE: u32 = 11;
pub const APP_MODIFY_DN_REQUEST: u32 = 12;
pub const APP_MODIFY_DN_RESPONSE: u32 = 13;
pub const APP_COMPARE_REQUEST: u32 = 14;
pub const APP_COMPARE_RESPONSE: u32 = 15;
pub const APP_ABANDON_REQUEST: u32 = 16;
pub const APP_SEARCH_RESULT_REFERENCE: u32 = 19;
pub const APP_EXTENDED_REQUEST: u32 = 23;
pub const APP_EXTENDED_RESPONSE: u32 = 24;

pub fn application_tag_name(tag: u32) -> Option<&'static str> {
    Some(match tag {
        APP_BIND_REQUEST => "Bind Request",
        APP_BIND_RESPONSE => "Bind Response",
        APP_UNBIND_REQUEST => "Unbind Request",
        APP_SEARCH_REQUEST => "Search Request",
        APP_SEARCH_RESULT_ENTRY => "Search Result Entry",
        APP_SEARCH_RESULT_DONE => "Search Result Done",
        APP_MODIFY_REQUEST => "Modify Request",
        APP_MODIFY_RESPONSE => "Modify Response",
        APP_ADD_REQUEST => "Add Request",
        APP_ADD_RESPONSE => "Add Response",
        APP_DEL_REQUEST => "Del Request",
        APP_DEL_RESPONSE => "Del Response",
        APP_MODIFY_DN_REQUEST => "Modify DN Request",
        APP_MODIFY_DN_RESPONSE => "Modify DN Response",
        APP_COMPARE_REQUEST => "Compare Request",
        APP_COMPARE_RESPONSE => "Compare Response",
        APP_ABANDON_REQUEST => "Abandon Request",
        APP_SEARCH_RESULT_REFERENCE => "Search Result Reference",
        APP_EXTENDED_REQUEST => "Extended Request",
        APP_EXTENDED_RESPONSE => "Extended Response",
        _ => return None,
    })
}

/// LDAP result code (RFC 4511 Appendix A).
///
/// A newtype rather than a closed enum so codes outside the table survive a
/// round trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u8);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const TIME_LIMIT_EXCEEDED: ResultCode = ResultCode(3);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const AUTH_METHOD_NOT_SUPPORTED: ResultCode = ResultCode(7);
    pub const STRONG_AUTH_REQUIRED: ResultCode = ResultCode(8);
    pub const REFERRAL: ResultCode = ResultCode(10);
    pub const ADMIN_LIMIT_EXCEEDED: ResultCode = ResultCode(11);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: ResultCode = ResultCode(12);
    pub const CONFIDENTIALITY_REQUIRED: ResultCode = ResultCode(13);
    pub const SASL_BIND_IN_PROGRESS: ResultCode = ResultCode(14);
    pub const NO_SUCH_ATTRIBUTE: ResultCode = ResultCode(16);
    pub const UNDEFINED_ATTRIBUTE_TYPE: ResultCode = ResultCode(17);
    pub const INAPPROPRIATE_MATCHING: ResultCode = ResultCode(18);
    pub const CONSTRAINT_VIOLATION: ResultCode = ResultCode(19);
    pub const ATTRIBUTE_OR_VALUE_EXISTS: ResultCode = ResultCode(20);
    pub const INVALID_ATTRIBUTE_SYNTAX: ResultCode = ResultCode(21);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const ALIAS_PROBLEM: ResultCode = ResultCode(33);
    pub const INVALID_DN_SYNTAX: ResultCode = ResultCode(34);
    pub const ALIAS_DEREFERENCING_PROBLEM: ResultCode = ResultCode(36);
    pub const INAPPROPRIATE_AUTHENTICATION: ResultCode = ResultCode(48);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: ResultCode = ResultCode(50);
    pub const BUSY: ResultCode = ResultCode(51);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const LOOP_DETECT: ResultCode = ResultCode(54);
    pub const NAMING_VIOLATION: ResultCode = ResultCode(64);
    pub const OBJECT_CLASS_VIOLATION: ResultCode = ResultCode(65);
    pub const NOT_ALLOWED_ON_NON_LEAF: ResultCode = ResultCode(66);
    pub const NOT_ALLOWED_ON_RDN: ResultCode = ResultCode(67);
    pub const ENTRY_ALREADY_EXISTS: ResultCode = ResultCode(68);
    pub const OBJECT_CLASS_MODS_PROHIBITED: ResultCode = ResultCode(69);
    pub const AFFECTS_MULTIPLE_DSAS: ResultCode = ResultCode(71);
    pub const OTHER: ResultCode = ResultCode(80);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "Operations Error",
            2 => "Protocol Error",
            3 => "Time Limit Exceeded",
            4 => "Size Limit Exceeded",
            5 => "Compare False",
            6 => "Compare True",
            7 => "Auth Method Not Supported",
            8 => "Strong Auth Required",
            10 => "Referral",
            11 => "Admin Limit Exceeded",
            12 => "Unavailable Critical Extension",
            13 => "Confidentiality Required",
            14 => "Sasl Bind In Progress",
            16 => "No Such Attribute",
            17 => "Undefined Attribute Type",
            18 => "Inappropriate Matching",
            19 => "Constraint Violation",
            20 => "Attribute Or Value Exists",
            21 => "Invalid Attribute Syntax",
            32 => "No Such Object",
            33 => "Alias Problem",
            34 => "Invalid DN Syntax",
            36 => "Alias Dereferencing Problem",
            48 => "Inappropriate Authentication",
            49 => "Invalid Credentials",
            50 => "Insufficient Access Rights",
            51 => "Busy",
            52 => "Unavailable",
            53 => "Unwilling To Perform",
            54 => "Loop Detect",
            64 => "Naming Violation",
            65 => "Object Class Violation",
            66 => "Not Allowed On Non Leaf",
            67 => "Not Allowed On RDN",
            68 => "Entry Already Exists",
            69 => "Object Class Mods Prohibited",
            71 => "Affects Multiple DSAs",
            80 => "Other",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "Unknown" => write!(f, "{}", self.0),
            name => f.write_str(name),
        }
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::SUCCESS
    }
}

/// Fields shared by every response variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
    /// Referral URIs ([3] in the LDAPResult), preserved when present.
    pub referral: Option<Vec<String>>,
}

impl LdapResult {
    pub fn new(code: ResultCode, message: impl Into<String>) -> LdapResult {
        LdapResult {
            code,
            matched_dn: String::new(),
            message: message.into(),
            referral: None,
        }
    }

    /// Convert a non-success result into a typed error.
    pub fn into_result(self) -> Result<()> {
        if self.code == ResultCode::SUCCESS {
            Ok(())
        } else {
            Err(Error::Result {
                code: self.code,
                matched_dn: self.matched_dn,
                message: self.message,
            })
        }
    }

    /// Application-tagged response packet carrying this result.
    pub fn to_packet(&self, app_tag: u32) -> Packet {
        let mut pkt = Packet::constructed(BerClass::Application, app_tag);
        pkt.add(Packet::enumerated(i64::from(self.code.0)));
        pkt.add(Packet::octet_str(self.matched_dn.clone()));
        pkt.add(Packet::octet_str(self.message.clone()));
        if let Some(urls) = &self.referral {
            let seq = pkt.add(Packet::constructed(BerClass::Context, 3));
            for url in urls {
                seq.add(Packet::octet_str(url.clone()));
            }
        }
        pkt
    }

    /// Parse the leading LDAPResult fields of a response packet.
    pub fn parse(pkt: &Packet) -> Result<LdapResult> {
        if pkt.items.len() < 3 {
            return Err(Error::protocol("response should have at least 3 values"));
        }
        let code = pkt.items[0]
            .as_i64()
            .ok_or_else(|| Error::protocol("invalid code in response"))?;
        let matched_dn = pkt.items[1]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid matchedDN in response"))?
            .to_string();
        let message = pkt.items[2]
            .as_str()
            .ok_or_else(|| Error::protocol("invalid message in response"))?
            .to_string();
        let mut referral = None;
        if let Some(item) = pkt.items.get(3) {
            if item.class == BerClass::Context && item.tag == 3 {
                let mut urls = Vec::with_capacity(item.items.len());
                for u in &item.items {
                    urls.push(
                        u.as_str()
                            .ok_or_else(|| Error::protocol("invalid referral URI in response"))?
                            .to_string(),
                    );
                }
                referral = Some(urls);
            }
        }
        Ok(LdapResult {
            code: ResultCode(code as u8),
            matched_dn,
            message,
            referral,
        })
    }
}

/// LDAPMessage envelope: Sequence { messageID, protocolOp, ... }.
pub fn envelope(msg_id: i64, op: Packet) -> Packet {
    let mut pkt = Packet::sequence();
    pkt.add(Packet::integer(msg_id));
    pkt.add(op);
    pkt
}

/// Validate the envelope of an inbound message and return (messageID, op).
///
/// An optional third child (controls) is tolerated and left attached to the
/// caller's packet; it is not interpreted.
pub fn open_envelope(pkt: &Packet) -> Result<(i64, &Packet)> {
    if pkt.class != BerClass::Universal
        || pkt.primitive
        || pkt.tag != TAG_SEQUENCE
        || pkt.items.len() < 2
    {
        return Err(Error::protocol("message is not an LDAPMessage sequence"));
    }
    let id_pkt = &pkt.items[0];
    if id_pkt.class != BerClass::Universal || id_pkt.tag != TAG_INTEGER {
        return Err(Error::protocol("failed to parse messageID"));
    }
    let msg_id = id_pkt
        .as_i64()
        .ok_or_else(|| Error::protocol("failed to parse messageID"))?;
    Ok((msg_id, &pkt.items[1]))
}

/// Default Root DSE attribute map exposed by a server.
pub fn default_root_dse() -> HashMap<String, Vec<String>> {
    let mut dse = HashMap::new();
    dse.insert("supportedLDAPVersion".to_string(), vec!["3".to_string()]);
    dse.insert(
        "supportedFeatures".to_string(),
        vec![
            OID_MODIFY_INCREMENT.to_string(),
            OID_ALL_OPERATIONAL_ATTRIBUTES.to_string(),
        ],
    );
    dse.insert(
        "supportedExtension".to_string(),
        vec![OID_WHO_AM_I.to_string(), OID_PASSWORD_MODIFY.to_string()],
    );
    dse.insert("supportedSASLMechanisms".to_string(), Vec::new());
    dse
}
