//! RFC 4515 search filters: textual grammar, tree form and BER form.
//!
//! The three surfaces round-trip: `parse(f.to_string()) == f` and
//! `Filter::from_packet(&f.to_packet()) == f` for every tree the printer
//! and encoder produce.

use std::fmt;

use crate::ber::{BerClass, BerValue, Packet};
use crate::error::{Error, Result};

pub const FILTER_TAG_AND: u32 = 0;
pub const FILTER_TAG_OR: u32 = 1;
pub const FILTER_TAG_NOT: u32 = 2;
pub const FILTER_TAG_EQUALITY_MATCH: u32 = 3;
pub const FILTER_TAG_SUBSTRINGS: u32 = 4;
pub const FILTER_TAG_GREATER_OR_EQUAL: u32 = 5;
pub const FILTER_TAG_LESS_OR_EQUAL: u32 = 6;
pub const FILTER_TAG_PRESENT: u32 = 7;
pub const FILTER_TAG_APPROX_MATCH: u32 = 8;
pub const FILTER_TAG_EXTENSIBLE_MATCH: u32 = 9;

/// Syntax error in a textual filter. `pos` counts codepoints, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ldap: filter syntax error at position {pos}: {msg}")]
pub struct FilterSyntaxError {
    pub pos: usize,
    pub msg: String,
}

fn syntax(pos: usize, msg: impl Into<String>) -> FilterSyntaxError {
    FilterSyntaxError {
        pos,
        msg: msg.into(),
    }
}

/// A search filter tree (RFC 4511 §4.5.1.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    EqualityMatch {
        attribute: String,
        value: Vec<u8>,
    },
    Substrings {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        /// Trailing component (`final` in RFC 4511).
        last: Option<String>,
    },
    GreaterOrEqual {
        attribute: String,
        value: Vec<u8>,
    },
    LessOrEqual {
        attribute: String,
        value: Vec<u8>,
    },
    Present {
        attribute: String,
    },
    ApproxMatch {
        attribute: String,
        value: Vec<u8>,
    },
    ExtensibleMatch {
        matching_rule: Option<String>,
        attribute: Option<String>,
        value: String,
        dn_attributes: bool,
    },
}

fn escape_into(s: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '(' => out.write_str("\\28")?,
            ')' => out.write_str("\\29")?,
            '&' => out.write_str("\\26")?,
            '|' => out.write_str("\\7c")?,
            '=' => out.write_str("\\3d")?,
            '>' => out.write_str("\\3e")?,
            '<' => out.write_str("\\3c")?,
            '~' => out.write_str("\\7e")?,
            '*' => out.write_str("\\2a")?,
            '/' => out.write_str("\\2f")?,
            '\\' => out.write_str("\\5c")?,
            _ => {
                use std::fmt::Write;
                out.write_char(c)?;
            }
        }
    }
    Ok(())
}

fn escape_bytes_into(v: &[u8], out: &mut fmt::Formatter<'_>) -> fmt::Result {
    escape_into(&String::from_utf8_lossy(v), out)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => {
                f.write_str("(&")?;
                for flt in filters {
                    write!(f, "{}", flt)?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for flt in filters {
                    write!(f, "{}", flt)?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::EqualityMatch { attribute, value } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str("=")?;
                escape_bytes_into(value, f)?;
                f.write_str(")")
            }
            Filter::GreaterOrEqual { attribute, value } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str(">=")?;
                escape_bytes_into(value, f)?;
                f.write_str(")")
            }
            Filter::LessOrEqual { attribute, value } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str("<=")?;
                escape_bytes_into(value, f)?;
                f.write_str(")")
            }
            Filter::ApproxMatch { attribute, value } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str("~=")?;
                escape_bytes_into(value, f)?;
                f.write_str(")")
            }
            Filter::Present { attribute } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str("=*)")
            }
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => {
                f.write_str("(")?;
                escape_into(attribute, f)?;
                f.write_str("=")?;
                if let Some(s) = initial {
                    escape_into(s, f)?;
                }
                for a in any {
                    f.write_str("*")?;
                    escape_into(a, f)?;
                }
                f.write_str("*")?;
                if let Some(s) = last {
                    escape_into(s, f)?;
                }
                f.write_str(")")
            }
            Filter::ExtensibleMatch {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => {
                f.write_str("(")?;
                if let Some(attr) = attribute {
                    escape_into(attr, f)?;
                }
                if *dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = matching_rule {
                    f.write_str(":")?;
                    escape_into(rule, f)?;
                }
                f.write_str(":=")?;
                escape_into(value, f)?;
                f.write_str(")")
            }
        }
    }
}

/// Single-pass character tokenizer tracking byte and codepoint positions.
struct Tokenizer<'a> {
    s: &'a str,
    pos: usize,
    cpos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(s: &'a str) -> Tokenizer<'a> {
        Tokenizer { s, pos: 0, cpos: 0 }
    }

    fn next(&mut self) -> Option<char> {
        let c = self.s[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        self.cpos += 1;
        Some(c)
    }

    fn backup(&mut self, c: char) {
        self.pos -= c.len_utf8();
        self.cpos -= 1;
    }

    fn hex_escape(&mut self) -> std::result::Result<char, FilterSyntaxError> {
        let (Some(h1), Some(h2)) = (self.next(), self.next()) else {
            return Err(syntax(self.cpos, "unexpected end of filter"));
        };
        let code: String = [h1, h2].iter().collect();
        u8::from_str_radix(&code, 16)
            .map(char::from)
            .map_err(|_| syntax(self.cpos - 2, format!("unable to parse hex code {:?}", code)))
    }
}

impl std::str::FromStr for Filter {
    type Err = FilterSyntaxError;

    fn from_str(s: &str) -> std::result::Result<Filter, FilterSyntaxError> {
        parse(s)
    }
}

/// Parse a textual RFC 4515 filter.
pub fn parse(filter: &str) -> std::result::Result<Filter, FilterSyntaxError> {
    if filter.is_empty() {
        return Err(syntax(0, "empty filter"));
    }
    let mut tok = Tokenizer::new(filter);
    let parsed = parse_inner(&mut tok, false)?
        .ok_or_else(|| syntax(tok.cpos, "expected filter"))?;
    if tok.next().is_some() {
        return Err(syntax(tok.cpos - 1, "unexpected characters after filter"));
    }
    Ok(parsed)
}

fn parse_inner(
    tok: &mut Tokenizer<'_>,
    check_close: bool,
) -> std::result::Result<Option<Filter>, FilterSyntaxError> {
    let Some(open) = tok.next() else {
        return Err(syntax(tok.cpos, "unexpected end of filter"));
    };
    if check_close && open == ')' {
        tok.backup(open);
        return Ok(None);
    }
    if open != '(' {
        return Err(syntax(tok.cpos - 1, "expected ("));
    }

    let Some(head) = tok.next() else {
        return Err(syntax(tok.cpos, "unexpected end of filter"));
    };
    let filter = match head {
        '&' | '|' => {
            let mut filters = Vec::new();
            while let Some(f) = parse_inner(tok, true)? {
                filters.push(f);
            }
            if filters.is_empty() {
                return Err(syntax(tok.cpos, "AND/OR filter without children"));
            }
            if head == '&' {
                Filter::And(filters)
            } else {
                Filter::Or(filters)
            }
        }
        '!' => {
            let inner = parse_inner(tok, false)?
                .ok_or_else(|| syntax(tok.cpos, "expected filter after !"))?;
            Filter::Not(Box::new(inner))
        }
        _ => parse_item(tok, head)?,
    };

    match tok.next() {
        Some(')') => Ok(Some(filter)),
        _ => Err(syntax(tok.cpos - 1, "expected )")),
    }
}

/// Parse `attr op value` where op is one of = >= <= ~= or the extensible
/// `[:dn][:rule]:=` form. `first` is the already-consumed first character.
fn parse_item(
    tok: &mut Tokenizer<'_>,
    first: char,
) -> std::result::Result<Filter, FilterSyntaxError> {
    let mut name = String::new();
    if first != ':' {
        name.push(first);
    } else {
        tok.backup(first);
    }

    let mut op = "";
    while op.is_empty() {
        let Some(c) = tok.next() else {
            return Err(syntax(tok.cpos, "unexpected end of filter"));
        };
        match c {
            '=' => op = "=",
            '>' | '<' | '~' => {
                if tok.next() != Some('=') {
                    return Err(syntax(tok.cpos - 1, format!("expected = after {}", c)));
                }
                op = match c {
                    '>' => ">=",
                    '<' => "<=",
                    _ => "~=",
                };
            }
            ':' => return parse_extensible_tail(tok, name),
            '\\' => name.push(tok.hex_escape()?),
            _ => name.push(c),
        }
    }

    // Value: '*' separates substring parts; escaped characters never do.
    let mut parts: Vec<String> = vec![String::new()];
    let mut raw_stars = 0usize;
    loop {
        let Some(c) = tok.next() else {
            return Err(syntax(tok.cpos, "unexpected end of filter"));
        };
        match c {
            ')' => {
                tok.backup(c);
                break;
            }
            '*' => {
                raw_stars += 1;
                parts.push(String::new());
            }
            '\\' => {
                let e = tok.hex_escape()?;
                parts.last_mut().expect("non-empty").push(e);
            }
            _ => parts.last_mut().expect("non-empty").push(c),
        }
    }

    if raw_stars == 0 {
        let value = parts.into_iter().next().expect("non-empty");
        return Ok(match op {
            "=" => Filter::EqualityMatch {
                attribute: name,
                value: value.into_bytes(),
            },
            ">=" => Filter::GreaterOrEqual {
                attribute: name,
                value: value.into_bytes(),
            },
            "<=" => Filter::LessOrEqual {
                attribute: name,
                value: value.into_bytes(),
            },
            _ => Filter::ApproxMatch {
                attribute: name,
                value: value.into_bytes(),
            },
        });
    }

    if op != "=" {
        return Err(syntax(tok.cpos, "non equality substring match not allowed"));
    }
    if raw_stars == 1 && parts.iter().all(|p| p.is_empty()) {
        return Ok(Filter::Present { attribute: name });
    }

    let last_idx = parts.len() - 1;
    let mut initial = None;
    let mut last = None;
    let mut any = Vec::new();
    for (i, part) in parts.into_iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            initial = Some(part);
        } else if i == last_idx {
            last = Some(part);
        } else {
            any.push(part);
        }
    }
    if initial.is_none() && last.is_none() && any.is_empty() {
        return Err(syntax(tok.cpos, "substring filter without components"));
    }
    Ok(Filter::Substrings {
        attribute: name,
        initial,
        any,
        last,
    })
}

/// Parse the remainder of an extensible match; the first ':' is consumed.
fn parse_extensible_tail(
    tok: &mut Tokenizer<'_>,
    name: String,
) -> std::result::Result<Filter, FilterSyntaxError> {
    let mut dn_attributes = false;
    let mut matching_rule: Option<String> = None;

    loop {
        let mut segment = String::new();
        let terminator = loop {
            let Some(c) = tok.next() else {
                return Err(syntax(tok.cpos, "unexpected end of filter"));
            };
            match c {
                ':' | '=' => break c,
                '\\' => segment.push(tok.hex_escape()?),
                _ => segment.push(c),
            }
        };
        if terminator == '=' {
            if !segment.is_empty() {
                return Err(syntax(tok.cpos - 1, "expected := in extensible filter"));
            }
            break;
        }
        if segment.eq_ignore_ascii_case("dn") && !dn_attributes && matching_rule.is_none() {
            dn_attributes = true;
        } else if !segment.is_empty() && matching_rule.is_none() {
            matching_rule = Some(segment);
        } else {
            return Err(syntax(tok.cpos - 1, "invalid extensible filter component"));
        }
    }

    let mut value = String::new();
    loop {
        let Some(c) = tok.next() else {
            return Err(syntax(tok.cpos, "unexpected end of filter"));
        };
        match c {
            ')' => {
                tok.backup(c);
                break;
            }
            '\\' => value.push(tok.hex_escape()?),
            _ => value.push(c),
        }
    }

    if name.is_empty() && matching_rule.is_none() {
        return Err(syntax(
            tok.cpos,
            "extensible filter needs an attribute or a matching rule",
        ));
    }
    Ok(Filter::ExtensibleMatch {
        matching_rule,
        attribute: if name.is_empty() { None } else { Some(name) },
        value,
        dn_attributes,
    })
}

impl Filter {
    /// Encode as the BER subtree used inside a SearchRequest.
    pub fn to_packet(&self) -> Packet {
        match self {
            Filter::And(filters) => {
                let mut pkt = Packet::constructed(BerClass::Context, FILTER_TAG_AND);
                for f in filters {
                    pkt.add(f.to_packet());
                }
                pkt
            }
            Filter::Or(filters) => {
                let mut pkt = Packet::constructed(BerClass::Context, FILTER_TAG_OR);
                for f in filters {
                    pkt.add(f.to_packet());
                }
                pkt
            }
            Filter::Not(inner) => {
                Packet::constructed(BerClass::Context, FILTER_TAG_NOT).with(inner.to_packet())
            }
            Filter::EqualityMatch { attribute, value } => {
                ava_packet(FILTER_TAG_EQUALITY_MATCH, attribute, value)
            }
            Filter::GreaterOrEqual { attribute, value } => {
                ava_packet(FILTER_TAG_GREATER_OR_EQUAL, attribute, value)
            }
            Filter::LessOrEqual { attribute, value } => {
                ava_packet(FILTER_TAG_LESS_OR_EQUAL, attribute, value)
            }
            Filter::ApproxMatch { attribute, value } => {
                ava_packet(FILTER_TAG_APPROX_MATCH, attribute, value)
            }
            Filter::Present { attribute } => Packet::primitive(
                BerClass::Context,
                FILTER_TAG_PRESENT,
                BerValue::Str(attribute.clone()),
            ),
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => {
                let mut pkt = Packet::constructed(BerClass::Context, FILTER_TAG_SUBSTRINGS);
                pkt.add(Packet::octet_str(attribute.clone()));
                let seq = pkt.add(Packet::sequence());
                if let Some(s) = initial {
                    seq.add(Packet::context_str(0, s.clone()));
                }
                for a in any {
                    if !a.is_empty() {
                        seq.add(Packet::context_str(1, a.clone()));
                    }
                }
                if let Some(s) = last {
                    seq.add(Packet::context_str(2, s.clone()));
                }
                pkt
            }
            Filter::ExtensibleMatch {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => {
                let mut pkt = Packet::constructed(BerClass::Context, FILTER_TAG_EXTENSIBLE_MATCH);
                if let Some(rule) = matching_rule {
                    pkt.add(Packet::context_str(1, rule.clone()));
                }
                if let Some(attr) = attribute {
                    pkt.add(Packet::context_str(2, attr.clone()));
                }
                pkt.add(Packet::context_str(3, value.clone()));
                if *dn_attributes {
                    pkt.add(Packet::primitive(BerClass::Context, 4, BerValue::Bool(true)));
                }
                pkt
            }
        }
    }

    /// Decode the BER subtree of a SearchRequest filter.
    pub fn from_packet(pkt: &Packet) -> Result<Filter> {
        if pkt.class != BerClass::Context {
            return Err(Error::protocol("filter is not a context-class packet"));
        }
        match pkt.tag {
            FILTER_TAG_AND | FILTER_TAG_OR => {
                if pkt.items.is_empty() {
                    return Err(Error::protocol("AND/OR filter without children"));
                }
                let mut filters = Vec::with_capacity(pkt.items.len());
                for item in &pkt.items {
                    filters.push(Filter::from_packet(item)?);
                }
                if pkt.tag == FILTER_TAG_AND {
                    Ok(Filter::And(filters))
                } else {
                    Ok(Filter::Or(filters))
                }
            }
            FILTER_TAG_NOT => {
                if pkt.items.len() != 1 {
                    return Err(Error::protocol("NOT filter should have one child"));
                }
                Ok(Filter::Not(Box::new(Filter::from_packet(&pkt.items[0])?)))
            }
            FILTER_TAG_EQUALITY_MATCH => {
                let (attribute, value) = parse_ava(pkt, "equalityMatch")?;
                Ok(Filter::EqualityMatch { attribute, value })
            }
            FILTER_TAG_GREATER_OR_EQUAL => {
                let (attribute, value) = parse_ava(pkt, "greaterOrEqual")?;
                Ok(Filter::GreaterOrEqual { attribute, value })
            }
            FILTER_TAG_LESS_OR_EQUAL => {
                let (attribute, value) = parse_ava(pkt, "lessOrEqual")?;
                Ok(Filter::LessOrEqual { attribute, value })
            }
            FILTER_TAG_APPROX_MATCH => {
                let (attribute, value) = parse_ava(pkt, "approxMatch")?;
                Ok(Filter::ApproxMatch { attribute, value })
            }
            FILTER_TAG_PRESENT => {
                let attribute = pkt
                    .as_str()
                    .ok_or_else(|| Error::protocol("failed to parse present filter"))?
                    .to_string();
                Ok(Filter::Present { attribute })
            }
            FILTER_TAG_SUBSTRINGS => {
                if pkt.items.len() != 2 {
                    return Err(Error::protocol("substrings filter should have 2 items"));
                }
                let attribute = pkt.items[0]
                    .as_str()
                    .ok_or_else(|| Error::protocol("failed to parse substrings.attribute"))?
                    .to_string();
                let comps = &pkt.items[1].items;
                if comps.is_empty() {
                    return Err(Error::protocol("substrings filter without components"));
                }
                let mut initial = None;
                let mut any = Vec::new();
                let mut last = None;
                for (i, c) in comps.iter().enumerate() {
                    let text = c
                        .as_str()
                        .ok_or_else(|| Error::protocol("failed to parse substring component"))?
                        .to_string();
                    match c.tag {
                        0 => {
                            if i != 0 {
                                return Err(Error::protocol(
                                    "substrings has initial as non-first child",
                                ));
                            }
                            initial = Some(text);
                        }
                        1 => any.push(text),
                        2 => {
                            if i != comps.len() - 1 {
                                return Err(Error::protocol(
                                    "substrings has final as non-last child",
                                ));
                            }
                            last = Some(text);
                        }
                        tag => {
                            return Err(Error::protocol(format!(
                                "unknown filter substring type {}",
                                tag
                            )))
                        }
                    }
                }
                Ok(Filter::Substrings {
                    attribute,
                    initial,
                    any,
                    last,
                })
            }
            FILTER_TAG_EXTENSIBLE_MATCH => {
                let mut matching_rule = None;
                let mut attribute = None;
                let mut value = None;
                let mut dn_attributes = false;
                for item in &pkt.items {
                    match item.tag {
                        1 => {
                            matching_rule = Some(
                                item.as_str()
                                    .ok_or_else(|| {
                                        Error::protocol("invalid matchingRule in extensible filter")
                                    })?
                                    .to_string(),
                            )
                        }
                        2 => {
                            attribute = Some(
                                item.as_str()
                                    .ok_or_else(|| {
                                        Error::protocol("invalid type in extensible filter")
                                    })?
                                    .to_string(),
                            )
                        }
                        3 => {
                            value = Some(
                                item.as_str()
                                    .ok_or_else(|| {
                                        Error::protocol("invalid matchValue in extensible filter")
                                    })?
                                    .to_string(),
                            )
                        }
                        4 => dn_attributes = context_bool(item),
                        tag => {
                            return Err(Error::protocol(format!(
                                "unknown extensible filter tag {}",
                                tag
                            )))
                        }
                    }
                }
                let value = value
                    .ok_or_else(|| Error::protocol("extensible filter without matchValue"))?;
                Ok(Filter::ExtensibleMatch {
                    matching_rule,
                    attribute,
                    value,
                    dn_attributes,
                })
            }
            tag => Err(Error::protocol(format!("unknown filter tag {}", tag))),
        }
    }
}

fn ava_packet(tag: u32, attribute: &str, value: &[u8]) -> Packet {
    Packet::constructed(BerClass::Context, tag)
        .with(Packet::octet_str(attribute))
        .with(Packet::octet_string(value.to_vec()))
}

fn parse_ava(pkt: &Packet, what: &str) -> Result<(String, Vec<u8>)> {
    if pkt.items.len() != 2 {
        return Err(Error::protocol(format!("{} filter should have 2 items", what)));
    }
    let attribute = pkt.items[0]
        .as_str()
        .ok_or_else(|| Error::protocol(format!("failed to parse {}.attribute", what)))?
        .to_string();
    let value = pkt.items[1]
        .as_bytes()
        .ok_or_else(|| Error::protocol(format!("failed to parse {}.value", what)))?
        .to_vec();
    Ok((attribute, value))
}

/// Boolean payload of a context-class primitive ([4] dnAttributes).
fn context_bool(pkt: &Packet) -> bool {
    match &pkt.value {
        Some(BerValue::Bool(b)) => *b,
        Some(BerValue::Bytes(b)) => !b.is_empty() && b[0] != 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_text(s: &str) -> Filter {
        let f = parse(s).unwrap_or_else(|e| panic!("parse {:?}: {}", s, e));
        assert_eq!(f.to_string(), s, "print(parse({:?}))", s);
        f
    }

    fn roundtrip_ber(f: &Filter) {
        // In-memory tree round trip.
        assert_eq!(&Filter::from_packet(&f.to_packet()).unwrap(), f);
        // Wire round trip.
        let buf = f.to_packet().encode().unwrap();
        let (pkt, n) = Packet::parse(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(&Filter::from_packet(&pkt).unwrap(), f);
    }

    #[test]
    fn parse_print_identity() {
        for case in [
            "(present=*)",
            "(less<=123)",
            "(greater>=123)",
            "(approx~=abc)",
            "(!(not=123))",
            "(&(abc=123)(easy<=hard))",
            "(|(abc=123)(easy<=hard))",
            "(escaped=\\28\\29)",
            "(substr=prefix*mid1*mid2*suffix)",
            "(prefix=prefix*)",
            "(suffix=*suffix)",
            "(middle=*middle*)",
            "(cn:=admin)",
            "(cn:dn:=admin)",
            "(cn:caseExactMatch:=admin)",
            "(:dn:caseExactMatch:=admin)",
            "(ou:dn:2.4.6.8.10:=sales)",
        ] {
            let f = roundtrip_text(case);
            roundtrip_ber(&f);
        }
    }

    #[test]
    fn and_or_nested_shape() {
        let f = roundtrip_text("(&(cn=admin)(|(uid=1)(uid=2)))");
        let pkt = f.to_packet();
        assert_eq!(pkt.class, BerClass::Context);
        assert_eq!(pkt.tag, FILTER_TAG_AND);
        assert!(!pkt.primitive);
        assert_eq!(pkt.items[0].tag, FILTER_TAG_EQUALITY_MATCH);
        assert_eq!(pkt.items[1].tag, FILTER_TAG_OR);
        assert_eq!(pkt.items[1].items.len(), 2);
        for child in &pkt.items[1].items {
            assert_eq!(child.tag, FILTER_TAG_EQUALITY_MATCH);
        }
        roundtrip_ber(&f);
    }

    #[test]
    fn substrings_split() {
        let f = parse("(cn=pre*mid1*mid2*suf)").unwrap();
        assert_eq!(
            f,
            Filter::Substrings {
                attribute: "cn".into(),
                initial: Some("pre".into()),
                any: vec!["mid1".into(), "mid2".into()],
                last: Some("suf".into()),
            }
        );
        let pkt = f.to_packet();
        let tags: Vec<u32> = pkt.items[1].items.iter().map(|c| c.tag).collect();
        assert_eq!(tags, vec![0, 1, 1, 2]);
        roundtrip_ber(&f);
    }

    #[test]
    fn substrings_edge_shapes() {
        assert_eq!(
            parse("(a=pre*)").unwrap(),
            Filter::Substrings {
                attribute: "a".into(),
                initial: Some("pre".into()),
                any: vec![],
                last: None,
            }
        );
        assert_eq!(
            parse("(a=*suf)").unwrap(),
            Filter::Substrings {
                attribute: "a".into(),
                initial: None,
                any: vec![],
                last: Some("suf".into()),
            }
        );
        assert_eq!(
            parse("(a=*mid*)").unwrap(),
            Filter::Substrings {
                attribute: "a".into(),
                initial: None,
                any: vec!["mid".into()],
                last: None,
            }
        );
    }

    #[test]
    fn escape_roundtrip() {
        let f = parse("(cn=\\28hi\\29)").unwrap();
        assert_eq!(
            f,
            Filter::EqualityMatch {
                attribute: "cn".into(),
                value: b"(hi)".to_vec(),
            }
        );
        assert_eq!(f.to_string(), "(cn=\\28hi\\29)");
    }

    #[test]
    fn escaped_star_is_literal() {
        let f = parse("(a=\\2a)").unwrap();
        assert_eq!(
            f,
            Filter::EqualityMatch {
                attribute: "a".into(),
                value: b"*".to_vec(),
            }
        );
        // And an escaped star does not become a substring separator.
        let f = parse("(a=x\\2ay*z)").unwrap();
        assert_eq!(
            f,
            Filter::Substrings {
                attribute: "a".into(),
                initial: Some("x*y".into()),
                any: vec![],
                last: Some("z".into()),
            }
        );
    }

    #[test]
    fn present_filter() {
        let f = parse("(objectClass=*)").unwrap();
        assert_eq!(
            f,
            Filter::Present {
                attribute: "objectClass".into()
            }
        );
        let pkt = f.to_packet();
        assert!(pkt.primitive);
        assert_eq!(pkt.tag, FILTER_TAG_PRESENT);
        roundtrip_ber(&f);
    }

    #[test]
    fn syntax_errors() {
        for (input, pos_known) in [
            ("", Some(0)),
            ("(", None),
            ("x=y", None),
            ("(a=b", None),
            ("(a=b))", None),
            ("(a>=*)", None),
            ("(&)", None),
            ("(a=**)", None),
            ("(a=\\zz)", None),
            ("(a=b)(c=d)", None),
        ] {
            let err = parse(input).unwrap_err();
            if let Some(pos) = pos_known {
                assert_eq!(err.pos, pos, "{:?}", input);
            }
        }
    }

    #[test]
    fn error_positions_count_codepoints() {
        // The ö is one codepoint, two bytes; the bad escape follows it.
        let err = parse("(aö=\\zz)").unwrap_err();
        assert_eq!(err.pos, 5);
    }

    #[test]
    fn ber_decode_rejects_empty_and() {
        let pkt = Packet::constructed(BerClass::Context, FILTER_TAG_AND);
        assert!(Filter::from_packet(&pkt).is_err());
    }

    #[test]
    fn ber_decode_rejects_unknown_tag() {
        let pkt = Packet::constructed(BerClass::Context, 12);
        assert!(Filter::from_packet(&pkt).is_err());
    }

    #[test]
    fn ber_decode_rejects_misplaced_substring_components() {
        // final (tag 2) before any (tag 1)
        let mut pkt = Packet::constructed(BerClass::Context, FILTER_TAG_SUBSTRINGS);
        pkt.add(Packet::octet_str("cn"));
        let seq = pkt.add(Packet::sequence());
        seq.add(Packet::context_str(2, "suf"));
        seq.add(Packet::context_str(1, "mid"));
        assert!(Filter::from_packet(&pkt).is_err());
    }

    #[test]
    fn extensible_dn_attributes_roundtrip() {
        let f = Filter::ExtensibleMatch {
            matching_rule: Some("caseExactMatch".into()),
            attribute: Some("cn".into()),
            value: "admin".into(),
            dn_attributes: true,
        };
        assert_eq!(f.to_string(), "(cn:dn:caseExactMatch:=admin)");
        assert_eq!(parse(&f.to_string()).unwrap(), f);
        roundtrip_ber(&f);
    }

    #[test]
    fn binary_values_encode() {
        let f = Filter::ApproxMatch {
            attribute: "foo".into(),
            value: vec![1, 2, 3],
        };
        roundtrip_ber(&f);
    }
}
