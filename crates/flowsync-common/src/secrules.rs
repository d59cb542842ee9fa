//! Security-rule parsing and compilation to OVS match predicates.
//!
//! Rule grammar: `<direction>:<action> <protocol> [network] [ports]`, e.g.
//! `in:allow tcp 192.168.2.0/24 80,443` or `out:deny udp 10.0.0.0/8 5000-5100`.
//! Rules for one interface are joined with `;` into a rule set.
//!
//! A rule's OVS matches are a deterministic function of its fields and are
//! computed once at parse time. An arbitrary inclusive port range cannot be
//! expressed by a single OVS match, so ranges are decomposed into maximal
//! power-of-two aligned (base, mask) blocks, one match string per block.

use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::{FlowsyncError, Result};

/// Rule text applied when an interface carries no security rules at all.
pub const DEFAULT_RULES_TEXT: &str = "in:allow any; out:allow any";

const DEFAULT_IN_RULE: &str = "in:deny any";
const DEFAULT_OUT_RULE: &str = "out:allow any";

/// Traffic direction relative to the guest interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Traffic destined to the guest.
    In,
    /// Traffic originated by the guest.
    Out,
}

impl Direction {
    /// String form as written in rule text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Whether matched traffic is forwarded or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Forward matched traffic.
    Allow,
    /// Drop matched traffic.
    Deny,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Protocol selector for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Any IP protocol.
    Any,
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
}

impl Protocol {
    /// The OVS match keyword selecting this protocol.
    pub fn as_match(&self) -> &'static str {
        match self {
            Protocol::Any => "ip",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    /// Whether port specifications are meaningful for this protocol.
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "any" => Ok(Protocol::Any),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Port specification of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// No port restriction.
    None,
    /// Explicit list of ports.
    List(Vec<u16>),
    /// Inclusive range.
    Range(u16, u16),
}

/// One parsed security rule; immutable after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRule {
    direction: Direction,
    action: Action,
    protocol: Protocol,
    /// Remote network restriction; `None` means unrestricted.
    net: Option<Ipv4Net>,
    ports: PortSpec,
    /// OVS match strings, one per disjoint port block.
    matches: Vec<String>,
}

impl SecurityRule {
    /// Parses one rule from text.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let mut tokens = text.split_whitespace();

        let head = tokens
            .next()
            .ok_or_else(|| FlowsyncError::rule_parse(text, "empty rule"))?;
        let (dir_s, act_s) = head
            .split_once(':')
            .ok_or_else(|| FlowsyncError::rule_parse(text, "expected '<direction>:<action>'"))?;
        let direction = Direction::from_str(dir_s)
            .map_err(|m| FlowsyncError::rule_parse(text, m))?;
        let action = Action::from_str(act_s).map_err(|m| FlowsyncError::rule_parse(text, m))?;

        let proto_s = tokens
            .next()
            .ok_or_else(|| FlowsyncError::rule_parse(text, "missing protocol"))?;
        let protocol =
            Protocol::from_str(proto_s).map_err(|m| FlowsyncError::rule_parse(text, m))?;

        let mut net: Option<Ipv4Net> = None;
        let mut ports = PortSpec::None;
        for token in tokens {
            if net.is_none() && ports == PortSpec::None && looks_like_network(token) {
                net = Some(parse_network(text, token)?);
            } else if ports == PortSpec::None {
                if !protocol.has_ports() {
                    return Err(FlowsyncError::rule_parse(
                        text,
                        format!("ports not allowed for protocol '{}'", proto_s),
                    ));
                }
                ports = parse_ports(text, token)?;
            } else {
                return Err(FlowsyncError::rule_parse(
                    text,
                    format!("unexpected token '{}'", token),
                ));
            }
        }

        // 0.0.0.0/0 places no restriction at all
        if let Some(n) = net {
            if n.prefix_len() == 0 {
                net = None;
            }
        }

        let matches = compute_matches(direction, protocol, net, &ports);
        Ok(Self {
            direction,
            action,
            protocol,
            net,
            ports,
            matches,
        })
    }

    /// Traffic direction of this rule.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether matched traffic is forwarded.
    pub fn is_allow(&self) -> bool {
        self.action == Action::Allow
    }

    /// True for an unrestricted `allow any` rule.
    pub fn is_allow_any(&self) -> bool {
        self.action == Action::Allow
            && self.protocol == Protocol::Any
            && self.net.is_none()
            && self.ports == PortSpec::None
    }

    /// The precomputed OVS match strings, one per disjoint port block.
    pub fn ovs_matches(&self) -> &[String] {
        &self.matches
    }
}

fn looks_like_network(token: &str) -> bool {
    token.contains('/') || token.parse::<Ipv4Addr>().is_ok()
}

fn parse_network(rule: &str, token: &str) -> Result<Ipv4Net> {
    if token.contains('/') {
        token
            .parse::<Ipv4Net>()
            .map_err(|e| FlowsyncError::rule_parse(rule, format!("bad network '{}': {}", token, e)))
    } else {
        let addr = token
            .parse::<Ipv4Addr>()
            .map_err(|e| FlowsyncError::rule_parse(rule, format!("bad address '{}': {}", token, e)))?;
        Ipv4Net::new(addr, 32)
            .map_err(|e| FlowsyncError::rule_parse(rule, format!("bad address '{}': {}", token, e)))
    }
}

fn parse_ports(rule: &str, token: &str) -> Result<PortSpec> {
    if let Some((s, e)) = token.split_once('-') {
        let start: u16 = s
            .parse()
            .map_err(|_| FlowsyncError::rule_parse(rule, format!("bad port '{}'", s)))?;
        let end: u16 = e
            .parse()
            .map_err(|_| FlowsyncError::rule_parse(rule, format!("bad port '{}'", e)))?;
        if start > end {
            return Err(FlowsyncError::rule_parse(
                rule,
                format!("inverted port range '{}'", token),
            ));
        }
        return Ok(PortSpec::Range(start, end));
    }
    let mut ports = Vec::new();
    for p in token.split(',') {
        let port: u16 = p
            .parse()
            .map_err(|_| FlowsyncError::rule_parse(rule, format!("bad port '{}'", p)))?;
        ports.push(port);
    }
    Ok(PortSpec::List(ports))
}

fn compute_matches(
    direction: Direction,
    protocol: Protocol,
    net: Option<Ipv4Net>,
    ports: &PortSpec,
) -> Vec<String> {
    // Inbound rules constrain the remote source, outbound the remote dest.
    let (nw_field, tp_field) = match direction {
        Direction::In => ("nw_src", "tp_src"),
        Direction::Out => ("nw_dst", "tp_dst"),
    };

    let mut base = protocol.as_match().to_string();
    if let Some(n) = net {
        if n.prefix_len() == 32 {
            base.push_str(&format!(",{}={}", nw_field, n.addr()));
        } else {
            base.push_str(&format!(",{}={}", nw_field, n));
        }
    }

    let tp_matches: Vec<String> = match ports {
        PortSpec::None => Vec::new(),
        PortSpec::List(ps) => ps.iter().map(|p| format!("{}={}", tp_field, p)).collect(),
        PortSpec::Range(s, e) => port_range_to_masks(*s, *e)
            .into_iter()
            .filter_map(|(b, m)| {
                if m == 0 {
                    // full 16-bit range, no port restriction needed
                    None
                } else if m == u16::MAX {
                    Some(format!("{}={}", tp_field, b))
                } else if b == 0 {
                    Some(format!("{}=0/0x{:x}", tp_field, m))
                } else {
                    Some(format!("{}=0x{:x}/0x{:x}", tp_field, b, m))
                }
            })
            .collect(),
    };

    if tp_matches.is_empty() {
        vec![base]
    } else {
        tp_matches
            .into_iter()
            .map(|tp| format!("{},{}", base, tp))
            .collect()
    }
}

/// Decomposes an inclusive 16-bit port range into maximal power-of-two
/// aligned `(base, mask)` blocks.
///
/// A port `p` belongs to block `(base, mask)` iff `p & mask == base`. The
/// blocks collectively partition `[start, end]` with no gaps or overlaps.
/// `start == end` is the degenerate single-block case with an exact mask.
pub fn port_range_to_masks(start: u16, end: u16) -> Vec<(u16, u16)> {
    if start == end {
        return vec![(start, u16::MAX)];
    }
    let mut blocks = Vec::new();
    let mut cursor = start as u32;
    let bound = end as u32 + 1;
    while cursor < bound {
        // largest power-of-two block aligned at cursor that still fits
        let mut size: u32 = 1;
        while cursor + size <= bound && cursor & (size - 1) == 0 {
            size <<= 1;
        }
        size >>= 1;
        blocks.push((cursor as u16, (!(size - 1)) as u16));
        cursor += size;
    }
    blocks
}

/// Ordered inbound and outbound rule lists for one interface.
///
/// Each direction is never empty: an absent direction is filled with the
/// platform default (deny-any inbound, allow-any outbound).
#[derive(Debug, Clone)]
pub struct SecurityRuleSet {
    in_rules: Vec<SecurityRule>,
    out_rules: Vec<SecurityRule>,
    in_allow_any: bool,
    out_allow_any: bool,
}

impl SecurityRuleSet {
    /// Parses a `;`-separated rule list, bucketing by direction in order.
    ///
    /// A parse error in any rule aborts construction of the whole set.
    pub fn parse(text: &str) -> Result<Self> {
        let mut in_rules = Vec::new();
        let mut out_rules = Vec::new();
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let rule = SecurityRule::parse(part)?;
            match rule.direction() {
                Direction::In => in_rules.push(rule),
                Direction::Out => out_rules.push(rule),
            }
        }

        // A secgroup may leave either direction empty; fill the default.
        if in_rules.is_empty() {
            in_rules.push(SecurityRule::parse(DEFAULT_IN_RULE)?);
        }
        if out_rules.is_empty() {
            out_rules.push(SecurityRule::parse(DEFAULT_OUT_RULE)?);
        }

        let in_allow_any = in_rules.iter().any(|r| r.is_allow_any());
        let out_allow_any = out_rules.iter().any(|r| r.is_allow_any());
        Ok(Self {
            in_rules,
            out_rules,
            in_allow_any,
            out_allow_any,
        })
    }

    /// Inbound rules, in source order.
    pub fn in_rules(&self) -> &[SecurityRule] {
        &self.in_rules
    }

    /// Outbound rules, in source order.
    pub fn out_rules(&self) -> &[SecurityRule] {
        &self.out_rules
    }

    /// Whether the inbound direction contains an allow-any rule.
    pub fn in_allow_any(&self) -> bool {
        self.in_allow_any
    }

    /// Whether the outbound direction contains an allow-any rule.
    pub fn out_allow_any(&self) -> bool {
        self.out_allow_any
    }
}
