//! PayFast ITN (instant transaction notification) decoding and source
//! address checks. ITNs carry no signature we verify, so the allowlist is
//! the only thing standing between the endpoint and a forged payment.

use serde::Deserialize;
use std::net::IpAddr;

use crate::{
    domain::{parse_amount_cents, PlanType},
    error::{AppError, Result},
};

/// Form fields PayFast posts. Everything is optional at the wire level;
/// `validate` enforces what processing needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItnNotification {
    pub m_payment_id: Option<String>,
    pub pf_payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub amount_gross: Option<String>,
    pub custom_str1: Option<String>,
    pub custom_str2: Option<String>,
    pub custom_str3: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItnStatus {
    Complete,
    Failed,
    Cancelled,
    Other,
}

impl ItnStatus {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => ItnStatus::Complete,
            "FAILED" => ItnStatus::Failed,
            "CANCELLED" => ItnStatus::Cancelled,
            _ => ItnStatus::Other,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ItnNotification {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| AppError::BadRequest(format!("Malformed ITN payload: {}", e)))
    }

    /// Checks the fields every ITN must carry and returns its status.
    pub fn validate(&self) -> Result<ItnStatus> {
        let status = non_empty(&self.payment_status)
            .ok_or_else(|| AppError::BadRequest("Missing payment_status".to_string()))?;
        self.order_reference()
            .ok_or_else(|| AppError::BadRequest("Missing m_payment_id".to_string()))?;
        Ok(ItnStatus::parse(status))
    }

    pub fn status_str(&self) -> &str {
        non_empty(&self.payment_status).unwrap_or("")
    }

    pub fn order_reference(&self) -> Option<&str> {
        non_empty(&self.m_payment_id).or_else(|| non_empty(&self.custom_str1))
    }

    pub fn amount_cents(&self) -> Option<i64> {
        non_empty(&self.amount_gross).and_then(parse_amount_cents)
    }

    /// `(user_id, plan)` when this ITN pays for a membership.
    pub fn subscription(&self) -> Option<(&str, PlanType)> {
        let plan = non_empty(&self.custom_str3)?.parse::<PlanType>().ok()?;
        let user_id = non_empty(&self.custom_str2)?;
        Some((user_id, plan))
    }

    pub fn dedupe_key(&self) -> String {
        let reference = non_empty(&self.pf_payment_id)
            .or_else(|| self.order_reference())
            .unwrap_or("-");
        format!("payfast:{}:{}", reference, self.status_str().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr.parse::<IpAddr>().ok()?, prefix.parse::<u8>().ok()?),
            None => {
                let addr = raw.parse::<IpAddr>().ok()?;
                let full = if addr.is_ipv4() { 32 } else { 128 };
                (addr, full)
            }
        };

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return None;
        }
        Some(Self { network: addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, normalize(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// IPv4-mapped IPv6 peers (dual-stack listeners) are compared as IPv4.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

#[derive(Debug, Clone, Default)]
pub struct IpAllowlist {
    ranges: Vec<Cidr>,
}

impl IpAllowlist {
    /// Builds the allowlist, skipping (and logging) ranges that do not parse.
    pub fn new<S: AsRef<str>>(ranges: &[S]) -> Self {
        let ranges = ranges
            .iter()
            .filter_map(|raw| {
                let parsed = Cidr::parse(raw.as_ref());
                if parsed.is_none() {
                    tracing::warn!(range = raw.as_ref(), "Ignoring unparseable CIDR range");
                }
                parsed
            })
            .collect();
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Address the ITN came from when it arrived through reverse proxies.
///
/// Each proxy appends the address it received from, so only the right end
/// of `X-Forwarded-For` is trustworthy. Hops are read right to left,
/// skipping `trusted_proxies`; the first other hop is the sender. With no
/// trusted proxies configured that is simply the rightmost hop. When
/// proxies are configured but the peer is not one of them the header is
/// ignored. An unparseable hop, or a chain of nothing but trusted proxies,
/// yields `None`.
pub fn forwarded_client(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted_proxies: &IpAllowlist,
) -> Option<IpAddr> {
    if !trusted_proxies.is_empty() && !peer.map_or(false, |ip| trusted_proxies.allows(ip)) {
        return peer;
    }

    let hops: Vec<&str> = forwarded_for
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    if hops.is_empty() {
        return peer;
    }

    for hop in hops.into_iter().rev() {
        let ip = hop.parse::<IpAddr>().ok()?;
        if !trusted_proxies.allows(ip) {
            return Some(ip);
        }
    }
    None
}
