use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use scrapepilot_core::error::AppError;
use url::{Host, Url};

/// Refuse navigation targets that point into private address space.
///
/// IP literals are checked as written; host names are resolved and every
/// returned address must be public.
pub async fn ensure_public_target(url: &Url) -> Result<(), AppError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "URL scheme '{}' is not allowed (only http/https)",
            url.scheme()
        )));
    }

    let host = match url.host() {
        Some(Host::Ipv4(v4)) => return check_literal(url, IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => return check_literal(url, IpAddr::V6(v6)),
        Some(Host::Domain(name)) => name,
        None => return Err(AppError::Validation("URL has no host".to_string())),
    };

    let port = url.port_or_known_default().unwrap_or(80);
    let resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::Navigation(format!("DNS resolution failed for {host}: {e}")))?
        .map(|addr| addr.ip())
        .collect::<Vec<_>>();

    if resolved.is_empty() {
        return Err(AppError::Navigation(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    match resolved.into_iter().find(|ip| is_private_ip(*ip)) {
        Some(ip) => Err(AppError::Validation(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {ip}"
        ))),
        None => Ok(()),
    }
}

fn check_literal(url: &Url, ip: IpAddr) -> Result<(), AppError> {
    if is_private_ip(ip) {
        return Err(AppError::Validation(format!(
            "SSRF blocked: {} is a private/reserved address",
            url.host_str().unwrap_or_default()
        )));
    }
    Ok(())
}

/// Loopback, RFC 1918, link-local, CGN, unique-local and other reserved ranges.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    let carrier_grade_nat = a == 100 && (64..128).contains(&b);

    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || v4.is_documentation()
        || carrier_grade_nat
}

fn is_private_v6(v6: Ipv6Addr) -> bool {
    if let Some(mapped) = v6.to_ipv4_mapped() {
        return is_private_v4(mapped);
    }
    let first = v6.segments()[0];
    let link_local = first & 0xffc0 == 0xfe80;
    let unique_local = first & 0xfe00 == 0xfc00;

    v6.is_loopback() || v6.is_unspecified() || link_local || unique_local
}
