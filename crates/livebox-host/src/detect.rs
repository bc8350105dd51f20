//! Readiness detection from process output.
//!
//! Dev servers announce themselves with a line such as
//! `  ➜  Local:   http://localhost:5173/`, usually colored. The first
//! loopback URL with an explicit port is taken as the server address.

use livebox_core::ServerAddress;

const ESC: char = '\u{1b}';
const BEL: char = '\u{7}';

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Hosts that mean "this machine".
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];

/// Remove ANSI escape sequences (CSI and OSC) from a line.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c != ESC {
            out.push(c);
            continue;
        }
        match chars.next() {
            // CSI: parameters and intermediates, then one final byte in '@'..='~'.
            Some('[') => {
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: terminated by BEL or ESC '\'.
            Some(']') => {
                while let Some(c) = chars.next() {
                    if c == BEL {
                        break;
                    }
                    if c == ESC && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-character escape.
            Some(_) | None => {}
        }
    }
    out
}

/// Find the first loopback server URL in a line of output.
///
/// `0.0.0.0` is reported as `localhost`, since it is not loadable itself.
pub fn detect_address(line: &str) -> Option<ServerAddress> {
    let clean = strip_ansi(line);
    let mut found: Option<(usize, ServerAddress)> = None;

    for scheme in SCHEMES {
        for (start, _) in clean.match_indices(scheme) {
            if let Some(address) = parse_url(scheme, &clean[start + scheme.len()..]) {
                if found.as_ref().map_or(true, |(at, _)| start < *at) {
                    found = Some((start, address));
                }
                break;
            }
        }
    }
    found.map(|(_, address)| address)
}

fn parse_url(scheme: &str, rest: &str) -> Option<ServerAddress> {
    let end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | ')'))
        .unwrap_or(rest.len());
    let token = rest[..end].trim_end_matches(|c: char| matches!(c, '.' | ',' | ';'));

    let (host, after_host) = token.split_once(':')?;
    if !LOOPBACK_HOSTS.contains(&host) {
        return None;
    }

    let digits = after_host
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_host.len());
    let port: u16 = after_host[..digits].parse().ok()?;
    if port == 0 {
        return None;
    }
    let path = &after_host[digits..];
    if !path.is_empty() && !path.starts_with('/') {
        return None;
    }

    let host = if host == "0.0.0.0" { "localhost" } else { host };
    Some(ServerAddress::new(
        port,
        format!("{scheme}{host}:{port}{path}"),
    ))
}
