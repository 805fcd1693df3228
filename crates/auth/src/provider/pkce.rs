// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PKCE (RFC 7636) and URL helpers for the browser sign-in flow.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a PKCE code verifier (43-128 char URL-safe random string).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute code_challenge = base64url_nopad(sha256(verifier)).
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the hosted authorize URL for an OAuth provider.
pub fn build_authorize_url(
    base_url: &str,
    provider: &str,
    redirect_to: Option<&str>,
    code_challenge: &str,
    extra: &BTreeMap<String, String>,
) -> String {
    let mut url = format!(
        "{base_url}/auth/v1/authorize?provider={provider}\
         &code_challenge={code_challenge}\
         &code_challenge_method=s256",
        provider = urlencoding(provider),
        code_challenge = urlencoding(code_challenge),
    );
    if let Some(redirect) = redirect_to {
        url.push_str("&redirect_to=");
        url.push_str(&urlencoding(redirect));
    }
    for (key, value) in extra {
        url.push('&');
        url.push_str(&urlencoding(key));
        url.push('=');
        url.push_str(&urlencoding(value));
    }
    url
}

/// Parameters carried by a redirect URL, from both the query string and the
/// fragment. Fragment values win on conflict.
pub fn callback_params(url: &str) -> HashMap<String, String> {
    let (before_fragment, fragment) = match url.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (url, None),
    };
    let query = before_fragment.split_once('?').map(|(_, q)| q);

    let mut params = HashMap::new();
    for part in [query, fragment].into_iter().flatten() {
        for pair in part.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(percent_decode(key), percent_decode(value));
        }
    }
    params
}

/// Form-style encoding for URL query parameters (spaces as `+`).
pub fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "pkce_tests.rs"]
mod tests;
