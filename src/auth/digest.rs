//! HTTP Digest authentication (RFC 7616, SHA-256, `qop=auth`)
//!
//! Nonces are stateless: a timestamp plus a keyed hash of it, so nothing is
//! kept per client and an expired nonce is answered with `stale=true`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::auth::store::CredentialStore;

/// Realm the relay challenges with unless configured otherwise
pub const DEFAULT_REALM: &str = "lcy-gsteramer-camera";

/// How long an issued nonce is accepted
pub const NONCE_LIFETIME: Duration = Duration::from_secs(300);

const ALGORITHM: &str = "SHA-256";

/// Why a request was not authenticated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("no credentials")]
    Missing,

    #[error("malformed authorization header: {0}")]
    Malformed(&'static str),

    #[error("nonce was not issued here")]
    BadNonce,

    #[error("nonce expired")]
    Stale,

    #[error("unknown user `{0}`")]
    UnknownUser(String),

    #[error("account `{0}` is disabled")]
    Inactive(String),

    #[error("wrong password for `{0}`")]
    BadResponse(String),
}

impl Denied {
    pub fn is_stale(&self) -> bool {
        matches!(self, Denied::Stale)
    }
}

/// Parameters of a `Digest` authorization header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DigestParams {
    username: String,
    realm: String,
    nonce: String,
    uri: String,
    response: String,
    qop: Option<String>,
    nc: Option<String>,
    cnonce: Option<String>,
    algorithm: Option<String>,
}

impl DigestParams {
    fn parse(header: &str) -> Result<Self, Denied> {
        let header = header.trim_start();
        let (scheme, rest) = header
            .split_once(char::is_whitespace)
            .ok_or(Denied::Malformed("missing parameters"))?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(Denied::Malformed("not a digest header"));
        }

        let mut fields = parse_fields(rest).ok_or(Denied::Malformed("bad parameter list"))?;
        let mut take = |name: &str| fields.remove(name);
        let missing = || Denied::Malformed("required parameter missing");

        Ok(Self {
            username: take("username").ok_or_else(missing)?,
            realm: take("realm").ok_or_else(missing)?,
            nonce: take("nonce").ok_or_else(missing)?,
            uri: take("uri").ok_or_else(missing)?,
            response: take("response").ok_or_else(missing)?,
            qop: take("qop"),
            nc: take("nc"),
            cnonce: take("cnonce"),
            algorithm: take("algorithm"),
        })
    }
}

/// Split `key=value, key="quoted, value"` into lowercase keys and values
fn parse_fields(input: &str) -> Option<HashMap<String, String>> {
    let mut fields = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            return Some(fields);
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return None;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return None;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        fields.insert(key.trim().to_ascii_lowercase(), value);
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Expected `response` for the given request and password
pub(crate) fn expected_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
    qop: Option<(&str, &str)>,
) -> String {
    let ha1 = sha256_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = sha256_hex(&format!("{}:{}", method, uri));
    match qop {
        Some((nc, cnonce)) => sha256_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, nonce, nc, cnonce, ha2
        )),
        None => sha256_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}

/// Digest challenge/verify for one realm
pub struct DigestAuth {
    realm: String,
    store: Arc<dyn CredentialStore>,
    secret: [u8; 32],
    nonce_lifetime: Duration,
}

impl DigestAuth {
    pub fn new(realm: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            realm: realm.into(),
            store,
            secret: rand::random(),
            nonce_lifetime: NONCE_LIFETIME,
        }
    }

    pub fn nonce_lifetime(mut self, lifetime: Duration) -> Self {
        self.nonce_lifetime = lifetime;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// `WWW-Authenticate` value carrying a fresh nonce
    pub fn challenge(&self, stale: bool) -> String {
        let mut value = format!(
            "Digest realm=\"{}\", qop=\"auth\", algorithm={}, nonce=\"{}\"",
            self.realm,
            ALGORITHM,
            self.nonce_at(chrono::Utc::now().timestamp())
        );
        if stale {
            value.push_str(", stale=true");
        }
        value
    }

    /// Check an `Authorization` header; returns the authenticated user name
    pub fn verify(
        &self,
        method: &str,
        uri: &str,
        authorization: Option<&str>,
    ) -> Result<String, Denied> {
        self.verify_at(method, uri, authorization, chrono::Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        method: &str,
        uri: &str,
        authorization: Option<&str>,
        now: i64,
    ) -> Result<String, Denied> {
        let params = DigestParams::parse(authorization.ok_or(Denied::Missing)?)?;

        if let Some(algorithm) = &params.algorithm {
            if !algorithm.eq_ignore_ascii_case(ALGORITHM) {
                return Err(Denied::Malformed("unsupported algorithm"));
            }
        }
        if params.realm != self.realm {
            return Err(Denied::Malformed("realm mismatch"));
        }
        if params.uri != uri {
            return Err(Denied::Malformed("uri mismatch"));
        }
        let qop = match params.qop.as_deref() {
            None => None,
            Some("auth") => match (&params.nc, &params.cnonce) {
                (Some(nc), Some(cnonce)) => Some((nc.as_str(), cnonce.as_str())),
                _ => return Err(Denied::Malformed("qop without nc/cnonce")),
            },
            Some(_) => return Err(Denied::Malformed("unsupported qop")),
        };

        self.check_nonce(&params.nonce, now)?;

        let credential = self
            .store
            .lookup(&params.username, &self.realm)
            .ok_or_else(|| Denied::UnknownUser(params.username.clone()))?;
        if !credential.active {
            return Err(Denied::Inactive(params.username));
        }

        let expected = expected_response(
            &params.username,
            &self.realm,
            &credential.password,
            method,
            uri,
            &params.nonce,
            qop,
        );
        if !constant_time_eq(&expected, &params.response.to_ascii_lowercase()) {
            return Err(Denied::BadResponse(params.username));
        }

        Ok(params.username)
    }

    fn nonce_at(&self, issued: i64) -> String {
        format!("{:016x}{}", issued, self.nonce_mac(issued))
    }

    fn nonce_mac(&self, issued: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(issued.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    fn check_nonce(&self, nonce: &str, now: i64) -> Result<(), Denied> {
        if nonce.len() != 16 + 64 || !nonce.is_char_boundary(16) {
            return Err(Denied::BadNonce);
        }
        let (stamp, mac) = nonce.split_at(16);
        let issued = u64::from_str_radix(stamp, 16).map_err(|_| Denied::BadNonce)? as i64;
        if !constant_time_eq(mac, &self.nonce_mac(issued)) {
            return Err(Denied::BadNonce);
        }

        let age = now.saturating_sub(issued);
        if age < 0 || age as u64 > self.nonce_lifetime.as_secs() {
            return Err(Denied::Stale);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DigestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestAuth")
            .field("realm", &self.realm)
            .field("nonce_lifetime", &self.nonce_lifetime)
            .finish_non_exhaustive()
    }
}
