//! NTLM authentication (MS-NLMP, NTLMv2 responses)
//!
//! Three-leg handshake carried in `Authorization` / `WWW-Authenticate`:
//! 1. client sends a Type 1 (negotiate) message
//! 2. server answers `401` with a Type 2 (challenge) message
//! 3. client resends the request with a Type 3 (authenticate) message
//!
//! NTLM authenticates the connection, not the request, so the client building
//! this middleware pins itself to HTTP/1.1.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use tracing::{debug, warn};

use crate::headers::sensitive_value;
use crate::{ChallengeOutcome, Middleware, MiddlewareError, Result, find_challenge, unix_now};

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY;

/// NTProofStr (16) + blob header (28) + trailer (4) around the target info.
const NTLMV2_RESPONSE_OVERHEAD: usize = 48;

/// Seconds between 1601-01-01 (Windows FILETIME epoch) and 1970-01-01.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Decoded Type 2 (challenge) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Message {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Type2Message {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 || &bytes[..8] != SIGNATURE {
            return Err(MiddlewareError::Challenge("not an NTLM message".into()));
        }
        if read_u32(bytes, 8) != 2 {
            return Err(MiddlewareError::Challenge(format!(
                "expected NTLM type 2 message, got type {}",
                read_u32(bytes, 8)
            )));
        }

        let flags = read_u32(bytes, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        let target_info = if bytes.len() >= 48 {
            let len = read_u16(bytes, 40) as usize;
            let offset = read_u32(bytes, 44) as usize;
            offset
                .checked_add(len)
                .and_then(|end| bytes.get(offset..end))
                .ok_or_else(|| MiddlewareError::Challenge("NTLM target info out of bounds".into()))?
                .to_vec()
        } else {
            Vec::new()
        };
        // The NTLMv2 response embeds the target info in a 16-bit security buffer.
        if target_info.len() + NTLMV2_RESPONSE_OVERHEAD > u16::MAX as usize {
            return Err(MiddlewareError::Challenge(format!(
                "NTLM target info too large ({} bytes)",
                target_info.len()
            )));
        }

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }
}

/// Type 1 (negotiate) message with no domain or workstation supplied.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    // Empty domain and workstation security buffers
    for _ in 0..2 {
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&32u32.to_le_bytes());
    }
    msg
}

/// NT one-way function v1: MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// NT one-way function v2: HMAC-MD5 keyed by the NT hash over UPPER(user) + domain.
pub fn ntowf_v2(username: &str, domain: &str, password: &str) -> [u8; 16] {
    let identity = format!("{}{domain}", username.to_uppercase());
    hmac_md5(&nt_hash(password), &[&utf16le(&identity)])
}

/// LMv2 response: HMAC-MD5(server challenge + client challenge) + client challenge.
pub fn lmv2_response(ntowf: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> Vec<u8> {
    let mut out = hmac_md5(ntowf, &[server_challenge, client_challenge]).to_vec();
    out.extend_from_slice(client_challenge);
    out
}

/// NTLMv2 response: NTProofStr followed by the client blob.
///
/// `timestamp` is a Windows FILETIME (100ns ticks since 1601).
pub fn ntlmv2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0; 4]);

    let proof = hmac_md5(ntowf, &[server_challenge, &blob]);
    let mut out = proof.to_vec();
    out.extend_from_slice(&blob);
    out
}

/// NTLM credentials and any pending server challenge.
pub struct NtlmAuth {
    domain: String,
    username: String,
    password: Secret<String>,
    workstation: String,
    pending: Mutex<Option<Type2Message>>,
}

impl NtlmAuth {
    /// `username` may be `DOMAIN\user`; the domain part is split off.
    pub fn new(username: &str, password: Secret<String>) -> Self {
        let (domain, user) = match username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), username.to_string()),
        };
        Self {
            domain,
            username: user,
            password,
            workstation: String::new(),
            pending: Mutex::new(None),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Build a Type 3 message answering `challenge`.
    ///
    /// Fails when any field does not fit a 16-bit security buffer.
    pub fn authenticate_message(
        &self,
        challenge: &Type2Message,
        client_challenge: &[u8; 8],
        timestamp: u64,
    ) -> Result<Vec<u8>> {
        let ntowf = ntowf_v2(&self.username, &self.domain, self.password.expose_str());
        let lm = lmv2_response(&ntowf, &challenge.server_challenge, client_challenge);
        let nt = ntlmv2_response(
            &ntowf,
            &challenge.server_challenge,
            client_challenge,
            timestamp,
            &challenge.target_info,
        );
        let domain = utf16le(&self.domain);
        let user = utf16le(&self.username);
        let workstation = utf16le(&self.workstation);
        let session_key: Vec<u8> = Vec::new();

        // Security buffers in header order; payload follows in the same order.
        let fields: [&[u8]; 6] = [&lm, &nt, &domain, &user, &workstation, &session_key];

        let mut msg = Vec::with_capacity(64 + fields.iter().map(|f| f.len()).sum::<usize>());
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&3u32.to_le_bytes());
        let mut offset = 64u32;
        for field in fields {
            let len = u16::try_from(field.len()).map_err(|_| {
                MiddlewareError::Challenge(format!("NTLM field too long ({} bytes)", field.len()))
            })?;
            msg.extend_from_slice(&len.to_le_bytes());
            msg.extend_from_slice(&len.to_le_bytes());
            msg.extend_from_slice(&offset.to_le_bytes());
            offset += field.len() as u32;
        }
        let flags = (challenge.flags & !NEGOTIATE_OEM) | NEGOTIATE_UNICODE;
        msg.extend_from_slice(&flags.to_le_bytes());
        for field in fields {
            msg.extend_from_slice(field);
        }
        Ok(msg)
    }

    fn authorize(&self, request: &mut reqwest::Request) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| MiddlewareError::Challenge("ntlm state lock poisoned".into()))?
            .take();

        let message = match pending {
            Some(challenge) => {
                let mut client_challenge = [0u8; 8];
                rand::rng().fill(&mut client_challenge);
                let timestamp = (unix_now() + FILETIME_EPOCH_OFFSET) * 10_000_000;
                self.authenticate_message(&challenge, &client_challenge, timestamp)?
            }
            None => negotiate_message(),
        };

        let value = format!("NTLM {}", STANDARD.encode(message));
        let header = sensitive_value("authorization", &value)?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(())
    }

    fn accept_challenge(&self, headers: &HeaderMap) -> Result<ChallengeOutcome> {
        let token = match find_challenge(headers, "NTLM") {
            Some(token) if !token.is_empty() => token,
            Some(_) => {
                warn!(username = %self.username, domain = %self.domain, "ntlm credentials rejected");
                return Ok(ChallengeOutcome::Ignore);
            }
            None => return Ok(ChallengeOutcome::Ignore),
        };

        let bytes = STANDARD
            .decode(token)
            .map_err(|e| MiddlewareError::Challenge(format!("invalid NTLM challenge encoding: {e}")))?;
        let challenge = Type2Message::parse(&bytes)?;
        debug!(flags = challenge.flags, "received ntlm challenge");

        *self
            .pending
            .lock()
            .map_err(|_| MiddlewareError::Challenge("ntlm state lock poisoned".into()))? =
            Some(challenge);
        Ok(ChallengeOutcome::Retry)
    }
}

impl Middleware for NtlmAuth {
    fn id(&self) -> &str {
        "ntlm"
    }

    fn prepare_request<'a>(
        &'a self,
        request: &'a mut reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = self.authorize(request);
        Box::pin(async move { result })
    }

    fn handle_challenge<'a>(
        &'a self,
        _status: StatusCode,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<ChallengeOutcome>> + Send + 'a>> {
        let result = self.accept_challenge(headers);
        Box::pin(async move { result })
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "scheme": "ntlm",
            "domain": self.domain,
            "username": self.username,
        })
    }
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    // HMAC accepts keys of any length.
    let mut mac = HmacMd5::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex;
    use reqwest::header::{HeaderValue, WWW_AUTHENTICATE};

    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];

    /// AV pairs from MS-NLMP 4.2.4: NbDomainName "Domain", NbComputerName "Server", EOL.
    fn target_info() -> Vec<u8> {
        let mut info = Vec::new();
        for (id, value) in [(2u16, "Domain"), (1u16, "Server")] {
            let encoded = utf16le(value);
            info.extend_from_slice(&id.to_le_bytes());
            info.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
            info.extend_from_slice(&encoded);
        }
        info.extend_from_slice(&[0, 0, 0, 0]);
        info
    }

    fn type2_message(target_info: &[u8]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        // Empty target name buffer
        msg.extend_from_slice(&[0, 0, 0, 0]);
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(&0x0088_8205u32.to_le_bytes());
        msg.extend_from_slice(&SERVER_CHALLENGE);
        msg.extend_from_slice(&[0; 8]);
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(target_info);
        msg
    }

    #[test]
    fn nt_hash_matches_reference() {
        assert_eq!(hex(&nt_hash("Password")), "a4f49c406510bdcab6824ee7c30fd852");
    }

    #[test]
    fn ntowf_v2_matches_reference() {
        assert_eq!(
            hex(&ntowf_v2("User", "Domain", "Password")),
            "0c868a403bfd7a93a3001ef22ef02e3f"
        );
    }

    #[test]
    fn lmv2_response_matches_reference() {
        let ntowf = ntowf_v2("User", "Domain", "Password");
        let response = lmv2_response(&ntowf, &SERVER_CHALLENGE, &CLIENT_CHALLENGE);
        assert_eq!(
            hex(&response),
            "86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn ntlmv2_proof_matches_reference() {
        let ntowf = ntowf_v2("User", "Domain", "Password");
        let response =
            ntlmv2_response(&ntowf, &SERVER_CHALLENGE, &CLIENT_CHALLENGE, 0, &target_info());
        assert_eq!(hex(&response[..16]), "68cd0ab851e51c96aabc927bebef6a1c");
        // Blob header follows the proof
        assert_eq!(&response[16..18], &[0x01, 0x01]);
    }

    #[test]
    fn negotiate_message_layout() {
        let msg = negotiate_message();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(read_u32(&msg, 8), 1);
        assert_eq!(read_u32(&msg, 12), NEGOTIATE_FLAGS);
    }

    #[test]
    fn parses_type2_message() {
        let info = target_info();
        let parsed = Type2Message::parse(&type2_message(&info)).unwrap();
        assert_eq!(parsed.server_challenge, SERVER_CHALLENGE);
        assert_eq!(parsed.flags, 0x0088_8205);
        assert_eq!(parsed.target_info, info);
    }

    #[test]
    fn rejects_wrong_message_type() {
        assert!(Type2Message::parse(&negotiate_message()).is_err());
        assert!(Type2Message::parse(b"short").is_err());
    }

    #[test]
    fn rejects_oversized_target_info() {
        let info = vec![0u8; u16::MAX as usize - NTLMV2_RESPONSE_OVERHEAD + 1];
        let err = Type2Message::parse(&type2_message(&info)).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");

        let fits = vec![0u8; u16::MAX as usize - NTLMV2_RESPONSE_OVERHEAD];
        assert!(Type2Message::parse(&type2_message(&fits)).is_ok());
    }

    #[test]
    fn overlong_username_fails_authenticate_message() {
        let auth = NtlmAuth::new(&"u".repeat(40_000), Secret::from("Password"));
        let challenge = Type2Message::parse(&type2_message(&target_info())).unwrap();
        let err = auth
            .authenticate_message(&challenge, &CLIENT_CHALLENGE, 0)
            .unwrap_err();
        assert!(matches!(err, MiddlewareError::Challenge(_)));
    }

    #[test]
    fn splits_domain_from_username() {
        let auth = NtlmAuth::new("CORP\\alice", Secret::from("pw"));
        assert_eq!(auth.domain(), "CORP");
        assert_eq!(auth.username(), "alice");

        let plain = NtlmAuth::new("bob", Secret::from("pw"));
        assert_eq!(plain.domain(), "");
        assert_eq!(plain.username(), "bob");
    }

    #[test]
    fn authenticate_message_layout() {
        let auth = NtlmAuth::new("Domain\\User", Secret::from("Password"));
        let challenge = Type2Message::parse(&type2_message(&target_info())).unwrap();
        let msg = auth.authenticate_message(&challenge, &CLIENT_CHALLENGE, 0).unwrap();

        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(read_u32(&msg, 8), 3);

        // LM buffer is the first payload entry at offset 64
        let lm_len = read_u16(&msg, 12) as usize;
        let lm_offset = read_u32(&msg, 16) as usize;
        assert_eq!(lm_offset, 64);
        assert_eq!(
            hex(&msg[lm_offset..lm_offset + lm_len]),
            "86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"
        );

        // NT buffer begins with the reference NTProofStr
        let nt_offset = read_u32(&msg, 24) as usize;
        assert_eq!(hex(&msg[nt_offset..nt_offset + 16]), "68cd0ab851e51c96aabc927bebef6a1c");

        // User buffer holds UTF-16LE "User"
        let user_len = read_u16(&msg, 36) as usize;
        let user_offset = read_u32(&msg, 40) as usize;
        assert_eq!(&msg[user_offset..user_offset + user_len], utf16le("User").as_slice());
    }

    #[tokio::test]
    async fn handshake_sends_negotiate_then_authenticate() {
        let auth = NtlmAuth::new("Domain\\User", Secret::from("Password"));
        let url: reqwest::Url = "http://intranet.example.com/api".parse().unwrap();

        let mut first = reqwest::Request::new(reqwest::Method::GET, url.clone());
        auth.prepare_request(&mut first).await.unwrap();
        let value = first.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        let decoded = STANDARD.decode(value.strip_prefix("NTLM ").unwrap()).unwrap();
        assert_eq!(read_u32(&decoded, 8), 1);

        let mut headers = HeaderMap::new();
        let type2 = STANDARD.encode(type2_message(&target_info()));
        headers.insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_str(&format!("NTLM {type2}")).unwrap(),
        );
        let outcome = auth
            .handle_challenge(StatusCode::UNAUTHORIZED, &headers)
            .await
            .unwrap();
        assert_eq!(outcome, ChallengeOutcome::Retry);

        let mut second = reqwest::Request::new(reqwest::Method::GET, url);
        auth.prepare_request(&mut second).await.unwrap();
        let value = second.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        let decoded = STANDARD.decode(value.strip_prefix("NTLM ").unwrap()).unwrap();
        assert_eq!(read_u32(&decoded, 8), 3);
    }

    #[tokio::test]
    async fn bare_ntlm_challenge_means_rejected() {
        let auth = NtlmAuth::new("User", Secret::from("wrong"));
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("NTLM"));
        let outcome = auth
            .handle_challenge(StatusCode::UNAUTHORIZED, &headers)
            .await
            .unwrap();
        assert_eq!(outcome, ChallengeOutcome::Ignore);
    }
}
