//! Password and SASL messages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism implemented by [`ScramClient`].
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Write a PasswordMessage (cleartext or MD5-hashed).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password)
        .chain_update(user)
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{:x}", inner))
        .chain_update(salt)
        .finalize();
    format!("md5{:x}", outer)
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC key: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Attributes of a SCRAM server-first-message.
struct ServerFirst<'a> {
    nonce: &'a str,
    salt: Vec<u8>,
    iterations: u32,
}

impl<'a> ServerFirst<'a> {
    fn parse(message: &'a str) -> Result<Self> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in message.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = v.parse().ok(),
                _ => {}
            }
        }
        let missing = |what: &str| Error::Auth(format!("server-first-message without {what}"));
        Ok(Self {
            nonce: nonce.ok_or_else(|| missing("nonce"))?,
            salt: BASE64
                .decode(salt.ok_or_else(|| missing("salt"))?)
                .map_err(|e| Error::Auth(format!("invalid salt: {e}")))?,
            iterations: iterations.ok_or_else(|| missing("iteration count"))?,
        })
    }
}

/// Client side of SCRAM-SHA-256 without channel binding.
///
/// The username is left empty in the exchange; the server uses the one from
/// the StartupMessage.
pub struct ScramClient {
    password: String,
    nonce: String,
    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut raw = [0u8; 18];
        rand::rng().fill(&mut raw);
        Self::with_nonce(password, BASE64.encode(raw))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            password: password.to_string(),
            nonce,
            salted_password: None,
            auth_message: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// client-first-message, with the `n,,` GS2 header.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Consume server-first-message and produce client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let attrs = ServerFirst::parse(server_first)?;
        if !attrs.nonce.starts_with(&self.nonce) {
            return Err(Error::Auth("server nonce does not extend client nonce".into()));
        }

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &attrs.salt,
            attrs.iterations,
            &mut salted,
        );

        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let without_proof = format!("c={},r={}", BASE64.encode("n,,"), attrs.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );
        let signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.salted_password = Some(salted);
        self.auth_message = Some(auth_message);
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server signature in server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let (Some(salted), Some(auth_message)) = (&self.salted_password, &self.auth_message)
        else {
            return Err(Error::Auth("server-final-message before server-first-message".into()));
        };
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("server rejected SCRAM exchange: {err}")));
        }
        let received = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("malformed server-final-message".into()))
            .and_then(|v| {
                BASE64
                    .decode(v)
                    .map_err(|e| Error::Auth(format!("invalid server signature: {e}")))
            })?;

        let server_key = hmac(salted, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;
        if received.as_slice() != expected.as_slice() {
            return Err(Error::Auth("server signature mismatch".into()));
        }
        Ok(())
    }
}
