use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::{
    hmac, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const HASH_SCHEME: &str = "pbkdf2-sha256";

/// Hashes a password as `pbkdf2-sha256$<iterations>$<salt>$<hash>` (base64 parts).
pub fn hash_password(password: &str) -> Result<String> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| anyhow!("Failed to generate salt"))?;

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| anyhow!("Invalid iterations"))?;
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{}${}${}${}",
        HASH_SCHEME,
        PBKDF2_ITERATIONS,
        general_purpose::STANDARD.encode(salt),
        general_purpose::STANDARD.encode(hash)
    ))
}

/// Constant-time check against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 4 || parts[0] != HASH_SCHEME {
        return false;
    }
    let Some(iterations) = parts[1].parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (
        general_purpose::STANDARD.decode(parts[2]),
        general_purpose::STANDARD.decode(parts[3]),
    ) else {
        return false;
    };
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires: i64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Link abgelaufen")]
    Expired,
    #[error("Ungültige Signatur")]
    Invalid,
}

/// HMAC-SHA256 signatures for time-limited document download links.
pub struct UrlSigner {
    key: hmac::Key,
    lifetime_secs: i64,
}

impl UrlSigner {
    pub fn new(secret: &str, lifetime_secs: i64) -> Self {
        UrlSigner {
            key: hmac::Key::new(hmac::HMAC_SHA256, format!("files:{}", secret).as_bytes()),
            lifetime_secs,
        }
    }

    fn message(path: &str, expires: i64) -> String {
        format!("{}\n{}", path, expires)
    }

    pub fn signature(&self, path: &str, expires: i64) -> String {
        let tag = hmac::sign(&self.key, Self::message(path, expires).as_bytes());
        general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    pub fn sign(&self, path: &str) -> SignedUrl {
        let expires = Utc::now().timestamp() + self.lifetime_secs;
        let signature = self.signature(path, expires);
        let url = format!(
            "/api/files/download?path={}&expires={}&signature={}",
            encode_query_value(path),
            expires,
            signature
        );
        SignedUrl { url, expires }
    }

    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> Result<(), SignatureError> {
        let tag = general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Invalid)?;
        hmac::verify(&self.key, Self::message(path, expires).as_bytes(), &tag)
            .map_err(|_| SignatureError::Invalid)?;
        if expires < Utc::now().timestamp() {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

fn encode_query_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks the HS256 session tokens handed out at login.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime_secs: i64,
}

impl SessionManager {
    pub fn new(secret: &str, lifetime_secs: i64) -> Self {
        SessionManager {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_secs,
        }
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    pub fn issue(&self, username: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: now + self.lifetime_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow!("Session token: {}", e))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| anyhow!("Ungültige Sitzung: {}", e))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("geheim").unwrap();
        assert!(hash.starts_with("pbkdf2-sha256$100000$"));
        assert!(verify_password("geheim", &hash));
        assert!(!verify_password("falsch", &hash));
        assert!(!verify_password("geheim", "klartext"));
    }

    #[test]
    fn signed_urls_expire_and_bind_the_path() {
        let signer = UrlSigner::new("s3cret", 60);
        let signed = signer.sign("rechnungen/eingang/2024-01/ab12-a.pdf");
        assert!(signed.url.starts_with("/api/files/download?path=rechnungen/eingang/"));

        let sig = signer.signature("a.pdf", signed.expires);
        assert_eq!(signer.verify("a.pdf", signed.expires, &sig), Ok(()));
        assert_eq!(
            signer.verify("b.pdf", signed.expires, &sig),
            Err(SignatureError::Invalid)
        );

        let past = Utc::now().timestamp() - 10;
        let old = signer.signature("a.pdf", past);
        assert_eq!(signer.verify("a.pdf", past, &old), Err(SignatureError::Expired));
        assert_eq!(signer.verify("a.pdf", past, "%%%"), Err(SignatureError::Invalid));
    }

    #[test]
    fn session_tokens_verify_with_the_same_secret_only() {
        let sessions = SessionManager::new("one", 3600);
        let token = sessions.issue("admin").unwrap();
        assert_eq!(sessions.verify(&token).unwrap().sub, "admin");
        assert!(SessionManager::new("two", 3600).verify(&token).is_err());

        let expired = SessionManager::new("one", -3600).issue("admin").unwrap();
        assert!(sessions.verify(&expired).is_err());
    }

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(encode_query_value("a b/ä.pdf"), "a%20b/%C3%A4.pdf");
    }
}
