use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;

/// Name of the session-affinity cookie.
pub const STICKY_COOKIE: &str = "_backend";

const NONCE_LEN: usize = 24;

/// Seals and opens backend addresses inside authenticated encrypted
/// cookies, keyed by a process-wide 32-byte secret.
///
/// Wire format: `base64(nonce || secretbox(addr))` with a 24-byte random
/// nonce. Opening fails closed: any malformed, truncated, or foreign-key
/// value yields `None` and the caller falls back to a fresh backend pick,
/// which makes key rotation a safe operation.
pub struct StickyCodec {
    cipher: XSalsa20Poly1305,
}

impl StickyCodec {
    pub fn new(key: &[u8; 32]) -> Self {
        StickyCodec { cipher: XSalsa20Poly1305::new(key.into()) }
    }

    /// Encrypts `addr` under a fresh nonce and returns the cookie value.
    pub fn seal(&self, addr: &str) -> Option<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), addr.as_bytes())
            .ok()?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Some(BASE64.encode(out))
    }

    /// Decrypts a cookie value back into a backend address.
    pub fn open(&self, value: &str) -> Option<String> {
        let data = BASE64.decode(value).ok()?;
        if data.len() < NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self.cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()?;
        String::from_utf8(plain).ok()
    }

    /// Renders a `Set-Cookie` directive pinning `addr` for path `/`.
    pub fn set_cookie(&self, addr: &str) -> Option<String> {
        let value = self.seal(addr)?;
        Some(format!("{STICKY_COOKIE}={value}; Path=/"))
    }
}
