//! Hash and cipher primitives used by NTLM.

use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

type HmacMd5 = Hmac<Md5>;

/// HMAC-MD5 over the concatenation of `parts`.
pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// MD5 over the concatenation of `parts`.
pub fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn md4(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(data));
    out
}

/// UTF-16LE bytes of `s`, without terminator.
pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// One direction's RC4 keystream.
///
/// State carries over between messages; it is never rekeyed.
pub struct Rc4Stream {
    cipher: Rc4<U16>,
}

impl Rc4Stream {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Rc4::new(key.into()),
        }
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

impl std::fmt::Debug for Rc4Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rc4Stream { .. }")
    }
}

/// Encrypts `data` with a fresh RC4 key.
pub fn rc4_once(key: &[u8; 16], data: &mut [u8]) {
    Rc4Stream::new(key).apply(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nt_hash_of_password() {
        assert_eq!(
            hex::encode(md4(&utf16le("Password"))),
            "a4f49c406510bdcab6824ee7c30fd852"
        );
    }

    #[test]
    fn test_hmac_md5_rfc2202() {
        let key = [0x0b; 16];
        assert_eq!(
            hex::encode(hmac_md5(&key, &[b"Hi There"])),
            "9294727a3638bb1c13f48ef8158bfc9d"
        );
        // split input hashes the same as joined input
        assert_eq!(hmac_md5(&key, &[b"Hi ", b"There"]), hmac_md5(&key, &[b"Hi There"]));
    }

    #[test]
    fn test_hmac_md5_key_longer_than_block() {
        // RFC 2202 case 6: the key is hashed first
        let key = [0xaa; 80];
        assert_eq!(
            hex::encode(hmac_md5(
                &key,
                &[b"Test Using Larger Than Block-Size Key - Hash Key First"]
            )),
            "6b1ab7fe4bd7bf8f0b62e6ce61b9d0cd"
        );
    }

    #[test]
    fn test_md5_empty() {
        assert_eq!(hex::encode(md5(&[])), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_rc4_stream_continues_across_calls() {
        let key = [7u8; 16];
        let mut whole = [0u8; 32];
        rc4_once(&key, &mut whole);

        let mut stream = Rc4Stream::new(&key);
        let mut first = [0u8; 10];
        let mut second = [0u8; 22];
        stream.apply(&mut first);
        stream.apply(&mut second);
        assert_eq!(&whole[..10], &first);
        assert_eq!(&whole[10..], &second);
    }
}
