use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::verification::{PiiFields, SubjectPii},
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Derive the PII key for one key version from a 32-byte master secret.
pub fn derive_pii_key(master_key: &[u8], version: u8) -> AppResult<[u8; 32]> {
    if master_key.len() != 32 {
        return Err(AppError::Configuration("PII master key must be exactly 32 bytes".into()));
    }

    let hk = Hkdf::<Sha256>::new(None, master_key);
    let info = format!("kyc-vault-pii-v{version}");
    let mut key = [0u8; 32];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|_| AppError::Configuration("Failed to derive PII key".into()))?;

    Ok(key)
}

fn decode_master_key(hex_key: &str) -> AppResult<Vec<u8>> {
    let trimmed = hex_key.trim();
    if trimmed.is_empty() {
        return Err(AppError::Configuration("PII encryption key is not configured".into()));
    }
    hex::decode(trimmed)
        .map_err(|_| AppError::Configuration("PII encryption key must be hex-encoded".into()))
}

/// Symmetric PII cipher keyed by one server-held secret.
///
/// The same key serves every tenant and every record, so a leaked key exposes
/// all PII at once. Ciphertexts carry the key version in their first byte:
/// `[version][nonce: 12][ciphertext || tag: 16]`. Encryption always uses the
/// current version; decryption looks the version up, so retired keys stay
/// readable during a rotation.
pub struct PiiCipher {
    current: u8,
    keys: HashMap<u8, [u8; 32]>,
}

impl PiiCipher {
    /// `retired` is a comma-separated list of `version:hex` pairs.
    pub fn new(master_key_hex: &str, version: u8, retired: Option<&str>) -> AppResult<Self> {
        let mut keys = HashMap::new();
        let master = decode_master_key(master_key_hex)?;
        keys.insert(version, derive_pii_key(&master, version)?);

        for pair in retired.unwrap_or("").split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (v, hex_key) = pair
                .split_once(':')
                .ok_or_else(|| AppError::Configuration(format!("Malformed retired key entry: {pair}")))?;
            let v: u8 = v
                .parse()
                .map_err(|_| AppError::Configuration(format!("Malformed key version: {v}")))?;
            if v == version {
                return Err(AppError::Configuration(format!("Key version {v} is both current and retired")));
            }
            let master = decode_master_key(hex_key)?;
            keys.insert(v, derive_pii_key(&master, v)?);
        }

        Ok(Self { current: version, keys })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            &config.pii_encryption_key,
            config.pii_key_version,
            config.pii_retired_keys.as_deref(),
        )
    }

    pub fn current_version(&self) -> u8 {
        self.current
    }

    fn cipher(&self, version: u8) -> Option<Aes256Gcm> {
        self.keys
            .get(&version)
            .and_then(|k| Aes256Gcm::new_from_slice(k).ok())
    }

    pub fn encrypt(&self, plaintext: &str) -> AppResult<Vec<u8>> {
        let cipher = self
            .cipher(self.current)
            .ok_or_else(|| AppError::Configuration("No PII key for current version".into()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| AppError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.push(self.current);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> AppResult<String> {
        if ciphertext.len() < HEADER_LEN + TAG_LEN {
            return Err(AppError::Decryption("ciphertext too short".into()));
        }
        let version = ciphertext[0];
        let cipher = self
            .cipher(version)
            .ok_or_else(|| AppError::Decryption(format!("unknown key version {version}")))?;
        let nonce = Nonce::from_slice(&ciphertext[1..HEADER_LEN]);

        let plain = cipher
            .decrypt(nonce, &ciphertext[HEADER_LEN..])
            .map_err(|_| AppError::Decryption("authentication failed (wrong key or tampered data)".into()))?;

        String::from_utf8(plain).map_err(|_| AppError::Decryption("plaintext is not UTF-8".into()))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> AppResult<Option<Vec<u8>>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_opt(&self, ciphertext: Option<&[u8]>) -> AppResult<Option<String>> {
        ciphertext.map(|c| self.decrypt(c)).transpose()
    }

    /// Field-by-field encryption of a subject's PII; absent optional fields stay absent.
    pub fn encrypt_fields(&self, verification_id: Uuid, fields: &PiiFields) -> AppResult<SubjectPii> {
        Ok(SubjectPii {
            verification_id,
            full_name: self.encrypt(&fields.full_name)?,
            dob: self.encrypt(&fields.dob)?,
            id_number: self.encrypt(&fields.id_number)?,
            address: self.encrypt_opt(fields.address.as_deref())?,
            phone: self.encrypt_opt(fields.phone.as_deref())?,
        })
    }

    pub fn decrypt_fields(&self, row: &SubjectPii) -> AppResult<PiiFields> {
        Ok(PiiFields {
            full_name: self.decrypt(&row.full_name)?,
            dob: self.decrypt(&row.dob)?,
            id_number: self.decrypt(&row.id_number)?,
            address: self.decrypt_opt(row.address.as_deref())?,
            phone: self.decrypt_opt(row.phone.as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[test]
    fn test_derive_pii_key() {
        let master = [0u8; 32];
        let v1 = derive_pii_key(&master, 1).unwrap();
        let v2 = derive_pii_key(&master, 2).unwrap();

        assert_eq!(v1, derive_pii_key(&master, 1).unwrap());
        assert_ne!(v1, v2);
        assert!(derive_pii_key(&[0u8; 16], 1).is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = PiiCipher::new(&key(42), 1, None).unwrap();
        for s in ["Abebe Kebede", "", "1992-03-15", "ዓለም 🌍"] {
            let a = cipher.encrypt(s).unwrap();
            let b = cipher.encrypt(s).unwrap();
            assert_ne!(a, b, "nonce must differ between calls");
            if !s.is_empty() {
                assert!(!a.windows(s.len()).any(|w| w == s.as_bytes()));
            }
            assert_eq!(cipher.decrypt(&a).unwrap(), s);
            assert_eq!(cipher.decrypt(&b).unwrap(), s);
        }
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let cipher = PiiCipher::new(&key(42), 1, None).unwrap();
        let other = PiiCipher::new(&key(99), 1, None).unwrap();
        let ct = cipher.encrypt("Secret message").unwrap();

        assert!(matches!(other.decrypt(&ct), Err(AppError::Decryption(_))));
    }

    #[test]
    fn test_decrypt_with_tampered_data() {
        let cipher = PiiCipher::new(&key(42), 1, None).unwrap();
        let mut ct = cipher.encrypt("Original data").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 1;

        assert!(matches!(cipher.decrypt(&ct), Err(AppError::Decryption(_))));
        assert!(matches!(cipher.decrypt(&[1, 2, 3]), Err(AppError::Decryption(_))));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        assert!(matches!(PiiCipher::new("", 1, None), Err(AppError::Configuration(_))));
        assert!(matches!(PiiCipher::new("zz", 1, None), Err(AppError::Configuration(_))));
    }

    #[test]
    fn retired_keys_still_decrypt() {
        let old = PiiCipher::new(&key(1), 1, None).unwrap();
        let ct = old.encrypt("0911 000 000").unwrap();

        let rotated = PiiCipher::new(&key(2), 2, Some(&format!("1:{}", key(1)))).unwrap();
        assert_eq!(rotated.decrypt(&ct).unwrap(), "0911 000 000");
        assert_eq!(rotated.encrypt("x").unwrap()[0], 2);
    }

    #[test]
    fn batch_passes_absent_fields_through() {
        let cipher = PiiCipher::new(&key(7), 1, None).unwrap();
        let fields = PiiFields {
            full_name: "Selam Tesfaye".into(),
            dob: "1995-06-21".into(),
            id_number: "987654321".into(),
            address: None,
            phone: Some("+251 911 000000".into()),
        };
        let row = cipher.encrypt_fields(Uuid::new_v4(), &fields).unwrap();
        assert!(row.address.is_none());
        assert_ne!(row.full_name, fields.full_name.as_bytes());
        assert_eq!(cipher.decrypt_fields(&row).unwrap(), fields);
    }
}
