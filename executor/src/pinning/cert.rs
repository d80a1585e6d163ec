use der::{Decode, DecodePem, Encode};
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

const PEM_PREFIX: &[u8] = b"-----BEGIN";

/// Decode cached pin bytes into a certificate. Accepts DER or PEM.
pub fn decode_pin(bytes: &[u8]) -> Result<Certificate, der::Error> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let trimmed = &bytes[start..];

    if trimmed.starts_with(PEM_PREFIX) {
        Certificate::from_pem(trimmed)
    } else {
        Certificate::from_der(bytes)
    }
}

/// Decode the DER leaf certificate offered in a handshake
pub fn decode_leaf(der: &[u8]) -> Result<Certificate, der::Error> {
    Certificate::from_der(der)
}

/// Hex SHA-256 fingerprint of DER bytes
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Fingerprint of a pin in either encoding, taken over its DER form
pub fn pin_fingerprint(bytes: &[u8]) -> Result<String, der::Error> {
    let cert = decode_pin(bytes)?;
    Ok(fingerprint(&cert.to_der()?))
}

/// First 16 hex characters of the fingerprint, for log lines
pub fn short_fingerprint(der: &[u8]) -> String {
    let mut fp = fingerprint(der);
    fp.truncate(16);
    fp
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn test_cert_der() -> Vec<u8> {
        rcgen::generate_simple_self_signed(vec!["pin.example".to_string()])
            .unwrap()
            .cert
            .der()
            .to_vec()
    }

    fn to_pem(der: &[u8]) -> String {
        let body = BASE64.encode(der);
        let lines: Vec<&str> = body
            .as_bytes()
            .chunks(64)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            lines.join("\n")
        )
    }

    #[test]
    fn test_decode_der_and_pem_agree() {
        let der = test_cert_der();
        let from_der = decode_pin(&der).unwrap();
        let from_pem = decode_pin(format!("\n{}", to_pem(&der)).as_bytes()).unwrap();
        assert_eq!(from_der, from_pem);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_pin(b"definitely not a certificate").is_err());
        assert!(decode_pin(b"-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----\n").is_err());
        assert!(decode_pin(&[]).is_err());
    }

    #[test]
    fn test_pin_fingerprint_ignores_encoding() {
        let der = test_cert_der();
        assert_eq!(pin_fingerprint(&der).unwrap(), fingerprint(&der));
        assert_eq!(pin_fingerprint(to_pem(&der).as_bytes()).unwrap(), fingerprint(&der));
    }

    #[test]
    fn test_fingerprint() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            fp,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(short_fingerprint(b"abc"), "ba7816bf8f01cfea");
    }
}
