use rand::Rng;
use sha2::{Digest, Sha256};

/// Six decimal digits, never starting with enough zeros to shrink below
/// six characters on the wire.
pub fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    code.to_string()
}

/// Only this digest is persisted; the cleartext code goes out by email and
/// is otherwise discarded.
pub fn otp_digest(otp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(otp.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn digest_matches_only_the_same_code() {
        let digest = otp_digest("123456");
        assert_eq!(digest, otp_digest("123456"));
        assert_ne!(digest, otp_digest("123457"));
        assert_eq!(digest.len(), 64);
    }
}
