//! Captcha Challenges
//! Mission: Short-lived human check in front of register and login

use crate::store::KvStore;
use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const CAPTCHA_KEY_PREFIX: &str = "auth:captcha:";

/// No 0/O or 1/I/L, which are easy to misread
const CAPTCHA_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CAPTCHA_LEN: usize = 4;
const CAPTCHA_TTL: Duration = Duration::from_secs(5 * 60);

fn captcha_key(id: &str) -> String {
    format!("{CAPTCHA_KEY_PREFIX}{id}")
}

pub fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CAPTCHA_ALPHABET[rng.gen_range(0..CAPTCHA_ALPHABET.len())] as char)
        .collect()
}

pub struct CaptchaStore {
    store: Arc<dyn KvStore>,
}

impl CaptchaStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Issue a new challenge, returning `(captcha_id, code)`
    pub async fn create(&self) -> Result<(String, String)> {
        let id = Uuid::new_v4().to_string();
        let code = random_code(CAPTCHA_LEN);
        self.store
            .set(&captcha_key(&id), code.clone(), Some(CAPTCHA_TTL))
            .await
            .context("Failed to store captcha")?;
        Ok((id, code))
    }

    /// Case-insensitive check; unknown or expired ids simply fail
    pub async fn verify(&self, id: &str, code: &str) -> Result<bool> {
        if id.is_empty() || code.is_empty() {
            return Ok(false);
        }
        let stored = self
            .store
            .get(&captcha_key(id))
            .await
            .context("Failed to load captcha")?;
        Ok(stored.is_some_and(|expected| expected.eq_ignore_ascii_case(code)))
    }

    /// Drop a challenge once it has been used
    pub async fn consume(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        self.store
            .del(&[&captcha_key(id)])
            .await
            .context("Failed to delete captcha")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[test]
    fn test_random_code_alphabet() {
        for _ in 0..50 {
            let code = random_code(CAPTCHA_LEN);
            assert_eq!(code.len(), 4);
            assert!(code.bytes().all(|b| CAPTCHA_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_verify_is_case_insensitive() {
        let captcha = CaptchaStore::new(Arc::new(MemoryKvStore::new()));
        let (id, code) = captcha.create().await.unwrap();

        assert!(captcha.verify(&id, &code.to_lowercase()).await.unwrap());
        assert!(captcha.verify(&id, &code).await.unwrap());
        assert!(!captcha.verify(&id, "????").await.unwrap());
        assert!(!captcha.verify("", &code).await.unwrap());
        assert!(!captcha.verify(&id, "").await.unwrap());
    }

    #[tokio::test]
    async fn test_consumed_captcha_no_longer_verifies() {
        let captcha = CaptchaStore::new(Arc::new(MemoryKvStore::new()));
        let (id, code) = captcha.create().await.unwrap();
        captcha.consume(&id).await.unwrap();
        assert!(!captcha.verify(&id, &code).await.unwrap());
    }
}
