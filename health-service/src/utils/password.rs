use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Plain-text password. Kept in a newtype so it never ends up in a `{:?}` log line.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// PHC-formatted Argon2id hash as stored in `users.password_hash`
/// and `lab_partners.password_hash`.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(hash))
}

/// `Ok(())` when the password matches. A malformed stored hash is an error,
/// same as a mismatch.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}
