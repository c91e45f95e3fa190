/// Account manager implementation using runtime queries
use crate::{
    accounts::User,
    error::{ChatError, ChatResult},
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 64;

/// Account manager service
#[derive(Clone)]
pub struct AccountManager {
    db: SqlitePool,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a new user
    pub async fn create(&self, username: &str, email: &str, password: &str) -> ChatResult<User> {
        let username = username.trim();
        let email = email.trim().to_lowercase();

        Self::validate_username(username)?;
        Self::validate_email(&email)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(ChatError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if self.find_by_email(&email).await?.is_some() {
            return Err(ChatError::Conflict("User already exists".to_string()));
        }

        let password_hash = hash_password(password.to_string()).await?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            password_hash,
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {}
            // Lost a race against a concurrent registration of the same email
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(ChatError::Conflict("User already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, "registered user");
        Ok(user)
    }

    /// Check an email/password pair
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> ChatResult<User> {
        let invalid = || ChatError::Validation("Invalid credentials".to_string());

        let user = self
            .find_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or_else(invalid)?;

        if verify_password(password.to_string(), user.password_hash.clone()).await? {
            Ok(user)
        } else {
            Err(invalid())
        }
    }

    /// Find user by email
    pub async fn find_by_email(&self, email: &str) -> ChatResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    /// Find user by id
    pub async fn find_by_id(&self, id: &str) -> ChatResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    /// Get user by id or fail with NotFound
    pub async fn get(&self, id: &str) -> ChatResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("User {} not found", id)))
    }

    /// All users except the caller, ordered by username
    pub async fn list_except(&self, id: &str) -> ChatResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at FROM users
             WHERE id != ?1
             ORDER BY username, id",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    fn validate_username(username: &str) -> ChatResult<()> {
        if username.is_empty() {
            return Err(ChatError::Validation("Username cannot be empty".to_string()));
        }

        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ChatError::Validation("Username too long".to_string()));
        }

        Ok(())
    }

    fn validate_email(email: &str) -> ChatResult<()> {
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(ChatError::Validation("Invalid email format".to_string())),
        }
    }
}

/// Hash a password with Argon2id off the async runtime
async fn hash_password(password: String) -> ChatResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ChatError::Internal(format!("Password hashing failed: {}", e)))
    })
    .await
    .map_err(|e| ChatError::Internal(format!("Password hashing task failed: {}", e)))?
}

async fn verify_password(password: String, hash: String) -> ChatResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| ChatError::Internal(format!("Stored password hash is invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| ChatError::Internal(format!("Password verification task failed: {}", e)))?
}
