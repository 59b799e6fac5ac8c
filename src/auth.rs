use sha2::{Digest, Sha256};

/// Usernames are mapped onto a synthetic email domain so the identity layer
/// only ever sees email-shaped credentials.
pub const MAIL_DOMAIN: &str = "mpasat.com";

/// Consecutive sign-in failures tolerated before an account is rate-limited
/// for the rest of the process lifetime.
pub const MAX_FAILED_SIGNINS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    UserNotFound,
    WrongPassword,
    InvalidEmail,
    TooManyRequests,
    WeakPassword,
    DuplicateUsername,
    UsernameTooShort,
    UsernameInvalidChars,
    PasswordMismatch,
}

impl AuthError {
    pub fn code(self) -> &'static str {
        match self {
            AuthError::UserNotFound => "user_not_found",
            AuthError::WrongPassword => "wrong_password",
            AuthError::InvalidEmail => "invalid_email",
            AuthError::TooManyRequests => "too_many_requests",
            AuthError::WeakPassword => "weak_password",
            AuthError::DuplicateUsername => "username_taken",
            AuthError::UsernameTooShort => "username_too_short",
            AuthError::UsernameInvalidChars => "username_invalid",
            AuthError::PasswordMismatch => "password_mismatch",
        }
    }

    /// Fixed user-facing messages; the UI shows these verbatim.
    pub fn message(self) -> &'static str {
        match self {
            AuthError::UserNotFound => {
                "User not found. Please check your username or sign up."
            }
            AuthError::WrongPassword => "Incorrect password. Please try again.",
            AuthError::InvalidEmail => "Invalid email format.",
            AuthError::TooManyRequests => {
                "Too many failed attempts. Please try again later."
            }
            AuthError::WeakPassword => {
                "Password is too weak. Please choose a stronger password."
            }
            AuthError::DuplicateUsername => {
                "Username already exists. Please choose a different username."
            }
            AuthError::UsernameTooShort => "Username must be at least 3 characters long.",
            AuthError::UsernameInvalidChars => {
                "Username can only contain letters, numbers, and underscores."
            }
            AuthError::PasswordMismatch => "Passwords do not match.",
        }
    }
}

/// Bare usernames become `<username>@mpasat.com`; anything already carrying
/// an '@' passes through untouched.
pub fn synthetic_email(username_or_email: &str) -> String {
    if username_or_email.contains('@') {
        username_or_email.to_string()
    } else {
        format!("{}@{}", username_or_email, MAIL_DOMAIN)
    }
}

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.len() < 3 {
        return Err(AuthError::UsernameTooShort);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AuthError::UsernameInvalidChars);
    }
    Ok(())
}

pub fn validate_password(password: &str, repeat: &str) -> Result<(), AuthError> {
    if password.len() < 6 {
        return Err(AuthError::WeakPassword);
    }
    if password != repeat {
        return Err(AuthError::PasswordMismatch);
    }
    Ok(())
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt) == expected_hash
}
