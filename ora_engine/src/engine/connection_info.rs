use crate::error::{OraError, Result};
use crate::native::{CredentialType, Credentials};
use crate::security::Secret;
use std::fmt;
use std::time::Duration;

const DEFAULT_MAX_POOL_SIZE: u32 = 100;
const DEFAULT_MIN_POOL_SIZE: u32 = 0;

/// One `;`-separated segment of a connection string.
struct Segment {
    start: usize,
    end: usize,
    key: Option<String>,
    value: String,
}

/// Splits a connection string into `KEY=VALUE` segments.
///
/// Single and double quotes toggle quoting and are dropped from the value.
/// `;` inside quotes and `=` inside quotes or parentheses belong to the value.
/// Keys are trimmed and upper-cased, values trimmed.
fn split_segments(connection_string: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut in_quote = false;
    let mut in_dquote = false;
    let mut paren_depth = 0i32;
    let mut key: Option<String> = None;
    let mut buf = String::new();
    let mut start = 0usize;

    for (idx, ch) in connection_string.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '"' => in_dquote = !in_dquote,
            '(' => {
                paren_depth += 1;
                buf.push(ch);
            }
            ')' => {
                paren_depth -= 1;
                buf.push(ch);
            }
            ';' if !in_quote && !in_dquote => {
                segments.push(finish_segment(start, idx, key.take(), &mut buf));
                start = idx + ch.len_utf8();
            }
            '=' if !in_quote && !in_dquote && paren_depth == 0 => {
                key = Some(std::mem::take(&mut buf));
            }
            _ => buf.push(ch),
        }
    }
    segments.push(finish_segment(
        start,
        connection_string.len(),
        key.take(),
        &mut buf,
    ));
    segments
}

fn finish_segment(start: usize, end: usize, key: Option<String>, buf: &mut String) -> Segment {
    let key = key
        .map(|k| k.trim().to_uppercase())
        .filter(|k| !k.is_empty());
    let value = buf.trim().to_string();
    buf.clear();
    Segment {
        start,
        end,
        key,
        value,
    }
}

/// Key/value pairs in first-seen order; a repeated key keeps its last value.
pub(crate) fn tokenize(connection_string: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for segment in split_segments(connection_string) {
        let Some(key) = segment.key else {
            continue;
        };
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = segment.value,
            None => pairs.push((key, segment.value)),
        }
    }
    pairs
}

fn is_password_key(key: &str) -> bool {
    key == "PASSWORD" || key == "PWD"
}

/// Connection string with every `PASSWORD` / `PWD` segment removed.
pub(crate) fn strip_password(connection_string: &str) -> String {
    split_segments(connection_string)
        .iter()
        .filter(|s| !s.key.as_deref().is_some_and(is_password_key))
        .map(|s| connection_string[s.start..s.end].trim())
        .filter(|raw| !raw.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_uppercase().as_str() {
        "TRUE" | "YES" => Ok(true),
        "FALSE" | "NO" => Ok(false),
        _ => Err(invalid_value(key, value)),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| invalid_value(key, value))
}

fn invalid_value(key: &str, value: &str) -> OraError {
    OraError::Configuration(format!("Invalid value \"{}\" for key '{}'", value, key))
}

/// Parsed connection configuration.
#[derive(Clone)]
pub struct ConnectionInfo {
    username: String,
    password: Secret,
    database: String,
    credential_type: CredentialType,
    min_pool_size: u32,
    max_pool_size: u32,
    pooling: bool,
    persist_security_info: bool,
    connection_lifetime: Option<Duration>,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: Secret::default(),
            database: String::new(),
            credential_type: CredentialType::Rdbms,
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            pooling: true,
            persist_security_info: false,
            connection_lifetime: None,
        }
    }
}

impl ConnectionInfo {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut info = Self::default();

        for (key, value) in tokenize(connection_string) {
            match key.as_str() {
                // Accepted for compatibility, no effect.
                "UNICODE" | "ENLIST" => {}
                "CONNECTION LIFETIME" => {
                    let secs = value
                        .parse::<u64>()
                        .map_err(|_| invalid_value(&key, &value))?;
                    info.connection_lifetime = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "INTEGRATED SECURITY" => {
                    info.credential_type = if parse_bool(&key, &value)? {
                        CredentialType::External
                    } else {
                        CredentialType::Rdbms
                    };
                }
                "PERSIST SECURITY INFO" => {
                    info.persist_security_info = parse_bool(&key, &value)?;
                }
                "MIN POOL SIZE" => info.min_pool_size = parse_u32(&key, &value)?,
                "MAX POOL SIZE" => info.max_pool_size = parse_u32(&key, &value)?,
                "DATA SOURCE" | "SERVER" => info.database = value,
                "PASSWORD" | "PWD" => info.password = Secret::from_string(value),
                "USER ID" | "UID" => info.username = value,
                "POOLING" => info.pooling = parse_bool(&key, &value)?,
                _ => return Err(OraError::UnsupportedKey(key)),
            }
        }

        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.max_pool_size < 1 {
            return Err(OraError::Configuration(
                "MAX POOL SIZE must be at least 1".to_string(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(OraError::Configuration(format!(
                "MIN POOL SIZE ({}) exceeds MAX POOL SIZE ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn credential_type(&self) -> CredentialType {
        self.credential_type
    }

    pub fn min_pool_size(&self) -> u32 {
        self.min_pool_size
    }

    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size
    }

    pub fn pooling(&self) -> bool {
        self.pooling
    }

    pub fn persist_security_info(&self) -> bool {
        self.persist_security_info
    }

    pub fn connection_lifetime(&self) -> Option<Duration> {
        self.connection_lifetime
    }

    pub(crate) fn set_password(&mut self, password: Secret) {
        self.password = password;
    }

    pub fn credentials(&self, new_password: Option<&Secret>) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            credential_type: self.credential_type,
            new_password: new_password.cloned(),
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        let credential = match self.credential_type {
            CredentialType::External => PoolCredential::External,
            CredentialType::Rdbms => PoolCredential::Password(self.password.clone()),
        };
        PoolKey {
            username: self.username.clone(),
            credential,
            database: self.database.clone(),
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("username", &self.username)
            .field("database", &self.database)
            .field("credential_type", &self.credential_type)
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("pooling", &self.pooling)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PoolCredential {
    Password(Secret),
    External,
}

/// Pool fingerprint. Two configurations share a pool iff their keys are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    username: String,
    credential: PoolCredential,
    database: String,
    min_pool_size: u32,
    max_pool_size: u32,
}

impl PoolKey {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn min_pool_size(&self) -> u32 {
        self.min_pool_size
    }

    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.credential {
            PoolCredential::Password(_) => "password",
            PoolCredential::External => "external",
        };
        write!(
            f,
            "{}@{} [{}] {}..{}",
            self.username, self.database, marker, self.min_pool_size, self.max_pool_size
        )
    }
}
