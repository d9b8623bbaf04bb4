//! Reading users out of the directory service and normalizing them.
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::model::User;

pub mod ldap;

pub use ldap::LdapConnector;

/// `userAccountControl` bit marking a disabled account.
pub const ACCOUNT_DISABLED: i64 = 0x0002;

/// Optional scalar attributes copied into `User::attributes` when present.
pub const EXTENDED_ATTRIBUTES: &[&str] = &["department", "title"];

/// Attribute projection requested from the directory.
pub const USER_ATTRIBUTES: &[&str] = &[
    "sAMAccountName",
    "mail",
    "userPrincipalName",
    "displayName",
    "givenName",
    "sn",
    "memberOf",
    "userAccountControl",
    "distinguishedName",
    "department",
    "title",
];

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to connect to directory at {url}: {message}")]
    Connect { url: String, message: String },
    #[error("bind as {dn} failed with code {code}: {message}")]
    Bind { dn: String, code: u32, message: String },
    #[error("search under {base} failed: {message}")]
    Query { base: String, message: String },
}

/// One entry as returned by the directory: a DN plus multi-valued attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Builder-style helper, mostly for tests and fakes.
    pub fn with_attr<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// All values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value of `name` that is not blank.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name)
            .iter()
            .map(String::as_str)
            .find(|v| !v.trim().is_empty())
    }
}

/// Parameters of the single user search issued per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub base: String,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchQuery {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base: cfg.directory.search_base().to_string(),
            filter: cfg.directory.search_filter.clone(),
            attributes: USER_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// An authenticated directory session, scoped to one sync cycle.
#[async_trait]
pub trait DirectorySession: Send {
    /// Subtree search, aliases never dereferenced, no size or time limit.
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<RawEntry>, DirectoryError>;

    /// Release the session. Errors are logged by the implementation, not returned.
    async fn close(self: Box<Self>);
}

/// Dials and binds a new [`DirectorySession`].
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// Issues the user search and normalizes the entries it returns.
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    query: SearchQuery,
}

impl DirectoryReader {
    pub fn new(query: SearchQuery) -> Self {
        Self { query }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(SearchQuery::from_config(cfg))
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    #[instrument(skip_all, fields(base = %self.query.base))]
    pub async fn fetch(
        &self,
        session: &mut dyn DirectorySession,
    ) -> Result<Vec<User>, DirectoryError> {
        let entries = session.search(&self.query).await?;
        let total = entries.len();
        let users = normalize_entries(&entries);
        info!(entries = total, users = users.len(), "fetched users from directory");
        Ok(users)
    }
}

/// Normalize a batch, dropping entries without a usable email.
pub fn normalize_entries(entries: &[RawEntry]) -> Vec<User> {
    entries.iter().filter_map(normalize_entry).collect()
}

/// Map one raw entry to a [`User`]; `None` if it has no email.
pub fn normalize_entry(entry: &RawEntry) -> Option<User> {
    let Some(email) = resolve_email(entry) else {
        debug!(dn = %entry.dn, "skipping entry without mail or userPrincipalName");
        return None;
    };
    let name = resolve_name(entry, &email);
    Some(User {
        active: is_active(entry.first("userAccountControl")),
        groups: flatten_groups(entry.values("memberOf")),
        attributes: extended_attributes(entry),
        email,
        name,
    })
}

pub fn resolve_email(entry: &RawEntry) -> Option<String> {
    entry
        .first("mail")
        .or_else(|| entry.first("userPrincipalName"))
        .map(str::to_string)
}

/// displayName, then "givenName sn", then the local part of the email, then
/// the whole email. Never empty for a non-blank email.
pub fn resolve_name(entry: &RawEntry, email: &str) -> String {
    if let Some(display) = entry.first("displayName") {
        return display.to_string();
    }
    let given = entry.first("givenName").unwrap_or_default();
    let surname = entry.first("sn").unwrap_or_default();
    let joined = format!("{} {}", given, surname);
    let joined = joined.trim();
    if !joined.is_empty() {
        return joined.to_string();
    }
    match email.split('@').next().map(str::trim) {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => email.trim().to_string(),
    }
}

/// Absent or non-numeric account control values count as active.
pub fn is_active(user_account_control: Option<&str>) -> bool {
    match user_account_control.map(|v| v.trim().parse::<i64>()) {
        Some(Ok(flags)) => flags & ACCOUNT_DISABLED == 0,
        _ => true,
    }
}

pub fn flatten_groups(member_of: &[String]) -> Vec<String> {
    member_of
        .iter()
        .filter_map(|dn| group_name(dn))
        .collect()
}

/// `CN=Engineers,OU=Groups,DC=x` -> `Engineers`. DNs without a comma yield nothing.
pub fn group_name(dn: &str) -> Option<String> {
    let (first, _) = dn.split_once(',')?;
    let first = first.trim();
    let name = match first.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("cn=") => &first[3..],
        _ => first,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub fn extended_attributes(entry: &RawEntry) -> BTreeMap<String, String> {
    EXTENDED_ATTRIBUTES
        .iter()
        .filter_map(|name| entry.first(name).map(|v| (name.to_string(), v.to_string())))
        .collect()
}
