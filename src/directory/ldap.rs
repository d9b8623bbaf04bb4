//! `ldap3`-backed directory session.
use async_trait::async_trait;
use ldap3::{DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DirectoryConnector, DirectoryError, DirectorySession, RawEntry, SearchQuery};
use crate::config::{Config, ConfigError, LdapEndpoint};

/// LDAP result code for invalidCredentials.
const INVALID_CREDENTIALS: u32 = 49;

#[derive(Clone)]
pub struct LdapConnector {
    endpoint: LdapEndpoint,
    bind_dn: String,
    bind_password: String,
    tls_skip_verify: bool,
    connect_timeout: Duration,
}

impl fmt::Debug for LdapConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConnector")
            .field("endpoint", &self.endpoint)
            .field("bind_dn", &self.bind_dn)
            .finish_non_exhaustive()
    }
}

impl LdapConnector {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: cfg.directory.endpoint()?,
            bind_dn: cfg.directory.bind_dn.clone(),
            bind_password: cfg.directory.bind_password.clone(),
            tls_skip_verify: cfg.directory.tls_skip_verify,
            connect_timeout: cfg.directory.connect_timeout(),
        })
    }

    pub fn endpoint(&self) -> &LdapEndpoint {
        &self.endpoint
    }

    fn settings(&self) -> LdapConnSettings {
        let settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);
        if self.endpoint.tls && self.tls_skip_verify {
            settings.set_no_tls_verify(true)
        } else {
            settings
        }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let url = self.endpoint.url();
        debug!(url = %url, "connecting to directory");

        let (conn, mut ldap) = LdapConnAsync::with_settings(self.settings(), &url)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        debug!(bind_dn = %self.bind_dn, "binding to directory");
        let result = ldap
            .simple_bind(&self.bind_dn, &self.bind_password)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;

        if result.rc != 0 {
            let _ = ldap.unbind().await;
            let message = if result.rc == INVALID_CREDENTIALS {
                "invalid credentials".to_string()
            } else {
                result.text.clone()
            };
            return Err(DirectoryError::Bind {
                dn: self.bind_dn.clone(),
                code: result.rc,
                message,
            });
        }

        info!(host = %self.endpoint.host, port = self.endpoint.port, "connected to directory");
        Ok(Box::new(LdapSession { ldap }))
    }
}

pub struct LdapSession {
    ldap: Ldap,
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<RawEntry>, DirectoryError> {
        let query_error = |message: String| DirectoryError::Query {
            base: query.base.clone(),
            message,
        };

        let options = SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(0)
            .timelimit(0);

        let result = self
            .ldap
            .with_search_options(options)
            .search(
                &query.base,
                Scope::Subtree,
                &query.filter,
                query.attributes.clone(),
            )
            .await
            .map_err(|e| query_error(e.to_string()))?;

        let (entries, _res) = result.success().map_err(|e| query_error(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| RawEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            })
            .collect())
    }

    async fn close(self: Box<Self>) {
        let mut ldap = self.ldap;
        match ldap.unbind().await {
            Ok(()) => info!("disconnected from directory"),
            Err(e) => warn!(error = %e, "error during LDAP unbind"),
        }
    }
}
