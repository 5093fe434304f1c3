//! Connected accounts the sync engine iterates over.

use color_eyre::Result;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::config::{Config, GitHubConfig};

use super::client::GitHubClient;
use super::source::RemoteSource;

/// Supplies the authenticated remote sources, in preference order, plus an
/// optional anonymous fallback.
pub trait AccountProvider: Send + Sync {
  fn accounts(&self) -> Vec<Arc<dyn RemoteSource>>;

  fn anonymous(&self) -> Option<Arc<dyn RemoteSource>>;

  /// Every source to try: accounts first, anonymous last.
  fn sources(&self) -> Vec<Arc<dyn RemoteSource>> {
    let mut sources = self.accounts();
    sources.extend(self.anonymous());
    sources
  }
}

/// Account list owned by the host; sign-in and sign-out replace entries.
#[derive(Default)]
pub struct StaticAccounts {
  accounts: RwLock<Vec<Arc<dyn RemoteSource>>>,
  anonymous: Option<Arc<dyn RemoteSource>>,
}

impl StaticAccounts {
  pub fn new(
    accounts: Vec<Arc<dyn RemoteSource>>,
    anonymous: Option<Arc<dyn RemoteSource>>,
  ) -> Self {
    Self {
      accounts: RwLock::new(accounts),
      anonymous,
    }
  }

  /// Build REST clients for every configured account whose token is present.
  pub fn from_config(github: &GitHubConfig) -> Result<Self> {
    let api_url = github.api_url.as_deref();
    let mut accounts: Vec<Arc<dyn RemoteSource>> = Vec::new();

    for account in &github.accounts {
      match std::env::var(&account.token_env) {
        Ok(token) if !token.is_empty() => {
          let client = GitHubClient::new(api_url, Some(&token), &account.label)?;
          accounts.push(Arc::new(client));
        }
        _ => warn!(
          account = %account.label,
          env = %account.token_env,
          "token variable not set; skipping account"
        ),
      }
    }

    if accounts.is_empty() {
      if let Ok(token) = Config::get_api_token() {
        accounts.push(Arc::new(GitHubClient::new(api_url, Some(&token), "default")?));
      }
    }

    let anonymous: Option<Arc<dyn RemoteSource>> = if github.anonymous_fallback {
      Some(Arc::new(GitHubClient::new(api_url, None, "anonymous")?))
    } else {
      None
    };

    info!(
      accounts = accounts.len(),
      anonymous = anonymous.is_some(),
      "configured GitHub accounts"
    );
    Ok(Self::new(accounts, anonymous))
  }

  pub fn sign_in(&self, source: Arc<dyn RemoteSource>) {
    if let Ok(mut accounts) = self.accounts.write() {
      accounts.retain(|existing| existing.label() != source.label());
      accounts.push(source);
    }
  }

  pub fn sign_out(&self, label: &str) {
    if let Ok(mut accounts) = self.accounts.write() {
      accounts.retain(|existing| existing.label() != label);
    }
  }
}

impl AccountProvider for StaticAccounts {
  fn accounts(&self) -> Vec<Arc<dyn RemoteSource>> {
    self
      .accounts
      .read()
      .map(|accounts| accounts.clone())
      .unwrap_or_default()
  }

  fn anonymous(&self) -> Option<Arc<dyn RemoteSource>> {
    self.anonymous.clone()
  }
}
