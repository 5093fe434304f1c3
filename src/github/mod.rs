//! GitHub as the remote data source: the `RemoteSource` seam, its REST
//! implementation, connected accounts and the pull request decorator.

pub mod accounts;
pub mod api_types;
pub mod client;
pub mod decorator;
pub mod source;
pub mod types;

pub use accounts::{AccountProvider, StaticAccounts};
pub use client::{GitHubClient, IDENTITY_TIMEOUT};
pub use decorator::{PullRequestInfo, SourceBranchDecorator};
pub use source::{Page, PageRequest, RemoteError, RemoteSource};
pub use types::{
  RemoteIssue, RemoteLabel, RemotePullRequest, RemoteRepository, RemoteSearchItem, RemoteUser,
  RepositoryRef,
};
