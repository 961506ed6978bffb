//! Console login directory.
//!
//! # Design
//! - Accounts persist as one JSON file, replaced atomically on every change;
//!   the file is unrelated to the media server document, so a broken login
//!   store never affects media serving.
//! - Hashing runs on the blocking pool. Mutations hold the account lock across
//!   the write so the file and memory never disagree.
//! - Unknown usernames still pay for one hash verification.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castellan_fsops::write_atomic;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::error::{AuthError, AuthResult};
use crate::model::{AccountStatus, AdminAccount, CredentialFile, Role, Session, StoredAccount};
use crate::secret::{generate_password, hash_secret, verify_dummy, verify_secret};
use crate::sessions::SessionTable;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 4;
/// Username created when the store is empty.
pub const BOOTSTRAP_USERNAME: &str = "admin";
const MAX_USERNAME_LEN: usize = 64;
const GENERATED_PASSWORD_LEN: usize = 20;

/// Construction options for [`AdminDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryOptions {
    /// Credential file path.
    pub path: PathBuf,
    /// Sessions expire after this much inactivity.
    pub session_idle: Duration,
    /// Whether anonymous visitors may request an account.
    pub allow_registration: bool,
}

/// Console identities, approval flow and sessions.
#[derive(Debug)]
pub struct AdminDirectory {
    path: PathBuf,
    allow_registration: bool,
    accounts: AsyncMutex<Vec<StoredAccount>>,
    sessions: SessionTable,
}

impl AdminDirectory {
    /// Load the credential file (an absent file is an empty directory).
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serde` when the file exists but cannot be read.
    pub async fn open(options: DirectoryOptions) -> AuthResult<Arc<Self>> {
        let accounts = match tokio::fs::read(&options.path).await {
            Ok(bytes) => {
                let file: CredentialFile = serde_json::from_slice(&bytes)
                    .map_err(|source| AuthError::Serde {
                        operation: "credentials.decode",
                        source,
                    })?;
                if file.version != CredentialFile::VERSION {
                    warn!(version = file.version, "unexpected credential file version");
                }
                file.accounts
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(AuthError::Io {
                    operation: "credentials.read",
                    path: options.path,
                    source,
                });
            }
        };
        Ok(Arc::new(Self {
            path: options.path,
            allow_registration: options.allow_registration,
            accounts: AsyncMutex::new(accounts),
            sessions: SessionTable::new(options.session_idle),
        }))
    }

    /// Credential file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether self-registration is enabled.
    #[must_use]
    pub const fn registration_enabled(&self) -> bool {
        self.allow_registration
    }

    /// Create the first administrator when no account exists.
    ///
    /// Returns the generated password when `password` is `None` and an
    /// account was created.
    ///
    /// # Errors
    ///
    /// Returns an error when hashing or persisting fails.
    pub async fn bootstrap(&self, password: Option<String>) -> AuthResult<Option<String>> {
        let mut accounts = self.accounts.lock().await;
        if !accounts.is_empty() {
            return Ok(None);
        }
        let generated = password.is_none();
        let password = password.unwrap_or_else(|| generate_password(GENERATED_PASSWORD_LEN));
        validate_password(&password)?;
        let account = new_account(BOOTSTRAP_USERNAME, &password, Role::Administrator, AccountStatus::Active).await?;
        let mut next = accounts.clone();
        next.push(account);
        self.persist(&next).await?;
        *accounts = next;
        info!(username = BOOTSTRAP_USERNAME, "bootstrap administrator created");
        Ok(generated.then_some(password))
    }

    /// Verify credentials and open a session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for any unknown-name or wrong-password
    /// combination, and `PendingApproval` when the password is right but the
    /// account is not yet approved.
    #[instrument(name = "auth.authenticate", skip(self, secret))]
    pub async fn authenticate(&self, username: &str, secret: &str) -> AuthResult<Session> {
        let stored = {
            let accounts = self.accounts.lock().await;
            accounts.iter().find(|account| account.username == username).cloned()
        };
        let candidate = secret.to_string();
        let Some(account) = stored else {
            blocking("auth.verify_dummy", move || {
                verify_dummy(&candidate);
                Ok(())
            })
            .await?;
            return Err(AuthError::InvalidCredentials);
        };
        let (name, hash) = (account.username.clone(), account.password_hash.clone());
        let matches = blocking("auth.verify", move || verify_secret(&name, &hash, &candidate)).await?;
        if !matches {
            warn!("login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        if account.status == AccountStatus::Pending {
            return Err(AuthError::PendingApproval);
        }
        info!(role = %account.role, "login accepted");
        Ok(self.sessions.issue(&account.username, account.role))
    }

    /// Resolve a bearer token, refreshing its idle timer.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` for unknown or idle tokens.
    pub fn session(&self, token: &str) -> AuthResult<Session> {
        self.sessions.touch(token).ok_or(AuthError::SessionExpired)
    }

    /// End a session. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    /// Change a password after re-checking the current one. Every session of
    /// the account is revoked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` when `current` is wrong, or
    /// `InvalidInput` when `new` is too short.
    #[instrument(name = "auth.change_password", skip(self, current, new))]
    pub async fn change_password(&self, username: &str, current: &str, new: &str) -> AuthResult<()> {
        validate_password(new)?;
        let mut accounts = self.accounts.lock().await;
        let index = position(&accounts, username).ok_or(AuthError::InvalidCredentials)?;
        let (name, hash, candidate) = (
            username.to_string(),
            accounts[index].password_hash.clone(),
            current.to_string(),
        );
        if !blocking("auth.verify", move || verify_secret(&name, &hash, &candidate)).await? {
            return Err(AuthError::InvalidCredentials);
        }
        let new = new.to_string();
        let hash = blocking("auth.hash", move || hash_secret(&new)).await?;
        let mut next = accounts.clone();
        next[index].password_hash = hash;
        self.persist(&next).await?;
        *accounts = next;
        let revoked = self.sessions.revoke_user(username);
        info!(revoked, "password changed");
        Ok(())
    }

    /// All accounts, in creation order.
    pub async fn list_users(&self) -> Vec<AdminAccount> {
        self.accounts.lock().await.iter().map(StoredAccount::view).collect()
    }

    /// Request a viewer account that an administrator must approve.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationDisabled`, `UsernameTaken`, or `InvalidInput`.
    #[instrument(name = "auth.register", skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> AuthResult<AdminAccount> {
        if !self.allow_registration {
            return Err(AuthError::RegistrationDisabled);
        }
        let account = self
            .insert(username, password, Role::Viewer, AccountStatus::Pending)
            .await?;
        info!("registration pending approval");
        Ok(account)
    }

    /// Create an active account directly.
    ///
    /// # Errors
    ///
    /// Returns `UsernameTaken` or `InvalidInput`.
    #[instrument(name = "auth.create", skip(self, password))]
    pub async fn create(&self, username: &str, password: &str, role: Role) -> AuthResult<AdminAccount> {
        self.insert(username, password, role, AccountStatus::Active).await
    }

    /// Activate a pending account with `role`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount` or `NotPending`.
    #[instrument(name = "auth.approve", skip(self))]
    pub async fn approve(&self, username: &str, role: Role) -> AuthResult<AdminAccount> {
        self.update(username, |accounts, index| {
            if accounts[index].status != AccountStatus::Pending {
                return Err(AuthError::NotPending {
                    username: username.to_string(),
                });
            }
            accounts[index].status = AccountStatus::Active;
            accounts[index].role = role;
            Ok(())
        })
        .await
    }

    /// Reject and remove a pending account.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount` or `NotPending`.
    #[instrument(name = "auth.deny", skip(self))]
    pub async fn deny(&self, username: &str) -> AuthResult<()> {
        let mut accounts = self.accounts.lock().await;
        let index = position(&accounts, username).ok_or_else(|| unknown(username))?;
        if accounts[index].status != AccountStatus::Pending {
            return Err(AuthError::NotPending {
                username: username.to_string(),
            });
        }
        let mut next = accounts.clone();
        next.remove(index);
        self.persist(&next).await?;
        *accounts = next;
        Ok(())
    }

    /// Change an account's role.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount`, or `LastAdministrator` when demoting the only
    /// active administrator.
    #[instrument(name = "auth.set_role", skip(self))]
    pub async fn set_role(&self, username: &str, role: Role) -> AuthResult<AdminAccount> {
        let account = self
            .update(username, |accounts, index| {
                if role != Role::Administrator
                    && accounts[index].is_active_admin()
                    && active_admins(accounts) == 1
                {
                    return Err(AuthError::LastAdministrator);
                }
                accounts[index].role = role;
                Ok(())
            })
            .await?;
        self.sessions.set_role(username, role);
        Ok(account)
    }

    /// Delete an account on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns `SelfDeletion`, `LastAdministrator`, or `UnknownAccount`.
    #[instrument(name = "auth.delete", skip(self))]
    pub async fn delete(&self, actor: &str, username: &str) -> AuthResult<()> {
        if actor == username {
            return Err(AuthError::SelfDeletion);
        }
        let mut accounts = self.accounts.lock().await;
        let index = position(&accounts, username).ok_or_else(|| unknown(username))?;
        if accounts[index].is_active_admin() && active_admins(&accounts) == 1 {
            return Err(AuthError::LastAdministrator);
        }
        let mut next = accounts.clone();
        next.remove(index);
        self.persist(&next).await?;
        *accounts = next;
        self.sessions.revoke_user(username);
        info!("account deleted");
        Ok(())
    }

    async fn insert(
        &self,
        username: &str,
        password: &str,
        role: Role,
        status: AccountStatus,
    ) -> AuthResult<AdminAccount> {
        validate_username(username)?;
        validate_password(password)?;
        let account = new_account(username, password, role, status).await?;
        let mut accounts = self.accounts.lock().await;
        if position(&accounts, username).is_some() {
            return Err(AuthError::UsernameTaken {
                username: username.to_string(),
            });
        }
        let view = account.view();
        let mut next = accounts.clone();
        next.push(account);
        self.persist(&next).await?;
        *accounts = next;
        Ok(view)
    }

    async fn update<F>(&self, username: &str, change: F) -> AuthResult<AdminAccount>
    where
        F: FnOnce(&mut [StoredAccount], usize) -> AuthResult<()>,
    {
        let mut accounts = self.accounts.lock().await;
        let index = position(&accounts, username).ok_or_else(|| unknown(username))?;
        let mut next = accounts.clone();
        change(&mut next, index)?;
        let view = next[index].view();
        self.persist(&next).await?;
        *accounts = next;
        Ok(view)
    }

    async fn persist(&self, accounts: &[StoredAccount]) -> AuthResult<()> {
        let file = CredentialFile {
            version: CredentialFile::VERSION,
            accounts: accounts.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|source| AuthError::Serde {
            operation: "credentials.encode",
            source,
        })?;
        let path = self.path.clone();
        blocking("credentials.write", move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| AuthError::Io {
                    operation: "credentials.create_dir",
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            write_atomic(&path, &bytes).map_err(|source| AuthError::FsOps { source })
        })
        .await
    }
}

async fn new_account(
    username: &str,
    password: &str,
    role: Role,
    status: AccountStatus,
) -> AuthResult<StoredAccount> {
    let secret = password.to_string();
    let password_hash = blocking("auth.hash", move || hash_secret(&secret)).await?;
    Ok(StoredAccount {
        username: username.to_string(),
        password_hash,
        role,
        status,
        created_at: Utc::now(),
    })
}

fn position(accounts: &[StoredAccount], username: &str) -> Option<usize> {
    accounts.iter().position(|account| account.username == username)
}

fn active_admins(accounts: &[StoredAccount]) -> usize {
    accounts.iter().filter(|account| account.is_active_admin()).count()
}

fn unknown(username: &str) -> AuthError {
    AuthError::UnknownAccount {
        username: username.to_string(),
    }
}

fn validate_username(username: &str) -> AuthResult<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AuthError::invalid("username", "must be 1 to 64 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        return Err(AuthError::invalid("username", "unsupported characters"));
    }
    Ok(())
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::invalid("password", "must be at least 4 characters"));
    }
    Ok(())
}

async fn blocking<T, F>(operation: &'static str, task: F) -> AuthResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AuthResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|source| AuthError::TaskJoin { operation, source })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn Error>>;

    async fn directory(dir: &TempDir) -> AuthResult<Arc<AdminDirectory>> {
        AdminDirectory::open(DirectoryOptions {
            path: dir.path().join("admins.json"),
            session_idle: Duration::from_secs(600),
            allow_registration: true,
        })
        .await
    }

    #[tokio::test]
    async fn bootstrap_creates_admin_once() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = directory(&dir).await?;
        let generated = directory.bootstrap(None).await?.ok_or("password generated")?;
        assert_eq!(generated.len(), GENERATED_PASSWORD_LEN);
        assert_eq!(directory.bootstrap(None).await?, None);

        let session = directory.authenticate(BOOTSTRAP_USERNAME, &generated).await?;
        assert!(session.is_admin());

        let reopened = self::directory(&dir).await?;
        assert_eq!(reopened.list_users().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_name_and_wrong_password_look_the_same() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = directory(&dir).await?;
        directory.bootstrap(Some("letmein".to_string())).await?;
        let unknown = directory.authenticate("nobody", "letmein").await;
        let wrong = directory.authenticate(BOOTSTRAP_USERNAME, "nope").await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn registration_requires_approval() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = directory(&dir).await?;
        directory.bootstrap(Some("letmein".to_string())).await?;

        let pending = directory.register("viewer1", "pass").await?;
        assert_eq!(pending.status, AccountStatus::Pending);
        assert!(matches!(
            directory.authenticate("viewer1", "pass").await,
            Err(AuthError::PendingApproval)
        ));
        assert!(matches!(
            directory.register("viewer1", "pass").await,
            Err(AuthError::UsernameTaken { .. })
        ));

        let approved = directory.approve("viewer1", Role::Viewer).await?;
        assert_eq!(approved.status, AccountStatus::Active);
        assert!(!directory.authenticate("viewer1", "pass").await?.is_admin());
        assert!(matches!(
            directory.approve("viewer1", Role::Viewer).await,
            Err(AuthError::NotPending { .. })
        ));

        directory.register("viewer2", "pass").await?;
        directory.deny("viewer2").await?;
        assert!(matches!(
            directory.authenticate("viewer2", "pass").await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn password_change_revokes_sessions() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = directory(&dir).await?;
        directory.bootstrap(Some("letmein".to_string())).await?;
        let session = directory.authenticate(BOOTSTRAP_USERNAME, "letmein").await?;

        assert!(matches!(
            directory.change_password(BOOTSTRAP_USERNAME, "letmein", "abc").await,
            Err(AuthError::InvalidInput { .. })
        ));
        assert!(matches!(
            directory.change_password(BOOTSTRAP_USERNAME, "wrong", "longer").await,
            Err(AuthError::InvalidCredentials)
        ));
        directory.change_password(BOOTSTRAP_USERNAME, "letmein", "longer").await?;

        assert!(matches!(directory.session(&session.token), Err(AuthError::SessionExpired)));
        directory.authenticate(BOOTSTRAP_USERNAME, "longer").await?;
        Ok(())
    }

    #[tokio::test]
    async fn administrators_are_protected() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = directory(&dir).await?;
        directory.bootstrap(Some("letmein".to_string())).await?;

        assert!(matches!(
            directory.delete(BOOTSTRAP_USERNAME, BOOTSTRAP_USERNAME).await,
            Err(AuthError::SelfDeletion)
        ));
        assert!(matches!(
            directory.set_role(BOOTSTRAP_USERNAME, Role::Viewer).await,
            Err(AuthError::LastAdministrator)
        ));
        directory.create("ops", "secret", Role::Viewer).await?;
        assert!(matches!(
            directory.delete("ops", BOOTSTRAP_USERNAME).await,
            Err(AuthError::LastAdministrator)
        ));

        directory.set_role("ops", Role::Administrator).await?;
        directory.delete("ops", BOOTSTRAP_USERNAME).await?;
        let names: Vec<_> = directory
            .list_users()
            .await
            .into_iter()
            .map(|account| account.username)
            .collect();
        assert_eq!(names, vec!["ops".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn registration_can_be_disabled() -> TestResult<()> {
        let dir = TempDir::new()?;
        let directory = AdminDirectory::open(DirectoryOptions {
            path: dir.path().join("nested/admins.json"),
            session_idle: Duration::from_secs(60),
            allow_registration: false,
        })
        .await?;
        assert!(matches!(
            directory.register("someone", "pass").await,
            Err(AuthError::RegistrationDisabled)
        ));
        directory.create("someone", "pass", Role::Viewer).await?;
        assert!(dir.path().join("nested/admins.json").is_file());
        Ok(())
    }
}
