//! Filling in login details the configuration leaves out.

use std::io::{BufRead, Write};

use crate::config::{JumpMethod, Jumpbox};
use crate::error::JumpError;

/// Source of usernames and passwords for secure-shell hops.
pub trait CredentialProvider {
    fn username(&self, node: &str) -> Result<String, JumpError>;
    fn password(&self, node: &str) -> Result<String, JumpError>;
}

/// Asks on the terminal; the password is read without echo.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalCredentials;

impl CredentialProvider for TerminalCredentials {
    fn username(&self, node: &str) -> Result<String, JumpError> {
        let mut stdout = std::io::stdout();
        write!(stdout, "Enter username for {node}: ").map_err(JumpError::Credential)?;
        stdout.flush().map_err(JumpError::Credential)?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(JumpError::Credential)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn password(&self, node: &str) -> Result<String, JumpError> {
        rpassword::prompt_password(format!("Enter password for {node}: ")).map_err(JumpError::Credential)
    }
}

/// Fixed answers, for unattended runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub username: String,
    pub password: String,
}

impl CredentialProvider for StaticCredentials {
    fn username(&self, _node: &str) -> Result<String, JumpError> {
        Ok(self.username.clone())
    }

    fn password(&self, _node: &str) -> Result<String, JumpError> {
        Ok(self.password.clone())
    }
}

/// Asks `provider` for whatever `jumpbox` lacks when it is a secure-shell
/// hop. Other methods log in through their own tool and are left alone.
pub fn backfill(
    jumpbox: &mut Jumpbox,
    node: &str,
    provider: &dyn CredentialProvider,
) -> Result<(), JumpError> {
    if jumpbox.method() != JumpMethod::SecureShell {
        return Ok(());
    }
    if jumpbox.username.as_deref().is_none_or(str::is_empty) {
        jumpbox.username = Some(provider.username(node)?);
    }
    if jumpbox.password.as_deref().is_none_or(str::is_empty) {
        jumpbox.password = Some(provider.password(node)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Counting {
        asked: RefCell<Vec<String>>,
    }

    impl CredentialProvider for Counting {
        fn username(&self, node: &str) -> Result<String, JumpError> {
            self.asked.borrow_mut().push(format!("user {node}"));
            Ok("ops".to_string())
        }

        fn password(&self, node: &str) -> Result<String, JumpError> {
            self.asked.borrow_mut().push(format!("password {node}"));
            Ok("pw".to_string())
        }
    }

    #[test]
    fn only_missing_fields_are_requested() {
        let provider = Counting::default();
        let mut jumpbox = Jumpbox {
            jump_cmd: Some("SSH".to_string()),
            username: Some("root".to_string()),
            ..Default::default()
        };

        backfill(&mut jumpbox, "a", &provider).unwrap();

        assert_eq!(jumpbox.username.as_deref(), Some("root"));
        assert_eq!(jumpbox.password.as_deref(), Some("pw"));
        assert_eq!(*provider.asked.borrow(), vec!["password a"]);
    }

    #[test]
    fn vendor_hops_are_not_prompted() {
        let provider = Counting::default();
        let mut jumpbox = Jumpbox {
            jump_cmd: Some("amos".to_string()),
            ..Default::default()
        };

        backfill(&mut jumpbox, "rbs01", &provider).unwrap();

        assert!(jumpbox.username.is_none());
        assert!(provider.asked.borrow().is_empty());
    }
}
