//! Key-management subcommands shared by the command line and batch files.

use anyhow::{Context, Result};
use clap::Subcommand;
use keyward_vault::{Ciphertext, KeyManager};

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum KeyCommand {
    /// Generate a new key.
    Generate { key_id: String },

    /// Encrypt text with a key. Remaining words are joined with spaces.
    Encrypt {
        key_id: String,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        plaintext: Vec<String>,
    },

    /// Decrypt a ciphertext, optionally on behalf of an application.
    Decrypt {
        key_id: String,
        #[arg(allow_hyphen_values = true)]
        ciphertext: String,
        app_name: Option<String>,
    },

    /// Replace a key's material with a new version.
    Rotate { key_id: String },

    /// Permanently disable a key.
    Revoke { key_id: String },

    /// Allow an application to use a key.
    Authorize { app_name: String, key_id: String },

    /// Withdraw an application's access to a key.
    Deauthorize { app_name: String, key_id: String },
}

impl KeyCommand {
    /// Run the command and return the line to show on success.
    pub fn execute(&self, manager: &KeyManager) -> Result<String> {
        match self {
            Self::Generate { key_id } => {
                manager
                    .create_key(key_id)
                    .into_result()
                    .with_context(|| format!("generate {key_id}"))?;
                Ok(format!("Key '{key_id}' generated"))
            }
            Self::Encrypt { key_id, plaintext } => {
                let text = plaintext.join(" ");
                let ciphertext = manager
                    .encrypt(key_id, text.as_bytes())
                    .into_result()
                    .with_context(|| format!("encrypt with {key_id}"))?;
                Ok(format!("Encrypted: {}", ciphertext.to_base64()))
            }
            Self::Decrypt {
                key_id,
                ciphertext,
                app_name,
            } => {
                let ciphertext = Ciphertext::from_base64(ciphertext)
                    .with_context(|| format!("decrypt with {key_id}"))?;
                let plaintext = manager
                    .decrypt(key_id, &ciphertext, app_name.as_deref())
                    .into_result()
                    .with_context(|| format!("decrypt with {key_id}"))?;
                let text = String::from_utf8(plaintext).context("plaintext is not UTF-8")?;
                Ok(format!("Decrypted: {text}"))
            }
            Self::Rotate { key_id } => {
                let version = manager
                    .rotate_key(key_id)
                    .into_result()
                    .with_context(|| format!("rotate {key_id}"))?;
                Ok(format!("Key '{key_id}' rotated to version {version}"))
            }
            Self::Revoke { key_id } => {
                manager
                    .revoke_key(key_id)
                    .into_result()
                    .with_context(|| format!("revoke {key_id}"))?;
                Ok(format!("Key '{key_id}' revoked"))
            }
            Self::Authorize { app_name, key_id } => {
                manager
                    .authorize_app(app_name, key_id)
                    .into_result()
                    .with_context(|| format!("authorize {app_name} for {key_id}"))?;
                Ok(format!("App '{app_name}' authorized for key '{key_id}'"))
            }
            Self::Deauthorize { app_name, key_id } => {
                let removed = manager
                    .revoke_app_access(app_name, key_id)
                    .into_result()
                    .with_context(|| format!("deauthorize {app_name} for {key_id}"))?;
                Ok(if removed {
                    format!("App '{app_name}' no longer authorized for key '{key_id}'")
                } else {
                    format!("App '{app_name}' was not authorized for key '{key_id}'")
                })
            }
        }
    }
}
