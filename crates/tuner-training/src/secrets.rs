//! Job-scoped secret environment.
//!
//! Secrets are injected into a `JobSecrets` value owned by one job and applied
//! to the trainer's child process only. The worker's own environment is never
//! written, and the secrets go away when the value is dropped.

use crate::job::Credentials;
use std::collections::BTreeMap;

pub const WANDB_API_KEY: &str = "WANDB_API_KEY";
pub const HF_TOKEN: &str = "HF_TOKEN";

/// Variables that must be present before training starts.
pub const REQUIRED_SECRETS: [&str; 2] = [WANDB_API_KEY, HF_TOKEN];

#[derive(Clone, Default)]
pub struct JobSecrets {
    vars: BTreeMap<String, String>,
}

impl JobSecrets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the job's credentials in. Empty tokens are treated as absent.
    pub fn inject(&mut self, credentials: &Credentials) {
        if let Some(key) = non_empty(credentials.wandb_api_key.as_deref()) {
            self.set(WANDB_API_KEY, key);
        }
        if let Some(token) = non_empty(credentials.hf_token.as_deref()) {
            self.set(HF_TOKEN, token);
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// First required variable that is missing, if any.
    #[must_use]
    pub fn missing_required(&self) -> Option<&'static str> {
        REQUIRED_SECRETS.into_iter().find(|key| !self.contains(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Export every secret into a child process environment.
    pub fn apply_to(&self, command: &mut tokio::process::Command) {
        command.envs(self.iter());
    }
}

impl std::fmt::Debug for JobSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
