/*
 *  Copyright 2025 Sitekiln Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Application configuration loaded from environment variables.

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// Deployment environment, driving the log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Staging,
}

impl AppEnv {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "development" => Some(AppEnv::Development),
            "production" => Some(AppEnv::Production),
            "staging" => Some(AppEnv::Staging),
            _ => None,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port to listen on
    pub port: u16,
    /// Deployment environment
    pub env: AppEnv,
    /// Logging level
    pub log_level: String,
    /// Database connection URL
    pub database_url: String,
    /// Optional auth token appended to the connection string for hosted
    /// databases
    pub database_auth_token: Option<String>,
}

impl Config {
    /// Loads configuration, reading a `.env` file first if one exists.
    /// Validation failures here are fatal: the process must not start with
    /// a broken configuration.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("PORT must be a valid number")?;

        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let Some(app_env) = AppEnv::parse(&env_name) else {
            bail!(
                "APP_ENV must be one of [development, production, staging], got {}",
                env_name
            );
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_auth_token = env::var("DATABASE_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            port,
            env: app_env,
            log_level,
            database_url,
            database_auth_token,
        })
    }

    /// The final connection string handed to the pool.
    pub fn connection_string(&self) -> String {
        match &self.database_auth_token {
            Some(token) => format!("{}?authToken={}", self.database_url, token),
            None => self.database_url.clone(),
        }
    }
}
