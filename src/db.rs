//! Connection pools for the two stores.
//!
//! Pools are created lazily so an unreachable database does not fail process
//! start; the first acquire surfaces the error instead, which lets the
//! startup gate decide whether to retry.

use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::info;

use crate::config::Settings;
use crate::errors::AppError;

/// Which store an endpoint reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Corp info, outlines, affiliates, industry stats and the flow map.
    Primary,
    /// Legacy store with the company overview and the class tables.
    Secondary,
}

/// Both pools, built once at startup and shared by every request.
#[derive(Debug, Clone)]
pub struct Databases {
    pub primary: PgPool,
    pub secondary: PgPool,
}

impl Databases {
    pub fn connect_lazy(settings: &Settings) -> Result<Self, AppError> {
        let primary = pool_options(settings.max_connections)
            .connect_lazy(&settings.primary_database_url)?;
        let secondary = pool_options(settings.max_connections)
            .connect_lazy(&settings.secondary_database_url)?;
        info!(max_connections = settings.max_connections, "Database pools created");
        Ok(Self { primary, secondary })
    }

    pub fn pool(&self, store: Store) -> &PgPool {
        match store {
            Store::Primary => &self.primary,
            Store::Secondary => &self.secondary,
        }
    }

    /// Check out one connection for the lifetime of a request. It goes back
    /// to the pool when dropped, whatever the outcome.
    pub async fn acquire(&self, store: Store) -> Result<PoolConnection<Postgres>, AppError> {
        Ok(self.pool(store).acquire().await?)
    }

    pub async fn close(&self) {
        self.primary.close().await;
        self.secondary.close().await;
        info!("Database pools closed");
    }
}

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
}

/// Escape `%`, `_` and `\` so user input matches literally inside `LIKE`.
pub fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
