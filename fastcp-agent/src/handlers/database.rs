//! `database.*`: MySQL databases and accounts for tenants.
//!
//! The agent talks to the local server as `root` over its Unix socket. Names
//! are restricted to `[A-Za-z0-9_]` because they are spliced into DDL.

use std::sync::{Arc, LazyLock};

use fastcp_protocol::payload::{CreateDatabase, DeleteDatabase, ResetDatabasePassword};
use regex::Regex;
use serde_json::Value;
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tracing::{info, warn};

use super::{ok, params};
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

/// Account hosts created for every database user: socket and TCP clients.
const ACCOUNT_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

pub fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.len() <= 64 && IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(AgentError::Validation(format!("invalid {}: {:?}", what, value)))
    }
}

/// Quote a password as a MySQL string literal.
pub(super) fn quote_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Single-connection pool to the local server. Callers close it when done.
pub(super) async fn connect(ctx: &AgentContext) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .socket(&ctx.mysql_socket)
        .username("root");
    MySqlPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| AgentError::mysql("failed to connect to MySQL", e))
}

async fn exec(pool: &MySqlPool, sql: &str, action: &str) -> Result<()> {
    sqlx::raw_sql(sql)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| AgentError::mysql(action, e))
}

/// Create `db_name` and grant it to `db_user` on every account host.
pub(super) async fn provision(
    ctx: &AgentContext,
    db_name: &str,
    db_user: &str,
    password: &str,
) -> Result<()> {
    validate_identifier("database name", db_name)?;
    validate_identifier("database user", db_user)?;
    let pool = connect(ctx).await?;

    exec(
        &pool,
        &format!(
            "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            db_name
        ),
        "failed to create database",
    )
    .await?;
    for host in ACCOUNT_HOSTS {
        exec(
            &pool,
            &format!(
                "CREATE USER IF NOT EXISTS '{}'@'{}' IDENTIFIED BY {}",
                db_user,
                host,
                quote_literal(password)
            ),
            "failed to create user",
        )
        .await?;
        exec(
            &pool,
            &format!("GRANT ALL PRIVILEGES ON `{}`.* TO '{}'@'{}'", db_name, db_user, host),
            "failed to grant privileges",
        )
        .await?;
    }
    exec(&pool, "FLUSH PRIVILEGES", "failed to flush privileges").await?;
    pool.close().await;
    Ok(())
}

async fn drop_database(pool: &MySqlPool, db_name: &str, db_user: &str) -> Result<()> {
    for host in ACCOUNT_HOSTS {
        let sql = format!("DROP USER IF EXISTS '{}'@'{}'", db_user, host);
        if let Err(e) = exec(pool, &sql, "failed to drop user").await {
            warn!("{}", e);
        }
    }
    exec(
        pool,
        &format!("DROP DATABASE IF EXISTS `{}`", db_name),
        "failed to drop database",
    )
    .await
}

pub async fn create(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: CreateDatabase = params(&raw)?;
    info!("Creating database {} for {}", req.db_name, req.db_user);
    provision(&ctx, &req.db_name, &req.db_user, &req.password).await?;
    Ok(ok())
}

pub async fn delete(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: DeleteDatabase = params(&raw)?;
    validate_identifier("database name", &req.db_name)?;
    validate_identifier("database user", &req.db_user)?;
    info!("Deleting database {} ({})", req.db_name, req.db_user);

    let pool = connect(&ctx).await?;
    drop_database(&pool, &req.db_name, &req.db_user).await?;
    pool.close().await;
    Ok(ok())
}

pub async fn reset_password(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: ResetDatabasePassword = params(&raw)?;
    validate_identifier("database user", &req.db_user)?;
    info!("Resetting password of database user {}", req.db_user);

    let pool = connect(&ctx).await?;
    for host in ACCOUNT_HOSTS {
        exec(
            &pool,
            &format!(
                "ALTER USER IF EXISTS '{}'@'{}' IDENTIFIED BY {}",
                req.db_user,
                host,
                quote_literal(&req.password)
            ),
            &format!("failed to reset password for user host {}", host),
        )
        .await?;
    }
    exec(&pool, "FLUSH PRIVILEGES", "failed to flush privileges").await?;
    pool.close().await;
    Ok(ok())
}

/// Drop every database the site store lists for `username`.
pub(super) async fn delete_tenant_databases(ctx: &AgentContext, username: &str) -> Result<()> {
    let databases = ctx.store.user_databases(username).await?;
    if databases.is_empty() {
        return Ok(());
    }

    let pool = connect(ctx).await?;
    let mut failed = Vec::new();
    for db in &databases {
        if validate_identifier("database name", &db.db_name).is_err()
            || validate_identifier("database user", &db.db_user).is_err()
        {
            failed.push(format!("{}: invalid name", db.db_name));
            continue;
        }
        info!("Dropping database {} of {}", db.db_name, username);
        if let Err(e) = drop_database(&pool, &db.db_name, &db.db_user).await {
            failed.push(format!("{}: {}", db.db_name, e));
        }
    }
    let _ = exec(&pool, "FLUSH PRIVILEGES", "failed to flush privileges").await;
    pool.close().await;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(AgentError::Operation(format!(
            "failed to drop databases of {}: {}",
            username,
            failed.join("; ")
        )))
    }
}
