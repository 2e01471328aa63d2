use analyst_agent::{Removal, RuntimeStores};
use analyst_core::domain::thread::{ThreadKey, UserId};
use analyst_db::{RegistryRepository, SqlRegistryRepository};
use serde_json::json;

use crate::commands::{block_on, load_config, open_database, CommandResult};

pub fn users() -> CommandResult {
    let config = match load_config("users") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("users", async {
        let pool = open_database(&config).await?;
        let users = SqlRegistryRepository::new(pool.clone()).list_users().await;
        pool.close().await;
        users.map_err(|error| ("registry", error.to_string(), 4u8))
    });

    match result {
        Ok(users) => CommandResult::success_with_data(
            "users",
            format!("{} users", users.len()),
            Some(json!(users)),
        ),
        Err(failure) => failure,
    }
}

pub fn threads(user: Option<String>) -> CommandResult {
    let config = match load_config("threads") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("threads", async {
        let pool = open_database(&config).await?;
        let user = user.map(UserId);
        let threads = SqlRegistryRepository::new(pool.clone()).list_threads(user.as_ref()).await;
        pool.close().await;
        threads.map_err(|error| ("registry", error.to_string(), 4u8))
    });

    match result {
        Ok(threads) => CommandResult::success_with_data(
            "threads",
            format!("{} threads", threads.len()),
            Some(json!(threads)),
        ),
        Err(failure) => failure,
    }
}

pub fn history(user: &str, thread: &str) -> CommandResult {
    let config = match load_config("history") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let key = ThreadKey::new(user, thread);

    let result = block_on("history", async {
        let pool = open_database(&config).await?;
        let registry = SqlRegistryRepository::new(pool.clone());
        let outcome = async {
            if !registry.thread_exists(&key).await? {
                return Ok(None);
            }
            registry.history(&key).await.map(Some)
        }
        .await;
        pool.close().await;
        outcome.map_err(|error| ("registry", error.to_string(), 4u8))
    });

    match result {
        Ok(Some(entries)) => CommandResult::success_with_data(
            "history",
            format!("{} entries in thread `{}`", entries.len(), key.thread_id),
            Some(json!(entries)),
        ),
        Ok(None) => CommandResult::failure(
            "history",
            "not_found",
            format!("thread `{}` of user `{}` does not exist", key.thread_id, key.user_id),
            12,
        ),
        Err(failure) => failure,
    }
}

/// Registry removals that also drop the checkpoints and memories they own.
pub enum Cleanup {
    Thread(ThreadKey),
    User(UserId),
    History(ThreadKey),
}

impl Cleanup {
    fn command(&self) -> &'static str {
        match self {
            Self::Thread(_) => "delete-thread",
            Self::User(_) => "delete-user",
            Self::History(_) => "clear-history",
        }
    }

    fn target(&self) -> String {
        match self {
            Self::Thread(key) | Self::History(key) => {
                format!("thread `{}` of user `{}`", key.thread_id, key.user_id)
            }
            Self::User(user_id) => format!("user `{user_id}`"),
        }
    }

    async fn apply(&self, stores: &RuntimeStores) -> Result<Removal, analyst_db::RepositoryError> {
        match self {
            Self::Thread(key) => stores.forget_thread(key).await,
            Self::User(user_id) => stores.forget_user(user_id).await,
            Self::History(key) => stores.clear_thread(key).await,
        }
    }
}

pub fn cleanup(target: Cleanup) -> CommandResult {
    let command = target.command();
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on(command, async {
        let pool = open_database(&config).await?;
        let removal = target.apply(&RuntimeStores::sqlite(pool.clone())).await;
        pool.close().await;
        removal.map_err(|error| ("registry", error.to_string(), 4u8))
    });

    match result {
        Ok(removal) if removal.found => CommandResult::success_with_data(
            command,
            format!("removed {}", target.target()),
            Some(json!(removal)),
        ),
        Ok(_) => CommandResult::failure(
            command,
            "not_found",
            format!("{} does not exist", target.target()),
            12,
        ),
        Err(failure) => failure,
    }
}