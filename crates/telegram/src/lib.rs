//! Telegram front end for tidemark.
//!
//! Polls the Bot API with teloxide, turns uploads and links into transfer
//! jobs, and implements the transfer collaborators (object store and
//! destination channel) on top of the Bot API.

pub mod bot;
pub mod error;
pub mod handlers;
pub mod outbound;
pub mod state;
pub mod store;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod mock_api;

pub use {
    bot::{PollingHandle, build_bot, build_pipeline, start_polling},
    error::{Error, Result},
    outbound::TelegramDestination,
    state::BotState,
    store::TelegramObjectStore,
};
