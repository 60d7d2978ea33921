use anyhow::Result;
use clap::Subcommand;
use client::{ChatApi, HttpChatApi};
use shared::config::ClientConfig;

use super::session::{explain, restore_session};

#[derive(Subcommand, Debug)]
pub enum ConversationsCommand {
    /// List the people you have conversations with
    List,
    /// Start (or look up) a conversation with another user
    Start {
        /// Username of the other participant
        username: String,
    },
}

pub async fn run(command: ConversationsCommand, config: &ClientConfig) -> Result<()> {
    let (_context, session) = restore_session()?;
    let api = HttpChatApi::new(config)?;

    match command {
        ConversationsCommand::List => {
            let partners = api.list_partners(&session).await.map_err(explain)?;
            if partners.is_empty() {
                println!("No conversations yet. Start one with `buzz conversations start <username>`.");
            }
            for partner in partners {
                println!("{} (user id {})", partner.username, partner.user_id);
            }
        }
        ConversationsCommand::Start { username } => {
            let conversation = api
                .start_conversation(&username, &session)
                .await
                .map_err(explain)?;
            println!(
                "Conversation {} with {username}",
                conversation.conversation_id
            );
        }
    }
    Ok(())
}
