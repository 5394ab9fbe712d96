//! Assembles the dynamic session context injected into the agent's system
//! prompt: the prior session's summary, outstanding pending groups, and
//! recent unreconciled trades.

use crate::journal::JournalStore;

const BASE_SYSTEM_PROMPT: &str = "\
You are a trading copilot for binary prediction markets. You may call the \
read tools freely to research markets, and may call recommend_trade to \
propose a multi-leg trade for operator review. You never place live orders \
directly; execution happens only after explicit operator confirmation.";

pub async fn build_system_prompt(journal: &JournalStore, session_id: &str) -> anyhow::Result<String> {
    let context = journal.build_session_context(session_id).await?;
    Ok(format!(
        "{BASE_SYSTEM_PROMPT}\n\nSession context:\n{}",
        serde_json::to_string_pretty(&context)?
    ))
}
