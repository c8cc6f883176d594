//! Challenge conversations: the billable message flow, challenge edits and
//! the opening view.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::content::StartupButton;
use crate::identity::Session;
use crate::ledger::{ChargeOutcome, LedgerService, MESSAGE_TOKEN_COST};
use crate::notice::{self, MessagePicker};
use crate::store::{ChallengeRecord, MessageRecord, Role, StartupListRecord, Store, StoreError};
use crate::utils::ids::{new_document_id, new_session_id, now_millis};
use crate::webhook::{AgentReply, AgentWebhook};
use crate::{GenieError, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// The charge was rejected and the quota notice was posted instead.
    QuotaExceeded { notice: MessageRecord },
    Delivered(Delivery),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub charge: ChargeOutcome,
    /// Assistant message appended from the agent's answer, if any.
    pub reply: Option<MessageRecord>,
    pub startup_list: Option<StartupListRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opening {
    /// The user has no challenge yet.
    Welcome(String),
    Challenge {
        challenge: ChallengeRecord,
        messages: Vec<MessageRecord>,
    },
}

pub struct ChatService {
    store: Arc<dyn Store>,
    ledger: Arc<LedgerService>,
    webhook: Arc<dyn AgentWebhook>,
    picker: Arc<dyn MessagePicker>,
    last_timestamp_ms: AtomicU64,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<LedgerService>,
        webhook: Arc<dyn AgentWebhook>,
        picker: Arc<dyn MessagePicker>,
    ) -> Self {
        Self {
            store,
            ledger,
            webhook,
            picker,
            last_timestamp_ms: AtomicU64::new(0),
        }
    }

    /// Strictly increasing so messages appended in one call keep their order.
    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .last_timestamp_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(prev.saturating_add(1))
    }

    async fn owned_challenge(&self, session: &Session, challenge_id: &str) -> Result<ChallengeRecord> {
        match self.store.load_challenge(challenge_id).await? {
            Some(challenge) if challenge.user_id == session.user_id => Ok(challenge),
            _ => Err(GenieError::not_found("challenge", challenge_id)),
        }
    }

    async fn append(
        &self,
        session: &Session,
        challenge_id: &str,
        role: Role,
        content: String,
    ) -> Result<MessageRecord> {
        let message = MessageRecord {
            id: new_document_id(),
            challenge_id: challenge_id.to_string(),
            user_id: session.user_id.clone(),
            role,
            content,
            timestamp_ms: self.next_timestamp(),
            hidden: false,
        };
        self.store.put_message(&message).await?;
        Ok(message)
    }

    pub async fn create_challenge(
        &self,
        session: &Session,
        title: &str,
        description: &str,
    ) -> Result<ChallengeRecord> {
        let title = title.trim();
        if title.is_empty() {
            return Err(GenieError::InvalidInput("challenge title is required".to_string()));
        }
        let challenge = ChallengeRecord {
            id: new_document_id(),
            user_id: session.user_id.clone(),
            title: title.to_string(),
            description: description.trim().to_string(),
            session_id: new_session_id(),
            created_at_ms: now_millis(),
        };
        self.store.put_challenge(&challenge).await?;
        tracing::info!(user_id = %session.user_id, challenge_id = %challenge.id, "challenge created");
        Ok(challenge)
    }

    /// Sends one user message to the agent, charging [`MESSAGE_TOKEN_COST`].
    ///
    /// The debit is applied before the agent is called and is kept when the
    /// call fails.
    pub async fn send_message(
        &self,
        session: &Session,
        challenge_id: &str,
        text: &str,
    ) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let challenge = self.owned_challenge(session, challenge_id).await?;

        let charge = self
            .ledger
            .charge(session, MESSAGE_TOKEN_COST, now_millis())
            .await?;
        match charge.outcome {
            ChargeOutcome::Rejected { .. } => {
                let content = notice::quota_exceeded(self.picker.as_ref(), &charge.ledger.plan);
                let notice = self
                    .append(session, &challenge.id, Role::Assistant, content)
                    .await?;
                return Ok(SendOutcome::QuotaExceeded { notice });
            }
            ChargeOutcome::Accepted {
                warn: true,
                percentage,
            } => {
                self.append(
                    session,
                    &challenge.id,
                    Role::Assistant,
                    notice::usage_warning(percentage),
                )
                .await?;
            }
            ChargeOutcome::Accepted { .. } | ChargeOutcome::Renewed => {}
        }

        self.append(session, &challenge.id, Role::User, text.to_string())
            .await?;

        let reply = match self.webhook.send(text, &challenge.session_id).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    user_id = %session.user_id,
                    challenge_id = %challenge.id,
                    error = %err,
                    "agent webhook call failed"
                );
                return Err(err.into());
            }
        };

        let (reply, startup_list) = self.record_reply(session, &challenge, reply).await?;
        Ok(SendOutcome::Delivered(Delivery {
            charge: charge.outcome,
            reply,
            startup_list,
        }))
    }

    async fn record_reply(
        &self,
        session: &Session,
        challenge: &ChallengeRecord,
        reply: AgentReply,
    ) -> Result<(Option<MessageRecord>, Option<StartupListRecord>)> {
        match reply {
            AgentReply::Empty => Ok((None, None)),
            AgentReply::Text(output)
            | AgentReply::StartupCards {
                output,
                cards: None,
            } => {
                let message = self
                    .append(session, &challenge.id, Role::Assistant, output)
                    .await?;
                Ok((Some(message), None))
            }
            AgentReply::StartupCards {
                cards: Some(payload),
                ..
            } => {
                let list = StartupListRecord {
                    id: new_document_id(),
                    challenge_id: challenge.id.clone(),
                    user_id: session.user_id.clone(),
                    user_email: session.email.clone(),
                    payload,
                    created_at_ms: now_millis(),
                };
                self.store.put_startup_list(&list).await?;
                tracing::info!(
                    user_id = %session.user_id,
                    challenge_id = %challenge.id,
                    startup_list_id = %list.id,
                    "startup list recorded"
                );

                let button = StartupButton {
                    title: list.title().map(str::to_string),
                    created_at_ms: list.created_at_ms,
                };
                let content = button.encode().map_err(StoreError::from)?;
                let message = self
                    .append(session, &challenge.id, Role::Assistant, content)
                    .await?;
                Ok((Some(message), Some(list)))
            }
        }
    }

    /// Rewrites a challenge and asks the agent to follow up on the new
    /// framing. Not billable.
    pub async fn revise_challenge(
        &self,
        session: &Session,
        challenge_id: &str,
        title: &str,
        description: &str,
    ) -> Result<(ChallengeRecord, Option<MessageRecord>)> {
        let title = title.trim();
        if title.is_empty() {
            return Err(GenieError::InvalidInput("challenge title is required".to_string()));
        }
        let mut challenge = self.owned_challenge(session, challenge_id).await?;
        challenge.title = title.to_string();
        challenge.description = description.trim().to_string();
        self.store.put_challenge(&challenge).await?;

        let prompt = notice::revised_challenge_prompt(&challenge.title, &challenge.description);
        let reply = match self.webhook.send(&prompt, &challenge.session_id).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    user_id = %session.user_id,
                    challenge_id = %challenge.id,
                    error = %err,
                    "agent webhook call failed after challenge edit"
                );
                return Err(err.into());
            }
        };

        let output = match reply {
            AgentReply::Empty => None,
            AgentReply::Text(output) | AgentReply::StartupCards { output, .. } => Some(output),
        };
        let message = match output {
            Some(output) => Some(
                self.append(session, &challenge.id, Role::Assistant, output)
                    .await?,
            ),
            None => None,
        };
        Ok((challenge, message))
    }

    pub async fn opening_messages(&self, session: &Session) -> Result<Opening> {
        let challenges = self.store.list_challenges(&session.user_id).await?;
        let Some(challenge) = challenges.into_iter().next() else {
            return Ok(Opening::Welcome(
                notice::welcome(self.picker.as_ref()).to_string(),
            ));
        };
        let messages = self.visible_messages(session, &challenge.id).await?;
        Ok(Opening::Challenge {
            challenge,
            messages,
        })
    }

    pub async fn visible_messages(
        &self,
        session: &Session,
        challenge_id: &str,
    ) -> Result<Vec<MessageRecord>> {
        let challenge = self.owned_challenge(session, challenge_id).await?;
        let messages = self.store.list_messages(&challenge.id).await?;
        Ok(messages.into_iter().filter(|m| !m.hidden).collect())
    }
}
