//! Mutations against a [`ListResource`]: create, update, delete, status
//! transitions and collection-level actions.
//!
//! Each mutation moves `Idle -> Submitting -> Committed | RolledBack`. Deletes
//! and transitions need a confirmation first; declining leaves the list idle.
//! Successful updates and transitions splice the server's copy of the item
//! into the list; creates refetch because the server decides where the new
//! item sorts. Failed id-bearing mutations resynchronize with a refetch.
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::api::ApiClient;
use crate::error::ApiError;
use crate::list::ListResource;
use crate::model::Resource;

pub const SAVE_FAILED: &str = "Failed to save changes";

#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
    Create { payload: Value },
    Update { id: i64, payload: Value },
    Delete { id: i64 },
    Transition {
        id: i64,
        action: String,
        payload: Option<Value>,
    },
    /// Collection-level command such as `salary/calculate/`.
    Action { action: String, payload: Value },
}

impl MutationIntent {
    pub fn approve(id: i64, comment: Option<&str>) -> Self {
        Self::transition_with_comment(id, "approve", comment)
    }

    pub fn reject(id: i64, comment: Option<&str>) -> Self {
        Self::transition_with_comment(id, "reject", comment)
    }

    fn transition_with_comment(id: i64, action: &str, comment: Option<&str>) -> Self {
        MutationIntent::Transition {
            id,
            action: action.to_string(),
            payload: comment
                .filter(|c| !c.trim().is_empty())
                .map(|c| json!({ "comment": c })),
        }
    }

    pub fn target_id(&self) -> Option<i64> {
        match self {
            MutationIntent::Update { id, .. }
            | MutationIntent::Delete { id }
            | MutationIntent::Transition { id, .. } => Some(*id),
            MutationIntent::Create { .. } | MutationIntent::Action { .. } => None,
        }
    }

    pub fn verb(&self) -> &str {
        match self {
            MutationIntent::Create { .. } => "create",
            MutationIntent::Update { .. } => "update",
            MutationIntent::Delete { .. } => "delete",
            MutationIntent::Transition { action, .. } | MutationIntent::Action { action, .. } => {
                action
            }
        }
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(
            self,
            MutationIntent::Delete { .. } | MutationIntent::Transition { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub resource: &'static str,
    pub action: String,
    pub id: i64,
}

/// Blocking yes/no gate in front of destructive actions.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&ConfirmPrompt) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _prompt: &ConfirmPrompt) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Submitting,
    Committed,
    RolledBack,
}

#[derive(Debug)]
pub enum MutationOutcome {
    /// Confirmation declined; nothing was sent.
    Declined,
    /// The target already has a mutation in flight; nothing was sent.
    AlreadySubmitting,
    Committed,
    /// The server refused or never answered. `message` is what the list now
    /// shows; `error` keeps field details for inline form errors.
    RolledBack { error: ApiError, message: String },
}

impl MutationOutcome {
    pub fn state(&self) -> MutationState {
        match self {
            MutationOutcome::Declined => MutationState::Idle,
            MutationOutcome::AlreadySubmitting => MutationState::Submitting,
            MutationOutcome::Committed => MutationState::Committed,
            MutationOutcome::RolledBack { .. } => MutationState::RolledBack,
        }
    }
}

/// A confirmed mutation whose target is marked busy until it is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationTicket {
    pub intent: MutationIntent,
}

impl<T: Resource> ListResource<T> {
    pub fn mutation_state(&self, id: i64) -> MutationState {
        if self.busy.contains(&id) {
            MutationState::Submitting
        } else {
            MutationState::Idle
        }
    }

    /// Confirm `intent` if it needs it and mark its target busy. `None` when
    /// the target is already busy or the confirmation was declined.
    pub fn begin_mutation(
        &mut self,
        intent: MutationIntent,
        confirm: &dyn Confirm,
    ) -> Option<MutationTicket> {
        if let Some(id) = intent.target_id().filter(|id| self.busy.contains(id)) {
            info!(resource = T::ENDPOINT.name, id, "mutation already in flight");
            return None;
        }
        if intent.needs_confirmation() {
            let prompt = ConfirmPrompt {
                resource: T::ENDPOINT.name,
                action: intent.verb().to_string(),
                id: intent.target_id().unwrap_or_default(),
            };
            if !confirm.confirm(&prompt) {
                info!(resource = T::ENDPOINT.name, id = prompt.id, "mutation declined");
                return None;
            }
        }
        match intent.target_id() {
            Some(id) => {
                self.busy.insert(id);
            }
            None => self.creating = true,
        }
        Some(MutationTicket { intent })
    }

    /// Send the mutation. Does not touch any list state.
    pub async fn send_mutation(
        client: &ApiClient,
        ticket: &MutationTicket,
    ) -> Result<Value, ApiError> {
        let ep = T::ENDPOINT;
        let (method, path, body) = match &ticket.intent {
            MutationIntent::Create { payload } => {
                (Method::POST, ep.collection(), Some(payload.clone()))
            }
            MutationIntent::Update { id, payload } => {
                (Method::PATCH, ep.item(*id), Some(payload.clone()))
            }
            MutationIntent::Delete { id } => (Method::DELETE, ep.item(*id), None),
            MutationIntent::Transition {
                id,
                action,
                payload,
            } => (Method::POST, ep.item_action(*id, action), payload.clone()),
            MutationIntent::Action { action, payload } => (
                Method::POST,
                ep.collection_action(action),
                Some(payload.clone()),
            ),
        };
        let mut request = client.authorized(method, path)?;
        request.body = body;
        client.execute(request).await
    }

    /// Release the busy mark and reconcile the list with the server's answer.
    pub async fn finish_mutation(
        &mut self,
        ticket: MutationTicket,
        result: Result<Value, ApiError>,
    ) -> MutationOutcome {
        let intent = ticket.intent;
        match intent.target_id() {
            Some(id) => {
                self.busy.remove(&id);
            }
            None => self.creating = false,
        }
        match result {
            Ok(body) => {
                self.error = None;
                self.commit(&intent, body).await;
                MutationOutcome::Committed
            }
            Err(err) => self.roll_back(&intent, err).await,
        }
    }

    #[instrument(skip_all, fields(resource = T::ENDPOINT.name, verb = intent.verb()))]
    pub async fn mutate(
        &mut self,
        intent: MutationIntent,
        confirm: &dyn Confirm,
    ) -> MutationOutcome {
        let already_busy = intent.target_id().is_some_and(|id| self.is_busy(id));
        let Some(ticket) = self.begin_mutation(intent, confirm) else {
            if already_busy {
                return MutationOutcome::AlreadySubmitting;
            }
            return MutationOutcome::Declined;
        };
        let result = Self::send_mutation(&self.client, &ticket).await;
        self.finish_mutation(ticket, result).await
    }

    async fn commit(&mut self, intent: &MutationIntent, body: Value) {
        match intent {
            MutationIntent::Create { .. } | MutationIntent::Action { .. } => {
                info!("created; reloading page");
                self.refresh().await;
            }
            MutationIntent::Delete { id } => {
                self.page.remove(*id);
                info!(id, "deleted");
            }
            MutationIntent::Update { id, .. } | MutationIntent::Transition { id, .. } => {
                match serde_json::from_value::<T>(body) {
                    Ok(item) if item.id() == *id => {
                        self.page.replace(item);
                        info!(id, "item updated in place");
                    }
                    Ok(item) => {
                        warn!(
                            id,
                            returned = item.id(),
                            "server returned a different item; reloading"
                        );
                        self.refresh().await;
                    }
                    Err(err) => {
                        warn!(id, %err, "could not read updated item; reloading");
                        self.refresh().await;
                    }
                }
            }
        }
    }

    async fn roll_back(&mut self, intent: &MutationIntent, err: ApiError) -> MutationOutcome {
        let message = err.user_message(SAVE_FAILED);
        warn!(id = ?intent.target_id(), %err, "mutation failed");
        // Id-bearing mutations resync with the server; a create keeps its form
        // open and has nothing to resync. A dead session cannot refetch.
        if intent.target_id().is_some() && !err.is_unauthorized() {
            self.refresh().await;
        }
        self.error = Some(message.clone());
        MutationOutcome::RolledBack {
            error: err,
            message,
        }
    }
}
