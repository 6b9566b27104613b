use async_trait::async_trait;
use coursetime_core::model::LearnerId;
use tokio::sync::watch;

/// Identity and session collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_learner_id(&self) -> Option<LearnerId>;

    /// Ends the learner session. Called after the final progress flush.
    async fn end_session(&self);
}

/// Fixed learner identity, used by the CLI and tests.
#[derive(Debug)]
pub struct StaticIdentity {
    learner: Option<LearnerId>,
    ended: watch::Sender<bool>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(learner: LearnerId) -> Self {
        Self {
            learner: Some(learner),
            ended: watch::Sender::new(false),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            learner: None,
            ended: watch::Sender::new(false),
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolves once `end_session` has been called.
    pub async fn wait_ended(&self) {
        let mut rx = self.ended.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn current_learner_id(&self) -> Option<LearnerId> {
        if self.is_ended() { None } else { self.learner }
    }

    async fn end_session(&self) {
        self.ended.send_replace(true);
    }
}
