use super::{ProjectionSnapshot, ProjectionStore};
use crate::core::error::HivelogError;
use crate::core::models::{
    Agent, Message, RecipientRecord, RecoveryState, Reservation, SwarmBeadContext,
};
use std::collections::BTreeMap;

type ContextKey = (String, String, String, String);

/// In-memory projection store. Shares the reducers with the SQLite store and
/// serves as the reference model in replay tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryProjections {
    cursors: BTreeMap<String, i64>,
    agents: BTreeMap<(String, String), Agent>,
    messages: BTreeMap<String, Message>,
    recipients: BTreeMap<(String, String), RecipientRecord>,
    reservations: BTreeMap<String, Reservation>,
    contexts: BTreeMap<ContextKey, SwarmBeadContext>,
}

impl ProjectionStore for MemoryProjections {
    fn last_applied(&self, project_key: &str) -> Result<i64, HivelogError> {
        Ok(self.cursors.get(project_key).copied().unwrap_or(0))
    }

    fn set_last_applied(&mut self, project_key: &str, sequence: i64) -> Result<(), HivelogError> {
        self.cursors.insert(project_key.to_string(), sequence);
        Ok(())
    }

    fn get_agent(&self, project_key: &str, name: &str) -> Result<Option<Agent>, HivelogError> {
        Ok(self
            .agents
            .get(&(project_key.to_string(), name.to_string()))
            .cloned())
    }

    fn put_agent(&mut self, agent: &Agent) -> Result<(), HivelogError> {
        self.agents.insert(
            (agent.project_key.clone(), agent.name.clone()),
            agent.clone(),
        );
        Ok(())
    }

    fn insert_message_if_absent(&mut self, message: &Message) -> Result<(), HivelogError> {
        self.messages
            .entry(message.id.clone())
            .or_insert_with(|| message.clone());
        Ok(())
    }

    fn get_recipient(
        &self,
        message_id: &str,
        agent_name: &str,
    ) -> Result<Option<RecipientRecord>, HivelogError> {
        Ok(self
            .recipients
            .get(&(message_id.to_string(), agent_name.to_string()))
            .cloned())
    }

    fn insert_recipient_if_absent(&mut self, record: &RecipientRecord) -> Result<(), HivelogError> {
        self.recipients
            .entry((record.message_id.clone(), record.agent_name.clone()))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), HivelogError> {
        self.recipients.insert(
            (record.message_id.clone(), record.agent_name.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn agent_reservations(
        &self,
        project_key: &str,
        agent_name: &str,
    ) -> Result<Vec<Reservation>, HivelogError> {
        Ok(self
            .reservations
            .values()
            .filter(|r| r.project_key == project_key && r.agent_name == agent_name)
            .cloned()
            .collect())
    }

    fn put_reservation(&mut self, reservation: &Reservation) -> Result<(), HivelogError> {
        self.reservations
            .insert(reservation.id.clone(), reservation.clone());
        Ok(())
    }

    fn delete_reservation(&mut self, id: &str) -> Result<(), HivelogError> {
        self.reservations.remove(id);
        Ok(())
    }

    fn put_context(&mut self, context: &SwarmBeadContext) -> Result<(), HivelogError> {
        self.contexts.insert(
            (
                context.project_key.clone(),
                context.epic_id.clone(),
                context.bead_id.clone(),
                context.agent_name.clone(),
            ),
            context.clone(),
        );
        Ok(())
    }

    fn set_recovery_state(
        &mut self,
        project_key: &str,
        epic_id: &str,
        bead_id: &str,
        agent_name: &str,
        state: RecoveryState,
    ) -> Result<(), HivelogError> {
        let key = (
            project_key.to_string(),
            epic_id.to_string(),
            bead_id.to_string(),
            agent_name.to_string(),
        );
        if let Some(ctx) = self.contexts.get_mut(&key) {
            ctx.recovery_state = state;
        }
        Ok(())
    }

    fn snapshot(&self, project_key: &str) -> Result<ProjectionSnapshot, HivelogError> {
        let messages: Vec<Message> = self
            .messages
            .values()
            .filter(|m| m.project_key == project_key)
            .cloned()
            .collect();
        let recipients = self
            .recipients
            .values()
            .filter(|r| messages.iter().any(|m| m.id == r.message_id))
            .cloned()
            .collect();

        Ok(ProjectionSnapshot {
            last_sequence: self.last_applied(project_key)?,
            agents: self
                .agents
                .values()
                .filter(|a| a.project_key == project_key)
                .cloned()
                .collect(),
            messages,
            recipients,
            reservations: self
                .reservations
                .values()
                .filter(|r| r.project_key == project_key)
                .cloned()
                .collect(),
            contexts: self
                .contexts
                .values()
                .filter(|c| c.project_key == project_key)
                .cloned()
                .collect(),
        })
    }
}
