use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BenefitTypeId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageCode {
    Rascunho,
    Aberta,
    EmAnalise,
    Pendente,
    Aprovada,
    Indeferida,
    Liberada,
    Concluida,
    Cancelada,
}

impl StageCode {
    pub const ALL: [Self; 9] = [
        Self::Rascunho,
        Self::Aberta,
        Self::EmAnalise,
        Self::Pendente,
        Self::Aprovada,
        Self::Indeferida,
        Self::Liberada,
        Self::Concluida,
        Self::Cancelada,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rascunho => "RASCUNHO",
            Self::Aberta => "ABERTA",
            Self::EmAnalise => "EM_ANALISE",
            Self::Pendente => "PENDENTE",
            Self::Aprovada => "APROVADA",
            Self::Indeferida => "INDEFERIDA",
            Self::Liberada => "LIBERADA",
            Self::Concluida => "CONCLUIDA",
            Self::Cancelada => "CANCELADA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|stage| stage.as_str() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submeter,
    IniciarAnalise,
    SolicitarPendencia,
    ResolverPendencia,
    Aprovar,
    Indeferir,
    Liberar,
    Concluir,
    Cancelar,
}

impl WorkflowAction {
    pub const ALL: [Self; 9] = [
        Self::Submeter,
        Self::IniciarAnalise,
        Self::SolicitarPendencia,
        Self::ResolverPendencia,
        Self::Aprovar,
        Self::Indeferir,
        Self::Liberar,
        Self::Concluir,
        Self::Cancelar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submeter => "submeter",
            Self::IniciarAnalise => "iniciar_analise",
            Self::SolicitarPendencia => "solicitar_pendencia",
            Self::ResolverPendencia => "resolver_pendencia",
            Self::Aprovar => "aprovar",
            Self::Indeferir => "indeferir",
            Self::Liberar => "liberar",
            Self::Concluir => "concluir",
            Self::Cancelar => "cancelar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|action| action.as_str() == normalized)
    }
}

/// One audit-trail record of a stage change. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u32,
    pub from_stage: Option<StageCode>,
    pub to_stage: StageCode,
    pub action: Option<WorkflowAction>,
    pub actor_id: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWorkflowState {
    pub request_id: RequestId,
    pub workflow_definition_id: WorkflowDefinitionId,
    pub current_stage: StageCode,
    pub stage_entered_at: DateTime<Utc>,
    /// Unset while the request sits in a terminal stage.
    pub stage_deadline: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
    pub version: u32,
}

impl RequestWorkflowState {
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.stage_deadline.map(|deadline| now > deadline).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{StageCode, WorkflowAction};

    #[test]
    fn stage_codes_round_trip_from_storage_encoding() {
        for stage in StageCode::ALL {
            assert_eq!(StageCode::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(StageCode::parse("em_analise"), Some(StageCode::EmAnalise));
    }

    #[test]
    fn workflow_actions_match_serde_names() {
        for action in WorkflowAction::ALL {
            let encoded = serde_json::to_string(&action).expect("serialize action");
            assert_eq!(encoded, format!("\"{}\"", action.as_str()));
        }
        assert_eq!(WorkflowAction::parse("APROVAR"), Some(WorkflowAction::Aprovar));
    }
}
