//! Data-driven workflow definitions.
//!
//! A definition is the whole state machine of one benefit type: its stages,
//! which of them are terminal, the `(stage, action) -> stage` transitions
//! together with the roles allowed to take them, and the business-day SLA of
//! every non-terminal stage. Definitions are immutable once registered.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{BenefitTypeId, StageCode, WorkflowAction, WorkflowDefinitionId};
use crate::errors::StoreError;

pub(crate) const DEFINITION_ENTITY: &str = "workflow_definition";

pub const ROLE_TECNICO: &str = "tecnico";
pub const ROLE_COORDENADOR: &str = "coordenador";
pub const ROLE_GESTOR: &str = "gestor";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: StageCode,
    pub action: WorkflowAction,
    pub to: StageCode,
    pub allowed_roles: BTreeSet<String>,
}

impl TransitionRule {
    pub fn new<I, S>(from: StageCode, action: WorkflowAction, to: StageCode, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { from, action, to, allowed_roles: roles.into_iter().map(Into::into).collect() }
    }

    pub fn permits_any<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> bool {
        roles.into_iter().any(|role| self.allowed_roles.contains(role))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub benefit_type: BenefitTypeId,
    pub name: String,
    pub initial_stage: StageCode,
    pub stages: Vec<StageCode>,
    pub terminal_stages: BTreeSet<StageCode>,
    pub transitions: Vec<TransitionRule>,
    /// Business days allowed in each non-terminal stage.
    #[serde(default)]
    pub sla_by_stage: BTreeMap<StageCode, u32>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow definition `{0}` has no stages")]
    NoStages(String),
    #[error("stage {0:?} is listed more than once")]
    DuplicateStage(StageCode),
    #[error("stage {0:?} is referenced but not declared")]
    UnknownStage(StageCode),
    #[error("initial stage {0:?} is terminal")]
    TerminalInitialStage(StageCode),
    #[error("transition ({from:?}, {action:?}) is declared more than once")]
    DuplicateTransition { from: StageCode, action: WorkflowAction },
    #[error("terminal stage {0:?} has an outbound transition")]
    TransitionFromTerminal(StageCode),
    #[error("non-terminal stage {0:?} has no outbound transition")]
    DeadEnd(StageCode),
    #[error("non-terminal stage {0:?} has no SLA")]
    MissingSla(StageCode),
    #[error("transition ({from:?}, {action:?}) allows no role")]
    NoAllowedRoles { from: StageCode, action: WorkflowAction },
    #[error("stage {0:?} cannot be cancelled into a terminal stage")]
    MissingCancellation(StageCode),
}

impl WorkflowDefinition {
    pub fn is_terminal(&self, stage: StageCode) -> bool {
        self.terminal_stages.contains(&stage)
    }

    pub fn contains_stage(&self, stage: StageCode) -> bool {
        self.stages.contains(&stage)
    }

    pub fn transition(&self, from: StageCode, action: WorkflowAction) -> Option<&TransitionRule> {
        self.transitions.iter().find(|rule| rule.from == from && rule.action == action)
    }

    pub fn transitions_from(&self, from: StageCode) -> impl Iterator<Item = &TransitionRule> {
        self.transitions.iter().filter(move |rule| rule.from == from)
    }

    pub fn sla_days(&self, stage: StageCode) -> Option<u32> {
        if self.is_terminal(stage) {
            return None;
        }
        self.sla_by_stage.get(&stage).copied()
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::NoStages(self.id.to_string()));
        }
        let mut declared = BTreeSet::new();
        for stage in &self.stages {
            if !declared.insert(*stage) {
                return Err(DefinitionError::DuplicateStage(*stage));
            }
        }
        let known = |stage: StageCode| {
            if declared.contains(&stage) {
                Ok(())
            } else {
                Err(DefinitionError::UnknownStage(stage))
            }
        };

        known(self.initial_stage)?;
        if self.is_terminal(self.initial_stage) {
            return Err(DefinitionError::TerminalInitialStage(self.initial_stage));
        }
        for stage in &self.terminal_stages {
            known(*stage)?;
        }

        let mut seen = BTreeSet::new();
        for rule in &self.transitions {
            known(rule.from)?;
            known(rule.to)?;
            if !seen.insert((rule.from, rule.action)) {
                return Err(DefinitionError::DuplicateTransition {
                    from: rule.from,
                    action: rule.action,
                });
            }
            if self.is_terminal(rule.from) {
                return Err(DefinitionError::TransitionFromTerminal(rule.from));
            }
            if rule.allowed_roles.is_empty() {
                return Err(DefinitionError::NoAllowedRoles {
                    from: rule.from,
                    action: rule.action,
                });
            }
        }
        for stage in self.sla_by_stage.keys() {
            known(*stage)?;
        }

        for stage in self.stages.iter().filter(|stage| !self.is_terminal(**stage)) {
            if self.transitions_from(*stage).next().is_none() {
                return Err(DefinitionError::DeadEnd(*stage));
            }
            if !self.sla_by_stage.contains_key(stage) {
                return Err(DefinitionError::MissingSla(*stage));
            }
            let cancellable = self
                .transition(*stage, WorkflowAction::Cancelar)
                .map(|rule| self.is_terminal(rule.to))
                .unwrap_or(false);
            if !cancellable {
                return Err(DefinitionError::MissingCancellation(*stage));
            }
        }
        Ok(())
    }

    /// Parses a definition written as TOML.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Standard benefit-request pipeline: técnico opens and analyses,
    /// coordenador decides, gestor releases the benefit.
    pub fn standard(id: impl Into<String>, benefit_type: impl Into<String>) -> Self {
        use StageCode::{
            Aberta, Aprovada, Cancelada, Concluida, EmAnalise, Indeferida, Liberada, Pendente,
            Rascunho,
        };
        use WorkflowAction::{
            Aprovar, Cancelar, Concluir, Indeferir, IniciarAnalise, Liberar, ResolverPendencia,
            SolicitarPendencia, Submeter,
        };

        let tecnico = [ROLE_TECNICO];
        let analysts = [ROLE_TECNICO, ROLE_COORDENADOR];
        let coordenador = [ROLE_COORDENADOR];
        let gestor = [ROLE_GESTOR];
        let admin = [ROLE_COORDENADOR, ROLE_GESTOR];

        let transitions = vec![
            TransitionRule::new(Rascunho, Submeter, Aberta, tecnico),
            TransitionRule::new(Rascunho, Cancelar, Cancelada, analysts),
            TransitionRule::new(Aberta, IniciarAnalise, EmAnalise, analysts),
            TransitionRule::new(Aberta, Cancelar, Cancelada, admin),
            TransitionRule::new(EmAnalise, SolicitarPendencia, Pendente, analysts),
            TransitionRule::new(EmAnalise, Aprovar, Aprovada, coordenador),
            TransitionRule::new(EmAnalise, Indeferir, Indeferida, coordenador),
            TransitionRule::new(EmAnalise, Cancelar, Cancelada, admin),
            TransitionRule::new(Pendente, ResolverPendencia, EmAnalise, analysts),
            TransitionRule::new(Pendente, Cancelar, Cancelada, admin),
            TransitionRule::new(Aprovada, Liberar, Liberada, gestor),
            TransitionRule::new(Aprovada, Cancelar, Cancelada, admin),
            TransitionRule::new(Liberada, Concluir, Concluida, analysts),
            TransitionRule::new(Liberada, Cancelar, Cancelada, gestor),
        ];

        Self {
            id: WorkflowDefinitionId(id.into()),
            benefit_type: BenefitTypeId(benefit_type.into()),
            name: "Fluxo padrão de solicitação de benefício".to_string(),
            initial_stage: Rascunho,
            stages: StageCode::ALL.to_vec(),
            terminal_stages: BTreeSet::from([Concluida, Cancelada, Indeferida]),
            transitions,
            sla_by_stage: BTreeMap::from([
                (Rascunho, 5),
                (Aberta, 2),
                (EmAnalise, 5),
                (Pendente, 10),
                (Aprovada, 3),
                (Liberada, 5),
            ]),
        }
    }
}

#[async_trait]
pub trait WorkflowDefinitionStore: Send + Sync {
    async fn find_by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, StoreError>;

    /// Most recently registered definition for `benefit_type`.
    async fn find_for_benefit_type(
        &self,
        benefit_type: &BenefitTypeId,
    ) -> Result<Option<WorkflowDefinition>, StoreError>;

    /// Stores a validated definition. Implementations reject duplicate ids.
    async fn register(&self, definition: &WorkflowDefinition) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryWorkflowDefinitionStore {
    inner: Mutex<DefinitionIndex>,
}

#[derive(Default)]
struct DefinitionIndex {
    by_id: HashMap<WorkflowDefinitionId, WorkflowDefinition>,
    latest_by_type: HashMap<BenefitTypeId, WorkflowDefinitionId>,
}

#[async_trait]
impl WorkflowDefinitionStore for InMemoryWorkflowDefinitionStore {
    async fn find_by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let index = self.inner.lock().map_err(|_| poisoned())?;
        Ok(index.by_id.get(id).cloned())
    }

    async fn find_for_benefit_type(
        &self,
        benefit_type: &BenefitTypeId,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let index = self.inner.lock().map_err(|_| poisoned())?;
        Ok(index.latest_by_type.get(benefit_type).and_then(|id| index.by_id.get(id)).cloned())
    }

    async fn register(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        let mut index = self.inner.lock().map_err(|_| poisoned())?;
        if index.by_id.contains_key(&definition.id) {
            return Err(StoreError::Duplicate {
                entity: DEFINITION_ENTITY,
                id: definition.id.to_string(),
            });
        }
        index.latest_by_type.insert(definition.benefit_type.clone(), definition.id.clone());
        index.by_id.insert(definition.id.clone(), definition.clone());
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("workflow definition store lock poisoned".to_string())
}
