//! Configuração de tenant do stageline carregada a partir de `stageline.toml`.
//!
//! A struct [`TenantConfig`] contém o catálogo de estágios, o registro de
//! perguntas e as regras de transição de um tenant. Quando o arquivo não
//! existe, usa-se a pipeline semente embutida — dados de bootstrap, nunca
//! lógica dentro da máquina de estados.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::catalog::{
    Question, QuestionRegistry, ResponseType, SkipClause, SkipOp, Stage, StageCatalog, StageType,
    StatusMapping,
};
use crate::engine::{RuleSet, TransitionRule};
use crate::error::EngineError;

/// Configuração completa de um tenant: estágios, perguntas e regras.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    /// Identificador do tenant dono desta pipeline.
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Definições de estágio, em qualquer ordem; o catálogo ordena por
    /// `sequence_order` na construção.
    #[serde(default)]
    pub stages: Vec<Stage>,

    /// Perguntas por estágio, com condições de pulo.
    #[serde(default)]
    pub questions: Vec<Question>,

    /// Regras de transição (automáticas e manuais).
    #[serde(default)]
    pub rules: Vec<TransitionRule>,
}

// Tenant padrão usado pela pipeline semente.
fn default_tenant_id() -> String {
    "demo".to_string()
}

impl Default for TenantConfig {
    /// Pipeline semente: lead → site-survey → installation → complete,
    /// com uma volta manual de installation para site-survey.
    fn default() -> Self {
        let stage = |id: &str, name: &str, color: &str, order, stage_type, maps| Stage {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            color: color.to_string(),
            sequence_order: order,
            stage_type,
            maps_to_status: maps,
            min_duration_hours: None,
            max_duration_hours: Some(24.0 * 14.0),
            active: true,
        };

        let stages = vec![
            stage(
                "lead",
                "Lead",
                "#818CF8",
                1,
                StageType::Standard,
                StatusMapping::Planning,
            ),
            stage(
                "site-survey",
                "Site Survey",
                "#38BDF8",
                2,
                StageType::Standard,
                StatusMapping::Active,
            ),
            stage(
                "installation",
                "Installation",
                "#FBBF24",
                3,
                StageType::Milestone,
                StatusMapping::Active,
            ),
            stage(
                "complete",
                "Complete",
                "#34D399",
                4,
                StageType::Approval,
                StatusMapping::Completed,
            ),
        ];

        // A pergunta que dispara a transição vem por último no estágio:
        // a resolução acontece a cada resposta.
        let questions = vec![
            Question {
                id: "referral-source".to_string(),
                stage_id: "lead".to_string(),
                text: "Where did this lead come from?".to_string(),
                response_type: ResponseType::MultipleChoice,
                sequence_order: 1,
                choices: vec![
                    "Referral".to_string(),
                    "Website".to_string(),
                    "Walk-in".to_string(),
                ],
                skip_conditions: Vec::new(),
            },
            Question {
                id: "qualified".to_string(),
                stage_id: "lead".to_string(),
                text: "Is this lead qualified?".to_string(),
                response_type: ResponseType::YesNo,
                sequence_order: 2,
                choices: Vec::new(),
                skip_conditions: Vec::new(),
            },
            Question {
                id: "access-clear".to_string(),
                stage_id: "site-survey".to_string(),
                text: "Is site access clear for the crew?".to_string(),
                response_type: ResponseType::YesNo,
                sequence_order: 1,
                choices: Vec::new(),
                skip_conditions: Vec::new(),
            },
            Question {
                id: "obstruction-notes".to_string(),
                stage_id: "site-survey".to_string(),
                text: "Describe the access obstruction".to_string(),
                response_type: ResponseType::Text,
                sequence_order: 2,
                choices: Vec::new(),
                // Acesso liberado dispensa as anotações de obstrução.
                skip_conditions: vec![SkipClause {
                    question_id: "access-clear".to_string(),
                    op: SkipOp::Equals {
                        value: "Yes".to_string(),
                    },
                }],
            },
            Question {
                id: "work-complete".to_string(),
                stage_id: "installation".to_string(),
                text: "Is the installation work complete?".to_string(),
                response_type: ResponseType::YesNo,
                sequence_order: 1,
                choices: Vec::new(),
                skip_conditions: Vec::new(),
            },
        ];

        let rule = |id: &str, from: &str, to: &str, trigger: &str, question: Option<&str>, auto| {
            TransitionRule {
                id: id.to_string(),
                from_stage: from.to_string(),
                to_stage: to.to_string(),
                trigger_response: trigger.to_string(),
                question_id: question.map(str::to_string),
                is_automatic: auto,
            }
        };

        let rules = vec![
            rule("lead-qualified", "lead", "site-survey", "Yes", Some("qualified"), true),
            rule("survey-clear", "site-survey", "installation", "Yes", Some("access-clear"), true),
            rule("install-done", "installation", "complete", "Yes", Some("work-complete"), true),
            // Retrabalho volta para a vistoria, mas só com confirmação.
            rule("install-rework", "installation", "site-survey", "No", Some("work-complete"), false),
        ];

        Self {
            tenant_id: default_tenant_id(),
            stages,
            questions,
            rules,
        }
    }
}

impl TenantConfig {
    /// Carrega a configuração de `stageline.toml` no diretório atual.
    /// Usa a pipeline semente se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("stageline.toml"))
    }

    /// Carrega a configuração de um caminho específico.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str::<TenantConfig>(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Valida e converte a configuração nos componentes do motor.
    pub fn build(self) -> Result<(StageCatalog, QuestionRegistry, RuleSet), EngineError> {
        let catalog = StageCatalog::new(self.tenant_id, self.stages)?;
        let registry = QuestionRegistry::new(self.questions)?;

        for rule in &self.rules {
            if catalog.by_id(&rule.from_stage).is_none() {
                return Err(EngineError::Configuration(format!(
                    "rule {} references unknown from_stage {}",
                    rule.id, rule.from_stage
                )));
            }
            if catalog.by_id(&rule.to_stage).is_none() {
                return Err(EngineError::Configuration(format!(
                    "rule {} references unknown to_stage {}",
                    rule.id, rule.to_stage
                )));
            }
            if let Some(q) = &rule.question_id
                && registry.by_id(q).is_none()
            {
                return Err(EngineError::Configuration(format!(
                    "rule {} references unknown question {q}",
                    rule.id
                )));
            }
        }

        Ok((catalog, registry, RuleSet::new(self.rules)))
    }

    /// Relatório de problemas para o subcomando `check`: referências
    /// quebradas aparecem como erro de `build`; ambiguidades de regras são
    /// listadas aqui antes de qualquer item entrar no motor.
    pub fn check_report(self) -> Result<Vec<String>, EngineError> {
        let (_, _, rules) = self.build()?;
        Ok(rules.ambiguities())
    }
}
