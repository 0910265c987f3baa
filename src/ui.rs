//! Interface de terminal do stageline — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`ItemProgress`] acompanha visualmente a
//! progressão de um item; [`print_timeline`] desenha os segmentos
//! reconstruídos como um gráfico de barras estilo Gantt.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::audit::AuditEntry;
use crate::catalog::StageCatalog;
use crate::timeline::TimelineSegment;

/// Indicador visual da progressão de um item no terminal.
pub struct ItemProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para transições aplicadas.
    green: Style,
    // Estilo amarelo para propostas pendentes.
    yellow: Style,
    // Estilo esmaecido para perguntas.
    dim: Style,
}

impl ItemProgress {
    /// Inicia o spinner com o título do item.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(title.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Registra uma pergunta respondida.
    pub fn answered(&self, question: &str, value: &str) {
        self.pb.println(format!(
            "  {} {question} → {value}",
            self.dim.apply_to("?")
        ));
    }

    /// Exibe uma transição aplicada entre estágios.
    pub fn transition(&self, from: &str, to: &str) {
        self.pb.println(format!(
            "  {} {from} → {to}",
            self.green.apply_to("✓")
        ));
    }

    /// Exibe uma proposta de transição aguardando confirmação manual.
    pub fn pending(&self, to: &str) {
        self.pb.println(format!(
            "  {} proposta manual → {to} (aguardando confirmação)",
            self.yellow.apply_to("…")
        ));
    }

    /// Finaliza o spinner.
    pub fn finish(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }
}

/// Largura total do gráfico de barras em caracteres.
const CHART_WIDTH: usize = 40;

/// Desenha os segmentos da linha do tempo como barras proporcionais.
///
/// Segmentos que excedem o `max_duration_hours` do estágio ganham um
/// marcador de atenção — questão puramente de exibição.
pub fn print_timeline(segments: &[TimelineSegment], catalog: &StageCatalog) {
    let total: f64 = segments.iter().map(|s| s.duration_hours).sum();
    if segments.is_empty() || total <= 0.0 {
        println!("  (linha do tempo vazia)");
        return;
    }

    println!();
    println!("─── Timeline ───");
    for segment in segments {
        let width = ((segment.duration_hours / total) * CHART_WIDTH as f64).round() as usize;
        let bar = "█".repeat(width.max(1));
        let marker = if segment.is_current { " ◀ atual" } else { "" };

        let over_budget = segment
            .stage_id
            .as_deref()
            .and_then(|id| catalog.by_id(id))
            .and_then(|s| s.max_duration_hours)
            .is_some_and(|max| segment.duration_hours > max);
        let warn = if over_budget {
            format!(" {}", Style::new().yellow().apply_to("⚠ excede máximo"))
        } else {
            String::new()
        };

        println!(
            "  {:<14} {} {:.1}h [{}]{}{}",
            segment.stage_name,
            bar,
            segment.duration_hours,
            segment.color,
            marker,
            warn,
        );
    }
}

/// Imprime o histórico de auditoria formatado em JSON.
pub fn print_audit(history: &[AuditEntry]) {
    println!();
    println!("─── Audit Log ───");
    println!(
        "{}",
        serde_json::to_string_pretty(history).unwrap_or_default()
    );
}
