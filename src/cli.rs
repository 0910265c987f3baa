//! Interface de linha de comando do stageline baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, timeline,
//! check) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// stageline — motor de progressão de estágios guiado por perguntas.
#[derive(Debug, Parser)]
#[command(name = "stageline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração do tenant (stageline.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa a demonstração embutida: um item percorre a pipeline
    /// respondendo às perguntas de cada estágio.
    Demo,

    /// Reconstrói e desenha a linha do tempo do item de demonstração.
    Timeline,

    /// Valida um arquivo de configuração sem executar nada.
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_demo_subcommand() {
        let cli = Cli::parse_from(["stageline", "demo"]);
        assert!(matches!(cli.command, Command::Demo));
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "stageline",
            "--config",
            "acme.toml",
            "--verbose",
            "check",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config.unwrap(), PathBuf::from("acme.toml"));
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn cli_parses_timeline_subcommand() {
        let cli = Cli::parse_from(["stageline", "timeline"]);
        assert!(matches!(cli.command, Command::Timeline));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
