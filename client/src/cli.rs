use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    flows, tfidf, wordcount, DelimitedFile, EngineConfig, Executor, FieldType, FlowGraph, Schema,
    Sink, Source, TextLines,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Corre los flujos de referencia sobre archivos locales")]
struct Cli {
    /// Configuración JSON del motor (las variables FLOW_* la pisan)
    #[arg(long, global = true, value_name = "CONFIG_JSON")]
    config: Option<PathBuf>,

    /// Imprime la descripción del flow en vez de correrlo
    #[arg(long, global = true)]
    describe: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// (discardme, line) -> (line)
    Discard {
        input: PathBuf,
        output: PathBuf,
    },
    /// (donotretainme, line) -> (line)
    Retain {
        input: PathBuf,
        output: PathBuf,
    },
    /// (renameme) -> (line)
    Rename {
        input: PathBuf,
        output: PathBuf,
    },
    /// Une presidentes (year, president) con partidos (year, party)
    Cogroup {
        #[arg(value_name = "PRESIDENTS_CSV")]
        presidents: PathBuf,
        #[arg(value_name = "PARTIES_CSV")]
        parties: PathBuf,
        output: PathBuf,
    },
    /// Reparte (president, party) en un archivo por partido
    Split {
        input: PathBuf,
        /// Directorio donde se escriben gaullist.csv, republican.csv y socialist.csv
        #[arg(value_name = "OUTPUT_DIR")]
        output_dir: PathBuf,
    },
    /// Cuenta palabras de un archivo de texto
    Wordcount {
        #[arg(value_name = "INPUT_TXT")]
        input: PathBuf,
        output: PathBuf,
    },
    /// tf-idf por documento desde un CSV (id, content)
    Tfidf {
        input: PathBuf,
        output: PathBuf,
    },
}

fn strings(names: &[&str]) -> Result<Schema> {
    let pairs: Vec<(&str, FieldType)> = names.iter().map(|n| (*n, FieldType::String)).collect();
    Ok(Schema::of(&pairs)?)
}

/// CSV con la configuración de delimitador y encabezado.
fn csv(path: &Path, schema: Schema, config: &EngineConfig) -> Arc<DelimitedFile> {
    Arc::new(DelimitedFile::from_config(path, schema, config))
}

fn build(command: &Commands, config: &EngineConfig) -> Result<FlowGraph> {
    let flow = match command {
        Commands::Discard { input, output } => flows::discard_field(
            csv(input, strings(&["discardme", "line"])?, config),
            csv(output, strings(&["line"])?, config),
        )?,
        Commands::Retain { input, output } => flows::retain_field(
            csv(input, strings(&["donotretainme", "line"])?, config),
            csv(output, strings(&["line"])?, config),
        )?,
        Commands::Rename { input, output } => flows::rename_field(
            csv(input, strings(&["renameme"])?, config),
            csv(output, strings(&["line"])?, config),
        )?,
        Commands::Cogroup {
            presidents,
            parties,
            output,
        } => flows::cogroup(
            csv(presidents, strings(&["year", "president"])?, config),
            csv(parties, strings(&["year", "party"])?, config),
            csv(output, strings(&["president", "party"])?, config),
        )?,
        Commands::Split { input, output_dir } => {
            let schema = strings(&["president", "party"])?;
            let sink = |name: &str| -> Arc<dyn Sink> {
                csv(&output_dir.join(format!("{name}.csv")), schema.clone(), config)
            };
            flows::split(
                csv(input, schema.clone(), config),
                sink("gaullist"),
                sink("republican"),
                sink("socialist"),
            )?
        }
        Commands::Wordcount { input, output } => {
            let schema = Schema::of(&[
                (wordcount::WORD, FieldType::String),
                (wordcount::COUNT, FieldType::Int64),
            ])?;
            let source: Arc<dyn Source> = Arc::new(TextLines::new(input, wordcount::LINE));
            wordcount::count_word_occurrences(source, csv(output, schema, config))?
        }
        Commands::Tfidf { input, output } => tfidf::compute_tfidf(
            csv(input, tfidf::input_schema(), config),
            csv(output, tfidf::output_schema(), config),
        )?,
    };
    Ok(flow)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("cargando configuración")?;

    let flow = build(&cli.command, &config).context("construyendo el flow")?;
    if cli.describe {
        println!("{}", serde_json::to_string_pretty(&flow.describe())?);
        return Ok(());
    }

    info!(stages = flow.stage_names().len(), "flow listo");
    let report = Executor::new(config)
        .run(&flow)
        .context("ejecutando el flow")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
