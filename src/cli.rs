//! CLI: compile a schema, then (validate | print source)
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

use json_schemac::{CoerceTypes, ErrorRecord, Options, SchemaRegistry, Validator};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile JSON Schemas and validate JSON/NDJSON documents against them
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// validate documents against a schema
    Validate(ValidateCmd),
    /// print the compiled source of a schema and every unit it references
    Source(SourceCmd),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// schema file to compile
    #[arg(long, short)]
    schema: PathBuf,

    /// additional schema files, referenced by their `$id` or file name
    #[arg(long, short, num_args = 1..)]
    reference: Vec<String>,

    /// JSON options file (camelCase keys, e.g. {"allErrors": true})
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Parser, Debug)]
struct ValidateCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// report every error instead of the first
    #[arg(long)]
    all_errors: bool,

    /// coerce scalar types before checking them
    #[arg(long)]
    coerce: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(clap::Parser, Debug)]
struct SourceCmd {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// output file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// One document to validate, with where it came from.
struct Instance {
    label: String,
    value: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    input: &'a str,
    valid: bool,
    errors: Vec<ErrorRecord>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn options(&self) -> Result<Options> {
        match self.config.as_ref() {
            Some(path) => Options::from_json_file(path),
            None => Ok(Options::default()),
        }
    }

    fn compile(&self, opts: Options) -> Result<Validator> {
        let mut registry = SchemaRegistry::with_options(opts);
        for path in resolve_file_path_patterns(&self.reference)? {
            let schema = read_json(&path)?;
            let key = path.file_name().map(|name| name.to_string_lossy().to_string());
            registry
                .add_schema(schema, key.as_deref())
                .with_context(|| format!("failed to add reference schema {}", path.display()))?;
        }
        let schema = read_json(&self.schema)?;
        registry.compile(schema).with_context(|| format!("failed to compile {}", self.schema.display()))
    }
}

impl InputSettings {
    fn load(&self) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        for source_path in resolve_file_path_patterns(&self.input)? {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {source_path_str}"))?;
            let documents = if self.ndjson {
                source
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(ix, line)| {
                        let value = serde_json::from_str::<Value>(line)
                            .with_context(|| format!("failed to parse {source_path_str}:{}", ix + 1))?;
                        Ok((format!("{source_path_str}:{}", ix + 1), value))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let value = serde_json::from_str::<Value>(&source)
                    .with_context(|| format!("failed to parse JSON source file {source_path_str}"))?;
                vec![(source_path_str.clone(), value)]
            };
            for (label, value) in documents {
                self.process(label, value, &mut out)?;
            }
        }
        Ok(out)
    }

    fn process(&self, label: String, value: Value, out: &mut Vec<Instance>) -> Result<()> {
        let value = match self.json_pointer.as_deref() {
            None => value,
            Some(pointer) => match value.pointer(pointer) {
                Some(node) => node.clone(),
                None => bail!("{label}: JSON pointer {pointer} selects nothing"),
            },
        };
        let Some(jq_expr) = self.jq_expr.as_ref() else {
            out.push(Instance { label, value });
            return Ok(());
        };
        let results = crate::jq_exec::run_jaq(jq_expr, &value)
            .with_context(|| format!("failed to apply jq expression to {label}"))?;
        let many = results.len() > 1;
        for (ix, value) in results.into_iter().enumerate() {
            let label = if many { format!("{label}[{ix}]") } else { label.clone() };
            out.push(Instance { label, value });
        }
        Ok(())
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> Result<bool> {
        match &self.cmd {
            Command::Validate(cmd) => cmd.run(),
            Command::Source(cmd) => cmd.run(),
        }
    }
}

impl ValidateCmd {
    fn run(&self) -> Result<bool> {
        let mut opts = self.schema_settings.options()?;
        opts.all_errors |= self.all_errors;
        if self.coerce && !opts.coerce_types.is_on() {
            opts.coerce_types = CoerceTypes::Scalar;
        }
        let validator = self.schema_settings.compile(opts)?;
        let instances = self.input_settings.load()?;
        tracing::debug!(count = instances.len(), "validating instances");

        let outcomes = instances
            .par_iter()
            .map(|instance| validator.validate(&instance.value))
            .collect::<Result<Vec<_>, _>>()?;

        let all_valid = outcomes.iter().all(|o| o.valid);
        match self.format {
            OutputFormat::Json => {
                let reports = instances
                    .iter()
                    .zip(outcomes)
                    .map(|(instance, outcome)| Report {
                        input: &instance.label,
                        valid: outcome.valid,
                        errors: outcome.errors,
                    })
                    .collect::<Vec<_>>();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            OutputFormat::Text => {
                for (instance, outcome) in instances.iter().zip(&outcomes) {
                    if outcome.valid {
                        println!("{} {}", "valid".green().bold(), instance.label);
                        continue;
                    }
                    println!("{} {}", "invalid".red().bold(), instance.label);
                    for error in &outcome.errors {
                        println!("  {} {}", error.to_string().red(), error.schema_path.dimmed());
                    }
                }
                let failed = outcomes.iter().filter(|o| !o.valid).count();
                let summary = format!("{} of {} valid", outcomes.len() - failed, outcomes.len());
                if failed == 0 {
                    eprintln!("{}", summary.green());
                } else {
                    eprintln!("{}", summary.red());
                }
            }
        }
        Ok(all_valid)
    }
}

impl SourceCmd {
    fn run(&self) -> Result<bool> {
        let opts = self.schema_settings.options()?;
        let validator = self.schema_settings.compile(opts)?;
        let source = validator.source();
        if let Some(out) = self.out.as_ref() {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, &source).with_context(|| format!("failed to write {}", out.display()))?;
        } else {
            println!("{source}");
        }
        Ok(true)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn read_json(path: &Path) -> Result<Value> {
    let source = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("failed to parse {}", path.display()))
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
