mod repl;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use grafito::{Config, Db, Params, Row, RowValue};

#[derive(Parser)]
#[command(name = "grafito", version, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single Cypher query or statement against a database file.
    Query(QueryArgs),
    /// Open an interactive REPL against a database file.
    Repl(ReplArgs),
    /// Write a self-describing `CREATE`-script dump to stdout.
    Dump(DumpArgs),
    /// Restore a dump produced by `dump`.
    Restore(RestoreArgs),
    /// Import a Zstandard-compressed Neo4j dump archive.
    ImportNeo4j(ImportNeo4jArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Ndjson,
}

#[derive(Parser)]
struct QueryArgs {
    #[arg(long)]
    db: PathBuf,

    /// Cypher query text.
    #[arg(long, conflicts_with = "file")]
    cypher: Option<String>,

    /// Read the Cypher query from a file instead of `--cypher`.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Parameters as a JSON object, e.g. '{"name":"alice"}'.
    #[arg(long)]
    params_json: Option<String>,

    #[arg(long, value_enum, default_value = "ndjson")]
    format: OutputFormat,
}

#[derive(Parser)]
struct ReplArgs {
    #[arg(long)]
    db: PathBuf,
}

#[derive(Parser)]
struct DumpArgs {
    #[arg(long)]
    db: PathBuf,

    /// Write the dump script here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct RestoreArgs {
    #[arg(long)]
    db: PathBuf,

    /// Dump script to restore; reads stdin when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Delete all existing nodes/relationships before restoring.
    #[arg(long, default_value_t = false)]
    clear_existing: bool,
}

#[derive(Parser)]
struct ImportNeo4jArgs {
    #[arg(long)]
    db: PathBuf,

    /// Path to the Zstandard-compressed Neo4j dump archive.
    #[arg(long)]
    archive: PathBuf,
}

fn value_to_json(value: &RowValue) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn parse_params_json(raw: Option<String>) -> Result<Params, String> {
    let mut params = Params::new();
    let Some(raw) = raw else {
        return Ok(params);
    };
    if raw.trim().is_empty() {
        return Ok(params);
    }
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
        .map_err(|e| format!("params_json must be a JSON object: {e}"))?;
    for (key, value) in parsed {
        params.insert(key, json_to_row_value(value));
    }
    Ok(params)
}

fn json_to_row_value(value: serde_json::Value) -> RowValue {
    match value {
        serde_json::Value::Null => RowValue::Null,
        serde_json::Value::Bool(b) => RowValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                RowValue::Int(i)
            } else {
                RowValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => RowValue::String(s),
        serde_json::Value::Array(items) => RowValue::List(items.into_iter().map(json_to_row_value).collect()),
        serde_json::Value::Object(map) => {
            RowValue::Map(map.into_iter().map(|(k, v)| (k, json_to_row_value(v))).collect())
        }
    }
}

fn read_query(args: &QueryArgs) -> Result<String, String> {
    if let Some(query) = args.cypher.as_ref() {
        return Ok(query.clone());
    }
    let Some(path) = args.file.as_ref() else {
        return Err("either --cypher or --file is required".to_string());
    };
    std::fs::read_to_string(path).map_err(|e| format!("failed to read query file {}: {e}", path.display()))
}

fn print_rows(rows: &[Row]) -> Result<(), String> {
    use std::io::Write;
    let mut stdout = std::io::stdout().lock();
    for row in rows {
        let mut map = serde_json::Map::with_capacity(row.columns().len());
        for (k, v) in row.columns() {
            map.insert(k.clone(), value_to_json(v));
        }
        serde_json::to_writer(&mut stdout, &serde_json::Value::Object(map)).map_err(|e| e.to_string())?;
        stdout.write_all(b"\n").map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn run_query(args: QueryArgs) -> Result<(), String> {
    let query = read_query(&args)?;
    let params = parse_params_json(args.params_json)?;

    let db = Db::open(&args.db, Config::default()).map_err(|e| e.to_string())?;
    let OutputFormat::Ndjson = args.format;
    let rows = db.query(&query, &params).map_err(|e| e.to_string())?;
    print_rows(&rows)
}

fn run_dump(args: DumpArgs) -> Result<(), String> {
    let db = Db::open(&args.db, Config::default()).map_err(|e| e.to_string())?;
    let script = db.dump().map_err(|e| e.to_string())?;
    match args.out {
        Some(path) => std::fs::write(&path, script).map_err(|e| format!("failed to write {}: {e}", path.display())),
        None => {
            print!("{script}");
            Ok(())
        }
    }
}

fn run_restore(args: RestoreArgs) -> Result<(), String> {
    let script = match args.file {
        Some(path) => std::fs::read_to_string(&path).map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin()).map_err(|e| e.to_string())?,
    };
    let db = Db::open(&args.db, Config::default()).map_err(|e| e.to_string())?;
    db.restore(&script, args.clear_existing).map_err(|e| e.to_string())
}

fn run_import_neo4j(args: ImportNeo4jArgs) -> Result<(), String> {
    let db = Db::open(&args.db, Config::default()).map_err(|e| e.to_string())?;
    let stats = db.import_neo4j_dump(&args.archive).map_err(|e| e.to_string())?;
    println!("imported {} nodes, {} relationships", stats.nodes_imported, stats.relationships_imported);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Query(args) => run_query(args),
        Commands::Repl(args) => repl::run_repl(&args.db),
        Commands::Dump(args) => run_dump(args),
        Commands::Restore(args) => run_restore(args),
        Commands::ImportNeo4j(args) => run_import_neo4j(args),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        std::process::exit(1);
    }
}
