use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::info;

use relunet_sql::db::schema;
use relunet_sql::error::{RelunetError, Result};
use relunet_sql::eval::pivot;
use relunet_sql::graph::{NetworkGraph, PiecewiseLinear};
use relunet_sql::input::load_image_input;
use relunet_sql::{saliency_map, Analyzer, Evaluator, Network, NetworkSpec, QuerySuite, Settings, StateDict};

#[derive(Parser)]
#[command(name = "relunet-sql")]
#[command(version = "0.1.0")]
#[command(about = "Encode trained ReLU networks as node/edge tables and query them with SQL", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (JSON)
    #[arg(short, long, env = "RELUNET_CONFIG")]
    pub config: Option<String>,

    /// Directory of .sql files replacing the built-in queries
    #[arg(long)]
    pub queries: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode state dicts (one per model) and export the database
    Encode {
        /// State dict JSON files; the file stem becomes the model name
        #[arg(required = true)]
        states: Vec<PathBuf>,
        /// Export directory (default: settings.export_dir)
        #[arg(long)]
        export: Option<PathBuf>,
        /// Rows per appender flush
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Evaluate one input against a single-model database
    Eval {
        dir: Option<PathBuf>,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Evaluate one input against every model and pivot the predictions
    Compare {
        dir: Option<PathBuf>,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Node count per layer, per model
    Layers { dir: Option<PathBuf> },
    /// Learnable parameter count, per model
    Params { dir: Option<PathBuf> },
    /// Hidden nodes whose outgoing weights are all within the threshold
    Prune {
        dir: Option<PathBuf>,
        #[arg(long, default_value = "0.001")]
        threshold: f64,
    },
    /// Breakpoints of a one-input, one-hidden-layer, one-output network
    Pwl { dir: Option<PathBuf> },
    /// Integral of a one-dimensional network between two bounds
    Integral {
        dir: Option<PathBuf>,
        #[arg(long, allow_hyphen_values = true)]
        from: f64,
        #[arg(long, allow_hyphen_values = true)]
        to: f64,
    },
    /// Occlusion saliency map of an input
    Saliency {
        dir: Option<PathBuf>,
        #[command(flatten)]
        input: InputArgs,
        /// Worker connections (default: one per rayon thread)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compare the SQL, graph and dense forward passes of a state dict
    Verify {
        state: PathBuf,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        values: Vec<f64>,
    },
    /// Write a randomly initialised ReLU network as a state dict
    Generate {
        #[arg(long, default_value = "1")]
        input: usize,
        #[arg(long, default_value = "4")]
        hidden: usize,
        #[arg(long, default_value = "10")]
        layers: usize,
        #[arg(long, default_value = "1")]
        output: usize,
        /// Output file
        #[arg(short, long, default_value = "state_dict.json")]
        out: String,
    },
}

#[derive(Args)]
pub struct InputArgs {
    /// Comma-separated input values
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "image")]
    pub values: Option<Vec<f64>>,
    /// Image file, converted to grayscale and resized to the configured size
    #[arg(long)]
    pub image: Option<PathBuf>,
    /// Skip mean/std normalization of image pixels
    #[arg(long)]
    pub raw: bool,
}

impl InputArgs {
    fn sample(&self, settings: &Settings) -> Result<Vec<f64>> {
        match (&self.values, &self.image) {
            (Some(values), _) => Ok(values.clone()),
            (None, Some(path)) => {
                let normalization = if self.raw { None } else { settings.normalization };
                load_image_input(path, settings.image_width, settings.image_height, normalization)
            }
            (None, None) => Err(RelunetError::Precondition("pass --values or --image".into())),
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_json(path)?,
        None => Settings::default(),
    };
    let suite = match &cli.queries {
        Some(dir) => QuerySuite::from_dir(dir)?,
        None => settings.query_suite()?,
    };
    let open = |dir: &Option<PathBuf>| -> Result<duckdb::Connection> {
        match dir {
            Some(dir) => schema::import_database(dir),
            None => schema::open(&settings),
        }
    };

    match &cli.command {
        Commands::Encode { states, export, batch_size } => {
            let export = export.as_deref().unwrap_or(&settings.export_dir);
            encode(states, export, batch_size.unwrap_or(settings.batch_size))
        }
        Commands::Eval { dir, input } => {
            let conn = open(dir)?;
            let sample = input.sample(&settings)?;
            let evaluation = Evaluator::new(&conn, &suite).with_batch_size(settings.batch_size).evaluate(&sample)?;
            println!("{:>8} {:<16} {:>14} {:>14}", "node", "name", "output", "log_softmax");
            for row in &evaluation.rows {
                println!("{:>8} {:<16} {:>14.6} {:>14.6}", row.node_id, row.name, row.output_value, row.log_softmax);
            }
            match evaluation.prediction() {
                Some(p) => println!("prediction: {p}"),
                None => println!("prediction: none"),
            }
            Ok(())
        }
        Commands::Compare { dir, input } => {
            let conn = open(dir)?;
            let sample = input.sample(&settings)?;
            let evaluation =
                Evaluator::new(&conn, &suite).with_batch_size(settings.batch_size).evaluate_models(&sample)?;
            print!("{}", pivot(&evaluation.predictions_for(0)));
            Ok(())
        }
        Commands::Layers { dir } => {
            let conn = open(dir)?;
            println!("{:>6} {:<16} {:>6} {:>8}", "model", "name", "layer", "nodes");
            for row in Analyzer::new(&conn, &suite).layer_counts_by_model()? {
                println!("{:>6} {:<16} {:>6} {:>8}", row.model_id, row.model_name, row.layer, row.nodes);
            }
            Ok(())
        }
        Commands::Params { dir } => {
            let conn = open(dir)?;
            println!("{:>6} {:<16} {:>12}", "model", "name", "parameters");
            for row in Analyzer::new(&conn, &suite).parameter_counts_by_model()? {
                println!("{:>6} {:<16} {:>12}", row.model_id, row.model_name, row.parameters);
            }
            Ok(())
        }
        Commands::Prune { dir, threshold } => {
            let conn = open(dir)?;
            println!("{:>6} {:<16} {:>8} {:>9} {:>8}", "model", "name", "hidden", "prunable", "percent");
            for row in Analyzer::new(&conn, &suite).pruning_report(*threshold)? {
                let percent = row.percentage_prunable.map_or_else(|| "-".to_string(), |p| format!("{p:.2}"));
                println!(
                    "{:>6} {:<16} {:>8} {:>9} {:>8}",
                    row.model_id, row.model_name, row.hidden_nodes, row.prunable_nodes, percent
                );
            }
            Ok(())
        }
        Commands::Pwl { dir } => {
            let conn = open(dir)?;
            let points = Analyzer::new(&conn, &suite).breakpoints()?;
            println!("{:>14} {:>14} {:>14}", "x", "y", "slope");
            for p in &points {
                println!("{:>14.6} {:>14.6} {:>14.6}", p.x, p.y, p.slope);
            }
            Ok(())
        }
        Commands::Integral { dir, from, to } => {
            let conn = open(dir)?;
            match Analyzer::new(&conn, &suite).integral(*from, *to)? {
                Some(value) => println!("{value:.6}"),
                None => println!("no segment between breakpoints overlaps [{from}, {to}]"),
            }
            Ok(())
        }
        Commands::Saliency { dir, input, workers } => {
            let conn = open(dir)?;
            let sample = input.sample(&settings)?;
            let workers = workers.unwrap_or_else(rayon::current_num_threads);
            let map = saliency_map(&conn, &suite, &sample, workers)?;
            println!("prediction: {} (output {:.6})", map.guess, map.baseline);
            for row in map.rows(settings.image_width as usize) {
                let cells: Vec<String> = row.iter().map(|v| format!("{v:.3}")).collect();
                println!("{}", cells.join(" "));
            }
            Ok(())
        }
        Commands::Verify { state, values } => verify(state, values, &suite),
        Commands::Generate { input, hidden, layers, output, out } => {
            let spec = NetworkSpec { input_size: *input, hidden_size: *hidden, num_hidden_layers: *layers, output_size: *output };
            let state_dict = spec.build().to_state_dict();
            state_dict.save_json(out)?;
            info!(out, sizes = ?spec.layer_sizes(), parameters = state_dict.parameter_count()?, "generated network");
            Ok(())
        }
    }
}

fn encode(states: &[PathBuf], export: &Path, batch_size: usize) -> Result<()> {
    let models = states
        .iter()
        .map(|path| {
            let name = path.file_stem().map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
            let state_dict = StateDict::load_json(&path.to_string_lossy())?;
            Ok((name, state_dict))
        })
        .collect::<Result<Vec<_>>>()?;

    let conn = schema::open_in_memory()?;
    let encoded = relunet_sql::load_models(&conn, &models, batch_size)?;
    for model in &encoded {
        println!(
            "{:>4} {:<16} nodes {:>10} edges {:>12} widths {:?}",
            model.model_id, model.name, model.nodes, model.edges, model.layer_widths
        );
    }
    let counts = schema::table_counts(&conn)?;
    println!("total: {} models, {} nodes, {} edges", counts.models, counts.nodes, counts.edges);
    schema::export_database(&conn, export)
}

fn verify(state: &Path, values: &[f64], suite: &QuerySuite) -> Result<()> {
    let state_dict = StateDict::load_json(&state.to_string_lossy())?;
    let conn = schema::open_in_memory()?;
    let encoded = relunet_sql::load_state_dict(&conn, "verify", &state_dict, relunet_sql::db::DEFAULT_BATCH_SIZE)?;

    let sql = Evaluator::new(&conn, suite).evaluate(values)?.outputs(0);
    let stored = NetworkGraph::from_tables(&conn, encoded.model_id)?;
    let graph: Vec<f64> = stored.forward(values)?.into_iter().map(|(_, v)| v).collect();
    let dense = Network::from_state_dict(&state_dict)?.forward(values)?;

    println!("{:>6} {:>16} {:>16} {:>16}", "output", "sql", "graph", "dense");
    let mut worst: f64 = 0.0;
    for (i, ((s, g), d)) in sql.iter().zip(&graph).zip(&dense).enumerate() {
        worst = worst.max((s - d).abs()).max((g - d).abs());
        println!("{i:>6} {s:>16.8} {g:>16.8} {d:>16.8}");
    }
    if sql.len() != dense.len() || graph.len() != dense.len() || worst > 1e-5 {
        return Err(RelunetError::Query(format!("forward passes disagree (max difference {worst:e})")));
    }
    println!("max difference {worst:e}");

    // One-dimensional networks with one hidden layer also get their breakpoints checked.
    if let Ok(points) = relunet_sql::graph::extract_breakpoints(&stored) {
        let sql_points = Analyzer::new(&conn, suite).breakpoints()?;
        let pwl = PiecewiseLinear::new(sql_points);
        println!("breakpoints: sql {}, graph {}", pwl.points().len(), points.len());
    }
    Ok(())
}
