use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rapid_dispatch::client::DispatchClient;
use rapid_dispatch::config::{Config, ConfigOverrides};
use rapid_dispatch::geo::GeoPoint;
use rapid_dispatch::incident::IncidentRequest;
use rapid_dispatch::incidents::{demo_incidents, Assignment, Incident, IncidentStatus, NewIncident};
use rapid_dispatch::output::csv::{
    batches_to_csv, candidates_to_csv, incidents_to_csv, nearby_units_to_csv, units_to_csv,
};
use rapid_dispatch::output::json::render_json;
use rapid_dispatch::output::table::{
    render_batches_table, render_candidates_table, render_incidents_table, render_nearby_table,
    render_units_table,
};
use rapid_dispatch::ranker::queue::PersistenceQueue;
use rapid_dispatch::ranker::Recommender;
use rapid_dispatch::recommendations::StoredBatch;
use rapid_dispatch::scoring::ScoredCandidate;
use rapid_dispatch::server::run_server;
use rapid_dispatch::storage::SqliteStore;
use rapid_dispatch::units::{
    demo_fleet, nearest_available, Capability, NearbyUnit, NewUnit, Unit, UnitStatus, UnitType,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "rapid-dispatch",
    about = "Recommend emergency units for incoming incidents"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, env = "DISPATCH_DB_PATH")]
    db: Option<String>,
    #[arg(long = "top-k")]
    top_k: Option<usize>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    Recommend {
        #[arg(long = "type")]
        incident_type: String,
        #[arg(long, default_value_t = 3)]
        priority: i64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Unit ids already committed to this incident, comma separated.
        #[arg(long, value_delimiter = ',')]
        assigned: Vec<String>,
        #[arg(long = "incident-id")]
        incident_id: Option<String>,
        /// Base URL of a running service; skips the local store.
        #[arg(long)]
        remote: Option<String>,
    },
    /// Replace units and incidents with the demo data set.
    Seed,
    Units {
        #[command(subcommand)]
        command: UnitsCommand,
    },
    Incidents {
        #[command(subcommand)]
        command: IncidentsCommand,
    },
    Recommendations {
        #[command(subcommand)]
        command: RecommendationsCommand,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Subcommand)]
enum UnitsCommand {
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Add {
        #[arg(long = "call-sign")]
        call_sign: String,
        #[arg(long = "type")]
        unit_type: String,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long = "capability", value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    Show {
        id: String,
    },
    Status {
        id: String,
        status: String,
    },
    /// Available units closest to a point.
    Nearest {
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Search radius in metres.
        #[arg(long = "max-distance", default_value_t = 20_000.0)]
        max_distance: f64,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    Assign {
        id: String,
        #[arg(long)]
        incident: String,
    },
    EnRoute {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum IncidentsCommand {
    List,
    Create {
        #[arg(long = "type")]
        incident_type: String,
        #[arg(long, default_value_t = 3)]
        priority: i64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long)]
        description: String,
    },
    Show {
        id: String,
    },
    Status {
        id: String,
        status: String,
    },
    /// Rank units for a registered incident and store the shortlist.
    Recommend {
        id: String,
    },
    Dispatch {
        id: String,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        recommendation: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum RecommendationsCommand {
    List {
        #[arg(long)]
        incident: Option<String>,
    },
    Show {
        id: String,
    },
    Accept {
        id: String,
        #[arg(long)]
        unit: String,
    },
    Reject {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    let (host, port) = match &cli.command {
        Commands::Serve { host, port } => (host.clone(), *port),
        _ => (None, None),
    };
    config.apply_overrides(ConfigOverrides {
        host,
        port,
        db_path: cli.db.clone(),
        top_k: cli.top_k,
    });
    config.validate()?;

    if matches!(cli.command, Commands::Config { .. }) {
        return handle_config_command(&cli.command, &config, &config_path);
    }
    if let Commands::Serve { .. } = &cli.command {
        let bind = format!("{}:{}", config.server.host, config.server.port);
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
        return run_server(config, addr).await;
    }
    if let Commands::Recommend {
        remote: Some(base_url),
        ..
    } = &cli.command
    {
        let request = incident_from_args(&cli.command)?;
        let client = DispatchClient::new(base_url.as_str())?;
        let ranked = client.predict(&request).await?;
        return print_candidates(&ranked, cli.output);
    }

    let db_path = config.resolved_db_path();
    let store = SqliteStore::open(&db_path)?;

    match &cli.command {
        Commands::Recommend { .. } => {
            let request = incident_from_args(&cli.command)?;
            let ranked = recommend_locally(&config, &store, &request).await?;
            print_candidates(&ranked, cli.output)?;
        }
        Commands::Seed => {
            let removed_incidents = store.clear_incidents()?;
            let removed = store.clear_units()?;
            let mut seeded = Vec::new();
            for unit in demo_fleet() {
                seeded.push(store.insert_unit(&unit)?);
            }
            let mut incidents = Vec::new();
            for incident in demo_incidents() {
                incidents.push(store.insert_incident(&incident)?);
            }
            info!(
                removed,
                removed_incidents,
                seeded = seeded.len(),
                incidents = incidents.len(),
                db = %db_path.display(),
                "seeded demo data"
            );
            print_units(&seeded, cli.output)?;
            print_incidents(&incidents, cli.output)?;
        }
        Commands::Units { command } => handle_units_command(command, &store, cli.output)?,
        Commands::Incidents { command } => {
            handle_incidents_command(command, &config, &store, cli.output).await?
        }
        Commands::Recommendations { command } => {
            handle_recommendations_command(command, &store, cli.output)?
        }
        Commands::Serve { .. } | Commands::Config { .. } => {}
    }
    Ok(())
}

fn incident_from_args(command: &Commands) -> Result<IncidentRequest> {
    let Commands::Recommend {
        incident_type,
        priority,
        lon,
        lat,
        assigned,
        incident_id,
        ..
    } = command
    else {
        return Err(anyhow!("not a recommend command"));
    };
    let location = finite_point(*lon, *lat)?;
    let mut request = IncidentRequest::new(incident_type.as_str(), *priority, location)
        .with_assigned(assigned.iter().map(|id| id.trim()).filter(|id| !id.is_empty()));
    if let Some(id) = incident_id {
        request = request.with_incident_id(id.as_str());
    }
    Ok(request)
}

async fn recommend_locally(
    config: &Config,
    store: &SqliteStore,
    request: &IncidentRequest,
) -> Result<Vec<ScoredCandidate>> {
    let (queue, worker) = PersistenceQueue::spawn(
        Arc::new(store.clone()),
        config.dispatch.persist_queue_capacity,
        config.store_timeout(),
    );
    let recommender = Recommender::new(
        Arc::new(config.scoring_tables()),
        Arc::new(store.clone()),
        queue,
        config.ranker_settings(),
    );
    let ranked = recommender
        .recommend(request)
        .await
        .context("failed ranking units")?;

    // Closing the queue lets the worker finish any pending write and exit.
    drop(recommender);
    if let Err(err) = worker.await {
        warn!("persistence worker ended abnormally: {err}");
    }
    Ok(ranked)
}

fn handle_units_command(command: &UnitsCommand, store: &SqliteStore, format: OutputFormat) -> Result<()> {
    match command {
        UnitsCommand::List { status } => {
            let filter = status
                .as_deref()
                .map(UnitStatus::from_str)
                .transpose()?;
            let units = store.list_units(filter)?;
            print_units(&units, format)?;
        }
        UnitsCommand::Add {
            call_sign,
            unit_type,
            lon,
            lat,
            capabilities,
        } => {
            let unit_type = UnitType::from_str(unit_type)?;
            let location = finite_point(*lon, *lat)?;
            let capabilities = capabilities
                .iter()
                .map(|raw| Capability::from_str(raw))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let new_unit = NewUnit::available(call_sign.as_str(), unit_type, location)
                .with_capabilities(capabilities);
            let unit = store.insert_unit(&new_unit)?;
            info!(unit_id = %unit.id, call_sign = %unit.call_sign, "registered unit");
            print_units(&[unit], format)?;
        }
        UnitsCommand::Show { id } => {
            let unit = store
                .unit_by_id(id)?
                .ok_or_else(|| anyhow!("unit not found: {id}"))?;
            print_units(&[unit], format)?;
        }
        UnitsCommand::Status { id, status } => {
            let status = UnitStatus::from_str(status)?;
            let unit = store
                .update_unit_status(id, status)?
                .ok_or_else(|| anyhow!("unit not found: {id}"))?;
            print_units(&[unit], format)?;
        }
        UnitsCommand::Nearest {
            lon,
            lat,
            max_distance,
            limit,
        } => {
            let point = finite_point(*lon, *lat)?;
            let units = store.list_units(Some(UnitStatus::Available))?;
            let nearby = nearest_available(&units, point, *max_distance / 1000.0, *limit);
            print_nearby(&nearby, format)?;
        }
        UnitsCommand::Assign { id, incident } => {
            let assignment = store.assign_unit(id, incident)?;
            info!(unit_id = %assignment.unit.id, incident_id = %assignment.incident.id, "unit assigned");
            print_assignment(&assignment, format)?;
        }
        UnitsCommand::EnRoute { id } => {
            let unit = store.mark_en_route(id)?;
            print_units(&[unit], format)?;
        }
    }
    Ok(())
}

async fn handle_incidents_command(
    command: &IncidentsCommand,
    config: &Config,
    store: &SqliteStore,
    format: OutputFormat,
) -> Result<()> {
    match command {
        IncidentsCommand::List => print_incidents(&store.list_incidents()?, format)?,
        IncidentsCommand::Create {
            incident_type,
            priority,
            lon,
            lat,
            address,
            description,
        } => {
            let new_incident = NewIncident::new(
                incident_type.as_str(),
                *priority,
                GeoPoint::new(*lon, *lat),
                address.as_str(),
                description.as_str(),
            );
            new_incident.validate()?;
            let incident = store.insert_incident(&new_incident)?;
            info!(incident_id = %incident.id, incident_type = %incident.incident_type, "registered incident");
            print_incidents(&[incident], format)?;
        }
        IncidentsCommand::Show { id } => {
            let incident = store
                .incident_by_id(id)?
                .ok_or_else(|| anyhow!("incident not found: {id}"))?;
            print_incidents(&[incident], format)?;
        }
        IncidentsCommand::Status { id, status } => {
            let status = IncidentStatus::from_str(status)?;
            let incident = store
                .update_incident_status(id, status)?
                .ok_or_else(|| anyhow!("incident not found: {id}"))?;
            print_incidents(&[incident], format)?;
        }
        IncidentsCommand::Recommend { id } => {
            let incident = store
                .incident_by_id(id)?
                .ok_or_else(|| anyhow!("incident not found: {id}"))?;
            let ranked =
                recommend_locally(config, store, &incident.recommendation_request()).await?;
            print_candidates(&ranked, format)?;
        }
        IncidentsCommand::Dispatch {
            id,
            unit,
            recommendation,
        } => {
            let assignment = store.dispatch_unit(id, unit, recommendation.as_deref())?;
            info!(unit_id = %assignment.unit.id, incident_id = %assignment.incident.id, "unit dispatched");
            print_assignment(&assignment, format)?;
        }
    }
    Ok(())
}

fn handle_recommendations_command(
    command: &RecommendationsCommand,
    store: &SqliteStore,
    format: OutputFormat,
) -> Result<()> {
    match command {
        RecommendationsCommand::List { incident } => {
            let batches = match incident {
                Some(incident_id) => store.batches_for_incident(incident_id)?,
                None => store.list_batches()?,
            };
            print_batches(&batches, format)?;
        }
        RecommendationsCommand::Show { id } => {
            let batch = store
                .batch_by_id(id)?
                .ok_or_else(|| anyhow!("recommendation not found: {id}"))?;
            print_batches(std::slice::from_ref(&batch), format)?;
            if matches!(format, OutputFormat::Table) {
                print_candidates(&batch.batch.recommendations, format)?;
            }
        }
        RecommendationsCommand::Accept { id, unit } => {
            let assignment = store.accept_recommendation(id, unit)?;
            info!(batch_id = %id, unit_id = %assignment.unit.id, "recommendation accepted");
            print_assignment(&assignment, format)?;
        }
        RecommendationsCommand::Reject { id } => {
            let batch = store.reject_recommendation(id)?;
            info!(batch_id = %batch.id, "recommendation rejected");
            print_batches(&[batch], format)?;
        }
    }
    Ok(())
}

fn finite_point(lon: f64, lat: f64) -> Result<GeoPoint> {
    let point = GeoPoint::new(lon, lat);
    if !point.is_finite() {
        return Err(anyhow!("--lon and --lat must be finite numbers"));
    }
    Ok(point)
}

fn handle_config_command(command: &Commands, config: &Config, config_path: &PathBuf) -> Result<()> {
    let Commands::Config { init, show } = command else {
        return Ok(());
    };
    if *init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if *show || !*init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn print_candidates(candidates: &[ScoredCandidate], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if candidates.is_empty() {
                println!("No available units.");
            } else {
                println!("{}", render_candidates_table(candidates));
            }
        }
        OutputFormat::Json => println!("{}", render_json(candidates)?),
        OutputFormat::Csv => print!("{}", candidates_to_csv(candidates)?),
    }
    Ok(())
}

fn print_units(units: &[Unit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_units_table(units)),
        OutputFormat::Json => println!("{}", render_json(units)?),
        OutputFormat::Csv => print!("{}", units_to_csv(units)?),
    }
    Ok(())
}

fn print_batches(batches: &[StoredBatch], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_batches_table(batches)),
        OutputFormat::Json => println!("{}", render_json(batches)?),
        OutputFormat::Csv => print!("{}", batches_to_csv(batches)?),
    }
    Ok(())
}

fn print_incidents(incidents: &[Incident], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_incidents_table(incidents)),
        OutputFormat::Json => println!("{}", render_json(incidents)?),
        OutputFormat::Csv => print!("{}", incidents_to_csv(incidents)?),
    }
    Ok(())
}

fn print_nearby(units: &[NearbyUnit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if units.is_empty() {
                println!("No available units in range.");
            } else {
                println!("{}", render_nearby_table(units));
            }
        }
        OutputFormat::Json => println!("{}", render_json(units)?),
        OutputFormat::Csv => print!("{}", nearby_units_to_csv(units)?),
    }
    Ok(())
}

fn print_assignment(assignment: &Assignment, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(assignment)?),
        _ => {
            print_incidents(std::slice::from_ref(&assignment.incident), format)?;
            print_units(std::slice::from_ref(&assignment.unit), format)?;
        }
    }
    Ok(())
}
