use clap::{Parser, Subcommand};
use guarantee_db::{GuaranteeStore, mask_password, schema};
use mend::{Observed, PgBackend, TableRef, diff, inspect, reconcile};
use owo_colors::OwoColorize;
use std::process::ExitCode;

/// Guarantee records with a self-healing table.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Schema the table lives in (overrides DATABASE_SCHEMA)
    #[arg(long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the expected CREATE TABLE statement
    Schema,
    /// Show what a reconciliation pass would do, without doing it
    Diff,
    /// Run one reconciliation pass now
    Reconcile,
    /// Look a guarantee up by number and anti-fake code
    Verify {
        number: String,
        code: String,
    },
    /// List guarantees, newest first
    List {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guarantee_db=info,mend=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> guarantee_db::Result<mend::Config> {
    dotenvy::dotenv().ok();
    let mut config = match &cli.database_url {
        Some(url) => mend::Config::from_lookup(|name| match name {
            "DATABASE_URL" => Some(url.clone()),
            other => std::env::var(other).ok(),
        })?,
        None => mend::Config::from_env()?,
    };
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    Ok(config)
}

async fn connect(config: &mend::Config) -> guarantee_db::Result<tokio_postgres::Client> {
    eprintln!("{} {}", "database:".dimmed(), mask_password(&config.database_url));
    let (client, connection) = tokio_postgres::connect(&config.database_url, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "connection closed");
        }
    });
    Ok(client)
}

async fn run(cli: Cli) -> guarantee_db::Result<ExitCode> {
    match &cli.command {
        Commands::Schema => {
            let namespace = cli.namespace.as_deref().unwrap_or("public");
            let table = schema::guarantees();
            for stmt in mend::Action::CreateTable(table).to_sql(&TableRef::new(namespace, schema::TABLE)) {
                println!("{stmt}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diff => {
            let config = load_config(&cli)?;
            let client = connect(&config).await?;
            let backend = PgBackend::with_namespace(&client, &config.namespace);

            let expected = schema::guarantees();
            let observed = inspect(&backend, schema::TABLE).await?;
            if observed == Observed::NotFound {
                println!("{}", "table does not exist yet".yellow());
            }
            let diff = diff(&expected, &observed);
            if diff.is_empty() {
                println!("{} {}", schema::TABLE.bold(), "is up to date".green());
                return Ok(ExitCode::SUCCESS);
            }

            println!("{}:", diff.table.bold());
            for action in &diff.actions {
                let line = action.to_string();
                match line.chars().next() {
                    Some('+') => println!("  {}", line.green()),
                    Some('-') => println!("  {}", line.red()),
                    _ => println!("  {}", line.yellow()),
                }
            }
            println!();
            println!("{}", diff.to_sql(&config.namespace).dimmed());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reconcile => {
            let config = load_config(&cli)?;
            let client = connect(&config).await?;
            let backend = PgBackend::with_namespace(&client, &config.namespace);

            let observed = inspect(&backend, schema::TABLE).await?;
            let report = reconcile(&backend, &diff(&schema::guarantees(), &observed)).await?;
            if report.is_clean() {
                println!("{}", report.to_string().green());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{}", report.to_string().red());
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Verify { number, code } => {
            let config = load_config(&cli)?;
            let pool = guarantee_db::open_pool(&config)?;
            let conn = pool.get().await?;
            let store = GuaranteeStore::with_namespace(&conn, pool.namespace());

            match store.verify(number, code).await? {
                Some(g) => {
                    println!("{}", "genuine".green().bold());
                    println!("  number:       {}", g.guarantee_number);
                    println!("  beneficiary:  {}", g.beneficiary);
                    println!("  applicant:    {}", g.applicant);
                    println!("  project:      {}", g.project_name);
                    println!("  amount:       {}", g.guarantee_amount);
                    println!("  expires:      {}", g.expiry_date);
                    println!("  guarantor:    {}", g.guarantor);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("{}", "no guarantee matches this number and code".red());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::List { limit } => {
            let config = load_config(&cli)?;
            let pool = guarantee_db::open_pool(&config)?;
            let conn = pool.get().await?;
            let store = GuaranteeStore::with_namespace(&conn, pool.namespace());

            let guarantees = store.list((*limit).clamp(1, 100)).await?;
            if guarantees.is_empty() {
                println!("No guarantees.");
            }
            for g in guarantees {
                println!(
                    "{:>5}  {:<20} {:<8} {:>16}  {}  {}",
                    g.id,
                    g.guarantee_number.bold(),
                    g.anti_fake_code,
                    g.guarantee_amount,
                    g.expiry_date,
                    g.guarantor.dimmed()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
